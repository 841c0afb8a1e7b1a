//! Reproducible random operation sequences.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// One step of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Write a record; the key may or may not exist yet.
    Put { key: u32, payload: u32 },
    /// Remove a key; the key may or may not exist.
    Delete { key: u32 },
    /// Point lookup.
    Search { key: u32 },
    /// Inclusive range scan.
    Range { low: u32, high: u32 },
}

/// Mix of operations produced by `OpGenerator`.
#[derive(Debug, Clone)]
pub struct OpGenConfig {
    /// Keys are drawn from `0..key_space`. A small space forces many
    /// upserts and deletes of present keys.
    pub key_space: u32,
    /// Probability of a `Put`.
    pub put_rate: f64,
    /// Probability of a `Delete`.
    pub delete_rate: f64,
    /// Probability of a `Search`; the remainder are `Range` scans.
    pub search_rate: f64,
}

impl Default for OpGenConfig {
    fn default() -> Self {
        Self {
            key_space: 500,
            put_rate: 0.5,
            delete_rate: 0.3,
            search_rate: 0.1,
        }
    }
}

/// Generator for random `Operation`s.
pub struct OpGenerator {
    rng: StdRng,
    config: OpGenConfig,
}

impl OpGenerator {
    /// Create a generator with default rates.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, OpGenConfig::default())
    }

    /// Create a generator with custom rates.
    #[must_use]
    pub fn with_config(seed: u64, config: OpGenConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    /// Produce the next operation.
    pub fn next_op(&mut self) -> Operation {
        let roll = self.rng.random::<f64>();
        let key = self.rng.random_range(0..self.config.key_space);

        if roll < self.config.put_rate {
            Operation::Put {
                key,
                payload: self.rng.random(),
            }
        } else if roll < self.config.put_rate + self.config.delete_rate {
            Operation::Delete { key }
        } else if roll < self.config.put_rate + self.config.delete_rate + self.config.search_rate {
            Operation::Search { key }
        } else {
            let span = self.rng.random_range(0..=self.config.key_space / 10);
            Operation::Range {
                low: key,
                high: key.saturating_add(span),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = OpGenerator::new(99);
        let mut b = OpGenerator::new(99);
        for _ in 0..200 {
            assert_eq!(a.next_op(), b.next_op());
        }
    }

    #[test]
    fn test_keys_stay_in_space() {
        let mut generator = OpGenerator::with_config(
            7,
            OpGenConfig {
                key_space: 10,
                ..OpGenConfig::default()
            },
        );
        for _ in 0..500 {
            match generator.next_op() {
                Operation::Put { key, .. } | Operation::Delete { key } | Operation::Search { key } => {
                    assert!(key < 10);
                }
                Operation::Range { low, high } => assert!(low < 10 && low <= high),
            }
        }
    }
}
