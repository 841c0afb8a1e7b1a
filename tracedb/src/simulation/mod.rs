//! Randomized simulation testing for the B-tree.
//!
//! A simulation replays a seeded sequence of inserts, upserts, deletes and
//! lookups against both a `BTree` and a `std::collections::BTreeMap` model,
//! checking after every step that the two agree and that the tree's
//! structure verifies. Given the same seed, execution is identical.
//!
//! # Usage
//!
//! ```ignore
//! use simulation::{Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345).with_max_degree(3);
//! let result = Simulator::new(config).run(1000);
//!
//! assert!(result.passed(), "{:?}", result.violations);
//! ```

mod ops;
mod simulator;

pub use ops::{OpGenConfig, OpGenerator, Operation};
pub use simulator::{Simulator, SimulatorConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_replays_identically() {
        let run = |seed| {
            let config = SimulatorConfig::new(seed)
                .with_max_degree(2)
                .with_op_config(OpGenConfig {
                    key_space: 300,
                    ..OpGenConfig::default()
                });
            Simulator::new(config).run(400)
        };

        let first = run(2024);
        let second = run(2024);
        assert!(first.passed(), "seed {}: {:?}", first.seed, first.violations);
        assert_eq!(first.seed, 2024);
        assert_eq!(
            (first.seed, first.final_len, first.final_height),
            (second.seed, second.final_len, second.final_height)
        );
    }
}
