//! Simulation harness: drives a tree and a model with the same operations.

use std::collections::BTreeMap;

use crate::storage::MemoryStorage;
use crate::storage::btree::{BTree, BTreeError};
use crate::testing::TestRecord;

use super::{OpGenConfig, OpGenerator, Operation};

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Degree cap for the tree. Small values exercise splits and merges.
    pub max_degree: usize,
    /// Operation mix.
    pub op_config: OpGenConfig,
    /// Reopen the tree over the same storage every this many steps.
    pub reopen_every: Option<usize>,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_degree: 3,
            op_config: OpGenConfig::default(),
            reopen_every: None,
        }
    }

    /// Set the degree cap.
    #[must_use]
    pub const fn with_max_degree(mut self, degree: usize) -> Self {
        self.max_degree = degree;
        self
    }

    /// Set the operation mix.
    #[must_use]
    pub fn with_op_config(mut self, config: OpGenConfig) -> Self {
        self.op_config = config;
        self
    }

    /// Reopen the tree periodically.
    #[must_use]
    pub const fn with_reopen_every(mut self, steps: usize) -> Self {
        self.reopen_every = Some(steps);
        self
    }
}

/// A disagreement between the tree and the model, or a structural error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Step at which the violation was detected.
    pub step: usize,
    /// The operation being applied.
    pub operation: Option<Operation>,
    /// What went wrong.
    pub message: String,
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    /// Number of operations applied.
    pub steps: usize,
    /// Number of records in the model at the end.
    pub final_len: usize,
    /// Height of the tree at the end, if it verified.
    pub final_height: Option<usize>,
    /// Violations detected; the run stops at the first one.
    pub violations: Vec<Violation>,
}

impl SimulationResult {
    /// Check if the simulation passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// The main simulator harness.
pub struct Simulator {
    config: SimulatorConfig,
    generator: OpGenerator,
    model: BTreeMap<u32, u32>,
}

impl Simulator {
    /// Create a new simulator with the given configuration.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let generator = OpGenerator::with_config(config.seed, config.op_config.clone());
        Self {
            config,
            generator,
            model: BTreeMap::new(),
        }
    }

    /// Apply `steps` operations to a fresh in-memory tree.
    pub fn run(&mut self, steps: usize) -> SimulationResult {
        let mut result = SimulationResult {
            seed: self.config.seed,
            steps: 0,
            final_len: 0,
            final_height: None,
            violations: Vec::new(),
        };

        let mut tree = match self.open(MemoryStorage::new()) {
            Ok(tree) => tree,
            Err(e) => {
                result.violations.push(Violation {
                    step: 0,
                    operation: None,
                    message: format!("failed to open tree: {e}"),
                });
                return result;
            }
        };

        for step in 0..steps {
            if let Some(every) = self.config.reopen_every {
                if step > 0 && step % every == 0 {
                    match self.open(tree.into_storage()) {
                        Ok(reopened) => tree = reopened,
                        Err(e) => {
                            result.violations.push(Violation {
                                step,
                                operation: None,
                                message: format!("failed to reopen tree: {e}"),
                            });
                            return result;
                        }
                    }
                }
            }

            let op = self.generator.next_op();
            result.steps = step + 1;

            if let Err(message) = self.apply(&mut tree, op).and_then(|()| self.check(&tree)) {
                result.violations.push(Violation {
                    step,
                    operation: Some(op),
                    message,
                });
                return result;
            }
        }

        result.final_len = self.model.len();
        result.final_height = tree.verify().ok().map(|stats| stats.height);
        result
    }

    fn open(&self, storage: MemoryStorage) -> Result<BTree<TestRecord, MemoryStorage>, BTreeError> {
        BTree::with_max_degree(storage, self.config.max_degree)
    }

    /// Apply one operation to both sides and compare the outcomes.
    fn apply(&mut self, tree: &mut BTree<TestRecord, MemoryStorage>, op: Operation) -> Result<(), String> {
        match op {
            Operation::Put { key, payload } => {
                let got = tree
                    .insert_or_update(TestRecord::new(key, payload))
                    .map_err(|e| e.to_string())?
                    .map(|r| r.payload);
                let expected = self.model.insert(key, payload);
                compare("previous payload", got, expected)
            }
            Operation::Delete { key } => {
                let got = tree.delete(&key).map_err(|e| e.to_string())?.map(|r| r.payload);
                let expected = self.model.remove(&key);
                compare("removed payload", got, expected)
            }
            Operation::Search { key } => {
                let got = tree.search(&key).map_err(|e| e.to_string())?.map(|r| r.payload);
                compare("search result", got, self.model.get(&key).copied())
            }
            Operation::Range { low, high } => {
                let got: Vec<(u32, u32)> = tree
                    .range_search(&low, &high)
                    .map_err(|e| e.to_string())?
                    .into_iter()
                    .map(|r| (r.id, r.payload))
                    .collect();
                let expected: Vec<(u32, u32)> = self.model.range(low..=high).map(|(k, v)| (*k, *v)).collect();
                compare("range result", got, expected)
            }
        }
    }

    /// Check structure and full contents after a step.
    fn check(&self, tree: &BTree<TestRecord, MemoryStorage>) -> Result<(), String> {
        let stats = tree.verify().map_err(|e| e.to_string())?;
        if stats.entries != self.model.len() {
            return Err(format!(
                "tree holds {} entries, model holds {}",
                stats.entries,
                self.model.len()
            ));
        }

        let got: Vec<(u32, u32)> = tree
            .traverse_all()
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|r| (r.id, r.payload))
            .collect();
        let expected: Vec<(u32, u32)> = self.model.iter().map(|(k, v)| (*k, *v)).collect();
        compare("traversal", got, expected)
    }
}

fn compare<T: PartialEq + std::fmt::Debug>(what: &str, got: T, expected: T) -> Result<(), String> {
    if got == expected {
        Ok(())
    } else {
        Err(format!("{what} mismatch: tree {got:?}, model {expected:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_smallest_degree() {
        for seed in [1, 2, 3] {
            let result = Simulator::new(SimulatorConfig::new(seed).with_max_degree(2)).run(1500);
            assert!(result.passed(), "seed {}: {:?}", result.seed, result.violations);
            assert_eq!(result.steps, 1500);
        }
    }

    #[test]
    fn test_simulation_degree_three_with_reopen() {
        let config = SimulatorConfig::new(42).with_max_degree(3).with_reopen_every(97);
        let result = Simulator::new(config).run(2000);
        assert!(result.passed(), "{:?}", result.violations);
    }

    #[test]
    fn test_simulation_grows_multiple_levels() {
        // Insert-heavy mix over a wide key space builds a deep tree.
        let config = SimulatorConfig::new(7).with_max_degree(2).with_op_config(OpGenConfig {
            key_space: 10_000,
            put_rate: 0.85,
            delete_rate: 0.1,
            search_rate: 0.03,
        });
        let result = Simulator::new(config).run(1000);
        assert!(result.passed(), "{:?}", result.violations);
        assert!(result.final_height.is_some_and(|h| h >= 4));
        assert!(result.final_len > 500);
    }

    #[test]
    fn test_simulation_natural_degree_churn() {
        let config = SimulatorConfig::new(11).with_max_degree(170).with_op_config(OpGenConfig {
            key_space: 2_000,
            put_rate: 0.6,
            delete_rate: 0.35,
            search_rate: 0.0,
        });
        let result = Simulator::new(config).run(3000);
        assert!(result.passed(), "{:?}", result.violations);
    }
}
