//! Sequential reference engine.
//!
//! Deterministic ground truth for the accelerated backend: one plain
//! breadth-first search per seed over the node arena, with fresh scratch
//! distances for every seed.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::{EngineError, TortuosityEngine};
use crate::types::NodeArena;

/// Sequential single-seed BFS over a node arena.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceEngine<'a> {
    arena: &'a NodeArena,
}

impl<'a> ReferenceEngine<'a> {
    /// Create an engine over `arena`.
    pub fn new(arena: &'a NodeArena) -> Self {
        Self { arena }
    }

    /// Hops from `seed` to its nearest periodic image anywhere in the arena.
    pub fn nearest_image(&self, seed: usize) -> Result<Option<u32>, EngineError> {
        self.search(seed, |_| true)
    }

    /// Hops from `seed` to its nearest periodic image, walking only `members`.
    pub fn nearest_image_within(
        &self,
        seed: usize,
        members: &BTreeSet<usize>,
    ) -> Result<Option<u32>, EngineError> {
        if seed < self.arena.len() && !members.contains(&seed) {
            return Err(EngineError::SeedNotMember(seed));
        }
        self.search(seed, |index| members.contains(&index))
    }

    fn search<F>(&self, seed: usize, admit: F) -> Result<Option<u32>, EngineError>
    where
        F: Fn(usize) -> bool,
    {
        let root = self.arena.get(seed).ok_or(EngineError::NodeOutOfRange {
            index: seed,
            len: self.arena.len(),
        })?;

        let mut distance: BTreeMap<usize, u32> = BTreeMap::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        distance.insert(seed, 0);
        queue.push_back(seed);

        while let Some(current) = queue.pop_front() {
            let Some(node) = self.arena.get(current) else {
                continue;
            };
            let d = distance[&current];

            if current != seed && node.uc_index == root.uc_index {
                return Ok(Some(d));
            }

            for &neighbour in &node.neighbours {
                if admit(neighbour) && !distance.contains_key(&neighbour) {
                    distance.insert(neighbour, d + 1);
                    queue.push_back(neighbour);
                }
            }
        }

        Ok(None)
    }
}

impl TortuosityEngine for ReferenceEngine<'_> {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn seed_tortuosities(
        &mut self,
        seeds: &[usize],
        members: &BTreeSet<usize>,
    ) -> Result<Vec<Option<u32>>, EngineError> {
        seeds
            .iter()
            .map(|&seed| self.nearest_image_within(seed, members))
            .collect()
    }
}
