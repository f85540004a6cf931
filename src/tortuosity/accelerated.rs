//! Parallel tortuosity backend.
//!
//! The backend holds a flattened copy of the graph: per-node neighbour
//! lists and unit-cell indices, compressed into CSR arrays before the first
//! `compute`. Seeds are distributed over rayon worker threads; every worker
//! owns its BFS scratch, reads the shared adjacency, and returns one value
//! per seed, which is then written to the seed's unit-cell slot. Searches
//! run through [`TortuosityEngine`] are confined to a membership mask built
//! from the cluster's node set.
//!
//! ## Lifecycle
//!
//! ```text
//! new() → allocate(total, sites) → set_node_topology(..) × total → compute(seeds) → uc_tortuosity()
//!                                                                                  → release()
//! ```
//!
//! The handle is owned: independent graphs use independent backends, or
//! share one through [`SharedBackend`], which serializes whole
//! allocate→use→release sessions. Dropping a backend releases it.

use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::{EngineError, TortuosityEngine};
use crate::types::NodeArena;

/// Adjacency and result buffers of one allocation.
#[derive(Debug)]
struct Allocation {
    uc_index: Vec<Option<usize>>,
    neighbours: Vec<Vec<usize>>,
    csr: Option<Csr>,
    uc_tort: Vec<Option<u32>>,
}

/// Compressed sparse row adjacency.
#[derive(Debug)]
struct Csr {
    offsets: Vec<usize>,
    targets: Vec<usize>,
    uc_index: Vec<Option<usize>>,
}

impl Csr {
    fn from_lists(uc_index: &[Option<usize>], neighbours: &[Vec<usize>]) -> Self {
        let mut offsets = Vec::with_capacity(neighbours.len() + 1);
        let mut targets = Vec::with_capacity(neighbours.iter().map(Vec::len).sum());
        offsets.push(0);
        for list in neighbours {
            targets.extend_from_slice(list);
            offsets.push(targets.len());
        }
        Self {
            offsets,
            targets,
            uc_index: uc_index.to_vec(),
        }
    }

    fn len(&self) -> usize {
        self.uc_index.len()
    }

    fn neighbours(&self, node: usize) -> &[usize] {
        &self.targets[self.offsets[node]..self.offsets[node + 1]]
    }

    /// BFS from `seed`; with a mask, nodes marked false are never entered.
    fn nearest_image(&self, seed: usize, mask: Option<&[bool]>, scratch: &mut Scratch) -> Option<u32> {
        let target = self.uc_index[seed]?;
        scratch.begin(seed);

        while let Some(current) = scratch.queue.pop_front() {
            let d = scratch.distance[current];
            if current != seed && self.uc_index[current] == Some(target) {
                return Some(d);
            }
            for &neighbour in self.neighbours(current) {
                if mask.is_some_and(|m| !m[neighbour]) {
                    continue;
                }
                if scratch.visit(neighbour) {
                    scratch.distance[neighbour] = d + 1;
                    scratch.queue.push_back(neighbour);
                }
            }
        }
        None
    }
}

/// Per-worker BFS state.
///
/// Visits are stamped with an epoch, so starting a new search is O(1)
/// instead of clearing `total` entries.
#[derive(Debug)]
struct Scratch {
    epoch: u32,
    stamp: Vec<u32>,
    distance: Vec<u32>,
    queue: VecDeque<usize>,
}

impl Scratch {
    fn new(len: usize) -> Self {
        Self {
            epoch: 0,
            stamp: vec![0; len],
            distance: vec![0; len],
            queue: VecDeque::new(),
        }
    }

    fn begin(&mut self, seed: usize) {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            self.stamp.iter_mut().for_each(|s| *s = 0);
            self.epoch = 1;
        }
        self.queue.clear();
        self.stamp[seed] = self.epoch;
        self.distance[seed] = 0;
        self.queue.push_back(seed);
    }

    /// Mark `node` visited; false if it already was in this search.
    fn visit(&mut self, node: usize) -> bool {
        if self.stamp[node] == self.epoch {
            return false;
        }
        self.stamp[node] = self.epoch;
        true
    }
}

/// Owned handle to the parallel tortuosity backend.
#[derive(Debug)]
pub struct AcceleratedBackend {
    state: Option<Allocation>,
}

impl AcceleratedBackend {
    /// Whether this build includes the parallel backend.
    pub const fn is_available() -> bool {
        cfg!(feature = "parallel")
    }

    /// Create an unallocated backend.
    ///
    /// Fails with [`EngineError::Unavailable`] when the crate was built
    /// without the `parallel` feature.
    pub fn new() -> Result<Self, EngineError> {
        if !Self::is_available() {
            return Err(EngineError::Unavailable);
        }
        Ok(Self { state: None })
    }

    /// Whether topology buffers are allocated.
    pub fn is_allocated(&self) -> bool {
        self.state.is_some()
    }

    /// Number of nodes allocated, 0 when unallocated.
    pub fn total_nodes(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.uc_index.len())
    }

    /// Allocate buffers for `total_nodes` nodes and `unit_cell_nodes` sites.
    ///
    /// Replaces any previous allocation.
    pub fn allocate(&mut self, total_nodes: usize, unit_cell_nodes: usize) {
        if self.state.is_some() {
            debug!("Reallocating accelerated backend");
        }
        self.state = Some(Allocation {
            uc_index: vec![None; total_nodes],
            neighbours: vec![Vec::new(); total_nodes],
            csr: None,
            uc_tort: vec![None; unit_cell_nodes],
        });
        debug!(total_nodes, unit_cell_nodes, "Allocated accelerated backend");
    }

    /// Free all buffers. Safe to call when unallocated.
    pub fn release(&mut self) {
        if self.state.take().is_some() {
            debug!("Released accelerated backend");
        }
    }

    /// Set the unit-cell index and neighbour list of one node.
    pub fn set_node_topology(
        &mut self,
        node_index: usize,
        uc_index: usize,
        neighbour_indices: &[usize],
    ) -> Result<(), EngineError> {
        let state = self.state.as_mut().ok_or(EngineError::NotAllocated)?;
        let len = state.uc_index.len();
        if node_index >= len {
            return Err(EngineError::NodeOutOfRange { index: node_index, len });
        }
        if uc_index >= state.uc_tort.len() {
            return Err(EngineError::SiteOutOfRange {
                uc_index,
                len: state.uc_tort.len(),
            });
        }
        if let Some(&bad) = neighbour_indices.iter().find(|&&n| n >= len) {
            return Err(EngineError::NodeOutOfRange { index: bad, len });
        }

        state.uc_index[node_index] = Some(uc_index);
        state.neighbours[node_index] = neighbour_indices.to_vec();
        state.csr = None;
        Ok(())
    }

    /// Allocate for `arena` and copy its whole topology.
    pub fn load_topology(&mut self, arena: &NodeArena) -> Result<(), EngineError> {
        self.allocate(arena.len(), arena.site_count());
        for node in arena.iter() {
            let neighbours: Vec<usize> = node.neighbours.iter().copied().collect();
            self.set_node_topology(node.index, node.uc_index, &neighbours)?;
        }
        Ok(())
    }

    /// Run one BFS per seed in parallel and store results by unit-cell index.
    ///
    /// Searches may walk every loaded node.
    pub fn compute(&mut self, unit_cell_node_indices: &[usize]) -> Result<(), EngineError> {
        let results = self.run(unit_cell_node_indices, None)?;
        self.store(unit_cell_node_indices, &results)
    }

    /// Current per-site results; 0 marks a site without a computed value.
    ///
    /// Empty when unallocated.
    pub fn uc_tortuosity(&self) -> Vec<u32> {
        self.state
            .as_ref()
            .map(|s| s.uc_tort.iter().map(|t| t.unwrap_or(0)).collect())
            .unwrap_or_default()
    }

    /// Computed tortuosity of one site.
    pub fn tortuosity_of(&self, uc_index: usize) -> Option<u32> {
        self.state.as_ref()?.uc_tort.get(uc_index).copied().flatten()
    }

    fn store(&mut self, seeds: &[usize], results: &[Option<u32>]) -> Result<(), EngineError> {
        let state = self.state.as_mut().ok_or(EngineError::NotAllocated)?;
        for (&seed, &result) in seeds.iter().zip(results) {
            if let Some(uc) = state.uc_index[seed] {
                state.uc_tort[uc] = result;
            }
        }
        Ok(())
    }

    fn mask(&self, seeds: &[usize], members: &BTreeSet<usize>) -> Result<Vec<bool>, EngineError> {
        let len = self.total_nodes();
        let mut mask = vec![false; len];
        for &member in members {
            *mask
                .get_mut(member)
                .ok_or(EngineError::NodeOutOfRange { index: member, len })? = true;
        }
        if let Some(&seed) = seeds.iter().find(|&&s| s < len && !mask[s]) {
            return Err(EngineError::SeedNotMember(seed));
        }
        Ok(mask)
    }

    fn run(&mut self, seeds: &[usize], mask: Option<&[bool]>) -> Result<Vec<Option<u32>>, EngineError> {
        let state = self.state.as_mut().ok_or(EngineError::NotAllocated)?;
        let len = state.uc_index.len();
        for &seed in seeds {
            match state.uc_index.get(seed) {
                None => return Err(EngineError::NodeOutOfRange { index: seed, len }),
                Some(None) => return Err(EngineError::TopologyUnset(seed)),
                Some(Some(_)) => {}
            }
        }

        if state.csr.is_none() {
            state.csr = Some(Csr::from_lists(&state.uc_index, &state.neighbours));
        }
        let csr = state.csr.as_ref().ok_or(EngineError::NotAllocated)?;
        trace!(seeds = seeds.len(), nodes = csr.len(), "Accelerated compute");

        #[cfg(feature = "parallel")]
        let results = seeds
            .par_iter()
            .map_init(
                || Scratch::new(csr.len()),
                |scratch, &seed| csr.nearest_image(seed, mask, scratch),
            )
            .collect();

        #[cfg(not(feature = "parallel"))]
        let results = {
            let mut scratch = Scratch::new(csr.len());
            seeds
                .iter()
                .map(|&seed| csr.nearest_image(seed, mask, &mut scratch))
                .collect()
        };

        Ok(results)
    }
}

impl TortuosityEngine for AcceleratedBackend {
    fn name(&self) -> &'static str {
        "accelerated"
    }

    /// Also records each result in the seed's unit-cell slot.
    fn seed_tortuosities(
        &mut self,
        seeds: &[usize],
        members: &BTreeSet<usize>,
    ) -> Result<Vec<Option<u32>>, EngineError> {
        if !self.is_allocated() {
            return Err(EngineError::NotAllocated);
        }
        let mask = self.mask(seeds, members)?;
        let results = self.run(seeds, Some(&mask))?;
        self.store(seeds, &results)?;
        Ok(results)
    }
}

impl Drop for AcceleratedBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// A backend shared between independent graphs.
///
/// Each [`with_backend`](Self::with_backend) call holds the lock for a whole
/// allocate→use→release session and releases the buffers before unlocking.
#[derive(Debug, Clone)]
pub struct SharedBackend {
    inner: Arc<Mutex<AcceleratedBackend>>,
}

impl SharedBackend {
    /// Create a shared backend.
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self {
            inner: Arc::new(Mutex::new(AcceleratedBackend::new()?)),
        })
    }

    /// Run one exclusive session on the backend.
    pub fn with_backend<R>(&self, session: impl FnOnce(&mut AcceleratedBackend) -> R) -> R {
        let mut backend = self.inner.lock();
        let result = session(&mut backend);
        backend.release();
        result
    }
}


#[cfg(all(test, not(feature = "parallel")))]
mod unavailable_tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_without_feature() {
        assert!(!AcceleratedBackend::is_available());
        assert!(matches!(AcceleratedBackend::new(), Err(EngineError::Unavailable)));
    }
}
