//! Filepath: src/coordinator.rs
//!
//! Reference-count settlement between the point store and a forest of
//! trees.
//!
//! One sample's lifecycle: `init_update` stores the point (one reference,
//! the input handle); each tree's update result then bumps the reference
//! of the point its new leaf references and drops the reference of any
//! evicted leaf; finally the input handle itself is dropped exactly once.
//! Everything settles before the next sample begins.

use crate::pointstore::PointStore;
use crate::tracing_helpers::trace_log;
use crate::tree::{TreeError, UpdateResult};

/// Mediates point-store reference counts across tree updates.
#[derive(Debug)]
pub struct UpdateCoordinator {
    store: PointStore,
    total_updates: u64,
}

impl UpdateCoordinator {
    #[must_use]
    pub fn new(store: PointStore) -> Self {
        Self {
            store,
            total_updates: 0,
        }
    }

    /// The shared point store, read-only from the trees' perspective.
    #[must_use]
    pub fn store(&self) -> &PointStore {
        &self.store
    }

    #[must_use]
    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    /// Store the incoming point and return its handle.
    pub fn init_update(&mut self, point: &[f32]) -> Result<u32, TreeError> {
        self.store.add(point)
    }

    /// Settle reference counts after the trees consumed the sample.
    ///
    /// Trees that skipped the sample contribute `None` and change nothing.
    pub fn complete_update(
        &mut self,
        results: &[Option<UpdateResult>],
        update_input: u32,
    ) -> Result<(), TreeError> {
        for result in results.iter().flatten() {
            self.store.increment_ref_count(result.inserted_point)?;

            if let Some(evicted) = result.evicted_point {
                self.store.decrement_ref_count(evicted)?;
            }
        }

        self.store.decrement_ref_count(update_input)?;
        self.total_updates += 1;
        trace_log!(update_input, "update settled");
        Ok(())
    }
}
