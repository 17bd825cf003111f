//! In-memory record of how far each partition has been consumed.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::upstream::{Marker, PartitionId};

/// Partition id to the marker of the last record processed for it. Entries are never evicted.
///
/// The lease table guarantees a single writer per partition, the lock only guards the map.
#[derive(Clone, Default, Debug)]
pub struct CursorStore {
    cursors: Arc<RwLock<HashMap<PartitionId, Marker>>>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, partition: &PartitionId) -> Option<Marker> {
        self.cursors.read().get(partition).cloned()
    }

    /// Records `marker` for the partition. A marker ordering before the stored one is ignored, so
    /// a cursor never moves backwards. Returns whether the cursor was updated.
    pub fn set(&self, partition: PartitionId, marker: Marker) -> bool {
        let mut cursors = self.cursors.write();
        match cursors.get(&partition) {
            Some(current) if *current >= marker => {
                if *current > marker {
                    tracing::warn!(
                        shard_id = %partition,
                        current = %current,
                        rejected = %marker,
                        "Ignoring cursor regression"
                    );
                }
                false
            }
            _ => {
                cursors.insert(partition, marker);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cursors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.read().is_empty()
    }
}
