//! Cross-instance time synchronization.
//!
//! Nodes tagged with the same sync id in different contexts follow one owner: sample nodes
//! copy its playback position and speed modifier, variable nodes copy its value. Data only
//! flows from owner to follower.

use std::sync::{Mutex, PoisonError};

use super::instance::NodeInstanceData;
use super::EvaluationContext;

/// State of one sync-id-tagged node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncState {
    Sample { local_time: f32, speed_mod: f32 },
    Variable(f32),
}

impl SyncState {
    fn same_kind(&self, instance: &NodeInstanceData) -> bool {
        matches!(
            (self, instance),
            (SyncState::Sample { .. }, NodeInstanceData::Sample(_))
                | (SyncState::Variable(_), NodeInstanceData::Variable { .. })
        )
    }
}

/// Copy of an owner's sync-id-tagged state, taken under its lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    entries: Vec<(u64, SyncState)>,
}

impl SyncSnapshot {
    pub fn entries(&self) -> &[(u64, SyncState)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, sync_id: u64, instance: &NodeInstanceData) -> Option<SyncState> {
        self.entries
            .iter()
            .find(|(id, state)| *id == sync_id && state.same_kind(instance))
            .map(|(_, state)| *state)
    }
}

impl EvaluationContext {
    pub fn sync_snapshot(&self) -> SyncSnapshot {
        let entries = self
            .definition
            .nodes()
            .iter()
            .zip(&self.instances)
            .filter_map(|(node, instance)| {
                let sync_id = node.sync_id?;
                let state = match instance {
                    NodeInstanceData::Sample(sample) => SyncState::Sample {
                        local_time: sample.local_time,
                        speed_mod: sample.speed_mod,
                    },
                    NodeInstanceData::Variable { value } => SyncState::Variable(*value),
                    _ => return None,
                };
                Some((sync_id, state))
            })
            .collect();
        SyncSnapshot { entries }
    }

    /// Adopt the owner's state for every node with a matching sync id and kind, then move
    /// sample nodes forward by `correction_delta` seconds when it is positive.
    ///
    /// Returns the number of nodes updated.
    pub fn apply_sync_snapshot(&mut self, snapshot: &SyncSnapshot, correction_delta: f32) -> usize {
        if snapshot.is_empty() {
            return 0;
        }
        let correction = if correction_delta.is_finite() {
            correction_delta
        } else {
            0.0
        };
        let mut updated = 0;
        for (node, instance) in self.definition.nodes().iter().zip(self.instances.iter_mut()) {
            let Some(sync_id) = node.sync_id else {
                continue;
            };
            let Some(state) = snapshot.find(sync_id, instance) else {
                continue;
            };
            match (state, instance) {
                (
                    SyncState::Sample {
                        local_time,
                        speed_mod,
                    },
                    NodeInstanceData::Sample(sample),
                ) => {
                    sample.local_time = local_time;
                    sample.speed_mod = speed_mod;
                    if correction > 0.0 {
                        sample.advance(node.op.clip_duration().unwrap_or(0.0), correction);
                    }
                }
                (SyncState::Variable(owner), NodeInstanceData::Variable { value }) => {
                    *value = owner;
                }
                _ => continue,
            }
            updated += 1;
        }
        updated
    }

    /// Follow `owner` directly. The borrow rules keep a context from following itself.
    pub fn synchronize_with(&mut self, owner: &EvaluationContext, correction_delta: f32) -> usize {
        let snapshot = owner.sync_snapshot();
        self.apply_sync_snapshot(&snapshot, correction_delta)
    }

    /// Follow an owner shared with other threads.
    ///
    /// The owner's lock is held only while its state is copied. `owner` must not be the
    /// mutex guarding `self`; a context cannot follow itself.
    pub fn synchronize(&mut self, owner: &Mutex<EvaluationContext>, correction_delta: f32) -> usize {
        let snapshot = owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sync_snapshot();
        self.apply_sync_snapshot(&snapshot, correction_delta)
    }
}
