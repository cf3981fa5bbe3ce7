//! Bounded pool of pose buffers handed out as reference-counted handles.
//!
//! A node that produces a new pose acquires a [`PoseMut`], writes into it and freezes it into
//! a [`PoseHandle`]. Handles are cheap to clone; the storage goes back to the pool when the
//! last clone is dropped. The compiler schedules those drops so that an accepted graph never
//! needs more than the pool's capacity at once.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use kinegraph_animation_core::Transform;

pub const DEFAULT_POSE_POOL_CAPACITY: usize = 4;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

fn next_buffer_id() -> u64 {
    NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct PoolState {
    capacity: usize,
    free: Vec<Vec<Transform>>,
    live: usize,
    peak: usize,
}

#[derive(Clone)]
pub struct PosePool {
    state: Arc<Mutex<PoolState>>,
    joint_count: usize,
}

impl fmt::Debug for PosePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PosePool")
            .field("joint_count", &self.joint_count)
            .field("capacity", &self.capacity())
            .field("live", &self.live())
            .finish()
    }
}

impl PosePool {
    pub fn new(joint_count: usize, capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                capacity,
                free: Vec::with_capacity(capacity),
                live: 0,
                peak: 0,
            })),
            joint_count,
        }
    }

    pub fn with_default_capacity(joint_count: usize) -> Self {
        Self::new(joint_count, DEFAULT_POSE_POOL_CAPACITY)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a buffer, or `None` when `capacity` buffers are already live.
    ///
    /// Recycled buffers keep whatever the previous owner wrote; callers overwrite every joint.
    pub fn acquire(&self) -> Option<PoseMut> {
        let data = {
            let mut state = self.lock();
            if state.live >= state.capacity {
                return None;
            }
            state.live += 1;
            state.peak = state.peak.max(state.live);
            state.free.pop()
        };
        let mut data = data.unwrap_or_default();
        data.resize(self.joint_count, Transform::identity());
        Some(PoseMut {
            buffer: PoseBuffer {
                id: next_buffer_id(),
                data,
                pool: Some(Arc::downgrade(&self.state)),
            },
        })
    }

    pub fn joint_count(&self) -> usize {
        self.joint_count
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Buffers currently handed out.
    pub fn live(&self) -> usize {
        self.lock().live
    }

    /// Highest `live` count observed since creation or the last [`PosePool::reset_peak`].
    pub fn peak(&self) -> usize {
        self.lock().peak
    }

    pub fn reset_peak(&self) {
        let mut state = self.lock();
        state.peak = state.live;
    }
}

struct PoseBuffer {
    id: u64,
    data: Vec<Transform>,
    pool: Option<Weak<Mutex<PoolState>>>,
}

impl Drop for PoseBuffer {
    fn drop(&mut self) {
        let Some(shared) = self.pool.take().and_then(|weak| weak.upgrade()) else {
            return;
        };
        let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
        state.live = state.live.saturating_sub(1);
        state.free.push(std::mem::take(&mut self.data));
    }
}

/// Uniquely owned, writable pose buffer.
pub struct PoseMut {
    buffer: PoseBuffer,
}

impl PoseMut {
    pub fn id(&self) -> u64 {
        self.buffer.id
    }

    pub fn freeze(self) -> PoseHandle {
        PoseHandle(Arc::new(self.buffer))
    }
}

impl Deref for PoseMut {
    type Target = [Transform];

    fn deref(&self) -> &[Transform] {
        &self.buffer.data
    }
}

impl DerefMut for PoseMut {
    fn deref_mut(&mut self) -> &mut [Transform] {
        &mut self.buffer.data
    }
}

/// Shared, read-only pose buffer.
#[derive(Clone)]
pub struct PoseHandle(Arc<PoseBuffer>);

impl PoseHandle {
    /// Wrap a pose that does not belong to any pool (e.g. the rest pose).
    pub fn detached(pose: Vec<Transform>) -> Self {
        PoseHandle(Arc::new(PoseBuffer {
            id: next_buffer_id(),
            data: pose,
            pool: None,
        }))
    }

    /// Unique per acquire; recycled storage gets a fresh id.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn pose(&self) -> &[Transform] {
        &self.0.data
    }

    pub fn is_pooled(&self) -> bool {
        self.0.pool.is_some()
    }
}

impl Deref for PoseHandle {
    type Target = [Transform];

    fn deref(&self) -> &[Transform] {
        self.pose()
    }
}

impl fmt::Debug for PoseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoseHandle")
            .field("id", &self.0.id)
            .field("joints", &self.0.data.len())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}
