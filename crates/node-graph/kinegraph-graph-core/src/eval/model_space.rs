//! Lazily filled model-space transforms for the pose currently being edited.
//!
//! Bone queries and modifiers need model-space transforms of a prefix of the skeleton. The
//! cache remembers which pose buffer it was filled from and how many joints are valid, so a
//! chain of modifiers working on the same buffer only recomputes what changed.

use kinegraph_animation_core::{Skeleton, Transform};

#[derive(Debug, Clone, Default)]
pub struct ModelSpaceCache {
    transforms: Vec<Transform>,
    /// Joints `0..filled` are valid for `source`.
    filled: usize,
    source: Option<u64>,
}

impl ModelSpaceCache {
    pub fn new(joint_count: usize) -> Self {
        Self {
            transforms: vec![Transform::identity(); joint_count],
            filled: 0,
            source: None,
        }
    }

    pub fn reset(&mut self) {
        self.filled = 0;
        self.source = None;
    }

    /// Model-space transforms of `pose`, valid at least up to joint `up_to` inclusive.
    pub fn ensure(
        &mut self,
        skeleton: &Skeleton,
        source: u64,
        pose: &[Transform],
        up_to: usize,
    ) -> &[Transform] {
        if self.transforms.len() != skeleton.joint_count() {
            self.transforms
                .resize(skeleton.joint_count(), Transform::identity());
            self.reset();
        }
        if self.source != Some(source) {
            self.source = Some(source);
            self.filled = 0;
        }
        if up_to >= self.filled {
            skeleton.local_to_model(pose, &mut self.transforms, self.filled, up_to);
            self.filled = (up_to + 1).min(self.transforms.len());
        }
        &self.transforms
    }

    /// Follow a pose that was copied from `from` into `to` and edited from joint
    /// `first_modified` onwards.
    ///
    /// Joints are ordered parent-first, so everything before `first_modified` stays valid.
    pub fn rebind(&mut self, from: u64, to: u64, first_modified: usize) {
        if self.source == Some(from) {
            self.source = Some(to);
            self.filled = self.filled.min(first_modified);
        } else {
            self.reset();
        }
    }
}
