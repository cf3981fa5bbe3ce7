//! Host-facing pose generator and sync groups.
//!
//! [`ProceduralGenerator`] is what an animation system drives each frame:
//! `advance_time`, optional `synchronize`, then `generate`. [`SyncGroup`] keeps the
//! generators sharing sync ids in step with one owner.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use kinegraph_animation_core::{EventSink, Transform};
use kinegraph_physics_core::PhysicsConfig;

use crate::compiler::GraphDefinition;
use crate::eval::EvaluationContext;
use crate::pool::PosePool;

/// Generator shared between the host and the sync groups it belongs to.
pub type SharedGenerator = Arc<Mutex<ProceduralGenerator>>;

#[derive(Debug)]
pub struct ProceduralGenerator {
    context: EvaluationContext,
    speed: f32,
    paused: bool,
    looped: bool,
}

impl ProceduralGenerator {
    pub fn new(definition: Arc<GraphDefinition>) -> Self {
        Self::from_context(EvaluationContext::new(definition))
    }

    pub fn with_physics_config(definition: Arc<GraphDefinition>, config: PhysicsConfig) -> Self {
        Self::from_context(EvaluationContext::with_physics_config(definition, config))
    }

    pub fn from_context(context: EvaluationContext) -> Self {
        Self {
            context,
            speed: 1.0,
            paused: false,
            looped: false,
        }
    }

    pub fn into_shared(self) -> SharedGenerator {
        Arc::new(Mutex::new(self))
    }

    pub fn generate(
        &mut self,
        pool: &PosePool,
        events: &mut dyn EventSink,
    ) -> Option<&[Transform]> {
        self.context.evaluate(pool, events)
    }

    /// Advance by `delta_time` scaled by the playback speed. A paused generator still
    /// ticks with a zero delta so physics and filters see the frame.
    pub fn advance_time(&mut self, delta_time: f32) -> bool {
        let dt = if self.paused {
            0.0
        } else {
            delta_time * self.speed
        };
        self.looped = self.context.advance_time(dt);
        self.looped
    }

    /// Whether the last advance wrapped the loop-tracking clip.
    pub fn looped(&self) -> bool {
        self.looped
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Negative and non-finite speeds are rejected.
    pub fn set_speed(&mut self, speed: f32) -> bool {
        if !speed.is_finite() || speed < 0.0 {
            log::warn!("generator: ignoring invalid speed {speed}");
            return false;
        }
        self.speed = speed;
        true
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Copy the owner's synchronized state. `owner` must not be the mutex guarding `self`.
    pub fn synchronize(&mut self, owner: &Mutex<ProceduralGenerator>, correction_delta: f32) -> usize {
        let snapshot = owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .context
            .sync_snapshot();
        self.context.apply_sync_snapshot(&snapshot, correction_delta)
    }

    pub fn set_variable(&mut self, name: &str, value: f32) -> bool {
        self.context.set_variable(name, value)
    }

    pub fn variable(&self, name: &str) -> Option<f32> {
        self.context.variable(name)
    }

    pub fn variables(&self) -> Vec<(&str, f32)> {
        self.context.variables()
    }

    pub fn set_root_transform(&mut self, world: Transform) {
        self.context.set_root_transform(world);
    }

    pub fn requires_rest_pose(&self) -> bool {
        self.context.requires_rest_pose()
    }

    pub fn requires_physics_integrator(&self) -> bool {
        self.context.requires_physics_integrator()
    }

    pub fn definition(&self) -> &Arc<GraphDefinition> {
        self.context.definition()
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut EvaluationContext {
        &mut self.context
    }
}

/// Generators that follow one owner's sync-id-tagged clocks.
///
/// Every member reports each time it advanced. Non-owners copy the owner's state right
/// away. If the owner has not advanced yet this frame, followers are moved ahead by the
/// time the owner is about to advance, so the order in which the host updates its actors
/// does not matter. A member reporting twice starts a new frame.
#[derive(Debug, Default)]
pub struct SyncGroup {
    owner: Option<Weak<Mutex<ProceduralGenerator>>>,
    updated: Vec<Weak<Mutex<ProceduralGenerator>>>,
    owner_updated: bool,
}

impl SyncGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(owner: &SharedGenerator) -> Self {
        let mut group = Self::new();
        group.set_owner(Some(owner));
        group
    }

    pub fn set_owner(&mut self, owner: Option<&SharedGenerator>) {
        self.owner = owner.map(Arc::downgrade);
        self.updated.clear();
        self.owner_updated = false;
    }

    /// `None` once the owner has been dropped.
    pub fn owner(&self) -> Option<SharedGenerator> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    fn is_owner(&self, member: &SharedGenerator) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|owner| std::ptr::eq(owner.as_ptr(), Arc::as_ptr(member)))
    }

    /// Report that `member` advanced by `delta_time` this frame.
    ///
    /// `generator` is the member's locked contents. The owner is locked while its state is
    /// copied, so hosts sharing a group across threads lock the group before any member.
    /// Returns whether the member was synchronized.
    pub fn member_advanced(
        &mut self,
        member: &SharedGenerator,
        generator: &mut ProceduralGenerator,
        delta_time: f32,
    ) -> bool {
        let seen = self
            .updated
            .iter()
            .any(|m| std::ptr::eq(m.as_ptr(), Arc::as_ptr(member)));
        if seen {
            self.updated.clear();
            self.owner_updated = false;
        }
        self.updated.push(Arc::downgrade(member));

        if self.is_owner(member) {
            self.owner_updated = true;
            return false;
        }
        let Some(owner) = self.owner() else {
            return false;
        };

        let (snapshot, owner_speed) = {
            let owner = owner.lock().unwrap_or_else(PoisonError::into_inner);
            (owner.context.sync_snapshot(), owner.speed)
        };
        let correction = if self.owner_updated {
            0.0
        } else {
            delta_time * owner_speed
        };
        generator
            .context
            .apply_sync_snapshot(&snapshot, correction);
        true
    }
}
