//! Per-instance runtime for a compiled graph.
//!
//! A [`GraphDefinition`] is shared and immutable; an [`EvaluationContext`] owns everything
//! that changes from frame to frame: node instance state, the result slot of every node,
//! the model-space cache, root transforms and the physics integrator.
//!
//! A frame is `advance_time` (moves clocks and physics) followed by any number of
//! `evaluate` passes. Passes within one frame are idempotent: spring bones step once per
//! advance, filters consume the time step once.

use std::sync::Arc;

use kinegraph_animation_core::{EventSink, Transform};
use kinegraph_physics_core::{PhysicsConfig, PhysicsIntegrator};

use crate::compiler::GraphDefinition;
use crate::pool::{PoseHandle, PosePool};
use crate::value::EvaluationResult;

mod eval_node;
pub mod instance;
pub mod model_space;
mod sync;

use eval_node::{evaluate_node, Frame, NodeInputs};
pub use instance::{FilterState, NodeInstanceData, SampleState, SpringBoneState};
pub use model_space::ModelSpaceCache;
pub use sync::{SyncSnapshot, SyncState};

pub struct EvaluationContext {
    definition: Arc<GraphDefinition>,
    instances: Vec<NodeInstanceData>,
    results: Vec<EvaluationResult>,
    model_space: ModelSpaceCache,
    rest_pose: PoseHandle,
    root: Transform,
    prev_root: Transform,
    root_initialized: bool,
    physics: Option<PhysicsIntegrator>,
    frame: u64,
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("nodes", &self.instances.len())
            .field("frame", &self.frame)
            .field("physics", &self.physics.is_some())
            .finish_non_exhaustive()
    }
}

impl EvaluationContext {
    pub fn new(definition: Arc<GraphDefinition>) -> Self {
        Self::with_physics_config(definition, PhysicsConfig::default())
    }

    /// The integrator is only created when the graph contains spring bones.
    pub fn with_physics_config(definition: Arc<GraphDefinition>, config: PhysicsConfig) -> Self {
        let instances = definition
            .nodes()
            .iter()
            .map(|node| NodeInstanceData::for_op(&node.op))
            .collect();
        let results = vec![EvaluationResult::Empty; definition.nodes().len()];
        let physics = definition
            .needs_physics_integrator()
            .then(|| PhysicsIntegrator::new(config));
        Self {
            instances,
            results,
            model_space: ModelSpaceCache::new(definition.joint_count()),
            rest_pose: PoseHandle::detached(definition.skeleton().rest_pose().to_vec()),
            root: Transform::identity(),
            prev_root: Transform::identity(),
            root_initialized: false,
            physics,
            frame: 0,
            definition,
        }
    }

    pub fn definition(&self) -> &Arc<GraphDefinition> {
        &self.definition
    }

    pub fn requires_rest_pose(&self) -> bool {
        self.definition.needs_rest_pose()
    }

    pub fn requires_physics_integrator(&self) -> bool {
        self.definition.needs_physics_integrator()
    }

    pub fn physics(&self) -> Option<&PhysicsIntegrator> {
        self.physics.as_ref()
    }

    /// Instance state of the node at evaluation index `index`.
    pub fn instance(&self, index: usize) -> Option<&NodeInstanceData> {
        self.instances.get(index)
    }

    /// Result slot of the node at evaluation index `index` after the last pass.
    ///
    /// Slots released during the pass read as `Empty`.
    pub fn result(&self, index: usize) -> Option<&EvaluationResult> {
        self.results.get(index)
    }

    /// Run one pass and return the output pose in parent-local space.
    ///
    /// Returns `None` when `pool` was built for a different joint count or could not supply
    /// the output buffer.
    pub fn evaluate(
        &mut self,
        pool: &PosePool,
        events: &mut dyn EventSink,
    ) -> Option<&[Transform]> {
        let joint_count = self.definition.joint_count();
        if pool.joint_count() != joint_count {
            log::warn!(
                "evaluate: pool holds {} joints, skeleton has {}",
                pool.joint_count(),
                joint_count
            );
            return None;
        }

        self.model_space.reset();
        self.results.fill(EvaluationResult::Empty);

        let definition = Arc::clone(&self.definition);
        let mut frame = Frame {
            skeleton: definition.skeleton().as_ref(),
            pool,
            events,
            model_space: &mut self.model_space,
            rest_pose: &self.rest_pose,
            physics: self.physics.as_ref(),
            frame: self.frame,
        };

        for (idx, node) in definition.nodes().iter().enumerate() {
            let (done, pending) = self.results.split_at_mut(idx);
            let inputs = NodeInputs {
                node,
                results: done,
                rest_pose: frame.rest_pose,
            };
            pending[0] = evaluate_node(node, &inputs, &mut self.instances[idx], &mut frame);
            for &released in &node.releases {
                self.results[released] = EvaluationResult::Empty;
            }
        }

        let output = self.results[definition.output()].as_pose();
        if output.is_none() {
            log::warn!("evaluate: output node produced no pose");
        }
        output.map(PoseHandle::pose)
    }

    /// Move every clock forward by `delta_time` seconds.
    ///
    /// Returns whether the loop-tracking sample node wrapped around.
    pub fn advance_time(&mut self, delta_time: f32) -> bool {
        let dt = if delta_time.is_finite() && delta_time >= 0.0 {
            delta_time
        } else {
            log::warn!("advance_time: ignoring invalid delta {delta_time}");
            0.0
        };

        if let Some(physics) = self.physics.as_mut() {
            physics.update(dt, &self.root, &self.prev_root);
        }
        self.prev_root = self.root;
        self.frame += 1;

        let tracker = self.definition.loop_tracker();
        let mut looped = false;
        let nodes = self.definition.nodes();
        for (idx, (node, instance)) in nodes.iter().zip(self.instances.iter_mut()).enumerate() {
            match instance {
                NodeInstanceData::Sample(state) => {
                    let duration = node.op.clip_duration().unwrap_or(0.0);
                    let wrapped = state.advance(duration, dt);
                    if tracker == Some(idx) {
                        looped = wrapped;
                    }
                }
                NodeInstanceData::Filter(filter) => filter.time_step += dt,
                _ => {}
            }
        }
        looped
    }

    /// World transform of the actor root for the coming frame.
    ///
    /// The first call also becomes the previous root so the integrator does not see a jump
    /// from the origin.
    pub fn set_root_transform(&mut self, world: Transform) {
        self.root = world;
        if !self.root_initialized {
            self.prev_root = world;
            self.root_initialized = true;
        }
    }

    pub fn set_root_transforms(&mut self, current: Transform, previous: Transform) {
        self.root = current;
        self.prev_root = previous;
        self.root_initialized = true;
    }

    pub fn root_transform(&self) -> &Transform {
        &self.root
    }

    /// Replace the pose handed out by `rest_pose` nodes. Rejected on joint count mismatch.
    pub fn set_rest_pose(&mut self, pose: PoseHandle) -> bool {
        if pose.len() != self.definition.joint_count() {
            log::warn!(
                "set_rest_pose: pose has {} joints, skeleton has {}",
                pose.len(),
                self.definition.joint_count()
            );
            return false;
        }
        self.rest_pose = pose;
        true
    }

    /// Drop accumulated physics time, root motion and spring-bone state, e.g. after a
    /// teleport. Bodies are seeded again on the next pass.
    pub fn reset_physics(&mut self) {
        if let Some(physics) = self.physics.as_mut() {
            physics.reset();
        }
        self.prev_root = self.root;
        for instance in &mut self.instances {
            if let NodeInstanceData::SpringBone(state) = instance {
                *state = SpringBoneState::default();
            }
        }
    }

    /// Set every variable node named `name` (case-insensitive).
    ///
    /// Returns false when no node carries the name or the value is not finite.
    pub fn set_variable(&mut self, name: &str, value: f32) -> bool {
        if !value.is_finite() {
            log::warn!("set_variable: ignoring non-finite value for '{name}'");
            return false;
        }
        let nodes = self.definition.variable_nodes(name);
        for &idx in nodes {
            if let NodeInstanceData::Variable { value: slot } = &mut self.instances[idx] {
                *slot = value;
            }
        }
        !nodes.is_empty()
    }

    pub fn variable(&self, name: &str) -> Option<f32> {
        let idx = *self.definition.variable_nodes(name).first()?;
        self.instances[idx].variable_value()
    }

    /// Every variable with its current value, sorted by lower-cased name.
    pub fn variables(&self) -> Vec<(&str, f32)> {
        let mut vars: Vec<(&str, f32)> = self
            .definition
            .variables()
            .iter()
            .filter_map(|(name, nodes)| {
                let value = self.instances[*nodes.first()?].variable_value()?;
                Some((name.as_str(), value))
            })
            .collect();
        vars.sort_by(|a, b| a.0.cmp(b.0));
        vars
    }
}

#[cfg(test)]
mod tests;
