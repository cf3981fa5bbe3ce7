//! Per-node mutable state that persists across passes.

use kinegraph_animation_core::SamplingContext;
use kinegraph_physics_core::{Body, BodyOutput};

use crate::nodes::NodeOp;

/// Clips shorter than this never advance.
pub const MIN_CLIP_DURATION: f32 = 1e-5;

#[derive(Debug, Clone)]
pub struct SampleState {
    /// Playback position as a ratio of the clip duration, in [0,1).
    pub local_time: f32,
    pub speed_mod: f32,
    /// Ratio step of the last advance not yet scanned for clip events.
    pub pending_step: f32,
    pub context: SamplingContext,
}

impl SampleState {
    pub fn new(context: SamplingContext) -> Self {
        Self {
            local_time: 0.0,
            speed_mod: 0.0,
            pending_step: 0.0,
            context,
        }
    }

    /// Move forward by `delta_time` seconds; returns whether playback wrapped around.
    pub fn advance(&mut self, duration: f32, delta_time: f32) -> bool {
        if duration <= MIN_CLIP_DURATION {
            return false;
        }
        let step = delta_time * (1.0 + self.speed_mod) / duration;
        if !step.is_finite() {
            log::warn!("sample: non-finite time step ignored");
            return false;
        }
        let time = self.local_time + step;
        let floor = time.floor();
        self.local_time = time - floor;
        self.pending_step += step;
        floor != 0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpringBoneState {
    pub body: Option<Body>,
    /// Frame counter value of the last step, so repeated passes within a frame reuse it.
    pub stepped_frame: Option<u64>,
    pub last_output: Option<BodyOutput>,
}

/// Shared by the smoothing and rate-limiting nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterState {
    pub value: Option<f32>,
    /// Seconds advanced since the last pass.
    pub time_step: f32,
}

#[derive(Debug, Clone, Default)]
pub enum NodeInstanceData {
    #[default]
    None,
    Sample(SampleState),
    StaticPose(SamplingContext),
    Blend2D {
        last_triangle: usize,
    },
    SpringBone(SpringBoneState),
    Variable {
        value: f32,
    },
    Filter(FilterState),
}

impl NodeInstanceData {
    pub fn for_op(op: &NodeOp) -> Self {
        match op {
            NodeOp::Sample(clip) => NodeInstanceData::Sample(SampleState::new(clip.clip.create_context())),
            NodeOp::StaticPose(clip) => NodeInstanceData::StaticPose(clip.clip.create_context()),
            NodeOp::Blend2D(_) => NodeInstanceData::Blend2D { last_triangle: 0 },
            NodeOp::SpringBone(_) => NodeInstanceData::SpringBone(SpringBoneState::default()),
            NodeOp::Variable(var) => NodeInstanceData::Variable { value: var.default },
            NodeOp::Smooth { .. } | NodeOp::LimitRate { .. } => {
                NodeInstanceData::Filter(FilterState::default())
            }
            _ => NodeInstanceData::None,
        }
    }

    pub fn sample_state(&self) -> Option<&SampleState> {
        match self {
            NodeInstanceData::Sample(state) => Some(state),
            _ => None,
        }
    }

    pub fn variable_value(&self) -> Option<f32> {
        match self {
            NodeInstanceData::Variable { value } => Some(*value),
            _ => None,
        }
    }

    pub(crate) fn sample_state_mut(&mut self) -> &mut SampleState {
        match self {
            NodeInstanceData::Sample(state) => state,
            _ => unreachable!("sample instance state expected"),
        }
    }

    pub(crate) fn clip_context_mut(&mut self) -> &mut SamplingContext {
        match self {
            NodeInstanceData::StaticPose(context) => context,
            _ => unreachable!("static pose instance state expected"),
        }
    }

    pub(crate) fn last_triangle_mut(&mut self) -> &mut usize {
        match self {
            NodeInstanceData::Blend2D { last_triangle } => last_triangle,
            _ => unreachable!("blend instance state expected"),
        }
    }

    pub(crate) fn spring_bone_state_mut(&mut self) -> &mut SpringBoneState {
        match self {
            NodeInstanceData::SpringBone(state) => state,
            _ => unreachable!("spring bone instance state expected"),
        }
    }

    pub(crate) fn filter_state_mut(&mut self) -> &mut FilterState {
        match self {
            NodeInstanceData::Filter(state) => state,
            _ => unreachable!("filter instance state expected"),
        }
    }
}
