//! Kinegraph Animation Core
//!
//! Engine-agnostic building blocks consumed by the blend-graph runtime:
//! - [`Transform`] and pose slices (`[Transform]`, one entry per joint, parent-local space)
//! - [`Skeleton`] hierarchy with rest pose and local-to-model conversion
//! - [`AnimationSource`] sampling contract plus a keyframed [`KeyframeClip`]
//! - pose blending and the two-bone IK solver

pub mod blend;
pub mod clip;
pub mod events;
pub mod ik;
pub mod skeleton;
pub mod transform;

pub use blend::{blend_poses, BlendLayer};
pub use clip::{AnimationSource, ClipProvider, JointTrack, Key, KeyframeClip, SamplingContext};
pub use events::{ClipEvent, EventSink, EventTrack, NullEventSink};
pub use ik::{IkCorrections, TwoBoneIk};
pub use skeleton::{Joint, Skeleton, SkeletonError};
pub use transform::{nlerp_shortest, Transform};

pub use nalgebra::{Quaternion, UnitQuaternion, Vector3, Vector4};
