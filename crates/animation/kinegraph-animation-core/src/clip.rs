//! Clip sampling contract and a keyframed implementation.
//!
//! Model:
//! - A clip is sampled by normalized ratio in [0,1] over its whole duration.
//! - Each joint owns up to three channels (translation, rotation, scale); a channel with
//!   no keys falls back to the rest transform captured when the clip was built.
//! - Translation and scale interpolate linearly, rotation uses shortest-arc nlerp.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use nalgebra::{UnitQuaternion, Vector3};

use crate::events::{ClipEvent, EventSink, EventTrack};
use crate::transform::{nlerp_shortest, Transform};

/// Per-instance sampling cache. Holds one key cursor per channel so that sampling a clip
/// at slowly moving ratios stays close to O(1) per channel.
#[derive(Debug, Clone, Default)]
pub struct SamplingContext {
    cursors: Vec<usize>,
}

impl SamplingContext {
    pub fn with_channels(count: usize) -> Self {
        Self {
            cursors: vec![0; count],
        }
    }

    fn cursor_mut(&mut self, channel: usize) -> &mut usize {
        if channel >= self.cursors.len() {
            self.cursors.resize(channel + 1, 0);
        }
        &mut self.cursors[channel]
    }
}

/// Anything that can produce a local-space pose for a ratio of its duration.
pub trait AnimationSource: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Duration in seconds.
    fn duration(&self) -> f32;

    /// Number of joints written by [`AnimationSource::sample`].
    fn joint_count(&self) -> usize;

    fn create_context(&self) -> SamplingContext;

    fn sample(&self, ratio: f32, context: &mut SamplingContext, output: &mut [Transform]);

    /// Emit clip events crossed by moving `step` (ratio units) up to `ratio`.
    fn sample_events(&self, _ratio: f32, _step: f32, _sink: &mut dyn EventSink) {}
}

/// Resolves clip names used by graph descriptions.
pub trait ClipProvider {
    fn clip(&self, name: &str) -> Option<Arc<dyn AnimationSource>>;
}

impl ClipProvider for HashMap<String, Arc<dyn AnimationSource>> {
    fn clip(&self, name: &str) -> Option<Arc<dyn AnimationSource>> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Key<T> {
    pub ratio: f32,
    pub value: T,
}

impl<T> Key<T> {
    pub fn new(ratio: f32, value: T) -> Self {
        Self { ratio, value }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JointTrack {
    pub translations: Vec<Key<Vector3<f32>>>,
    pub rotations: Vec<Key<UnitQuaternion<f32>>>,
    pub scales: Vec<Key<Vector3<f32>>>,
}

impl JointTrack {
    fn sort(&mut self) {
        self.translations
            .sort_by(|a, b| a.ratio.total_cmp(&b.ratio));
        self.rotations.sort_by(|a, b| a.ratio.total_cmp(&b.ratio));
        self.scales.sort_by(|a, b| a.ratio.total_cmp(&b.ratio));
    }
}

const CHANNELS_PER_JOINT: usize = 3;

/// Locate the key pair around `ratio`, starting from the cached cursor.
/// Returns `(left, right, local_t)`; `left == right` when clamped to either end.
fn locate<T>(keys: &[Key<T>], ratio: f32, cursor: &mut usize) -> (usize, usize, f32) {
    let last = keys.len() - 1;
    if keys.len() == 1 || ratio <= keys[0].ratio {
        *cursor = 0;
        return (0, 0, 0.0);
    }
    if ratio >= keys[last].ratio {
        *cursor = last;
        return (last, last, 0.0);
    }
    let mut i = (*cursor).min(last - 1);
    while i > 0 && keys[i].ratio > ratio {
        i -= 1;
    }
    while i + 1 < last && keys[i + 1].ratio < ratio {
        i += 1;
    }
    *cursor = i;
    let span = (keys[i + 1].ratio - keys[i].ratio).max(f32::EPSILON);
    let t = ((ratio - keys[i].ratio) / span).clamp(0.0, 1.0);
    (i, i + 1, t)
}

fn sample_vector(
    keys: &[Key<Vector3<f32>>],
    ratio: f32,
    cursor: &mut usize,
    fallback: Vector3<f32>,
) -> Vector3<f32> {
    if keys.is_empty() {
        return fallback;
    }
    let (l, r, t) = locate(keys, ratio, cursor);
    keys[l].value.lerp(&keys[r].value, t)
}

fn sample_rotation(
    keys: &[Key<UnitQuaternion<f32>>],
    ratio: f32,
    cursor: &mut usize,
    fallback: UnitQuaternion<f32>,
) -> UnitQuaternion<f32> {
    if keys.is_empty() {
        return fallback;
    }
    let (l, r, t) = locate(keys, ratio, cursor);
    nlerp_shortest(&keys[l].value, &keys[r].value, t)
}

/// In-memory keyframed clip over a fixed joint count.
#[derive(Debug, Clone)]
pub struct KeyframeClip {
    name: String,
    duration: f32,
    rest: Vec<Transform>,
    tracks: Vec<JointTrack>,
    events: EventTrack,
}

impl KeyframeClip {
    /// Start a clip whose untouched channels hold `rest`.
    pub fn new(name: impl Into<String>, duration: f32, rest: &[Transform]) -> Self {
        Self {
            name: name.into(),
            duration: duration.max(0.0),
            rest: rest.to_vec(),
            tracks: vec![JointTrack::default(); rest.len()],
            events: EventTrack::default(),
        }
    }

    /// Install keys for `joint`. Out-of-range joints are ignored with a warning.
    pub fn with_track(mut self, joint: usize, mut track: JointTrack) -> Self {
        match self.tracks.get_mut(joint) {
            Some(slot) => {
                track.sort();
                *slot = track;
            }
            None => log::warn!(
                "clip '{}': track for joint {} ignored, clip has {} joints",
                self.name,
                joint,
                self.tracks.len()
            ),
        }
        self
    }

    pub fn with_events(mut self, events: Vec<ClipEvent>) -> Self {
        self.events = EventTrack::new(events);
        self
    }

    pub fn track(&self, joint: usize) -> Option<&JointTrack> {
        self.tracks.get(joint)
    }
}

impl AnimationSource for KeyframeClip {
    fn name(&self) -> &str {
        &self.name
    }

    fn duration(&self) -> f32 {
        self.duration
    }

    fn joint_count(&self) -> usize {
        self.rest.len()
    }

    fn create_context(&self) -> SamplingContext {
        SamplingContext::with_channels(self.tracks.len() * CHANNELS_PER_JOINT)
    }

    fn sample(&self, ratio: f32, context: &mut SamplingContext, output: &mut [Transform]) {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        for (joint, (track, out)) in self.tracks.iter().zip(output.iter_mut()).enumerate() {
            let rest = &self.rest[joint];
            let base = joint * CHANNELS_PER_JOINT;
            out.translation = sample_vector(
                &track.translations,
                ratio,
                context.cursor_mut(base),
                rest.translation,
            );
            out.rotation = sample_rotation(
                &track.rotations,
                ratio,
                context.cursor_mut(base + 1),
                rest.rotation,
            );
            out.scale = sample_vector(&track.scales, ratio, context.cursor_mut(base + 2), rest.scale);
        }
    }

    fn sample_events(&self, ratio: f32, step: f32, sink: &mut dyn EventSink) {
        self.events.sample(ratio, step, sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rising_clip() -> KeyframeClip {
        let rest = vec![Transform::identity(); 2];
        KeyframeClip::new("rise", 2.0, &rest).with_track(
            1,
            JointTrack {
                translations: vec![
                    Key::new(1.0, Vector3::new(0.0, 0.0, 2.0)),
                    Key::new(0.0, Vector3::zeros()),
                ],
                ..Default::default()
            },
        )
    }

    #[test]
    fn it_should_interpolate_between_keys() {
        let clip = rising_clip();
        let mut ctx = clip.create_context();
        let mut out = vec![Transform::identity(); 2];
        clip.sample(0.25, &mut ctx, &mut out);
        assert_relative_eq!(out[1].translation.z, 0.5, epsilon = 1e-6);
        clip.sample(0.75, &mut ctx, &mut out);
        assert_relative_eq!(out[1].translation.z, 1.5, epsilon = 1e-6);
        // Moving backwards reuses the cursor from the previous sample.
        clip.sample(0.1, &mut ctx, &mut out);
        assert_relative_eq!(out[1].translation.z, 0.2, epsilon = 1e-6);
    }

    #[test]
    fn it_should_fall_back_to_rest_for_empty_channels() {
        let clip = rising_clip();
        let mut ctx = clip.create_context();
        let mut out = vec![Transform::from_translation(Vector3::x()); 2];
        clip.sample(0.5, &mut ctx, &mut out);
        assert_eq!(out[0], Transform::identity());
    }

    #[test]
    fn it_should_ignore_tracks_past_the_joint_count() {
        let clip = rising_clip().with_track(9, JointTrack::default());
        assert!(clip.track(9).is_none());
        assert_eq!(clip.joint_count(), 2);
    }
}
