//! Clip event annotations and the sink that receives them.

use serde::{Deserialize, Serialize};

/// Receives named events crossed while sampling clips.
pub trait EventSink {
    fn queue_event(&mut self, name: &str, arg: &str);
}

impl EventSink for Vec<(String, String)> {
    fn queue_event(&mut self, name: &str, arg: &str) {
        self.push((name.to_string(), arg.to_string()));
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn queue_event(&mut self, _name: &str, _arg: &str) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipEvent {
    /// Position in the clip as a ratio of its duration.
    pub ratio: f32,
    pub name: String,
    pub arg: String,
}

/// Keys within this ratio distance carrying the same event are treated as one.
const DUPLICATE_WINDOW: f32 = 0.001;

/// Sorted, de-duplicated set of events for one clip.
#[derive(Debug, Clone, Default)]
pub struct EventTrack {
    keys: Vec<ClipEvent>,
}

impl EventTrack {
    pub fn new(mut keys: Vec<ClipEvent>) -> Self {
        keys.retain(|k| k.ratio.is_finite());
        keys.sort_by(|a, b| a.ratio.total_cmp(&b.ratio));
        let mut deduped: Vec<ClipEvent> = Vec::with_capacity(keys.len());
        for key in keys {
            let duplicate = deduped.last().is_some_and(|prev| {
                (key.ratio - prev.ratio).abs() < DUPLICATE_WINDOW
                    && key.name == prev.name
                    && key.arg == prev.arg
            });
            if !duplicate {
                deduped.push(key);
            }
        }
        Self { keys: deduped }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[ClipEvent] {
        &self.keys
    }

    /// Emit every event crossed while moving `step` (in ratio units) up to `current`.
    ///
    /// Handles wrap-around in both directions; a zero step emits nothing.
    pub fn sample(&self, current: f32, step: f32, sink: &mut dyn EventSink) {
        if self.keys.is_empty() || step == 0.0 || !step.is_finite() {
            return;
        }
        let forwards = step > 0.0;
        let mut previous = current - step;
        let floor = previous.floor();
        let wrapped = floor != 0.0;
        previous -= floor;

        for key in &self.keys {
            let t = key.ratio;
            let crossed = match (forwards, wrapped) {
                (true, false) => t <= current && t > previous,
                (true, true) => t <= current || t > previous,
                (false, false) => t >= current && t < previous,
                (false, true) => t >= current || t < previous,
            };
            if crossed {
                sink.queue_event(&key.name, &key.arg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ratio: f32, name: &str) -> ClipEvent {
        ClipEvent {
            ratio,
            name: name.into(),
            arg: String::new(),
        }
    }

    #[test]
    fn it_should_drop_duplicate_keys_on_the_same_frame() {
        let track = EventTrack::new(vec![event(0.5, "step"), event(0.5004, "step"), event(0.2, "lift")]);
        let names: Vec<_> = track.keys().iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["lift", "step"]);
    }

    #[test]
    fn it_should_emit_events_across_the_loop_boundary() {
        let track = EventTrack::new(vec![event(0.95, "late"), event(0.05, "early"), event(0.5, "mid")]);
        let mut sink: Vec<(String, String)> = Vec::new();
        // Moved from 0.9 to 0.1 through the wrap.
        track.sample(0.1, 0.2, &mut sink);
        let names: Vec<_> = sink.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["early", "late"]);
    }

    #[test]
    fn it_should_not_emit_for_zero_step() {
        let track = EventTrack::new(vec![event(0.5, "mid")]);
        let mut sink: Vec<(String, String)> = Vec::new();
        track.sample(0.5, 0.0, &mut sink);
        assert!(sink.is_empty());
    }
}
