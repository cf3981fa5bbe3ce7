use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use hashbrown::HashMap;
use kinegraph_animation_core::{
    AnimationSource, ClipEvent, Joint, JointTrack, Key, KeyframeClip, Quaternion, Skeleton,
    Transform, UnitQuaternion, Vector3,
};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Deserialize;

static MANIFEST: Lazy<Manifest> = Lazy::new(|| {
    let raw = include_str!("../../../../fixtures/manifest.json");
    serde_json::from_str(raw).expect("fixtures manifest should parse")
});

#[derive(Debug, Deserialize)]
struct Manifest {
    skeletons: HashMap<String, String>,
    clips: HashMap<String, String>,
    #[serde(rename = "node-graphs")]
    node_graphs: HashMap<String, NodeGraphEntry>,
}

#[derive(Debug, Deserialize)]
struct NodeGraphEntry {
    spec: String,
}

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures")
}

fn resolve_path(rel: &str) -> PathBuf {
    fixtures_root().join(rel)
}

fn read_to_string(rel: &str) -> Result<String> {
    let path = resolve_path(rel);
    fs::read_to_string(&path)
        .with_context(|| format!("failed to read fixture at {}", path.display()))
}

fn load_json<T: DeserializeOwned>(rel: &str) -> Result<T> {
    let text = read_to_string(rel)?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse JSON fixture {rel}"))
}

fn lookup<'a, T>(map: &'a HashMap<String, T>, kind: &str, name: &str) -> Result<&'a T> {
    map.get(name)
        .ok_or_else(|| anyhow!("unknown {kind} fixture '{name}'"))
}

fn sorted_keys<T>(map: &HashMap<String, T>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

fn vector(v: [f32; 3]) -> Vector3<f32> {
    Vector3::new(v[0], v[1], v[2])
}

/// `[x, y, z, w]`, normalized on load.
fn rotation(q: [f32; 4]) -> UnitQuaternion<f32> {
    UnitQuaternion::from_quaternion(Quaternion::new(q[3], q[0], q[1], q[2]))
}

pub mod skeletons {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct SkeletonFixture {
        joints: Vec<JointFixture>,
    }

    #[derive(Debug, Deserialize)]
    struct JointFixture {
        name: String,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        translation: [f32; 3],
        #[serde(default = "identity_rotation")]
        rotation: [f32; 4],
    }

    fn identity_rotation() -> [f32; 4] {
        [0.0, 0.0, 0.0, 1.0]
    }

    pub fn keys() -> Vec<String> {
        sorted_keys(&MANIFEST.skeletons)
    }

    pub fn json(name: &str) -> Result<String> {
        let rel = lookup(&MANIFEST.skeletons, "skeleton", name)?;
        read_to_string(rel)
    }

    /// Build the named skeleton. Parents are referenced by joint name.
    pub fn load(name: &str) -> Result<Arc<Skeleton>> {
        let rel = lookup(&MANIFEST.skeletons, "skeleton", name)?;
        let fixture: SkeletonFixture = load_json(rel)?;
        let mut joints: Vec<Joint> = Vec::with_capacity(fixture.joints.len());
        for joint in fixture.joints {
            let parent = match &joint.parent {
                Some(parent) => Some(
                    joints
                        .iter()
                        .position(|j| &j.name == parent)
                        .ok_or_else(|| {
                            anyhow!("joint '{}' names unknown parent '{parent}'", joint.name)
                        })?,
                ),
                None => None,
            };
            let rest = Transform::new(
                vector(joint.translation),
                rotation(joint.rotation),
                Vector3::repeat(1.0),
            );
            joints.push(Joint::new(joint.name, parent, rest));
        }
        let skeleton =
            Skeleton::new(joints).with_context(|| format!("invalid skeleton fixture '{name}'"))?;
        Ok(Arc::new(skeleton))
    }
}

pub mod clips {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct ClipFixture {
        name: String,
        duration: f32,
        #[serde(default)]
        tracks: Vec<TrackFixture>,
        #[serde(default)]
        events: Vec<ClipEvent>,
    }

    #[derive(Debug, Deserialize)]
    struct TrackFixture {
        joint: String,
        #[serde(default)]
        translations: Vec<VectorKey>,
        #[serde(default)]
        rotations: Vec<RotationKey>,
    }

    #[derive(Debug, Deserialize)]
    struct VectorKey {
        ratio: f32,
        value: [f32; 3],
    }

    /// `value` is `[x, y, z, w]`.
    #[derive(Debug, Deserialize)]
    struct RotationKey {
        ratio: f32,
        value: [f32; 4],
    }

    pub fn keys() -> Vec<String> {
        sorted_keys(&MANIFEST.clips)
    }

    pub fn json(name: &str) -> Result<String> {
        let rel = lookup(&MANIFEST.clips, "clip", name)?;
        read_to_string(rel)
    }

    /// Build the named clip over `skeleton`; untouched channels hold the rest pose.
    pub fn load(name: &str, skeleton: &Skeleton) -> Result<Arc<dyn AnimationSource>> {
        let rel = lookup(&MANIFEST.clips, "clip", name)?;
        let fixture: ClipFixture = load_json(rel)?;
        let mut clip = KeyframeClip::new(fixture.name, fixture.duration, skeleton.rest_pose());
        for track in fixture.tracks {
            let joint = skeleton
                .find_joint(&track.joint)
                .ok_or_else(|| anyhow!("clip '{name}' animates unknown joint '{}'", track.joint))?;
            clip = clip.with_track(
                joint,
                JointTrack {
                    translations: track
                        .translations
                        .iter()
                        .map(|k| Key::new(k.ratio, vector(k.value)))
                        .collect(),
                    rotations: track
                        .rotations
                        .iter()
                        .map(|k| Key::new(k.ratio, rotation(k.value)))
                        .collect(),
                    scales: Vec::new(),
                },
            );
        }
        Ok(Arc::new(clip.with_events(fixture.events)))
    }

    /// Every clip fixture, keyed by manifest name.
    pub fn library(skeleton: &Skeleton) -> Result<HashMap<String, Arc<dyn AnimationSource>>> {
        keys()
            .into_iter()
            .map(|name| load(&name, skeleton).map(|clip| (name, clip)))
            .collect()
    }
}

pub mod node_graphs {
    use super::*;

    pub fn keys() -> Vec<String> {
        sorted_keys(&MANIFEST.node_graphs)
    }

    pub fn spec_json(name: &str) -> Result<String> {
        let entry = lookup(&MANIFEST.node_graphs, "node graph", name)?;
        read_to_string(&entry.spec)
    }

    pub fn spec<T: DeserializeOwned>(name: &str) -> Result<T> {
        let entry = lookup(&MANIFEST.node_graphs, "node graph", name)?;
        super::load_json(&entry.spec)
    }

    pub fn spec_path(name: &str) -> Result<PathBuf> {
        let entry = lookup(&MANIFEST.node_graphs, "node graph", name)?;
        Ok(resolve_path(&entry.spec))
    }
}
