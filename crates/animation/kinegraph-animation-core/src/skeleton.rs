//! Joint hierarchy, rest pose and local-to-model conversion.

use hashbrown::HashMap;
use thiserror::Error;

use crate::transform::Transform;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkeletonError {
    #[error("skeleton has no joints")]
    Empty,
    #[error("joint '{joint}' has parent index {parent}, parents must precede their children")]
    ParentOutOfOrder { joint: String, parent: usize },
    #[error("duplicate joint name '{0}'")]
    DuplicateJoint(String),
}

/// Construction record for one joint.
#[derive(Debug, Clone)]
pub struct Joint {
    pub name: String,
    pub parent: Option<usize>,
    pub rest: Transform,
}

impl Joint {
    pub fn new(name: impl Into<String>, parent: Option<usize>, rest: Transform) -> Self {
        Self {
            name: name.into(),
            parent,
            rest,
        }
    }
}

/// Immutable joint hierarchy. Joints are stored so that every parent index is smaller than
/// the index of its children, which lets model-space passes run front to back.
#[derive(Debug, Clone)]
pub struct Skeleton {
    names: Vec<String>,
    parents: Vec<Option<usize>>,
    rest_pose: Vec<Transform>,
    by_name: HashMap<String, usize>,
}

impl Skeleton {
    pub fn new(joints: Vec<Joint>) -> Result<Self, SkeletonError> {
        if joints.is_empty() {
            return Err(SkeletonError::Empty);
        }
        let mut names = Vec::with_capacity(joints.len());
        let mut parents = Vec::with_capacity(joints.len());
        let mut rest_pose = Vec::with_capacity(joints.len());
        let mut by_name = HashMap::with_capacity(joints.len());

        for (index, joint) in joints.into_iter().enumerate() {
            if let Some(parent) = joint.parent {
                if parent >= index {
                    return Err(SkeletonError::ParentOutOfOrder {
                        joint: joint.name,
                        parent,
                    });
                }
            }
            if by_name.insert(joint.name.clone(), index).is_some() {
                return Err(SkeletonError::DuplicateJoint(joint.name));
            }
            names.push(joint.name);
            parents.push(joint.parent);
            rest_pose.push(joint.rest);
        }

        Ok(Self {
            names,
            parents,
            rest_pose,
            by_name,
        })
    }

    pub fn joint_count(&self) -> usize {
        self.names.len()
    }

    pub fn parent(&self, joint: usize) -> Option<usize> {
        self.parents.get(joint).copied().flatten()
    }

    pub fn parents(&self) -> &[Option<usize>] {
        &self.parents
    }

    pub fn name(&self, joint: usize) -> Option<&str> {
        self.names.get(joint).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn find_joint(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn rest_pose(&self) -> &[Transform] {
        &self.rest_pose
    }

    /// Convert joints `from..=to` of `local` into model space, writing into `model`.
    ///
    /// Entries of `model` below `from` must already hold valid model transforms for the same
    /// pose. Indices past the end of either slice are ignored.
    pub fn local_to_model(
        &self,
        local: &[Transform],
        model: &mut [Transform],
        from: usize,
        to: usize,
    ) {
        let end = to
            .saturating_add(1)
            .min(self.joint_count())
            .min(local.len())
            .min(model.len());
        for joint in from..end {
            model[joint] = match self.parents[joint] {
                Some(parent) => model[parent].compose(&local[joint]),
                None => local[joint],
            };
        }
    }
}
