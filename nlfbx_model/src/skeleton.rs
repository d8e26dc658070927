//! Joint hierarchies decoded from either container format.
use glam::{Mat4, Quat, Vec3};
use log::warn;
use nlfbx_lib::binfbx::Joint;
use nlfbx_lib::binskel::BinSkeleton;

use crate::{error::LoadModelError, transform};

/// Per axis tolerance for treating a stored tail as coincident with the
/// joint head.
const TAIL_EPSILON: f32 = 1e-3;

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Skeleton {
    /// The hierarchy of bones in the skeleton.
    pub bones: Vec<Bone>,
}

/// A single node in the skeleton hierarchy.
#[derive(Debug, PartialEq, Clone)]
pub struct Bone {
    /// The name referenced by vertex groups and solver hash tables.
    pub name: String,
    /// Bind matrix in editor space.
    pub matrix: Mat4,
    /// Envelope tail point, or `None` for a zero length joint.
    pub tail: Option<Vec3>,
    pub radius: f32,
    /// The index of the parent [Bone] in [bones](struct.Skeleton.html#structfield.bones)
    /// or `None` if this is a root bone.
    pub parent_index: Option<usize>,
}

impl Bone {
    /// The bone head position in editor space.
    pub fn head(&self) -> Vec3 {
        self.matrix.w_axis.truncate()
    }
}

impl Skeleton {
    /// Build the hierarchy from a BinFBX joint palette.
    ///
    /// File order does not guarantee parents before children, so this runs
    /// in passes: decode every record, create every bone, then resolve
    /// parent links once all identities exist.
    pub fn from_joints(joints: &[Joint]) -> Result<Self, LoadModelError> {
        // Pass 1 and 2: decode records and create the bones.
        let mut bones: Vec<_> = joints
            .iter()
            .map(|joint| Bone {
                name: joint.name.clone(),
                matrix: transform::joint_matrix_to_editor(&joint.matrix),
                tail: None,
                radius: joint.radius,
                parent_index: None,
            })
            .collect();

        // Pass 3: assign parents now that every index resolves.
        for (i, joint) in joints.iter().enumerate() {
            if joint.parent >= 0 {
                let parent = joint.parent as usize;
                if parent >= bones.len() || parent == i {
                    return Err(LoadModelError::InvalidJointParent {
                        joint: i,
                        parent: joint.parent,
                    });
                }
                bones[i].parent_index = Some(parent);
            }
        }
        assert_acyclic(&bones)?;

        // Suppress tails that would produce degenerate zero length joints.
        for (bone, joint) in bones.iter_mut().zip(joints) {
            let tail = Vec3::from_array(joint.tail);
            let zero_envelope = joint.radius == 0.0 && tail == Vec3::ZERO;
            let coincident = (tail - bone.head()).abs().max_element() <= TAIL_EPSILON;
            if !zero_envelope && !coincident {
                bone.tail = Some(tail);
            }
        }

        let skeleton = Self { bones };
        skeleton.warn_on_multiple_roots();
        Ok(skeleton)
    }

    /// Encode the palette back to joint records.
    ///
    /// Parents are stored by index, so the result is independent of
    /// traversal order.
    pub fn to_joints(&self) -> Vec<Joint> {
        self.bones
            .iter()
            .map(|bone| Joint {
                name: bone.name.clone(),
                matrix: transform::joint_matrix_to_engine(bone.matrix),
                tail: bone.tail.map(|tail| tail.to_array()).unwrap_or([0.0; 3]),
                radius: bone.radius,
                parent: bone.parent_index.map(|i| i as i32).unwrap_or(-1),
            })
            .collect()
    }

    /// Build the hierarchy from the standalone skeleton container, which
    /// stores a rotation quaternion and translation per bone.
    pub fn from_binskeleton(skeleton: &BinSkeleton) -> Result<Self, LoadModelError> {
        let mut bones: Vec<_> = skeleton
            .bones
            .iter()
            .map(|bone| {
                let rotation = Quat::from_array(bone.rotation);
                let translation = Vec3::from_array(bone.translation);
                let matrix = transform::RIGHT_HAND
                    * Mat4::from_rotation_translation(rotation, translation)
                    * transform::RIGHT_HAND;
                Bone {
                    name: bone.name.clone(),
                    matrix,
                    tail: None,
                    radius: 0.0,
                    parent_index: None,
                }
            })
            .collect();

        for (i, bone) in skeleton.bones.iter().enumerate() {
            if bone.parent >= 0 {
                let parent = bone.parent as usize;
                if parent >= bones.len() || parent == i {
                    return Err(LoadModelError::InvalidJointParent {
                        joint: i,
                        parent: bone.parent,
                    });
                }
                bones[i].parent_index = Some(parent);
            }
        }
        assert_acyclic(&bones)?;

        let skeleton = Self { bones };
        skeleton.warn_on_multiple_roots();
        Ok(skeleton)
    }

    /// Every bone name in palette order, the mapping used by vertex
    /// skinning data and solver hash resolution.
    pub fn bone_names(&self) -> Vec<String> {
        self.bones.iter().map(|b| b.name.clone()).collect()
    }

    fn warn_on_multiple_roots(&self) {
        let root_count = self
            .bones
            .iter()
            .filter(|b| b.parent_index.is_none())
            .count();
        if root_count > 1 {
            warn!("skeleton contains {root_count} root bones");
        }
    }
}

fn assert_acyclic(bones: &[Bone]) -> Result<(), LoadModelError> {
    for start in 0..bones.len() {
        let mut index = bones[start].parent_index;
        let mut steps = 0;
        while let Some(i) = index {
            steps += 1;
            if steps > bones.len() {
                return Err(LoadModelError::JointCycle { joint: start });
            }
            index = bones[i].parent_index;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use glam::vec3;
    use nlfbx_lib::binskel::SkeletonBone;

    fn joint(name: &str, translation: [f32; 3], parent: i32) -> Joint {
        Joint {
            name: name.to_string(),
            matrix: [
                1.0,
                0.0,
                0.0,
                0.0,
                1.0,
                0.0,
                0.0,
                0.0,
                1.0,
                translation[0],
                translation[1],
                translation[2],
            ],
            tail: [0.0; 3],
            radius: 0.0,
            parent,
        }
    }

    #[test]
    fn decode_two_joint_chain_and_reencode() {
        let joints = vec![joint("root", [0.0, 0.0, 0.0], -1), joint("hip", [0.0, 1.0, 0.0], 0)];

        let skeleton = Skeleton::from_joints(&joints).unwrap();
        assert_eq!(None, skeleton.bones[0].parent_index);
        assert_eq!(Some(0), skeleton.bones[1].parent_index);

        // Round trip through the editor representation is byte identical
        // for every stored field.
        assert_eq!(joints, skeleton.to_joints());
    }

    #[test]
    fn decode_is_independent_of_parent_order() {
        // "leaf" appears before its parent "arm" in the first palette.
        let forward = vec![
            joint("root", [0.0; 3], -1),
            joint("leaf", [1.0, 0.0, 0.0], 2),
            joint("arm", [0.0, 1.0, 0.0], 0),
        ];
        let reordered = vec![
            joint("root", [0.0; 3], -1),
            joint("arm", [0.0, 1.0, 0.0], 0),
            joint("leaf", [1.0, 0.0, 0.0], 1),
        ];

        let parent_names = |skeleton: &Skeleton| -> Vec<(String, Option<String>)> {
            skeleton
                .bones
                .iter()
                .map(|b| {
                    (
                        b.name.clone(),
                        b.parent_index.map(|i| skeleton.bones[i].name.clone()),
                    )
                })
                .collect()
        };

        let mut first = parent_names(&Skeleton::from_joints(&forward).unwrap());
        let mut second = parent_names(&Skeleton::from_joints(&reordered).unwrap());
        first.sort();
        second.sort();
        assert_eq!(first, second);
    }

    #[test]
    fn decode_suppresses_degenerate_tails() {
        let mut with_tail = joint("a", [0.0; 3], -1);
        with_tail.tail = [0.0, 2.0, 0.0];
        with_tail.radius = 0.1;

        let mut coincident = joint("b", [1.0, 2.0, 3.0], -1);
        // The stored translation is also the editor head for the identity
        // rotation, so this tail collapses to a zero length joint.
        coincident.tail = [1.0, 2.0, 3.0];
        coincident.radius = 0.1;

        let zero = joint("c", [0.0; 3], -1);

        let skeleton = Skeleton::from_joints(&[with_tail, coincident, zero]).unwrap();
        assert_eq!(Some(vec3(0.0, 2.0, 0.0)), skeleton.bones[0].tail);
        assert_eq!(None, skeleton.bones[1].tail);
        assert_eq!(None, skeleton.bones[2].tail);
    }

    #[test]
    fn decode_rejects_self_parent() {
        let joints = vec![joint("a", [0.0; 3], 0)];
        assert!(matches!(
            Skeleton::from_joints(&joints).unwrap_err(),
            LoadModelError::InvalidJointParent {
                joint: 0,
                parent: 0
            }
        ));
    }

    #[test]
    fn decode_rejects_parent_cycle() {
        let joints = vec![joint("a", [0.0; 3], 1), joint("b", [0.0; 3], 0)];
        assert!(matches!(
            Skeleton::from_joints(&joints).unwrap_err(),
            LoadModelError::JointCycle { .. }
        ));
    }

    #[test]
    fn decode_binskeleton_bones() {
        let binskel = BinSkeleton {
            bones: vec![
                SkeletonBone {
                    rotation: [0.0, 0.0, 0.0, 1.0],
                    translation: [1.0, 2.0, 3.0],
                    reserved: 0.0,
                    parent: -1,
                    id: 1,
                    name: "root".to_string(),
                },
                SkeletonBone {
                    rotation: [0.0, 0.0, 0.0, 1.0],
                    translation: [0.0, 1.0, 0.0],
                    reserved: 0.0,
                    parent: 0,
                    id: 2,
                    name: "spine".to_string(),
                },
            ],
        };

        let skeleton = Skeleton::from_binskeleton(&binskel).unwrap();
        assert_eq!("root", skeleton.bones[0].name);
        assert_eq!(Some(0), skeleton.bones[1].parent_index);
        // Conjugating by the axis conversion keeps the rotation but flips
        // the translation.
        assert_eq!(vec3(-1.0, -2.0, -3.0), skeleton.bones[0].head());
    }
}
