use nlfbx_lib::binfbx::{FormatTag, Semantic};
use nlfbx_lib::error::DecodeError;
use thiserror::Error;

/// Failures turning container data into a [SceneModel](crate::SceneModel).
#[derive(Debug, Error)]
pub enum LoadModelError {
    #[error("error decoding container data")]
    Decode(#[from] DecodeError),

    #[error("joint {joint} has an out of range or self referencing parent {parent}")]
    InvalidJointParent { joint: usize, parent: i32 },

    #[error("joint {joint} is part of a parent cycle")]
    JointCycle { joint: usize },

    #[error("attribute semantic {semantic:?} does not support format {format:?}")]
    UnsupportedAttribute { semantic: Semantic, format: FormatTag },

    #[error("declared vertex buffer index {index} is not 0 or 1")]
    InvalidBufferIndex { index: u8 },

    #[error("invalid index element size {size}")]
    InvalidIndexSize { size: u32 },

    #[error("triangle references vertex {index} outside the {count} decoded vertices")]
    TriangleIndexOutOfRange { index: u32, count: u32 },

    #[error("material map for group {group} has {len} entries but the group has {mesh_count} meshes")]
    MaterialMapLength {
        group: usize,
        len: usize,
        mesh_count: usize,
    },

    #[error("alternate material map {name:?} has {len} entries but the primary map has {primary_len}")]
    AlternateMapLength {
        name: String,
        len: usize,
        primary_len: usize,
    },

    #[error("material index {index} is out of range for {count} materials")]
    MaterialIndexOutOfRange { index: u32, count: usize },
}

/// Failures turning a [SceneModel](crate::SceneModel) back into container data.
#[derive(Debug, Error)]
pub enum CreateModelError {
    #[error("scene contains skinning data but no skeleton to reference")]
    MissingArmature,

    #[error("influence references bone {name:?} not present in the skeleton")]
    MissingBone { name: String },

    #[error("mesh declares no position attribute")]
    MissingPositionAttribute,

    #[error("attribute semantic {semantic:?} does not support format {format:?}")]
    UnsupportedAttribute { semantic: Semantic, format: FormatTag },

    #[error("invalid attribute layout")]
    Layout(#[source] LoadModelError),

    #[error("bone index {index} does not fit the declared bone index format")]
    BoneIndexOutOfRange { index: u16 },

    #[error("triangle references vertex {index} outside the {count} mesh vertices")]
    TriangleIndexOutOfRange { index: u32, count: u32 },

    #[error("alternate material map {name:?} has {len} entries but group 0 has {mesh_count} meshes")]
    AlternateMapLength {
        name: String,
        len: usize,
        mesh_count: usize,
    },

    #[error("error writing data")]
    Binrw(#[from] binrw::Error),
}
