//! # nlfbx_model
//! nlfbx_model provides high level editor facing access to the data parsed
//! by nlfbx_lib.
//!
//! A [SceneModel] is the unit a host editor consumes and produces. Decoding
//! converts packed, offset addressed geometry into typed per vertex and per
//! corner arrays in editor space. Encoding performs the inverse: corner
//! deduplication, numeric quantization, winding reversal, and global buffer
//! assembly. The host remains responsible for walking its own scene graph,
//! resolving texture paths, and all user facing reporting.
use glam::{Vec2, Vec3, Vec4};

use nlfbx_lib::{binfbx::BinFbx, binskel::BinSkeleton, rbf::Rbf};

pub use nlfbx_lib::binfbx::{
    AttributeDescriptor, FormatTag, GlobalParams, Material, Semantic, Trailer, Uniform,
    UniformValue,
};

use crate::{
    error::{CreateModelError, LoadModelError},
    skeleton::Skeleton,
    skinning::Influence,
    solver::CorrectiveSolver,
};

pub mod error;
mod export;
mod import;
pub mod skeleton;
pub mod skinning;
pub mod solver;
pub mod transform;
pub mod vertex;

/// The in-memory aggregate of everything stored in a model file.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct SceneModel {
    pub skeleton: Option<Skeleton>,
    /// Mesh group 0 (shaded) and group 1 (shadow).
    pub groups: [MeshGroup; 2],
    pub materials: Vec<Material>,
    /// Named variant material maps, parallel to group 0's meshes.
    pub alternate_materials: Vec<AlternateMaterials>,
    /// Model wide values preserved verbatim for round trips.
    pub params: GlobalParams,
    pub trailer: Trailer,
    /// False when the trailer statistics are zero placeholders rather than
    /// values computed from real geometry.
    pub has_surface_stats: bool,
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct MeshGroup {
    pub meshes: Vec<Mesh>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct AlternateMaterials {
    pub name: String,
    pub material_indices: Vec<u32>,
}

/// One mesh with per vertex positions and per corner shading attributes.
///
/// Corner arrays run parallel to the flattened triangle corners, three per
/// triangle, the layout a host editor's face loops map onto directly.
/// Arrays the mesh does not use stay empty.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Mesh {
    pub lod: u32,
    /// Index into [materials](struct.SceneModel.html#structfield.materials).
    pub material_index: usize,

    /// Vertex positions in editor space.
    pub positions: Vec<Vec3>,
    /// Triangles in editor winding order, which reverses the stored order.
    pub triangles: Vec<[u32; 3]>,

    /// Per corner normals in editor space.
    pub normals: Vec<Vec3>,
    /// Per corner tangents with the handedness sign in the fourth component.
    pub tangents: Vec<Vec4>,
    /// Per corner texture coordinates for each channel.
    pub uvs: Vec<Vec<Vec2>>,
    pub colors: Vec<Vec4>,

    /// Per bone weights referencing skeleton bones by name.
    pub influences: Vec<Influence>,

    /// The declared attribute descriptors controlling the packed layout.
    pub attributes: Vec<AttributeDescriptor>,

    /// Center and radius in engine space, or zero to recompute on export.
    pub bounding_sphere: [f32; 4],
    pub bounding_box: [f32; 6],
    pub flags0: i32,
    pub flags1: i32,
    pub joint: i32,
    pub unknown3: f32,
    pub is_rigid: u8,
    pub unknown5: f32,
}

/// Decode a `.binfbx` file into a [SceneModel].
pub fn load_model(bytes: &[u8]) -> Result<SceneModel, LoadModelError> {
    let binfbx = BinFbx::from_bytes(bytes)?;
    SceneModel::from_binfbx(&binfbx)
}

/// Encode a [SceneModel] into `.binfbx` bytes.
pub fn save_model(scene: &SceneModel) -> Result<Vec<u8>, CreateModelError> {
    let binfbx = scene.to_binfbx()?;
    let mut writer = std::io::Cursor::new(Vec::new());
    binfbx.write(&mut writer)?;
    Ok(writer.into_inner())
}

/// Decode a `.binskeleton` file into a [Skeleton].
pub fn load_skeleton(bytes: &[u8]) -> Result<Skeleton, LoadModelError> {
    let binskel = BinSkeleton::from_bytes(bytes)?;
    Skeleton::from_binskeleton(&binskel)
}

/// Decode a `.rbf` file, resolving bone hashes against `skeleton`.
pub fn load_solver(bytes: &[u8], skeleton: &Skeleton) -> Result<CorrectiveSolver, LoadModelError> {
    let rbf = Rbf::from_bytes(bytes)?;
    Ok(solver::resolve_solver(&rbf, &skeleton.bone_names()))
}

/// The object naming convention hosts use to group meshes, for example
/// `"Group0-LOD0-Mesh2"`.
pub fn mesh_object_name(group: usize, lod: u32, mesh: usize) -> String {
    format!("Group{group}-LOD{lod}-Mesh{mesh}")
}

/// Normalize a stored texture map path, which mixes `\` and `/` separators.
/// Resolving the result against a runtime data root is the host's job.
pub fn normalize_texture_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_object_names() {
        assert_eq!("Group1-LOD2-Mesh0", mesh_object_name(1, 2, 0));
    }

    #[test]
    fn normalize_mixed_separators() {
        assert_eq!(
            "runtimedata/textures/skin_d.dds",
            normalize_texture_path("runtimedata\\textures/skin_d.dds")
        );
    }
}
