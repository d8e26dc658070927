//! BinFBX to [SceneModel] decoding.
use std::collections::HashMap;

use log::warn;
use nlfbx_lib::binfbx::BinFbx;

use crate::{
    error::LoadModelError,
    skeleton::Skeleton,
    skinning::weights_to_influences,
    vertex::{read_mesh_attributes, read_triangles, VertexAttributes},
    AlternateMaterials, Mesh, MeshGroup, SceneModel,
};

impl SceneModel {
    /// Build the editor facing model from a parsed file.
    pub fn from_binfbx(binfbx: &BinFbx) -> Result<Self, LoadModelError> {
        let skeleton = if binfbx.joints.is_empty() {
            None
        } else {
            Some(Skeleton::from_joints(&binfbx.joints)?)
        };
        let bone_names = skeleton
            .as_ref()
            .map(|s| s.bone_names())
            .unwrap_or_default();

        // Map lengths must match mesh counts or every later section would
        // desynchronize. There is no resynchronization point.
        let maps = [
            &binfbx.material_maps.primary,
            &binfbx.material_maps.secondary,
        ];
        for (group, map) in maps.iter().enumerate() {
            let mesh_count = binfbx.groups[group].meshes.len();
            if map.len() != mesh_count {
                return Err(LoadModelError::MaterialMapLength {
                    group,
                    len: map.len(),
                    mesh_count,
                });
            }
        }
        for alternate in &binfbx.material_maps.alternates {
            if alternate.indices.len() != binfbx.material_maps.primary.len() {
                return Err(LoadModelError::AlternateMapLength {
                    name: alternate.name.clone(),
                    len: alternate.indices.len(),
                    primary_len: binfbx.material_maps.primary.len(),
                });
            }
        }

        // LOD adjacent submeshes often share a vertex range. Decode each
        // (count, offset, offset) triple only once per call.
        let mut cache: HashMap<(u32, u32, u32), VertexAttributes> = HashMap::new();

        let mut groups = [MeshGroup::default(), MeshGroup::default()];
        for (group_index, group) in binfbx.groups.iter().enumerate() {
            for (mesh_index, descriptor) in group.meshes.iter().enumerate() {
                let key = (
                    descriptor.vertex_count,
                    descriptor.vertex_buffer0_offset,
                    descriptor.vertex_buffer1_offset,
                );
                let attributes = match cache.get(&key) {
                    Some(hit) => hit.clone(),
                    None => {
                        let decoded = read_mesh_attributes(
                            descriptor,
                            &binfbx.vertex_buffer0,
                            &binfbx.vertex_buffer1,
                        )?;
                        cache.insert(key, decoded.clone());
                        decoded
                    }
                };

                let file_triangles =
                    read_triangles(descriptor, &binfbx.index_buffer, binfbx.index_size)?;
                // Editor faces reverse the stored winding; export reverses
                // it back.
                let triangles: Vec<[u32; 3]> =
                    file_triangles.iter().map(|&[a, b, c]| [c, b, a]).collect();

                let material_index = maps[group_index][mesh_index];
                if material_index as usize >= binfbx.materials.len() {
                    return Err(LoadModelError::MaterialIndexOutOfRange {
                        index: material_index,
                        count: binfbx.materials.len(),
                    });
                }

                let influences = if !attributes.bone_indices.is_empty()
                    && !attributes.skin_weights.is_empty()
                {
                    if bone_names.is_empty() {
                        warn!(
                            "mesh {} has skinning data but the file has no joints",
                            crate::mesh_object_name(group_index, descriptor.lod, mesh_index)
                        );
                        Vec::new()
                    } else {
                        weights_to_influences(
                            &attributes.bone_indices,
                            &attributes.skin_weights,
                            &bone_names,
                        )
                    }
                } else {
                    Vec::new()
                };

                let VertexAttributes {
                    positions,
                    normals,
                    tangents,
                    uvs,
                    colors,
                    ..
                } = attributes;

                groups[group_index].meshes.push(Mesh {
                    lod: descriptor.lod,
                    material_index: material_index as usize,
                    normals: expand_corners(&normals, &triangles),
                    tangents: expand_corners(&tangents, &triangles),
                    uvs: uvs
                        .iter()
                        .map(|channel| expand_corners(channel, &triangles))
                        .collect(),
                    colors: expand_corners(&colors, &triangles),
                    positions,
                    triangles,
                    influences,
                    attributes: descriptor.attributes.clone(),
                    bounding_sphere: descriptor.bounding_sphere,
                    bounding_box: descriptor.bounding_box,
                    flags0: descriptor.flags0,
                    flags1: descriptor.flags1,
                    joint: descriptor.joint,
                    unknown3: descriptor.unknown3,
                    is_rigid: descriptor.is_rigid,
                    unknown5: descriptor.unknown5,
                });
            }
        }

        let has_surface_stats =
            binfbx.trailer.surface_area != 0.0 || !binfbx.trailer.cdf.is_empty();

        Ok(Self {
            skeleton,
            groups,
            materials: binfbx.materials.clone(),
            alternate_materials: binfbx
                .material_maps
                .alternates
                .iter()
                .map(|a| AlternateMaterials {
                    name: a.name.clone(),
                    material_indices: a.indices.clone(),
                })
                .collect(),
            params: binfbx.params.clone(),
            trailer: binfbx.trailer.clone(),
            has_surface_stats,
        })
    }
}

/// Gather per vertex values into a flat per corner array.
fn expand_corners<T: Copy>(values: &[T], triangles: &[[u32; 3]]) -> Vec<T> {
    if values.is_empty() {
        return Vec::new();
    }
    triangles
        .iter()
        .flatten()
        .map(|&i| values[i as usize])
        .collect()
}
