//! [SceneModel] to BinFBX encoding.
use glam::{Vec2, Vec3, Vec4};
use indexmap::IndexMap;
use rayon::prelude::*;

use nlfbx_lib::binfbx::{
    AlternateMaterialMap, BinFbx, FormatTag, MaterialMaps, MeshDescriptor, MeshGroup, Semantic,
};

use crate::{
    error::CreateModelError,
    skinning::{influences_to_weights, quantize_weights},
    transform,
    vertex::{buffer_layouts, LayoutAttribute},
    Mesh, SceneModel,
};

/// One mesh packed into buffer bytes, before global assembly.
struct EncodedMesh {
    vertex_buffer0: Vec<u8>,
    vertex_buffer1: Vec<u8>,
    indices: Vec<u32>,
    vertex_count: u32,
    index_size: u32,
    bounding_sphere: [f32; 4],
    bounding_box: [f32; 6],
}

impl SceneModel {
    /// Pack the model back into a file.
    pub fn to_binfbx(&self) -> Result<BinFbx, CreateModelError> {
        let bone_names = self
            .skeleton
            .as_ref()
            .map(|s| s.bone_names())
            .unwrap_or_default();
        let skinned = self
            .groups
            .iter()
            .flat_map(|g| &g.meshes)
            .any(|m| !m.influences.is_empty());
        if skinned && self.skeleton.is_none() {
            return Err(CreateModelError::MissingArmature);
        }

        let meshes: Vec<&Mesh> = self.groups.iter().flat_map(|g| g.meshes.iter()).collect();

        // Meshes encode independently. Assembly needs every result and runs
        // sequentially in mesh iteration order, the order material maps and
        // index offset tables are defined against.
        let encoded = meshes
            .par_iter()
            .map(|mesh| encode_mesh(mesh, &bone_names))
            .collect::<Result<Vec<_>, CreateModelError>>()?;

        // One element size for the whole file: the widest any mesh needs.
        let index_size = encoded.iter().map(|e| e.index_size).max().unwrap_or(2);

        let mut vertex_buffer0 = Vec::new();
        let mut vertex_buffer1 = Vec::new();
        let mut index_buffer = Vec::new();
        let mut descriptors = Vec::with_capacity(encoded.len());

        for (mesh, encoded) in meshes.iter().zip(&encoded) {
            let vertex_buffer0_offset = vertex_buffer0.len() as u32;
            let vertex_buffer1_offset = vertex_buffer1.len() as u32;
            let index_offset = (index_buffer.len() / index_size as usize) as u32;

            vertex_buffer0.extend_from_slice(&encoded.vertex_buffer0);
            vertex_buffer1.extend_from_slice(&encoded.vertex_buffer1);
            // Repack smaller per mesh indices at the file wide element size.
            for &index in &encoded.indices {
                match index_size {
                    1 => index_buffer.push(index as u8),
                    2 => index_buffer.extend_from_slice(&(index as u16).to_le_bytes()),
                    _ => index_buffer.extend_from_slice(&index.to_le_bytes()),
                }
            }

            descriptors.push(MeshDescriptor {
                lod: mesh.lod,
                vertex_count: encoded.vertex_count,
                triangle_count: (encoded.indices.len() / 3) as u32,
                vertex_buffer0_offset,
                vertex_buffer1_offset,
                index_offset,
                flags0: mesh.flags0,
                bounding_sphere: keep_or_computed(&mesh.bounding_sphere, &encoded.bounding_sphere),
                bounding_box: keep_or_computed(&mesh.bounding_box, &encoded.bounding_box),
                flags1: mesh.flags1,
                attributes: mesh.attributes.clone(),
                joint: mesh.joint,
                unknown3: mesh.unknown3,
                is_rigid: mesh.is_rigid,
                unknown5: mesh.unknown5,
            });
        }

        let group1_descriptors = descriptors.split_off(self.groups[0].meshes.len());

        let primary: Vec<u32> = self.groups[0]
            .meshes
            .iter()
            .map(|m| m.material_index as u32)
            .collect();
        let secondary: Vec<u32> = self.groups[1]
            .meshes
            .iter()
            .map(|m| m.material_index as u32)
            .collect();
        let mut alternates = Vec::with_capacity(self.alternate_materials.len());
        for alternate in &self.alternate_materials {
            if alternate.material_indices.len() != primary.len() {
                return Err(CreateModelError::AlternateMapLength {
                    name: alternate.name.clone(),
                    len: alternate.material_indices.len(),
                    mesh_count: primary.len(),
                });
            }
            alternates.push(AlternateMaterialMap {
                name: alternate.name.clone(),
                indices: alternate.material_indices.clone(),
            });
        }

        Ok(BinFbx {
            index_size,
            vertex_buffer0,
            vertex_buffer1,
            index_buffer,
            joints: self
                .skeleton
                .as_ref()
                .map(|s| s.to_joints())
                .unwrap_or_default(),
            params: self.params.clone(),
            materials: self.materials.clone(),
            material_maps: MaterialMaps {
                primary,
                alternates,
                secondary,
            },
            groups: [
                MeshGroup {
                    meshes: descriptors,
                },
                MeshGroup {
                    meshes: group1_descriptors,
                },
            ],
            trailer: self.trailer.clone(),
        })
    }
}

fn encode_mesh(mesh: &Mesh, bone_names: &[String]) -> Result<EncodedMesh, CreateModelError> {
    let layouts = buffer_layouts(&mesh.attributes).map_err(CreateModelError::Layout)?;
    if !layouts
        .iter()
        .flat_map(|l| &l.attributes)
        .any(|a| a.semantic == Semantic::Position)
    {
        return Err(CreateModelError::MissingPositionAttribute);
    }

    let source_count = mesh.positions.len();
    for triangle in &mesh.triangles {
        for &index in triangle {
            if index as usize >= source_count {
                return Err(CreateModelError::TriangleIndexOutOfRange {
                    index,
                    count: source_count as u32,
                });
            }
        }
    }

    let needs_skinning = layouts
        .iter()
        .flat_map(|l| &l.attributes)
        .any(|a| matches!(a.semantic, Semantic::BoneIndex | Semantic::BoneWeight));
    let (bone_indices, skin_weights) = if needs_skinning {
        influences_to_weights(&mesh.influences, source_count, bone_names)?
    } else {
        (Vec::new(), Vec::new())
    };

    // Pack the buffer 1 record once per source vertex.
    let mut vertex_records = Vec::with_capacity(source_count);
    for vertex in 0..source_count {
        let mut record = Vec::with_capacity(layouts[1].stride);
        for attribute in &layouts[1].attributes {
            pack_vertex_attribute(
                &mut record,
                attribute,
                mesh,
                vertex,
                &bone_indices,
                &skin_weights,
            )?;
        }
        vertex_records.push(record);
    }

    // Deduplicate corners on (source vertex, packed shading record). Two
    // corners quantizing to the same bytes share one output vertex. The
    // first occurrence of a key assigns the next output index.
    let mut unique: IndexMap<(u32, Vec<u8>), u32> = IndexMap::new();
    let mut vertex_buffer0 = Vec::new();
    let mut vertex_buffer1 = Vec::new();
    let mut positions = Vec::new();
    let mut indices = Vec::with_capacity(mesh.triangles.len() * 3);

    for (triangle_index, triangle) in mesh.triangles.iter().enumerate() {
        let mut emitted = [0u32; 3];
        for (corner_slot, &vertex_index) in triangle.iter().enumerate() {
            let corner = triangle_index * 3 + corner_slot;
            let mut record = Vec::with_capacity(layouts[0].stride);
            for attribute in &layouts[0].attributes {
                pack_corner_attribute(&mut record, attribute, mesh, corner)?;
            }

            let next_index = unique.len() as u32;
            let index = *unique
                .entry((vertex_index, record.clone()))
                .or_insert_with(|| {
                    vertex_buffer0.extend_from_slice(&record);
                    vertex_buffer1.extend_from_slice(&vertex_records[vertex_index as usize]);
                    positions.push(transform::position_to_engine(
                        mesh.positions[vertex_index as usize],
                    ));
                    next_index
                });
            emitted[corner_slot] = index;
        }
        // Winding reverses relative to the editor faces, mirroring decode.
        indices.extend_from_slice(&[emitted[2], emitted[1], emitted[0]]);
    }

    let vertex_count = unique.len() as u32;
    let (bounding_sphere, bounding_box) = bounds(&positions);

    Ok(EncodedMesh {
        vertex_buffer0,
        vertex_buffer1,
        indices,
        vertex_count,
        index_size: index_element_size(vertex_count),
        bounding_sphere,
        bounding_box,
    })
}

fn pack_vertex_attribute(
    record: &mut Vec<u8>,
    attribute: &LayoutAttribute,
    mesh: &Mesh,
    vertex: usize,
    bone_indices: &[[u16; 4]],
    skin_weights: &[Vec4],
) -> Result<(), CreateModelError> {
    match (attribute.semantic, attribute.format) {
        (Semantic::Position, FormatTag::Float3) => {
            let position = transform::position_to_engine(mesh.positions[vertex]);
            for value in position.to_array() {
                record.extend_from_slice(&value.to_le_bytes());
            }
        }
        (Semantic::BoneIndex, FormatTag::Byte4Uint) => {
            for index in bone_indices.get(vertex).copied().unwrap_or_default() {
                let byte = u8::try_from(index)
                    .map_err(|_| CreateModelError::BoneIndexOutOfRange { index })?;
                record.push(byte);
            }
        }
        (Semantic::BoneIndex, FormatTag::UShort4Uint) => {
            for index in bone_indices.get(vertex).copied().unwrap_or_default() {
                record.extend_from_slice(&index.to_le_bytes());
            }
        }
        (Semantic::BoneWeight, FormatTag::Byte4Unorm) => {
            let weights = skin_weights.get(vertex).copied().unwrap_or(Vec4::ZERO);
            record.extend_from_slice(&quantize_weights(weights));
        }
        (semantic, format) => {
            return Err(CreateModelError::UnsupportedAttribute { semantic, format })
        }
    }
    Ok(())
}

fn pack_corner_attribute(
    record: &mut Vec<u8>,
    attribute: &LayoutAttribute,
    mesh: &Mesh,
    corner: usize,
) -> Result<(), CreateModelError> {
    match (attribute.semantic, attribute.format) {
        (Semantic::Normal, FormatTag::Short4Snorm) => {
            let normal = transform::normal_to_engine(value_or_default(&mesh.normals, corner));
            pack_snorm16(record, normal.x);
            pack_snorm16(record, normal.y);
            pack_snorm16(record, normal.z);
            pack_snorm16(record, 0.0);
        }
        (Semantic::TexCoord, FormatTag::Short2Snorm) => {
            let uv: Vec2 = mesh
                .uvs
                .get(attribute.semantic_index as usize)
                .map(|channel| value_or_default(channel, corner))
                .unwrap_or_default();
            // The stored V axis is flipped relative to the editor's.
            pack_texcoord(record, uv.x);
            pack_texcoord(record, 1.0 - uv.y);
        }
        (Semantic::Tangent, FormatTag::Byte4Snorm) => {
            let tangent = value_or_default(&mesh.tangents, corner);
            for value in tangent.to_array() {
                pack_snorm8(record, value);
            }
        }
        (Semantic::Tangent, FormatTag::Byte4Unorm) => {
            let tangent = value_or_default(&mesh.tangents, corner);
            for value in tangent.to_array() {
                pack_unorm8(record, value);
            }
        }
        (Semantic::Color, FormatTag::Byte4Unorm) => {
            // A missing color layer encodes as zero.
            let color = value_or_default(&mesh.colors, corner);
            for value in color.to_array() {
                pack_unorm8(record, value);
            }
        }
        (Semantic::Color, FormatTag::Byte4Snorm) => {
            let color = value_or_default(&mesh.colors, corner);
            for value in color.to_array() {
                pack_snorm8(record, value);
            }
        }
        (semantic, format) => {
            return Err(CreateModelError::UnsupportedAttribute { semantic, format })
        }
    }
    Ok(())
}

fn value_or_default<T: Copy + Default>(values: &[T], index: usize) -> T {
    values.get(index).copied().unwrap_or_default()
}

fn pack_snorm16(record: &mut Vec<u8>, value: f32) {
    let packed = (value * 32767.0).round().clamp(-32767.0, 32767.0) as i16;
    record.extend_from_slice(&packed.to_le_bytes());
}

fn pack_texcoord(record: &mut Vec<u8>, value: f32) {
    let packed = (value * 4095.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    record.extend_from_slice(&packed.to_le_bytes());
}

fn pack_snorm8(record: &mut Vec<u8>, value: f32) {
    record.push(((value * 127.0).round().clamp(-127.0, 127.0) as i8) as u8);
}

fn pack_unorm8(record: &mut Vec<u8>, value: f32) {
    record.push((value * 255.0).round().clamp(0.0, 255.0) as u8);
}

/// The smallest element size addressing `count` unique vertices.
///
/// The count itself decides the width, so a mesh with exactly 256 vertices
/// selects 2 byte indices.
fn index_element_size(count: u32) -> u32 {
    if count <= 255 {
        1
    } else if count <= 65535 {
        2
    } else {
        4
    }
}

fn keep_or_computed<const N: usize>(stored: &[f32; N], computed: &[f32; N]) -> [f32; N] {
    if stored.iter().all(|v| *v == 0.0) {
        *computed
    } else {
        *stored
    }
}

fn bounds(positions: &[Vec3]) -> ([f32; 4], [f32; 6]) {
    let Some(first) = positions.first() else {
        return ([0.0; 4], [0.0; 6]);
    };
    let mut min = *first;
    let mut max = *first;
    for position in positions {
        min = min.min(*position);
        max = max.max(*position);
    }
    let center = (min + max) / 2.0;
    let radius = positions
        .iter()
        .map(|p| p.distance(center))
        .fold(0.0, f32::max);
    (
        [center.x, center.y, center.z, radius],
        [min.x, min.y, min.z, max.x, max.y, max.z],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use glam::{vec2, vec3};
    use nlfbx_lib::binfbx::{AttributeDescriptor, Material};

    use crate::skeleton::{Bone, Skeleton};
    use crate::skinning::{Influence, VertexWeight};

    fn shaded_attributes() -> Vec<AttributeDescriptor> {
        vec![
            AttributeDescriptor::new(0, FormatTag::Float3, Semantic::Position),
            AttributeDescriptor::new(1, FormatTag::Short4Snorm, Semantic::Normal),
            AttributeDescriptor::new(1, FormatTag::Short2Snorm, Semantic::TexCoord),
        ]
    }

    fn triangle_mesh() -> Mesh {
        Mesh {
            positions: vec![
                vec3(0.0, 0.0, 0.0),
                vec3(1.0, 0.0, 0.0),
                vec3(0.0, 1.0, 0.0),
            ],
            triangles: vec![[0, 1, 2]],
            normals: vec![
                vec3(1.0, 0.0, 0.0),
                vec3(0.0, 1.0, 0.0),
                vec3(0.0, 0.0, 1.0),
            ],
            uvs: vec![vec![vec2(0.0, 1.0), vec2(1.0, 0.0), vec2(1.0, 1.0)]],
            attributes: shaded_attributes(),
            ..Default::default()
        }
    }

    fn scene(meshes: Vec<Mesh>) -> SceneModel {
        let mut scene = SceneModel {
            materials: vec![Material::default()],
            ..Default::default()
        };
        scene.groups[0].meshes = meshes;
        scene
    }

    #[test]
    fn index_element_size_thresholds() {
        assert_eq!(1, index_element_size(255));
        assert_eq!(2, index_element_size(256));
        assert_eq!(2, index_element_size(65535));
        assert_eq!(4, index_element_size(65536));
    }

    #[test]
    fn round_trip_single_triangle() {
        let original = scene(vec![triangle_mesh()]);

        let binfbx = original.to_binfbx().unwrap();
        assert_eq!(1, binfbx.index_size);
        assert_eq!(3, binfbx.groups[0].meshes[0].vertex_count);

        let decoded = SceneModel::from_binfbx(&binfbx).unwrap();
        let mesh = &decoded.groups[0].meshes[0];
        let source = &original.groups[0].meshes[0];

        assert_eq!(source.positions, mesh.positions);
        assert_eq!(source.triangles, mesh.triangles);
        assert_eq!(source.normals, mesh.normals);
        assert_eq!(source.uvs, mesh.uvs);
    }

    #[test]
    fn decode_encode_decode_keeps_winding() {
        let original = scene(vec![triangle_mesh()]);

        let first = SceneModel::from_binfbx(&original.to_binfbx().unwrap()).unwrap();
        let second = SceneModel::from_binfbx(&first.to_binfbx().unwrap()).unwrap();

        // Double inversion is identity.
        assert_eq!(
            first.groups[0].meshes[0].triangles,
            second.groups[0].meshes[0].triangles
        );
    }

    #[test]
    fn dedup_splits_corners_on_uv_seams() {
        let mut mesh = triangle_mesh();
        mesh.positions.push(vec3(1.0, 1.0, 0.0));
        mesh.triangles = vec![[0, 1, 2], [0, 2, 3]];
        mesh.normals = vec![vec3(0.0, 0.0, 1.0); 6];
        // Corner 4 reuses vertex 2 with a different UV, forcing a split.
        mesh.uvs = vec![vec![
            vec2(0.0, 0.0),
            vec2(1.0, 0.0),
            vec2(1.0, 1.0),
            vec2(0.0, 0.0),
            vec2(0.5, 0.5),
            vec2(0.0, 1.0),
        ]];

        let binfbx = scene(vec![mesh.clone()]).to_binfbx().unwrap();
        assert_eq!(5, binfbx.groups[0].meshes[0].vertex_count);

        // With matching corner values the shared vertices merge instead.
        mesh.uvs = vec![vec![
            vec2(0.0, 0.0),
            vec2(1.0, 0.0),
            vec2(1.0, 1.0),
            vec2(0.0, 0.0),
            vec2(1.0, 1.0),
            vec2(0.0, 1.0),
        ]];
        let binfbx = scene(vec![mesh]).to_binfbx().unwrap();
        assert_eq!(4, binfbx.groups[0].meshes[0].vertex_count);
    }

    fn skinned_scene() -> SceneModel {
        let bone = |name: &str| Bone {
            name: name.to_string(),
            matrix: glam::Mat4::IDENTITY,
            tail: None,
            radius: 0.0,
            parent_index: None,
        };

        let mut mesh = triangle_mesh();
        mesh.attributes = vec![
            AttributeDescriptor::new(0, FormatTag::Float3, Semantic::Position),
            AttributeDescriptor::new(0, FormatTag::Byte4Uint, Semantic::BoneIndex),
            AttributeDescriptor::new(0, FormatTag::Byte4Unorm, Semantic::BoneWeight),
            AttributeDescriptor::new(1, FormatTag::Short4Snorm, Semantic::Normal),
            AttributeDescriptor::new(1, FormatTag::Short2Snorm, Semantic::TexCoord),
        ];
        mesh.influences = vec![
            Influence {
                bone_name: "a".to_string(),
                weights: vec![
                    VertexWeight {
                        vertex_index: 0,
                        weight: 0.6,
                    },
                    VertexWeight {
                        vertex_index: 1,
                        weight: 0.3,
                    },
                    VertexWeight {
                        vertex_index: 2,
                        weight: 1.0,
                    },
                ],
            },
            Influence {
                bone_name: "b".to_string(),
                weights: vec![
                    VertexWeight {
                        vertex_index: 0,
                        weight: 0.2,
                    },
                    VertexWeight {
                        vertex_index: 1,
                        weight: 0.9,
                    },
                ],
            },
        ];

        let mut scene = scene(vec![mesh]);
        scene.skeleton = Some(Skeleton {
            bones: vec![bone("a"), bone("b")],
        });
        scene
    }

    #[test]
    fn encoded_weights_sum_to_255() {
        let binfbx = skinned_scene().to_binfbx().unwrap();

        // Buffer 1 records: position (12), bone indices (4), weights (4).
        let stride = 20;
        assert_eq!(3 * stride, binfbx.vertex_buffer1.len());
        for record in binfbx.vertex_buffer1.chunks_exact(stride) {
            let sum: u32 = record[16..20].iter().map(|w| *w as u32).sum();
            assert_eq!(255, sum);
        }
    }

    #[test]
    fn skinning_round_trip_keeps_strongest_bones() {
        let original = skinned_scene();
        let decoded = SceneModel::from_binfbx(&original.to_binfbx().unwrap()).unwrap();

        let influences = &decoded.groups[0].meshes[0].influences;
        assert_eq!(2, influences.len());
        assert_eq!("a", influences[0].bone_name);
        // Vertex 2 is fully weighted to bone "a".
        let full = influences[0]
            .weights
            .iter()
            .find(|w| w.vertex_index == 2)
            .unwrap();
        assert_eq!(1.0, full.weight);
    }

    #[test]
    fn export_without_skeleton_fails_for_skinned_meshes() {
        let mut scene = skinned_scene();
        scene.skeleton = None;
        assert!(matches!(
            scene.to_binfbx().unwrap_err(),
            CreateModelError::MissingArmature
        ));
    }

    #[test]
    fn export_requires_position_attribute() {
        let mut mesh = triangle_mesh();
        mesh.attributes = vec![AttributeDescriptor::new(
            1,
            FormatTag::Short4Snorm,
            Semantic::Normal,
        )];
        assert!(matches!(
            scene(vec![mesh]).to_binfbx().unwrap_err(),
            CreateModelError::MissingPositionAttribute
        ));
    }

    #[test]
    fn export_computes_missing_bounds() {
        let binfbx = scene(vec![triangle_mesh()]).to_binfbx().unwrap();
        let descriptor = &binfbx.groups[0].meshes[0];
        assert!(descriptor.bounding_sphere[3] > 0.0);
        // Engine space bounds: the axis conversion negates the editor
        // positions.
        assert_eq!(-1.0, descriptor.bounding_box[0]);

        let mut mesh = triangle_mesh();
        mesh.bounding_sphere = [9.0, 0.0, 0.0, 5.0];
        let binfbx = scene(vec![mesh]).to_binfbx().unwrap();
        assert_eq!(
            [9.0, 0.0, 0.0, 5.0],
            binfbx.groups[0].meshes[0].bounding_sphere
        );
    }

    #[test]
    fn repack_indices_at_widest_mesh_size() {
        let small = triangle_mesh();

        // 300 unique vertices forces 2 byte indices for the whole file.
        let count = 300;
        let mut big = Mesh {
            positions: (0..count).map(|i| vec3(i as f32, 0.0, 0.0)).collect(),
            attributes: vec![AttributeDescriptor::new(
                0,
                FormatTag::Float3,
                Semantic::Position,
            )],
            ..Default::default()
        };
        for i in 0..count - 2 {
            big.triangles.push([i as u32, i as u32 + 1, i as u32 + 2]);
        }

        let binfbx = scene(vec![small, big]).to_binfbx().unwrap();
        assert_eq!(2, binfbx.index_size);
        // The small mesh's indices occupy the first three elements.
        assert_eq!(3, binfbx.groups[0].meshes[1].index_offset);
        assert_eq!(300, binfbx.groups[0].meshes[1].vertex_count);

        let decoded = SceneModel::from_binfbx(&binfbx).unwrap();
        assert_eq!(count, decoded.groups[0].meshes[1].positions.len());
    }
}
