//! Utilities for working with packed vertex buffer data.
//!
//! Decoded values use a "struct of arrays" layout: dedicated arrays store
//! the values of a single attribute for every vertex, indexed by file
//! vertex index. The buffers in the file use an interleaved "array of
//! structs" layout described by each mesh's attribute descriptors, which
//! [buffer_layouts] turns into per buffer record layouts.
use std::io::{Cursor, Seek, SeekFrom};

use binrw::BinReaderExt;
use glam::{vec2, Vec2, Vec3, Vec4};
use nlfbx_lib::binfbx::{
    declared_to_physical_buffer_index, AttributeDescriptor, FormatTag, MeshDescriptor, Semantic,
};
use nlfbx_lib::error::DecodeError;

use crate::{error::LoadModelError, transform};

/// Typed per vertex arrays for one mesh, indexed by file vertex index.
/// Arrays for attributes the mesh does not declare stay empty.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct VertexAttributes {
    /// Positions converted to editor space.
    pub positions: Vec<Vec3>,
    /// Normals converted to editor space.
    pub normals: Vec<Vec3>,
    /// Tangents with the handedness sign in the fourth component.
    pub tangents: Vec<Vec4>,
    /// Texture coordinates for each channel in semantic occurrence order.
    pub uvs: Vec<Vec<Vec2>>,
    pub colors: Vec<Vec4>,
    pub bone_indices: Vec<[u16; 4]>,
    /// Normalized bone weights matching [bone_indices](Self::bone_indices).
    pub skin_weights: Vec<Vec4>,
}

/// The position of one attribute inside its buffer's interleaved record.
#[derive(Debug, PartialEq, Clone)]
pub struct LayoutAttribute {
    pub semantic: Semantic,
    /// Zero based occurrence of the semantic within the mesh, for example
    /// the second `TexCoord` channel.
    pub semantic_index: u32,
    pub format: FormatTag,
    /// Byte offset within the interleaved record.
    pub offset: usize,
}

/// The interleaved record layout of one physical buffer.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct BufferLayout {
    pub stride: usize,
    pub attributes: Vec<LayoutAttribute>,
}

/// Build both physical buffer layouts from the declared descriptor list.
///
/// The declared to physical buffer swap is applied here, exactly once,
/// before any offset arithmetic.
pub fn buffer_layouts(
    descriptors: &[AttributeDescriptor],
) -> Result<[BufferLayout; 2], LoadModelError> {
    let mut layouts = [BufferLayout::default(), BufferLayout::default()];
    let mut semantic_counts = [0u32; 7];

    for descriptor in descriptors {
        let physical = declared_to_physical_buffer_index(descriptor.buffer_index);
        if physical > 1 {
            return Err(LoadModelError::InvalidBufferIndex {
                index: descriptor.buffer_index,
            });
        }

        let semantic_index = &mut semantic_counts[descriptor.semantic as usize];
        let layout = &mut layouts[physical as usize];
        layout.attributes.push(LayoutAttribute {
            semantic: descriptor.semantic,
            semantic_index: *semantic_index,
            format: descriptor.format,
            offset: layout.stride,
        });
        layout.stride += descriptor.format.size_in_bytes();
        *semantic_index += 1;
    }

    Ok(layouts)
}

/// Decode a mesh's vertex range into typed per vertex arrays.
pub fn read_mesh_attributes(
    descriptor: &MeshDescriptor,
    vertex_buffer0: &[u8],
    vertex_buffer1: &[u8],
) -> Result<VertexAttributes, LoadModelError> {
    let layouts = buffer_layouts(&descriptor.attributes)?;
    let buffers = [vertex_buffer0, vertex_buffer1];
    let offsets = [
        descriptor.vertex_buffer0_offset as usize,
        descriptor.vertex_buffer1_offset as usize,
    ];
    let count = descriptor.vertex_count as usize;

    let mut attributes = VertexAttributes::default();
    for (layout, (buffer, offset)) in layouts.iter().zip(buffers.into_iter().zip(offsets)) {
        if layout.attributes.is_empty() {
            continue;
        }
        let size = layout.stride * count;
        let data = buffer
            .get(offset..offset + size)
            .ok_or(DecodeError::TruncatedInput)?;
        for attribute in &layout.attributes {
            read_attribute(data, count, layout.stride, attribute, &mut attributes)?;
        }
    }
    Ok(attributes)
}

fn read_attribute(
    data: &[u8],
    count: usize,
    stride: usize,
    attribute: &LayoutAttribute,
    out: &mut VertexAttributes,
) -> Result<(), LoadModelError> {
    let offset = attribute.offset;
    match (attribute.semantic, attribute.format) {
        (Semantic::Position, FormatTag::Float3) => {
            out.positions = read_data(data, count, stride, offset, read_f32x3)?
                .into_iter()
                .map(transform::position_to_editor)
                .collect();
        }
        (Semantic::Normal, FormatTag::Short4Snorm) => {
            out.normals = read_data(data, count, stride, offset, read_snorm16x4)?
                .into_iter()
                .map(|n| transform::normal_to_editor(n.truncate()))
                .collect();
        }
        (Semantic::TexCoord, FormatTag::Short2Snorm) => {
            let channel = attribute.semantic_index as usize;
            if out.uvs.len() <= channel {
                out.uvs.resize(channel + 1, Vec::new());
            }
            out.uvs[channel] = read_data(data, count, stride, offset, read_texcoord)?;
        }
        (Semantic::Tangent, FormatTag::Byte4Snorm) => {
            out.tangents = read_data(data, count, stride, offset, read_snorm8x4)?;
        }
        (Semantic::Tangent, FormatTag::Byte4Unorm) => {
            out.tangents = read_data(data, count, stride, offset, read_unorm8x4)?;
        }
        (Semantic::Color, FormatTag::Byte4Unorm) => {
            out.colors = read_data(data, count, stride, offset, read_unorm8x4)?;
        }
        (Semantic::Color, FormatTag::Byte4Snorm) => {
            out.colors = read_data(data, count, stride, offset, read_snorm8x4)?;
        }
        (Semantic::BoneIndex, FormatTag::Byte4Uint) => {
            out.bone_indices = read_data(data, count, stride, offset, read_u8x4_widened)?;
        }
        (Semantic::BoneIndex, FormatTag::UShort4Uint) => {
            out.bone_indices = read_data(data, count, stride, offset, read_u16x4)?;
        }
        (Semantic::BoneWeight, FormatTag::Byte4Unorm) => {
            out.skin_weights = read_data(data, count, stride, offset, read_unorm8x4)?;
        }
        (semantic, format) => {
            return Err(LoadModelError::UnsupportedAttribute { semantic, format })
        }
    }
    Ok(())
}

fn read_data<T, F>(
    data: &[u8],
    count: usize,
    stride: usize,
    offset: usize,
    read_item: F,
) -> Result<Vec<T>, LoadModelError>
where
    F: Fn(&mut Cursor<&[u8]>) -> binrw::BinResult<T>,
{
    let mut reader = Cursor::new(data);
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        reader
            .seek(SeekFrom::Start((i * stride + offset) as u64))
            .map_err(DecodeError::from)?;
        values.push(read_item(&mut reader).map_err(DecodeError::from)?);
    }
    Ok(values)
}

fn read_f32x3(reader: &mut Cursor<&[u8]>) -> binrw::BinResult<Vec3> {
    let value: [f32; 3] = reader.read_le()?;
    Ok(value.into())
}

fn read_snorm16x4(reader: &mut Cursor<&[u8]>) -> binrw::BinResult<Vec4> {
    let value: [i16; 4] = reader.read_le()?;
    Ok(value.map(|i| i as f32 / 32767.0).into())
}

/// Texture coordinates store `u / 4095` with the V axis flipped.
fn read_texcoord(reader: &mut Cursor<&[u8]>) -> binrw::BinResult<Vec2> {
    let value: [i16; 2] = reader.read_le()?;
    Ok(vec2(
        value[0] as f32 / 4095.0,
        1.0 - value[1] as f32 / 4095.0,
    ))
}

fn read_unorm8x4(reader: &mut Cursor<&[u8]>) -> binrw::BinResult<Vec4> {
    let value: [u8; 4] = reader.read_le()?;
    Ok(value.map(|u| u as f32 / 255.0).into())
}

fn read_snorm8x4(reader: &mut Cursor<&[u8]>) -> binrw::BinResult<Vec4> {
    let value: [i8; 4] = reader.read_le()?;
    Ok(value.map(|i| i as f32 / 127.0).into())
}

fn read_u8x4_widened(reader: &mut Cursor<&[u8]>) -> binrw::BinResult<[u16; 4]> {
    let value: [u8; 4] = reader.read_le()?;
    Ok(value.map(u16::from))
}

fn read_u16x4(reader: &mut Cursor<&[u8]>) -> binrw::BinResult<[u16; 4]> {
    reader.read_le()
}

/// Read a mesh's triangle list in file order.
pub fn read_triangles(
    descriptor: &MeshDescriptor,
    index_buffer: &[u8],
    index_size: u32,
) -> Result<Vec<[u32; 3]>, LoadModelError> {
    // Index offsets are stored in index elements, not bytes.
    let start = descriptor.index_offset as usize * index_size as usize;
    let len = descriptor.triangle_count as usize * 3 * index_size as usize;
    let data = index_buffer
        .get(start..start + len)
        .ok_or(DecodeError::TruncatedInput)?;

    let mut reader = Cursor::new(data);
    let mut triangles = Vec::with_capacity(descriptor.triangle_count as usize);
    for _ in 0..descriptor.triangle_count {
        let mut triangle = [0u32; 3];
        for index in &mut triangle {
            *index = match index_size {
                1 => reader.read_le::<u8>().map_err(DecodeError::from)? as u32,
                2 => reader.read_le::<u16>().map_err(DecodeError::from)? as u32,
                4 => reader.read_le::<u32>().map_err(DecodeError::from)?,
                size => return Err(LoadModelError::InvalidIndexSize { size }),
            };
            if *index >= descriptor.vertex_count {
                return Err(LoadModelError::TriangleIndexOutOfRange {
                    index: *index,
                    count: descriptor.vertex_count,
                });
            }
        }
        triangles.push(triangle);
    }
    Ok(triangles)
}
