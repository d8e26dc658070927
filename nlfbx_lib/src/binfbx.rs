//! Skinned mesh data in `.binfbx` files.
//!
//! # Overview
//! A [BinFbx] file stores all geometry in two interleaved vertex buffers and
//! one index buffer at the start of the file. Buffer 0 holds shading
//! attributes (normals, texture coordinates, tangents, vertex colors) and
//! buffer 1 holds positions and skinning data. The remaining sections
//! describe the joint palette, materials, material maps, and two groups of
//! mesh descriptors whose offsets select ranges out of the shared buffers.
//!
//! Group 0 contains the shaded meshes and group 1 the shadow meshes, which
//! may merge or drop submeshes relative to group 0. Group 0 indexes the
//! material table through the primary material map and group 1 through the
//! secondary map.
use std::io::{Read, Seek, Write};

use binrw::{binrw, BinRead, BinResult, BinWrite, Endian};

use crate::{error::DecodeError, parse_string, write_string};

/// A complete `.binfbx` file.
#[binrw]
#[derive(Debug, PartialEq, Clone)]
#[brw(magic(0x2Eu32))]
pub struct BinFbx {
    #[br(temp)]
    #[bw(calc = vertex_buffer0.len() as u32)]
    vertex_buffer0_size: u32,

    #[br(temp)]
    #[bw(calc = vertex_buffer1.len() as u32)]
    vertex_buffer1_size: u32,

    #[br(temp)]
    #[bw(calc = (index_buffer.len() / (*index_size).max(1) as usize) as u32)]
    index_count: u32,

    /// The size of one index element in bytes: 1, 2, or 4.
    pub index_size: u32,

    /// Interleaved shading attributes: normals, texture coordinates,
    /// tangents, and vertex colors.
    #[br(count = vertex_buffer0_size)]
    pub vertex_buffer0: Vec<u8>,

    /// Interleaved positions and skinning data.
    #[br(count = vertex_buffer1_size)]
    pub vertex_buffer1: Vec<u8>,

    /// Triangle list indices for every mesh packed at [index_size](#structfield.index_size).
    #[br(count = index_count as u64 * index_size as u64)]
    pub index_buffer: Vec<u8>,

    #[br(temp)]
    #[bw(calc = joints.len() as u32)]
    joint_count: u32,

    /// The joint palette referenced by index from vertex skinning data.
    /// A joint's parent may appear after the joint itself in this list.
    #[br(count = joint_count)]
    pub joints: Vec<Joint>,

    pub params: GlobalParams,

    #[br(temp)]
    #[bw(calc = materials.len() as u32)]
    material_count: u32,

    #[br(count = material_count)]
    pub materials: Vec<Material>,

    pub material_maps: MaterialMaps,

    /// Mesh group 0 (shaded) followed by group 1 (shadow).
    pub groups: [MeshGroup; 2],

    pub trailer: Trailer,
}

/// A single entry of the joint palette.
#[binrw]
#[derive(Debug, PartialEq, Clone)]
pub struct Joint {
    #[br(parse_with = parse_string)]
    #[bw(write_with = write_string)]
    pub name: String,

    /// Row major 3x3 rotation followed by a translation, storing the
    /// pre-inverted bind pose in engine space.
    pub matrix: [f32; 12],

    /// Envelope tail point. The zero vector marks a zero length joint.
    pub tail: [f32; 3],

    pub radius: f32,

    /// Index of the parent joint in the palette or -1 for a root.
    pub parent: i32,
}

/// Model wide values between the joint palette and the material table.
#[binrw]
#[derive(Debug, Default, PartialEq, Clone)]
pub struct GlobalParams {
    pub reserved: [i32; 2],

    pub scale: f32,

    #[br(temp)]
    #[bw(calc = lod_thresholds.len() as u32)]
    lod_threshold_count: u32,

    /// Screen coverage thresholds selecting between LOD levels.
    #[br(count = lod_threshold_count)]
    pub lod_thresholds: Vec<f32>,

    pub mirror_sign: f32,

    pub bounds_center: [f32; 3],
    pub bounds_radius: f32,
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],

    pub lod_count: u32,
}

/// A material table entry with its self describing uniform list.
#[binrw]
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Material {
    /// Constant marker at the start of every material record.
    pub tag: u32,

    pub id: [u8; 8],

    #[br(parse_with = parse_string)]
    #[bw(write_with = write_string)]
    pub name: String,

    #[br(parse_with = parse_string)]
    #[bw(write_with = write_string)]
    pub type_name: String,

    #[br(parse_with = parse_string)]
    #[bw(write_with = write_string)]
    pub path: String,

    pub params: [u32; 6],

    #[br(temp)]
    #[bw(calc = uniforms.len() as u32)]
    uniform_count: u32,

    #[br(count = uniform_count)]
    pub uniforms: Vec<Uniform>,
}

impl Material {
    /// The stored texture map paths in uniform order.
    /// Separators are kept exactly as stored, which mixes `\` and `/`.
    pub fn texture_paths(&self) -> impl Iterator<Item = &str> {
        self.uniforms.iter().filter_map(|u| match &u.value {
            UniformValue::TextureMap(path) => Some(path.as_str()),
            _ => None,
        })
    }
}

/// A named material parameter.
#[binrw]
#[derive(Debug, PartialEq, Clone)]
pub struct Uniform {
    #[br(parse_with = parse_string)]
    #[bw(write_with = write_string)]
    pub name: String,

    pub value: UniformValue,
}

/// A uniform payload selected by the type tag in front of it.
///
/// Uniform records have no self describing length, so an unknown tag fails
/// decoding with [DecodeError::UnknownUniformType] instead of skipping.
#[derive(Debug, PartialEq, Clone)]
pub enum UniformValue {
    Float(f32),
    Range([f32; 2]),
    Vector([f32; 3]),
    Color([f32; 4]),
    /// Marker with no payload.
    Sampler,
    TextureMap(String),
    Boolean(u32),
    Integer(i32),
}

impl UniformValue {
    /// The type tag stored in front of the payload.
    pub fn tag(&self) -> u32 {
        match self {
            UniformValue::Float(_) => 0x0,
            UniformValue::Range(_) => 0x1,
            UniformValue::Vector(_) => 0x2,
            UniformValue::Color(_) => 0x3,
            UniformValue::Sampler => 0x8,
            UniformValue::TextureMap(_) => 0x9,
            UniformValue::Boolean(_) => 0xC,
            UniformValue::Integer(_) => 0xD,
        }
    }
}

impl BinRead for UniformValue {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let tag = u32::read_options(reader, endian, ())?;
        match tag {
            0x0 => Ok(Self::Float(f32::read_options(reader, endian, ())?)),
            0x1 => Ok(Self::Range(<[f32; 2]>::read_options(reader, endian, ())?)),
            0x2 => Ok(Self::Vector(<[f32; 3]>::read_options(reader, endian, ())?)),
            0x3 => Ok(Self::Color(<[f32; 4]>::read_options(reader, endian, ())?)),
            0x8 => Ok(Self::Sampler),
            0x9 => Ok(Self::TextureMap(parse_string(reader, endian, ())?)),
            0xC => Ok(Self::Boolean(u32::read_options(reader, endian, ())?)),
            0xD => Ok(Self::Integer(i32::read_options(reader, endian, ())?)),
            _ => Err(binrw::Error::Custom {
                pos,
                err: Box::new(DecodeError::UnknownUniformType { tag }),
            }),
        }
    }
}

impl BinWrite for UniformValue {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.tag().write_options(writer, endian, ())?;
        match self {
            UniformValue::Float(value) => value.write_options(writer, endian, ()),
            UniformValue::Range(value) => value.write_options(writer, endian, ()),
            UniformValue::Vector(value) => value.write_options(writer, endian, ()),
            UniformValue::Color(value) => value.write_options(writer, endian, ()),
            UniformValue::Sampler => Ok(()),
            UniformValue::TextureMap(path) => write_string(path, writer, endian, ()),
            UniformValue::Boolean(value) => value.write_options(writer, endian, ()),
            UniformValue::Integer(value) => value.write_options(writer, endian, ()),
        }
    }
}

/// The mesh index arrays selecting materials for each group.
///
/// Every map has one entry per mesh in the iteration order the mesh
/// descriptors are written in. The primary map serves group 0, the
/// secondary map group 1, and the named alternate maps are variant looks
/// with the same length as the primary map.
#[binrw]
#[derive(Debug, Default, PartialEq, Clone)]
pub struct MaterialMaps {
    #[br(temp)]
    #[bw(calc = primary.len() as u32)]
    primary_count: u32,

    #[br(count = primary_count)]
    pub primary: Vec<u32>,

    #[br(temp)]
    #[bw(calc = alternates.len() as u32)]
    alternate_count: u32,

    #[br(args { count: alternate_count as usize, inner: primary_count })]
    pub alternates: Vec<AlternateMaterialMap>,

    #[br(temp)]
    #[bw(calc = secondary.len() as u32)]
    secondary_count: u32,

    #[br(count = secondary_count)]
    pub secondary: Vec<u32>,
}

/// A named variant material map. Its length is not stored; it always
/// matches the primary map.
#[binrw]
#[derive(Debug, PartialEq, Clone)]
#[br(import_raw(len: u32))]
pub struct AlternateMaterialMap {
    #[br(parse_with = parse_string)]
    #[bw(write_with = write_string)]
    pub name: String,

    #[br(count = len)]
    pub indices: Vec<u32>,
}

/// One of the two mesh groups.
#[binrw]
#[derive(Debug, Default, PartialEq, Clone)]
pub struct MeshGroup {
    #[br(temp)]
    #[bw(calc = meshes.len() as u32)]
    mesh_count: u32,

    #[br(count = mesh_count)]
    pub meshes: Vec<MeshDescriptor>,
}

/// A single mesh: a vertex range header followed by descriptor fields.
#[binrw]
#[derive(Debug, Default, PartialEq, Clone)]
pub struct MeshDescriptor {
    /// The LOD level this mesh belongs to within its group.
    pub lod: u32,
    pub vertex_count: u32,
    pub triangle_count: u32,
    /// Byte offset into [vertex_buffer0](struct.BinFbx.html#structfield.vertex_buffer0).
    pub vertex_buffer0_offset: u32,
    /// Byte offset into [vertex_buffer1](struct.BinFbx.html#structfield.vertex_buffer1).
    pub vertex_buffer1_offset: u32,
    /// Offset into the index buffer in index elements, not bytes.
    pub index_offset: u32,

    pub flags0: i32,

    /// Center and radius.
    pub bounding_sphere: [f32; 4],
    /// Min corner followed by max corner.
    pub bounding_box: [f32; 6],

    pub flags1: i32,

    #[br(temp)]
    #[bw(calc = attributes.len() as u8)]
    attribute_count: u8,

    /// The packed vertex layout in declaration order.
    #[br(count = attribute_count)]
    pub attributes: Vec<AttributeDescriptor>,

    pub joint: i32,
    pub unknown3: f32,
    pub is_rigid: u8,
    pub unknown5: f32,
}

/// One vertex attribute declaration.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct AttributeDescriptor {
    /// The declared buffer index. See [declared_to_physical_buffer_index]
    /// for the mapping to an actual buffer.
    pub buffer_index: u8,
    pub format: FormatTag,
    pub semantic: Semantic,
    /// Always zero.
    pub zero: u8,
}

impl AttributeDescriptor {
    pub fn new(buffer_index: u8, format: FormatTag, semantic: Semantic) -> Self {
        Self {
            buffer_index,
            format,
            semantic,
            zero: 0,
        }
    }

    /// The index of the file buffer actually holding this attribute.
    pub fn physical_buffer_index(&self) -> u8 {
        declared_to_physical_buffer_index(self.buffer_index)
    }
}

/// Map a declared buffer index to the physical file buffer index.
///
/// The stored descriptors name the renderer streams, which are swapped
/// relative to the file buffers: declared 0 is physical 1 and vice versa.
/// The swap is its own inverse and must be applied exactly once.
pub fn declared_to_physical_buffer_index(index: u8) -> u8 {
    index ^ 1
}

/// The data type and component layout of a vertex attribute.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum FormatTag {
    /// Float32x3, used for positions.
    Float3,
    /// Unorm8x4, components are `raw / 255`.
    Byte4Unorm,
    /// Uint8x4, raw integer components.
    Byte4Uint,
    /// Snorm8x4, components are `raw / 127`.
    Byte4Snorm,
    /// Snorm16x2, texture coordinates with `u = raw / 4095`, `v = 1 - raw / 4095`.
    Short2Snorm,
    /// Snorm16x4, components are `raw / 32767`.
    Short4Snorm,
    /// Uint16x4, raw integer components.
    UShort4Uint,
}

impl FormatTag {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x2 => Some(Self::Float3),
            0x4 => Some(Self::Byte4Unorm),
            0x5 => Some(Self::Byte4Uint),
            0x6 => Some(Self::Byte4Snorm),
            0x7 => Some(Self::Short2Snorm),
            0x8 => Some(Self::Short4Snorm),
            0xD => Some(Self::UShort4Uint),
            _ => None,
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            Self::Float3 => 0x2,
            Self::Byte4Unorm => 0x4,
            Self::Byte4Uint => 0x5,
            Self::Byte4Snorm => 0x6,
            Self::Short2Snorm => 0x7,
            Self::Short4Snorm => 0x8,
            Self::UShort4Uint => 0xD,
        }
    }

    /// The size of one packed element in bytes.
    ///
    /// A wrong size here corrupts the stride of every attribute after this
    /// one, which is why unknown tags fail decoding instead of skipping.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::Float3 => 12,
            Self::Byte4Unorm => 4,
            Self::Byte4Uint => 4,
            Self::Byte4Snorm => 4,
            Self::Short2Snorm => 4,
            Self::Short4Snorm => 8,
            Self::UShort4Uint => 8,
        }
    }
}

impl BinRead for FormatTag {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let tag = u8::read_options(reader, endian, ())?;
        Self::from_tag(tag).ok_or(binrw::Error::Custom {
            pos,
            err: Box::new(DecodeError::UnsupportedVertexFormat { tag }),
        })
    }
}

impl BinWrite for FormatTag {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.tag().write_options(writer, endian, ())
    }
}

/// The logical meaning of a vertex attribute.
#[binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[brw(repr(u8))]
pub enum Semantic {
    Position = 0,
    Normal = 1,
    TexCoord = 2,
    Tangent = 3,
    Color = 4,
    BoneIndex = 5,
    BoneWeight = 6,
}

/// Values after the mesh groups at the very end of the file.
#[binrw]
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Trailer {
    pub reserved: u32,

    /// Total surface area of the shaded meshes, or zero when no geometry
    /// statistics were computed.
    pub surface_area: f32,

    #[br(temp)]
    #[bw(calc = cdf.len() as u32)]
    cdf_count: u32,

    /// Cumulative distribution over triangle areas used for sampling.
    #[br(count = cdf_count)]
    pub cdf: Vec<f32>,
}
