//! Standalone skeletons in `.binskeleton` files.
//!
//! Unlike [BinFbx](crate::binfbx::BinFbx), this container is offset
//! addressed: a 16 byte header is followed by subsection index tables whose
//! 32 bit offset slots lead to 64 bit relative offsets chained to the
//! actual data. Bone transforms are stored as a quaternion and translation
//! rather than a matrix, and bone names are NUL terminated rather than
//! length prefixed, unlike every other string in the sibling formats.
use std::{
    io::{Cursor, Seek, SeekFrom},
    path::Path,
};

use binrw::{BinRead, BinReaderExt, NullString};

use crate::error::DecodeError;

const MAGIC: u64 = 0x2;
const HEADER_SIZE: u64 = 0x10;

/// A complete `.binskeleton` file.
#[derive(Debug, PartialEq, Clone)]
pub struct BinSkeleton {
    pub bones: Vec<SkeletonBone>,
}

/// A bone assembled from the transform, parent, id, and name tables.
#[derive(Debug, PartialEq, Clone)]
pub struct SkeletonBone {
    /// Rotation quaternion (x, y, z, w) in engine space.
    pub rotation: [f32; 4],
    pub translation: [f32; 3],
    /// Fourth translation component, always present in the file.
    pub reserved: f32,
    /// Index of the parent bone or -1 for a root.
    pub parent: i32,
    /// Engine identifier for this bone.
    pub id: u32,
    pub name: String,
}

/// `{start, size, count, offsets[count]}` table addressing one section.
#[derive(BinRead, Debug)]
struct SubSectionIndex {
    start: u32,
    size: u32,
    count: u32,
    #[br(count = count)]
    offsets: Vec<u32>,
}

#[derive(BinRead, Debug)]
struct BoneTransform {
    rotation: [f32; 4],
    position: [f32; 4],
}

impl BinSkeleton {
    /// Read from `path` using a fully buffered reader for performance.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let file_end = bytes.len() as u64;
        let mut reader = Cursor::new(bytes);

        let magic: u64 = reader.read_le()?;
        if magic != MAGIC {
            return Err(DecodeError::InvalidMagic { pos: 0 });
        }

        reader.seek(SeekFrom::Start(HEADER_SIZE))?;
        let bone_data: SubSectionIndex = reader.read_le()?;
        if bone_data.count < 3 {
            return Err(DecodeError::CorruptFile {
                reason: format!(
                    "bone data section has {} subsections, expected at least 3",
                    bone_data.count
                ),
            });
        }

        let base = HEADER_SIZE + bone_data.start as u64;
        let end = (base + bone_data.size as u64).min(file_end);

        check_range(base, 4, end)?;
        reader.seek(SeekFrom::Start(base))?;
        let bone_count: u32 = reader.read_le()?;
        let count = bone_count as usize;

        // Subsections in fixed order: transforms, parent indices, bone ids.
        let transforms_offset =
            read_offset64(&mut reader, base, base + bone_data.offsets[0] as u64, end)?;
        let parents_offset =
            read_offset64(&mut reader, base, base + bone_data.offsets[1] as u64, end)?;
        let ids_offset = read_offset64(&mut reader, base, base + bone_data.offsets[2] as u64, end)?;

        check_range(transforms_offset, count as u64 * 32, end)?;
        reader.seek(SeekFrom::Start(transforms_offset))?;
        let mut transforms = Vec::with_capacity(count);
        for _ in 0..count {
            transforms.push(reader.read_le::<BoneTransform>()?);
        }

        check_range(parents_offset, count as u64 * 4, end)?;
        reader.seek(SeekFrom::Start(parents_offset))?;
        let mut parents = Vec::with_capacity(count);
        for _ in 0..count {
            parents.push(reader.read_le::<i32>()?);
        }

        check_range(ids_offset, count as u64 * 4, end)?;
        reader.seek(SeekFrom::Start(ids_offset))?;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(reader.read_le::<u32>()?);
        }

        // The name table starts at the next 16 byte boundary after the bone
        // data section.
        let names_pos =
            HEADER_SIZE + ((bone_data.start as u64 + bone_data.size as u64 + 0xF) & !0xF);
        check_range(names_pos, 12, file_end)?;
        reader.seek(SeekFrom::Start(names_pos))?;
        let name_index: SubSectionIndex = reader.read_le()?;
        if (name_index.count as usize) < count + 1 {
            return Err(DecodeError::CorruptFile {
                reason: format!(
                    "name table has {} subsections for {count} bones",
                    name_index.count
                ),
            });
        }

        let names_base = names_pos + name_index.start as u64;
        let names_end = (names_base + name_index.size as u64).min(file_end);

        // The first name subsection repeats the table layout and is skipped.
        let mut names = Vec::with_capacity(count);
        for offset in name_index.offsets.iter().skip(1).take(count) {
            let target = read_offset64(
                &mut reader,
                names_base,
                names_base + *offset as u64,
                names_end,
            )?;
            reader.seek(SeekFrom::Start(target))?;
            let name: NullString = reader.read_le()?;
            names.push(name.to_string());
        }

        let bones = transforms
            .into_iter()
            .zip(parents)
            .zip(ids)
            .zip(names)
            .map(|(((transform, parent), id), name)| SkeletonBone {
                rotation: transform.rotation,
                translation: [
                    transform.position[0],
                    transform.position[1],
                    transform.position[2],
                ],
                reserved: transform.position[3],
                parent,
                id,
                name,
            })
            .collect();

        Ok(Self { bones })
    }
}

/// Follow a 32 bit slot to the 64 bit relative offset stored there.
/// Both the slot and the target must stay inside `base..end`.
fn read_offset64(
    reader: &mut Cursor<&[u8]>,
    base: u64,
    slot: u64,
    end: u64,
) -> Result<u64, DecodeError> {
    check_range(slot, 8, end)?;
    reader.seek(SeekFrom::Start(slot))?;
    let relative: u64 = reader.read_le()?;
    let target = base
        .checked_add(relative)
        .ok_or(DecodeError::MalformedOffset {
            pos: slot,
            offset: relative,
        })?;
    if target > end {
        return Err(DecodeError::MalformedOffset {
            pos: slot,
            offset: target,
        });
    }
    Ok(target)
}

fn check_range(start: u64, len: u64, end: u64) -> Result<(), DecodeError> {
    match start.checked_add(len) {
        Some(stop) if stop <= end => Ok(()),
        _ => Err(DecodeError::MalformedOffset {
            pos: start,
            offset: start.saturating_add(len),
        }),
    }
}
