//! Corrective bone solver data in `.rbf` files.
//!
//! The format is a self similar tagged tree: every block starts with the
//! same 16 byte header and is self delimiting through its size field, so
//! the file has no fixed total size. Each section holds the radial basis
//! function data driving a set of corrective bones from primary bone
//! rotation samples. Bones are referenced only by case folded name hashes
//! resolved against a companion skeleton file, see
//! [hash_bone_name](crate::hash::hash_bone_name).
use std::{
    io::{Cursor, Seek, SeekFrom},
    path::Path,
};

use binrw::{BinRead, BinReaderExt};
use log::warn;

use crate::error::DecodeError;

pub const MAGIC: [u8; 4] = *b"RBF\0";

const KIND_ROOT: u32 = 1;
const KIND_SECTION: u32 = 2;

/// A complete `.rbf` file.
#[derive(Debug, PartialEq, Clone)]
pub struct Rbf {
    pub version: u32,
    /// Entry count declared by the root header across all sections.
    pub declared_entry_count: u32,
    pub sections: Vec<Section>,
    /// Hashed names of the bones driving the solvers.
    pub input_hashes: Vec<u32>,
    /// Hashed names of the corrective bones written by the solvers.
    pub output_hashes: Vec<u32>,
}

/// One solver section: zipped entries plus the packed solver data blob.
#[derive(Debug, PartialEq, Clone)]
pub struct Section {
    pub version: u32,
    /// Dimension of the solver system.
    pub dimension: u32,
    pub entries: Vec<Entry>,
    /// Precomputed solver coefficients, consumed verbatim.
    pub solver_data: Vec<u8>,
}

/// One corrective entry, zipped positionally from a section's three
/// parallel sub record arrays.
#[derive(Debug, PartialEq, Clone)]
pub struct Entry {
    pub input_dimension: u32,
    /// Index into the root input bone table.
    pub bone_index: u32,
    /// Which quaternion component (0-3) of the input drives this entry.
    pub quat_component: u32,
    pub param: u32,
    /// Pose sample the radial basis kernel is centered on.
    pub rotation: [f32; 4],
    pub translation: [f32; 3],
    /// Indices into the root output bone table.
    pub outputs: Vec<u32>,
}

#[derive(BinRead, Debug)]
struct BlockHeader {
    magic: [u8; 4],
    version: u32,
    /// Byte size of the content after this header.
    size: u32,
    kind: u32,
}

#[derive(BinRead, Debug)]
struct SolverRecord {
    input_dimension: u32,
    bone_index: u32,
    quat_component: u32,
    param: u32,
}

#[derive(BinRead, Debug)]
struct SampleRecord {
    rotation: [f32; 4],
    translation: [f32; 3],
}

impl Rbf {
    /// Read from `path` using a fully buffered reader for performance.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let file_end = bytes.len() as u64;
        let mut reader = Cursor::new(bytes);

        let header: BlockHeader = reader.read_le()?;
        if header.magic != MAGIC {
            return Err(DecodeError::InvalidMagic { pos: 0 });
        }
        if header.kind != KIND_ROOT {
            return Err(DecodeError::CorruptFile {
                reason: format!("root block has kind {}", header.kind),
            });
        }

        let section_count: u32 = reader.read_le()?;
        let declared_entry_count: u32 = reader.read_le()?;

        let mut sections = Vec::new();
        let mut truncated = false;
        for index in 0..section_count {
            match read_section(&mut reader, file_end)? {
                Some(section) => sections.push(section),
                None => {
                    // Observed files sometimes end before the declared
                    // section count is reached.
                    warn!("section {index} of {section_count} has a malformed header, stopping");
                    truncated = true;
                    break;
                }
            }
        }

        let (input_hashes, output_hashes) = if truncated {
            warn!("skipping the bone hash tables of a truncated file");
            (Vec::new(), Vec::new())
        } else {
            (read_hashes(&mut reader)?, read_hashes(&mut reader)?)
        };

        Ok(Self {
            version: header.version,
            declared_entry_count,
            sections,
            input_hashes,
            output_hashes,
        })
    }
}

fn read_hashes(reader: &mut Cursor<&[u8]>) -> Result<Vec<u32>, DecodeError> {
    let count: u32 = reader.read_le()?;
    let mut hashes = Vec::new();
    for _ in 0..count {
        hashes.push(reader.read_le()?);
    }
    Ok(hashes)
}

/// Returns `None` when the next block header is missing or malformed,
/// which ends section parsing without an error.
fn read_section(reader: &mut Cursor<&[u8]>, file_end: u64) -> Result<Option<Section>, DecodeError> {
    let start = reader.stream_position()?;
    if start + 16 > file_end {
        return Ok(None);
    }
    let header: BlockHeader = reader.read_le()?;
    let end = start + 16 + header.size as u64;
    if header.magic != MAGIC || header.kind != KIND_SECTION || end > file_end {
        return Ok(None);
    }

    // Three parallel arrays in fixed order, zipped positionally below.
    let solvers: Vec<SolverRecord> = read_records(reader, end)?;
    let output_counts: Vec<u32> = read_records(reader, end)?;
    let samples: Vec<SampleRecord> = read_records(reader, end)?;

    let zipped = solvers.len().min(output_counts.len()).min(samples.len());
    if solvers.len() != zipped || output_counts.len() != zipped || samples.len() != zipped {
        // Whether mismatched lengths are a format feature or an exporter
        // bug is unresolved, so truncate instead of failing.
        warn!(
            "solver arrays have mismatched lengths {}/{}/{}, zipping to {zipped}",
            solvers.len(),
            output_counts.len(),
            samples.len()
        );
    }

    let dimension = read_u32_bounded(reader, end)?;

    let total: u64 = output_counts.iter().take(zipped).map(|c| *c as u64).sum();
    let mut flat = Vec::new();
    for _ in 0..total {
        flat.push(read_u32_bounded(reader, end)?);
    }

    let mut entries = Vec::with_capacity(zipped);
    let mut remaining = flat.as_slice();
    for ((solver, count), sample) in solvers.into_iter().zip(&output_counts).zip(samples) {
        let (outputs, rest) = remaining.split_at(*count as usize);
        remaining = rest;
        entries.push(Entry {
            input_dimension: solver.input_dimension,
            bone_index: solver.bone_index,
            quat_component: solver.quat_component,
            param: solver.param,
            rotation: sample.rotation,
            translation: sample.translation,
            outputs: outputs.to_vec(),
        });
    }

    // Whatever remains of the section is the opaque solver tail.
    let pos = reader.stream_position()?;
    let solver_data = reader.get_ref()[pos as usize..end as usize].to_vec();
    reader.seek(SeekFrom::Start(end))?;

    Ok(Some(Section {
        version: header.version,
        dimension,
        entries,
        solver_data,
    }))
}

fn read_records<T>(reader: &mut Cursor<&[u8]>, end: u64) -> Result<Vec<T>, DecodeError>
where
    for<'a> T: BinRead<Args<'a> = ()>,
{
    let count = read_u32_bounded(reader, end)?;
    let mut records = Vec::new();
    for _ in 0..count {
        records.push(reader.read_le::<T>()?);
    }
    if reader.stream_position()? > end {
        return Err(DecodeError::TruncatedInput);
    }
    Ok(records)
}

fn read_u32_bounded(reader: &mut Cursor<&[u8]>, end: u64) -> Result<u32, DecodeError> {
    if reader.stream_position()? + 4 > end {
        return Err(DecodeError::TruncatedInput);
    }
    Ok(reader.read_le()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u32(data: &mut Vec<u8>, value: u32) {
        data.extend_from_slice(&value.to_le_bytes());
    }

    fn push_f32s(data: &mut Vec<u8>, values: &[f32]) {
        for value in values {
            data.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn push_header(data: &mut Vec<u8>, size: u32, kind: u32) {
        data.extend_from_slice(&MAGIC);
        push_u32(data, 1);
        push_u32(data, size);
        push_u32(data, kind);
    }

    fn solver_record(data: &mut Vec<u8>, bone_index: u32, quat_component: u32) {
        push_u32(data, 4);
        push_u32(data, bone_index);
        push_u32(data, quat_component);
        push_u32(data, 0);
    }

    /// One section with two entries whose output counts are 1 and 2.
    fn section_content(solver_tail: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        push_u32(&mut data, 2);
        solver_record(&mut data, 0, 1);
        solver_record(&mut data, 1, 3);
        push_u32(&mut data, 2);
        push_u32(&mut data, 1);
        push_u32(&mut data, 2);
        push_u32(&mut data, 2);
        push_f32s(&mut data, &[0.0, 0.0, 0.0, 1.0, 0.1, 0.2, 0.3]);
        push_f32s(&mut data, &[0.0, 0.7071, 0.0, 0.7071, 0.0, 0.0, 0.0]);
        push_u32(&mut data, 3); // dimension
        push_u32(&mut data, 5); // flat output indices: 1 for entry 0
        push_u32(&mut data, 6); // then 2 for entry 1
        push_u32(&mut data, 7);
        data.extend_from_slice(solver_tail);
        data
    }

    fn test_file() -> Vec<u8> {
        let content = section_content(&[0xEE; 8]);
        let mut data = Vec::new();
        push_header(&mut data, 0, KIND_ROOT);
        push_u32(&mut data, 1);
        push_u32(&mut data, 2);
        push_header(&mut data, content.len() as u32, KIND_SECTION);
        data.extend_from_slice(&content);
        push_u32(&mut data, 2);
        push_u32(&mut data, 0xAAAA);
        push_u32(&mut data, 0xBBBB);
        push_u32(&mut data, 1);
        push_u32(&mut data, 0xCCCC);
        data
    }

    #[test]
    fn read_single_section() {
        let rbf = Rbf::from_bytes(&test_file()).unwrap();

        assert_eq!(2, rbf.declared_entry_count);
        assert_eq!(vec![0xAAAA, 0xBBBB], rbf.input_hashes);
        assert_eq!(vec![0xCCCC], rbf.output_hashes);

        let section = &rbf.sections[0];
        assert_eq!(3, section.dimension);
        assert_eq!(vec![0xEE; 8], section.solver_data);

        // The flat output index array splits into runs of 1 and 2.
        assert_eq!(2, section.entries.len());
        assert_eq!(vec![5], section.entries[0].outputs);
        assert_eq!(vec![6, 7], section.entries[1].outputs);
        assert_eq!(1, section.entries[0].quat_component);
        assert_eq!([0.0, 0.7071, 0.0, 0.7071], section.entries[1].rotation);
    }

    #[test]
    fn read_invalid_magic() {
        let mut data = test_file();
        data[0] = b'X';
        assert!(matches!(
            Rbf::from_bytes(&data).unwrap_err(),
            DecodeError::InvalidMagic { pos: 0 }
        ));
    }

    #[test]
    fn read_malformed_second_section_stops() {
        let content = section_content(&[]);
        let mut data = Vec::new();
        push_header(&mut data, 0, KIND_ROOT);
        push_u32(&mut data, 2);
        push_u32(&mut data, 4);
        push_header(&mut data, content.len() as u32, KIND_SECTION);
        data.extend_from_slice(&content);
        // Garbage where the second section header should be.
        data.extend_from_slice(&[0xFF; 16]);

        let rbf = Rbf::from_bytes(&data).unwrap();
        assert_eq!(1, rbf.sections.len());
        assert!(rbf.input_hashes.is_empty());
        assert!(rbf.output_hashes.is_empty());
    }

    #[test]
    fn read_mismatched_entry_arrays_truncate() {
        // Two solver records but only one output map and one sample.
        let mut content = Vec::new();
        push_u32(&mut content, 2);
        solver_record(&mut content, 0, 0);
        solver_record(&mut content, 2, 2);
        push_u32(&mut content, 1);
        push_u32(&mut content, 1);
        push_u32(&mut content, 1);
        push_f32s(&mut content, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        push_u32(&mut content, 2); // dimension
        push_u32(&mut content, 9); // single flat output index

        let mut data = Vec::new();
        push_header(&mut data, 0, KIND_ROOT);
        push_u32(&mut data, 1);
        push_u32(&mut data, 1);
        push_header(&mut data, content.len() as u32, KIND_SECTION);
        data.extend_from_slice(&content);
        push_u32(&mut data, 0);
        push_u32(&mut data, 0);

        let rbf = Rbf::from_bytes(&data).unwrap();
        let section = &rbf.sections[0];
        assert_eq!(1, section.entries.len());
        assert_eq!(vec![9], section.entries[0].outputs);
        assert_eq!(0, section.entries[0].bone_index);
    }
}
