//! A library for reading and writing Northlight engine model formats.
//!
//! Three container formats are supported, each with its own module named
//! after the type representing the root of the file:
//! - [BinFbx](crate::binfbx::BinFbx): a skinned mesh with its skeleton,
//!   materials, material maps, and LOD mesh groups.
//! - [BinSkeleton](crate::binskel::BinSkeleton): a standalone skeleton
//!   container using offset addressed sections.
//! - [Rbf](crate::rbf::Rbf): corrective bone solver data.
//!
//! # Getting Started
//! Only the top level types support reading and writing whole files.
//!
//! ```rust no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Read from disk.
//! let binfbx = nlfbx_lib::binfbx::BinFbx::from_file("character.binfbx")?;
//! println!("{} joints", binfbx.joints.len());
//!
//! // Save to disk after making any changes.
//! binfbx.write_to_file("out.binfbx")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Design
//! Each file format consists of a set of Rust types representing the
//! structures in the binary file. Reading and writing code is generated
//! from the type and its attribute annotations wherever the layout is
//! sequential. The offset addressed BinSkeleton and RBF containers use
//! hand written parsers built from the same primitives.
//!
//! Each type is intended to be as specific as possible while still being
//! able to produce a binary identical output. Enums are used instead of raw
//! integers to reject unknown variants. Fields without a known meaning are
//! kept verbatim so a read and write round trip reproduces the input.
use std::{
    io::{Cursor, Read, Seek, Write},
    path::Path,
};

use binrw::{BinRead, BinReaderExt, BinResult, BinWrite, Endian};

pub mod binfbx;
pub mod binskel;
pub mod error;
pub mod hash;
pub mod rbf;

use error::DecodeError;

/// Read a `u32` byte length followed by that many bytes of UTF-8 text.
/// Strings in these formats carry no terminator.
fn parse_string<R: Read + Seek>(reader: &mut R, endian: Endian, _args: ()) -> BinResult<String> {
    let pos = reader.stream_position()?;
    let length = u32::read_options(reader, endian, ())?;
    let mut bytes = vec![0u8; length as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|err| binrw::Error::Custom {
        pos,
        err: Box::new(err),
    })
}

fn write_string<W: Write + Seek>(
    value: &String,
    writer: &mut W,
    endian: Endian,
    _args: (),
) -> BinResult<()> {
    (value.len() as u32).write_options(writer, endian, ())?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

macro_rules! file_read_impl {
    ($($type_name:path),*) => {
        $(
            impl $type_name {
                /// Read from `reader`, classifying binary errors into [DecodeError].
                pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, DecodeError> {
                    reader.read_le().map_err(DecodeError::from)
                }

                /// Read from `path` using a fully buffered reader for performance.
                pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
                    let mut reader = Cursor::new(std::fs::read(path)?);
                    Self::read(&mut reader)
                }

                /// Read from `bytes`.
                pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Self, DecodeError> {
                    Self::read(&mut Cursor::new(bytes))
                }
            }
        )*
    };
}

file_read_impl!(binfbx::BinFbx);

macro_rules! file_write_impl {
    ($($type_name:path),*) => {
        $(
            impl $type_name {
                pub fn write<W: Write + Seek>(&self, writer: &mut W) -> BinResult<()> {
                    self.write_le(writer)
                }

                /// Write to `path` using a buffered writer for better performance.
                pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> BinResult<()> {
                    let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
                    self.write_le(&mut writer)
                }
            }
        )*
    };
}

file_write_impl!(binfbx::BinFbx);
