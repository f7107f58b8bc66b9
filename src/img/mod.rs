//! # Disk Image Module
//!
//! Disk and tape images are represented by objects implementing the
//! `DiskImage` trait, usually named for the container they handle, e.g.
//! `Td0`.  The trait includes reading and writing tracks, sectors, and
//! file system blocks; it is agnostic as to how the container packs the
//! track data.  An image can refuse a request as out of scope, e.g. the
//! flux-preservation STX container refuses sector access.
//!
//! ## Relation to File Systems
//!
//! A `DiskImage` trait object serves as the underlying storage for the
//! `fs` modules, which work in terms of `fs::Block`.  The mapping from a
//! block to container addressing happens in the image implementations,
//! sometimes with the aid of `bios::skew`, never with help from `fs`.
//!
//! ## Geometry
//!
//! Sector-oriented containers resolve every address through the
//! `geometry::FormatDescriptor` oracle attached at open time.  The
//! descriptor never changes while the image is open.

pub mod geometry;
pub mod dsk;
pub mod d64;
pub mod g64;
pub mod adf;
pub mod dms;
pub mod cqm;
pub mod td0;
pub mod atr;
pub mod stx;
pub mod tzx;

use std::str::FromStr;
use std::fmt;
use crate::fs;
use crate::diag::DiagnosisList;
use crate::{STDRESULT,DYNERR};

/// Enumerates disk image errors.  The `Display` trait will print the
/// equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("could not interpret data as this format")]
    NotFormat,
    #[error("magic bytes did not match")]
    BadMagic,
    #[error("header checksum failed")]
    BadHeaderCrc,
    #[error("version of format not supported")]
    UnsupportedVersion,
    #[error("data ended before the format said it would")]
    TruncatedInput,
    #[error("geometric coordinate out of range")]
    GeometryMismatch,
    #[error("image size did not match the request")]
    ImageSizeMismatch,
    #[error("image type not compatible with request")]
    ImageTypeMismatch,
    #[error("unable to access sector")]
    SectorAccess,
    #[error("unable to access track")]
    TrackAccess,
    #[error("image is read only")]
    ReadOnly
}

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum DiskImageType {
    DSK,
    D64,
    G64,
    ADF,
    DMS,
    CQM,
    TD0,
    ATR,
    STX,
    TZX,
    TAP
}

impl FromStr for DiskImageType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "dsk" => Ok(Self::DSK),
            "d64" => Ok(Self::D64),
            "g64" => Ok(Self::G64),
            "adf" => Ok(Self::ADF),
            "dms" => Ok(Self::DMS),
            "cqm" | "cq" => Ok(Self::CQM),
            "td0" => Ok(Self::TD0),
            "atr" => Ok(Self::ATR),
            "stx" => Ok(Self::STX),
            "tzx" | "cdt" => Ok(Self::TZX),
            "tap" => Ok(Self::TAP),
            _ => Err(Error::NotFormat)
        }
    }
}

impl fmt::Display for DiskImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DSK => write!(f, "dsk"),
            Self::D64 => write!(f, "d64"),
            Self::G64 => write!(f, "g64"),
            Self::ADF => write!(f, "adf"),
            Self::DMS => write!(f, "dms"),
            Self::CQM => write!(f, "cqm"),
            Self::TD0 => write!(f, "td0"),
            Self::ATR => write!(f, "atr"),
            Self::STX => write!(f, "stx"),
            Self::TZX => write!(f, "tzx"),
            Self::TAP => write!(f, "tap")
        }
    }
}

/// The main trait for working with any kind of disk image.
/// The corresponding trait object serves as storage for `fs::DiskFS`.
/// Reading can mutate the object because some containers track head
/// position or decode lazily.
pub trait DiskImage {
    fn track_count(&self) -> usize;
    fn num_heads(&self) -> usize;
    /// Integrated byte capacity of the formatted tracks.
    fn byte_capacity(&self) -> usize;
    fn what_am_i(&self) -> DiskImageType;
    fn file_extensions(&self) -> Vec<String>;
    /// The geometry the oracle is answering for, if the container is
    /// sector oriented.
    fn geometry(&self) -> Option<geometry::FormatDescriptor>;
    /// Diagnoses accumulated while opening; parse failures surface here
    /// alongside a best-effort image.
    fn diagnostics(&self) -> DiagnosisList {
        DiagnosisList::new()
    }
    fn to_bytes(&mut self) -> Vec<u8>;
    /// Read a block from the image; can affect decoder state.
    fn read_block(&mut self, addr: fs::Block) -> Result<Vec<u8>,DYNERR>;
    /// Write a block to the image.
    fn write_block(&mut self, addr: fs::Block, dat: &[u8]) -> STDRESULT;
    /// Read a physical sector from the image.
    fn read_sector(&mut self, cyl: usize, head: usize, sec: usize) -> Result<Vec<u8>,DYNERR>;
    /// Write a physical sector to the image.
    fn write_sector(&mut self, cyl: usize, head: usize, sec: usize, dat: &[u8]) -> STDRESULT;
    /// Get the track buffer exactly in the form the container stores it.
    fn get_track_buf(&mut self, cyl: usize, head: usize) -> Result<Vec<u8>,DYNERR>;
    /// Set the track buffer; sizes must match.
    fn set_track_buf(&mut self, cyl: usize, head: usize, dat: &[u8]) -> STDRESULT;
}

/// If a data source is smaller than `quantum` bytes, pad it with zeros.
/// If it is larger, do not include the extra bytes.
pub fn quantize_block(src: &[u8], quantum: usize) -> Vec<u8> {
    let mut padded: Vec<u8> = Vec::new();
    for i in 0..quantum {
        if i < src.len() {
            padded.push(src[i]);
        } else {
            padded.push(0);
        }
    }
    padded
}
