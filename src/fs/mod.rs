//! # File System Module
//!
//! File system modules handle interactions with directories and files.
//! There is a sub-module for each supported file system.  File systems are
//! represented by the `DiskFS` trait; the trait object takes ownership of
//! some disk image, which it uses as storage.  Any changes are not
//! permanent until the image is flattened and saved by the caller.
//!
//! This module also contains the `Block` enumeration, which specifies and
//! locates allocation units.  The enumeration names the file system's
//! allocation scheme, and its value is a specific unit.  The value can take
//! any form, e.g., DOS 3.3 blocks are [track,sector] pairs, Atari blocks
//! are absolute sector numbers, CP/M blocks are (block,BSH,OFF) tuples.
//!
//! Sector skews are not handled here.  Transformation of a `Block` to a
//! physical disk address happens within the `img` module, with table help
//! from `bios`.

pub mod atari;
pub mod dos33;
pub mod prodos;
pub mod cpm;
pub mod cbm;

use std::fmt;
use crate::img;
use crate::diag::DiagnosisList;
use crate::{STDRESULT,DYNERR};

/// Enumerates high level file system errors.  The `Display` trait will
/// print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("file system not compatible with request")]
    FileSystemMismatch,
    #[error("file data is not in the expected form")]
    FileFormat
}

/// Encapsulates the disk address and addressing mode used by a file system.
/// The disk image layer has the final responsibility for transforming these
/// into container addresses.
#[derive(PartialEq,Eq,Clone,Copy,Hash,Debug)]
pub enum Block {
    /// value is the absolute sector number, numbered from 1
    Atari(usize),
    /// value is [track, logical sector]
    DOS33([usize;2]),
    /// value is the ProDOS block number
    PO(usize),
    /// value is (absolute block number, BSH, OFF); see cpm::types
    CPM((usize,u8,u16)),
    /// value is [track numbered from 1, sector]
    CBM([usize;2])
}

impl Block {
    /// At this level we can only take sectors per track and return a
    /// track-sector list, assuming a monotonic relationship between blocks
    /// and sectors.  Any further skewing is the caller's business.
    /// CP/M logical sectors are numbered from 1 and the OFF tracks are
    /// accounted for.
    pub fn get_lsecs(&self, secs_per_track: usize) -> Vec<[usize;2]> {
        match self {
            Self::Atari(s) => vec![[(s-1)/secs_per_track, 1 + (s-1)%secs_per_track]],
            Self::DOS33([t,s]) => vec![[*t,*s]],
            Self::CBM([t,s]) => vec![[*t-1,*s]],
            Self::PO(_) => panic!("get_lsecs is not appropriate for ProDOS"),
            Self::CPM((block,bsh,off)) => {
                let mut ans: Vec<[usize;2]> = Vec::new();
                let lsecs_per_block = 1 << bsh;
                for sec_count in block*lsecs_per_block..(block+1)*lsecs_per_block {
                    ans.push([*off as usize + sec_count/secs_per_track, 1 + sec_count%secs_per_track]);
                }
                ans
            }
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atari(s) => write!(f, "Atari sector {}", s),
            Self::DOS33([t,s]) => write!(f, "DOS 3.3 track {} sector {}", t, s),
            Self::PO(b) => write!(f, "ProDOS block {}", b),
            Self::CPM((b,s,o)) => write!(f, "CPM block {} shift {} offset {}", b, s, o),
            Self::CBM([t,s]) => write!(f, "CBM track {} sector {}", t, s)
        }
    }
}

/// This converts between UTF8+LF/CRLF and the encoding used by the file
/// system (ATASCII, negative ASCII, PETSCII, CP/M +ASCII).
pub trait TextConversion {
    fn new(line_terminator: Vec<u8>) -> Self where Self: Sized;
    fn from_utf8(&self, txt: &str) -> Option<Vec<u8>>;
    fn to_utf8(&self, raw: &[u8]) -> Option<String>;
    fn is_terminated(bytes: &[u8], term: &[u8]) -> bool {
        if term.len() == 0 {
            return true;
        }
        if bytes.len() < term.len() {
            return false;
        }
        for i in 0..term.len() {
            if bytes[i + bytes.len() - term.len()] != term[i] {
                return false;
            }
        }
        true
    }
}

/// Uniform directory row, what `catalog` returns for every file system.
/// File system specific extensions ride in `aux`.
#[derive(Clone)]
pub struct FileInfo {
    pub name: String,
    /// display type, e.g. `PRG`, `B`, `BIN`
    pub typ: String,
    /// first allocation unit of the file
    pub first: Block,
    /// size in the file system's allocation units
    pub blocks: usize,
    /// exact byte count where the file system stores one
    pub eof: Option<usize>,
    pub locked: bool,
    pub deleted: bool,
    pub timestamp: Option<chrono::NaiveDateTime>,
    /// auxiliary word: load address, CP/M user number, etc.
    pub aux: u16
}

/// Abstract file system interface.  Presumed to own an underlying
/// DiskImage.  Provides directory operations, whole-file transfer, and the
/// consistency hooks the recovery pipeline drives.
pub trait DiskFS {
    /// Name of the file system for display, e.g. "CP/M 2.2"
    fn fs_name(&self) -> String;
    /// List all live files; deleted entries appear only if `all` is set.
    fn catalog(&mut self, all: bool) -> Result<Vec<FileInfo>,DYNERR>;
    /// Read a file's payload.
    fn extract_file(&mut self, name: &str) -> Result<Vec<u8>,DYNERR>;
    /// Write a file.  `typ` is a file system type mnemonic, `aux` is the
    /// auxiliary word (load address, user number).  Atomic: on any failure
    /// every allocation unit taken is freed before the error surfaces.
    fn inject_file(&mut self, name: &str, typ: &str, aux: u16, dat: &[u8]) -> Result<usize,DYNERR>;
    /// Delete a file, freeing its allocation units.
    fn delete_file(&mut self, name: &str) -> STDRESULT;
    /// Rename a file; the new name must obey the file system's rules.
    fn rename_file(&mut self, name: &str, new_name: &str) -> STDRESULT;
    /// Set or clear write protection on a file.
    fn set_locked(&mut self, name: &str, locked: bool) -> STDRESULT;
    /// Resurrect a deleted file when the on-disk chain is still intact.
    /// File systems without such a path refuse.
    fn recover_deleted(&mut self, _name: &str) -> Result<Vec<u8>,DYNERR> {
        Err(Box::new(Error::FileSystemMismatch))
    }
    /// Free allocation units according to the live map.
    fn free_units(&mut self) -> Result<usize,DYNERR>;
    /// Recovery pass 4: rebuild the allocation map from a directory walk.
    /// Returns the count of units whose state changed.  With `commit`
    /// clear, nothing is written and the count is a dry run.
    fn rebuild_bitmap(&mut self, commit: bool) -> Result<usize,DYNERR>;
    /// Recovery pass 5: walk every entry's chain without mutating,
    /// reporting circular links, cross links, and range escapes.
    fn validate_directory(&mut self) -> Result<DiagnosisList,DYNERR>;
    /// Mutably borrow the underlying disk image.
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage>;
}
