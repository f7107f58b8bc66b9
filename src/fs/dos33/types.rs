use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::str::FromStr;
use crate::fs::TextConversion;

pub const VTOC_TRACK: usize = 17;
pub const CATALOG_SECTOR: usize = 15;
pub const TRACKS: usize = 35;
pub const SECTORS: usize = 16;
pub const SECTOR_SIZE: usize = 256;
pub const ENTRIES_PER_SECTOR: usize = 7;
pub const PAIRS_PER_TSLIST: usize = 122;
pub const MAX_DIRECTORY_REPS: usize = 100;
pub const MAX_TSLIST_REPS: usize = 1000;
/// first byte of a deleted entry; the original track hides in the name
pub const DELETED_TRACK: u8 = 0xff;
/// type high bit write protects the file
pub const LOCK_FLAG: u8 = 0x80;

/// Enumerates DOS errors.  The `Display` trait will print the equivalent
/// DOS message such as `FILE NOT FOUND`.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("RANGE ERROR")]
    Range,
    #[error("FILE NOT FOUND")]
    NotFound,
    #[error("FILE ALREADY EXISTS")]
    AlreadyExists,
    #[error("DIRECTORY FULL")]
    DirectoryFull,
    #[error("DISK FULL")]
    DiskFull,
    #[error("FILE LOCKED")]
    Locked,
    #[error("SYNTAX ERROR")]
    InvalidName,
    #[error("CHAIN IS CIRCULAR")]
    CircularChain,
    #[error("SECTOR CROSS LINKED")]
    CrossLinked,
    #[error("FILE CANNOT BE RECOVERED")]
    BrokenChain
}

/// Enumerates the file types, conversions are:
/// * FileType to u8: `as u8`
/// * u8 to FileType: `FileType::from_u8` (use FromPrimitive trait)
/// * &str to FileType: `FileType::from_str`, str can be a number or mnemonic
#[derive(FromPrimitive,Clone,Copy,PartialEq)]
pub enum FileType {
    Text = 0x00,
    Integer = 0x01,
    Applesoft = 0x02,
    Binary = 0x04,
    SType = 0x08,
    Relocatable = 0x10,
    AType = 0x20,
    BType = 0x40
}

impl FileType {
    /// the letter DOS prints in the catalog
    pub fn letter(&self) -> &'static str {
        match self {
            Self::Text => "T",
            Self::Integer => "I",
            Self::Applesoft => "A",
            Self::Binary => "B",
            Self::SType => "S",
            Self::Relocatable => "R",
            Self::AType => "A",
            Self::BType => "B"
        }
    }
}

impl FromStr for FileType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        // string can be the number itself
        if let Ok(num) = u8::from_str(s) {
            return match FileType::from_u8(num) {
                Some(typ) => Ok(typ),
                _ => Err(Error::InvalidName)
            };
        }
        // or a mnemonic
        match s {
            "txt" | "T" => Ok(Self::Text),
            "itok" | "I" => Ok(Self::Integer),
            "atok" | "A" => Ok(Self::Applesoft),
            "bin" | "B" => Ok(Self::Binary),
            "sys" | "S" => Ok(Self::SType),
            "rel" | "R" => Ok(Self::Relocatable),
            _ => Err(Error::InvalidName)
        }
    }
}

/// DOS 3.3 names are up to 30 characters of positive ASCII, stored
/// flipped negative and padded with negative spaces.
pub fn is_name_valid(name: &str) -> bool {
    name.len() > 0 && name.len() <= 30 && name.chars().all(|c| c.is_ascii() && c != ',')
}

pub fn string_to_file_name(s: &str) -> [u8;30] {
    let mut ans: [u8;30] = [0xa0;30];
    for (i, c) in s.to_uppercase().bytes().enumerate() {
        if i < 30 {
            ans[i] = c + 0x80;
        }
    }
    ans
}

pub fn file_name_to_string(fname: [u8;30]) -> String {
    let positive: Vec<u8> = fname.iter().map(|b| b & 0x7f).collect();
    String::from_utf8_lossy(&positive).trim_end().to_string()
}

/// Transforms between UTF8 and DOS text encodings.
/// DOS uses negative ASCII with CR line separators.
pub struct TextConverter {
    line_terminator: Vec<u8>
}

impl TextConversion for TextConverter {
    fn new(line_terminator: Vec<u8>) -> Self {
        Self {
            line_terminator
        }
    }
    fn from_utf8(&self, txt: &str) -> Option<Vec<u8>> {
        let src: Vec<u8> = txt.as_bytes().to_vec();
        let mut ans: Vec<u8> = Vec::new();
        for i in 0..src.len() {
            if i+1 < src.len() && src[i] == 0x0d && src[i+1] == 0x0a {
                continue;
            }
            if src[i] == 0x0a || src[i] == 0x0d {
                ans.push(0x8d);
            } else if src[i] < 128 {
                ans.push(src[i] + 0x80);
            } else {
                return None;
            }
        }
        if !Self::is_terminated(&ans, &self.line_terminator) {
            ans.append(&mut self.line_terminator.clone());
        }
        Some(ans)
    }
    fn to_utf8(&self, src: &[u8]) -> Option<String> {
        let mut ans: Vec<u8> = Vec::new();
        for i in 0..src.len() {
            if src[i] == 0x8d {
                ans.push(0x0a);
            } else if src[i] > 127 {
                ans.push(src[i] - 0x80);
            } else {
                ans.push(0);
            }
        }
        match String::from_utf8(ans) {
            Ok(s) => Some(s),
            Err(_) => None
        }
    }
}
