use std::str::FromStr;
use crate::fs::TextConversion;

/// sector holding the volume table of contents
pub const VTOC_SECTOR: usize = 360;
/// first of the eight directory sectors
pub const DIR_SECTOR: usize = 361;
pub const DIR_SECTORS: usize = 8;
pub const ENTRIES_PER_SECTOR: usize = 8;
pub const MAX_ENTRIES: usize = 64;
pub const ENTRY_SIZE: usize = 16;
/// boot sectors reserved by DOS
pub const BOOT_SECTORS: usize = 3;
/// bitmap covers sectors 0..719, bit set means free
pub const BITMAP_SECTORS: usize = 720;
pub const MAX_CHAIN_REPS: usize = 1000;

/// directory flags per the 2.x family
pub const FLAG_IN_USE: u8 = 0x80;
pub const FLAG_DELETED: u8 = 0x40;
pub const FLAG_LOCKED: u8 = 0x20;
pub const FLAG_DOS2: u8 = 0x02;

/// Enumerates Atari DOS errors.  The `Display` trait will print the
/// equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("file not found")]
    NotFound,
    #[error("file already exists")]
    AlreadyExists,
    #[error("directory full")]
    DirectoryFull,
    #[error("disk full")]
    DiskFull,
    #[error("file locked")]
    Locked,
    #[error("invalid file name")]
    InvalidName,
    #[error("file chain is circular")]
    CircularChain,
    #[error("sector is claimed by two files")]
    CrossLinked,
    #[error("sector reference out of range")]
    Range,
    #[error("deleted file cannot be recovered")]
    BrokenChain
}

/// Atari DOS file names are 8+3, drawn from capitals and digits, first
/// character a letter.
pub fn is_name_valid(name: &str) -> bool {
    let pattern = regex::Regex::new(r"^[A-Z][A-Z0-9]{0,7}(\.[A-Z0-9]{1,3})?$").expect("regex error");
    pattern.is_match(&name.to_uppercase())
}

/// split a file name into padded (name, extension) fields
pub fn split_name(name: &str) -> ([u8;8],[u8;3]) {
    let upper = name.to_uppercase();
    let mut base: [u8;8] = [0x20;8];
    let mut ext: [u8;3] = [0x20;3];
    let mut parts = upper.split('.');
    if let Some(b) = parts.next() {
        for (i, c) in b.bytes().enumerate() {
            if i < 8 {
                base[i] = c;
            }
        }
    }
    if let Some(e) = parts.next() {
        for (i, c) in e.bytes().enumerate() {
            if i < 3 {
                ext[i] = c;
            }
        }
    }
    (base, ext)
}

/// join padded fields back into a display name
pub fn join_name(base: [u8;8], ext: [u8;3]) -> String {
    let b = String::from_utf8_lossy(&base).trim_end().to_string();
    let e = String::from_utf8_lossy(&ext).trim_end().to_string();
    match e.len() {
        0 => b,
        _ => format!("{}.{}", b, e)
    }
}

/// Transforms between UTF8 and ATASCII.  ATASCII is ASCII-like with 0x9b
/// as the line terminator; the graphics range is not mapped.
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
                ans.push(0x9b);
            } else if src[i] < 128 {
                ans.push(src[i]);
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
            if src[i] == 0x9b {
                ans.push(0x0a);
            } else if src[i] < 128 {
                ans.push(src[i]);
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

/// The mnemonic file types; Atari DOS itself only distinguishes DOS 2
/// compatibility, the rest is convention.
pub enum FileType {
    Any,
    Dos2
}

impl FromStr for FileType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "any" | "dat" | "" => Ok(Self::Any),
            "dos2" | "com" | "bas" => Ok(Self::Dos2),
            _ => Err(Error::InvalidName)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rules() {
        assert!(is_name_valid("HELLO"));
        assert!(is_name_valid("hello.bas"));
        assert!(is_name_valid("A1234567.XEX"));
        assert!(!is_name_valid("1BAD"));
        assert!(!is_name_valid("WAYTOOLONGNAME"));
        assert!(!is_name_valid("BAD NAME"));
        assert!(!is_name_valid(""));
    }

    #[test]
    fn name_split_join() {
        let (b, e) = split_name("game.xex");
        assert_eq!(&b, b"GAME    ");
        assert_eq!(&e, b"XEX");
        assert_eq!(join_name(b, e), "GAME.XEX");
        let (b, e) = split_name("README");
        assert_eq!(join_name(b, e), "README");
    }
}
