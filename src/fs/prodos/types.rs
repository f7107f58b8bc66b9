use std::str::FromStr;
use crate::fs::TextConversion;

pub const BLOCK_SIZE: usize = 512;
/// key block of the volume directory
pub const VOL_KEY_BLOCK: usize = 2;
pub const ENTRY_SIZE: usize = 39;
pub const ENTRIES_PER_BLOCK: usize = 13;
/// pointers an index block can hold
pub const INDEX_CAPACITY: usize = 256;
pub const MAX_DIRECTORY_REPS: usize = 100;

pub const STORAGE_SEEDLING: u8 = 0x1;
pub const STORAGE_SAPLING: u8 = 0x2;
pub const STORAGE_TREE: u8 = 0x3;
pub const STORAGE_SUBDIR: u8 = 0xd;
pub const STORAGE_SUBDIR_HEADER: u8 = 0xe;
pub const STORAGE_VOL_HEADER: u8 = 0xf;

/// full access: destroy, rename, backup, write, read
pub const ACCESS_UNLOCKED: u8 = 0xc3;
/// read and backup only
pub const ACCESS_LOCKED: u8 = 0x21;
pub const ACCESS_WRITE: u8 = 0x02;

/// Enumerates ProDOS errors.  The `Display` trait will print the
/// equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("FILE NOT FOUND")]
    NotFound,
    #[error("DUPLICATE FILENAME")]
    AlreadyExists,
    #[error("DIRECTORY FULL")]
    DirectoryFull,
    #[error("DISK FULL")]
    DiskFull,
    #[error("ACCESS ERROR")]
    Locked,
    #[error("INVALID PATHNAME")]
    InvalidName,
    #[error("DIRECTORY STRUCTURE DAMAGED")]
    CircularChain,
    #[error("BLOCK CLAIMED TWICE")]
    CrossLinked,
    #[error("RANGE ERROR")]
    Range,
    #[error("UNSUPPORTED STORAGE TYPE")]
    StorageType
}

/// ProDOS names are up to 15 characters: letters, digits, periods,
/// starting with a letter.
pub fn is_name_valid(name: &str) -> bool {
    let pattern = regex::Regex::new(r"^[A-Za-z][A-Za-z0-9.]{0,14}$").expect("regex error");
    pattern.is_match(name)
}

pub fn string_to_name(s: &str) -> (u8, [u8;15]) {
    let upper = s.to_uppercase();
    let mut name: [u8;15] = [0;15];
    let mut len = 0;
    for (i, c) in upper.bytes().enumerate() {
        if i < 15 {
            name[i] = c;
            len += 1;
        }
    }
    (len, name)
}

pub fn name_to_string(len: u8, name: [u8;15]) -> String {
    let n = usize::min(len as usize & 0x0f, 15);
    String::from_utf8_lossy(&name[0..n]).to_string()
}

/// the common file type mnemonics
pub fn type_mnemonic(typ: u8) -> String {
    match typ {
        0x00 => "UNK".to_string(),
        0x04 => "TXT".to_string(),
        0x06 => "BIN".to_string(),
        0x0f => "DIR".to_string(),
        0x19 => "ADB".to_string(),
        0x1a => "AWP".to_string(),
        0x1b => "ASP".to_string(),
        0xfc => "BAS".to_string(),
        0xfd => "VAR".to_string(),
        0xff => "SYS".to_string(),
        t => format!("${:02x}", t)
    }
}

pub fn type_from_mnemonic(s: &str) -> Result<u8,Error> {
    if let Ok(num) = u8::from_str(s) {
        return Ok(num);
    }
    match s.to_uppercase().as_str() {
        "TXT" | "TEXT" => Ok(0x04),
        "BIN" => Ok(0x06),
        "DIR" => Ok(0x0f),
        "BAS" => Ok(0xfc),
        "VAR" => Ok(0xfd),
        "SYS" => Ok(0xff),
        _ => Err(Error::InvalidName)
    }
}

/// Pack a timestamp into the ProDOS four byte form
/// `[date_lo, date_hi, minute, hour]`.
pub fn pack_date(maybe_time: Option<chrono::NaiveDateTime>) -> [u8;4] {
    use chrono::{Datelike,Timelike};
    let now = match maybe_time {
        Some(time) => time,
        _ => chrono::Local::now().naive_local()
    };
    let date = (((now.year() % 100) as u16) << 9) | ((now.month() as u16) << 5) | now.day() as u16;
    [
        (date & 0xff) as u8,
        (date >> 8) as u8,
        now.minute() as u8,
        now.hour() as u8
    ]
}

/// Unpack the ProDOS timestamp; all zeroes is no date.
pub fn unpack_date(packed: [u8;4]) -> Option<chrono::NaiveDateTime> {
    if packed == [0;4] {
        return None;
    }
    let date = u16::from_le_bytes([packed[0], packed[1]]);
    let year = (date >> 9) as i32;
    let month = ((date >> 5) & 0x0f) as u32;
    let day = (date & 0x1f) as u32;
    // two digit years pivot at 1940 by ProDOS convention
    let full_year = match year {
        y if y < 40 => 2000 + y,
        y => 1900 + y
    };
    match chrono::NaiveDate::from_ymd_opt(full_year, month, day) {
        Some(d) => d.and_hms_opt(packed[3] as u32 % 24, packed[2] as u32 % 60, 0),
        None => None
    }
}

/// Transforms between UTF8 and ProDOS text, which is positive ASCII with
/// CR separators at the file level (SOS convention).
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
                ans.push(0x0d);
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
            if src[i] == 0x0d {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rules() {
        assert!(is_name_valid("HELLO"));
        assert!(is_name_valid("My.File.2"));
        assert!(!is_name_valid("2COOL"));
        assert!(!is_name_valid("WAY.TOO.LONG.FOR.PRODOS"));
        assert!(!is_name_valid("BAD NAME"));
    }

    #[test]
    fn date_round_trip() {
        let t = chrono::NaiveDate::from_ymd_opt(1986, 9, 16).unwrap().and_hms_opt(13, 45, 0).unwrap();
        let packed = pack_date(Some(t));
        assert_eq!(unpack_date(packed), Some(t));
        assert_eq!(unpack_date([0;4]), None);
    }
}
