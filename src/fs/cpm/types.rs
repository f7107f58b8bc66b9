use crate::fs::TextConversion;

/// Status byte for a deleted file, also fill value for unused blocks.
pub const DELETED: u8 = 0xe5;
/// Largest possible user number plus one
pub const USER_END: u8 = 0x10;
/// Unit of data transfer in bytes as seen by the CP/M BDOS.
/// This was the sector size on the original 8 inch disks.
pub const RECORD_SIZE: usize = 128;
/// Size of the directory entry in bytes, always 32
pub const DIR_ENTRY_SIZE: usize = 32;
/// There is a subdivision of an extent, sometimes called a logical
/// extent, which has a fixed size.  See the EXM field in the DPB.
pub const LOGICAL_EXTENT_SIZE: usize = 16384;
/// records in a logical extent
pub const RECORDS_PER_LOGICAL_EXTENT: usize = 128;

/// Enumerates CP/M errors.  The `Display` trait will print the long
/// message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("file not found")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("directory full")]
    DirectoryFull,
    #[error("disk full")]
    DiskFull,
    #[error("file is read only")]
    Locked,
    #[error("invalid file name")]
    InvalidName,
    #[error("invalid user number")]
    InvalidUserNumber,
    #[error("extent sequence is broken")]
    BrokenExtent,
    #[error("block claimed twice")]
    CrossLinked,
    #[error("block reference out of range")]
    Range
}

/// Characters allowed in a CP/M file name; lower case is coerced up
/// before this check.
pub fn is_name_valid(name: &str) -> bool {
    let pattern = regex::Regex::new(r"^[A-Z0-9_$#-]{1,8}(\.[A-Z0-9_$#-]{0,3})?$").expect("regex error");
    pattern.is_match(&name.to_uppercase())
}

/// Split `user:name.ext` into its parts; a missing user prefix means
/// user 0.  The name is coerced to upper case.
pub fn parse_name(full: &str) -> Result<(u8, [u8;8], [u8;3]),Error> {
    let (user, name) = match full.split_once(':') {
        Some((u, n)) => match u.parse::<u8>() {
            Ok(user) if user < USER_END => (user, n),
            _ => return Err(Error::InvalidUserNumber)
        },
        None => (0, full)
    };
    if !is_name_valid(name) {
        return Err(Error::InvalidName);
    }
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
    Ok((user, base, ext))
}

/// join the padded fields into a display name, high bits stripped
pub fn join_name(user: u8, base: [u8;8], ext: [u8;3]) -> String {
    let b: Vec<u8> = base.iter().map(|c| c & 0x7f).collect();
    let e: Vec<u8> = ext.iter().map(|c| c & 0x7f).collect();
    let bs = String::from_utf8_lossy(&b).trim_end().to_string();
    let es = String::from_utf8_lossy(&e).trim_end().to_string();
    let name = match es.len() {
        0 => bs,
        _ => format!("{}.{}", bs, es)
    };
    match user {
        0 => name,
        u => format!("{}:{}", u, name)
    }
}

/// Transforms between UTF8 and CP/M text.
/// CP/M text is positive ASCII with CRLF line separators and a 0x1a
/// overall terminator.
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
                ans.push(0x0a);
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
                continue;
            } else if src[i] > 127 {
                ans.push(0);
            } else if src[i] == 0x1a {
                break;
            } else {
                ans.push(src[i]);
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
        assert!(is_name_valid("HELLO.TXT"));
        assert!(is_name_valid("A-B_C$#.X"));
        assert!(is_name_valid("noext"));
        assert!(!is_name_valid("TOO.LONGEXT"));
        assert!(!is_name_valid("WAY*BAD"));
        assert!(!is_name_valid("SP ACE.TXT"));
    }

    #[test]
    fn user_prefix() {
        let (user, base, ext) = parse_name("3:game.com").unwrap();
        assert_eq!(user, 3);
        assert_eq!(&base, b"GAME    ");
        assert_eq!(&ext, b"COM");
        assert!(matches!(parse_name("16:x"), Err(Error::InvalidUserNumber)));
        assert_eq!(join_name(3, base, ext), "3:GAME.COM");
    }
}
