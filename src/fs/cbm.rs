//! # CBM DOS module (read side)
//!
//! Enough of the 1541 file system to catalog disks, follow sector chains,
//! and keep the BAM honest: the header and BAM at (18,0), the directory
//! chain from (18,1), and the two byte link at the front of every data
//! sector.  Mutating file operations are not offered here; Commodore
//! disks flow through this crate for extraction and repair.
//!
//! The per-track BAM entry is a free count plus three bitmap bytes with a
//! set bit meaning free.  A freshly formatted 35 track disk reports 664
//! blocks free, the directory track being spoken for.

use std::collections::HashSet;
use log::{debug,trace};
use super::{Block,DiskFS,FileInfo};
use crate::img;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::{STDRESULT,DYNERR};

pub const DIR_TRACK: usize = 18;
pub const DIR_SECTOR: usize = 1;
pub const ENTRY_SIZE: usize = 32;
pub const ENTRIES_PER_SECTOR: usize = 8;
/// data bytes per sector after the link
pub const DATA_BYTES: usize = 254;
pub const MAX_CHAIN_REPS: usize = 1000;

/// file type low nibble values
pub const TYPE_DEL: u8 = 0;
pub const TYPE_SEQ: u8 = 1;
pub const TYPE_PRG: u8 = 2;
pub const TYPE_USR: u8 = 3;
pub const TYPE_REL: u8 = 4;
pub const FLAG_LOCKED: u8 = 0x40;
pub const FLAG_CLOSED: u8 = 0x80;

/// Enumerates CBM DOS errors.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("file not found")]
    NotFound,
    #[error("chain is circular")]
    CircularChain,
    #[error("sector claimed twice")]
    CrossLinked,
    #[error("reference out of range")]
    Range,
    #[error("operation is read only here")]
    ReadOnly
}

fn type_letters(typ: u8) -> &'static str {
    match typ & 0x0f {
        TYPE_DEL => "DEL",
        TYPE_SEQ => "SEQ",
        TYPE_PRG => "PRG",
        TYPE_USR => "USR",
        TYPE_REL => "REL",
        _ => "???"
    }
}

/// PETSCII to a display string; the letter range passes through and the
/// pad byte is stripped.
pub fn petscii_to_string(raw: &[u8]) -> String {
    let mut ans = String::new();
    for b in raw {
        match *b {
            0xa0 => break,
            0x20..=0x5f => ans.push(*b as char),
            0xc1..=0xda => ans.push((*b - 0x80) as char),
            _ => ans.push('?')
        }
    }
    ans
}

pub fn string_to_petscii(s: &str, pad_to: usize) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    for c in s.to_uppercase().chars() {
        let b = c as u32;
        if b >= 0x20 && b <= 0x5f {
            ans.push(b as u8);
        } else {
            ans.push(b'?');
        }
    }
    while ans.len() < pad_to {
        ans.push(0xa0);
    }
    ans.truncate(pad_to);
    ans
}

/// The primary interface, wrapping a D64 or G64 image.
pub struct Disk {
    tracks: usize,
    img: Box<dyn img::DiskImage>
}

impl Disk {
    pub fn from_img(img: Box<dyn img::DiskImage>) -> Self {
        let tracks = img.track_count();
        Self {
            tracks,
            img
        }
    }
    /// Test an image for a plausible header sector.
    pub fn test_img(img: &mut Box<dyn img::DiskImage>) -> bool {
        if let Ok(dat) = img.read_block(Block::CBM([DIR_TRACK, 0])) {
            if dat.len() < 256 {
                return false;
            }
            // directory pointer and format marker
            if dat[0] as usize != DIR_TRACK || dat[2] != b'A' {
                debug!("header sector signature missing");
                return false;
            }
            return true;
        }
        false
    }
    fn sectors_on(&self, track: usize) -> usize {
        crate::img::geometry::D64_ZONES[track - 1]
    }
    /// Format the disk: header, BAM, empty directory.
    pub fn init(&mut self, name: &str, id: [u8;2]) -> STDRESULT {
        let mut header = vec![0u8; 256];
        header[0] = DIR_TRACK as u8;
        header[1] = DIR_SECTOR as u8;
        header[2] = b'A';
        for t in 1..=self.tracks {
            let spt = self.sectors_on(t);
            let off = 4 + (t-1)*4;
            match t == DIR_TRACK {
                true => {
                    // the directory track belongs to DOS: header and first
                    // directory sector are taken
                    header[off] = (spt - 2) as u8;
                    header[off+1] = 0xfc;
                    header[off+2] = 0xff;
                    header[off+3] = 0x07;
                },
                false => {
                    header[off] = spt as u8;
                    for b in 0..3 {
                        let bits = usize::min(8, spt.saturating_sub(b*8));
                        header[off+1+b] = match bits {
                            8 => 0xff,
                            n => (1u8 << n) - 1
                        };
                    }
                }
            }
        }
        let petname = string_to_petscii(name, 16);
        header[0x90..0xa0].copy_from_slice(&petname);
        header[0xa0] = 0xa0;
        header[0xa1] = 0xa0;
        header[0xa2] = id[0];
        header[0xa3] = id[1];
        header[0xa4] = 0xa0;
        header[0xa5] = b'2';
        header[0xa6] = b'A';
        self.img.write_block(Block::CBM([DIR_TRACK, 0]), &header)?;
        let mut first_dir = vec![0u8; 256];
        first_dir[1] = 0xff;
        self.img.write_block(Block::CBM([DIR_TRACK, DIR_SECTOR]), &first_dir)
    }
    /// free blocks according to the BAM, directory track excluded as DOS
    /// reports it
    pub fn bam_free(&mut self) -> Result<usize,DYNERR> {
        let header = self.img.read_block(Block::CBM([DIR_TRACK, 0]))?;
        let mut ans = 0;
        for t in 1..=usize::min(self.tracks, 35) {
            if t != DIR_TRACK {
                ans += header[4 + (t-1)*4] as usize;
            }
        }
        Ok(ans)
    }
    pub fn disk_name(&mut self) -> Result<String,DYNERR> {
        let header = self.img.read_block(Block::CBM([DIR_TRACK, 0]))?;
        Ok(petscii_to_string(&header[0x90..0xa0]))
    }
    fn is_free(header: &[u8], track: usize, sector: usize) -> bool {
        let off = 4 + (track-1)*4;
        header[off + 1 + sector/8] & (1 << (sector % 8)) > 0
    }
    fn set_free(header: &mut [u8], track: usize, sector: usize, free: bool) {
        let off = 4 + (track-1)*4;
        let mask = 1 << (sector % 8);
        match free {
            true => header[off + 1 + sector/8] |= mask,
            false => header[off + 1 + sector/8] &= mask ^ 0xff
        }
    }
    /// Walk a sector chain; `visit` gets (track, sector, data).  The link
    /// convention is two lead bytes, a zero track marking the last sector
    /// with the second byte as the end index.
    fn walk_chain(&mut self, start: [usize;2], mut visit: impl FnMut(usize, usize, &[u8])) -> STDRESULT {
        let mut visited: HashSet<[usize;2]> = HashSet::new();
        let mut ts = start;
        for _rep in 0..MAX_CHAIN_REPS {
            if ts[0] == 0 {
                return Ok(());
            }
            if ts[0] > self.tracks || ts[1] >= self.sectors_on(ts[0]) {
                return Err(Box::new(Error::Range));
            }
            if !visited.insert(ts) {
                return Err(Box::new(Error::CircularChain));
            }
            let dat = self.img.read_block(Block::CBM(ts))?;
            visit(ts[0], ts[1], &dat);
            ts = [dat[0] as usize, dat[1] as usize];
        }
        Err(Box::new(Error::CircularChain))
    }
    /// Directory entries in chain order: (location, raw 32 bytes).
    fn entries(&mut self) -> Result<Vec<([usize;2], usize, Vec<u8>)>,DYNERR> {
        let mut ans = Vec::new();
        self.walk_chain([DIR_TRACK, DIR_SECTOR], |t, s, dat| {
            for e in 0..ENTRIES_PER_SECTOR {
                let offset = e * ENTRY_SIZE;
                ans.push(([t, s], e, dat[offset..offset+ENTRY_SIZE].to_vec()));
            }
        })?;
        Ok(ans)
    }
    fn lookup(&mut self, name: &str) -> Result<Vec<u8>,DYNERR> {
        for (_ts, _idx, raw) in self.entries()? {
            let typ = raw[2];
            if typ & FLAG_CLOSED > 0 && petscii_to_string(&raw[5..21]) == name.to_uppercase() {
                return Ok(raw);
            }
        }
        Err(Box::new(Error::NotFound))
    }
}

impl DiskFS for Disk {
    fn fs_name(&self) -> String {
        "CBM DOS".to_string()
    }
    fn catalog(&mut self, all: bool) -> Result<Vec<FileInfo>,DYNERR> {
        let mut ans = Vec::new();
        for (_ts, _idx, raw) in self.entries()? {
            let typ = raw[2];
            if typ == 0 {
                continue;
            }
            if typ & FLAG_CLOSED == 0 && !all {
                continue;
            }
            ans.push(FileInfo {
                name: petscii_to_string(&raw[5..21]),
                typ: type_letters(typ).to_string(),
                first: Block::CBM([raw[3] as usize, raw[4] as usize]),
                blocks: u16::from_le_bytes([raw[30], raw[31]]) as usize,
                eof: None,
                locked: typ & FLAG_LOCKED > 0,
                deleted: typ & FLAG_CLOSED == 0,
                timestamp: None,
                aux: typ as u16
            });
        }
        Ok(ans)
    }
    fn extract_file(&mut self, name: &str) -> Result<Vec<u8>,DYNERR> {
        let raw = self.lookup(name)?;
        let start = [raw[3] as usize, raw[4] as usize];
        let mut ans: Vec<u8> = Vec::new();
        self.walk_chain(start, |_t, _s, dat| {
            match dat[0] {
                0 => {
                    // final sector: link's second byte is the end index
                    let end = usize::max(dat[1] as usize, 1);
                    ans.extend_from_slice(&dat[2..=usize::min(end, dat.len()-1)]);
                },
                _ => ans.extend_from_slice(&dat[2..2+DATA_BYTES])
            }
        })?;
        Ok(ans)
    }
    fn inject_file(&mut self, _name: &str, _typ: &str, _aux: u16, _dat: &[u8]) -> Result<usize,DYNERR> {
        Err(Box::new(Error::ReadOnly))
    }
    fn delete_file(&mut self, _name: &str) -> STDRESULT {
        Err(Box::new(Error::ReadOnly))
    }
    fn rename_file(&mut self, _name: &str, _new_name: &str) -> STDRESULT {
        Err(Box::new(Error::ReadOnly))
    }
    fn set_locked(&mut self, _name: &str, _locked: bool) -> STDRESULT {
        Err(Box::new(Error::ReadOnly))
    }
    fn free_units(&mut self) -> Result<usize,DYNERR> {
        self.bam_free()
    }
    fn rebuild_bitmap(&mut self, commit: bool) -> Result<usize,DYNERR> {
        let mut header = self.img.read_block(Block::CBM([DIR_TRACK, 0]))?;
        let old = header.clone();
        // start from everything free
        for t in 1..=usize::min(self.tracks, 35) {
            let spt = self.sectors_on(t);
            for s in 0..spt {
                Self::set_free(&mut header, t, s, true);
            }
        }
        // the header and the directory chain are system sectors
        Self::set_free(&mut header, DIR_TRACK, 0, false);
        let mut dir_sectors: Vec<[usize;2]> = Vec::new();
        self.walk_chain([DIR_TRACK, DIR_SECTOR], |t, s, _dat| {
            dir_sectors.push([t, s]);
        })?;
        for ts in dir_sectors {
            Self::set_free(&mut header, ts[0], ts[1], false);
        }
        // every closed file chain
        let entries = self.entries()?;
        for (_ts, _idx, raw) in entries {
            if raw[2] & FLAG_CLOSED > 0 {
                let mut chain: Vec<[usize;2]> = Vec::new();
                self.walk_chain([raw[3] as usize, raw[4] as usize], |t, s, _dat| {
                    chain.push([t, s]);
                })?;
                for ts in chain {
                    Self::set_free(&mut header, ts[0], ts[1], false);
                }
            }
        }
        // refresh the per-track free counts
        for t in 1..=usize::min(self.tracks, 35) {
            let spt = self.sectors_on(t);
            let mut count = 0;
            for s in 0..spt {
                if Self::is_free(&header, t, s) {
                    count += 1;
                }
            }
            header[4 + (t-1)*4] = count as u8;
        }
        let mut changed = 0;
        for t in 1..=usize::min(self.tracks, 35) {
            for s in 0..self.sectors_on(t) {
                if Self::is_free(&header, t, s) != Self::is_free(&old, t, s) {
                    changed += 1;
                }
            }
        }
        trace!("BAM rebuild changes {} sectors", changed);
        if commit {
            self.img.write_block(Block::CBM([DIR_TRACK, 0]), &header)?;
        }
        Ok(changed)
    }
    fn validate_directory(&mut self) -> Result<DiagnosisList,DYNERR> {
        let mut diags = DiagnosisList::new();
        let entries = match self.entries() {
            Ok(e) => e,
            Err(e) => {
                diags.add(Code::CircularChain, Severity::Error,
                    &format!("directory walk failed: {}", e));
                return Ok(diags);
            }
        };
        let mut claimed: HashSet<[usize;2]> = HashSet::new();
        for (_ts, _idx, raw) in entries {
            if raw[2] & FLAG_CLOSED == 0 {
                continue;
            }
            let name = petscii_to_string(&raw[5..21]);
            let declared = u16::from_le_bytes([raw[30], raw[31]]) as usize;
            let mut count = 0;
            let mut chain: Vec<[usize;2]> = Vec::new();
            match self.walk_chain([raw[3] as usize, raw[4] as usize], |t, s, _dat| {
                chain.push([t, s]);
            }) {
                Ok(()) => {
                    for ts in chain {
                        count += 1;
                        if !claimed.insert(ts) {
                            diags.add_sector(Code::CrossLinked, Severity::Error, ts[0], ts[1],
                                &format!("{}: sector claimed twice", name));
                        }
                    }
                    if count > declared + 10 {
                        diags.add(Code::CircularChain, Severity::Error,
                            &format!("{}: chain is far longer than declared", name));
                    }
                },
                Err(e) => {
                    diags.add(Code::CircularChain, Severity::Error,
                        &format!("{}: {}", name, e));
                }
            }
        }
        Ok(diags)
    }
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage> {
        &mut self.img
    }
}
