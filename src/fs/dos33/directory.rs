//! ### DOS 3.3 directory structures
//!
//! The VTOC at (17,0), the catalog chain starting (17,15), and the
//! track/sector lists that indirect to file data.

use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use super::types::*;

// a2kit_macro automatically derives `new`, `to_bytes`, `from_bytes`, and
// `len` from a DiskStruct.  Structures with nested records implement the
// trait by hand.

#[derive(DiskStruct)]
pub struct Vtoc {
    pub pad1: u8,
    /// track of the first catalog sector
    pub track1: u8,
    /// sector of the first catalog sector
    pub sector1: u8,
    pub version: u8,
    pub pad2: [u8;2],
    pub vol: u8,
    pub pad3: [u8;32],
    /// maximum pairs in a track sector list, 122
    pub max_pairs: u8,
    pub pad4: [u8;8],
    pub last_track: u8,
    pub last_direction: u8,
    pub pad5: [u8;2],
    pub tracks: u8,
    pub sectors: u8,
    pub bytes: [u8;2],
    /// 4 bytes per track, bit set means free
    pub bitmap: [u8;200]
}

#[derive(DiskStruct,Clone,Copy)]
pub struct Entry {
    /// track of the track sector list, 0 never used, 0xff deleted
    pub tsl_track: u8,
    pub tsl_sector: u8,
    /// low bits are the type, high bit is the lock
    pub file_type: u8,
    /// negative ASCII padded with negative spaces; for a deleted entry
    /// the last byte hides the original track sector list track
    pub name: [u8;30],
    pub sector_count: [u8;2]
}

pub struct DirectorySector {
    pub pad1: u8,
    pub next_track: u8,
    pub next_sector: u8,
    pub pad2: [u8;8],
    pub entries: [Entry;ENTRIES_PER_SECTOR]
}

impl DiskStruct for DirectorySector {
    fn new() -> Self {
        Self {
            pad1: 0,
            next_track: 0,
            next_sector: 0,
            pad2: [0;8],
            entries: [Entry::new();ENTRIES_PER_SECTOR]
        }
    }
    fn len(&self) -> usize {
        SECTOR_SIZE
    }
    fn to_bytes(&self) -> Vec<u8> {
        let mut ans = vec![self.pad1, self.next_track, self.next_sector];
        ans.extend_from_slice(&self.pad2);
        for entry in &self.entries {
            ans.append(&mut entry.to_bytes());
        }
        ans
    }
    fn from_bytes(dat: &[u8]) -> Result<Self,DiskStructError> {
        let mut ans = Self::new();
        ans.update_from_bytes(dat)?;
        Ok(ans)
    }
    fn update_from_bytes(&mut self, dat: &[u8]) -> Result<(),DiskStructError> {
        if dat.len() < SECTOR_SIZE {
            return Err(DiskStructError::OutOfData);
        }
        self.pad1 = dat[0];
        self.next_track = dat[1];
        self.next_sector = dat[2];
        self.pad2.copy_from_slice(&dat[3..11]);
        for e in 0..ENTRIES_PER_SECTOR {
            let offset = 11 + e * 35;
            self.entries[e] = Entry::from_bytes(&dat[offset..offset+35])?;
        }
        Ok(())
    }
}

#[derive(DiskStruct)]
pub struct TrackSectorList {
    pub pad1: u8,
    pub next_track: u8,
    pub next_sector: u8,
    pub pad2: [u8;2],
    /// sector offset of the first pair in this list
    pub sector_base: [u8;2],
    pub pad3: [u8;5],
    /// up to 122 (track, sector) pairs
    pub pairs: [u8;244]
}

impl TrackSectorList {
    pub fn pair(&self, idx: usize) -> [u8;2] {
        [self.pairs[idx*2], self.pairs[idx*2+1]]
    }
    pub fn set_pair(&mut self, idx: usize, ts: [u8;2]) {
        self.pairs[idx*2] = ts[0];
        self.pairs[idx*2+1] = ts[1];
    }
}

impl Entry {
    pub fn is_never_used(&self) -> bool {
        self.tsl_track == 0
    }
    pub fn is_deleted(&self) -> bool {
        self.tsl_track == DELETED_TRACK
    }
    pub fn is_live(&self) -> bool {
        !self.is_never_used() && !self.is_deleted()
    }
    pub fn is_locked(&self) -> bool {
        self.file_type & LOCK_FLAG > 0
    }
    pub fn type_code(&self) -> u8 {
        self.file_type & (LOCK_FLAG ^ 0xff)
    }
}
