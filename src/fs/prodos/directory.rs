//! ### ProDOS directory structures
//!
//! Directory blocks are a doubly linked chain; the key block carries a
//! header entry (volume or subdirectory) in the first slot.  All other
//! slots are 39 byte file entries.  Following the redesign of the
//! original pointer-chasing code, a directory is loaded into a flat
//! arena of entries keyed by (block, slot); walks are loops over that
//! arena and cycle detection is a visited set.

use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use super::types::*;

#[derive(DiskStruct,Clone,Copy)]
pub struct Entry {
    /// storage type in the high nibble, name length in the low
    pub stype_nlen: u8,
    pub name: [u8;15],
    pub file_type: u8,
    pub key_ptr: [u8;2],
    pub blocks_used: [u8;2],
    pub eof: [u8;3],
    pub create_time: [u8;4],
    pub version: u8,
    pub min_version: u8,
    pub access: u8,
    pub aux_type: [u8;2],
    pub mod_time: [u8;4],
    pub header_ptr: [u8;2]
}

#[derive(DiskStruct,Clone,Copy)]
pub struct VolumeHeader {
    /// 0xf in the high nibble, name length in the low
    pub stype_nlen: u8,
    pub name: [u8;15],
    pub reserved: [u8;8],
    pub create_time: [u8;4],
    pub version: u8,
    pub min_version: u8,
    pub access: u8,
    pub entry_length: u8,
    pub entries_per_block: u8,
    pub file_count: [u8;2],
    pub bitmap_ptr: [u8;2],
    pub total_blocks: [u8;2]
}

impl Entry {
    pub fn storage_type(&self) -> u8 {
        self.stype_nlen >> 4
    }
    pub fn is_empty(&self) -> bool {
        self.stype_nlen == 0
    }
    pub fn name_string(&self) -> String {
        name_to_string(self.stype_nlen & 0x0f, self.name)
    }
    pub fn key(&self) -> usize {
        u16::from_le_bytes(self.key_ptr) as usize
    }
    pub fn blocks(&self) -> usize {
        u16::from_le_bytes(self.blocks_used) as usize
    }
    pub fn eof(&self) -> usize {
        self.eof[0] as usize + ((self.eof[1] as usize) << 8) + ((self.eof[2] as usize) << 16)
    }
    pub fn set_eof(&mut self, eof: usize) {
        self.eof = [(eof & 0xff) as u8, ((eof >> 8) & 0xff) as u8, ((eof >> 16) & 0xff) as u8];
    }
    pub fn is_locked(&self) -> bool {
        self.access & ACCESS_WRITE == 0
    }
}

impl VolumeHeader {
    pub fn blank(name: &str, total_blocks: usize, bitmap_ptr: usize) -> Self {
        let (len, packed) = string_to_name(name);
        Self {
            stype_nlen: (STORAGE_VOL_HEADER << 4) | len,
            name: packed,
            reserved: [0;8],
            create_time: pack_date(None),
            version: 0x24,
            min_version: 0,
            access: ACCESS_UNLOCKED,
            entry_length: ENTRY_SIZE as u8,
            entries_per_block: ENTRIES_PER_BLOCK as u8,
            file_count: [0,0],
            bitmap_ptr: u16::to_le_bytes(bitmap_ptr as u16),
            total_blocks: u16::to_le_bytes(total_blocks as u16)
        }
    }
    pub fn name_string(&self) -> String {
        name_to_string(self.stype_nlen & 0x0f, self.name)
    }
    pub fn total(&self) -> usize {
        u16::from_le_bytes(self.total_blocks) as usize
    }
    pub fn bitmap(&self) -> usize {
        u16::from_le_bytes(self.bitmap_ptr) as usize
    }
    pub fn files(&self) -> usize {
        u16::from_le_bytes(self.file_count) as usize
    }
    pub fn set_files(&mut self, count: usize) {
        self.file_count = u16::to_le_bytes(count as u16);
    }
}

/// Where an entry lives on disk, so updates can be written back.
#[derive(Clone,Copy,PartialEq,Eq,Hash)]
pub struct EntryLocation {
    pub block: usize,
    pub slot: usize
}

/// An index block maps positions to block pointers with the low bytes in
/// the first half and the high bytes in the second.
pub struct IndexBlock {
    pub dat: Vec<u8>
}

impl IndexBlock {
    pub fn new() -> Self {
        Self {
            dat: vec![0; BLOCK_SIZE]
        }
    }
    pub fn wrap(dat: Vec<u8>) -> Result<Self,DiskStructError> {
        if dat.len() != BLOCK_SIZE {
            return Err(DiskStructError::UnexpectedSize);
        }
        Ok(Self {
            dat
        })
    }
    pub fn ptr(&self, idx: usize) -> usize {
        self.dat[idx] as usize + ((self.dat[idx + INDEX_CAPACITY] as usize) << 8)
    }
    pub fn set_ptr(&mut self, idx: usize, block: usize) {
        self.dat[idx] = (block & 0xff) as u8;
        self.dat[idx + INDEX_CAPACITY] = ((block >> 8) & 0xff) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_is_39_bytes() {
        assert_eq!(Entry::new().len(), ENTRY_SIZE);
        assert_eq!(VolumeHeader::new().len(), ENTRY_SIZE);
    }

    #[test]
    fn index_block_split_halves() {
        let mut index = IndexBlock::new();
        index.set_ptr(0, 0x1234);
        assert_eq!(index.dat[0], 0x34);
        assert_eq!(index.dat[256], 0x12);
        assert_eq!(index.ptr(0), 0x1234);
    }
}
