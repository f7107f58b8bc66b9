//! ### CP/M directory structures
//!
//! The fundamental structure is a 32-byte entry called the extent.  The
//! directory is nothing other than a packed sequence of extents; there is
//! no separate file index or volume bitmap, so the allocation state is
//! always derived by scanning the live extents.
//!
//! A logical file is the chain of extents sharing `(user, name, ext)`
//! taken in data-index order.

use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use super::types::*;
use crate::bios::dpb::DiskParameterBlock;

/// The extent is in general a partial directory entry.  The bigger the
/// file gets the more extents are needed to point to all the blocks.
/// The capacity of one extent is 16384 * (EXM+1); the 16K subsets within
/// are called logical extents, and the extent index counts them.
#[derive(DiskStruct,Copy,Clone,PartialEq)]
pub struct Extent {
    /// 0-15 identifies a file extent; 0xe5 means unused or deleted
    pub user: u8,
    /// positive ASCII; the high bit of byte 1 is the read-only attribute
    /// and of byte 2 the system attribute
    pub name: [u8;8],
    pub typ: [u8;3],
    /// low 5 bits of the extent's data index
    pub idx_low: u8,
    /// bytes used in the last record, 0 meaning a full record (CP/M 3)
    pub last_bytes: u8,
    /// high bits of the extent's data index
    pub idx_high: u8,
    /// records used in the last logical extent of this extent
    pub record_count: u8,
    /// block pointers, 8-bit or 16-bit little endian per the DPB
    pub block_list: [u8;16]
}

impl Extent {
    pub fn is_file(&self) -> bool {
        self.user < USER_END
    }
    pub fn is_deleted(&self) -> bool {
        self.user == DELETED
    }
    /// data index counts logical extents up to and including this extent,
    /// minus one when partially filled
    pub fn data_index(&self) -> usize {
        (self.idx_low as usize & 0x1f) | ((self.idx_high as usize & 0x3f) << 5)
    }
    pub fn set_data_index(&mut self, idx: usize) {
        self.idx_low = (idx & 0x1f) as u8;
        self.idx_high = ((idx >> 5) & 0x3f) as u8;
    }
    /// the matching key ignoring attribute bits
    pub fn file_id(&self) -> (u8, [u8;8], [u8;3]) {
        let mut name = self.name;
        let mut typ = self.typ;
        for i in 0..8 {
            name[i] &= 0x7f;
        }
        for i in 0..3 {
            typ[i] &= 0x7f;
        }
        (self.user, name, typ)
    }
    /// block pointers per the DPB pointer width, zero meaning end
    pub fn blocks(&self, dpb: &DiskParameterBlock) -> Vec<usize> {
        let mut ans = Vec::new();
        match dpb.ptr_size() {
            1 => {
                for i in 0..16 {
                    if self.block_list[i] > 0 {
                        ans.push(self.block_list[i] as usize);
                    }
                }
            },
            _ => {
                for i in 0..8 {
                    let ptr = u16::from_le_bytes([self.block_list[2*i], self.block_list[2*i+1]]) as usize;
                    if ptr > 0 {
                        ans.push(ptr);
                    }
                }
            }
        }
        ans
    }
    pub fn set_blocks(&mut self, blocks: &[usize], dpb: &DiskParameterBlock) {
        self.block_list = [0;16];
        match dpb.ptr_size() {
            1 => {
                for (i, b) in blocks.iter().enumerate() {
                    if i < 16 {
                        self.block_list[i] = *b as u8;
                    }
                }
            },
            _ => {
                for (i, b) in blocks.iter().enumerate() {
                    if i < 8 {
                        self.block_list[2*i..2*i+2].copy_from_slice(&u16::to_le_bytes(*b as u16));
                    }
                }
            }
        }
    }
    /// the read-only attribute rides the high bit of the first name byte
    pub fn is_read_only(&self) -> bool {
        self.name[0] & 0x80 > 0
    }
    pub fn set_read_only(&mut self, locked: bool) {
        match locked {
            true => self.name[0] |= 0x80,
            false => self.name[0] &= 0x7f
        }
    }
    /// the system attribute rides the high bit of the second name byte
    pub fn is_system(&self) -> bool {
        self.name[1] & 0x80 > 0
    }
}

/// Directory is merely a packed sequence of extents.
pub struct Directory {
    slots: Vec<[u8;DIR_ENTRY_SIZE]>
}

impl Directory {
    pub fn from_bytes(dat: &[u8]) -> Result<Self,DiskStructError> {
        if dat.len() % DIR_ENTRY_SIZE != 0 {
            return Err(DiskStructError::UnexpectedSize);
        }
        let mut slots = Vec::new();
        for chunk in dat.chunks_exact(DIR_ENTRY_SIZE) {
            let mut slot = [0u8;DIR_ENTRY_SIZE];
            slot.copy_from_slice(chunk);
            slots.push(slot);
        }
        Ok(Self {
            slots
        })
    }
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ans = Vec::new();
        for slot in &self.slots {
            ans.extend_from_slice(slot);
        }
        ans
    }
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }
    pub fn get_extent(&self, idx: usize) -> Result<Extent,DiskStructError> {
        Extent::from_bytes(&self.slots[idx])
    }
    pub fn set_extent(&mut self, idx: usize, extent: &Extent) {
        self.slots[idx].copy_from_slice(&extent.to_bytes());
    }
    pub fn erase(&mut self, idx: usize) {
        self.slots[idx] = [DELETED;DIR_ENTRY_SIZE];
    }
    /// slots holding live file extents
    pub fn live_extents(&self) -> Vec<(usize, Extent)> {
        let mut ans = Vec::new();
        for i in 0..self.slots.len() {
            if let Ok(extent) = self.get_extent(i) {
                if extent.is_file() {
                    ans.push((i, extent));
                }
            }
        }
        ans
    }
    /// first unused or deleted slot
    pub fn free_slot(&self) -> Option<usize> {
        for i in 0..self.slots.len() {
            if let Ok(extent) = self.get_extent(i) {
                if !extent.is_file() {
                    return Some(i);
                }
            }
        }
        None
    }
}
