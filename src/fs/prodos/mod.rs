//! # ProDOS file system module
//!
//! Manipulates disk images containing one ProDOS volume.  The volume
//! directory's key block is block 2; files are stored as seedling,
//! sapling, or tree per their size, and the volume bitmap marks a set
//! bit for every free block.
//!
//! Allocation is depth first.  On any mid-write failure every block taken
//! is returned to the bitmap before the error surfaces.  The directory
//! header's file count is kept in sync on every create and delete.
//!
//! File operations address the volume directory; subdirectories are
//! surfaced in the catalog and traversed by the consistency passes.

pub mod types;
mod directory;

use std::collections::HashSet;
use log::{debug,trace};
use a2kit_macro::DiskStruct;
use types::*;
use directory::*;
use super::{Block,DiskFS,FileInfo};
use crate::img;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::{STDRESULT,DYNERR};

/// bits per bitmap block
const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;

/// The primary interface for disk operations.
pub struct Disk {
    header: VolumeHeader,
    img: Box<dyn img::DiskImage>
}

impl Disk {
    /// Create a file system using the given image as storage.
    /// The DiskFS takes ownership of the image.
    pub fn from_img(mut img: Box<dyn img::DiskImage>) -> Result<Self,DYNERR> {
        let dat = img.read_block(Block::PO(VOL_KEY_BLOCK))?;
        let header = VolumeHeader::from_bytes(&dat[4..4+ENTRY_SIZE])?;
        Ok(Self {
            header,
            img
        })
    }
    /// Test an image to see if it contains a ProDOS volume.
    pub fn test_img(img: &mut Box<dyn img::DiskImage>) -> bool {
        if let Ok(dat) = img.read_block(Block::PO(VOL_KEY_BLOCK)) {
            if dat.len() < 4 + ENTRY_SIZE {
                return false;
            }
            if let Ok(header) = VolumeHeader::from_bytes(&dat[4..4+ENTRY_SIZE]) {
                if header.stype_nlen >> 4 != STORAGE_VOL_HEADER {
                    debug!("volume header type {:x} unexpected", header.stype_nlen >> 4);
                    return false;
                }
                if header.entry_length as usize != ENTRY_SIZE || header.entries_per_block as usize != ENTRIES_PER_BLOCK {
                    debug!("directory shape unexpected");
                    return false;
                }
                if header.total() < 8 || header.total() > 0xffff {
                    debug!("total blocks {} out of range", header.total());
                    return false;
                }
                return true;
            }
        }
        debug!("volume key block was not readable");
        false
    }
    /// Format the volume: directory chain in blocks 2..=5, bitmap after.
    pub fn init(&mut self, name: &str, total_blocks: usize) -> STDRESULT {
        if !is_name_valid(name) {
            return Err(Box::new(Error::InvalidName));
        }
        let bitmap_ptr = 6;
        let bitmap_blocks = (total_blocks + BITS_PER_BLOCK - 1) / BITS_PER_BLOCK;
        self.header = VolumeHeader::blank(name, total_blocks, bitmap_ptr);
        // directory chain 2,3,4,5
        for b in 2..6 {
            let mut dat = vec![0; BLOCK_SIZE];
            if b > 2 {
                dat[0..2].copy_from_slice(&u16::to_le_bytes(b as u16 - 1));
            }
            if b < 5 {
                dat[2..4].copy_from_slice(&u16::to_le_bytes(b as u16 + 1));
            }
            if b == 2 {
                dat[4..4+ENTRY_SIZE].copy_from_slice(&self.header.to_bytes());
            }
            self.img.write_block(Block::PO(b), &dat)?;
        }
        // bitmap: everything free except loader, directory, and the bitmap
        for i in 0..bitmap_blocks {
            let mut dat = vec![0xff; BLOCK_SIZE];
            for bit in 0..BITS_PER_BLOCK {
                let block = i * BITS_PER_BLOCK + bit;
                if block >= total_blocks || block < bitmap_ptr + bitmap_blocks {
                    dat[bit / 8] &= (0x80 >> (bit % 8)) ^ 0xff;
                }
            }
            self.img.write_block(Block::PO(bitmap_ptr + i), &dat)?;
        }
        Ok(())
    }
    fn save_header(&mut self) -> STDRESULT {
        let mut dat = self.img.read_block(Block::PO(VOL_KEY_BLOCK))?;
        dat[4..4+ENTRY_SIZE].copy_from_slice(&self.header.to_bytes());
        self.img.write_block(Block::PO(VOL_KEY_BLOCK), &dat)
    }
    fn is_block_free(&mut self, block: usize) -> Result<bool,DYNERR> {
        let map_block = self.header.bitmap() + block / BITS_PER_BLOCK;
        let dat = self.img.read_block(Block::PO(map_block))?;
        let bit = block % BITS_PER_BLOCK;
        Ok(dat[bit / 8] & (0x80 >> (bit % 8)) > 0)
    }
    fn set_block_free(&mut self, block: usize, free: bool) -> STDRESULT {
        let map_block = self.header.bitmap() + block / BITS_PER_BLOCK;
        let mut dat = self.img.read_block(Block::PO(map_block))?;
        let bit = block % BITS_PER_BLOCK;
        match free {
            true => dat[bit / 8] |= 0x80 >> (bit % 8),
            false => dat[bit / 8] &= (0x80 >> (bit % 8)) ^ 0xff
        }
        self.img.write_block(Block::PO(map_block), &dat)
    }
    fn allocate_block(&mut self) -> Result<usize,DYNERR> {
        for block in 0..self.header.total() {
            if self.is_block_free(block)? {
                self.set_block_free(block, false)?;
                return Ok(block);
            }
        }
        Err(Box::new(Error::DiskFull))
    }
    /// The volume directory block chain in order.
    fn dir_blocks(&mut self) -> Result<Vec<usize>,DYNERR> {
        let mut ans: Vec<usize> = Vec::new();
        let mut visited: HashSet<usize> = HashSet::new();
        let mut block = VOL_KEY_BLOCK;
        for _rep in 0..MAX_DIRECTORY_REPS {
            if block == 0 {
                return Ok(ans);
            }
            if block >= self.header.total() || !visited.insert(block) {
                return Err(Box::new(Error::CircularChain));
            }
            ans.push(block);
            let dat = self.img.read_block(Block::PO(block))?;
            block = u16::from_le_bytes([dat[2], dat[3]]) as usize;
        }
        Err(Box::new(Error::CircularChain))
    }
    /// Flat arena of the volume directory entries with their locations.
    fn entry_arena(&mut self) -> Result<Vec<(EntryLocation, Entry)>,DYNERR> {
        let mut ans: Vec<(EntryLocation, Entry)> = Vec::new();
        for block in self.dir_blocks()? {
            let dat = self.img.read_block(Block::PO(block))?;
            let first_slot = match block == VOL_KEY_BLOCK {
                true => 1,
                false => 0
            };
            for slot in first_slot..ENTRIES_PER_BLOCK {
                let offset = 4 + slot * ENTRY_SIZE;
                let entry = Entry::from_bytes(&dat[offset..offset+ENTRY_SIZE])?;
                ans.push((EntryLocation { block, slot }, entry));
            }
        }
        Ok(ans)
    }
    fn write_entry(&mut self, loc: EntryLocation, entry: &Entry) -> STDRESULT {
        let mut dat = self.img.read_block(Block::PO(loc.block))?;
        let offset = 4 + loc.slot * ENTRY_SIZE;
        dat[offset..offset+ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        self.img.write_block(Block::PO(loc.block), &dat)
    }
    fn lookup(&mut self, name: &str) -> Result<(EntryLocation, Entry),DYNERR> {
        if !is_name_valid(name) {
            return Err(Box::new(Error::InvalidName));
        }
        let target = name.to_uppercase();
        for (loc, entry) in self.entry_arena()? {
            if !entry.is_empty() && entry.name_string() == target {
                return Ok((loc, entry));
            }
        }
        Err(Box::new(Error::NotFound))
    }
    /// All blocks belonging to a file entry: (storage blocks, data blocks).
    /// Storage blocks are the index structures, in depth-first order.
    fn file_blocks(&mut self, entry: &Entry) -> Result<(Vec<usize>, Vec<usize>),DYNERR> {
        let mut index_blocks: Vec<usize> = Vec::new();
        let mut data_blocks: Vec<usize> = Vec::new();
        let total = self.header.total();
        match entry.storage_type() {
            STORAGE_SEEDLING => {
                if entry.key() > 0 {
                    data_blocks.push(entry.key());
                }
            },
            STORAGE_SAPLING => {
                index_blocks.push(entry.key());
                let index = IndexBlock::wrap(self.img.read_block(Block::PO(entry.key()))?)?;
                for i in 0..INDEX_CAPACITY {
                    let ptr = index.ptr(i);
                    if ptr > 0 {
                        if ptr >= total {
                            return Err(Box::new(Error::Range));
                        }
                        data_blocks.push(ptr);
                    }
                }
            },
            STORAGE_TREE => {
                index_blocks.push(entry.key());
                let master = IndexBlock::wrap(self.img.read_block(Block::PO(entry.key()))?)?;
                for m in 0..INDEX_CAPACITY {
                    let iptr = master.ptr(m);
                    if iptr == 0 {
                        continue;
                    }
                    if iptr >= total {
                        return Err(Box::new(Error::Range));
                    }
                    index_blocks.push(iptr);
                    let index = IndexBlock::wrap(self.img.read_block(Block::PO(iptr))?)?;
                    for i in 0..INDEX_CAPACITY {
                        let ptr = index.ptr(i);
                        if ptr > 0 {
                            if ptr >= total {
                                return Err(Box::new(Error::Range));
                            }
                            data_blocks.push(ptr);
                        }
                    }
                }
            },
            STORAGE_SUBDIR => {
                // the subdirectory chain itself
                let mut visited: HashSet<usize> = HashSet::new();
                let mut block = entry.key();
                while block != 0 {
                    if block >= total || !visited.insert(block) {
                        return Err(Box::new(Error::CircularChain));
                    }
                    data_blocks.push(block);
                    let dat = self.img.read_block(Block::PO(block))?;
                    block = u16::from_le_bytes([dat[2], dat[3]]) as usize;
                }
            },
            _ => return Err(Box::new(Error::StorageType))
        }
        Ok((index_blocks, data_blocks))
    }
}

impl DiskFS for Disk {
    fn fs_name(&self) -> String {
        format!("ProDOS /{}", self.header.name_string())
    }
    fn catalog(&mut self, _all: bool) -> Result<Vec<FileInfo>,DYNERR> {
        let mut ans: Vec<FileInfo> = Vec::new();
        for (_loc, entry) in self.entry_arena()? {
            if entry.is_empty() {
                continue;
            }
            ans.push(FileInfo {
                name: entry.name_string(),
                typ: type_mnemonic(entry.file_type),
                first: Block::PO(entry.key()),
                blocks: entry.blocks(),
                eof: Some(entry.eof()),
                locked: entry.is_locked(),
                deleted: false,
                timestamp: unpack_date(entry.create_time),
                aux: u16::from_le_bytes(entry.aux_type)
            });
        }
        Ok(ans)
    }
    fn extract_file(&mut self, name: &str) -> Result<Vec<u8>,DYNERR> {
        let (_loc, entry) = self.lookup(name)?;
        if entry.storage_type() == STORAGE_SUBDIR {
            return Err(Box::new(Error::StorageType));
        }
        let (_index, data_blocks) = self.file_blocks(&entry)?;
        let mut ans: Vec<u8> = Vec::new();
        for block in data_blocks {
            ans.append(&mut self.img.read_block(Block::PO(block))?);
        }
        ans.truncate(entry.eof());
        Ok(ans)
    }
    fn inject_file(&mut self, name: &str, typ: &str, aux: u16, dat: &[u8]) -> Result<usize,DYNERR> {
        if !is_name_valid(name) {
            return Err(Box::new(Error::InvalidName));
        }
        if self.lookup(name).is_ok() {
            return Err(Box::new(Error::AlreadyExists));
        }
        let file_type = type_from_mnemonic(typ)?;
        let mut slot: Option<EntryLocation> = None;
        for (loc, entry) in self.entry_arena()? {
            if entry.is_empty() {
                slot = Some(loc);
                break;
            }
        }
        let loc = match slot {
            Some(l) => l,
            None => return Err(Box::new(Error::DirectoryFull))
        };
        let data_count = (dat.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
        // depth-first build, freeing every block taken on any failure
        let mut allocated: Vec<usize> = Vec::new();
        let mut build = |disk: &mut Self| -> Result<(u8, usize),DYNERR> {
            let write_data = |disk: &mut Self, allocated: &mut Vec<usize>, i: usize| -> Result<usize,DYNERR> {
                let block = disk.allocate_block()?;
                allocated.push(block);
                let mark = i * BLOCK_SIZE;
                let used = usize::min(BLOCK_SIZE, dat.len() - mark);
                let mut buf = vec![0; BLOCK_SIZE];
                buf[0..used].copy_from_slice(&dat[mark..mark+used]);
                disk.img.write_block(Block::PO(block), &buf)?;
                Ok(block)
            };
            match data_count {
                0 => Ok((STORAGE_SEEDLING, 0)),
                1 => {
                    let block = write_data(disk, &mut allocated, 0)?;
                    Ok((STORAGE_SEEDLING, block))
                },
                n if n <= INDEX_CAPACITY => {
                    let key = disk.allocate_block()?;
                    allocated.push(key);
                    let mut index = IndexBlock::new();
                    for i in 0..n {
                        let block = write_data(disk, &mut allocated, i)?;
                        index.set_ptr(i, block);
                    }
                    disk.img.write_block(Block::PO(key), &index.dat)?;
                    Ok((STORAGE_SAPLING, key))
                },
                n => {
                    let key = disk.allocate_block()?;
                    allocated.push(key);
                    let mut master = IndexBlock::new();
                    let mut written = 0;
                    let mut m = 0;
                    while written < n {
                        let iblock = disk.allocate_block()?;
                        allocated.push(iblock);
                        master.set_ptr(m, iblock);
                        let mut index = IndexBlock::new();
                        for i in 0..usize::min(INDEX_CAPACITY, n - written) {
                            let block = write_data(disk, &mut allocated, written + i)?;
                            index.set_ptr(i, block);
                        }
                        disk.img.write_block(Block::PO(iblock), &index.dat)?;
                        written += usize::min(INDEX_CAPACITY, n - written);
                        m += 1;
                    }
                    disk.img.write_block(Block::PO(key), &master.dat)?;
                    Ok((STORAGE_TREE, key))
                }
            }
        };
        let (storage, key) = match build(self) {
            Ok(ans) => ans,
            Err(e) => {
                for block in &allocated {
                    self.set_block_free(*block, true)?;
                }
                return Err(e);
            }
        };
        let (nlen, packed_name) = string_to_name(name);
        let mut entry = Entry::new();
        entry.stype_nlen = (storage << 4) | nlen;
        entry.name = packed_name;
        entry.file_type = file_type;
        entry.key_ptr = u16::to_le_bytes(key as u16);
        entry.blocks_used = u16::to_le_bytes(allocated.len() as u16);
        entry.set_eof(dat.len());
        entry.create_time = pack_date(None);
        entry.mod_time = pack_date(None);
        entry.version = 0x24;
        entry.access = ACCESS_UNLOCKED;
        entry.aux_type = u16::to_le_bytes(aux);
        entry.header_ptr = u16::to_le_bytes(VOL_KEY_BLOCK as u16);
        self.write_entry(loc, &entry)?;
        // the header's file count tracks every create
        let count = self.header.files() + 1;
        self.header.set_files(count);
        self.save_header()?;
        Ok(dat.len())
    }
    fn delete_file(&mut self, name: &str) -> STDRESULT {
        let (loc, entry) = self.lookup(name)?;
        if entry.is_locked() {
            return Err(Box::new(Error::Locked));
        }
        let (index_blocks, data_blocks) = self.file_blocks(&entry)?;
        for block in index_blocks.iter().chain(data_blocks.iter()) {
            self.set_block_free(*block, true)?;
        }
        let mut dead = entry;
        dead.stype_nlen = 0;
        self.write_entry(loc, &dead)?;
        let count = self.header.files().saturating_sub(1);
        self.header.set_files(count);
        self.save_header()
    }
    fn rename_file(&mut self, name: &str, new_name: &str) -> STDRESULT {
        if !is_name_valid(new_name) {
            return Err(Box::new(Error::InvalidName));
        }
        if self.lookup(new_name).is_ok() {
            return Err(Box::new(Error::AlreadyExists));
        }
        let (loc, mut entry) = self.lookup(name)?;
        if entry.is_locked() {
            return Err(Box::new(Error::Locked));
        }
        let (nlen, packed) = string_to_name(new_name);
        entry.stype_nlen = (entry.stype_nlen & 0xf0) | nlen;
        entry.name = packed;
        entry.mod_time = pack_date(None);
        self.write_entry(loc, &entry)
    }
    fn set_locked(&mut self, name: &str, locked: bool) -> STDRESULT {
        let (loc, mut entry) = self.lookup(name)?;
        entry.access = match locked {
            true => ACCESS_LOCKED,
            false => ACCESS_UNLOCKED
        };
        self.write_entry(loc, &entry)
    }
    fn free_units(&mut self) -> Result<usize,DYNERR> {
        let mut ans = 0;
        for block in 0..self.header.total() {
            if self.is_block_free(block)? {
                ans += 1;
            }
        }
        Ok(ans)
    }
    fn rebuild_bitmap(&mut self, commit: bool) -> Result<usize,DYNERR> {
        let total = self.header.total();
        let bitmap_ptr = self.header.bitmap();
        let bitmap_blocks = (total + BITS_PER_BLOCK - 1) / BITS_PER_BLOCK;
        let mut used: HashSet<usize> = HashSet::new();
        // loader, volume directory, bitmap
        used.insert(0);
        used.insert(1);
        for block in self.dir_blocks()? {
            used.insert(block);
        }
        for i in 0..bitmap_blocks {
            used.insert(bitmap_ptr + i);
        }
        // every file, descending into subdirectories
        let mut stack: Vec<Entry> = self.entry_arena()?.iter()
            .filter(|(_l, e)| !e.is_empty()).map(|(_l, e)| *e).collect();
        let mut dir_visited: HashSet<usize> = HashSet::new();
        while let Some(entry) = stack.pop() {
            let (index_blocks, data_blocks) = self.file_blocks(&entry)?;
            for block in index_blocks.iter().chain(data_blocks.iter()) {
                used.insert(*block);
            }
            if entry.storage_type() == STORAGE_SUBDIR {
                for block in data_blocks {
                    if !dir_visited.insert(block) {
                        continue;
                    }
                    let dat = self.img.read_block(Block::PO(block))?;
                    let first_slot = match block == entry.key() {
                        true => 1,
                        false => 0
                    };
                    for slot in first_slot..ENTRIES_PER_BLOCK {
                        let offset = 4 + slot * ENTRY_SIZE;
                        let sub = Entry::from_bytes(&dat[offset..offset+ENTRY_SIZE])?;
                        if !sub.is_empty() {
                            stack.push(sub);
                        }
                    }
                }
            }
        }
        let mut changed = 0;
        for block in 0..total {
            let live_free = self.is_block_free(block)?;
            let computed_free = !used.contains(&block);
            if live_free != computed_free {
                changed += 1;
                if commit {
                    self.set_block_free(block, computed_free)?;
                }
            }
        }
        trace!("bitmap rebuild changes {} blocks", changed);
        Ok(changed)
    }
    fn validate_directory(&mut self) -> Result<DiagnosisList,DYNERR> {
        let mut diags = DiagnosisList::new();
        let arena = match self.entry_arena() {
            Ok(a) => a,
            Err(e) => {
                diags.add(Code::CircularChain, Severity::Error, &format!("directory walk failed: {}", e));
                return Ok(diags);
            }
        };
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut live = 0;
        for (_loc, entry) in arena {
            if entry.is_empty() {
                continue;
            }
            live += 1;
            let name = entry.name_string();
            match self.file_blocks(&entry) {
                Ok((index_blocks, data_blocks)) => {
                    let total = index_blocks.len() + data_blocks.len();
                    if total > entry.blocks() + 10 {
                        diags.add(Code::CircularChain, Severity::Error,
                            &format!("{}: holds far more blocks than declared", name));
                    }
                    for block in index_blocks.iter().chain(data_blocks.iter()) {
                        if !claimed.insert(*block) {
                            diags.add(Code::CrossLinked, Severity::Error,
                                &format!("{}: block {} claimed twice", name, block));
                        }
                    }
                },
                Err(e) => {
                    diags.add(Code::CircularChain, Severity::Error, &format!("{}: {}", name, e));
                }
            }
        }
        if live != self.header.files() {
            diags.add(Code::BamMismatch, Severity::Warning,
                &format!("header count {} but {} live entries", self.header.files(), live));
        }
        Ok(diags)
    }
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage> {
        &mut self.img
    }
}
