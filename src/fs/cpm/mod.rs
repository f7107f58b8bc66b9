//! # CP/M file system module
//!
//! Manipulates disk images containing a CP/M 2.2 or 3.0 volume.  The
//! geometry is driven entirely by the selected disk parameter block; the
//! directory is a packed run of 32-byte extents in the first blocks of
//! the user area, and the allocation state is always derived from the
//! live extents, there being no bitmap on disk.
//!
//! File names follow the `A-Z 0-9 _ - $ #` rule with lower case coerced
//! up; a `user:` prefix selects the user number 0-15.

pub mod types;
mod directory;

use std::collections::{BTreeMap,HashSet};
use log::{debug,trace};
use a2kit_macro::DiskStruct;
use types::*;
use directory::*;
use super::{Block,DiskFS,FileInfo};
use crate::bios::dpb::DiskParameterBlock;
use crate::img;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::{STDRESULT,DYNERR};

/// The primary interface for disk operations.
pub struct Disk {
    dpb: DiskParameterBlock,
    img: Box<dyn img::DiskImage>
}

impl Disk {
    /// Create a file system using the given image as storage.
    /// The DiskFS takes ownership of the image.
    pub fn from_img(img: Box<dyn img::DiskImage>, dpb: DiskParameterBlock) -> Self {
        Self {
            dpb,
            img
        }
    }
    /// Heuristic test: every directory slot must look like a deleted
    /// marker or a plausible extent.
    pub fn test_img(img: &mut Box<dyn img::DiskImage>, dpb: &DiskParameterBlock) -> bool {
        for b in 0..dpb.dir_blocks() {
            let dat = match img.read_block(Block::CPM((b, dpb.bsh, dpb.off))) {
                Ok(d) => d,
                Err(_) => {
                    debug!("directory block {} unreadable", b);
                    return false;
                }
            };
            for slot in dat.chunks_exact(DIR_ENTRY_SIZE) {
                if slot[0] == DELETED {
                    continue;
                }
                // labels and timestamps use 0x20/0x21, passwords 16-31
                if slot[0] >= 0x22 {
                    debug!("directory slot with status {:x}", slot[0]);
                    return false;
                }
                for i in 1..12 {
                    let c = slot[i] & 0x7f;
                    if c < 0x20 {
                        debug!("unprintable character in file name");
                        return false;
                    }
                }
            }
        }
        true
    }
    /// Format the disk: the directory area becomes 0xe5 fill.
    pub fn init(&mut self) -> STDRESULT {
        let fill = vec![DELETED; self.dpb.block_size()];
        for b in 0..self.dpb.dir_blocks() {
            self.write_block(b, &fill)?;
        }
        Ok(())
    }
    fn read_block(&mut self, num: usize) -> Result<Vec<u8>,DYNERR> {
        self.img.read_block(Block::CPM((num, self.dpb.bsh, self.dpb.off)))
    }
    fn write_block(&mut self, num: usize, dat: &[u8]) -> STDRESULT {
        self.img.write_block(Block::CPM((num, self.dpb.bsh, self.dpb.off)), dat)
    }
    fn read_dir(&mut self) -> Result<Directory,DYNERR> {
        let mut flat = Vec::new();
        for b in 0..self.dpb.dir_blocks() {
            flat.append(&mut self.read_block(b)?);
        }
        flat.truncate(self.dpb.dir_entries() * DIR_ENTRY_SIZE);
        Ok(Directory::from_bytes(&flat)?)
    }
    fn write_dir(&mut self, dir: &Directory) -> STDRESULT {
        let mut flat = dir.to_bytes();
        let area = self.dpb.dir_blocks() * self.dpb.block_size();
        flat.resize(area, DELETED);
        for b in 0..self.dpb.dir_blocks() {
            let bls = self.dpb.block_size();
            self.write_block(b, &flat[b*bls..(b+1)*bls])?;
        }
        Ok(())
    }
    /// Extents of each logical file keyed by (user, name, typ), sorted
    /// in data-index order.
    fn gather_files(&self, dir: &Directory) -> BTreeMap<(u8,[u8;8],[u8;3]), Vec<(usize, Extent)>> {
        let mut ans: BTreeMap<(u8,[u8;8],[u8;3]), Vec<(usize, Extent)>> = BTreeMap::new();
        for (slot, extent) in dir.live_extents() {
            ans.entry(extent.file_id()).or_insert_with(Vec::new).push((slot, extent));
        }
        for extents in ans.values_mut() {
            extents.sort_by_key(|(_slot, x)| x.data_index());
        }
        ans
    }
    /// Byte size from the final extent: records then the CP/M 3 byte
    /// count when present.
    fn file_size(extents: &Vec<(usize, Extent)>) -> usize {
        let last = match extents.last() {
            Some((_slot, x)) => x,
            None => return 0
        };
        let records = last.data_index() * RECORDS_PER_LOGICAL_EXTENT + last.record_count as usize;
        let mut size = records * RECORD_SIZE;
        if last.last_bytes > 0 && size >= RECORD_SIZE {
            size = size - RECORD_SIZE + last.last_bytes as usize;
        }
        size
    }
    /// Blocks in use: the directory itself plus every live extent.
    fn used_blocks(&mut self) -> Result<HashSet<usize>,DYNERR> {
        let dir = self.read_dir()?;
        let mut ans: HashSet<usize> = (0..self.dpb.dir_blocks()).collect();
        for (_slot, extent) in dir.live_extents() {
            for b in extent.blocks(&self.dpb) {
                ans.insert(b);
            }
        }
        Ok(ans)
    }
    fn lookup<'a>(files: &'a BTreeMap<(u8,[u8;8],[u8;3]), Vec<(usize, Extent)>>, user: u8, base: [u8;8], ext: [u8;3])
        -> Option<&'a Vec<(usize, Extent)>> {
        files.get(&(user, base, ext))
    }
}

impl DiskFS for Disk {
    fn fs_name(&self) -> String {
        "CP/M".to_string()
    }
    fn catalog(&mut self, all: bool) -> Result<Vec<FileInfo>,DYNERR> {
        let dir = self.read_dir()?;
        let files = self.gather_files(&dir);
        let mut ans = Vec::new();
        for ((user, base, ext), extents) in &files {
            let (first_slot, first) = extents[0];
            if first.is_system() && !all {
                continue;
            }
            let mut blocks = 0;
            for (_slot, x) in extents {
                blocks += x.blocks(&self.dpb).len();
            }
            ans.push(FileInfo {
                name: join_name(*user, *base, *ext),
                typ: String::from_utf8_lossy(&ext.map(|c| c & 0x7f)).trim_end().to_string(),
                first: Block::CPM((match first.blocks(&self.dpb).first() { Some(b) => *b, None => 0 }, self.dpb.bsh, self.dpb.off)),
                blocks,
                eof: Some(Self::file_size(extents)),
                locked: first.is_read_only(),
                deleted: false,
                timestamp: None,
                aux: *user as u16 | ((first_slot as u16) << 8)
            });
        }
        Ok(ans)
    }
    fn extract_file(&mut self, name: &str) -> Result<Vec<u8>,DYNERR> {
        let (user, base, ext) = parse_name(name)?;
        let dir = self.read_dir()?;
        let files = self.gather_files(&dir);
        let extents = match Self::lookup(&files, user, base, ext) {
            Some(x) => x.clone(),
            None => return Err(Box::new(Error::NotFound))
        };
        // every extent but the last must be filled to its capacity
        let per_extent = self.dpb.extent_capacity() / self.dpb.block_size();
        for (k, (_slot, x)) in extents.iter().enumerate() {
            if k + 1 < extents.len() {
                let expected = (k + 1) * (self.dpb.exm as usize + 1) - 1;
                if x.data_index() != expected || x.blocks(&self.dpb).len() != per_extent {
                    debug!("extent {} has index {} expecting {}", k, x.data_index(), expected);
                    return Err(Box::new(Error::BrokenExtent));
                }
            }
        }
        let mut ans: Vec<u8> = Vec::new();
        for (_slot, x) in &extents {
            for b in x.blocks(&self.dpb) {
                ans.append(&mut self.read_block(b)?);
            }
        }
        ans.truncate(Self::file_size(&extents));
        Ok(ans)
    }
    fn inject_file(&mut self, name: &str, _typ: &str, aux: u16, dat: &[u8]) -> Result<usize,DYNERR> {
        let (mut user, base, ext) = parse_name(name)?;
        // an explicit aux overrides the name prefix
        if aux > 0 {
            if aux >= USER_END as u16 {
                return Err(Box::new(Error::InvalidUserNumber));
            }
            user = aux as u8;
        }
        let mut dir = self.read_dir()?;
        let files = self.gather_files(&dir);
        if Self::lookup(&files, user, base, ext).is_some() {
            return Err(Box::new(Error::AlreadyExists));
        }
        let bls = self.dpb.block_size();
        let blocks_needed = (dat.len() + bls - 1) / bls;
        let extent_cap = self.dpb.extent_capacity();
        let extents_needed = usize::max(1, (dat.len() + extent_cap - 1) / extent_cap);
        // free blocks in ascending order
        let used = self.used_blocks()?;
        let mut free: Vec<usize> = Vec::new();
        for b in 0..self.dpb.user_blocks() {
            if free.len() == blocks_needed {
                break;
            }
            if !used.contains(&b) {
                free.push(b);
            }
        }
        if free.len() < blocks_needed {
            return Err(Box::new(Error::DiskFull));
        }
        // free directory slots
        let mut slots: Vec<usize> = Vec::new();
        for i in 0..dir.num_slots() {
            if slots.len() == extents_needed {
                break;
            }
            if let Ok(x) = dir.get_extent(i) {
                if !x.is_file() {
                    slots.push(i);
                }
            }
        }
        if slots.len() < extents_needed {
            return Err(Box::new(Error::DirectoryFull));
        }
        // stage the whole directory change, then write the data blocks;
        // the directory goes to disk last so a failure leaves it intact
        let records = (dat.len() + RECORD_SIZE - 1) / RECORD_SIZE;
        let blocks_per_extent = extent_cap / bls;
        for k in 0..extents_needed {
            let mut x = Extent::new();
            x.user = user;
            x.name = base;
            x.typ = ext;
            let slice_start = k * blocks_per_extent;
            let slice_end = usize::min(slice_start + blocks_per_extent, free.len());
            x.set_blocks(&free[slice_start..slice_end], &self.dpb);
            if k + 1 < extents_needed {
                x.set_data_index((k + 1) * (self.dpb.exm as usize + 1) - 1);
                x.record_count = RECORDS_PER_LOGICAL_EXTENT as u8;
            } else {
                match records {
                    0 => {
                        x.set_data_index(0);
                        x.record_count = 0;
                    },
                    r => {
                        x.set_data_index((r - 1) / RECORDS_PER_LOGICAL_EXTENT);
                        x.record_count = (r - (r - 1) / RECORDS_PER_LOGICAL_EXTENT * RECORDS_PER_LOGICAL_EXTENT) as u8;
                    }
                }
                x.last_bytes = (dat.len() % RECORD_SIZE) as u8;
            }
            dir.set_extent(slots[k], &x);
        }
        for (i, b) in free.iter().enumerate() {
            let mark = i * bls;
            let used_len = usize::min(bls, dat.len() - mark);
            let mut buf = vec![0; bls];
            buf[0..used_len].copy_from_slice(&dat[mark..mark+used_len]);
            self.write_block(*b, &buf)?;
        }
        self.write_dir(&dir)?;
        Ok(dat.len())
    }
    fn delete_file(&mut self, name: &str) -> STDRESULT {
        let (user, base, ext) = parse_name(name)?;
        let mut dir = self.read_dir()?;
        let files = self.gather_files(&dir);
        let extents = match Self::lookup(&files, user, base, ext) {
            Some(x) => x.clone(),
            None => return Err(Box::new(Error::NotFound))
        };
        if extents[0].1.is_read_only() {
            return Err(Box::new(Error::Locked));
        }
        for (slot, _x) in extents {
            dir.erase(slot);
        }
        self.write_dir(&dir)
    }
    fn rename_file(&mut self, name: &str, new_name: &str) -> STDRESULT {
        let (user, base, ext) = parse_name(name)?;
        // a user prefix on the new name moves the file between users
        let (new_user, new_base, new_ext) = parse_name(new_name)?;
        let mut dir = self.read_dir()?;
        let files = self.gather_files(&dir);
        if Self::lookup(&files, new_user, new_base, new_ext).is_some() {
            return Err(Box::new(Error::AlreadyExists));
        }
        let extents = match Self::lookup(&files, user, base, ext) {
            Some(x) => x.clone(),
            None => return Err(Box::new(Error::NotFound))
        };
        if extents[0].1.is_read_only() {
            return Err(Box::new(Error::Locked));
        }
        for (slot, mut x) in extents {
            // keep the attribute bits while changing the characters
            for i in 0..8 {
                x.name[i] = (x.name[i] & 0x80) | (new_base[i] & 0x7f);
            }
            for i in 0..3 {
                x.typ[i] = (x.typ[i] & 0x80) | (new_ext[i] & 0x7f);
            }
            x.user = new_user;
            dir.set_extent(slot, &x);
        }
        self.write_dir(&dir)
    }
    fn set_locked(&mut self, name: &str, locked: bool) -> STDRESULT {
        let (user, base, ext) = parse_name(name)?;
        let mut dir = self.read_dir()?;
        let files = self.gather_files(&dir);
        let extents = match Self::lookup(&files, user, base, ext) {
            Some(x) => x.clone(),
            None => return Err(Box::new(Error::NotFound))
        };
        for (slot, mut x) in extents {
            x.set_read_only(locked);
            dir.set_extent(slot, &x);
        }
        self.write_dir(&dir)
    }
    fn free_units(&mut self) -> Result<usize,DYNERR> {
        let used = self.used_blocks()?;
        Ok(self.dpb.user_blocks() - used.len())
    }
    fn rebuild_bitmap(&mut self, _commit: bool) -> Result<usize,DYNERR> {
        // CP/M has no stored bitmap; the derived map is always consistent
        // with the directory, so a rebuild never changes anything
        let used = self.used_blocks()?;
        trace!("allocation derived: {} used of {}", used.len(), self.dpb.user_blocks());
        Ok(0)
    }
    fn validate_directory(&mut self) -> Result<DiagnosisList,DYNERR> {
        let mut diags = DiagnosisList::new();
        let dir = self.read_dir()?;
        let files = self.gather_files(&dir);
        let mut claimed: HashSet<usize> = HashSet::new();
        for ((user, base, ext), extents) in &files {
            let name = join_name(*user, *base, *ext);
            for (k, (_slot, x)) in extents.iter().enumerate() {
                if k + 1 < extents.len() {
                    let expected = (k + 1) * (self.dpb.exm as usize + 1) - 1;
                    if x.data_index() != expected {
                        diags.add(Code::CircularChain, Severity::Error,
                            &format!("{}: extent sequence broken at {}", name, x.data_index()));
                    }
                }
                for b in x.blocks(&self.dpb) {
                    if b > self.dpb.dsm as usize {
                        diags.add(Code::OutOfRange, Severity::Error,
                            &format!("{}: block {} out of range", name, b));
                    } else if b < self.dpb.dir_blocks() {
                        diags.add(Code::CrossLinked, Severity::Error,
                            &format!("{}: block {} overlaps the directory", name, b));
                    } else if !claimed.insert(b) {
                        diags.add(Code::CrossLinked, Severity::Error,
                            &format!("{}: block {} claimed twice", name, b));
                    }
                }
            }
        }
        Ok(diags)
    }
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage> {
        &mut self.img
    }
}
