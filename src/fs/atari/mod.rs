//! # Atari DOS 2.x file system module
//!
//! Manipulates disk images containing a standard Atari DOS 2.0/2.5 volume.
//! The VTOC at sector 360 carries the free bitmap, the directory occupies
//! sectors 361 through 368, and every data sector carries a three byte
//! link trailer naming its file and pointing at the next sector.
//!
//! Injection is atomic: any allocation taken before a failure is returned
//! to the VTOC before the error surfaces.  A deleted file whose chain is
//! still intact on disk can be recovered verbatim.

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

/// The primary interface for disk operations.
pub struct Disk {
    vtoc: Vtoc,
    total_sectors: usize,
    sector_len: usize,
    img: Box<dyn img::DiskImage>
}

impl Disk {
    /// Create a file system using the given image as storage.
    /// The DiskFS takes ownership of the image.
    pub fn from_img(mut img: Box<dyn img::DiskImage>) -> Result<Self,DYNERR> {
        let dat = img.read_block(Block::Atari(VTOC_SECTOR))?;
        let sector_len = dat.len();
        let vtoc = Vtoc::from_bytes(&dat[0..128])?;
        let mut total_sectors = u16::from_le_bytes(vtoc.total_sectors) as usize;
        if total_sectors == 0 {
            // a disk that was never formatted gets its count from geometry
            if let Some(geom) = img.geometry() {
                total_sectors = geom.cylinders * geom.sectors_on(0);
            }
        }
        Ok(Self {
            vtoc,
            total_sectors,
            sector_len,
            img
        })
    }
    /// Test an image for the DOS 2.x signatures.
    pub fn test_img(img: &mut Box<dyn img::DiskImage>) -> bool {
        if let Ok(dat) = img.read_block(Block::Atari(VTOC_SECTOR)) {
            if dat.len() < 128 {
                return false;
            }
            if let Ok(vtoc) = Vtoc::from_bytes(&dat[0..128]) {
                let total = u16::from_le_bytes(vtoc.total_sectors) as usize;
                let free = u16::from_le_bytes(vtoc.free_sectors) as usize;
                if vtoc.code != 2 {
                    debug!("VTOC code {} unexpected", vtoc.code);
                    return false;
                }
                if total < VTOC_SECTOR + DIR_SECTORS + 1 || total > 1040 {
                    debug!("VTOC total {} out of range", total);
                    return false;
                }
                if free > total {
                    debug!("VTOC free {} exceeds total {}", free, total);
                    return false;
                }
                return true;
            }
        }
        debug!("VTOC sector was not readable");
        false
    }
    /// Format the disk: fresh VTOC and empty directory.
    pub fn init(&mut self) -> STDRESULT {
        let mut vtoc = Vtoc::blank(self.total_sectors);
        for s in 1..usize::min(self.total_sectors + 1, BITMAP_SECTORS) {
            vtoc.set_free(s, true);
        }
        for s in 1..=BOOT_SECTORS {
            vtoc.set_free(s, false);
        }
        for s in VTOC_SECTOR..DIR_SECTOR + DIR_SECTORS {
            vtoc.set_free(s, false);
        }
        vtoc.sync_free_count();
        self.vtoc = vtoc;
        self.save_vtoc()?;
        let empty = vec![0; self.sector_len];
        for s in DIR_SECTOR..DIR_SECTOR + DIR_SECTORS {
            self.img.write_block(Block::Atari(s), &empty)?;
        }
        Ok(())
    }
    fn save_vtoc(&mut self) -> STDRESULT {
        self.img.write_block(Block::Atari(VTOC_SECTOR), &self.vtoc.to_bytes())
    }
    fn data_bytes(&self) -> usize {
        self.sector_len - 3
    }
    fn get_entry(&mut self, idx: usize) -> Result<DirEntry,DYNERR> {
        let dat = self.img.read_block(Block::Atari(DIR_SECTOR + idx / ENTRIES_PER_SECTOR))?;
        let offset = (idx % ENTRIES_PER_SECTOR) * ENTRY_SIZE;
        Ok(DirEntry::from_bytes(&dat[offset..offset+ENTRY_SIZE])?)
    }
    fn set_entry(&mut self, idx: usize, entry: &DirEntry) -> STDRESULT {
        let sec = DIR_SECTOR + idx / ENTRIES_PER_SECTOR;
        let mut dat = self.img.read_block(Block::Atari(sec))?;
        let offset = (idx % ENTRIES_PER_SECTOR) * ENTRY_SIZE;
        dat[offset..offset+ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        self.img.write_block(Block::Atari(sec), &dat)
    }
    /// Find a live entry by name; returns (index, entry).
    fn lookup(&mut self, name: &str) -> Result<(usize,DirEntry),DYNERR> {
        if !is_name_valid(name) {
            return Err(Box::new(Error::InvalidName));
        }
        let (base, ext) = split_name(name);
        for idx in 0..MAX_ENTRIES {
            let entry = self.get_entry(idx)?;
            if entry.is_in_use() && entry.name == base && entry.ext == ext {
                return Ok((idx, entry));
            }
        }
        Err(Box::new(Error::NotFound))
    }
    /// Walk a file chain calling `visit` per sector with the sector
    /// number, data, and trailer.  Bounds reps and detects cycles.
    fn walk_chain(&mut self, start: usize, mut visit: impl FnMut(usize, &[u8], &Trailer)) -> STDRESULT {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut sec = start;
        for _rep in 0..MAX_CHAIN_REPS {
            if sec == 0 {
                return Ok(());
            }
            if sec > self.total_sectors {
                return Err(Box::new(Error::Range));
            }
            if !visited.insert(sec) {
                return Err(Box::new(Error::CircularChain));
            }
            let dat = self.img.read_block(Block::Atari(sec))?;
            let trailer = Trailer::unpack(&dat);
            visit(sec, &dat, &trailer);
            sec = trailer.next;
        }
        Err(Box::new(Error::CircularChain))
    }
}

impl DiskFS for Disk {
    fn fs_name(&self) -> String {
        "Atari DOS 2.x".to_string()
    }
    fn catalog(&mut self, all: bool) -> Result<Vec<FileInfo>,DYNERR> {
        let mut ans = Vec::new();
        for idx in 0..MAX_ENTRIES {
            let entry = self.get_entry(idx)?;
            if entry.is_never_used() {
                continue;
            }
            if entry.is_in_use() || (all && entry.is_deleted()) {
                ans.push(FileInfo {
                    name: join_name(entry.name, entry.ext),
                    typ: String::from_utf8_lossy(&entry.ext).trim_end().to_string(),
                    first: Block::Atari(entry.start()),
                    blocks: entry.count(),
                    eof: None,
                    locked: entry.is_locked(),
                    deleted: entry.is_deleted(),
                    timestamp: None,
                    aux: idx as u16
                });
            }
        }
        Ok(ans)
    }
    fn extract_file(&mut self, name: &str) -> Result<Vec<u8>,DYNERR> {
        let (_idx, entry) = self.lookup(name)?;
        let mut ans: Vec<u8> = Vec::new();
        if entry.start() == 0 {
            return Ok(ans);
        }
        self.walk_chain(entry.start(), |_sec, dat, trailer| {
            let used = usize::min(trailer.bytes_used, dat.len() - 3);
            ans.extend_from_slice(&dat[0..used]);
        })?;
        Ok(ans)
    }
    fn inject_file(&mut self, name: &str, _typ: &str, _aux: u16, dat: &[u8]) -> Result<usize,DYNERR> {
        if !is_name_valid(name) {
            return Err(Box::new(Error::InvalidName));
        }
        if self.lookup(name).is_ok() {
            return Err(Box::new(Error::AlreadyExists));
        }
        // find a directory slot
        let mut slot: Option<usize> = None;
        for idx in 0..MAX_ENTRIES {
            let entry = self.get_entry(idx)?;
            if !entry.is_in_use() {
                slot = Some(idx);
                break;
            }
        }
        let slot = match slot {
            Some(s) => s,
            None => return Err(Box::new(Error::DirectoryFull))
        };
        let per_sector = self.data_bytes();
        let needed = match dat.len() {
            0 => 0,
            n => (n + per_sector - 1) / per_sector
        };
        // gather free sectors in ascending order
        let mut chain: Vec<usize> = Vec::new();
        for sec in 1..=usize::min(self.total_sectors, BITMAP_SECTORS - 1) {
            if chain.len() == needed {
                break;
            }
            if self.vtoc.is_free(sec) {
                chain.push(sec);
            }
        }
        if chain.len() < needed {
            return Err(Box::new(Error::DiskFull));
        }
        // write forward-linked sectors, freeing everything on any failure
        let mut written: Vec<usize> = Vec::new();
        let mut commit = || -> STDRESULT {
            for (i, sec) in chain.iter().enumerate() {
                let mut buf = vec![0; self.sector_len];
                let mark = i * per_sector;
                let used = usize::min(per_sector, dat.len() - mark);
                buf[0..used].copy_from_slice(&dat[mark..mark+used]);
                let trailer = Trailer {
                    file_id: slot,
                    next: match i + 1 < chain.len() { true => chain[i+1], false => 0 },
                    bytes_used: used
                };
                trailer.pack(&mut buf);
                self.img.write_block(Block::Atari(*sec), &buf)?;
                self.vtoc.set_free(*sec, false);
                written.push(*sec);
            }
            Ok(())
        };
        if let Err(e) = commit() {
            for sec in written {
                self.vtoc.set_free(sec, true);
            }
            self.vtoc.sync_free_count();
            self.save_vtoc()?;
            return Err(e);
        }
        self.vtoc.sync_free_count();
        self.save_vtoc()?;
        let (base, ext) = split_name(name);
        self.set_entry(slot, &DirEntry {
            flags: FLAG_IN_USE | FLAG_DOS2,
            sector_count: u16::to_le_bytes(chain.len() as u16),
            start_sector: u16::to_le_bytes(match chain.first() { Some(s) => *s as u16, None => 0 }),
            name: base,
            ext
        })?;
        Ok(dat.len())
    }
    fn delete_file(&mut self, name: &str) -> STDRESULT {
        let (idx, mut entry) = self.lookup(name)?;
        if entry.is_locked() {
            return Err(Box::new(Error::Locked));
        }
        let mut chain: Vec<usize> = Vec::new();
        if entry.start() > 0 {
            self.walk_chain(entry.start(), |sec, _dat, _trailer| {
                chain.push(sec);
            })?;
        }
        for sec in chain {
            self.vtoc.set_free(sec, true);
        }
        self.vtoc.sync_free_count();
        self.save_vtoc()?;
        entry.flags &= FLAG_IN_USE ^ 0xff;
        entry.flags |= FLAG_DELETED;
        self.set_entry(idx, &entry)
    }
    fn rename_file(&mut self, name: &str, new_name: &str) -> STDRESULT {
        if !is_name_valid(new_name) {
            return Err(Box::new(Error::InvalidName));
        }
        if self.lookup(new_name).is_ok() {
            return Err(Box::new(Error::AlreadyExists));
        }
        let (idx, mut entry) = self.lookup(name)?;
        if entry.is_locked() {
            return Err(Box::new(Error::Locked));
        }
        let (base, ext) = split_name(new_name);
        entry.name = base;
        entry.ext = ext;
        self.set_entry(idx, &entry)
    }
    fn set_locked(&mut self, name: &str, locked: bool) -> STDRESULT {
        let (idx, mut entry) = self.lookup(name)?;
        match locked {
            true => entry.flags |= FLAG_LOCKED,
            false => entry.flags &= FLAG_LOCKED ^ 0xff
        }
        self.set_entry(idx, &entry)
    }
    fn recover_deleted(&mut self, name: &str) -> Result<Vec<u8>,DYNERR> {
        let (base, ext) = split_name(name);
        let mut found: Option<(usize,DirEntry)> = None;
        for idx in 0..MAX_ENTRIES {
            let entry = self.get_entry(idx)?;
            if entry.is_deleted() && entry.name == base && entry.ext == ext {
                found = Some((idx, entry));
                break;
            }
        }
        let (idx, entry) = match found {
            Some(f) => f,
            None => return Err(Box::new(Error::NotFound))
        };
        // the chain survives only if every sector is still free and still
        // carries this entry's file id in its trailer
        let mut ans: Vec<u8> = Vec::new();
        let mut sec = entry.start();
        let mut visited: HashSet<usize> = HashSet::new();
        while sec != 0 {
            if sec > self.total_sectors || !visited.insert(sec) {
                return Err(Box::new(Error::BrokenChain));
            }
            if !self.vtoc.is_free(sec) {
                debug!("sector {} was reallocated", sec);
                return Err(Box::new(Error::BrokenChain));
            }
            let dat = self.img.read_block(Block::Atari(sec))?;
            let trailer = Trailer::unpack(&dat);
            if trailer.file_id != idx {
                debug!("sector {} now belongs to file {}", sec, trailer.file_id);
                return Err(Box::new(Error::BrokenChain));
            }
            let used = usize::min(trailer.bytes_used, dat.len() - 3);
            ans.extend_from_slice(&dat[0..used]);
            sec = trailer.next;
        }
        Ok(ans)
    }
    fn free_units(&mut self) -> Result<usize,DYNERR> {
        Ok(self.vtoc.free_count())
    }
    fn rebuild_bitmap(&mut self, commit: bool) -> Result<usize,DYNERR> {
        let mut fresh = Vtoc::blank(self.total_sectors);
        for s in 1..usize::min(self.total_sectors + 1, BITMAP_SECTORS) {
            fresh.set_free(s, true);
        }
        for s in 1..=BOOT_SECTORS {
            fresh.set_free(s, false);
        }
        for s in VTOC_SECTOR..DIR_SECTOR + DIR_SECTORS {
            fresh.set_free(s, false);
        }
        for idx in 0..MAX_ENTRIES {
            let entry = self.get_entry(idx)?;
            if entry.is_in_use() && entry.start() > 0 {
                let mut chain: Vec<usize> = Vec::new();
                self.walk_chain(entry.start(), |sec, _dat, _trailer| {
                    chain.push(sec);
                })?;
                for sec in chain {
                    fresh.set_free(sec, false);
                }
            }
        }
        fresh.sync_free_count();
        let mut changed = 0;
        for s in 0..BITMAP_SECTORS {
            if fresh.is_free(s) != self.vtoc.is_free(s) {
                changed += 1;
            }
        }
        trace!("bitmap rebuild changes {} sectors", changed);
        if commit {
            self.vtoc = fresh;
            self.save_vtoc()?;
        }
        Ok(changed)
    }
    fn validate_directory(&mut self) -> Result<DiagnosisList,DYNERR> {
        let mut diags = DiagnosisList::new();
        let mut claimed: HashSet<usize> = HashSet::new();
        for idx in 0..MAX_ENTRIES {
            let entry = self.get_entry(idx)?;
            if !entry.is_in_use() || entry.start() == 0 {
                continue;
            }
            let name = join_name(entry.name, entry.ext);
            let bound = entry.count() + 10;
            let mut visited: HashSet<usize> = HashSet::new();
            let mut sec = entry.start();
            let mut reps = 0;
            while sec != 0 {
                if sec > self.total_sectors {
                    diags.add(Code::OutOfRange, Severity::Error,
                        &format!("{}: sector {} out of range", name, sec));
                    break;
                }
                if !visited.insert(sec) {
                    diags.add(Code::CircularChain, Severity::Error,
                        &format!("{}: chain loops at sector {}", name, sec));
                    break;
                }
                if !claimed.insert(sec) {
                    diags.add(Code::CrossLinked, Severity::Error,
                        &format!("{}: sector {} claimed twice", name, sec));
                    break;
                }
                reps += 1;
                if reps > bound {
                    diags.add(Code::CircularChain, Severity::Error,
                        &format!("{}: chain exceeds declared length", name));
                    break;
                }
                let dat = self.img.read_block(Block::Atari(sec))?;
                sec = Trailer::unpack(&dat).next;
            }
        }
        Ok(diags)
    }
    fn get_img(&mut self) -> &mut Box<dyn img::DiskImage> {
        &mut self.img
    }
}
