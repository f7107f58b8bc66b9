//! # DOS 3.3 file system module
//!
//! Manipulates disk images containing one standard DOS 3.3 volume on a
//! 35 track, 16 sector disk.  File data is reached through track/sector
//! list sectors; binary files carry a four byte load address and length
//! header on disk.
//!
//! The module tries to emulate the order in which DOS would allocate
//! sectors.  Injection is atomic, and a deleted file whose sectors have
//! not been reused can be recovered through the deleted-entry path.

pub mod types;
mod directory;

use std::collections::HashSet;
use std::str::FromStr;
use num_traits::FromPrimitive;
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
    img: Box<dyn img::DiskImage>
}

impl Disk {
    /// Create a file system using the given image as storage.
    /// The DiskFS takes ownership of the image.
    pub fn from_img(mut img: Box<dyn img::DiskImage>) -> Result<Self,DYNERR> {
        let dat = img.read_block(Block::DOS33([VTOC_TRACK, 0]))?;
        let vtoc = Vtoc::from_bytes(&dat)?;
        Ok(Self {
            vtoc,
            img
        })
    }
    /// Test an image to see if it contains DOS 3.3.
    pub fn test_img(img: &mut Box<dyn img::DiskImage>) -> bool {
        if let Ok(dat) = img.read_block(Block::DOS33([VTOC_TRACK, 0])) {
            if let Ok(vtoc) = Vtoc::from_bytes(&dat) {
                if vtoc.version < 3 {
                    debug!("VTOC wrong version {}", vtoc.version);
                    return false;
                }
                if vtoc.vol < 1 || vtoc.vol > 254 {
                    debug!("volume {} out of range", vtoc.vol);
                    return false;
                }
                if vtoc.track1 as usize != VTOC_TRACK || vtoc.sector1 as usize != CATALOG_SECTOR {
                    debug!("VTOC wrong catalog start {},{}", vtoc.track1, vtoc.sector1);
                    return false;
                }
                if vtoc.bytes != [0,1] || vtoc.sectors as usize != SECTORS || vtoc.tracks as usize != TRACKS {
                    debug!("VTOC wrong shape {:?} {} {}", vtoc.bytes, vtoc.sectors, vtoc.tracks);
                    return false;
                }
                return true;
            }
        }
        debug!("VTOC sector was not readable");
        false
    }
    /// Format the disk with an empty catalog.  Boot code is not written.
    pub fn init(&mut self, vol: u8) -> STDRESULT {
        let mut vtoc = Vtoc::new();
        vtoc.pad1 = 4;
        vtoc.track1 = VTOC_TRACK as u8;
        vtoc.sector1 = CATALOG_SECTOR as u8;
        vtoc.version = 3;
        vtoc.vol = vol;
        vtoc.max_pairs = PAIRS_PER_TSLIST as u8;
        vtoc.last_track = VTOC_TRACK as u8 + 1;
        vtoc.last_direction = 1;
        vtoc.tracks = TRACKS as u8;
        vtoc.sectors = SECTORS as u8;
        vtoc.bytes = [0,1];
        // all free except the boot track and the catalog track
        for track in 1..TRACKS {
            if track != VTOC_TRACK {
                vtoc.bitmap[track*4] = 0xff;
                vtoc.bitmap[track*4+1] = 0xff;
            }
        }
        self.vtoc = vtoc;
        self.save_vtoc()?;
        // the catalog chain runs from sector 15 down to sector 1
        for sec in 1..=CATALOG_SECTOR {
            let mut dir = DirectorySector::new();
            if sec > 1 {
                dir.next_track = VTOC_TRACK as u8;
                dir.next_sector = sec as u8 - 1;
            }
            self.img.write_block(Block::DOS33([VTOC_TRACK, sec]), &dir.to_bytes())?;
        }
        Ok(())
    }
    fn save_vtoc(&mut self) -> STDRESULT {
        self.img.write_block(Block::DOS33([VTOC_TRACK, 0]), &self.vtoc.to_bytes())
    }
    fn get_track_map(&self, track: usize) -> u32 {
        let bm = &self.vtoc.bitmap;
        u32::from_be_bytes([bm[track*4], bm[track*4+1], bm[track*4+2], bm[track*4+3]])
    }
    fn save_track_map(&mut self, track: usize, map: u32) -> STDRESULT {
        let slice = u32::to_be_bytes(map);
        self.vtoc.bitmap[track*4..track*4+4].copy_from_slice(&slice);
        self.save_vtoc()
    }
    fn is_sector_free(&self, track: usize, sector: usize) -> bool {
        self.get_track_map(track) & (1 << (sector + 32 - SECTORS)) > 0
    }
    fn allocate_sector(&mut self, track: usize, sector: usize) -> STDRESULT {
        let map = self.get_track_map(track) & ((1 << (sector + 32 - SECTORS)) ^ u32::MAX);
        self.save_track_map(track, map)
    }
    fn deallocate_sector(&mut self, track: usize, sector: usize) -> STDRESULT {
        let map = self.get_track_map(track) | (1 << (sector + 32 - SECTORS));
        self.save_track_map(track, map)
    }
    /// Next free sector in the order DOS prefers: outward from the
    /// catalog track, sectors descending.
    fn get_next_free_sector(&self) -> Option<[usize;2]> {
        let mut search_tracks: Vec<usize> = (VTOC_TRACK+1..TRACKS).collect();
        search_tracks.append(&mut (1..VTOC_TRACK).rev().collect());
        for track in search_tracks {
            for sector in (0..SECTORS).rev() {
                if self.is_sector_free(track, sector) {
                    return Some([track, sector]);
                }
            }
        }
        None
    }
    /// Visit catalog sectors in chain order; stop when `visit` returns
    /// true.  Detects catalog loops.
    fn walk_catalog(&mut self, mut visit: impl FnMut(&DirectorySector, [usize;2]) -> bool) -> STDRESULT {
        let mut ts = [self.vtoc.track1 as usize, self.vtoc.sector1 as usize];
        for _rep in 0..MAX_DIRECTORY_REPS {
            if ts == [0,0] {
                return Ok(());
            }
            if ts[0] >= TRACKS || ts[1] >= SECTORS {
                return Err(Box::new(Error::Range));
            }
            let dat = self.img.read_block(Block::DOS33(ts))?;
            let dir = DirectorySector::from_bytes(&dat)?;
            if visit(&dir, ts) {
                return Ok(());
            }
            ts = [dir.next_track as usize, dir.next_sector as usize];
        }
        Err(Box::new(Error::CircularChain))
    }
    /// Find a live entry by name; returns (catalog ts, entry index, entry).
    fn lookup(&mut self, name: &str) -> Result<([usize;2], usize, Entry),DYNERR> {
        if !is_name_valid(name) {
            return Err(Box::new(Error::InvalidName));
        }
        let fname = string_to_file_name(name);
        let mut found: Option<([usize;2], usize, Entry)> = None;
        self.walk_catalog(|dir, ts| {
            for e in 0..ENTRIES_PER_SECTOR {
                let entry = dir.entries[e];
                if entry.is_live() && entry.name == fname {
                    found = Some((ts, e, entry));
                    return true;
                }
            }
            false
        })?;
        match found {
            Some(f) => Ok(f),
            None => Err(Box::new(Error::NotFound))
        }
    }
    fn set_entry(&mut self, ts: [usize;2], idx: usize, entry: &Entry) -> STDRESULT {
        let mut dat = self.img.read_block(Block::DOS33(ts))?;
        let offset = 11 + idx * 35;
        dat[offset..offset+35].copy_from_slice(&entry.to_bytes());
        self.img.write_block(Block::DOS33(ts), &dat)
    }
    /// Gather the track sector lists and data sectors of a file.
    /// Returns (tsl sectors, data sectors).
    fn gather_chain(&mut self, start: [usize;2]) -> Result<(Vec<[usize;2]>, Vec<[usize;2]>),DYNERR> {
        let mut tsl_sectors: Vec<[usize;2]> = Vec::new();
        let mut data_sectors: Vec<[usize;2]> = Vec::new();
        let mut visited: HashSet<[usize;2]> = HashSet::new();
        let mut ts = start;
        for _rep in 0..MAX_TSLIST_REPS {
            if ts == [0,0] {
                return Ok((tsl_sectors, data_sectors));
            }
            if ts[0] >= TRACKS || ts[1] >= SECTORS {
                return Err(Box::new(Error::Range));
            }
            if !visited.insert(ts) {
                return Err(Box::new(Error::CircularChain));
            }
            let dat = self.img.read_block(Block::DOS33(ts))?;
            let tsl = TrackSectorList::from_bytes(&dat)?;
            tsl_sectors.push(ts);
            for p in 0..PAIRS_PER_TSLIST {
                let pair = tsl.pair(p);
                if pair[0] as usize >= TRACKS || pair[1] as usize >= SECTORS {
                    return Err(Box::new(Error::Range));
                }
                if pair != [0,0] {
                    data_sectors.push([pair[0] as usize, pair[1] as usize]);
                }
            }
            ts = [tsl.next_track as usize, tsl.next_sector as usize];
        }
        Err(Box::new(Error::CircularChain))
    }
    /// The number of free sectors according to the live bitmap.
    fn count_free(&self) -> usize {
        let mut ans = 0;
        for track in 0..TRACKS {
            for sector in 0..SECTORS {
                if self.is_sector_free(track, sector) {
                    ans += 1;
                }
            }
        }
        ans
    }
}

impl DiskFS for Disk {
    fn fs_name(&self) -> String {
        "DOS 3.3".to_string()
    }
    fn catalog(&mut self, all: bool) -> Result<Vec<FileInfo>,DYNERR> {
        let mut ans: Vec<FileInfo> = Vec::new();
        self.walk_catalog(|dir, _ts| {
            for e in 0..ENTRIES_PER_SECTOR {
                let entry = dir.entries[e];
                if entry.is_live() || (all && entry.is_deleted()) {
                    let typ = match types::FileType::from_u8(entry.type_code()) {
                        Some(t) => t.letter().to_string(),
                        None => format!("${:02x}", entry.type_code())
                    };
                    let mut name = entry.name;
                    if entry.is_deleted() {
                        name[29] = 0xa0;
                    }
                    ans.push(FileInfo {
                        name: file_name_to_string(name),
                        typ,
                        first: Block::DOS33([entry.tsl_track as usize, entry.tsl_sector as usize]),
                        blocks: u16::from_le_bytes(entry.sector_count) as usize,
                        eof: None,
                        locked: entry.is_locked(),
                        deleted: entry.is_deleted(),
                        timestamp: None,
                        aux: 0
                    });
                }
            }
            false
        })?;
        Ok(ans)
    }
    fn extract_file(&mut self, name: &str) -> Result<Vec<u8>,DYNERR> {
        let (_ts, _idx, entry) = self.lookup(name)?;
        let (_tsl, data_sectors) = self.gather_chain([entry.tsl_track as usize, entry.tsl_sector as usize])?;
        let mut raw: Vec<u8> = Vec::new();
        for ts in data_sectors {
            raw.append(&mut self.img.read_block(Block::DOS33(ts))?);
        }
        // binary files carry a load address and exact length on disk
        if entry.type_code() == types::FileType::Binary as u8 && raw.len() >= 4 {
            let len = u16::from_le_bytes([raw[2], raw[3]]) as usize;
            if 4 + len <= raw.len() {
                return Ok(raw[4..4+len].to_vec());
            }
        }
        Ok(raw)
    }
    fn inject_file(&mut self, name: &str, typ: &str, aux: u16, dat: &[u8]) -> Result<usize,DYNERR> {
        if !is_name_valid(name) {
            return Err(Box::new(Error::InvalidName));
        }
        if self.lookup(name).is_ok() {
            return Err(Box::new(Error::AlreadyExists));
        }
        let file_type = types::FileType::from_str(typ)?;
        // find a free catalog slot
        let mut slot: Option<([usize;2], usize)> = None;
        self.walk_catalog(|dir, ts| {
            for e in 0..ENTRIES_PER_SECTOR {
                if !dir.entries[e].is_live() {
                    slot = Some((ts, e));
                    return true;
                }
            }
            false
        })?;
        let (slot_ts, slot_idx) = match slot {
            Some(s) => s,
            None => return Err(Box::new(Error::DirectoryFull))
        };
        // binary files are stored with the address and length header
        let on_disk = match file_type {
            types::FileType::Binary => {
                let mut full = u16::to_le_bytes(aux).to_vec();
                full.extend_from_slice(&u16::to_le_bytes(dat.len() as u16));
                full.extend_from_slice(dat);
                full
            },
            _ => dat.to_vec()
        };
        let data_count = (on_disk.len() + SECTOR_SIZE - 1) / SECTOR_SIZE;
        let tsl_count = usize::max(1, (data_count + PAIRS_PER_TSLIST - 1) / PAIRS_PER_TSLIST);
        if self.count_free() < data_count + tsl_count {
            return Err(Box::new(Error::DiskFull));
        }
        // allocate, rolling everything back on failure
        let mut allocated: Vec<[usize;2]> = Vec::new();
        let mut commit = |disk: &mut Self| -> Result<[usize;2],DYNERR> {
            let mut tsl_sectors: Vec<[usize;2]> = Vec::new();
            let mut data_sectors: Vec<[usize;2]> = Vec::new();
            for _i in 0..tsl_count {
                let ts = match disk.get_next_free_sector() {
                    Some(ts) => ts,
                    None => return Err(Box::new(Error::DiskFull))
                };
                disk.allocate_sector(ts[0], ts[1])?;
                allocated.push(ts);
                tsl_sectors.push(ts);
            }
            for _i in 0..data_count {
                let ts = match disk.get_next_free_sector() {
                    Some(ts) => ts,
                    None => return Err(Box::new(Error::DiskFull))
                };
                disk.allocate_sector(ts[0], ts[1])?;
                allocated.push(ts);
                data_sectors.push(ts);
            }
            // write the track sector lists
            for (i, ts) in tsl_sectors.iter().enumerate() {
                let mut tsl = TrackSectorList::new();
                tsl.sector_base = u16::to_le_bytes((i * PAIRS_PER_TSLIST) as u16);
                if i + 1 < tsl_sectors.len() {
                    tsl.next_track = tsl_sectors[i+1][0] as u8;
                    tsl.next_sector = tsl_sectors[i+1][1] as u8;
                }
                for p in 0..PAIRS_PER_TSLIST {
                    let d = i * PAIRS_PER_TSLIST + p;
                    if d < data_sectors.len() {
                        tsl.set_pair(p, [data_sectors[d][0] as u8, data_sectors[d][1] as u8]);
                    }
                }
                disk.img.write_block(Block::DOS33(*ts), &tsl.to_bytes())?;
            }
            // write the data
            for (i, ts) in data_sectors.iter().enumerate() {
                let mut buf = vec![0; SECTOR_SIZE];
                let mark = i * SECTOR_SIZE;
                let used = usize::min(SECTOR_SIZE, on_disk.len() - mark);
                buf[0..used].copy_from_slice(&on_disk[mark..mark+used]);
                disk.img.write_block(Block::DOS33(*ts), &buf)?;
            }
            Ok(tsl_sectors[0])
        };
        let first_tsl = match commit(self) {
            Ok(first_tsl) => first_tsl,
            Err(e) => {
                for ts in &allocated {
                    self.deallocate_sector(ts[0], ts[1])?;
                }
                return Err(e);
            }
        };
        self.set_entry(slot_ts, slot_idx, &Entry {
            tsl_track: first_tsl[0] as u8,
            tsl_sector: first_tsl[1] as u8,
            file_type: file_type as u8,
            name: string_to_file_name(name),
            sector_count: u16::to_le_bytes(data_count as u16)
        })?;
        Ok(dat.len())
    }
    fn delete_file(&mut self, name: &str) -> STDRESULT {
        let (ts, idx, mut entry) = self.lookup(name)?;
        if entry.is_locked() {
            return Err(Box::new(Error::Locked));
        }
        let (tsl_sectors, data_sectors) = self.gather_chain([entry.tsl_track as usize, entry.tsl_sector as usize])?;
        for s in tsl_sectors.iter().chain(data_sectors.iter()) {
            self.deallocate_sector(s[0], s[1])?;
        }
        // DOS hides the original track in the last name byte
        entry.name[29] = entry.tsl_track;
        entry.tsl_track = DELETED_TRACK;
        self.set_entry(ts, idx, &entry)
    }
    fn rename_file(&mut self, name: &str, new_name: &str) -> STDRESULT {
        if !is_name_valid(new_name) {
            return Err(Box::new(Error::InvalidName));
        }
        if self.lookup(new_name).is_ok() {
            return Err(Box::new(Error::AlreadyExists));
        }
        let (ts, idx, mut entry) = self.lookup(name)?;
        if entry.is_locked() {
            return Err(Box::new(Error::Locked));
        }
        entry.name = string_to_file_name(new_name);
        self.set_entry(ts, idx, &entry)
    }
    fn set_locked(&mut self, name: &str, locked: bool) -> STDRESULT {
        let (ts, idx, mut entry) = self.lookup(name)?;
        match locked {
            true => entry.file_type |= LOCK_FLAG,
            false => entry.file_type &= LOCK_FLAG ^ 0xff
        }
        self.set_entry(ts, idx, &entry)
    }
    fn recover_deleted(&mut self, name: &str) -> Result<Vec<u8>,DYNERR> {
        let fname = string_to_file_name(name);
        let mut found: Option<Entry> = None;
        self.walk_catalog(|dir, _ts| {
            for e in 0..ENTRIES_PER_SECTOR {
                let entry = dir.entries[e];
                if entry.is_deleted() && entry.name[0..29] == fname[0..29] {
                    found = Some(entry);
                    return true;
                }
            }
            false
        })?;
        let entry = match found {
            Some(e) => e,
            None => return Err(Box::new(Error::NotFound))
        };
        // the original track sector list track is hidden in the name
        let start = [entry.name[29] as usize, entry.tsl_sector as usize];
        if start[0] >= TRACKS {
            return Err(Box::new(Error::BrokenChain));
        }
        let (tsl_sectors, data_sectors) = self.gather_chain(start)?;
        // every sector must still be free, else something reused it
        for s in tsl_sectors.iter().chain(data_sectors.iter()) {
            if !self.is_sector_free(s[0], s[1]) {
                debug!("sector {:?} was reallocated", s);
                return Err(Box::new(Error::BrokenChain));
            }
        }
        let mut raw: Vec<u8> = Vec::new();
        for ts in data_sectors {
            raw.append(&mut self.img.read_block(Block::DOS33(ts))?);
        }
        if entry.type_code() == types::FileType::Binary as u8 && raw.len() >= 4 {
            let len = u16::from_le_bytes([raw[2], raw[3]]) as usize;
            if 4 + len <= raw.len() {
                return Ok(raw[4..4+len].to_vec());
            }
        }
        Ok(raw)
    }
    fn free_units(&mut self) -> Result<usize,DYNERR> {
        Ok(self.count_free())
    }
    fn rebuild_bitmap(&mut self, commit: bool) -> Result<usize,DYNERR> {
        // start from all free except the boot and catalog tracks
        let mut fresh = [0u8;200];
        for track in 1..TRACKS {
            if track != VTOC_TRACK {
                fresh[track*4] = 0xff;
                fresh[track*4+1] = 0xff;
            }
        }
        let mark_used = |bm: &mut [u8;200], ts: [usize;2]| {
            let map = u32::from_be_bytes([bm[ts[0]*4], bm[ts[0]*4+1], bm[ts[0]*4+2], bm[ts[0]*4+3]])
                & ((1u32 << (ts[1] + 32 - SECTORS)) ^ u32::MAX);
            bm[ts[0]*4..ts[0]*4+4].copy_from_slice(&u32::to_be_bytes(map));
        };
        let mut entries: Vec<Entry> = Vec::new();
        self.walk_catalog(|dir, _ts| {
            for e in 0..ENTRIES_PER_SECTOR {
                if dir.entries[e].is_live() {
                    entries.push(dir.entries[e]);
                }
            }
            false
        })?;
        for entry in entries {
            let (tsl_sectors, data_sectors) = self.gather_chain([entry.tsl_track as usize, entry.tsl_sector as usize])?;
            for ts in tsl_sectors.iter().chain(data_sectors.iter()) {
                mark_used(&mut fresh, *ts);
            }
        }
        let mut changed = 0;
        for i in 0..200 {
            changed += (fresh[i] ^ self.vtoc.bitmap[i]).count_ones() as usize;
        }
        trace!("bitmap rebuild changes {} sectors", changed);
        if commit {
            self.vtoc.bitmap = fresh;
            self.save_vtoc()?;
        }
        Ok(changed)
    }
    fn validate_directory(&mut self) -> Result<DiagnosisList,DYNERR> {
        let mut diags = DiagnosisList::new();
        let mut entries: Vec<Entry> = Vec::new();
        if let Err(e) = self.walk_catalog(|dir, _ts| {
            for i in 0..ENTRIES_PER_SECTOR {
                if dir.entries[i].is_live() {
                    entries.push(dir.entries[i]);
                }
            }
            false
        }) {
            diags.add(Code::CircularChain, Severity::Error, &format!("catalog walk failed: {}", e));
            return Ok(diags);
        }
        let mut claimed: HashSet<[usize;2]> = HashSet::new();
        for entry in entries {
            let name = file_name_to_string(entry.name);
            match self.gather_chain([entry.tsl_track as usize, entry.tsl_sector as usize]) {
                Ok((tsl_sectors, data_sectors)) => {
                    let declared = u16::from_le_bytes(entry.sector_count) as usize;
                    if data_sectors.len() > declared + 10 {
                        diags.add(Code::CircularChain, Severity::Error,
                            &format!("{}: chain is far longer than declared", name));
                    }
                    for ts in tsl_sectors.iter().chain(data_sectors.iter()) {
                        if !claimed.insert(*ts) {
                            diags.add_sector(Code::CrossLinked, Severity::Error, ts[0], ts[1],
                                &format!("{}: sector claimed twice", name));
                        }
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
