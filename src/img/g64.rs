//! ## Support for G64 disk images (Commodore 1541, raw GCR)
//!
//! G64 preserves each track as the raw GCR byte stream the drive head
//! would see.  Sector access therefore means scanning for sync runs,
//! decoding header blocks through the 4-and-5 code, and locating the data
//! block that follows.  Nothing in the stream is required to be byte
//! aligned, so all scanning is at the bit level.
//!
//! The slot table has 84 half-track entries; full tracks sit at the even
//! slots and that is all this module writes.

use bit_vec::BitVec;
use log::{debug,info,trace};
use a2kit_macro::DiskStructError;
use crate::img;
use crate::img::geometry::{self,FormatDescriptor};
use crate::codec::gcr;
use crate::fs::Block;
use crate::{STDRESULT,DYNERR};

pub const MAGIC: &[u8;8] = b"GCR-1541";
pub const HALF_TRACKS: usize = 84;
const MAX_TRACK_BYTES: usize = 7928;
const SYNC_RUN: usize = 10;

pub fn file_extensions() -> Vec<String> {
    vec!["g64".to_string()]
}

/// speed zone for a track numbered from 1
fn speed_zone(track: usize) -> u8 {
    match track {
        1..=17 => 3,
        18..=24 => 2,
        25..=30 => 1,
        _ => 0
    }
}

fn bit_at(buf: &[u8], bit: usize) -> u8 {
    let bit = bit % (buf.len() * 8);
    (buf[bit / 8] >> (7 - bit % 8)) & 1
}

/// read a byte at an arbitrary bit offset, wrapping around the track
fn byte_at(buf: &[u8], bit: usize) -> u8 {
    let mut ans = 0;
    for i in 0..8 {
        ans = (ans << 1) | bit_at(buf, bit + i);
    }
    ans
}

/// Find the first bit position after a sync run at or after `start`.
/// Returns None after one full revolution without sync.
fn find_sync(buf: &[u8], start: usize) -> Option<usize> {
    let bits = BitVec::from_bytes(buf);
    let total = bits.len();
    let mut run = 0;
    for i in 0..2 * total {
        match bits.get((start + i) % total) {
            Some(true) => run += 1,
            _ => {
                if run >= SYNC_RUN {
                    return Some((start + i) % total);
                }
                run = 0;
            }
        }
        if i >= total && run == 0 {
            return None;
        }
    }
    None
}

/// decode `count` data bytes (a whole number of 4-byte groups) at a bit
/// position, returning the bytes and the bad group count
fn decode_at(buf: &[u8], bit: usize, count: usize) -> (Vec<u8>, usize) {
    let mut gcr_bytes = Vec::new();
    for i in 0..count / 4 * 5 {
        gcr_bytes.push(byte_at(buf, bit + 8 * i));
    }
    gcr::decode(&gcr_bytes)
}

/// Wrapper for G64 data.
pub struct G64 {
    tracks: Vec<Option<Vec<u8>>>,
    speeds: [u8;HALF_TRACKS],
    geom: FormatDescriptor
}

impl G64 {
    /// Build a G64 with standard formatting from decoded sector data.
    /// `disk_id` goes into every header block.
    pub fn create(tracks: usize, disk_id: [u8;2]) -> Self {
        let geom = match tracks {
            40 => geometry::D64_40,
            _ => geometry::D64_35
        };
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; HALF_TRACKS];
        let mut speeds = [0u8;HALF_TRACKS];
        for t in 1..=tracks {
            let spt = geom.sectors_on(t - 1);
            let mut raw: Vec<u8> = Vec::new();
            for s in 0..spt {
                raw.append(&mut formatted_sector(t as u8, s as u8, disk_id, &[0;256]));
            }
            speeds[(t-1)*2] = speed_zone(t);
            slots[(t-1)*2] = Some(raw);
        }
        Self {
            tracks: slots,
            speeds,
            geom
        }
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DiskStructError> {
        if buf.len() < 12 + HALF_TRACKS * 8 {
            return Err(DiskStructError::OutOfData);
        }
        if &buf[0..8] != MAGIC {
            return Err(DiskStructError::UnexpectedValue);
        }
        let num_slots = buf[9] as usize;
        if num_slots > HALF_TRACKS {
            return Err(DiskStructError::IllegalValue);
        }
        info!("G64 version {} with {} half tracks", buf[8], num_slots);
        let mut tracks: Vec<Option<Vec<u8>>> = vec![None; HALF_TRACKS];
        let mut speeds = [0u8;HALF_TRACKS];
        for slot in 0..num_slots {
            let ptr = 12 + slot * 4;
            let offset = u32::from_le_bytes([buf[ptr],buf[ptr+1],buf[ptr+2],buf[ptr+3]]) as usize;
            let sptr = 12 + HALF_TRACKS * 4 + slot * 4;
            speeds[slot] = buf[sptr];
            if offset == 0 {
                continue;
            }
            if offset + 2 > buf.len() {
                return Err(DiskStructError::OutOfData);
            }
            let len = u16::from_le_bytes([buf[offset],buf[offset+1]]) as usize;
            if offset + 2 + len > buf.len() {
                return Err(DiskStructError::OutOfData);
            }
            tracks[slot] = Some(buf[offset+2..offset+2+len].to_vec());
        }
        let formatted = tracks.iter().filter(|t| t.is_some()).count();
        let geom = match formatted > 35 {
            true => geometry::D64_40,
            false => geometry::D64_35
        };
        Ok(Self {
            tracks,
            speeds,
            geom
        })
    }
    fn track_raw(&self, track: usize) -> Result<&Vec<u8>,DYNERR> {
        if track < 1 || track > HALF_TRACKS / 2 {
            return Err(Box::new(img::Error::TrackAccess));
        }
        match &self.tracks[(track-1) * 2] {
            Some(raw) => Ok(raw),
            None => Err(Box::new(img::Error::TrackAccess))
        }
    }
    /// Find a sector's data block on a track numbered from 1.  Returns the
    /// bit position where the GCR data block begins (after its sync).
    fn find_data_block(&self, track: usize, sec: usize) -> Result<usize,DYNERR> {
        let raw = self.track_raw(track)?;
        let mut start = 0;
        let total = raw.len() * 8;
        // every sector has a header and data field, so double is plenty
        for _field in 0..4 * self.geom.sectors_on(track - 1) {
            let pos = match find_sync(raw, start) {
                Some(p) => p,
                None => break
            };
            let (hdr, bad) = decode_at(raw, pos, 8);
            if bad == 0 && hdr[0] == 0x08 && hdr[2] as usize == sec && hdr[3] as usize == track {
                // checksum over sector, track, id
                if hdr[1] != hdr[2] ^ hdr[3] ^ hdr[4] ^ hdr[5] {
                    debug!("header checksum bad on track {} sector {}", track, sec);
                }
                // data block follows the next sync
                if let Some(data_pos) = find_sync(raw, (pos + 10 * 8) % total) {
                    let (probe, dbad) = decode_at(raw, data_pos, 4);
                    if dbad == 0 && probe[0] == 0x07 {
                        return Ok(data_pos);
                    }
                }
            }
            start = (pos + 8) % total;
            if start < 8 {
                break;
            }
        }
        debug!("sector {} not found on track {}", sec, track);
        Err(Box::new(img::Error::SectorAccess))
    }
    /// Decoded 256 data bytes of a sector on a track numbered from 1.
    pub fn read_gcr_sector(&self, track: usize, sec: usize) -> Result<Vec<u8>,DYNERR> {
        let data_pos = self.find_data_block(track, sec)?;
        let raw = self.track_raw(track)?;
        let (block, bad) = decode_at(raw, data_pos, 260);
        if bad > 0 {
            debug!("{} bad GCR groups in track {} sector {}", bad, track, sec);
            return Err(Box::new(crate::codec::Error::BadGcr));
        }
        let mut chk = 0u8;
        for i in 1..257 {
            chk ^= block[i];
        }
        if chk != block[257] {
            debug!("data checksum bad on track {} sector {}", track, sec);
            return Err(Box::new(img::Error::SectorAccess));
        }
        Ok(block[1..257].to_vec())
    }
    /// Re-encode a sector in place on a track numbered from 1.
    pub fn write_gcr_sector(&mut self, track: usize, sec: usize, dat: &[u8]) -> STDRESULT {
        let data_pos = self.find_data_block(track, sec)?;
        let padded = img::quantize_block(dat, 256);
        let mut block = vec![0x07u8];
        let mut chk = 0u8;
        for b in &padded {
            chk ^= *b;
        }
        block.extend_from_slice(&padded);
        block.push(chk);
        block.push(0);
        block.push(0);
        let gcr_bytes = gcr::encode(&block);
        let raw = match &mut self.tracks[(track-1) * 2] {
            Some(raw) => raw,
            None => return Err(Box::new(img::Error::TrackAccess))
        };
        let total = raw.len() * 8;
        for (i, byte) in gcr_bytes.iter().enumerate() {
            for b in 0..8 {
                let bit = (data_pos + 8 * i + b) % total;
                let mask = 0x80 >> (bit % 8);
                match (byte >> (7 - b)) & 1 {
                    1 => raw[bit / 8] |= mask,
                    _ => raw[bit / 8] &= mask ^ 0xff
                }
            }
        }
        Ok(())
    }
}

/// One formatted sector field: sync, header, gap, sync, data, gap.
fn formatted_sector(track: u8, sec: u8, disk_id: [u8;2], dat: &[u8;256]) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    ans.append(&mut vec![0xff;5]);
    let hdr_chk = sec ^ track ^ disk_id[0] ^ disk_id[1];
    ans.append(&mut gcr::encode(&[0x08, hdr_chk, sec, track, disk_id[0], disk_id[1], 0x0f, 0x0f]));
    ans.append(&mut vec![0x55;9]);
    ans.append(&mut vec![0xff;5]);
    let mut block = vec![0x07u8];
    let mut chk = 0u8;
    for b in dat {
        chk ^= *b;
    }
    block.extend_from_slice(dat);
    block.push(chk);
    block.push(0);
    block.push(0);
    ans.append(&mut gcr::encode(&block));
    ans.append(&mut vec![0x55;8]);
    ans
}

impl img::DiskImage for G64 {
    fn track_count(&self) -> usize {
        self.geom.cylinders
    }
    fn num_heads(&self) -> usize {
        1
    }
    fn byte_capacity(&self) -> usize {
        self.geom.total_bytes()
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::G64
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn geometry(&self) -> Option<FormatDescriptor> {
        Some(self.geom)
    }
    fn to_bytes(&mut self) -> Vec<u8> {
        let mut ans: Vec<u8> = Vec::new();
        ans.extend_from_slice(MAGIC);
        ans.push(0);
        ans.push(HALF_TRACKS as u8);
        ans.extend_from_slice(&u16::to_le_bytes(MAX_TRACK_BYTES as u16));
        let mut offset = 12 + HALF_TRACKS * 8;
        let mut offsets: Vec<u32> = Vec::new();
        for slot in 0..HALF_TRACKS {
            match &self.tracks[slot] {
                Some(raw) => {
                    offsets.push(offset as u32);
                    offset += 2 + raw.len();
                },
                None => offsets.push(0)
            }
        }
        for off in &offsets {
            ans.extend_from_slice(&u32::to_le_bytes(*off));
        }
        for slot in 0..HALF_TRACKS {
            ans.extend_from_slice(&u32::to_le_bytes(self.speeds[slot] as u32));
        }
        for slot in 0..HALF_TRACKS {
            if let Some(raw) = &self.tracks[slot] {
                ans.extend_from_slice(&u16::to_le_bytes(raw.len() as u16));
                ans.extend_from_slice(raw);
            }
        }
        ans
    }
    fn read_block(&mut self, addr: Block) -> Result<Vec<u8>,DYNERR> {
        match addr {
            Block::CBM([t,s]) => self.read_gcr_sector(t, s),
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn write_block(&mut self, addr: Block, dat: &[u8]) -> STDRESULT {
        match addr {
            Block::CBM([t,s]) => self.write_gcr_sector(t, s, dat),
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn read_sector(&mut self, cyl: usize, head: usize, sec: usize) -> Result<Vec<u8>,DYNERR> {
        if head > 0 {
            return Err(Box::new(img::Error::SectorAccess));
        }
        trace!("read cyl {} sector {}", cyl, sec);
        self.read_gcr_sector(cyl + 1, sec)
    }
    fn write_sector(&mut self, cyl: usize, head: usize, sec: usize, dat: &[u8]) -> STDRESULT {
        if head > 0 {
            return Err(Box::new(img::Error::SectorAccess));
        }
        trace!("write cyl {} sector {}", cyl, sec);
        self.write_gcr_sector(cyl + 1, sec, dat)
    }
    fn get_track_buf(&mut self, cyl: usize, head: usize) -> Result<Vec<u8>,DYNERR> {
        if head > 0 {
            return Err(Box::new(img::Error::TrackAccess));
        }
        Ok(self.track_raw(cyl + 1)?.clone())
    }
    fn set_track_buf(&mut self, cyl: usize, head: usize, dat: &[u8]) -> STDRESULT {
        if head > 0 || cyl + 1 > HALF_TRACKS / 2 {
            return Err(Box::new(img::Error::TrackAccess));
        }
        self.tracks[cyl * 2] = Some(dat.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_sector_reads_back() {
        let mut g64 = G64::create(35, [0x41, 0x42]);
        assert_eq!(g64.read_gcr_sector(1, 0).unwrap(), vec![0;256]);
        let dat: Vec<u8> = (0..=255).collect();
        g64.write_gcr_sector(18, 7, &dat).unwrap();
        assert_eq!(g64.read_gcr_sector(18, 7).unwrap(), dat);
        // neighbors untouched
        assert_eq!(g64.read_gcr_sector(18, 6).unwrap(), vec![0;256]);
    }

    #[test]
    fn flatten_and_reopen() {
        let mut g64 = G64::create(35, [0x30, 0x31]);
        let dat = vec![0x5a;256];
        g64.write_gcr_sector(5, 2, &dat).unwrap();
        let flat = crate::img::DiskImage::to_bytes(&mut g64);
        let back = G64::from_bytes(&flat).unwrap();
        assert_eq!(back.read_gcr_sector(5, 2).unwrap(), dat);
        assert_eq!(back.read_gcr_sector(35, 16).unwrap(), vec![0;256]);
    }
}
