//! ## Support for TD0 disk images (Teledisk)
//!
//! The assumptions herein are largely based on Dave Dunfield's notes found
//! in the ImageDisk package.  Advanced ("td") compression is handled by
//! the in-house `codec::lzhuf`, which is the LZHUF.C lineage codec the
//! original Teledisk used.  As of this writing the creators of the format
//! have never revealed its details.

use chrono::{Datelike,Timelike};
use num_traits::FromPrimitive;
use num_derive::FromPrimitive;
use log::{debug,info,trace,warn,error};
use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use crate::img;
use crate::img::geometry::{FormatDescriptor,SectorCount};
use crate::codec::lzhuf;
use crate::crc::crc16_a097;
use crate::bios::skew;
use crate::fs::Block;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::{STDRESULT,DYNERR};

pub const SECTOR_SIZE_BASE: usize = 128;
/// backstop for expanding advanced compression
const MAX_EXPANDED: usize = 3_000_000;

const HEAD_MASK: u8 = 0x01;
const NO_DATA_MASK: u8 = 0x30;
const FM_MASK: u8 = 0x80;
const COMMENT_MASK: u8 = 0x80;

pub fn file_extensions() -> Vec<String> {
    vec!["td0".to_string()]
}

#[derive(FromPrimitive)]
pub enum SectorEncoding {
    Raw = 0,
    Repeated = 1,
    RunLength = 2
}

pub fn is_slice_uniform(slice: &[u8]) -> bool {
    if slice.len() < 1 {
        return true;
    }
    let test = slice[0];
    for i in 1..slice.len() {
        if slice[i] != test {
            return false;
        }
    }
    true
}

#[derive(DiskStruct)]
pub struct ImageHeader {
    signature: [u8;2],
    /// usually 0, could increment for each disk in a set
    sequence: u8,
    check_sequence: u8,
    /// decimal version digits, e.g. 21 for Teledisk 2.1
    version: u8,
    /// 0=250kbps, 1=300kbps, 2=500kbps; high bit set means FM
    data_rate: u8,
    drive_type: u8,
    /// stepping in low bits, high bit indicates comment block
    stepping: u8,
    /// if >0 a DOS FAT was used to skip unallocated sectors
    dos_alloc_flag: u8,
    sides: u8,
    crc: [u8;2]
}

#[derive(DiskStruct)]
pub struct CommentHeader {
    crc: [u8;2],
    data_length: [u8;2],
    /// bytes: year since 1900, month 0-11, day, hour, minute, second
    timestamp: [u8;6]
}

#[derive(DiskStruct)]
pub struct SectorHeader {
    cylinder: u8,
    head: u8,
    /// logical sector number as encoded on the disk
    id: u8,
    /// length = 128 << sector_shift
    sector_shift: u8,
    /// 0x10 or 0x20 means no sector data follows
    flags: u8,
    /// lower byte of the data CRC
    crc: u8
}

#[derive(DiskStruct)]
pub struct TrackHeader {
    sectors: u8,
    cylinder: u8,
    /// 0 or 1, or 0x80/0x81 if the track is FM
    head: u8,
    /// lower byte of the header CRC
    crc: u8
}

pub struct Sector {
    header: SectorHeader,
    /// packed representation, decode with `unpack`
    data: Vec<u8>
}

pub struct Track {
    header: TrackHeader,
    sectors: Vec<Sector>
}

pub struct Td0 {
    header: ImageHeader,
    heads: usize,
    advanced: bool,
    comment_header: Option<CommentHeader>,
    comment_data: Option<String>,
    tracks: Vec<Track>,
    diags: DiagnosisList
}

impl CommentHeader {
    fn pack_timestamp(maybe_time: Option<chrono::NaiveDateTime>) -> [u8;6] {
        let now = match maybe_time {
            Some(time) => time,
            _ => chrono::Local::now().naive_local()
        };
        let mut year = now.year();
        if year - 1900 > u8::MAX as i32 {
            warn!("timestamp is pegged at {} years after reference date", u8::MAX);
            year = 1900 + u8::MAX as i32;
        }
        if year < 1900 {
            warn!("year prior to reference date, pegging to reference date");
            year = 1900;
        }
        [(year - 1900) as u8, now.month0() as u8, now.day() as u8,
            now.hour() as u8, now.minute() as u8, now.second() as u8]
    }
    fn unpack_timestamp(&self) -> Option<chrono::NaiveDateTime> {
        match chrono::NaiveDate::from_ymd_opt(1900 + self.timestamp[0] as i32,
            self.timestamp[1] as u32 + 1, self.timestamp[2] as u32) {
            Some(d) => d.and_hms_opt(self.timestamp[3] as u32, self.timestamp[4] as u32, self.timestamp[5] as u32),
            None => None
        }
    }
}

impl Sector {
    fn create(cylinder: u8, head: u8, id: u8, byte_count: usize) -> Self {
        let mut sector_shift = 0;
        let mut temp = byte_count;
        while temp > SECTOR_SIZE_BASE {
            temp /= 2;
            sector_shift += 1;
        }
        Self {
            header: SectorHeader {
                cylinder,
                head,
                id,
                sector_shift,
                flags: 0,
                crc: 0
            },
            data: [
                vec![5,0],
                vec![SectorEncoding::Repeated as u8],
                u16::to_le_bytes(byte_count as u16 / 2).to_vec(),
                vec![0,0]
            ].concat()
        }
    }
    /// Pack data into this sector.  Only a uniform sector is compressed at
    /// this level.
    fn pack(&mut self, dat: &[u8]) -> STDRESULT {
        trace!("packing sector {}", self.header.id);
        let sector_size = SECTOR_SIZE_BASE << self.header.sector_shift;
        if dat.len() != sector_size {
            return Err(Box::new(img::Error::SectorAccess));
        }
        self.data = Vec::new();
        if self.header.flags & NO_DATA_MASK > 0 {
            warn!("changing no-data flags in sector {} and writing data", self.header.id);
            self.header.flags &= NO_DATA_MASK ^ u8::MAX;
        }
        if is_slice_uniform(dat) {
            self.data.append(&mut u16::to_le_bytes(5).to_vec());
            self.data.push(SectorEncoding::Repeated as u8);
            self.data.append(&mut u16::to_le_bytes(sector_size as u16 / 2).to_vec());
            self.data.push(dat[0]);
            self.data.push(dat[0]);
        } else {
            self.data.append(&mut u16::to_le_bytes(sector_size as u16 + 1).to_vec());
            self.data.push(SectorEncoding::Raw as u8);
            self.data.append(&mut dat.to_vec());
        }
        Ok(())
    }
    /// Unpack sector data as raw bytes.
    fn unpack(&self) -> Result<Vec<u8>,DYNERR> {
        let mut ans: Vec<u8> = Vec::new();
        let mut ptr: usize = 0;
        let sector_size = SECTOR_SIZE_BASE << self.header.sector_shift;
        if self.header.flags & NO_DATA_MASK > 0 {
            debug!("cyl {} sec {} has no data", self.header.cylinder, self.header.id);
            return Err(Box::new(img::Error::SectorAccess));
        }
        if self.data.len() < 3 {
            return Err(Box::new(img::Error::TruncatedInput));
        }
        let expected_end = u16::from_le_bytes([self.data[0], self.data[1]]) as usize + 2;
        let encoding_code = self.data[2];
        ptr += 3;
        let encoding = match SectorEncoding::from_u8(encoding_code) {
            Some(e) => e,
            None => {
                debug!("unknown encoding {} in cyl {} sec {}", encoding_code, self.header.cylinder, self.header.id);
                return Err(Box::new(crate::codec::Error::BadCompressionMode));
            }
        };
        match encoding {
            SectorEncoding::Raw => {
                if ptr + sector_size > self.data.len() {
                    return Err(Box::new(img::Error::TruncatedInput));
                }
                ans.extend_from_slice(&self.data[ptr..ptr+sector_size]);
                ptr += sector_size;
            },
            SectorEncoding::Repeated => {
                while ans.len() < sector_size {
                    if ptr + 4 > self.data.len() {
                        return Err(Box::new(img::Error::TruncatedInput));
                    }
                    let count = u16::from_le_bytes([self.data[ptr], self.data[ptr+1]]) as usize;
                    for _i in 0..count {
                        ans.push(self.data[ptr+2]);
                        ans.push(self.data[ptr+3]);
                    }
                    ptr += 4;
                }
            },
            SectorEncoding::RunLength => {
                while ans.len() < sector_size {
                    if ptr >= self.data.len() {
                        return Err(Box::new(img::Error::TruncatedInput));
                    }
                    let read_count = 2 * self.data[ptr] as usize;
                    ptr += 1;
                    if read_count == 0 {
                        if ptr >= self.data.len() {
                            return Err(Box::new(img::Error::TruncatedInput));
                        }
                        let rw_count = self.data[ptr] as usize;
                        ptr += 1;
                        if ptr + rw_count > self.data.len() {
                            return Err(Box::new(img::Error::TruncatedInput));
                        }
                        ans.extend_from_slice(&self.data[ptr..ptr+rw_count]);
                        ptr += rw_count;
                    } else {
                        if ptr >= self.data.len() {
                            return Err(Box::new(img::Error::TruncatedInput));
                        }
                        let repeat = self.data[ptr] as usize;
                        ptr += 1;
                        if ptr + read_count > self.data.len() {
                            return Err(Box::new(img::Error::TruncatedInput));
                        }
                        for _i in 0..repeat {
                            ans.extend_from_slice(&self.data[ptr..ptr+read_count]);
                        }
                        ptr += read_count;
                    }
                }
            }
        }
        if ans.len() == sector_size {
            if expected_end != ptr {
                warn!("length in data header did not match result");
            }
            Ok(ans)
        } else {
            debug!("sector decoded as wrong size {}", ans.len());
            Err(Box::new(img::Error::SectorAccess))
        }
    }
}

impl DiskStruct for Sector {
    fn new() -> Self where Self: Sized {
        Self {
            header: SectorHeader::new(),
            data: Vec::new()
        }
    }
    fn len(&self) -> usize {
        self.header.len() + self.data.len()
    }
    fn to_bytes(&self) -> Vec<u8> {
        let header = match self.unpack() {
            Ok(unpacked) => {
                let mut header = SectorHeader::from_bytes(&self.header.to_bytes()).expect("header unflatten failed");
                header.crc = (crc16_a097(0, &unpacked) & 0xff) as u8;
                header
            },
            _ => SectorHeader::from_bytes(&self.header.to_bytes()).expect("header unflatten failed")
        };
        [header.to_bytes(), self.data.clone()].concat()
    }
    fn update_from_bytes(&mut self, _bytes: &[u8]) -> Result<(),DiskStructError> {
        // sectors are variable length, use the track walker instead
        Err(DiskStructError::UnexpectedValue)
    }
    fn from_bytes(bytes: &[u8]) -> Result<Self,DiskStructError> where Self: Sized {
        let mut ans = Sector::new();
        ans.update_from_bytes(bytes)?;
        Ok(ans)
    }
}

impl Td0 {
    /// Create an empty image with a uniform geometry.
    pub fn create(geom: FormatDescriptor) -> Self {
        let spt = geom.sectors_on(0);
        let mut tracks: Vec<Track> = Vec::new();
        for cyl in 0..geom.cylinders {
            for head in 0..geom.heads {
                let mut sectors: Vec<Sector> = Vec::new();
                for s in 0..spt {
                    sectors.push(Sector::create(cyl as u8, head as u8,
                        (s + geom.first_sector_id) as u8, geom.bytes_per_sector));
                }
                tracks.push(Track {
                    header: TrackHeader {
                        sectors: spt as u8,
                        cylinder: cyl as u8,
                        head: head as u8,
                        crc: 0
                    },
                    sectors
                });
            }
        }
        let comment_string = format!("created by retroimg v{}", env!("CARGO_PKG_VERSION"));
        Self {
            header: ImageHeader {
                signature: *b"TD",
                sequence: 0,
                check_sequence: 0,
                version: 21,
                data_rate: 0,
                drive_type: 1,
                stepping: COMMENT_MASK,
                dos_alloc_flag: 0,
                sides: geom.heads as u8,
                crc: [0,0]
            },
            heads: geom.heads,
            advanced: false,
            comment_header: Some(CommentHeader {
                crc: [0,0],
                data_length: u16::to_le_bytes(comment_string.len() as u16),
                timestamp: CommentHeader::pack_timestamp(None)
            }),
            comment_data: Some(comment_string),
            tracks,
            diags: DiagnosisList::new()
        }
    }
    pub fn from_bytes(compressed: &[u8]) -> Result<Self,DiskStructError> {
        if compressed.len() < 12 {
            return Err(DiskStructError::OutOfData);
        }
        let test_header = ImageHeader::from_bytes(&compressed[0..12])?;
        let advanced = match &test_header.signature {
            b"td" => {
                info!("TD0 signature found (advanced compression)");
                true
            },
            b"TD" => {
                info!("TD0 signature found (no advanced compression)");
                false
            },
            _ => return Err(DiskStructError::UnexpectedValue)
        };
        if u16::from_le_bytes(test_header.crc) != crc16_a097(0, &compressed[0..10]) {
            warn!("image header CRC mismatch");
            return Err(DiskStructError::UnexpectedValue);
        }
        // the version byte carries decimal digits, e.g. 21 for 2.1
        if test_header.version < 10 || test_header.version > 21 {
            debug!("TD0 version byte {} unsupported", test_header.version);
            return Err(DiskStructError::IllegalValue);
        }
        if advanced && test_header.version < 20 {
            // Teledisk 1.x advanced compression is LZW, which nothing
            // in this corpus of disks has ever needed
            warn!("TD0 1.x advanced compression not supported");
            return Err(DiskStructError::IllegalValue);
        }
        let expanded = match advanced {
            true => match lzhuf::unpack(&compressed[12..], MAX_EXPANDED) {
                Ok(x) => x,
                Err(_) => return Err(DiskStructError::UnexpectedValue)
            },
            false => compressed[12..].to_vec()
        };
        let mut diags = DiagnosisList::new();
        let mut ans = Self {
            heads: match test_header.sides { 1 => 1, _ => 2 },
            header: test_header,
            advanced,
            comment_header: None,
            comment_data: None,
            tracks: Vec::new(),
            diags: DiagnosisList::new()
        };
        let mut ptr: usize = 0;
        // the comment block, when present, strictly precedes track iteration
        if ans.header.stepping & COMMENT_MASK > 0 {
            if ptr + 10 > expanded.len() {
                return Err(DiskStructError::OutOfData);
            }
            let comment_header = CommentHeader::from_bytes(&expanded[ptr..ptr+10])?;
            ptr += 10;
            let comment_len = u16::from_le_bytes(comment_header.data_length) as usize;
            if ptr + comment_len > expanded.len() {
                return Err(DiskStructError::OutOfData);
            }
            let crc = crc16_a097(0, &expanded[2..10+comment_len]);
            if u16::from_le_bytes(comment_header.crc) != crc {
                warn!("comment area CRC mismatch");
                diags.add(Code::HeaderCrc, Severity::Warning, "comment area CRC mismatch");
            }
            let comment = String::from_utf8_lossy(&expanded[ptr..ptr+comment_len])
                .replace("\x00", "\n");
            debug!("comment data `{}`", comment);
            ans.comment_data = Some(comment);
            ans.comment_header = Some(comment_header);
            ptr += comment_len;
        }
        while ptr < expanded.len() && expanded[ptr] != 0xff {
            if ptr + 4 > expanded.len() {
                diags.add(Code::TruncatedInput, Severity::Warning, "track records ended early");
                break;
            }
            let header = TrackHeader::from_bytes(&expanded[ptr..ptr+4])?;
            ptr += 4;
            // we will not stop for a bad track CRC, but do warn
            let expected_crc = crc16_a097(0, &header.to_bytes()[0..3]);
            if header.crc != (expected_crc & 0xff) as u8 {
                warn!("track header CRC mismatch at cyl {} head {}", header.cylinder, header.head);
                diags.add_sector(Code::TrackCrc, Severity::Warning,
                    header.cylinder as usize, 0, "track header CRC mismatch");
            }
            let mut trk = Track {
                header,
                sectors: Vec::new()
            };
            trace!("found cyl {} head {} with {} sectors", trk.header.cylinder, trk.header.head, trk.header.sectors);
            for i in 0..trk.header.sectors {
                if ptr + 6 > expanded.len() {
                    return Err(DiskStructError::OutOfData);
                }
                let mut sec = Sector::new();
                sec.header = SectorHeader::from_bytes(&expanded[ptr..ptr+6])?;
                ptr += 6;
                if sec.header.flags & NO_DATA_MASK == 0 {
                    if ptr + 2 > expanded.len() {
                        return Err(DiskStructError::OutOfData);
                    }
                    let data_size = u16::from_le_bytes([expanded[ptr], expanded[ptr+1]]) as usize;
                    if ptr + 2 + data_size > expanded.len() {
                        debug!("end of data in sector record {} with id {}", i, sec.header.id);
                        return Err(DiskStructError::OutOfData);
                    }
                    // keep the length bytes in the structure
                    sec.data.extend_from_slice(&expanded[ptr..ptr+2+data_size]);
                    ptr += 2 + data_size;
                }
                // we will not stop for a bad sector CRC, but do warn
                if let Ok(unpacked) = sec.unpack() {
                    let expected = crc16_a097(0, &unpacked);
                    if sec.header.crc != (expected & 0xff) as u8 {
                        warn!("sector CRC mismatch in record {} with id {}", i, sec.header.id);
                        diags.add_sector(Code::SectorCrc, Severity::Warning,
                            trk.header.cylinder as usize, sec.header.id as usize, "sector CRC mismatch");
                    }
                } else {
                    trace!("no sector data - skip CRC");
                }
                trk.sectors.push(sec);
            }
            ans.tracks.push(trk);
        }
        if ptr >= expanded.len() {
            diags.add(Code::TruncatedInput, Severity::Warning, "no end of disk marker");
        }
        debug!("disk capacity {}", ans.tracks.iter().map(|t| t.sectors.iter()
            .map(|s| SECTOR_SIZE_BASE << s.header.sector_shift).sum::<usize>()).sum::<usize>());
        ans.diags = diags;
        Ok(ans)
    }
    pub fn comment(&self) -> Option<&str> {
        self.comment_data.as_deref()
    }
    /// Choose whether `to_bytes` writes advanced ("td") compression.
    pub fn set_advanced(&mut self, advanced: bool) {
        self.advanced = advanced;
    }
    pub fn timestamp(&self) -> Option<chrono::NaiveDateTime> {
        match &self.comment_header {
            Some(h) => h.unpack_timestamp(),
            None => None
        }
    }
    fn get_track_mut(&mut self, cyl: usize, head: usize) -> Result<&mut Track,DYNERR> {
        for trk in &mut self.tracks {
            if trk.header.cylinder as usize == cyl && (trk.header.head & HEAD_MASK) as usize == head {
                return Ok(trk);
            }
        }
        debug!("cannot find cyl {} head {}", cyl, head);
        Err(Box::new(img::Error::TrackAccess))
    }
    fn get_track_ref(&self, cyl: usize, head: usize) -> Result<&Track,DYNERR> {
        for trk in &self.tracks {
            if trk.header.cylinder as usize == cyl && (trk.header.head & HEAD_MASK) as usize == head {
                return Ok(trk);
            }
        }
        Err(Box::new(img::Error::TrackAccess))
    }
    /// skew table taking CP/M logical sectors to physical ids, keyed by
    /// overall shape; identity when the shape is not recognized
    fn get_skew(&self, spt: usize) -> Vec<usize> {
        let capacity = self.byte_capacity();
        match (capacity, spt) {
            (256256, 26) => skew::CPM_1_LSEC_TO_PSEC.iter().map(|x| *x as usize).collect(),
            (102400, 10) => skew::CPM_LSEC_TO_OSB1_PSEC.iter().map(|x| *x as usize).collect(),
            _ => {
                let first = match self.tracks.first() {
                    Some(t) => t.sectors.iter().map(|s| s.header.id as usize).min().unwrap_or(1),
                    None => 1
                };
                (first..first+spt).collect()
            }
        }
    }
    fn byte_capacity(&self) -> usize {
        let mut ans = 0;
        for trk in &self.tracks {
            for sec in &trk.sectors {
                if sec.header.flags & NO_DATA_MASK == 0 {
                    ans += SECTOR_SIZE_BASE << sec.header.sector_shift;
                }
            }
        }
        ans
    }
}

impl img::DiskImage for Td0 {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }
    fn num_heads(&self) -> usize {
        self.heads
    }
    fn byte_capacity(&self) -> usize {
        Td0::byte_capacity(self)
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::TD0
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn geometry(&self) -> Option<FormatDescriptor> {
        // only a homogeneous layout can be described
        let first = self.tracks.first()?;
        let spt = first.sectors.len();
        let shift = first.sectors.first()?.header.sector_shift;
        for trk in &self.tracks {
            if trk.sectors.len() != spt {
                return None;
            }
            for sec in &trk.sectors {
                if sec.header.sector_shift != shift {
                    return None;
                }
            }
        }
        let first_id = first.sectors.iter().map(|s| s.header.id as usize).min()?;
        Some(FormatDescriptor {
            cylinders: self.tracks.len() / self.heads,
            heads: self.heads,
            sectors: SectorCount::Uniform(spt),
            bytes_per_sector: SECTOR_SIZE_BASE << shift,
            first_sector_id: first_id,
            side_order: crate::img::geometry::SideOrder::Alternating,
            skew: crate::img::geometry::Skew::Logical
        })
    }
    fn diagnostics(&self) -> DiagnosisList {
        self.diags.clone()
    }
    fn to_bytes(&mut self) -> Vec<u8> {
        let mut body: Vec<u8> = Vec::new();
        match (self.comment_header.as_mut(), self.comment_data.as_ref()) {
            (Some(h), Some(d)) => {
                let encoded_string = d.replace("\r\n", "\x00").replace("\n", "\x00");
                let encoded_bytes = encoded_string.as_bytes();
                h.data_length = u16::to_le_bytes(encoded_bytes.len() as u16);
                h.crc = u16::to_le_bytes(crc16_a097(0, &[
                    h.to_bytes()[2..].to_vec(),
                    encoded_bytes.to_vec()
                ].concat()));
                body.append(&mut h.to_bytes());
                body.extend_from_slice(encoded_bytes);
                self.header.stepping |= COMMENT_MASK;
            },
            _ => {
                self.header.stepping &= COMMENT_MASK ^ u8::MAX;
            }
        }
        for trk in &self.tracks {
            let mut header_bytes = trk.header.to_bytes();
            header_bytes[3] = (crc16_a097(0, &header_bytes[0..3]) & 0xff) as u8;
            body.append(&mut header_bytes);
            for sec in &trk.sectors {
                body.append(&mut sec.to_bytes());
            }
        }
        body.push(0xff);
        // real Teledisks carry several trailing bytes; some decoders choke
        // without enough bits to finish the last Huffman symbol
        body.append(&mut vec![0x27, 0x09, 0xe1, 0xc5, 0x89, 0x05, 0x76]);
        self.header.signature = match self.advanced {
            true => *b"td",
            false => *b"TD"
        };
        let mut head_bytes = self.header.to_bytes();
        let crc = crc16_a097(0, &head_bytes[0..10]);
        head_bytes[10..12].copy_from_slice(&u16::to_le_bytes(crc));
        let mut ans = head_bytes;
        match self.advanced {
            true => ans.append(&mut lzhuf::pack(&body)),
            false => ans.append(&mut body)
        }
        ans
    }
    fn read_block(&mut self, addr: Block) -> Result<Vec<u8>,DYNERR> {
        trace!("reading {}", addr);
        match addr {
            Block::CPM((_block, _bsh, off)) => {
                let trk = match self.tracks.get(off as usize) {
                    Some(t) => t,
                    None => return Err(Box::new(img::Error::TrackAccess))
                };
                let secs_per_track = trk.sectors.len();
                let sector_shift = match trk.sectors.first() {
                    Some(s) => s.header.sector_shift,
                    None => return Err(Box::new(img::Error::SectorAccess))
                };
                let deblocked = addr.get_lsecs(secs_per_track << sector_shift);
                let chs_list = skew::cpm_blocking(deblocked, sector_shift, self.heads)?;
                let skew_table = self.get_skew(secs_per_track);
                let mut ans: Vec<u8> = Vec::new();
                for [cyl, head, lsec] in chs_list {
                    ans.append(&mut self.read_sector(cyl, head, skew_table[lsec-1])?);
                }
                Ok(ans)
            },
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn write_block(&mut self, addr: Block, dat: &[u8]) -> STDRESULT {
        trace!("writing {}", addr);
        match addr {
            Block::CPM((_block, _bsh, off)) => {
                let trk = match self.tracks.get(off as usize) {
                    Some(t) => t,
                    None => return Err(Box::new(img::Error::TrackAccess))
                };
                let secs_per_track = trk.sectors.len();
                let sector_shift = match trk.sectors.first() {
                    Some(s) => s.header.sector_shift,
                    None => return Err(Box::new(img::Error::SectorAccess))
                };
                let deblocked = addr.get_lsecs(secs_per_track << sector_shift);
                let chs_list = skew::cpm_blocking(deblocked, sector_shift, self.heads)?;
                let skew_table = self.get_skew(secs_per_track);
                let psec_size = SECTOR_SIZE_BASE << sector_shift;
                let padded = img::quantize_block(dat, chs_list.len() * psec_size);
                let mut src = 0;
                for [cyl, head, lsec] in chs_list {
                    self.write_sector(cyl, head, skew_table[lsec-1], &padded[src..src+psec_size])?;
                    src += psec_size;
                }
                Ok(())
            },
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn read_sector(&mut self, cyl: usize, head: usize, sec: usize) -> Result<Vec<u8>,DYNERR> {
        trace!("seeking sector {} (R)", sec);
        let trk = self.get_track_ref(cyl, head)?;
        for curr in &trk.sectors {
            if sec == curr.header.id as usize {
                return match curr.header.flags & NO_DATA_MASK {
                    0 => Ok(curr.unpack()?),
                    _ => {
                        debug!("cyl {} head {} sector {}: no data available", cyl, head, sec);
                        Err(Box::new(img::Error::SectorAccess))
                    }
                };
            }
        }
        error!("sector {} not found", sec);
        Err(Box::new(img::Error::SectorAccess))
    }
    fn write_sector(&mut self, cyl: usize, head: usize, sec: usize, dat: &[u8]) -> STDRESULT {
        trace!("seeking sector {} (W)", sec);
        let trk = self.get_track_mut(cyl, head)?;
        for curr in &mut trk.sectors {
            if sec == curr.header.id as usize {
                let quantum = SECTOR_SIZE_BASE << curr.header.sector_shift;
                return curr.pack(&img::quantize_block(dat, quantum));
            }
        }
        error!("sector {} not found", sec);
        Err(Box::new(img::Error::SectorAccess))
    }
    fn get_track_buf(&mut self, cyl: usize, head: usize) -> Result<Vec<u8>,DYNERR> {
        let trk = self.get_track_ref(cyl, head)?;
        let mut ids: Vec<usize> = trk.sectors.iter().map(|s| s.header.id as usize).collect();
        ids.sort_unstable();
        let mut ans = Vec::new();
        for id in ids {
            ans.append(&mut self.read_sector(cyl, head, id)?);
        }
        Ok(ans)
    }
    fn set_track_buf(&mut self, cyl: usize, head: usize, dat: &[u8]) -> STDRESULT {
        let trk = self.get_track_ref(cyl, head)?;
        let mut ids: Vec<(usize,usize)> = trk.sectors.iter()
            .map(|s| (s.header.id as usize, SECTOR_SIZE_BASE << s.header.sector_shift)).collect();
        ids.sort_unstable();
        let mut mark = 0;
        for (id, size) in ids {
            if mark + size > dat.len() {
                return Err(Box::new(img::Error::TrackAccess));
            }
            self.write_sector(cyl, head, id, &dat[mark..mark+size])?;
            mark += size;
        }
        Ok(())
    }
}
