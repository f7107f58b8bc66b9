//! ## Support for CopyQM disk images (CQM)
//!
//! A CopyQM image is a 133-byte header, an optional comment, and the raw
//! sector data compressed with the classic 4K-ring LZSS of `codec::lzss`.
//! The whole image is decompressed at open and indexed linearly through
//! the geometry oracle; `to_bytes` compresses it back.

use log::{debug,info};
use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use crate::img;
use crate::img::geometry::{FormatDescriptor,SectorCount,SideOrder,Skew};
use crate::codec::lzss;
use crate::fs::Block;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::{STDRESULT,DYNERR};

pub const MAGIC: [u8;3] = [b'C', b'Q', 0x14];
pub const HEADER_LEN: usize = 133;

pub fn file_extensions() -> Vec<String> {
    vec!["cqm".to_string(),"cq".to_string()]
}

#[derive(DiskStruct)]
pub struct Header {
    magic: [u8;3],
    sector_size: [u8;2],
    reserved1: [u8;6],
    sector_count: [u8;2],
    reserved2: [u8;3],
    sectors_per_track: [u8;2],
    heads: [u8;2],
    /// BPB image and other fields we carry but do not interpret
    bpb: [u8;68],
    reserved3: [u8;23],
    comment_length: [u8;2],
    sector_base: u8,
    interleave: u8,
    skew: u8,
    used_cylinders: u8,
    total_cylinders: u8,
    crc: [u8;4],
    label: [u8;11]
}

/// Wrapper for CopyQM data, held decompressed.
pub struct Cqm {
    header: Header,
    comment: String,
    geom: FormatDescriptor,
    data: Vec<u8>,
    diags: DiagnosisList
}

impl Cqm {
    /// Create a blank image with the given uniform geometry, e.g. as the
    /// destination of a format conversion.
    pub fn create(geom: FormatDescriptor) -> Self {
        let cyls = geom.cylinders;
        let spt = geom.sectors_on(0);
        Self {
            header: Header {
                magic: MAGIC,
                sector_size: u16::to_le_bytes(geom.bytes_per_sector as u16),
                reserved1: [0;6],
                sector_count: u16::to_le_bytes((cyls * geom.heads * spt) as u16),
                reserved2: [0;3],
                sectors_per_track: u16::to_le_bytes(spt as u16),
                heads: u16::to_le_bytes(geom.heads as u16),
                bpb: [0;68],
                reserved3: [0;23],
                comment_length: [0,0],
                sector_base: (geom.first_sector_id as u8).saturating_sub(1),
                interleave: 1,
                skew: 0,
                used_cylinders: cyls as u8,
                total_cylinders: cyls as u8,
                crc: [0;4],
                label: *b"** NONE ** "
            },
            comment: String::new(),
            geom,
            data: vec![0; geom.total_bytes()],
            diags: DiagnosisList::new()
        }
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DiskStructError> {
        if buf.len() < HEADER_LEN {
            return Err(DiskStructError::OutOfData);
        }
        let header = Header::from_bytes(&buf[0..HEADER_LEN])?;
        if header.magic != MAGIC {
            return Err(DiskStructError::UnexpectedValue);
        }
        let sector_size = u16::from_le_bytes(header.sector_size) as usize;
        let spt = u16::from_le_bytes(header.sectors_per_track) as usize;
        let heads = u16::from_le_bytes(header.heads) as usize;
        let cyls = header.used_cylinders as usize;
        if sector_size == 0 || spt == 0 || heads == 0 || cyls == 0 {
            return Err(DiskStructError::IllegalValue);
        }
        let comment_len = u16::from_le_bytes(header.comment_length) as usize;
        if HEADER_LEN + comment_len > buf.len() {
            return Err(DiskStructError::OutOfData);
        }
        let comment = String::from_utf8_lossy(&buf[HEADER_LEN..HEADER_LEN+comment_len]).to_string();
        if comment.len() > 0 {
            debug!("CQM comment `{}`", comment);
        }
        info!("CQM: {} cylinders, {} heads, {} x {}", cyls, heads, spt, sector_size);
        let expected = cyls * heads * spt * sector_size;
        let mut diags = DiagnosisList::new();
        let mut data = match lzss::unpack(&buf[HEADER_LEN+comment_len..], expected) {
            Ok(d) => d,
            Err(e) => {
                debug!("CQM decompression failed: {}", e);
                return Err(DiskStructError::UnexpectedValue);
            }
        };
        if data.len() < expected {
            diags.add(Code::TruncatedInput, Severity::Warning,
                &format!("compressed stream ended {} bytes early", expected - data.len()));
            data.resize(expected, 0);
        }
        let geom = FormatDescriptor {
            cylinders: cyls,
            heads,
            sectors: SectorCount::Uniform(spt),
            bytes_per_sector: sector_size,
            first_sector_id: header.sector_base as usize + 1,
            side_order: SideOrder::Alternating,
            skew: Skew::Logical
        };
        Ok(Self {
            header,
            comment,
            geom,
            data,
            diags
        })
    }
    pub fn comment(&self) -> &str {
        &self.comment
    }
    /// records per track for CP/M blocking
    fn records_per_track(&self) -> usize {
        self.geom.sectors_on(0) * self.geom.bytes_per_sector / 128
    }
    fn record_offset(&self, trk: usize, lsec: usize) -> usize {
        let track_bytes = self.geom.sectors_on(0) * self.geom.bytes_per_sector;
        trk * track_bytes + (lsec - 1) * 128
    }
}

impl img::DiskImage for Cqm {
    fn track_count(&self) -> usize {
        self.geom.track_count()
    }
    fn num_heads(&self) -> usize {
        self.geom.heads
    }
    fn byte_capacity(&self) -> usize {
        self.data.len()
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::CQM
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn geometry(&self) -> Option<FormatDescriptor> {
        Some(self.geom)
    }
    fn diagnostics(&self) -> DiagnosisList {
        self.diags.clone()
    }
    fn to_bytes(&mut self) -> Vec<u8> {
        let mut ans = self.header.to_bytes();
        ans.extend_from_slice(self.comment.as_bytes());
        ans.append(&mut lzss::pack(&self.data));
        ans
    }
    fn read_block(&mut self, addr: Block) -> Result<Vec<u8>,DYNERR> {
        match addr {
            Block::CPM((_b,_bsh,_off)) => {
                let mut ans = Vec::new();
                for [t,lsec] in addr.get_lsecs(self.records_per_track()) {
                    let offset = self.record_offset(t, lsec);
                    if offset + 128 > self.data.len() {
                        return Err(Box::new(img::Error::SectorAccess));
                    }
                    ans.extend_from_slice(&self.data[offset..offset+128]);
                }
                Ok(ans)
            },
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn write_block(&mut self, addr: Block, dat: &[u8]) -> STDRESULT {
        match addr {
            Block::CPM((_b,_bsh,_off)) => {
                let ts_list = addr.get_lsecs(self.records_per_track());
                let padded = img::quantize_block(dat, ts_list.len() * 128);
                let mut src = 0;
                for [t,lsec] in ts_list {
                    let offset = self.record_offset(t, lsec);
                    if offset + 128 > self.data.len() {
                        return Err(Box::new(img::Error::SectorAccess));
                    }
                    self.data[offset..offset+128].copy_from_slice(&padded[src..src+128]);
                    src += 128;
                }
                Ok(())
            },
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn read_sector(&mut self, cyl: usize, head: usize, sec: usize) -> Result<Vec<u8>,DYNERR> {
        match self.geom.offset(cyl, head, sec) {
            Some(offset) => Ok(self.data[offset..offset+self.geom.bytes_per_sector].to_vec()),
            None => Err(Box::new(img::Error::SectorAccess))
        }
    }
    fn write_sector(&mut self, cyl: usize, head: usize, sec: usize, dat: &[u8]) -> STDRESULT {
        match self.geom.offset(cyl, head, sec) {
            Some(offset) => {
                let padded = img::quantize_block(dat, self.geom.bytes_per_sector);
                self.data[offset..offset+self.geom.bytes_per_sector].copy_from_slice(&padded);
                Ok(())
            },
            None => Err(Box::new(img::Error::SectorAccess))
        }
    }
    fn get_track_buf(&mut self, cyl: usize, head: usize) -> Result<Vec<u8>,DYNERR> {
        match self.geom.track_offset(cyl, head) {
            Some(offset) => {
                let len = self.geom.sectors_on(cyl) * self.geom.bytes_per_sector;
                Ok(self.data[offset..offset+len].to_vec())
            },
            None => Err(Box::new(img::Error::TrackAccess))
        }
    }
    fn set_track_buf(&mut self, cyl: usize, head: usize, dat: &[u8]) -> STDRESULT {
        match self.geom.track_offset(cyl, head) {
            Some(offset) => {
                let len = self.geom.sectors_on(cyl) * self.geom.bytes_per_sector;
                if dat.len() != len {
                    return Err(Box::new(img::Error::TrackAccess));
                }
                self.data[offset..offset+len].copy_from_slice(dat);
                Ok(())
            },
            None => Err(Box::new(img::Error::TrackAccess))
        }
    }
}
