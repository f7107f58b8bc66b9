//! ## Support for ATR disk images (Atari 8-bit)
//!
//! An ATR file is a 16-byte header followed by the raw sector stream.
//! Sector numbering starts at 1.  Double density images usually keep the
//! convention that the three boot sectors are 128 bytes even though the
//! rest of the disk is 256; both conventions are recognized by size.

use log::{debug,info,error};
use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use crate::img;
use crate::img::geometry::{self,FormatDescriptor,SectorCount,SideOrder,Skew};
use crate::fs::Block;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::{STDRESULT,DYNERR};

pub const MAGIC: [u8;2] = [0x96, 0x02];
const HEADER_LEN: usize = 16;

pub fn file_extensions() -> Vec<String> {
    vec!["atr".to_string()]
}

#[derive(DiskStruct)]
pub struct Header {
    magic: [u8;2],
    /// image size in 16-byte paragraphs, low word
    paragraphs: [u8;2],
    sector_size: [u8;2],
    /// bits 16-23 of the paragraph count
    paragraphs_high: u8,
    flags: u8,
    bad_sector: [u8;2],
    spare: [u8;6]
}

/// Wrapper for ATR data.
pub struct Atr {
    header: Header,
    geom: FormatDescriptor,
    /// three 128-byte boot sectors on a 256-byte disk
    short_boot: bool,
    data: Vec<u8>,
    diags: DiagnosisList
}

impl Atr {
    /// Create a blank single or double density disk.
    pub fn create(double_density: bool) -> Self {
        let geom = match double_density {
            false => geometry::ATARI_SD,
            true => geometry::ATARI_DD
        };
        let short_boot = double_density;
        let data_len = match short_boot {
            true => geom.total_bytes() - 3 * 128,
            false => geom.total_bytes()
        };
        let paragraphs = (data_len / 16) as u32;
        Self {
            header: Header {
                magic: MAGIC,
                paragraphs: u16::to_le_bytes((paragraphs & 0xffff) as u16),
                sector_size: u16::to_le_bytes(geom.bytes_per_sector as u16),
                paragraphs_high: (paragraphs >> 16) as u8,
                flags: 0,
                bad_sector: [0,0],
                spare: [0;6]
            },
            geom,
            short_boot,
            data: vec![0; data_len],
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
        let mut diags = DiagnosisList::new();
        let paragraphs = u16::from_le_bytes(header.paragraphs) as usize
            + ((header.paragraphs_high as usize) << 16);
        let declared = paragraphs * 16;
        let sector_size = u16::from_le_bytes(header.sector_size) as usize;
        let (total_sectors, short_boot) = match sector_size {
            128 => (declared / 128, false),
            256 => match declared % 256 {
                // 3 short boot sectors leave a half-sector remainder
                128 => ((declared + 3 * 128) / 256, true),
                _ => (declared / 256, false)
            },
            _ => return Err(DiskStructError::IllegalValue)
        };
        info!("ATR: {} sectors of {}", total_sectors, sector_size);
        let geom = match (total_sectors, sector_size) {
            (720, 128) => geometry::ATARI_SD,
            (720, 256) => geometry::ATARI_DD,
            (n, s) => {
                debug!("nonstandard ATR with {} sectors", n);
                FormatDescriptor {
                    cylinders: 1,
                    heads: 1,
                    sectors: SectorCount::Uniform(n),
                    bytes_per_sector: s,
                    first_sector_id: 1,
                    side_order: SideOrder::Alternating,
                    skew: Skew::None
                }
            }
        };
        let mut data = buf[HEADER_LEN..].to_vec();
        if data.len() < declared {
            diags.add(Code::TruncatedInput, Severity::Warning,
                &format!("ATR data is {} bytes short of the header's claim", declared - data.len()));
            data.resize(declared, 0);
        }
        Ok(Self {
            header,
            geom,
            short_boot,
            data,
            diags
        })
    }
    /// Linear offset and length of an absolute sector, numbered from 1.
    fn sector_window(&self, num: usize) -> Result<(usize,usize),DYNERR> {
        let spt = self.geom.sectors_on(0);
        let total = self.geom.cylinders * spt;
        if num < 1 || num > total {
            error!("sector {} out of range", num);
            return Err(Box::new(img::Error::SectorAccess));
        }
        let size = self.geom.bytes_per_sector;
        match self.short_boot {
            false => Ok(((num-1) * size, size)),
            true => match num {
                1..=3 => Ok(((num-1) * 128, 128)),
                _ => Ok((3 * 128 + (num-4) * size, size))
            }
        }
    }
    pub fn read_abs_sector(&self, num: usize) -> Result<Vec<u8>,DYNERR> {
        let (offset, len) = self.sector_window(num)?;
        if offset + len > self.data.len() {
            return Err(Box::new(img::Error::SectorAccess));
        }
        Ok(self.data[offset..offset+len].to_vec())
    }
    pub fn write_abs_sector(&mut self, num: usize, dat: &[u8]) -> STDRESULT {
        let (offset, len) = self.sector_window(num)?;
        if offset + len > self.data.len() {
            return Err(Box::new(img::Error::SectorAccess));
        }
        let padded = img::quantize_block(dat, len);
        self.data[offset..offset+len].copy_from_slice(&padded);
        Ok(())
    }
}

impl img::DiskImage for Atr {
    fn track_count(&self) -> usize {
        self.geom.track_count()
    }
    fn num_heads(&self) -> usize {
        1
    }
    fn byte_capacity(&self) -> usize {
        self.data.len()
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::ATR
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
        ans.append(&mut self.data.clone());
        ans
    }
    fn read_block(&mut self, addr: Block) -> Result<Vec<u8>,DYNERR> {
        match addr {
            Block::Atari(num) => self.read_abs_sector(num),
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn write_block(&mut self, addr: Block, dat: &[u8]) -> STDRESULT {
        match addr {
            Block::Atari(num) => self.write_abs_sector(num, dat),
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn read_sector(&mut self, cyl: usize, head: usize, sec: usize) -> Result<Vec<u8>,DYNERR> {
        if head > 0 || cyl >= self.geom.cylinders {
            return Err(Box::new(img::Error::SectorAccess));
        }
        self.read_abs_sector(cyl * self.geom.sectors_on(cyl) + sec)
    }
    fn write_sector(&mut self, cyl: usize, head: usize, sec: usize, dat: &[u8]) -> STDRESULT {
        if head > 0 || cyl >= self.geom.cylinders {
            return Err(Box::new(img::Error::SectorAccess));
        }
        self.write_abs_sector(cyl * self.geom.sectors_on(cyl) + sec, dat)
    }
    fn get_track_buf(&mut self, cyl: usize, head: usize) -> Result<Vec<u8>,DYNERR> {
        if head > 0 || cyl >= self.geom.cylinders {
            return Err(Box::new(img::Error::TrackAccess));
        }
        let mut ans = Vec::new();
        let spt = self.geom.sectors_on(cyl);
        for s in 1..=spt {
            ans.append(&mut self.read_abs_sector(cyl * spt + s)?);
        }
        Ok(ans)
    }
    fn set_track_buf(&mut self, cyl: usize, head: usize, dat: &[u8]) -> STDRESULT {
        if head > 0 || cyl >= self.geom.cylinders {
            return Err(Box::new(img::Error::TrackAccess));
        }
        let spt = self.geom.sectors_on(cyl);
        let mut mark = 0;
        for s in 1..=spt {
            let (_off, len) = self.sector_window(cyl * spt + s)?;
            if mark + len > dat.len() {
                return Err(Box::new(img::Error::TrackAccess));
            }
            self.write_abs_sector(cyl * spt + s, &dat[mark..mark+len])?;
            mark += len;
        }
        Ok(())
    }
}
