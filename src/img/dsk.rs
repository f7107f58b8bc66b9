//! ## Support for raw sector dumps (DSK, DO, PO, IMG)
//!
//! These images are a simple sequential dump of already-decoded sector
//! data; everything depends on the declared geometry and on which order
//! the sectors were dumped in.  The ordering cannot be verified until the
//! file system layer runs its heuristics, so `from_bytes` is always driven
//! by a caller who knows (or is guessing) the geometry.

use log::{error,trace};
use crate::img;
use crate::img::geometry::FormatDescriptor;
use crate::fs::Block;
use crate::bios::skew;
use crate::{STDRESULT,DYNERR};

pub fn file_extensions() -> Vec<String> {
    vec!["dsk".to_string(),"do".to_string(),"po".to_string(),"img".to_string()]
}

/// How the sectors were dumped.
#[derive(PartialEq,Eq,Clone,Copy)]
pub enum SectorOrder {
    /// DOS 3.3 logical order (DO)
    Dos33Logical,
    /// ProDOS block order (PO)
    ProdosBlocks,
    /// straight physical order, which for CP/M images is also record order
    Linear
}

/// Wrapper for raw sector data.
pub struct Dsk {
    geom: FormatDescriptor,
    order: SectorOrder,
    data: Vec<u8>
}

impl Dsk {
    /// Create a zero-filled image; file systems format it from here.
    pub fn create(geom: FormatDescriptor, order: SectorOrder) -> Self {
        Self {
            geom,
            order,
            data: vec![0; geom.total_bytes()]
        }
    }
    /// Wrap existing data; refused if the size does not match the geometry.
    pub fn from_bytes(dat: &[u8], geom: FormatDescriptor, order: SectorOrder) -> Result<Self,img::Error> {
        if dat.len() != geom.total_bytes() {
            return Err(img::Error::ImageSizeMismatch);
        }
        Ok(Self {
            geom,
            order,
            data: dat.to_vec()
        })
    }
    fn slice(&self, offset: usize, len: usize) -> Result<Vec<u8>,DYNERR> {
        if offset + len > self.data.len() {
            return Err(Box::new(img::Error::SectorAccess));
        }
        Ok(self.data[offset..offset+len].to_vec())
    }
    fn splice(&mut self, offset: usize, dat: &[u8]) -> STDRESULT {
        if offset + dat.len() > self.data.len() {
            return Err(Box::new(img::Error::SectorAccess));
        }
        self.data[offset..offset+dat.len()].copy_from_slice(dat);
        Ok(())
    }
    /// records per track for CP/M blocking
    fn records_per_track(&self) -> usize {
        self.geom.sectors_on(0) * self.geom.bytes_per_sector / 128
    }
}

impl img::DiskImage for Dsk {
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
        img::DiskImageType::DSK
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn geometry(&self) -> Option<FormatDescriptor> {
        Some(self.geom)
    }
    fn to_bytes(&mut self) -> Vec<u8> {
        self.data.clone()
    }
    fn read_block(&mut self, addr: Block) -> Result<Vec<u8>,DYNERR> {
        trace!("read {}", addr);
        let sector_size = self.geom.bytes_per_sector;
        match addr {
            Block::DOS33([t,s]) => {
                // a DO dump is already in logical order
                if self.order != SectorOrder::Dos33Logical {
                    return Err(Box::new(img::Error::ImageTypeMismatch));
                }
                self.slice((t * self.geom.sectors_on(t) + s) * sector_size, sector_size)
            },
            Block::PO(block) => match self.order {
                SectorOrder::ProdosBlocks => self.slice(block * 512, 512),
                SectorOrder::Dos33Logical => {
                    let mut ans = Vec::new();
                    for [t,s] in skew::ts_from_prodos_block(block) {
                        ans.append(&mut self.slice((t * 16 + s) * sector_size, sector_size)?);
                    }
                    Ok(ans)
                },
                SectorOrder::Linear => Err(Box::new(img::Error::ImageTypeMismatch))
            },
            Block::CPM((_b,_bsh,_off)) => {
                if self.order != SectorOrder::Linear {
                    return Err(Box::new(img::Error::ImageTypeMismatch));
                }
                let mut ans = Vec::new();
                for [t,lsec] in addr.get_lsecs(self.records_per_track()) {
                    let track_bytes = self.geom.sectors_on(0) * sector_size;
                    ans.append(&mut self.slice(t * track_bytes + (lsec-1) * 128, 128)?);
                }
                Ok(ans)
            },
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn write_block(&mut self, addr: Block, dat: &[u8]) -> STDRESULT {
        trace!("write {}", addr);
        let sector_size = self.geom.bytes_per_sector;
        match addr {
            Block::DOS33([t,s]) => {
                if self.order != SectorOrder::Dos33Logical {
                    return Err(Box::new(img::Error::ImageTypeMismatch));
                }
                let padded = img::quantize_block(dat, sector_size);
                self.splice((t * self.geom.sectors_on(t) + s) * sector_size, &padded)
            },
            Block::PO(block) => match self.order {
                SectorOrder::ProdosBlocks => {
                    let padded = img::quantize_block(dat, 512);
                    self.splice(block * 512, &padded)
                },
                SectorOrder::Dos33Logical => {
                    let padded = img::quantize_block(dat, 512);
                    let mut src = 0;
                    for [t,s] in skew::ts_from_prodos_block(block) {
                        self.splice((t * 16 + s) * sector_size, &padded[src..src+sector_size])?;
                        src += sector_size;
                    }
                    Ok(())
                },
                SectorOrder::Linear => Err(Box::new(img::Error::ImageTypeMismatch))
            },
            Block::CPM((_b,_bsh,_off)) => {
                if self.order != SectorOrder::Linear {
                    return Err(Box::new(img::Error::ImageTypeMismatch));
                }
                let ts_list = addr.get_lsecs(self.records_per_track());
                let padded = img::quantize_block(dat, ts_list.len() * 128);
                let track_bytes = self.geom.sectors_on(0) * sector_size;
                let mut src = 0;
                for [t,lsec] in ts_list {
                    self.splice(t * track_bytes + (lsec-1) * 128, &padded[src..src+128])?;
                    src += 128;
                }
                Ok(())
            },
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn read_sector(&mut self, cyl: usize, head: usize, sec: usize) -> Result<Vec<u8>,DYNERR> {
        match self.geom.offset(cyl, head, sec) {
            Some(offset) => self.slice(offset, self.geom.bytes_per_sector),
            None => {
                error!("exceeded bounds: cyl {} head {} sector {}", cyl, head, sec);
                Err(Box::new(img::Error::SectorAccess))
            }
        }
    }
    fn write_sector(&mut self, cyl: usize, head: usize, sec: usize, dat: &[u8]) -> STDRESULT {
        match self.geom.offset(cyl, head, sec) {
            Some(offset) => {
                let padded = img::quantize_block(dat, self.geom.bytes_per_sector);
                self.splice(offset, &padded)
            },
            None => {
                error!("exceeded bounds: cyl {} head {} sector {}", cyl, head, sec);
                Err(Box::new(img::Error::SectorAccess))
            }
        }
    }
    fn get_track_buf(&mut self, cyl: usize, head: usize) -> Result<Vec<u8>,DYNERR> {
        match self.geom.track_offset(cyl, head) {
            Some(offset) => {
                let len = self.geom.sectors_on(cyl) * self.geom.bytes_per_sector;
                self.slice(offset, len)
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
                self.splice(offset, dat)
            },
            None => Err(Box::new(img::Error::TrackAccess))
        }
    }
}
