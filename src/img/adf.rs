//! ## Support for ADF disk images (Amiga)
//!
//! A plain 880 KiB dump of an Amiga 3.5 inch disk, 80 cylinders by 2 heads
//! by 11 sectors of 512 bytes, no header.  The Amiga file systems are out
//! of scope here; the container exists as the decompression target for DMS
//! archives and as a conversion endpoint.

use log::error;
use a2kit_macro::DiskStructError;
use crate::img;
use crate::img::geometry::{self,FormatDescriptor};
use crate::fs::Block;
use crate::{STDRESULT,DYNERR};

pub const ADF_SIZE: usize = 901120;

pub fn file_extensions() -> Vec<String> {
    vec!["adf".to_string()]
}

/// Wrapper for ADF data.
pub struct Adf {
    geom: FormatDescriptor,
    data: Vec<u8>
}

impl Adf {
    pub fn create() -> Self {
        Self {
            geom: geometry::AMIGA_880K,
            data: vec![0; ADF_SIZE]
        }
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DiskStructError> {
        if buf.len() != ADF_SIZE {
            return Err(DiskStructError::UnexpectedSize);
        }
        Ok(Self {
            geom: geometry::AMIGA_880K,
            data: buf.to_vec()
        })
    }
}

impl img::DiskImage for Adf {
    fn track_count(&self) -> usize {
        self.geom.track_count()
    }
    fn num_heads(&self) -> usize {
        2
    }
    fn byte_capacity(&self) -> usize {
        self.data.len()
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::ADF
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
    fn read_block(&mut self, _addr: Block) -> Result<Vec<u8>,DYNERR> {
        Err(Box::new(img::Error::ImageTypeMismatch))
    }
    fn write_block(&mut self, _addr: Block, _dat: &[u8]) -> STDRESULT {
        Err(Box::new(img::Error::ImageTypeMismatch))
    }
    fn read_sector(&mut self, cyl: usize, head: usize, sec: usize) -> Result<Vec<u8>,DYNERR> {
        match self.geom.offset(cyl, head, sec) {
            Some(offset) => Ok(self.data[offset..offset+512].to_vec()),
            None => {
                error!("exceeded bounds: cyl {} head {} sector {}", cyl, head, sec);
                Err(Box::new(img::Error::SectorAccess))
            }
        }
    }
    fn write_sector(&mut self, cyl: usize, head: usize, sec: usize, dat: &[u8]) -> STDRESULT {
        match self.geom.offset(cyl, head, sec) {
            Some(offset) => {
                let padded = img::quantize_block(dat, 512);
                self.data[offset..offset+512].copy_from_slice(&padded);
                Ok(())
            },
            None => {
                error!("exceeded bounds: cyl {} head {} sector {}", cyl, head, sec);
                Err(Box::new(img::Error::SectorAccess))
            }
        }
    }
    fn get_track_buf(&mut self, cyl: usize, head: usize) -> Result<Vec<u8>,DYNERR> {
        match self.geom.track_offset(cyl, head) {
            Some(offset) => Ok(self.data[offset..offset+11*512].to_vec()),
            None => Err(Box::new(img::Error::TrackAccess))
        }
    }
    fn set_track_buf(&mut self, cyl: usize, head: usize, dat: &[u8]) -> STDRESULT {
        if dat.len() != 11*512 {
            return Err(Box::new(img::Error::TrackAccess));
        }
        match self.geom.track_offset(cyl, head) {
            Some(offset) => {
                self.data[offset..offset+11*512].copy_from_slice(dat);
                Ok(())
            },
            None => Err(Box::new(img::Error::TrackAccess))
        }
    }
}
