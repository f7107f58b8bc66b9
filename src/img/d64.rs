//! ## Support for D64 disk images (Commodore 1541)
//!
//! A D64 is the decoded sector data of a 1541 disk in track order, with
//! the zone-variable sector counts of the original drive.  Four canonical
//! sizes exist: 35 or 40 tracks, with or without a trailing per-sector
//! error byte region left behind by the original copy programs.
//!
//! The CBM directory and BAM live up in `fs::cbm`; this layer only moves
//! sectors.  Error bytes are surfaced as diagnoses and kept for rewrite.

use log::{debug,info};
use a2kit_macro::DiskStructError;
use crate::img;
use crate::img::geometry::{self,FormatDescriptor};
use crate::fs::Block;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::{STDRESULT,DYNERR};

pub const SECTOR_SIZE: usize = 256;
pub const SIZE_35: usize = 174848;
pub const SIZE_35_ERRORS: usize = 175531;
pub const SIZE_40: usize = 196608;
pub const SIZE_40_ERRORS: usize = 197376;

pub fn file_extensions() -> Vec<String> {
    vec!["d64".to_string()]
}

/// total sectors on a disk with the given track count
fn total_sectors(tracks: usize) -> usize {
    let mut ans = 0;
    for t in 0..tracks {
        ans += geometry::D64_ZONES[t];
    }
    ans
}

/// Wrapper for D64 data.
pub struct D64 {
    geom: FormatDescriptor,
    data: Vec<u8>,
    /// per-sector error codes when the image carries them
    error_bytes: Option<Vec<u8>>,
    diags: DiagnosisList
}

impl D64 {
    /// Create a blank 35 track disk; `fs::cbm` formats it.
    pub fn create(tracks: usize) -> Self {
        let geom = match tracks {
            40 => geometry::D64_40,
            _ => geometry::D64_35
        };
        Self {
            geom,
            data: vec![0; geom.total_bytes()],
            error_bytes: None,
            diags: DiagnosisList::new()
        }
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DiskStructError> {
        let (geom, has_errors) = match buf.len() {
            SIZE_35 => (geometry::D64_35, false),
            SIZE_35_ERRORS => (geometry::D64_35, true),
            SIZE_40 => (geometry::D64_40, false),
            SIZE_40_ERRORS => (geometry::D64_40, true),
            _ => {
                debug!("image size {} is not a D64", buf.len());
                return Err(DiskStructError::UnexpectedSize);
            }
        };
        info!("D64: {} tracks{}", geom.cylinders, match has_errors { true => " with error bytes", false => "" });
        let sector_count = total_sectors(geom.cylinders);
        let data_len = sector_count * SECTOR_SIZE;
        let mut diags = DiagnosisList::new();
        let error_bytes = match has_errors {
            false => None,
            true => {
                let region = buf[data_len..].to_vec();
                for (idx, code) in region.iter().enumerate() {
                    // 0x00 and 0x01 both mean no error on this sector
                    if *code > 1 {
                        if let Some((cyl, _h, sec)) = geom.locate(idx * SECTOR_SIZE) {
                            diags.add_sector(Code::ErrorByte, Severity::Error, cyl + 1, sec,
                                &format!("drive reported error code {}", code));
                        }
                    }
                }
                Some(region)
            }
        };
        Ok(Self {
            geom,
            data: buf[0..data_len].to_vec(),
            error_bytes,
            diags
        })
    }
    /// Error code for a sector, if the image carries the region.
    pub fn error_byte(&self, cyl: usize, sec: usize) -> Option<u8> {
        match (&self.error_bytes, self.geom.offset(cyl, 0, sec)) {
            (Some(region), Some(offset)) => Some(region[offset / SECTOR_SIZE]),
            _ => None
        }
    }
    pub fn num_tracks(&self) -> usize {
        self.geom.cylinders
    }
    /// Sector count on a track numbered from 1, range checked.
    pub fn sectors_on_track(&self, track: usize) -> Result<usize,DYNERR> {
        if track < 1 || track > self.geom.cylinders {
            return Err(Box::new(img::Error::GeometryMismatch));
        }
        Ok(self.geom.sectors_on(track - 1))
    }
}

impl img::DiskImage for D64 {
    fn track_count(&self) -> usize {
        self.geom.cylinders
    }
    fn num_heads(&self) -> usize {
        1
    }
    fn byte_capacity(&self) -> usize {
        self.data.len()
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::D64
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
        let mut ans = self.data.clone();
        if let Some(region) = &self.error_bytes {
            ans.append(&mut region.clone());
        }
        ans
    }
    fn read_block(&mut self, addr: Block) -> Result<Vec<u8>,DYNERR> {
        match addr {
            // CBM blocks count tracks from 1
            Block::CBM([t,s]) => self.read_sector(t - 1, 0, s),
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn write_block(&mut self, addr: Block, dat: &[u8]) -> STDRESULT {
        match addr {
            Block::CBM([t,s]) => self.write_sector(t - 1, 0, s, dat),
            _ => Err(Box::new(img::Error::ImageTypeMismatch))
        }
    }
    fn read_sector(&mut self, cyl: usize, head: usize, sec: usize) -> Result<Vec<u8>,DYNERR> {
        if head > 0 {
            return Err(Box::new(img::Error::SectorAccess));
        }
        match self.geom.offset(cyl, head, sec) {
            Some(offset) => Ok(self.data[offset..offset+SECTOR_SIZE].to_vec()),
            None => {
                debug!("cannot access cyl {} sector {}", cyl, sec);
                Err(Box::new(img::Error::SectorAccess))
            }
        }
    }
    fn write_sector(&mut self, cyl: usize, head: usize, sec: usize, dat: &[u8]) -> STDRESULT {
        if head > 0 {
            return Err(Box::new(img::Error::SectorAccess));
        }
        match self.geom.offset(cyl, head, sec) {
            Some(offset) => {
                let padded = img::quantize_block(dat, SECTOR_SIZE);
                self.data[offset..offset+SECTOR_SIZE].copy_from_slice(&padded);
                // a rewritten sector is a good sector
                if let Some(region) = &mut self.error_bytes {
                    region[offset / SECTOR_SIZE] = 1;
                }
                Ok(())
            },
            None => {
                debug!("cannot access cyl {} sector {}", cyl, sec);
                Err(Box::new(img::Error::SectorAccess))
            }
        }
    }
    fn get_track_buf(&mut self, cyl: usize, head: usize) -> Result<Vec<u8>,DYNERR> {
        if head > 0 {
            return Err(Box::new(img::Error::TrackAccess));
        }
        match self.geom.track_offset(cyl, head) {
            Some(offset) => {
                let len = self.geom.sectors_on(cyl) * SECTOR_SIZE;
                Ok(self.data[offset..offset+len].to_vec())
            },
            None => Err(Box::new(img::Error::TrackAccess))
        }
    }
    fn set_track_buf(&mut self, cyl: usize, head: usize, dat: &[u8]) -> STDRESULT {
        if head > 0 {
            return Err(Box::new(img::Error::TrackAccess));
        }
        match self.geom.track_offset(cyl, head) {
            Some(offset) => {
                let len = self.geom.sectors_on(cyl) * SECTOR_SIZE;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::DiskImage;

    #[test]
    fn canonical_sizes() {
        assert_eq!(total_sectors(35) * SECTOR_SIZE, SIZE_35);
        assert_eq!(total_sectors(35) * SECTOR_SIZE + total_sectors(35), SIZE_35_ERRORS);
        assert_eq!(total_sectors(40) * SECTOR_SIZE, SIZE_40);
        assert_eq!(total_sectors(40) * SECTOR_SIZE + total_sectors(40), SIZE_40_ERRORS);
    }

    #[test]
    fn error_region_diagnoses() {
        let mut buf = vec![0u8; SIZE_35_ERRORS];
        // error code 5 (data checksum) on track 1 sector 3
        buf[SIZE_35 + 3] = 5;
        let d64 = D64::from_bytes(&buf).unwrap();
        assert_eq!(d64.diagnostics().entries().len(), 1);
        assert_eq!(d64.error_byte(0, 3), Some(5));
        assert_eq!(d64.error_byte(0, 0), Some(0));
    }
}
