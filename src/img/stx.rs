//! ## Support for STX disk images (Atari ST Pasti)
//!
//! STX is a flux preservation format; decoding its timing records back to
//! sectors is out of scope.  The parser surfaces the track records so the
//! protection analysis can fingerprint them, and refuses sector access.

use log::{debug,info};
use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use crate::img;
use crate::img::geometry::FormatDescriptor;
use crate::fs::Block;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::{STDRESULT,DYNERR};

pub const MAGIC: [u8;3] = *b"STX";

pub fn file_extensions() -> Vec<String> {
    vec!["stx".to_string()]
}

#[derive(DiskStruct)]
pub struct FileHeader {
    magic: [u8;3],
    pad: u8,
    version: [u8;2],
    tool: [u8;2],
    reserved: [u8;2],
    track_count: u8,
    revision: u8,
    reserved2: [u8;4]
}

/// Wrapper for STX data.  Tracks are kept as raw records.
pub struct Stx {
    header: FileHeader,
    tracks: Vec<Vec<u8>>,
    diags: DiagnosisList
}

impl Stx {
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DiskStructError> {
        if buf.len() < 16 {
            return Err(DiskStructError::OutOfData);
        }
        let header = FileHeader::from_bytes(&buf[0..16])?;
        if header.magic != MAGIC {
            return Err(DiskStructError::UnexpectedValue);
        }
        info!("STX version {} with {} tracks", u16::from_le_bytes(header.version), header.track_count);
        let mut diags = DiagnosisList::new();
        diags.add(Code::UnsupportedFeature, Severity::Info,
            "STX is flux preservation, surfaced for analysis only");
        let mut tracks: Vec<Vec<u8>> = Vec::new();
        let mut ptr = 16;
        for t in 0..header.track_count as usize {
            if ptr + 4 > buf.len() {
                diags.add(Code::TruncatedInput, Severity::Warning,
                    &format!("track records ended at {} of {}", t, header.track_count));
                break;
            }
            let record_len = u32::from_le_bytes([buf[ptr],buf[ptr+1],buf[ptr+2],buf[ptr+3]]) as usize;
            if record_len < 4 || ptr + record_len > buf.len() {
                debug!("track record {} claims {} bytes", t, record_len);
                diags.add(Code::TruncatedInput, Severity::Warning, "track record runs past end of file");
                break;
            }
            tracks.push(buf[ptr+4..ptr+record_len].to_vec());
            ptr += record_len;
        }
        Ok(Self {
            header,
            tracks,
            diags
        })
    }
}

impl img::DiskImage for Stx {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }
    fn num_heads(&self) -> usize {
        2
    }
    fn byte_capacity(&self) -> usize {
        self.tracks.iter().map(|t| t.len()).sum()
    }
    fn what_am_i(&self) -> img::DiskImageType {
        img::DiskImageType::STX
    }
    fn file_extensions(&self) -> Vec<String> {
        file_extensions()
    }
    fn geometry(&self) -> Option<FormatDescriptor> {
        None
    }
    fn diagnostics(&self) -> DiagnosisList {
        self.diags.clone()
    }
    fn to_bytes(&mut self) -> Vec<u8> {
        let mut ans = self.header.to_bytes();
        for trk in &self.tracks {
            ans.extend_from_slice(&u32::to_le_bytes(trk.len() as u32 + 4));
            ans.extend_from_slice(trk);
        }
        ans
    }
    fn read_block(&mut self, _addr: Block) -> Result<Vec<u8>,DYNERR> {
        Err(Box::new(img::Error::ImageTypeMismatch))
    }
    fn write_block(&mut self, _addr: Block, _dat: &[u8]) -> STDRESULT {
        Err(Box::new(img::Error::ReadOnly))
    }
    fn read_sector(&mut self, _cyl: usize, _head: usize, _sec: usize) -> Result<Vec<u8>,DYNERR> {
        Err(Box::new(img::Error::ImageTypeMismatch))
    }
    fn write_sector(&mut self, _cyl: usize, _head: usize, _sec: usize, _dat: &[u8]) -> STDRESULT {
        Err(Box::new(img::Error::ReadOnly))
    }
    fn get_track_buf(&mut self, cyl: usize, head: usize) -> Result<Vec<u8>,DYNERR> {
        let idx = cyl * 2 + head;
        match self.tracks.get(idx) {
            Some(trk) => Ok(trk.clone()),
            None => Err(Box::new(img::Error::TrackAccess))
        }
    }
    fn set_track_buf(&mut self, _cyl: usize, _head: usize, _dat: &[u8]) -> STDRESULT {
        Err(Box::new(img::Error::ReadOnly))
    }
}
