//! ## Support for TZX/CDT and TAP tape images (ZX Spectrum, Amstrad CPC)
//!
//! TZX is a block-typed stream with the signature `ZXTape!\x1a`; TAP is a
//! bare concatenation of `len16 payload` records.  Both convert to the
//! other: TZX to TAP keeps only the standard-speed blocks, TAP to TZX
//! wraps every record in a standard block with a one second pause (none
//! on the last, there is nothing to wait for).
//!
//! Rendering to PCM goes through the pulse generator in `codec::tape`.

use log::{debug,info,warn};
use num_traits::FromPrimitive;
use num_derive::FromPrimitive;
use crate::codec::tape::{self,Machine,WaveGen};
use crate::crc::xor8;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::img;
use crate::DYNERR;

pub const SIGNATURE: [u8;8] = *b"ZXTape!\x1a";
pub const MAJOR_VERSION: u8 = 1;
pub const MINOR_VERSION: u8 = 20;
/// pause wrapped around TAP blocks during conversion
pub const CONVERT_PAUSE_MS: u16 = 1000;

pub fn file_extensions() -> Vec<String> {
    vec!["tzx".to_string(),"cdt".to_string(),"tap".to_string()]
}

#[derive(FromPrimitive,PartialEq,Eq,Clone,Copy)]
pub enum BlockId {
    Standard = 0x10,
    Turbo = 0x11,
    PureTone = 0x12,
    PulseSeq = 0x13,
    PureData = 0x14,
    Direct = 0x15,
    Pause = 0x20,
    GroupStart = 0x21,
    GroupEnd = 0x22,
    LoopStart = 0x24,
    LoopEnd = 0x25,
    TextDescription = 0x30,
    ArchiveInfo = 0x32,
    Glue = 0x5a
}

/// One TZX block, decoded for the ids the renderer understands and kept
/// verbatim for the structural ones.
pub enum Block {
    Standard {
        pause_ms: u16,
        data: Vec<u8>
    },
    Turbo {
        pilot_t: u16,
        sync1_t: u16,
        sync2_t: u16,
        zero_t: u16,
        one_t: u16,
        pilot_count: u16,
        last_bits: u8,
        pause_ms: u16,
        data: Vec<u8>
    },
    PureTone {
        count: u16,
        t: u16
    },
    PulseSeq(Vec<u16>),
    PureData {
        zero_t: u16,
        one_t: u16,
        last_bits: u8,
        pause_ms: u16,
        data: Vec<u8>
    },
    Direct {
        t_per_sample: u16,
        pause_ms: u16,
        last_bits: u8,
        data: Vec<u8>
    },
    Pause(u16),
    /// structural block carried through unchanged
    Other {
        id: u8,
        body: Vec<u8>
    }
}

fn le16(buf: &[u8], ptr: usize) -> u16 {
    u16::from_le_bytes([buf[ptr], buf[ptr+1]])
}

fn le24(buf: &[u8], ptr: usize) -> usize {
    buf[ptr] as usize + ((buf[ptr+1] as usize) << 8) + ((buf[ptr+2] as usize) << 16)
}

/// A TZX tape.
pub struct Tzx {
    pub major: u8,
    pub minor: u8,
    pub blocks: Vec<Block>,
    diags: DiagnosisList
}

impl Tzx {
    pub fn create() -> Self {
        Self {
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            blocks: Vec::new(),
            diags: DiagnosisList::new()
        }
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        if buf.len() < 10 {
            return Err(Box::new(img::Error::TruncatedInput));
        }
        if buf[0..8] != SIGNATURE {
            return Err(Box::new(img::Error::BadMagic));
        }
        let (major, minor) = (buf[8], buf[9]);
        if major != MAJOR_VERSION {
            warn!("TZX major version {} unsupported", major);
            return Err(Box::new(img::Error::UnsupportedVersion));
        }
        info!("TZX version {}.{}", major, minor);
        let mut diags = DiagnosisList::new();
        let mut blocks: Vec<Block> = Vec::new();
        let mut ptr = 10;
        while ptr < buf.len() {
            let id = buf[ptr];
            ptr += 1;
            // every arm below is responsible for bounds and advancing ptr
            let need = |n: usize| -> Result<(),DYNERR> {
                match ptr + n <= buf.len() {
                    true => Ok(()),
                    false => Err(Box::new(img::Error::TruncatedInput))
                }
            };
            match BlockId::from_u8(id) {
                Some(BlockId::Standard) => {
                    need(4)?;
                    let pause_ms = le16(buf, ptr);
                    let len = le16(buf, ptr+2) as usize;
                    need(4 + len)?;
                    blocks.push(Block::Standard {
                        pause_ms,
                        data: buf[ptr+4..ptr+4+len].to_vec()
                    });
                    ptr += 4 + len;
                },
                Some(BlockId::Turbo) => {
                    need(18)?;
                    let len = le24(buf, ptr+15);
                    need(18 + len)?;
                    blocks.push(Block::Turbo {
                        pilot_t: le16(buf, ptr),
                        sync1_t: le16(buf, ptr+2),
                        sync2_t: le16(buf, ptr+4),
                        zero_t: le16(buf, ptr+6),
                        one_t: le16(buf, ptr+8),
                        pilot_count: le16(buf, ptr+10),
                        last_bits: buf[ptr+12],
                        pause_ms: le16(buf, ptr+13),
                        data: buf[ptr+18..ptr+18+len].to_vec()
                    });
                    ptr += 18 + len;
                },
                Some(BlockId::PureTone) => {
                    need(4)?;
                    blocks.push(Block::PureTone {
                        t: le16(buf, ptr),
                        count: le16(buf, ptr+2)
                    });
                    ptr += 4;
                },
                Some(BlockId::PulseSeq) => {
                    need(1)?;
                    let count = buf[ptr] as usize;
                    need(1 + 2*count)?;
                    let mut pulses = Vec::new();
                    for i in 0..count {
                        pulses.push(le16(buf, ptr+1+2*i));
                    }
                    blocks.push(Block::PulseSeq(pulses));
                    ptr += 1 + 2*count;
                },
                Some(BlockId::PureData) => {
                    need(10)?;
                    let len = le24(buf, ptr+7);
                    need(10 + len)?;
                    blocks.push(Block::PureData {
                        zero_t: le16(buf, ptr),
                        one_t: le16(buf, ptr+2),
                        last_bits: buf[ptr+4],
                        pause_ms: le16(buf, ptr+5),
                        data: buf[ptr+10..ptr+10+len].to_vec()
                    });
                    ptr += 10 + len;
                },
                Some(BlockId::Direct) => {
                    need(8)?;
                    let len = le24(buf, ptr+5);
                    need(8 + len)?;
                    blocks.push(Block::Direct {
                        t_per_sample: le16(buf, ptr),
                        pause_ms: le16(buf, ptr+2),
                        last_bits: buf[ptr+4],
                        data: buf[ptr+8..ptr+8+len].to_vec()
                    });
                    ptr += 8 + len;
                },
                Some(BlockId::Pause) => {
                    need(2)?;
                    blocks.push(Block::Pause(le16(buf, ptr)));
                    ptr += 2;
                },
                Some(BlockId::GroupStart) => {
                    need(1)?;
                    let len = buf[ptr] as usize;
                    need(1 + len)?;
                    blocks.push(Block::Other { id, body: buf[ptr..ptr+1+len].to_vec() });
                    ptr += 1 + len;
                },
                Some(BlockId::GroupEnd) | Some(BlockId::LoopEnd) => {
                    blocks.push(Block::Other { id, body: Vec::new() });
                },
                Some(BlockId::LoopStart) => {
                    need(2)?;
                    blocks.push(Block::Other { id, body: buf[ptr..ptr+2].to_vec() });
                    ptr += 2;
                },
                Some(BlockId::TextDescription) => {
                    need(1)?;
                    let len = buf[ptr] as usize;
                    need(1 + len)?;
                    blocks.push(Block::Other { id, body: buf[ptr..ptr+1+len].to_vec() });
                    ptr += 1 + len;
                },
                Some(BlockId::ArchiveInfo) => {
                    need(2)?;
                    let len = le16(buf, ptr) as usize;
                    need(2 + len)?;
                    blocks.push(Block::Other { id, body: buf[ptr..ptr+2+len].to_vec() });
                    ptr += 2 + len;
                },
                Some(BlockId::Glue) => {
                    need(9)?;
                    blocks.push(Block::Other { id, body: buf[ptr..ptr+9].to_vec() });
                    ptr += 9;
                },
                None => {
                    debug!("unknown TZX block 0x{:02x} at {}", id, ptr-1);
                    diags.add(Code::UnsupportedFeature, Severity::Warning,
                        &format!("unknown block 0x{:02x} stops the walk", id));
                    break;
                }
            }
        }
        Ok(Self {
            major,
            minor,
            blocks,
            diags
        })
    }
    pub fn diagnostics(&self) -> DiagnosisList {
        self.diags.clone()
    }
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ans: Vec<u8> = Vec::new();
        ans.extend_from_slice(&SIGNATURE);
        ans.push(self.major);
        ans.push(self.minor);
        for block in &self.blocks {
            match block {
                Block::Standard { pause_ms, data } => {
                    ans.push(BlockId::Standard as u8);
                    ans.extend_from_slice(&u16::to_le_bytes(*pause_ms));
                    ans.extend_from_slice(&u16::to_le_bytes(data.len() as u16));
                    ans.extend_from_slice(data);
                },
                Block::Turbo { pilot_t, sync1_t, sync2_t, zero_t, one_t, pilot_count, last_bits, pause_ms, data } => {
                    ans.push(BlockId::Turbo as u8);
                    ans.extend_from_slice(&u16::to_le_bytes(*pilot_t));
                    ans.extend_from_slice(&u16::to_le_bytes(*sync1_t));
                    ans.extend_from_slice(&u16::to_le_bytes(*sync2_t));
                    ans.extend_from_slice(&u16::to_le_bytes(*zero_t));
                    ans.extend_from_slice(&u16::to_le_bytes(*one_t));
                    ans.extend_from_slice(&u16::to_le_bytes(*pilot_count));
                    ans.push(*last_bits);
                    ans.extend_from_slice(&u16::to_le_bytes(*pause_ms));
                    ans.push((data.len() & 0xff) as u8);
                    ans.push(((data.len() >> 8) & 0xff) as u8);
                    ans.push(((data.len() >> 16) & 0xff) as u8);
                    ans.extend_from_slice(data);
                },
                Block::PureTone { count, t } => {
                    ans.push(BlockId::PureTone as u8);
                    ans.extend_from_slice(&u16::to_le_bytes(*t));
                    ans.extend_from_slice(&u16::to_le_bytes(*count));
                },
                Block::PulseSeq(pulses) => {
                    ans.push(BlockId::PulseSeq as u8);
                    ans.push(pulses.len() as u8);
                    for p in pulses {
                        ans.extend_from_slice(&u16::to_le_bytes(*p));
                    }
                },
                Block::PureData { zero_t, one_t, last_bits, pause_ms, data } => {
                    ans.push(BlockId::PureData as u8);
                    ans.extend_from_slice(&u16::to_le_bytes(*zero_t));
                    ans.extend_from_slice(&u16::to_le_bytes(*one_t));
                    ans.push(*last_bits);
                    ans.extend_from_slice(&u16::to_le_bytes(*pause_ms));
                    ans.push((data.len() & 0xff) as u8);
                    ans.push(((data.len() >> 8) & 0xff) as u8);
                    ans.push(((data.len() >> 16) & 0xff) as u8);
                    ans.extend_from_slice(data);
                },
                Block::Direct { t_per_sample, pause_ms, last_bits, data } => {
                    ans.push(BlockId::Direct as u8);
                    ans.extend_from_slice(&u16::to_le_bytes(*t_per_sample));
                    ans.extend_from_slice(&u16::to_le_bytes(*pause_ms));
                    ans.push(*last_bits);
                    ans.push((data.len() & 0xff) as u8);
                    ans.push(((data.len() >> 8) & 0xff) as u8);
                    ans.push(((data.len() >> 16) & 0xff) as u8);
                    ans.extend_from_slice(data);
                },
                Block::Pause(ms) => {
                    ans.push(BlockId::Pause as u8);
                    ans.extend_from_slice(&u16::to_le_bytes(*ms));
                },
                Block::Other { id, body } => {
                    ans.push(*id);
                    ans.extend_from_slice(body);
                }
            }
        }
        ans
    }
    /// Pull the standard-speed blocks into a TAP.
    pub fn to_tap(&self) -> Tap {
        let mut ans = Tap::create();
        for block in &self.blocks {
            if let Block::Standard { pause_ms: _, data } = block {
                ans.blocks.push(data.clone());
            }
        }
        ans
    }
    /// Render the whole tape to unsigned 8-bit PCM.
    pub fn render(&self, rate: u32, machine: Machine, speed_percent: u32) -> Vec<u8> {
        let mut wave = WaveGen::new(rate, machine, speed_percent);
        for block in &self.blocks {
            match block {
                Block::Standard { pause_ms, data } => {
                    let flag = match data.first() { Some(f) => *f, None => 0 };
                    wave.pilot_and_sync(flag);
                    wave.data(data, tape::BIT0, tape::BIT1, 8);
                    wave.pause_ms(*pause_ms as u32);
                },
                Block::Turbo { pilot_t, sync1_t, sync2_t, zero_t, one_t, pilot_count, last_bits, pause_ms, data } => {
                    wave.tone(*pilot_count as u32, *pilot_t as u32);
                    wave.pulse(*sync1_t as u32);
                    wave.pulse(*sync2_t as u32);
                    wave.data(data, *zero_t as u32, *one_t as u32, *last_bits);
                    wave.pause_ms(*pause_ms as u32);
                },
                Block::PureTone { count, t } => {
                    wave.tone(*count as u32, *t as u32);
                },
                Block::PulseSeq(pulses) => {
                    for p in pulses {
                        wave.pulse(*p as u32);
                    }
                },
                Block::PureData { zero_t, one_t, last_bits, pause_ms, data } => {
                    wave.data(data, *zero_t as u32, *one_t as u32, *last_bits);
                    wave.pause_ms(*pause_ms as u32);
                },
                Block::Direct { t_per_sample, pause_ms, last_bits, data } => {
                    wave.direct(data, *t_per_sample as u32, *last_bits);
                    wave.pause_ms(*pause_ms as u32);
                },
                Block::Pause(ms) => {
                    wave.pause_ms(*ms as u32);
                },
                Block::Other { id: _, body: _ } => {}
            }
        }
        wave.finish()
    }
}

/// A TAP tape, just the payload records.
pub struct Tap {
    pub blocks: Vec<Vec<u8>>
}

impl Tap {
    pub fn create() -> Self {
        Self {
            blocks: Vec::new()
        }
    }
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        let mut blocks: Vec<Vec<u8>> = Vec::new();
        let mut ptr = 0;
        while ptr + 2 <= buf.len() {
            let len = le16(buf, ptr) as usize;
            if ptr + 2 + len > buf.len() {
                return Err(Box::new(img::Error::TruncatedInput));
            }
            blocks.push(buf[ptr+2..ptr+2+len].to_vec());
            ptr += 2 + len;
        }
        if ptr != buf.len() {
            return Err(Box::new(img::Error::TruncatedInput));
        }
        Ok(Self {
            blocks
        })
    }
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut ans: Vec<u8> = Vec::new();
        for block in &self.blocks {
            ans.extend_from_slice(&u16::to_le_bytes(block.len() as u16));
            ans.extend_from_slice(block);
        }
        ans
    }
    /// Build a standard tape block from flag and payload, appending the
    /// XOR check over both.
    pub fn make_block(flag: u8, payload: &[u8]) -> Vec<u8> {
        let mut ans = vec![flag];
        ans.extend_from_slice(payload);
        ans.push(xor8(flag, payload));
        ans
    }
    /// Verify the XOR check of a tape block.
    pub fn verify_block(block: &[u8]) -> bool {
        match block.len() {
            0 | 1 => false,
            _ => xor8(0, block) == 0
        }
    }
    /// Wrap every record in a standard-speed TZX block.  The last block
    /// gets no pause, there is nothing after it to wait for.
    pub fn to_tzx(&self) -> Tzx {
        let mut ans = Tzx::create();
        for (i, block) in self.blocks.iter().enumerate() {
            let pause_ms = match i + 1 == self.blocks.len() {
                true => 0,
                false => CONVERT_PAUSE_MS
            };
            ans.blocks.push(Block::Standard {
                pause_ms,
                data: block.clone()
            });
        }
        ans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tap_check_byte() {
        let block = Tap::make_block(0xff, &[1,2,3]);
        assert_eq!(block, vec![0xff, 1, 2, 3, 0xff]);
        assert!(Tap::verify_block(&block));
        assert!(!Tap::verify_block(&[0xff, 1, 2, 3, 0x00]));
    }

    #[test]
    fn tzx_block_walk() {
        let mut tzx = Tzx::create();
        tzx.blocks.push(Block::PureTone { count: 100, t: 2168 });
        tzx.blocks.push(Block::Pause(500));
        tzx.blocks.push(Block::Standard { pause_ms: 1000, data: Tap::make_block(0, &[0;17]) });
        let flat = tzx.to_bytes();
        let back = Tzx::from_bytes(&flat).unwrap();
        assert_eq!(back.blocks.len(), 3);
        assert_eq!(flat, back.to_bytes());
    }
}
