//! ## Support for DMS archives (Amiga DiskMasher)
//!
//! A DMS archive is a 56-byte header followed by track records, each
//! carrying one cylinder of an Amiga disk compressed with one of the seven
//! modes in `codec::dms`.  Multi-byte fields are big endian.  Reserved
//! track numbers: 0xffff is the archive banner, 80 is FILEID.DIZ, and a
//! "fake boot" track 0 shorter than a real cylinder is discarded.
//!
//! Encrypted archives XOR every stored track byte with a running key
//! seeded by the CRC of the password; track 80 is never encrypted.

use log::{debug,info,warn};
use a2kit_macro::{DiskStructError,DiskStruct};
use a2kit_macro_derive::DiskStruct;
use crate::img;
use crate::img::geometry::{self,FormatDescriptor};
use crate::codec::{self,dms};
use crate::crc::{crc16_arc,sum16};
use crate::fs::Block;
use crate::diag::{Code,DiagnosisList,Severity};
use crate::{STDRESULT,DYNERR};

pub const MAGIC: [u8;4] = *b"DMS!";
pub const HEADER_LEN: usize = 56;
const TRACK_HEADER_LEN: usize = 18;
/// one Amiga cylinder: 2 heads x 11 sectors x 512 bytes
pub const CYLINDER_LEN: usize = 11264;
pub const BANNER_TRACK: u16 = 0xffff;
pub const FILEID_TRACK: u16 = 80;
/// a track 0 this short is an installer stub, not disk data
const FAKE_BOOT_MAX: usize = 2048;

/// info flag: archive is encrypted
const FLAG_ENCRYPT: u32 = 0x02;

pub fn file_extensions() -> Vec<String> {
    vec!["dms".to_string()]
}

#[derive(DiskStruct)]
pub struct ArchiveHeader {
    magic: [u8;4],
    info_flags: [u8;4],
    date: [u8;4],
    low_track: [u8;2],
    high_track: [u8;2],
    packed_len: [u8;4],
    unpacked_len: [u8;4],
    creator_version: [u8;2],
    needed_version: [u8;2],
    disk_type: [u8;2],
    cmode_used: [u8;2],
    /// fields kept but not interpreted
    reserved: [u8;22],
    crc: [u8;2]
}

#[derive(DiskStruct)]
pub struct TrackRecord {
    magic: [u8;2],
    cylinder: [u8;2],
    packed_len: [u8;2],
    /// length after the first stage, input to RLE
    inter_len: [u8;2],
    unpacked_len: [u8;2],
    flags: u8,
    cmode: u8,
    /// byte sum of the unpacked track
    usum: [u8;2],
    /// CRC of this header through usum
    hcrc: [u8;2],
    /// CRC of the stored (possibly encrypted) data
    dcrc: [u8;2]
}

/// The running XOR keystream used by encrypted archives.
struct Keystream {
    key: u16
}

impl Keystream {
    fn new(password: &str) -> Self {
        Self {
            key: crc16_arc(0, password.as_bytes())
        }
    }
    fn decrypt(&mut self, dat: &mut [u8]) {
        for i in 0..dat.len() {
            let cipher = dat[i];
            dat[i] = cipher ^ (self.key & 0xff) as u8;
            self.key = (self.key >> 1).wrapping_add(cipher as u16);
        }
    }
    fn encrypt(&mut self, dat: &mut [u8]) {
        for i in 0..dat.len() {
            let cipher = dat[i] ^ (self.key & 0xff) as u8;
            self.key = (self.key >> 1).wrapping_add(cipher as u16);
            dat[i] = cipher;
        }
    }
}

/// Unpack a whole archive to the linear disk image.  `track_hook` runs
/// once per disk track in record order with (cylinder, unpacked bytes).
/// Returns the image and the diagnosis list.  A password on an
/// unencrypted archive is simply ignored.
pub fn unpack_archive(buf: &[u8], password: Option<&str>,
        mut track_hook: Option<&mut dyn FnMut(usize, &[u8])>)
        -> Result<(Vec<u8>, Option<String>, Option<String>, DiagnosisList),DYNERR> {
    if buf.len() < HEADER_LEN {
        return Err(Box::new(img::Error::TruncatedInput));
    }
    let header = ArchiveHeader::from_bytes(&buf[0..HEADER_LEN])?;
    if header.magic != MAGIC {
        return Err(Box::new(img::Error::BadMagic));
    }
    if u16::from_be_bytes(header.crc) != crc16_arc(0, &buf[4..54]) {
        warn!("archive header CRC mismatch");
        return Err(Box::new(img::Error::BadHeaderCrc));
    }
    let info = u32::from_be_bytes(header.info_flags);
    let encrypted = info & FLAG_ENCRYPT > 0;
    let mut keystream = match (encrypted, password) {
        (true, Some(pwd)) => Some(Keystream::new(pwd)),
        (true, None) => return Err(Box::new(codec::Error::PasswordRequired)),
        (false, _) => None
    };
    info!("DMS tracks {}..{}", u16::from_be_bytes(header.low_track), u16::from_be_bytes(header.high_track));
    let mut diags = DiagnosisList::new();
    let mut ctx = dms::DmsContext::new();
    let mut image = vec![0u8; geometry::AMIGA_880K.total_bytes()];
    let mut banner: Option<String> = None;
    let mut fileid: Option<String> = None;
    let mut ptr = HEADER_LEN;
    while ptr + TRACK_HEADER_LEN <= buf.len() {
        let rec = TrackRecord::from_bytes(&buf[ptr..ptr+TRACK_HEADER_LEN])?;
        if rec.magic != *b"TR" {
            // permissive reading: treat as archive termination, but say so
            diags.add(Code::TruncatedInput, Severity::Warning,
                "track records ended without an end marker");
            break;
        }
        if u16::from_be_bytes(rec.hcrc) != crc16_arc(0, &buf[ptr..ptr+14]) {
            diags.add(Code::HeaderCrc, Severity::Error, "track record header CRC mismatch");
            return Err(Box::new(img::Error::BadHeaderCrc));
        }
        let cyl = u16::from_be_bytes(rec.cylinder);
        let packed_len = u16::from_be_bytes(rec.packed_len) as usize;
        let inter_len = u16::from_be_bytes(rec.inter_len) as usize;
        let unpacked_len = u16::from_be_bytes(rec.unpacked_len) as usize;
        ptr += TRACK_HEADER_LEN;
        if ptr + packed_len > buf.len() {
            diags.add(Code::TruncatedInput, Severity::Error, "track data runs past end of archive");
            return Err(Box::new(img::Error::TruncatedInput));
        }
        let mut packed = buf[ptr..ptr+packed_len].to_vec();
        ptr += packed_len;
        if u16::from_be_bytes(rec.dcrc) != crc16_arc(0, &packed) {
            diags.add_sector(Code::TrackCrc, Severity::Error, cyl as usize, 0, "packed track CRC mismatch");
            return Err(Box::new(img::Error::BadHeaderCrc));
        }
        // track 80 is never encrypted
        if cyl != FILEID_TRACK {
            if let Some(ks) = &mut keystream {
                ks.decrypt(&mut packed);
            }
        }
        let unpacked = ctx.unpack_track(rec.cmode, rec.flags, &packed, inter_len, unpacked_len)?;
        if sum16(0, &unpacked) != u16::from_be_bytes(rec.usum) {
            debug!("track {} checksum mismatch", cyl);
            if encrypted {
                return Err(Box::new(codec::Error::WrongPassword));
            }
            diags.add_sector(Code::Checksum, Severity::Error, cyl as usize, 0, "unpacked track checksum mismatch");
            return Err(Box::new(codec::Error::Checksum));
        }
        match cyl {
            BANNER_TRACK => {
                banner = Some(String::from_utf8_lossy(&unpacked).to_string());
            },
            FILEID_TRACK => {
                fileid = Some(String::from_utf8_lossy(&unpacked).to_string());
            },
            0 if unpacked_len <= FAKE_BOOT_MAX => {
                debug!("discarding fake boot track of {} bytes", unpacked_len);
            },
            cyl => {
                if let Some(hook) = track_hook.as_mut() {
                    hook(cyl as usize, &unpacked);
                }
                let offset = cyl as usize * CYLINDER_LEN;
                if offset + unpacked.len() > image.len() {
                    diags.add_sector(Code::OutOfRange, Severity::Error, cyl as usize, 0,
                        "track number outside an 880K disk");
                    continue;
                }
                image[offset..offset+unpacked.len()].copy_from_slice(&unpacked);
            }
        }
    }
    Ok((image, banner, fileid, diags))
}

/// Pack a linear disk image into a DMS archive with one mode throughout.
pub fn pack_archive(image: &[u8], cmode: u8, password: Option<&str>) -> Result<Vec<u8>,DYNERR> {
    if image.len() != geometry::AMIGA_880K.total_bytes() {
        return Err(Box::new(img::Error::ImageSizeMismatch));
    }
    let mut keystream = password.map(Keystream::new);
    let mut body: Vec<u8> = Vec::new();
    let mut packed_total = 0u32;
    for cyl in 0..80usize {
        let dat = &image[cyl*CYLINDER_LEN..(cyl+1)*CYLINDER_LEN];
        let (mut packed, inter_len, flags) = dms::pack_track(cmode, dat)?;
        if let Some(ks) = &mut keystream {
            ks.encrypt(&mut packed);
        }
        let mut rec = TrackRecord {
            magic: *b"TR",
            cylinder: u16::to_be_bytes(cyl as u16),
            packed_len: u16::to_be_bytes(packed.len() as u16),
            inter_len: u16::to_be_bytes(inter_len as u16),
            unpacked_len: u16::to_be_bytes(CYLINDER_LEN as u16),
            flags,
            cmode,
            usum: u16::to_be_bytes(sum16(0, dat)),
            hcrc: [0,0],
            dcrc: u16::to_be_bytes(crc16_arc(0, &packed))
        };
        let flat = rec.to_bytes();
        rec.hcrc = u16::to_be_bytes(crc16_arc(0, &flat[0..14]));
        packed_total += packed.len() as u32;
        body.append(&mut rec.to_bytes());
        body.append(&mut packed);
    }
    let mut header = ArchiveHeader {
        magic: MAGIC,
        info_flags: u32::to_be_bytes(match password { Some(_) => FLAG_ENCRYPT, None => 0 }),
        date: [0;4],
        low_track: [0,0],
        high_track: u16::to_be_bytes(79),
        packed_len: u32::to_be_bytes(packed_total),
        unpacked_len: u32::to_be_bytes(image.len() as u32),
        creator_version: u16::to_be_bytes(111),
        needed_version: u16::to_be_bytes(111),
        disk_type: u16::to_be_bytes(1),
        cmode_used: u16::to_be_bytes(cmode as u16),
        reserved: [0;22],
        crc: [0,0]
    };
    let flat = header.to_bytes();
    header.crc = u16::to_be_bytes(crc16_arc(0, &flat[4..54]));
    let mut ans = header.to_bytes();
    ans.append(&mut body);
    Ok(ans)
}

/// Wrapper for DMS data, held as the unpacked disk.
pub struct Dms {
    geom: FormatDescriptor,
    banner: Option<String>,
    fileid: Option<String>,
    cmode: u8,
    data: Vec<u8>,
    diags: DiagnosisList
}

impl Dms {
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DiskStructError> {
        Self::from_bytes_with_password(buf, None)
    }
    pub fn from_bytes_with_password(buf: &[u8], password: Option<&str>) -> Result<Self,DiskStructError> {
        match unpack_archive(buf, password, None) {
            Ok((data, banner, fileid, diags)) => Ok(Self {
                geom: geometry::AMIGA_880K,
                banner,
                fileid,
                cmode: dms::MODE_HEAVY1,
                data,
                diags
            }),
            Err(e) => {
                debug!("DMS open failed: {}", e);
                Err(DiskStructError::UnexpectedValue)
            }
        }
    }
    /// Wrap a raw 880K image for archiving.
    pub fn from_adf(image: &[u8], cmode: u8) -> Result<Self,DYNERR> {
        if image.len() != geometry::AMIGA_880K.total_bytes() {
            return Err(Box::new(img::Error::ImageSizeMismatch));
        }
        Ok(Self {
            geom: geometry::AMIGA_880K,
            banner: None,
            fileid: None,
            cmode,
            data: image.to_vec(),
            diags: DiagnosisList::new()
        })
    }
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }
    pub fn fileid(&self) -> Option<&str> {
        self.fileid.as_deref()
    }
}

impl img::DiskImage for Dms {
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
        img::DiskImageType::DMS
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
        pack_archive(&self.data, self.cmode, None).expect("archive packing failed")
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
            None => Err(Box::new(img::Error::SectorAccess))
        }
    }
    fn write_sector(&mut self, cyl: usize, head: usize, sec: usize, dat: &[u8]) -> STDRESULT {
        match self.geom.offset(cyl, head, sec) {
            Some(offset) => {
                let padded = img::quantize_block(dat, 512);
                self.data[offset..offset+512].copy_from_slice(&padded);
                Ok(())
            },
            None => Err(Box::new(img::Error::SectorAccess))
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
