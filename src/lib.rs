//! # `retroimg` main library
//!
//! This library manipulates floppy and tape images from the 8-bit and
//! 16-bit microcomputer era.  Manipulations can be done at a level as low
//! as raw track bytes, or as high as files, with a forensic recovery
//! pipeline for media that no longer read cleanly.
//!
//! ## Architecture
//!
//! Operations are built around two trait objects:
//! * `img::DiskImage` encodes/decodes the container and its tracks, and
//!   does not try to interpret a file system
//! * `fs::DiskFS` imposes a file system on the decoded sector data
//!
//! When a `DiskFS` object is created it takes ownership of some
//! `DiskImage` and uses it as storage.  Changes are not permanent until
//! the image is flattened with `to_bytes` and saved by the caller.
//!
//! ## Containers
//!
//! As of this writing the supported containers are D64, G64, DMS, ADF,
//! CopyQM, Teledisk TD0, ATR, Pasti STX (analysis only), and the TZX/TAP
//! tapes, plus raw sector dumps (DSK/DO/PO/IMG).
//!
//! ## File Systems
//!
//! Atari DOS 2.x, Apple DOS 3.3, ProDOS, CP/M 2.2/3.0 (geometry from a
//! disk parameter block database), and the CBM directory on 1541 disks
//! (read and repair).
//!
//! ## Recovery
//!
//! The `recover` module carries the pipeline: multi-revolution consensus,
//! CRC correction, weak bit detection, allocation map rebuild, directory
//! validation, and copy protection fingerprinting.

pub mod bits;
pub mod crc;
pub mod diag;
pub mod codec;
pub mod bios;
pub mod img;
pub mod fs;
pub mod recover;

use log::info;
use img::DiskImage;
use fs::DiskFS;

pub type DYNERR = Box<dyn std::error::Error>;
pub type STDRESULT = Result<(),Box<dyn std::error::Error>>;

pub const KNOWN_FILE_EXTENSIONS: &str = "d64,g64,dms,adf,cqm,cq,td0,atr,stx,tzx,cdt,tap,dsk,do,po,img";

/// Save the image file (make changes permanent).
pub fn save_img(disk: &mut Box<dyn DiskFS>, img_path: &str) -> STDRESULT {
    std::fs::write(img_path, disk.get_img().to_bytes())?;
    Ok(())
}

/// Identify the container type of a byte stream, by magic where there is
/// one and by size where there is not.
pub fn probe(dat: &[u8]) -> Option<img::DiskImageType> {
    if dat.len() >= 4 && dat[0..4] == img::dms::MAGIC {
        return Some(img::DiskImageType::DMS);
    }
    if dat.len() >= 8 && &dat[0..8] == img::g64::MAGIC {
        return Some(img::DiskImageType::G64);
    }
    if dat.len() >= 10 && dat[0..8] == img::tzx::SIGNATURE {
        return Some(img::DiskImageType::TZX);
    }
    if dat.len() >= 3 && dat[0..3] == img::stx::MAGIC {
        return Some(img::DiskImageType::STX);
    }
    if dat.len() >= 3 && dat[0..3] == img::cqm::MAGIC {
        return Some(img::DiskImageType::CQM);
    }
    if dat.len() >= 2 && dat[0..2] == img::atr::MAGIC {
        return Some(img::DiskImageType::ATR);
    }
    if dat.len() >= 2 && (&dat[0..2] == b"TD" || &dat[0..2] == b"td") {
        return Some(img::DiskImageType::TD0);
    }
    match dat.len() {
        img::d64::SIZE_35 | img::d64::SIZE_35_ERRORS | img::d64::SIZE_40 | img::d64::SIZE_40_ERRORS
            => Some(img::DiskImageType::D64),
        img::adf::ADF_SIZE => Some(img::DiskImageType::ADF),
        _ => None
    }
}

/// Given a byte stream, return a disk image, or Err if the stream cannot
/// be interpreted.  Optional `maybe_ext` restricts the types tried based
/// on the file extension; in particular raw sector dumps need it to pick
/// the sector order.
pub fn create_img_from_bytestream(dat: &[u8], maybe_ext: Option<&str>) -> Result<Box<dyn DiskImage>,DYNERR> {
    let ext = match maybe_ext {
        Some(x) => x.to_string().to_lowercase(),
        None => "".to_string()
    };
    match probe(dat) {
        Some(img::DiskImageType::DMS) => {
            info!("identified DMS archive");
            return Ok(Box::new(img::dms::Dms::from_bytes(dat)?));
        },
        Some(img::DiskImageType::G64) => {
            info!("identified G64 image");
            return Ok(Box::new(img::g64::G64::from_bytes(dat)?));
        },
        Some(img::DiskImageType::STX) => {
            info!("identified STX image");
            return Ok(Box::new(img::stx::Stx::from_bytes(dat)?));
        },
        Some(img::DiskImageType::CQM) => {
            info!("identified CopyQM image");
            return Ok(Box::new(img::cqm::Cqm::from_bytes(dat)?));
        },
        Some(img::DiskImageType::ATR) => {
            info!("identified ATR image");
            return Ok(Box::new(img::atr::Atr::from_bytes(dat)?));
        },
        Some(img::DiskImageType::TD0) => {
            info!("identified TD0 image");
            return Ok(Box::new(img::td0::Td0::from_bytes(dat)?));
        },
        Some(img::DiskImageType::D64) => {
            info!("identified D64 image");
            return Ok(Box::new(img::d64::D64::from_bytes(dat)?));
        },
        Some(img::DiskImageType::ADF) if ext != "dsk" && ext != "img" => {
            info!("identified ADF image");
            return Ok(Box::new(img::adf::Adf::from_bytes(dat)?));
        },
        _ => {}
    }
    // raw sector dumps carry no magic; the extension picks the order and
    // the size picks the geometry
    let order = match ext.as_str() {
        "po" => img::dsk::SectorOrder::ProdosBlocks,
        "do" | "dsk" => img::dsk::SectorOrder::Dos33Logical,
        _ => img::dsk::SectorOrder::Linear
    };
    if dat.len() == img::geometry::A2_DOS33.total_bytes() && order != img::dsk::SectorOrder::Linear {
        info!("identified Apple 5.25 inch sector dump");
        return Ok(Box::new(img::dsk::Dsk::from_bytes(dat, img::geometry::A2_DOS33, order)?));
    }
    for entry in crate::bios::dpb::lookup_by_size(dat.len()) {
        let geom = img::geometry::FormatDescriptor::from_dpb(&entry.dpb, entry.sector_bytes, entry.heads);
        if geom.total_bytes() == dat.len() {
            info!("identified {} sector dump", entry.name);
            return Ok(Box::new(img::dsk::Dsk::from_bytes(dat, geom, img::dsk::SectorOrder::Linear)?));
        }
    }
    Err(Box::new(img::Error::NotFormat))
}

/// Return the file system on a disk image, or None if one cannot be
/// found.  If found, the file system takes ownership of the disk image.
pub fn try_img(mut disk: Box<dyn DiskImage>) -> Option<Box<dyn DiskFS>> {
    if fs::dos33::Disk::test_img(&mut disk) {
        info!("identified DOS 3.3 file system");
        match fs::dos33::Disk::from_img(disk) {
            Ok(d) => return Some(Box::new(d)),
            Err(_) => return None
        }
    }
    if fs::prodos::Disk::test_img(&mut disk) {
        info!("identified ProDOS file system");
        match fs::prodos::Disk::from_img(disk) {
            Ok(d) => return Some(Box::new(d)),
            Err(_) => return None
        }
    }
    if fs::atari::Disk::test_img(&mut disk) {
        info!("identified Atari DOS file system");
        match fs::atari::Disk::from_img(disk) {
            Ok(d) => return Some(Box::new(d)),
            Err(_) => return None
        }
    }
    if fs::cbm::Disk::test_img(&mut disk) {
        info!("identified CBM DOS file system");
        return Some(Box::new(fs::cbm::Disk::from_img(disk)));
    }
    // for CP/M we try the parameter blocks matching the image size
    let size = disk.byte_capacity();
    for entry in bios::dpb::lookup_by_size(size) {
        if fs::cpm::Disk::test_img(&mut disk, &entry.dpb) {
            info!("identified CP/M file system on {}", entry.name);
            return Some(Box::new(fs::cpm::Disk::from_img(disk, entry.dpb.clone())));
        }
    }
    None
}

/// Given a byte stream, return a file system, or Err if the stream
/// cannot be interpreted.
pub fn create_fs_from_bytestream(dat: &[u8], maybe_ext: Option<&str>) -> Result<Box<dyn DiskFS>,DYNERR> {
    let disk = create_img_from_bytestream(dat, maybe_ext)?;
    match try_img(disk) {
        Some(fs) => Ok(fs),
        None => Err(Box::new(fs::Error::FileSystemMismatch))
    }
}

/// Convert a disk image to another container, copying the decoded
/// sectors through the geometry oracle.  Tape formats convert through
/// `img::tzx` instead.
pub fn convert(src: &mut Box<dyn DiskImage>, target: img::DiskImageType) -> Result<Vec<u8>,DYNERR> {
    let geom = match src.geometry() {
        Some(g) => g,
        None => return Err(Box::new(img::Error::ImageTypeMismatch))
    };
    let mut dest: Box<dyn DiskImage> = match target {
        img::DiskImageType::DSK => Box::new(img::dsk::Dsk::create(geom, img::dsk::SectorOrder::Linear)),
        img::DiskImageType::CQM => Box::new(img::cqm::Cqm::create(geom)),
        img::DiskImageType::TD0 => Box::new(img::td0::Td0::create(geom)),
        img::DiskImageType::ADF => {
            if geom != img::geometry::AMIGA_880K {
                return Err(Box::new(img::Error::GeometryMismatch));
            }
            Box::new(img::adf::Adf::create())
        },
        img::DiskImageType::DMS => {
            if geom != img::geometry::AMIGA_880K {
                return Err(Box::new(img::Error::GeometryMismatch));
            }
            let mut adf: Box<dyn DiskImage> = Box::new(img::adf::Adf::create());
            copy_sectors(src, &mut adf)?;
            let flat = adf.to_bytes();
            return img::dms::pack_archive(&flat, codec::dms::MODE_HEAVY1, None);
        },
        img::DiskImageType::D64 => {
            if geom.bytes_per_sector != 256 || geom.heads != 1 {
                return Err(Box::new(img::Error::GeometryMismatch));
            }
            Box::new(img::d64::D64::create(geom.cylinders))
        },
        img::DiskImageType::G64 => {
            if geom.bytes_per_sector != 256 || geom.heads != 1 {
                return Err(Box::new(img::Error::GeometryMismatch));
            }
            Box::new(img::g64::G64::create(geom.cylinders, [b'R', b'I']))
        },
        _ => return Err(Box::new(img::Error::ImageTypeMismatch))
    };
    copy_sectors(src, &mut dest)?;
    Ok(dest.to_bytes())
}

fn copy_sectors(src: &mut Box<dyn DiskImage>, dest: &mut Box<dyn DiskImage>) -> STDRESULT {
    let geom = match src.geometry() {
        Some(g) => g,
        None => return Err(Box::new(img::Error::ImageTypeMismatch))
    };
    for cyl in 0..geom.cylinders {
        for head in 0..geom.heads {
            for s in 0..geom.sectors_on(cyl) {
                let sec = s + geom.first_sector_id;
                let dat = src.read_sector(cyl, head, sec)?;
                dest.write_sector(cyl, head, sec, &dat)?;
            }
        }
    }
    Ok(())
}

/// Fingerprint every track of an image against the protection database.
pub fn detect_protection(disk: &mut Box<dyn DiskImage>) -> Vec<recover::protect::Match> {
    let mut ans = Vec::new();
    let tracks = disk.track_count();
    let heads = usize::max(disk.num_heads(), 1);
    for trk in 0..tracks {
        let (cyl, head) = (trk / heads, trk % heads);
        if let Ok(buf) = disk.get_track_buf(cyl, head) {
            if let Some(m) = recover::protect::match_track(trk, &buf, false, false) {
                ans.push(m);
            }
        }
    }
    ans
}
