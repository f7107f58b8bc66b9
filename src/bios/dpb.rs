//! ## Disk Parameter Block Module
//!
//! This contains disk parameter blocks (DPB) for CP/M disks.  There is no
//! standard for storing a DPB on a CP/M disk; the BIOS generates it
//! somehow.  As a result we keep a database of likely DPBs on hand and key
//! it heuristically by image size, then let the directory tests settle any
//! collision.

use log::debug;

/// The Disk Parameter Block (DPB) was introduced with CP/M v2.
/// This allows CP/M to work with a variety of disk formats.
/// The parameters are interdependent in a complicated way, see the
/// `verify` function.  Fields are public, but should be changed by hand
/// only with caution.
#[derive(Clone,PartialEq)]
pub struct DiskParameterBlock {
    /// number of 128-byte records per track
    pub spt: u16,
    /// block shift factor, bytes in block = 1 << bsh << 7
    pub bsh: u8,
    /// block mask, 2^bsh - 1
    pub blm: u8,
    /// extent mask = logical extents per extent - 1.  Can be 0,1,3,7,15.
    pub exm: u8,
    /// total blocks minus 1, not counting OS tracks
    pub dsm: u16,
    /// directory entries minus 1
    pub drm: u16,
    /// bitmap of directory blocks 1
    pub al0: u8,
    /// bitmap of directory blocks 2
    pub al1: u8,
    /// size of directory check vector
    pub cks: u16,
    /// number of reserved tracks, also track where directory starts
    pub off: u16,
    /// physical record shift, log2(sector_bytes/128); CP/M v3
    pub psh: u8,
    /// physical record mask, sector_bytes/128 - 1; CP/M v3
    pub phm: u8
}

/// One row of the geometry database: the DPB plus the physical facts the
/// DPB itself does not carry.
pub struct DpbEntry {
    pub name: &'static str,
    pub image_size: usize,
    pub sector_bytes: usize,
    pub heads: usize,
    pub dpb: DiskParameterBlock
}

pub const CPM1: DiskParameterBlock = DiskParameterBlock {
    spt: 26, bsh: 3, blm: 7, exm: 0, dsm: 242, drm: 63,
    al0: 0b11000000, al1: 0, cks: 0x8000, off: 2, psh: 0, phm: 0
};

pub const A2_525: DiskParameterBlock = DiskParameterBlock {
    spt: 32, bsh: 3, blm: 7, exm: 0, dsm: 127, drm: 63,
    al0: 0b11000000, al1: 0, cks: 0x8000, off: 3, psh: 0, phm: 0
};

pub const OSBORNE1_DD: DiskParameterBlock = DiskParameterBlock {
    spt: 40, bsh: 3, blm: 7, exm: 0, dsm: 184, drm: 63,
    al0: 0b11000000, al1: 0, cks: 0x8000, off: 3, psh: 0, phm: 0
};

pub const AMSTRAD_184K: DiskParameterBlock = DiskParameterBlock {
    spt: 36, bsh: 3, blm: 7, exm: 0, dsm: 174, drm: 63,
    al0: 0b11000000, al1: 0, cks: 0x8000, off: 1, psh: 0, phm: 0
};

/// The 21-entry database, keyed by image size.  Sizes collide between
/// vendors; entries earlier in the table win the first guess and the
/// directory heuristics arbitrate from there.
pub const DPB_TABLE: [DpbEntry;21] = [
    DpbEntry {
        name: "IBM 8in SSSD (CP/M 1)", image_size: 256256, sector_bytes: 128, heads: 1,
        dpb: CPM1
    },
    DpbEntry {
        name: "IBM 8in DSDD", image_size: 1025024, sector_bytes: 256, heads: 2,
        dpb: DiskParameterBlock {
            spt: 52, bsh: 4, blm: 15, exm: 0, dsm: 493, drm: 255,
            al0: 0b11110000, al1: 0, cks: 0x8000, off: 2, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Apple 5.25in CP/M", image_size: 143360, sector_bytes: 256, heads: 1,
        dpb: A2_525
    },
    DpbEntry {
        name: "Osborne 1 SSSD", image_size: 102400, sector_bytes: 256, heads: 1,
        dpb: DiskParameterBlock {
            spt: 20, bsh: 4, blm: 15, exm: 1, dsm: 45, drm: 63,
            al0: 0b10000000, al1: 0, cks: 0x8000, off: 3, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Osborne 1 SSDD", image_size: 204800, sector_bytes: 1024, heads: 1,
        dpb: OSBORNE1_DD
    },
    DpbEntry {
        name: "Kaypro II SSDD", image_size: 204800, sector_bytes: 512, heads: 1,
        dpb: DiskParameterBlock {
            spt: 40, bsh: 3, blm: 7, exm: 0, dsm: 194, drm: 63,
            al0: 0b11000000, al1: 0, cks: 0x8000, off: 1, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Kaypro 4 DSDD", image_size: 409600, sector_bytes: 512, heads: 2,
        dpb: DiskParameterBlock {
            spt: 40, bsh: 4, blm: 15, exm: 1, dsm: 196, drm: 63,
            al0: 0b10000000, al1: 0, cks: 0x8000, off: 1, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Amstrad PCW/Spectrum+3 SSDD", image_size: 184320, sector_bytes: 512, heads: 1,
        dpb: AMSTRAD_184K
    },
    DpbEntry {
        name: "Amstrad CPC system", image_size: 184320, sector_bytes: 512, heads: 1,
        dpb: DiskParameterBlock {
            spt: 36, bsh: 3, blm: 7, exm: 0, dsm: 170, drm: 63,
            al0: 0b11000000, al1: 0, cks: 0x8000, off: 2, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Amstrad CPC data", image_size: 184320, sector_bytes: 512, heads: 1,
        dpb: DiskParameterBlock {
            spt: 36, bsh: 3, blm: 7, exm: 0, dsm: 179, drm: 63,
            al0: 0b11000000, al1: 0, cks: 0x8000, off: 0, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "TRS-80 Model II", image_size: 625920, sector_bytes: 256, heads: 1,
        dpb: DiskParameterBlock {
            spt: 32, bsh: 4, blm: 15, exm: 0, dsm: 301, drm: 127,
            al0: 0b11000000, al1: 0, cks: 0x8000, off: 1, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Nabu 8in DSDD", image_size: 1018368, sector_bytes: 256, heads: 2,
        dpb: DiskParameterBlock {
            spt: 52, bsh: 4, blm: 15, exm: 0, dsm: 489, drm: 255,
            al0: 0b11110000, al1: 0, cks: 0x8000, off: 2, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "IBM 5.25in SSDD 160K", image_size: 163840, sector_bytes: 512, heads: 1,
        dpb: DiskParameterBlock {
            spt: 32, bsh: 4, blm: 15, exm: 1, dsm: 77, drm: 63,
            al0: 0b10000000, al1: 0, cks: 0x8000, off: 1, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "IBM 5.25in DSDD 320K", image_size: 327680, sector_bytes: 512, heads: 2,
        dpb: DiskParameterBlock {
            spt: 32, bsh: 4, blm: 15, exm: 1, dsm: 157, drm: 63,
            al0: 0b10000000, al1: 0, cks: 0x8000, off: 1, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "IBM 5.25in SSQD", image_size: 327680, sector_bytes: 512, heads: 1,
        dpb: DiskParameterBlock {
            spt: 32, bsh: 4, blm: 15, exm: 1, dsm: 155, drm: 63,
            al0: 0b10000000, al1: 0, cks: 0x8000, off: 2, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Epson QX-10 DSDD", image_size: 409600, sector_bytes: 512, heads: 2,
        dpb: DiskParameterBlock {
            spt: 40, bsh: 4, blm: 15, exm: 1, dsm: 194, drm: 63,
            al0: 0b10000000, al1: 0, cks: 0x8000, off: 2, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Morrow MD2 SSDD", image_size: 204800, sector_bytes: 1024, heads: 1,
        dpb: DiskParameterBlock {
            spt: 40, bsh: 3, blm: 7, exm: 0, dsm: 189, drm: 63,
            al0: 0b11000000, al1: 0, cks: 0x8000, off: 2, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Xerox 820 SSSD", image_size: 92160, sector_bytes: 128, heads: 1,
        dpb: DiskParameterBlock {
            spt: 18, bsh: 3, blm: 7, exm: 0, dsm: 81, drm: 31,
            al0: 0b10000000, al1: 0, cks: 0x8000, off: 3, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Televideo DSDD", image_size: 368640, sector_bytes: 256, heads: 2,
        dpb: DiskParameterBlock {
            spt: 36, bsh: 4, blm: 15, exm: 1, dsm: 174, drm: 127,
            al0: 0b11000000, al1: 0, cks: 0x8000, off: 2, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Zenith Z-89 SSSD", image_size: 102400, sector_bytes: 256, heads: 1,
        dpb: DiskParameterBlock {
            spt: 20, bsh: 3, blm: 7, exm: 0, dsm: 91, drm: 63,
            al0: 0b11000000, al1: 0, cks: 0x8000, off: 3, psh: 0, phm: 0
        }
    },
    DpbEntry {
        name: "Generic CP/M 3 720K", image_size: 737280, sector_bytes: 512, heads: 2,
        dpb: DiskParameterBlock {
            spt: 36, bsh: 4, blm: 15, exm: 0, dsm: 354, drm: 127,
            al0: 0b11000000, al1: 0, cks: 0x8000, off: 2, psh: 2, phm: 3
        }
    }
];

/// All database rows matching an image size, in table order.
pub fn lookup_by_size(image_size: usize) -> Vec<&'static DpbEntry> {
    let ans: Vec<&'static DpbEntry> = DPB_TABLE.iter().filter(|e| e.image_size == image_size).collect();
    if ans.is_empty() {
        debug!("no DPB with capacity {}", image_size);
    }
    ans
}

impl DiskParameterBlock {
    /// Check that parameter dependencies are all satisfied.
    pub fn verify(&self) -> bool {
        // n.b. order of these checks can matter
        if self.bsh < 3 || self.bsh > 7 {
            debug!("BSH is invalid");
            return false;
        }
        if self.blm as usize != num_traits::pow(2, self.bsh as usize) - 1 {
            debug!("BLM must be 2^BSH-1");
            return false;
        }
        if self.dsm > 0x7fff {
            debug!("block count exceeds maximum");
            return false;
        }
        if self.bsh == 3 && self.dsm > 0xff {
            debug!("block count exceeds maximum for 1K blocks");
            return false;
        }
        let bls = (128 as usize) << self.bsh as usize;
        let max_exm = match self.dsm {
            dsm if dsm < 256 => 16 * bls / crate::fs::cpm::types::LOGICAL_EXTENT_SIZE - 1,
            _ => 8 * bls / crate::fs::cpm::types::LOGICAL_EXTENT_SIZE - 1
        };
        if self.exm as usize > max_exm {
            debug!("too many logical extents");
            return false;
        }
        match self.exm {
            0b0 | 0b1 | 0b11 | 0b111 | 0b1111 => {},
            _ => {
                debug!("invalid extent mask {}", self.exm);
                return false;
            }
        }
        if self.drm as usize + 1 > 16 * bls / 32 {
            debug!("too many directory entries");
            return false;
        }
        let mut entry_bits = 0;
        for i in 0..8 {
            entry_bits += (self.al0 >> i) & 0x01;
            entry_bits += (self.al1 >> i) & 0x01;
        }
        if entry_bits as usize != (self.drm as usize + 1) * 32 / bls {
            debug!("directory block map mismatch");
            return false;
        }
        if self.dir_blocks() > self.user_blocks() {
            debug!("directory end block out of range");
            return false;
        }
        true
    }
    /// size of block in bytes
    pub fn block_size(&self) -> usize {
        (128 as usize) << self.bsh as usize
    }
    /// size of block pointer in bytes
    pub fn ptr_size(&self) -> usize {
        match self.dsm {
            dsm if dsm < 256 => 1,
            _ => 2
        }
    }
    /// capacity of a full extent in bytes
    pub fn extent_capacity(&self) -> usize {
        (self.exm as usize + 1) * crate::fs::cpm::types::LOGICAL_EXTENT_SIZE
    }
    /// blocks available for directory and data
    pub fn user_blocks(&self) -> usize {
        self.dsm as usize + 1
    }
    /// maximum directory entries
    pub fn dir_entries(&self) -> usize {
        self.drm as usize + 1
    }
    /// number of directory blocks
    pub fn dir_blocks(&self) -> usize {
        self.dir_entries() * crate::fs::cpm::types::DIR_ENTRY_SIZE / self.block_size()
    }
    /// Work out the total byte capacity, accounting for OS tracks and
    /// unused remainder sectors on the last track.  Assumes every track has
    /// the same capacity, which is all the DPB can tell us.
    pub fn disk_capacity(&self) -> usize {
        let track_capacity = self.spt as usize * crate::fs::cpm::types::RECORD_SIZE;
        let os = self.off as usize * track_capacity;
        let user = self.user_blocks() * self.block_size();
        let remainder = user % track_capacity;
        if remainder > 0 {
            os + user + track_capacity - remainder
        } else {
            os + user
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_is_consistent() {
        for entry in &DPB_TABLE {
            assert!(entry.dpb.verify(), "DPB for {} failed verification", entry.name);
            assert!(entry.dpb.disk_capacity() <= entry.image_size,
                "DPB for {} wants more than the image holds", entry.name);
        }
    }

    #[test]
    fn size_lookup() {
        let hits = lookup_by_size(184320);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].name, "Amstrad PCW/Spectrum+3 SSDD");
        assert!(lookup_by_size(999).is_empty());
    }
}
