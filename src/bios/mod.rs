//! # BIOS Module
//!
//! Tables that sit between the file systems and the disk images: the CP/M
//! disk parameter blocks, and the sector skews.  These are kept separate
//! because multiple submodules of either `fs` or `img` use the same tables.

pub mod dpb;
pub mod skew;
