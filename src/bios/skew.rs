//! ## Sector Skewing Module
//!
//! This contains the software sector skew tables: transformations between
//! file system order and the order the sectors actually pass the head.
//! They are kept apart from the file systems and the disk images because
//! submodules of both use the same tables.  The geometry oracle in
//! `img::geometry` deliberately answers in physical order; whatever needs
//! logical order comes here.

use log::{error,trace};
use crate::DYNERR;

/// Skew table for native 8 inch CP/M v1 disks
pub const CPM_1_LSEC_TO_PSEC: [u8;26] = [1,7,13,19,25,5,11,17,23,3,9,15,21,2,8,14,20,26,6,12,18,24,4,10,16,22];
/// Skew table for Osborne 5.25 inch SSSD disks
pub const CPM_LSEC_TO_OSB1_PSEC: [u8;10] = [1,3,5,7,9,2,4,6,8,10];
/// Translate DOS 3.3 logical sector to physical sector
pub const DOS_LSEC_TO_DOS_PSEC: [usize;16] = [0,13,11,9,7,5,3,1,14,12,10,8,6,4,2,15];
/// Translate DOS 3.3 physical sector to logical sector
pub const DOS_PSEC_TO_DOS_LSEC: [usize;16] = [0,7,14,6,13,5,12,4,11,3,10,2,9,1,8,15];

/// Get block number and byte offset into block corresponding to a DOS 3.3
/// track and logical sector.  Returned in tuple (block, offset).
pub fn prodos_block_from_ts(track: usize, sector: usize) -> (usize, usize) {
    let block_offset: [usize;16] = [0,7,6,6,5,5,4,4,3,3,2,2,1,1,0,7];
    let byte_offset: [usize;16] = [0,0,256,0,256,0,256,0,256,0,256,0,256,0,256,256];
    (8 * track + block_offset[sector], byte_offset[sector])
}

/// Get the pair of DOS 3.3 track and logical sector holding a ProDOS block
/// on a 5.25 inch disk.  The returned vector is in order.
pub fn ts_from_prodos_block(block: usize) -> Vec<[usize;2]> {
    let sector1: [usize;8] = [0,13,11,9,7,5,3,1];
    let sector2: [usize;8] = [14,12,10,8,6,4,2,15];
    let [track, sec1, sec2] = [block/8, sector1[block%8], sector2[block%8]];
    trace!("locate block for 5.25 inch disk: track {}, sectors {},{}", track, sec1, sec2);
    vec![[track,sec1],[track,sec2]]
}

/// Take a logical track-sector list and produce a hybrid
/// cylinder-head-sector list, where the sector order is logical while the
/// size is physical.  Remember CP/M logical sectors are numbered from 1.
/// This assumes the mapping track = cyl*heads + head.
pub fn cpm_blocking(ts_list: Vec<[usize;2]>, sec_shift: u8, heads: usize) -> Result<Vec<[usize;3]>,DYNERR> {
    trace!("ts list {:?} (logical deblocked)", ts_list);
    if (ts_list.len() % (1 << sec_shift) != 0) || ((ts_list[0][1]-1) % (1 << sec_shift) != 0) {
        error!("CP/M blocking was misaligned, start {}, length {}", ts_list[0][1], ts_list.len());
        return Err(Box::new(crate::img::Error::SectorAccess));
    }
    if heads < 1 {
        error!("CP/M blocking was passed 0 heads");
        return Err(Box::new(crate::img::Error::SectorAccess));
    }
    let mut ans: Vec<[usize;3]> = Vec::new();
    let mut track = 0;
    for i in 0..ts_list.len() {
        let lsec = ts_list[i][1];
        if (lsec-1) % (1 << sec_shift) == 0 {
            track = ts_list[i][0];
        }
        if lsec % (1 << sec_shift) == 0 {
            let cyl = track / heads;
            let head = match heads { 1 => 0, _ => track % heads };
            ans.push([cyl, head, 1 + (lsec-1)/(1 << sec_shift)]);
        } else if ts_list[i][0] != track {
            error!("CP/M blocking failed, sector crossed track {}", track);
            return Err(Box::new(crate::img::Error::SectorAccess));
        }
    }
    trace!("ts list {:?} (logical blocked)", ans);
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos33_tables_are_inverse() {
        for lsec in 0..16 {
            assert_eq!(DOS_PSEC_TO_DOS_LSEC[DOS_LSEC_TO_DOS_PSEC[lsec]], lsec);
        }
    }

    #[test]
    fn prodos_block_mapping_is_consistent() {
        for block in 0..280 {
            let ts_list = ts_from_prodos_block(block);
            let (b1, off1) = prodos_block_from_ts(ts_list[0][0], ts_list[0][1]);
            let (b2, off2) = prodos_block_from_ts(ts_list[1][0], ts_list[1][1]);
            assert_eq!(b1, block);
            assert_eq!(b2, block);
            assert_eq!(off1, 0);
            assert_eq!(off2, 256);
        }
    }

    #[test]
    fn cpm_blocking_folds_records() {
        // one 1K block = 8 records starting at lsec 1 on track 2
        let ts_list: Vec<[usize;2]> = (1..9).map(|s| [2,s]).collect();
        let chs = cpm_blocking(ts_list, 1, 1).unwrap();
        assert_eq!(chs, vec![[2,0,1],[2,0,2],[2,0,3],[2,0,4]]);
    }
}
