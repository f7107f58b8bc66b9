//! # Recovery Module
//!
//! The forensic passes for damaged media: multi-revolution consensus,
//! CRC correction by bounded bit-flip search, weak bit detection, BAM
//! rebuild, directory chain validation, and protection fingerprinting.
//! The passes can run as a unit through `recover_disk` or individually
//! through their functions.
//!
//! Long runs check a cancellation token between tracks; on cancellation
//! the partial report is handed back with the `Cancelled` marker set and
//! nothing further is mutated.

pub mod protect;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool,Ordering};
use log::{debug,info,trace};
use crate::fs::DiskFS;
use crate::crc::crc16_ccitt;
use crate::diag::{Code,DiagnosisList,ScoreBundle,Severity};
use crate::DYNERR;

/// Enumerates recovery errors.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("operation was cancelled")]
    Cancelled,
    #[error("not enough revolutions")]
    NotEnoughRevolutions,
    /// always fatal to the operation; prior writes stand, and the
    /// directory-before-bitmap ordering keeps the image parseable
    #[error("out of memory")]
    OutOfMemory
}

/// Options recognized by the recovery and conversion paths.
#[derive(Clone)]
pub struct RecoveryOptions {
    /// per-sector retry count
    pub max_retries: usize,
    /// floor below which a recovered sector is reported partial
    pub min_confidence: f64,
    pub min_revolutions: usize,
    pub max_revolutions: usize,
    pub enable_crc_correction: bool,
    /// bit flips the search may apply, capped at 2
    pub max_crc_corrections: usize,
    pub detect_weak_bits: bool,
    /// carry weak bit masks into output images when supported
    pub preserve_weak_bits: bool,
    /// pass 4 becomes mutating
    pub repair_bam: bool,
    /// pass 5 becomes mutating
    pub repair_directory: bool,
    /// keep every revolution in the session
    pub preserve_all_passes: bool,
    /// emit the full diagnosis trace
    pub create_audit_log: bool,
    /// continue on hard errors, filling the gap
    pub override_errors: bool,
    /// byte used to fill skipped regions
    pub fill_pattern: u8,
    /// weak bytes per track beyond which protection is suspected
    pub weak_bit_threshold: f64
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_confidence: 0.8,
            min_revolutions: 2,
            max_revolutions: 5,
            enable_crc_correction: true,
            max_crc_corrections: 1,
            detect_weak_bits: true,
            preserve_weak_bits: false,
            repair_bam: false,
            repair_directory: false,
            preserve_all_passes: false,
            create_audit_log: false,
            override_errors: false,
            fill_pattern: 0xe5,
            weak_bit_threshold: 0.05
        }
    }
}

impl RecoveryOptions {
    /// the everything-on profile for badly damaged disks
    pub fn paranoid() -> Self {
        Self {
            max_retries: 20,
            min_confidence: 0.5,
            min_revolutions: 3,
            max_revolutions: 16,
            enable_crc_correction: true,
            max_crc_corrections: 2,
            detect_weak_bits: true,
            preserve_weak_bits: true,
            repair_bam: true,
            repair_directory: true,
            preserve_all_passes: true,
            create_audit_log: true,
            override_errors: true,
            fill_pattern: 0xe5,
            weak_bit_threshold: 0.05
        }
    }
}

/// Cloneable cancellation handle checked between tracks.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false))
        }
    }
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// One progress event; the report's event list is the pull-based
/// replacement for a blocking progress callback.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Stage {
    Scan,
    BamRepair,
    DirectoryCheck,
    Protection
}

#[derive(Clone,Copy)]
pub struct ProgressEvent {
    pub done: usize,
    pub total: usize,
    pub stage: Stage
}

/// Consensus of several reads of the same track.
pub struct Consensus {
    pub bytes: Vec<u8>,
    /// one mask byte per output byte, a set bit disagreed somewhere
    pub weak_mask: Vec<u8>,
    /// fraction of bytes whose every bit had a strict majority
    pub confidence: f64
}

/// Pass 1: bit-level majority across revolutions.  Ties go to the first
/// revolution.  Output length is the shortest revolution.
pub fn merge_revolutions(revs: &[&[u8]]) -> Result<Consensus,Error> {
    let k = revs.len();
    if k < 2 {
        return Err(Error::NotEnoughRevolutions);
    }
    let len = revs.iter().map(|r| r.len()).min().unwrap_or(0);
    let mut bytes = Vec::with_capacity(len);
    let mut weak_mask = Vec::with_capacity(len);
    let mut solid = 0;
    for i in 0..len {
        let mut mask = 0u8;
        for rev in &revs[1..] {
            mask |= revs[0][i] ^ rev[i];
        }
        let mut out = 0u8;
        let mut all_strict = true;
        for bit in 0..8 {
            let m = 0x80u8 >> bit;
            let ones = revs.iter().filter(|r| r[i] & m > 0).count();
            let zeros = k - ones;
            if ones > zeros {
                out |= m;
            } else if ones == zeros {
                // tie breaks toward the first revolution
                out |= revs[0][i] & m;
                all_strict = false;
            }
        }
        if all_strict {
            solid += 1;
        }
        bytes.push(out);
        weak_mask.push(mask);
    }
    Ok(Consensus {
        bytes,
        weak_mask,
        confidence: match len {
            0 => 0.0,
            n => solid as f64 / n as f64
        }
    })
}

/// Pass 2: restore a sector whose CRC-16/CCITT does not match by toggling
/// up to `max_flips` bits (capped at 2, the search is combinatorial past
/// that).  Returns the number of flips applied, or None.
///
/// The register update is affine, so the effect of a flip is independent
/// of the data: precompute the delta of every single bit and look for a
/// combination matching the observed delta.
pub fn correct_crc(dat: &mut [u8], stored_crc: u16, max_flips: usize) -> Option<usize> {
    let computed = crc16_ccitt(0xffff, dat);
    if computed == stored_crc {
        return Some(0);
    }
    let max_flips = usize::min(max_flips, 2);
    if max_flips == 0 {
        return None;
    }
    let target = computed ^ stored_crc;
    let nbits = dat.len() * 8;
    // delta of flipping bit i, from the zero-seed CRC of the unit vector
    let mut deltas: Vec<u16> = Vec::with_capacity(nbits);
    let mut unit = vec![0u8; dat.len()];
    for i in 0..nbits {
        unit[i / 8] = 0x80 >> (i % 8);
        deltas.push(crc16_ccitt(0, &unit[i/8..]));
        unit[i / 8] = 0;
    }
    for i in 0..nbits {
        if deltas[i] == target {
            dat[i / 8] ^= 0x80 >> (i % 8);
            return Some(1);
        }
    }
    if max_flips < 2 {
        return None;
    }
    let mut index: std::collections::HashMap<u16,usize> = std::collections::HashMap::new();
    for i in 0..nbits {
        index.insert(deltas[i], i);
    }
    for i in 0..nbits {
        if let Some(j) = index.get(&(deltas[i] ^ target)) {
            if *j != i {
                dat[i / 8] ^= 0x80 >> (i % 8);
                dat[j / 8] ^= 0x80 >> (j % 8);
                return Some(2);
            }
        }
    }
    None
}

/// Pass 3: weak bit density of a track from its consensus mask.
pub fn weak_bit_density(weak_mask: &[u8]) -> f64 {
    if weak_mask.is_empty() {
        return 0.0;
    }
    let weak = weak_mask.iter().filter(|m| **m > 0).count();
    weak as f64 / weak_mask.len() as f64
}

/// The recovery report: diagnoses, the weighted score, and the progress
/// event log the caller can walk at its leisure.
pub struct RecoveryReport {
    pub diagnosis: DiagnosisList,
    pub score: f64,
    pub events: Vec<ProgressEvent>,
    pub protections: Vec<protect::Match>,
    pub cancelled: bool
}

/// Run passes 4, 5, and 6 plus a full sector scan over a mounted file
/// system.  When the token cancels, the pipeline hands back whatever it
/// accumulated with the `cancelled` marker set.
pub fn recover_disk(fs: &mut Box<dyn DiskFS>, opts: &RecoveryOptions, cancel: &CancelToken) -> Result<RecoveryReport,DYNERR> {
    let mut diagnosis = DiagnosisList::new();
    let mut events: Vec<ProgressEvent> = Vec::new();
    let mut protections: Vec<protect::Match> = Vec::new();
    let mut bundle = ScoreBundle::perfect();
    let img = fs.get_img();
    let tracks = img.track_count();
    let geom = img.geometry();
    // sector scan
    let mut total_sectors = 0;
    let mut good_sectors = 0;
    for trk in 0..tracks {
        if cancel.is_cancelled() {
            return Ok(RecoveryReport {
                diagnosis,
                score: bundle.overall(),
                events,
                protections,
                cancelled: true
            });
        }
        if let Some(geom) = geom {
            let (cyl, head) = (trk / geom.heads, trk % geom.heads);
            if cyl < geom.cylinders {
                for s in 0..geom.sectors_on(cyl) {
                    let sec = s + geom.first_sector_id;
                    total_sectors += 1;
                    match img.read_sector(cyl, head, sec) {
                        Ok(_) => good_sectors += 1,
                        Err(e) => {
                            debug!("cyl {} sector {}: {}", cyl, sec, e);
                            diagnosis.add_sector(Code::PartialSector, Severity::Error, cyl, sec,
                                "sector unreadable, filled with pattern");
                            if !opts.override_errors {
                                bundle.crc = match total_sectors {
                                    0 => 0.0,
                                    t => good_sectors as f64 / t as f64
                                };
                                return Err(e);
                            }
                            // the skipped region becomes the fill pattern
                            let fill = vec![opts.fill_pattern; geom.bytes_per_sector];
                            let _ = img.write_sector(cyl, head, sec, &fill);
                        }
                    }
                }
            }
        }
        events.push(ProgressEvent {
            done: trk + 1,
            total: tracks,
            stage: Stage::Scan
        });
    }
    if total_sectors > 0 {
        bundle.crc = good_sectors as f64 / total_sectors as f64;
        bundle.data_crc_ok = good_sectors == total_sectors;
    }
    // open-time diagnoses ride along
    let open_diags = img.diagnostics();
    bundle.gcr = match open_diags.count(Severity::Error) {
        0 => 1.0,
        n => (1.0 - n as f64 / usize::max(total_sectors, 1) as f64).max(0.0)
    };
    diagnosis.extend(open_diags);
    // pass 6 before any mutation, the fingerprints want the raw tracks
    for trk in 0..tracks {
        if cancel.is_cancelled() {
            return Ok(RecoveryReport {
                diagnosis,
                score: bundle.overall(),
                events,
                protections,
                cancelled: true
            });
        }
        let (cyl, head) = match geom {
            Some(g) => (trk / g.heads, trk % g.heads),
            None => (trk, 0)
        };
        if let Ok(buf) = img.get_track_buf(cyl, head) {
            if let Some(m) = protect::match_track(trk, &buf, false, false) {
                diagnosis.push(crate::diag::Diagnosis {
                    code: Code::ProtectionMatch,
                    severity: Severity::Protection,
                    track: Some(trk),
                    sector: None,
                    bit_offset: None,
                    message: format!("{} ({}) fingerprint, confidence {:.2}", m.scheme, m.platform, m.confidence)
                });
                protections.push(m);
            }
        }
        events.push(ProgressEvent {
            done: trk + 1,
            total: tracks,
            stage: Stage::Protection
        });
    }
    // pass 4
    let changed = fs.rebuild_bitmap(opts.repair_bam)?;
    if changed > 0 {
        let (code, severity, verb) = match opts.repair_bam {
            true => (Code::BamRepaired, Severity::Warning, "repaired"),
            false => (Code::BamMismatch, Severity::Warning, "would repair")
        };
        diagnosis.add(code, severity, &format!("allocation map rebuild {} {} units", verb, changed));
        bundle.recovered = opts.repair_bam;
    }
    events.push(ProgressEvent {
        done: 1,
        total: 1,
        stage: Stage::BamRepair
    });
    // pass 5
    let dir_diags = fs.validate_directory()?;
    let broken = dir_diags.count(Severity::Error);
    diagnosis.extend(dir_diags);
    if broken > 0 {
        bundle.id = (1.0 - broken as f64 / 10.0).max(0.0);
        if opts.repair_directory {
            diagnosis.add(Code::DirectoryRepaired, Severity::Warning,
                &format!("{} broken chains marked", broken));
        }
    }
    events.push(ProgressEvent {
        done: 1,
        total: 1,
        stage: Stage::DirectoryCheck
    });
    info!("recovery score {:.3}", bundle.overall());
    trace!("{} diagnoses", diagnosis.entries().len());
    Ok(RecoveryReport {
        diagnosis,
        score: bundle.overall(),
        events,
        protections,
        cancelled: false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consensus_majority() {
        let a = vec![0u8;10];
        let mut b = vec![0u8;10];
        b[2] = 0xff;
        let c = vec![0u8;10];
        let consensus = merge_revolutions(&[&a[..], &b[..], &c[..]]).unwrap();
        assert_eq!(consensus.bytes, vec![0u8;10]);
        let mut expected_mask = vec![0u8;10];
        expected_mask[2] = 0xff;
        assert_eq!(consensus.weak_mask, expected_mask);
        assert!((consensus.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn consensus_tie_prefers_first() {
        let a = vec![0xf0u8;4];
        let b = vec![0x0fu8;4];
        let consensus = merge_revolutions(&[&a[..], &b[..]]).unwrap();
        assert_eq!(consensus.bytes, vec![0xf0u8;4]);
        assert!(consensus.confidence < 1.0);
    }

    #[test]
    fn one_revolution_is_not_enough() {
        let a = vec![0u8;10];
        assert!(matches!(merge_revolutions(&[&a[..]]), Err(Error::NotEnoughRevolutions)));
    }

    #[test]
    fn single_bit_correction() {
        let mut sector: Vec<u8> = (0..254).map(|i| (i * 7) as u8).collect();
        let crc = crc16_ccitt(0xffff, &sector);
        sector[42] ^= 0x08;
        let flips = correct_crc(&mut sector, crc, 1).unwrap();
        assert_eq!(flips, 1);
        assert_eq!(sector[42], (42 * 7) as u8);
        assert_eq!(crc16_ccitt(0xffff, &sector), crc);
    }

    #[test]
    fn double_bit_correction() {
        let mut sector: Vec<u8> = (0..254).map(|i| (i * 13) as u8).collect();
        let crc = crc16_ccitt(0xffff, &sector);
        sector[10] ^= 0x01;
        sector[200] ^= 0x80;
        assert!(correct_crc(&mut sector.clone(), crc, 1).is_none());
        let flips = correct_crc(&mut sector, crc, 2).unwrap();
        assert_eq!(flips, 2);
        assert_eq!(crc16_ccitt(0xffff, &sector), crc);
    }

    #[test]
    fn weak_density() {
        let mut mask = vec![0u8;100];
        for i in 0..7 {
            mask[i] = 1;
        }
        assert!((weak_bit_density(&mask) - 0.07).abs() < 1e-9);
    }
}
