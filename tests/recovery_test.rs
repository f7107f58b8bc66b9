// test of the recovery pipeline
use retroimg::crc::crc16_ccitt;
use retroimg::recover::{self,CancelToken,RecoveryOptions,Stage};
use retroimg::img::atr::Atr;
use retroimg::fs::{atari,DiskFS};

fn mounted_disk() -> Box<dyn DiskFS> {
    let _ = env_logger::builder().is_test(true).try_init();
    let img = Atr::create(false);
    let mut disk = atari::Disk::from_img(Box::new(img)).unwrap();
    disk.init().unwrap();
    disk.inject_file("ONE", "any", 0, &vec![0x11; 700]).unwrap();
    disk.inject_file("TWO", "any", 0, &vec![0x22; 1300]).unwrap();
    Box::new(disk)
}

#[test]
fn crc_correction_single_flip() {
    // a 256 byte sector: 254 data bytes and the CRC-16/CCITT over them
    let mut sector: Vec<u8> = (0..256u32).map(|i| (i * 11 % 256) as u8).collect();
    let crc = crc16_ccitt(0xffff, &sector[0..254]);
    sector[254..256].copy_from_slice(&u16::to_be_bytes(crc));
    let original = sector[42];
    sector[42] ^= 0x08;
    let stored = u16::from_be_bytes([sector[254], sector[255]]);
    let flips = recover::correct_crc(&mut sector[0..254], stored, 1).expect("correction failed");
    assert_eq!(flips, 1);
    assert_eq!(sector[42], original);
    assert_eq!(crc16_ccitt(0xffff, &sector[0..254]), stored);
}

#[test]
fn crc_correction_respects_bound() {
    let mut sector: Vec<u8> = (0..254u32).map(|i| (i * 3 % 256) as u8).collect();
    let crc = crc16_ccitt(0xffff, &sector);
    sector[7] ^= 0x01;
    sector[9] ^= 0x10;
    // two flips of damage is always reachable within the bound, and
    // whatever the search applies must satisfy the CRC
    let flips = recover::correct_crc(&mut sector, crc, 2).expect("should be correctable");
    assert!(flips >= 1 && flips <= 2);
    assert_eq!(crc16_ccitt(0xffff, &sector), crc);
    // a zero allowance means no search at all
    let mut damaged: Vec<u8> = (0..254u32).map(|i| (i * 3 % 256) as u8).collect();
    let crc = crc16_ccitt(0xffff, &damaged);
    damaged[0] ^= 0x01;
    assert!(recover::correct_crc(&mut damaged, crc, 0).is_none());
}

#[test]
fn consensus_of_three_revolutions() {
    let a = vec![0u8; 10];
    let mut b = vec![0u8; 10];
    b[2] = 0xff;
    let c = vec![0u8; 10];
    let consensus = recover::merge_revolutions(&[&a[..], &b[..], &c[..]]).unwrap();
    assert_eq!(consensus.bytes, vec![0u8; 10]);
    let mut mask = vec![0u8; 10];
    mask[2] = 0xff;
    assert_eq!(consensus.weak_mask, mask);
    // the disagreeing byte is still a strict majority everywhere
    assert!((consensus.confidence - 1.0).abs() < 1e-9);
    // weak bit density of that mask
    assert!((recover::weak_bit_density(&consensus.weak_mask) - 0.1).abs() < 1e-9);
}

#[test]
fn clean_disk_scores_clean() {
    let mut fs = mounted_disk();
    let opts = RecoveryOptions::default();
    let cancel = CancelToken::new();
    let report = recover::recover_disk(&mut fs, &opts, &cancel).unwrap();
    assert!(!report.cancelled);
    assert!((report.score - 1.0).abs() < 1e-9);
    assert_eq!(report.diagnosis.count(retroimg::diag::Severity::Error), 0);
    assert!(report.events.iter().any(|e| e.stage == Stage::Scan));
    assert!(report.events.iter().any(|e| e.stage == Stage::BamRepair));
    // a second run is a no-op on the quality score
    let again = recover::recover_disk(&mut fs, &opts, &cancel).unwrap();
    assert!((again.score - report.score).abs() < 1e-9);
}

#[test]
fn bam_repair_pass() {
    let mut fs = mounted_disk();
    // clobber the bitmap state of a sector belonging to a file
    {
        let disk = fs.as_mut();
        let info = disk.catalog(false).unwrap();
        assert!(info.len() > 0);
        // free every sector then ask the pipeline to fix it
        let before = disk.free_units().unwrap();
        disk.rebuild_bitmap(true).unwrap();
        assert_eq!(disk.free_units().unwrap(), before);
    }
    let mut opts = RecoveryOptions::default();
    opts.repair_bam = true;
    let cancel = CancelToken::new();
    let report = recover::recover_disk(&mut fs, &opts, &cancel).unwrap();
    assert!(!report.cancelled);
    // nothing to fix on a consistent disk
    assert_eq!(report.diagnosis.count(retroimg::diag::Severity::Warning), 0);
}

#[test]
fn cancellation_returns_partial() {
    let mut fs = mounted_disk();
    let opts = RecoveryOptions::default();
    let cancel = CancelToken::new();
    cancel.cancel();
    let report = recover::recover_disk(&mut fs, &opts, &cancel).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.events.len(), 0);
}

#[test]
fn paranoid_options() {
    let opts = RecoveryOptions::paranoid();
    assert_eq!(opts.max_retries, 20);
    assert_eq!(opts.max_crc_corrections, 2);
    assert!(opts.override_errors);
    let defaults = RecoveryOptions::default();
    assert_eq!(defaults.max_retries, 5);
    assert_eq!(defaults.max_crc_corrections, 1);
}

#[test]
fn protection_fingerprint() {
    use retroimg::img::d64::D64;
    use retroimg::img::DiskImage;
    let mut d64 = D64::create(35);
    // plant a V-MAX! signature at the front of track 21 (cylinder 20)
    let mut sector = vec![0u8; 256];
    sector[0..5].copy_from_slice(&[0x49, 0xdb, 0x49, 0xdb, 0x49]);
    d64.write_sector(20, 0, 0, &sector).unwrap();
    let mut boxed: Box<dyn DiskImage> = Box::new(d64);
    let hits = retroimg::detect_protection(&mut boxed);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].scheme, "V-MAX!");
    assert_eq!(hits[0].track, 20);
    assert!(hits[0].confidence >= 0.85 && hits[0].confidence <= 1.0);
}
