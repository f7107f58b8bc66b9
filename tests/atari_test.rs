// test of the Atari DOS 2.x file system module
use retroimg::img::atr::Atr;
use retroimg::fs::{atari,DiskFS};

fn blank_disk() -> atari::Disk {
    let img = Atr::create(false);
    let mut disk = atari::Disk::from_img(Box::new(img)).expect("could not mount");
    disk.init().expect("failed to format");
    disk
}

#[test]
fn format() {
    let mut disk = blank_disk();
    // 719 mapped sectors less 3 boot less VTOC and 8 directory sectors
    assert_eq!(disk.free_units().unwrap(), 707);
    assert_eq!(disk.catalog(true).unwrap().len(), 0);
}

#[test]
fn write_and_read() {
    let mut disk = blank_disk();
    let payload: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
    disk.inject_file("HELLO.DAT", "any", 0, &payload).expect("inject failed");
    // 300 bytes at 125 data bytes per sector
    assert_eq!(disk.free_units().unwrap(), 704);
    let files = disk.catalog(false).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "HELLO.DAT");
    assert_eq!(files[0].blocks, 3);
    assert_eq!(disk.extract_file("HELLO.DAT").unwrap(), payload);
}

#[test]
fn zero_length_file() {
    let mut disk = blank_disk();
    let before = disk.free_units().unwrap();
    disk.inject_file("EMPTY", "any", 0, &[]).expect("inject failed");
    // only the directory entry is consumed
    assert_eq!(disk.free_units().unwrap(), before);
    assert_eq!(disk.extract_file("EMPTY").unwrap(), Vec::<u8>::new());
}

#[test]
fn delete_and_recover() {
    let mut disk = blank_disk();
    let payload: Vec<u8> = (0..500u32).map(|i| (i * 7 % 256) as u8).collect();
    disk.inject_file("GAME.XEX", "any", 0, &payload).unwrap();
    disk.delete_file("GAME.XEX").unwrap();
    assert_eq!(disk.free_units().unwrap(), 707);
    assert_eq!(disk.catalog(false).unwrap().len(), 0);
    // deleted entries remain visible to the full catalog
    let all = disk.catalog(true).unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].deleted);
    // sectors were not reused, so the chain walks verbatim
    assert_eq!(disk.recover_deleted("GAME.XEX").unwrap(), payload);
    // once something reuses the sectors the recovery refuses
    disk.inject_file("NEW.DAT", "any", 0, &vec![0x55; 2000]).unwrap();
    assert!(disk.recover_deleted("GAME.XEX").is_err());
}

#[test]
fn rename_and_lock() {
    let mut disk = blank_disk();
    disk.inject_file("OLD", "any", 0, &[1,2,3]).unwrap();
    disk.rename_file("OLD", "NEW").unwrap();
    assert!(disk.extract_file("OLD").is_err());
    assert_eq!(disk.extract_file("NEW").unwrap(), vec![1,2,3]);
    disk.set_locked("NEW", true).unwrap();
    assert!(disk.delete_file("NEW").is_err());
    assert!(disk.rename_file("NEW", "NEWER").is_err());
    disk.set_locked("NEW", false).unwrap();
    disk.delete_file("NEW").unwrap();
}

#[test]
fn name_rules() {
    let mut disk = blank_disk();
    assert!(disk.inject_file("BAD NAME", "any", 0, &[1]).is_err());
    assert!(disk.inject_file("1LEADING", "any", 0, &[1]).is_err());
    disk.inject_file("GOOD.TXT", "any", 0, &[1]).unwrap();
    assert!(disk.inject_file("GOOD.TXT", "any", 0, &[2]).is_err());
}

#[test]
fn out_of_space() {
    let mut disk = blank_disk();
    let big = vec![0xaa; 125 * 350];
    disk.inject_file("F1", "any", 0, &big).unwrap();
    disk.inject_file("F2", "any", 0, &big).unwrap();
    let before = disk.free_units().unwrap();
    match disk.inject_file("F3", "any", 0, &big) {
        Ok(_) => panic!("should have been disk full"),
        Err(e) => assert_eq!(e.to_string(), "disk full")
    }
    // atomic: nothing stayed allocated
    assert_eq!(disk.free_units().unwrap(), before);
    assert!(disk.extract_file("F3").is_err());
}

#[test]
fn bitmap_stays_consistent() {
    let mut disk = blank_disk();
    disk.inject_file("A", "any", 0, &vec![1; 700]).unwrap();
    disk.inject_file("B", "any", 0, &vec![2; 1400]).unwrap();
    disk.delete_file("A").unwrap();
    disk.inject_file("C", "any", 0, &vec![3; 100]).unwrap();
    disk.rename_file("B", "BB").unwrap();
    // a rebuild finds nothing to change, and the walks are clean
    assert_eq!(disk.rebuild_bitmap(false).unwrap(), 0);
    let diags = disk.validate_directory().unwrap();
    assert_eq!(diags.entries().len(), 0);
    // twice is the same as once
    disk.rebuild_bitmap(true).unwrap();
    assert_eq!(disk.rebuild_bitmap(false).unwrap(), 0);
}
