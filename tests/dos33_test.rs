// test of the DOS 3.3 file system module
use retroimg::img::dsk::{Dsk,SectorOrder};
use retroimg::img::geometry;
use retroimg::fs::{dos33,DiskFS};

fn blank_disk() -> dos33::Disk {
    let img = Dsk::create(geometry::A2_DOS33, SectorOrder::Dos33Logical);
    let mut disk = dos33::Disk::from_img(Box::new(img)).expect("could not mount");
    disk.init(254).expect("failed to INIT");
    disk
}

#[test]
fn format() {
    let mut disk = blank_disk();
    // 33 data tracks of 16 sectors
    assert_eq!(disk.free_units().unwrap(), 528);
    assert_eq!(disk.catalog(true).unwrap().len(), 0);
}

#[test]
fn binary_inject_extract_delete_recover() {
    // the binary file carries its address and exact length on disk
    let mut disk = blank_disk();
    disk.inject_file("TEST", "bin", 0x2000, &[1,2,3]).expect("inject failed");
    let got = disk.extract_file("TEST").expect("extract failed");
    assert_eq!(got, vec![1,2,3]);
    let files = disk.catalog(false).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "TEST");
    assert_eq!(files[0].typ, "B");
    assert_eq!(files[0].blocks, 1);
    // delete, then pull the same bytes back through the recovery path
    disk.delete_file("TEST").unwrap();
    assert_eq!(disk.catalog(false).unwrap().len(), 0);
    assert_eq!(disk.recover_deleted("TEST").unwrap(), vec![1,2,3]);
}

#[test]
fn text_file_round_trip() {
    use retroimg::fs::TextConversion;
    let mut disk = blank_disk();
    let encoder = dos33::types::TextConverter::new(vec![0x8d]);
    let raw = encoder.from_utf8("HELLO FROM THE DISK\n").unwrap();
    disk.inject_file("NOTES", "txt", 0, &raw).unwrap();
    let back = disk.extract_file("NOTES").unwrap();
    assert_eq!(&back[0..raw.len()], &raw[..]);
}

#[test]
fn large_file_spans_tslists() {
    let mut disk = blank_disk();
    // 130 sectors of data needs two track sector lists
    let payload: Vec<u8> = (0..130*256u32).map(|i| (i % 253) as u8).collect();
    disk.inject_file("BIG", "bin", 0x800, &payload).unwrap();
    assert_eq!(disk.extract_file("BIG").unwrap(), payload);
    assert_eq!(disk.rebuild_bitmap(false).unwrap(), 0);
}

#[test]
fn out_of_space() {
    let mut disk = blank_disk();
    let big = vec![0; 0x8f00];
    disk.inject_file("F1", "bin", 0x800, &big).unwrap();
    disk.inject_file("F2", "bin", 0x800, &big).unwrap();
    disk.inject_file("F3", "bin", 0x800, &big).unwrap();
    let before = disk.free_units().unwrap();
    match disk.inject_file("F4", "bin", 0x800, &big) {
        Ok(l) => panic!("wrote {} but should be disk full", l),
        Err(e) => assert_eq!(e.to_string(), "DISK FULL")
    }
    assert_eq!(disk.free_units().unwrap(), before);
}

#[test]
fn consistency_after_mutations() {
    let mut disk = blank_disk();
    disk.inject_file("ALPHA", "bin", 0x300, &vec![1; 1000]).unwrap();
    disk.inject_file("BETA", "txt", 0, &vec![0x80 | b'X'; 600]).unwrap();
    disk.delete_file("ALPHA").unwrap();
    disk.inject_file("GAMMA", "bin", 0x300, &vec![2; 200]).unwrap();
    disk.rename_file("BETA", "BETA2").unwrap();
    disk.set_locked("GAMMA", true).unwrap();
    assert_eq!(disk.rebuild_bitmap(false).unwrap(), 0);
    let diags = disk.validate_directory().unwrap();
    assert_eq!(diags.entries().len(), 0);
    assert!((diags.quality() - 1.0).abs() < 1e-9);
}

#[test]
fn fs_is_detected() {
    let img = Dsk::create(geometry::A2_DOS33, SectorOrder::Dos33Logical);
    let mut disk = dos33::Disk::from_img(Box::new(img)).unwrap();
    disk.init(254).unwrap();
    let flat = disk.get_img().to_bytes();
    let mut fs = retroimg::create_fs_from_bytestream(&flat, Some("do")).expect("detection failed");
    assert_eq!(fs.fs_name(), "DOS 3.3");
    assert_eq!(fs.catalog(true).unwrap().len(), 0);
}
