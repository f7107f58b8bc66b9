// test of the CP/M file system module
use retroimg::img::dsk::{Dsk,SectorOrder};
use retroimg::img::geometry::FormatDescriptor;
use retroimg::bios::dpb;
use retroimg::fs::{cpm,DiskFS};

fn blank_disk() -> cpm::Disk {
    let geom = FormatDescriptor::from_dpb(&dpb::AMSTRAD_184K, 512, 1);
    let img = Dsk::create(geom, SectorOrder::Linear);
    let mut disk = cpm::Disk::from_img(Box::new(img), dpb::AMSTRAD_184K);
    disk.init().expect("failed to format");
    disk
}

#[test]
fn format() {
    let mut disk = blank_disk();
    // 175 user blocks less the 2 directory blocks
    assert_eq!(disk.free_units().unwrap(), 173);
    assert_eq!(disk.catalog(true).unwrap().len(), 0);
}

#[test]
fn single_extent_round_trip() {
    let mut disk = blank_disk();
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 241) as u8).collect();
    disk.inject_file("HELLO.TXT", "", 0, &payload).unwrap();
    assert_eq!(disk.extract_file("HELLO.TXT").unwrap(), payload);
    let files = disk.catalog(false).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "HELLO.TXT");
    assert_eq!(files[0].typ, "TXT");
    assert_eq!(files[0].blocks, 5);
    assert_eq!(files[0].eof, Some(5000));
}

#[test]
fn multi_extent_round_trip() {
    let mut disk = blank_disk();
    // three extents at 16K per extent for this DPB
    let payload: Vec<u8> = (0..40000u32).map(|i| (i * 7 % 256) as u8).collect();
    disk.inject_file("BIG.DAT", "", 0, &payload).unwrap();
    assert_eq!(disk.extract_file("BIG.DAT").unwrap(), payload);
    assert_eq!(disk.catalog(false).unwrap()[0].blocks, 40);
    let diags = disk.validate_directory().unwrap();
    assert_eq!(diags.entries().len(), 0);
}

#[test]
fn record_aligned_file() {
    let mut disk = blank_disk();
    let payload = vec![0x1a; 1024];
    disk.inject_file("ALIGNED.BIN", "", 0, &payload).unwrap();
    assert_eq!(disk.extract_file("ALIGNED.BIN").unwrap(), payload);
}

#[test]
fn user_numbers() {
    let mut disk = blank_disk();
    disk.inject_file("0:SAME.TXT", "", 0, &[1]).unwrap();
    disk.inject_file("3:SAME.TXT", "", 0, &[2]).unwrap();
    assert_eq!(disk.extract_file("SAME.TXT").unwrap(), vec![1]);
    assert_eq!(disk.extract_file("3:SAME.TXT").unwrap(), vec![2]);
    let files = disk.catalog(false).unwrap();
    assert_eq!(files.len(), 2);
    assert!(matches!(disk.inject_file("16:BAD", "", 0, &[0]),
        Err(e) if e.to_string() == "invalid user number"));
}

#[test]
fn name_rules() {
    let mut disk = blank_disk();
    // lower case coerces up, the attribute characters are legal
    disk.inject_file("a-b_c$#.x", "", 0, &[9]).unwrap();
    assert_eq!(disk.extract_file("A-B_C$#.X").unwrap(), vec![9]);
    assert!(disk.inject_file("WAY*BAD", "", 0, &[0]).is_err());
    assert!(disk.inject_file("TOO.LONGEXT", "", 0, &[0]).is_err());
}

#[test]
fn read_only_attribute() {
    let mut disk = blank_disk();
    disk.inject_file("SAFE.COM", "", 0, &[1,2]).unwrap();
    disk.set_locked("SAFE.COM", true).unwrap();
    assert!(disk.catalog(false).unwrap()[0].locked);
    assert!(disk.delete_file("SAFE.COM").is_err());
    disk.set_locked("SAFE.COM", false).unwrap();
    disk.delete_file("SAFE.COM").unwrap();
    assert_eq!(disk.free_units().unwrap(), 173);
}

#[test]
fn rename_across_users() {
    let mut disk = blank_disk();
    disk.inject_file("MOVE.ME", "", 0, &[5]).unwrap();
    disk.rename_file("MOVE.ME", "7:MOVED.ME").unwrap();
    assert!(disk.extract_file("MOVE.ME").is_err());
    assert_eq!(disk.extract_file("7:MOVED.ME").unwrap(), vec![5]);
}

#[test]
fn detection_on_td0() {
    // a formatted CP/M disk inside a Teledisk container is still found
    use retroimg::img::td0::Td0;
    let geom = FormatDescriptor::from_dpb(&dpb::AMSTRAD_184K, 512, 1);
    let img = Td0::create(geom);
    let mut disk = cpm::Disk::from_img(Box::new(img), dpb::AMSTRAD_184K);
    disk.init().unwrap();
    disk.inject_file("README.TXT", "", 0, b"HELLO CPM\r\n\x1a").unwrap();
    let flat = disk.get_img().to_bytes();
    let mut fs = retroimg::create_fs_from_bytestream(&flat, Some("td0")).expect("detection failed");
    assert_eq!(fs.extract_file("README.TXT").unwrap(), b"HELLO CPM\r\n\x1a".to_vec());
}
