// test of the D64 container and the CBM directory walk
use retroimg::img::d64::D64;
use retroimg::img::DiskImage;
use retroimg::fs::{cbm,Block,DiskFS};

/// build the canonical catalog scenario: one PRG called HELLO, two
/// blocks, starting at track 17 sector 0
fn one_file_disk() -> cbm::Disk {
    let img = D64::create(35);
    let mut disk = cbm::Disk::from_img(Box::new(img));
    disk.init("TEST DISK", [b'4', b'2']).expect("failed to format");
    let img = disk.get_img();
    // directory entry in the first slot of (18,1)
    let mut dir = img.read_block(Block::CBM([18, 1])).unwrap();
    dir[2] = 0x82; // closed PRG
    dir[3] = 17;
    dir[4] = 0;
    let name = cbm::string_to_petscii("HELLO", 16);
    dir[5..21].copy_from_slice(&name);
    dir[30] = 2;
    dir[31] = 0;
    img.write_block(Block::CBM([18, 1]), &dir).unwrap();
    // two sector chain; the load address leads the payload
    let mut s0 = vec![0u8; 256];
    s0[0] = 17;
    s0[1] = 1;
    s0[2] = 0x01;
    s0[3] = 0x08;
    for i in 4..256 {
        s0[i] = (i % 100) as u8;
    }
    img.write_block(Block::CBM([17, 0]), &s0).unwrap();
    let mut s1 = vec![0u8; 256];
    s1[0] = 0;
    s1[1] = 1; // no data bytes beyond the link
    img.write_block(Block::CBM([17, 1]), &s1).unwrap();
    disk
}

#[test]
fn catalog_and_extract() {
    let mut disk = one_file_disk();
    // the freshly formatted BAM reports 664 blocks free
    assert_eq!(disk.free_units().unwrap(), 664);
    let files = disk.catalog(false).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "HELLO");
    assert_eq!(files[0].typ, "PRG");
    assert_eq!(files[0].blocks, 2);
    assert_eq!(files[0].first, Block::CBM([17, 0]));
    let dat = disk.extract_file("HELLO").unwrap();
    assert_eq!(dat.len(), 254);
    assert_eq!(dat[0], 0x01);
    assert_eq!(dat[1], 0x08);
}

#[test]
fn bam_repair_claims_the_chain() {
    // the scenario disk's chain was never marked in the BAM; pass 4
    // fixes that, and twice is the same as once
    let mut disk = one_file_disk();
    assert_eq!(disk.rebuild_bitmap(false).unwrap(), 2);
    disk.rebuild_bitmap(true).unwrap();
    assert_eq!(disk.rebuild_bitmap(false).unwrap(), 0);
    assert_eq!(disk.free_units().unwrap(), 662);
    let diags = disk.validate_directory().unwrap();
    assert_eq!(diags.entries().len(), 0);
}

#[test]
fn canonical_sizes_and_error_bytes() {
    let mut img = D64::create(35);
    let flat = img.to_bytes();
    assert_eq!(flat.len(), 174848);
    // append an error byte region flagging track 1 sector 5
    let mut with_errors = flat.clone();
    with_errors.append(&mut vec![1u8; 683]);
    with_errors[174848 + 5] = 5;
    let reopened = D64::from_bytes(&with_errors).unwrap();
    assert_eq!(reopened.error_byte(0, 5), Some(5));
    assert_eq!(reopened.error_byte(0, 0), Some(1));
    let diags = reopened.diagnostics();
    assert_eq!(diags.entries().len(), 1);
    assert!(diags.quality() < 1.0);
    // 40 track image
    let img40 = D64::from_bytes(&vec![0u8; 196608]).unwrap();
    assert_eq!(img40.num_tracks(), 40);
    assert!(D64::from_bytes(&vec![0u8; 170000]).is_err());
}

#[test]
fn zone_geometry() {
    let mut img = D64::create(35);
    // track 18 begins at 0x16500 and has 19 sectors
    assert_eq!(img.sectors_on_track(18).unwrap(), 19);
    assert_eq!(img.sectors_on_track(1).unwrap(), 21);
    assert_eq!(img.sectors_on_track(35).unwrap(), 17);
    assert!(img.sectors_on_track(36).is_err());
    let pattern: Vec<u8> = (0..256).map(|i| i as u8).collect();
    img.write_sector(17, 0, 0, &pattern).unwrap();
    let flat = img.to_bytes();
    assert_eq!(&flat[0x16500..0x16600], &pattern[..]);
}

#[test]
fn broken_chain_is_flagged() {
    let mut disk = one_file_disk();
    let img = disk.get_img();
    // point the chain at itself
    let mut s0 = img.read_block(Block::CBM([17, 0])).unwrap();
    s0[0] = 17;
    s0[1] = 0;
    img.write_block(Block::CBM([17, 0]), &s0).unwrap();
    assert!(disk.extract_file("HELLO").is_err());
    let diags = disk.validate_directory().unwrap();
    assert!(diags.entries().len() > 0);
    assert!(diags.quality() < 1.0);
}
