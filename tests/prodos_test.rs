// test of the ProDOS file system module
use retroimg::img::dsk::{Dsk,SectorOrder};
use retroimg::img::geometry::{FormatDescriptor,SectorCount,SideOrder,Skew};
use retroimg::img::geometry;
use retroimg::fs::{prodos,DiskFS};

/// an 800K ProDOS volume as a block device
const BLOCKS_800K: FormatDescriptor = FormatDescriptor {
    cylinders: 1,
    heads: 1,
    sectors: SectorCount::Uniform(1600),
    bytes_per_sector: 512,
    first_sector_id: 0,
    side_order: SideOrder::Alternating,
    skew: Skew::None
};

fn blank_volume(name: &str, blocks: usize) -> prodos::Disk {
    let geom = match blocks {
        280 => geometry::A2_DOS33,
        _ => BLOCKS_800K
    };
    let img = Dsk::create(geom, SectorOrder::ProdosBlocks);
    let mut disk = prodos::Disk::from_img(Box::new(img)).expect("could not mount");
    disk.init(name, blocks).expect("failed to format");
    disk
}

#[test]
fn format() {
    let mut disk = blank_volume("NEW.DISK", 280);
    assert_eq!(disk.fs_name(), "ProDOS /NEW.DISK");
    // two loader blocks, four directory blocks, one bitmap block
    assert_eq!(disk.free_units().unwrap(), 273);
}

#[test]
fn seedling() {
    let mut disk = blank_volume("SEED", 280);
    let payload: Vec<u8> = (0..100u32).map(|i| i as u8).collect();
    disk.inject_file("LITTLE", "BIN", 0x300, &payload).unwrap();
    assert_eq!(disk.extract_file("LITTLE").unwrap(), payload);
    let files = disk.catalog(false).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].typ, "BIN");
    assert_eq!(files[0].blocks, 1);
    assert_eq!(files[0].eof, Some(100));
    assert_eq!(files[0].aux, 0x300);
}

#[test]
fn sapling() {
    let mut disk = blank_volume("SAP", 280);
    let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    disk.inject_file("MIDDLE", "BIN", 0, &payload).unwrap();
    assert_eq!(disk.extract_file("MIDDLE").unwrap(), payload);
    // four data blocks and the index block
    assert_eq!(disk.catalog(false).unwrap()[0].blocks, 5);
}

#[test]
fn tree() {
    let mut disk = blank_volume("TREE", 1600);
    let payload: Vec<u8> = (0..180001u32).map(|i| (i * 13 % 256) as u8).collect();
    disk.inject_file("HUGE", "BIN", 0, &payload).unwrap();
    assert_eq!(disk.extract_file("HUGE").unwrap(), payload);
    // 352 data, 2 index, 1 master
    assert_eq!(disk.catalog(false).unwrap()[0].blocks, 355);
    assert_eq!(disk.rebuild_bitmap(false).unwrap(), 0);
}

#[test]
fn zero_length_file() {
    let mut disk = blank_volume("EMPTY", 280);
    let before = disk.free_units().unwrap();
    disk.inject_file("NOTHING", "TXT", 0, &[]).unwrap();
    assert_eq!(disk.free_units().unwrap(), before);
    assert_eq!(disk.extract_file("NOTHING").unwrap(), Vec::<u8>::new());
}

#[test]
fn delete_restores_space_and_count() {
    let mut disk = blank_volume("DEL", 280);
    let before = disk.free_units().unwrap();
    disk.inject_file("DOOMED", "BIN", 0, &vec![7; 5000]).unwrap();
    assert!(disk.free_units().unwrap() < before);
    disk.delete_file("DOOMED").unwrap();
    assert_eq!(disk.free_units().unwrap(), before);
    assert_eq!(disk.catalog(false).unwrap().len(), 0);
    // the header's file count followed both changes
    let diags = disk.validate_directory().unwrap();
    assert_eq!(diags.entries().len(), 0);
}

#[test]
fn lock_and_rename() {
    let mut disk = blank_volume("LOCKS", 280);
    disk.inject_file("KEEP", "TXT", 0, &[0x41]).unwrap();
    disk.set_locked("KEEP", true).unwrap();
    assert!(disk.delete_file("KEEP").is_err());
    assert!(disk.rename_file("KEEP", "LOST").is_err());
    disk.set_locked("KEEP", false).unwrap();
    disk.rename_file("KEEP", "KEPT").unwrap();
    assert_eq!(disk.extract_file("KEPT").unwrap(), vec![0x41]);
}

#[test]
fn consistency_after_mutations() {
    let mut disk = blank_volume("CHURN", 1600);
    disk.inject_file("A", "BIN", 0, &vec![1; 40000]).unwrap();
    disk.inject_file("B", "TXT", 0, &vec![2; 100]).unwrap();
    disk.delete_file("A").unwrap();
    disk.inject_file("C", "BIN", 0, &vec![3; 70000]).unwrap();
    disk.rename_file("B", "B2").unwrap();
    assert_eq!(disk.rebuild_bitmap(false).unwrap(), 0);
    assert_eq!(disk.validate_directory().unwrap().entries().len(), 0);
    disk.rebuild_bitmap(true).unwrap();
    assert_eq!(disk.rebuild_bitmap(false).unwrap(), 0);
}
