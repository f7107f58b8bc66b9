// test of the Teledisk TD0 container
use retroimg::img::td0::Td0;
use retroimg::img::geometry::{FormatDescriptor,SectorCount,SideOrder,Skew};
use retroimg::img::DiskImage;

const IBM_SSDD_9: FormatDescriptor = FormatDescriptor {
    cylinders: 40,
    heads: 1,
    sectors: SectorCount::Uniform(9),
    bytes_per_sector: 512,
    first_sector_id: 1,
    side_order: SideOrder::Alternating,
    skew: Skew::Logical
};

fn patterned(cyl: usize, sec: usize) -> Vec<u8> {
    (0..512u32).map(|i| ((cyl * 31 + sec * 7) as u32 + i).to_le_bytes()[0]).collect()
}

#[test]
fn normal_compression_round_trip() {
    let mut disk = Td0::create(IBM_SSDD_9);
    for cyl in 0..40 {
        for sec in 1..=9 {
            disk.write_sector(cyl, 0, sec, &patterned(cyl, sec)).unwrap();
        }
    }
    let flat = disk.to_bytes();
    assert_eq!(&flat[0..2], b"TD");
    let mut back = Td0::from_bytes(&flat).expect("reopen failed");
    assert_eq!(back.track_count(), 40);
    for cyl in [0, 17, 39] {
        for sec in [1, 5, 9] {
            assert_eq!(back.read_sector(cyl, 0, sec).unwrap(), patterned(cyl, sec));
        }
    }
    let geom = back.geometry().expect("homogeneous layout expected");
    assert_eq!(geom.sectors_on(0), 9);
    assert_eq!(geom.bytes_per_sector, 512);
}

#[test]
fn advanced_compression_round_trip() {
    let mut disk = Td0::create(IBM_SSDD_9);
    for cyl in 0..40 {
        for sec in 1..=9 {
            disk.write_sector(cyl, 0, sec, &patterned(cyl, sec)).unwrap();
        }
    }
    disk.set_advanced(true);
    let packed = disk.to_bytes();
    assert_eq!(&packed[0..2], b"td");
    disk.set_advanced(false);
    let normal = disk.to_bytes();
    assert!(packed.len() < normal.len());
    let mut back = Td0::from_bytes(&packed).expect("reopen failed");
    for cyl in [3, 21, 38] {
        assert_eq!(back.read_sector(cyl, 0, 2).unwrap(), patterned(cyl, 2));
    }
}

#[test]
fn uniform_sectors_are_collapsed() {
    let mut disk = Td0::create(IBM_SSDD_9);
    disk.write_sector(0, 0, 1, &vec![0x6d; 512]).unwrap();
    let flat = disk.to_bytes();
    // a blank-ish disk flattens far below its capacity
    assert!(flat.len() < 40 * 9 * 16);
    let mut back = Td0::from_bytes(&flat).unwrap();
    assert_eq!(back.read_sector(0, 0, 1).unwrap(), vec![0x6d; 512]);
    assert_eq!(back.read_sector(0, 0, 2).unwrap(), vec![0; 512]);
}

#[test]
fn header_crc_is_checked() {
    let mut disk = Td0::create(IBM_SSDD_9);
    let mut flat = disk.to_bytes();
    flat[4] ^= 0x55;
    assert!(Td0::from_bytes(&flat).is_err());
}

#[test]
fn comment_block_round_trip() {
    let mut disk = Td0::create(IBM_SSDD_9);
    let flat = disk.to_bytes();
    let back = Td0::from_bytes(&flat).unwrap();
    let comment = back.comment().expect("comment expected");
    assert!(comment.starts_with("created by retroimg"));
    assert!(back.timestamp().is_some());
}

#[test]
fn missing_sector_is_refused() {
    let mut disk = Td0::create(IBM_SSDD_9);
    assert!(disk.read_sector(0, 0, 10).is_err());
    assert!(disk.read_sector(40, 0, 1).is_err());
}
