// test of format conversion through the geometry oracle
use retroimg::img::dsk::{Dsk,SectorOrder};
use retroimg::img::geometry::FormatDescriptor;
use retroimg::img::{self,DiskImage,DiskImageType};
use retroimg::bios::dpb;

fn patterned_cpm_disk() -> Box<dyn DiskImage> {
    let geom = FormatDescriptor::from_dpb(&dpb::AMSTRAD_184K, 512, 1);
    let mut disk = Dsk::create(geom, SectorOrder::Linear);
    for cyl in 0..geom.cylinders {
        for sec in 1..=geom.sectors_on(cyl) {
            let dat: Vec<u8> = (0..512u32).map(|i| ((cyl * 13 + sec * 5) as u32 + i).to_le_bytes()[0]).collect();
            disk.write_sector(cyl, 0, sec, &dat).unwrap();
        }
    }
    Box::new(disk)
}

fn sectors_match(a: &mut Box<dyn DiskImage>, b: &mut Box<dyn DiskImage>) {
    let geom = a.geometry().unwrap();
    assert_eq!(Some(geom), b.geometry());
    for cyl in 0..geom.cylinders {
        for head in 0..geom.heads {
            for s in 0..geom.sectors_on(cyl) {
                let sec = s + geom.first_sector_id;
                assert_eq!(a.read_sector(cyl, head, sec).unwrap(),
                    b.read_sector(cyl, head, sec).unwrap(),
                    "mismatch at cyl {} head {} sec {}", cyl, head, sec);
            }
        }
    }
}

#[test]
fn dsk_to_cqm_and_back() {
    let mut src = patterned_cpm_disk();
    let cqm_bytes = retroimg::convert(&mut src, DiskImageType::CQM).unwrap();
    let mut cqm = retroimg::create_img_from_bytestream(&cqm_bytes, Some("cqm")).unwrap();
    assert_eq!(cqm.what_am_i(), DiskImageType::CQM);
    sectors_match(&mut src, &mut cqm);
    let dsk_bytes = retroimg::convert(&mut cqm, DiskImageType::DSK).unwrap();
    let mut back = retroimg::create_img_from_bytestream(&dsk_bytes, None).unwrap();
    sectors_match(&mut src, &mut back);
}

#[test]
fn dsk_to_td0() {
    let mut src = patterned_cpm_disk();
    let td0_bytes = retroimg::convert(&mut src, DiskImageType::TD0).unwrap();
    let mut td0 = retroimg::create_img_from_bytestream(&td0_bytes, Some("td0")).unwrap();
    assert_eq!(td0.what_am_i(), DiskImageType::TD0);
    sectors_match(&mut src, &mut td0);
}

#[test]
fn d64_to_g64_and_back() {
    use retroimg::img::d64::D64;
    let mut d64 = D64::create(35);
    let pattern: Vec<u8> = (0..256).map(|i| i as u8).collect();
    d64.write_sector(17, 0, 0, &pattern).unwrap();
    d64.write_sector(0, 0, 20, &pattern).unwrap();
    let mut src: Box<dyn DiskImage> = Box::new(d64);
    let g64_bytes = retroimg::convert(&mut src, DiskImageType::G64).unwrap();
    let mut g64 = retroimg::create_img_from_bytestream(&g64_bytes, Some("g64")).unwrap();
    assert_eq!(g64.what_am_i(), DiskImageType::G64);
    assert_eq!(g64.read_sector(17, 0, 0).unwrap(), pattern);
    assert_eq!(g64.read_sector(0, 0, 20).unwrap(), pattern);
    let d64_bytes = retroimg::convert(&mut g64, DiskImageType::D64).unwrap();
    assert_eq!(d64_bytes.len(), 174848);
    let mut back = retroimg::create_img_from_bytestream(&d64_bytes, None).unwrap();
    sectors_match(&mut src, &mut back);
}

#[test]
fn adf_to_dms_and_back() {
    use retroimg::img::adf::Adf;
    let mut adf = Adf::create();
    for cyl in [0usize, 39, 79] {
        let dat = vec![cyl as u8; 512];
        adf.write_sector(cyl, 0, 5, &dat).unwrap();
        adf.write_sector(cyl, 1, 5, &dat).unwrap();
    }
    let mut src: Box<dyn DiskImage> = Box::new(adf);
    let dms_bytes = retroimg::convert(&mut src, DiskImageType::DMS).unwrap();
    let mut dms = retroimg::create_img_from_bytestream(&dms_bytes, Some("dms")).unwrap();
    assert_eq!(dms.what_am_i(), DiskImageType::DMS);
    sectors_match(&mut src, &mut dms);
}

#[test]
fn geometry_mismatch_refused() {
    let mut src = patterned_cpm_disk();
    assert!(retroimg::convert(&mut src, DiskImageType::ADF).is_err());
    assert!(retroimg::convert(&mut src, DiskImageType::D64).is_err());
    assert!(retroimg::convert(&mut src, DiskImageType::STX).is_err());
}

#[test]
fn probe_magic_and_sizes() {
    assert_eq!(retroimg::probe(b"DMS!xxxxxxxxxxxxxxxx"), Some(DiskImageType::DMS));
    assert_eq!(retroimg::probe(b"GCR-1541xxxx"), Some(DiskImageType::G64));
    assert_eq!(retroimg::probe(b"ZXTape!\x1a\x01\x14"), Some(DiskImageType::TZX));
    assert_eq!(retroimg::probe(b"STXnnnnn"), Some(DiskImageType::STX));
    assert_eq!(retroimg::probe(&[0x96, 0x02, 0, 0]), Some(DiskImageType::ATR));
    assert_eq!(retroimg::probe(b"TDxxxxxxxxxx"), Some(DiskImageType::TD0));
    assert_eq!(retroimg::probe(&vec![0u8; 174848]), Some(DiskImageType::D64));
    assert_eq!(retroimg::probe(&vec![0u8; 901120]), Some(DiskImageType::ADF));
    assert_eq!(retroimg::probe(b"garbage"), None);
    let _ = img::DiskImageType::TAP;
}
