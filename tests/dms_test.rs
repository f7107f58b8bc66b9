// test of the DMS archive container
use retroimg::img::dms;
use retroimg::img::DiskImage;
use retroimg::codec;

/// the whole-disk pattern used by the round trip checks
fn patterned_image() -> Vec<u8> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut image = vec![0u8; 901120];
    for t in 0..80 {
        for i in 0..dms::CYLINDER_LEN {
            image[t * dms::CYLINDER_LEN + i] = ((37 * t + i) & 0xff) as u8;
        }
    }
    image
}

/// a compressible image, long runs per cylinder
fn runny_image() -> Vec<u8> {
    let mut image = vec![0u8; 901120];
    for t in 0..80 {
        for i in 0..dms::CYLINDER_LEN {
            image[t * dms::CYLINDER_LEN + i] = match i % 2048 {
                0..=1900 => t as u8,
                _ => (i & 0xff) as u8
            };
        }
    }
    image
}

#[test]
fn nocomp_round_trip() {
    let image = patterned_image();
    let archive = dms::pack_archive(&image, codec::dms::MODE_NOCOMP, None).unwrap();
    let mut count = 0;
    let mut hook = |_cyl: usize, dat: &[u8]| {
        count += 1;
        assert_eq!(dat.len(), dms::CYLINDER_LEN);
    };
    // a password on an unencrypted archive is ignored, not an error
    let (out, banner, fileid, _diags) = dms::unpack_archive(&archive, Some("password"), Some(&mut hook)).unwrap();
    assert_eq!(count, 80);
    assert_eq!(out.len(), 80 * dms::CYLINDER_LEN);
    assert_eq!(out, image);
    assert!(banner.is_none());
    assert!(fileid.is_none());
}

#[test]
fn heavy_round_trip_through_the_container() {
    let image = runny_image();
    let mut archived = dms::Dms::from_adf(&image, codec::dms::MODE_HEAVY1).unwrap();
    let flat = archived.to_bytes();
    assert_eq!(&flat[0..4], b"DMS!");
    assert!(flat.len() < image.len());
    let mut reopened = dms::Dms::from_bytes(&flat).unwrap();
    // spot check sectors on both heads
    assert_eq!(reopened.read_sector(0, 0, 0).unwrap(), image[0..512].to_vec());
    let offset = 40 * dms::CYLINDER_LEN + 11 * 512 + 3 * 512;
    assert_eq!(reopened.read_sector(40, 1, 3).unwrap(), image[offset..offset+512].to_vec());
}

#[test]
fn encryption() {
    let image = runny_image();
    let archive = dms::pack_archive(&image, codec::dms::MODE_NOCOMP, Some("sesame")).unwrap();
    // correct password
    let (out, _b, _f, _d) = dms::unpack_archive(&archive, Some("sesame"), None).unwrap();
    assert_eq!(out, image);
    // no password
    match dms::unpack_archive(&archive, None, None) {
        Err(e) => assert_eq!(e.to_string(), "archive is encrypted, password required"),
        Ok(_) => panic!("should have demanded a password")
    }
    // wrong password
    match dms::unpack_archive(&archive, Some("mango"), None) {
        Err(e) => assert_eq!(e.to_string(), "password does not match"),
        Ok(_) => panic!("should have refused the password")
    }
}

#[test]
fn header_crc_is_checked() {
    let image = runny_image();
    let mut archive = dms::pack_archive(&image, codec::dms::MODE_NOCOMP, None).unwrap();
    archive[10] ^= 0xff;
    assert!(dms::unpack_archive(&archive, None, None).is_err());
}

#[test]
fn mixed_modes_in_one_archive() {
    // every mode exercised against the shared session context
    let image = runny_image();
    for cmode in [codec::dms::MODE_SIMPLE, codec::dms::MODE_QUICK, codec::dms::MODE_MEDIUM,
                  codec::dms::MODE_DEEP, codec::dms::MODE_HEAVY2] {
        let archive = dms::pack_archive(&image, cmode, None).unwrap();
        let (out, _b, _f, _d) = dms::unpack_archive(&archive, None, None).unwrap();
        assert_eq!(out, image, "mode {} failed", cmode);
    }
}
