//! ## Run Length Codec
//!
//! The RLE dialect shared by the DMS track modes.  The escape byte is 0x90.
//! On the wire:
//! * `90 00` is a literal 0x90
//! * `90 nn bb` with nn in 1..=0xfe expands to nn copies of bb
//! * `90 ff bb hi lo` expands to (hi<<8)|lo copies of bb

use super::Error;

const ESCAPE: u8 = 0x90;

/// Expand RLE data.  `limit` bounds the output size; exceeding it is an
/// `OutputFull` error rather than a silent truncation.
pub fn unpack(src: &[u8], limit: usize) -> Result<Vec<u8>,Error> {
    let mut ans: Vec<u8> = Vec::new();
    let mut ptr = 0;
    while ptr < src.len() {
        let b = src[ptr];
        ptr += 1;
        if b != ESCAPE {
            ans.push(b);
            continue;
        }
        if ptr >= src.len() {
            return Err(Error::UnexpectedEof);
        }
        let count_byte = src[ptr];
        ptr += 1;
        let (count, byte) = match count_byte {
            0 => (1, ESCAPE),
            0xff => {
                if ptr + 3 > src.len() {
                    return Err(Error::UnexpectedEof);
                }
                let byte = src[ptr];
                let count = ((src[ptr+1] as usize) << 8) | src[ptr+2] as usize;
                ptr += 3;
                (count, byte)
            },
            n => {
                if ptr >= src.len() {
                    return Err(Error::UnexpectedEof);
                }
                let byte = src[ptr];
                ptr += 1;
                (n as usize, byte)
            }
        };
        if ans.len() + count > limit {
            return Err(Error::OutputFull);
        }
        for _i in 0..count {
            ans.push(byte);
        }
    }
    if ans.len() > limit {
        return Err(Error::OutputFull);
    }
    Ok(ans)
}

/// Pack data with the 0x90-escape RLE.  Runs shorter than 4 are left
/// verbatim unless the byte is the escape itself.
pub fn pack(src: &[u8]) -> Vec<u8> {
    let mut ans: Vec<u8> = Vec::new();
    let mut ptr = 0;
    while ptr < src.len() {
        let byte = src[ptr];
        let mut run = 1;
        while ptr + run < src.len() && src[ptr+run] == byte {
            run += 1;
        }
        if byte == ESCAPE && run < 4 {
            for _i in 0..run {
                ans.push(ESCAPE);
                ans.push(0);
            }
        } else if run < 4 {
            for _i in 0..run {
                ans.push(byte);
            }
        } else if run <= 0xfe {
            ans.push(ESCAPE);
            ans.push(run as u8);
            ans.push(byte);
        } else {
            let run16 = usize::min(run, 0xffff);
            run = run16;
            ans.push(ESCAPE);
            ans.push(0xff);
            ans.push(byte);
            ans.push((run16 >> 8) as u8);
            ans.push((run16 & 0xff) as u8);
        }
        ptr += run;
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_forms() {
        assert_eq!(unpack(&[0x90, 0x00], 16).unwrap(), vec![0x90]);
        assert_eq!(unpack(&[0x90, 0x03, 0xaa], 16).unwrap(), vec![0xaa, 0xaa, 0xaa]);
        assert_eq!(unpack(&[0x90, 0xff, 0x55, 0x01, 0x00], 300).unwrap(), vec![0x55; 256]);
    }

    #[test]
    fn output_bound() {
        assert!(matches!(unpack(&[0x90, 0xff, 0x55, 0x01, 0x00], 255), Err(Error::OutputFull)));
    }

    #[test]
    fn round_trip() {
        let mut data = vec![0u8; 1000];
        for i in 0..1000 {
            data[i] = match i {
                0..=500 => 0x33,
                501..=510 => 0x90,
                _ => (i & 0xff) as u8
            };
        }
        let packed = pack(&data);
        assert_eq!(unpack(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn truncated_run_is_an_error() {
        assert!(matches!(unpack(&[0x90, 0x05], 16), Err(Error::UnexpectedEof)));
        assert!(matches!(unpack(&[0x90], 16), Err(Error::UnexpectedEof)));
    }
}
