//! ## Protection Fingerprinting
//!
//! A static table of copy protection fingerprints matched against the
//! first bytes of each track.  A signature hit contributes a base
//! confidence; weak bits and sync anomalies observed on the same track
//! raise it toward certainty.

use log::{debug,info};

pub const TECH_WEAK_BITS: u32 = 0x01;
pub const TECH_SYNC_ANOMALY: u32 = 0x02;
pub const TECH_LONG_TRACK: u32 = 0x04;
pub const TECH_EXTRA_SECTOR: u32 = 0x08;
pub const TECH_NONSTANDARD_GCR: u32 = 0x10;
pub const TECH_TIMING: u32 = 0x20;

/// base confidence of a bare signature match
pub const BASE_CONFIDENCE: f64 = 0.85;

pub struct Fingerprint {
    pub scheme: &'static str,
    pub platform: &'static str,
    pub techniques: u32,
    pub signature: &'static [u8],
    /// track the scheme normally lives on
    pub expected_track: usize,
    /// where in the track the signature normally sits
    pub expected_offset: usize
}

/// The fingerprint database.  Signatures are short on purpose; the
/// scoring model expects corroboration from the anomaly detectors.
pub const FINGERPRINTS: [Fingerprint;8] = [
    Fingerprint {
        scheme: "V-MAX!",
        platform: "C64",
        techniques: TECH_NONSTANDARD_GCR | TECH_LONG_TRACK,
        signature: &[0x49, 0xdb, 0x49, 0xdb, 0x49],
        expected_track: 20,
        expected_offset: 0
    },
    Fingerprint {
        scheme: "RapidLok",
        platform: "C64",
        techniques: TECH_NONSTANDARD_GCR | TECH_EXTRA_SECTOR,
        signature: &[0x4b, 0x4b, 0x4b, 0x4b, 0x7b],
        expected_track: 18,
        expected_offset: 0
    },
    Fingerprint {
        scheme: "Vorpal",
        platform: "C64",
        techniques: TECH_NONSTANDARD_GCR | TECH_TIMING,
        signature: &[0x52, 0xeb, 0xa5, 0xeb, 0x52],
        expected_track: 1,
        expected_offset: 0
    },
    Fingerprint {
        scheme: "Spiradisc",
        platform: "Apple II",
        techniques: TECH_TIMING | TECH_SYNC_ANOMALY,
        signature: &[0xd5, 0xaa, 0xb7, 0xd5, 0xaa],
        expected_track: 0,
        expected_offset: 0
    },
    Fingerprint {
        scheme: "E7 bitstream",
        platform: "Apple II",
        techniques: TECH_TIMING | TECH_WEAK_BITS,
        signature: &[0xe7, 0xe7, 0xe7, 0xe7, 0xe7],
        expected_track: 0,
        expected_offset: 0
    },
    Fingerprint {
        scheme: "Copylock",
        platform: "Amiga",
        techniques: TECH_LONG_TRACK | TECH_TIMING,
        signature: &[0x89, 0x14, 0xa8, 0x91, 0x4a],
        expected_track: 0,
        expected_offset: 0
    },
    Fingerprint {
        scheme: "Speedlock",
        platform: "Spectrum",
        techniques: TECH_WEAK_BITS,
        signature: &[0xde, 0xad, 0xfa, 0xce, 0x55],
        expected_track: 0,
        expected_offset: 0
    },
    Fingerprint {
        scheme: "Pasti flux",
        platform: "Atari ST",
        techniques: TECH_TIMING | TECH_SYNC_ANOMALY,
        signature: &[0xa1, 0xa1, 0xa1, 0xfb, 0xf7],
        expected_track: 0,
        expected_offset: 0
    }
];

pub struct Match {
    pub scheme: &'static str,
    pub platform: &'static str,
    pub techniques: u32,
    pub track: usize,
    pub confidence: f64
}

/// Match the table against a track's first bytes.  `weak_bits` and
/// `sync_anomaly` are observations about this track from the other
/// passes; they raise the confidence toward 1.0.
pub fn match_track(track: usize, buf: &[u8], weak_bits: bool, sync_anomaly: bool) -> Option<Match> {
    let window = usize::min(buf.len(), 1024);
    for fp in &FINGERPRINTS {
        let hit = match fp.expected_offset + fp.signature.len() <= window {
            true => &buf[fp.expected_offset..fp.expected_offset+fp.signature.len()] == fp.signature,
            false => false
        };
        // the signature may drift from its home offset
        let hit = hit || buf[0..window].windows(fp.signature.len()).any(|w| w == fp.signature);
        if hit {
            debug!("signature {} seen on track {}", hex::encode(fp.signature), track);
            let mut confidence = BASE_CONFIDENCE;
            if weak_bits {
                confidence += 0.10;
            }
            if sync_anomaly {
                confidence += 0.05;
            }
            if track == fp.expected_track {
                confidence += 0.03;
            }
            let confidence = confidence.min(1.0);
            info!("{} ({}) fingerprint on track {} with confidence {:.2}", fp.scheme, fp.platform, track, confidence);
            return Some(Match {
                scheme: fp.scheme,
                platform: fp.platform,
                techniques: fp.techniques,
                track,
                confidence
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_hit_and_boost() {
        let mut track = vec![0u8; 2048];
        track[0..5].copy_from_slice(&[0x49, 0xdb, 0x49, 0xdb, 0x49]);
        let m = match_track(20, &track, false, false).unwrap();
        assert_eq!(m.scheme, "V-MAX!");
        assert!((m.confidence - 0.88).abs() < 1e-9);
        let m = match_track(20, &track, true, true).unwrap();
        assert!((m.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn clean_track_is_clean() {
        let track = vec![0u8; 2048];
        assert!(match_track(0, &track, false, false).is_none());
    }
}
