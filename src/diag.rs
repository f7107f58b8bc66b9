//! ## Diagnosis Module
//!
//! Containers and recovery passes report findings through an append-only
//! diagnosis list.  Each entry carries a machine-checkable code, a severity,
//! a disk location, and a human message.  The list keeps a running quality
//! score in [0,1] that can only go down as entries accumulate.

use std::fmt;

/// Machine-checkable code, stable across releases.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Code {
    TruncatedInput,
    BadMagic,
    HeaderCrc,
    TrackCrc,
    SectorCrc,
    Checksum,
    BadGcr,
    WeakBits,
    CrcCorrected,
    PartialSector,
    CircularChain,
    CrossLinked,
    OutOfRange,
    BamMismatch,
    BamRepaired,
    DirectoryRepaired,
    ProtectionMatch,
    ErrorByte,
    UnsupportedFeature
}

#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Protection
}

/// Quality penalty applied when an entry of the given severity lands.
fn penalty(severity: Severity) -> f64 {
    match severity {
        Severity::Info => 0.0,
        Severity::Warning => 0.01,
        Severity::Error => 0.05,
        Severity::Protection => 0.0
    }
}

/// A standard remedy for the error classes that have one.
fn suggestion(code: Code) -> Option<&'static str> {
    match code {
        Code::TrackCrc | Code::SectorCrc => Some("try more revolutions or a different drive"),
        Code::WeakBits => Some("preserve weak bits when converting, the disk may be protected"),
        Code::BamMismatch => Some("run the allocation map repair pass"),
        Code::CircularChain | Code::CrossLinked => Some("run the directory repair pass"),
        Code::TruncatedInput => Some("the source image may be cut short, re-image if possible"),
        _ => None
    }
}

#[derive(Clone)]
pub struct Diagnosis {
    pub code: Code,
    pub severity: Severity,
    pub track: Option<usize>,
    pub sector: Option<usize>,
    pub bit_offset: Option<usize>,
    pub message: String
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warn",
            Severity::Error => "error",
            Severity::Protection => "protection"
        };
        match (self.track, self.sector) {
            (Some(t), Some(s)) => write!(f, "[{}] track {} sector {}: {}", sev, t, s, self.message)?,
            (Some(t), None) => write!(f, "[{}] track {}: {}", sev, t, self.message)?,
            _ => write!(f, "[{}] {}", sev, self.message)?
        }
        if let Some(tip) = suggestion(self.code) {
            write!(f, " ({})", tip)?;
        }
        Ok(())
    }
}

/// Append-only accumulator with a monotone non-increasing quality score.
#[derive(Clone)]
pub struct DiagnosisList {
    entries: Vec<Diagnosis>,
    quality: f64
}

impl DiagnosisList {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            quality: 1.0
        }
    }
    pub fn push(&mut self, diag: Diagnosis) {
        self.quality = (self.quality - penalty(diag.severity)).max(0.0);
        self.entries.push(diag);
    }
    /// Convenience for the common whole-image case.
    pub fn add(&mut self, code: Code, severity: Severity, message: &str) {
        self.push(Diagnosis {
            code,
            severity,
            track: None,
            sector: None,
            bit_offset: None,
            message: message.to_string()
        });
    }
    /// Convenience for sector-level findings.
    pub fn add_sector(&mut self, code: Code, severity: Severity, track: usize, sector: usize, message: &str) {
        self.push(Diagnosis {
            code,
            severity,
            track: Some(track),
            sector: Some(sector),
            bit_offset: None,
            message: message.to_string()
        });
    }
    pub fn quality(&self) -> f64 {
        self.quality
    }
    pub fn entries(&self) -> &[Diagnosis] {
        &self.entries
    }
    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|d| d.severity == severity).count()
    }
    pub fn extend(&mut self, other: DiagnosisList) {
        for d in other.entries {
            self.push(d);
        }
    }
}

/// Weighted per-track score components used by the recovery pipeline.
#[derive(Clone,Copy)]
pub struct ScoreBundle {
    pub crc: f64,
    pub id: f64,
    pub timing: f64,
    pub sync: f64,
    pub gcr: f64,
    pub header_crc_ok: bool,
    pub data_crc_ok: bool,
    pub id_ok: bool,
    pub has_weak_bits: bool,
    pub recovered: bool
}

impl ScoreBundle {
    pub fn perfect() -> Self {
        Self {
            crc: 1.0,
            id: 1.0,
            timing: 1.0,
            sync: 1.0,
            gcr: 1.0,
            header_crc_ok: true,
            data_crc_ok: true,
            id_ok: true,
            has_weak_bits: false,
            recovered: false
        }
    }
    /// Overall weighted score, clamped to [0,1].
    pub fn overall(&self) -> f64 {
        let ans = 0.35 * self.crc + 0.15 * self.id + 0.15 * self.timing + 0.15 * self.sync + 0.20 * self.gcr;
        ans.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_never_rises() {
        let mut list = DiagnosisList::new();
        let mut prev = list.quality();
        list.add(Code::TruncatedInput, Severity::Warning, "short read");
        assert!(list.quality() <= prev);
        prev = list.quality();
        list.add(Code::SectorCrc, Severity::Error, "bad crc");
        assert!(list.quality() <= prev);
        prev = list.quality();
        list.add(Code::ProtectionMatch, Severity::Protection, "vmax");
        assert!(list.quality() <= prev);
    }

    #[test]
    fn weighted_overall() {
        let mut bundle = ScoreBundle::perfect();
        assert!((bundle.overall() - 1.0).abs() < 1e-9);
        bundle.crc = 0.0;
        assert!((bundle.overall() - 0.65).abs() < 1e-9);
    }
}
