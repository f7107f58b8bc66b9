//! ## Tape Waveform Codec
//!
//! Renders TZX/CDT style pulse descriptions into unsigned 8-bit PCM.
//! Durations are given in Z80 t-states.  The Spectrum runs at 3.5 MHz; the
//! Amstrad CPC gate array clocks the tape at 4.0 MHz, which enters here as
//! the ratio 4/3.5 on the t-state period.  A speed percentage linearly
//! scales all durations, matching what the tape loaders tolerate.
//!
//! The generator is strictly a push-down of pulses: the output level flips
//! after every pulse, and pauses drop to the low level after a 1 ms
//! transition pulse when the level is high.

/// pilot pulse length in t-states
pub const PILOT_PULSE: u32 = 2168;
/// pilot pulse count for header blocks (flag byte < 128)
pub const PILOT_COUNT_HEADER: u32 = 8063;
/// pilot pulse count for data blocks
pub const PILOT_COUNT_DATA: u32 = 3223;
/// first and second sync pulse
pub const SYNC1: u32 = 667;
pub const SYNC2: u32 = 735;
/// zero and one bit pulse lengths
pub const BIT0: u32 = 855;
pub const BIT1: u32 = 1710;

const LEVEL_LOW: u8 = 0x30;
const LEVEL_HIGH: u8 = 0xd0;

#[derive(Clone,Copy,PartialEq,Eq)]
pub enum Machine {
    Spectrum,
    Cpc
}

impl Machine {
    fn clock(&self) -> f64 {
        match self {
            Machine::Spectrum => 3_500_000.0,
            Machine::Cpc => 4_000_000.0
        }
    }
}

/// One rendering session.  Owns the sample buffer and the current level.
pub struct WaveGen {
    rate: u32,
    machine: Machine,
    /// 100 is nominal, higher is faster
    speed_percent: u32,
    level: bool,
    out: Vec<u8>
}

impl WaveGen {
    pub fn new(rate: u32, machine: Machine, speed_percent: u32) -> Self {
        Self {
            rate,
            machine,
            speed_percent: match speed_percent { 0 => 100, s => s },
            level: false,
            out: Vec::new()
        }
    }
    /// Samples for a duration of `t` t-states.
    pub fn samples(&self, t: u32) -> usize {
        let t_cycle = 100.0 / (self.speed_percent as f64 * self.machine.clock());
        (t as f64 * t_cycle * self.rate as f64).round() as usize
    }
    fn fill(&mut self, samples: usize, level: u8) {
        for _i in 0..samples {
            self.out.push(level);
        }
    }
    /// One pulse of `t` t-states at the current level; the level flips after.
    pub fn pulse(&mut self, t: u32) {
        let level = match self.level {
            true => LEVEL_HIGH,
            false => LEVEL_LOW
        };
        let n = self.samples(t);
        self.fill(n, level);
        self.level = !self.level;
    }
    /// `count` pulses of equal length, e.g. a pilot tone.
    pub fn tone(&mut self, count: u32, t: u32) {
        for _i in 0..count {
            self.pulse(t);
        }
    }
    /// Explicit pulse sequence (block 0x13).
    pub fn pulse_seq(&mut self, lengths: &[u32]) {
        for t in lengths {
            self.pulse(*t);
        }
    }
    /// Standard pilot and sync for the given flag byte.
    pub fn pilot_and_sync(&mut self, flag: u8) {
        let count = match flag < 128 {
            true => PILOT_COUNT_HEADER,
            false => PILOT_COUNT_DATA
        };
        self.tone(count, PILOT_PULSE);
        self.pulse(SYNC1);
        self.pulse(SYNC2);
    }
    /// Data bytes as two pulses per bit, MSB first.  `last_bits` limits how
    /// many bits of the final byte are used (8 for whole bytes).
    pub fn data(&mut self, bytes: &[u8], zero_t: u32, one_t: u32, last_bits: u8) {
        for (i, byte) in bytes.iter().enumerate() {
            let bits = match i + 1 == bytes.len() {
                true => last_bits,
                false => 8
            };
            for bit in 0..bits {
                let t = match byte & (0x80 >> bit) {
                    0 => zero_t,
                    _ => one_t
                };
                self.pulse(t);
                self.pulse(t);
            }
        }
    }
    /// Raw sample levels at a fixed t-states-per-sample (block 0x15).
    pub fn direct(&mut self, bytes: &[u8], t_per_sample: u32, last_bits: u8) {
        for (i, byte) in bytes.iter().enumerate() {
            let bits = match i + 1 == bytes.len() {
                true => last_bits,
                false => 8
            };
            for bit in 0..bits {
                let level = match byte & (0x80 >> bit) {
                    0 => LEVEL_LOW,
                    _ => LEVEL_HIGH
                };
                let n = self.samples(t_per_sample);
                self.fill(n, level);
            }
        }
        self.level = false;
    }
    /// Silence at the low level.  A high level first gets a 1 ms transition
    /// pulse so the edge is not lost.
    pub fn pause_ms(&mut self, ms: u32) {
        if ms == 0 {
            return;
        }
        let mut remaining = ms;
        if self.level {
            let one_ms = self.machine.clock() as u32 / 1000;
            self.pulse(one_ms);
            remaining = remaining.saturating_sub(1);
        }
        let n = (self.rate as u64 * remaining as u64 / 1000) as usize;
        self.fill(n, LEVEL_LOW);
        self.level = false;
    }
    pub fn level(&self) -> bool {
        self.level
    }
    pub fn set_level(&mut self, level: bool) {
        self.level = level;
    }
    pub fn position(&self) -> usize {
        self.out.len()
    }
    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_count_at_nominal_speed() {
        let wave = WaveGen::new(44100, Machine::Spectrum, 100);
        // 2168 t-states at 3.5 MHz and 44.1 kHz is about 27 samples
        assert_eq!(wave.samples(PILOT_PULSE), 27);
    }

    #[test]
    fn cpc_runs_faster() {
        let zx = WaveGen::new(44100, Machine::Spectrum, 100);
        let cpc = WaveGen::new(44100, Machine::Cpc, 100);
        assert!(cpc.samples(PILOT_PULSE) < zx.samples(PILOT_PULSE));
    }

    #[test]
    fn level_flips_per_pulse() {
        let mut wave = WaveGen::new(44100, Machine::Spectrum, 100);
        assert_eq!(wave.level(), false);
        wave.pulse(BIT0);
        assert_eq!(wave.level(), true);
        wave.pulse(BIT0);
        assert_eq!(wave.level(), false);
    }

    #[test]
    fn pause_ends_low() {
        let mut wave = WaveGen::new(44100, Machine::Spectrum, 100);
        wave.pulse(BIT1);
        assert!(wave.level());
        wave.pause_ms(10);
        assert!(!wave.level());
        let pcm = wave.finish();
        assert_eq!(*pcm.last().unwrap(), 0x30);
    }

    #[test]
    fn data_block_length() {
        let mut wave = WaveGen::new(44100, Machine::Spectrum, 100);
        wave.data(&[0xff], BIT0, BIT1, 8);
        let n_one = wave.samples(BIT1);
        assert_eq!(wave.position(), 16 * n_one);
    }
}
