//! Period-measuring demodulator for two-tone cassette audio.
//!
//! Every bit is one full waveform cycle: a short (2400 Hz) cycle is a 1, a
//! long (1200 Hz) cycle is a 0.  A cycle is measured between two
//! consecutive crossings in the canonical direction; the parity decides
//! which direction that is.  Samples inside the `±threshold` band never
//! change the tracked signal level, which gives the detector hysteresis.

use std::io::{self, Read, Seek, SeekFrom};
use tracing::debug;

use super::WavFormat;
use crate::bitstream::BitSource;
use crate::config::{TapeConfig, WaveParity};
use crate::error::{Result, TapeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

impl Edge {
    fn for_parity(parity: WaveParity) -> Option<Self> {
        match parity {
            WaveParity::Auto => None,
            WaveParity::Odd  => Some(Edge::Rising),
            WaveParity::Even => Some(Edge::Falling),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Unknown,
    High,
    Low,
}

pub struct WavDemodulator<R: Read + Seek> {
    reader:         R,
    format:         WavFormat,
    threshold:      f64,
    /// Cycle length in samples separating a 1 from a 0.
    cutoff:         f64,
    /// Canonical crossing; `None` until auto parity resolves.
    edge:           Option<Edge>,
    level:          Level,
    start_sample:   u64,
    current_sample: u64,
    /// The two most recent canonical crossings.
    ss1:            Option<u64>,
    ss2:            Option<u64>,
    frame:          Vec<u8>,
}

impl<R: Read + Seek> WavDemodulator<R> {
    pub fn new(reader: R, format: WavFormat, config: &TapeConfig) -> Result<Self> {
        let cutoff = config.cycle_cutoff(format.sample_rate);
        let mut demod = Self {
            reader,
            frame: vec![0u8; usize::from(format.block_align)],
            threshold: config.threshold.clamp(0.0, 1.0),
            cutoff,
            edge: Edge::for_parity(config.parity),
            level: Level::Unknown,
            start_sample: config.start_sample,
            current_sample: config.start_sample,
            ss1: None,
            ss2: None,
            format,
        };
        demod.rewind()?;
        debug!(
            "demodulating from sample {} with cutoff {:.2} samples, threshold {}",
            demod.start_sample, demod.cutoff, demod.threshold
        );
        Ok(demod)
    }

    pub fn format(&self) -> &WavFormat {
        &self.format
    }

    /// The canonical crossing, once known.
    pub fn edge(&self) -> Option<Edge> {
        self.edge
    }

    pub fn current_sample(&self) -> u64 {
        self.current_sample
    }

    /// Sample positions of the last two canonical crossings.
    pub fn phase(&self) -> (Option<u64>, Option<u64>) {
        (self.ss1, self.ss2)
    }

    /// Next sample of the first channel, normalised to -1.0..1.0.
    fn next_sample(&mut self) -> Result<Option<f64>> {
        if self.current_sample >= self.format.total_samples() {
            return Ok(None);
        }
        match self.reader.read_exact(&mut self.frame) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        self.current_sample += 1;
        Ok(Some(decode_sample(&self.frame[..self.format.sample_width()])))
    }
}

impl<R: Read + Seek> BitSource for WavDemodulator<R> {
    fn read_bit(&mut self) -> Result<bool> {
        loop {
            let Some(value) = self.next_sample()? else {
                return Err(TapeError::UnexpectedEof(format!(
                    "WAV data exhausted mid-bit at sample {}",
                    self.current_sample
                )));
            };
            let level = if value > self.threshold {
                Level::High
            } else if value < -self.threshold {
                Level::Low
            } else {
                continue;
            };
            if level == self.level {
                continue;
            }
            self.level = level;
            let crossing = if level == Level::High { Edge::Rising } else { Edge::Falling };

            let canonical = match self.edge {
                Some(edge) => edge,
                None => {
                    debug!("auto parity resolved to {:?} at sample {}", crossing, self.current_sample - 1);
                    self.edge = Some(crossing);
                    crossing
                }
            };
            if crossing != canonical {
                continue;
            }

            let at = self.current_sample - 1;
            self.ss1 = self.ss2;
            self.ss2 = Some(at);
            if let Some(prev) = self.ss1 {
                let cycle = (at - prev) as f64;
                return Ok(cycle < self.cutoff);
            }
        }
    }

    /// Seeks back to the start sample.  A resolved parity is kept.
    fn rewind(&mut self) -> Result<()> {
        // Offsets past the data chunk read as an exhausted stream.
        let data_end = self.format.data_start + self.format.data_len;
        let offset = self
            .start_sample
            .checked_mul(u64::from(self.format.block_align))
            .and_then(|o| o.checked_add(self.format.data_start))
            .map_or(data_end, |o| o.min(data_end));
        self.reader.seek(SeekFrom::Start(offset))?;
        self.current_sample = self.start_sample;
        self.level = Level::Unknown;
        self.ss1 = None;
        self.ss2 = None;
        Ok(())
    }

    fn bit_position(&self) -> u64 {
        self.current_sample
    }
}

/// 8-bit samples are unsigned with a 128 midpoint; wider ones are signed
/// little-endian.
pub fn decode_sample(bytes: &[u8]) -> f64 {
    match bytes.len() {
        1 => (f64::from(bytes[0]) - 128.0) / 128.0,
        2 => f64::from(i16::from_le_bytes([bytes[0], bytes[1]])) / 32_768.0,
        3 => {
            let raw = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
            f64::from(raw) / 8_388_608.0
        }
        _ => f64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])) / 2_147_483_648.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::synth::WaveWriter;
    use std::io::Cursor;

    fn demod_of(samples: &[i16], rate: u32, config: &TapeConfig) -> WavDemodulator<Cursor<Vec<u8>>> {
        let mut fmt = WavFormat::mono(rate, 16);
        fmt.data_len = samples.len() as u64 * 2;
        let mut bytes = Vec::new();
        fmt.write_header(&mut bytes).unwrap();
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let mut cur = Cursor::new(bytes);
        let fmt = WavFormat::parse(&mut cur).unwrap();
        WavDemodulator::new(cur, fmt, config).unwrap()
    }

    fn square(cycles: &[usize], invert: bool) -> Vec<i16> {
        let (hi, lo) = if invert { (-1000, 1000) } else { (1000, -1000) };
        let mut out = vec![0; 4];
        for &len in cycles {
            out.extend(std::iter::repeat(hi).take(len / 2));
            out.extend(std::iter::repeat(lo).take(len - len / 2));
        }
        out.push(hi);
        out
    }

    #[test]
    fn start_past_end_of_data() {
        let samples = square(&[4, 8, 4], false);
        for start in [samples.len() as u64, u64::MAX / 2, u64::MAX] {
            let config = TapeConfig { start_sample: start, ..TapeConfig::default() };
            let mut d = demod_of(&samples, 9600, &config);
            assert!(matches!(d.read_bit(), Err(TapeError::UnexpectedEof(_))));
            d.rewind().unwrap();
            assert_eq!(d.current_sample(), start);
        }
    }

    #[test]
    fn decodes_sample_widths() {
        assert_eq!(decode_sample(&[128]), 0.0);
        assert_eq!(decode_sample(&[0]), -1.0);
        assert_eq!(decode_sample(&[0x00, 0x80]), -1.0);
        assert_eq!(decode_sample(&[0x00, 0x40]), 0.5);
        assert_eq!(decode_sample(&[0x00, 0x00, 0xC0]), -0.5);
        assert_eq!(decode_sample(&[0, 0, 0, 0x40]), 0.5);
    }

    #[test]
    fn short_and_long_cycles() {
        // 9600 Hz / 1800 Hz cutoff = 5.33 samples.
        let mut d = demod_of(&square(&[4, 8, 4, 4, 8], false), 9600, &TapeConfig::default());
        let bits: Vec<bool> = (0..5).map(|_| d.read_bit().unwrap()).collect();
        assert_eq!(bits, vec![true, false, true, true, false]);
        assert_eq!(d.edge(), Some(Edge::Rising));
    }

    #[test]
    fn auto_parity_follows_first_transition() {
        let mut d = demod_of(&square(&[8, 4, 8], true), 9600, &TapeConfig::default());
        let bits: Vec<bool> = (0..3).map(|_| d.read_bit().unwrap()).collect();
        assert_eq!(bits, vec![false, true, false]);
        assert_eq!(d.edge(), Some(Edge::Falling));
    }

    #[test]
    fn threshold_ignores_noise() {
        let mut samples = vec![0i16, 50, -50, 40, -40];
        samples.extend(square(&[4, 8], false));
        let config = TapeConfig { threshold: 0.01, ..TapeConfig::default() };
        let mut d = demod_of(&samples, 9600, &config);
        assert!(d.read_bit().unwrap());
        assert!(!d.read_bit().unwrap());
    }

    #[test]
    fn exhausted_mid_bit() {
        let mut d = demod_of(&square(&[4], false), 9600, &TapeConfig::default());
        assert!(d.read_bit().unwrap());
        assert!(matches!(d.read_bit(), Err(TapeError::UnexpectedEof(_))));
    }

    #[test]
    fn start_sample_skips_leader() {
        let samples = square(&[8, 8, 4, 4], false);
        // Skip the silence and the first long cycle.
        let config = TapeConfig { start_sample: 4 + 8, ..TapeConfig::default() };
        let mut d = demod_of(&samples, 9600, &config);
        assert!(!d.read_bit().unwrap());
        assert!(d.read_bit().unwrap());
        assert_eq!(d.phase(), (Some(20), Some(24)));
    }

    #[test]
    fn rewind_keeps_resolved_parity() {
        let mut d = demod_of(&square(&[4, 8], true), 9600, &TapeConfig::default());
        d.read_bit().unwrap();
        d.rewind().unwrap();
        assert_eq!(d.edge(), Some(Edge::Falling));
        assert_eq!(d.current_sample(), 0);
        assert!(d.read_bit().unwrap());
    }

    #[test]
    fn synthesised_byte_round_trip() {
        let mut cur = Cursor::new(Vec::new());
        let mut w = WaveWriter::new(&mut cur, 44_100, 16, false).unwrap();
        for bit in [true, false, false, true, true, false] {
            w.write_bit(bit).unwrap();
        }
        w.close().unwrap();
        let fmt = WavFormat::parse(&mut cur).unwrap();
        let mut d = WavDemodulator::new(cur, fmt, &TapeConfig::default()).unwrap();
        let bits: Vec<bool> = (0..6).map(|_| d.read_bit().unwrap()).collect();
        assert_eq!(bits, vec![true, false, false, true, true, false]);
    }
}
