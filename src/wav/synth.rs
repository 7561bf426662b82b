//! Two-tone waveform synthesis for writing `.wav` tapes.
//!
//! Mirrors the demodulator: one sine cycle per bit, 2400 Hz for a 1 and
//! 1200 Hz for a 0.  The RIFF sizes are patched in place on `finish`.

use byteorder::{LittleEndian, WriteBytesExt};
use std::f64::consts::TAU;
use std::io::{Seek, SeekFrom, Write};
use tracing::debug;

use super::WavFormat;
use crate::bitstream::ByteSink;
use crate::config::{BitOrder, TapeConfig, WaveParity};
use crate::error::{Result, TapeError};

pub const ONE_FREQUENCY:  f64 = 2400.0;
pub const ZERO_FREQUENCY: f64 = 1200.0;
const AMPLITUDE: f64 = 0.75;
/// Lowest rate that still gives a 2400 Hz cycle four samples.
pub const MIN_SAMPLE_RATE: u32 = 9600;

pub struct WaveWriter<W: Write + Seek> {
    writer:     W,
    format:     WavFormat,
    order:      BitOrder,
    inverted:   bool,
    one_cycle:  Vec<u8>,
    zero_cycle: Vec<u8>,
    silence:    Vec<u8>,
    finished:   bool,
}

impl<W: Write + Seek> WaveWriter<W> {
    /// Starts a new mono tape.  `inverted` puts the negative half-cycle first.
    pub fn new(mut writer: W, sample_rate: u32, bits_per_sample: u16, inverted: bool) -> Result<Self> {
        let format = WavFormat::mono(sample_rate, bits_per_sample);
        check_format(&format)?;
        writer.seek(SeekFrom::Start(0))?;
        format.write_header(&mut writer)?;
        let mut w = Self::with_format(writer, format, inverted);
        // Brief lead-in so the first cycle starts out of silence.
        w.write_silence(u64::from(sample_rate / 100))?;
        Ok(w)
    }

    pub fn from_config(writer: W, config: &TapeConfig) -> Result<Self> {
        let mut w = Self::new(
            writer,
            config.sample_rate,
            config.bits_per_sample,
            config.parity == WaveParity::Even,
        )?;
        w.order = config.bit_order;
        Ok(w)
    }

    /// Continues an existing tape whose data chunk is the last chunk in the
    /// file.
    pub fn resume(mut writer: W, format: WavFormat, config: &TapeConfig) -> Result<Self> {
        check_format(&format)?;
        let end = writer.seek(SeekFrom::End(0))?;
        let data_end = format.data_start + format.data_len;
        // A trailing RIFF pad byte is overwritten.
        if end != data_end && end != data_end + 1 {
            return Err(TapeError::UnsupportedFormat(
                "cannot append: data chunk is not at the end of the file".into(),
            ));
        }
        writer.seek(SeekFrom::Start(data_end))?;
        debug!("appending to WAV tape after {} samples", format.total_samples());
        let mut w = Self::with_format(writer, format, config.parity == WaveParity::Even);
        w.order = config.bit_order;
        Ok(w)
    }

    fn with_format(writer: W, format: WavFormat, inverted: bool) -> Self {
        let one_cycle  = render_cycle(&format, ONE_FREQUENCY, inverted);
        let zero_cycle = render_cycle(&format, ZERO_FREQUENCY, inverted);
        let silence    = encode_sample(&format, 0.0);
        Self {
            writer,
            format,
            order: BitOrder::default(),
            inverted,
            one_cycle,
            zero_cycle,
            silence,
            finished: false,
        }
    }

    pub fn format(&self) -> &WavFormat {
        &self.format
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        let cycle = if bit { &self.one_cycle } else { &self.zero_cycle };
        self.writer.write_all(cycle)?;
        self.format.data_len += cycle.len() as u64;
        Ok(())
    }

    pub fn write_silence(&mut self, samples: u64) -> Result<()> {
        for _ in 0..samples {
            self.writer.write_all(&self.silence)?;
        }
        self.format.data_len += samples * self.silence.len() as u64;
        Ok(())
    }

    /// Finishes the tape and hands back the underlying writer.
    pub fn close(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.writer)
    }

    /// Half of a 1 cycle: supplies the crossing that ends the last bit
    /// before silence.
    fn write_closing_half(&mut self) -> Result<()> {
        let width = self.format.sample_width();
        let half = self.one_cycle.len() / width / 2 * width;
        self.writer.write_all(&self.one_cycle[..half])?;
        self.format.data_len += half as u64;
        Ok(())
    }

    fn patch_sizes(&mut self) -> Result<()> {
        let end = self.writer.stream_position()?;
        self.format.riff_size = (end - 8) as u32;
        self.writer.seek(SeekFrom::Start(4))?;
        self.writer.write_u32::<LittleEndian>(self.format.riff_size)?;
        self.writer.seek(SeekFrom::Start(self.format.data_start - 4))?;
        self.writer.write_u32::<LittleEndian>(self.format.data_len as u32)?;
        self.writer.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}

impl<W: Write + Seek> ByteSink for WaveWriter<W> {
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        for i in 0..8 {
            let shift = match self.order {
                BitOrder::LsbFirst => i,
                BitOrder::MsbFirst => 7 - i,
            };
            self.write_bit((byte >> shift) & 1 == 1)?;
        }
        Ok(())
    }

    fn write_gap(&mut self) -> Result<()> {
        self.write_closing_half()?;
        self.write_silence(u64::from(self.format.sample_rate / 2))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.write_closing_half()?;
        self.write_silence(u64::from(self.format.sample_rate / 100))?;
        if self.format.data_len % 2 == 1 {
            // RIFF pad byte keeps the chunk list word aligned.
            self.writer.write_u8(0)?;
        }
        self.patch_sizes()?;
        self.writer.flush()?;
        self.finished = true;
        debug!(
            "WAV tape finished: {} samples, inverted={}",
            self.format.total_samples(),
            self.inverted
        );
        Ok(())
    }
}

/// Rejects formats the writer cannot synthesise.
pub fn check_format(format: &WavFormat) -> Result<()> {
    if format.channels != 1 || !matches!(format.bits_per_sample, 8 | 16) {
        return Err(TapeError::UnsupportedFormat(format!(
            "can only synthesise mono 8 or 16 bit audio, not {} channel(s) at {} bits",
            format.channels, format.bits_per_sample
        )));
    }
    if format.sample_rate < MIN_SAMPLE_RATE {
        return Err(TapeError::UnsupportedFormat(format!(
            "sample rate {} Hz is below {MIN_SAMPLE_RATE} Hz",
            format.sample_rate
        )));
    }
    Ok(())
}

fn render_cycle(format: &WavFormat, frequency: f64, inverted: bool) -> Vec<u8> {
    let n = (f64::from(format.sample_rate) / frequency).round() as usize;
    let sign = if inverted { -1.0 } else { 1.0 };
    (0..n)
        .flat_map(|k| encode_sample(format, sign * AMPLITUDE * (TAU * k as f64 / n as f64).sin()))
        .collect()
}

fn encode_sample(format: &WavFormat, value: f64) -> Vec<u8> {
    match format.bits_per_sample {
        8 => vec![(128.0 + value * 127.0).round() as u8],
        _ => ((value * 32_767.0).round() as i16).to_le_bytes().to_vec(),
    }
}
