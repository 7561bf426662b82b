//! Unified bit stream over both tape containers.
//!
//! The block assembler only ever talks to a [`BitSource`]; whether the bits
//! come straight out of a `.cas` byte stream or out of a demodulated `.wav`
//! recording is decided once, at open time, by the [`TapeSource`] variant.
//! The write side mirrors this with [`ByteSink`] and [`TapeSink`].

pub mod cas;

use std::fs::File;
use std::io::{BufReader, BufWriter};

use crate::config::BitOrder;
use crate::error::Result;
use crate::wav::demod::WavDemodulator;
use crate::wav::synth::WaveWriter;

pub use cas::{CasBitReader, CasPosition, CasWriter};

// ── Read side ────────────────────────────────────────────────────────────────

pub trait BitSource {
    /// Next bit of the stream.  Fails with `UnexpectedEof` when exhausted.
    fn read_bit(&mut self) -> Result<bool>;

    /// Returns to the configured start of the tape.
    fn rewind(&mut self) -> Result<()>;

    /// Position of the next bit: a bit index for CAS, a sample index for WAV.
    fn bit_position(&self) -> u64;

    /// Reads `count` (1–8) bits, packed most-significant-bit-first: the
    /// first bit read lands in bit `count - 1` of the result.
    fn read_bits(&mut self, count: u8) -> Result<u8> {
        debug_assert!((1..=8).contains(&count));
        let mut out = 0u8;
        for _ in 0..count {
            out = (out << 1) | u8::from(self.read_bit()?);
        }
        Ok(out)
    }

    /// Reads one tape byte whose bits appear in `order`.
    fn read_byte(&mut self, order: BitOrder) -> Result<u8> {
        let raw = self.read_bits(8)?;
        Ok(match order {
            BitOrder::MsbFirst => raw,
            BitOrder::LsbFirst => raw.reverse_bits(),
        })
    }
}

impl<S: BitSource + ?Sized> BitSource for &mut S {
    fn read_bit(&mut self) -> Result<bool> {
        (**self).read_bit()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }

    fn bit_position(&self) -> u64 {
        (**self).bit_position()
    }
}

/// The closed set of containers a tape handle can read from.
pub enum TapeSource {
    Cas(CasBitReader<BufReader<File>>),
    Wav(WavDemodulator<BufReader<File>>),
}

impl BitSource for TapeSource {
    fn read_bit(&mut self) -> Result<bool> {
        match self {
            TapeSource::Cas(s) => s.read_bit(),
            TapeSource::Wav(s) => s.read_bit(),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        match self {
            TapeSource::Cas(s) => s.rewind(),
            TapeSource::Wav(s) => s.rewind(),
        }
    }

    fn bit_position(&self) -> u64 {
        match self {
            TapeSource::Cas(s) => s.bit_position(),
            TapeSource::Wav(s) => s.bit_position(),
        }
    }
}

// ── Write side ───────────────────────────────────────────────────────────────

pub trait ByteSink {
    fn write_byte(&mut self, byte: u8) -> Result<()>;

    /// Inter-block gap.  Silence on audio tapes, nothing on CAS.
    fn write_gap(&mut self) -> Result<()>;

    /// Pushes buffered output to the underlying writer.  Container headers
    /// are left alone until [`finish`](Self::finish).
    fn flush(&mut self) -> Result<()>;

    /// Flushes buffered output and finalises container headers.
    fn finish(&mut self) -> Result<()>;

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for &b in bytes {
            self.write_byte(b)?;
        }
        Ok(())
    }
}

pub enum TapeSink {
    Cas(CasWriter<BufWriter<File>>),
    Wav(WaveWriter<BufWriter<File>>),
}

impl ByteSink for TapeSink {
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        match self {
            TapeSink::Cas(s) => s.write_byte(byte),
            TapeSink::Wav(s) => s.write_byte(byte),
        }
    }

    fn write_gap(&mut self) -> Result<()> {
        match self {
            TapeSink::Cas(s) => s.write_gap(),
            TapeSink::Wav(s) => s.write_gap(),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            TapeSink::Cas(s) => ByteSink::flush(s),
            TapeSink::Wav(s) => ByteSink::flush(s),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self {
            TapeSink::Cas(s) => s.finish(),
            TapeSink::Wav(s) => s.finish(),
        }
    }
}
