//! Raw `.cas` images: the file's bits are the tape's bits, no demodulation.
//!
//! Blocks after the leader are not guaranteed to be byte aligned, so the
//! reader tracks a byte offset plus a bit offset inside that byte.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};

use super::{BitSource, ByteSink};
use crate::config::BitOrder;
use crate::error::{Result, TapeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct CasPosition {
    pub byte: u64,
    /// Bits of `byte` already consumed (0–7).
    pub bit:  u8,
}

impl CasPosition {
    pub fn new(byte: u64, bit: u8) -> Self {
        debug_assert!(bit < 8);
        Self { byte, bit }
    }

    pub fn as_bits(self) -> u64 {
        self.byte.saturating_mul(8).saturating_add(u64::from(self.bit))
    }
}

pub struct CasBitReader<R: Read + Seek> {
    reader:  R,
    order:   BitOrder,
    start:   CasPosition,
    current: CasPosition,
    /// Byte at `current.byte`, once fetched.
    byte:    Option<u8>,
}

impl<R: Read + Seek> CasBitReader<R> {
    pub fn new(mut reader: R, order: BitOrder, start: CasPosition) -> Result<Self> {
        reader.seek(SeekFrom::Start(start.byte))?;
        Ok(Self { reader, order, start, current: start, byte: None })
    }

    pub fn position(&self) -> CasPosition {
        self.current
    }

    /// Moves to an arbitrary bit, e.g. a block start found by an earlier scan.
    pub fn seek(&mut self, pos: CasPosition) -> Result<()> {
        self.reader.seek(SeekFrom::Start(pos.byte))?;
        self.current = pos;
        self.byte = None;
        Ok(())
    }

    fn fetch(&mut self) -> Result<u8> {
        if let Some(b) = self.byte {
            return Ok(b);
        }
        let b = self.reader.read_u8().map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => TapeError::UnexpectedEof(format!(
                "CAS data exhausted at byte {}",
                self.current.byte
            )),
            _ => TapeError::Io(e),
        })?;
        self.byte = Some(b);
        Ok(b)
    }
}

impl<R: Read + Seek> BitSource for CasBitReader<R> {
    fn read_bit(&mut self) -> Result<bool> {
        let byte = self.fetch()?;
        let shift = match self.order {
            BitOrder::MsbFirst => 7 - self.current.bit,
            BitOrder::LsbFirst => self.current.bit,
        };
        self.current.bit += 1;
        if self.current.bit == 8 {
            self.current.bit = 0;
            self.current.byte += 1;
            self.byte = None;
        }
        Ok((byte >> shift) & 1 == 1)
    }

    fn rewind(&mut self) -> Result<()> {
        self.seek(self.start)
    }

    fn bit_position(&self) -> u64 {
        self.current.as_bits()
    }
}

/// Byte sink for `.cas` output.  CAS images are always written byte aligned.
pub struct CasWriter<W: Write> {
    writer:  W,
    written: u64,
}

impl<W: Write> CasWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ByteSink for CasWriter<W> {
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.writer.write_u8(byte)?;
        self.written += 1;
        Ok(())
    }

    fn write_gap(&mut self) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        ByteSink::flush(self)
    }
}
