//! Minimal RIFF/WAVE container handling.
//!
//! Only the `fmt ` and `data` chunks are consumed; anything else is skipped
//! by its declared size.  All RIFF fields are little-endian.

pub mod demod;
pub mod synth;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, trace, warn};

use crate::error::{Result, TapeError};

pub const RIFF_MAGIC: &[u8; 4] = b"RIFF";
pub const WAVE_FORM:  &[u8; 4] = b"WAVE";
pub const FMT_CHUNK:  &[u8; 4] = b"fmt ";
pub const DATA_CHUNK: &[u8; 4] = b"data";

const FORMAT_PCM:        u16 = 1;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;
/// Size of the canonical header written by [`WavFormat::write_header`].
pub const CANONICAL_HEADER_LEN: u64 = 44;

/// Parameters of a parsed (or about to be written) WAVE file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavFormat {
    pub riff_size:       u32,
    pub channels:        u16,
    pub sample_rate:     u32,
    pub bits_per_sample: u16,
    /// Bytes per frame, all channels included.
    pub block_align:     u16,
    /// File offset of the first byte of the data chunk.
    pub data_start:      u64,
    pub data_len:        u64,
}

impl WavFormat {
    /// Mono PCM layout for synthesised tapes.
    pub fn mono(sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            riff_size: 36,
            channels: 1,
            sample_rate,
            bits_per_sample,
            block_align: bits_per_sample / 8,
            data_start: CANONICAL_HEADER_LEN,
            data_len: 0,
        }
    }

    /// Bytes per sample of one channel.
    pub fn sample_width(&self) -> usize {
        usize::from(self.bits_per_sample / 8)
    }

    pub fn total_samples(&self) -> u64 {
        if self.block_align == 0 {
            return 0;
        }
        self.data_len / u64::from(self.block_align)
    }

    /// Playing time of the data chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.total_samples() as f64 / f64::from(self.sample_rate)
    }

    /// Parses the RIFF header and chunk list, leaving `reader` positioned at
    /// the start of the data chunk.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        read_header_bytes(reader, &mut magic, "RIFF magic")?;
        if &magic != RIFF_MAGIC {
            return Err(TapeError::MalformedHeader(format!(
                "expected RIFF, found {}",
                hex::encode(magic)
            )));
        }
        let riff_size = reader.read_u32::<LittleEndian>().map_err(header_eof("RIFF size"))?;
        read_header_bytes(reader, &mut magic, "form type")?;
        if &magic != WAVE_FORM {
            return Err(TapeError::MalformedHeader(format!(
                "RIFF form is {:?}, not WAVE",
                String::from_utf8_lossy(&magic)
            )));
        }

        let mut fmt: Option<(u16, u16, u32, u16, u16)> = None;
        let mut data: Option<(u64, u64)> = None;

        while fmt.is_none() || data.is_none() {
            let mut id = [0u8; 4];
            match reader.read_exact(&mut id) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let size = u64::from(reader.read_u32::<LittleEndian>().map_err(header_eof("chunk size"))?);
            let body = reader.stream_position()?;
            // Chunks are padded to an even length.
            let next = body + size + (size & 1);

            match &id {
                FMT_CHUNK => {
                    if size < 16 {
                        return Err(TapeError::MalformedHeader(format!("fmt chunk is only {size} bytes")));
                    }
                    let audio_format = reader.read_u16::<LittleEndian>().map_err(header_eof("fmt"))?;
                    let channels     = reader.read_u16::<LittleEndian>().map_err(header_eof("fmt"))?;
                    let sample_rate  = reader.read_u32::<LittleEndian>().map_err(header_eof("fmt"))?;
                    let _byte_rate   = reader.read_u32::<LittleEndian>().map_err(header_eof("fmt"))?;
                    let block_align  = reader.read_u16::<LittleEndian>().map_err(header_eof("fmt"))?;
                    let bits         = reader.read_u16::<LittleEndian>().map_err(header_eof("fmt"))?;
                    fmt = Some((audio_format, channels, sample_rate, block_align, bits));
                }
                DATA_CHUNK => {
                    let available = file_len.saturating_sub(body);
                    if size > available {
                        warn!("data chunk declares {} bytes but only {} remain", size, available);
                    }
                    data = Some((body, size.min(available)));
                }
                other => {
                    trace!("skipping RIFF chunk {:?} ({} bytes)", String::from_utf8_lossy(other), size);
                }
            }
            reader.seek(SeekFrom::Start(next))?;
        }

        let (audio_format, channels, sample_rate, block_align, bits_per_sample) =
            fmt.ok_or_else(|| TapeError::MalformedHeader("missing fmt chunk".into()))?;
        let (data_start, data_len) =
            data.ok_or_else(|| TapeError::MalformedHeader("missing data chunk".into()))?;

        if audio_format != FORMAT_PCM && audio_format != FORMAT_EXTENSIBLE {
            return Err(TapeError::UnsupportedFormat(format!("audio format {audio_format:#06x} is not PCM")));
        }
        if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(TapeError::UnsupportedFormat(format!("{bits_per_sample} bits per sample")));
        }
        if channels == 0 || sample_rate == 0 {
            return Err(TapeError::MalformedHeader(format!(
                "{channels} channels at {sample_rate} Hz"
            )));
        }
        if usize::from(block_align) < usize::from(channels) * usize::from(bits_per_sample / 8) {
            return Err(TapeError::MalformedHeader(format!("block align {block_align} too small")));
        }

        let format = Self {
            riff_size,
            channels,
            sample_rate,
            bits_per_sample,
            block_align,
            data_start,
            data_len,
        };
        debug!(
            "WAV: {} Hz, {} bit, {} channel(s), {} samples from offset {}",
            format.sample_rate,
            format.bits_per_sample,
            format.channels,
            format.total_samples(),
            format.data_start
        );
        reader.seek(SeekFrom::Start(data_start))?;
        Ok(format)
    }

    /// Writes a canonical 44-byte PCM header describing `data_len` bytes.
    pub fn write_header<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let byte_rate = self.sample_rate * u32::from(self.block_align);
        writer.write_all(RIFF_MAGIC)?;
        writer.write_u32::<LittleEndian>(36 + self.data_len as u32)?;
        writer.write_all(WAVE_FORM)?;
        writer.write_all(FMT_CHUNK)?;
        writer.write_u32::<LittleEndian>(16)?;
        writer.write_u16::<LittleEndian>(FORMAT_PCM)?;
        writer.write_u16::<LittleEndian>(self.channels)?;
        writer.write_u32::<LittleEndian>(self.sample_rate)?;
        writer.write_u32::<LittleEndian>(byte_rate)?;
        writer.write_u16::<LittleEndian>(self.block_align)?;
        writer.write_u16::<LittleEndian>(self.bits_per_sample)?;
        writer.write_all(DATA_CHUNK)?;
        writer.write_u32::<LittleEndian>(self.data_len as u32)?;
        Ok(())
    }
}

/// True when `header` starts with `RIFF....WAVE`.
pub fn is_riff_wave(header: &[u8]) -> bool {
    header.len() >= 12 && &header[0..4] == RIFF_MAGIC && &header[8..12] == WAVE_FORM
}

fn read_header_bytes<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(header_eof(what))
}

fn header_eof(what: &str) -> impl Fn(io::Error) -> TapeError + '_ {
    move |e| match e.kind() {
        io::ErrorKind::UnexpectedEof => TapeError::MalformedHeader(format!("truncated {what}")),
        _ => TapeError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (id, data) in chunks {
            body.extend_from_slice(*id);
            body.extend_from_slice(&(data.len() as u32).to_le_bytes());
            body.extend_from_slice(data);
            if data.len() % 2 == 1 {
                body.push(0);
            }
        }
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(&body);
        out
    }

    fn fmt_chunk(channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let align = channels * bits / 8;
        let mut v = Vec::new();
        v.extend_from_slice(&1u16.to_le_bytes());
        v.extend_from_slice(&channels.to_le_bytes());
        v.extend_from_slice(&rate.to_le_bytes());
        v.extend_from_slice(&(rate * u32::from(align)).to_le_bytes());
        v.extend_from_slice(&align.to_le_bytes());
        v.extend_from_slice(&bits.to_le_bytes());
        v
    }

    #[test]
    fn parses_canonical_header() {
        let mut cur = Cursor::new(Vec::new());
        let mut fmt = WavFormat::mono(9600, 8);
        fmt.data_len = 4;
        fmt.write_header(&mut cur).unwrap();
        cur.get_mut().extend_from_slice(&[128, 200, 128, 56]);

        let parsed = WavFormat::parse(&mut cur).unwrap();
        assert_eq!(parsed.sample_rate, 9600);
        assert_eq!(parsed.bits_per_sample, 8);
        assert_eq!(parsed.data_start, CANONICAL_HEADER_LEN);
        assert_eq!(parsed.total_samples(), 4);
        assert_eq!(cur.position(), CANONICAL_HEADER_LEN);
    }

    #[test]
    fn skips_unknown_and_odd_sized_chunks() {
        let bytes = build(&[
            (b"LIST", vec![1, 2, 3]),
            (b"fmt ", fmt_chunk(2, 22050, 16)),
            (b"junk", vec![0; 10]),
            (b"data", vec![0; 8]),
        ]);
        let parsed = WavFormat::parse(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed.channels, 2);
        assert_eq!(parsed.block_align, 4);
        assert_eq!(parsed.total_samples(), 2);
        assert_eq!(parsed.data_start, 12 + 8 + 4 + 8 + 16 + 8 + 10 + 8);
    }

    #[test]
    fn missing_data_chunk() {
        let bytes = build(&[(b"fmt ", fmt_chunk(1, 44100, 16))]);
        let err = WavFormat::parse(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, TapeError::MalformedHeader(ref m) if m.contains("data")));
    }

    #[test]
    fn missing_fmt_chunk() {
        let bytes = build(&[(b"data", vec![0; 4])]);
        let err = WavFormat::parse(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, TapeError::MalformedHeader(ref m) if m.contains("fmt")));
    }

    #[test]
    fn rejects_non_riff() {
        let err = WavFormat::parse(&mut Cursor::new(b"RIFX\0\0\0\0WAVE".to_vec())).unwrap_err();
        assert!(matches!(err, TapeError::MalformedHeader(_)));
        let err = WavFormat::parse(&mut Cursor::new(b"RIFF\0\0".to_vec())).unwrap_err();
        assert!(matches!(err, TapeError::MalformedHeader(_)));
    }

    #[test]
    fn rejects_twelve_bit_samples() {
        let bytes = build(&[(b"fmt ", fmt_chunk(1, 8000, 12)), (b"data", vec![0; 4])]);
        assert!(matches!(
            WavFormat::parse(&mut Cursor::new(bytes)),
            Err(TapeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn truncated_data_is_clamped() {
        let mut bytes = build(&[(b"fmt ", fmt_chunk(1, 8000, 8)), (b"data", vec![0; 6])]);
        bytes.truncate(bytes.len() - 2);
        let parsed = WavFormat::parse(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed.data_len, 4);
    }

    #[test]
    fn sniffs_riff_wave() {
        assert!(is_riff_wave(b"RIFF\x24\x00\x00\x00WAVEfmt "));
        assert!(!is_riff_wave(b"RIFF\x24\x00\x00\x00AVI "));
        assert!(!is_riff_wave(b"RIFF"));
    }
}
