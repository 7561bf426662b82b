//! [`TapeFile`]: the per-open-file handle and its logical read/write API.
//!
//! ```no_run
//! use cocotape::{AccessMode, TapeFile};
//!
//! let mut tape = TapeFile::open("games.cas,ZAXXON", AccessMode::Read)?;
//! let entry = tape.dir_entry().cloned();
//! let mut data = Vec::new();
//! let mut buf = [0u8; 256];
//! loop {
//!     let n = tape.read(&mut buf)?;
//!     if n == 0 { break; }
//!     data.extend_from_slice(&buf[..n]);
//! }
//! tape.close()?;
//! # let _ = entry;
//! # Ok::<(), cocotape::TapeError>(())
//! ```
//!
//! A pathlist is `image[,NAME]`.  The handle owns its backing file; it is
//! released by [`TapeFile::close`] or, failing that, when the handle drops.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::assembler::BlockAssembler;
use crate::bitstream::{ByteSink, CasBitReader, CasPosition, CasWriter, TapeSink, TapeSource};
use crate::block::{Block, BlockType, LEADER_BYTE, MAX_PAYLOAD, SYNC};
use crate::config::{ChecksumKind, ContainerKind, TapeConfig};
use crate::dir_entry::{pad_filename, DataType, DirEntry, FileType, FILENAME_LEN};
use crate::error::{Result, TapeError};
use crate::recovery::{self, ScanReport};
use crate::wav::demod::WavDemodulator;
use crate::wav::synth::{check_format, WaveWriter};
use crate::wav::{is_riff_wave, WavFormat};

pub const CAS_EXTENSION: &str = "cas";
pub const WAV_EXTENSION: &str = "wav";
/// Record delimiter for ASCII files.
pub const LINE_DELIMITER: u8 = 0x0D;
const SNIFF_LEN: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
    /// Reading, or appending a new file to an existing tape.
    Update,
    /// Block-level access only; logical reads and writes are refused.
    Raw,
}

// ── Pathlists ─────────────────────────────────────────────────────────────────

/// A parsed `image[,NAME]` pathlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapePath {
    pub image:    PathBuf,
    pub filename: Option<[u8; FILENAME_LEN]>,
}

impl TapePath {
    pub fn parse(pathlist: &str) -> Result<Self> {
        let (image, name) = match pathlist.rsplit_once(',') {
            Some((image, name)) => (image, Some(name.trim())),
            None                => (pathlist, None),
        };
        if image.is_empty() {
            return Err(TapeError::InvalidFilename(pathlist.to_string()));
        }
        let filename = match name {
            Some(n) if !n.is_empty() => Some(pad_filename(n)?),
            _ => None,
        };
        Ok(Self { image: PathBuf::from(image), filename })
    }
}

/// Container kind implied by the file extension, if any.
pub fn kind_from_extension(path: &Path) -> Option<ContainerKind> {
    let ext = path.extension()?.to_str()?;
    if ext.eq_ignore_ascii_case(CAS_EXTENSION) {
        Some(ContainerKind::Cas)
    } else if ext.eq_ignore_ascii_case(WAV_EXTENSION) {
        Some(ContainerKind::Wav)
    } else {
        None
    }
}

/// Decides CAS or WAV: forced by config, then by extension, then by content.
pub fn classify(path: &Path, config: &TapeConfig) -> Result<ContainerKind> {
    if let Some(kind) = config.container.or_else(|| kind_from_extension(path)) {
        return Ok(kind);
    }
    let mut head = Vec::new();
    File::open(path)?.take(SNIFF_LEN).read_to_end(&mut head)?;
    if is_riff_wave(&head) {
        Ok(ContainerKind::Wav)
    } else if head.windows(2).any(|w| w == SYNC) {
        Ok(ContainerKind::Cas)
    } else {
        Err(TapeError::Unrecognized(format!(
            "{} is neither a CAS nor a WAV tape",
            path.display()
        )))
    }
}

// ── Create options ────────────────────────────────────────────────────────────

/// Attributes of a file written with [`TapeFile::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOptions {
    pub file_type:       FileType,
    pub data_type:       DataType,
    pub gap:             bool,
    pub ml_load_address: u16,
    pub ml_exec_address: u16,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            file_type:       FileType::Program,
            data_type:       DataType::Binary,
            gap:             false,
            ml_load_address: 0,
            ml_exec_address: 0,
        }
    }
}

// ── Backing I/O ───────────────────────────────────────────────────────────────

enum TapeIo {
    Reader(BlockAssembler<TapeSource>),
    Writer(TapeWriter),
}

struct TapeWriter {
    sink:       TapeSink,
    pending:    Vec<u8>,
    checksum:   ChecksumKind,
    leader_len: usize,
    gap:        bool,
}

impl TapeWriter {
    fn write_leader(&mut self) -> Result<()> {
        for _ in 0..self.leader_len {
            self.sink.write_byte(LEADER_BYTE)?;
        }
        Ok(())
    }

    fn write_block(&mut self, block: &Block) -> Result<()> {
        self.sink.write_bytes(&block.encode(self.checksum))
    }

    fn write_data_block(&mut self, payload: Vec<u8>) -> Result<()> {
        if self.gap {
            self.sink.write_gap()?;
            self.write_leader()?;
        }
        self.write_block(&Block::new(BlockType::Data, payload))
    }

    fn drain_full_blocks(&mut self) -> Result<()> {
        while self.pending.len() >= MAX_PAYLOAD {
            let chunk: Vec<u8> = self.pending.drain(..MAX_PAYLOAD).collect();
            self.write_data_block(chunk)?;
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        self.drain_full_blocks()?;
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.write_data_block(rest)?;
        }
        Ok(())
    }
}

// ── TapeFile ──────────────────────────────────────────────────────────────────

pub struct TapeFile {
    mode:        AccessMode,
    kind:        ContainerKind,
    image:       PathBuf,
    filename:    Option<[u8; FILENAME_LEN]>,
    dir_entry:   Option<DirEntry>,
    filepos:     u64,
    config:      TapeConfig,
    io:          Option<TapeIo>,
    block_type:  Option<BlockType>,
    data:        Vec<u8>,
    cursor:      usize,
    eof:         bool,
    /// Error hit after a partial read; returned by the next read.
    deferred:    Option<TapeError>,
    /// Namefile that ended the previous file without an EOF block.
    next_entry:  Option<DirEntry>,
}

impl TapeFile {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn open(pathlist: &str, mode: AccessMode) -> Result<Self> {
        Self::open_with(pathlist, mode, &TapeConfig::default())
    }

    /// Opens a tape for reading.  With a `,NAME` suffix the handle is
    /// positioned just after that file's directory entry.
    pub fn open_with(pathlist: &str, mode: AccessMode, config: &TapeConfig) -> Result<Self> {
        if mode == AccessMode::Write {
            return Err(TapeError::InvalidMode { mode, operation: "open" });
        }
        let path = TapePath::parse(pathlist)?;
        let kind = classify(&path.image, config)?;
        let file = File::open(&path.image)?;

        let source = match kind {
            ContainerKind::Cas => TapeSource::Cas(CasBitReader::new(
                BufReader::new(file),
                config.bit_order,
                CasPosition::new(config.start_sample, 0),
            )?),
            ContainerKind::Wav => {
                let mut reader = BufReader::new(file);
                let format = WavFormat::parse(&mut reader)?;
                TapeSource::Wav(WavDemodulator::new(reader, format, config)?)
            }
        };
        debug!("opened {} as {:?} in {:?} mode", path.image.display(), kind, mode);

        let mut tape = Self::with_io(mode, kind, path.image, config, TapeIo::Reader(BlockAssembler::new(source, config)));
        tape.filename = path.filename;
        if let Some(name) = path.filename {
            tape.locate(&name)?;
        }
        Ok(tape)
    }

    pub fn create(pathlist: &str, mode: AccessMode, options: &CreateOptions) -> Result<Self> {
        Self::create_with(pathlist, mode, options, &TapeConfig::default())
    }

    /// Creates a tape file for writing.
    ///
    /// `Write` and `Raw` truncate the image; `Update` appends to an existing
    /// image.  Outside raw mode the leader and namefile block are written
    /// immediately and the pathlist must carry a `,NAME`.
    pub fn create_with(
        pathlist: &str,
        mode:     AccessMode,
        options:  &CreateOptions,
        config:   &TapeConfig,
    ) -> Result<Self> {
        if mode == AccessMode::Read {
            return Err(TapeError::InvalidMode { mode, operation: "create" });
        }
        let path = TapePath::parse(pathlist)?;
        let logical = mode != AccessMode::Raw;
        if logical && path.filename.is_none() {
            return Err(TapeError::InvalidFilename(format!("{pathlist}: no tape filename given")));
        }
        let kind = config
            .container
            .or_else(|| kind_from_extension(&path.image))
            .ok_or_else(|| {
                TapeError::Unrecognized(format!("{}: use a .cas or .wav extension", path.image.display()))
            })?;
        let append = mode == AccessMode::Update && path.image.exists();

        let sink = match (kind, append) {
            (ContainerKind::Cas, true) => {
                let file = OpenOptions::new().append(true).open(&path.image)?;
                TapeSink::Cas(CasWriter::new(BufWriter::new(file)))
            }
            (ContainerKind::Cas, false) => {
                TapeSink::Cas(CasWriter::new(BufWriter::new(File::create(&path.image)?)))
            }
            (ContainerKind::Wav, true) => {
                let mut file = OpenOptions::new().read(true).write(true).open(&path.image)?;
                let format = WavFormat::parse(&mut file)?;
                TapeSink::Wav(WaveWriter::resume(BufWriter::new(file), format, config)?)
            }
            (ContainerKind::Wav, false) => {
                // Checked before File::create truncates an existing tape.
                check_format(&WavFormat::mono(config.sample_rate, config.bits_per_sample))?;
                TapeSink::Wav(WaveWriter::from_config(BufWriter::new(File::create(&path.image)?), config)?)
            }
        };
        debug!(
            "created {} as {:?} in {:?} mode{}",
            path.image.display(),
            kind,
            mode,
            if append { " (appending)" } else { "" }
        );

        let writer = TapeWriter {
            sink,
            pending:    Vec::with_capacity(MAX_PAYLOAD),
            checksum:   config.checksum,
            leader_len: config.leader_len,
            gap:        options.gap,
        };
        let mut tape = Self::with_io(mode, kind, path.image, config, TapeIo::Writer(writer));
        tape.filename = path.filename;

        if let Some(filename) = path.filename.filter(|_| logical) {
            let is_ml = options.file_type == FileType::MachineLanguage;
            let entry = DirEntry {
                filename,
                file_type:       options.file_type,
                data_type:       options.data_type,
                gap:             options.gap,
                ml_load_address: if is_ml { options.ml_load_address } else { 0 },
                ml_exec_address: if is_ml { options.ml_exec_address } else { 0 },
            };
            let w = tape.writer("create")?;
            w.write_leader()?;
            w.write_block(&Block::new(BlockType::Namefile, entry.to_bytes().to_vec()))?;
            w.sink.write_gap()?;
            w.write_leader()?;
            tape.dir_entry = Some(entry);
        }
        Ok(tape)
    }

    fn with_io(mode: AccessMode, kind: ContainerKind, image: PathBuf, config: &TapeConfig, io: TapeIo) -> Self {
        Self {
            mode,
            kind,
            image,
            filename:   None,
            dir_entry:  None,
            filepos:    0,
            config:     config.clone(),
            io:         Some(io),
            block_type: None,
            data:       Vec::new(),
            cursor:     0,
            eof:        false,
            deferred:   None,
            next_entry: None,
        }
    }

    /// Flushes pending output, writes the EOF block when writing a logical
    /// file, and releases the backing file.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        match self.io.take() {
            Some(TapeIo::Writer(mut w)) => {
                if self.mode != AccessMode::Raw {
                    w.flush_pending()?;
                    w.write_block(&Block::eof())?;
                }
                w.sink.finish()?;
                debug!("closed {} after {} bytes", self.image.display(), self.filepos);
                Ok(())
            }
            Some(TapeIo::Reader(_)) | None => Ok(()),
        }
    }

    // ── Observers ────────────────────────────────────────────────────────────

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn container(&self) -> ContainerKind {
        self.kind
    }

    pub fn image_path(&self) -> &Path {
        &self.image
    }

    pub fn is_raw(&self) -> bool {
        self.mode == AccessMode::Raw
    }

    pub fn config(&self) -> &TapeConfig {
        &self.config
    }

    /// Filename given in the pathlist, space padded.
    pub fn requested_filename(&self) -> Option<&[u8; FILENAME_LEN]> {
        self.filename.as_ref()
    }

    pub fn dir_entry(&self) -> Option<&DirEntry> {
        self.dir_entry.as_ref()
    }

    /// Logical byte position within the current file.
    pub fn position(&self) -> u64 {
        self.filepos
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// The data block currently held for reading.
    pub fn current_block(&self) -> Option<(BlockType, &[u8])> {
        self.block_type.map(|t| (t, self.data.as_slice()))
    }

    pub fn wav_format(&self) -> Option<&WavFormat> {
        match &self.io {
            Some(TapeIo::Reader(asm)) => match asm.source() {
                TapeSource::Wav(demod) => Some(demod.format()),
                TapeSource::Cas(_) => None,
            },
            _ => None,
        }
    }

    pub fn cas_position(&self) -> Option<CasPosition> {
        match &self.io {
            Some(TapeIo::Reader(asm)) => match asm.source() {
                TapeSource::Cas(reader) => Some(reader.position()),
                TapeSource::Wav(_) => None,
            },
            _ => None,
        }
    }

    // ── Block level ──────────────────────────────────────────────────────────

    fn assembler(&mut self, operation: &'static str) -> Result<&mut BlockAssembler<TapeSource>> {
        match &mut self.io {
            Some(TapeIo::Reader(asm)) => Ok(asm),
            _ => Err(TapeError::InvalidMode { mode: self.mode, operation }),
        }
    }

    fn writer(&mut self, operation: &'static str) -> Result<&mut TapeWriter> {
        match &mut self.io {
            Some(TapeIo::Writer(w)) => Ok(w),
            _ => Err(TapeError::InvalidMode { mode: self.mode, operation }),
        }
    }

    /// Next framed block of any type, bypassing the logical file state.
    pub fn read_next_block(&mut self) -> Result<Option<Block>> {
        self.assembler("read block")?.next_block()
    }

    /// Advances to the next directory entry on the tape and makes it the
    /// current file.  `None` (with EOF set) once the tape holds no more.
    pub fn read_next_dir_entry(&mut self) -> Result<Option<DirEntry>> {
        let entry = match self.next_entry.take() {
            Some(entry) => Some(entry),
            None => self.assembler("read directory entry")?.next_dir_entry()?,
        };
        self.reset_file_state();
        self.eof = entry.is_none();
        self.dir_entry = entry.clone();
        Ok(entry)
    }

    /// Writes one framed block as is.
    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        let w = self.writer("write block")?;
        w.flush_pending()?;
        w.write_block(block)
    }

    /// Writes `leader_len` leader bytes, for raw-mode tape construction.
    pub fn write_leader(&mut self) -> Result<()> {
        self.writer("write leader")?.write_leader()
    }

    /// Back to the configured start of the tape, with no current file.
    pub fn rewind(&mut self) -> Result<()> {
        self.assembler("rewind")?.rewind()?;
        self.reset_file_state();
        self.dir_entry = None;
        self.next_entry = None;
        Ok(())
    }

    /// Rewinds the tape and grades every block on it.  The handle is left
    /// at the end of the stream; call [`rewind`](Self::rewind) to read again.
    pub fn scan(&mut self) -> Result<ScanReport> {
        let report = recovery::scan(self.assembler("scan")?)?;
        self.reset_file_state();
        self.dir_entry = None;
        self.next_entry = None;
        Ok(report)
    }

    fn reset_file_state(&mut self) {
        self.filepos = 0;
        self.block_type = None;
        self.data.clear();
        self.cursor = 0;
        self.eof = false;
        self.deferred = None;
    }

    fn locate(&mut self, name: &[u8; FILENAME_LEN]) -> Result<()> {
        loop {
            match self.read_next_dir_entry() {
                Ok(Some(entry)) if entry.matches(name) => return Ok(()),
                Ok(Some(entry)) => debug!("passing over {:?}", entry.name()),
                Ok(None) => {
                    return Err(TapeError::NotFound(String::from_utf8_lossy(name).trim_end().to_string()));
                }
                Err(e) if e.is_recoverable() => warn!("damaged block while locating file: {}", e),
                Err(e) => return Err(e),
            }
        }
    }

    // ── Logical reads ────────────────────────────────────────────────────────

    fn check_logical(&self, operation: &'static str) -> Result<()> {
        match self.mode {
            AccessMode::Read | AccessMode::Update => Ok(()),
            mode => Err(TapeError::InvalidMode { mode, operation }),
        }
    }

    /// Makes sure a file is selected.  False once the file or tape is done.
    fn begin_file(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        if self.dir_entry.is_none() {
            return Ok(self.read_next_dir_entry()?.is_some());
        }
        Ok(true)
    }

    /// Loads the next data block of the current file.  False at the end of
    /// the file: an EOF block, the next namefile, or the end of the stream.
    fn fill_block(&mut self) -> Result<bool> {
        loop {
            let next = self.assembler("read")?.next_block()?;
            match next {
                None => {
                    debug!("tape ends without an EOF block");
                    break;
                }
                Some(block) => match block.block_type {
                    BlockType::Data => {
                        self.block_type = Some(BlockType::Data);
                        self.data = block.payload;
                        self.cursor = 0;
                        return Ok(true);
                    }
                    BlockType::Eof => break,
                    BlockType::Namefile => {
                        debug!("next file starts before an EOF block");
                        match DirEntry::from_payload(&block.payload) {
                            Ok(entry) => self.next_entry = Some(entry),
                            Err(e) => warn!("unreadable namefile after unterminated file: {}", e),
                        }
                        break;
                    }
                    BlockType::Other(code) => warn!("skipping block of unknown type {:#04x}", code),
                },
            }
        }
        self.block_type = None;
        self.data.clear();
        self.cursor = 0;
        Ok(false)
    }

    /// Advances to the next unread byte, loading blocks as needed.
    fn next_byte(&mut self) -> Result<Option<u8>> {
        while self.cursor == self.data.len() {
            if !self.fill_block()? {
                self.eof = true;
                return Ok(None);
            }
        }
        let b = self.data[self.cursor];
        self.cursor += 1;
        self.filepos += 1;
        Ok(Some(b))
    }

    fn take_deferred(&mut self) -> Result<()> {
        match self.deferred.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Copies up to `buf.len()` bytes of the current file into `buf`.
    ///
    /// Returns 0 with [`is_eof`](Self::is_eof) set once the file's data is
    /// exhausted.  A damaged block yields its error; reading again resumes
    /// at the following block.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_logical("read")?;
        self.take_deferred()?;
        if !self.begin_file()? {
            return Ok(0);
        }

        let mut copied = 0;
        while copied < buf.len() {
            if self.cursor < self.data.len() {
                let n = (buf.len() - copied).min(self.data.len() - self.cursor);
                buf[copied..copied + n].copy_from_slice(&self.data[self.cursor..self.cursor + n]);
                self.cursor += n;
                self.filepos += n as u64;
                copied += n;
                continue;
            }
            match self.fill_block() {
                Ok(true) => {}
                Ok(false) => {
                    self.eof = true;
                    break;
                }
                Err(e) if copied > 0 => {
                    self.deferred = Some(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(copied)
    }

    /// Like [`read`](Self::read) but stops after a carriage return, which is
    /// consumed and not copied.
    pub fn read_line(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_logical("read_line")?;
        self.take_deferred()?;
        if !self.begin_file()? {
            return Ok(0);
        }

        let mut copied = 0;
        while copied < buf.len() {
            match self.next_byte() {
                Ok(Some(LINE_DELIMITER)) | Ok(None) => break,
                Ok(Some(b)) => {
                    buf[copied] = b;
                    copied += 1;
                }
                Err(e) if copied > 0 => {
                    self.deferred = Some(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(copied)
    }

    // ── Logical writes ───────────────────────────────────────────────────────

    /// Appends file data; full 255-byte blocks go out immediately, the rest
    /// on close.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.mode == AccessMode::Raw {
            return Err(TapeError::InvalidMode { mode: self.mode, operation: "write" });
        }
        let w = self.writer("write")?;
        w.pending.extend_from_slice(buf);
        w.drain_full_blocks()?;
        self.filepos += buf.len() as u64;
        Ok(buf.len())
    }
}

impl Drop for TapeFile {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("error closing {}: {}", self.image.display(), e);
        }
    }
}

impl io::Read for TapeFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TapeFile::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for TapeFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TapeFile::write(self, buf).map_err(io::Error::from)
    }

    /// Pushes completed blocks to the image.  A partial block stays pending
    /// until more data fills it or the file is closed.
    fn flush(&mut self) -> io::Result<()> {
        match &mut self.io {
            Some(TapeIo::Writer(w)) => w.sink.flush().map_err(io::Error::from),
            _ => Ok(()),
        }
    }
}
