//! Fortran-style record codec for MAPDL binary files.
//!
//! Every MAPDL binary file is a sequence of bracketed records:
//!
//! ```text
//! [N: i32][flags: i32][payload: 4*N bytes][suffix: i32]
//! ```
//!
//! `N` counts 4-byte words. The most significant byte of the flags word
//! describes the payload:
//!
//! | bit | meaning                                   |
//! |-----|-------------------------------------------|
//! | 3   | binary sparse (bit-coded) compression     |
//! | 4   | windowed sparse compression               |
//! | 5   | zlib compression                          |
//! | 6   | precision: 1 = short/single, 0 = int/double |
//! | 7   | type: 1 = integer, 0 = floating point     |
//!
//! File pointers stored in headers are word offsets from the start of the
//! file, so `seek_word(ptr)` followed by `read_record` is the common access
//! pattern.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::{MapdlError, Result};

/// Size of one file word in bytes.
pub const WORD_BYTES: u64 = 4;

/// Byte order of a binary file, detected from the standard header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Detect the byte order from the first word of a file, which always
    /// holds the length of the 100-word standard header.
    pub fn detect(first_word: [u8; 4]) -> Option<Self> {
        if i32::from_le_bytes(first_word) == 100 {
            Some(Endian::Little)
        } else if i32::from_be_bytes(first_word) == 100 {
            Some(Endian::Big)
        } else {
            None
        }
    }

    pub fn i32(self, bytes: [u8; 4]) -> i32 {
        match self {
            Endian::Little => i32::from_le_bytes(bytes),
            Endian::Big => i32::from_be_bytes(bytes),
        }
    }

    pub fn i16(self, bytes: [u8; 2]) -> i16 {
        match self {
            Endian::Little => i16::from_le_bytes(bytes),
            Endian::Big => i16::from_be_bytes(bytes),
        }
    }

    pub fn f32(self, bytes: [u8; 4]) -> f32 {
        match self {
            Endian::Little => f32::from_le_bytes(bytes),
            Endian::Big => f32::from_be_bytes(bytes),
        }
    }

    pub fn f64(self, bytes: [u8; 8]) -> f64 {
        match self {
            Endian::Little => f64::from_le_bytes(bytes),
            Endian::Big => f64::from_be_bytes(bytes),
        }
    }

    pub fn i32_bytes(self, value: i32) -> [u8; 4] {
        match self {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        }
    }

    pub fn f64_bytes(self, value: f64) -> [u8; 8] {
        match self {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        }
    }
}

/// Element type of a record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    Int32,
    Int16,
    Float32,
    Float64,
}

impl Dtype {
    pub fn size(self) -> usize {
        match self {
            Dtype::Int16 => 2,
            Dtype::Int32 | Dtype::Float32 => 4,
            Dtype::Float64 => 8,
        }
    }
}

/// Decoded flag byte of a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFlags {
    pub bsparse: bool,
    pub wsparse: bool,
    pub zlib: bool,
    pub low_precision: bool,
    pub integer: bool,
}

impl RecordFlags {
    pub fn from_flag_byte(byte: u8) -> Self {
        Self {
            bsparse: (byte >> 3) & 1 == 1,
            wsparse: (byte >> 4) & 1 == 1,
            zlib: (byte >> 5) & 1 == 1,
            low_precision: (byte >> 6) & 1 == 1,
            integer: (byte >> 7) & 1 == 1,
        }
    }

    /// Flags live in the most significant byte of the second header word.
    pub fn from_flag_word(word: i32) -> Self {
        Self::from_flag_byte((word as u32 >> 24) as u8)
    }

    pub fn to_flag_word(self) -> i32 {
        let byte = (self.bsparse as u32) << 3
            | (self.wsparse as u32) << 4
            | (self.zlib as u32) << 5
            | (self.low_precision as u32) << 6
            | (self.integer as u32) << 7;
        (byte << 24) as i32
    }

    /// Flag word written in front of an uncompressed payload of `dtype`.
    pub fn for_dtype(dtype: Dtype) -> Self {
        Self {
            integer: matches!(dtype, Dtype::Int32 | Dtype::Int16),
            low_precision: matches!(dtype, Dtype::Int16 | Dtype::Float32),
            ..Self::default()
        }
    }

    pub fn dtype(self) -> Result<Dtype> {
        if self.bsparse || self.wsparse {
            return Err(MapdlError::UnsupportedRecordFormat {
                compression: "sparse",
            });
        }
        if self.zlib {
            return Err(MapdlError::UnsupportedRecordFormat {
                compression: "zlib",
            });
        }
        Ok(match (self.integer, self.low_precision) {
            (true, false) => Dtype::Int32,
            (true, true) => Dtype::Int16,
            (false, false) => Dtype::Float64,
            (false, true) => Dtype::Float32,
        })
    }
}

/// Payload of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    Int32(Vec<i32>),
    Int16(Vec<i16>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl RecordData {
    pub fn dtype(&self) -> Dtype {
        match self {
            RecordData::Int32(_) => Dtype::Int32,
            RecordData::Int16(_) => Dtype::Int16,
            RecordData::Float32(_) => Dtype::Float32,
            RecordData::Float64(_) => Dtype::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordData::Int32(v) => v.len(),
            RecordData::Int16(v) => v.len(),
            RecordData::Float32(v) => v.len(),
            RecordData::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer view of the payload. Floating point payloads are rejected.
    pub fn into_i32(self) -> Result<Vec<i32>> {
        match self {
            RecordData::Int32(v) => Ok(v),
            RecordData::Int16(v) => Ok(v.into_iter().map(i32::from).collect()),
            other => Err(MapdlError::invalid(format!(
                "expected an integer record, found {:?}",
                other.dtype()
            ))),
        }
    }

    /// Floating point view of the payload; integers are widened.
    pub fn into_f64(self) -> Vec<f64> {
        match self {
            RecordData::Int32(v) => v.into_iter().map(f64::from).collect(),
            RecordData::Int16(v) => v.into_iter().map(f64::from).collect(),
            RecordData::Float32(v) => v.into_iter().map(f64::from).collect(),
            RecordData::Float64(v) => v,
        }
    }
}

/// Reads bracketed records from a seekable byte stream.
pub struct RecordReader<R> {
    inner: R,
    endian: Endian,
}

impl RecordReader<BufReader<File>> {
    /// Open `path` for one logical read. The handle is dropped with the reader.
    pub fn open(path: impl AsRef<Path>, endian: Endian) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), endian))
    }
}

impl<R: Read + Seek> RecordReader<R> {
    pub fn new(inner: R, endian: Endian) -> Self {
        Self { inner, endian }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Current stream position in bytes.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Seek to an absolute word offset (a file pointer from a header).
    pub fn seek_word(&mut self, word: i64) -> Result<()> {
        if word < 0 {
            return Err(MapdlError::invalid(format!("negative file pointer {word}")));
        }
        let byte = (word as u64)
            .checked_mul(WORD_BYTES)
            .ok_or_else(|| MapdlError::invalid(format!("file pointer {word} out of range")))?;
        self.inner.seek(SeekFrom::Start(byte))?;
        Ok(())
    }

    /// Bytes left between the current position and the end of the stream.
    fn remaining_bytes(&mut self) -> Result<u64> {
        let pos = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(end.saturating_sub(pos))
    }

    /// Move the stream relative to its current position.
    pub fn skip_bytes(&mut self, nbytes: i64) -> Result<()> {
        self.inner.seek(SeekFrom::Current(nbytes))?;
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8], context: &str) -> Result<()> {
        self.inner.read_exact(buf).map_err(|err| match err.kind() {
            io::ErrorKind::UnexpectedEof => MapdlError::TruncatedFile {
                context: context.to_string(),
            },
            _ => MapdlError::Io(err),
        })
    }

    /// Read one raw word in file byte order.
    pub fn read_word(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, "word")?;
        Ok(self.endian.i32(buf))
    }

    /// Read `n` consecutive 4-byte blocks without interpreting them.
    pub fn read_blocks(&mut self, n: usize) -> Result<Vec<[u8; 4]>> {
        let mut buf = vec![0u8; n * 4];
        self.fill(&mut buf, "character block")?;
        Ok(buf
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect())
    }

    fn read_header(&mut self) -> Result<(usize, RecordFlags)> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf, "record length")?;
        let n = self.endian.i32([buf[0], buf[1], buf[2], buf[3]]);
        let flags = self.endian.i32([buf[4], buf[5], buf[6], buf[7]]);
        if n < 0 {
            return Err(MapdlError::invalid(format!("negative record length {n}")));
        }
        Ok((n as usize, RecordFlags::from_flag_word(flags)))
    }

    /// Read one record.
    ///
    /// `dtype` overrides the type encoded in the flag byte; `count` overrides
    /// the number of elements derived from the record length. The stream is
    /// left after the suffix word. The suffix itself is not checked against
    /// the prefix.
    pub fn read_record(&mut self, dtype: Option<Dtype>, count: Option<usize>) -> Result<RecordData> {
        let (n, flags) = self.read_header()?;
        let dtype = match dtype {
            Some(dtype) => dtype,
            None => flags.dtype()?,
        };
        let count = count.unwrap_or(n * WORD_BYTES as usize / dtype.size());
        let nbytes = count.checked_mul(dtype.size()).ok_or_else(|| {
            MapdlError::invalid(format!("record of {count} {dtype:?} items overflows"))
        })?;
        // never allocate more than the file can hold
        if nbytes as u64 > self.remaining_bytes()? {
            return Err(MapdlError::TruncatedFile {
                context: format!("record payload of {nbytes} bytes"),
            });
        }

        let mut raw = vec![0u8; nbytes];
        self.fill(&mut raw, "record payload")?;
        self.skip_bytes(WORD_BYTES as i64)?;

        let endian = self.endian;
        let data = match dtype {
            Dtype::Int32 => RecordData::Int32(
                raw.chunks_exact(4)
                    .map(|c| endian.i32([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            Dtype::Int16 => RecordData::Int16(
                raw.chunks_exact(2)
                    .map(|c| endian.i16([c[0], c[1]]))
                    .collect(),
            ),
            Dtype::Float32 => RecordData::Float32(
                raw.chunks_exact(4)
                    .map(|c| endian.f32([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            Dtype::Float64 => RecordData::Float64(
                raw.chunks_exact(8)
                    .map(|c| endian.f64([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
        };
        debug!(words = n, items = count, ?dtype, "read record");
        Ok(data)
    }

    /// Read a record as 32-bit integers regardless of its flag byte.
    pub fn read_int_record(&mut self) -> Result<Vec<i32>> {
        self.read_record(Some(Dtype::Int32), None)?.into_i32()
    }

    /// Read `count` doubles regardless of the flag byte.
    pub fn read_double_record(&mut self, count: usize) -> Result<Vec<f64>> {
        Ok(self.read_record(Some(Dtype::Float64), Some(count))?.into_f64())
    }

    /// Advance past one record without decoding it, returning its word count.
    pub fn skip_record(&mut self) -> Result<usize> {
        let (n, _) = self.read_header()?;
        self.skip_bytes((n as i64 + 1) * WORD_BYTES as i64)?;
        Ok(n)
    }
}
