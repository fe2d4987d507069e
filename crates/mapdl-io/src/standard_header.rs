//! The 100-item standard header shared by every MAPDL binary file.
//!
//! The header is an ordinary record at the start of the file, so item `k`
//! (1-based, as numbered in the vendor's `binhed` documentation) sits at
//! absolute word `k + 1`. Character items are stored as integers holding four
//! characters each.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::{MapdlError, Result};
use crate::record::{Endian, RecordReader};

/// Word holding the file unit number (the file type code).
pub const FILE_CODE_WORD: i64 = 2;
const FORMAT_WORD: i64 = 3;
const TIME_WORD: i64 = 4;
const DATE_WORD: i64 = 5;
const UNITS_WORD: i64 = 6;
const VERSION_WORD: i64 = 11;
const MACHINE_WORD: i64 = 13;
const RECORD_SIZE_WORD: i64 = 27;
const JOBNAME2_WORD: i64 = 32;
const TITLE_WORD: i64 = 42;
const SPLIT_POINT_WORD: i64 = 96;

/// Word at which the file-specific header record starts.
pub const FILE_HEADER_WORD: i64 = 103;

/// Unit system recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Units {
    UserDefined,
    Si,
    Csg,
    UsCustomaryFeet,
    UsCustomaryInches,
    Mks,
    Mpa,
    UMks,
    Unknown(i32),
}

impl Units {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Units::UserDefined,
            1 => Units::Si,
            2 => Units::Csg,
            3 => Units::UsCustomaryFeet,
            4 => Units::UsCustomaryInches,
            5 => Units::Mks,
            6 => Units::Mpa,
            7 => Units::UMks,
            other => Units::Unknown(other),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Units::UserDefined => "User Defined",
            Units::Si => "SI",
            Units::Csg => "CSG",
            Units::UsCustomaryFeet => "U.S. Customary units (feet)",
            Units::UsCustomaryInches => "U.S. Customary units (inches)",
            Units::Mks => "MKS",
            Units::Mpa => "MPA",
            Units::UMks => "uMKS",
            Units::Unknown(_) => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandardHeader {
    pub endian: Endian,
    /// File unit number; doubles as the file type code (EMAT = 2, FULL = 4, ...).
    pub file_code: i32,
    /// Internal (0) or external (1) file format.
    pub file_format: i32,
    pub time: String,
    pub date: String,
    pub units: Units,
    pub verstring: String,
    pub main_version: Option<u32>,
    pub sub_version: Option<u32>,
    pub machine: String,
    pub jobname: String,
    pub product: String,
    pub special: String,
    pub username: String,
    pub machine_identifier: String,
    pub system_record_size: i32,
    pub jobname2: String,
    pub title: String,
    pub subtitle: String,
    pub split_point: i32,
}

/// Determine the byte order of `path` from its first word.
pub fn detect_endian(path: impl AsRef<Path>) -> Result<Endian> {
    let path = path.as_ref();
    let mut first = [0u8; 4];
    BufReader::new(File::open(path)?)
        .read_exact(&mut first)
        .map_err(|_| not_binary(path))?;
    let endian = Endian::detect(first).ok_or_else(|| not_binary(path))?;
    debug!(path = %path.display(), ?endian, "detected byte order");
    Ok(endian)
}

fn not_binary(path: &Path) -> MapdlError {
    MapdlError::NotAnAnsysBinaryFile {
        path: path.display().to_string(),
    }
}

/// Read only the file type code.
pub fn read_file_code(path: impl AsRef<Path>) -> Result<(Endian, i32)> {
    let path = path.as_ref();
    let endian = detect_endian(path)?;
    let mut reader = RecordReader::open(path, endian)?;
    reader.seek_word(FILE_CODE_WORD)?;
    Ok((endian, reader.read_word()?))
}

/// Decode the standard header of `path`.
pub fn read_standard_header(path: impl AsRef<Path>) -> Result<StandardHeader> {
    let path = path.as_ref();
    let endian = detect_endian(path)?;
    let mut reader = RecordReader::open(path, endian)?;

    reader.seek_word(FILE_CODE_WORD)?;
    let file_code = reader.read_word()?;
    reader.seek_word(FORMAT_WORD)?;
    let file_format = reader.read_word()?;
    reader.seek_word(TIME_WORD)?;
    let time = format_time(reader.read_word()?);
    reader.seek_word(DATE_WORD)?;
    let date = format_date(reader.read_word()?);
    reader.seek_word(UNITS_WORD)?;
    let units = Units::from_code(reader.read_word()?);

    reader.seek_word(VERSION_WORD)?;
    let verstring = read_string(&mut reader, 1)?;
    let (main_version, sub_version) = split_version(&verstring);

    // item 11 (release date) is skipped
    reader.seek_word(MACHINE_WORD)?;
    let machine = read_string(&mut reader, 3)?;
    let jobname = read_string(&mut reader, 2)?;
    let product = read_string(&mut reader, 2)?;
    let special = read_string(&mut reader, 1)?;
    let username = read_string(&mut reader, 3)?;
    let machine_identifier = read_string(&mut reader, 3)?;

    reader.seek_word(RECORD_SIZE_WORD)?;
    let system_record_size = reader.read_word()?;

    reader.seek_word(JOBNAME2_WORD)?;
    let jobname2 = read_string(&mut reader, 8)?;

    reader.seek_word(TITLE_WORD)?;
    let title = read_string(&mut reader, 20)?;
    let subtitle = read_string(&mut reader, 20)?;

    reader.seek_word(SPLIT_POINT_WORD)?;
    let split_point = reader.read_word()?;

    Ok(StandardHeader {
        endian,
        file_code,
        file_format,
        time,
        date,
        units,
        verstring,
        main_version,
        sub_version,
        machine,
        jobname,
        product,
        special,
        username,
        machine_identifier,
        system_record_size,
        jobname2,
        title,
        subtitle,
        split_point,
    })
}

/// Read `nblocks` four-character words and decode them as text.
pub fn read_string<R: std::io::Read + std::io::Seek>(
    reader: &mut RecordReader<R>,
    nblocks: usize,
) -> Result<String> {
    let endian = reader.endian();
    let bytes: Vec<u8> = reader
        .read_blocks(nblocks)?
        .into_iter()
        .flat_map(|block| endian.i32(block).to_be_bytes())
        .collect();
    Ok(String::from_utf8_lossy(&bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string())
}

/// `HHMMSS` → `HH:MM:SS`.
fn format_time(raw: i32) -> String {
    let digits = format!("{raw:06}");
    format!("{}:{}:{}", &digits[0..2], &digits[2..4], &digits[4..])
}

/// `YYYYMMDD` → `YYYY/MM/DD`; -1 marks an unset date.
fn format_date(raw: i32) -> String {
    if raw == -1 {
        return String::new();
    }
    let digits = format!("{raw:08}");
    format!("{}/{}/{}", &digits[0..4], &digits[4..6], &digits[6..])
}

fn split_version(verstring: &str) -> (Option<u32>, Option<u32>) {
    let main = verstring.get(..2).and_then(|s| s.trim().parse().ok());
    let sub = verstring
        .chars()
        .last()
        .and_then(|c| c.to_digit(10));
    (main, sub)
}
