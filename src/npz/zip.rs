//! The subset of the ZIP container used by `.npz` files.
//!
//! Entries are laid out as local header + payload blocks, followed by one
//! central directory record per entry and the end-of-central-directory
//! footer. Only single-disk archives without a trailing comment are written
//! or accepted. Zip64 values are understood in local headers (as written by
//! `numpy.savez`); values too large for the classic fields are never
//! written.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::error::Error;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const LOCAL_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_SIGNATURE: u32 = 0x0201_4b50;
const FOOTER_SIGNATURE: u32 = 0x0605_4b50;

/// Size of a local header without name and extra field.
pub const LOCAL_HEADER_LEN: usize = 30;
/// Size of a central directory record without name, extra field and comment.
pub const CENTRAL_HEADER_LEN: usize = 46;
/// Size of the end-of-central-directory record (without comment).
pub const FOOTER_LEN: usize = 22;

/// Version 2.0: deflate, no zip64.
const ZIP_VERSION: u16 = 20;
/// Extra field id of the padding inserted before stored payloads.
const PAD_EXTRA_ID: u16 = 0xD935;
/// Extra field id of the zip64 extended information.
const ZIP64_EXTRA_ID: u16 = 0x0001;
/// File offset alignment of stored payloads.
pub const PAYLOAD_ALIGN: u64 = 16;

const FLAG_ENCRYPTED: u16 = 1 << 0;
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;

/// An error reading or writing the archive container.
#[derive(Debug)]
pub enum ZipError {
    Io(io::Error),
    /// The container structure is malformed or uses unsupported features.
    Format(String),
    /// The entry uses a compression method this build cannot decode.
    UnsupportedCompression(u16),
    /// The payload does not match its recorded sizes or checksum.
    Corrupt(String),
    /// A size, offset or count does not fit in the classic ZIP fields.
    TooLarge(&'static str),
}

impl Error for ZipError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ZipError::Io(err) => Some(err),
            ZipError::Format(_)
            | ZipError::UnsupportedCompression(_)
            | ZipError::Corrupt(_)
            | ZipError::TooLarge(_) => None,
        }
    }
}

impl fmt::Display for ZipError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ZipError::Io(err) => write!(f, "I/O error: {}", err),
            ZipError::Format(msg) => write!(f, "invalid zip archive: {}", msg),
            ZipError::UnsupportedCompression(code) => {
                write!(f, "unsupported compression method {}", code)
            }
            ZipError::Corrupt(msg) => write!(f, "corrupt entry data: {}", msg),
            ZipError::TooLarge(what) => write!(f, "{} exceeds the limits of the zip format", what),
        }
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> ZipError {
        ZipError::Io(err)
    }
}

/// Compression method of one entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    pub fn code(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
        }
    }

    pub fn from_code(code: u16) -> Result<CompressionMethod, ZipError> {
        match code {
            0 => Ok(CompressionMethod::Stored),
            8 => Ok(CompressionMethod::Deflated),
            other => Err(ZipError::UnsupportedCompression(other)),
        }
    }
}

fn narrow_u32(value: u64, what: &'static str) -> Result<u32, ZipError> {
    u32::try_from(value)
        .ok()
        .filter(|&v| v != u32::MAX)
        .ok_or(ZipError::TooLarge(what))
}

fn to_usize(value: u64, what: &'static str) -> Result<usize, ZipError> {
    usize::try_from(value).map_err(|_| ZipError::TooLarge(what))
}

/// Length of the padding extra field for a stored entry whose local header
/// starts at `header_offset`, so that the payload starts on a multiple of
/// [`PAYLOAD_ALIGN`]. An extra field needs at least 4 bytes of its own.
fn padding_extra_len(header_offset: u64, name_len: usize) -> usize {
    let unpadded = header_offset + (LOCAL_HEADER_LEN + name_len) as u64;
    let mut pad = ((PAYLOAD_ALIGN - unpadded % PAYLOAD_ALIGN) % PAYLOAD_ALIGN) as usize;
    if (1..4).contains(&pad) {
        pad += PAYLOAD_ALIGN as usize;
    }
    pad
}

/// One entry as described by its local header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalEntry {
    /// Name as stored in the archive.
    pub name: String,
    pub method: CompressionMethod,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// File offset of the local header.
    pub header_offset: u64,
    /// File offset of the first payload byte.
    pub data_offset: u64,
}

impl LocalEntry {
    /// Reads the local header at the current position of `reader`, which is
    /// at `offset` bytes into the file. Returns `None` if the next record is
    /// not a local header (i.e. the central directory has been reached).
    ///
    /// On success the reader is positioned at the first payload byte.
    fn read<R: Read>(mut reader: R, offset: u64) -> Result<Option<LocalEntry>, ZipError> {
        if reader.read_u32::<LittleEndian>()? != LOCAL_SIGNATURE {
            return Ok(None);
        }
        let _version_needed = reader.read_u16::<LittleEndian>()?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let method = reader.read_u16::<LittleEndian>()?;
        let _mod_time = reader.read_u16::<LittleEndian>()?;
        let _mod_date = reader.read_u16::<LittleEndian>()?;
        let crc32 = reader.read_u32::<LittleEndian>()?;
        let compressed_size = reader.read_u32::<LittleEndian>()?;
        let uncompressed_size = reader.read_u32::<LittleEndian>()?;
        let name_len = reader.read_u16::<LittleEndian>()? as usize;
        let extra_len = reader.read_u16::<LittleEndian>()? as usize;

        if flags & FLAG_ENCRYPTED != 0 {
            return Err(ZipError::Format("encrypted entries are not supported".into()));
        }
        if flags & FLAG_DATA_DESCRIPTOR != 0 {
            return Err(ZipError::Format(
                "entries with trailing data descriptors are not supported".into(),
            ));
        }
        let method = CompressionMethod::from_code(method)?;

        let mut name = vec![0; name_len];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| ZipError::Format("entry name is not valid UTF-8".into()))?;
        let mut extra = vec![0; extra_len];
        reader.read_exact(&mut extra)?;

        let mut compressed_size = u64::from(compressed_size);
        let mut uncompressed_size = u64::from(uncompressed_size);
        if compressed_size == u64::from(u32::MAX) || uncompressed_size == u64::from(u32::MAX) {
            let (uncompressed, compressed) = zip64_sizes(&extra)?;
            if uncompressed_size == u64::from(u32::MAX) {
                uncompressed_size = uncompressed;
            }
            if compressed_size == u64::from(u32::MAX) {
                compressed_size = compressed;
            }
        }

        Ok(Some(LocalEntry {
            name,
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            header_offset: offset,
            data_offset: offset + (LOCAL_HEADER_LEN + name_len + extra_len) as u64,
        }))
    }
}

/// Extracts the uncompressed and compressed sizes from the zip64 extra
/// field of a local header.
fn zip64_sizes(mut extra: &[u8]) -> Result<(u64, u64), ZipError> {
    while extra.len() >= 4 {
        let id = extra.read_u16::<LittleEndian>()?;
        let len = extra.read_u16::<LittleEndian>()? as usize;
        if len > extra.len() {
            break;
        }
        let (mut body, rest) = extra.split_at(len);
        if id == ZIP64_EXTRA_ID && len >= 16 {
            let uncompressed = body.read_u64::<LittleEndian>()?;
            let compressed = body.read_u64::<LittleEndian>()?;
            return Ok((uncompressed, compressed));
        }
        extra = rest;
    }
    Err(ZipError::Format("missing zip64 size information".into()))
}

/// One central directory record.
///
/// Extra fields and comments of records read from an existing archive are
/// not kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralRecord {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub name: Vec<u8>,
}

impl CentralRecord {
    fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(CENTRAL_SIGNATURE)?;
        writer.write_u16::<LittleEndian>(ZIP_VERSION)?;
        writer.write_u16::<LittleEndian>(self.version_needed)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.method)?;
        writer.write_u16::<LittleEndian>(self.mod_time)?;
        writer.write_u16::<LittleEndian>(self.mod_date)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u16::<LittleEndian>(self.name.len() as u16)?;
        // Extra field length, comment length, starting disk, internal
        // attributes.
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(self.external_attributes)?;
        writer.write_u32::<LittleEndian>(self.local_header_offset)?;
        writer.write_all(&self.name)
    }

    /// Parses one record from the front of `bytes`, advancing it past the
    /// record.
    fn parse(bytes: &mut &[u8]) -> Result<CentralRecord, ZipError> {
        if bytes.len() < CENTRAL_HEADER_LEN {
            return Err(ZipError::Format("truncated central directory".into()));
        }
        let mut fixed = &bytes[..CENTRAL_HEADER_LEN];
        if fixed.read_u32::<LittleEndian>()? != CENTRAL_SIGNATURE {
            return Err(ZipError::Format("bad central directory signature".into()));
        }
        let _version_made_by = fixed.read_u16::<LittleEndian>()?;
        let version_needed = fixed.read_u16::<LittleEndian>()?;
        let flags = fixed.read_u16::<LittleEndian>()?;
        let method = fixed.read_u16::<LittleEndian>()?;
        let mod_time = fixed.read_u16::<LittleEndian>()?;
        let mod_date = fixed.read_u16::<LittleEndian>()?;
        let crc32 = fixed.read_u32::<LittleEndian>()?;
        let compressed_size = fixed.read_u32::<LittleEndian>()?;
        let uncompressed_size = fixed.read_u32::<LittleEndian>()?;
        let name_len = fixed.read_u16::<LittleEndian>()? as usize;
        let extra_len = fixed.read_u16::<LittleEndian>()? as usize;
        let comment_len = fixed.read_u16::<LittleEndian>()? as usize;
        let disk_start = fixed.read_u16::<LittleEndian>()?;
        let _internal_attributes = fixed.read_u16::<LittleEndian>()?;
        let external_attributes = fixed.read_u32::<LittleEndian>()?;
        let local_header_offset = fixed.read_u32::<LittleEndian>()?;

        if disk_start != 0 {
            return Err(ZipError::Format("split archives are not supported".into()));
        }
        if [compressed_size, uncompressed_size, local_header_offset].contains(&u32::MAX) {
            return Err(ZipError::TooLarge("existing zip64 entry"));
        }
        let total = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
        if bytes.len() < total {
            return Err(ZipError::Format("truncated central directory".into()));
        }
        let name = bytes[CENTRAL_HEADER_LEN..CENTRAL_HEADER_LEN + name_len].to_vec();
        *bytes = &bytes[total..];
        Ok(CentralRecord {
            version_needed,
            flags,
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            external_attributes,
            local_header_offset,
            name,
        })
    }

    fn encoded_len(&self) -> usize {
        CENTRAL_HEADER_LEN + self.name.len()
    }
}

/// The end-of-central-directory record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Footer {
    pub entries: u16,
    pub directory_size: u32,
    pub directory_offset: u32,
}

impl Footer {
    fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(FOOTER_SIGNATURE)?;
        // This disk and the disk holding the central directory.
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u16::<LittleEndian>(self.entries)?;
        writer.write_u16::<LittleEndian>(self.entries)?;
        writer.write_u32::<LittleEndian>(self.directory_size)?;
        writer.write_u32::<LittleEndian>(self.directory_offset)?;
        // Comment length.
        writer.write_u16::<LittleEndian>(0)
    }

    /// Parses and validates the footer of a file of `file_len` bytes whose
    /// last [`FOOTER_LEN`] bytes are `bytes`.
    pub fn parse(bytes: &[u8; FOOTER_LEN], file_len: u64) -> Result<Footer, ZipError> {
        let mut bytes = &bytes[..];
        if bytes.read_u32::<LittleEndian>()? != FOOTER_SIGNATURE {
            return Err(ZipError::Format(
                "end of central directory signature not found".into(),
            ));
        }
        let disk = bytes.read_u16::<LittleEndian>()?;
        let directory_disk = bytes.read_u16::<LittleEndian>()?;
        let disk_entries = bytes.read_u16::<LittleEndian>()?;
        let entries = bytes.read_u16::<LittleEndian>()?;
        let directory_size = bytes.read_u32::<LittleEndian>()?;
        let directory_offset = bytes.read_u32::<LittleEndian>()?;
        let comment_len = bytes.read_u16::<LittleEndian>()?;

        if disk != 0 || directory_disk != 0 || disk_entries != entries {
            return Err(ZipError::Format("split archives are not supported".into()));
        }
        if comment_len != 0 {
            return Err(ZipError::Format("archive comments are not supported".into()));
        }
        let directory_end = u64::from(directory_offset) + u64::from(directory_size);
        if directory_end + FOOTER_LEN as u64 != file_len {
            return Err(ZipError::Format(format!(
                "central directory ({} bytes at offset {}) does not end at the footer",
                directory_size, directory_offset
            )));
        }
        Ok(Footer {
            entries,
            directory_size,
            directory_offset,
        })
    }

    /// Reads and validates the footer at the end of `file`.
    pub fn read_from<R: Read + Seek>(mut file: R) -> Result<Footer, ZipError> {
        let file_len = file.seek(SeekFrom::End(0))?;
        if file_len < FOOTER_LEN as u64 {
            return Err(ZipError::Format(format!(
                "file of {} bytes is too short for a zip archive",
                file_len
            )));
        }
        file.seek(SeekFrom::Start(file_len - FOOTER_LEN as u64))?;
        let mut bytes = [0; FOOTER_LEN];
        file.read_exact(&mut bytes)?;
        Footer::parse(&bytes, file_len)
    }
}

/// Writes entries to a new archive or appends them to an existing one.
///
/// Nothing is a valid archive until [`finish`](ZipWriter::finish) writes
/// the central directory and footer.
pub struct ZipWriter {
    file: File,
    /// Offset at which the next local header is written.
    offset: u64,
    records: Vec<CentralRecord>,
}

impl ZipWriter {
    /// Creates (or truncates) the file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<ZipWriter, ZipError> {
        Ok(ZipWriter {
            file: File::create(path)?,
            offset: 0,
            records: Vec::new(),
        })
    }

    /// Opens the archive at `path` for appending. A missing or empty file is
    /// treated as an empty archive.
    ///
    /// Existing payloads are left in place. New entries overwrite the old
    /// central directory, which is regenerated by `finish`.
    pub fn append<P: AsRef<Path>>(path: P) -> Result<ZipWriter, ZipError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(ZipWriter {
                file,
                offset: 0,
                records: Vec::new(),
            });
        }
        let footer = Footer::read_from(&mut file)?;
        let mut directory = vec![0; footer.directory_size as usize];
        file.seek(SeekFrom::Start(u64::from(footer.directory_offset)))?;
        file.read_exact(&mut directory)?;

        let mut remaining = &directory[..];
        let mut records = Vec::with_capacity(usize::from(footer.entries));
        for _ in 0..footer.entries {
            records.push(CentralRecord::parse(&mut remaining)?);
        }
        if !remaining.is_empty() {
            return Err(ZipError::Format(format!(
                "{} unexpected bytes after the last central directory record",
                remaining.len()
            )));
        }
        if let Some(record) = records
            .iter()
            .find(|record| record.local_header_offset >= footer.directory_offset)
        {
            return Err(ZipError::Format(format!(
                "local header offset {} lies inside the central directory",
                record.local_header_offset
            )));
        }
        log::debug!(
            "appending to archive with {} entries, directory at offset {}",
            footer.entries,
            footer.directory_offset
        );
        Ok(ZipWriter {
            file,
            offset: u64::from(footer.directory_offset),
            records,
        })
    }

    /// Number of entries the archive will contain.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes one entry whose uncompressed payload is the concatenation of
    /// `parts`.
    pub fn add_entry(
        &mut self,
        name: &str,
        parts: &[&[u8]],
        method: CompressionMethod,
    ) -> Result<(), ZipError> {
        if self.records.len() >= usize::from(u16::MAX) {
            return Err(ZipError::TooLarge("entry count"));
        }
        let name_len = u16::try_from(name.len()).map_err(|_| ZipError::TooLarge("entry name"))?;
        let header_offset = narrow_u32(self.offset, "local header offset")?;

        let mut hasher = crc32fast::Hasher::new();
        let mut uncompressed_size = 0u64;
        for part in parts {
            hasher.update(part);
            uncompressed_size += part.len() as u64;
        }
        let crc32 = hasher.finalize();
        let uncompressed_size = narrow_u32(uncompressed_size, "entry size")?;

        let compressed = match method {
            CompressionMethod::Stored => None,
            #[cfg(feature = "compressed_npz")]
            CompressionMethod::Deflated => Some(super::deflate::compress(parts)?),
            #[cfg(not(feature = "compressed_npz"))]
            CompressionMethod::Deflated => {
                return Err(ZipError::UnsupportedCompression(method.code()))
            }
        };
        let compressed_size = match &compressed {
            Some(data) => narrow_u32(data.len() as u64, "compressed entry size")?,
            None => uncompressed_size,
        };
        let extra_len = match method {
            CompressionMethod::Stored => padding_extra_len(self.offset, name.len()),
            CompressionMethod::Deflated => 0,
        };

        let flags = if name.is_ascii() { 0 } else { FLAG_UTF8 };
        let mut header = Vec::with_capacity(LOCAL_HEADER_LEN + name.len() + extra_len);
        header.write_u32::<LittleEndian>(LOCAL_SIGNATURE)?;
        header.write_u16::<LittleEndian>(ZIP_VERSION)?;
        header.write_u16::<LittleEndian>(flags)?;
        header.write_u16::<LittleEndian>(method.code())?;
        header.write_u16::<LittleEndian>(0)?;
        header.write_u16::<LittleEndian>(0)?;
        header.write_u32::<LittleEndian>(crc32)?;
        header.write_u32::<LittleEndian>(compressed_size)?;
        header.write_u32::<LittleEndian>(uncompressed_size)?;
        header.write_u16::<LittleEndian>(name_len)?;
        header.write_u16::<LittleEndian>(extra_len as u16)?;
        header.extend_from_slice(name.as_bytes());
        if extra_len > 0 {
            header.write_u16::<LittleEndian>(PAD_EXTRA_ID)?;
            header.write_u16::<LittleEndian>((extra_len - 4) as u16)?;
            header.resize(header.len() + extra_len - 4, 0);
        }

        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.write_all(&header)?;
        match &compressed {
            Some(data) => self.file.write_all(data)?,
            None => {
                for part in parts {
                    self.file.write_all(part)?;
                }
            }
        }
        self.offset += header.len() as u64 + u64::from(compressed_size);

        self.records.push(CentralRecord {
            version_needed: ZIP_VERSION,
            flags,
            method: method.code(),
            mod_time: 0,
            mod_date: 0,
            crc32,
            compressed_size,
            uncompressed_size,
            external_attributes: 0,
            local_header_offset: header_offset,
            name: name.as_bytes().to_vec(),
        });
        Ok(())
    }

    /// Writes the central directory and footer and truncates the file after
    /// them. Returns the footer written.
    pub fn finish(mut self) -> Result<Footer, ZipError> {
        let directory_offset = narrow_u32(self.offset, "central directory offset")?;
        let directory_len: usize = self.records.iter().map(CentralRecord::encoded_len).sum();
        let mut directory = Vec::with_capacity(directory_len + FOOTER_LEN);
        for record in &self.records {
            record.write(&mut directory)?;
        }
        let footer = Footer {
            // Bounded by the check in `add_entry`.
            entries: self.records.len() as u16,
            directory_size: narrow_u32(directory.len() as u64, "central directory size")?,
            directory_offset,
        };
        footer.write(&mut directory)?;

        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.write_all(&directory)?;
        self.file.set_len(self.offset + directory.len() as u64)?;
        self.file.flush()?;
        log::debug!(
            "wrote central directory with {} entries at offset {}",
            footer.entries,
            footer.directory_offset
        );
        Ok(footer)
    }
}

/// Upper bound on the expansion of a deflate stream.
#[cfg(feature = "compressed_npz")]
const MAX_DEFLATE_RATIO: u64 = 1032;

/// Sequential reader over the local entries of an archive.
pub struct ZipScanner<R> {
    reader: R,
    /// File offset of the reader.
    offset: u64,
    /// Length of the archive.
    end: u64,
}

impl<R: Read + Seek> ZipScanner<R> {
    /// Starts scanning at the current position of `reader`, which must be
    /// the start of the archive.
    pub fn new(mut reader: R) -> Result<ZipScanner<R>, ZipError> {
        let offset = reader.stream_position()?;
        let end = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(offset))?;
        Ok(ZipScanner { reader, offset, end })
    }

    /// Reads the next local header. Returns `None` once the central
    /// directory is reached.
    ///
    /// The caller must consume the payload with
    /// [`read_payload`](ZipScanner::read_payload) or
    /// [`skip_payload`](ZipScanner::skip_payload) before asking for the next
    /// entry.
    pub fn next_entry(&mut self) -> Result<Option<LocalEntry>, ZipError> {
        let entry = LocalEntry::read(&mut self.reader, self.offset)?;
        if let Some(entry) = &entry {
            let payload_end = entry.data_offset.checked_add(entry.compressed_size);
            if payload_end.map_or(true, |payload_end| payload_end > self.end) {
                return Err(ZipError::Format(format!(
                    "entry {:?} declares {} bytes, past the end of the archive",
                    entry.name, entry.compressed_size
                )));
            }
        }
        match &entry {
            Some(entry) => self.offset = entry.data_offset,
            // The signature of the next record has been consumed.
            None => self.offset += 4,
        }
        Ok(entry)
    }

    /// Reads the payload of `entry`, inflating it if needed.
    ///
    /// The checksum of deflated payloads is verified. Stored payloads are
    /// returned as-is.
    pub fn read_payload(&mut self, entry: &LocalEntry) -> Result<Vec<u8>, ZipError> {
        let mut data = vec![0; to_usize(entry.compressed_size, "entry size")?];
        self.reader.read_exact(&mut data)?;
        self.offset += entry.compressed_size;
        match entry.method {
            CompressionMethod::Stored => {
                if entry.compressed_size != entry.uncompressed_size {
                    return Err(ZipError::Corrupt(format!(
                        "stored entry {:?} has compressed size {} but uncompressed size {}",
                        entry.name, entry.compressed_size, entry.uncompressed_size
                    )));
                }
                Ok(data)
            }
            #[cfg(feature = "compressed_npz")]
            CompressionMethod::Deflated => {
                if entry.uncompressed_size > entry.compressed_size.saturating_mul(MAX_DEFLATE_RATIO) {
                    return Err(ZipError::Corrupt(format!(
                        "entry {:?} cannot inflate from {} to {} bytes",
                        entry.name, entry.compressed_size, entry.uncompressed_size
                    )));
                }
                let len = to_usize(entry.uncompressed_size, "entry size")?;
                let out = super::deflate::decompress(&data, len)?;
                let crc32 = crc32fast::hash(&out);
                if crc32 != entry.crc32 {
                    return Err(ZipError::Corrupt(format!(
                        "checksum mismatch in entry {:?}: {:08x} != {:08x}",
                        entry.name, crc32, entry.crc32
                    )));
                }
                Ok(out)
            }
            #[cfg(not(feature = "compressed_npz"))]
            CompressionMethod::Deflated => Err(ZipError::UnsupportedCompression(entry.method.code())),
        }
    }

    /// Moves past the payload of `entry` without reading it.
    pub fn skip_payload(&mut self, entry: &LocalEntry) -> Result<(), ZipError> {
        self.offset = entry
            .data_offset
            .checked_add(entry.compressed_size)
            .ok_or(ZipError::TooLarge("entry size"))?;
        self.reader.seek(SeekFrom::Start(self.offset))?;
        Ok(())
    }
}
