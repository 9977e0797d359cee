#[cfg(feature = "compressed_npz")]
mod deflate;
pub mod zip;

use self::zip::{CompressionMethod, LocalEntry, ZipError, ZipScanner, ZipWriter};
use crate::buffer::ArrayBuffer;
use crate::mmap::MappedRegion;
use crate::npy::elements::slice_as_bytes;
use crate::npy::header::{Header, TypeDescriptor};
use crate::npy::{
    buffer_from_npy_bytes, buffer_from_region, check_descriptor, LoadMode, ReadNpyError, WriteMode,
    WriteNpyError,
};
use crate::{Element, ElementType};
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Suffix added to array names to form entry names.
pub const NPY_SUFFIX: &str = ".npy";

/// Size of the zero block reused for zero-filled entries.
const ZERO_CHUNK: usize = 1 << 16;

/// Compression applied to an archive entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// No compression. Stored entries can be loaded as mapped views.
    #[default]
    Stored,
    /// Raw deflate, as written by `numpy.savez_compressed`.
    #[cfg(feature = "compressed_npz")]
    Deflated,
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            #[cfg(feature = "compressed_npz")]
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// An error writing a `.npz` file.
#[derive(Debug)]
pub enum WriteNpzError {
    /// An error caused by the zip file.
    Zip(ZipError),
    /// An error caused by writing an inner `.npy` file.
    Npy(WriteNpyError),
}

impl Error for WriteNpzError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WriteNpzError::Zip(err) => Some(err),
            WriteNpzError::Npy(err) => Some(err),
        }
    }
}

impl fmt::Display for WriteNpzError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WriteNpzError::Zip(err) => write!(f, "zip file error: {}", err),
            WriteNpzError::Npy(err) => write!(f, "error writing npy file to npz archive: {}", err),
        }
    }
}

impl From<ZipError> for WriteNpzError {
    fn from(err: ZipError) -> WriteNpzError {
        WriteNpzError::Zip(err)
    }
}

impl From<WriteNpyError> for WriteNpzError {
    fn from(err: WriteNpyError) -> WriteNpzError {
        WriteNpzError::Npy(err)
    }
}

impl From<io::Error> for WriteNpzError {
    fn from(err: io::Error) -> WriteNpzError {
        WriteNpzError::Zip(ZipError::Io(err))
    }
}

/// An error reading a `.npz` file.
#[derive(Debug)]
pub enum ReadNpzError {
    /// An error caused by I/O outside the archive structure (e.g. mapping).
    Io(io::Error),
    /// An error caused by the zip archive.
    Zip(ZipError),
    /// An error caused by reading an inner `.npy` file.
    Npy(ReadNpyError),
    /// No entry with the given name exists.
    NotFound(String),
}

impl Error for ReadNpzError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadNpzError::Io(err) => Some(err),
            ReadNpzError::Zip(err) => Some(err),
            ReadNpzError::Npy(err) => Some(err),
            ReadNpzError::NotFound(_) => None,
        }
    }
}

impl fmt::Display for ReadNpzError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadNpzError::Io(err) => write!(f, "I/O error: {}", err),
            ReadNpzError::Zip(err) => write!(f, "zip file error: {}", err),
            ReadNpzError::Npy(err) => write!(f, "error reading npy file in npz archive: {}", err),
            ReadNpzError::NotFound(name) => write!(f, "no array named {:?} in archive", name),
        }
    }
}

impl From<io::Error> for ReadNpzError {
    fn from(err: io::Error) -> ReadNpzError {
        ReadNpzError::Io(err)
    }
}

impl From<ZipError> for ReadNpzError {
    fn from(err: ZipError) -> ReadNpzError {
        ReadNpzError::Zip(err)
    }
}

impl From<ReadNpyError> for ReadNpzError {
    fn from(err: ReadNpyError) -> ReadNpzError {
        ReadNpzError::Npy(err)
    }
}

/// An error from [`new_npz_mmap`].
#[derive(Debug)]
pub enum NewNpzMmapError {
    /// The descriptor of an entry is not a supported element type.
    UnsupportedType { name: String, descr: TypeDescriptor },
    /// An error writing the zero-filled entries.
    Write(WriteNpzError),
    /// An error mapping the written archive.
    Read(ReadNpzError),
}

impl Error for NewNpzMmapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NewNpzMmapError::UnsupportedType { .. } => None,
            NewNpzMmapError::Write(err) => Some(err),
            NewNpzMmapError::Read(err) => Some(err),
        }
    }
}

impl fmt::Display for NewNpzMmapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NewNpzMmapError::UnsupportedType { name, descr } => {
                write!(f, "unsupported element type {} for array {:?}", descr, name)
            }
            NewNpzMmapError::Write(err) => write!(f, "error writing archive: {}", err),
            NewNpzMmapError::Read(err) => write!(f, "error mapping archive: {}", err),
        }
    }
}

impl From<WriteNpzError> for NewNpzMmapError {
    fn from(err: WriteNpzError) -> NewNpzMmapError {
        NewNpzMmapError::Write(err)
    }
}

impl From<ReadNpzError> for NewNpzMmapError {
    fn from(err: ReadNpzError) -> NewNpzMmapError {
        NewNpzMmapError::Read(err)
    }
}

/// The arrays of an archive, in archive order.
///
/// Names need not be unique; lookups by name return the first match.
#[derive(Debug, Default, PartialEq)]
pub struct NpzArrays {
    entries: Vec<(String, ArrayBuffer)>,
}

impl NpzArrays {
    /// Returns the first array named `name`.
    pub fn get(&self, name: &str) -> Option<&ArrayBuffer> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, buffer)| buffer)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArrayBuffer> {
        self.entries
            .iter_mut()
            .find(|(entry, _)| entry == name)
            .map(|(_, buffer)| buffer)
    }

    /// Removes and returns the first array named `name`.
    pub fn remove(&mut self, name: &str) -> Option<ArrayBuffer> {
        let index = self.entries.iter().position(|(entry, _)| entry == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of all arrays, in archive order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayBuffer)> + '_ {
        self.entries.iter().map(|(name, buffer)| (name.as_str(), buffer))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ArrayBuffer)> + '_ {
        self.entries
            .iter_mut()
            .map(|(name, buffer)| (name.as_str(), buffer))
    }
}

impl IntoIterator for NpzArrays {
    type Item = (String, ArrayBuffer);
    type IntoIter = std::vec::IntoIter<(String, ArrayBuffer)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Description of one zero-filled entry for [`new_npz_mmap`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntrySpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub descr: TypeDescriptor,
}

impl EntrySpec {
    /// An entry holding elements of type `T`.
    pub fn new<T: Element, N: Into<String>>(name: N, shape: &[usize]) -> EntrySpec {
        EntrySpec::with_descriptor(name, shape, T::ELEMENT_TYPE.descriptor())
    }

    /// An entry with a descriptor chosen at run time. Unsupported
    /// descriptors are reported by [`new_npz_mmap`].
    pub fn with_descriptor<N: Into<String>>(name: N, shape: &[usize], descr: TypeDescriptor) -> EntrySpec {
        EntrySpec {
            name: name.into(),
            shape: shape.to_vec(),
            descr,
        }
    }
}

fn entry_name(name: &str) -> String {
    format!("{}{}", name, NPY_SUFFIX)
}

fn array_name(entry_name: &str) -> &str {
    entry_name.strip_suffix(NPY_SUFFIX).unwrap_or(entry_name)
}

fn writer_for(path: &Path, mode: WriteMode) -> Result<ZipWriter, ZipError> {
    match mode {
        WriteMode::Create => ZipWriter::create(path),
        WriteMode::Append => ZipWriter::append(path),
    }
}

fn save_entry(
    path: &Path,
    name: &str,
    parts: &[&[u8]],
    mode: WriteMode,
    compression: Compression,
) -> Result<(), WriteNpzError> {
    let mut writer = writer_for(path, mode)?;
    writer.add_entry(&entry_name(name), parts, compression.method())?;
    let footer = writer.finish()?;
    log::debug!(
        "saved {:?} to {} ({:?}), archive now has {} entries",
        name,
        path.display(),
        compression,
        footer.entries
    );
    Ok(())
}

/// Saves `data` with the given `shape` as the array `name` of the archive at
/// `path`.
///
/// [`WriteMode::Create`] replaces the file with a one-entry archive;
/// [`WriteMode::Append`] adds an entry to the existing archive. Names are
/// not checked for duplicates.
///
/// # Example
///
/// ```no_run
/// use npy_mmap::{npz_save, Compression, WriteMode};
///
/// npz_save("arrays.npz", "a", &[1i32, 2, 3, 4, 5, 6], &[2, 3], WriteMode::Create, Compression::Stored)?;
/// npz_save("arrays.npz", "b", &[7.0f64, 8.0, 9.0], &[3], WriteMode::Append, Compression::Stored)?;
/// # Ok::<_, npy_mmap::WriteNpzError>(())
/// ```
pub fn npz_save<T, P>(
    path: P,
    name: &str,
    data: &[T],
    shape: &[usize],
    mode: WriteMode,
    compression: Compression,
) -> Result<(), WriteNpzError>
where
    T: Element,
    P: AsRef<Path>,
{
    let header = Header {
        type_descriptor: T::ELEMENT_TYPE.descriptor(),
        fortran_order: false,
        shape: shape.to_vec(),
    };
    let expected = header.num_elements().ok_or(WriteNpyError::LengthOverflow)?;
    if expected != data.len() {
        return Err(WriteNpyError::ShapeMismatch {
            expected,
            found: data.len(),
        }
        .into());
    }
    let header = header.to_bytes().map_err(WriteNpyError::from)?;
    save_entry(
        path.as_ref(),
        name,
        &[&header, slice_as_bytes(data)],
        mode,
        compression,
    )
}

/// Saves `buffer` as the array `name` of the archive at `path`.
pub fn npz_save_buffer<P: AsRef<Path>>(
    path: P,
    name: &str,
    buffer: &ArrayBuffer,
    mode: WriteMode,
    compression: Compression,
) -> Result<(), WriteNpzError> {
    let header = buffer.header().to_bytes().map_err(WriteNpyError::from)?;
    save_entry(
        path.as_ref(),
        name,
        &[&header, buffer.as_bytes()],
        mode,
        compression,
    )
}

fn to_usize(value: u64) -> Result<usize, ZipError> {
    usize::try_from(value).map_err(|_| ZipError::TooLarge("entry offset"))
}

/// Loads the current entry of `scanner`, consuming its payload.
fn load_entry<R: io::Read + io::Seek>(
    scanner: &mut ZipScanner<R>,
    entry: &LocalEntry,
    region: Option<&Arc<MappedRegion>>,
) -> Result<ArrayBuffer, ReadNpzError> {
    match (region, entry.method) {
        (Some(region), CompressionMethod::Stored) => {
            let buffer = buffer_from_region(
                Arc::clone(region),
                to_usize(entry.data_offset)?,
                to_usize(entry.uncompressed_size)?,
            )?;
            // The mapping does not move the scanner.
            scanner.skip_payload(entry)?;
            Ok(buffer)
        }
        (Some(_), CompressionMethod::Deflated) => {
            log::warn!(
                "entry {:?} is compressed and cannot be mapped; loading it into memory",
                entry.name
            );
            Ok(buffer_from_npy_bytes(&scanner.read_payload(entry)?)?)
        }
        (None, _) => Ok(buffer_from_npy_bytes(&scanner.read_payload(entry)?)?),
    }
}

fn open_region(path: &Path, mode: LoadMode) -> Result<Option<Arc<MappedRegion>>, ReadNpzError> {
    match mode.map_mode() {
        Some(map_mode) => Ok(Some(Arc::new(MappedRegion::open(path, map_mode)?))),
        None => Ok(None),
    }
}

/// Loads every array of the archive at `path`.
///
/// With a mapped [`LoadMode`], the file is mapped once and every stored
/// entry is returned as a view into that mapping. Compressed entries are
/// always inflated into memory.
///
/// # Example
///
/// ```no_run
/// use npy_mmap::{npz_load, LoadMode};
///
/// let arrays = npz_load("arrays.npz", LoadMode::MmapReadOnly)?;
/// for (name, buffer) in arrays.iter() {
///     println!("{}: {:?}", name, buffer.shape());
/// }
/// # Ok::<_, npy_mmap::ReadNpzError>(())
/// ```
pub fn npz_load<P: AsRef<Path>>(path: P, mode: LoadMode) -> Result<NpzArrays, ReadNpzError> {
    let path = path.as_ref();
    let mut scanner = ZipScanner::new(BufReader::new(File::open(path)?))?;
    let region = open_region(path, mode)?;
    let mut entries = Vec::new();
    while let Some(entry) = scanner.next_entry()? {
        let buffer = load_entry(&mut scanner, &entry, region.as_ref())?;
        entries.push((array_name(&entry.name).to_owned(), buffer));
    }
    Ok(NpzArrays { entries })
}

/// Loads the first array named `name` from the archive at `path`.
///
/// Entries before it are skipped without reading their payloads.
pub fn npz_load_entry<P: AsRef<Path>>(
    path: P,
    name: &str,
    mode: LoadMode,
) -> Result<ArrayBuffer, ReadNpzError> {
    let path = path.as_ref();
    let mut scanner = ZipScanner::new(BufReader::new(File::open(path)?))?;
    while let Some(entry) = scanner.next_entry()? {
        if array_name(&entry.name) == name {
            let region = open_region(path, mode)?;
            return load_entry(&mut scanner, &entry, region.as_ref());
        }
        scanner.skip_payload(&entry)?;
    }
    Err(ReadNpzError::NotFound(name.to_owned()))
}

/// Like [`npz_load_entry`], but fails unless the entry's descriptor is that
/// of `T`.
pub fn npz_load_entry_as<T, P>(path: P, name: &str, mode: LoadMode) -> Result<ArrayBuffer, ReadNpzError>
where
    T: Element,
    P: AsRef<Path>,
{
    let buffer = npz_load_entry(path, name, mode)?;
    check_descriptor::<T>(&buffer)?;
    Ok(buffer)
}

/// Writes one stored, zero-filled entry without materializing its data.
fn save_zeroed_entry(path: &Path, spec: &EntrySpec, mode: WriteMode) -> Result<(), WriteNpzError> {
    let header = Header {
        type_descriptor: spec.descr,
        fortran_order: false,
        shape: spec.shape.clone(),
    };
    let data_len = header.num_bytes().ok_or(WriteNpyError::LengthOverflow)?;
    let header = header.to_bytes().map_err(WriteNpyError::from)?;
    let zeros = vec![0u8; data_len.min(ZERO_CHUNK)];
    let mut parts: Vec<&[u8]> = Vec::with_capacity(2 + data_len / ZERO_CHUNK);
    parts.push(&header);
    let mut remaining = data_len;
    while remaining > 0 {
        let len = remaining.min(zeros.len());
        parts.push(&zeros[..len]);
        remaining -= len;
    }
    save_entry(path, &spec.name, &parts, mode, Compression::Stored)
}

/// Creates an archive at `path` with one zero-filled entry per spec and
/// returns all entries mapped read-write.
///
/// `fortran_order` is set on every returned buffer; it is not written to
/// the file. An empty `specs` returns an empty result without touching the
/// file.
///
/// # Example
///
/// ```no_run
/// use npy_mmap::{new_npz_mmap, EntrySpec};
///
/// let mut arrays = new_npz_mmap(
///     "scratch.npz",
///     &[EntrySpec::new::<i32, _>("arr", &[2, 3])],
///     true,
/// )?;
/// let arr = arrays.get_mut("arr").unwrap();
/// arr.as_mut_slice::<i32>()?[0] = 42;
/// # Ok::<_, Box<dyn std::error::Error>>(())
/// ```
pub fn new_npz_mmap<P: AsRef<Path>>(
    path: P,
    specs: &[EntrySpec],
    fortran_order: bool,
) -> Result<NpzArrays, NewNpzMmapError> {
    let path = path.as_ref();
    if specs.is_empty() {
        return Ok(NpzArrays::default());
    }
    if let Some(spec) = specs
        .iter()
        .find(|spec| ElementType::from_descriptor(&spec.descr).is_none())
    {
        return Err(NewNpzMmapError::UnsupportedType {
            name: spec.name.clone(),
            descr: spec.descr,
        });
    }
    for (index, spec) in specs.iter().enumerate() {
        let mode = if index == 0 {
            WriteMode::Create
        } else {
            WriteMode::Append
        };
        save_zeroed_entry(path, spec, mode)?;
    }
    let mut arrays = npz_load(path, LoadMode::Mmap)?;
    for (_, buffer) in arrays.iter_mut() {
        buffer.set_fortran_order(fortran_order);
    }
    Ok(arrays)
}
