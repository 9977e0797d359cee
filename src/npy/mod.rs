pub mod elements;
pub mod header;

use self::elements::slice_as_bytes;
use self::header::{
    FormatHeaderError, Header, ParseHeaderError, ReadHeaderError, TypeDescriptor, WriteHeaderError,
};
use crate::buffer::{ArrayBuffer, ViewDataError};
use crate::mmap::{MapMode, MappedRegion};
use crate::Element;
use ndarray::prelude::*;
use ndarray::{Data, DataOwned, ShapeBuilder, ShapeError};
use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Whether a save replaces the destination or extends it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Create the file, replacing any existing contents (`"w"`).
    Create,
    /// Extend the existing file (`"a"`). A missing file is created.
    Append,
}

/// Error parsing a [`WriteMode`] from a mode string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseWriteModeError(String);

impl Error for ParseWriteModeError {}

impl fmt::Display for ParseWriteModeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown write mode {:?}, expected \"w\" or \"a\"", self.0)
    }
}

impl FromStr for WriteMode {
    type Err = ParseWriteModeError;

    fn from_str(s: &str) -> Result<WriteMode, ParseWriteModeError> {
        match s {
            "w" => Ok(WriteMode::Create),
            "a" => Ok(WriteMode::Append),
            other => Err(ParseWriteModeError(other.to_owned())),
        }
    }
}

/// How loaded element data is backed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Read into private memory.
    Memory,
    /// Map the file read-write. Mutations are written to the file.
    Mmap,
    /// Map the file read-only.
    MmapReadOnly,
}

impl LoadMode {
    /// The mapping mode, or `None` for [`LoadMode::Memory`].
    pub fn map_mode(self) -> Option<MapMode> {
        match self {
            LoadMode::Memory => None,
            LoadMode::Mmap => Some(MapMode::ReadWrite),
            LoadMode::MmapReadOnly => Some(MapMode::ReadOnly),
        }
    }
}

/// An error reading a `.npy` file.
#[derive(Debug)]
pub enum ReadNpyError {
    /// An error caused by I/O.
    Io(io::Error),
    /// An error parsing the file header.
    ParseHeader(ParseHeaderError),
    /// Overflow while computing the length of the array from the shape
    /// described in the file header.
    LengthOverflow,
    /// The file ended before all of the element data described by the header
    /// was present.
    MissingBytes(usize),
    /// Extra bytes are present between the end of the data and the end of
    /// the file.
    ExtraBytes(usize),
    /// The descriptor in the header does not match the requested type.
    WrongDescriptor {
        expected: TypeDescriptor,
        found: TypeDescriptor,
    },
    /// The number of dimensions does not match the requested array type.
    WrongNdim(Option<usize>, usize),
    /// An error viewing the element data.
    View(ViewDataError),
    /// An error building the `ndarray` array.
    Shape(ShapeError),
}

impl Error for ReadNpyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadNpyError::Io(err) => Some(err),
            ReadNpyError::ParseHeader(err) => Some(err),
            ReadNpyError::View(err) => Some(err),
            ReadNpyError::Shape(err) => Some(err),
            ReadNpyError::LengthOverflow
            | ReadNpyError::MissingBytes(_)
            | ReadNpyError::ExtraBytes(_)
            | ReadNpyError::WrongDescriptor { .. }
            | ReadNpyError::WrongNdim(..) => None,
        }
    }
}

impl fmt::Display for ReadNpyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadNpyError::Io(err) => write!(f, "I/O error: {}", err),
            ReadNpyError::ParseHeader(err) => write!(f, "error parsing header: {}", err),
            ReadNpyError::LengthOverflow => write!(f, "overflow computing length from shape"),
            ReadNpyError::MissingBytes(num) => write!(f, "reached EOF {} bytes before end of data", num),
            ReadNpyError::ExtraBytes(num) => {
                write!(f, "file had {} extra bytes before EOF", num)
            }
            ReadNpyError::WrongDescriptor { expected, found } => write!(
                f,
                "descriptor {} does not match the requested type ({})",
                found, expected
            ),
            ReadNpyError::WrongNdim(expected, actual) => write!(
                f,
                "ndim {} of array did not match Dimension type with NDIM = {:?}",
                actual, expected
            ),
            ReadNpyError::View(err) => write!(f, "error viewing data: {}", err),
            ReadNpyError::Shape(err) => write!(f, "data did not match shape in header: {}", err),
        }
    }
}

impl From<io::Error> for ReadNpyError {
    fn from(err: io::Error) -> ReadNpyError {
        ReadNpyError::Io(err)
    }
}

impl From<ReadHeaderError> for ReadNpyError {
    fn from(err: ReadHeaderError) -> ReadNpyError {
        match err {
            ReadHeaderError::Io(err) => ReadNpyError::Io(err),
            ReadHeaderError::Parse(err) => ReadNpyError::ParseHeader(err),
        }
    }
}

impl From<ParseHeaderError> for ReadNpyError {
    fn from(err: ParseHeaderError) -> ReadNpyError {
        ReadNpyError::ParseHeader(err)
    }
}

impl From<ViewDataError> for ReadNpyError {
    fn from(err: ViewDataError) -> ReadNpyError {
        match err {
            ViewDataError::LengthOverflow => ReadNpyError::LengthOverflow,
            ViewDataError::MissingBytes(num) => ReadNpyError::MissingBytes(num),
            ViewDataError::ExtraBytes(num) => ReadNpyError::ExtraBytes(num),
            other => ReadNpyError::View(other),
        }
    }
}

impl From<ShapeError> for ReadNpyError {
    fn from(err: ShapeError) -> ReadNpyError {
        ReadNpyError::Shape(err)
    }
}

/// An error writing a `.npy` file.
#[derive(Debug)]
pub enum WriteNpyError {
    /// An error caused by I/O.
    Io(io::Error),
    /// An error formatting the header.
    FormatHeader(FormatHeaderError),
    /// Overflow while computing the data length from the shape.
    LengthOverflow,
    /// The number of elements supplied does not match the shape.
    ShapeMismatch { expected: usize, found: usize },
    /// The data cannot be appended to the existing file.
    IncompatibleAppend { existing: Header, appended: Header },
    /// An error reading the existing file (for appends) or the newly created
    /// file (for mapped creation).
    Read(ReadNpyError),
}

impl Error for WriteNpyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WriteNpyError::Io(err) => Some(err),
            WriteNpyError::FormatHeader(err) => Some(err),
            WriteNpyError::Read(err) => Some(err),
            WriteNpyError::LengthOverflow
            | WriteNpyError::ShapeMismatch { .. }
            | WriteNpyError::IncompatibleAppend { .. } => None,
        }
    }
}

impl fmt::Display for WriteNpyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WriteNpyError::Io(err) => write!(f, "I/O error: {}", err),
            WriteNpyError::FormatHeader(err) => write!(f, "error formatting header: {}", err),
            WriteNpyError::LengthOverflow => write!(f, "overflow computing length from shape"),
            WriteNpyError::ShapeMismatch { expected, found } => write!(
                f,
                "shape describes {} elements but {} were supplied",
                expected, found
            ),
            WriteNpyError::IncompatibleAppend { existing, appended } => write!(
                f,
                "cannot append {} {:?} to existing {} {:?}",
                appended.type_descriptor,
                appended.shape,
                existing.type_descriptor,
                existing.shape
            ),
            WriteNpyError::Read(err) => write!(f, "error reading back file: {}", err),
        }
    }
}

impl From<io::Error> for WriteNpyError {
    fn from(err: io::Error) -> WriteNpyError {
        WriteNpyError::Io(err)
    }
}

impl From<WriteHeaderError> for WriteNpyError {
    fn from(err: WriteHeaderError) -> WriteNpyError {
        match err {
            WriteHeaderError::Io(err) => WriteNpyError::Io(err),
            WriteHeaderError::Format(err) => WriteNpyError::FormatHeader(err),
        }
    }
}

impl From<FormatHeaderError> for WriteNpyError {
    fn from(err: FormatHeaderError) -> WriteNpyError {
        WriteNpyError::FormatHeader(err)
    }
}

impl From<ReadNpyError> for WriteNpyError {
    fn from(err: ReadNpyError) -> WriteNpyError {
        WriteNpyError::Read(err)
    }
}

/// Extension trait for writing `ArrayBase` and [`ArrayBuffer`] to `.npy`
/// files.
///
/// # Example
///
/// ```no_run
/// use ndarray::{array, Array2};
/// use npy_mmap::WriteNpyExt;
/// use std::fs::File;
/// use std::io::BufWriter;
///
/// let arr: Array2<i32> = array![[1, 2, 3], [4, 5, 6]];
/// let writer = BufWriter::new(File::create("array.npy")?);
/// arr.write_npy(writer)?;
/// # Ok::<_, Box<dyn std::error::Error>>(())
/// ```
pub trait WriteNpyExt {
    /// Writes the array to `writer` in [`.npy`
    /// format](https://numpy.org/doc/stable/reference/generated/numpy.lib.format.html).
    ///
    /// Wrap the writer in a `BufWriter` when writing element by element
    /// (non-contiguous arrays).
    fn write_npy<W: io::Write>(&self, writer: W) -> Result<(), WriteNpyError>;
}

impl<A, S, D> WriteNpyExt for ArrayBase<S, D>
where
    A: Element,
    S: Data<Elem = A>,
    D: Dimension,
{
    fn write_npy<W: io::Write>(&self, mut writer: W) -> Result<(), WriteNpyError> {
        let header = |fortran_order: bool| Header {
            type_descriptor: A::ELEMENT_TYPE.descriptor(),
            fortran_order,
            shape: self.shape().to_owned(),
        };
        if let Some(slice) = self.as_slice() {
            header(false).write(&mut writer)?;
            writer.write_all(slice_as_bytes(slice))?;
        } else if let Some(slice) = self.t().as_slice() {
            header(true).write(&mut writer)?;
            writer.write_all(slice_as_bytes(slice))?;
        } else {
            header(false).write(&mut writer)?;
            for elem in self.iter() {
                writer.write_all(slice_as_bytes(std::slice::from_ref(elem)))?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

impl WriteNpyExt for ArrayBuffer {
    fn write_npy<W: io::Write>(&self, mut writer: W) -> Result<(), WriteNpyError> {
        self.header().write(&mut writer)?;
        writer.write_all(self.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

/// Extension trait for reading `Array` and [`ArrayBuffer`] from `.npy`
/// files.
///
/// # Example
///
/// ```no_run
/// use ndarray::Array2;
/// use npy_mmap::ReadNpyExt;
/// use std::fs::File;
///
/// let reader = File::open("array.npy")?;
/// let arr = Array2::<i32>::read_npy(reader)?;
/// # println!("arr = {}", arr);
/// # Ok::<_, npy_mmap::ReadNpyError>(())
/// ```
pub trait ReadNpyExt: Sized {
    /// Reads the array from `reader` in [`.npy`
    /// format](https://numpy.org/doc/stable/reference/generated/numpy.lib.format.html).
    ///
    /// Reading stops at the end of the data described by the header; any
    /// further bytes are an error.
    fn read_npy<R: io::Read>(reader: R) -> Result<Self, ReadNpyError>;
}

impl ReadNpyExt for ArrayBuffer {
    fn read_npy<R: io::Read>(mut reader: R) -> Result<ArrayBuffer, ReadNpyError> {
        let (header, _) = Header::from_reader(&mut reader)?;
        let len = header.num_bytes().ok_or(ReadNpyError::LengthOverflow)?;
        // Grows with the bytes actually read; the declared length is not trusted.
        let mut data = Vec::new();
        reader.by_ref().take(len as u64).read_to_end(&mut data)?;
        if data.len() < len {
            return Err(ReadNpyError::MissingBytes(len - data.len()));
        }
        let extra = io::copy(&mut reader, &mut io::sink())?;
        if extra > 0 {
            return Err(ReadNpyError::ExtraBytes(extra as usize));
        }
        log::trace!("read {} bytes of element data", len);
        Ok(ArrayBuffer::from_bytes(
            header.shape,
            header.type_descriptor,
            header.fortran_order,
            &data,
        )?)
    }
}

impl<A, S, D> ReadNpyExt for ArrayBase<S, D>
where
    A: Element,
    S: DataOwned<Elem = A>,
    D: Dimension,
{
    fn read_npy<R: io::Read>(reader: R) -> Result<Self, ReadNpyError> {
        let buffer = ArrayBuffer::read_npy(reader)?;
        check_descriptor::<A>(&buffer)?;
        let shape = IxDyn(buffer.shape());
        let ndim = shape.ndim();
        let data = buffer.to_vec::<A>()?;
        ArrayBase::<S, IxDyn>::from_shape_vec(shape.set_f(buffer.fortran_order()), data)?
            .into_dimensionality()
            .map_err(|_| ReadNpyError::WrongNdim(D::NDIM, ndim))
    }
}

pub(crate) fn check_descriptor<T: Element>(buffer: &ArrayBuffer) -> Result<(), ReadNpyError> {
    let expected = T::ELEMENT_TYPE.descriptor();
    if buffer.descriptor() == expected {
        Ok(())
    } else {
        Err(ReadNpyError::WrongDescriptor {
            expected,
            found: buffer.descriptor(),
        })
    }
}

/// Parses a complete `.npy` image held in memory into an owned buffer.
pub(crate) fn buffer_from_npy_bytes(bytes: &[u8]) -> Result<ArrayBuffer, ReadNpyError> {
    let (header, preamble_len) = Header::from_bytes(bytes)?;
    Ok(ArrayBuffer::from_bytes(
        header.shape,
        header.type_descriptor,
        header.fortran_order,
        &bytes[preamble_len..],
    )?)
}

/// Builds a buffer over the `.npy` image occupying `len` bytes of `region`
/// starting at `offset`.
pub(crate) fn buffer_from_region(
    region: Arc<MappedRegion>,
    offset: usize,
    len: usize,
) -> Result<ArrayBuffer, ReadNpyError> {
    let end = offset.checked_add(len).ok_or(ReadNpyError::LengthOverflow)?;
    let image = region
        .range(offset, len)
        .ok_or_else(|| ReadNpyError::MissingBytes(end - region.len()))?;
    let (header, preamble_len) = Header::from_bytes(image)?;
    let num_bytes = header.num_bytes().ok_or(ReadNpyError::LengthOverflow)?;
    let available = len - preamble_len;
    if available > num_bytes {
        return Err(ReadNpyError::ExtraBytes(available - num_bytes));
    } else if available < num_bytes {
        return Err(ReadNpyError::MissingBytes(num_bytes - available));
    }
    Ok(ArrayBuffer::from_mapped(header, region, offset + preamble_len)?)
}

fn num_bytes(header: &Header) -> Result<usize, WriteNpyError> {
    header.num_bytes().ok_or(WriteNpyError::LengthOverflow)
}

/// Saves `data` with the given `shape` to the `.npy` file at `path`.
///
/// With [`WriteMode::Append`], the data is joined to the array already in
/// the file along the first axis (see [`npy_save_buffer`]).
///
/// # Example
///
/// ```no_run
/// use npy_mmap::{npy_save, WriteMode};
///
/// npy_save("data.npy", &[1i32, 2, 3, 4, 5, 6], &[2, 3], WriteMode::Create)?;
/// npy_save("data.npy", &[7i32, 8, 9], &[1, 3], WriteMode::Append)?;
/// # Ok::<_, npy_mmap::WriteNpyError>(())
/// ```
pub fn npy_save<T, P>(path: P, data: &[T], shape: &[usize], mode: WriteMode) -> Result<(), WriteNpyError>
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
        });
    }
    save_parts(path.as_ref(), header, slice_as_bytes(data), mode)
}

/// Saves `buffer` to the `.npy` file at `path`.
///
/// [`WriteMode::Append`] requires the file's array to have the same
/// descriptor and the same dimensions except the first; the first
/// dimensions are added. Both arrays must be in C order. The whole file is
/// rewritten since the header length may change.
pub fn npy_save_buffer<P: AsRef<Path>>(
    path: P,
    buffer: &ArrayBuffer,
    mode: WriteMode,
) -> Result<(), WriteNpyError> {
    save_parts(path.as_ref(), buffer.header(), buffer.as_bytes(), mode)
}

fn save_parts(path: &Path, header: Header, data: &[u8], mode: WriteMode) -> Result<(), WriteNpyError> {
    debug_assert_eq!(header.num_bytes(), Some(data.len()));
    let existing = match mode {
        WriteMode::Append if path.exists() => Some(fs::read(path)?),
        WriteMode::Append | WriteMode::Create => None,
    };
    // The existing file is validated before it is truncated.
    let (header, old_data) = match &existing {
        Some(old) => {
            let (old_header, preamble_len) = Header::from_bytes(old).map_err(ReadNpyError::from)?;
            let old_data = &old[preamble_len..];
            let old_len = num_bytes(&old_header)?;
            if old_data.len() < old_len {
                return Err(ReadNpyError::MissingBytes(old_len - old_data.len()).into());
            } else if old_data.len() > old_len {
                return Err(ReadNpyError::ExtraBytes(old_data.len() - old_len).into());
            }
            let joined = joined_header(&old_header, &header)?;
            log::debug!(
                "appending {:?} to {:?} in {}",
                header.shape,
                old_header.shape,
                path.display()
            );
            (joined, old_data)
        }
        None => (header, &[][..]),
    };
    let mut writer = BufWriter::new(File::create(path)?);
    header.write(&mut writer)?;
    writer.write_all(old_data)?;
    writer.write_all(data)?;
    writer.flush()?;
    Ok(())
}

/// Header of the array formed by joining `appended` to `existing` along the
/// first axis.
fn joined_header(existing: &Header, appended: &Header) -> Result<Header, WriteNpyError> {
    // Joining raw bytes is a leading-axis join only in C order.
    let compatible = !existing.fortran_order
        && !appended.fortran_order
        && existing.type_descriptor == appended.type_descriptor
        && !existing.shape.is_empty()
        && existing.shape.len() == appended.shape.len()
        && existing.shape[1..] == appended.shape[1..];
    if !compatible {
        return Err(WriteNpyError::IncompatibleAppend {
            existing: existing.clone(),
            appended: appended.clone(),
        });
    }
    let mut shape = existing.shape.clone();
    shape[0] = shape[0]
        .checked_add(appended.shape[0])
        .ok_or(WriteNpyError::LengthOverflow)?;
    let joined = Header {
        type_descriptor: existing.type_descriptor,
        fortran_order: false,
        shape,
    };
    num_bytes(&joined)?;
    Ok(joined)
}

/// Loads the `.npy` file at `path`.
///
/// With a mapped [`LoadMode`], the header is parsed out of the mapping and
/// the returned buffer views the element data in place.
pub fn npy_load<P: AsRef<Path>>(path: P, mode: LoadMode) -> Result<ArrayBuffer, ReadNpyError> {
    let path = path.as_ref();
    match mode.map_mode() {
        None => ArrayBuffer::read_npy(BufReader::new(File::open(path)?)),
        Some(map_mode) => {
            let region = MappedRegion::open(path, map_mode)?;
            let len = region.len();
            buffer_from_region(Arc::new(region), 0, len)
        }
    }
}

/// Like [`npy_load`], but fails unless the file's descriptor is that of `T`.
pub fn npy_load_as<T, P>(path: P, mode: LoadMode) -> Result<ArrayBuffer, ReadNpyError>
where
    T: Element,
    P: AsRef<Path>,
{
    let buffer = npy_load(path, mode)?;
    check_descriptor::<T>(&buffer)?;
    Ok(buffer)
}

/// Creates a zero-filled `.npy` file at `path` holding an array of `T` with
/// the given `shape`, and returns a read-write mapped buffer over its data.
///
/// The data area is allocated by extending the file length, so the file is
/// sparse where the file system supports it.
pub fn new_npy_mmap<T, P>(path: P, shape: &[usize], fortran_order: bool) -> Result<ArrayBuffer, WriteNpyError>
where
    T: Element,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let header = Header {
        type_descriptor: T::ELEMENT_TYPE.descriptor(),
        fortran_order,
        shape: shape.to_vec(),
    };
    let data_len = num_bytes(&header)?;
    let header_bytes = header.to_bytes()?;
    let file_len = (header_bytes.len() as u64)
        .checked_add(data_len as u64)
        .ok_or(WriteNpyError::LengthOverflow)?;
    {
        let mut file = File::create(path)?;
        file.write_all(&header_bytes)?;
        file.set_len(file_len)?;
    }
    log::debug!("created {} byte array file {}", file_len, path.display());
    let region = MappedRegion::open(path, MapMode::ReadWrite)?;
    let len = region.len();
    Ok(buffer_from_region(Arc::new(region), 0, len)?)
}
