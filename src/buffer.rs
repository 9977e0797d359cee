//! In-memory representation of one array: shape, element descriptor,
//! storage order flag and bytes.

use crate::mmap::MappedRegion;
use crate::npy::elements::{bytes_as_mut_slice, bytes_as_slice, bytes_to_vec, slice_as_bytes};
use crate::npy::header::{Header, TypeDescriptor};
use crate::{Element, ElementType};
use aligned_vec::{AVec, ConstAlign};
use ndarray::prelude::*;
use ndarray::{Data, IntoDimension, ShapeBuilder, ShapeError};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Alignment of owned storage.
const OWNED_ALIGN: usize = 64;

type OwnedBytes = AVec<u8, ConstAlign<OWNED_ALIGN>>;

/// An error viewing or copying the elements of an [`ArrayBuffer`].
#[derive(Debug)]
pub enum ViewDataError {
    /// The size of the requested element type differs from the word size.
    WordSize { expected: usize, requested: usize },
    /// The bytes are not aligned for the requested element type.
    Misaligned,
    /// The storage cannot be written (it is a read-only mapping).
    ReadOnly,
    /// The number of elements overflows `usize`.
    LengthOverflow,
    /// Fewer bytes are available than the shape requires.
    MissingBytes(usize),
    /// More bytes are available than the shape requires.
    ExtraBytes(usize),
    /// The bytes are not valid values of the element type.
    InvalidData(Box<dyn Error + Send + Sync>),
    /// Error building an `ndarray` view from the bytes.
    Shape(ShapeError),
}

impl Error for ViewDataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ViewDataError::InvalidData(err) => Some(&**err),
            ViewDataError::Shape(err) => Some(err),
            ViewDataError::WordSize { .. }
            | ViewDataError::Misaligned
            | ViewDataError::ReadOnly
            | ViewDataError::LengthOverflow
            | ViewDataError::MissingBytes(_)
            | ViewDataError::ExtraBytes(_) => None,
        }
    }
}

impl fmt::Display for ViewDataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ViewDataError::WordSize { expected, requested } => write!(
                f,
                "requested element size {} does not match word size {}",
                requested, expected
            ),
            ViewDataError::Misaligned => write!(f, "data is not aligned for the element type"),
            ViewDataError::ReadOnly => write!(f, "data is a read-only mapping"),
            ViewDataError::LengthOverflow => write!(f, "overflow computing length from shape"),
            ViewDataError::MissingBytes(num) => write!(f, "missing {} bytes of data", num),
            ViewDataError::ExtraBytes(num) => write!(f, "extra {} unexpected bytes of data", num),
            ViewDataError::InvalidData(err) => write!(f, "invalid element data: {}", err),
            ViewDataError::Shape(err) => write!(f, "data did not match shape: {}", err),
        }
    }
}

impl From<ShapeError> for ViewDataError {
    fn from(err: ShapeError) -> ViewDataError {
        ViewDataError::Shape(err)
    }
}

/// A byte range inside a mapping shared with other buffers.
struct MappedView {
    region: Arc<MappedRegion>,
    offset: usize,
    len: usize,
}

impl MappedView {
    fn bytes(&self) -> &[u8] {
        // The range was checked against the region in `from_mapped`.
        self.region.range(self.offset, self.len).unwrap_or(&[])
    }
}

enum Storage {
    Owned(OwnedBytes),
    Mapped(MappedView),
}

/// The bytes and metadata of one array.
///
/// Storage is either privately owned or a range of a [`MappedRegion`]
/// shared with the other buffers returned by the same load; the mapping is
/// released when the last buffer referencing it is dropped. Buffers drawn
/// from one mapping always view disjoint ranges.
///
/// `fortran_order` is metadata only. Bytes are never reordered.
///
/// Equality compares shapes and raw bytes.
pub struct ArrayBuffer {
    shape: Vec<usize>,
    descr: TypeDescriptor,
    fortran_order: bool,
    storage: Storage,
}

fn num_elements(shape: &[usize]) -> Result<usize, ViewDataError> {
    shape
        .iter()
        .try_fold(1usize, |acc, &len| acc.checked_mul(len))
        .ok_or(ViewDataError::LengthOverflow)
}

fn byte_len(shape: &[usize], descr: &TypeDescriptor) -> Result<usize, ViewDataError> {
    num_elements(shape)?
        .checked_mul(descr.word_size)
        .ok_or(ViewDataError::LengthOverflow)
}

fn check_len(expected: usize, actual: usize) -> Result<(), ViewDataError> {
    use std::cmp::Ordering;
    match actual.cmp(&expected) {
        Ordering::Less => Err(ViewDataError::MissingBytes(expected - actual)),
        Ordering::Equal => Ok(()),
        Ordering::Greater => Err(ViewDataError::ExtraBytes(actual - expected)),
    }
}

impl ArrayBuffer {
    /// Creates a zero-filled owned buffer.
    pub fn zeros(
        shape: Vec<usize>,
        descr: TypeDescriptor,
        fortran_order: bool,
    ) -> Result<ArrayBuffer, ViewDataError> {
        let len = byte_len(&shape, &descr)?;
        let bytes = OwnedBytes::from_iter(OWNED_ALIGN, std::iter::repeat(0u8).take(len));
        Ok(ArrayBuffer {
            shape,
            descr,
            fortran_order,
            storage: Storage::Owned(bytes),
        })
    }

    /// Creates an owned buffer holding a copy of `bytes`, which must be
    /// exactly as long as the shape and descriptor require.
    pub fn from_bytes(
        shape: Vec<usize>,
        descr: TypeDescriptor,
        fortran_order: bool,
        bytes: &[u8],
    ) -> Result<ArrayBuffer, ViewDataError> {
        check_len(byte_len(&shape, &descr)?, bytes.len())?;
        Ok(ArrayBuffer {
            shape,
            descr,
            fortran_order,
            storage: Storage::Owned(OwnedBytes::from_slice(OWNED_ALIGN, bytes)),
        })
    }

    /// Creates an owned buffer from elements given in storage order.
    pub fn from_slice<T: Element>(
        data: &[T],
        shape: Vec<usize>,
        fortran_order: bool,
    ) -> Result<ArrayBuffer, ViewDataError> {
        Self::from_bytes(
            shape,
            T::ELEMENT_TYPE.descriptor(),
            fortran_order,
            slice_as_bytes(data),
        )
    }

    /// Creates an owned buffer from an `ndarray` array.
    ///
    /// Standard-layout arrays are stored with `fortran_order == false`,
    /// arrays whose transpose is standard layout with `fortran_order ==
    /// true`; any other layout is copied out in logical order.
    pub fn from_array<A, S, D>(array: &ArrayBase<S, D>) -> ArrayBuffer
    where
        A: Element,
        S: Data<Elem = A>,
        D: Dimension,
    {
        let shape = array.shape().to_vec();
        let descr = A::ELEMENT_TYPE.descriptor();
        let (bytes, fortran_order) = if let Some(slice) = array
            .as_slice()
            .filter(|_| array.is_standard_layout())
        {
            (OwnedBytes::from_slice(OWNED_ALIGN, slice_as_bytes(slice)), false)
        } else if let Some(slice) = array.t().as_slice() {
            (OwnedBytes::from_slice(OWNED_ALIGN, slice_as_bytes(slice)), true)
        } else {
            let bytes = array
                .iter()
                .flat_map(|elem| slice_as_bytes(std::slice::from_ref(elem)).iter().copied());
            (OwnedBytes::from_iter(OWNED_ALIGN, bytes), false)
        };
        ArrayBuffer {
            shape,
            descr,
            fortran_order,
            storage: Storage::Owned(bytes),
        }
    }

    /// Wraps `len` bytes of `region` starting at `offset`.
    ///
    /// Callers must hand out disjoint ranges of one region.
    pub(crate) fn from_mapped(
        header: Header,
        region: Arc<MappedRegion>,
        offset: usize,
    ) -> Result<ArrayBuffer, ViewDataError> {
        let len = byte_len(&header.shape, &header.type_descriptor)?;
        let available = region.len().saturating_sub(offset);
        if available < len {
            return Err(ViewDataError::MissingBytes(len - available));
        }
        Ok(ArrayBuffer {
            shape: header.shape,
            descr: header.type_descriptor,
            fortran_order: header.fortran_order,
            storage: Storage::Mapped(MappedView {
                region,
                offset,
                len,
            }),
        })
    }

    /// The header describing this buffer.
    pub fn header(&self) -> Header {
        Header {
            type_descriptor: self.descr,
            fortran_order: self.fortran_order,
            shape: self.shape.clone(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn descriptor(&self) -> TypeDescriptor {
        self.descr
    }

    /// Table entry for the descriptor, if it is a supported type.
    pub fn element_type(&self) -> Option<ElementType> {
        ElementType::from_descriptor(&self.descr)
    }

    /// Width of one element in bytes.
    pub fn word_size(&self) -> usize {
        self.descr.word_size
    }

    pub fn fortran_order(&self) -> bool {
        self.fortran_order
    }

    /// Changes the storage order flag. The bytes are not touched.
    pub fn set_fortran_order(&mut self, fortran_order: bool) {
        self.fortran_order = fortran_order;
    }

    /// Number of elements (1 for a scalar).
    pub fn len(&self) -> usize {
        // Cannot overflow: checked when the buffer was created.
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bytes of element data, `len() * word_size()`.
    pub fn num_bytes(&self) -> usize {
        match &self.storage {
            Storage::Owned(bytes) => bytes.len(),
            Storage::Mapped(view) => view.len,
        }
    }

    /// Returns `true` if the storage is a range of a mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    /// Returns `true` unless the storage is a read-only mapping.
    pub fn is_writable(&self) -> bool {
        match &self.storage {
            Storage::Owned(_) => true,
            Storage::Mapped(view) => !view.region.is_readonly(),
        }
    }

    /// Number of buffers (including this one) sharing the mapping, or `None`
    /// for owned storage.
    pub fn mapping_refs(&self) -> Option<usize> {
        match &self.storage {
            Storage::Owned(_) => None,
            Storage::Mapped(view) => Some(Arc::strong_count(&view.region)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(bytes) => bytes,
            Storage::Mapped(view) => view.bytes(),
        }
    }

    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8], ViewDataError> {
        match &mut self.storage {
            Storage::Owned(bytes) => Ok(bytes),
            Storage::Mapped(view) => {
                let base = view.region.write_ptr().ok_or(ViewDataError::ReadOnly)?;
                // Sound: the range lies inside the mapping (checked in
                // `from_mapped`), no other buffer views it, and `&mut self`
                // prevents any other borrow of this buffer.
                Ok(unsafe { std::slice::from_raw_parts_mut(base.add(view.offset), view.len) })
            }
        }
    }

    fn check_word_size<T: Element>(&self) -> Result<(), ViewDataError> {
        let requested = std::mem::size_of::<T>();
        if requested == self.descr.word_size {
            Ok(())
        } else {
            Err(ViewDataError::WordSize {
                expected: self.descr.word_size,
                requested,
            })
        }
    }

    /// Reinterprets the bytes as elements of type `T`.
    ///
    /// Only the word size is checked against `T`, not the type code.
    pub fn as_slice<T: Element>(&self) -> Result<&[T], ViewDataError> {
        self.check_word_size::<T>()?;
        bytes_as_slice(self.as_bytes(), self.len())
    }

    /// Mutable version of [`as_slice`](ArrayBuffer::as_slice).
    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T], ViewDataError> {
        self.check_word_size::<T>()?;
        let len = self.len();
        bytes_as_mut_slice(self.as_bytes_mut()?, len)
    }

    /// Copies the elements out, without requiring alignment.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, ViewDataError> {
        self.check_word_size::<T>()?;
        bytes_to_vec(self.as_bytes(), self.len())
    }

    fn nd_shape(&self) -> ndarray::Shape<IxDyn> {
        self.shape.clone().into_dimension().set_f(self.fortran_order)
    }

    /// Borrows the data as an `ndarray` view, honouring `fortran_order`.
    pub fn view<T: Element>(&self) -> Result<ArrayViewD<'_, T>, ViewDataError> {
        let shape = self.nd_shape();
        Ok(ArrayView::from_shape(shape, self.as_slice::<T>()?)?)
    }

    /// Mutable version of [`view`](ArrayBuffer::view).
    pub fn view_mut<T: Element>(&mut self) -> Result<ArrayViewMutD<'_, T>, ViewDataError> {
        let shape = self.nd_shape();
        Ok(ArrayViewMut::from_shape(shape, self.as_mut_slice::<T>()?)?)
    }

    /// Copies the data into an owned `ndarray` array.
    pub fn to_array<T: Element>(&self) -> Result<ArrayD<T>, ViewDataError> {
        let shape = self.nd_shape();
        Ok(Array::from_shape_vec(shape, self.to_vec::<T>()?)?)
    }

    /// Converts into a buffer with private storage, copying mapped bytes.
    pub fn into_owned(self) -> ArrayBuffer {
        let storage = match self.storage {
            Storage::Owned(bytes) => Storage::Owned(bytes),
            Storage::Mapped(ref view) => Storage::Owned(OwnedBytes::from_slice(OWNED_ALIGN, view.bytes())),
        };
        ArrayBuffer {
            shape: self.shape,
            descr: self.descr,
            fortran_order: self.fortran_order,
            storage,
        }
    }
}

impl PartialEq for ArrayBuffer {
    fn eq(&self, other: &ArrayBuffer) -> bool {
        self.shape == other.shape && self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for ArrayBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ArrayBuffer")
            .field("shape", &self.shape)
            .field("descr", &format_args!("{}", self.descr))
            .field("fortran_order", &self.fortran_order)
            .field("mapped", &self.is_mapped())
            .field("num_bytes", &self.num_bytes())
            .finish()
    }
}
