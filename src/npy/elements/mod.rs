//! The scalar type table: which Rust types can be stored, and how they are
//! described in a header.

use super::header::{ByteOrder, TypeDescriptor};
use crate::ViewDataError;
use std::error::Error;
use std::mem;
use std::slice;

/// Element types that can be stored in `.npy`/`.npz` files.
///
/// This is a closed table: each variant has a fixed one-character type code
/// and byte width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    #[cfg(feature = "num-complex-0_4")]
    Complex32,
    #[cfg(feature = "num-complex-0_4")]
    Complex64,
}

impl ElementType {
    const ALL: &'static [ElementType] = &[
        ElementType::Bool,
        ElementType::I8,
        ElementType::I16,
        ElementType::I32,
        ElementType::I64,
        ElementType::U8,
        ElementType::U16,
        ElementType::U32,
        ElementType::U64,
        ElementType::F32,
        ElementType::F64,
        #[cfg(feature = "num-complex-0_4")]
        ElementType::Complex32,
        #[cfg(feature = "num-complex-0_4")]
        ElementType::Complex64,
    ];

    /// One-character type code (`b`, `i`, `u`, `f` or `c`).
    pub fn kind(self) -> char {
        use ElementType::*;
        match self {
            Bool => 'b',
            I8 | I16 | I32 | I64 => 'i',
            U8 | U16 | U32 | U64 => 'u',
            F32 | F64 => 'f',
            #[cfg(feature = "num-complex-0_4")]
            Complex32 | Complex64 => 'c',
        }
    }

    /// Width of one element in bytes.
    pub fn word_size(self) -> usize {
        use ElementType::*;
        match self {
            Bool | I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 | F32 => 4,
            I64 | U64 | F64 => 8,
            #[cfg(feature = "num-complex-0_4")]
            Complex32 => 8,
            #[cfg(feature = "num-complex-0_4")]
            Complex64 => 16,
        }
    }

    /// The descriptor written to headers for this element type.
    ///
    /// Multi-byte types are described with the host byte order. Files
    /// written on big-endian hosts therefore cannot be read back.
    pub fn descriptor(self) -> TypeDescriptor {
        let byte_order = if self.word_size() == 1 {
            ByteOrder::NotApplicable
        } else if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        };
        TypeDescriptor::new(byte_order, self.kind(), self.word_size())
    }

    /// Looks up the table entry matching `descr`, if any.
    pub fn from_descriptor(descr: &TypeDescriptor) -> Option<ElementType> {
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.kind() == descr.kind && ty.word_size() == descr.word_size)
    }
}

/// A fixed-width scalar type whose in-memory representation is the element
/// representation in a file.
///
/// # Safety
///
/// Implementors must have no padding bytes, a size equal to
/// `ELEMENT_TYPE.word_size()`, and every byte pattern accepted by
/// [`check_bytes`](Element::check_bytes) must be a valid value.
pub unsafe trait Element: Copy + 'static {
    /// Table entry for this type.
    const ELEMENT_TYPE: ElementType;

    /// Returns `Ok(_)` iff every element in `bytes` is a valid bit pattern.
    fn check_bytes(_bytes: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// Returns `Ok(_)` iff a slice containing `bytes_len` bytes is the correct length to cast to
/// a slice with element type `T` and length `len`.
fn check_bytes_len<T>(bytes_len: usize, len: usize) -> Result<(), ViewDataError> {
    use std::cmp::Ordering;
    let needed_bytes = len
        .checked_mul(mem::size_of::<T>())
        .ok_or(ViewDataError::LengthOverflow)?;
    match bytes_len.cmp(&needed_bytes) {
        Ordering::Less => Err(ViewDataError::MissingBytes(needed_bytes - bytes_len)),
        Ordering::Equal => Ok(()),
        Ordering::Greater => Err(ViewDataError::ExtraBytes(bytes_len - needed_bytes)),
    }
}

/// Returns `Ok(_)` iff the slice of bytes is properly aligned to be cast to a
/// slice with element type `T`.
fn check_bytes_align<T>(bytes: &[u8]) -> Result<(), ViewDataError> {
    if bytes.as_ptr() as usize % mem::align_of::<T>() == 0 {
        Ok(())
    } else {
        Err(ViewDataError::Misaligned)
    }
}

fn check_element<T: Element>(bytes: &[u8], len: usize) -> Result<(), ViewDataError> {
    check_bytes_len::<T>(bytes.len(), len)?;
    T::check_bytes(bytes).map_err(ViewDataError::InvalidData)
}

/// Cast `&[u8]` to `&[T]`, where the resulting slice should have length `len`.
///
/// Returns `Err` if the length, alignment or bit patterns of `bytes` are
/// invalid for `T`.
pub(crate) fn bytes_as_slice<T: Element>(bytes: &[u8], len: usize) -> Result<&[T], ViewDataError> {
    check_element::<T>(bytes, len)?;
    check_bytes_align::<T>(bytes)?;
    // Sound: length, alignment and validity are checked above, and `Element`
    // guarantees the representation.
    Ok(unsafe { slice::from_raw_parts(bytes.as_ptr().cast(), len) })
}

/// Cast `&mut [u8]` to `&mut [T]`, where the resulting slice should have
/// length `len`.
///
/// Returns `Err` if the length, alignment or bit patterns of `bytes` are
/// invalid for `T`.
pub(crate) fn bytes_as_mut_slice<T: Element>(
    bytes: &mut [u8],
    len: usize,
) -> Result<&mut [T], ViewDataError> {
    check_element::<T>(bytes, len)?;
    check_bytes_align::<T>(bytes)?;
    Ok(unsafe { slice::from_raw_parts_mut(bytes.as_mut_ptr().cast(), len) })
}

/// Copies the elements out of `bytes`, which need not be aligned.
pub(crate) fn bytes_to_vec<T: Element>(bytes: &[u8], len: usize) -> Result<Vec<T>, ViewDataError> {
    check_element::<T>(bytes, len)?;
    let mut out = Vec::<T>::with_capacity(len);
    // Sound: `out` has capacity for `len` elements, i.e. exactly
    // `bytes.len()` bytes, and every element has been validated.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.as_mut_ptr().cast::<u8>(), bytes.len());
        out.set_len(len);
    }
    Ok(out)
}

/// Cast `&[T]` to `&[u8]`.
pub(crate) fn slice_as_bytes<T: Element>(slice: &[T]) -> &[u8] {
    // Sound: `Element` types have no padding bytes.
    unsafe {
        slice::from_raw_parts(
            slice.as_ptr().cast::<u8>(),
            // This never overflows, because slices always contain no more
            // than `isize::MAX` bytes.
            slice.len() * mem::size_of::<T>(),
        )
    }
}

/// Implements `Element` for a type whose every bit pattern is valid.
macro_rules! impl_element_always_valid {
    ($elem:ty, $ty:ident) => {
        unsafe impl $crate::Element for $elem {
            const ELEMENT_TYPE: $crate::ElementType = $crate::ElementType::$ty;
        }
    };
}

mod bool;
#[cfg(feature = "num-complex-0_4")]
mod complex;
mod primitive;
