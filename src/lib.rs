//! This crate reads and writes arrays in the [`.npy`] and [`.npz`] formats,
//! with optional memory-mapped access to the element data.
//!
//! [`.npy`]: https://numpy.org/doc/stable/reference/generated/numpy.lib.format.html
//! [`.npz`]: https://numpy.org/doc/stable/reference/generated/numpy.savez.html
//!
//! Arrays are handled as [`ArrayBuffer`]s: a shape, a [`TypeDescriptor`], a
//! storage order flag and the raw element bytes. A buffer either owns its
//! bytes or views a byte range of a [`MappedRegion`], in which case writes
//! through the buffer go straight to the file.
//!
//! * `.npy` files: [`npy_save`], [`npy_save_buffer`], [`npy_load`],
//!   [`npy_load_as`] and [`new_npy_mmap`].
//! * `.npz` archives: [`npz_save`], [`npz_save_buffer`], [`npz_load`],
//!   [`npz_load_entry`], [`npz_load_entry_as`] and [`new_npz_mmap`].
//! * [`ndarray`] interop: [`ReadNpyExt`] and [`WriteNpyExt`] read/write
//!   `ArrayBase` from/to any reader or writer, and [`ArrayBuffer::view`] and
//!   [`ArrayBuffer::to_array`] convert loaded buffers.
//!
//! # Example
//!
//! ```no_run
//! use npy_mmap::{npy_load, npz_load_entry, npz_save, Compression, LoadMode, WriteMode};
//!
//! npz_save("arrays.npz", "a", &[1i32, 2, 3, 4, 5, 6], &[2, 3], WriteMode::Create, Compression::Stored)?;
//! let mut a = npz_load_entry("arrays.npz", "a", LoadMode::Mmap)?;
//! a.as_mut_slice::<i32>()?[0] = 10;
//! assert_eq!(a.view::<i32>()?.shape(), &[2, 3]);
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! # Limitations
//!
//! * Only little-endian (or byte-order-free) data can be read.
//!
//! * Element types are limited to `bool`, fixed-size integers, floating
//!   point numbers and (with the `num-complex-0_4` feature) complex numbers.
//!
//! * Archives are limited to the classic ZIP size limits (4 GiB entries and
//!   offsets, 65535 entries) and are never split or commented.
//!
//! * Nothing locks the files. Mapping a file read-write while appending to
//!   it through another call is undefined; callers must serialize access to
//!   a path.
//!
//! # Features
//!
//! * `compressed_npz` (default): deflate compression of archive entries,
//!   using `flate2`.
//! * `num-complex-0_4` (default): [`Element`] for `num_complex::Complex<f32>`
//!   and `Complex<f64>` from `num-complex` 0.4.

mod buffer;
mod mmap;
mod npy;
pub mod npz;

pub use crate::buffer::{ArrayBuffer, ViewDataError};
pub use crate::mmap::{MapMode, MappedRegion};
pub use crate::npy::elements::{Element, ElementType};
pub use crate::npy::header;
pub use crate::npy::header::{ByteOrder, Header, TypeDescriptor};
pub use crate::npy::{
    new_npy_mmap, npy_load, npy_load_as, npy_save, npy_save_buffer, LoadMode, ParseWriteModeError,
    ReadNpyError, ReadNpyExt, WriteMode, WriteNpyError, WriteNpyExt,
};
pub use crate::npz::{
    new_npz_mmap, npz_load, npz_load_entry, npz_load_entry_as, npz_save, npz_save_buffer,
    Compression, EntrySpec, NewNpzMmapError, NpzArrays, ReadNpzError, WriteNpzError,
};
