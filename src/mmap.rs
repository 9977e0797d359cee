//! Shared, fixed-size memory mappings of whole files.

use memmap2::{Mmap, MmapRaw};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::slice;

/// Access mode of a [`MappedRegion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapMode {
    ReadOnly,
    /// Shared read-write mapping. Writes go to the file, not to a private
    /// copy.
    ReadWrite,
}

impl MapMode {
    fn open_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(true).write(self == MapMode::ReadWrite);
        options
    }
}

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapRaw),
}

impl Mapping {
    fn len(&self) -> usize {
        match self {
            Mapping::ReadOnly(map) => map.len(),
            Mapping::ReadWrite(raw) => raw.len(),
        }
    }
}

/// The live part of a region. Field order matters: the mapping is dropped
/// (unmapped) before the file handle is closed.
struct Live {
    mapping: Mapping,
    file: File,
}

/// A file mapped into memory in its entirety.
///
/// The length is fixed when the region is created; growing the file
/// afterwards requires a new region. Regions cannot be cloned. Ownership
/// can be moved explicitly with [`take`](MappedRegion::take), which leaves
/// the source empty.
pub struct MappedRegion {
    live: Option<Live>,
}

impl MappedRegion {
    /// Opens the file at `path` and maps its current length.
    pub fn open<P: AsRef<Path>>(path: P, mode: MapMode) -> io::Result<MappedRegion> {
        let file = mode.open_options().open(path)?;
        Self::map(file, mode)
    }

    /// Maps an already open file.
    ///
    /// The file must have been opened with access compatible with `mode`.
    /// On Unix, handles for the standard input, output or error streams are
    /// rejected.
    pub fn from_file(file: File, mode: MapMode) -> io::Result<MappedRegion> {
        #[cfg(unix)]
        check_not_std_stream(std::os::unix::io::AsRawFd::as_raw_fd(&file))?;
        Self::map(file, mode)
    }

    fn map(file: File, mode: MapMode) -> io::Result<MappedRegion> {
        let len = file.metadata()?.len();
        if usize::try_from(len).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("file of {} bytes does not fit in the address space", len),
            ));
        }
        // The mapping is shared with every other mapping of the file; the
        // caller is responsible for serializing access to the path.
        let mapping = match mode {
            MapMode::ReadOnly => Mapping::ReadOnly(unsafe { Mmap::map(&file)? }),
            MapMode::ReadWrite => Mapping::ReadWrite(MmapRaw::map_raw(&file)?),
        };
        log::debug!("mapped {} bytes ({:?})", mapping.len(), mode);
        Ok(MappedRegion {
            live: Some(Live { mapping, file }),
        })
    }

    /// Moves the mapping out of `self`, leaving `self` empty.
    #[must_use]
    pub fn take(&mut self) -> MappedRegion {
        MappedRegion {
            live: self.live.take(),
        }
    }

    /// Unmaps the region and closes the file. Does nothing if the region is
    /// already empty.
    pub fn close(&mut self) {
        self.live = None;
    }

    /// Returns `true` unless the region has been moved from or closed.
    pub fn is_open(&self) -> bool {
        self.live.is_some()
    }

    /// Returns the access mode, or `None` for an empty region.
    pub fn mode(&self) -> Option<MapMode> {
        self.live.as_ref().map(|live| match live.mapping {
            Mapping::ReadOnly(_) => MapMode::ReadOnly,
            Mapping::ReadWrite(_) => MapMode::ReadWrite,
        })
    }

    pub fn is_readonly(&self) -> bool {
        self.mode() != Some(MapMode::ReadWrite)
    }

    /// Length of the mapped range (0 for an empty region).
    pub fn len(&self) -> usize {
        self.live.as_ref().map_or(0, |live| live.mapping.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The underlying file handle, if the region is open.
    pub fn file(&self) -> Option<&File> {
        self.live.as_ref().map(|live| &live.file)
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.live.as_ref().map(|live| &live.mapping) {
            Some(Mapping::ReadOnly(map)) => map,
            // Sound: the pointer is valid for `len()` bytes for as long as
            // the mapping lives, which is at least as long as `&self`.
            Some(Mapping::ReadWrite(raw)) => unsafe { slice::from_raw_parts(raw.as_ptr(), raw.len()) },
            None => &[],
        }
    }

    /// Mutable access to the whole region, or `None` for read-only and empty
    /// regions.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self.live.as_mut().map(|live| &mut live.mapping) {
            Some(Mapping::ReadWrite(raw)) => {
                Some(unsafe { slice::from_raw_parts_mut(raw.as_mut_ptr(), raw.len()) })
            }
            Some(Mapping::ReadOnly(_)) | None => None,
        }
    }

    /// Borrows `len` bytes at `offset`, or `None` if the range is out of
    /// bounds.
    ///
    /// Only the requested bytes are borrowed. Regions shared between
    /// buffers are read through this, never through `as_slice`, since
    /// another buffer may hold a mutable borrow of a disjoint range.
    pub(crate) fn range(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        if end > self.len() {
            return None;
        }
        let base = match self.live.as_ref().map(|live| &live.mapping) {
            Some(Mapping::ReadOnly(map)) => map.as_ptr(),
            Some(Mapping::ReadWrite(raw)) => raw.as_ptr(),
            None => return Some(&[]),
        };
        // Sound: `offset..end` lies inside the mapping, which lives at least
        // as long as `&self`.
        Some(unsafe { slice::from_raw_parts(base.add(offset), len) })
    }

    /// Base pointer for writable sub-range views held by `ArrayBuffer`.
    ///
    /// Returns `None` for read-only and empty regions.
    pub(crate) fn write_ptr(&self) -> Option<*mut u8> {
        match self.live.as_ref().map(|live| &live.mapping) {
            Some(Mapping::ReadWrite(raw)) => Some(raw.as_mut_ptr()),
            Some(Mapping::ReadOnly(_)) | None => None,
        }
    }

    /// Flushes outstanding writes of a read-write mapping to the file.
    pub fn flush(&self) -> io::Result<()> {
        match self.live.as_ref().map(|live| &live.mapping) {
            Some(Mapping::ReadWrite(raw)) => raw.flush(),
            Some(Mapping::ReadOnly(_)) | None => Ok(()),
        }
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("mode", &self.mode())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(unix)]
fn check_not_std_stream(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    if (0..=2).contains(&fd) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to map standard stream descriptor {}", fd),
        ));
    }
    Ok(())
}
