//! Archive operations.

use crate::Scratch;
use byteorder::{LittleEndian, WriteBytesExt};
use npy_mmap::npz::zip::{Footer, ZipError};
use npy_mmap::{
    new_npz_mmap, npz_load, npz_load_entry, npz_load_entry_as, npz_save, npz_save_buffer,
    ArrayBuffer, ByteOrder, Compression, EntrySpec, LoadMode, NewNpzMmapError, ReadNpzError,
    TypeDescriptor, ViewDataError, WriteMode, WriteNpyExt,
};
use std::fs::{self, File};

fn footer(path: &std::path::Path) -> Footer {
    Footer::read_from(File::open(path).unwrap()).unwrap()
}

#[test]
fn archive_integrity() {
    let scratch = Scratch::new();
    let path = scratch.path("many.npz");
    let names = ["alpha", "beta", "gamma", "delta", "epsilon"];
    for (index, name) in names.iter().enumerate() {
        let data: Vec<i64> = (0..=index as i64).collect();
        let mode = if index == 0 {
            WriteMode::Create
        } else {
            WriteMode::Append
        };
        npz_save(&path, name, &data, &[index + 1], mode, Compression::Stored).unwrap();
        assert_eq!(usize::from(footer(&path).entries), index + 1);
    }

    for (index, name) in names.iter().enumerate() {
        let loaded = npz_load_entry_as::<i64, _>(&path, name, LoadMode::Memory).unwrap();
        let expected: Vec<i64> = (0..=index as i64).collect();
        assert_eq!(loaded.as_slice::<i64>().unwrap(), &expected[..]);
    }
    let all = npz_load(&path, LoadMode::Memory).unwrap();
    assert_eq!(all.names().collect::<Vec<_>>(), names);

    for mode in [LoadMode::Memory, LoadMode::MmapReadOnly] {
        match npz_load_entry(&path, "zeta", mode) {
            Err(ReadNpzError::NotFound(name)) => assert_eq!(name, "zeta"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}

#[test]
fn append_preserves_earlier_payloads() {
    let scratch = Scratch::new();
    let path = scratch.path("prefix.npz");
    npz_save(&path, "a", &[1u8, 2, 3], &[3], WriteMode::Create, Compression::Stored).unwrap();
    let before = fs::read(&path).unwrap();
    let directory_offset = footer(&path).directory_offset as usize;

    npz_save(&path, "b", &[4.0f32; 10], &[2, 5], WriteMode::Append, Compression::Stored).unwrap();
    let after = fs::read(&path).unwrap();
    assert_eq!(&after[..directory_offset], &before[..directory_offset]);
    assert_eq!(footer(&path).entries, 2);
}

#[test]
fn append_to_missing_archive_creates_it() {
    let scratch = Scratch::new();
    let path = scratch.path("fresh.npz");
    npz_save(&path, "x", &[3i16, 4], &[2], WriteMode::Append, Compression::Stored).unwrap();
    assert_eq!(footer(&path).entries, 1);
    let x = npz_load_entry(&path, "x", LoadMode::Memory).unwrap();
    assert_eq!(x.as_slice::<i16>().unwrap(), &[3, 4]);
}

#[test]
fn create_replaces_existing_archive() {
    let scratch = Scratch::new();
    let path = scratch.path("replace.npz");
    npz_save(&path, "old", &[1i32; 100], &[100], WriteMode::Create, Compression::Stored).unwrap();
    npz_save(&path, "new", &[2i32], &[1], WriteMode::Create, Compression::Stored).unwrap();
    let arrays = npz_load(&path, LoadMode::Memory).unwrap();
    assert_eq!(arrays.names().collect::<Vec<_>>(), ["new"]);
}

#[test]
fn duplicate_names_return_first_match() {
    let scratch = Scratch::new();
    let path = scratch.path("dups.npz");
    npz_save(&path, "w", &[1u32], &[1], WriteMode::Create, Compression::Stored).unwrap();
    npz_save(&path, "w", &[2u32], &[1], WriteMode::Append, Compression::Stored).unwrap();
    assert_eq!(footer(&path).entries, 2);

    let first = npz_load_entry(&path, "w", LoadMode::Memory).unwrap();
    assert_eq!(first.as_slice::<u32>().unwrap(), &[1]);
    let mut arrays = npz_load(&path, LoadMode::Memory).unwrap();
    assert_eq!(arrays.len(), 2);
    assert_eq!(arrays.get("w").unwrap().as_slice::<u32>().unwrap(), &[1]);
    let removed = arrays.remove("w").unwrap();
    assert_eq!(removed.as_slice::<u32>().unwrap(), &[1]);
    assert_eq!(arrays.get("w").unwrap().as_slice::<u32>().unwrap(), &[2]);
}

#[test]
fn mapped_load_shares_one_region() {
    let scratch = Scratch::new();
    let path = scratch.path("shared.npz");
    npz_save(&path, "a", &[1i32, 2, 3], &[3], WriteMode::Create, Compression::Stored).unwrap();
    npz_save(&path, "b", &[4.5f64, 5.5], &[2], WriteMode::Append, Compression::Stored).unwrap();
    npz_save(&path, "c", &[true, false], &[2], WriteMode::Append, Compression::Stored).unwrap();

    let mut arrays = npz_load(&path, LoadMode::Mmap).unwrap();
    for (_, buffer) in arrays.iter() {
        assert!(buffer.is_mapped());
        assert_eq!(buffer.mapping_refs(), Some(3));
        // Stored payloads start on a 16-byte boundary.
        assert_eq!(buffer.as_bytes().as_ptr() as usize % 16, 0);
    }
    arrays.get_mut("b").unwrap().as_mut_slice::<f64>().unwrap()[1] = -1.0;
    let c = arrays.remove("c").unwrap();
    drop(arrays);
    assert_eq!(c.mapping_refs(), Some(1));
    assert_eq!(c.as_slice::<bool>().unwrap(), &[true, false]);

    let b = npz_load_entry(&path, "b", LoadMode::Memory).unwrap();
    assert_eq!(b.as_slice::<f64>().unwrap(), &[4.5, -1.0]);
}

#[test]
fn sibling_access_during_mapped_writes() {
    let scratch = Scratch::new();
    let path = scratch.path("siblings.npz");
    npz_save(&path, "b", &[1.0f64, 2.0], &[2], WriteMode::Create, Compression::Stored).unwrap();
    npz_save(&path, "c", &[7i32, 8, 9], &[3], WriteMode::Append, Compression::Stored).unwrap();

    let mut arrays = npz_load(&path, LoadMode::Mmap).unwrap();
    let mut b = arrays.remove("b").unwrap();
    let c = arrays.remove("c").unwrap();
    let writes = b.as_mut_slice::<f64>().unwrap();
    writes[0] = 3.0;
    assert_eq!(c.as_slice::<i32>().unwrap(), &[7, 8, 9]);
    assert_eq!(c.as_bytes().len(), 12);
    let copy = c.into_owned();
    writes[1] = 4.0;
    assert!(!copy.is_mapped());
    assert_eq!(copy.as_slice::<i32>().unwrap(), &[7, 8, 9]);
    assert_eq!(b.as_slice::<f64>().unwrap(), &[3.0, 4.0]);
}

#[cfg(feature = "compressed_npz")]
#[test]
fn compression_equivalence() {
    let scratch = Scratch::new();
    let data: Vec<u16> = (0..5000).map(|i| (i % 13) as u16).collect();
    let buffer = ArrayBuffer::from_slice(&data, vec![50, 100], true).unwrap();

    let stored = scratch.path("stored.npz");
    let deflated = scratch.path("deflated.npz");
    npz_save_buffer(&stored, "data", &buffer, WriteMode::Create, Compression::Stored).unwrap();
    npz_save_buffer(&deflated, "data", &buffer, WriteMode::Create, Compression::Deflated).unwrap();
    assert!(fs::metadata(&deflated).unwrap().len() < fs::metadata(&stored).unwrap().len());

    for mode in [LoadMode::Memory, LoadMode::Mmap, LoadMode::MmapReadOnly] {
        let from_stored = npz_load_entry(&stored, "data", mode).unwrap();
        let from_deflated = npz_load_entry(&deflated, "data", mode).unwrap();
        assert_eq!(from_stored, buffer);
        assert_eq!(from_deflated, buffer);
        assert!(from_deflated.fortran_order());
        // Compressed entries are never mapped.
        assert!(!from_deflated.is_mapped());
        assert_eq!(from_stored.is_mapped(), mode != LoadMode::Memory);
    }
}

#[cfg(feature = "compressed_npz")]
#[test]
fn mixed_archive_mapped_load() {
    let scratch = Scratch::new();
    let path = scratch.path("mixed.npz");
    npz_save(&path, "plain", &[1i32, 2], &[2], WriteMode::Create, Compression::Stored).unwrap();
    npz_save(&path, "packed", &[0i32; 64], &[8, 8], WriteMode::Append, Compression::Deflated).unwrap();
    npz_save(&path, "tail", &[3i32], &[1], WriteMode::Append, Compression::Stored).unwrap();

    let arrays = npz_load(&path, LoadMode::MmapReadOnly).unwrap();
    assert!(arrays.get("plain").unwrap().is_mapped());
    assert!(!arrays.get("packed").unwrap().is_mapped());
    assert!(arrays.get("tail").unwrap().is_mapped());
    assert_eq!(arrays.get("packed").unwrap().as_slice::<i32>().unwrap(), &[0; 64][..]);
    assert_eq!(arrays.get("tail").unwrap().as_slice::<i32>().unwrap(), &[3]);
}

#[cfg(feature = "compressed_npz")]
#[test]
fn corrupted_deflate_payload() {
    let scratch = Scratch::new();
    let path = scratch.path("corrupt.npz");
    let data: Vec<i32> = (0..256).collect();
    npz_save(&path, "d", &data, &[256], WriteMode::Create, Compression::Deflated).unwrap();
    let mut bytes = fs::read(&path).unwrap();
    // Flip a bit in the middle of the compressed payload.
    let payload_start = npy_mmap::npz::zip::LOCAL_HEADER_LEN + "d.npy".len();
    let directory_offset = footer(&path).directory_offset as usize;
    bytes[(payload_start + directory_offset) / 2] ^= 0x10;
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        npz_load_entry(&path, "d", LoadMode::Memory),
        Err(ReadNpzError::Zip(ZipError::Corrupt(_)))
    ));
}

#[test]
fn new_npz_mmap_example() {
    let scratch = Scratch::new();
    let path = scratch.path("prealloc.npz");
    let arrays = new_npz_mmap(&path, &[EntrySpec::new::<i32, _>("arr", &[2, 3])], true).unwrap();
    assert_eq!(arrays.len(), 1);
    let arr = arrays.get("arr").unwrap();
    assert_eq!(arr.shape(), &[2, 3]);
    assert!(arr.fortran_order());
    assert!(arr.is_mapped());
    assert_eq!(arr.as_slice::<i32>().unwrap(), &[0; 6]);
}

#[test]
fn new_npz_mmap_writes_through() {
    let scratch = Scratch::new();
    let path = scratch.path("scratch.npz");
    let specs = [
        EntrySpec::new::<f32, _>("weights", &[4, 4]),
        EntrySpec::new::<u8, _>("mask", &[16]),
        EntrySpec::new::<i64, _>("big", &[70_000]),
    ];
    {
        let mut arrays = new_npz_mmap(&path, &specs, false).unwrap();
        assert_eq!(arrays.names().collect::<Vec<_>>(), ["weights", "mask", "big"]);
        let mut weights = arrays.get_mut("weights").unwrap().view_mut::<f32>().unwrap();
        weights[[3, 3]] = 2.5;
        arrays.get_mut("big").unwrap().as_mut_slice::<i64>().unwrap()[69_999] = 7;
    }
    assert_eq!(footer(&path).entries, 3);
    let weights = npz_load_entry_as::<f32, _>(&path, "weights", LoadMode::Memory).unwrap();
    assert_eq!(weights.as_slice::<f32>().unwrap()[15], 2.5);
    let big = npz_load_entry_as::<i64, _>(&path, "big", LoadMode::Memory).unwrap();
    assert_eq!(big.as_slice::<i64>().unwrap()[69_999], 7);
    assert!(big.as_slice::<i64>().unwrap()[..69_999].iter().all(|&x| x == 0));
}

#[test]
fn new_npz_mmap_edge_cases() {
    let scratch = Scratch::new();
    let path = scratch.path("untouched.npz");
    let arrays = new_npz_mmap(&path, &[], true).unwrap();
    assert!(arrays.is_empty());
    assert!(!path.exists());

    let odd = TypeDescriptor::new(ByteOrder::Little, 'V', 12);
    let res = new_npz_mmap(
        &path,
        &[
            EntrySpec::new::<i32, _>("ok", &[1]),
            EntrySpec::with_descriptor("odd", &[1], odd),
        ],
        false,
    );
    match res {
        Err(NewNpzMmapError::UnsupportedType { name, descr }) => {
            assert_eq!(name, "odd");
            assert_eq!(descr, odd);
        }
        other => panic!("expected UnsupportedType, got {:?}", other),
    }
}

#[test]
fn footer_invariants_are_checked() {
    let scratch = Scratch::new();
    let path = scratch.path("footer.npz");
    npz_save(&path, "a", &[1i32], &[1], WriteMode::Create, Compression::Stored).unwrap();
    let mut bytes = fs::read(&path).unwrap();
    let len = bytes.len();
    // Nonzero disk number.
    bytes[len - 18] = 1;
    fs::write(&path, &bytes).unwrap();
    let res = npz_save(&path, "b", &[2i32], &[1], WriteMode::Append, Compression::Stored);
    assert!(matches!(
        res,
        Err(npy_mmap::WriteNpzError::Zip(ZipError::Format(_)))
    ));
}

#[test]
fn empty_file_is_an_io_error() {
    let scratch = Scratch::new();
    let path = scratch.path("empty.npz");
    File::create(&path).unwrap();
    assert!(matches!(
        npz_load(&path, LoadMode::Memory),
        Err(ReadNpzError::Zip(ZipError::Io(_)))
    ));
}

/// Builds an archive the way generic zip writers do: no payload padding,
/// a zip64 local header for the first entry and a foreign name for the
/// second.
fn foreign_archive(entries: &[(&str, Vec<u8>, bool)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, data, zip64) in entries {
        let offset = out.len() as u32;
        let crc = crc32fast::hash(data);
        out.write_u32::<LittleEndian>(0x0403_4b50).unwrap();
        out.write_u16::<LittleEndian>(if *zip64 { 45 } else { 20 }).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(crc).unwrap();
        if *zip64 {
            out.write_u32::<LittleEndian>(u32::MAX).unwrap();
            out.write_u32::<LittleEndian>(u32::MAX).unwrap();
        } else {
            out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        }
        out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(if *zip64 { 20 } else { 0 }).unwrap();
        out.extend_from_slice(name.as_bytes());
        if *zip64 {
            out.write_u16::<LittleEndian>(0x0001).unwrap();
            out.write_u16::<LittleEndian>(16).unwrap();
            out.write_u64::<LittleEndian>(data.len() as u64).unwrap();
            out.write_u64::<LittleEndian>(data.len() as u64).unwrap();
        }
        out.extend_from_slice(data);

        central.write_u32::<LittleEndian>(0x0201_4b50).unwrap();
        central.write_u16::<LittleEndian>(20).unwrap();
        central.write_u16::<LittleEndian>(20).unwrap();
        central.write_u16::<LittleEndian>(0).unwrap();
        central.write_u16::<LittleEndian>(0).unwrap();
        central.write_u32::<LittleEndian>(0).unwrap();
        central.write_u32::<LittleEndian>(crc).unwrap();
        central.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        central.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        central.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        central.extend_from_slice(&[0; 8]);
        central.write_u32::<LittleEndian>(0).unwrap();
        central.write_u32::<LittleEndian>(offset).unwrap();
        central.extend_from_slice(name.as_bytes());
    }
    let directory_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.write_u32::<LittleEndian>(0x0605_4b50).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    out.write_u16::<LittleEndian>(entries.len() as u16).unwrap();
    out.write_u32::<LittleEndian>(central.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(directory_offset).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap();
    out
}

fn npy_image(data: &[i32]) -> Vec<u8> {
    let mut out = Vec::new();
    ArrayBuffer::from_slice(data, vec![data.len()], false)
        .unwrap()
        .write_npy(&mut out)
        .unwrap();
    out
}

#[test]
fn foreign_archive_layout() {
    let scratch = Scratch::new();
    let path = scratch.path("foreign.npz");
    fs::write(
        &path,
        foreign_archive(&[
            ("x.npy", npy_image(&[10, 20, 30]), true),
            ("raw", npy_image(&[-1]), false),
        ]),
    )
    .unwrap();

    let arrays = npz_load(&path, LoadMode::MmapReadOnly).unwrap();
    assert_eq!(arrays.names().collect::<Vec<_>>(), ["x", "raw"]);

    // The unpadded payload of "x" starts at an odd offset.
    let x = arrays.get("x").unwrap();
    assert!(x.is_mapped());
    assert!(matches!(x.as_slice::<i32>(), Err(ViewDataError::Misaligned)));
    assert_eq!(x.to_vec::<i32>().unwrap(), vec![10, 20, 30]);
    assert_eq!(x.to_array::<i32>().unwrap().into_raw_vec(), vec![10, 20, 30]);

    let raw = npz_load_entry(&path, "raw", LoadMode::Memory).unwrap();
    assert_eq!(raw.as_slice::<i32>().unwrap(), &[-1]);

    // Appending keeps the foreign entries readable.
    npz_save(&path, "y", &[5i32], &[1], WriteMode::Append, Compression::Stored).unwrap();
    let arrays = npz_load(&path, LoadMode::Memory).unwrap();
    assert_eq!(arrays.names().collect::<Vec<_>>(), ["x", "raw", "y"]);
    assert_eq!(arrays.get("x").unwrap().as_slice::<i32>().unwrap(), &[10, 20, 30]);
}

#[test]
fn zip64_sizes_past_the_end() {
    let scratch = Scratch::new();
    let path = scratch.path("oversized.npz");
    let mut bytes = foreign_archive(&[
        ("x.npy", npy_image(&[1, 2]), true),
        ("other", npy_image(&[3]), false),
    ]);
    // Both zip64 sizes of the first entry follow its name and the extra
    // field's id and length.
    let sizes = 30 + "x.npy".len() + 4;
    bytes[sizes..sizes + 16].fill(0xFF);
    fs::write(&path, &bytes).unwrap();

    for mode in [LoadMode::Memory, LoadMode::MmapReadOnly] {
        assert!(matches!(
            npz_load_entry(&path, "other", mode),
            Err(ReadNpzError::Zip(ZipError::Format(_)))
        ));
        assert!(matches!(
            npz_load(&path, mode),
            Err(ReadNpzError::Zip(ZipError::Format(_)))
        ));
    }

    // A declared size just past the archive end is rejected the same way.
    let len = bytes.len() as u64;
    bytes[sizes..sizes + 8].copy_from_slice(&len.to_le_bytes());
    bytes[sizes + 8..sizes + 16].copy_from_slice(&len.to_le_bytes());
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        npz_load_entry(&path, "x", LoadMode::Memory),
        Err(ReadNpzError::Zip(ZipError::Format(_)))
    ));
}
