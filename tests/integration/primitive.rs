//! Tests for the element type table and typed access to buffers.

use crate::ne_bytes_i32;
use npy_mmap::{ArrayBuffer, ByteOrder, Element, ElementType, TypeDescriptor, ViewDataError};

fn descr(s: &str) -> TypeDescriptor {
    TypeDescriptor::parse(s).unwrap()
}

#[cfg(target_endian = "little")]
#[test]
fn descriptors() {
    let expected = [
        (ElementType::Bool, "|b1"),
        (ElementType::I8, "|i1"),
        (ElementType::I16, "<i2"),
        (ElementType::I32, "<i4"),
        (ElementType::I64, "<i8"),
        (ElementType::U8, "|u1"),
        (ElementType::U16, "<u2"),
        (ElementType::U32, "<u4"),
        (ElementType::U64, "<u8"),
        (ElementType::F32, "<f4"),
        (ElementType::F64, "<f8"),
    ];
    for (ty, s) in expected {
        assert_eq!(ty.descriptor().to_string(), s);
        assert_eq!(ElementType::from_descriptor(&descr(s)), Some(ty));
    }
    assert_eq!(<u16 as Element>::ELEMENT_TYPE, ElementType::U16);
}

#[cfg(feature = "num-complex-0_4")]
#[test]
fn complex_descriptors() {
    use num_complex_0_4::Complex;
    assert_eq!(<Complex<f32> as Element>::ELEMENT_TYPE.word_size(), 8);
    assert_eq!(<Complex<f64> as Element>::ELEMENT_TYPE.word_size(), 16);
    assert_eq!(
        ElementType::from_descriptor(&descr("<c16")),
        Some(ElementType::Complex64)
    );
}

#[test]
fn unknown_descriptors() {
    for s in ["<f2", "<i16", "|V8", "<M8", "|S5"] {
        assert_eq!(ElementType::from_descriptor(&descr(s)), None, "{}", s);
    }
    // The byte order does not take part in the lookup.
    assert_eq!(
        ElementType::from_descriptor(&TypeDescriptor::new(ByteOrder::Big, 'i', 4)),
        Some(ElementType::I32)
    );
}

#[test]
fn view_i32() {
    let elems = [34234324, -980780878, 2849874];
    let buffer = ArrayBuffer::from_bytes(
        vec![3],
        ElementType::I32.descriptor(),
        false,
        &ne_bytes_i32(&elems),
    )
    .unwrap();
    assert_eq!(buffer.as_slice::<i32>().unwrap(), &elems);
    assert_eq!(buffer.to_vec::<i32>().unwrap(), elems.to_vec());
    assert_eq!(buffer.element_type(), Some(ElementType::I32));
}

#[test]
fn view_i32_mut() {
    let mut buffer = ArrayBuffer::from_slice(&[1i32, 2, 3], vec![3], false).unwrap();
    buffer.as_mut_slice::<i32>().unwrap()[2] += 1;
    assert_eq!(buffer.as_bytes(), &ne_bytes_i32(&[1, 2, 4])[..]);
    buffer.as_bytes_mut().unwrap()[..4].copy_from_slice(&9i32.to_ne_bytes());
    assert_eq!(buffer.as_slice::<i32>().unwrap(), &[9, 2, 4]);
}

#[test]
fn same_width_reinterpretation() {
    let buffer = ArrayBuffer::from_slice(&[-1i32, 7], vec![2], false).unwrap();
    assert_eq!(buffer.as_slice::<u32>().unwrap(), &[u32::MAX, 7]);
    assert_eq!(buffer.as_slice::<f32>().unwrap()[1].to_bits(), 7);
}

#[test]
fn word_size_mismatch() {
    let buffer = ArrayBuffer::from_slice(&[1u16, 2, 3, 4], vec![4], false).unwrap();
    for res in [
        buffer.as_slice::<u8>().map(|_| ()),
        buffer.as_slice::<u32>().map(|_| ()),
        buffer.to_vec::<i64>().map(|_| ()),
        buffer.view::<i8>().map(|_| ()),
    ] {
        assert!(matches!(res, Err(ViewDataError::WordSize { expected: 2, .. })));
    }
}

#[test]
fn view_bool() {
    let data = [0x00, 0x01, 0x00, 0x00, 0x01];
    let buffer =
        ArrayBuffer::from_bytes(vec![data.len()], descr("|b1"), false, &data).unwrap();
    assert_eq!(
        buffer.as_slice::<bool>().unwrap(),
        &[false, true, false, false, true]
    );
}

#[test]
fn view_bool_invalid() {
    let data = [0x00, 0x01, 0x05, 0x00];
    let mut buffer =
        ArrayBuffer::from_bytes(vec![data.len()], descr("|b1"), false, &data).unwrap();
    assert!(matches!(
        buffer.as_slice::<bool>(),
        Err(ViewDataError::InvalidData(_))
    ));
    assert!(matches!(
        buffer.as_mut_slice::<bool>(),
        Err(ViewDataError::InvalidData(_))
    ));
    assert!(matches!(
        buffer.to_vec::<bool>(),
        Err(ViewDataError::InvalidData(_))
    ));
    // The bytes themselves are still reachable.
    assert!(buffer.as_slice::<u8>().is_ok());
}

#[test]
fn from_bytes_checks_length() {
    let d = ElementType::F64.descriptor();
    assert!(matches!(
        ArrayBuffer::from_bytes(vec![2, 2], d, false, &[0; 31]),
        Err(ViewDataError::MissingBytes(1))
    ));
    assert!(matches!(
        ArrayBuffer::from_bytes(vec![2, 2], d, false, &[0; 40]),
        Err(ViewDataError::ExtraBytes(8))
    ));
    assert!(matches!(
        ArrayBuffer::zeros(vec![usize::MAX, 2], d, false),
        Err(ViewDataError::LengthOverflow)
    ));
}

#[test]
fn zeros_and_scalars() {
    let zeros = ArrayBuffer::zeros(vec![3, 0], ElementType::I8.descriptor(), true).unwrap();
    assert!(zeros.is_empty());
    assert_eq!(zeros.num_bytes(), 0);
    assert_eq!(zeros.view::<i8>().unwrap().shape(), &[3, 0]);

    let scalar = ArrayBuffer::from_slice(&[2.5f64], vec![], false).unwrap();
    assert_eq!(scalar.len(), 1);
    assert_eq!(scalar.view::<f64>().unwrap().iter().collect::<Vec<_>>(), [&2.5]);
}

#[test]
fn views_honour_storage_order() {
    let buffer = ArrayBuffer::from_slice(&[1i32, 2, 3, 4, 5, 6], vec![2, 3], true).unwrap();
    let view = buffer.view::<i32>().unwrap();
    assert_eq!(view[[0, 1]], 3);
    assert_eq!(view[[1, 0]], 2);
    let owned = buffer.to_array::<i32>().unwrap();
    assert_eq!(owned, view);
    assert_eq!(ArrayBuffer::from_array(&owned), buffer);
    assert!(ArrayBuffer::from_array(&owned).fortran_order());
}
