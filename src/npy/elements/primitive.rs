//! Trait implementations for primitive numeric types.

impl_element_always_valid!(i8, I8);
impl_element_always_valid!(i16, I16);
impl_element_always_valid!(i32, I32);
impl_element_always_valid!(i64, I64);

impl_element_always_valid!(u8, U8);
impl_element_always_valid!(u16, U16);
impl_element_always_valid!(u32, U32);
impl_element_always_valid!(u64, U64);

impl_element_always_valid!(f32, F32);
impl_element_always_valid!(f64, F64);
