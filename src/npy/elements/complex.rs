//! Trait implementations for complex numbers.
//!
//! `Complex` is `repr(C)` with two fields of the same type, so it has no
//! padding and its size is twice the size of the inner type.

use num_complex_0_4::Complex;

impl_element_always_valid!(Complex<f32>, Complex32);
impl_element_always_valid!(Complex<f64>, Complex64);
