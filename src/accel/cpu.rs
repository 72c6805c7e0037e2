use std::marker::PhantomData;

use half::f16;

use crate::accel::{AccelError, Accumulator, Backend};
use crate::dataset::Dataset;

/// Scalar type a sequential reduction accumulates into.
///
/// Input is always `f32`; the accumulator precision is what changes the error
/// profile (f16 saturates at 2048, f32 at 2^24, f64 effectively never here).
pub trait AccumType: Copy + Send + Sync + 'static {
    const ZERO: Self;

    fn add_f32(self, value: f32) -> Self;

    /// Combine two partial sums (used by tree reductions).
    fn merge(self, other: Self) -> Self;

    fn to_f64(self) -> f64;
}

impl AccumType for f32 {
    const ZERO: Self = 0.0;

    #[inline(always)]
    fn add_f32(self, value: f32) -> Self {
        self + value
    }

    #[inline(always)]
    fn merge(self, other: Self) -> Self {
        self + other
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl AccumType for f64 {
    const ZERO: Self = 0.0;

    #[inline(always)]
    fn add_f32(self, value: f32) -> Self {
        self + f64::from(value)
    }

    #[inline(always)]
    fn merge(self, other: Self) -> Self {
        self + other
    }

    fn to_f64(self) -> f64 {
        self
    }
}

impl AccumType for f16 {
    const ZERO: Self = f16::ZERO;

    #[inline(always)]
    fn add_f32(self, value: f32) -> Self {
        self + f16::from_f32(value)
    }

    #[inline(always)]
    fn merge(self, other: Self) -> Self {
        self + other
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

/// Left-to-right sum of `values` in precision `T`.
pub fn naive_sum<T: AccumType>(values: &[f32]) -> T {
    values.iter().fold(T::ZERO, |acc, &v| acc.add_f32(v))
}

/// Running Kahan-compensated sum.
#[derive(Debug, Clone, Copy, Default)]
pub struct KahanSum {
    sum: f32,
    compensation: f32,
}

impl KahanSum {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn add(&mut self, value: f32) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    pub fn value(&self) -> f32 {
        self.sum
    }
}

/// Compensated sum of `values` with an `f32` running total.
pub fn kahan_sum(values: &[f32]) -> f32 {
    let mut acc = KahanSum::new();
    for &v in values {
        acc.add(v);
    }
    acc.value()
}

/// Sequential loop with accumulator precision `T`.
pub struct ScalarAccumulator<T: AccumType> {
    data: Dataset,
    _precision: PhantomData<T>,
}

impl<T: AccumType> ScalarAccumulator<T> {
    pub fn new(data: &Dataset) -> Self {
        Self {
            data: data.clone(),
            _precision: PhantomData,
        }
    }
}

impl<T: AccumType> Accumulator for ScalarAccumulator<T> {
    fn sum(&self) -> Result<f64, AccelError> {
        Ok(naive_sum::<T>(self.data.as_slice()).to_f64())
    }

    fn backend(&self) -> Backend {
        Backend::Scalar
    }
}

/// Sequential Kahan summation.
pub struct KahanAccumulator {
    data: Dataset,
}

impl KahanAccumulator {
    pub fn new(data: &Dataset) -> Self {
        Self { data: data.clone() }
    }
}

impl Accumulator for KahanAccumulator {
    fn sum(&self) -> Result<f64, AccelError> {
        Ok(f64::from(kahan_sum(self.data.as_slice())))
    }

    fn backend(&self) -> Backend {
        Backend::Scalar
    }
}
