//! Rayon tree reductions. Partial sums are formed per split and merged pairwise,
//! so rounding error grows with tree depth instead of with N.

use std::marker::PhantomData;

use rayon::prelude::*;

use crate::accel::cpu::AccumType;
use crate::accel::{AccelError, Accumulator, Backend};
use crate::dataset::Dataset;

/// Parallel fold/reduce over the global rayon pool in precision `T`.
pub fn par_sum<T: AccumType>(values: &[f32]) -> T {
    values
        .par_iter()
        .fold(|| T::ZERO, |acc, &v| acc.add_f32(v))
        .reduce(|| T::ZERO, T::merge)
}

pub struct ThreadedAccumulator<T: AccumType> {
    data: Dataset,
    _precision: PhantomData<T>,
}

impl<T: AccumType> ThreadedAccumulator<T> {
    pub fn new(data: &Dataset) -> Self {
        Self {
            data: data.clone(),
            _precision: PhantomData,
        }
    }
}

impl<T: AccumType> Accumulator for ThreadedAccumulator<T> {
    fn sum(&self) -> Result<f64, AccelError> {
        Ok(par_sum::<T>(self.data.as_slice()).to_f64())
    }

    fn backend(&self) -> Backend {
        Backend::Threads
    }
}
