//! Small extension traits for `ndarray` used across the crate.

use itertools::Itertools;
use ndarray::prelude::*;
use ndarray::{Data, DataMut};
use num_traits::Float;

pub trait Array1Float<T: Float> {
    /// Along a 1D array, return the index of the maximum value and the value.
    ///
    /// Ties resolve to the lowest index so that decoding is reproducible.
    ///
    /// The behavior of this function is unspecified if the array contains NaNs.
    ///
    /// See also `argmaxfx`
    fn argmaxf(&self) -> Option<(usize, T)>;

    /// The "expecting" version of `argmaxf`
    fn argmaxfx(&self) -> (usize, T);
}

pub trait Array1FloatMut {
    /// Normalize in place so the entries sum to 1.
    fn nip(&mut self, label: &'static str);

    fn normalize(self, label: &'static str) -> Self;
}

impl<T, S> Array1Float<T> for ArrayBase<S, Ix1>
where
    T: Float,
    S: Data<Elem = T>,
{
    fn argmaxf(&self) -> Option<(usize, T)> {
        self.iter()
            .enumerate()
            .fold1(|(i0, v0), (i1, v1)| if v1 > v0 { (i1, v1) } else { (i0, v0) })
            .map(|(i, &v)| (i, v))
    }

    fn argmaxfx(&self) -> (usize, T) {
        self.argmaxf()
            .expect("argmaxfx failed because the input had length 0")
    }
}

impl<S> Array1FloatMut for ArrayBase<S, Ix1>
where
    S: DataMut<Elem = f64>,
{
    fn nip(&mut self, label: &'static str) {
        let sum: f64 = self.sum();
        assert!(sum > 0.0, "Sum of {} must be positive", label);
        (*self) /= sum;
    }

    fn normalize(mut self, label: &'static str) -> Self {
        self.nip(label);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn argmax_plain() {
        assert_eq!((2, 3.0), array![1.0, 2.0, 3.0].argmaxfx());
    }

    #[test]
    fn argmax_tie_takes_lowest_index() {
        assert_eq!((1, 5.0), array![1.0, 5.0, 5.0, 2.0].argmaxfx());
    }

    #[test]
    fn argmax_empty() {
        assert_eq!(None, Array1::<f64>::zeros(0).argmaxf());
    }

    #[test]
    fn normalize_sums_to_one() {
        let normalized = array![1.0, 3.0].normalize("test");
        assert_eq!(array![0.25, 0.75], normalized);
    }

    #[test]
    #[should_panic]
    fn normalize_zero_sum_panics() {
        array![0.0, 0.0].normalize("test");
    }
}
