//! Hidden Markov models over discrete or multivariate-Gaussian observations,
//! with sequence scoring via the forward-backward algorithm, most-likely-path
//! decoding via the Viterbi algorithm, and unsupervised parameter estimation
//! via Baum-Welch expectation-maximization.
//!
//! A model is built from explicit parameters (or uniform defaults), scored
//! and decoded directly, and trained by a [`BaumWelch`] trainer that replaces
//! the model with a re-estimated value each iteration:
//!
//! ```
//! use hmmkit::{symbols, BaumWelch, DiscreteDistribution, Hmm};
//! use ndarray::array;
//!
//! let hmm = Hmm::from_parts(
//!     array![0.6, 0.4],
//!     array![[0.7, 0.3], [0.4, 0.6]],
//!     vec![
//!         DiscreteDistribution::new(vec![2], array![0.9, 0.1]).into(),
//!         DiscreteDistribution::new(vec![2], array![0.2, 0.8]).into(),
//!     ],
//! );
//!
//! let ys = symbols(&[0, 0, 1]);
//! assert!((hmm.probability(&ys) - 0.13623).abs() < 1e-9);
//! assert_eq!(hmm.decode(&ys).to_vec(), vec![0, 0, 1]);
//!
//! let train = symbols(&[0, 0, 1, 0, 0, 1]);
//! let before = hmm.ln_probability(&train);
//! let mut trainer = BaumWelch::new(hmm, vec![train.clone()], true);
//! for _ in 0..10 {
//!     trainer.iteration();
//! }
//! assert!(trainer.hmm().ln_probability(&train) >= before - 1e-9);
//! ```
//!
//! Observation sequences are `Array2<f64>` with one row per time step, so
//! discrete symbols and continuous feature vectors share one type; a discrete
//! model reads each column as a symbol index. [`Hmm::ln_probability`] (and
//! the `scaled = true` trainer) use per-step renormalization and are the
//! right default; the literal [`Hmm::probability`] underflows once sequences
//! get long.
//!
//! ## Notes
//!
//! Sections 17.3 and 17.4 of *Machine Learning: a Probabilistic Perspective*
//! by Kevin Murphy, 2012, and Rabiner's 1989 HMM tutorial (for the scaling
//! scheme) were the main references. The notation in the doc comments
//! follows the Wikipedia page on the Baum-Welch algorithm.

mod baum_welch;
mod distribution;
mod forward_backward;
mod hmm;
mod ndarray_utils;
mod viterbi;

pub use crate::baum_welch::BaumWelch;
pub use crate::distribution::{DiscreteDistribution, GaussianDistribution, StateDistribution};
pub use crate::forward_backward::{ForwardBackward, ForwardBackwardScaled};
pub use crate::hmm::{symbols, Hmm, HmmSample, HmmSampleIter};
pub use crate::viterbi::Viterbi;

/// Tolerance for validating that loaded parameters are probability
/// distributions. Chosen completely arbitrarily.
pub(crate) const TOLERANCE: f64 = 1e-5;

#[cfg(all(test, feature = "serde-1"))]
mod serde_tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn model_round_trips_through_json() {
        let hmm = Hmm::from_parts(
            array![0.6, 0.4],
            array![[0.7, 0.3], [0.4, 0.6]],
            vec![
                DiscreteDistribution::new(vec![2], array![0.9, 0.1]).into(),
                DiscreteDistribution::new(vec![2], array![0.2, 0.8]).into(),
            ],
        );
        let encoded = serde_json::to_string(&hmm).unwrap();
        let decoded: Hmm = serde_json::from_str(&encoded).unwrap();
        assert_eq!(hmm.pi(), decoded.pi());
        assert_eq!(hmm.transition(), decoded.transition());
        assert_eq!(hmm.states(), decoded.states());
        let ys = symbols(&[0, 1, 0]);
        assert_eq!(hmm.probability(&ys), decoded.probability(&ys));
    }
}
