//! The hidden Markov model value and its scoring/decoding entry points.

use crate::distribution::{DiscreteDistribution, GaussianDistribution, StateDistribution};
use crate::forward_backward::{ForwardBackward, ForwardBackwardScaled};
use crate::viterbi::Viterbi;
use crate::TOLERANCE;
use ndarray::prelude::*;
use rand::Rng;
use spectral::prelude::*;

/// A hidden Markov model over $N$ states.
///
/// # Math
///
/// The model explains a sequence of observations
///
/// $$O = (O_0, O_1, \ldots, O_{T-1})$$
///
/// through latent states $X = (X_0, \ldots, X_{T-1})$, $x_t \in [0, N)$, with
/// three parameters:
/// * $π$, the $N$-length initial state distribution: $π_i = P(X_0 = i)$
/// * $A$, the $N × N$ transition matrix: $a_{ij} = P(X_{t+1} = j | X_t = i)$
/// * one emission model $b_i(\cdot)$ per state, all of the same family
///   (discrete categorical or multivariate Gaussian)
///
/// An `Hmm` is a value: training never mutates a model in place, it builds a
/// replacement. A reference handed out for scoring stays valid and unchanged
/// while a trainer iterates.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct Hmm {
    pi: Array1<f64>,
    transition: Array2<f64>,
    states: Vec<StateDistribution>,
}

impl Hmm {
    /// A discrete model with uniform π, transition, and emission tables.
    /// `items[k]` is the alphabet size of observation dimension `k`.
    pub fn new_discrete(state_count: usize, items: Vec<usize>) -> Self {
        let states = (0..state_count)
            .map(|_| DiscreteDistribution::uniform(items.clone()).into())
            .collect();
        Self::from_parts(
            uniform(state_count),
            uniform_matrix(state_count),
            states,
        )
    }

    /// A continuous model with uniform π and transition, each state a
    /// zero-mean, identity-covariance Gaussian over `dimensions` features.
    pub fn new_gaussian(state_count: usize, dimensions: usize) -> Self {
        let states = (0..state_count)
            .map(|_| GaussianDistribution::standard(dimensions).into())
            .collect();
        Self::from_parts(
            uniform(state_count),
            uniform_matrix(state_count),
            states,
        )
    }

    /// Assemble a model from explicit parameters, e.g. loaded from storage.
    ///
    /// Panics if any of:
    /// - Dimensions are inconsistent
    /// - π or a transition row is not a probability distribution
    /// - The states mix emission families or disagree on shape
    pub fn from_parts(
        pi: Array1<f64>,
        transition: Array2<f64>,
        states: Vec<StateDistribution>,
    ) -> Self {
        let n = states.len();
        asserting("model must have at least one state")
            .that(&n)
            .is_greater_than(0);
        assert_eq!(
            transition.nrows(),
            n,
            "transition matrix must have one row per state"
        );
        assert_eq!(transition.ncols(), n, "transition matrix must be square");
        assert_eq!(pi.len(), n, "π must be of length N");

        for pi_i in &pi {
            assert_that(pi_i).is_greater_than_or_equal_to(0.0);
        }
        asserting("π must sum to 1")
            .that(&pi.sum())
            .is_close_to(1.0, TOLERANCE);

        for a_ij in &transition {
            assert_that(a_ij).is_greater_than_or_equal_to(0.0);
        }
        for row in transition.genrows() {
            asserting("each transition row must sum to 1")
                .that(&row.sum())
                .is_close_to(1.0, TOLERANCE);
        }

        for state in &states {
            assert_eq!(
                state.is_discrete(),
                states[0].is_discrete(),
                "all states must share one emission family"
            );
            assert_eq!(
                state.dimensions(),
                states[0].dimensions(),
                "all states must share observation dimensionality"
            );
            if let (StateDistribution::Discrete(d), StateDistribution::Discrete(first)) =
                (state, &states[0])
            {
                assert_eq!(
                    d.items(),
                    first.items(),
                    "all states must share the same symbol alphabet"
                );
            }
        }

        Self {
            pi,
            transition,
            states,
        }
    }

    /// $N$, the number of hidden states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn pi(&self) -> &Array1<f64> {
        &self.pi
    }

    pub fn transition(&self) -> &Array2<f64> {
        &self.transition
    }

    pub fn states(&self) -> &[StateDistribution] {
        &self.states
    }

    pub fn state(&self, i: usize) -> &StateDistribution {
        &self.states[i]
    }

    /// Whether this model emits discrete symbols. A property of the emission
    /// variant, so discrete and Gaussian states cannot coexist in one model.
    pub fn is_discrete(&self) -> bool {
        self.states[0].is_discrete()
    }

    /// Per-dimension alphabet sizes for a discrete model, `None` for a
    /// continuous one.
    pub fn items(&self) -> Option<&[usize]> {
        match &self.states[0] {
            StateDistribution::Discrete(d) => Some(d.items()),
            StateDistribution::Gaussian(_) => None,
        }
    }

    /// Dimensionality of one observation vector.
    pub fn dimensions(&self) -> usize {
        self.states[0].dimensions()
    }

    /// A model of the same shape and family with fresh default parameters.
    /// This is the re-estimation target of one Baum-Welch iteration.
    pub fn clone_structure(&self) -> Self {
        match self.items() {
            Some(items) => Self::new_discrete(self.state_count(), items.to_vec()),
            None => Self::new_gaussian(self.state_count(), self.dimensions()),
        }
    }

    /// $P(O)$ via the unscaled forward pass. Underflows on long sequences;
    /// prefer [`Hmm::ln_probability`] unless literal probabilities are
    /// needed.
    pub fn probability(&self, sequence: &Array2<f64>) -> f64 {
        ForwardBackward::new(self, sequence, false).probability()
    }

    /// $\ln P(O)$ via the scaled forward pass. Stable for any length.
    pub fn ln_probability(&self, sequence: &Array2<f64>) -> f64 {
        ForwardBackwardScaled::new(self, sequence, false).ln_probability()
    }

    /// Exact joint probability $P(O, X)$ of the observations and a given
    /// state path.
    ///
    /// Panics if the path length differs from the sequence length or the
    /// sequence is empty.
    pub fn path_probability(&self, sequence: &Array2<f64>, path: &[usize]) -> f64 {
        assert!(
            sequence.nrows() >= 1,
            "sequence must contain at least one observation"
        );
        assert_eq!(
            sequence.nrows(),
            path.len(),
            "sequence and state path must have the same length"
        );
        let mut p = self.pi[path[0]] * self.states[path[0]].probability(sequence.row(0));
        for t in 1..path.len() {
            p *= self.transition[(path[t - 1], path[t])]
                * self.states[path[t]].probability(sequence.row(t));
        }
        p
    }

    /// The most likely hidden-state path for a sequence (Viterbi).
    pub fn decode(&self, sequence: &Array2<f64>) -> Array1<usize> {
        Viterbi::new(self, sequence).into_path()
    }

    /// An infinite iterator of `(state, observation)` samples drawn from this
    /// model. Randomness is caller-supplied; the core itself stays
    /// deterministic.
    pub fn sampler<'a, R: Rng + ?Sized>(&'a self, rng: &'a mut R) -> HmmSampleIter<'a, R> {
        HmmSampleIter {
            hmm: self,
            rng,
            current_state: None,
        }
    }
}

fn uniform(n: usize) -> Array1<f64> {
    Array1::from_elem(n, 1.0 / n as f64)
}

fn uniform_matrix(n: usize) -> Array2<f64> {
    Array2::from_elem((n, n), 1.0 / n as f64)
}

/// Build a single-dimension discrete observation sequence from raw symbols.
pub fn symbols(ys: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((ys.len(), 1), |(t, _)| ys[t] as f64)
}

/// The item yielded by `HmmSampleIter`.
#[derive(Clone, Debug, PartialEq)]
pub struct HmmSample {
    pub state: usize,
    pub observation: Array1<f64>,
}

/// An iterator that returns random samples from an HMM.
pub struct HmmSampleIter<'a, R: Rng + ?Sized> {
    hmm: &'a Hmm,
    rng: &'a mut R,
    current_state: Option<usize>,
}

impl<'a, R: Rng + ?Sized> Iterator for HmmSampleIter<'a, R> {
    type Item = HmmSample;

    fn next(&mut self) -> Option<Self::Item> {
        let state = match self.current_state {
            Some(current) => choose_index(self.hmm.transition.row(current), self.rng),
            None => choose_index(self.hmm.pi.view(), self.rng),
        };
        self.current_state = Some(state);
        Some(HmmSample {
            state,
            observation: self.hmm.states[state].sample(self.rng),
        })
    }
}

/// Sample a categorical index by walking the cumulative distribution.
fn choose_index<R: Rng + ?Sized>(pmf: ArrayView1<f64>, rng: &mut R) -> usize {
    let u = rng.gen::<f64>();
    let mut cumulative = 0.0;
    for (i, &p) in pmf.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return i;
        }
    }
    pmf.len() - 1
}
