//! Most-likely-state-path decoding.
//!
//! # Math
//!
//! Log-space dynamic programming over
//!
//! $$δ_t(j) = \max_{x_0 \ldots x_{t-1}} \ln P(O_0 \ldots O_t, X_0 \ldots
//! X_{t-1}, X_t = j)$$
//!
//! with $δ_0(i) = \ln π_i + \ln b_i(O_0)$ and
//! $δ_t(j) = \max_i\left(δ_{t-1}(i) + \ln a_{ij}\right) + \ln b_j(O_t)$.
//! The backpointer $ψ_t(j)$ records the arg-max predecessor; the path is
//! recovered by walking it from $\arg\max_i δ_{T-1}(i)$. Ties resolve to the
//! lowest state index so decoding is reproducible.

use crate::hmm::Hmm;
use crate::ndarray_utils::Array1Float;
use ndarray::prelude::*;

#[derive(Debug)]
pub struct Viterbi {
    path: Array1<usize>,
    ln_probability: f64,
}

impl Viterbi {
    /// Decode one sequence against `hmm`. Panics if the sequence is empty or
    /// its dimensionality does not match the model.
    pub fn new(hmm: &Hmm, sequence: &Array2<f64>) -> Self {
        assert!(
            sequence.nrows() >= 1,
            "observation sequence must not be empty"
        );
        assert_eq!(
            sequence.ncols(),
            hmm.dimensions(),
            "observations have {} dimensions but the model expects {}",
            sequence.ncols(),
            hmm.dimensions()
        );
        let t_len = sequence.nrows();
        let n = hmm.state_count();

        let mut delta = Array2::<f64>::zeros((t_len, n));
        let mut psi = Array2::<usize>::zeros((t_len, n));
        for i in 0..n {
            delta[(0, i)] = hmm.pi()[i].ln() + hmm.state(i).probability(sequence.row(0)).ln();
        }
        for t in 1..t_len {
            for j in 0..n {
                let mut best = f64::NEG_INFINITY;
                let mut best_i = 0;
                for i in 0..n {
                    let score = delta[(t - 1, i)] + hmm.transition()[(i, j)].ln();
                    // strict comparison keeps the lowest index on ties
                    if score > best {
                        best = score;
                        best_i = i;
                    }
                }
                delta[(t, j)] = best + hmm.state(j).probability(sequence.row(t)).ln();
                psi[(t, j)] = best_i;
            }
        }

        let (final_state, ln_probability) = delta.row(t_len - 1).argmaxfx();
        let mut path = Array1::<usize>::zeros(t_len);
        path[t_len - 1] = final_state;
        let mut state = final_state;
        for t in (0..t_len - 1).rev() {
            state = psi[(t + 1, state)];
            path[t] = state;
        }

        Self {
            path,
            ln_probability,
        }
    }

    pub fn state_sequence(&self) -> &Array1<usize> {
        &self.path
    }

    /// $\ln P(O, X^*)$, the joint log probability of the decoded path.
    pub fn ln_probability(&self) -> f64 {
        self.ln_probability
    }

    pub fn into_path(self) -> Array1<usize> {
        self.path
    }
}
