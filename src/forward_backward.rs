//! Forward-backward probability lattices for one (model, sequence) pair.
//!
//! # Math
//!
//! The forward variable is the probability of the observed prefix and the
//! state at its end:
//!
//! $$α_t(i) = P(O_0, \ldots, O_t, X_t = i)$$
//!
//! computed by $α_0(i) = π_i b_i(O_0)$ and
//! $α_t(j) = \left(\sum_i α_{t-1}(i) a_{ij}\right) b_j(O_t)$.
//!
//! The backward variable covers the suffix given the state:
//!
//! $$β_t(i) = P(O_{t+1}, \ldots, O_{T-1} | X_t = i)$$
//!
//! with $β_{T-1}(i) = 1$ and
//! $β_t(i) = \sum_j a_{ij} b_j(O_{t+1}) β_{t+1}(j)$.
//!
//! [`ForwardBackward`] stores the literal values, so $P(O) = \sum_i
//! α_{T-1}(i)$; products of probabilities underflow once sequences get long.
//! [`ForwardBackwardScaled`] renormalizes both lattices at every step by
//! $c_t = \sum_i α^{raw}_t(i)$ and accumulates $\ln P(O) = \sum_t \ln c_t$,
//! which stays representable for any length. The scaled form is the default
//! for scoring; the literal form exists for short sequences and for M-step
//! bookkeeping that needs non-log lattices.

use crate::hmm::Hmm;
use crate::ndarray_utils::Array1FloatMut;
use ndarray::prelude::*;

fn validate(hmm: &Hmm, sequence: &Array2<f64>) {
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
}

/// Literal (unscaled) alpha/beta lattices.
#[derive(Debug)]
pub struct ForwardBackward {
    alpha: Array2<f64>,
    beta: Option<Array2<f64>>,
    probability: f64,
}

impl ForwardBackward {
    /// Run the recursions against `hmm` for one sequence. Pass
    /// `compute_beta = false` to skip the backward lattice when only a
    /// forward probability is needed.
    pub fn new(hmm: &Hmm, sequence: &Array2<f64>, compute_beta: bool) -> Self {
        validate(hmm, sequence);
        let t_len = sequence.nrows();
        let n = hmm.state_count();

        let mut alpha = Array2::<f64>::zeros((t_len, n));
        for i in 0..n {
            alpha[(0, i)] = hmm.pi()[i] * hmm.state(i).probability(sequence.row(0));
        }
        for t in 1..t_len {
            for j in 0..n {
                let mut reachable = 0.0;
                for i in 0..n {
                    reachable += alpha[(t - 1, i)] * hmm.transition()[(i, j)];
                }
                alpha[(t, j)] = reachable * hmm.state(j).probability(sequence.row(t));
            }
        }
        let probability = alpha.row(t_len - 1).sum();

        let beta = if compute_beta {
            let mut beta = Array2::<f64>::zeros((t_len, n));
            for i in 0..n {
                beta[(t_len - 1, i)] = 1.0;
            }
            for t in (0..t_len - 1).rev() {
                for i in 0..n {
                    let mut suffix = 0.0;
                    for j in 0..n {
                        suffix += hmm.transition()[(i, j)]
                            * hmm.state(j).probability(sequence.row(t + 1))
                            * beta[(t + 1, j)];
                    }
                    beta[(t, i)] = suffix;
                }
            }
            Some(beta)
        } else {
            None
        };

        Self {
            alpha,
            beta,
            probability,
        }
    }

    pub fn alpha(&self) -> &Array2<f64> {
        &self.alpha
    }

    /// Panics if the calculator was constructed with `compute_beta = false`.
    pub fn beta(&self) -> &Array2<f64> {
        self.beta
            .as_ref()
            .expect("backward lattice was skipped at construction")
    }

    /// $P(O) = \sum_i α_{T-1}(i)$
    pub fn probability(&self) -> f64 {
        self.probability
    }
}

/// Per-step renormalized alpha/beta lattices with a log-probability total.
///
/// Beta is divided by the same $c_t$ factors ($β_{T-1}(i) = 1/c_{T-1}$,
/// then $β_t \mathrel{/}= c_t$), which makes $\hat{α}_t(i) a_{ij} b_j(O_{t+1})
/// \hat{β}_{t+1}(j)$ equal the true ξ without dividing by $P(O)$: the whole
/// scale product cancels against $\prod_t c_t = P(O)$.
#[derive(Debug)]
pub struct ForwardBackwardScaled {
    alpha: Array2<f64>,
    beta: Option<Array2<f64>>,
    ln_scale: Array1<f64>,
    ln_probability: f64,
}

impl ForwardBackwardScaled {
    pub fn new(hmm: &Hmm, sequence: &Array2<f64>, compute_beta: bool) -> Self {
        validate(hmm, sequence);
        let t_len = sequence.nrows();
        let n = hmm.state_count();

        let mut alpha = Array2::<f64>::zeros((t_len, n));
        let mut scale = Array1::<f64>::zeros(t_len);
        for i in 0..n {
            alpha[(0, i)] = hmm.pi()[i] * hmm.state(i).probability(sequence.row(0));
        }
        scale[0] = alpha.row(0).sum();
        alpha.row_mut(0).nip("scaled α at t=0");
        for t in 1..t_len {
            for j in 0..n {
                let mut reachable = 0.0;
                for i in 0..n {
                    reachable += alpha[(t - 1, i)] * hmm.transition()[(i, j)];
                }
                alpha[(t, j)] = reachable * hmm.state(j).probability(sequence.row(t));
            }
            scale[t] = alpha.row(t).sum();
            alpha.row_mut(t).nip("scaled α");
        }
        let ln_scale = scale.mapv(f64::ln);
        let ln_probability = ln_scale.sum();

        let beta = if compute_beta {
            let mut beta = Array2::<f64>::zeros((t_len, n));
            for i in 0..n {
                beta[(t_len - 1, i)] = 1.0 / scale[t_len - 1];
            }
            for t in (0..t_len - 1).rev() {
                for i in 0..n {
                    let mut suffix = 0.0;
                    for j in 0..n {
                        suffix += hmm.transition()[(i, j)]
                            * hmm.state(j).probability(sequence.row(t + 1))
                            * beta[(t + 1, j)];
                    }
                    beta[(t, i)] = suffix / scale[t];
                }
            }
            Some(beta)
        } else {
            None
        };

        Self {
            alpha,
            beta,
            ln_scale,
            ln_probability,
        }
    }

    pub fn alpha(&self) -> &Array2<f64> {
        &self.alpha
    }

    /// Panics if the calculator was constructed with `compute_beta = false`.
    pub fn beta(&self) -> &Array2<f64> {
        self.beta
            .as_ref()
            .expect("backward lattice was skipped at construction")
    }

    /// $\ln c_t$ per time step.
    pub fn ln_scale(&self) -> &Array1<f64> {
        &self.ln_scale
    }

    /// $\ln P(O) = \sum_t \ln c_t$
    pub fn ln_probability(&self) -> f64 {
        self.ln_probability
    }
}
