//! Baum-Welch expectation-maximization over a set of training sequences.
//!
//! # Math
//!
//! One iteration runs forward-backward per sequence against the current
//! model, forms the sufficient statistics
//!
//! $$γ_t(i) = P(X_t = i | O) = \frac{α_t(i) β_t(i)}{\sum_j α_t(j) β_t(j)}$$
//!
//! $$ξ_t(i, j) = P(X_t = i, X_{t+1} = j | O) = \frac{α_t(i) a_{ij}
//! b_j(O_{t+1}) β_{t+1}(j)}{P(O)}$$
//!
//! and re-estimates every parameter in closed form:
//!
//! $$a_{ij}^* = \frac{\sum_t ξ_t(i, j)}{\sum_t γ_t(i)} \qquad
//! π_i^* = \overline{γ_0(i)} \text{ over sequences}$$
//!
//! with each state's emission refit against all observations weighted by its
//! γ column. The scaled variant uses the renormalized lattices and omits the
//! explicit division by $P(O)$; the per-step scale factors cancel against it
//! exactly (see the cancellation tests in `forward_backward`).
//!
//! An iteration never touches the current model: it builds a complete
//! replacement and swaps the reference at the end, so a model handed out for
//! scoring stays valid while training runs. Termination is the caller's
//! loop, by iteration count or by watching the training-set log likelihood.

use crate::forward_backward::{ForwardBackward, ForwardBackwardScaled};
use crate::hmm::Hmm;
use crate::ndarray_utils::Array1FloatMut;
use ndarray::prelude::*;
use ndarray::stack;

pub struct BaumWelch {
    hmm: Hmm,
    sequences: Vec<Array2<f64>>,
    scaled: bool,
    iterations: usize,
}

impl BaumWelch {
    /// Set up a trainer for `hmm` over `sequences`.
    ///
    /// `scaled` selects the underflow-resistant forward-backward variant and
    /// is the right choice for anything but short sequences.
    ///
    /// Panics if the training set is empty, any sequence is shorter than two
    /// observations, or dimensionalities disagree with the model.
    pub fn new(hmm: Hmm, sequences: Vec<Array2<f64>>, scaled: bool) -> Self {
        assert!(
            !sequences.is_empty(),
            "training set must contain at least one sequence"
        );
        for sequence in &sequences {
            assert!(
                sequence.nrows() >= 2,
                "every training sequence needs at least two observations"
            );
            assert_eq!(
                sequence.ncols(),
                hmm.dimensions(),
                "training observations have {} dimensions but the model expects {}",
                sequence.ncols(),
                hmm.dimensions()
            );
        }
        Self {
            hmm,
            sequences,
            scaled,
            iterations: 0,
        }
    }

    /// The current model. Unchanged by an in-flight iteration until the swap.
    pub fn hmm(&self) -> &Hmm {
        &self.hmm
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn into_hmm(self) -> Hmm {
        self.hmm
    }

    /// Total $\ln P$ of the training set under the current model. The usual
    /// quantity to monitor for a stopping criterion.
    pub fn ln_likelihood(&self) -> f64 {
        self.sequences
            .iter()
            .map(|sequence| self.hmm.ln_probability(sequence))
            .sum()
    }

    /// Run one EM iteration, replacing the current model.
    pub fn iteration(&mut self) {
        let n = self.hmm.state_count();
        let mut pi_acc = Array1::<f64>::zeros(n);
        let mut a_num = Array2::<f64>::zeros((n, n));
        let mut a_den = Array1::<f64>::zeros(n);
        let mut gammas: Vec<Array2<f64>> = Vec::with_capacity(self.sequences.len());

        for sequence in &self.sequences {
            if self.scaled {
                let fb = ForwardBackwardScaled::new(&self.hmm, sequence, true);
                // scale factors cancel: no division by P(O)
                accumulate(
                    &self.hmm,
                    sequence,
                    fb.alpha(),
                    fb.beta(),
                    1.0,
                    &mut a_num,
                    &mut a_den,
                    &mut pi_acc,
                    &mut gammas,
                );
            } else {
                let fb = ForwardBackward::new(&self.hmm, sequence, true);
                accumulate(
                    &self.hmm,
                    sequence,
                    fb.alpha(),
                    fb.beta(),
                    fb.probability(),
                    &mut a_num,
                    &mut a_den,
                    &mut pi_acc,
                    &mut gammas,
                );
            }
        }

        let mut transition = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            if a_den[i] > 0.0 {
                for j in 0..n {
                    transition[(i, j)] = a_num[(i, j)] / a_den[i];
                }
            } else {
                // state never occupied this iteration: keep the old row
                transition.row_mut(i).assign(&self.hmm.transition().row(i));
            }
        }

        let pi = pi_acc / self.sequences.len() as f64;

        let views: Vec<_> = self.sequences.iter().map(|s| s.view()).collect();
        let all_observations =
            stack(Axis(0), &views).expect("training sequences share dimensionality");
        let total_len = all_observations.nrows();

        let mut states = Vec::with_capacity(n);
        for i in 0..n {
            let mut weights = Array1::<f64>::zeros(total_len);
            let mut offset = 0;
            for gamma in &gammas {
                for t in 0..gamma.nrows() {
                    weights[offset + t] = gamma[(t, i)];
                }
                offset += gamma.nrows();
            }
            let weight_mass = weights.sum();
            if weight_mass > 0.0 {
                states.push(
                    self.hmm
                        .state(i)
                        .refit(all_observations.view(), &(weights / weight_mass)),
                );
            } else {
                // zero occupancy: keep the previous emission parameters
                states.push(self.hmm.state(i).clone());
            }
        }

        self.hmm = Hmm::from_parts(pi, transition, states);
        self.iterations += 1;
    }
}

/// Fold one sequence's lattices into the iteration accumulators.
///
/// `divisor` is $P(O)$ for the literal lattices and 1 for the scaled ones.
#[allow(clippy::too_many_arguments)]
fn accumulate(
    hmm: &Hmm,
    sequence: &Array2<f64>,
    alpha: &Array2<f64>,
    beta: &Array2<f64>,
    divisor: f64,
    a_num: &mut Array2<f64>,
    a_den: &mut Array1<f64>,
    pi_acc: &mut Array1<f64>,
    gammas: &mut Vec<Array2<f64>>,
) {
    let t_len = sequence.nrows();
    let n = hmm.state_count();

    // emission probabilities reused by every ξ term of a time step
    let emissions = Array2::from_shape_fn((t_len, n), |(t, j)| {
        hmm.state(j).probability(sequence.row(t))
    });

    let mut gamma = Array2::<f64>::zeros((t_len, n));
    for t in 0..t_len {
        for i in 0..n {
            gamma[(t, i)] = alpha[(t, i)] * beta[(t, i)];
        }
        gamma.row_mut(t).nip("γ");
    }

    for t in 0..t_len - 1 {
        for i in 0..n {
            for j in 0..n {
                a_num[(i, j)] += alpha[(t, i)] * hmm.transition()[(i, j)] * emissions[(t + 1, j)]
                    * beta[(t + 1, j)]
                    / divisor;
            }
            a_den[i] += gamma[(t, i)];
        }
    }

    *pi_acc += &gamma.row(0);
    gammas.push(gamma);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{DiscreteDistribution, StateDistribution};
    use crate::hmm::symbols;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// An asymmetric starting point; a fully uniform model is an EM fixed
    /// point and never moves.
    fn starting_model() -> Hmm {
        Hmm::from_parts(
            array![0.7, 0.3],
            array![[0.6, 0.4], [0.3, 0.7]],
            vec![
                DiscreteDistribution::new(vec![2], array![0.7, 0.3]).into(),
                DiscreteDistribution::new(vec![2], array![0.3, 0.7]).into(),
            ],
        )
    }

    fn training_set() -> Vec<Array2<f64>> {
        vec![
            symbols(&[0, 0, 1, 0, 0, 1, 0, 0]),
            symbols(&[0, 1, 0, 0, 1, 0]),
            symbols(&[0, 0, 0, 1, 0, 0, 1]),
        ]
    }

    fn assert_stochastic(hmm: &Hmm) {
        assert!((hmm.pi().sum() - 1.0).abs() < 1e-9);
        for row in hmm.transition().genrows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        for state in hmm.states() {
            if let StateDistribution::Discrete(d) = state {
                assert!((d.probabilities().sum() - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn parameters_stay_stochastic_across_iterations() {
        let mut trainer = BaumWelch::new(starting_model(), training_set(), true);
        assert_stochastic(trainer.hmm());
        for _ in 0..5 {
            trainer.iteration();
            assert_stochastic(trainer.hmm());
        }
        assert_eq!(5, trainer.iterations());
    }

    #[test]
    fn ln_likelihood_never_decreases() {
        let mut trainer = BaumWelch::new(starting_model(), training_set(), true);
        let mut previous = trainer.ln_likelihood();
        for _ in 0..8 {
            trainer.iteration();
            let current = trainer.ln_likelihood();
            assert!(
                current >= previous - 1e-9,
                "likelihood dropped from {} to {}",
                previous,
                current
            );
            previous = current;
        }
    }

    #[test]
    fn scaled_and_unscaled_variants_agree() {
        let mut scaled = BaumWelch::new(starting_model(), training_set(), true);
        let mut unscaled = BaumWelch::new(starting_model(), training_set(), false);
        for _ in 0..3 {
            scaled.iteration();
            unscaled.iteration();
        }
        let (s, u) = (scaled.hmm(), unscaled.hmm());
        for (a, b) in s.pi().iter().zip(u.pi().iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        for (a, b) in s.transition().iter().zip(u.transition().iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        for i in 0..2 {
            match (s.state(i), u.state(i)) {
                (StateDistribution::Discrete(ds), StateDistribution::Discrete(du)) => {
                    for (a, b) in ds.probabilities().iter().zip(du.probabilities().iter()) {
                        assert!((a - b).abs() < 1e-9);
                    }
                }
                _ => panic!("expected discrete states"),
            }
        }
    }

    #[test]
    fn unreachable_state_keeps_its_old_parameters() {
        // state 1 can never be entered: π_1 = 0 and a_01 = 0
        let hmm = Hmm::from_parts(
            array![1.0, 0.0],
            array![[1.0, 0.0], [0.5, 0.5]],
            vec![
                DiscreteDistribution::new(vec![2], array![0.8, 0.2]).into(),
                DiscreteDistribution::new(vec![2], array![0.1, 0.9]).into(),
            ],
        );
        let mut trainer = BaumWelch::new(hmm, vec![symbols(&[0, 1, 0])], true);
        trainer.iteration();
        let trained = trainer.hmm();
        assert_eq!(array![0.5, 0.5], trained.transition().row(1));
        match trained.state(1) {
            StateDistribution::Discrete(d) => {
                assert_eq!(&array![0.1, 0.9], d.probabilities());
            }
            _ => panic!("expected a discrete state"),
        }
    }

    #[test]
    fn published_model_is_unaffected_by_an_iteration() {
        let mut trainer = BaumWelch::new(starting_model(), training_set(), true);
        let published = trainer.hmm().clone();
        trainer.iteration();
        // the reader's copy still carries the pre-iteration parameters
        assert_eq!(&array![0.7, 0.3], published.pi());
        assert_ne!(published.pi(), trainer.hmm().pi());
    }

    #[test]
    fn training_improves_the_fit_to_sampled_data() {
        // draw data from a sharp model, train a vaguer one toward it
        let source = Hmm::from_parts(
            array![0.9, 0.1],
            array![[0.85, 0.15], [0.2, 0.8]],
            vec![
                DiscreteDistribution::new(vec![2], array![0.95, 0.05]).into(),
                DiscreteDistribution::new(vec![2], array![0.1, 0.9]).into(),
            ],
        );
        let mut rng = StdRng::seed_from_u64(1337);
        let sequences: Vec<Array2<f64>> = (0..4)
            .map(|_| {
                let ys: Vec<usize> = source
                    .sampler(&mut rng)
                    .take(40)
                    .map(|sample| sample.observation[0] as usize)
                    .collect();
                symbols(&ys)
            })
            .collect();

        let mut trainer = BaumWelch::new(starting_model(), sequences, true);
        let before = trainer.ln_likelihood();
        for _ in 0..20 {
            trainer.iteration();
        }
        assert!(trainer.ln_likelihood() > before);
    }

    #[test]
    fn gaussian_training_stays_well_formed() {
        let sequences = vec![
            array![[-1.1], [-0.9], [1.2], [0.8], [-1.0], [1.1]],
            array![[1.0], [0.9], [-1.2], [-0.8], [1.05], [-0.95]],
        ];
        let start = Hmm::from_parts(
            array![0.5, 0.5],
            array![[0.6, 0.4], [0.4, 0.6]],
            vec![
                crate::distribution::GaussianDistribution::new(array![-0.5], array![[1.0]]).into(),
                crate::distribution::GaussianDistribution::new(array![0.5], array![[1.0]]).into(),
            ],
        );
        let mut trainer = BaumWelch::new(start, sequences.clone(), true);
        let mut previous = trainer.ln_likelihood();
        for _ in 0..10 {
            trainer.iteration();
            let current = trainer.ln_likelihood();
            assert!(current.is_finite());
            assert!(current >= previous - 1e-9);
            previous = current;
        }
        assert_stochastic(trainer.hmm());
        // the two states drift toward the two observation clusters
        let means: Vec<f64> = trainer
            .hmm()
            .states()
            .iter()
            .map(|s| match s {
                StateDistribution::Gaussian(g) => g.mean()[0],
                _ => panic!("expected Gaussian states"),
            })
            .collect();
        assert!(means[0] < means[1]);
    }

    #[test]
    #[should_panic(expected = "at least two observations")]
    fn single_observation_sequences_fail_fast() {
        BaumWelch::new(starting_model(), vec![symbols(&[0])], true);
    }

    #[test]
    #[should_panic(expected = "at least one sequence")]
    fn empty_training_set_fails_fast() {
        BaumWelch::new(starting_model(), vec![], true);
    }
}
