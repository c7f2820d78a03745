//! Observation-emission models for the hidden states.
//!
//! Each hidden state owns one emission model. The two families are a
//! categorical table over one or more symbol dimensions and a single
//! multivariate Gaussian. Both answer the same three questions: how likely is
//! an observation under this state, what do the parameters become after a
//! weighted maximum-likelihood refit, and what does a random draw look like.

use crate::ndarray_utils::Array1FloatMut;
use ndarray::prelude::*;
use rand::Rng;
use spectral::prelude::*;
use std::f64::consts::PI;

/// Diagonal jitter levels tried when a weighted covariance estimate is not
/// positive definite. Matches the usual progressive-regularization ladder.
const COVARIANCE_JITTER: [f64; 5] = [0.0, 1e-10, 1e-8, 1e-6, 1e-4];

/// The emission model of one hidden state.
///
/// A model's family is a property of the variant: a discrete model is one
/// whose states are all `Discrete`, so an inconsistent mix of families cannot
/// be represented at the state level and is rejected at the model level.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum StateDistribution {
    Discrete(DiscreteDistribution),
    Gaussian(GaussianDistribution),
}

impl StateDistribution {
    /// $b_i(o)$: the probability (or density, for the Gaussian family) of one
    /// observation under this state. Always non-negative; a density may
    /// exceed 1.
    pub fn probability(&self, observation: ArrayView1<f64>) -> f64 {
        match self {
            StateDistribution::Discrete(d) => d.probability(observation),
            StateDistribution::Gaussian(g) => g.probability(observation),
        }
    }

    /// Weighted maximum-likelihood re-estimate, returning a new value.
    ///
    /// The weight for row `t` is the responsibility assigned to this state at
    /// time `t`. If the total weight mass is numerically zero the current
    /// parameters are kept unchanged instead of producing NaN.
    pub fn refit(&self, observations: ArrayView2<f64>, weights: &Array1<f64>) -> StateDistribution {
        match self {
            StateDistribution::Discrete(d) => {
                StateDistribution::Discrete(d.refit(observations, weights))
            }
            StateDistribution::Gaussian(g) => {
                StateDistribution::Gaussian(g.refit(observations, weights))
            }
        }
    }

    /// Draw one observation from this state.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        match self {
            StateDistribution::Discrete(d) => d.sample(rng),
            StateDistribution::Gaussian(g) => g.sample(rng),
        }
    }

    /// Dimensionality of the observations this state emits.
    pub fn dimensions(&self) -> usize {
        match self {
            StateDistribution::Discrete(d) => d.items().len(),
            StateDistribution::Gaussian(g) => g.dimensions(),
        }
    }

    pub fn is_discrete(&self) -> bool {
        match self {
            StateDistribution::Discrete(_) => true,
            StateDistribution::Gaussian(_) => false,
        }
    }
}

impl From<DiscreteDistribution> for StateDistribution {
    fn from(d: DiscreteDistribution) -> Self {
        StateDistribution::Discrete(d)
    }
}

impl From<GaussianDistribution> for StateDistribution {
    fn from(g: GaussianDistribution) -> Self {
        StateDistribution::Gaussian(g)
    }
}

/// A categorical emission table over one or more symbol dimensions.
///
/// `items[k]` is the alphabet size of dimension `k`. The table is flattened
/// with dimension 0 varying fastest: the cell for symbols $(y_0, \ldots,
/// y_{D-1})$ sits at $\sum_k y_k s_k$ where $s_0 = 1$ and $s_{k+1} = s_k
/// \cdot \mathrm{items}[k]$. Observations carry symbols as floats so both
/// emission families share one sequence type.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscreteDistribution {
    items: Vec<usize>,
    probabilities: Array1<f64>,
}

impl DiscreteDistribution {
    /// Panics if the table shape does not match `items` or the table is not a
    /// probability distribution.
    pub fn new(items: Vec<usize>, probabilities: Array1<f64>) -> Self {
        asserting("at least one symbol dimension")
            .that(&items.len())
            .is_greater_than(0);
        for &extent in &items {
            asserting("every symbol dimension needs a positive alphabet size")
                .that(&extent)
                .is_greater_than(0);
        }
        let cells: usize = items.iter().product();
        assert_eq!(
            cells,
            probabilities.len(),
            "probability table must have one cell per symbol combination"
        );
        for p in &probabilities {
            assert_that(p).is_greater_than_or_equal_to(0.0);
        }
        asserting("probability table must sum to 1")
            .that(&probabilities.sum())
            .is_close_to(1.0, crate::TOLERANCE);
        Self {
            items,
            probabilities,
        }
    }

    /// A uniform table, the default for a freshly constructed discrete model.
    pub fn uniform(items: Vec<usize>) -> Self {
        let cells: usize = items.iter().product();
        let probabilities = Array1::from_elem(cells, 1.0 / cells as f64);
        Self::new(items, probabilities)
    }

    pub fn items(&self) -> &[usize] {
        &self.items
    }

    pub fn probabilities(&self) -> &Array1<f64> {
        &self.probabilities
    }

    fn flat_index(&self, observation: ArrayView1<f64>) -> usize {
        assert_eq!(
            observation.len(),
            self.items.len(),
            "observation has {} dimensions but this state expects {}",
            observation.len(),
            self.items.len()
        );
        let mut index = 0;
        let mut stride = 1;
        for (k, &extent) in self.items.iter().enumerate() {
            let symbol = observation[k];
            assert!(
                symbol >= 0.0 && (symbol as usize) < extent,
                "symbol {} out of range for dimension {} (alphabet size {})",
                symbol,
                k,
                extent
            );
            index += (symbol as usize) * stride;
            stride *= extent;
        }
        index
    }

    pub fn probability(&self, observation: ArrayView1<f64>) -> f64 {
        self.probabilities[self.flat_index(observation)]
    }

    /// Weighted relative frequencies. Zero total weight keeps the old table.
    pub fn refit(&self, observations: ArrayView2<f64>, weights: &Array1<f64>) -> Self {
        assert_eq!(
            observations.nrows(),
            weights.len(),
            "one weight per observation required"
        );
        let weight_mass = weights.sum();
        if !(weight_mass > 0.0) {
            return self.clone();
        }
        let mut table = Array1::zeros(self.probabilities.len());
        for (row, &w) in observations.genrows().into_iter().zip(weights.iter()) {
            table[self.flat_index(row)] += w;
        }
        Self {
            items: self.items.clone(),
            probabilities: table.normalize("discrete refit"),
        }
    }

    /// Draw one symbol vector by walking the cumulative table.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let u = rng.gen::<f64>();
        let mut cumulative = 0.0;
        let mut index = self.probabilities.len() - 1;
        for (i, &p) in self.probabilities.iter().enumerate() {
            cumulative += p;
            if u < cumulative {
                index = i;
                break;
            }
        }
        let mut observation = Array1::zeros(self.items.len());
        let mut stride = 1;
        for (k, &extent) in self.items.iter().enumerate() {
            observation[k] = ((index / stride) % extent) as f64;
            stride *= extent;
        }
        observation
    }
}

/// A single multivariate Gaussian emission: mean vector plus covariance.
///
/// The lower Cholesky factor and the log-determinant of the covariance are
/// cached so density evaluation is one forward substitution.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct GaussianDistribution {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    chol_lower: Array2<f64>,
    ln_det: f64,
}

impl GaussianDistribution {
    /// Panics if the covariance is not square of the mean's dimension or not
    /// positive definite.
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Self {
        asserting("mean must have at least one dimension")
            .that(&mean.len())
            .is_greater_than(0);
        assert_eq!(
            covariance.nrows(),
            mean.len(),
            "covariance must be d×d for a d-dimensional mean"
        );
        assert_eq!(covariance.ncols(), mean.len(), "covariance must be square");
        let chol_lower = match cholesky(&covariance) {
            Some(lower) => lower,
            None => panic!("covariance must be positive definite"),
        };
        let ln_det = ln_determinant(&chol_lower);
        Self {
            mean,
            covariance,
            chol_lower,
            ln_det,
        }
    }

    /// Zero mean, identity covariance: the default for a fresh continuous
    /// model.
    pub fn standard(dimensions: usize) -> Self {
        Self::new(Array1::zeros(dimensions), Array2::eye(dimensions))
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn dimensions(&self) -> usize {
        self.mean.len()
    }

    /// Log density: $-\frac{1}{2}(d \ln 2π + \ln|Σ| + z^\top z)$ where
    /// $L z = x - μ$.
    pub fn ln_probability(&self, observation: ArrayView1<f64>) -> f64 {
        assert_eq!(
            observation.len(),
            self.dimensions(),
            "observation has {} dimensions but this state expects {}",
            observation.len(),
            self.dimensions()
        );
        let centered = observation.to_owned() - &self.mean;
        let z = forward_substitute(&self.chol_lower, &centered);
        let d = self.dimensions() as f64;
        -0.5 * (d * (2.0 * PI).ln() + self.ln_det + z.dot(&z))
    }

    pub fn probability(&self, observation: ArrayView1<f64>) -> f64 {
        self.ln_probability(observation).exp()
    }

    /// Weighted mean and covariance. Zero total weight keeps the old
    /// parameters, as does a weighted covariance that stays non-positive
    /// definite through every jitter level.
    pub fn refit(&self, observations: ArrayView2<f64>, weights: &Array1<f64>) -> Self {
        assert_eq!(
            observations.nrows(),
            weights.len(),
            "one weight per observation required"
        );
        assert_eq!(
            observations.ncols(),
            self.dimensions(),
            "observations must match this state's dimensionality"
        );
        let weight_mass = weights.sum();
        if !(weight_mass > 0.0) {
            return self.clone();
        }

        let d = self.dimensions();
        let mut mean = Array1::<f64>::zeros(d);
        for (row, &w) in observations.genrows().into_iter().zip(weights.iter()) {
            mean.scaled_add(w, &row);
        }
        mean /= weight_mass;

        let mut covariance = Array2::<f64>::zeros((d, d));
        for (row, &w) in observations.genrows().into_iter().zip(weights.iter()) {
            let centered = row.to_owned() - &mean;
            for i in 0..d {
                for j in 0..d {
                    covariance[(i, j)] += w * centered[i] * centered[j];
                }
            }
        }
        covariance /= weight_mass;

        for &jitter in COVARIANCE_JITTER.iter() {
            let mut candidate = covariance.clone();
            for i in 0..d {
                candidate[(i, i)] += jitter;
            }
            if let Some(lower) = cholesky(&candidate) {
                let ln_det = ln_determinant(&lower);
                return Self {
                    mean,
                    covariance: candidate,
                    chol_lower: lower,
                    ln_det,
                };
            }
        }
        self.clone()
    }

    /// Draw one observation: $x = μ + L z$ with $z$ standard normal.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let z = Array1::from_shape_fn(self.dimensions(), |_| standard_normal(rng));
        &self.mean + &self.chol_lower.dot(&z)
    }
}

/// Lower Cholesky factor, or `None` if the matrix is not positive definite.
fn cholesky(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let d = matrix.nrows();
    let mut lower = Array2::<f64>::zeros((d, d));
    for i in 0..d {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += lower[(i, k)] * lower[(j, k)];
            }
            if i == j {
                let diagonal = matrix[(i, i)] - sum;
                if diagonal <= 0.0 || !diagonal.is_finite() {
                    return None;
                }
                lower[(i, j)] = diagonal.sqrt();
            } else {
                lower[(i, j)] = (matrix[(i, j)] - sum) / lower[(j, j)];
            }
        }
    }
    Some(lower)
}

fn ln_determinant(chol_lower: &Array2<f64>) -> f64 {
    2.0 * chol_lower.diag().iter().map(|x| x.ln()).sum::<f64>()
}

fn forward_substitute(lower: &Array2<f64>, rhs: &Array1<f64>) -> Array1<f64> {
    let d = rhs.len();
    let mut solution = Array1::<f64>::zeros(d);
    for i in 0..d {
        let mut value = rhs[i];
        for k in 0..i {
            value -= lower[(i, k)] * solution[k];
        }
        solution[i] = value / lower[(i, i)];
    }
    solution
}

/// Box-Muller transform over the rng's uniform floats.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
