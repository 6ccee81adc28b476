//! Reference sampling engine.
//!
//! The model is consumed purely as a density oracle: the engine reads the
//! free parameter names, extracts a starting position, and calls
//! `evaluate` on proposed positions. This module provides a random-walk
//! Metropolis driver over that interface; proposal mechanics beyond that
//! (gradient-based trajectories, adaptation schedules) belong to external
//! engines and are deliberately absent.
//!
//! Chains run in parallel over a shared model. Each chain gets a
//! deterministic RNG seeded from `config.seed + chain_index`, so results
//! are reproducible regardless of thread scheduling. A proposal with a
//! non-finite log-density is rejected, never treated as fatal.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::Distribution as _;
use rayon::prelude::*;

use crate::error::GraphError;
use crate::model::Model;
use crate::value::{Position, Value};

/// Configuration for the multi-chain Metropolis engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub num_chains: usize,
    pub num_draws: usize,
    pub num_warmup: usize,
    /// Standard deviation of the Gaussian random-walk proposal.
    pub step_size: f64,
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_chains: 4,
            num_draws: 1000,
            num_warmup: 500,
            step_size: 0.5,
            seed: 42,
        }
    }
}

/// Posterior draws across all chains, in flattened parameter layout.
#[derive(Debug, Clone)]
pub struct SampleResult {
    /// samples[chain][draw][flat_param]
    pub samples: Vec<Vec<Vec<f64>>>,
    pub accept_rates: Vec<f64>,
    /// One entry per flattened coordinate: `beta` of length 3 contributes
    /// `beta[0]`, `beta[1]`, `beta[2]`.
    pub coord_names: Vec<String>,
}

impl SampleResult {
    /// Posterior mean per flattened coordinate, pooled across chains.
    pub fn mean(&self) -> Vec<f64> {
        let dim = self.coord_names.len();
        let mut sums = vec![0.0; dim];
        let mut count = 0usize;
        for chain in &self.samples {
            for draw in chain {
                for (s, v) in sums.iter_mut().zip(draw.iter()) {
                    *s += v;
                }
                count += 1;
            }
        }
        sums.iter().map(|s| s / count as f64).collect()
    }

    /// Posterior standard deviation per flattened coordinate.
    pub fn std(&self) -> Vec<f64> {
        let means = self.mean();
        let dim = self.coord_names.len();
        let mut sum_sq = vec![0.0; dim];
        let mut count = 0usize;
        for chain in &self.samples {
            for draw in chain {
                for (i, v) in draw.iter().enumerate() {
                    let diff = v - means[i];
                    sum_sq[i] += diff * diff;
                }
                count += 1;
            }
        }
        sum_sq.iter().map(|s| (s / count as f64).sqrt()).collect()
    }
}

/// Mapping between the model's named position and the engine's flat
/// coordinate vector.
struct Layout {
    entries: Vec<(String, usize, bool)>, // name, length, is_scalar
    coord_names: Vec<String>,
}

impl Layout {
    fn of(model: &Model) -> Result<Layout, GraphError> {
        let names = model.parameter_names();
        let start = model.extract_position(&names)?;
        let mut entries = Vec::with_capacity(names.len());
        let mut coord_names = Vec::new();
        for name in names {
            let value = start.get(name).ok_or_else(|| {
                GraphError::UnknownParameter(name.to_string())
            })?;
            match value {
                Value::Scalar(_) => {
                    entries.push((name.to_string(), 1, true));
                    coord_names.push(name.to_string());
                }
                Value::Vector(v) => {
                    entries.push((name.to_string(), v.len(), false));
                    for i in 0..v.len() {
                        coord_names.push(format!("{}[{}]", name, i));
                    }
                }
                Value::Matrix(_) => {
                    return Err(GraphError::Numeric(format!(
                        "parameter {} is matrix-valued; the engine samples scalars and vectors",
                        name
                    )))
                }
            }
        }
        Ok(Layout {
            entries,
            coord_names,
        })
    }

    fn dim(&self) -> usize {
        self.entries.iter().map(|(_, len, _)| len).sum()
    }

    fn flatten(&self, position: &Position) -> Result<Vec<f64>, GraphError> {
        let mut flat = Vec::with_capacity(self.dim());
        for (name, _, is_scalar) in &self.entries {
            let value = position
                .get(name)
                .ok_or_else(|| GraphError::UnknownParameter(name.clone()))?;
            if *is_scalar {
                flat.push(value.as_scalar()?);
            } else {
                flat.extend(value.as_vector()?.iter().copied());
            }
        }
        Ok(flat)
    }

    fn unflatten(&self, flat: &[f64]) -> Position {
        let mut position = Position::new();
        let mut at = 0;
        for (name, len, is_scalar) in &self.entries {
            if *is_scalar {
                position.insert(name.clone(), flat[at]);
            } else {
                position.insert(name.clone(), flat[at..at + len].to_vec());
            }
            at += len;
        }
        position
    }
}

struct ChainResult {
    samples: Vec<Vec<f64>>,
    accept_rate: f64,
}

fn run_chain(
    model: &Model,
    layout: &Layout,
    config: &EngineConfig,
    rng: &mut ChaCha8Rng,
) -> Result<ChainResult, GraphError> {
    let names = model.parameter_names();
    let mut q = layout.flatten(&model.extract_position(&names)?)?;
    let mut logp = model.evaluate(&layout.unflatten(&q))?.log_density;

    let total_iters = config.num_warmup + config.num_draws;
    let mut samples = Vec::with_capacity(config.num_draws);
    let mut accepted = 0u64;
    let mut total = 0u64;

    for iter in 0..total_iters {
        let mut proposal = q.clone();
        for qi in &mut proposal {
            let step: f64 = rand_distr::StandardNormal.sample(rng);
            *qi += config.step_size * step;
        }

        let logp_prop = model.evaluate(&layout.unflatten(&proposal))?.log_density;
        let log_ratio = logp_prop - logp;

        total += 1;
        // -inf proposals give log_ratio = -inf and are always rejected; a
        // chain stuck at -inf accepts any finite proposal.
        let accept = if logp_prop.is_finite() {
            !logp.is_finite() || rng.gen::<f64>().ln() < log_ratio
        } else {
            false
        };
        if accept {
            q = proposal;
            logp = logp_prop;
            accepted += 1;
        }

        if iter >= config.num_warmup {
            samples.push(q.clone());
        }
    }

    Ok(ChainResult {
        samples,
        accept_rate: accepted as f64 / total as f64,
    })
}

/// Run parallel Metropolis chains against the model.
pub fn sample(model: &Model, config: &EngineConfig) -> Result<SampleResult, GraphError> {
    let layout = Layout::of(model)?;

    let results: Vec<ChainResult> = (0..config.num_chains)
        .into_par_iter()
        .map(|chain_idx| {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed + chain_idx as u64);
            run_chain(model, &layout, config, &mut rng)
        })
        .collect::<Result<_, GraphError>>()?;

    Ok(SampleResult {
        samples: results.iter().map(|r| r.samples.clone()).collect(),
        accept_rates: results.iter().map(|r| r.accept_rate).collect(),
        coord_names: layout.coord_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{HalfCauchy, Normal};
    use crate::graph::Builder;
    use crate::node::{Dep, Node};

    fn conjugate_normal_model(observations: Vec<f64>) -> Model {
        // mu ~ Normal(0, 1); y_i ~ Normal(mu, 1)
        let zero = Node::constant("zero", 0.0);
        let one = Node::constant("one", 1.0);
        let mu = Node::parameter_with_prior("mu", 0.0, Normal, [Dep::from(&zero), Dep::from(&one)]);
        let y = Node::observed("y", observations, Normal, [Dep::from(&mu), Dep::from(&one)]);
        let mut b = Builder::new();
        b.add(y).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn recovers_conjugate_posterior_mean() {
        let obs = vec![1.0, 1.2, 0.8, 1.1, 0.9, 1.0, 1.05, 0.95];
        let n = obs.len() as f64;
        let ybar = obs.iter().sum::<f64>() / n;
        // Known posterior: mean = n ȳ / (n + 1)
        let expected = n * ybar / (n + 1.0);

        let model = conjugate_normal_model(obs);
        let result = sample(
            &model,
            &EngineConfig {
                num_chains: 4,
                num_draws: 2000,
                num_warmup: 500,
                step_size: 0.6,
                seed: 42,
            },
        )
        .unwrap();

        assert_eq!(result.coord_names, vec!["mu"]);
        let mean = result.mean()[0];
        assert!(
            (mean - expected).abs() < 0.1,
            "posterior mean {} vs expected {}",
            mean,
            expected
        );
        for rate in &result.accept_rates {
            assert!(*rate > 0.05 && *rate < 0.95);
        }
    }

    #[test]
    fn same_seed_reproduces_the_run() {
        let model = conjugate_normal_model(vec![0.5, 1.5, 1.0]);
        let config = EngineConfig {
            num_chains: 2,
            num_draws: 50,
            num_warmup: 20,
            ..EngineConfig::default()
        };
        let a = sample(&model, &config).unwrap();
        let b = sample(&model, &config).unwrap();
        assert_eq!(a.samples, b.samples);
    }

    #[test]
    fn vector_parameters_flatten_into_named_coordinates() {
        let zero = Node::constant("zero", 0.0);
        let one = Node::constant("one", 1.0);
        let beta = Node::parameter_with_prior(
            "beta",
            vec![0.0, 0.0],
            crate::distributions::MvNormalDiag,
            [Dep::from(&zero), Dep::from(&one)],
        );
        let mut b = Builder::new();
        b.add(beta).unwrap();
        let model = b.build().unwrap();

        let result = sample(
            &model,
            &EngineConfig {
                num_chains: 1,
                num_draws: 20,
                num_warmup: 10,
                ..EngineConfig::default()
            },
        )
        .unwrap();
        assert_eq!(result.coord_names, vec!["beta[0]", "beta[1]"]);
        assert_eq!(result.samples[0][0].len(), 2);
    }

    #[test]
    fn chains_escape_a_neg_inf_start() {
        // sigma starts outside the half-Cauchy support; the first finite
        // proposal must be accepted and the chain must keep moving.
        let loc = Node::constant("loc", 0.0);
        let scale = Node::constant("scale", 1.0);
        let sigma = Node::parameter_with_prior(
            "sigma",
            -1.0,
            HalfCauchy,
            [Dep::from(&loc), Dep::from(&scale)],
        );
        let mut b = Builder::new();
        b.add(sigma).unwrap();
        let model = b.build().unwrap();

        let result = sample(
            &model,
            &EngineConfig {
                num_chains: 1,
                num_draws: 200,
                num_warmup: 100,
                step_size: 1.0,
                seed: 3,
            },
        )
        .unwrap();
        let final_draw = result.samples[0].last().unwrap()[0];
        assert!(final_draw >= 0.0);
        assert!(result.accept_rates[0] > 0.0);
    }
}
