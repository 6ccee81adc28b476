//! Convenience constructors for regression models.
//!
//! This layer sits on top of the graph API and never reaches into the
//! engine. It consumes an already-resolved predictor specification — a
//! design matrix, a response vector, and an inverse-link choice — the form
//! a formula front end hands over after parsing.
//!
//! The canonical graph, for an n×p design matrix `X` and response `y`:
//!
//! ```text
//! sigma ~ HalfCauchy(0, 1)            (identity link only)
//! beta  ~ MvNormalDiag(0, sigma)      (conditional on sigma)
//! y_hat = inverse_link(X @ beta)
//! y     ~ Normal(y_hat, sigma)        or Bernoulli(y_hat)
//! ```

use ndarray::{Array1, Array2};

use crate::distributions::{Bernoulli, HalfCauchy, MvNormalDiag, Normal};
use crate::error::GraphError;
use crate::graph::Builder;
use crate::model::Model;
use crate::node::{Args, Dep, Node};
use crate::value::Value;

/// Inverse-link function applied to the linear predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InverseLink {
    /// Gaussian likelihood on the identity scale.
    Identity,
    /// Logistic inverse link with a Bernoulli likelihood.
    Logistic,
}

/// A resolved predictor specification ready to be wired into a graph.
pub struct RegressionSpec {
    design: Array2<f64>,
    response: Array1<f64>,
    link: InverseLink,
    /// Prior scale for the coefficients under the logistic link, where no
    /// sigma parameter exists to condition on.
    coef_scale: f64,
}

impl RegressionSpec {
    pub fn new(design: Array2<f64>, response: Array1<f64>) -> Self {
        Self {
            design,
            response,
            link: InverseLink::Identity,
            coef_scale: 2.5,
        }
    }

    pub fn with_link(mut self, link: InverseLink) -> Self {
        self.link = link;
        self
    }

    pub fn with_coef_scale(mut self, scale: f64) -> Self {
        self.coef_scale = scale;
        self
    }

    /// Wire the spec into a compiled model.
    pub fn build(self) -> Result<Model, GraphError> {
        let n = self.design.nrows();
        let p = self.design.ncols();
        if self.response.len() != n {
            return Err(GraphError::Numeric(format!(
                "design matrix has {} rows but the response has {} entries",
                n,
                self.response.len()
            )));
        }

        let link = self.link;
        let design = self.design;
        let beta_loc = Node::constant("beta_loc", 0.0);

        let mut builder = Builder::new();

        let (beta_scale, noise) = match link {
            InverseLink::Identity => {
                let loc = Node::constant("sigma_loc", 0.0);
                let scale = Node::constant("sigma_scale", 1.0);
                let sigma = Node::parameter_with_prior(
                    "sigma",
                    1.0,
                    HalfCauchy,
                    [Dep::from(&loc), Dep::from(&scale)],
                );
                (Dep::from(&sigma), Some(sigma))
            }
            InverseLink::Logistic => {
                let scale = Node::constant("beta_scale", self.coef_scale);
                (Dep::from(&scale), None)
            }
        };

        let beta = Node::parameter_with_prior(
            "beta",
            Array1::zeros(p),
            MvNormalDiag,
            [Dep::from(&beta_loc), beta_scale],
        );

        let y_hat = Node::calculated(
            "y_hat",
            [("beta", Dep::from(&beta))],
            move |args: &Args<'_>| {
                let beta = args.vector("beta")?;
                let eta = design.dot(beta);
                Ok(match link {
                    InverseLink::Identity => Value::Vector(eta),
                    InverseLink::Logistic => {
                        Value::Vector(eta.mapv(|e| 1.0 / (1.0 + (-e).exp())))
                    }
                })
            },
        );

        let y = match (&noise, link) {
            (Some(sigma), InverseLink::Identity) => Node::observed(
                "y",
                self.response,
                Normal,
                [Dep::from(&y_hat), Dep::from(sigma)],
            ),
            _ => Node::observed("y", self.response, Bernoulli, [Dep::from(&y_hat)]),
        };

        builder.add(y)?;
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::transform_auto;
    use crate::value::Position;
    use std::sync::Arc;

    const LN_TAU: f64 = 1.837_877_066_409_345_3;

    /// Deterministic 100×3 design matrix and response used across tests.
    fn fixture() -> (Array2<f64>, Array1<f64>) {
        let n = 100;
        let x = Array2::from_shape_fn((n, 3), |(i, j)| {
            ((i * 3 + j) as f64 * 0.37).sin()
        });
        let y = Array1::from_shape_fn(n, |i| (i as f64 * 0.11).cos());
        (x, y)
    }

    #[test]
    fn gaussian_regression_density_decomposes_additively() {
        let (x, y) = fixture();
        let model = RegressionSpec::new(x, y.clone()).build().unwrap();

        let eval = model
            .evaluate(
                &Position::new()
                    .with("sigma", 1.0)
                    .with("beta", vec![0.0, 0.0, 0.0]),
            )
            .unwrap();

        // sigma prior: half-Cauchy(0, 1) at 1.0 is -ln π.
        let sigma_term = -std::f64::consts::PI.ln();
        // beta prior: three standard-normal zeros.
        let beta_term = 3.0 * (-0.5 * LN_TAU);
        // likelihood: Normal(y_i | 0, 1).
        let lik_term: f64 = y.iter().map(|yi| -0.5 * yi * yi - 0.5 * LN_TAU).sum();
        let expected = sigma_term + beta_term + lik_term;

        assert!(eval.log_density.is_finite());
        assert!(
            (eval.log_density - expected).abs() < 1e-9,
            "got {}, expected {}",
            eval.log_density,
            expected
        );

        // The linear predictor at beta = 0 is identically zero.
        let y_hat = eval.value("y_hat").unwrap().as_vector().unwrap();
        assert_eq!(y_hat.len(), 100);
        assert!(y_hat.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn transformed_sigma_preserves_the_constrained_scale() {
        let (x, y) = fixture();
        let mut model = RegressionSpec::new(x, y).build().unwrap();

        let loose = model.decompose().unwrap();
        let sigma = loose.iter().find(|n| n.name() == "sigma").unwrap();
        let t = transform_auto(sigma).unwrap();

        let mut builder = Builder::new();
        for node in loose.iter().filter(|n| n.name() != "sigma") {
            builder.add(Arc::clone(node)).unwrap();
        }
        for node in t.into_nodes() {
            builder.add(node).unwrap();
        }
        let rebuilt = builder.build().unwrap();

        // Unconstrained sigma_raw = log(1.0) = 0 must reproduce sigma = 1.
        let eval = rebuilt
            .evaluate(
                &Position::new()
                    .with("sigma_raw", 0.0)
                    .with("beta", vec![0.0, 0.0, 0.0]),
            )
            .unwrap();
        let sigma_val = eval.value("sigma").unwrap().as_scalar().unwrap();
        assert!((sigma_val - 1.0).abs() < 1e-6);
        assert!(eval.log_density.is_finite());

        // sigma is now derived, not a free parameter.
        let params = rebuilt.parameter_names();
        assert!(params.contains(&"sigma_raw"));
        assert!(!params.contains(&"sigma"));
    }

    #[test]
    fn logistic_regression_builds_and_evaluates() {
        let n = 20;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i + j) as f64 * 0.29).sin());
        let y = Array1::from_shape_fn(n, |i| if i % 3 == 0 { 1.0 } else { 0.0 });

        let model = RegressionSpec::new(x, y)
            .with_link(InverseLink::Logistic)
            .build()
            .unwrap();

        let eval = model
            .evaluate(&Position::new().with("beta", vec![0.0, 0.0]))
            .unwrap();
        // p = 0.5 everywhere: likelihood is n * ln(1/2).
        let lik = n as f64 * 0.5f64.ln();
        let prior = 2.0 * (-0.5 * LN_TAU - 2.5f64.ln());
        assert!((eval.log_density - (lik + prior)).abs() < 1e-9);
        assert_eq!(model.parameter_names(), vec!["beta"]);
    }

    #[test]
    fn mismatched_response_length_is_rejected() {
        let x = Array2::zeros((10, 2));
        let y = Array1::zeros(9);
        assert!(matches!(
            RegressionSpec::new(x, y).build(),
            Err(GraphError::Numeric(_))
        ));
    }
}
