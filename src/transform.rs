//! Reparameterization: rewriting a constrained parameter onto an
//! unconstrained scale.
//!
//! `transform` splits a parameter into two nodes. The unconstrained
//! parameter `{name}_raw` carries the original prior pulled back through
//! the bijector (base density at `forward(raw)` plus the Jacobian
//! log-determinant, so the transformed model's density is mathematically
//! equivalent). A calculated node keeps the original name and applies
//! `forward`, so every downstream by-name reference rebinds to the mapped
//! value unchanged. The usual flow is decompose → drop the old parameter →
//! add both replacement nodes → rebuild.

use std::sync::Arc;

use rand::RngCore;

use crate::bijectors::{bijector_for, Bijector};
use crate::distributions::{Distribution, Support};
use crate::error::GraphError;
use crate::node::{Args, Calculation, DistSpec, Node, NodeKind, NodeRef};
use crate::value::Value;

/// The node pair produced by a reparameterization.
pub struct Transformed {
    /// Unconstrained parameter named `{original}_raw`.
    pub raw: NodeRef,
    /// Calculated node carrying the original name; applies the bijector's
    /// forward map to `raw`.
    pub mapped: NodeRef,
}

impl Transformed {
    pub fn into_nodes(self) -> [NodeRef; 2] {
        [self.raw, self.mapped]
    }
}

/// A base distribution pulled back through a bijector onto the
/// unconstrained scale. The density picks up the Jacobian correction;
/// sampling draws from the base and maps the draw back.
pub struct TransformedPrior {
    base: Arc<dyn Distribution>,
    bijector: Arc<dyn Bijector>,
}

impl Distribution for TransformedPrior {
    fn name(&self) -> &'static str {
        "transformed"
    }

    fn support(&self) -> Support {
        Support::Real
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        let constrained = self.bijector.forward(value)?;
        Ok(self.base.log_density(&constrained, args)? + self.bijector.log_det_jacobian(value)?)
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        let draw = self.base.sample(args, rng)?;
        self.bijector.inverse(&draw)
    }
}

struct ForwardMap {
    bijector: Arc<dyn Bijector>,
}

impl Calculation for ForwardMap {
    fn apply(&self, args: &Args<'_>) -> Result<Value, GraphError> {
        self.bijector.forward(args.get("raw")?)
    }
}

fn unsupported(node: &Node, reason: impl Into<String>) -> GraphError {
    GraphError::UnsupportedTransform {
        node: node.name().to_string(),
        reason: reason.into(),
    }
}

/// Reparameterize `node` through `bijector`.
///
/// `node` must be a parameter with a prior over a continuous domain. The
/// returned unconstrained value satisfies `bijector.forward(raw) ==
/// original` up to floating-point round-trip error.
pub fn transform(node: &Node, bijector: Arc<dyn Bijector>) -> Result<Transformed, GraphError> {
    let (value, prior) = match node.kind() {
        NodeKind::Parameter {
            value,
            prior: Some(prior),
        } => (value, prior),
        NodeKind::Parameter { prior: None, .. } => {
            return Err(unsupported(node, "parameter has no prior, so its domain is undefined"))
        }
        _ => return Err(unsupported(node, "only parameters can be reparameterized")),
    };

    if prior.dist.support() == Support::Discrete {
        return Err(unsupported(node, "discrete support has no unconstraining bijector"));
    }

    let raw_value = bijector.inverse(value)?;
    let raw_name = format!("{}_raw", node.name());

    let raw = Node::parameter_with_spec(
        raw_name.clone(),
        raw_value,
        DistSpec::new(
            Arc::new(TransformedPrior {
                base: Arc::clone(&prior.dist),
                bijector: Arc::clone(&bijector),
            }),
            prior.args.iter().map(|d| d.detached()).collect(),
        ),
    );

    let mapped = Node::calculated_arc(
        node.name(),
        [("raw".to_string(), crate::node::Dep::Name(raw_name))],
        Arc::new(ForwardMap { bijector }) as Arc<dyn Calculation>,
    );

    Ok(Transformed { raw, mapped })
}

/// Reparameterize `node` with the canonical bijector for its prior's
/// support. Fails for `Real` (nothing to unconstrain) and `Discrete`.
///
/// The choice looks only at the support category, which carries no
/// location: a half distribution with a nonzero location gets the plain
/// exp map, whose image below the location the prior assigns zero mass.
/// Pass [`ShiftedExp`](crate::bijectors::ShiftedExp) to [`transform`]
/// explicitly in that case.
pub fn transform_auto(node: &Node) -> Result<Transformed, GraphError> {
    let prior = match node.kind() {
        NodeKind::Parameter {
            prior: Some(prior), ..
        } => prior,
        NodeKind::Parameter { prior: None, .. } => {
            return Err(unsupported(node, "parameter has no prior, so its domain is undefined"))
        }
        _ => return Err(unsupported(node, "only parameters can be reparameterized")),
    };
    let support = prior.dist.support();
    let bijector = bijector_for(support)
        .ok_or_else(|| unsupported(node, format!("no canonical bijector for {:?}", support)))?;
    transform(node, bijector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bijectors::{Exp, ShiftedExp};
    use crate::distributions::{Bernoulli, HalfCauchy};
    use crate::graph::Builder;
    use crate::node::Dep;
    use crate::value::Position;

    fn half_cauchy_sigma(value: f64) -> (NodeRef, NodeRef, NodeRef) {
        let loc = Node::constant("sigma_loc", 0.0);
        let scale = Node::constant("sigma_scale", 1.0);
        let sigma = Node::parameter_with_prior(
            "sigma",
            value,
            HalfCauchy,
            [Dep::from(&loc), Dep::from(&scale)],
        );
        (loc, scale, sigma)
    }

    #[test]
    fn transform_preserves_the_constrained_value() {
        let (loc, scale, sigma) = half_cauchy_sigma(1.0);
        let t = transform(&sigma, Arc::new(Exp)).unwrap();

        // exp-bijector at sigma = 1.0 puts the raw value at log(1.0) = 0.
        match t.raw.kind() {
            NodeKind::Parameter { value, .. } => {
                assert!((value.as_scalar().unwrap() - 0.0).abs() < 1e-12)
            }
            _ => unreachable!(),
        }

        let mut b = Builder::new();
        b.add(loc).unwrap();
        b.add(scale).unwrap();
        for node in t.into_nodes() {
            b.add(node).unwrap();
        }
        let model = b.build().unwrap();
        let eval = model.evaluate(&Position::new()).unwrap();
        let mapped = eval.value("sigma").unwrap().as_scalar().unwrap();
        assert!((mapped - 1.0).abs() < 1e-6 * 1.0f64.max(mapped.abs()));
    }

    #[test]
    fn transformed_density_differs_by_the_jacobian_term() {
        let sigma_value = 2.0;

        let (loc, scale, sigma) = half_cauchy_sigma(sigma_value);
        let mut b = Builder::new();
        b.add(loc).unwrap();
        b.add(scale).unwrap();
        b.add(sigma).unwrap();
        let original = b.build().unwrap();
        let base = original
            .evaluate(&Position::new().with("sigma", sigma_value))
            .unwrap()
            .log_density;

        let (loc, scale, sigma) = half_cauchy_sigma(sigma_value);
        let t = transform(&sigma, Arc::new(Exp)).unwrap();
        let mut b = Builder::new();
        b.add(loc).unwrap();
        b.add(scale).unwrap();
        for node in t.into_nodes() {
            b.add(node).unwrap();
        }
        let transformed = b.build().unwrap();

        let raw = sigma_value.ln();
        let got = transformed
            .evaluate(&Position::new().with("sigma_raw", raw))
            .unwrap()
            .log_density;

        // log|det J| of exp at raw is raw itself.
        assert!((got - (base + raw)).abs() < 1e-12);
    }

    #[test]
    fn decompose_splice_rebuild_rebinds_downstream_references() {
        // A derived node reading sigma must see the mapped value after the
        // parameter is swapped out for its reparameterized pair.
        let (loc, scale, sigma) = half_cauchy_sigma(1.5);
        let double = Node::calculated(
            "double_sigma",
            [("sigma", Dep::from(&sigma))],
            |args: &Args<'_>| Ok(Value::Scalar(args.scalar("sigma")? * 2.0)),
        );
        let mut b = Builder::new();
        b.add(loc).unwrap();
        b.add(scale).unwrap();
        b.add(double).unwrap();
        let mut model = b.build().unwrap();

        let loose = model.decompose().unwrap();
        let old_sigma = loose.iter().find(|n| n.name() == "sigma").unwrap();
        let t = transform_auto(old_sigma).unwrap();

        let mut b = Builder::new();
        for node in loose.iter().filter(|n| n.name() != "sigma") {
            b.add(Arc::clone(node)).unwrap();
        }
        for node in t.into_nodes() {
            b.add(node).unwrap();
        }
        let rebuilt = b.build().unwrap();

        let eval = rebuilt.evaluate(&Position::new()).unwrap();
        let sigma_val = eval.value("sigma").unwrap().as_scalar().unwrap();
        let doubled = eval.value("double_sigma").unwrap().as_scalar().unwrap();
        assert!((sigma_val - 1.5).abs() < 1e-9);
        assert!((doubled - 3.0).abs() < 1e-9);
    }

    #[test]
    fn shifted_exp_covers_a_nonzero_location() {
        // A half-Cauchy anchored above zero must stay inside its support
        // for every unconstrained value, which plain exp cannot do.
        let loc = Node::constant("tau_loc", 2.0);
        let scale = Node::constant("tau_scale", 1.0);
        let tau = Node::parameter_with_prior(
            "tau",
            3.0,
            HalfCauchy,
            [Dep::from(&loc), Dep::from(&scale)],
        );
        let t = transform(&tau, Arc::new(ShiftedExp { shift: 2.0 })).unwrap();

        let mut b = Builder::new();
        b.add(loc).unwrap();
        b.add(scale).unwrap();
        for node in t.into_nodes() {
            b.add(node).unwrap();
        }
        let model = b.build().unwrap();

        // raw = ln(3 - 2) = 0 reproduces tau = 3.
        let eval = model.evaluate(&Position::new()).unwrap();
        assert!((eval.value("tau").unwrap().as_scalar().unwrap() - 3.0).abs() < 1e-9);
        assert!(eval.log_density.is_finite());

        // Far into the left tail of the unconstrained scale the mapped
        // value still sits above the location, so the density stays finite.
        let far = model
            .evaluate(&Position::new().with("tau_raw", -30.0))
            .unwrap();
        assert!(far.log_density.is_finite());
    }

    #[test]
    fn discrete_priors_cannot_be_transformed() {
        let p = Node::constant("p", 0.5);
        let z = Node::parameter_with_prior("z", 1.0, Bernoulli, [Dep::from(&p)]);
        assert!(matches!(
            transform_auto(&z),
            Err(GraphError::UnsupportedTransform { node, .. }) if node == "z"
        ));
    }

    #[test]
    fn transform_requires_a_prior() {
        let free = Node::parameter("free", 0.0);
        assert!(matches!(
            transform(&free, Arc::new(Exp)),
            Err(GraphError::UnsupportedTransform { .. })
        ));
        let derived = Node::constant("c", 1.0);
        assert!(matches!(
            transform_auto(&derived),
            Err(GraphError::UnsupportedTransform { .. })
        ));
    }
}
