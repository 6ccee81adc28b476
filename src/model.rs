//! The compiled, evaluable model.
//!
//! A model is an immutable snapshot of a node graph in dependency order.
//! Evaluation is stateless with respect to the position argument: every
//! call allocates its own value buffer, so concurrent chains may evaluate
//! one shared model without locking. Structural changes go through
//! [`decompose`](Model::decompose) and a fresh [`Builder`](crate::Builder);
//! a decomposed model is terminally invalid.

use std::collections::HashMap;
use std::sync::Arc;

use crate::distributions::Distribution;
use crate::error::GraphError;
use crate::node::{Args, Calculation, NodeKind, NodeRef};
use crate::value::{Position, Value};

enum Step {
    Param {
        prior: Option<(Arc<dyn Distribution>, Vec<usize>)>,
    },
    Calc {
        calc: Arc<dyn Calculation>,
        args: Vec<(String, usize)>,
    },
    Obs {
        dist: Arc<dyn Distribution>,
        args: Vec<usize>,
    },
}

/// Immutable, dependency-ordered compilation of a node graph.
pub struct Model {
    nodes: Vec<NodeRef>,
    index: HashMap<String, usize>,
    steps: Vec<Step>,
    valid: bool,
}

/// Result of one evaluation pass: every node's value in dependency order,
/// plus the total log-density (parameter priors and observed likelihoods,
/// summed). The total may be non-finite; that is a sentinel for samplers,
/// not an error.
#[derive(Debug, Clone)]
pub struct Evaluation {
    values: Vec<(String, Value)>,
    pub log_density: f64,
}

impl Evaluation {
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// All node values in dependency order.
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }
}

impl Model {
    /// Compile nodes already in dependency order. Called by
    /// [`Builder::build`](crate::Builder::build); every dependency is
    /// expected to resolve to an earlier position.
    pub(crate) fn compile(nodes: Vec<NodeRef>) -> Result<Model, GraphError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            index.insert(node.name().to_string(), i);
        }

        let resolve = |name: &str, of: &str| -> Result<usize, GraphError> {
            index
                .get(name)
                .copied()
                .ok_or_else(|| GraphError::IncompleteGraph {
                    node: of.to_string(),
                    missing: name.to_string(),
                })
        };

        let mut steps = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let step = match node.kind() {
                NodeKind::Parameter { prior, .. } => Step::Param {
                    prior: match prior {
                        Some(spec) => {
                            let mut args = Vec::with_capacity(spec.args.len());
                            for dep in &spec.args {
                                args.push(resolve(dep.target(), node.name())?);
                            }
                            Some((Arc::clone(&spec.dist), args))
                        }
                        None => None,
                    },
                },
                NodeKind::Calculated { calc, args } => Step::Calc {
                    calc: Arc::clone(calc),
                    args: args
                        .iter()
                        .map(|(n, d)| Ok((n.clone(), resolve(d.target(), node.name())?)))
                        .collect::<Result<_, GraphError>>()?,
                },
                NodeKind::Observed { likelihood, .. } => Step::Obs {
                    dist: Arc::clone(&likelihood.dist),
                    args: likelihood
                        .args
                        .iter()
                        .map(|d| resolve(d.target(), node.name()))
                        .collect::<Result<_, GraphError>>()?,
                },
            };
            steps.push(step);
        }

        Ok(Model {
            nodes,
            index,
            steps,
            valid: true,
        })
    }

    fn ensure_valid(&self) -> Result<(), GraphError> {
        if self.valid {
            Ok(())
        } else {
            Err(GraphError::InvalidModel)
        }
    }

    /// Names of every node in dependency order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name())
    }

    /// Names of the free parameters in dependency order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.is_parameter())
            .map(|n| n.name())
            .collect()
    }

    /// Current values of the requested parameter names, as stored on the
    /// nodes. This is the starting position a sampling engine perturbs.
    pub fn extract_position(&self, names: &[&str]) -> Result<Position, GraphError> {
        self.ensure_valid()?;
        let mut position = Position::new();
        for &name in names {
            let at = self
                .index
                .get(name)
                .copied()
                .ok_or_else(|| GraphError::UnknownParameter(name.to_string()))?;
            match self.nodes[at].kind() {
                NodeKind::Parameter { value, .. } => {
                    position.insert(name, value.clone());
                }
                _ => return Err(GraphError::UnknownParameter(name.to_string())),
            }
        }
        Ok(position)
    }

    /// Evaluate every node at the given position.
    ///
    /// Position keys must name free parameters (`UnknownParameter`
    /// otherwise); parameters absent from the position fall back to their
    /// stored current value. The pass is pure: per-call buffer, no
    /// mutation of node state.
    pub fn evaluate(&self, position: &Position) -> Result<Evaluation, GraphError> {
        self.ensure_valid()?;

        for key in position.keys() {
            let known = self
                .index
                .get(key)
                .map(|&i| self.nodes[i].is_parameter())
                .unwrap_or(false);
            if !known {
                return Err(GraphError::UnknownParameter(key.to_string()));
            }
        }

        let mut values: Vec<Value> = Vec::with_capacity(self.nodes.len());
        let mut log_density = 0.0;

        for (node, step) in self.nodes.iter().zip(self.steps.iter()) {
            let value = match step {
                Step::Param { prior } => {
                    let value = match position.get(node.name()) {
                        Some(v) => v.clone(),
                        None => match node.kind() {
                            NodeKind::Parameter { value, .. } => value.clone(),
                            _ => unreachable!("step/kind mismatch"),
                        },
                    };
                    if let Some((dist, arg_ix)) = prior {
                        let args: Vec<&Value> = arg_ix.iter().map(|&i| &values[i]).collect();
                        log_density += dist.log_density(&value, &args)?;
                    }
                    value
                }
                Step::Calc { calc, args } => {
                    let view = Args::new(
                        args.iter()
                            .map(|(n, i)| (n.as_str(), &values[*i]))
                            .collect(),
                    );
                    calc.apply(&view)?
                }
                Step::Obs { dist, args } => {
                    let value = match node.kind() {
                        NodeKind::Observed { value, .. } => value.clone(),
                        _ => unreachable!("step/kind mismatch"),
                    };
                    let arg_refs: Vec<&Value> = args.iter().map(|&i| &values[i]).collect();
                    log_density += dist.log_density(&value, &arg_refs)?;
                    value
                }
            };
            values.push(value);
        }

        Ok(Evaluation {
            values: self
                .nodes
                .iter()
                .map(|n| n.name().to_string())
                .zip(values)
                .collect(),
            log_density,
        })
    }

    /// Break the model back into loose nodes for editing.
    ///
    /// Returns detached copies (dependencies rewritten to by-name
    /// references) in dependency order, releases ownership of the
    /// originals, and invalidates the model: every subsequent operation
    /// fails with `InvalidModel`. Re-adding the returned nodes to a fresh
    /// builder in the returned order reproduces the original evaluation
    /// order exactly.
    pub fn decompose(&mut self) -> Result<Vec<NodeRef>, GraphError> {
        self.ensure_valid()?;
        self.valid = false;
        let loose = self.nodes.iter().map(|n| n.detached()).collect();
        for node in &self.nodes {
            node.release();
        }
        Ok(loose)
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        if self.valid {
            for node in &self.nodes {
                node.release();
            }
        }
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("nodes", &self.nodes)
            .field("valid", &self.valid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{HalfCauchy, Normal};
    use crate::graph::Builder;
    use crate::node::{Dep, Node};

    fn normal_pair() -> Builder {
        // x ~ Normal(0, 1), y = 2x
        let mu = Node::constant("mu", 0.0);
        let sigma = Node::constant("sig", 1.0);
        let x = Node::parameter_with_prior("x", 0.5, Normal, [Dep::from(&mu), Dep::from(&sigma)]);
        let y = Node::calculated("y", [("x", Dep::from(&x))], |args: &Args<'_>| {
            Ok(Value::Scalar(args.scalar("x")? * 2.0))
        });
        let mut b = Builder::new();
        b.add(y).unwrap();
        b
    }

    #[test]
    fn evaluate_computes_derived_values_and_density() {
        let model = normal_pair().build().unwrap();
        let pos = Position::new().with("x", 1.5);
        let eval = model.evaluate(&pos).unwrap();

        assert_eq!(eval.value("y"), Some(&Value::Scalar(3.0)));
        let expected = -0.5 * 1.5f64.powi(2) - 0.5 * std::f64::consts::TAU.ln();
        assert!((eval.log_density - expected).abs() < 1e-12);
    }

    #[test]
    fn missing_position_keys_fall_back_to_stored_values() {
        let model = normal_pair().build().unwrap();
        let eval = model.evaluate(&Position::new()).unwrap();
        // stored x = 0.5
        assert_eq!(eval.value("y"), Some(&Value::Scalar(1.0)));
    }

    #[test]
    fn unknown_position_key_is_rejected() {
        let model = normal_pair().build().unwrap();
        let pos = Position::new().with("nope", 1.0);
        assert!(matches!(
            model.evaluate(&pos),
            Err(GraphError::UnknownParameter(name)) if name == "nope"
        ));
        // Derived nodes are not parameters either.
        let pos = Position::new().with("y", 1.0);
        assert!(matches!(
            model.evaluate(&pos),
            Err(GraphError::UnknownParameter(_))
        ));
    }

    #[test]
    fn extract_position_returns_stored_parameter_values() {
        let model = normal_pair().build().unwrap();
        let pos = model.extract_position(&["x"]).unwrap();
        assert_eq!(pos.get("x"), Some(&Value::Scalar(0.5)));
        assert!(model.extract_position(&["mu"]).is_err());
    }

    #[test]
    fn non_finite_density_is_not_an_error() {
        let loc = Node::constant("loc", 0.0);
        let scale = Node::constant("scale", 1.0);
        let s = Node::parameter_with_prior(
            "s",
            1.0,
            HalfCauchy,
            [Dep::from(&loc), Dep::from(&scale)],
        );
        let mut b = Builder::new();
        b.add(s).unwrap();
        let model = b.build().unwrap();

        let eval = model.evaluate(&Position::new().with("s", -1.0)).unwrap();
        assert_eq!(eval.log_density, f64::NEG_INFINITY);
    }

    #[test]
    fn decompose_invalidates_the_model() {
        let mut model = normal_pair().build().unwrap();
        let loose = model.decompose().unwrap();
        assert_eq!(loose.len(), 4);

        assert!(matches!(
            model.evaluate(&Position::new()),
            Err(GraphError::InvalidModel)
        ));
        assert!(matches!(
            model.extract_position(&["x"]),
            Err(GraphError::InvalidModel)
        ));
        assert!(matches!(model.decompose(), Err(GraphError::InvalidModel)));
    }

    #[test]
    fn decompose_rebuild_round_trip_is_bit_exact() {
        let mut model = normal_pair().build().unwrap();
        let pos = Position::new().with("x", 0.731);
        let before = model.evaluate(&pos).unwrap();

        let loose = model.decompose().unwrap();
        let mut b = Builder::new();
        for node in loose {
            b.add(node).unwrap();
        }
        let rebuilt = b.build().unwrap();
        let after = rebuilt.evaluate(&pos).unwrap();

        assert_eq!(before.log_density.to_bits(), after.log_density.to_bits());
        assert_eq!(before.values(), after.values());
    }

    #[test]
    fn evaluation_is_reentrant_across_threads() {
        let model = std::sync::Arc::new(normal_pair().build().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let model = std::sync::Arc::clone(&model);
                std::thread::spawn(move || {
                    let pos = Position::new().with("x", i as f64 * 0.25);
                    model.evaluate(&pos).unwrap().log_density
                })
            })
            .collect();
        let results: Vec<f64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (i, logp) in results.iter().enumerate() {
            let x = i as f64 * 0.25;
            let expected = -0.5 * x * x - 0.5 * std::f64::consts::TAU.ln();
            assert!((logp - expected).abs() < 1e-12);
        }
    }
}
