//! Declarative model graphs for Bayesian regression: named nodes, a
//! validating builder, an immutable dependency-ordered model, and
//! bijector-based reparameterization, with a narrow density-oracle
//! interface for sampling engines.

pub mod bijectors;
pub mod distributions;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod node;
pub mod regression;
pub mod transform;
pub mod value;

pub use error::GraphError;
pub use graph::Builder;
pub use model::{Evaluation, Model};
pub use node::{Args, Calculation, Dep, DistSpec, Node, NodeKind, NodeRef};
pub use value::{Position, Value};

// Future: vectorized group-level parameters for hierarchical models can be
// layered on the existing vector-valued Parameter nodes.
