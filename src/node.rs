//! Graph nodes: the loose, composable units a [`Builder`](crate::Builder)
//! compiles into a [`Model`](crate::Model).
//!
//! A node is one of three kinds. A `Parameter` holds a current value and an
//! optional prior; a `Calculated` node derives its value through a pure
//! [`Calculation`]; an `Observed` node binds fixed data to a likelihood.
//! Dependencies are either shared handles (discovered recursively when the
//! node is added to a builder) or by-name references resolved at build
//! time. Decomposing a model always yields by-name nodes, which is what
//! makes splice-and-rebuild editing work: a replacement node with the same
//! name rebinds every downstream reference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::distributions::Distribution;
use crate::error::GraphError;
use crate::value::Value;

/// Shared handle to a node. Nodes are reference-counted by the graph
/// structures that point to them and are never owned by more than one live
/// model at a time.
pub type NodeRef = Arc<Node>;

/// A dependency edge: either a handle to an already-constructed node or a
/// late-bound name resolved when the graph is built.
#[derive(Clone)]
pub enum Dep {
    Handle(NodeRef),
    Name(String),
}

impl Dep {
    /// The name of the node this dependency refers to.
    pub fn target(&self) -> &str {
        match self {
            Dep::Handle(node) => node.name(),
            Dep::Name(name) => name,
        }
    }

    pub(crate) fn detached(&self) -> Dep {
        Dep::Name(self.target().to_string())
    }
}

impl From<&NodeRef> for Dep {
    fn from(node: &NodeRef) -> Self {
        Dep::Handle(Arc::clone(node))
    }
}

impl From<NodeRef> for Dep {
    fn from(node: NodeRef) -> Self {
        Dep::Handle(node)
    }
}

impl From<&str> for Dep {
    fn from(name: &str) -> Self {
        Dep::Name(name.to_string())
    }
}

impl From<String> for Dep {
    fn from(name: String) -> Self {
        Dep::Name(name)
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dep::Handle(node) => write!(f, "Handle({})", node.name()),
            Dep::Name(name) => write!(f, "Name({})", name),
        }
    }
}

/// Resolved argument values handed to a [`Calculation`] during evaluation.
pub struct Args<'a> {
    entries: Vec<(&'a str, &'a Value)>,
}

impl<'a> Args<'a> {
    pub(crate) fn new(entries: Vec<(&'a str, &'a Value)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Result<&'a Value, GraphError> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| GraphError::UnknownParameter(name.to_string()))
    }

    pub fn scalar(&self, name: &str) -> Result<f64, GraphError> {
        self.get(name)?.as_scalar()
    }

    pub fn vector(&self, name: &str) -> Result<&'a ndarray::Array1<f64>, GraphError> {
        self.get(name)?.as_vector()
    }
}

/// A pure, deterministic derivation. Evaluation must not mutate shared
/// state; the model relies on this for reentrancy across concurrent chains.
///
/// Closures of the right shape implement this automatically.
pub trait Calculation: Send + Sync {
    fn apply(&self, args: &Args<'_>) -> Result<Value, GraphError>;
}

impl<F> Calculation for F
where
    F: Fn(&Args<'_>) -> Result<Value, GraphError> + Send + Sync,
{
    fn apply(&self, args: &Args<'_>) -> Result<Value, GraphError> {
        self(args)
    }
}

/// Fixed value exposed as a zero-argument calculation.
struct Const(Value);

impl Calculation for Const {
    fn apply(&self, _args: &Args<'_>) -> Result<Value, GraphError> {
        Ok(self.0.clone())
    }
}

/// A distribution family applied to positional node arguments; used both
/// as a parameter prior and as an observation likelihood.
#[derive(Clone)]
pub struct DistSpec {
    pub dist: Arc<dyn Distribution>,
    pub args: Vec<Dep>,
}

impl DistSpec {
    pub fn new(dist: Arc<dyn Distribution>, args: Vec<Dep>) -> Self {
        Self { dist, args }
    }

    fn detached(&self) -> Self {
        Self {
            dist: Arc::clone(&self.dist),
            args: self.args.iter().map(Dep::detached).collect(),
        }
    }
}

#[derive(Clone)]
pub enum NodeKind {
    Parameter {
        value: Value,
        prior: Option<DistSpec>,
    },
    Calculated {
        calc: Arc<dyn Calculation>,
        args: Vec<(String, Dep)>,
    },
    Observed {
        value: Value,
        likelihood: DistSpec,
    },
}

/// A named unit in the model graph.
///
/// A parameter's current value is read at evaluation time only as the
/// fallback for positions that omit it; the only way to evaluate at a
/// different value is to pass a position. There is no ad hoc mutation.
pub struct Node {
    name: String,
    kind: NodeKind,
    owned: AtomicBool,
}

impl Node {
    fn new(name: impl Into<String>, kind: NodeKind) -> NodeRef {
        Arc::new(Node {
            name: name.into(),
            kind,
            owned: AtomicBool::new(false),
        })
    }

    /// Free parameter without a prior (contributes nothing to the density).
    pub fn parameter(name: impl Into<String>, value: impl Into<Value>) -> NodeRef {
        Node::new(
            name,
            NodeKind::Parameter {
                value: value.into(),
                prior: None,
            },
        )
    }

    /// Free parameter with a prior distribution over it.
    pub fn parameter_with_prior(
        name: impl Into<String>,
        value: impl Into<Value>,
        dist: impl Distribution + 'static,
        args: impl IntoIterator<Item = Dep>,
    ) -> NodeRef {
        Node::parameter_with_spec(
            name,
            value,
            DistSpec::new(Arc::new(dist), args.into_iter().collect()),
        )
    }

    pub fn parameter_with_spec(
        name: impl Into<String>,
        value: impl Into<Value>,
        prior: DistSpec,
    ) -> NodeRef {
        Node::new(
            name,
            NodeKind::Parameter {
                value: value.into(),
                prior: Some(prior),
            },
        )
    }

    /// Derived node: a pure calculation over named arguments.
    pub fn calculated<S: Into<String>>(
        name: impl Into<String>,
        args: impl IntoIterator<Item = (S, Dep)>,
        calc: impl Calculation + 'static,
    ) -> NodeRef {
        Node::calculated_arc(name, args, Arc::new(calc))
    }

    pub fn calculated_arc<S: Into<String>>(
        name: impl Into<String>,
        args: impl IntoIterator<Item = (S, Dep)>,
        calc: Arc<dyn Calculation>,
    ) -> NodeRef {
        Node::new(
            name,
            NodeKind::Calculated {
                calc,
                args: args.into_iter().map(|(n, d)| (n.into(), d)).collect(),
            },
        )
    }

    /// Fixed value (a zero-argument calculation). Constants never appear in
    /// positions and are never sampled.
    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> NodeRef {
        Node::calculated(name, Vec::<(String, Dep)>::new(), Const(value.into()))
    }

    /// Observed data bound to a likelihood.
    pub fn observed(
        name: impl Into<String>,
        value: impl Into<Value>,
        dist: impl Distribution + 'static,
        args: impl IntoIterator<Item = Dep>,
    ) -> NodeRef {
        Node::new(
            name,
            NodeKind::Observed {
                value: value.into(),
                likelihood: DistSpec::new(Arc::new(dist), args.into_iter().collect()),
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, NodeKind::Parameter { .. })
    }

    /// All dependency edges of this node, in declaration order: calculation
    /// arguments first, then prior/likelihood arguments.
    pub fn deps(&self) -> Vec<&Dep> {
        match &self.kind {
            NodeKind::Parameter { prior, .. } => prior
                .as_ref()
                .map(|p| p.args.iter().collect())
                .unwrap_or_default(),
            NodeKind::Calculated { args, .. } => args.iter().map(|(_, d)| d).collect(),
            NodeKind::Observed { likelihood, .. } => likelihood.args.iter().collect(),
        }
    }

    /// Handle dependencies only, for recursive discovery at add time.
    pub(crate) fn handle_deps(&self) -> Vec<NodeRef> {
        self.deps()
            .into_iter()
            .filter_map(|d| match d {
                Dep::Handle(node) => Some(Arc::clone(node)),
                Dep::Name(_) => None,
            })
            .collect()
    }

    /// Copy of this node with every dependency rewritten to a by-name
    /// reference and the ownership flag cleared. This is what `decompose`
    /// hands back.
    pub(crate) fn detached(&self) -> NodeRef {
        let kind = match &self.kind {
            NodeKind::Parameter { value, prior } => NodeKind::Parameter {
                value: value.clone(),
                prior: prior.as_ref().map(DistSpec::detached),
            },
            NodeKind::Calculated { calc, args } => NodeKind::Calculated {
                calc: Arc::clone(calc),
                args: args
                    .iter()
                    .map(|(n, d)| (n.clone(), d.detached()))
                    .collect(),
            },
            NodeKind::Observed { value, likelihood } => NodeKind::Observed {
                value: value.clone(),
                likelihood: likelihood.detached(),
            },
        };
        Node::new(self.name.clone(), kind)
    }

    pub(crate) fn is_owned(&self) -> bool {
        self.owned.load(Ordering::Acquire)
    }

    /// Atomically claim the node for a model being built. Fails if some
    /// other live model already owns it.
    pub(crate) fn try_claim(&self) -> bool {
        self.owned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.owned.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            NodeKind::Parameter { .. } => "parameter",
            NodeKind::Calculated { .. } => "calculated",
            NodeKind::Observed { .. } => "observed",
        };
        write!(f, "Node({} {})", kind, self.name)
    }
}
