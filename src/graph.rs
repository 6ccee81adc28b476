//! Graph accumulation and compilation.
//!
//! The builder collects loose nodes, recursively discovering handle
//! dependencies, and compiles them into an immutable dependency-ordered
//! [`Model`]. Ordering is deterministic: Kahn's algorithm with ties broken
//! by registration order, so rebuilding the same node set in the same
//! order reproduces the same evaluation order bit for bit.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use crate::error::GraphError;
use crate::model::Model;
use crate::node::NodeRef;

/// Mutable accumulator that validates and compiles a node graph.
#[derive(Default)]
pub struct Builder {
    nodes: Vec<NodeRef>,
    index: HashMap<String, usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` and, transitively, every handle dependency reachable
    /// from it. By-name dependencies are left for `build` to resolve.
    ///
    /// Fails on a name collision with a distinct node, or if any
    /// discovered node is still owned by a live model; a failed call
    /// unregisters everything it had discovered, leaving the builder as it
    /// was. Re-adding the same node (same allocation) is a no-op, so
    /// shared dependencies may be reached from several roots.
    pub fn add(&mut self, node: NodeRef) -> Result<&mut Self, GraphError> {
        let checkpoint = self.nodes.len();
        if let Err(err) = self.discover(node) {
            for node in self.nodes.split_off(checkpoint) {
                self.index.remove(node.name());
            }
            return Err(err);
        }
        Ok(self)
    }

    fn discover(&mut self, node: NodeRef) -> Result<(), GraphError> {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if let Some(&at) = self.index.get(node.name()) {
                if Arc::ptr_eq(&self.nodes[at], &node) {
                    continue;
                }
                return Err(GraphError::DuplicateName(node.name().to_string()));
            }
            if node.is_owned() {
                return Err(GraphError::NodeOwned(node.name().to_string()));
            }
            self.index.insert(node.name().to_string(), self.nodes.len());
            stack.extend(node.handle_deps());
            self.nodes.push(node);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Topologically order the registered nodes and compile them into an
    /// immutable [`Model`]. No partial model is produced on error; the
    /// nodes are only marked owned once ordering has succeeded.
    pub fn build(self) -> Result<Model, GraphError> {
        let n = self.nodes.len();

        // Resolve every dependency to a registration index.
        let mut dep_edges: Vec<Vec<usize>> = Vec::with_capacity(n);
        for node in &self.nodes {
            let mut edges = Vec::new();
            for dep in node.deps() {
                let target = dep.target();
                match self.index.get(target) {
                    Some(&at) => edges.push(at),
                    None => {
                        return Err(GraphError::IncompleteGraph {
                            node: node.name().to_string(),
                            missing: target.to_string(),
                        })
                    }
                }
            }
            dep_edges.push(edges);
        }

        // Kahn's algorithm; the ready set is a min-heap over registration
        // index so ties resolve deterministically.
        let mut indegree: Vec<usize> = dep_edges.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, edges) in dep_edges.iter().enumerate() {
            for &dep in edges {
                dependents[dep].push(i);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &next in &dependents[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < n {
            let stuck = indegree
                .iter()
                .enumerate()
                .find(|(_, &d)| d > 0)
                .map(|(i, _)| self.nodes[i].name().to_string())
                .unwrap_or_default();
            return Err(GraphError::CyclicDependency(stuck));
        }

        // Claim every node before compiling. The add-time check alone is
        // not enough: a node can sit unowned in two builders and only the
        // first build may win it. Roll back on a lost claim so no node is
        // left marked by a build that produced no model.
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.try_claim() {
                for claimed in &self.nodes[..i] {
                    claimed.release();
                }
                return Err(GraphError::NodeOwned(node.name().to_string()));
            }
        }

        let ordered: Vec<NodeRef> = order.into_iter().map(|i| Arc::clone(&self.nodes[i])).collect();
        match Model::compile(ordered) {
            Ok(model) => Ok(model),
            Err(err) => {
                for node in &self.nodes {
                    node.release();
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder").field("nodes", &self.nodes).finish()
    }
}
