use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

use crate::error::GraphError;

/// Value produced by or stored in a graph node. Scalars, vectors, and
/// matrices are tracked separately so the graph can mix element-wise data
/// operations with scalar parameter operations without boxing everything
/// into the largest shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(Array1<f64>),
    Matrix(Array2<f64>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Vector(_) => "vector",
            Value::Matrix(_) => "matrix",
        }
    }

    pub fn as_scalar(&self) -> Result<f64, GraphError> {
        match self {
            Value::Scalar(v) => Ok(*v),
            other => Err(GraphError::ValueKind {
                expected: "scalar",
                got: other.kind(),
            }),
        }
    }

    pub fn as_vector(&self) -> Result<&Array1<f64>, GraphError> {
        match self {
            Value::Vector(v) => Ok(v),
            other => Err(GraphError::ValueKind {
                expected: "vector",
                got: other.kind(),
            }),
        }
    }

    pub fn as_matrix(&self) -> Result<&Array2<f64>, GraphError> {
        match self {
            Value::Matrix(v) => Ok(v),
            other => Err(GraphError::ValueKind {
                expected: "matrix",
                got: other.kind(),
            }),
        }
    }

    /// Number of scalar elements (1 for a scalar).
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Vector(v) => v.len(),
            Value::Matrix(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Vector(Array1::from_vec(v))
    }
}

impl From<Array1<f64>> for Value {
    fn from(v: Array1<f64>) -> Self {
        Value::Vector(v)
    }
}

impl From<Array2<f64>> for Value {
    fn from(v: Array2<f64>) -> Self {
        Value::Matrix(v)
    }
}

/// An assignment of values to free parameters, keyed by parameter name.
/// This is the unit of state exchanged with a sampling engine; ordering is
/// deterministic (sorted by name) so iteration never depends on insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position(BTreeMap<String, Value>);

impl Position {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Chainable variant of [`insert`](Self::insert) for literal positions.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>, V: Into<Value>> FromIterator<(S, V)> for Position {
    fn from_iter<T: IntoIterator<Item = (S, V)>>(iter: T) -> Self {
        let mut pos = Position::new();
        for (k, v) in iter {
            pos.insert(k, v);
        }
        pos
    }
}
