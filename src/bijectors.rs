//! Invertible maps between constrained parameter domains and the
//! unconstrained real line, with Jacobian log-determinants.
//!
//! Convention: `forward` maps unconstrained → constrained, so a
//! reparameterized node satisfies `forward(raw) == original`. The
//! log-det-Jacobian is reported at the unconstrained point and summed over
//! elements for vector values.

use std::sync::Arc;

use crate::distributions::Support;
use crate::error::GraphError;
use crate::value::Value;

pub trait Bijector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Map an unconstrained value into the constrained domain.
    fn forward(&self, x: &Value) -> Result<Value, GraphError>;

    /// Map a constrained value back to the unconstrained scale. Fails with
    /// a numerical error for inputs outside the constrained domain.
    fn inverse(&self, y: &Value) -> Result<Value, GraphError>;

    /// log |det ∂forward/∂x| at the unconstrained point `x`.
    fn log_det_jacobian(&self, x: &Value) -> Result<f64, GraphError>;
}

fn map_elems(v: &Value, f: impl Fn(f64) -> Result<f64, GraphError>) -> Result<Value, GraphError> {
    match v {
        Value::Scalar(s) => Ok(Value::Scalar(f(*s)?)),
        Value::Vector(a) => {
            let mut out = Vec::with_capacity(a.len());
            for &x in a {
                out.push(f(x)?);
            }
            Ok(Value::from(out))
        }
        Value::Matrix(_) => Err(GraphError::ValueKind {
            expected: "scalar or vector",
            got: "matrix",
        }),
    }
}

fn sum_elems(v: &Value, f: impl Fn(f64) -> f64) -> Result<f64, GraphError> {
    match v {
        Value::Scalar(s) => Ok(f(*s)),
        Value::Vector(a) => Ok(a.iter().map(|&x| f(x)).sum()),
        Value::Matrix(_) => Err(GraphError::ValueKind {
            expected: "scalar or vector",
            got: "matrix",
        }),
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// log(1 + e^x) without overflow.
fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

// ── Exp: (-∞, ∞) → (0, ∞) ───────────────────────────────────────────

pub struct Exp;

impl Bijector for Exp {
    fn name(&self) -> &'static str {
        "exp"
    }

    fn forward(&self, x: &Value) -> Result<Value, GraphError> {
        map_elems(x, |x| Ok(x.exp()))
    }

    fn inverse(&self, y: &Value) -> Result<Value, GraphError> {
        map_elems(y, |y| {
            if y > 0.0 {
                Ok(y.ln())
            } else {
                Err(GraphError::Numeric(format!(
                    "exp inverse: {} is not positive",
                    y
                )))
            }
        })
    }

    fn log_det_jacobian(&self, x: &Value) -> Result<f64, GraphError> {
        // d/dx exp(x) = exp(x), so log|J| = Σ x
        sum_elems(x, |x| x)
    }
}

// ── ShiftedExp: (-∞, ∞) → (shift, ∞) ────────────────────────────────

/// `Exp` translated to a lower bound other than zero, for half
/// distributions with a nonzero location.
pub struct ShiftedExp {
    pub shift: f64,
}

impl Bijector for ShiftedExp {
    fn name(&self) -> &'static str {
        "shifted_exp"
    }

    fn forward(&self, x: &Value) -> Result<Value, GraphError> {
        let shift = self.shift;
        map_elems(x, |x| Ok(shift + x.exp()))
    }

    fn inverse(&self, y: &Value) -> Result<Value, GraphError> {
        let shift = self.shift;
        map_elems(y, |y| {
            if y > shift {
                Ok((y - shift).ln())
            } else {
                Err(GraphError::Numeric(format!(
                    "shifted_exp inverse: {} is not above {}",
                    y, shift
                )))
            }
        })
    }

    fn log_det_jacobian(&self, x: &Value) -> Result<f64, GraphError> {
        // the shift drops out of the derivative
        sum_elems(x, |x| x)
    }
}

// ── Sigmoid: (-∞, ∞) → (0, 1) ───────────────────────────────────────

pub struct Sigmoid;

impl Bijector for Sigmoid {
    fn name(&self) -> &'static str {
        "sigmoid"
    }

    fn forward(&self, x: &Value) -> Result<Value, GraphError> {
        map_elems(x, |x| Ok(sigmoid(x)))
    }

    fn inverse(&self, y: &Value) -> Result<Value, GraphError> {
        map_elems(y, |y| {
            if y > 0.0 && y < 1.0 {
                Ok((y / (1.0 - y)).ln())
            } else {
                Err(GraphError::Numeric(format!(
                    "sigmoid inverse: {} is outside (0, 1)",
                    y
                )))
            }
        })
    }

    fn log_det_jacobian(&self, x: &Value) -> Result<f64, GraphError> {
        // log σ'(x) = log σ(x) + log(1 - σ(x)) = -softplus(x) - softplus(-x)
        sum_elems(x, |x| -softplus(x) - softplus(-x))
    }
}

// ── BoundedSigmoid: (-∞, ∞) → (lower, upper) ────────────────────────

pub struct BoundedSigmoid {
    pub lower: f64,
    pub upper: f64,
}

impl Bijector for BoundedSigmoid {
    fn name(&self) -> &'static str {
        "bounded_sigmoid"
    }

    fn forward(&self, x: &Value) -> Result<Value, GraphError> {
        let (l, u) = (self.lower, self.upper);
        map_elems(x, |x| Ok(l + (u - l) * sigmoid(x)))
    }

    fn inverse(&self, y: &Value) -> Result<Value, GraphError> {
        let (l, u) = (self.lower, self.upper);
        map_elems(y, |y| {
            if y > l && y < u {
                let t = (y - l) / (u - l);
                Ok((t / (1.0 - t)).ln())
            } else {
                Err(GraphError::Numeric(format!(
                    "bounded_sigmoid inverse: {} is outside ({}, {})",
                    y, l, u
                )))
            }
        })
    }

    fn log_det_jacobian(&self, x: &Value) -> Result<f64, GraphError> {
        let range = (self.upper - self.lower).ln();
        sum_elems(x, |x| range - softplus(x) - softplus(-x))
    }
}

/// The canonical unconstraining bijector for a distribution support, if
/// one exists. `Real` needs none and `Discrete` has none. Supports carry
/// no location information, so `Positive` always maps to [`Exp`]; a half
/// distribution with a nonzero location needs an explicit [`ShiftedExp`].
pub fn bijector_for(support: Support) -> Option<Arc<dyn Bijector>> {
    match support {
        Support::Positive => Some(Arc::new(Exp)),
        Support::UnitInterval => Some(Arc::new(Sigmoid)),
        Support::Bounded { lower, upper } => Some(Arc::new(BoundedSigmoid { lower, upper })),
        Support::Real | Support::Discrete => None,
    }
}
