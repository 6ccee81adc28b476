//! Distribution families consumed by priors and likelihoods.
//!
//! Families are capability objects: anything implementing [`Distribution`]
//! can parameterize a node. Arguments are positional and are themselves
//! graph nodes, so hyperparameters may be constants or upstream parameters
//! (e.g. a coefficient prior whose scale is another sampled parameter).

use rand::RngCore;
use rand_distr::Distribution as _;

use crate::error::GraphError;
use crate::value::Value;

const LN_TAU: f64 = 1.837_877_066_409_345_3; // ln(2π)

/// The domain a distribution's realizations live in. Drives automatic
/// bijector selection when reparameterizing onto an unconstrained scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Support {
    Real,
    Positive,
    UnitInterval,
    Bounded { lower: f64, upper: f64 },
    Discrete,
}

/// A distribution family: log-density plus forward sampling.
///
/// `value` and vector-shaped arguments broadcast element-wise; a scalar
/// argument applies to every element of a vector value. Out-of-support
/// values yield `-inf`, never an error.
pub trait Distribution: Send + Sync {
    fn name(&self) -> &'static str;

    fn support(&self) -> Support;

    /// Total log-density of `value` given positional arguments, summed over
    /// elements for vector values.
    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError>;

    /// Draw one realization given positional arguments.
    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError>;
}

// ── broadcasting helpers ────────────────────────────────────────────

fn elem(v: &Value, i: usize, n: usize) -> Result<f64, GraphError> {
    match v {
        Value::Scalar(s) => Ok(*s),
        Value::Vector(a) if a.len() == n => Ok(a[i]),
        Value::Vector(a) => Err(GraphError::Numeric(format!(
            "argument length {} does not broadcast against value length {}",
            a.len(),
            n
        ))),
        Value::Matrix(_) => Err(GraphError::ValueKind {
            expected: "scalar or vector",
            got: "matrix",
        }),
    }
}

/// Sum `f(value_i, args_i...)` over the elements of `value`, broadcasting
/// scalar arguments.
fn sum_elementwise(
    value: &Value,
    args: &[&Value],
    f: impl Fn(f64, &[f64]) -> f64,
) -> Result<f64, GraphError> {
    let n = match value {
        Value::Scalar(_) => 1,
        Value::Vector(a) => a.len(),
        Value::Matrix(_) => {
            return Err(GraphError::ValueKind {
                expected: "scalar or vector",
                got: "matrix",
            })
        }
    };
    let mut buf = vec![0.0; args.len()];
    let mut total = 0.0;
    for i in 0..n {
        let x = elem(value, i, n)?;
        for (slot, arg) in buf.iter_mut().zip(args.iter()) {
            *slot = elem(arg, i, n)?;
        }
        total += f(x, &buf);
    }
    Ok(total)
}

fn expect_args(name: &str, args: &[&Value], want: usize) -> Result<(), GraphError> {
    if args.len() == want {
        Ok(())
    } else {
        Err(GraphError::Numeric(format!(
            "{} takes {} argument(s), got {}",
            name,
            want,
            args.len()
        )))
    }
}

fn scalar_arg(name: &str, args: &[&Value], i: usize) -> Result<f64, GraphError> {
    args.get(i)
        .ok_or_else(|| GraphError::Numeric(format!("{} missing argument {}", name, i)))?
        .as_scalar()
}

// ── log-density kernels ─────────────────────────────────────────────

fn normal_logp(x: f64, mu: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let z = (x - mu) / sigma;
    -0.5 * z * z - sigma.ln() - 0.5 * LN_TAU
}

/// Lanczos approximation of ln(Γ(x)), g = 7.
pub(crate) fn ln_gamma(x: f64) -> f64 {
    const C: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection formula for the left half-plane.
        let pi = std::f64::consts::PI;
        return pi.ln() - (pi * x).sin().ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut sum = C[0];
    for (i, c) in C.iter().enumerate().skip(1) {
        sum += c / (x + i as f64);
    }
    let g = 7.0;
    let t = x + g + 0.5;
    0.5 * LN_TAU + (x + 0.5) * t.ln() - t + sum.ln()
}

// ── Normal(mu, sigma) ───────────────────────────────────────────────

pub struct Normal;

impl Distribution for Normal {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn support(&self) -> Support {
        Support::Real
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        expect_args("normal", args, 2)?;
        sum_elementwise(value, args, |x, a| normal_logp(x, a[0], a[1]))
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        expect_args("normal", args, 2)?;
        let mu = scalar_arg("normal", args, 0)?;
        let sigma = scalar_arg("normal", args, 1)?;
        let dist = rand_distr::Normal::new(mu, sigma)
            .map_err(|e| GraphError::Numeric(format!("normal sample: {}", e)))?;
        Ok(Value::Scalar(dist.sample(rng)))
    }
}

// ── HalfNormal(sigma), x ≥ 0 ────────────────────────────────────────

pub struct HalfNormal;

impl Distribution for HalfNormal {
    fn name(&self) -> &'static str {
        "half_normal"
    }

    fn support(&self) -> Support {
        Support::Positive
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        expect_args("half_normal", args, 1)?;
        sum_elementwise(value, args, |x, a| {
            let sigma = a[0];
            if x < 0.0 || sigma <= 0.0 {
                return f64::NEG_INFINITY;
            }
            std::f64::consts::LN_2 + normal_logp(x, 0.0, sigma)
        })
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        expect_args("half_normal", args, 1)?;
        let sigma = scalar_arg("half_normal", args, 0)?;
        let dist = rand_distr::Normal::new(0.0, sigma)
            .map_err(|e| GraphError::Numeric(format!("half_normal sample: {}", e)))?;
        let draw: f64 = dist.sample(rng);
        Ok(Value::Scalar(draw.abs()))
    }
}

// ── HalfCauchy(loc, scale), x ≥ loc ─────────────────────────────────

pub struct HalfCauchy;

impl Distribution for HalfCauchy {
    fn name(&self) -> &'static str {
        "half_cauchy"
    }

    fn support(&self) -> Support {
        Support::Positive
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        expect_args("half_cauchy", args, 2)?;
        sum_elementwise(value, args, |x, a| {
            let (loc, scale) = (a[0], a[1]);
            if x < loc || scale <= 0.0 {
                return f64::NEG_INFINITY;
            }
            let z = (x - loc) / scale;
            std::f64::consts::LN_2
                - std::f64::consts::PI.ln()
                - scale.ln()
                - z.mul_add(z, 1.0).ln()
        })
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        expect_args("half_cauchy", args, 2)?;
        let loc = scalar_arg("half_cauchy", args, 0)?;
        let scale = scalar_arg("half_cauchy", args, 1)?;
        let dist = rand_distr::Cauchy::new(0.0, scale)
            .map_err(|e| GraphError::Numeric(format!("half_cauchy sample: {}", e)))?;
        let draw: f64 = dist.sample(rng);
        Ok(Value::Scalar(loc + draw.abs()))
    }
}

// ── Exponential(rate), x ≥ 0 ────────────────────────────────────────

pub struct Exponential;

impl Distribution for Exponential {
    fn name(&self) -> &'static str {
        "exponential"
    }

    fn support(&self) -> Support {
        Support::Positive
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        expect_args("exponential", args, 1)?;
        sum_elementwise(value, args, |x, a| {
            let rate = a[0];
            if x < 0.0 || rate <= 0.0 {
                return f64::NEG_INFINITY;
            }
            rate.ln() - rate * x
        })
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        expect_args("exponential", args, 1)?;
        let rate = scalar_arg("exponential", args, 0)?;
        let dist = rand_distr::Exp::new(rate)
            .map_err(|e| GraphError::Numeric(format!("exponential sample: {}", e)))?;
        Ok(Value::Scalar(dist.sample(rng)))
    }
}

// ── Gamma(shape, rate), x > 0 ───────────────────────────────────────

pub struct Gamma;

impl Distribution for Gamma {
    fn name(&self) -> &'static str {
        "gamma"
    }

    fn support(&self) -> Support {
        Support::Positive
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        expect_args("gamma", args, 2)?;
        sum_elementwise(value, args, |x, a| {
            let (shape, rate) = (a[0], a[1]);
            if x <= 0.0 || shape <= 0.0 || rate <= 0.0 {
                return f64::NEG_INFINITY;
            }
            shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x
        })
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        expect_args("gamma", args, 2)?;
        let shape = scalar_arg("gamma", args, 0)?;
        let rate = scalar_arg("gamma", args, 1)?;
        let dist = rand_distr::Gamma::new(shape, 1.0 / rate)
            .map_err(|e| GraphError::Numeric(format!("gamma sample: {}", e)))?;
        Ok(Value::Scalar(dist.sample(rng)))
    }
}

// ── StudentT(nu; mu, sigma) ─────────────────────────────────────────

pub struct StudentT {
    pub nu: f64,
}

impl Distribution for StudentT {
    fn name(&self) -> &'static str {
        "student_t"
    }

    fn support(&self) -> Support {
        Support::Real
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        expect_args("student_t", args, 2)?;
        let nu = self.nu;
        sum_elementwise(value, args, |x, a| {
            let (mu, sigma) = (a[0], a[1]);
            if sigma <= 0.0 || nu <= 0.0 {
                return f64::NEG_INFINITY;
            }
            let z = (x - mu) / sigma;
            ln_gamma(0.5 * (nu + 1.0))
                - ln_gamma(0.5 * nu)
                - 0.5 * (nu * std::f64::consts::PI).ln()
                - sigma.ln()
                - 0.5 * (nu + 1.0) * (z * z / nu).ln_1p()
        })
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        expect_args("student_t", args, 2)?;
        let mu = scalar_arg("student_t", args, 0)?;
        let sigma = scalar_arg("student_t", args, 1)?;
        let dist = rand_distr::StudentT::new(self.nu)
            .map_err(|e| GraphError::Numeric(format!("student_t sample: {}", e)))?;
        let draw: f64 = dist.sample(rng);
        Ok(Value::Scalar(mu + sigma * draw))
    }
}

// ── Uniform(lower, upper) — fixed bounds, no node arguments ─────────

pub struct Uniform {
    pub lower: f64,
    pub upper: f64,
}

impl Distribution for Uniform {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn support(&self) -> Support {
        Support::Bounded {
            lower: self.lower,
            upper: self.upper,
        }
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        expect_args("uniform", args, 0)?;
        let (lower, upper) = (self.lower, self.upper);
        sum_elementwise(value, args, |x, _| {
            if x < lower || x > upper || upper <= lower {
                f64::NEG_INFINITY
            } else {
                -(upper - lower).ln()
            }
        })
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        expect_args("uniform", args, 0)?;
        if self.upper <= self.lower {
            return Err(GraphError::Numeric(format!(
                "uniform sample: empty interval [{}, {}]",
                self.lower, self.upper
            )));
        }
        let dist = rand_distr::Uniform::new(self.lower, self.upper);
        Ok(Value::Scalar(dist.sample(rng)))
    }
}

// ── Bernoulli(p) — discrete, never reparameterized ──────────────────

pub struct Bernoulli;

impl Distribution for Bernoulli {
    fn name(&self) -> &'static str {
        "bernoulli"
    }

    fn support(&self) -> Support {
        Support::Discrete
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        expect_args("bernoulli", args, 1)?;
        sum_elementwise(value, args, |x, a| {
            let p = a[0];
            if !(0.0..=1.0).contains(&p) {
                f64::NEG_INFINITY
            } else if x == 1.0 {
                p.ln()
            } else if x == 0.0 {
                (1.0 - p).ln()
            } else {
                f64::NEG_INFINITY
            }
        })
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        expect_args("bernoulli", args, 1)?;
        let p = scalar_arg("bernoulli", args, 0)?;
        let dist = rand_distr::Bernoulli::new(p)
            .map_err(|e| GraphError::Numeric(format!("bernoulli sample: {}", e)))?;
        Ok(Value::Scalar(if dist.sample(rng) { 1.0 } else { 0.0 }))
    }
}

// ── MvNormalDiag(mu, sigma) — diagonal-covariance multivariate ──────

/// Multivariate normal with diagonal covariance. The value must be a
/// vector; `mu` and `sigma` are vectors of matching length or scalars that
/// broadcast across every dimension.
pub struct MvNormalDiag;

impl Distribution for MvNormalDiag {
    fn name(&self) -> &'static str {
        "mv_normal_diag"
    }

    fn support(&self) -> Support {
        Support::Real
    }

    fn log_density(&self, value: &Value, args: &[&Value]) -> Result<f64, GraphError> {
        expect_args("mv_normal_diag", args, 2)?;
        value.as_vector()?;
        sum_elementwise(value, args, |x, a| normal_logp(x, a[0], a[1]))
    }

    fn sample(&self, args: &[&Value], rng: &mut dyn RngCore) -> Result<Value, GraphError> {
        expect_args("mv_normal_diag", args, 2)?;
        let dim = args
            .iter()
            .find_map(|a| match a {
                Value::Vector(v) => Some(v.len()),
                _ => None,
            })
            .ok_or_else(|| {
                GraphError::Numeric(
                    "mv_normal_diag sample: a vector argument is required to fix the dimension"
                        .to_string(),
                )
            })?;
        let mut draw = Vec::with_capacity(dim);
        for i in 0..dim {
            let mu = elem(args[0], i, dim)?;
            let sigma = elem(args[1], i, dim)?;
            let dist = rand_distr::Normal::new(mu, sigma)
                .map_err(|e| GraphError::Numeric(format!("mv_normal_diag sample: {}", e)))?;
            draw.push(dist.sample(rng));
        }
        Ok(Value::from(draw))
    }
}
