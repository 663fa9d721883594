//! Levenberg-Marquardt least squares over pixel samples.
//!
//! Generic over the parameter count so the same loop serves any analytic
//! profile. Uses f64 throughout; the normal equations are accumulated in one
//! pass per iteration without storing the Jacobian.

use super::linear_solver::solve;
use crate::error::{HciError, Result};

/// One pixel: position and measured value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone)]
pub struct LMConfig {
    pub max_iterations: usize,
    /// Largest absolute parameter change that counts as converged.
    pub convergence_threshold: f64,
    pub initial_lambda: f64,
    /// Factor applied to lambda after a rejected step.
    pub lambda_up: f64,
    /// Factor applied to lambda after an accepted step.
    pub lambda_down: f64,
    /// Damping beyond which the fit is abandoned.
    pub max_lambda: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 1e-6,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e10,
        }
    }
}

/// Converged parameters.
#[derive(Debug, Clone, Copy)]
pub struct LMFit<const N: usize> {
    pub params: [f64; N],
    /// Sum of squared residuals at `params`.
    pub chi2: f64,
    pub iterations: usize,
}

/// Model that can be fit with L-M optimization.
pub trait LMModel<const N: usize> {
    fn evaluate(&self, x: f64, y: f64, params: &[f64; N]) -> f64;

    /// Partial derivatives with respect to each parameter.
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; N]) -> [f64; N];

    /// Clamp parameters into their valid domain after an update.
    fn constrain(&self, params: &mut [f64; N]);
}

/// Fit `model` to `samples` starting from `initial`.
///
/// Converged once a step moves no parameter by more than
/// `convergence_threshold`, whether the step is accepted or rejected (a
/// rejected step that small means the fit already sits at the minimum).
/// Anything else ends in [`HciError::Fit`]: singular normal equations,
/// runaway damping or the iteration cap.
pub fn optimize<const N: usize, M: LMModel<N>>(
    model: &M,
    samples: &[Sample],
    initial: [f64; N],
    config: &LMConfig,
) -> Result<LMFit<N>> {
    let mut params = initial;
    let mut lambda = config.initial_lambda;
    let mut chi2 = chi_squared(model, samples, &params);

    for iteration in 1..=config.max_iterations {
        let (mut hessian, gradient) = normal_equations(model, samples, &params);
        for (i, row) in hessian.iter_mut().enumerate() {
            row[i] *= 1.0 + lambda;
        }

        let Some(delta) = solve(&hessian, &gradient) else {
            return Err(HciError::Fit(format!(
                "normal equations became singular at iteration {}",
                iteration
            )));
        };
        let step = delta.iter().fold(0.0f64, |acc, d| acc.max(d.abs()));

        let mut candidate = params;
        for (p, d) in candidate.iter_mut().zip(delta) {
            *p += d;
        }
        model.constrain(&mut candidate);
        let candidate_chi2 = chi_squared(model, samples, &candidate);

        let accepted = candidate_chi2 < chi2;
        if accepted {
            params = candidate;
            chi2 = candidate_chi2;
            lambda *= config.lambda_down;
        }
        if step < config.convergence_threshold {
            return Ok(LMFit {
                params,
                chi2,
                iterations: iteration,
            });
        }
        if !accepted {
            lambda *= config.lambda_up;
            if lambda > config.max_lambda {
                return Err(HciError::Fit(format!(
                    "no downhill step found after {} iterations",
                    iteration
                )));
            }
        }
    }

    Err(HciError::Fit(format!(
        "did not converge within {} iterations",
        config.max_iterations
    )))
}

fn chi_squared<const N: usize, M: LMModel<N>>(
    model: &M,
    samples: &[Sample],
    params: &[f64; N],
) -> f64 {
    samples
        .iter()
        .map(|s| {
            let r = s.z - model.evaluate(s.x, s.y, params);
            r * r
        })
        .sum()
}

/// `J^T J` and `J^T r` at `params`; the upper triangle is accumulated, then mirrored.
#[allow(clippy::needless_range_loop)]
fn normal_equations<const N: usize, M: LMModel<N>>(
    model: &M,
    samples: &[Sample],
    params: &[f64; N],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for s in samples {
        let row = model.jacobian_row(s.x, s.y, params);
        let r = s.z - model.evaluate(s.x, s.y, params);
        for i in 0..N {
            gradient[i] += row[i] * r;
            for j in i..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}
