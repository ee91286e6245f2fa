//! Extrinsic calibration of the pan/tilt mount.
//!
//! The operator points the device at a handful of known floor locations and
//! records the pan/tilt readings. Fitting the four mount parameters is a
//! small nonlinear least-squares problem; the objective has kinks near the
//! ±180° pan wrap, so it is minimized with a derivative-free simplex search.
//!
//! ```no_run
//! use sprayer_targeting::calibration::{CalibrationSample, CalibrationSolver};
//! use sprayer_targeting::pan_tilt::ExtrinsicParams;
//!
//! let samples = vec![
//!     CalibrationSample::new([1.0, 1.0, 0.0], [45.0, -30.0]),
//!     CalibrationSample::new([0.0, 2.0, 0.0], [0.0, -35.0]),
//!     CalibrationSample::new([-1.0, 1.0, 0.0], [-45.0, -30.0]),
//!     CalibrationSample::new([3.0, 0.0, 0.0], [90.0, -25.0]),
//! ];
//! let fit = CalibrationSolver::default().fit(&samples, ExtrinsicParams::new(1.5, 0.0, 0.0, 0.0));
//! println!("height {:.2} m, rms {:.2}°", fit.params.height, fit.rms_error_deg());
//! ```

use crate::{
    constants::{
        DEFAULT_MAX_RMS_ERROR_DEG, DEFAULT_SOLVER_ANGLE_STEP, DEFAULT_SOLVER_F_TOLERANCE,
        DEFAULT_SOLVER_HEIGHT_STEP, DEFAULT_SOLVER_MAX_EVALUATIONS,
        DEFAULT_SOLVER_MAX_ITERATIONS, DEFAULT_SOLVER_RESTARTS, DEFAULT_SOLVER_X_TOLERANCE,
        EXTRINSIC_PARAM_COUNT, MIN_CALIBRATION_SAMPLES,
    },
    pan_tilt::{angles_for, ExtrinsicParams},
    Error, Result,
};
use argmin::{
    core::{CostFunction, Executor, State, TerminationReason},
    solver::neldermead::NelderMead,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// A floor point and the angles measured while aiming at it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Floor point `(x, y, z)` in metres
    pub point: [f64; 3],
    /// Measured `(pan, tilt)` in degrees
    pub angles: [f64; 2],
}

impl CalibrationSample {
    /// Create a sample
    #[must_use]
    pub const fn new(point: [f64; 3], angles: [f64; 2]) -> Self {
        Self { point, angles }
    }

    /// Squared angular error of `params` on this sample, in degrees²
    #[must_use]
    pub fn squared_error(&self, params: &ExtrinsicParams) -> f64 {
        let [x, y, z] = self.point;
        let [measured_pan, measured_tilt] = self.angles;
        let (pan, tilt) = angles_for(x, y, z, params);
        (pan - measured_pan).powi(2) + (tilt - measured_tilt).powi(2)
    }
}

/// Sum of squared angular errors over all samples, in degrees²
#[must_use]
pub fn total_squared_error(samples: &[CalibrationSample], params: &ExtrinsicParams) -> f64 {
    samples.iter().map(|s| s.squared_error(params)).sum()
}

/// Calibration objective as seen by the simplex search
struct CalibrationProblem<'a> {
    samples: &'a [CalibrationSample],
}

impl CostFunction for CalibrationProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        let value = total_squared_error(self.samples, &params_from_slice(param));
        // Non-finite values rank as the worst vertex
        Ok(if value.is_finite() { value } else { f64::INFINITY })
    }
}

fn params_from_slice(values: &[f64]) -> ExtrinsicParams {
    let mut array = [0.0; EXTRINSIC_PARAM_COUNT];
    for (slot, v) in array.iter_mut().zip(values) {
        *slot = *v;
    }
    ExtrinsicParams::from_array(array)
}

/// One simplex run: best point, its value, iterations, evaluations, and
/// whether it stopped on tolerance
struct SearchRun {
    best: Vec<f64>,
    value: f64,
    iterations: usize,
    evaluations: usize,
    converged: bool,
}

/// Tunables for the calibration search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Iteration budget
    pub max_iterations: usize,
    /// Objective evaluation budget, checked before each restart
    pub max_evaluations: usize,
    /// Restarts stop once the best point moves less than this per coordinate
    pub x_tolerance: f64,
    /// A run converges once the standard deviation of the simplex values
    /// drops below this, in degrees²
    pub f_tolerance: f64,
    /// Initial simplex step for the height, in metres
    pub height_step: f64,
    /// Initial simplex step for the three angles, in degrees
    pub angle_step: f64,
    /// Simplex rebuilds around the best point after convergence
    pub restarts: usize,
    /// RMS angular error above which a fit is rejected, in degrees
    pub max_rms_error_deg: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_SOLVER_MAX_ITERATIONS,
            max_evaluations: DEFAULT_SOLVER_MAX_EVALUATIONS,
            x_tolerance: DEFAULT_SOLVER_X_TOLERANCE,
            f_tolerance: DEFAULT_SOLVER_F_TOLERANCE,
            height_step: DEFAULT_SOLVER_HEIGHT_STEP,
            angle_step: DEFAULT_SOLVER_ANGLE_STEP,
            restarts: DEFAULT_SOLVER_RESTARTS,
            max_rms_error_deg: DEFAULT_MAX_RMS_ERROR_DEG,
        }
    }
}

impl SolverOptions {
    /// Validate solver settings
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for zero budgets or non-positive steps and tolerances.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 || self.max_evaluations == 0 {
            return Err(Error::ConfigError(
                "Solver budgets must be greater than 0".to_string(),
            ));
        }
        if !(self.height_step > 0.0 && self.angle_step > 0.0) {
            return Err(Error::ConfigError(
                "Solver simplex steps must be positive".to_string(),
            ));
        }
        if !(self.x_tolerance > 0.0 && self.f_tolerance > 0.0) {
            return Err(Error::ConfigError(
                "Solver tolerances must be positive".to_string(),
            ));
        }
        if !(self.max_rms_error_deg > 0.0) {
            return Err(Error::ConfigError(
                "Maximum RMS calibration error must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a calibration fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationFit {
    /// Fitted parameters
    pub params: ExtrinsicParams,
    /// Final objective value, total squared error in degrees²
    pub residual: f64,
    /// Number of samples fitted
    pub sample_count: usize,
    /// Simplex iterations performed
    pub iterations: usize,
    /// Objective evaluations performed
    pub evaluations: usize,
    /// Whether the search stopped on tolerance rather than budget
    pub converged: bool,
}

impl CalibrationFit {
    /// Mean squared error per sample, in degrees²
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn residual_per_sample(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.residual / self.sample_count as f64
    }

    /// Root-mean-square error over every measured angle, in degrees
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rms_error_deg(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        (self.residual / (2 * self.sample_count) as f64).sqrt()
    }

    /// Return the parameters if the fit is good enough to use
    ///
    /// # Errors
    ///
    /// Returns `CalibrationRejected` if the RMS error exceeds the threshold,
    /// or `InvalidParameter` if the fitted height is not usable.
    pub fn accept(&self, max_rms_error_deg: f64) -> Result<ExtrinsicParams> {
        let rms_deg = self.rms_error_deg();
        if !rms_deg.is_finite() || rms_deg > max_rms_error_deg {
            return Err(Error::CalibrationRejected {
                rms_deg,
                threshold_deg: max_rms_error_deg,
            });
        }
        self.params.validate()?;
        Ok(self.params)
    }
}

/// Fits [`ExtrinsicParams`] to measured samples
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationSolver {
    options: SolverOptions,
}

impl CalibrationSolver {
    /// Create a solver with the given options
    #[must_use]
    pub const fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    /// Solver options
    #[must_use]
    pub const fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Minimize the total squared angular error starting from `initial_guess`
    ///
    /// Never fails: a poor fit is reported through [`CalibrationFit::residual`]
    /// and must be checked by the caller, e.g. with [`CalibrationFit::accept`].
    #[must_use]
    pub fn fit(&self, samples: &[CalibrationSample], initial_guess: ExtrinsicParams) -> CalibrationFit {
        if samples.len() < MIN_CALIBRATION_SAMPLES {
            warn!(
                "Calibrating with {} samples; at least {} are needed for a well-posed fit",
                samples.len(),
                MIN_CALIBRATION_SAMPLES
            );
        }

        let problem = CalibrationProblem { samples };
        let o = &self.options;

        let mut best = initial_guess.to_array().to_vec();
        let mut best_value = problem.cost(&best).unwrap_or(f64::INFINITY);
        let mut iterations = 0;
        let mut evaluations = 1;
        let mut converged = false;

        for run in 0..=o.restarts {
            let remaining = o.max_iterations.saturating_sub(iterations);
            if remaining == 0 || evaluations >= o.max_evaluations {
                break;
            }
            let outcome = match self.search(samples, &best, remaining) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Simplex search stopped early: {e}");
                    converged = false;
                    break;
                }
            };
            iterations += outcome.iterations;
            evaluations += outcome.evaluations;
            converged = outcome.converged;

            let moved = outcome
                .best
                .iter()
                .zip(&best)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0_f64, f64::max);
            let improvement = best_value - outcome.value;
            if outcome.value <= best_value {
                best = outcome.best;
                best_value = outcome.value;
            }

            debug!(
                "Simplex run {run} finished: value {:.6e}, {iterations} iterations, {evaluations} evaluations",
                outcome.value
            );

            if !converged || (moved <= o.x_tolerance && improvement.abs() <= o.f_tolerance) {
                break;
            }
        }

        let fit = CalibrationFit {
            params: params_from_slice(&best),
            residual: best_value,
            sample_count: samples.len(),
            iterations,
            evaluations,
            converged,
        };

        info!(
            "Calibration fit: height {:.4} m, pan {:.3}°, tilt {:.3}°, roll {:.3}° (residual {:.4} deg², rms {:.3}°, {} iterations{})",
            fit.params.height,
            fit.params.initial_pan,
            fit.params.initial_tilt,
            fit.params.initial_roll,
            fit.residual,
            fit.rms_error_deg(),
            fit.iterations,
            if fit.converged { "" } else { ", budget exhausted" }
        );

        fit
    }

    /// Run one Nelder-Mead search from a simplex spanned by the option steps
    #[allow(clippy::cast_possible_truncation)] // Counts are bounded by max_iterations
    fn search(
        &self,
        samples: &[CalibrationSample],
        start: &[f64],
        max_iterations: usize,
    ) -> std::result::Result<SearchRun, argmin::core::Error> {
        let o = &self.options;
        let steps = [o.height_step, o.angle_step, o.angle_step, o.angle_step];
        let mut simplex = vec![start.to_vec()];
        for (k, step) in steps.iter().enumerate() {
            let mut vertex = start.to_vec();
            vertex[k] += step;
            simplex.push(vertex);
        }

        let solver = NelderMead::new(simplex).with_sd_tolerance(o.f_tolerance)?;
        let result = Executor::new(CalibrationProblem { samples }, solver)
            .configure(|state| state.max_iters(max_iterations as u64))
            .run()?;

        let state = result.state();
        let best = state
            .get_best_param()
            .cloned()
            .unwrap_or_else(|| start.to_vec());
        let evaluations = state.get_func_counts().get("cost_count").copied().unwrap_or(0);
        Ok(SearchRun {
            best,
            value: state.get_best_cost(),
            iterations: state.get_iter() as usize,
            evaluations: evaluations as usize,
            converged: matches!(
                state.get_termination_reason(),
                Some(TerminationReason::SolverConverged)
            ),
        })
    }
}

/// Fit with default solver options; see [`CalibrationSolver::fit`]
#[must_use]
pub fn fit(samples: &[CalibrationSample], initial_guess: ExtrinsicParams) -> CalibrationFit {
    CalibrationSolver::default().fit(samples, initial_guess)
}
