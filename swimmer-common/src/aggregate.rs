//! Scaling of the net swimmer displacement across a family of runs.

use crate::error::{Result, TrajectoryError};
use crate::numerics::{argsort, distinct_count, log_log_fit, LinearFit};
use crate::snapshot::Snapshot;
use crate::store::TrajectoryStore;
use crate::theory::{dz_leading_order, rel_err};
use crate::vecmath::Vec3;
use log::{debug, warn};
use serde::Serialize;
use std::f64::consts::PI;
use std::path::PathBuf;

/// Particle radius; every length is measured in units of it.
const RADIUS: f64 = 1.0;
/// Order of the engine's Runge-Kutta integrator.
const INTEGRATOR_ORDER: f64 = 4.0;
const THEORY_SAMPLES: usize = 1000;

/// Net displacement of one run and the parameters it was produced with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub path: PathBuf,
    pub r_avg: f64,
    pub z_height: f64,
    pub phase_shift: f64,
    pub u0: f64,
    pub omega: f64,
    pub epsilon: f64,
    pub dt: f64,
    pub final_t: f64,
    /// Locater position in the final frame minus its position in frame 1.
    pub displacement: [f64; 3],
    pub net_displacement: f64,
}

impl RunSummary {
    /// Reads frame 1 and the final frame of `store`.
    pub fn from_store(store: &mut TrajectoryStore, locater: usize) -> Result<Self> {
        let frame_count = store.frame_count();
        if frame_count < 2 {
            return Err(TrajectoryError::InsufficientFrames {
                required: 2,
                found: frame_count,
            });
        }
        let first = store.read_frame(1)?;
        let last = store.read_frame(frame_count - 1)?;

        let swimmer = first.log.swimmer.clone().ok_or_else(|| {
            TrajectoryError::format(store.path(), "no swimmer parameters in frame 1")
        })?;
        let integrator = last.log.integrator.ok_or_else(|| {
            TrajectoryError::format(store.path(), "no integrator parameters in the final frame")
        })?;
        let position = |frame: usize, snapshot: &Snapshot| -> Result<Vec3> {
            snapshot.particles.position.vector(locater).ok_or_else(|| {
                TrajectoryError::precondition(format!(
                    "locater index {} out of range in frame {} of {}",
                    locater,
                    frame,
                    store.path().display()
                ))
            })
        };
        let displacement = position(frame_count - 1, &last)? - position(1, &first)?;

        debug!(
            "{}: R_avg={} dt={} |dR|={}",
            store.path().display(),
            swimmer.r_avg,
            integrator.dt,
            displacement.length()
        );
        Ok(RunSummary {
            path: store.path().to_path_buf(),
            r_avg: swimmer.r_avg,
            z_height: swimmer.z_height,
            phase_shift: swimmer.phase_shift,
            u0: swimmer.u0,
            omega: swimmer.omega,
            epsilon: swimmer.epsilon(),
            dt: integrator.dt,
            final_t: integrator.t,
            displacement: displacement.to_array(),
            net_displacement: displacement.length(),
        })
    }
}

/// Run parameter a sweep varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlParameter {
    Separation,
    TimeStep,
    Height,
    PhaseShift,
    Epsilon,
}

impl ControlParameter {
    pub const ALL: [ControlParameter; 5] = [
        ControlParameter::Separation,
        ControlParameter::TimeStep,
        ControlParameter::Height,
        ControlParameter::PhaseShift,
        ControlParameter::Epsilon,
    ];

    pub fn value(self, run: &RunSummary) -> f64 {
        match self {
            ControlParameter::Separation => run.r_avg,
            ControlParameter::TimeStep => run.dt,
            ControlParameter::Height => run.z_height,
            ControlParameter::PhaseShift => run.phase_shift,
            ControlParameter::Epsilon => run.epsilon,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlParameter::Separation => "R_avg",
            ControlParameter::TimeStep => "dt",
            ControlParameter::Height => "Z_height",
            ControlParameter::PhaseShift => "phase_shift",
            ControlParameter::Epsilon => "epsilon",
        }
    }

    fn is_fitted(self) -> bool {
        matches!(
            self,
            ControlParameter::Separation | ControlParameter::TimeStep | ControlParameter::Height
        )
    }
}

/// Runs sorted by one control parameter, with fitted and predicted scaling.
#[derive(Debug, Clone, Serialize)]
pub struct Sweep {
    pub parameter: ControlParameter,
    pub x: Vec<f64>,
    pub net_displacement: Vec<f64>,
    /// Quantity fitted against `x`: the net displacement, or for time steps the
    /// relative deviation from the smallest-`dt` run.
    pub response: Vec<f64>,
    /// `ln|response| = m ln|x| + b`, absent when the fit failed or is not defined.
    pub fit: Option<LinearFit>,
    pub predicted_exponent: Option<f64>,
    /// Leading-order displacement at each `x`.
    pub leading_order: Option<Vec<f64>>,
    /// `relErr(|dZ|, |dR|)` at each `x`.
    pub relative_error: Option<Vec<f64>>,
    /// Dense leading-order curve for plotting.
    pub theory_curve: Option<Vec<(f64, f64)>>,
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Builds the sweep over `parameter`, or `None` unless it takes at least two distinct values.
///
/// Theory is evaluated with the fixed parameters of the first run after sorting.
pub fn sweep(runs: &[RunSummary], parameter: ControlParameter) -> Option<Sweep> {
    let values: Vec<f64> = runs.iter().map(|r| parameter.value(r)).collect();
    if distinct_count(&values) < 2 {
        return None;
    }
    let order = argsort(&values);
    let sorted: Vec<&RunSummary> = order.iter().map(|&i| &runs[i]).collect();
    let x: Vec<f64> = sorted.iter().map(|r| parameter.value(r)).collect();
    let net_displacement: Vec<f64> = sorted.iter().map(|r| r.net_displacement).collect();
    let reference = sorted[0];

    let (fit_x, response) = match parameter {
        ControlParameter::TimeStep => {
            let base = net_displacement[0];
            let deviation: Vec<f64> = net_displacement[1..]
                .iter()
                .map(|d| (d - base).abs() / base.abs())
                .collect();
            (x[1..].to_vec(), deviation)
        }
        _ => (x.clone(), net_displacement.clone()),
    };

    let fit = if parameter.is_fitted() {
        match log_log_fit(&fit_x, &response) {
            Ok(fit) => Some(fit),
            Err(e) => {
                warn!("Skipping {} scaling fit: {}", parameter.name(), e);
                None
            }
        }
    } else {
        None
    };

    let dz = |phase: f64, u0: f64, x: f64| dz_leading_order(phase, u0, reference.omega, RADIUS, x);
    let leading_order: Option<Vec<f64>> = match parameter {
        ControlParameter::Separation => Some(
            x.iter()
                .map(|&r| dz(reference.phase_shift, reference.u0, r))
                .collect(),
        ),
        ControlParameter::PhaseShift => Some(
            x.iter()
                .map(|&phi| dz(phi, reference.u0, reference.r_avg))
                .collect(),
        ),
        ControlParameter::Epsilon => Some(
            x.iter()
                .map(|&eps| dz(reference.phase_shift, eps * reference.omega * reference.r_avg, reference.r_avg))
                .collect(),
        ),
        _ => None,
    };

    let predicted_exponent = match parameter {
        ControlParameter::TimeStep => Some(INTEGRATOR_ORDER),
        ControlParameter::Separation => leading_order
            .as_ref()
            .and_then(|dz| log_log_fit(&x, dz).ok())
            .map(|fit| fit.slope),
        _ => None,
    };

    let relative_error = match parameter {
        ControlParameter::Separation | ControlParameter::PhaseShift => leading_order.as_ref().map(|dz| {
            dz.iter()
                .zip(&net_displacement)
                .map(|(exact, approx)| rel_err(exact.abs(), approx.abs()))
                .collect()
        }),
        _ => None,
    };

    let theory_curve = match parameter {
        ControlParameter::Separation => Some(
            linspace(2.0, 40.0, THEORY_SAMPLES)
                .into_iter()
                .map(|r| (r, dz(reference.phase_shift, reference.u0, r)))
                .collect(),
        ),
        ControlParameter::PhaseShift => Some(
            linspace(0.0, 2.0 * PI, THEORY_SAMPLES)
                .into_iter()
                .map(|phi| (phi, dz(phi, reference.u0, reference.r_avg)))
                .collect(),
        ),
        ControlParameter::Epsilon => {
            let max_eps = x.iter().cloned().fold(0.0, f64::max);
            Some(
                linspace(0.0, max_eps, THEORY_SAMPLES)
                    .into_iter()
                    .map(|eps| {
                        (eps, dz(reference.phase_shift, eps * reference.omega * reference.r_avg, reference.r_avg))
                    })
                    .collect(),
            )
        }
        _ => None,
    };

    Some(Sweep {
        parameter,
        x,
        net_displacement,
        response,
        fit,
        predicted_exponent,
        leading_order,
        relative_error,
        theory_curve,
    })
}

/// Every sweep the runs support.
pub fn sweeps(runs: &[RunSummary]) -> Vec<Sweep> {
    ControlParameter::ALL
        .iter()
        .filter_map(|&p| sweep(runs, p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(r_avg: f64, dt: f64, net: f64) -> RunSummary {
        RunSummary {
            path: PathBuf::from(format!("run_{}_{}.traj", r_avg, dt)),
            r_avg,
            z_height: 2.1,
            phase_shift: -PI / 2.0,
            u0: 1.4,
            omega: 1.0,
            epsilon: 1.4 / r_avg,
            dt,
            final_t: 1.0,
            displacement: [net, 0.0, 0.0],
            net_displacement: net,
        }
    }

    #[test]
    fn single_valued_parameter_has_no_sweep() {
        let runs = vec![run(3.5, 1e-3, 0.1), run(3.5, 1e-3, 0.2)];
        assert!(sweep(&runs, ControlParameter::Separation).is_none());
        assert!(sweeps(&runs).is_empty());
    }

    #[test]
    fn separation_sweep_recovers_power_law() {
        let runs: Vec<RunSummary> = [8.0, 4.0, 16.0]
            .iter()
            .map(|&r| run(r, 1e-3, 2.0 * r.powi(-4)))
            .collect();
        let s = sweep(&runs, ControlParameter::Separation).unwrap();
        assert_eq!(s.x, vec![4.0, 8.0, 16.0]);
        let fit = s.fit.unwrap();
        assert!((fit.slope + 4.0).abs() < 1e-10);
        // leading order decays close to R^-4 at these separations
        let predicted = s.predicted_exponent.unwrap();
        assert!((predicted + 4.0).abs() < 0.1, "predicted {}", predicted);
        assert_eq!(s.relative_error.unwrap().len(), 3);
    }

    #[test]
    fn time_step_sweep_fits_deviation_from_finest_run() {
        let base = 0.5;
        let runs: Vec<RunSummary> = [1e-3, 2e-3, 4e-3, 8e-3]
            .iter()
            .map(|&dt: &f64| run(3.5, dt, base * (1.0 + 1e3 * dt.powi(4))))
            .collect();
        let s = sweep(&runs, ControlParameter::TimeStep).unwrap();
        assert_eq!(s.response.len(), 3);
        assert!((s.fit.unwrap().slope - 4.0).abs() < 1e-6);
        assert_eq!(s.predicted_exponent, Some(4.0));
    }

    #[test]
    fn failed_fit_is_skipped() {
        let runs = vec![run(3.0, 1e-3, 0.0), run(4.0, 1e-3, 0.0)];
        let s = sweep(&runs, ControlParameter::Separation).unwrap();
        assert!(s.fit.is_none());
    }
}
