//! Closed-form predictions for the collinear swimmer.

use crate::snapshot::SwimmerParams;
use std::f64::consts::PI;

/// Characteristic scales of an oscillating pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacteristicScales {
    pub time: f64,
    pub velocity: f64,
    pub length: f64,
    pub acceleration: f64,
}

impl CharacteristicScales {
    pub fn new(u0: f64, omega: f64) -> Self {
        CharacteristicScales {
            time: 1.0 / omega,
            velocity: u0,
            length: u0 / omega,
            acceleration: u0 * omega,
        }
    }

    pub fn from_params(params: &SwimmerParams) -> Self {
        Self::new(params.u0, params.omega)
    }
}

/// Prescribed oscillation of the two satellites relative to the locater.
///
/// Satellite 1 follows `L sin(w tau t)`, satellite 2 the same curve shifted by
/// the phase; velocities and accelerations are the matching cosine and negative
/// sine curves scaled by the characteristic velocity and acceleration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintCurves {
    pub scales: CharacteristicScales,
    pub omega: f64,
    pub tau: f64,
    pub phase_shift: f64,
}

/// Constraint values for one time sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConstraintSample {
    pub r_12: f64,
    pub r_32: f64,
    pub u_12: f64,
    pub u_32: f64,
    pub a_12: f64,
    pub a_32: f64,
}

impl ConstraintCurves {
    pub fn new(params: &SwimmerParams, tau: f64) -> Self {
        ConstraintCurves {
            scales: CharacteristicScales::from_params(params),
            omega: params.omega,
            tau,
            phase_shift: params.phase_shift,
        }
    }

    pub fn at(&self, t: f64) -> ConstraintSample {
        let arg = self.omega * self.tau * t;
        let shifted = arg + self.phase_shift;
        let s = &self.scales;
        ConstraintSample {
            r_12: s.length * arg.sin(),
            r_32: s.length * shifted.sin(),
            u_12: s.velocity * arg.cos(),
            u_32: s.velocity * shifted.cos(),
            a_12: -s.acceleration * arg.sin(),
            a_32: -s.acceleration * shifted.sin(),
        }
    }
}

/// Separation dependence of the leading-order drift, `x = R_avg / a`.
pub fn f_d(x: f64) -> f64 {
    let x3 = x.powi(3);
    let denom = 17.0 - 18.0 * x3;
    3.0 * (-68.0 + 93.0 * x3) / (x * denom * denom)
}

/// Leading-order net displacement per period of a swimmer with particle radius `a`.
pub fn dz_leading_order(phase_shift: f64, u0: f64, omega: f64, a: f64, x: f64) -> f64 {
    let ratio = u0 / (a * omega);
    -PI * phase_shift.sin() * ratio * ratio * f_d(x)
}

/// `|exact - approx| / |exact|`; Inf or NaN when `exact` is zero.
pub fn rel_err(exact: f64, approx: f64) -> f64 {
    (exact - approx).abs() / exact.abs()
}
