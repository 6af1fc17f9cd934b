//! Derived kinematics of one swimmer body over a stored trajectory.
//!
//! Frame 0 is the header frame and its kinematics are placeholders, so every
//! series covers the physical window `[1, frame_count - 1)`. The final frame is
//! excluded. Positions, velocities and accelerations come from the archival
//! double-precision copy when a frame has one, else from the native fields.

use crate::error::{Result, TrajectoryError};
use crate::numerics::gradient;
use crate::snapshot::{DualPrecision, EnergyTerms, Snapshot, SwimmerParams};
use crate::store::TrajectoryStore;
use crate::theory::{rel_err, CharacteristicScales, ConstraintCurves, ConstraintSample};
use crate::vecmath::{clamp, Vec3};
use log::{debug, info};
use std::path::Path;

/// Half-open range of frame indices fed to the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameWindow {
    pub start: usize,
    pub end: usize,
}

impl FrameWindow {
    /// `[1, frame_count - 1)`: skips the header frame and the final frame.
    pub fn physical(frame_count: usize) -> Self {
        FrameWindow {
            start: 1,
            end: frame_count.saturating_sub(1).max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frames(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// Particle indices of one swimmer body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwimmerSelection {
    pub locater: usize,
    pub first: usize,
    pub second: usize,
}

impl SwimmerSelection {
    /// Body `b` of a three-particle-per-body layout: locater `3b`, satellites `3b+1` and `3b+2`.
    pub fn body(b: usize) -> Self {
        SwimmerSelection {
            locater: 3 * b,
            first: 3 * b + 1,
            second: 3 * b + 2,
        }
    }

    fn check(&self, n: usize, frame: usize) -> Result<()> {
        let max = self.locater.max(self.first).max(self.second);
        if max >= n {
            return Err(TrajectoryError::precondition(format!(
                "particle index {} out of range in frame {} with N = {}",
                max, frame, n
            )));
        }
        Ok(())
    }
}

impl Default for SwimmerSelection {
    fn default() -> Self {
        SwimmerSelection::body(0)
    }
}

/// Energy bookkeeping over the window. Missing terms read as NaN.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnergySeries {
    pub e_locater: Vec<f64>,
    pub e_locater_internal: Vec<f64>,
    pub e_internal: Vec<f64>,
    pub e_simple: Vec<f64>,
    /// `E_locater + E_locater_internal + E_internal`.
    pub total: Vec<f64>,
}

impl EnergySeries {
    /// Ratio of each series value to the first total energy.
    pub fn normalized(values: &[f64], e0: f64) -> Vec<f64> {
        values.iter().map(|e| e / e0).collect()
    }

    pub fn initial_total(&self) -> Option<f64> {
        self.total.first().copied()
    }
}

/// Quantities compared against the prescribed oscillation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintQuantity {
    Displacement12,
    Displacement32,
    Velocity12,
    Velocity32,
    Acceleration12,
    Acceleration32,
}

impl ConstraintQuantity {
    pub const ALL: [ConstraintQuantity; 6] = [
        ConstraintQuantity::Displacement12,
        ConstraintQuantity::Displacement32,
        ConstraintQuantity::Velocity12,
        ConstraintQuantity::Velocity32,
        ConstraintQuantity::Acceleration12,
        ConstraintQuantity::Acceleration32,
    ];
}

/// A simulated series beside the constraint it should follow.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub simulated: Vec<f64>,
    pub constraint: Vec<f64>,
    /// Characteristic scale used to make both series dimensionless.
    pub scale: f64,
}

impl Comparison {
    /// `(simulated - constraint) / scale`
    pub fn scaled_difference(&self) -> Vec<f64> {
        self.simulated
            .iter()
            .zip(&self.constraint)
            .map(|(s, c)| (s - c) / self.scale)
            .collect()
    }

    /// Elementwise relative error with the constraint as the exact value.
    pub fn relative_error(&self) -> Vec<f64> {
        self.simulated
            .iter()
            .zip(&self.constraint)
            .map(|(&s, &c)| rel_err(c, s))
            .collect()
    }
}

/// Per-frame series reconstructed from a trajectory.
#[derive(Debug, Clone)]
pub struct DerivedKinematics {
    pub window: FrameWindow,
    pub selection: SwimmerSelection,
    /// Swimmer parameters read from the header frame.
    pub params: SwimmerParams,
    pub tau: f64,
    pub epsilon: f64,
    pub scales: CharacteristicScales,

    pub time: Vec<f64>,

    // --- Relative geometry ---
    /// Locater position relative to its position in the first windowed frame.
    pub locater_displacement: Vec<Vec3>,
    pub locater_distance: Vec<f64>,
    pub r_12_vec: Vec<Vec3>,
    pub r_32_vec: Vec<Vec3>,
    pub r_12: Vec<f64>,
    pub r_32: Vec<f64>,

    // --- Orientation ---
    /// Unit vector from the second satellite to the first. NaN where they coincide.
    pub orientation: Vec<Vec3>,
    pub cos_theta: Vec<f64>,
    pub theta: Vec<f64>,
    pub theta_dot: Vec<f64>,
    pub theta_ddot: Vec<f64>,

    // --- Projected relative motion ---
    pub u_12: Vec<f64>,
    pub u_32: Vec<f64>,
    pub a_12: Vec<f64>,
    pub a_32: Vec<f64>,

    pub constraints: Vec<ConstraintSample>,
    pub energy: EnergySeries,
}

/// Kinematics of the three selected particles in one frame.
struct BodySample {
    t: f64,
    position: [Vec3; 3],
    velocity: [Vec3; 3],
    acceleration: [Vec3; 3],
    energy: Option<EnergyTerms>,
}

impl BodySample {
    fn read(path: &Path, frame: usize, snapshot: &Snapshot, sel: &SwimmerSelection) -> Result<Self> {
        let p = &snapshot.particles;
        sel.check(p.n as usize, frame)?;
        let t = snapshot.time().ok_or_else(|| {
            TrajectoryError::format(path, format!("frame {} has no integration time", frame))
        })?;
        let pick = |field: &DualPrecision<3>, name: &str| -> Result<[Vec3; 3]> {
            let mut out = [Vec3::zero(); 3];
            for (slot, idx) in out.iter_mut().zip([sel.locater, sel.first, sel.second]) {
                *slot = field.vector(idx).ok_or_else(|| {
                    TrajectoryError::format(
                        path,
                        format!("frame {} has no {} for particle {}", frame, name, idx),
                    )
                })?;
            }
            Ok(out)
        };
        Ok(BodySample {
            t,
            position: pick(&p.position, "position")?,
            velocity: pick(&p.velocity, "velocity")?,
            acceleration: pick(&p.acceleration, "acceleration")?,
            energy: snapshot.log.energy,
        })
    }
}

/// Runs the extractor over the physical window of `store`.
pub fn extract(store: &mut TrajectoryStore, selection: SwimmerSelection) -> Result<DerivedKinematics> {
    let window = FrameWindow::physical(store.frame_count());
    extract_window(store, selection, window)
}

pub fn extract_window(
    store: &mut TrajectoryStore,
    selection: SwimmerSelection,
    window: FrameWindow,
) -> Result<DerivedKinematics> {
    if window.end > store.frame_count() {
        return Err(TrajectoryError::precondition(format!(
            "window [{}, {}) exceeds the {} stored frames",
            window.start,
            window.end,
            store.frame_count()
        )));
    }
    if window.len() < 2 {
        return Err(TrajectoryError::InsufficientFrames {
            required: 2,
            found: window.len(),
        });
    }

    let header = store.read_frame(0)?;
    let params = header.log.swimmer.clone().ok_or_else(|| {
        TrajectoryError::format(store.path(), "header frame has no swimmer parameters")
    })?;
    let tau = header
        .log
        .integrator
        .map(|i| i.tau)
        .ok_or_else(|| TrajectoryError::format(store.path(), "header frame has no integrator parameters"))?;

    info!(
        "Extracting body ({}, {}, {}) over frames [{}, {}) of {}",
        selection.locater,
        selection.first,
        selection.second,
        window.start,
        window.end,
        store.path().display()
    );

    let mut samples = Vec::with_capacity(window.len());
    for frame in window.frames() {
        let snapshot = store.read_frame(frame)?;
        samples.push(BodySample::read(store.path(), frame, &snapshot, &selection)?);
    }
    debug!("Read {} frames", samples.len());

    derive(window, selection, params, tau, &samples)
}

fn derive(
    window: FrameWindow,
    selection: SwimmerSelection,
    params: SwimmerParams,
    tau: f64,
    samples: &[BodySample],
) -> Result<DerivedKinematics> {
    let time: Vec<f64> = samples.iter().map(|s| s.t).collect();
    let origin = samples[0].position[0];

    let locater_displacement: Vec<Vec3> = samples.iter().map(|s| s.position[0] - origin).collect();
    let locater_distance = locater_displacement.iter().map(Vec3::length).collect();
    let r_12_vec: Vec<Vec3> = samples.iter().map(|s| s.position[1] - s.position[0]).collect();
    let r_32_vec: Vec<Vec3> = samples.iter().map(|s| s.position[2] - s.position[0]).collect();
    let r_12 = r_12_vec.iter().map(Vec3::length).collect();
    let r_32 = r_32_vec.iter().map(Vec3::length).collect();

    let orientation: Vec<Vec3> = samples
        .iter()
        .map(|s| (s.position[1] - s.position[2]).normalize())
        .collect();
    let q0 = orientation[0];
    let cos_theta: Vec<f64> = orientation.iter().map(|q| q.dot(q0)).collect();
    // rounding can push the dot product of unit vectors past +-1
    let theta: Vec<f64> = cos_theta.iter().map(|&c| clamp(c, -1.0, 1.0).acos()).collect();
    let theta_dot = gradient(&theta, &time)?;
    let theta_ddot = gradient(&theta_dot, &time)?;

    // relative motion of a satellite along the body axis
    let project = |rows: &[[Vec3; 3]], satellite: usize| -> Vec<f64> {
        rows.iter()
            .zip(&orientation)
            .map(|(r, q)| q.dot(r[satellite] - r[0]))
            .collect()
    };
    let velocities: Vec<[Vec3; 3]> = samples.iter().map(|s| s.velocity).collect();
    let accelerations: Vec<[Vec3; 3]> = samples.iter().map(|s| s.acceleration).collect();
    let u_12 = project(&velocities, 1);
    let u_32 = project(&velocities, 2);
    let a_12 = project(&accelerations, 1);
    let a_32 = project(&accelerations, 2);

    let curves = ConstraintCurves::new(&params, tau);
    let constraints = time.iter().map(|&t| curves.at(t)).collect();

    let term = |f: fn(&EnergyTerms) -> f64| -> Vec<f64> {
        samples
            .iter()
            .map(|s| s.energy.as_ref().map_or(f64::NAN, f))
            .collect()
    };
    let energy = EnergySeries {
        e_locater: term(|e| e.e_locater),
        e_locater_internal: term(|e| e.e_locater_internal),
        e_internal: term(|e| e.e_internal),
        e_simple: term(|e| e.e_simple.unwrap_or(f64::NAN)),
        total: term(|e| e.total()),
    };

    Ok(DerivedKinematics {
        window,
        selection,
        epsilon: params.epsilon(),
        scales: CharacteristicScales::from_params(&params),
        params,
        tau,
        time,
        locater_displacement,
        locater_distance,
        r_12_vec,
        r_32_vec,
        r_12,
        r_32,
        orientation,
        cos_theta,
        theta,
        theta_dot,
        theta_ddot,
        u_12,
        u_32,
        a_12,
        a_32,
        constraints,
        energy,
    })
}

impl DerivedKinematics {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Pair separations relative to `R_avg`.
    pub fn oscillation_12(&self) -> Vec<f64> {
        self.r_12.iter().map(|r| r - self.params.r_avg).collect()
    }

    pub fn oscillation_32(&self) -> Vec<f64> {
        self.r_32.iter().map(|r| r - self.params.r_avg).collect()
    }

    /// Simulated series against the constraint curve. The 3-2 displacement is
    /// compared with the negated constraint since satellite 2 sits on the
    /// opposite side of the locater.
    pub fn compare(&self, quantity: ConstraintQuantity) -> Comparison {
        let c = &self.constraints;
        let pick = |f: fn(&ConstraintSample) -> f64| c.iter().map(f).collect::<Vec<f64>>();
        let s = &self.scales;
        let (simulated, constraint, scale) = match quantity {
            ConstraintQuantity::Displacement12 => (self.oscillation_12(), pick(|c| c.r_12), s.length),
            ConstraintQuantity::Displacement32 => (self.oscillation_32(), pick(|c| -c.r_32), s.length),
            ConstraintQuantity::Velocity12 => (self.u_12.clone(), pick(|c| c.u_12), s.velocity),
            ConstraintQuantity::Velocity32 => (self.u_32.clone(), pick(|c| c.u_32), s.velocity),
            ConstraintQuantity::Acceleration12 => (self.a_12.clone(), pick(|c| c.a_12), s.acceleration),
            ConstraintQuantity::Acceleration32 => (self.a_32.clone(), pick(|c| c.a_32), s.acceleration),
        };
        Comparison {
            simulated,
            constraint,
            scale,
        }
    }

    /// Locater displacement in the final windowed frame.
    pub fn final_displacement(&self) -> Vec3 {
        self.locater_displacement.last().copied().unwrap_or_default()
    }
}
