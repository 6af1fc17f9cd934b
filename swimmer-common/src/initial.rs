//! Header frame of a collinear-swimmer trajectory.
//!
//! Kinematics written here are placeholders for the engine, which computes the
//! articulation itself. Velocities and accelerations are set to `+x` so they are
//! never mistaken for defaults.

use crate::builder::{ParticleTopology, SnapshotBuilder};
use crate::config::{BodyOrientation, SwimmerConfig, PARTICLES_PER_BODY};
use crate::error::Result;
use crate::store::TrajectoryStore;
use crate::vecmath::Vec3;
use log::info;
use std::f64::consts::FRAC_1_SQRT_2;

pub const TYPE_NAMES: [&str; 2] = ["constrained", "locater"];
pub const CONSTRAINED_TYPEID: u32 = 0;
pub const LOCATER_TYPEID: u32 = 1;

const IDENTITY_QUAT: [f64; 4] = [1.0, 0.0, 0.0, 0.0];
// -3pi/2 about the y axis, maps +x onto -z
const X_TO_NEG_Z_QUAT: [f64; 4] = [-FRAC_1_SQRT_2, 0.0, FRAC_1_SQRT_2, 0.0];

/// Position, orientation and type of every particle in the header frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialLayout {
    pub typeid: Vec<u32>,
    pub orientation: Vec<[f64; 4]>,
    pub position: Vec<[f64; 3]>,
    pub velocity: Vec<[f64; 3]>,
    pub acceleration: Vec<[f64; 3]>,
}

impl BodyOrientation {
    fn quaternion(self) -> [f64; 4] {
        match self {
            BodyOrientation::PlusX => IDENTITY_QUAT,
            BodyOrientation::MinusZ => X_TO_NEG_Z_QUAT,
        }
    }

    fn axis(self) -> Vec3 {
        match self {
            BodyOrientation::PlusX => Vec3::unit_x(),
            BodyOrientation::MinusZ => Vec3::new(0.0, 0.0, -1.0),
        }
    }
}

/// Lays out `M` collinear bodies: locater at `3i`, satellite `3i+1` at `+R_avg`
/// and satellite `3i+2` at `-R_avg + (U0/omega) sin(phase_angle)` along the body
/// axis, where the second pair starts on its phase-shifted constraint.
///
/// With an image system the bodies `i >= M/2` are mirror images below the
/// wall: height `-Z_height` and quaternion components 1 and 2 negated.
pub fn layout(config: &SwimmerConfig) -> InitialLayout {
    let s = &config.swimmer;
    let m = s.number_bodies as usize;
    let n = config.number_particles() as usize;
    let axis = s.orientation.axis();
    let quat = s.orientation.quaternion();
    let second_offset = -s.r_avg + (s.u0 / s.omega) * s.phase_angle.sin();
    let mut image_quat = quat;
    image_quat[1] = -image_quat[1];
    image_quat[2] = -image_quat[2];

    let mut out = InitialLayout {
        typeid: Vec::with_capacity(n),
        orientation: Vec::with_capacity(n),
        position: Vec::with_capacity(n),
        velocity: vec![Vec3::unit_x().to_array(); n],
        acceleration: vec![Vec3::unit_x().to_array(); n],
    };

    for i in 0..m {
        let is_image = s.image_system && 2 * i >= m;
        let (height, q) = if is_image {
            (-s.z_height, image_quat)
        } else {
            (s.z_height, quat)
        };
        let locater = Vec3::new(0.0, 0.0, height);
        let body = [locater, locater + axis * s.r_avg, locater + axis * second_offset];
        for (j, p) in body.iter().enumerate() {
            out.typeid.push(if j == 0 { LOCATER_TYPEID } else { CONSTRAINED_TYPEID });
            out.orientation.push(q);
            out.position.push(p.to_array());
        }
    }
    debug_assert_eq!(out.position.len(), (PARTICLES_PER_BODY as usize) * m);
    out
}

/// Stages the complete header frame for `config` in a builder.
pub fn build_initial_frame(config: &SwimmerConfig, store: &TrajectoryStore) -> Result<SnapshotBuilder> {
    config.validate()?;
    let layout = layout(config);

    let mut builder = SnapshotBuilder::new();
    builder.set_log_parameters(&config.log_parameters())?;
    builder.set_particle_parameters(
        store,
        ParticleTopology::new(config.number_particles())
            .with_types(TYPE_NAMES.iter().map(|t| t.to_string()).collect(), layout.typeid.clone()),
    )?;
    builder.set_kinematics(
        Some(layout.orientation.as_slice()),
        &layout.position,
        &layout.velocity,
        &layout.acceleration,
    )?;
    builder.set_swimmer_parameters(config.swimmer_params());
    Ok(builder)
}

/// Writes the header frame for `config` into `store`.
pub fn write_initial_frame(config: &SwimmerConfig, store: &mut TrajectoryStore) -> Result<usize> {
    let builder = build_initial_frame(config, store)?;
    let index = builder.save_snapshot(store)?;
    info!(
        "Wrote header frame {} with {} bodies (epsilon = {:.4}) to {}",
        index,
        config.swimmer.number_bodies,
        config.epsilon(),
        store.path().display()
    );
    Ok(index)
}
