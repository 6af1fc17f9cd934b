use crate::error::{Result, TrajectoryError};
use crate::vecmath::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chunk::Chunk;

/// Spatial dimensionality of every frame.
pub const DIMENSIONS: u8 = 3;
/// Particle diameter in units of the particle radius (a = 1).
pub const DEFAULT_DIAMETER: f32 = 2.0;
/// Simulation box: three lengths followed by three tilt factors. Not used by the solver.
pub const DEFAULT_BOX: [f32; 6] = [30.0, 30.0, 30.0, 0.0, 0.0, 0.0];

/// Configuration group of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Frame index within the trajectory.
    pub step: u64,
    pub dimensions: u8,
    pub box_dims: [f32; 6],
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            step: 0,
            dimensions: DIMENSIONS,
            box_dims: DEFAULT_BOX,
        }
    }
}

/// A per-particle kinematic field kept at two precisions.
///
/// `stored` is the lossy single-precision copy written to the native particle
/// fields; `archival` is the exact double-precision copy written under the log
/// namespace. Frames produced by the builder always carry both. Frames written
/// by an external engine may only carry `stored`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DualPrecision<const D: usize> {
    pub stored: Vec<[f32; D]>,
    pub archival: Option<Vec<[f64; D]>>,
}

impl<const D: usize> DualPrecision<D> {
    /// Keeps `values` as the archival copy and downcasts them for the stored copy.
    pub fn from_archival(values: Vec<[f64; D]>) -> Self {
        let stored = values.iter().map(|row| row.map(|v| v as f32)).collect();
        DualPrecision {
            stored,
            archival: Some(values),
        }
    }

    /// Builds a field that only has the native single-precision copy.
    pub fn from_stored(values: Vec<[f32; D]>) -> Self {
        DualPrecision {
            stored: values,
            archival: None,
        }
    }

    pub fn len(&self) -> usize {
        self.stored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored.is_empty()
    }

    /// Best available value for particle `index`: archival when present, else the widened stored copy.
    pub fn value(&self, index: usize) -> Option<[f64; D]> {
        match &self.archival {
            Some(archival) => archival.get(index).copied(),
            None => self.stored.get(index).map(|row| row.map(f64::from)),
        }
    }

    fn check_len(&self, n: usize, name: &str) -> Result<()> {
        if self.stored.len() != n {
            return Err(TrajectoryError::precondition(format!(
                "particles/{} holds {} rows, expected N = {}",
                name,
                self.stored.len(),
                n
            )));
        }
        if let Some(archival) = &self.archival {
            if archival.len() != n {
                return Err(TrajectoryError::precondition(format!(
                    "archival {} holds {} rows, expected N = {}",
                    name,
                    archival.len(),
                    n
                )));
            }
        }
        Ok(())
    }
}

impl DualPrecision<3> {
    pub fn vector(&self, index: usize) -> Option<Vec3> {
        self.value(index).map(Vec3::from)
    }
}

/// Particle group of a frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Particles {
    pub n: u32,
    /// Closed vocabulary of type names, e.g. `["constrained", "locater"]`.
    pub types: Vec<String>,
    /// Index into `types` for each particle.
    pub typeid: Vec<u32>,
    pub diameter: Vec<f32>,
    /// Body-frame orientation quaternions, only for oriented-body variants.
    pub orientation: Option<DualPrecision<4>>,
    pub position: DualPrecision<3>,
    pub velocity: DualPrecision<3>,
    pub acceleration: DualPrecision<3>,
}

/// `log/integrator/*`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorParams {
    pub dt: f64,
    /// Current integration time.
    pub t: f64,
    pub tf: f64,
    /// Characteristic system time.
    pub tau: f64,
    /// Frames the engine writes over the remaining integration.
    pub num_steps_output: u64,
}

/// `log/material_parameters/*`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialParams {
    pub fluid_density: f64,
    pub particle_density: f64,
}

impl Default for MaterialParams {
    fn default() -> Self {
        MaterialParams {
            fluid_density: 1.0,
            particle_density: 1.0,
        }
    }
}

/// `log/wca/*`: Weeks-Chandler-Andersen repulsion.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PotentialParams {
    pub epsilon: f64,
    pub sigma: f64,
}

/// `log/hydrodynamics/*`: energy bookkeeping, accumulated by the engine per frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyTerms {
    pub e_locater: f64,
    pub e_locater_internal: f64,
    pub e_internal: f64,
    /// Only written by the engine; absent on generated header frames.
    pub e_simple: Option<f64>,
}

impl EnergyTerms {
    pub fn total(&self) -> f64 {
        self.e_locater + self.e_locater_internal + self.e_internal
    }
}

/// `log/swimmer/*`: control parameters replicated on every frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SwimmerParams {
    /// Average pair separation over an articulation period.
    pub r_avg: f64,
    /// Initial height above the wall.
    pub z_height: f64,
    pub phase_shift: f64,
    /// Velocity oscillation amplitude.
    pub u0: f64,
    pub omega: f64,
    pub u_swim: Vec<f64>,
    pub a_swim: Vec<f64>,
}

impl SwimmerParams {
    /// Relative oscillation amplitude `|U0 / (R_avg omega)|`.
    pub fn epsilon(&self) -> f64 {
        (self.u0 / self.r_avg / self.omega).abs()
    }
}

/// Typed view of the log namespace. Each group serializes under its original string paths.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameLog {
    pub integrator: Option<IntegratorParams>,
    pub material: Option<MaterialParams>,
    pub potential: Option<PotentialParams>,
    pub image_system: Option<bool>,
    pub energy: Option<EnergyTerms>,
    pub swimmer: Option<SwimmerParams>,
}

/// One simulation time frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub configuration: Configuration,
    pub particles: Particles,
    pub log: FrameLog,
    /// Chunks this schema does not know, carried through untouched.
    pub extra: BTreeMap<String, Chunk>,
}

impl Snapshot {
    /// Checks internal consistency: dimensionality, and every per-particle array sized to N.
    pub fn validate(&self) -> Result<()> {
        if self.configuration.dimensions != DIMENSIONS {
            return Err(TrajectoryError::precondition(format!(
                "dimensions must be {}, got {}",
                DIMENSIONS, self.configuration.dimensions
            )));
        }
        let n = self.particles.n as usize;
        if n == 0 {
            return Err(TrajectoryError::precondition("particle count N must be positive"));
        }
        let p = &self.particles;
        if !p.typeid.is_empty() && p.typeid.len() != n {
            return Err(TrajectoryError::precondition(format!(
                "particles/typeid holds {} entries, expected N = {}",
                p.typeid.len(),
                n
            )));
        }
        if !p.types.is_empty() {
            if let Some(bad) = p.typeid.iter().find(|&&id| id as usize >= p.types.len()) {
                return Err(TrajectoryError::precondition(format!(
                    "typeid {} has no entry in types {:?}",
                    bad, p.types
                )));
            }
        }
        if p.diameter.len() != n {
            return Err(TrajectoryError::precondition(format!(
                "particles/diameter holds {} entries, expected N = {}",
                p.diameter.len(),
                n
            )));
        }
        p.position.check_len(n, "position")?;
        p.velocity.check_len(n, "velocity")?;
        p.acceleration.check_len(n, "acceleration")?;
        if let Some(orientation) = &p.orientation {
            orientation.check_len(n, "orientation")?;
        }
        Ok(())
    }

    /// Integration time of this frame, if the integrator group is present.
    pub fn time(&self) -> Option<f64> {
        self.log.integrator.map(|i| i.t)
    }
}
