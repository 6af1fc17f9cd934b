use crate::builder::LogParameters;
use crate::error::{Result, TrajectoryError};
use crate::snapshot::SwimmerParams;
use crate::store::FrameEncoding;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

/// Particles making up one collinear swimmer body: a locater and two satellites.
pub const PARTICLES_PER_BODY: u32 = 3;

// Integrator settings, loaded from the [integrator] table
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct IntegratorConfig {
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default)]
    pub ti: f64,
    #[serde(default = "default_tf")]
    pub tf: f64,
    #[serde(default = "default_num_steps_output")]
    pub num_steps_output: u64,
}

// Fluid and particle densities, loaded from the [material] table
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MaterialConfig {
    #[serde(default = "default_density")]
    pub fluid_density: f64,
    #[serde(default = "default_density")]
    pub particle_density: f64,
}

// WCA repulsion, off by default
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct PotentialConfig {
    #[serde(default)]
    pub epsilon: f64,
    #[serde(default)]
    pub sigma: f64,
}

/// Initial direction of every body axis.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BodyOrientation {
    /// Axis along +x, identity quaternion.
    #[default]
    PlusX,
    /// Axis along -z.
    MinusZ,
}

impl BodyOrientation {
    /// Maps the numeric codes used on the command line (0: +x, 1: -z).
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(BodyOrientation::PlusX),
            1 => Ok(BodyOrientation::MinusZ),
            other => Err(TrajectoryError::Config(format!(
                "orientation must be 0 (+x) or 1 (-z), got {}",
                other
            ))),
        }
    }
}

// Swimmer geometry and articulation, loaded from the [swimmer] table
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SwimmerSection {
    #[serde(default = "default_r_avg")]
    pub r_avg: f64,
    #[serde(default = "default_z_height")]
    pub z_height: f64,
    #[serde(default = "default_phase_angle")]
    pub phase_angle: f64,
    #[serde(default = "default_u0")]
    pub u0: f64,
    #[serde(default = "default_omega")]
    pub omega: f64,
    #[serde(default = "default_number_bodies")]
    pub number_bodies: u32,
    /// Mirror the second half of the bodies below the wall.
    #[serde(default)]
    pub image_system: bool,
    #[serde(default)]
    pub orientation: BodyOrientation,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct OutputConfig {
    /// Trajectory file to create.
    pub path: Option<PathBuf>,
    pub format: Option<String>, // Frame encoding: "bincode" or "messagepack"
}

/// Run configuration of the initial-configuration generator, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct SwimmerConfig {
    #[serde(default)]
    pub integrator: IntegratorConfig,
    #[serde(default)]
    pub material: MaterialConfig,
    #[serde(default)]
    pub potential: PotentialConfig,
    #[serde(default)]
    pub swimmer: SwimmerSection,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        IntegratorConfig {
            dt: default_dt(),
            ti: 0.0,
            tf: default_tf(),
            num_steps_output: default_num_steps_output(),
        }
    }
}

impl Default for MaterialConfig {
    fn default() -> Self {
        MaterialConfig {
            fluid_density: default_density(),
            particle_density: default_density(),
        }
    }
}

impl Default for SwimmerSection {
    fn default() -> Self {
        SwimmerSection {
            r_avg: default_r_avg(),
            z_height: default_z_height(),
            phase_angle: default_phase_angle(),
            u0: default_u0(),
            omega: default_omega(),
            number_bodies: default_number_bodies(),
            image_system: false,
            orientation: BodyOrientation::PlusX,
        }
    }
}

impl SwimmerConfig {
    /// Loads and validates the configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            TrajectoryError::Config(format!(
                "Failed to read config file '{}': {}",
                path_ref.display(),
                e
            ))
        })?;
        let config: SwimmerConfig = toml::from_str(&config_str).map_err(|e| {
            TrajectoryError::Config(format!(
                "Failed to parse TOML from '{}': {}",
                path_ref.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let bail = |msg: String| Err(TrajectoryError::Config(msg));
        let i = &self.integrator;
        let s = &self.swimmer;

        let finite = [
            ("integrator.dt", i.dt),
            ("integrator.ti", i.ti),
            ("integrator.tf", i.tf),
            ("material.fluid_density", self.material.fluid_density),
            ("material.particle_density", self.material.particle_density),
            ("potential.epsilon", self.potential.epsilon),
            ("potential.sigma", self.potential.sigma),
            ("swimmer.r_avg", s.r_avg),
            ("swimmer.z_height", s.z_height),
            ("swimmer.phase_angle", s.phase_angle),
            ("swimmer.u0", s.u0),
            ("swimmer.omega", s.omega),
        ];
        if let Some((name, value)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return bail(format!("{} must be finite, got {}", name, value));
        }
        if i.dt <= 0.0 {
            return bail(format!("integrator.dt must be positive, got {}", i.dt));
        }
        if i.tf < i.ti {
            return bail(format!(
                "integrator.tf ({}) must not precede integrator.ti ({})",
                i.tf, i.ti
            ));
        }
        if i.num_steps_output == 0 {
            return bail("integrator.num_steps_output must be greater than 0".into());
        }
        if s.omega == 0.0 {
            return bail("swimmer.omega must be non-zero".into());
        }
        if s.number_bodies == 0 {
            return bail("swimmer.number_bodies must be greater than 0".into());
        }
        self.encoding()?;
        Ok(())
    }

    /// Characteristic time: one articulation period.
    pub fn tau(&self) -> f64 {
        2.0 * PI / self.swimmer.omega
    }

    pub fn number_particles(&self) -> u32 {
        PARTICLES_PER_BODY * self.swimmer.number_bodies
    }

    /// Relative oscillation amplitude `(U0 / omega) / R_avg`.
    pub fn epsilon(&self) -> f64 {
        (self.swimmer.u0 / self.swimmer.omega) / self.swimmer.r_avg
    }

    pub fn encoding(&self) -> Result<FrameEncoding> {
        self.output
            .format
            .as_deref()
            .map_or(Ok(FrameEncoding::default()), str::parse)
    }

    pub fn log_parameters(&self) -> LogParameters {
        LogParameters {
            num_steps_output: self.integrator.num_steps_output,
            fluid_density: self.material.fluid_density,
            particle_density: self.material.particle_density,
            potential_epsilon: self.potential.epsilon,
            potential_sigma: self.potential.sigma,
            image_system: self.swimmer.image_system,
            ..LogParameters::new(self.integrator.dt, self.integrator.ti, self.integrator.tf, self.tau())
        }
    }

    /// Swimmer log group, with zeroed articulation buffers of length `6 M`.
    pub fn swimmer_params(&self) -> SwimmerParams {
        let s = &self.swimmer;
        let buffer = vec![0.0; 6 * s.number_bodies as usize];
        SwimmerParams {
            r_avg: s.r_avg,
            z_height: s.z_height,
            phase_shift: s.phase_angle,
            u0: s.u0,
            omega: s.omega,
            u_swim: buffer.clone(),
            a_swim: buffer,
        }
    }
}

// Default functions matching the reference run
fn default_dt() -> f64 {
    1e-5
}

fn default_tf() -> f64 {
    1.0
}

fn default_num_steps_output() -> u64 {
    10_000
}

fn default_density() -> f64 {
    1.0
}

fn default_r_avg() -> f64 {
    3.5
}

fn default_z_height() -> f64 {
    2.1
}

fn default_phase_angle() -> f64 {
    -PI / 2.0
}

fn default_u0() -> f64 {
    1.4
}

fn default_omega() -> f64 {
    1.0
}

fn default_number_bodies() -> u32 {
    1
}
