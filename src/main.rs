use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;
use swimmer_common::config::BodyOrientation;
use swimmer_common::store::TrajectoryStore;
use swimmer_common::{write_initial_frame, SwimmerConfig};

const DEFAULT_OUTPUT: &str = "collinear-swimmer.traj";

/// Writes the header frame of a collinear-swimmer trajectory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional run configuration (TOML); command-line values override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trajectory file to create
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Time step for numerical integration
    #[arg(long)]
    dt: Option<f64>,

    /// Initial integration time
    #[arg(long, allow_negative_numbers = true)]
    ti: Option<f64>,

    /// Final integration time
    #[arg(long, allow_negative_numbers = true)]
    tf: Option<f64>,

    /// Average pair separation over an articulation period
    #[arg(long)]
    r_avg: Option<f64>,

    /// Initial height of the swimmer above the wall
    #[arg(long, allow_negative_numbers = true)]
    z_height: Option<f64>,

    /// Phase angle between the oscillating pairs
    #[arg(long, allow_negative_numbers = true)]
    phase_angle: Option<f64>,

    /// Velocity oscillation amplitude
    #[arg(long, allow_negative_numbers = true)]
    u0: Option<f64>,

    /// Velocity oscillation frequency
    #[arg(long, allow_negative_numbers = true)]
    omega: Option<f64>,

    /// Number of bodies to simulate
    #[arg(long)]
    number_bodies: Option<u32>,

    /// Mirror the second half of the bodies below the wall
    #[arg(long)]
    image_system: bool,

    /// Initial body orientation (0: +x axis, 1: -z axis)
    #[arg(long)]
    orientation: Option<u8>,

    /// Frame encoding: "bincode" or "messagepack"
    #[arg(long)]
    format: Option<String>,
}

impl Args {
    /// Folds command-line overrides into `config`.
    fn apply(&self, config: &mut SwimmerConfig) -> Result<()> {
        let i = &mut config.integrator;
        if let Some(dt) = self.dt {
            i.dt = dt;
        }
        if let Some(ti) = self.ti {
            i.ti = ti;
        }
        if let Some(tf) = self.tf {
            i.tf = tf;
        }

        let s = &mut config.swimmer;
        if let Some(r_avg) = self.r_avg {
            s.r_avg = r_avg;
        }
        if let Some(z_height) = self.z_height {
            s.z_height = z_height;
        }
        if let Some(phase_angle) = self.phase_angle {
            s.phase_angle = phase_angle;
        }
        if let Some(u0) = self.u0 {
            s.u0 = u0;
        }
        if let Some(omega) = self.omega {
            s.omega = omega;
        }
        if let Some(number_bodies) = self.number_bodies {
            s.number_bodies = number_bodies;
        }
        if self.image_system {
            s.image_system = true;
        }
        if let Some(index) = self.orientation {
            s.orientation = BodyOrientation::from_index(index)?;
        }

        if let Some(output) = &self.output {
            config.output.path = Some(output.clone());
        }
        if let Some(format) = &self.format {
            config.output.format = Some(format.clone());
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();
    run_with_args(args)
}

fn run_with_args(args: Args) -> Result<()> {
    info!("Starting collinear swimmer configuration generator...");
    let start_time = Instant::now();

    // --- Load Configuration ---
    let mut config = match &args.config {
        Some(path) => SwimmerConfig::load(path)
            .with_context(|| format!("Failed to load configuration '{}'", path.display()))?,
        None => SwimmerConfig::default(),
    };
    args.apply(&mut config)?;
    config.validate().context("Invalid run configuration")?;
    debug!("Run configuration: {:#?}", config);

    // --- Create Trajectory ---
    let output = config
        .output
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory '{}'", parent.display()))?;
    }
    let mut store = TrajectoryStore::create(&output, config.encoding()?)
        .with_context(|| format!("Failed to create trajectory '{}'", output.display()))?;

    info!(
        "N = {} particles, tau = {:.4}, epsilon = {:.4}",
        config.number_particles(),
        config.tau(),
        config.epsilon()
    );
    write_initial_frame(&config, &mut store)
        .with_context(|| format!("Failed to write header frame to '{}'", output.display()))?;
    store.close()?;

    info!(
        "Configuration written to {} in {:.2?}",
        output.display(),
        start_time.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_config_values() {
        let args = Args::parse_from([
            "collinear-swimmer",
            "--dt=1e-4",
            "--r-avg",
            "5.0",
            "--phase-angle",
            "-1.2",
            "--number-bodies",
            "2",
            "--image-system",
            "--orientation",
            "1",
        ]);
        let mut config = SwimmerConfig::default();
        args.apply(&mut config).unwrap();
        assert_eq!(config.integrator.dt, 1e-4);
        assert_eq!(config.swimmer.r_avg, 5.0);
        assert_eq!(config.swimmer.phase_angle, -1.2);
        assert_eq!(config.swimmer.number_bodies, 2);
        assert!(config.swimmer.image_system);
        assert_eq!(config.swimmer.orientation, BodyOrientation::MinusZ);
        // untouched values keep their defaults
        assert_eq!(config.swimmer.u0, 1.4);
    }

    #[test]
    fn unknown_orientation_is_rejected() {
        let args = Args::parse_from(["collinear-swimmer", "--orientation", "3"]);
        assert!(args.apply(&mut SwimmerConfig::default()).is_err());
    }
}
