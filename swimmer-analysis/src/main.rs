use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{info, warn, LevelFilter};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use swimmer_common::kinematics::{Comparison, ConstraintQuantity, EnergySeries, SwimmerSelection};
use swimmer_common::store::{OpenMode, TrajectoryStore};
use swimmer_common::{extract, sweeps, DerivedKinematics, RunSummary, Sweep};

mod discover;
mod plots;
mod report;

use plots::Series;

/// Post-processing of collinear-swimmer trajectories
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derived kinematics of the single trajectory under the input directory
    Individual(IndividualArgs),
    /// Displacement scaling across every trajectory under the input directory
    Aggregate(AggregateArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct InputArgs {
    /// Directory scanned recursively for trajectory files
    #[arg(short, long, default_value = ".")]
    relative_path: PathBuf,

    /// Output directory for plots and reports, relative to the input directory
    #[arg(short, long, default_value = "analysis")]
    output_dir: PathBuf,
}

impl InputArgs {
    fn output_dir(&self) -> Result<PathBuf> {
        let dir = self.relative_path.join(&self.output_dir);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory '{}'", dir.display()))?;
        Ok(dir)
    }
}

#[derive(clap::Args, Debug, Clone)]
struct IndividualArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Body whose locater and satellites are analysed (particles 3b, 3b+1, 3b+2)
    #[arg(short, long, default_value_t = 0)]
    body: usize,

    /// Locater particle index, overrides the body layout
    #[arg(long)]
    locater: Option<usize>,

    /// First satellite particle index, overrides the body layout
    #[arg(long)]
    first: Option<usize>,

    /// Second satellite particle index, overrides the body layout
    #[arg(long)]
    second: Option<usize>,
}

impl IndividualArgs {
    fn selection(&self) -> SwimmerSelection {
        let body = SwimmerSelection::body(self.body);
        SwimmerSelection {
            locater: self.locater.unwrap_or(body.locater),
            first: self.first.unwrap_or(body.first),
            second: self.second.unwrap_or(body.second),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
struct AggregateArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Locater particle index used for the net displacement
    #[arg(long, default_value_t = 0)]
    locater: usize,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    run_with_args(args)
}

fn run_with_args(args: Args) -> Result<()> {
    // Initialize logger
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    info!("Starting Swimmer Analysis...");
    let start_time = Instant::now();
    match args.command {
        Command::Individual(args) => run_individual(&args)?,
        Command::Aggregate(args) => run_aggregate(&args)?,
    }
    info!("Analysis finished in {:.2?}", start_time.elapsed());
    Ok(())
}

/// Renders one chart; a chart that fails to render is skipped.
fn plot(dir: &Path, file: &str, caption: &str, x_desc: &str, y_desc: &str, series: &[Series]) {
    let path = dir.join(file);
    if let Err(e) = plots::render(&path, caption, x_desc, y_desc, series) {
        warn!("Skipping plot {}: {:#}", path.display(), e);
    }
}

fn open(path: &Path) -> Result<TrajectoryStore> {
    TrajectoryStore::open(path, OpenMode::Read)
        .with_context(|| format!("Failed to open trajectory '{}'", path.display()))
}

// --- Individual ---

fn run_individual(args: &IndividualArgs) -> Result<()> {
    let input = discover::single_trajectory(&args.input.relative_path)?;
    let out_dir = args.input.output_dir()?;
    info!("Input file: {}", input.display());

    let mut store = open(&input)?;
    info!("Found {} frames in the file", store.frame_count());
    let k = extract(&mut store, args.selection())
        .with_context(|| format!("Failed to extract kinematics from '{}'", input.display()))?;
    store.close()?;

    report::write_individual_summary(&out_dir.join(report::SUMMARY_FILE), &input, &k)?;
    report::write_series_csv(&out_dir.join(report::SERIES_FILE), &k)?;
    individual_plots(&out_dir, &k);

    info!("Output saved to: {}", out_dir.display());
    Ok(())
}

fn quantity_names(quantity: ConstraintQuantity) -> (&'static str, &'static str) {
    match quantity {
        ConstraintQuantity::Displacement12 => ("displacement_12", "(|r_12| - R_avg) / char_len"),
        ConstraintQuantity::Displacement32 => ("displacement_32", "(|r_32| - R_avg) / char_len"),
        ConstraintQuantity::Velocity12 => ("velocity_12", "u_12 / char_vel"),
        ConstraintQuantity::Velocity32 => ("velocity_32", "u_32 / char_vel"),
        ConstraintQuantity::Acceleration12 => ("acceleration_12", "a_12 / char_acc"),
        ConstraintQuantity::Acceleration32 => ("acceleration_32", "a_32 / char_acc"),
    }
}

fn individual_plots(dir: &Path, k: &DerivedKinematics) {
    let t: Vec<f64> = k.time.iter().map(|t| t / k.tau).collect();
    let x_desc = "t / tau";

    let e0 = k.energy.initial_total().unwrap_or(f64::NAN);
    plot(
        dir,
        "energy.svg",
        "Energy",
        x_desc,
        "E / E0",
        &[
            Series::line("E_total", &t, &EnergySeries::normalized(&k.energy.total, e0)),
            Series::line("E_simple", &t, &EnergySeries::normalized(&k.energy.e_simple, e0)),
        ],
    );

    let angular = [
        ("angular_displacement", "Angular displacement", "theta", &k.theta),
        ("angular_velocity", "Angular velocity", "d theta / dt", &k.theta_dot),
        ("angular_acceleration", "Angular acceleration", "d2 theta / dt2", &k.theta_ddot),
    ];
    for (stem, caption, y_desc, values) in angular {
        plot(
            dir,
            &format!("{}.svg", stem),
            caption,
            x_desc,
            y_desc,
            &[Series::line(stem, &t, values)],
        );
    }

    let component = |i: usize| -> Vec<f64> {
        k.locater_displacement
            .iter()
            .map(|d| d.to_array()[i])
            .collect()
    };
    plot(
        dir,
        "locater_displacement.svg",
        "Locater displacement",
        x_desc,
        "dR_loc",
        &[
            Series::line("x", &t, &component(0)),
            Series::line("y", &t, &component(1)),
            Series::line("z", &t, &component(2)),
            Series::line("|dR|", &t, &k.locater_distance),
        ],
    );

    for quantity in ConstraintQuantity::ALL {
        let (stem, y_desc) = quantity_names(quantity);
        let comparison: Comparison = k.compare(quantity);
        let scaled = |v: &[f64]| -> Vec<f64> { v.iter().map(|x| x / comparison.scale).collect() };

        plot(
            dir,
            &format!("{}.svg", stem),
            stem,
            x_desc,
            y_desc,
            &[
                Series::line("simulation", &t, &scaled(&comparison.simulated)),
                Series::line("constraint", &t, &scaled(&comparison.constraint)),
            ],
        );
        plot(
            dir,
            &format!("{}_error.svg", stem),
            &format!("{} error", stem),
            x_desc,
            "(simulation - constraint) / scale",
            &[Series::line("difference", &t, &comparison.scaled_difference())],
        );
        plot(
            dir,
            &format!("{}_relative_error.svg", stem),
            &format!("{} relative error", stem),
            x_desc,
            "relErr",
            &[Series::line("relErr", &t, &comparison.relative_error())],
        );
    }
}

// --- Aggregate ---

fn run_aggregate(args: &AggregateArgs) -> Result<()> {
    let paths = discover::find_trajectories(&args.input.relative_path)?;
    if paths.is_empty() {
        warn!(
            "No trajectories found under {}. Exiting.",
            args.input.relative_path.display()
        );
        return Ok(());
    }
    let out_dir = args.input.output_dir()?;
    info!("Found {} trajectories", paths.len());

    // Set up progress bar
    let progress_bar = ProgressBar::new(paths.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} runs ({percent}%) [{eta}]")?
            .progress_chars("#>-"),
    );

    // one read handle per file
    let runs: Vec<RunSummary> = paths
        .par_iter()
        .progress_with(progress_bar.clone())
        .map(|path| {
            let mut store = open(path)?;
            RunSummary::from_store(&mut store, args.locater)
                .with_context(|| format!("Failed to summarise '{}'", path.display()))
        })
        .collect::<Result<_>>()?;
    progress_bar.finish_and_clear();

    let sweeps = sweeps(&runs);
    if sweeps.is_empty() {
        warn!("No control parameter takes more than one value; nothing to fit.");
    }
    for sweep in &sweeps {
        match &sweep.fit {
            Some(fit) => info!(
                "ln(Delta) = {:.4} * ln({}) + {:.4}",
                fit.slope,
                sweep.parameter.name(),
                fit.intercept
            ),
            None => info!("{}: {} runs, no fit", sweep.parameter.name(), sweep.x.len()),
        }
    }

    report::write_aggregate_summary(&out_dir.join(report::SUMMARY_FILE), &runs, &sweeps)?;
    report::write_runs_csv(&out_dir.join(report::RUNS_FILE), &runs)?;
    report::write_sweeps_json(&out_dir.join(report::SWEEPS_FILE), &runs, &sweeps)?;
    for sweep in &sweeps {
        sweep_plots(&out_dir, sweep);
    }

    info!("Output saved to: {}", out_dir.display());
    Ok(())
}

fn sweep_plots(dir: &Path, sweep: &Sweep) {
    let name = sweep.parameter.name();

    let mut linear = vec![Series::points("simulation", &sweep.x, &sweep.net_displacement)];
    if let Some(curve) = &sweep.theory_curve {
        let (x, y): (Vec<f64>, Vec<f64>) = curve.iter().map(|&(x, y)| (x, y.abs())).unzip();
        linear.push(Series::line("|dZ_leadingOrder|", &x, &y));
    }
    plot(
        dir,
        &format!("displacement_vs_{}.svg", name),
        &format!("Net displacement vs {}", name),
        name,
        "Delta",
        &linear,
    );

    if let Some(fit) = &sweep.fit {
        let fit_x: Vec<f64> = sweep.x[sweep.x.len() - sweep.response.len()..].to_vec();
        let ln_x: Vec<f64> = fit_x.iter().map(|x| x.abs().ln()).collect();
        let ln_fit: Vec<f64> = ln_x.iter().map(|&x| fit.eval(x)).collect();
        let mut log_log = vec![
            Series::points("simulation", &fit_x, &sweep.response).log_log(),
            Series::line(format!("slope {:.3}", fit.slope), &ln_x, &ln_fit),
        ];
        if let Some(leading) = &sweep.leading_order {
            log_log.push(Series::line("dZ_leadingOrder", &sweep.x, leading).log_log());
        }
        plot(
            dir,
            &format!("displacement_vs_{}_loglog.svg", name),
            &format!("ln(Delta) vs ln({})", name),
            &format!("ln({})", name),
            "ln(Delta)",
            &log_log,
        );
    }

    if let Some(err) = &sweep.relative_error {
        plot(
            dir,
            &format!("relative_error_vs_{}.svg", name),
            &format!("Relative error vs {}", name),
            name,
            "relErr",
            &[Series::points("relErr", &sweep.x, err)],
        );
    }
}

// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use swimmer_common::store::FrameEncoding;
    use swimmer_common::{LogParameters, ParticleTopology, SnapshotBuilder, SwimmerParams};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("swimmer_analysis_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Straight-line swimmer drifting `speed` per unit time along +x.
    fn write_run(path: &Path, r_avg: f64, speed: f64) {
        let mut store = TrajectoryStore::create(path, FrameEncoding::Bincode).unwrap();
        let mut builder = SnapshotBuilder::new();
        for i in 0..6 {
            let t = i as f64 * 0.5;
            builder
                .set_log_parameters(&LogParameters::new(1e-3, t, 2.5, 2.0 * std::f64::consts::PI))
                .unwrap();
            builder
                .set_particle_parameters(&store, ParticleTopology::new(3))
                .unwrap();
            let x = speed * t;
            let pos = [[x, 0.0, 2.1], [x + r_avg, 0.0, 2.1], [x - r_avg, 0.0, 2.1]];
            let vel = [[speed, 0.0, 0.0]; 3];
            builder.set_kinematics(None, &pos, &vel, &[[0.0; 3]; 3]).unwrap();
            builder.set_swimmer_parameters(SwimmerParams {
                r_avg,
                z_height: 2.1,
                phase_shift: -std::f64::consts::FRAC_PI_2,
                u0: 1.4,
                omega: 1.0,
                u_swim: vec![0.0; 6],
                a_swim: vec![0.0; 6],
            });
            builder.save_snapshot(&mut store).unwrap();
        }
        store.close().unwrap();
    }

    fn input(root: &Path) -> InputArgs {
        InputArgs {
            relative_path: root.to_path_buf(),
            output_dir: PathBuf::from("out"),
        }
    }

    #[test]
    fn selection_overrides_body_layout() {
        let args = Args::parse_from(["swimmer-analysis", "individual", "--body", "1", "--second", "7"]);
        let Command::Individual(individual) = args.command else {
            panic!("expected the individual subcommand");
        };
        assert_eq!(
            individual.selection(),
            SwimmerSelection {
                locater: 3,
                first: 4,
                second: 7
            }
        );
        assert_eq!(individual.input.output_dir, PathBuf::from("analysis"));
    }

    #[test]
    fn individual_writes_summary_and_series() {
        let root = temp_dir("individual");
        write_run(&root.join("run.traj"), 3.5, 0.02);

        let args = IndividualArgs {
            input: input(&root),
            body: 0,
            locater: None,
            first: None,
            second: None,
        };
        run_individual(&args).unwrap();

        let out = root.join("out");
        let summary = fs::read_to_string(out.join(report::SUMMARY_FILE)).unwrap();
        assert!(summary.contains("R_avg = 3.5"));
        assert!(summary.contains("Final cos(dtheta) = 1.000000000000"));
        let mut reader = csv::Reader::from_path(out.join(report::SERIES_FILE)).unwrap();
        // frames 1..5 of 6
        assert_eq!(reader.records().count(), 4);
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn individual_rejects_several_trajectories() {
        let root = temp_dir("ambiguous");
        write_run(&root.join("a.traj"), 3.5, 0.02);
        write_run(&root.join("b.traj"), 4.0, 0.02);
        let args = IndividualArgs {
            input: input(&root),
            body: 0,
            locater: None,
            first: None,
            second: None,
        };
        assert!(run_individual(&args).is_err());
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn aggregate_fits_separation_sweep() {
        let root = temp_dir("aggregate");
        for (i, r_avg) in [3.0_f64, 4.0, 6.0].iter().enumerate() {
            let dir = root.join(format!("run{}", i));
            fs::create_dir_all(&dir).unwrap();
            // drift falls off as R^-2
            write_run(&dir.join("run.traj"), *r_avg, 1.0 / (r_avg * r_avg));
        }

        let args = AggregateArgs {
            input: input(&root),
            locater: 0,
        };
        run_aggregate(&args).unwrap();

        let out = root.join("out");
        let summary = fs::read_to_string(out.join(report::SUMMARY_FILE)).unwrap();
        assert!(summary.contains("Runs: 3"));
        assert!(summary.contains("ln(Delta) = -2.000000 * ln(R_avg)"));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join(report::SWEEPS_FILE)).unwrap()).unwrap();
        assert_eq!(json["runs"].as_array().unwrap().len(), 3);
        assert!(out.join(report::RUNS_FILE).exists());
        fs::remove_dir_all(&root).ok();
    }
}
