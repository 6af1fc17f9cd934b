//! Text, CSV and JSON output of the analysis driver.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use swimmer_common::kinematics::{ConstraintQuantity, EnergySeries};
use swimmer_common::{DerivedKinematics, RunSummary, Sweep};

pub const SUMMARY_FILE: &str = "output.txt";
pub const SERIES_FILE: &str = "series.csv";
pub const RUNS_FILE: &str = "runs.csv";
pub const SWEEPS_FILE: &str = "sweeps.json";

/// One CSV row per windowed frame.
#[derive(Debug, Serialize)]
struct SeriesRow {
    t: f64,
    dx: f64,
    dy: f64,
    dz: f64,
    r_12: f64,
    r_32: f64,
    u_12: f64,
    u_32: f64,
    a_12: f64,
    a_32: f64,
    r_12_constraint: f64,
    r_32_constraint: f64,
    u_12_constraint: f64,
    u_32_constraint: f64,
    a_12_constraint: f64,
    a_32_constraint: f64,
    cos_theta: f64,
    theta: f64,
    theta_dot: f64,
    theta_ddot: f64,
    e_total: f64,
    e_simple: f64,
}

#[derive(Debug, Serialize)]
struct AggregateReport<'a> {
    runs: &'a [RunSummary],
    sweeps: &'a [Sweep],
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    Ok(BufWriter::new(file))
}

fn format_array(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{:.6e}", v)).collect();
    format!("[{}]", items.join(", "))
}

/// Writes the text summary of one trajectory.
pub fn write_individual_summary(path: &Path, source: &Path, k: &DerivedKinematics) -> Result<()> {
    let mut out = create(path)?;
    let dr = k.final_displacement();
    let last = k.len().saturating_sub(1);
    let e0 = k.energy.initial_total().unwrap_or(f64::NAN);
    let ratio = |values: &[f64]| {
        EnergySeries::normalized(values, e0)
            .last()
            .copied()
            .unwrap_or(f64::NAN)
    };

    writeln!(out, "Trajectory: {}", source.display())?;
    writeln!(
        out,
        "Frames: [{}, {}) ({} samples)",
        k.window.start,
        k.window.end,
        k.len()
    )?;
    writeln!(out, "R_avg = {}", k.params.r_avg)?;
    writeln!(out, "Z_height = {}", k.params.z_height)?;
    writeln!(out, "epsilon = {:.6}", k.epsilon)?;
    writeln!(out, "Final t = {:.6}", k.time.get(last).copied().unwrap_or(f64::NAN))?;
    writeln!(out, "Final dR_loc = [{:.6e}, {:.6e}, {:.6e}]", dr.x, dr.y, dr.z)?;
    writeln!(out, "Final |dR_loc| = {:.6e}", dr.length())?;
    writeln!(
        out,
        "Final cos(dtheta) = {:.12}",
        k.cos_theta.get(last).copied().unwrap_or(f64::NAN)
    )?;
    writeln!(
        out,
        "Final dtheta = {:.6e}",
        k.theta.get(last).copied().unwrap_or(f64::NAN)
    )?;
    writeln!(out, "Final E_simple/E0 = {:.6e}", ratio(&k.energy.e_simple))?;
    writeln!(out, "Final E_total/E0 = {:.6e}", ratio(&k.energy.total))?;

    for quantity in ConstraintQuantity::ALL {
        let comparison = k.compare(quantity);
        let max_err = comparison
            .relative_error()
            .into_iter()
            .filter(|e| e.is_finite())
            .fold(f64::NAN, f64::max);
        writeln!(out, "Max relErr {:?} = {:.6e}", quantity, max_err)?;
    }
    out.flush()?;
    Ok(())
}

/// Writes every derived series of one trajectory as CSV.
pub fn write_series_csv(path: &Path, k: &DerivedKinematics) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    for i in 0..k.len() {
        let d = k.locater_displacement[i];
        let c = &k.constraints[i];
        writer.serialize(SeriesRow {
            t: k.time[i],
            dx: d.x,
            dy: d.y,
            dz: d.z,
            r_12: k.r_12[i],
            r_32: k.r_32[i],
            u_12: k.u_12[i],
            u_32: k.u_32[i],
            a_12: k.a_12[i],
            a_32: k.a_32[i],
            r_12_constraint: c.r_12,
            r_32_constraint: c.r_32,
            u_12_constraint: c.u_12,
            u_32_constraint: c.u_32,
            a_12_constraint: c.a_12,
            a_32_constraint: c.a_32,
            cos_theta: k.cos_theta[i],
            theta: k.theta[i],
            theta_dot: k.theta_dot[i],
            theta_ddot: k.theta_ddot[i],
            e_total: k.energy.total[i],
            e_simple: k.energy.e_simple[i],
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the per-run table and, for every sweep, its arrays and fitted line.
pub fn write_aggregate_summary(path: &Path, runs: &[RunSummary], sweeps: &[Sweep]) -> Result<()> {
    let mut out = create(path)?;
    writeln!(out, "Runs: {}", runs.len())?;
    for run in runs {
        writeln!(
            out,
            "{}: R_avg = {}, Z_height = {}, phase_shift = {:.6}, dt = {:e}, t = {:.6}, |dR| = {:.6e}",
            run.path.display(),
            run.r_avg,
            run.z_height,
            run.phase_shift,
            run.dt,
            run.final_t,
            run.net_displacement
        )?;
    }

    for sweep in sweeps {
        let name = sweep.parameter.name();
        writeln!(out)?;
        writeln!(out, "== {} ==", name)?;
        writeln!(out, "{} = {}", name, format_array(&sweep.x))?;
        writeln!(out, "Delta = {}", format_array(&sweep.net_displacement))?;
        if sweep.response != sweep.net_displacement {
            writeln!(out, "response = {}", format_array(&sweep.response))?;
        }
        if let Some(leading) = &sweep.leading_order {
            writeln!(out, "dZ_leadingOrder = {}", format_array(leading))?;
        }
        if let Some(err) = &sweep.relative_error {
            writeln!(out, "relErr = {}", format_array(err))?;
        }
        match &sweep.fit {
            Some(fit) => writeln!(
                out,
                "ln(Delta) = {:.6} * ln({}) + {:.6}",
                fit.slope, name, fit.intercept
            )?,
            None => writeln!(out, "ln(Delta) fit: n/a")?,
        }
        if let Some(exponent) = sweep.predicted_exponent {
            writeln!(out, "predicted exponent = {:.6}", exponent)?;
        }
    }
    out.flush()?;
    Ok(())
}

pub fn write_runs_csv(path: &Path, runs: &[RunSummary]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create '{}'", path.display()))?;
    writer.write_record([
        "path", "r_avg", "z_height", "phase_shift", "u0", "omega", "epsilon", "dt", "final_t", "dx",
        "dy", "dz", "net_displacement",
    ])?;
    for run in runs {
        let mut record = vec![run.path.display().to_string()];
        record.extend(
            [
                run.r_avg,
                run.z_height,
                run.phase_shift,
                run.u0,
                run.omega,
                run.epsilon,
                run.dt,
                run.final_t,
                run.displacement[0],
                run.displacement[1],
                run.displacement[2],
                run.net_displacement,
            ]
            .iter()
            .map(f64::to_string),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_sweeps_json(path: &Path, runs: &[RunSummary], sweeps: &[Sweep]) -> Result<()> {
    let out = create(path)?;
    serde_json::to_writer_pretty(out, &AggregateReport { runs, sweeps })
        .with_context(|| format!("Failed to write '{}'", path.display()))?;
    Ok(())
}
