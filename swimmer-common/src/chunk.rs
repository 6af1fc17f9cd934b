//! On-disk frame representation.
//!
//! A frame is persisted as a map from chunk path to a typed, row-major array.
//! The typed [`Snapshot`] is converted to and from this record so that every
//! value keeps the string path the external engine reads and writes
//! (`particles/position`, `log/integrator/dt`, ...). Unknown chunks survive a
//! read/write cycle through [`Snapshot::extra`].

use crate::error::{Result, TrajectoryError};
use crate::snapshot::{
    Configuration, DualPrecision, EnergyTerms, FrameLog, IntegratorParams, MaterialParams,
    Particles, PotentialParams, Snapshot, SwimmerParams, DEFAULT_DIAMETER,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Chunk paths of the frame schema.
pub mod paths {
    pub const STEP: &str = "configuration/step";
    pub const DIMENSIONS: &str = "configuration/dimensions";
    pub const BOX: &str = "configuration/box";

    pub const N: &str = "particles/N";
    pub const TYPES: &str = "particles/types";
    pub const TYPEID: &str = "particles/typeid";
    pub const DIAMETER: &str = "particles/diameter";
    pub const ORIENTATION: &str = "particles/orientation";
    pub const POSITION: &str = "particles/position";
    pub const VELOCITY: &str = "particles/velocity";
    /// Accelerations travel in the moment-of-inertia slot of the native particle fields.
    pub const ACCELERATION: &str = "particles/moment_inertia";

    pub const LOG_STEP: &str = "log/configuration/step";
    pub const LOG_DIMENSIONS: &str = "log/configuration/dimensions";

    pub const DT: &str = "log/integrator/dt";
    pub const T: &str = "log/integrator/t";
    pub const TF: &str = "log/integrator/tf";
    pub const TAU: &str = "log/integrator/tau";
    pub const NUM_STEPS_OUTPUT: &str = "log/integrator/num_steps_output";

    pub const FLUID_DENSITY: &str = "log/material_parameters/fluid_density";
    pub const PARTICLE_DENSITY: &str = "log/material_parameters/particle_density";

    pub const WCA_EPSILON: &str = "log/wca/epsilon";
    pub const WCA_SIGMA: &str = "log/wca/sigma";

    pub const IMAGE_SYSTEM: &str = "log/parameters/image_system";

    pub const E_LOCATER: &str = "log/hydrodynamics/E_locater";
    pub const E_LOCATER_INTERNAL: &str = "log/hydrodynamics/E_locater_internal";
    pub const E_INTERNAL: &str = "log/hydrodynamics/E_internal";
    pub const E_SIMPLE: &str = "log/hydrodynamics/E_simple";

    pub const R_AVG: &str = "log/swimmer/R_avg";
    pub const Z_HEIGHT: &str = "log/swimmer/Z_height";
    pub const PHASE_SHIFT: &str = "log/swimmer/phase_shift";
    pub const U0: &str = "log/swimmer/U0";
    pub const OMEGA: &str = "log/swimmer/omega";
    pub const U_SWIM: &str = "log/swimmer/U_swim";
    pub const A_SWIM: &str = "log/swimmer/A_swim";

    pub const DOUBLE_POSITION: &str = "log/particles/double_position";
    pub const DOUBLE_VELOCITY: &str = "log/particles/double_velocity";
    pub const DOUBLE_ACCELERATION: &str = "log/particles/double_moment_inertia";
    pub const DOUBLE_ORIENTATION: &str = "log/particles/double_orientation";

    /// Every path the typed schema claims; anything else lands in `Snapshot::extra`.
    pub const KNOWN: &[&str] = &[
        STEP, DIMENSIONS, BOX, N, TYPES, TYPEID, DIAMETER, ORIENTATION, POSITION, VELOCITY,
        ACCELERATION, LOG_STEP, LOG_DIMENSIONS, DT, T, TF, TAU, NUM_STEPS_OUTPUT, FLUID_DENSITY,
        PARTICLE_DENSITY, WCA_EPSILON, WCA_SIGMA, IMAGE_SYSTEM, E_LOCATER, E_LOCATER_INTERNAL,
        E_INTERNAL, E_SIMPLE, R_AVG, Z_HEIGHT, PHASE_SHIFT, U0, OMEGA, U_SWIM, A_SWIM,
        DOUBLE_POSITION, DOUBLE_VELOCITY, DOUBLE_ACCELERATION, DOUBLE_ORIENTATION,
    ];
}

/// Element storage of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChunkData {
    U8(Vec<u8>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

impl ChunkData {
    fn len(&self) -> usize {
        match self {
            ChunkData::U8(v) => v.len(),
            ChunkData::U32(v) => v.len(),
            ChunkData::U64(v) => v.len(),
            ChunkData::I32(v) => v.len(),
            ChunkData::F32(v) => v.len(),
            ChunkData::F64(v) => v.len(),
            ChunkData::Str(v) => v.len(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ChunkData::U8(_) => "uint8",
            ChunkData::U32(_) => "uint32",
            ChunkData::U64(_) => "uint64",
            ChunkData::I32(_) => "int32",
            ChunkData::F32(_) => "float",
            ChunkData::F64(_) => "double",
            ChunkData::Str(_) => "string",
        }
    }
}

/// A row-major array with a fixed number of columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub columns: u32,
    pub data: ChunkData,
}

impl Chunk {
    pub fn column(data: ChunkData) -> Self {
        Chunk { columns: 1, data }
    }

    pub fn scalar_f64(value: f64) -> Self {
        Chunk::column(ChunkData::F64(vec![value]))
    }

    fn rows_f32<const D: usize>(rows: &[[f32; D]]) -> Self {
        Chunk {
            columns: D as u32,
            data: ChunkData::F32(rows.iter().flatten().copied().collect()),
        }
    }

    fn rows_f64<const D: usize>(rows: &[[f64; D]]) -> Self {
        Chunk {
            columns: D as u32,
            data: ChunkData::F64(rows.iter().flatten().copied().collect()),
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        if self.columns == 0 {
            0
        } else {
            self.data.len() / self.columns as usize
        }
    }
}

/// One frame as persisted: chunk path to chunk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameRecord {
    pub chunks: BTreeMap<String, Chunk>,
}

impl FrameRecord {
    fn put(&mut self, path: &str, chunk: Chunk) {
        self.chunks.insert(path.to_string(), chunk);
    }

    fn put_f64(&mut self, path: &str, value: f64) {
        self.put(path, Chunk::scalar_f64(value));
    }

    /// Flattens a typed snapshot into its chunk record.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut record = FrameRecord::default();
        let c = &snapshot.configuration;
        let step = Chunk::column(ChunkData::U64(vec![c.step]));
        let dims = Chunk::column(ChunkData::U8(vec![c.dimensions]));
        record.put(paths::STEP, step.clone());
        record.put(paths::DIMENSIONS, dims.clone());
        // mirrored into the log group, which the engine reads back
        record.put(paths::LOG_STEP, step);
        record.put(paths::LOG_DIMENSIONS, dims);
        record.put(paths::BOX, Chunk::column(ChunkData::F32(c.box_dims.to_vec())));

        let p = &snapshot.particles;
        record.put(paths::N, Chunk::column(ChunkData::U32(vec![p.n])));
        if !p.types.is_empty() {
            record.put(paths::TYPES, Chunk::column(ChunkData::Str(p.types.clone())));
        }
        if !p.typeid.is_empty() {
            record.put(paths::TYPEID, Chunk::column(ChunkData::U32(p.typeid.clone())));
        }
        record.put(paths::DIAMETER, Chunk::column(ChunkData::F32(p.diameter.clone())));

        put_dual(&mut record, &p.position, paths::POSITION, paths::DOUBLE_POSITION);
        put_dual(&mut record, &p.velocity, paths::VELOCITY, paths::DOUBLE_VELOCITY);
        put_dual(&mut record, &p.acceleration, paths::ACCELERATION, paths::DOUBLE_ACCELERATION);
        if let Some(orientation) = &p.orientation {
            put_dual(&mut record, orientation, paths::ORIENTATION, paths::DOUBLE_ORIENTATION);
        }

        let log = &snapshot.log;
        if let Some(i) = &log.integrator {
            record.put_f64(paths::DT, i.dt);
            record.put_f64(paths::T, i.t);
            record.put_f64(paths::TF, i.tf);
            record.put_f64(paths::TAU, i.tau);
            record.put(
                paths::NUM_STEPS_OUTPUT,
                Chunk::column(ChunkData::U64(vec![i.num_steps_output])),
            );
        }
        if let Some(m) = &log.material {
            record.put_f64(paths::FLUID_DENSITY, m.fluid_density);
            record.put_f64(paths::PARTICLE_DENSITY, m.particle_density);
        }
        if let Some(w) = &log.potential {
            record.put_f64(paths::WCA_EPSILON, w.epsilon);
            record.put_f64(paths::WCA_SIGMA, w.sigma);
        }
        if let Some(image) = log.image_system {
            record.put(paths::IMAGE_SYSTEM, Chunk::column(ChunkData::I32(vec![image as i32])));
        }
        if let Some(e) = &log.energy {
            record.put_f64(paths::E_LOCATER, e.e_locater);
            record.put_f64(paths::E_LOCATER_INTERNAL, e.e_locater_internal);
            record.put_f64(paths::E_INTERNAL, e.e_internal);
            if let Some(simple) = e.e_simple {
                record.put_f64(paths::E_SIMPLE, simple);
            }
        }
        if let Some(s) = &log.swimmer {
            record.put_f64(paths::R_AVG, s.r_avg);
            record.put_f64(paths::Z_HEIGHT, s.z_height);
            record.put_f64(paths::PHASE_SHIFT, s.phase_shift);
            record.put_f64(paths::U0, s.u0);
            record.put_f64(paths::OMEGA, s.omega);
            record.put(paths::U_SWIM, Chunk::column(ChunkData::F64(s.u_swim.clone())));
            record.put(paths::A_SWIM, Chunk::column(ChunkData::F64(s.a_swim.clone())));
        }

        for (path, chunk) in &snapshot.extra {
            record.chunks.entry(path.clone()).or_insert_with(|| chunk.clone());
        }
        record
    }
}

fn put_dual<const D: usize>(
    record: &mut FrameRecord,
    field: &DualPrecision<D>,
    stored_path: &str,
    archival_path: &str,
) {
    record.put(stored_path, Chunk::rows_f32(&field.stored));
    if let Some(archival) = &field.archival {
        record.put(archival_path, Chunk::rows_f64(archival));
    }
}

/// Chunk lookup that falls back to the header frame for chunks a later frame omits.
#[derive(Clone, Copy)]
struct ChunkSource<'a> {
    frame: usize,
    record: &'a FrameRecord,
    defaults: Option<&'a FrameRecord>,
}

impl<'a> ChunkSource<'a> {
    fn get(&self, path: &str) -> Option<&'a Chunk> {
        self.record
            .chunks
            .get(path)
            .or_else(|| self.defaults.and_then(|d| d.chunks.get(path)))
    }

    fn fail(&self, path: &str, message: impl std::fmt::Display) -> TrajectoryError {
        TrajectoryError::Decode {
            frame: self.frame,
            message: format!("chunk '{}': {}", path, message),
        }
    }

    fn u64_scalar(&self, path: &str) -> Result<Option<u64>> {
        let Some(chunk) = self.get(path) else { return Ok(None) };
        let value = match &chunk.data {
            ChunkData::U64(v) => v.first().copied(),
            ChunkData::U32(v) => v.first().map(|&x| u64::from(x)),
            ChunkData::U8(v) => v.first().map(|&x| u64::from(x)),
            other => return Err(self.fail(path, format!("unexpected type {}", other.type_name()))),
        };
        value.map(Some).ok_or_else(|| self.fail(path, "empty"))
    }

    /// Reads any numeric chunk widened to f64.
    fn f64_values(&self, path: &str) -> Result<Option<Vec<f64>>> {
        let Some(chunk) = self.get(path) else { return Ok(None) };
        let values = match &chunk.data {
            ChunkData::F64(v) => v.clone(),
            ChunkData::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ChunkData::U64(v) => v.iter().map(|&x| x as f64).collect(),
            ChunkData::U32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ChunkData::U8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ChunkData::I32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ChunkData::Str(_) => return Err(self.fail(path, "expected numeric data")),
        };
        Ok(Some(values))
    }

    fn f64_scalar(&self, path: &str) -> Result<Option<f64>> {
        match self.f64_values(path)? {
            Some(values) => values
                .first()
                .copied()
                .map(Some)
                .ok_or_else(|| self.fail(path, "empty")),
            None => Ok(None),
        }
    }

    fn required_f64(&self, path: &str) -> Result<f64> {
        self.f64_scalar(path)?.ok_or_else(|| self.fail(path, "missing"))
    }

    fn rows_f32<const D: usize>(&self, path: &str) -> Result<Option<Vec<[f32; D]>>> {
        let Some(chunk) = self.get(path) else { return Ok(None) };
        let ChunkData::F32(values) = &chunk.data else {
            return Err(self.fail(path, format!("expected float, found {}", chunk.data.type_name())));
        };
        self.split_rows(path, chunk.columns, values).map(Some)
    }

    fn rows_f64<const D: usize>(&self, path: &str) -> Result<Option<Vec<[f64; D]>>> {
        let Some(chunk) = self.get(path) else { return Ok(None) };
        let ChunkData::F64(values) = &chunk.data else {
            return Err(self.fail(path, format!("expected double, found {}", chunk.data.type_name())));
        };
        self.split_rows(path, chunk.columns, values).map(Some)
    }

    fn split_rows<T: Copy, const D: usize>(
        &self,
        path: &str,
        columns: u32,
        values: &[T],
    ) -> Result<Vec<[T; D]>> {
        if columns as usize != D || values.len() % D != 0 {
            return Err(self.fail(
                path,
                format!("expected {} columns, found {} values in {} columns", D, values.len(), columns),
            ));
        }
        Ok(values
            .chunks_exact(D)
            .map(|row| {
                let mut out = [row[0]; D];
                out.copy_from_slice(row);
                out
            })
            .collect())
    }

    fn dual<const D: usize>(
        &self,
        stored_path: &str,
        archival_path: &str,
    ) -> Result<Option<DualPrecision<D>>> {
        // both precisions must come from the same frame
        let local = self.record.chunks.contains_key(stored_path)
            || self.record.chunks.contains_key(archival_path);
        let src = if local { ChunkSource { defaults: None, ..*self } } else { *self };
        let archival = src.rows_f64::<D>(archival_path)?;
        let stored = src.rows_f32::<D>(stored_path)?;
        Ok(match (stored, archival) {
            (Some(stored), archival) => Some(DualPrecision { stored, archival }),
            (None, Some(archival)) => Some(DualPrecision::from_archival(archival)),
            (None, None) => None,
        })
    }
}

impl Snapshot {
    /// Rebuilds a typed snapshot from `record`.
    ///
    /// Chunks missing from `record` are taken from `defaults` (the header frame)
    /// when supplied. `particles/N` and `particles/position` are required.
    pub fn from_record(
        frame: usize,
        record: &FrameRecord,
        defaults: Option<&FrameRecord>,
    ) -> Result<Snapshot> {
        let src = ChunkSource { frame, record, defaults };

        let mut configuration = Configuration::default();
        if let Some(step) = src.u64_scalar(paths::STEP)?.or(src.u64_scalar(paths::LOG_STEP)?) {
            configuration.step = step;
        }
        if let Some(dims) = src.u64_scalar(paths::DIMENSIONS)? {
            configuration.dimensions = u8::try_from(dims)
                .map_err(|_| src.fail(paths::DIMENSIONS, format!("{} does not fit in uint8", dims)))?;
        }
        if let Some(box_values) = src.f64_values(paths::BOX)? {
            if box_values.len() != 6 {
                return Err(src.fail(paths::BOX, format!("expected 6 values, found {}", box_values.len())));
            }
            for (dst, v) in configuration.box_dims.iter_mut().zip(box_values) {
                *dst = v as f32;
            }
        }

        let n = src
            .u64_scalar(paths::N)?
            .ok_or_else(|| src.fail(paths::N, "missing"))?;
        let n = u32::try_from(n).map_err(|_| src.fail(paths::N, format!("{} does not fit in uint32", n)))?;
        let types = match src.get(paths::TYPES) {
            Some(Chunk { data: ChunkData::Str(v), .. }) => v.clone(),
            Some(_) => return Err(src.fail(paths::TYPES, "expected strings")),
            None => Vec::new(),
        };
        let typeid = match src.get(paths::TYPEID) {
            Some(Chunk { data: ChunkData::U32(v), .. }) => v.clone(),
            Some(_) => return Err(src.fail(paths::TYPEID, "expected uint32")),
            None => Vec::new(),
        };
        let diameter = match src.f64_values(paths::DIAMETER)? {
            Some(values) => values.into_iter().map(|d| d as f32).collect(),
            None => vec![DEFAULT_DIAMETER; n as usize],
        };
        let position = src
            .dual::<3>(paths::POSITION, paths::DOUBLE_POSITION)?
            .ok_or_else(|| src.fail(paths::POSITION, "missing"))?;
        let zeros = || DualPrecision::from_stored(vec![[0.0f32; 3]; n as usize]);
        let velocity = src
            .dual::<3>(paths::VELOCITY, paths::DOUBLE_VELOCITY)?
            .unwrap_or_else(zeros);
        let acceleration = src
            .dual::<3>(paths::ACCELERATION, paths::DOUBLE_ACCELERATION)?
            .unwrap_or_else(zeros);
        let orientation = src.dual::<4>(paths::ORIENTATION, paths::DOUBLE_ORIENTATION)?;

        let particles = Particles {
            n,
            types,
            typeid,
            diameter,
            orientation,
            position,
            velocity,
            acceleration,
        };

        let log = FrameLog {
            integrator: match src.f64_scalar(paths::T)? {
                Some(t) => Some(IntegratorParams {
                    dt: src.required_f64(paths::DT)?,
                    t,
                    tf: src.required_f64(paths::TF)?,
                    tau: src.required_f64(paths::TAU)?,
                    num_steps_output: src.u64_scalar(paths::NUM_STEPS_OUTPUT)?.unwrap_or(0),
                }),
                None => None,
            },
            material: match src.f64_scalar(paths::FLUID_DENSITY)? {
                Some(fluid_density) => Some(MaterialParams {
                    fluid_density,
                    particle_density: src.required_f64(paths::PARTICLE_DENSITY)?,
                }),
                None => None,
            },
            potential: match src.f64_scalar(paths::WCA_EPSILON)? {
                Some(epsilon) => Some(PotentialParams {
                    epsilon,
                    sigma: src.required_f64(paths::WCA_SIGMA)?,
                }),
                None => None,
            },
            image_system: src.f64_scalar(paths::IMAGE_SYSTEM)?.map(|v| v != 0.0),
            energy: match src.f64_scalar(paths::E_LOCATER)? {
                Some(e_locater) => Some(EnergyTerms {
                    e_locater,
                    e_locater_internal: src.required_f64(paths::E_LOCATER_INTERNAL)?,
                    e_internal: src.required_f64(paths::E_INTERNAL)?,
                    e_simple: src.f64_scalar(paths::E_SIMPLE)?,
                }),
                None => None,
            },
            swimmer: match src.f64_scalar(paths::R_AVG)? {
                Some(r_avg) => Some(SwimmerParams {
                    r_avg,
                    z_height: src.f64_scalar(paths::Z_HEIGHT)?.unwrap_or(0.0),
                    phase_shift: src.required_f64(paths::PHASE_SHIFT)?,
                    u0: src.required_f64(paths::U0)?,
                    omega: src.required_f64(paths::OMEGA)?,
                    u_swim: src.f64_values(paths::U_SWIM)?.unwrap_or_default(),
                    a_swim: src.f64_values(paths::A_SWIM)?.unwrap_or_default(),
                }),
                None => None,
            },
        };

        let extra = record
            .chunks
            .iter()
            .filter(|(path, _)| !paths::KNOWN.contains(&path.as_str()))
            .map(|(path, chunk)| (path.clone(), chunk.clone()))
            .collect();

        Ok(Snapshot {
            configuration,
            particles,
            log,
            extra,
        })
    }
}
