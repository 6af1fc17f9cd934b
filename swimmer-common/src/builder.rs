//! Stateful composition of a single [`Snapshot`] before it is appended to a store.

use crate::error::{Result, TrajectoryError};
use crate::snapshot::{
    DualPrecision, EnergyTerms, FrameLog, IntegratorParams, MaterialParams, PotentialParams,
    Snapshot, SwimmerParams, DEFAULT_DIAMETER,
};
use crate::store::TrajectoryStore;
use log::debug;

/// Integrator, material and potential parameters of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct LogParameters {
    pub dt: f64,
    pub t_initial: f64,
    pub t_final: f64,
    pub tau: f64,
    /// Frames the engine writes over the run. Must be positive.
    pub num_steps_output: u64,
    pub fluid_density: f64,
    pub particle_density: f64,
    pub potential_epsilon: f64,
    pub potential_sigma: f64,
    pub image_system: bool,
}

impl LogParameters {
    /// Parameters with the usual defaults: 1000 output frames, unit densities,
    /// WCA switched off and no image system.
    pub fn new(dt: f64, t_initial: f64, t_final: f64, tau: f64) -> Self {
        LogParameters {
            dt,
            t_initial,
            t_final,
            tau,
            num_steps_output: 1000,
            fluid_density: 1.0,
            particle_density: 1.0,
            potential_epsilon: 0.0,
            potential_sigma: 0.0,
            image_system: false,
        }
    }

    fn validate(&self) -> Result<()> {
        let values = [
            ("dt", self.dt),
            ("t_initial", self.t_initial),
            ("t_final", self.t_final),
            ("tau", self.tau),
            ("fluid_density", self.fluid_density),
            ("particle_density", self.particle_density),
            ("potential_epsilon", self.potential_epsilon),
            ("potential_sigma", self.potential_sigma),
        ];
        if let Some((name, value)) = values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TrajectoryError::precondition(format!(
                "log parameter {} must be finite, got {}",
                name, value
            )));
        }
        if self.num_steps_output == 0 {
            return Err(TrajectoryError::precondition("num_steps_output must be positive"));
        }
        Ok(())
    }
}

/// Particle count and topology of a frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticleTopology {
    pub n: u32,
    pub types: Option<Vec<String>>,
    pub typeid: Option<Vec<u32>>,
    /// Defaults to [`DEFAULT_DIAMETER`] for every particle.
    pub diameters: Option<Vec<f32>>,
}

impl ParticleTopology {
    pub fn new(n: u32) -> Self {
        ParticleTopology {
            n,
            ..Default::default()
        }
    }

    pub fn with_types(mut self, types: Vec<String>, typeid: Vec<u32>) -> Self {
        self.types = Some(types);
        self.typeid = Some(typeid);
        self
    }

    pub fn with_diameters(mut self, diameters: Vec<f32>) -> Self {
        self.diameters = Some(diameters);
        self
    }
}

/// Accumulates the groups of one frame, then hands it to a [`TrajectoryStore`].
///
/// `save_snapshot` refuses to write until particles and kinematics have been set;
/// log parameters are optional. The staged frame stays in the builder after a
/// save, so an engine can update kinematics and save again.
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
    particles_set: bool,
    kinematics_set: bool,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the builder from an existing frame, e.g. the last frame of a store opened for append.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        SnapshotBuilder {
            snapshot,
            particles_set: true,
            kinematics_set: true,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    /// Fills the integrator, material, potential and image-system log groups and
    /// zeroes the energy accumulators.
    pub fn set_log_parameters(&mut self, params: &LogParameters) -> Result<()> {
        params.validate()?;
        let log = &mut self.snapshot.log;
        log.integrator = Some(IntegratorParams {
            dt: params.dt,
            t: params.t_initial,
            tf: params.t_final,
            tau: params.tau,
            num_steps_output: params.num_steps_output,
        });
        log.material = Some(MaterialParams {
            fluid_density: params.fluid_density,
            particle_density: params.particle_density,
        });
        log.potential = Some(PotentialParams {
            epsilon: params.potential_epsilon,
            sigma: params.potential_sigma,
        });
        log.image_system = Some(params.image_system);
        log.energy = Some(EnergyTerms::default());
        debug!("Log parameters set: dt={} t={} tf={}", params.dt, params.t_initial, params.t_final);
        Ok(())
    }

    /// Fixes N and the particle topology, and stamps `step` with the store's
    /// current frame count (0 for a freshly created store).
    pub fn set_particle_parameters(
        &mut self,
        store: &TrajectoryStore,
        topology: ParticleTopology,
    ) -> Result<()> {
        let n = topology.n as usize;
        if n == 0 {
            return Err(TrajectoryError::precondition("particle count N must be positive"));
        }
        if let Some(typeid) = &topology.typeid {
            if typeid.len() != n {
                return Err(TrajectoryError::precondition(format!(
                    "{} type ids given for N = {}",
                    typeid.len(),
                    n
                )));
            }
        }
        let diameter = match topology.diameters {
            Some(d) if d.len() != n => {
                return Err(TrajectoryError::precondition(format!(
                    "{} diameters given for N = {}",
                    d.len(),
                    n
                )));
            }
            Some(d) => d,
            None => vec![DEFAULT_DIAMETER; n],
        };

        let particles = &mut self.snapshot.particles;
        if particles.n != topology.n {
            // kinematics sized for another N are stale
            self.kinematics_set = false;
        }
        particles.n = topology.n;
        particles.types = topology.types.unwrap_or_default();
        particles.typeid = topology.typeid.unwrap_or_default();
        particles.diameter = diameter;
        self.snapshot.configuration.step = store.frame_count() as u64;
        self.particles_set = true;
        debug!(
            "Particle parameters set: N={} step={}",
            topology.n, self.snapshot.configuration.step
        );
        Ok(())
    }

    /// Records kinematics twice: exactly, as the archival copy, and downcast to
    /// single precision for the native fields.
    pub fn set_kinematics(
        &mut self,
        orientation: Option<&[[f64; 4]]>,
        positions: &[[f64; 3]],
        velocities: &[[f64; 3]],
        accelerations: &[[f64; 3]],
    ) -> Result<()> {
        if !self.particles_set {
            return Err(TrajectoryError::precondition(
                "set_particle_parameters must be called before set_kinematics",
            ));
        }
        let n = self.snapshot.particles.n as usize;
        let lengths = [
            ("positions", Some(positions.len())),
            ("velocities", Some(velocities.len())),
            ("accelerations", Some(accelerations.len())),
            ("orientation", orientation.map(|o| o.len())),
        ];
        for (name, len) in lengths {
            if let Some(len) = len.filter(|&len| len != n) {
                return Err(TrajectoryError::precondition(format!(
                    "{} holds {} rows, expected N = {}",
                    name, len, n
                )));
            }
        }

        let particles = &mut self.snapshot.particles;
        particles.orientation = orientation.map(|o| DualPrecision::from_archival(o.to_vec()));
        particles.position = DualPrecision::from_archival(positions.to_vec());
        particles.velocity = DualPrecision::from_archival(velocities.to_vec());
        particles.acceleration = DualPrecision::from_archival(accelerations.to_vec());
        self.kinematics_set = true;
        Ok(())
    }

    pub fn set_swimmer_parameters(&mut self, swimmer: SwimmerParams) {
        self.snapshot.log.swimmer = Some(swimmer);
    }

    /// Overwrites the current integration time, for producers writing many frames.
    pub fn set_time(&mut self, t: f64) -> Result<()> {
        match self.snapshot.log.integrator.as_mut() {
            Some(integrator) => {
                integrator.t = t;
                Ok(())
            }
            None => Err(TrajectoryError::precondition(
                "set_log_parameters must be called before set_time",
            )),
        }
    }

    pub fn set_energy(&mut self, energy: EnergyTerms) {
        self.snapshot.log.energy = Some(energy);
    }

    pub fn log(&self) -> &FrameLog {
        &self.snapshot.log
    }

    /// Appends the staged frame to `store` and returns its index.
    pub fn save_snapshot(&self, store: &mut TrajectoryStore) -> Result<usize> {
        if !self.particles_set {
            return Err(TrajectoryError::precondition(
                "save_snapshot called before set_particle_parameters",
            ));
        }
        if !self.kinematics_set {
            return Err(TrajectoryError::precondition(
                "save_snapshot called before set_kinematics",
            ));
        }
        store.append(&self.snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FrameEncoding;

    fn temp_store(name: &str) -> (std::path::PathBuf, TrajectoryStore) {
        let path = std::env::temp_dir().join(format!(
            "swimmer_builder_{}_{}.traj",
            name,
            std::process::id()
        ));
        let store = TrajectoryStore::create(&path, FrameEncoding::Bincode).unwrap();
        (path, store)
    }

    #[test]
    fn log_parameters_zero_energy_terms() {
        let mut builder = SnapshotBuilder::new();
        builder
            .set_log_parameters(&LogParameters::new(1e-3, 0.0, 1.0, 6.0))
            .unwrap();
        let energy = builder.log().energy.unwrap();
        assert_eq!(energy.total(), 0.0);
        assert_eq!(energy.e_simple, None);
        assert_eq!(builder.log().integrator.unwrap().num_steps_output, 1000);
        assert_eq!(builder.log().image_system, Some(false));
    }

    #[test]
    fn non_finite_log_parameter_is_rejected() {
        let mut builder = SnapshotBuilder::new();
        let err = builder
            .set_log_parameters(&LogParameters::new(f64::NAN, 0.0, 1.0, 6.0))
            .unwrap_err();
        assert!(matches!(err, TrajectoryError::Precondition(_)));

        let mut params = LogParameters::new(1e-3, 0.0, 1.0, 6.0);
        params.num_steps_output = 0;
        assert!(builder.set_log_parameters(&params).is_err());
    }

    #[test]
    fn diameters_default_to_two() {
        let (path, store) = temp_store("diameters");
        let mut builder = SnapshotBuilder::new();
        builder
            .set_particle_parameters(&store, ParticleTopology::new(4))
            .unwrap();
        assert_eq!(builder.snapshot().particles.diameter, vec![2.0; 4]);
        assert_eq!(builder.snapshot().configuration.step, 0);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn zero_particles_is_rejected() {
        let (path, store) = temp_store("zero_n");
        let mut builder = SnapshotBuilder::new();
        assert!(builder
            .set_particle_parameters(&store, ParticleTopology::new(0))
            .is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn kinematics_keep_both_precisions() {
        let (path, store) = temp_store("precisions");
        let mut builder = SnapshotBuilder::new();
        builder
            .set_particle_parameters(&store, ParticleTopology::new(1))
            .unwrap();
        let pos = [[0.1, 1.0 / 3.0, 1e-12]];
        builder.set_kinematics(None, &pos, &pos, &pos).unwrap();
        let field = &builder.snapshot().particles.position;
        assert_eq!(field.archival.as_deref(), Some(&pos[..]));
        assert_eq!(field.stored[0], [0.1_f32, 1.0_f32 / 3.0, 1e-12_f32]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn kinematics_length_must_match_n() {
        let (path, store) = temp_store("kin_len");
        let mut builder = SnapshotBuilder::new();
        builder
            .set_particle_parameters(&store, ParticleTopology::new(3))
            .unwrap();
        let two = [[0.0; 3]; 2];
        let three = [[0.0; 3]; 3];
        let err = builder.set_kinematics(None, &three, &two, &three).unwrap_err();
        assert!(matches!(err, TrajectoryError::Precondition(_)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn save_requires_particles_and_kinematics() {
        let (path, mut store) = temp_store("incomplete");
        let mut builder = SnapshotBuilder::new();
        assert!(builder.save_snapshot(&mut store).is_err());
        builder
            .set_particle_parameters(&store, ParticleTopology::new(1))
            .unwrap();
        assert!(builder.save_snapshot(&mut store).is_err());
        let one = [[1.0, 0.0, 0.0]];
        builder.set_kinematics(None, &one, &one, &one).unwrap();
        assert_eq!(builder.save_snapshot(&mut store).unwrap(), 0);
        assert_eq!(store.frame_count(), 1);
        std::fs::remove_file(path).ok();
    }
}
