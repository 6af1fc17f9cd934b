pub mod aggregate;
pub mod builder;
pub mod chunk;
pub mod config;
pub mod error;
pub mod initial;
pub mod kinematics;
pub mod numerics;
pub mod snapshot;
pub mod store;
pub mod theory;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use aggregate::{sweep, sweeps, ControlParameter, RunSummary, Sweep};
pub use builder::{LogParameters, ParticleTopology, SnapshotBuilder};
pub use chunk::{Chunk, ChunkData, FrameRecord};
pub use config::{BodyOrientation, SwimmerConfig};
pub use error::{Result, TrajectoryError};
pub use initial::write_initial_frame;
pub use kinematics::{extract, ConstraintQuantity, DerivedKinematics, FrameWindow, SwimmerSelection};
pub use numerics::{gradient, log_log_fit, LinearFit};
pub use snapshot::{DualPrecision, FrameLog, Particles, Snapshot, SwimmerParams};
pub use store::{FrameEncoding, OpenMode, TrajectoryStore, TRAJECTORY_EXTENSION};
pub use theory::{dz_leading_order, f_d, rel_err, CharacteristicScales};
pub use vecmath::Vec3;
