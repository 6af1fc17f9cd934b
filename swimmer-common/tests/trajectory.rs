use std::f64::consts::PI;
use std::path::PathBuf;
use swimmer_common::aggregate::RunSummary;
use swimmer_common::kinematics::{extract, SwimmerSelection};
use swimmer_common::store::{FrameEncoding, OpenMode, TrajectoryStore};
use swimmer_common::{
    write_initial_frame, LogParameters, ParticleTopology, SnapshotBuilder, SwimmerConfig,
    SwimmerParams, TrajectoryError,
};

const R_AVG: f64 = 3.5;
const AMPLITUDE: f64 = 0.4;
const OMEGA: f64 = 2.0;
const PHASE: f64 = 0.3;

/// Unique file under the system temp directory
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("swimmer_it_{}_{}.traj", name, std::process::id()))
}

pub fn swimmer_params() -> SwimmerParams {
    SwimmerParams {
        r_avg: R_AVG,
        z_height: 2.1,
        phase_shift: PHASE,
        u0: AMPLITUDE * OMEGA,
        omega: OMEGA,
        u_swim: vec![0.0; 6],
        a_swim: vec![0.0; 6],
    }
}

pub fn topology() -> ParticleTopology {
    ParticleTopology::new(3).with_types(vec!["constrained".into(), "locater".into()], vec![1, 0, 0])
}

/// Separation of the first satellite from the locater at time `t`
pub fn separation(t: f64) -> f64 {
    R_AVG + AMPLITUDE * (OMEGA * t + PHASE).sin()
}

/// Writes one frame per entry of `times`: the locater drifts along +x while the
/// first satellite oscillates about `R_AVG`.
pub fn write_oscillator(path: &PathBuf, times: &[f64], encoding: FrameEncoding) {
    let mut store = TrajectoryStore::create(path, encoding).unwrap();
    let mut builder = SnapshotBuilder::new();
    for &t in times {
        builder
            .set_log_parameters(&LogParameters::new(1e-3, t, 1.0, 2.0 * PI / OMEGA))
            .unwrap();
        builder.set_particle_parameters(&store, topology()).unwrap();
        let drift = 0.01 * t;
        let pos = [
            [drift, 0.0, 2.1],
            [drift + separation(t), 0.0, 2.1],
            [drift - R_AVG, 0.0, 2.1],
        ];
        let vel = [[0.01, 0.0, 0.0], [0.7, 0.0, 0.0], [0.0, 0.0, 0.0]];
        builder.set_kinematics(None, &pos, &vel, &vel).unwrap();
        builder.set_swimmer_parameters(swimmer_params());
        builder.save_snapshot(&mut store).unwrap();
    }
    store.close().unwrap();
}

// ==================================================================================
// Store
// ==================================================================================

#[test]
fn round_trip_preserves_topology_and_precision() {
    let path = temp_path("round_trip");
    let exact = [
        [0.1, 1.0 / 3.0, PI * 1e-7],
        [2.0_f64.sqrt(), -1e-300, 123456.789012345],
        [f64::MIN_POSITIVE, 7.0, -0.0],
    ];
    {
        let mut store = TrajectoryStore::create(&path, FrameEncoding::Bincode).unwrap();
        let mut builder = SnapshotBuilder::new();
        builder.set_particle_parameters(&store, topology()).unwrap();
        builder.set_kinematics(None, &exact, &exact, &exact).unwrap();
        builder.save_snapshot(&mut store).unwrap();
    }

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    assert_eq!(store.frame_count(), 1);
    let frame = store.read_frame(0).unwrap();
    let p = &frame.particles;
    assert_eq!(p.n, 3);
    assert_eq!(p.types, vec!["constrained".to_string(), "locater".to_string()]);
    assert_eq!(p.typeid, vec![1, 0, 0]);
    for field in [&p.position, &p.velocity, &p.acceleration] {
        let archival = field.archival.as_ref().unwrap();
        for (row, expected) in archival.iter().zip(&exact) {
            for (a, b) in row.iter().zip(expected) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
        for (row, expected) in field.stored.iter().zip(&exact) {
            for (a, b) in row.iter().zip(expected) {
                assert_eq!(*a, *b as f32);
            }
        }
    }
    std::fs::remove_file(&path).ok();
}

#[test]
fn frame_steps_follow_append_order() {
    let path = temp_path("steps");
    let times: Vec<f64> = (0..6).map(|i| i as f64 * 0.1).collect();
    write_oscillator(&path, &times, FrameEncoding::Bincode);

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    assert_eq!(store.frame_count(), 6);
    for i in 0..6 {
        let frame = store.read_frame(i).unwrap();
        assert_eq!(frame.configuration.step, i as u64);
        assert_eq!(frame.time(), Some(times[i]));
    }
    let err = store.read_frame(6).unwrap_err();
    assert!(matches!(err, TrajectoryError::OutOfBounds { index: 6, frame_count: 6 }));
    std::fs::remove_file(&path).ok();
}

#[test]
fn never_appended_store_has_no_frames() {
    let path = temp_path("never_appended");
    let store = TrajectoryStore::open(&path, OpenMode::Create).unwrap();
    assert_eq!(store.frame_count(), 0);
    drop(store);

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    assert_eq!(store.frame_count(), 0);
    let err = store.read_frame(0).unwrap_err();
    assert!(matches!(err, TrajectoryError::OutOfBounds { index: 0, frame_count: 0 }));
    std::fs::remove_file(&path).ok();
}

#[test]
fn messagepack_store_reads_back() {
    let path = temp_path("msgpack");
    write_oscillator(&path, &[0.0, 0.1, 0.2], FrameEncoding::MessagePack);

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    assert_eq!(store.encoding(), FrameEncoding::MessagePack);
    let frame = store.read_frame(2).unwrap();
    assert_eq!(frame.configuration.step, 2);
    assert_eq!(frame.log.swimmer, Some(swimmer_params()));
    let x = frame.particles.position.value(1).unwrap()[0];
    assert_eq!(x, 0.01 * 0.2 + separation(0.2));
    std::fs::remove_file(&path).ok();
}

#[test]
fn append_mode_extends_generated_header() {
    let path = temp_path("append");
    let config = SwimmerConfig::default();
    {
        let mut store = TrajectoryStore::create(&path, config.encoding().unwrap()).unwrap();
        assert_eq!(write_initial_frame(&config, &mut store).unwrap(), 0);
        store.close().unwrap();
    }

    let mut store = TrajectoryStore::open(&path, OpenMode::Append).unwrap();
    assert_eq!(store.frame_count(), 1);
    let header = store.last_frame().unwrap().unwrap();
    assert_eq!(header.log.swimmer.as_ref().map(|s| s.r_avg), Some(3.5));

    let mut builder = SnapshotBuilder::from_snapshot(header);
    builder.set_particle_parameters(&store, topology()).unwrap();
    builder.set_time(0.5).unwrap();
    assert_eq!(builder.save_snapshot(&mut store).unwrap(), 1);
    // appended frames are readable through the same handle
    assert_eq!(store.read_frame(1).unwrap().time(), Some(0.5));
    store.close().unwrap();

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    assert_eq!(store.frame_count(), 2);
    let frame = store.read_frame(1).unwrap();
    assert_eq!(frame.configuration.step, 1);
    assert!(frame.particles.orientation.is_some());
    std::fs::remove_file(&path).ok();
}

#[test]
fn sparse_frame_reads_missing_chunks_from_header() {
    let path = temp_path("sparse");
    let config = SwimmerConfig::default();
    {
        let mut store = TrajectoryStore::create(&path, FrameEncoding::Bincode).unwrap();
        write_initial_frame(&config, &mut store).unwrap();
        // only topology and kinematics: no log groups, types or orientation
        let mut builder = SnapshotBuilder::new();
        builder.set_particle_parameters(&store, ParticleTopology::new(3)).unwrap();
        let pos = [[0.25, 0.0, 2.1], [3.75, 0.0, 2.1], [-4.5, 0.0, 2.1]];
        builder.set_kinematics(None, &pos, &pos, &pos).unwrap();
        assert_eq!(builder.save_snapshot(&mut store).unwrap(), 1);
        store.close().unwrap();
    }

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    let header = store.read_frame(0).unwrap();
    let frame = store.read_frame(1).unwrap();
    assert_eq!(frame.configuration.step, 1);
    assert_eq!(frame.log.swimmer, header.log.swimmer);
    assert_eq!(frame.log.integrator, header.log.integrator);
    assert_eq!(frame.particles.types, header.particles.types);
    assert_eq!(frame.particles.typeid, vec![1, 0, 0]);
    assert_eq!(frame.particles.orientation, header.particles.orientation);
    // own chunks win over the header's
    assert_eq!(frame.particles.position.value(0), Some([0.25, 0.0, 2.1]));
    assert_ne!(frame.particles.position, header.particles.position);
    std::fs::remove_file(&path).ok();
}

// ==================================================================================
// Extractor
// ==================================================================================

#[test]
fn window_excludes_header_and_final_frame() {
    let path = temp_path("window");
    let times: Vec<f64> = (0..7).map(|i| i as f64 * 0.05).collect();
    write_oscillator(&path, &times, FrameEncoding::Bincode);

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    let k = extract(&mut store, SwimmerSelection::default()).unwrap();
    assert_eq!(k.len(), 5);
    assert_eq!(k.time, times[1..6].to_vec());
    assert_eq!(k.theta_dot.len(), 5);
    assert_eq!(k.constraints.len(), 5);
    std::fs::remove_file(&path).ok();
}

#[test]
fn oscillator_separation_is_recovered() {
    let path = temp_path("oscillator");
    let times = [0.0, 0.1, 0.2, 0.3];
    write_oscillator(&path, &times, FrameEncoding::Bincode);

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    assert_eq!(store.frame_count(), 4);
    let k = extract(&mut store, SwimmerSelection::default()).unwrap();
    let oscillation = k.oscillation_12();
    assert_eq!(oscillation.len(), k.time.len());
    for (value, t) in oscillation.iter().zip(&k.time) {
        let expected = AMPLITUDE * (OMEGA * t + PHASE).sin();
        assert!((value - expected).abs() < 1e-6, "t={} got {} expected {}", t, value, expected);
    }
    // the body never rotates
    assert!(k.theta.iter().all(|th| th.abs() < 1e-12));
    // the locater drifts 0.01 per unit time
    assert!((k.final_displacement().x - 0.01 * (k.time[k.len() - 1] - k.time[0])).abs() < 1e-12);
    std::fs::remove_file(&path).ok();
}

#[test]
fn too_short_trajectory_is_rejected() {
    let path = temp_path("too_short");
    write_oscillator(&path, &[0.0, 0.1, 0.2], FrameEncoding::Bincode);

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    let err = extract(&mut store, SwimmerSelection::default()).unwrap_err();
    assert!(matches!(err, TrajectoryError::InsufficientFrames { required: 2, found: 1 }));
    std::fs::remove_file(&path).ok();
}

#[test]
fn selection_outside_frame_is_rejected() {
    let path = temp_path("bad_selection");
    write_oscillator(&path, &[0.0, 0.1, 0.2, 0.3], FrameEncoding::Bincode);

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    let err = extract(&mut store, SwimmerSelection::body(1)).unwrap_err();
    assert!(matches!(err, TrajectoryError::Precondition(_)));
    std::fs::remove_file(&path).ok();
}

// ==================================================================================
// Aggregate
// ==================================================================================

#[test]
fn run_summary_measures_locater_drift() {
    let path = temp_path("summary");
    write_oscillator(&path, &[0.0, 1.0, 2.0, 5.0], FrameEncoding::Bincode);

    let mut store = TrajectoryStore::open(&path, OpenMode::Read).unwrap();
    let run = RunSummary::from_store(&mut store, 0).unwrap();
    assert!((run.net_displacement - 0.04).abs() < 1e-12);
    assert_eq!(run.final_t, 5.0);
    assert_eq!(run.dt, 1e-3);
    assert_eq!(run.r_avg, R_AVG);
    assert!((run.epsilon - AMPLITUDE / R_AVG).abs() < 1e-12);
    std::fs::remove_file(&path).ok();
}
