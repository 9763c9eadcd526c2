mod common;

use camarray::camera::feature_profile::ReconfigureRequest;
use camarray::camera::sim_device::{SimFaults, SimulatedSystem};
use camarray::core::capture_source::FeatureValue;
use camarray::core::acquisition_engine::AcquisitionEngine;
use camarray::core::trigger::TriggerContext;
use camarray::errors::AppError;
use camarray::operations::exif_sidecar::read_image_description;
use camarray::operations::frame_writer::read_raw_frame;
use camarray::operations::publisher::RecordingPublisher;
use common::{rig_config, saved_files};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CAMERAS: [&str; 3] = ["cam0", "cam1", "cam2"];

fn engine_for(config: camarray::config_loader::MasterConfig) -> (AcquisitionEngine, Arc<RecordingPublisher>) {
    let system = SimulatedSystem::from_config(&config);
    let recorder = Arc::new(RecordingPublisher::default());
    let engine = AcquisitionEngine::new(config, Box::new(system)).with_publisher(recorder.clone());
    (engine, recorder)
}

fn field_trigger(sequence: u64) -> TriggerContext {
    TriggerContext { sequence, block_name: "north_field".to_string(), ..Default::default() }
}

/// Polls until `camera` holds `count` files or ten seconds pass.
fn wait_for_files(root: &Path, camera: &str, count: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if saved_files(root, camera).len() >= count {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn synchronous_run_saves_exactly_the_requested_sets() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 5\n");
    let (mut engine, recorder) = engine_for(config);

    let summary = engine.run().unwrap();
    assert_eq!(summary.frames_saved, 15);
    for camera in CAMERAS {
        let files = saved_files(dir.path(), camera);
        assert_eq!(files.len(), 5, "camera {}", camera);
        assert!(files.iter().all(|f| f.ends_with(".bmp")));
    }
    let batches = recorder.batches.lock();
    assert_eq!(batches.len(), 5);
    assert!(batches.iter().all(|b| b.len() == 3));
}

#[test]
fn master_timestamp_names_every_camera_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 3\n  master_timestamp_for_all: true\n");
    let (mut engine, _) = engine_for(config);
    engine.run().unwrap();

    let reference = saved_files(dir.path(), "cam1");
    assert_eq!(reference.len(), 3);
    assert_eq!(saved_files(dir.path(), "cam0"), reference);
    assert_eq!(saved_files(dir.path(), "cam2"), reference);
}

#[test]
fn per_camera_timestamps_when_master_timestamp_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 3\n  master_timestamp_for_all: false\n");
    let (mut engine, _) = engine_for(config);
    engine.run().unwrap();

    let cam0 = saved_files(dir.path(), "cam0");
    let cam1 = saved_files(dir.path(), "cam1");
    assert_eq!(cam0.len(), 3);
    assert_eq!(cam1.len(), 3);
    assert_ne!(cam0, cam1);
}

#[test]
fn without_save_the_frame_count_limits_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: false\n  export: true\n  frames: 4\n");
    let (mut engine, recorder) = engine_for(config);

    let summary = engine.run().unwrap();
    assert_eq!(summary.cycles, 4);
    assert_eq!(summary.frames_saved, 0);
    assert!(saved_files(dir.path(), "cam0").is_empty());
    assert_eq!(recorder.images.lock().len(), 12);
}

#[test]
fn raw_binary_frames_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 1\n  save_type: bin\n");
    let (mut engine, _) = engine_for(config);
    engine.run().unwrap();

    let files = saved_files(dir.path(), "cam2");
    assert_eq!(files.len(), 1);
    let frame = read_raw_frame(&dir.path().join("cam2").join(&files[0])).unwrap();
    assert_eq!((frame.width, frame.height, frame.channels), (640, 480, 1));
    assert_eq!(frame.data.len(), 640 * 480);
}

#[test]
fn trigger_context_is_embedded_in_jpeg_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 2\n  save_type: jpg\n  export: true\n");
    let (mut engine, recorder) = engine_for(config);
    let controls = engine.controls();
    controls.trigger_hub.arrive(TriggerContext {
        sequence: 42,
        block_name: "north_field".to_string(),
        lat: 38.54,
        lon: -121.75,
        ..Default::default()
    });

    engine.run().unwrap();

    let files = saved_files(dir.path(), "cam0");
    assert_eq!(files.len(), 2);
    let description = read_image_description(&dir.path().join("cam0").join(&files[0]))
        .unwrap()
        .expect("sidecar present");
    let json: serde_json::Value = serde_json::from_str(&description).unwrap();
    assert_eq!(json["camera"]["block_name"], "north_field");
    assert_eq!(json["camera"]["image_number"], 42);
    assert_eq!(json["camera"]["camera_number"], 0);
    assert_eq!(recorder.gps_tagged.lock().len(), 6);
}

#[test]
fn binning_that_does_not_stick_aborts_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let yaml_extra = "  save: true\n  frames: 3\n";
    let mut config = rig_config(dir.path(), yaml_extra);
    config.features.binning = 2;
    let system = SimulatedSystem::from_config(&config);
    let probe = system.probe("2").unwrap();
    probe.set_faults(SimFaults { ignore_binning: true, ..Default::default() });
    let mut engine = AcquisitionEngine::new(config, Box::new(system));

    match engine.run() {
        Err(AppError::BinningMismatch { camera_id, requested, actual }) => {
            assert_eq!(camera_id, "2");
            assert_eq!(requested, 2);
            assert_eq!(actual, 1);
        }
        other => panic!("expected a binning mismatch, got {:?}", other),
    }
    assert!(!probe.is_streaming());
    assert!(!probe.is_initialized());
    assert!(saved_files(dir.path(), "cam0").is_empty());
}

#[test]
fn disconnect_mid_run_releases_cameras() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 10\n");
    let system = SimulatedSystem::from_config(&config);
    let probe = system.probe("0").unwrap();
    let mut engine = AcquisitionEngine::new(config, Box::new(system));
    engine.start().unwrap();
    probe.set_faults(SimFaults { fail_grab_at: Some(3), ..Default::default() });

    assert!(matches!(engine.run(), Err(AppError::Capture(_))));
    assert_eq!(probe.lifecycle().last().map(String::as_str), Some("deinit"));
    assert_eq!(saved_files(dir.path(), "cam0").len(), 2);
}

#[test]
fn max_rate_pipeline_writes_every_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 5\n  max_rate_save: true\n");
    let (mut engine, recorder) = engine_for(config);
    assert_eq!(engine.mode().name(), "max-rate multi-threaded");

    let summary = engine.run().unwrap();
    assert_eq!(summary.frames_saved, 15);
    for camera in CAMERAS {
        let files = saved_files(dir.path(), camera);
        assert_eq!(files.len(), 5, "camera {}", camera);
        assert!(files.iter().all(|f| f.starts_with(camera)));
    }
    assert_eq!(recorder.benchmarks.lock().len(), 15);
}

#[test]
fn stop_before_run_still_releases() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n");
    let system = SimulatedSystem::from_config(&config);
    let probe = system.probe("1").unwrap();
    let mut engine = AcquisitionEngine::new(config, Box::new(system));
    engine.stop();

    let summary = engine.run().unwrap();
    assert_eq!(summary.cycles, 0);
    assert!(!probe.is_initialized());
}

#[test]
fn queued_reconfigure_reaches_every_camera() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  frames: 2\n");
    let system = SimulatedSystem::from_config(&config);
    let probes: Vec<_> = ["0", "1", "2"].iter().map(|id| system.probe(id).unwrap()).collect();
    let mut engine = AcquisitionEngine::new(config, Box::new(system));
    let controls = engine.controls();
    controls
        .reconfigure
        .send(ReconfigureRequest { exposure_time: Some(12_000.0), target_grey_value: Some(60.0) })
        .unwrap();

    let summary = engine.run().unwrap();
    assert_eq!(summary.cycles, 2);
    for probe in &probes {
        assert_eq!(probe.feature("ExposureAuto"), Some(FeatureValue::enumeration("Off")));
        assert_eq!(probe.feature("ExposureTime"), Some(FeatureValue::Float(12_000.0)));
        assert_eq!(probe.feature("AutoExposureTargetGreyValue"), Some(FeatureValue::Float(60.0)));
    }
}

#[test]
fn on_demand_captures_one_set_per_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 2\n  on_demand_trigger: true\n");
    let (mut engine, _) = engine_for(config);
    let controls = engine.controls();
    let runner = std::thread::spawn(move || engine.run());

    controls.trigger_hub.arrive(field_trigger(1));
    assert!(wait_for_files(dir.path(), "cam0", 1));
    std::thread::sleep(Duration::from_millis(300));
    for camera in CAMERAS {
        assert_eq!(saved_files(dir.path(), camera).len(), 1, "camera {}", camera);
    }

    controls.trigger_hub.arrive(field_trigger(2));
    let summary = runner.join().unwrap().unwrap();
    assert_eq!(summary.cycles, 2);
    for camera in CAMERAS {
        assert_eq!(saved_files(dir.path(), camera).len(), 2, "camera {}", camera);
    }
}

#[test]
fn external_trigger_line_drives_every_camera() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 3\n  external_trigger: true\n");
    let system = SimulatedSystem::from_config(&config);
    system.start_external_trigger(20.0);
    let mut engine = AcquisitionEngine::new(config, Box::new(system));

    let summary = engine.run().unwrap();
    assert_eq!(summary.frames_saved, 9);
    for camera in CAMERAS {
        assert_eq!(saved_files(dir.path(), camera).len(), 3, "camera {}", camera);
    }
}

#[test]
fn failing_writer_stops_only_its_camera() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cam0"), b"not a directory").unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 5\n  max_rate_save: true\n");
    let (mut engine, _) = engine_for(config);

    let summary = engine.run().unwrap();
    assert_eq!(summary.cycles, 5);
    assert_eq!(summary.frames_saved, 10);
    assert_eq!(saved_files(dir.path(), "cam1").len(), 5);
    assert_eq!(saved_files(dir.path(), "cam2").len(), 5);
}

#[test]
fn pipeline_grab_errors_skip_the_camera_and_continue() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 5\n  max_rate_save: true\n");
    let system = SimulatedSystem::from_config(&config);
    system.probe("2").unwrap().set_faults(SimFaults { fail_grab_at: Some(3), ..Default::default() });
    let mut engine = AcquisitionEngine::new(config, Box::new(system));

    let summary = engine.run().unwrap();
    assert_eq!(summary.cycles, 5);
    assert_eq!(summary.frames_saved, 12);
    assert_eq!(saved_files(dir.path(), "cam0").len(), 5);
    assert_eq!(saved_files(dir.path(), "cam1").len(), 5);
    assert_eq!(saved_files(dir.path(), "cam2").len(), 2);
}

#[test]
fn pipeline_discards_frames_until_a_trigger_context_exists() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 5\n  max_rate_save: true\n  require_trigger_context: true\n");
    let (mut engine, recorder) = engine_for(config);

    let summary = engine.run().unwrap();
    assert_eq!(summary.frames_saved, 0);
    assert_eq!(summary.frames_discarded, 15);
    assert!(recorder.benchmarks.lock().is_empty());
    for camera in CAMERAS {
        assert!(saved_files(dir.path(), camera).is_empty(), "camera {}", camera);
    }
}

#[test]
fn pipeline_keeps_frames_tagged_with_a_trigger_context() {
    let dir = tempfile::tempdir().unwrap();
    let config = rig_config(dir.path(), "  save: true\n  frames: 5\n  max_rate_save: true\n  require_trigger_context: true\n");
    let (mut engine, _) = engine_for(config);
    engine.controls().trigger_hub.arrive(field_trigger(7));

    let summary = engine.run().unwrap();
    assert_eq!(summary.frames_saved, 15);
    assert_eq!(summary.frames_discarded, 0);
    for camera in CAMERAS {
        assert_eq!(saved_files(dir.path(), camera).len(), 5, "camera {}", camera);
    }
}
