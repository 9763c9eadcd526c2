// Shared helpers for the integration tests.
#![allow(dead_code)]

use camarray::config_loader::{parse_config, MasterConfig};
use std::path::Path;

/// Three cameras `0`, `1`, `2` with `1` as master, saving under `save_path`
/// and no flush delays. `acquisition_extra` lines are appended to the
/// acquisition block, indented by the caller's choice of two spaces.
pub fn rig_config(save_path: &Path, acquisition_extra: &str) -> MasterConfig {
    let yaml = format!(
        r#"
application:
  save_path: "{}"
acquisition:
  master_cam: "1"
  init_delay_secs: 0
  grab_timeout_ms: 1000
{}
cameras:
  - id: "0"
    name: cam0
  - id: "1"
    name: cam1
  - id: "2"
    name: cam2
"#,
        save_path.display(),
        acquisition_extra
    );
    parse_config(&yaml).expect("test config should parse")
}

/// Files in `<root>/<camera>`, sorted by name.
pub fn saved_files(root: &Path, camera: &str) -> Vec<String> {
    let dir = root.join(camera);
    let mut names: Vec<String> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
