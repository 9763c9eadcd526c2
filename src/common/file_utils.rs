use std::path::{Path, PathBuf};
use crate::errors::AppError;
use log::{debug, warn};

pub fn ensure_output_directory(dir_path_str: &str) -> Result<PathBuf, AppError> {
    let dir_path = PathBuf::from(dir_path_str);
    if !dir_path.exists() {
        debug!("Output directory '{}' does not exist, attempting to create it.", dir_path.display());
        std::fs::create_dir_all(&dir_path).map_err(|e| {
            AppError::Io(format!(
                "Failed to create output directory '{}': {}",
                dir_path.display(),
                e
            ))
        })?;
    } else if !dir_path.is_dir() {
        return Err(AppError::Io(format!(
            "Output path '{}' exists but is not a directory.",
            dir_path.display()
        )));
    }
    Ok(dir_path)
}

/// Creates `<root>/<name>` for every camera. Failures only warn; frames are
/// then written into whatever directory already exists.
pub fn create_camera_directories<S: AsRef<str>>(root: &Path, camera_names: &[S]) -> Vec<PathBuf> {
    debug!("📂 Creating camera directories under {}...", root.display());
    camera_names
        .iter()
        .map(|name| {
            let dir = root.join(name.as_ref());
            if let Err(e) = std::fs::create_dir(&dir) {
                warn!(
                    "⚠️ Failed to create directory {} ({}). Data will be written into pre existing directory if it exists...",
                    dir.display(),
                    e
                );
            }
            dir
        })
        .collect()
}

/// `<root>/<camera>/<timestamp><ext>`, the synchronous-mode layout.
pub fn sync_frame_path(root: &Path, camera_name: &str, timestamp: &str, extension: &str) -> PathBuf {
    root.join(camera_name).join(format!("{}{}", timestamp, extension))
}

/// `<root>/<camera>/<camera>_<id>_<date>_<count:06>_<timestamp><ext>`, the pipeline-mode layout.
pub fn pipeline_frame_path(
    root: &Path,
    camera_name: &str,
    camera_id: &str,
    date: &str,
    image_count: u64,
    timestamp: &str,
    extension: &str,
) -> PathBuf {
    root.join(camera_name).join(format!(
        "{}_{}_{}_{:06}_{}{}",
        camera_name, camera_id, date, image_count, timestamp, extension
    ))
}
