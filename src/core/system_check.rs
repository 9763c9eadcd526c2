use crate::errors::AppError;
use log::{error, info};
use std::path::Path;

pub const USBFS_MEMORY_PATH: &str = "/sys/module/usbcore/parameters/usbfs_memory_mb";

pub fn read_usbfs_memory_mb(path: &Path) -> Result<u32, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::InsufficientResources(format!("could not read USB memory from {}: {}", path.display(), e))
    })?;
    raw.trim()
        .parse()
        .map_err(|e| AppError::InsufficientResources(format!("unreadable USB memory value '{}': {}", raw.trim(), e)))
}

/// Fails when the kernel's usbfs buffer budget is below `required_mb`.
pub fn check_usbfs_memory(path: &Path, required_mb: u32) -> Result<(), AppError> {
    let available = read_usbfs_memory_mb(path)?;
    if available < required_mb {
        error!(
            "❌ USB memory on system too low ({} MB)! Must be at least {} MB. Run:\n  sudo sh -c \"echo {} > {}\"",
            available,
            required_mb,
            required_mb,
            path.display()
        );
        return Err(AppError::InsufficientResources(format!(
            "usbfs memory is {} MB, at least {} MB required",
            available, required_mb
        )));
    }
    info!("[ OK ] USB memory: {} MB", available);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_memory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usbfs_memory_mb");
        std::fs::write(&path, "16\n").unwrap();
        assert!(matches!(check_usbfs_memory(&path, 1000), Err(AppError::InsufficientResources(_))));
        std::fs::write(&path, "1000\n").unwrap();
        assert!(check_usbfs_memory(&path, 1000).is_ok());
    }

    #[test]
    fn missing_file_is_insufficient() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_usbfs_memory(&dir.path().join("absent"), 1).is_err());
    }
}
