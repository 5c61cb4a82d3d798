use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Read-only switch driven by the presence of a marker file.
/// The file is stat-ed on every check, so operators can flip the mode
/// without restarting.
pub struct Maintenance {
    file: Option<PathBuf>,
    last: AtomicBool,
}

impl Maintenance {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            file,
            last: AtomicBool::new(false),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// `(on, message)`; the message is the file content when it is a
    /// non-empty regular file.
    pub fn check(&self) -> (bool, String) {
        let (on, message) = self.probe();
        if self.last.swap(on, Ordering::Relaxed) != on {
            info!("Maintenance mode {}", if on { "on" } else { "off" });
        }
        (on, message)
    }

    fn probe(&self) -> (bool, String) {
        let Some(file) = &self.file else {
            return (false, String::new());
        };
        let meta = match std::fs::metadata(file) {
            Ok(meta) => meta,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Unable to stat `{}`: {}", file.display(), e);
                }
                return (false, String::new());
            }
        };
        let mut message = String::new();
        if meta.is_file() && meta.len() > 0 {
            match std::fs::read_to_string(file) {
                Ok(content) => message = content,
                Err(e) => warn!("Unable to read `{}`: {}", file.display(), e),
            }
        }
        (true, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled() {
        assert_eq!(Maintenance::disabled().check(), (false, String::new()));
    }

    #[test]
    fn test_marker_file_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("_maintenance");
        let maintenance = Maintenance::new(Some(marker.clone()));
        assert_eq!(maintenance.check(), (false, String::new()));

        std::fs::write(&marker, "").unwrap();
        assert_eq!(maintenance.check(), (true, String::new()));

        std::fs::write(&marker, "back at 10:00 UTC\n").unwrap();
        assert_eq!(maintenance.check(), (true, "back at 10:00 UTC\n".to_string()));

        std::fs::remove_file(&marker).unwrap();
        assert!(!maintenance.check().0);
    }

    #[test]
    fn test_directory_marker_has_no_message() {
        let dir = tempfile::tempdir().unwrap();
        let maintenance = Maintenance::new(Some(dir.path().to_path_buf()));
        assert_eq!(maintenance.check(), (true, String::new()));
    }
}
