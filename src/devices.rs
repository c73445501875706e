//! Device bootstrap: make sure the device directory and the console node
//! exist before anything that needs console I/O is started.
//!
//! Every step is idempotent. `EEXIST` counts as success, so running the
//! bootstrap again (e.g. after init itself was restarted) is harmless.

use crate::config::DevicesConfig;
use nix::errno::Errno;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use nix::unistd::mkdir;
use std::path::{Path, PathBuf};

/// Permission bits for every node init creates.
pub const NODE_MODE: u32 = 0o600;

/// Major/minor pair identifying a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId {
    pub major: u64,
    pub minor: u64,
}

impl DeviceId {
    pub fn new(major: u64, minor: u64) -> Self {
        Self { major, minor }
    }

    fn raw(self) -> nix::libc::dev_t {
        makedev(self.major, self.minor)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// What a successful ensure step found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    AlreadyExists,
}

/// Fatal bootstrap failures. Init cannot continue without its device surface.
#[derive(Debug, PartialEq, Eq)]
pub enum BootstrapError {
    Directory { path: PathBuf, errno: Errno },
    Node { path: PathBuf, errno: Errno },
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapError::Directory { path, errno } => {
                write!(f, "mkdir {}: {}", path.display(), errno.desc())
            }
            BootstrapError::Node { path, errno } => {
                write!(f, "mknod {}: {}", path.display(), errno.desc())
            }
        }
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BootstrapError::Directory { errno, .. } => Some(errno),
            BootstrapError::Node { errno, .. } => Some(errno),
        }
    }
}

fn ensured(result: nix::Result<()>) -> Result<Ensured, Errno> {
    match result {
        Ok(()) => Ok(Ensured::Created),
        Err(Errno::EEXIST) => Ok(Ensured::AlreadyExists),
        Err(errno) => Err(errno),
    }
}

/// Create the device directory with `mode`. An existing entry is success.
pub fn ensure_device_directory(path: &Path, mode: u32) -> Result<Ensured, BootstrapError> {
    let mode = Mode::from_bits_truncate(mode as nix::libc::mode_t);
    ensured(mkdir(path, mode)).map_err(|errno| BootstrapError::Directory {
        path: path.to_path_buf(),
        errno,
    })
}

/// Create a character device node at `path`. An existing entry is success.
pub fn ensure_char_node(
    path: &Path,
    device_id: DeviceId,
    mode: u32,
) -> Result<Ensured, BootstrapError> {
    let perm = Mode::from_bits_truncate(mode as nix::libc::mode_t);
    ensured(mknod(path, SFlag::S_IFCHR, perm, device_id.raw())).map_err(|errno| {
        BootstrapError::Node {
            path: path.to_path_buf(),
            errno,
        }
    })
}

/// Create the console character node.
pub fn ensure_console_node(path: &Path, device_id: DeviceId) -> Result<Ensured, BootstrapError> {
    ensure_char_node(path, device_id, NODE_MODE)
}

/// Run the whole bootstrap in order: directory, console, extra nodes.
///
/// Stops at the first failure; nothing already created is rolled back.
pub fn bootstrap(config: &DevicesConfig) -> Result<(), BootstrapError> {
    let outcome = ensure_device_directory(&config.dir, config.dir_mode)?;
    tracing::debug!(path = %config.dir.display(), ?outcome, "device directory ready");

    let console = DeviceId::new(config.console_major, config.console_minor);
    let outcome = ensure_console_node(&config.console, console)?;
    tracing::debug!(
        path = %config.console.display(),
        device = %console,
        ?outcome,
        "console node ready"
    );

    for node in &config.nodes {
        let id = DeviceId::new(node.major, node.minor);
        let outcome = ensure_char_node(&node.path, id, NODE_MODE)?;
        tracing::debug!(path = %node.path.display(), device = %id, ?outcome, "device node ready");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> DevicesConfig {
        DevicesConfig {
            dir: root.join("dev"),
            dir_mode: 0o755,
            console: root.join("dev/console"),
            ..Default::default()
        }
    }

    #[test]
    fn test_directory_created_then_found() {
        let tmp = tempdir().unwrap();
        let dev = tmp.path().join("dev");

        assert_eq!(
            ensure_device_directory(&dev, 0o755).unwrap(),
            Ensured::Created
        );
        assert!(dev.is_dir());
        assert_eq!(
            ensure_device_directory(&dev, 0o755).unwrap(),
            Ensured::AlreadyExists
        );
    }

    #[test]
    fn test_directory_with_zero_mode_is_created() {
        let tmp = tempdir().unwrap();
        let dev = tmp.path().join("dev");
        assert_eq!(ensure_device_directory(&dev, 0).unwrap(), Ensured::Created);
        assert_eq!(
            ensure_device_directory(&dev, 0).unwrap(),
            Ensured::AlreadyExists
        );
    }

    #[test]
    fn test_directory_failure_reports_path_and_cause() {
        let tmp = tempdir().unwrap();
        let dev = tmp.path().join("missing-parent/dev");

        let err = ensure_device_directory(&dev, 0o755).unwrap_err();
        assert_eq!(
            err,
            BootstrapError::Directory {
                path: dev.clone(),
                errno: Errno::ENOENT,
            }
        );
        let msg = err.to_string();
        assert!(msg.contains(&dev.display().to_string()));
        assert!(msg.contains(Errno::ENOENT.desc()));
    }

    #[test]
    fn test_existing_console_is_success() {
        let tmp = tempdir().unwrap();
        let console = tmp.path().join("console");
        std::fs::write(&console, b"").unwrap();

        let outcome = ensure_console_node(&console, DeviceId::new(1, 0)).unwrap();
        assert_eq!(outcome, Ensured::AlreadyExists);
    }

    #[test]
    fn test_node_failure_reports_path_and_cause() {
        let tmp = tempdir().unwrap();
        let console = tmp.path().join("nodir/console");

        let err = ensure_console_node(&console, DeviceId::new(1, 0)).unwrap_err();
        assert_eq!(
            err,
            BootstrapError::Node {
                path: console.clone(),
                errno: Errno::ENOENT,
            }
        );
        assert!(err.to_string().starts_with("mknod "));
    }

    #[test]
    fn test_bootstrap_twice_with_existing_entries() {
        let tmp = tempdir().unwrap();
        let config = test_config(tmp.path());
        std::fs::create_dir(&config.dir).unwrap();
        std::fs::write(&config.console, b"").unwrap();

        bootstrap(&config).unwrap();
        bootstrap(&config).unwrap();
    }

    #[test]
    fn test_bootstrap_stops_at_directory_failure() {
        let tmp = tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.dir = tmp.path().join("a/b/dev");

        let err = bootstrap(&config).unwrap_err();
        assert!(matches!(err, BootstrapError::Directory { .. }));
        assert!(!config.console.exists());
    }

    #[test]
    fn test_bootstrap_reports_failing_extra_node() {
        let tmp = tempdir().unwrap();
        let mut config = test_config(tmp.path());
        std::fs::create_dir(&config.dir).unwrap();
        std::fs::write(&config.console, b"").unwrap();
        let bad = tmp.path().join("nowhere/null");
        config.nodes.push(NodeConfig {
            path: bad.clone(),
            major: 1,
            minor: 3,
        });

        let err = bootstrap(&config).unwrap_err();
        assert_eq!(
            err,
            BootstrapError::Node {
                path: bad,
                errno: Errno::ENOENT,
            }
        );
    }

    #[test]
    fn test_device_id_display() {
        assert_eq!(DeviceId::new(1, 0).to_string(), "1:0");
        assert_eq!(DeviceId::new(4, 64).to_string(), "4:64");
    }
}
