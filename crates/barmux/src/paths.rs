use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Default configuration file, i.e. `$XDG_CONFIG_HOME/barmux/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from(std::env::var("HOME").context("Neither $XDG_CONFIG_HOME nor $HOME is set")?)
            .join(".config"),
    };
    Ok(config_dir.join("barmux").join("config.toml"))
}

#[derive(Debug, Clone)]
pub struct BarmuxPaths {
    config_file: PathBuf,
    socket_dir: PathBuf,
    socket_prefix: String,
}

impl BarmuxPaths {
    pub fn new(config_file: PathBuf, socket_dir: PathBuf, socket_prefix: String) -> Result<Self> {
        if socket_prefix.is_empty() || socket_prefix.contains('/') {
            bail!("Invalid control socket prefix {:?}", socket_prefix);
        }
        Ok(BarmuxPaths { config_file, socket_dir, socket_prefix })
    }

    pub fn get_config_file(&self) -> &Path {
        self.config_file.as_path()
    }

    /// The control socket of this process: `<socket_dir>/<socket_prefix>.<pid>`.
    pub fn ctl_socket_file(&self) -> PathBuf {
        self.socket_file_for(std::process::id())
    }

    pub fn socket_file_for(&self, pid: u32) -> PathBuf {
        self.socket_dir.join(format!("{}.{}", self.socket_prefix, pid))
    }

    /// All control sockets in the socket directory, one per running bar.
    /// Sockets of dead processes may linger here; callers should treat
    /// connection failures as stale entries rather than errors.
    pub fn enumerate_ctl_sockets(&self) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}.", self.socket_prefix);
        let mut sockets = Vec::new();
        let entries = std::fs::read_dir(&self.socket_dir)
            .with_context(|| format!("Failed to list socket directory {}", self.socket_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(pid) = name.strip_prefix(&prefix) else { continue };
            if !pid.is_empty() && pid.bytes().all(|b| b.is_ascii_digit()) {
                sockets.push(entry.path());
            }
        }
        sockets.sort();
        Ok(sockets)
    }
}

impl std::fmt::Display for BarmuxPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config: {}, socket: {}", self.config_file.display(), self.ctl_socket_file().display())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn paths_in(dir: &Path) -> BarmuxPaths {
        BarmuxPaths::new(dir.join("config.toml"), dir.to_path_buf(), "barmux_uds".to_string()).unwrap()
    }

    #[test]
    fn socket_file_carries_own_pid() {
        let paths = paths_in(Path::new("/tmp"));
        let expected = format!("/tmp/barmux_uds.{}", std::process::id());
        assert_eq!(paths.ctl_socket_file(), PathBuf::from(expected));
    }

    #[test]
    fn enumeration_only_picks_up_socket_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["barmux_uds.123", "barmux_uds.9", "barmux_uds.abc", "barmux_uds.", "other.123"] {
            std::fs::File::create(dir.path().join(name)).unwrap();
        }
        let paths = paths_in(dir.path());
        let found = paths.enumerate_ctl_sockets().unwrap();
        assert_eq!(found, vec![dir.path().join("barmux_uds.123"), dir.path().join("barmux_uds.9")]);
    }

    #[test]
    fn prefix_must_be_a_file_name() {
        assert!(BarmuxPaths::new(PathBuf::from("c"), PathBuf::from("/tmp"), "a/b".to_string()).is_err());
        assert!(BarmuxPaths::new(PathBuf::from("c"), PathBuf::from("/tmp"), String::new()).is_err());
    }
}
