//! File-flag stand-ins for the presence sensor, the power relay and the credential reader.

use std::path::PathBuf;

use room_link_core::{CredentialVerifier, PowerRelay, PresenceSensor};
use tracing::warn;

/// Presence while the flag file exists.
#[derive(Debug, Clone)]
pub struct FlagPresence {
    pub path: PathBuf,
}

impl PresenceSensor for FlagPresence {
    fn poll_presence(&mut self) -> bool {
        self.path.exists()
    }
}

/// Writes `on` / `off` to a state file.
#[derive(Debug, Clone)]
pub struct FileRelay {
    pub path: PathBuf,
}

impl PowerRelay for FileRelay {
    fn set_power(&self, on: bool) {
        let state = if on { "on\n" } else { "off\n" };
        if let Some(dir) = self.path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Err(e) = std::fs::write(&self.path, state) {
            warn!(path = %self.path.display(), error = %e, "relay write failed");
        }
    }
}

/// A user id dropped into the grant file is one granted access; the file is consumed.
#[derive(Debug, Clone)]
pub struct GrantFile {
    pub path: PathBuf,
}

impl CredentialVerifier for GrantFile {
    fn verify(&mut self) -> Option<String> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not consume grant file");
        }
        let user = text.trim();
        if user.is_empty() {
            return None;
        }
        Some(user.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_follows_flag_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sensor = FlagPresence {
            path: dir.path().join("presence"),
        };
        assert!(!sensor.poll_presence());
        std::fs::write(&sensor.path, "").unwrap();
        assert!(sensor.poll_presence());
    }

    #[test]
    fn relay_writes_state() {
        let dir = tempfile::tempdir().unwrap();
        let relay = FileRelay {
            path: dir.path().join("run/power"),
        };
        relay.set_power(true);
        assert_eq!(std::fs::read_to_string(&relay.path).unwrap(), "on\n");
        relay.set_power(false);
        assert_eq!(std::fs::read_to_string(&relay.path).unwrap(), "off\n");
    }

    #[test]
    fn grant_file_is_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut grant = GrantFile {
            path: dir.path().join("grant"),
        };
        assert_eq!(grant.verify(), None);
        std::fs::write(&grant.path, "alice\n").unwrap();
        assert_eq!(grant.verify().as_deref(), Some("alice"));
        assert_eq!(grant.verify(), None);
    }
}
