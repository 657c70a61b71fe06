//! File-backed key-value store: a TOML table of hex-encoded values, rewritten on every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use room_link_core::{KeyValueStore, PersistenceError};

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(s) => toml::from_str(&s).map_err(|e| PersistenceError::Backend(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write to a sibling temp file, then rename over the old one.
    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), PersistenceError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let text = toml::to_string(entries).map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let entries = self.entries.lock();
        let Some(raw) = entries.get(key) else {
            return Ok(None);
        };
        hex::decode(raw)
            .map(Some)
            .map_err(|_| PersistenceError::Backend(format!("`{key}` is not valid hex")))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_string(), hex::encode(value));
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use room_link_core::store::{self, StoredPairing};
    use room_link_core::{HwAddr, RoomId};

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStore::open(dir.path().join("state.toml")).unwrap();
        assert_eq!(s.get("paired").unwrap(), None);
        assert_eq!(store::load(&s).unwrap(), StoredPairing::default());
    }

    #[test]
    fn pairing_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.toml");
        let peer = HwAddr([0x24, 0x6F, 0x28, 1, 2, 3]);
        let room = RoomId::new("LAB-7").unwrap();
        {
            let s = FileStore::open(&path).unwrap();
            store::save_room(&s, &room).unwrap();
            store::save_pairing(&s, peer).unwrap();
        }
        let s = FileStore::open(&path).unwrap();
        let rec = store::load(&s).unwrap();
        assert_eq!(rec.peer, Some(peer));
        assert_eq!(rec.room, Some(room));

        store::clear_pairing(&s).unwrap();
        let s = FileStore::open(&path).unwrap();
        assert_eq!(store::load(&s).unwrap().peer, None);
        assert_eq!(store::load(&s).unwrap().room, Some(room));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        assert!(FileStore::open(&path).is_err());

        std::fs::write(&path, "paired = \"zz\"\n").unwrap();
        let s = FileStore::open(&path).unwrap();
        assert!(s.get("paired").is_err());
        assert!(store::load(&s).is_err());
    }
}
