use crate::prefs::{DEFAULT_ACCENT, DEFAULT_THEME, FontFamily};
use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

pub mod keys {
    pub const CONTENT: &str = "makeme-content";
    pub const TIMESTAMP: &str = "makeme-timestamp";
    pub const THEME: &str = "makeme-theme";
    pub const FONT: &str = "makeme-font";
    pub const ACCENT_COLOR: &str = "makeme-accent-color";
    pub const API_KEY: &str = "makeme-api-key";

    pub const ALL: [&str; 6] = [CONTENT, TIMESTAMP, THEME, FONT, ACCENT_COLOR, API_KEY];
}

/// String blobs addressed by key.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/makeme`
    pub fn open_default() -> Result<Self> {
        let base = dirs::data_dir().context("Could not determine data directory")?;
        Ok(Self::new(base.join("makeme")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// Typed access to the stored blobs. Every operation is best effort: a
/// failing store is logged and reported as `false` or a default value.
#[derive(Clone)]
pub struct Storage {
    store: Rc<dyn KeyValueStore>,
}

impl Storage {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Rc::new(store),
        }
    }

    /// Saves the document and stamps the save time.
    pub fn save_content(&self, content: &str) -> bool {
        if !self.put(keys::CONTENT, content) {
            return false;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.put(keys::TIMESTAMP, &now.to_string())
    }

    pub fn load_content(&self) -> String {
        self.fetch(keys::CONTENT).unwrap_or_default()
    }

    /// Milliseconds since the epoch of the last successful content save.
    pub fn last_save_time(&self) -> Option<u64> {
        self.fetch(keys::TIMESTAMP)?.trim().parse().ok()
    }

    pub fn save_theme(&self, theme: &str) -> bool {
        self.put(keys::THEME, theme)
    }

    pub fn load_theme(&self) -> String {
        self.fetch(keys::THEME)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_THEME.to_string())
    }

    pub fn save_font(&self, font: FontFamily) -> bool {
        self.put(keys::FONT, font.key())
    }

    pub fn load_font(&self) -> FontFamily {
        self.fetch(keys::FONT)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }

    pub fn save_accent_color(&self, hex: &str) -> bool {
        self.put(keys::ACCENT_COLOR, hex)
    }

    pub fn load_accent_color(&self) -> String {
        self.fetch(keys::ACCENT_COLOR)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_ACCENT.to_string())
    }

    pub fn save_api_key(&self, key: &str) -> bool {
        self.put(keys::API_KEY, key.trim())
    }

    pub fn load_api_key(&self) -> Option<String> {
        self.fetch(keys::API_KEY)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    pub fn clear_all(&self) -> bool {
        let mut ok = true;
        for key in keys::ALL {
            if let Err(err) = self.store.remove(key) {
                error!(target: "store", key, %err, "remove_failed");
                ok = false;
            }
        }
        ok
    }

    fn put(&self, key: &str, value: &str) -> bool {
        match self.store.set(key, value) {
            Ok(()) => {
                debug!(target: "store", key, bytes = value.len(), "saved");
                true
            }
            Err(err) => {
                error!(target: "store", key, %err, "save_failed");
                false
            }
        }
    }

    fn fetch(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                error!(target: "store", key, %err, "load_failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> io::Result<Option<String>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }

        fn set(&self, _key: &str, _value: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "quota exceeded"))
        }

        fn remove(&self, _key: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let storage = Storage::new(MemoryStore::default());
        assert_eq!(storage.load_content(), "");
        assert_eq!(storage.load_theme(), DEFAULT_THEME);
        assert_eq!(storage.load_font(), FontFamily::SansSerif);
        assert_eq!(storage.load_accent_color(), DEFAULT_ACCENT);
        assert_eq!(storage.load_api_key(), None);
        assert_eq!(storage.last_save_time(), None);
    }

    #[test]
    fn content_save_stamps_time() {
        let storage = Storage::new(MemoryStore::default());
        assert!(storage.save_content("# Project"));
        assert_eq!(storage.load_content(), "# Project");
        assert!(storage.last_save_time().is_some_and(|t| t > 0));
    }

    #[test]
    fn failing_store_never_propagates() {
        let storage = Storage::new(BrokenStore);
        assert!(!storage.save_content("text"));
        assert!(!storage.save_theme("x"));
        assert_eq!(storage.load_content(), "");
        assert_eq!(storage.load_theme(), DEFAULT_THEME);
        assert_eq!(storage.load_font(), FontFamily::SansSerif);
        assert!(!storage.clear_all());
    }

    #[test]
    fn unreadable_values_use_defaults() {
        let store = MemoryStore::default();
        store.set(keys::FONT, "wingdings").unwrap();
        store.set(keys::TIMESTAMP, "yesterday").unwrap();
        store.set(keys::API_KEY, "   ").unwrap();
        let storage = Storage::new(store);
        assert_eq!(storage.load_font(), FontFamily::SansSerif);
        assert_eq!(storage.last_save_time(), None);
        assert_eq!(storage.load_api_key(), None);
    }

    #[test]
    fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("makeme"));
        assert_eq!(store.get(keys::CONTENT).unwrap(), None);

        let storage = Storage::new(store.clone());
        assert!(storage.save_content("hello\n"));
        assert!(storage.save_api_key(" gsk_test "));
        assert_eq!(storage.load_content(), "hello\n");
        assert_eq!(storage.load_api_key().as_deref(), Some("gsk_test"));
        assert!(store.dir().join(keys::CONTENT).exists());

        assert!(storage.clear_all());
        assert_eq!(storage.load_content(), "");
        assert!(storage.clear_all());
    }
}
