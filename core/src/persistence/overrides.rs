//! Per-chat engine-override store: a single JSON file, atomic write-temp-then-rename.
//! Grounded on the Python original's `ChatPrefsStore` (`resolve_prefs_path`, atomic
//! replace semantics) and spec §6's "per-chat engine override" surface.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::log::prefix;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatPrefs {
    pub engine: Option<String>,
    pub permission_mode: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PrefsFile {
    #[serde(default)]
    chats: HashMap<String, ChatPrefs>,
}

pub struct ChatPrefsStore {
    path: PathBuf,
}

impl ChatPrefsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn get(&self, chat_id: &str) -> ChatPrefs {
        self.load().chats.get(chat_id).cloned().unwrap_or_default()
    }

    pub fn set(&self, chat_id: &str, prefs: ChatPrefs) -> io::Result<()> {
        let mut file = self.load();
        file.chats.insert(chat_id.to_string(), prefs);
        self.save(&file)
    }

    pub fn clear(&self, chat_id: &str) -> io::Result<()> {
        let mut file = self.load();
        file.chats.remove(chat_id);
        self.save(&file)
    }

    fn load(&self) -> PrefsFile {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    fn save(&self, file: &PrefsFile) -> io::Result<()> {
        let data = serde_json::to_string_pretty(file)?;
        atomic_write(&self.path, &data)
    }
}

fn atomic_write(path: &Path, data: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    match std::fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{} event=atomic_write_failed path={} error={}", prefix("persistence"), path.display(), e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_atomic_write() {
        let dir = std::env::temp_dir().join(format!("prefs-test-{}", std::process::id()));
        let path = dir.join("prefs.json");
        let store = ChatPrefsStore::new(path);
        store.set("chat-1", ChatPrefs { engine: Some("claude".into()), permission_mode: Some("plan".into()) }).unwrap();
        let prefs = store.get("chat-1");
        assert_eq!(prefs.engine.as_deref(), Some("claude"));
        store.clear("chat-1").unwrap();
        assert!(store.get("chat-1").engine.is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
