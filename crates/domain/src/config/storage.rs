use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State location (the `DB_URL` environment variable). For the file
    /// store this is a directory path; a `file://` prefix is accepted.
    #[serde(default = "d_url")]
    pub url: String,
    /// Conversations idle for longer than this are destroyed by the
    /// background sweep. 0 disables TTL cleanup.
    #[serde(default)]
    pub session_ttl_secs: u64,
}

impl StorageConfig {
    /// The state directory the file store writes under.
    pub fn state_dir(&self) -> std::path::PathBuf {
        let raw = self.url.strip_prefix("file://").unwrap_or(&self.url);
        std::path::PathBuf::from(raw)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: d_url(),
            session_ttl_secs: 0,
        }
    }
}

fn d_url() -> String {
    "./data/state".into()
}
