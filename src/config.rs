//! Configuration loader, validator and writer for the Pocket→Trello sync.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Pocket `state` values accepted by the retrieve endpoint.
const VALID_STATES: [&str; 3] = ["unread", "archive", "all"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration record persisted as JSON.
///
/// Keys this tool does not know about are kept in `extra` so that rewriting
/// the file at the end of a run does not drop them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub authentication: Authentication,
    #[serde(alias = "trello_list_id")]
    pub destination_list_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pocket_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pocket_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pocket_last_checked: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Credentials for both services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Authentication {
    #[serde(alias = "pocket_consumer_key")]
    pub source_consumer_key: String,
    /// Older configs keep this under `pocket_user_credentials.access_token`;
    /// see [`Authentication::fill_legacy_token`].
    #[serde(default)]
    pub source_access_token: String,
    #[serde(alias = "trello_api_key")]
    pub destination_api_key: String,
    #[serde(alias = "trello_token")]
    pub destination_token: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Authentication {
    /// Take the Pocket access token from the nested legacy location when the
    /// flat key is missing.
    fn fill_legacy_token(&mut self) {
        if !self.source_access_token.trim().is_empty() {
            return;
        }
        if let Some(token) = self
            .extra
            .get("pocket_user_credentials")
            .and_then(|c| c.get("access_token"))
            .and_then(Value::as_str)
        {
            self.source_access_token = token.to_string();
        }
    }
}

/// Optional limits applied to a single run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    #[serde(default = "default_title_timeout_secs")]
    pub title_timeout_secs: u64,
    #[serde(default = "default_title_max_bytes")]
    pub title_max_bytes: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_run_secs")]
    pub max_run_secs: u64,
    /// Pass `pocket_last_checked` to Pocket as the `since` boundary.
    #[serde(default = "default_incremental")]
    pub incremental: bool,
}

fn default_title_timeout_secs() -> u64 {
    10
}

fn default_title_max_bytes() -> usize {
    1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_run_secs() -> u64 {
    600
}

fn default_incremental() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            title_timeout_secs: default_title_timeout_secs(),
            title_max_bytes: default_title_max_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            max_run_secs: default_max_run_secs(),
            incremental: default_incremental(),
        }
    }
}

impl SyncSettings {
    pub fn title_timeout(&self) -> Duration {
        Duration::from_secs(self.title_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_run(&self) -> Duration {
        Duration::from_secs(self.max_run_secs)
    }
}

impl Config {
    /// Parse a configuration document, resolving legacy key locations.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut cfg: Config = serde_json::from_str(content)?;
        cfg.authentication.fill_legacy_token();
        Ok(cfg)
    }

    /// Pocket state filter, `"all"` unless configured.
    pub fn state_filter(&self) -> &str {
        self.pocket_state.as_deref().unwrap_or("all")
    }

    /// Marker tag, treating an empty string as unset.
    pub fn marker_tag(&self) -> Option<&str> {
        self.pocket_tag.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn settings(&self) -> SyncSettings {
        self.sync.clone().unwrap_or_default()
    }

    /// Lower bound for the Pocket fetch, if incremental fetching is on.
    pub fn since(&self) -> Option<i64> {
        if self.settings().incremental {
            self.pocket_last_checked
        } else {
            None
        }
    }

    pub fn mark_checked(&mut self, timestamp: i64) {
        self.pocket_last_checked = Some(timestamp);
    }

    /// Write the configuration back as pretty JSON.
    /// The file is written to a sibling temp path first and then renamed over.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Load configuration from a JSON file and validate it.
/// - If `path` is None, uses `config.json` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let content = fs::read_to_string(path)?;
    let cfg = Config::from_json(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let auth = &cfg.authentication;
    if auth.source_consumer_key.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "authentication.source_consumer_key must be non-empty",
        ));
    }
    if auth.source_access_token.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "authentication.source_access_token must be non-empty",
        ));
    }
    if auth.destination_api_key.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "authentication.destination_api_key must be non-empty",
        ));
    }
    if auth.destination_token.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "authentication.destination_token must be non-empty",
        ));
    }

    if cfg.destination_list_id.trim().is_empty() {
        return Err(ConfigError::Invalid("destination_list_id must be non-empty"));
    }

    if !VALID_STATES.contains(&cfg.state_filter()) {
        return Err(ConfigError::Invalid(
            "pocket_state must be one of unread, archive, all",
        ));
    }

    if let Some(sync) = &cfg.sync {
        if sync.title_timeout_secs == 0 {
            return Err(ConfigError::Invalid("sync.title_timeout_secs must be > 0"));
        }
        if sync.title_max_bytes == 0 {
            return Err(ConfigError::Invalid("sync.title_max_bytes must be > 0"));
        }
        if sync.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("sync.request_timeout_secs must be > 0"));
        }
        if sync.max_run_secs == 0 {
            return Err(ConfigError::Invalid("sync.max_run_secs must be > 0"));
        }
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"{
  "authentication": {
    "source_consumer_key": "YOUR_POCKET_CONSUMER_KEY",
    "source_access_token": "YOUR_POCKET_ACCESS_TOKEN",
    "destination_api_key": "YOUR_TRELLO_API_KEY",
    "destination_token": "YOUR_TRELLO_TOKEN"
  },
  "destination_list_id": "TRELLO_LIST_ID",
  "pocket_tag": "trello",
  "pocket_state": "all"
}
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_json::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.marker_tag(), Some("trello"));
        assert_eq!(cfg.state_filter(), "all");
        assert_eq!(cfg.pocket_last_checked, None);
        assert_eq!(cfg.settings(), SyncSettings::default());
    }

    #[test]
    fn state_defaults_to_all() {
        let mut cfg = example_cfg();
        cfg.pocket_state = None;
        assert_eq!(cfg.state_filter(), "all");
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_state() {
        let mut cfg = example_cfg();
        cfg.pocket_state = Some("favorite".into());
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("pocket_state")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_credentials() {
        let mut cfg = example_cfg();
        cfg.authentication.source_consumer_key = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("source_consumer_key")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.authentication.destination_token = "  ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("destination_token")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.destination_list_id = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_sync_limits() {
        let mut cfg = example_cfg();
        cfg.sync = Some(SyncSettings {
            title_max_bytes: 0,
            ..SyncSettings::default()
        });
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("title_max_bytes")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn partial_sync_section_uses_defaults() {
        let raw = r#"{
            "authentication": {
                "source_consumer_key": "ck",
                "source_access_token": "at",
                "destination_api_key": "k",
                "destination_token": "t"
            },
            "destination_list_id": "list",
            "sync": { "title_timeout_secs": 3, "incremental": false }
        }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        let settings = cfg.settings();
        assert_eq!(settings.title_timeout(), Duration::from_secs(3));
        assert_eq!(settings.title_max_bytes, 1024 * 1024);
        assert!(!settings.incremental);
    }

    #[test]
    fn legacy_key_names_are_accepted() {
        let raw = r#"{
            "authentication": {
                "pocket_consumer_key": "ck",
                "pocket_user_credentials": { "access_token": "at", "username": "me" },
                "trello_api_key": "k",
                "trello_token": "t"
            },
            "trello_list_id": "l"
        }"#;
        let cfg = Config::from_json(raw).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.authentication.source_consumer_key, "ck");
        assert_eq!(cfg.authentication.source_access_token, "at");
        assert_eq!(cfg.authentication.destination_api_key, "k");
        assert_eq!(cfg.authentication.destination_token, "t");
        assert_eq!(cfg.destination_list_id, "l");
    }

    #[test]
    fn flat_access_token_wins_over_legacy() {
        let raw = r#"{
            "authentication": {
                "source_consumer_key": "ck",
                "source_access_token": "flat",
                "pocket_user_credentials": { "access_token": "nested" },
                "destination_api_key": "k",
                "destination_token": "t"
            },
            "destination_list_id": "l"
        }"#;
        let cfg = Config::from_json(raw).unwrap();
        assert_eq!(cfg.authentication.source_access_token, "flat");
    }

    #[test]
    fn missing_access_token_fails_validation() {
        let raw = r#"{
            "authentication": {
                "source_consumer_key": "ck",
                "destination_api_key": "k",
                "destination_token": "t"
            },
            "destination_list_id": "l"
        }"#;
        let cfg = Config::from_json(raw).unwrap();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("source_access_token")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn since_honors_incremental_flag() {
        let mut cfg = example_cfg();
        cfg.mark_checked(1_700_000_000);
        assert_eq!(cfg.since(), Some(1_700_000_000));

        cfg.sync = Some(SyncSettings {
            incremental: false,
            ..SyncSettings::default()
        });
        assert_eq!(cfg.since(), None);
    }

    #[test]
    fn empty_marker_tag_is_unset() {
        let mut cfg = example_cfg();
        cfg.pocket_tag = Some("".into());
        assert_eq!(cfg.marker_tag(), None);
    }

    #[test]
    fn save_preserves_unknown_keys() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.json");
        let raw = r#"{
            "authentication": {
                "source_consumer_key": "ck",
                "source_access_token": "at",
                "destination_api_key": "k",
                "destination_token": "t",
                "pocket_user_credentials": { "username": "me" }
            },
            "destination_list_id": "list",
            "note": "keep me"
        }"#;
        fs::write(&p, raw).unwrap();

        let mut cfg = load(Some(&p)).unwrap();
        cfg.mark_checked(42);
        cfg.save(&p).unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(&p).unwrap()).unwrap();
        assert_eq!(written["pocket_last_checked"], 42);
        assert_eq!(written["note"], "keep me");
        assert_eq!(
            written["authentication"]["pocket_user_credentials"]["username"],
            "me"
        );
        assert!(written.get("pocket_state").is_none());
        assert!(!td.path().join("config.json.tmp").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.json");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.destination_list_id, "TRELLO_LIST_ID");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let td = tempdir().unwrap();
        let err = load(Some(&td.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
