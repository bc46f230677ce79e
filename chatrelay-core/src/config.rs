use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackendCfg {
    /// Base address of the backend, e.g. `http://localhost:5001`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for BackendCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:5001".to_string()
}
fn default_api_key_env() -> String {
    "CHATRELAY_API_KEY".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds, streamed body included (default 300000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamCfg {
    /// Upper bound on the accumulated `data:` payload of one SSE event.
    #[serde(default = "default_max_event_bytes")]
    pub max_event_bytes: usize,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            max_event_bytes: default_max_event_bytes(),
        }
    }
}

fn default_max_event_bytes() -> usize {
    512 * 1024
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub stream: StreamCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::RelayError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::RelayError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::RelayError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make every request fail later on.
    pub fn validate(&self) -> crate::error::CoreResult<()> {
        let base = self.backend.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(crate::error::RelayError::Validation(format!(
                "backend.base_url must be an http(s) address, got '{base}'"
            )));
        }
        if self.stream.max_event_bytes == 0 {
            return Err(crate::error::RelayError::Validation(
                "stream.max_event_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("relay.json");
        let json = r#"{
          "backend": {"base_url":"https://chat.internal","api_key_env":"APP_KEY"},
          "stream": {"max_event_bytes": 1024}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.backend.base_url, "https://chat.internal");
        assert_eq!(cfg.backend.api_key_env, "APP_KEY");
        assert_eq!(cfg.stream.max_event_bytes, 1024);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.request_timeout_ms, 300_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, None);
    }

    #[test]
    fn empty_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("empty.json");
        fs::write(&file, "{}").unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.backend.base_url, "http://localhost:5001");
        assert_eq!(cfg.stream.max_event_bytes, 512 * 1024);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/chatrelay-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            crate::error::RelayError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::RelayError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        let json = r#"{ "backend": { "base_url": 123 }"#;
        fs::write(&file, json).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::RelayError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("relay.toml");
        let toml = r#"
[backend]
base_url = "http://127.0.0.1:5001"
api_key_env = "DIFY_KEY"

[http]
request_timeout_ms = 1000
pool_max_idle_per_host = 4
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.backend.api_key_env, "DIFY_KEY");
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.request_timeout_ms, 1_000);
        assert_eq!(cfg.http.pool_max_idle_per_host, Some(4));
        assert_eq!(cfg.stream.max_event_bytes, 512 * 1024);
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("relay.conf");
        fs::write(&json_path, r#"{"backend":{"base_url":"http://a"}}"#).unwrap();
        let cfg_json_first = Config::from_path(&json_path).unwrap();
        assert_eq!(cfg_json_first.backend.base_url, "http://a");

        let toml_path = dir.path().join("relay2.conf");
        let toml = r#"
[stream]
max_event_bytes = 7
"#;
        fs::write(&toml_path, toml).unwrap();
        let cfg_toml_fallback = Config::from_path(&toml_path).unwrap();
        assert_eq!(cfg_toml_fallback.stream.max_event_bytes, 7);
        assert_eq!(cfg_toml_fallback.http.request_timeout_ms, 300_000);
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad-base.json");
        fs::write(&file, r#"{"backend":{"base_url":"localhost:5001"}}"#).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        assert!(matches!(err, crate::error::RelayError::Validation(_)));
    }

    #[test]
    fn zero_event_limit_is_rejected() {
        let cfg = Config {
            stream: StreamCfg { max_event_bytes: 0 },
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(crate::error::RelayError::Validation(_))
        ));
    }
}
