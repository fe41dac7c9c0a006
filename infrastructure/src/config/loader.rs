//! Configuration loader with multi-source merging

use super::file_config::{ConfigError, FileClientConfig, FileRelayConfig};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use std::path::{Path, PathBuf};

/// Server used when nothing is configured.
pub const DEFAULT_SERVER: &str = "wss://localhost/api/eye";

/// Endpoint path every eye server exposes.
const EYE_PATH: &str = "/api/eye";

/// Fully resolved client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub token: String,
    /// Normalized `ws://` / `wss://` endpoint, without the token.
    pub server: String,
}

impl ClientSettings {
    /// Endpoint URL with the token attached as a query parameter.
    pub fn endpoint(&self) -> String {
        let separator = if self.server.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.server, separator, self.token)
    }
}

/// Configuration loader that handles file discovery and merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load client settings from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. `EYE_TOKEN` / `EYE_SERVER`
    /// 2. `~/.algo/config.json`
    /// 3. `~/.algo/token` / `~/.algo/server` plain files
    /// 4. Default server
    pub fn load_client() -> Result<ClientSettings, ConfigError> {
        Self::load_client_from(Self::client_dir().as_deref())
    }

    /// Same as [`load_client`](Self::load_client) with an explicit config directory.
    pub fn load_client_from(dir: Option<&Path>) -> Result<ClientSettings, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(FileClientConfig::default()));
        if let Some(dir) = dir {
            figment = figment.merge(Json::file(dir.join("config.json")));
        }
        figment = figment.merge(Env::prefixed("EYE_").only(&["token", "server"]));

        let file: FileClientConfig = figment.extract().map_err(Box::new)?;

        let token = non_empty(file.token)
            .or_else(|| dir.and_then(|d| read_trimmed(&d.join("token"))))
            .ok_or(ConfigError::MissingToken)?;
        let server = non_empty(file.server)
            .or_else(|| dir.and_then(|d| read_trimmed(&d.join("server"))))
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        Ok(ClientSettings {
            token,
            server: normalize_server(&server),
        })
    }

    /// Client configuration directory: `~/.algo`
    pub fn client_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".algo"))
    }

    /// Load relay server configuration
    ///
    /// Priority (highest to lowest):
    /// 1. `EYE_RELAY_*` environment variables
    /// 2. `--config <path>` specified file
    /// 3. `./eye-relay.toml`
    /// 4. Default values
    pub fn load_relay(config_path: Option<&Path>) -> Result<FileRelayConfig, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(FileRelayConfig::default()));

        let local = PathBuf::from("eye-relay.toml");
        if local.exists() {
            figment = figment.merge(Toml::file(&local));
        }
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("EYE_RELAY_").split("__"));

        let config: FileRelayConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }
}

/// Turn whatever the user configured into a WebSocket endpoint.
///
/// `https://` becomes `wss://`, `http://` becomes `ws://`, a bare host gets
/// `wss://`, and `/api/eye` is appended when missing. URLs that already use
/// a WebSocket scheme are taken as-is.
pub fn normalize_server(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("ws://") || raw.starts_with("wss://") {
        return raw.to_string();
    }

    let mut server = if let Some(rest) = raw.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = raw.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{raw}")
    };

    if !server.contains(EYE_PATH) {
        server = format!("{}{EYE_PATH}", server.trim_end_matches('/'));
    }
    server
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_normalize_server() {
        assert_eq!(normalize_server("wss://a.example/x"), "wss://a.example/x");
        assert_eq!(normalize_server("ws://localhost:8080/api/eye"), "ws://localhost:8080/api/eye");
        assert_eq!(normalize_server("https://a.example"), "wss://a.example/api/eye");
        assert_eq!(normalize_server("http://localhost:8080/"), "ws://localhost:8080/api/eye");
        assert_eq!(normalize_server("a.example"), "wss://a.example/api/eye");
        assert_eq!(normalize_server("a.example/api/eye"), "wss://a.example/api/eye");
    }

    #[test]
    fn test_endpoint_appends_token() {
        let settings = ClientSettings {
            token: "t0k".into(),
            server: "wss://a.example/api/eye".into(),
        };
        assert_eq!(settings.endpoint(), "wss://a.example/api/eye?token=t0k");

        let settings = ClientSettings {
            token: "t0k".into(),
            server: "wss://a.example/api/eye?x=1".into(),
        };
        assert_eq!(settings.endpoint(), "wss://a.example/api/eye?x=1&token=t0k");
    }

    #[test]
    fn test_config_json_beats_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"token":"from-json","server":"https://json.example"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("token"), "from-file\n").unwrap();

        let settings = ConfigLoader::load_client_from(Some(dir.path())).unwrap();
        assert_eq!(settings.token, "from-json");
        assert_eq!(settings.server, "wss://json.example/api/eye");
    }

    #[test]
    fn test_plain_files_and_default_server() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("token"), "  plain \n").unwrap();

        let settings = ConfigLoader::load_client_from(Some(dir.path())).unwrap();
        assert_eq!(settings.token, "plain");
        assert_eq!(settings.server, DEFAULT_SERVER);
    }

    #[test]
    fn test_missing_token() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load_client_from(Some(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::MissingToken));
    }

    #[test]
    fn test_relay_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(
            &path,
            "bind = \"0.0.0.0:9000\"\n[tokens]\nsecret = \"alice\"\n",
        )
        .unwrap();

        let config = ConfigLoader::load_relay(Some(&path)).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.tokens.get("secret").map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_relay_config_requires_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(&path, "bind = \"127.0.0.1:0\"\n").unwrap();
        assert!(matches!(
            ConfigLoader::load_relay(Some(&path)),
            Err(ConfigError::NoTokens)
        ));
    }
}
