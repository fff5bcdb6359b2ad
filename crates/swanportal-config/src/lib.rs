//! Application settings.
//!
//! Settings are plain JSON, merged over defaults from an ordered list of
//! files (typically the packaged `/etc/swanportal/swanportal.conf` plus an
//! instance-specific override). Missing files are skipped; later files
//! win field by field.

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use swanportal_envelope::KeyRing;

/// Default settings path consulted when no file is given on the CLI.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/swanportal/swanportal.conf";

/// Settings failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("validation: {0}")]
    Validation(String),
}

/// Directory (identity) backend settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IdentitySettings {
    /// Base URL of the SCIM-shaped directory API.
    #[serde(default)]
    pub directory_url: String,
    /// Bearer token for the directory API.
    #[serde(default)]
    pub directory_token: String,
    /// Regex applied to group display names; capture group 1 of the first
    /// match becomes the user's RADIUS class.
    #[serde(default)]
    pub class_from_group_pattern: String,
}

impl IdentitySettings {
    /// Compile the class pattern.
    pub fn class_pattern(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.class_from_group_pattern).map_err(|e| {
            ConfigError::Validation(format!("identity.class_from_group_pattern: {e}"))
        })
    }
}

/// Credential object store settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsSettings {
    /// Label identifying the backing store in log records.
    #[serde(default)]
    pub bucket_name: String,
    /// Root directory of the object store.
    #[serde(default)]
    pub object_root: String,
    /// Comma-separated base64url envelope keys, index 0 active.
    #[serde(default)]
    pub keys: String,
}

impl CredentialsSettings {
    /// Parse the configured key ring.
    pub fn key_ring(&self) -> Result<KeyRing, ConfigError> {
        KeyRing::from_joined(&self.keys)
            .map_err(|e| ConfigError::Validation(format!("credentials.keys: {e}")))
    }
}

/// Email transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    /// Envelope-from address for self-service mail.
    #[serde(default)]
    pub source: String,
    /// Spool directory the relay agent watches.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default email settings")
    }
}

/// Listener and filesystem settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// TLS certificate chain path (PEM).
    #[serde(default)]
    pub tls_certificate_path: String,
    /// TLS private key path (PEM, PKCS#8 or PKCS#1).
    #[serde(default)]
    pub tls_private_key_path: String,
    /// Hostname reported by the verification endpoint.
    #[serde(default)]
    pub verification_hostname: String,
    /// Plain HTTP listener (redirect + favicon).
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
    /// TLS portal listener.
    #[serde(default = "default_https_listen")]
    pub https_listen: String,
    /// Loopback RADIUS bridge listener.
    #[serde(default = "default_radius_listen")]
    pub radius_listen: String,
    /// IKE daemon control socket.
    #[serde(default = "default_vici_socket")]
    pub vici_socket: String,
    /// Installed data directory (webroot/, template/, attachment/).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Site overlay directory layered over `data_dir`.
    #[serde(default)]
    pub site_dir: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default server settings")
    }
}

/// Values handed to VPN clients.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClientSettings {
    /// DNS servers pushed in RADIUS replies; at most two are used.
    #[serde(default)]
    pub dns_servers: Vec<String>,
    /// DNS search suffix for generated setup scripts.
    #[serde(default)]
    pub dns_suffix: String,
    /// Routed prefixes for generated setup scripts.
    #[serde(default)]
    pub destination_prefixes: Vec<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingSettings {
    /// Subscriber filter (trace/debug/info/warn/error).
    #[serde(default)]
    pub level: Option<String>,
}

/// Root settings object.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub identity: IdentitySettings,
    #[serde(default)]
    pub credentials: CredentialsSettings,
    #[serde(default)]
    pub email: EmailSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppSettings {
    /// Load settings by merging every existing file in `paths`, in order.
    ///
    /// Each file is a JSON object; object fields merge recursively, scalar
    /// and array fields from later files replace earlier ones.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut merged = serde_json::Value::Object(serde_json::Map::new());

        for path in paths {
            let path = path.as_ref();
            let data = match fs::read_to_string(path) {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let layer: serde_json::Value = serde_json::from_str(&data)?;
            merge_value(&mut merged, layer);
        }

        Ok(serde_json::from_value(merged)?)
    }

    /// Check everything the workers assume at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.directory_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "identity.directory_url is empty".into(),
            ));
        }
        self.identity.class_pattern()?;
        if self.credentials.object_root.trim().is_empty() {
            return Err(ConfigError::Validation(
                "credentials.object_root is empty".into(),
            ));
        }
        self.credentials.key_ring()?;
        if self.server.tls_certificate_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.tls_certificate_path is empty".into(),
            ));
        }
        if self.server.tls_private_key_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.tls_private_key_path is empty".into(),
            ));
        }
        for listen in [
            &self.server.http_listen,
            &self.server.https_listen,
            &self.server.radius_listen,
        ] {
            if listen.parse::<std::net::SocketAddr>().is_err() {
                return Err(ConfigError::Validation(format!(
                    "invalid listen address: {listen}"
                )));
            }
        }
        if self.client.dns_servers.len() > 2 {
            return Err(ConfigError::Validation(
                "client.dns_servers supports at most two entries".into(),
            ));
        }
        Ok(())
    }
}

fn merge_value(base: &mut serde_json::Value, layer: serde_json::Value) {
    match (base, layer) {
        (serde_json::Value::Object(base), serde_json::Value::Object(layer)) => {
            for (key, value) in layer {
                merge_value(base.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (base, layer) => *base = layer,
    }
}

fn default_http_listen() -> String {
    "0.0.0.0:80".to_string()
}

fn default_https_listen() -> String {
    "0.0.0.0:443".to_string()
}

fn default_radius_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_vici_socket() -> String {
    "/var/run/strongswan/charon.vici".to_string()
}

fn default_data_dir() -> String {
    "/usr/share/swanportal".to_string()
}

fn default_spool_dir() -> String {
    "/var/spool/swanportal".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use swanportal_envelope::Key;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn valid_settings_json() -> String {
        format!(
            r#"{{
                "identity": {{
                    "directory_url": "https://directory.example.com/scim/v2",
                    "directory_token": "secret",
                    "class_from_group_pattern": "^vpn-(\\w+)$"
                }},
                "credentials": {{
                    "bucket_name": "vpn-credentials",
                    "object_root": "/var/lib/swanportal/objects",
                    "keys": "{}"
                }},
                "email": {{ "source": "vpn@example.com" }},
                "server": {{
                    "tls_certificate_path": "/etc/swanportal/tls.crt",
                    "tls_private_key_path": "/etc/swanportal/tls.key"
                }},
                "client": {{
                    "dns_servers": ["10.0.0.2"],
                    "dns_suffix": "corp.example.com"
                }}
            }}"#,
            Key::generate().to_base64()
        )
    }

    #[test]
    fn test_load_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "swanportal.conf", &valid_settings_json());

        let settings = AppSettings::load(&[path]).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.email.source, "vpn@example.com");
        assert_eq!(settings.server.https_listen, "0.0.0.0:443");
        assert_eq!(settings.client.dns_servers, vec!["10.0.0.2"]);
        assert!(settings.identity.class_pattern().is_ok());
        assert_eq!(settings.credentials.key_ring().unwrap().len(), 1);
    }

    #[test]
    fn test_later_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_file(&dir, "base.conf", &valid_settings_json());
        let site = write_file(
            &dir,
            "site.conf",
            r#"{"email": {"source": "override@example.com"}}"#,
        );

        let settings = AppSettings::load(&[base, site]).unwrap();
        assert_eq!(settings.email.source, "override@example.com");
        // Untouched sections survive the merge.
        assert_eq!(settings.client.dns_suffix, "corp.example.com");
    }

    #[test]
    fn test_missing_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "swanportal.conf", &valid_settings_json());
        let missing = dir.path().join("absent.conf");

        let settings = AppSettings::load(&[path, missing]).unwrap();
        settings.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let json = valid_settings_json()
            .replace("^vpn-(\\\\w+)$", "([")
            .replace("^vpn-(\\w+)$", "([");
        let path = write_file(&dir, "swanportal.conf", &json);

        let settings = AppSettings::load(&[path]).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_three_dns_servers() {
        let dir = tempfile::tempdir().unwrap();
        let json = valid_settings_json().replace(
            r#""dns_servers": ["10.0.0.2"]"#,
            r#""dns_servers": ["10.0.0.2", "10.0.0.3", "10.0.0.4"]"#,
        );
        let path = write_file(&dir, "swanportal.conf", &json);

        let settings = AppSettings::load(&[path]).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_defaults_when_no_files_exist(){
        let settings = AppSettings::load::<&str>(&[]).unwrap();
        assert_eq!(settings.server.radius_listen, "127.0.0.1:8080");
        assert!(settings.validate().is_err());
    }
}
