//! Configuration management for session-gateway

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which remote-desktop protocol a listener speaks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Protocol {
    Vnc,
    Rdp {
        /// `host:port` of the guacd instance that adapts this connection.
        guacd_addr: Option<String>,
    },
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Vnc
    }
}

/// Whether the listener terminates TLS with an ephemeral, self-signed
/// certificate generated at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    #[default]
    Off,
    EphemeralSelfSigned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerSettings {
    #[serde(default)]
    pub protocol: Protocol,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    pub target_addr: String,

    #[serde(default)]
    pub tls: TlsMode,

    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Deadline for the Guacamole handshake (RDP only). `None` disables it.
    #[serde(default)]
    pub handshake_timeout_secs: Option<u64>,

    /// When set, a recorder write failure tears down the session instead of
    /// being logged and ignored. Off by default, matching the reference
    /// implementation's tolerance for a struggling disk.
    #[serde(default)]
    pub strict_recording: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub logfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_http_host")]
    pub host: String,

    #[serde(default = "default_http_port")]
    pub port: u16,

    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuacamoleSettings {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_dpi")]
    pub dpi: u32,

    #[serde(default = "default_display_name")]
    pub display_name: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5900".to_string()
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("/var/lib/session-gateway/recordings")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_http_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    9900
}
fn default_downloads_dir() -> PathBuf {
    PathBuf::from("/var/lib/session-gateway/downloads")
}
fn default_width() -> u32 {
    1024
}
fn default_height() -> u32 {
    768
}
fn default_dpi() -> u32 {
    96
}
fn default_display_name() -> String {
    "session-gateway".to_string()
}
fn default_timezone() -> String {
    "Europe/Helsinki".to_string()
}

/// Structural `host:port` check. Deliberately does not require the host to
/// be a literal IP: `target_addr`/`guacd_addr` are dialed with
/// `TcpStream::connect`, which resolves hostnames itself.
fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !port.is_empty() && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub listener: ListenerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub guacamole: GuacamoleSettings,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            bind_addr: default_bind_addr(),
            target_addr: String::new(),
            tls: TlsMode::default(),
            storage_dir: default_storage_dir(),
            handshake_timeout_secs: None,
            strict_recording: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: default_log_level(), logfile: None }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            downloads_dir: default_downloads_dir(),
        }
    }
}

impl Default for GuacamoleSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            dpi: default_dpi(),
            display_name: default_display_name(),
            timezone: default_timezone(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerSettings::default(),
            logging: LoggingSettings::default(),
            http: HttpSettings::default(),
            guacamole: GuacamoleSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from an optional TOML file, falling back to
    /// defaults when the path does not exist.
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(GatewayConfig::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overlay recognized environment variables onto this configuration.
    /// CLI flags are applied after this and take final priority.
    pub fn overlay_env(&mut self) {
        if let Ok(v) = std::env::var("PROTOCOL") {
            match v.to_ascii_uppercase().as_str() {
                "VNC" => self.listener.protocol = Protocol::Vnc,
                "RDP" => {
                    let guacd_addr = std::env::var("GUACD_ADDR").ok();
                    self.listener.protocol = Protocol::Rdp { guacd_addr };
                }
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("TARGET_ADDR") {
            self.listener.target_addr = v;
        }
        if let Ok(v) = std::env::var("GUACD_ADDR") {
            if let Protocol::Rdp { guacd_addr } = &mut self.listener.protocol {
                *guacd_addr = Some(v);
            }
        }
        if let Ok(v) = std::env::var("STORAGE_LOCATION") {
            self.listener.storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            self.listener.bind_addr = v;
        }
        if let Ok(v) = std::env::var("TLS") {
            self.listener.tls = if v == "1" { TlsMode::EphemeralSelfSigned } else { TlsMode::Off };
        }
        if let Ok(v) = std::env::var("HTTP_PORT") {
            if let Ok(port) = v.parse() {
                self.http.port = port;
            }
        }
    }

    /// Reject configuration that cannot produce a runnable gateway.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.listener.target_addr.is_empty() {
            return Err("listener.target_addr must not be empty".into());
        }
        if !is_host_port(&self.listener.target_addr) {
            return Err("listener.target_addr must be in host:port form".into());
        }
        if let Protocol::Rdp { guacd_addr } = &self.listener.protocol {
            match guacd_addr {
                None => return Err("protocol RDP requires a guacd_addr".into()),
                Some(addr) if addr.is_empty() => {
                    return Err("protocol RDP requires a non-empty guacd_addr".into())
                }
                _ => {}
            }
        }
        if self.listener.bind_addr.ends_with(":0") {
            return Err("listener.bind_addr must not use port 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_target_addr() {
        let cfg = GatewayConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_rdp_without_guacd_addr() {
        let mut cfg = GatewayConfig::default();
        cfg.listener.target_addr = "10.0.0.1:5901".to_string();
        cfg.listener.protocol = Protocol::Rdp { guacd_addr: None };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_complete_vnc_config() {
        let mut cfg = GatewayConfig::default();
        cfg.listener.target_addr = "10.0.0.1:5901".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_accepts_complete_rdp_config() {
        let mut cfg = GatewayConfig::default();
        cfg.listener.target_addr = "10.0.0.1:3389".to_string();
        cfg.listener.protocol = Protocol::Rdp { guacd_addr: Some("guacd:4822".to_string()) };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_accepts_hostname_target_addr() {
        let mut cfg = GatewayConfig::default();
        cfg.listener.target_addr = "vnc-server:5901".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_target_addr_without_port() {
        let mut cfg = GatewayConfig::default();
        cfg.listener.target_addr = "vnc-server".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_bind_port() {
        let mut cfg = GatewayConfig::default();
        cfg.listener.target_addr = "10.0.0.1:5901".to_string();
        cfg.listener.bind_addr = "0.0.0.0:0".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = GatewayConfig::load(&PathBuf::from("/nonexistent/path/session-gateway.toml")).unwrap();
        assert_eq!(cfg.http.port, default_http_port());
    }
}
