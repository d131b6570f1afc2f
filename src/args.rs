use clap::Parser;
use std::path::PathBuf;

use crate::config::{GatewayConfig, Protocol, TlsMode};

#[derive(Parser, Debug)]
#[command(name = "session-gateway")]
#[command(author = "Session Gateway Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Session-recording protocol gateway for VNC/RDP", long_about = None)]
pub struct Args {
    /// Configuration file path (falls back to GATEWAY_CONFIG, then
    /// /etc/session-gateway.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Protocol to speak on the client-facing listener
    #[arg(long, value_parser = ["vnc", "rdp"])]
    pub protocol: Option<String>,

    /// Address to accept client connections on
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Backend remote-desktop server address (host:port)
    #[arg(long)]
    pub target_addr: Option<String>,

    /// guacd address for RDP sessions (host:port)
    #[arg(long)]
    pub guacd_addr: Option<String>,

    /// Directory recordings are written into
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Terminate TLS with an auto-generated self-signed certificate
    #[arg(long, action)]
    pub tls: bool,

    /// Port for the recordings/encoder HTTP facade
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    /// Resolve the config file path: `--config`, then `GATEWAY_CONFIG`, then
    /// the default path.
    fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .or_else(|| std::env::var("GATEWAY_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("/etc/session-gateway.toml"))
    }

    /// Load configuration from file, overlay environment variables, then
    /// apply CLI flags (highest priority), and validate the result.
    pub fn load_config(&self) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
        let mut cfg = GatewayConfig::load(&self.config_path())?;
        cfg.overlay_env();
        self.apply_overrides(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_overrides(&self, cfg: &mut GatewayConfig) {
        if let Some(protocol) = &self.protocol {
            cfg.listener.protocol = match protocol.as_str() {
                "rdp" => Protocol::Rdp { guacd_addr: self.guacd_addr.clone() },
                _ => Protocol::Vnc,
            };
        }
        if let (Some(guacd_addr), Protocol::Rdp { guacd_addr: slot }) =
            (&self.guacd_addr, &mut cfg.listener.protocol)
        {
            *slot = Some(guacd_addr.clone());
        }
        if let Some(bind_addr) = &self.bind_addr {
            cfg.listener.bind_addr = bind_addr.clone();
        }
        if let Some(target_addr) = &self.target_addr {
            cfg.listener.target_addr = target_addr.clone();
        }
        if let Some(storage_dir) = &self.storage_dir {
            cfg.listener.storage_dir = storage_dir.clone();
        }
        if self.tls {
            cfg.listener.tls = TlsMode::EphemeralSelfSigned;
        }
        if let Some(http_port) = self.http_port {
            cfg.http.port = http_port;
        }
        if self.verbose {
            cfg.logging.level = "debug".to_string();
        }
    }
}
