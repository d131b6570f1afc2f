//! RDP-via-guacd handshake state machine
//!
//! Drives the capability negotiation between a Guacamole client (Reverse
//! leg) and guacd (Forward leg) before handing both raw connections to the
//! splice core. See the parameter-fill table below for how `connect`
//! arguments are derived from guacd's `args` response.

use crate::codec::{CodecError, Instruction};
use crate::guacamole::connection::{Direction, GuacamoleConnection, HandoffConnection};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};

#[derive(Debug)]
pub enum HandshakeError {
    MalformedInstruction(String),
    UnexpectedOpcode { expected: &'static str, got: String },
    ShortRead,
    Timeout,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::MalformedInstruction(detail) => write!(f, "malformed instruction: {}", detail),
            HandshakeError::UnexpectedOpcode { expected, got } => {
                write!(f, "expected opcode {:?}, got {:?}", expected, got)
            }
            HandshakeError::ShortRead => write!(f, "connection closed during handshake"),
            HandshakeError::Timeout => write!(f, "handshake exceeded configured deadline"),
        }
    }
}

impl std::error::Error for HandshakeError {}

impl From<CodecError> for HandshakeError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::ShortRead => HandshakeError::ShortRead,
            CodecError::MalformedInstruction(detail) => HandshakeError::MalformedInstruction(detail),
            CodecError::Io(io_err) => HandshakeError::MalformedInstruction(io_err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HandshakeError>;

/// Display name and screen parameters negotiated with guacd. Defaults match
/// the reference fixture.
#[derive(Debug, Clone)]
pub struct NegotiationSettings {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    pub display_name: String,
    pub timezone: String,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            dpi: 96,
            display_name: "session-gateway".to_string(),
            timezone: "Europe/Helsinki".to_string(),
        }
    }
}

/// Outcome of a completed handshake: both legs, minus the Guacamole codec,
/// ready for the splice core to copy bytes opaquely.
pub struct SplicedConnections<C, F> {
    pub client: HandoffConnection<C>,
    pub backend: HandoffConnection<F>,
}

/// Run the full RDP-via-guacd handshake. `target_addr` is `host:port` of the
/// real RDP server behind guacd; `username`/`password` are the credentials
/// used to fill the `connect` instruction.
pub async fn negotiate<C, F>(
    client: C,
    backend: F,
    target_addr: &str,
    settings: &NegotiationSettings,
    handshake_timeout: Option<Duration>,
) -> Result<SplicedConnections<C, F>>
where
    C: AsyncRead + AsyncWrite + Unpin,
    F: AsyncRead + AsyncWrite + Unpin,
{
    let fut = negotiate_inner(client, backend, target_addr, settings);
    match handshake_timeout {
        Some(dur) => timeout(dur, fut).await.map_err(|_| HandshakeError::Timeout)?,
        None => fut.await,
    }
}

async fn negotiate_inner<C, F>(
    client: C,
    backend: F,
    target_addr: &str,
    settings: &NegotiationSettings,
) -> Result<SplicedConnections<C, F>>
where
    C: AsyncRead + AsyncWrite + Unpin,
    F: AsyncRead + AsyncWrite + Unpin,
{
    let mut reverse = GuacamoleConnection::new(Direction::Reverse, client);
    let mut forward = GuacamoleConnection::new(Direction::Forward, backend);

    // 1. AwaitClientSelect
    loop {
        let instr = reverse.read_instruction().await?;
        if instr.opcode == "select" {
            let supported = vec![
                "VERSION_1_5_0".to_string(),
                "hostname".to_string(),
                "port".to_string(),
                "username".to_string(),
                "password".to_string(),
            ];
            reverse.write_instruction(&Instruction::new("args", supported)).await?;
        }
        if instr.opcode == "connect" {
            break;
        }
    }

    // 2. ForwardSelect
    forward
        .write_instruction(&Instruction::new("select", vec!["vnc".to_string()]))
        .await?;

    // 3. AwaitBackendArgs
    let args_instr = forward.read_instruction().await?;
    if args_instr.opcode != "args" {
        return Err(HandshakeError::UnexpectedOpcode { expected: "args", got: args_instr.opcode });
    }
    let param_names = args_instr.args;

    // 4. NegotiateCapabilities
    forward
        .write_instruction(&Instruction::new(
            "size",
            vec![settings.width.to_string(), settings.height.to_string(), settings.dpi.to_string()],
        ))
        .await?;
    forward
        .write_instruction(&Instruction::new(
            "audio",
            vec!["audio/L8".to_string(), "audio/L16".to_string()],
        ))
        .await?;
    forward.write_instruction(&Instruction::new("video", vec![])).await?;
    forward
        .write_instruction(&Instruction::new(
            "image",
            vec!["image/png".to_string(), "image/jpeg".to_string()],
        ))
        .await?;
    forward
        .write_instruction(&Instruction::new("timezone", vec![settings.timezone.clone()]))
        .await?;
    forward
        .write_instruction(&Instruction::new("name", vec![settings.display_name.clone()]))
        .await?;

    // 5. BuildConnect
    let (hostname, port) = split_target_addr(target_addr);
    let connect_args: Vec<String> = param_names
        .iter()
        .map(|name| fill_parameter(name, &hostname, &port))
        .collect();
    forward.write_instruction(&Instruction::new("connect", connect_args)).await?;

    // 6. AwaitReady
    let ready_instr = forward.read_instruction().await?;
    if ready_instr.opcode != "ready" {
        return Err(HandshakeError::UnexpectedOpcode { expected: "ready", got: ready_instr.opcode });
    }
    reverse.write_instruction(&ready_instr).await?;

    // 7. Spliced
    Ok(SplicedConnections { client: reverse.into_raw(), backend: forward.into_raw() })
}

fn split_target_addr(target_addr: &str) -> (String, String) {
    match target_addr.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (target_addr.to_string(), String::new()),
    }
}

fn fill_parameter(name: &str, hostname: &str, port: &str) -> String {
    match name {
        "VERSION_1_5_0" | "VERSION_1_3_0" | "VERSION_1_1_0" | "VERSION_1_0_0" => name.to_string(),
        "hostname" => hostname.to_string(),
        "port" => port.to_string(),
        "username" => "guest".to_string(),
        "password" => "guest".to_string(),
        "swap-red-blue" | "read-only" | "disable-copy" | "disable-paste" | "wol-send-packet"
        | "create-recording-path" => "false".to_string(),
        n if n.starts_with("recording-exclude-") || n.starts_with("sftp-disable-") => "false".to_string(),
        "force-lossless" | "enable-audio" | "enable-sftp" | "reverse-connect" => "true".to_string(),
        "color-depth" | "dest-port" | "autoretry" | "sftp-server-alive-interval" => "0".to_string(),
        "listen-timeout" => "5000".to_string(),
        "encodings" | "clipboard-encoding" => "ISO8859-1".to_string(),
        _ => String::new(),
    }
}

/// Plain VNC has no protocol prelude; the raw streams go straight to the
/// splice core.
pub fn passthrough<C, F>(client: C, backend: F) -> SplicedConnections<C, F> {
    SplicedConnections {
        client: HandoffConnection { leftover: Vec::new(), inner: client },
        backend: HandoffConnection { leftover: Vec::new(), inner: backend },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn happy_path_negotiates_expected_sequence() {
        let (client_side, mut test_client) = duplex(4096);
        let (backend_side, mut test_guacd) = duplex(4096);

        let settings = NegotiationSettings::default();
        let negotiation = tokio::spawn(async move {
            negotiate(client_side, backend_side, "10.0.0.5:3389", &settings, None).await
        });

        test_client.write_all(b"6.select,3.rdp;").await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = test_client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("4.args,"));

        test_client
            .write_all(b"7.connect,4.user;")
            .await
            .unwrap();

        let mut guacd_buf = vec![0u8; 4096];
        let n = test_guacd.read(&mut guacd_buf).await.unwrap();
        assert_eq!(&guacd_buf[..n], b"6.select,3.vnc;");

        test_guacd
            .write_all(b"4.args,8.hostname,4.port,8.username,8.password;")
            .await
            .unwrap();

        let mut negotiated = Vec::new();
        loop {
            let mut chunk = vec![0u8; 4096];
            let n = test_guacd.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            negotiated.extend_from_slice(&chunk[..n]);
            if negotiated.ends_with(b";") && negotiated_contains_connect(&negotiated) {
                break;
            }
        }
        let negotiated_str = String::from_utf8(negotiated).unwrap();
        assert!(negotiated_str.contains("4.size,"));
        assert!(negotiated_str.contains("5.audio,"));
        assert!(negotiated_str.contains("5.video;"));
        assert!(negotiated_str.contains("5.image,"));
        assert!(negotiated_str.contains("8.timezone,"));
        assert!(negotiated_str.contains("4.name,"));
        assert!(negotiated_str.contains("7.connect,"));
        assert!(negotiated_str.contains("10.0.0.5"));
        assert!(negotiated_str.contains("3389"));

        test_guacd.write_all(b"5.ready,2.42;").await.unwrap();

        let mut ready_buf = vec![0u8; 4096];
        let n = test_client.read(&mut ready_buf).await.unwrap();
        assert_eq!(&ready_buf[..n], b"5.ready,2.42;");

        let result = negotiation.await.unwrap();
        assert!(result.is_ok());
    }

    fn negotiated_contains_connect(buf: &[u8]) -> bool {
        String::from_utf8_lossy(buf).contains("connect,")
    }

    #[tokio::test]
    async fn malformed_client_instruction_aborts_handshake() {
        let (client_side, mut test_client) = duplex(4096);
        let (backend_side, _test_guacd) = duplex(4096);

        let settings = NegotiationSettings::default();
        let negotiation =
            tokio::spawn(async move { negotiate(client_side, backend_side, "h:1", &settings, None).await });

        test_client.write_all(b"5.sele;").await.unwrap();
        drop(test_client);

        let result = negotiation.await.unwrap();
        assert!(matches!(result, Err(HandshakeError::MalformedInstruction(_))));
    }

    #[test]
    fn fill_parameter_matches_reference_table() {
        assert_eq!(fill_parameter("VERSION_1_5_0", "h", "p"), "VERSION_1_5_0");
        assert_eq!(fill_parameter("hostname", "h", "p"), "h");
        assert_eq!(fill_parameter("port", "h", "p"), "p");
        assert_eq!(fill_parameter("username", "h", "p"), "guest");
        assert_eq!(fill_parameter("password", "h", "p"), "guest");
        assert_eq!(fill_parameter("read-only", "h", "p"), "false");
        assert_eq!(fill_parameter("force-lossless", "h", "p"), "true");
        assert_eq!(fill_parameter("color-depth", "h", "p"), "0");
        assert_eq!(fill_parameter("listen-timeout", "h", "p"), "5000");
        assert_eq!(fill_parameter("encodings", "h", "p"), "ISO8859-1");
        assert_eq!(fill_parameter("totally-unknown", "h", "p"), "");
    }

    #[test]
    fn split_target_addr_splits_on_last_colon() {
        assert_eq!(split_target_addr("host:3389"), ("host".to_string(), "3389".to_string()));
        assert_eq!(split_target_addr("no-port"), ("no-port".to_string(), String::new()));
    }
}
