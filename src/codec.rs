//! Guacamole instruction codec
//!
//! Frames and unframes the length-prefixed, comma-separated, semicolon-terminated
//! instruction format guacd speaks: `<len>.<payload>,<len>.<payload>,...;`. The
//! first token is the opcode, the remainder are arguments.

use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};

/// A decoded (or to-be-encoded) Guacamole instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: String,
    pub args: Vec<String>,
}

impl Instruction {
    pub fn new(opcode: impl Into<String>, args: Vec<String>) -> Self {
        Self { opcode: opcode.into(), args }
    }
}

#[derive(Debug)]
pub enum CodecError {
    /// The stream ended before a terminating `;` was found.
    ShortRead,
    /// A token's declared length did not match its actual byte length, or a
    /// token could not be split into `<len>.<payload>`.
    MalformedInstruction(String),
    Io(std::io::Error),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::ShortRead => write!(f, "connection closed before instruction terminator"),
            CodecError::MalformedInstruction(detail) => {
                write!(f, "malformed instruction: {}", detail)
            }
            CodecError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        CodecError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Encode an instruction to its wire form.
///
/// Argument strings are transmitted verbatim — never trimmed, since trimming
/// would corrupt binary or whitespace-significant payloads. A zero-argument
/// instruction is encoded with no trailing `,0.` token (`5.video;`, not
/// `5.video,0.;`); `decode` accepts either form.
pub fn encode(opcode: &str, args: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(opcode.len() + 8 + args.iter().map(|a| a.len() + 8).sum::<usize>());
    write_token(&mut out, opcode);
    for arg in args {
        out.push(b',');
        write_token(&mut out, arg);
    }
    out.push(b';');
    out
}

fn write_token(out: &mut Vec<u8>, payload: &str) {
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b'.');
    out.extend_from_slice(payload.as_bytes());
}

/// Read one instruction from a buffered async reader.
///
/// Reads up to and including the next `;`, splits on `,`, then splits each
/// token on its *first* `.` into `(length, payload)`. Validates that the
/// declared length matches the payload's byte length.
pub async fn decode<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Instruction> {
    let mut raw = Vec::new();
    let n = reader.read_until(b';', &mut raw).await?;
    if n == 0 {
        return Err(CodecError::ShortRead);
    }
    if raw.last() != Some(&b';') {
        return Err(CodecError::ShortRead);
    }
    raw.pop();

    let mut tokens = Vec::new();
    for chunk in raw.split(|&b| b == b',') {
        tokens.push(parse_token(chunk)?);
    }

    let mut iter = tokens.into_iter();
    let opcode = iter
        .next()
        .ok_or_else(|| CodecError::MalformedInstruction("instruction has no opcode".into()))?;
    let args: Vec<String> = iter.collect();

    Ok(Instruction { opcode, args })
}

fn parse_token(chunk: &[u8]) -> Result<String> {
    let dot = chunk
        .iter()
        .position(|&b| b == b'.')
        .ok_or_else(|| CodecError::MalformedInstruction("token missing length prefix".into()))?;
    let (len_bytes, rest) = chunk.split_at(dot);
    let payload = &rest[1..];

    let len_str = std::str::from_utf8(len_bytes)
        .map_err(|_| CodecError::MalformedInstruction("length prefix is not valid UTF-8".into()))?;
    let declared_len: usize = len_str
        .parse()
        .map_err(|_| CodecError::MalformedInstruction(format!("invalid length prefix {:?}", len_str)))?;

    if payload.len() != declared_len {
        return Err(CodecError::MalformedInstruction(format!(
            "declared length {} does not match payload length {}",
            declared_len,
            payload.len()
        )));
    }

    String::from_utf8(payload.to_vec())
        .map_err(|_| CodecError::MalformedInstruction("payload is not valid UTF-8".into()))
}

/// Write an instruction to an async writer.
pub async fn write_instruction<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    instruction: &Instruction,
) -> Result<()> {
    let bytes = encode(&instruction.opcode, &instruction.args);
    writer.write_all(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[test]
    fn encode_with_args_matches_fixture() {
        let bytes = encode("size", &["1024".into(), "768".into(), "96".into()]);
        assert_eq!(bytes, b"4.size,4.1024,3.768,2.96;");
    }

    #[test]
    fn encode_zero_args_has_no_argument_token() {
        let bytes = encode("video", &[]);
        assert_eq!(bytes, b"5.video;");
    }

    #[test]
    fn encode_does_not_trim_whitespace() {
        let bytes = encode("name", &[" padded ".into()]);
        assert_eq!(bytes, b"4.name,8. padded ;");
    }

    #[tokio::test]
    async fn decode_select_vnc() {
        let mut reader = BufReader::new(Cursor::new(b"6.select,3.vnc;".to_vec()));
        let instr = decode(&mut reader).await.unwrap();
        assert_eq!(instr.opcode, "select");
        assert_eq!(instr.args, vec!["vnc".to_string()]);
    }

    #[tokio::test]
    async fn decode_splits_on_first_dot_only() {
        let mut reader = BufReader::new(Cursor::new(b"4.name,3.a.b;".to_vec()));
        let instr = decode(&mut reader).await.unwrap();
        assert_eq!(instr.opcode, "name");
        assert_eq!(instr.args, vec!["a.b".to_string()]);
    }

    #[tokio::test]
    async fn decode_tolerates_empty_argument_form() {
        let mut reader = BufReader::new(Cursor::new(b"5.video,0.;".to_vec()));
        let instr = decode(&mut reader).await.unwrap();
        assert_eq!(instr.opcode, "video");
        assert_eq!(instr.args, vec!["".to_string()]);
    }

    #[tokio::test]
    async fn decode_tolerates_no_argument_form() {
        let mut reader = BufReader::new(Cursor::new(b"5.video;".to_vec()));
        let instr = decode(&mut reader).await.unwrap();
        assert_eq!(instr.opcode, "video");
        assert!(instr.args.is_empty());
    }

    #[tokio::test]
    async fn decode_rejects_length_mismatch() {
        let mut reader = BufReader::new(Cursor::new(b"9.select,3.vnc;".to_vec()));
        let err = decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::MalformedInstruction(_)));
    }

    #[tokio::test]
    async fn decode_rejects_missing_terminator() {
        let mut reader = BufReader::new(Cursor::new(b"5.sele".to_vec()));
        let err = decode(&mut reader).await.unwrap_err();
        assert!(matches!(err, CodecError::ShortRead));
    }

    #[tokio::test]
    async fn round_trip_preserves_byte_clean_args() {
        let original = Instruction::new("connect", vec!["VERSION_1_5_0".into(), "host".into(), "5901".into()]);
        let bytes = encode(&original.opcode, &original.args);
        let mut reader = BufReader::new(Cursor::new(bytes));
        let decoded = decode(&mut reader).await.unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn round_trip_preserves_whitespace_in_args() {
        let original = Instruction::new("name", vec!["  leading and trailing  ".into()]);
        let bytes = encode(&original.opcode, &original.args);
        let mut reader = BufReader::new(Cursor::new(bytes));
        let decoded = decode(&mut reader).await.unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn decode_multibyte_payload_counts_bytes_not_chars() {
        // "héllo" is 6 UTF-8 bytes (é is 2 bytes) but 5 chars.
        let bytes = encode("x", &["héllo".into()]);
        assert_eq!(bytes, "1.x,6.héllo;".as_bytes());
        let mut reader = BufReader::new(Cursor::new(bytes));
        let decoded = decode(&mut reader).await.unwrap();
        assert_eq!(decoded.args, vec!["héllo".to_string()]);
    }
}
