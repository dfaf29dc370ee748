//! Wire framing: every message is a 10-byte zero-padded ASCII decimal
//! length prefix followed by a UTF-8 JSON payload of exactly that many
//! bytes, identical in both directions.
//!
//! A command exchange is two consecutive frames — a string naming the
//! command, optionally followed by a params frame — and a response is a
//! single frame (an object, or the plain `"ok"` acknowledgement).

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CoreError, Result};

/// Width of the ASCII decimal length prefix.
pub const LENGTH_PREFIX_LEN: usize = 10;

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// The plain acknowledgement payload.
pub const ACK: &str = "ok";

/// One command with its optional parameter payload; wraps requests and
/// responses symmetrically.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub command: String,
    pub params: Option<Value>,
}

impl Envelope {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: None,
        }
    }

    pub fn with_params(command: impl Into<String>, params: Value) -> Self {
        Self {
            command: command.into(),
            params: Some(params),
        }
    }
}

/// Encodes one frame: prefix plus JSON payload bytes.
pub fn encode_frame(payload: &Value) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(payload)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CoreError::Protocol(format!(
            "frame payload of {} bytes exceeds limit",
            body.len()
        )));
    }
    let mut frame = format!("{:010}", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decodes one frame from a buffer, returning the payload and the number of
/// bytes consumed. Truncated input is malformed, never a partial success.
pub fn decode_frame(data: &[u8]) -> Result<(Value, usize)> {
    if data.len() < LENGTH_PREFIX_LEN {
        return Err(CoreError::Malformed("truncated frame prefix".to_string()));
    }
    let len = parse_prefix(&data[..LENGTH_PREFIX_LEN])?;
    let end = LENGTH_PREFIX_LEN + len;
    if data.len() < end {
        return Err(CoreError::Malformed("truncated frame payload".to_string()));
    }
    let payload = serde_json::from_slice(&data[LENGTH_PREFIX_LEN..end])?;
    Ok((payload, end))
}

fn parse_prefix(prefix: &[u8]) -> Result<usize> {
    if !prefix.iter().all(u8::is_ascii_digit) {
        return Err(CoreError::Malformed(
            "frame length prefix is not decimal".to_string(),
        ));
    }
    // 10 ASCII digits always fit a usize on 64-bit targets
    let len = std::str::from_utf8(prefix)
        .expect("digits are ascii")
        .parse::<usize>()
        .map_err(|e| CoreError::Malformed(format!("bad frame length: {e}")))?;
    if len > MAX_FRAME_LEN {
        return Err(CoreError::Protocol(format!(
            "frame length {len} exceeds limit"
        )));
    }
    Ok(len)
}

/// Writes one frame to an async stream.
pub async fn write_frame<W>(writer: &mut W, payload: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame from an async stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Value>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    reader.read_exact(&mut prefix).await?;
    let len = parse_prefix(&prefix)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_shape() {
        let frame = encode_frame(&json!("version")).unwrap();
        // "version" serializes to 9 bytes including quotes
        assert_eq!(&frame[..LENGTH_PREFIX_LEN], b"0000000009");
        assert_eq!(&frame[LENGTH_PREFIX_LEN..], b"\"version\"");
    }

    #[test]
    fn test_frame_round_trip() {
        let payload = json!({"command": "statusjson", "uptime": 12});
        let frame = encode_frame(&payload).unwrap();
        let (decoded, consumed) = decode_frame(&frame).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut buf = encode_frame(&json!("mempool")).unwrap();
        buf.extend(encode_frame(&json!([["tuple"]])).unwrap());

        let (first, consumed) = decode_frame(&buf).unwrap();
        assert_eq!(first, json!("mempool"));
        let (second, _) = decode_frame(&buf[consumed..]).unwrap();
        assert_eq!(second, json!([["tuple"]]));
    }

    #[test]
    fn test_truncated_frames_are_malformed() {
        let frame = encode_frame(&json!("hello")).unwrap();
        assert!(decode_frame(&frame[..4]).is_err());
        assert!(decode_frame(&frame[..frame.len() - 1]).is_err());
    }

    #[test]
    fn test_non_decimal_prefix_rejected() {
        let mut frame = encode_frame(&json!("hello")).unwrap();
        frame[0] = b'x';
        assert!(decode_frame(&frame).is_err());
    }

    #[tokio::test]
    async fn test_async_round_trip() {
        let payload = json!({"blocks": 42});
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).await.unwrap();
        let mut reader = std::io::Cursor::new(buf);
        let decoded = read_frame(&mut reader).await.unwrap();
        assert_eq!(decoded, payload);
    }
}
