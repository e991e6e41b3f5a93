//! Content-Length message framing for the sysmodule protocol.
//!
//! The sysmodule protocol is message oriented but runs over stream sockets,
//! so every message is wrapped in an HTTP-style header:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! The header parsing is case-insensitive and handles both CRLF and LF line endings.
//! Reads and writes block; timeouts come from the socket itself.

use std::io::{self, BufRead, Write};

use anyhow::{anyhow, Context, Result};

/// Maximum message size (1 MiB). A full 25000 entry queue stays well below this.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Read a Content-Length framed message from the stream.
///
/// # Errors
///
/// Returns an error if:
/// - The stream is closed (EOF)
/// - No Content-Length header is found
/// - Content-Length exceeds MAX_MESSAGE_SIZE
/// - The body cannot be read completely (including socket timeouts)
/// - The body is not valid UTF-8
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader
            .read_line(&mut line)
            .context("Failed to read header line")?;

        if bytes_read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed by sysmodule",
            )
            .into());
        }

        let trimmed = line.trim();

        // Empty line signals end of headers
        if trimmed.is_empty() {
            break;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid Content-Length value: {}", value))?,
                );
            }
        }
    }

    let size = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;

    if size > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message size {} exceeds maximum {} bytes",
            size,
            MAX_MESSAGE_SIZE
        ));
    }

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .context("Failed to read message body")?;

    String::from_utf8(body).context("Message body is not valid UTF-8")
}

/// Write a Content-Length framed message to the stream.
///
/// Header and body are written in one buffer so a frame is never split
/// across two writes.
pub fn write_message<W: Write>(writer: &mut W, body: &str) -> Result<()> {
    let body_bytes = body.as_bytes();
    let mut frame = format!("Content-Length: {}\r\n\r\n", body_bytes.len()).into_bytes();
    frame.extend_from_slice(body_bytes);

    writer
        .write_all(&frame)
        .context("Failed to write message")?;

    writer.flush().context("Failed to flush message")?;

    Ok(())
}
