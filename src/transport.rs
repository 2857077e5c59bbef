//! The implementation of SSH transport protocol.

// Refs:
// * https://tools.ietf.org/html/rfc4253
// * https://tools.ietf.org/html/rfc5656

pub(crate) mod codec;
pub(crate) mod kex;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

const MAX_LINE_LEN: usize = 255;
const MAX_BANNER_LINES: usize = 1024;

/// The outcome of the identification exchange.
#[derive(Debug)]
pub(crate) struct Identification {
    pub(crate) server_id: String,
    /// Lines the server sent before its identification string.
    pub(crate) banner: Vec<String>,
    /// Bytes received past the identification line; the start of the first packet.
    pub(crate) remaining: BytesMut,
}

/// Exchange SSH identification strings (RFC 4253 section 4.2).
pub(crate) async fn exchange_identification<T>(
    stream: &mut T,
    client_id: &str,
) -> Result<Identification, crate::Error>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    tracing::debug!("Exchange SSH identifiers");
    let mut line = Vec::with_capacity(client_id.len() + 2);
    line.extend_from_slice(client_id.as_bytes());
    line.extend_from_slice(b"\r\n");
    stream.write_all(&line).await.map_err(crate::Error::io)?;
    stream.flush().await.map_err(crate::Error::io)?;

    let mut buf = BytesMut::with_capacity(1024);
    let mut banner = vec![];
    loop {
        let line = match buf.iter().position(|&c| c == b'\n') {
            Some(pos) => {
                let line = buf.split_to(pos + 1);
                if line.len() > MAX_LINE_LEN {
                    return Err(crate::Error::protocol("identification line is too long"));
                }
                line
            }
            None if buf.len() > MAX_LINE_LEN => {
                return Err(crate::Error::protocol("identification line is too long"));
            }
            None => {
                let amt = stream.read_buf(&mut buf).await.map_err(crate::Error::io)?;
                if amt == 0 {
                    return Err(crate::Error::io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed during identification exchange",
                    )));
                }
                continue;
            }
        };

        let n = line
            .iter()
            .take_while(|&&c| c != b'\r' && c != b'\n')
            .count();
        let text = String::from_utf8_lossy(&line[..n]).into_owned();

        if text.starts_with("SSH-") {
            if !text.starts_with("SSH-2.0-") && !text.starts_with("SSH-1.99-") {
                return Err(crate::Error::protocol(format!(
                    "unsupported protocol version: {:?}",
                    text
                )));
            }
            tracing::debug!("--> client_id={:?}, server_id={:?}", client_id, text);
            return Ok(Identification {
                server_id: text,
                banner,
                remaining: buf,
            });
        }

        if banner.len() >= MAX_BANNER_LINES {
            return Err(crate::Error::protocol("too many lines before identification"));
        }
        tracing::trace!("banner line: {:?}", text);
        banner.push(text);
    }
}
