//! Binary wire codec for the remote counting service.
//!
//! Length-prefixed frames over a pooled stream. A session is established
//! once per connection with a login frame and reused for every publish on
//! that connection:
//!
//! ```text
//! login:   0x01 | u16 user len | user | u16 pass len | pass
//! ack:     status u8 (0 = ok) | u16 session len | session
//! publish: 0x02 | u16 session len | session | u32 payload len | payload
//! ack:     status u8 (0 = ok)
//! ```

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Login opcode.
pub const OP_LOGIN: u8 = 0x01;
/// Publish opcode.
pub const OP_PUBLISH: u8 = 0x02;

/// Status byte of a successful acknowledgement.
pub const STATUS_OK: u8 = 0x00;

/// Upper bound for any length prefix; a peer announcing more is broken.
const MAX_FRAME: usize = 1 << 20;

async fn write_short_bytes<S>(stream: &mut S, bytes: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u16::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "field too long"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(bytes).await
}

async fn read_short_string<S>(stream: &mut S) -> io::Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut len = [0u8; 2];
    stream.read_exact(&mut len).await?;
    let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len))];
    stream.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8"))
}

/// Write a login frame.
///
/// # Errors
///
/// Returns error on IO failure or an over-long credential.
pub async fn write_login<S>(stream: &mut S, username: &str, password: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&[OP_LOGIN]).await?;
    write_short_bytes(stream, username.as_bytes()).await?;
    write_short_bytes(stream, password.as_bytes()).await?;
    stream.flush().await
}

/// Read the login acknowledgement; returns the session id.
///
/// # Errors
///
/// Returns error on IO failure or a non-zero status byte.
pub async fn read_login_ack<S>(stream: &mut S) -> io::Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut status = [0u8; 1];
    stream.read_exact(&mut status).await?;
    if status[0] != STATUS_OK {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "counting service rejected the session credentials",
        ));
    }
    read_short_string(stream).await
}

/// Write one event frame under an established session.
///
/// # Errors
///
/// Returns error on IO failure or an over-long payload.
pub async fn write_event<S>(stream: &mut S, session: &str, payload: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "payload too large"));
    }
    stream.write_all(&[OP_PUBLISH]).await?;
    write_short_bytes(stream, session.as_bytes()).await?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Read the publish acknowledgement.
///
/// # Errors
///
/// Returns error on IO failure or a non-zero status byte.
pub async fn read_event_ack<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut status = [0u8; 1];
    stream.read_exact(&mut status).await?;
    if status[0] != STATUS_OK {
        return Err(io::Error::other("counting service rejected the event"));
    }
    Ok(())
}

/// One decoded request frame, as seen by the receiving side.
#[derive(Debug)]
pub enum Frame {
    /// Session login.
    Login {
        /// Session username.
        username: String,
        /// Session password.
        password: String,
    },
    /// One published event.
    Publish {
        /// Session id the event was published under.
        session: String,
        /// Serialized event payload.
        payload: Vec<u8>,
    },
}

/// Read one request frame (receiver side).
///
/// # Errors
///
/// Returns error on IO failure, an unknown opcode, or an over-long
/// payload announcement.
pub async fn read_frame<S>(stream: &mut S) -> io::Result<Frame>
where
    S: AsyncRead + Unpin,
{
    let mut op = [0u8; 1];
    stream.read_exact(&mut op).await?;
    match op[0] {
        OP_LOGIN => {
            let username = read_short_string(stream).await?;
            let password = read_short_string(stream).await?;
            Ok(Frame::Login { username, password })
        }
        OP_PUBLISH => {
            let session = read_short_string(stream).await?;
            let mut len = [0u8; 4];
            stream.read_exact(&mut len).await?;
            let len = u32::from_be_bytes(len) as usize;
            if len > MAX_FRAME {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "payload too large"));
            }
            let mut payload = vec![0u8; len];
            stream.read_exact(&mut payload).await?;
            Ok(Frame::Publish { session, payload })
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown opcode {other:#x}"),
        )),
    }
}

/// Write a successful login acknowledgement (receiver side).
///
/// # Errors
///
/// Returns error on IO failure.
pub async fn write_login_ack<S>(stream: &mut S, session: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&[STATUS_OK]).await?;
    write_short_bytes(stream, session.as_bytes()).await?;
    stream.flush().await
}

/// Write a successful publish acknowledgement (receiver side).
///
/// # Errors
///
/// Returns error on IO failure.
pub async fn write_event_ack<S>(stream: &mut S) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&[STATUS_OK]).await?;
    stream.flush().await
}
