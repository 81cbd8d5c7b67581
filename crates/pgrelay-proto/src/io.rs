//! Async frame IO on top of the message types.
//!
//! The read functions distinguish a cleanly closed stream (EOF at a
//! frame boundary, returned as `Ok(None)`) from a stream that dies in
//! the middle of a frame, which is an error.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::client::{ClientMessage, StartupMessage};
use crate::error::ProtoError;
use crate::message::{Message, MAX_MESSAGE_LEN};
use crate::server::ServerMessage;

/// Read the next frontend message. The first message on a connection
/// may be an untagged startup frame, recognized by its leading zero
/// byte (startup lengths never reach 2^24).
pub async fn read_client_message<R>(reader: &mut R) -> Result<Option<ClientMessage>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let Some(first) = read_first_byte(reader).await? else {
        return Ok(None);
    };
    if first == 0 {
        let mut rest = [0u8; 3];
        reader
            .read_exact(&mut rest)
            .await
            .map_err(|e| map_eof(e, "startup length"))?;
        let length = i32::from_be_bytes([first, rest[0], rest[1], rest[2]]);
        let body = read_body(reader, length, 8).await?;
        Ok(Some(ClientMessage::Startup(StartupMessage::decode(&body)?)))
    } else {
        let length = read_length(reader).await?;
        let body = read_body(reader, length, 4).await?;
        Ok(Some(ClientMessage::decode_tagged(first, body)?))
    }
}

/// Read the next backend message.
pub async fn read_server_message<R>(reader: &mut R) -> Result<Option<ServerMessage>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let Some(tag) = read_first_byte(reader).await? else {
        return Ok(None);
    };
    let length = read_length(reader).await?;
    let body = read_body(reader, length, 4).await?;
    Ok(Some(ServerMessage::decode_tagged(tag, body)?))
}

/// Encode one message and write it out, flushing the stream.
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    M: Message + ?Sized,
{
    let mut buf = BytesMut::with_capacity(64);
    message.encode(&mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode a batch into a single buffer and deliver it with one write.
/// An empty batch writes nothing.
pub async fn write_batch<W, M>(writer: &mut W, batch: &[M]) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    if batch.is_empty() {
        return Ok(());
    }
    let mut buf = BytesMut::with_capacity(batch.len() * 64);
    for message in batch {
        message.encode(&mut buf);
    }
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_first_byte<R>(reader: &mut R) -> Result<Option<u8>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    match reader.read(&mut byte).await {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(byte[0])),
        Err(e) => Err(ProtoError::Io(e)),
    }
}

async fn read_length<R>(reader: &mut R) -> Result<i32, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; 4];
    reader
        .read_exact(&mut raw)
        .await
        .map_err(|e| map_eof(e, "message length"))?;
    Ok(i32::from_be_bytes(raw))
}

async fn read_body<R>(reader: &mut R, length: i32, min: i32) -> Result<Bytes, ProtoError>
where
    R: AsyncRead + Unpin,
{
    if length < min || length as usize > MAX_MESSAGE_LEN {
        return Err(ProtoError::InvalidLength { length });
    }
    let mut body = vec![0u8; (length - 4) as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| map_eof(e, "message body"))?;
    Ok(Bytes::from(body))
}

fn map_eof(err: std::io::Error, context: &'static str) -> ProtoError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtoError::UnexpectedEof { context }
    } else {
        ProtoError::Io(err)
    }
}
