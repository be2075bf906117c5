//! Reading and writing frames on async byte streams.

use super::message::{decode_header, Message};
use super::{CodecError, ReadPhase, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one complete message.
///
/// Reads exactly 24 header bytes, then exactly as many payload bytes as the
/// header announces. Neither the network magic nor the checksum are checked.
///
/// # Arguments
///
/// * `reader` - The stream to read from. Nothing past the frame is consumed.
///
/// # Errors
///
/// * [`CodecError::TruncatedRead`] if the stream closes or fails before all bytes arrive.
/// * [`CodecError::PayloadTooLarge`] if the announced payload exceeds [`MAX_PAYLOAD_SIZE`].
pub async fn read_message<R>(reader: &mut R) -> Result<Message, CodecError>
where
    R: AsyncRead + Unpin,
{
    match try_read_message(reader).await? {
        Some(message) => Ok(message),
        None => Err(CodecError::TruncatedRead {
            phase: ReadPhase::Header,
            source: io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before message header",
            ),
        }),
    }
}

/// Read one complete message, or `None` if the stream closed cleanly between messages.
///
/// A clean close is an end of stream before the first header byte. An end of
/// stream anywhere after that is still a [`CodecError::TruncatedRead`].
pub async fn try_read_message<R>(reader: &mut R) -> Result<Option<Message>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let header = match read_header(reader).await? {
        Some(header) => header,
        None => return Ok(None),
    };
    let header = decode_header(&header)?;

    let payload_len = header.length as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut payload = vec![0u8; payload_len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|source| CodecError::TruncatedRead {
            phase: ReadPhase::Payload,
            source,
        })?;

    Ok(Some(Message::from_parts(header, payload)))
}

/// Fills a header buffer, returning `None` on end of stream before any byte.
async fn read_header<R>(reader: &mut R) -> Result<Option<[u8; HEADER_SIZE]>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    let mut bytes_read = 0;

    while bytes_read < HEADER_SIZE {
        let n = match reader.read(&mut header[bytes_read..]).await {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(CodecError::TruncatedRead {
                    phase: ReadPhase::Header,
                    source,
                })
            }
        };

        if n == 0 {
            if bytes_read == 0 {
                return Ok(None);
            }
            return Err(CodecError::TruncatedRead {
                phase: ReadPhase::Header,
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed while reading header",
                ),
            });
        }
        bytes_read += n;
    }

    Ok(Some(header))
}

/// Write one message and flush the writer.
///
/// # Arguments
///
/// * `writer` - The stream to write to.
/// * `message` - Written exactly as [`Message::to_bytes`] returns it.
///
/// # Errors
///
/// Any I/O error from the write or the flush.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), io::Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.to_bytes()).await?;
    writer.flush().await?;

    Ok(())
}
