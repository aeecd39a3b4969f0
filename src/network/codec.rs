//! Length-delimited framing.
//!
//! A frame is the 4-byte [`FRAME_MAGIC`], a big-endian `u32` payload
//! length, then the bincode-encoded [`Message`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Message, NetworkError};

/// Protocol magic
pub const FRAME_MAGIC: [u8; 4] = *b"STKC";

/// Largest accepted payload
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 8;

/// Encode a message into one frame
///
/// # Errors
/// Returns error if the message cannot be encoded or is too large
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, NetworkError> {
    let payload =
        bincode::serialize(message).map_err(|e| NetworkError::Serialization(e.to_string()))?;
    let length = u32::try_from(payload.len())
        .ok()
        .filter(|_| payload.len() <= MAX_FRAME_LEN)
        .ok_or(NetworkError::FrameTooLarge(payload.len()))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a frame header, returning the payload length
///
/// # Errors
/// Returns error on bad magic or an oversized length
pub fn decode_frame(header: &[u8; HEADER_LEN]) -> Result<usize, NetworkError> {
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&header[..4]);
    if magic != FRAME_MAGIC {
        return Err(NetworkError::BadMagic(magic));
    }
    let mut length = [0u8; 4];
    length.copy_from_slice(&header[4..]);
    let length = u32::from_be_bytes(length) as usize;
    if length > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(length));
    }
    Ok(length)
}

/// Write one message
///
/// # Errors
/// Returns error on encoding or socket failure
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message; `None` when the stream ends between frames
///
/// # Errors
/// Returns error on a malformed frame, a stream ending mid-frame or a
/// socket failure
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let read = reader.read(&mut header[filled..]).await?;
        if read == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(NetworkError::Truncated)
            };
        }
        filled += read;
    }
    let length = decode_frame(&header)?;
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetworkError::Truncated
        } else {
            NetworkError::Io(e)
        }
    })?;
    bincode::deserialize(&payload)
        .map(Some)
        .map_err(|e| NetworkError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn sample() -> Message {
        Message::SyncResponse {
            block_number: 42,
            c_sum: 7_000,
        }
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame(&sample()).unwrap();
        assert_eq!(&frame[..4], &FRAME_MAGIC);
        let length = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
        assert_eq!(length, frame.len() - HEADER_LEN);
    }

    #[test]
    fn test_read_frame_split_across_reads() {
        let frame = encode_frame(&sample()).unwrap();
        let mut stream = Builder::new()
            .read(&frame[..3])
            .read(&frame[3..10])
            .read(&frame[10..])
            .build();
        let message = tokio_test::block_on(read_frame(&mut stream)).unwrap();
        assert_eq!(message, Some(sample()));
        let end = tokio_test::block_on(read_frame(&mut stream)).unwrap();
        assert_eq!(end, None);
    }

    #[test]
    fn test_write_frame() {
        let frame = encode_frame(&Message::Done).unwrap();
        let mut stream = Builder::new().write(&frame).build();
        tokio_test::block_on(write_frame(&mut stream, &Message::Done)).unwrap();
    }

    #[test]
    fn test_bad_magic_and_oversize_refused() {
        let mut frame = encode_frame(&sample()).unwrap();
        frame[0] = b'X';
        let mut stream = Builder::new().read(&frame[..HEADER_LEN]).build();
        assert!(matches!(
            tokio_test::block_on(read_frame(&mut stream)),
            Err(NetworkError::BadMagic(_))
        ));

        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(&FRAME_MAGIC);
        header[4..].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decode_frame(&header),
            Err(NetworkError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let frame = encode_frame(&sample()).unwrap();
        let mut stream = Builder::new().read(&frame[..frame.len() - 1]).build();
        assert!(matches!(
            tokio_test::block_on(read_frame(&mut stream)),
            Err(NetworkError::Truncated)
        ));
    }
}
