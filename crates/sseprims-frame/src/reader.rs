use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use tokio_util::codec::Decoder;

use crate::codec::{Frame, FrameConfig, FrameDecoder};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Reads complete frames from a stream of byte chunks (an HTTP body).
///
/// Chunks may split frames at any byte; callers always get complete frames.
pub struct FrameReader<S> {
    inner: S,
    buf: BytesMut,
    decoder: FrameDecoder,
    eof: bool,
    failed: bool,
}

impl<S, E> FrameReader<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    /// Create a new frame reader with default configuration.
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: S, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            decoder: FrameDecoder::with_config(config),
            eof: false,
            failed: false,
        }
    }

    /// Read the next complete frame.
    ///
    /// Returns `Ok(None)` once the byte stream has ended. An incomplete
    /// trailing event is discarded. After an error the reader is finished.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.failed {
            return Ok(None);
        }

        loop {
            let decoded = if self.eof {
                self.decoder.decode_eof(&mut self.buf)
            } else {
                self.decoder.decode(&mut self.buf)
            };
            match decoded {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) if self.eof => return Ok(None),
                Ok(None) => {}
                Err(err) => {
                    self.failed = true;
                    return Err(err);
                }
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    self.failed = true;
                    return Err(FrameError::Io(std::io::Error::other(err)));
                }
                None => self.eof = true,
            }
        }
    }

    /// Turn the reader into a `Stream` of frames that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Frame>> {
        futures_util::stream::unfold(self, |mut reader| async move {
            match reader.read_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), reader)),
                Ok(None) => None,
                Err(err) => Some((Err(err), reader)),
            }
        })
    }

    /// Borrow the underlying byte stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Consume the reader and return the underlying byte stream.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        self.decoder.config()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use bytes::BytesMut;
    use futures_util::stream;
    use serde_json::json;

    use super::*;
    use crate::codec::encode_event;

    fn chunks(
        parts: &[&[u8]],
    ) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Unpin {
        let owned: Vec<std::result::Result<Bytes, Infallible>> = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part)))
            .collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn read_single_frame() {
        let mut wire = BytesMut::new();
        encode_event(&json!({"hello": "world"}), &mut wire).unwrap();

        let mut reader = FrameReader::new(chunks(&[&wire[..]]));
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame, Frame::event("{\"hello\":\"world\"}"));
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn frames_split_across_chunks() {
        let mut reader =
            FrameReader::new(chunks(&[b"da", b"ta: 5\n", b"\ndata: ", b"4\n\nda"]));

        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::event("5")));
        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::event("4")));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn trailing_carriage_return_dispatches_at_end_of_stream() {
        let mut reader = FrameReader::new(chunks(&[b"data: 7\r\r"]));
        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::event("7")));
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_stream_ends_cleanly() {
        let mut reader = FrameReader::new(chunks(&[]));
        assert!(reader.read_frame().await.unwrap().is_none());
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transport_error_is_terminal() {
        let parts: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: 1\n\n")),
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset)),
            Ok(Bytes::from_static(b"data: 2\n\n")),
        ];
        let mut reader = FrameReader::new(stream::iter(parts));

        assert_eq!(reader.read_frame().await.unwrap(), Some(Frame::event("1")));
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn into_stream_yields_in_order() {
        let mut wire = BytesMut::new();
        for n in (0..=5).rev() {
            encode_event(&n, &mut wire).unwrap();
        }

        let frames: Vec<Frame> = FrameReader::new(chunks(&[&wire[..]]))
            .into_stream()
            .map(|frame| frame.unwrap())
            .collect()
            .await;
        let values: Vec<i64> = frames
            .iter()
            .map(|frame| frame.json().unwrap().unwrap())
            .collect();
        assert_eq!(values, vec![5, 4, 3, 2, 1, 0]);
    }

    #[tokio::test]
    async fn oversized_event_in_stream() {
        let cfg = FrameConfig {
            max_event_size: Some(4),
        };
        let mut reader = FrameReader::with_config(chunks(&[b"data: 123456\n\n"]), cfg);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::EventTooLarge { .. }));
    }
}
