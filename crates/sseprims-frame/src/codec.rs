use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use tokio_util::codec::Decoder;

use crate::error::{FrameError, Result};

const DATA_FIELD: &[u8] = b"data: ";
const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Last event id seen on the stream, if any.
    pub id: Option<String>,
    /// Event type from an `event:` field. `None` means the default `message` type.
    pub event: Option<String>,
    /// Event payload, `data:` lines joined with `\n`.
    pub data: String,
}

/// A decoded wire-level unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete event terminated by a blank line.
    Event(Event),
    /// A `retry:` field announcing the server's reconnection delay.
    Retry(Duration),
}

impl Frame {
    /// Create a default-typed event frame carrying `data`.
    pub fn event(data: impl Into<String>) -> Self {
        Self::Event(Event {
            id: None,
            event: None,
            data: data.into(),
        })
    }

    /// Payload of an event frame.
    pub fn data(&self) -> Option<&str> {
        match self {
            Frame::Event(event) => Some(event.data.as_str()),
            Frame::Retry(_) => None,
        }
    }

    /// Deserialize the payload of an event frame.
    ///
    /// Returns `None` for non-event frames.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.data().map(serde_json::from_str)
    }
}

/// Configuration for the event decoder.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Maximum bytes buffered for a single event. Default: unlimited.
    pub max_event_size: Option<usize>,
}

/// Encode one value as a `data: <json>\n\n` event.
///
/// Compact JSON never contains a raw newline, so the value always fits on a
/// single `data:` line.
pub fn encode_event<T: Serialize + ?Sized>(value: &T, dst: &mut BytesMut) -> Result<()> {
    let json = serde_json::to_vec(value)?;
    dst.reserve(DATA_FIELD.len() + json.len() + 2);
    dst.put_slice(DATA_FIELD);
    dst.put_slice(&json);
    dst.put_slice(b"\n\n");
    Ok(())
}

/// Encode a comment. Decoders skip comments; they keep idle connections warm.
pub fn encode_comment(text: &str, dst: &mut BytesMut) {
    for line in split_lines(text) {
        dst.put_u8(b':');
        if !line.is_empty() {
            dst.put_u8(b' ');
            dst.put_slice(line.as_bytes());
        }
        dst.put_u8(b'\n');
    }
    dst.put_u8(b'\n');
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line))
}

/// Per-stream parser state carried between calls to `decode_frame`.
#[derive(Debug, Default)]
pub(crate) struct DecodeState {
    data: String,
    has_data: bool,
    event: Option<String>,
    last_id: Option<String>,
    bom_checked: bool,
}

impl DecodeState {
    /// True while an event has started but not yet been dispatched.
    pub(crate) fn has_pending_event(&self) -> bool {
        self.has_data || self.event.is_some()
    }

    /// Drop any partially accumulated event. The last event id survives.
    pub(crate) fn discard_pending(&mut self) {
        self.data.clear();
        self.has_data = false;
        self.event = None;
    }

    fn dispatch(&mut self) -> Option<Frame> {
        if !self.has_data {
            self.event = None;
            return None;
        }

        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }
        self.has_data = false;

        Some(Frame::Event(Event {
            id: self.last_id.clone(),
            event: self.event.take(),
            data,
        }))
    }
}

/// Decode the next frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete event yet.
/// Complete lines are consumed from `src` as they are parsed; the partial
/// event they belong to is held in `state` until its terminating blank line
/// arrives. With `eof` set, a trailing `\r` counts as a line terminator.
pub(crate) fn decode_frame(
    src: &mut BytesMut,
    state: &mut DecodeState,
    config: &FrameConfig,
    eof: bool,
) -> Result<Option<Frame>> {
    if !state.bom_checked {
        if !eof && src.len() < BOM.len() && BOM.starts_with(&src[..]) {
            return Ok(None); // Need more data
        }
        if src.starts_with(&BOM) {
            src.advance(BOM.len());
        }
        state.bom_checked = true;
    }

    loop {
        let Some((line_len, terminator_len)) = find_line(src, eof) else {
            check_event_size(state.data.len() + src.len(), config)?;
            return Ok(None); // Need more data
        };

        let line = src.split_to(line_len);
        src.advance(terminator_len);

        if let Some(frame) = process_line(&line, state)? {
            return Ok(Some(frame));
        }
        check_event_size(state.data.len(), config)?;
    }
}

fn check_event_size(size: usize, config: &FrameConfig) -> Result<()> {
    match config.max_event_size {
        Some(max) if size > max => Err(FrameError::EventTooLarge { size, max }),
        _ => Ok(()),
    }
}

/// Locate the first line terminator: `\n`, `\r\n` or a lone `\r`.
///
/// A `\r` at the very end of the buffer is ambiguous until the next byte
/// arrives, unless the stream has ended.
fn find_line(src: &[u8], eof: bool) -> Option<(usize, usize)> {
    let pos = src.iter().position(|b| *b == b'\n' || *b == b'\r')?;
    if src[pos] == b'\n' {
        return Some((pos, 1));
    }
    match src.get(pos + 1) {
        Some(b'\n') => Some((pos, 2)),
        Some(_) => Some((pos, 1)),
        None if eof => Some((pos, 1)),
        None => None,
    }
}

fn process_line(line: &[u8], state: &mut DecodeState) -> Result<Option<Frame>> {
    if line.is_empty() {
        return Ok(state.dispatch());
    }
    if line[0] == b':' {
        return Ok(None);
    }

    let (field, value) = match line.iter().position(|b| *b == b':') {
        Some(colon) => {
            let value = &line[colon + 1..];
            let value = value.strip_prefix(b" ").unwrap_or(value);
            (&line[..colon], value)
        }
        None => (line, &[][..]),
    };
    let value = String::from_utf8_lossy(value);

    match field {
        b"data" => {
            state.data.push_str(&value);
            state.data.push('\n');
            state.has_data = true;
        }
        b"event" => state.event = Some(value.into_owned()),
        b"id" => {
            if !value.contains('\0') {
                state.last_id = (!value.is_empty()).then(|| value.into_owned());
            }
        }
        b"retry" => {
            if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(millis) = value.parse::<u64>() {
                    return Ok(Some(Frame::Retry(Duration::from_millis(millis))));
                }
            }
        }
        _ => {
            tracing::trace!(field = %String::from_utf8_lossy(field), "ignoring unknown event field");
        }
    }

    Ok(None)
}

/// Incremental event-stream decoder.
///
/// Usable directly with `tokio_util::codec::FramedRead`; [`crate::FrameReader`]
/// drives it over HTTP body chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: DecodeState,
    config: FrameConfig,
}

impl FrameDecoder {
    /// Create a decoder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            state: DecodeState::default(),
            config,
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, &mut self.state, &self.config, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = decode_frame(src, &mut self.state, &self.config, true)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() || self.state.has_pending_event() {
            tracing::debug!(
                buffered = src.len(),
                "discarding incomplete event at end of stream"
            );
        }
        src.clear();
        self.state.discard_pending();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn decode_all(wire: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(wire);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        while let Some(frame) = decoder.decode_eof(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_encode_event_wire_format() {
        let mut buf = BytesMut::new();
        encode_event(&json!({"count": 3}), &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"data: {\"count\":3}\n\n");
    }

    #[test]
    fn test_encode_decode_representative_values() {
        let values = [
            json!(42),
            json!(-1.5),
            json!(null),
            json!("multi\nline"),
            json!([1, [2, 3], {"x": null}]),
            json!({"outer": {"inner": [true, false]}, "n": 0}),
        ];

        let mut buf = BytesMut::new();
        for value in &values {
            encode_event(value, &mut buf).unwrap();
        }

        let decoded: Vec<Value> = decode_all(&buf)
            .iter()
            .map(|frame| frame.json().unwrap().unwrap())
            .collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_decode_incomplete_event() {
        let mut state = DecodeState::default();
        let config = FrameConfig::default();

        let mut buf = BytesMut::from(&b"data: 1\n"[..]);
        assert!(decode_frame(&mut buf, &mut state, &config, false)
            .unwrap()
            .is_none());
        assert!(state.has_pending_event());

        buf.extend_from_slice(b"\n");
        let frame = decode_frame(&mut buf, &mut state, &config, false)
            .unwrap()
            .unwrap();
        assert_eq!(frame, Frame::event("1"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_split_at_every_byte() {
        let mut wire = BytesMut::new();
        encode_event(&json!({"a": [1, 2]}), &mut wire).unwrap();
        encode_event(&json!("b"), &mut wire).unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for byte in wire.iter() {
            buf.put_u8(*byte);
            while let Some(frame) = decoder.decode(&mut buf).unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(
            frames,
            vec![Frame::event("{\"a\":[1,2]}"), Frame::event("\"b\"")]
        );
    }

    #[test]
    fn test_decode_line_endings() {
        let frames = decode_all(b"data: a\r\n\r\ndata: b\r\rdata: c\n\n");
        assert_eq!(
            frames,
            vec![Frame::event("a"), Frame::event("b"), Frame::event("c")]
        );
    }

    #[test]
    fn test_decode_trailing_carriage_return_waits_for_next_byte() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&b"data: x\r"[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.as_ref(), b"data: x\r");

        buf.extend_from_slice(b"\n\r\n");
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(Frame::event("x")));
    }

    #[test]
    fn test_decode_fields() {
        let frames = decode_all(
            b": keep-alive\n\nid: 7\nevent: tick\ndata: first\ndata:second\nbogus: 1\n\nretry: 2500\n\n",
        );
        assert_eq!(
            frames,
            vec![
                Frame::Event(Event {
                    id: Some("7".to_string()),
                    event: Some("tick".to_string()),
                    data: "first\nsecond".to_string(),
                }),
                Frame::Retry(Duration::from_millis(2500)),
            ]
        );
    }

    #[test]
    fn test_event_without_data_is_not_dispatched() {
        let frames = decode_all(b"event: ping\n\ndata: 1\n\n");
        assert_eq!(frames, vec![Frame::event("1")]);
    }

    #[test]
    fn test_last_event_id_persists() {
        let frames = decode_all(b"id: 1\ndata: a\n\ndata: b\n\nid\ndata: c\n\n");
        let ids: Vec<Option<String>> = frames
            .into_iter()
            .map(|frame| match frame {
                Frame::Event(event) => event.id,
                Frame::Retry(_) => None,
            })
            .collect();
        assert_eq!(ids, vec![Some("1".to_string()), Some("1".to_string()), None]);
    }

    #[test]
    fn test_incomplete_event_at_eof_is_discarded() {
        let frames = decode_all(b"data: 1\n\ndata: 2\n");
        assert_eq!(frames, vec![Frame::event("1")]);
    }

    #[test]
    fn test_leading_bom_is_skipped() {
        let frames = decode_all(b"\xEF\xBB\xBFdata: 1\n\n");
        assert_eq!(frames, vec![Frame::event("1")]);
    }

    #[test]
    fn test_event_too_large() {
        let mut decoder = FrameDecoder::with_config(FrameConfig {
            max_event_size: Some(8),
        });
        let mut buf = BytesMut::from(&b"data: 0123456789"[..]);
        let result = decoder.decode(&mut buf);
        assert!(matches!(result, Err(FrameError::EventTooLarge { max: 8, .. })));
    }

    #[test]
    fn test_encode_comment_is_skipped_by_decoder() {
        let mut buf = BytesMut::new();
        encode_comment("keep-alive", &mut buf);
        encode_event(&1, &mut buf).unwrap();
        assert!(buf.starts_with(b": keep-alive\n\n"));
        assert_eq!(decode_all(&buf), vec![Frame::event("1")]);
    }

    #[test]
    fn test_encode_event_rejects_unserializable_value() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], 1);
        let mut buf = BytesMut::new();
        let result = encode_event(&map, &mut buf);
        assert!(matches!(result, Err(FrameError::Serialize(_))));
        assert!(buf.is_empty());
    }
}
