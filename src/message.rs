//! Wire message model and line codec (spec §3, §6).
//!
//! A line is either a bare signal token or a `key=value` pair. Input
//! tolerates bare LF; output always emits CR+LF. Maximum line length is
//! 64 KiB, matching the largest observed real-world payload plus margin.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum accepted line length, in bytes, excluding the line terminator.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// The set of bare-token signals the protocol defines (spec §3).
pub const SIGNALS: &[&str] = &[
    "bang",
    "load1",
    "load2",
    "load3",
    "exit",
    "again",
    "lexicon",
    "start",
    "nolong",
    "pleaseBeSoKindAndQuit",
];

/// A single parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A bare token, e.g. `bang`, `load1`, `exit`.
    Signal(String),
    /// A `key=value` line. `value` preserves leading/trailing whitespace —
    /// it is significant for string-mode variables (spec §6).
    KeyVal(String, String),
}

impl Message {
    /// Parse a single line (without its terminator) into a [`Message`].
    ///
    /// Any line over [`MAX_LINE_LEN`] bytes, or that is empty after
    /// stripping the terminator, is rejected.
    pub fn parse(line: &str) -> Option<Message> {
        if line.is_empty() || line.len() > MAX_LINE_LEN {
            return None;
        }
        match line.find('=') {
            Some(idx) => {
                let key = &line[..idx];
                let value = &line[idx + 1..];
                if key.is_empty() {
                    None
                } else {
                    Some(Message::KeyVal(key.to_string(), value.to_string()))
                }
            }
            None => Some(Message::Signal(line.to_string())),
        }
    }

    /// The keyword this message concerns: the key of a `KeyVal`, or the
    /// signal token itself.
    pub fn keyword(&self) -> &str {
        match self {
            Message::Signal(s) => s,
            Message::KeyVal(k, _) => k,
        }
    }

    /// Re-encode without a line terminator (the codec appends CR+LF).
    pub fn to_line(&self) -> String {
        match self {
            Message::Signal(s) => s.clone(),
            Message::KeyVal(k, v) => format!("{k}={v}"),
        }
    }

    /// Construct a `key=value` message.
    pub fn kv(key: impl Into<String>, value: impl Into<String>) -> Message {
        Message::KeyVal(key.into(), value.into())
    }

    /// Construct a bare signal message.
    pub fn signal(token: impl Into<String>) -> Message {
        Message::Signal(token.into())
    }
}

/// Tokio codec: decodes CR+LF or bare-LF terminated lines into [`Message`],
/// always encodes with CR+LF (spec §6).
#[derive(Debug, Default)]
pub struct LineCodec {
    _private: (),
}

impl LineCodec {
    /// Create a new codec instance.
    pub fn new() -> LineCodec {
        LineCodec::default()
    }
}

impl Decoder for LineCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Self::Error> {
        loop {
            let Some(nl_pos) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LEN {
                    // No terminator yet but already over budget: reject and resync
                    // by dropping everything buffered so far.
                    src.clear();
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "line exceeds maximum length",
                    ));
                }
                return Ok(None);
            };

            let mut line = src.split_to(nl_pos + 1);
            line.truncate(line.len() - 1); // drop \n
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1); // drop trailing \r
            }

            if line.len() > MAX_LINE_LEN {
                continue; // drop the line, keep the connection (spec §7)
            }
            let Ok(text) = std::str::from_utf8(&line) else {
                continue; // malformed line: log upstream, drop, keep session
            };
            if text.is_empty() {
                continue;
            }
            if let Some(msg) = Message::parse(text) {
                return Ok(Some(msg));
            }
            // unparseable: drop the line, keep reading
        }
    }
}

impl Encoder<Message> for LineCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_line();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\r');
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Encode a single message to a byte buffer with a CR+LF terminator, for
/// call sites that don't go through the tokio `Framed` wrapper (e.g. the
/// traffic log, unit tests).
pub fn encode_line(msg: &Message) -> Vec<u8> {
    let mut out = msg.to_line().into_bytes();
    out.push(b'\r');
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keyval_and_signal() {
        assert_eq!(
            Message::parse("Qs121=hello"),
            Some(Message::kv("Qs121", "hello"))
        );
        assert_eq!(Message::parse("bang"), Some(Message::signal("bang")));
    }

    #[test]
    fn keyval_preserves_value_whitespace() {
        assert_eq!(
            Message::parse("name= padded value "),
            Some(Message::kv("name", " padded value "))
        );
    }

    #[test]
    fn decoder_accepts_bare_lf_and_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"bang\nQi1=2\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::signal("bang")));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::kv("Qi1", "2")));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn encoder_always_emits_crlf() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::signal("load1"), &mut buf).unwrap();
        assert_eq!(&buf[..], b"load1\r\n");
    }

    #[test]
    fn max_length_line_round_trips() {
        let value = "x".repeat(MAX_LINE_LEN - "k=".len());
        let line = format!("k={value}");
        assert_eq!(line.len(), MAX_LINE_LEN);
        let msg = Message::parse(&line).unwrap();
        assert_eq!(encode_line(&msg).len(), MAX_LINE_LEN + 2);
    }

    #[test]
    fn over_long_line_is_rejected_by_decoder() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'a'; MAX_LINE_LEN + 10]);
        buf.extend_from_slice(b"\n");
        assert!(codec.decode(&mut buf).is_err());
    }
}
