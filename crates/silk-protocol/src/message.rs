//! Lazily (de)serialized message wrapper.
//!
//! A [`Message`] holds at most one authoritative representation at a
//! time: the parsed [`Envelope`], or the serialized byte buffer. The
//! other side is computed on demand and cached, so a frame that is
//! only forwarded is never parsed, and an envelope that is never sent
//! is never serialized. Mutation through [`Message::set`] or
//! [`Message::envelope_mut`] drops the cached bytes.

use bytes::Bytes;
use serde_json::Value;
use silk_types::{Result, SilkError};

use crate::envelope::Envelope;
use crate::path;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A wire message in either (or both, when cached) representations.
#[derive(Debug)]
pub struct Message {
    /// Serialized JSON bytes, when known.
    raw: Option<Bytes>,
    /// Parsed envelope, when known.
    parsed: Option<Envelope>,
}

impl Message {
    /// Wraps raw bytes received from a socket. Nothing is parsed yet.
    pub fn from_bytes(raw: Bytes) -> Self {
        Self {
            raw: Some(raw),
            parsed: None,
        }
    }

    /// Wraps a structured envelope. Nothing is serialized yet.
    pub fn from_envelope(envelope: Envelope) -> Self {
        Self {
            raw: None,
            parsed: Some(envelope),
        }
    }

    /// Returns the parsed envelope, parsing and caching on first use.
    ///
    /// # Errors
    ///
    /// `SilkError::BadPayload` if the bytes are not a well-formed
    /// envelope (invalid JSON, wrong shape, missing `id` or `src`).
    pub fn envelope(&mut self) -> Result<&Envelope> {
        self.ensure_parsed()?;
        Ok(self.parsed.as_ref().expect("parsed after ensure_parsed"))
    }

    /// Returns the envelope mutably. The cached bytes are dropped —
    /// the structured form becomes authoritative.
    pub fn envelope_mut(&mut self) -> Result<&mut Envelope> {
        self.ensure_parsed()?;
        self.raw = None;
        Ok(self.parsed.as_mut().expect("parsed after ensure_parsed"))
    }

    /// Returns the serialized bytes, encoding and caching on first use.
    pub fn encode(&mut self) -> Result<Bytes> {
        if self.raw.is_none() {
            let envelope = self.parsed.as_ref().ok_or_else(|| SilkError::BadPayload {
                reason: "message has neither bytes nor envelope".into(),
            })?;
            let encoded = serde_json::to_vec(envelope).map_err(|e| SilkError::BadPayload {
                reason: format!("failed to serialize envelope: {e}"),
            })?;
            self.raw = Some(Bytes::from(encoded));
        }
        Ok(self.raw.clone().expect("raw after encode"))
    }

    /// Navigates a dotted path rooted at the envelope.
    ///
    /// Top-level segments `id`, `src`, `type`, `parent`, and `dest`
    /// yield the corresponding field; a path starting with `data`
    /// descends into the payload. Absent steps yield `None`.
    pub fn get(&mut self, full_path: &str) -> Result<Option<Value>> {
        let envelope = self.envelope()?;
        let (head, rest) = match full_path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (full_path, None),
        };

        let value = match head {
            "id" => rest.is_none().then(|| Value::String(envelope.id.to_string())),
            "src" => rest.is_none().then(|| Value::String(envelope.src.to_string())),
            "type" => rest.is_none().then(|| Value::String(envelope.kind.clone())),
            "parent" => match (&envelope.parent, rest) {
                (Some(parent), None) => Some(Value::String(parent.to_string())),
                _ => None,
            },
            "dest" => match (&envelope.dest, rest) {
                (Some(dest), None) => Some(Value::String(String::from(dest.clone()))),
                _ => None,
            },
            "data" => match (&envelope.data, rest) {
                (Some(data), None) => Some(data.clone()),
                (Some(data), Some(inner)) => path::get(data, inner).cloned(),
                (None, _) => None,
            },
            _ => None,
        };
        Ok(value)
    }

    /// Sets a value at a dotted path under `data`, creating
    /// intermediate objects as needed. The cached bytes are dropped.
    ///
    /// # Errors
    ///
    /// `SilkError::BadPayload` if the path does not start with `data`.
    pub fn set(&mut self, full_path: &str, value: Value) -> Result<()> {
        let rest = full_path
            .strip_prefix("data")
            .ok_or_else(|| SilkError::BadPayload {
                reason: format!("set path must start with 'data': {full_path}"),
            })?;

        let envelope = self.envelope_mut()?;
        let data = envelope.data.get_or_insert_with(|| Value::Object(Default::default()));

        match rest.strip_prefix('.') {
            None if rest.is_empty() => *data = value,
            None => {
                return Err(SilkError::BadPayload {
                    reason: format!("set path must start with 'data': {full_path}"),
                })
            }
            Some(inner) => path::set(data, inner, value),
        }
        Ok(())
    }

    fn ensure_parsed(&mut self) -> Result<()> {
        if self.parsed.is_none() {
            let raw = self.raw.as_ref().ok_or_else(|| SilkError::BadPayload {
                reason: "message has neither bytes nor envelope".into(),
            })?;
            let envelope: Envelope =
                serde_json::from_slice(raw).map_err(|e| SilkError::BadPayload {
                    reason: format!("malformed envelope: {e}"),
                })?;
            self.parsed = Some(envelope);
        }
        Ok(())
    }
}

impl From<Envelope> for Message {
    fn from(envelope: Envelope) -> Self {
        Self::from_envelope(envelope)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Dest;
    use serde_json::json;
    use silk_types::{MessageId, NodeId};

    fn sample() -> Envelope {
        Envelope {
            id: MessageId::new("m1"),
            src: NodeId::new("n1"),
            dest: Some(Dest::Node(NodeId::new("n2"))),
            kind: "check-temp".into(),
            parent: None,
            data: Some(json!({"gauge": "main", "limits": {"hi": 90}})),
        }
    }

    #[test]
    fn bytes_to_envelope_and_back() -> Result<()> {
        let mut original = Message::from_envelope(sample());
        let bytes = original.encode()?;

        let mut wire = Message::from_bytes(bytes);
        assert_eq!(wire.envelope()?, &sample());

        // Unmodified, re-encoding preserves field equality.
        let reencoded = wire.encode()?;
        let mut again = Message::from_bytes(reencoded);
        assert_eq!(again.envelope()?, &sample());
        Ok(())
    }

    #[test]
    fn encode_is_cached() -> Result<()> {
        let mut msg = Message::from_envelope(sample());
        let first = msg.encode()?;
        let second = msg.encode()?;
        // Bytes clones of the same cached buffer.
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn malformed_bytes_report_bad_payload() {
        let mut msg = Message::from_bytes(Bytes::from_static(b"{not json"));
        match msg.envelope() {
            Err(SilkError::BadPayload { .. }) => {}
            other => panic!("expected BadPayload, got {other:?}"),
        }
    }

    #[test]
    fn missing_id_reports_bad_payload() {
        let mut msg = Message::from_bytes(Bytes::from_static(
            br#"{"src": "n1", "type": "x"}"#,
        ));
        assert!(matches!(msg.envelope(), Err(SilkError::BadPayload { .. })));
    }

    #[test]
    fn get_top_level_and_data_paths() -> Result<()> {
        let mut msg = Message::from_envelope(sample());
        assert_eq!(msg.get("id")?, Some(json!("m1")));
        assert_eq!(msg.get("type")?, Some(json!("check-temp")));
        assert_eq!(msg.get("dest")?, Some(json!("n2")));
        assert_eq!(msg.get("parent")?, None);
        assert_eq!(msg.get("data.limits.hi")?, Some(json!(90)));
        assert_eq!(msg.get("data.limits.lo")?, None);
        Ok(())
    }

    #[test]
    fn set_invalidates_cached_bytes() -> Result<()> {
        let mut msg = Message::from_envelope(sample());
        let before = msg.encode()?;

        msg.set("data.limits.lo", json!(10))?;
        let after = msg.encode()?;

        assert_ne!(before, after);
        let mut reread = Message::from_bytes(after);
        assert_eq!(reread.get("data.limits.lo")?, Some(json!(10)));
        Ok(())
    }

    #[test]
    fn set_outside_data_rejected() {
        let mut msg = Message::from_envelope(sample());
        assert!(msg.set("id", json!("other")).is_err());
    }

    #[test]
    fn set_creates_data_when_absent() -> Result<()> {
        let mut env = sample();
        env.data = None;
        let mut msg = Message::from_envelope(env);
        msg.set("data.fresh", json!(1))?;
        assert_eq!(msg.get("data.fresh")?, Some(json!(1)));
        Ok(())
    }
}
