//! Swarm Frame Codec
//!
//! Classifies inbound WebSocket text frames. The feed multiplexes two frame
//! kinds over one connection, distinguished by the correlation id:
//!
//! - `rid != "0"`: the reply to a previously issued command;
//! - `rid == "0"`: a server-initiated delta, whose `data` maps subscription
//!   ids to the delta documents to merge.
//!
//! The `rid` arrives as either a JSON string or a number depending on the
//! server build; both are accepted.

use serde_json::{Map, Value};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a JSON object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),

    /// Frame carries no correlation id.
    #[error("frame missing correlation id")]
    MissingRid,
}

/// One classified inbound frame.
#[derive(Debug, Clone)]
pub enum SwarmFrame {
    /// Reply to a correlated request.
    Reply {
        /// Correlation id of the originating request.
        rid: u64,
        /// Server status code; `0` means success.
        code: i64,
        /// Reply payload.
        data: Value,
    },
    /// Server-initiated subscription deltas, keyed by subscription id.
    Delta {
        /// `subscription id → delta document`.
        updates: Map<String, Value>,
    },
}

/// Stateless decoder for inbound swarm frames.
#[derive(Debug, Default, Clone)]
pub struct SwarmCodec;

impl SwarmCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object, carries no `rid`,
    /// or the `rid` is not numeric.
    pub fn decode(&self, text: &str) -> Result<SwarmFrame, CodecError> {
        let value: Value = serde_json::from_str(text)?;

        let Some(obj) = value.as_object() else {
            let head: String = text.chars().take(50).collect();
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {head}..."
            )));
        };

        let rid = parse_rid(obj.get("rid"))?;

        if rid == 0 {
            let updates = obj
                .get("data")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            return Ok(SwarmFrame::Delta { updates });
        }

        let code = obj.get("code").and_then(Value::as_i64).unwrap_or(0);
        let data = obj.get("data").cloned().unwrap_or(Value::Null);
        Ok(SwarmFrame::Reply { rid, code, data })
    }
}

fn parse_rid(value: Option<&Value>) -> Result<u64, CodecError> {
    match value {
        Some(Value::String(s)) => s.parse().map_err(|_| {
            CodecError::InvalidFormat(format!("non-numeric correlation id: {s}"))
        }),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| CodecError::InvalidFormat(format!("non-numeric correlation id: {n}"))),
        _ => Err(CodecError::MissingRid),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_reply_with_string_rid() {
        let codec = SwarmCodec::new();
        let frame = codec
            .decode(r#"{"rid":"5","code":0,"data":{"sid":"abc"}}"#)
            .unwrap();
        match frame {
            SwarmFrame::Reply { rid, code, data } => {
                assert_eq!(rid, 5);
                assert_eq!(code, 0);
                assert_eq!(data["sid"], json!("abc"));
            }
            SwarmFrame::Delta { .. } => panic!("expected reply"),
        }
    }

    #[test]
    fn decodes_reply_with_numeric_rid() {
        let codec = SwarmCodec::new();
        let frame = codec.decode(r#"{"rid":5,"code":12,"data":null}"#).unwrap();
        match frame {
            SwarmFrame::Reply { rid, code, .. } => {
                assert_eq!(rid, 5);
                assert_eq!(code, 12);
            }
            SwarmFrame::Delta { .. } => panic!("expected reply"),
        }
    }

    #[test]
    fn decodes_delta_frame() {
        let codec = SwarmCodec::new();
        let frame = codec
            .decode(r#"{"rid":"0","data":{"sub-1":{"game":{"42":{"markets_count":7}}}}}"#)
            .unwrap();
        match frame {
            SwarmFrame::Delta { updates } => {
                assert_eq!(updates.len(), 1);
                assert!(updates.contains_key("sub-1"));
            }
            SwarmFrame::Reply { .. } => panic!("expected delta"),
        }
    }

    #[test]
    fn delta_with_multiple_subscriptions() {
        let codec = SwarmCodec::new();
        let frame = codec
            .decode(r#"{"rid":0,"data":{"a":{"x":1},"b":{"y":2}}}"#)
            .unwrap();
        match frame {
            SwarmFrame::Delta { updates } => assert_eq!(updates.len(), 2),
            SwarmFrame::Reply { .. } => panic!("expected delta"),
        }
    }

    #[test]
    fn rejects_missing_rid() {
        let codec = SwarmCodec::new();
        assert!(matches!(
            codec.decode(r#"{"data":{}}"#),
            Err(CodecError::MissingRid)
        ));
    }

    #[test]
    fn rejects_non_object() {
        let codec = SwarmCodec::new();
        assert!(matches!(
            codec.decode("[1,2,3]"),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_invalid_json() {
        let codec = SwarmCodec::new();
        assert!(matches!(codec.decode("{not json"), Err(CodecError::Json(_))));
    }
}
