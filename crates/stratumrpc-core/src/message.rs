//! Newline-delimited JSON-RPC wire types used by Electrum servers.
//!
//! Every frame is one JSON object on its own line:
//! ```text
//! → {"id":1,"method":"server.version","params":["Electrum 1.9.5","1.4.1"]}
//! ← {"id":1,"result":["ElectrumX 1.16.0","1.4.1"]}
//! ← {"method":"blockchain.headers.subscribe","params":[{"height":101,"hex":"…"}]}
//! ```
//! Frames carrying an `id` are responses; frames without one are notifications.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, SessionError};

/// An outbound request (or an id-less notification when `id` is `None`).
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'a str,
    pub params: &'a [Value],
}

/// A response to one of our requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    /// `Ok(result)` or `Err(error payload)`.
    pub outcome: std::result::Result<Value, Value>,
}

impl Response {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

/// A server-initiated push.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(Response),
    Notification(Notification),
}

/// Serialize a request into a single newline-terminated frame.
pub fn encode(id: Option<u64>, method: &str, params: &[Value]) -> Result<String> {
    let mut frame = serde_json::to_string(&Request { id, method, params })?;
    frame.push('\n');
    Ok(frame)
}

/// Parse one line received from the server.
pub fn decode(frame: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(frame.trim())
        .map_err(|e| SessionError::malformed(format!("invalid JSON: {e}")))?;
    let Value::Object(mut obj) = value else {
        return Err(SessionError::malformed("frame is not a JSON object"));
    };

    match obj.remove("id") {
        Some(Value::Null) | None => decode_notification(obj),
        Some(id) => {
            let id = id
                .as_u64()
                .ok_or_else(|| SessionError::malformed(format!("unsupported id {id}")))?;
            let outcome = match obj.remove("error") {
                Some(Value::Null) | None => Ok(obj.remove("result").unwrap_or(Value::Null)),
                Some(err) => Err(err),
            };
            Ok(Inbound::Response(Response { id, outcome }))
        }
    }
}

fn decode_notification(mut obj: Map<String, Value>) -> Result<Inbound> {
    let method = match obj.remove("method") {
        Some(Value::String(m)) => m,
        Some(_) => return Err(SessionError::malformed("method is not a string")),
        None => return Err(SessionError::malformed("frame has neither id nor method")),
    };
    let params = obj.remove("params").unwrap_or(Value::Null);
    Ok(Inbound::Notification(Notification { method, params }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_encoding_matches_wire_format() {
        let frame = encode(Some(1), "server.version", &[json!("Electrum 1.9.5"), json!("1.4.1")])
            .unwrap();
        assert_eq!(
            frame,
            "{\"id\":1,\"method\":\"server.version\",\"params\":[\"Electrum 1.9.5\",\"1.4.1\"]}\n"
        );
    }

    #[test]
    fn notification_encoding_omits_id() {
        let frame = encode(None, "server.ping", &[]).unwrap();
        assert_eq!(frame, "{\"method\":\"server.ping\",\"params\":[]}\n");
    }

    #[test]
    fn decode_result_response() {
        let msg = decode(r#"{"id":4,"result":{"txid":"abc"}}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Response(Response {
                id: 4,
                outcome: Ok(json!({"txid": "abc"})),
            })
        );
    }

    #[test]
    fn decode_error_response() {
        let msg = decode(r#"{"id":2,"error":{"code":-32600,"message":"no"}}"#).unwrap();
        let Inbound::Response(resp) = msg else {
            panic!("expected response");
        };
        assert!(resp.is_error());
        assert_eq!(resp.outcome.unwrap_err()["code"], -32600);
    }

    #[test]
    fn null_error_with_result_is_success() {
        let msg = decode(r#"{"id":7,"result":null,"error":null}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::Response(Response { id: 7, outcome: Ok(Value::Null) })
        );
    }

    #[test]
    fn decode_notification_frame() {
        let msg =
            decode(r#"{"method":"blockchain.headers.subscribe","params":[{"height":101}]}"#)
                .unwrap();
        assert_eq!(
            msg,
            Inbound::Notification(Notification {
                method: "blockchain.headers.subscribe".into(),
                params: json!([{"height": 101}]),
            })
        );
    }

    #[test]
    fn null_id_is_treated_as_absent() {
        let msg = decode(r#"{"id":null,"method":"server.peers.subscribe","params":[]}"#).unwrap();
        assert!(matches!(msg, Inbound::Notification(_)));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        for frame in [
            "not json",
            "[1,2,3]",
            r#"{"params":[]}"#,
            r#"{"id":"abc","result":1}"#,
            r#"{"method":5}"#,
        ] {
            let err = decode(frame).unwrap_err();
            assert!(
                matches!(err, SessionError::MalformedFrame { .. }),
                "{frame}: {err:?}"
            );
        }
    }
}
