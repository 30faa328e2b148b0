//! JSON-RPC 2.0 message types.
//!
//! Inbound frames are decoded into a tagged sum so routing code can match
//! exhaustively on the message kind instead of probing optional fields.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC message id: string or integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MsgId {
    Num(i64),
    Str(String),
}

impl From<i64> for MsgId {
    fn from(value: i64) -> Self {
        MsgId::Num(value)
    }
}

impl From<&str> for MsgId {
    fn from(value: &str) -> Self {
        MsgId::Str(value.to_string())
    }
}

impl From<String> for MsgId {
    fn from(value: String) -> Self {
        MsgId::Str(value)
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgId::Num(n) => write!(f, "{n}"),
            MsgId::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 message, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: MsgId,
        method: String,
        params: Value,
    },
    Notify {
        method: String,
        params: Value,
    },
    Result {
        id: MsgId,
        result: Value,
    },
    Error {
        id: MsgId,
        error: RpcError,
    },
}

impl Message {
    pub fn request(id: impl Into<MsgId>, method: impl Into<String>, params: Value) -> Self {
        Message::Request {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    pub fn notify(method: impl Into<String>, params: Value) -> Self {
        Message::Notify {
            method: method.into(),
            params,
        }
    }

    pub fn result(id: impl Into<MsgId>, result: Value) -> Self {
        Message::Result {
            id: id.into(),
            result,
        }
    }

    pub fn error(id: impl Into<MsgId>, error: RpcError) -> Self {
        Message::Error {
            id: id.into(),
            error,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request { .. })
    }

    pub fn is_notify(&self) -> bool {
        matches!(self, Message::Notify { .. })
    }

    pub fn is_result(&self) -> bool {
        matches!(self, Message::Result { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error { .. })
    }

    /// Method name for requests and notifies.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Notify { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Message id; absent for notifies.
    pub fn id(&self) -> Option<&MsgId> {
        match self {
            Message::Request { id, .. }
            | Message::Result { id, .. }
            | Message::Error { id, .. } => Some(id),
            Message::Notify { .. } => None,
        }
    }

    /// Params for requests and notifies.
    pub fn params(&self) -> Option<&Value> {
        match self {
            Message::Request { params, .. } | Message::Notify { params, .. } => Some(params),
            _ => None,
        }
    }

    /// Produce a copy of this message carrying a substituted id.
    ///
    /// The receiver keeps the original for reply construction; this is the
    /// correlation primitive used when forwarding a request under a freshly
    /// minted id. Notifies have no id and are returned unchanged.
    pub fn clone_with_id(&self, new_id: impl Into<MsgId>) -> Self {
        let new_id = new_id.into();
        match self {
            Message::Request { method, params, .. } => Message::Request {
                id: new_id,
                method: method.clone(),
                params: params.clone(),
            },
            Message::Notify { .. } => self.clone(),
            Message::Result { result, .. } => Message::Result {
                id: new_id,
                result: result.clone(),
            },
            Message::Error { error, .. } => Message::Error {
                id: new_id,
                error: error.clone(),
            },
        }
    }

    /// Build a result message replying to `orig` (the original caller id is
    /// preserved).
    pub fn result_for(orig: &Message, result: Value) -> Option<Self> {
        orig.id().map(|id| Message::Result {
            id: id.clone(),
            result,
        })
    }

    /// Build an error message replying to `orig`.
    pub fn error_for(orig: &Message, error: RpcError) -> Option<Self> {
        orig.id().map(|id| Message::Error {
            id: id.clone(),
            error,
        })
    }

    /// Encode to a JSON-RPC 2.0 wire object.
    pub fn to_value(&self) -> Value {
        match self {
            Message::Request { id, method, params } => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "method": method,
                "params": params,
            }),
            Message::Notify { method, params } => json!({
                "jsonrpc": JSONRPC_VERSION,
                "method": method,
                "params": params,
            }),
            Message::Result { id, result } => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "result": result,
            }),
            Message::Error { id, error } => json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "error": error,
            }),
        }
    }

    /// Decode a JSON-RPC 2.0 wire object.
    ///
    /// Frames that are neither request, notify, result, nor error are
    /// rejected; that is the transport layer's ProtocolError.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let obj: &Map<String, Value> = value
            .as_object()
            .ok_or_else(|| "message is not a JSON object".to_string())?;

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                serde_json::from_value::<MsgId>(v.clone())
                    .map_err(|_| format!("invalid id: {v}"))?,
            ),
        };

        if let Some(method) = obj.get("method") {
            let method = method
                .as_str()
                .ok_or_else(|| "method is not a string".to_string())?
                .to_string();
            let params = obj.get("params").cloned().unwrap_or(Value::Null);
            return Ok(match id {
                Some(id) => Message::Request { id, method, params },
                None => Message::Notify { method, params },
            });
        }

        if let Some(result) = obj.get("result") {
            let id = id.ok_or_else(|| "result message without id".to_string())?;
            return Ok(Message::Result {
                id,
                result: result.clone(),
            });
        }

        if let Some(error) = obj.get("error") {
            let id = id.ok_or_else(|| "error message without id".to_string())?;
            let error: RpcError = serde_json::from_value(error.clone())
                .map_err(|e| format!("invalid error object: {e}"))?;
            return Ok(Message::Error { id, error });
        }

        Err("message has no method, result, or error".to_string())
    }

    /// Encode to a compact JSON string.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Decode from a JSON string.
    pub fn from_json(data: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(data).map_err(|e| format!("invalid json: {e}"))?;
        Self::from_value(value)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let msg = Message::request(1, "echo", json!(["hi"]));
        let encoded = msg.to_json();
        assert!(encoded.contains(r#""jsonrpc":"2.0""#));
        assert!(encoded.contains(r#""id":1"#));
        let decoded = Message::from_json(&encoded).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.is_request());
        assert_eq!(decoded.method(), Some("echo"));
    }

    #[test]
    fn notify_has_no_id() {
        let msg = Message::notify("pos.change", json!([100, 200]));
        let decoded = Message::from_json(&msg.to_json()).unwrap();
        assert!(decoded.is_notify());
        assert_eq!(decoded.id(), None);
    }

    #[test]
    fn result_and_error_round_trip() {
        let res = Message::result("abc", json!("echo: hi"));
        let decoded = Message::from_json(&res.to_json()).unwrap();
        assert_eq!(decoded, res);

        let err = Message::error(2, RpcError::method_not_found());
        let decoded = Message::from_json(&err.to_json()).unwrap();
        match decoded {
            Message::Error { id, error } => {
                assert_eq!(id, MsgId::Num(2));
                assert_eq!(error.code, -32601);
            }
            other => panic!("expected error message, got {other:?}"),
        }
    }

    #[test]
    fn clone_with_id_substitutes_and_preserves() {
        let orig = Message::request(1, "slow", json!([]));
        let forwarded = orig.clone_with_id("cid-1");
        assert_eq!(forwarded.id(), Some(&MsgId::Str("cid-1".into())));
        assert_eq!(forwarded.method(), Some("slow"));
        // the original is untouched
        assert_eq!(orig.id(), Some(&MsgId::Num(1)));
    }

    #[test]
    fn reply_builders_address_the_original_id() {
        let orig = Message::request(7, "echo", json!(["hi"]));
        let reply = Message::result_for(&orig, json!("echo: hi")).unwrap();
        assert_eq!(reply.id(), Some(&MsgId::Num(7)));

        let err = Message::error_for(&orig, RpcError::timeout()).unwrap();
        assert_eq!(err.id(), Some(&MsgId::Num(7)));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(Message::from_json("[1,2,3]").is_err());
        assert!(Message::from_json(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
        assert!(Message::from_json(r#"{"jsonrpc":"2.0","method":5}"#).is_err());
        assert!(Message::from_json(r#"{"jsonrpc":"2.0","result":1}"#).is_err());
    }

    #[test]
    fn missing_params_default_to_null() {
        let decoded =
            Message::from_json(r#"{"jsonrpc":"2.0","id":1,"method":"rpc.methods"}"#).unwrap();
        assert_eq!(decoded.params(), Some(&Value::Null));
    }
}
