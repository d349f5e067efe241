//! Inbound frame classification.

use serde_json::Value;

use chainwatch_core::request::{JsonRpcResponse, RpcId};

/// Everything an endpoint can send us, sorted once at the edge so the driver
/// can match exhaustively.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// `{"method": .., "params": {"subscription": <id>, "result": <payload>}}`
    Notification { subscription: RpcId, result: Value },
    /// Reply to one of our requests, correlated by `id`.
    Response(JsonRpcResponse),
    /// Not valid JSON.
    ParseError(String),
    /// Valid JSON of a shape we do not handle.
    Unrecognized(Value),
}

impl Inbound {
    pub fn parse(text: &str) -> Self {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return Self::ParseError(e.to_string()),
        };

        if value.get("method").and_then(Value::as_str).is_some() {
            let params = value.get("params");
            let subscription = params
                .and_then(|p| p.get("subscription"))
                .and_then(RpcId::from_value);
            let result = params.and_then(|p| p.get("result"));
            return match (subscription, result) {
                (Some(subscription), Some(result)) => Self::Notification {
                    subscription,
                    result: result.clone(),
                },
                _ => Self::Unrecognized(value),
            };
        }

        let is_reply = value.get("id").is_some()
            && (value.get("result").is_some() || value.get("error").is_some());
        if is_reply {
            if let Ok(resp) = serde_json::from_value::<JsonRpcResponse>(value.clone()) {
                return Self::Response(resp);
            }
        }
        Self::Unrecognized(value)
    }
}
