//! Relay wire frames.
//!
//! Every message on the relay socket is one JSON object discriminated by
//! its `type` field. Inbound and outbound frames are separate enums so the
//! dispatcher's `match` is exhaustive over exactly what the relay may send.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{GraphqlOperation, ProxyEvent, SubscriptionId};
use crate::error::RelayError;

/// Frames the relay sends to this device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundFrame {
    /// Read request to forward to the local API.
    Query {
        /// Correlation id echoed on the reply.
        #[serde(default)]
        id: Option<Value>,
        /// Operation to execute.
        payload: GraphqlOperation,
    },
    /// Write request to forward to the local API.
    Mutation {
        /// Correlation id echoed on the reply.
        #[serde(default)]
        id: Option<Value>,
        /// Operation to execute.
        payload: GraphqlOperation,
    },
    /// Keepalive from the relay; answered with `pong`.
    Ping,
    /// Keepalive reply from the relay.
    Pong,
    /// Pushed update applied to the local mirror cache.
    ProxyData {
        /// Topic and document.
        payload: ProxyEvent,
    },
    /// Push update for a subscription this device started.
    Data {
        /// Subscription the update belongs to.
        #[serde(default)]
        id: Option<SubscriptionId>,
        /// Update body.
        payload: Value,
    },
}

impl InboundFrame {
    /// Parses one text message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Protocol`] for malformed JSON or an unknown
    /// `type` tag.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(|e| RelayError::Protocol(e.to_string()))
    }

    /// Returns the `type` tag, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::Mutation { .. } => "mutation",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::ProxyData { .. } => "proxy-data",
            Self::Data { .. } => "data",
        }
    }
}

/// Frames this device sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundFrame {
    /// Keepalive reply.
    Pong,
    /// Opens a relay-side subscription.
    Start {
        /// Content-derived subscription id.
        id: SubscriptionId,
        /// Subscribed operation.
        payload: GraphqlOperation,
    },
    /// Closes a relay-side subscription.
    Stop {
        /// Subscription to close.
        id: SubscriptionId,
    },
    /// Reply to a proxied `query` / `mutation`.
    Data {
        /// Correlation id copied from the request, if it had one.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        /// GraphQL response body from the local API.
        payload: Value,
    },
}

impl OutboundFrame {
    /// Serializes the frame to its wire text.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Json`] if a payload cannot be encoded.
    pub fn to_text(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> InboundFrame {
        match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => panic!("failed to parse {text}: {e}"),
        }
    }

    #[test]
    fn parses_query_without_id() {
        let frame = parse(r#"{"type":"query","payload":{"query":"{ping}"}}"#);
        assert_eq!(
            frame,
            InboundFrame::Query {
                id: None,
                payload: GraphqlOperation::new("{ping}"),
            }
        );
    }

    #[test]
    fn parses_mutation_with_id_and_variables() {
        let frame = parse(
            r#"{"type":"mutation","id":7,"payload":{"query":"mutation($n:Int){x(n:$n)}","variables":{"n":1}}}"#,
        );
        let InboundFrame::Mutation { id, payload } = frame else {
            panic!("expected mutation");
        };
        assert_eq!(id, Some(json!(7)));
        assert_eq!(payload.variables, Some(json!({"n": 1})));
    }

    #[test]
    fn parses_keepalives() {
        assert_eq!(parse(r#"{"type":"ping"}"#), InboundFrame::Ping);
        assert_eq!(parse(r#"{"type":"pong"}"#), InboundFrame::Pong);
    }

    #[test]
    fn parses_proxy_data() {
        let frame = parse(
            r#"{"type":"proxy-data","payload":{"topic":"servers","data":[{"name":"Tower","guid":"ABCD"}]}}"#,
        );
        let InboundFrame::ProxyData { payload } = frame else {
            panic!("expected proxy-data");
        };
        assert_eq!(payload.topic, "servers");
        assert_eq!(payload.data, json!([{"name": "Tower", "guid": "ABCD"}]));
    }

    #[test]
    fn parses_subscription_data() {
        let frame = parse(r#"{"type":"data","id":"abc","payload":{"data":{"n":1}}}"#);
        assert_eq!(frame.kind(), "data");
        let InboundFrame::Data { id, .. } = frame else {
            panic!("expected data");
        };
        assert_eq!(id, Some(SubscriptionId::from_wire("abc")));
    }

    #[test]
    fn unknown_type_is_protocol_error() {
        let result = InboundFrame::parse(r#"{"type":"teleport"}"#);
        assert!(matches!(result, Err(RelayError::Protocol(_))));
        let result = InboundFrame::parse("not json");
        assert!(matches!(result, Err(RelayError::Protocol(_))));
    }

    #[test]
    fn pong_wire_format() {
        assert_eq!(OutboundFrame::Pong.to_text().ok().as_deref(), Some(r#"{"type":"pong"}"#));
    }

    #[test]
    fn data_reply_without_id_matches_wire_format() {
        let frame = OutboundFrame::Data {
            id: None,
            payload: json!({"data": {"ping": "pong"}}),
        };
        assert_eq!(
            frame.to_text().ok().as_deref(),
            Some(r#"{"type":"data","payload":{"data":{"ping":"pong"}}}"#)
        );
    }

    #[test]
    fn start_and_stop_carry_id() {
        let op = GraphqlOperation::new("subscription { servers }");
        let id = op.content_id();
        let start = serde_json::to_value(OutboundFrame::Start {
            id: id.clone(),
            payload: op,
        })
        .unwrap_or_default();
        assert_eq!(start.get("type"), Some(&json!("start")));
        assert_eq!(start.get("id"), Some(&json!(id.as_str())));

        let stop = serde_json::to_value(OutboundFrame::Stop { id }).unwrap_or_default();
        assert_eq!(stop.get("type"), Some(&json!("stop")));
    }
}
