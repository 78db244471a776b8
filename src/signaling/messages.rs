use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use super::types::{ClientId, ClientInfo, OutboundMessage, SignalingError};

/// Where an inbound message should be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Only the named client
    Direct(ClientId),
    /// Every connected client except the sender
    Broadcast,
}

/// Message received from a client.
///
/// The object is kept as the exact text the client sent; only `recipient`
/// is read from it.
#[derive(Debug)]
pub struct InboundMessage {
    route: Route,
    body: Box<RawValue>,
}

#[derive(Deserialize)]
struct RecipientField {
    recipient: Option<Value>,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        let body: Box<RawValue> = serde_json::from_str(text)
            .map_err(|e| SignalingError::MalformedMessage(e.to_string()))?;

        if !body.get().trim_start().starts_with('{') {
            return Err(SignalingError::MalformedMessage(
                "expected a JSON object".to_string(),
            ));
        }

        let field: RecipientField = serde_json::from_str(body.get())
            .map_err(|e| SignalingError::MalformedMessage(e.to_string()))?;

        let route = match field.recipient {
            Some(value) if is_truthy(&value) => match value {
                Value::String(s) => Route::Direct(ClientId::from(s.as_str())),
                // numbers and other values name a client by their text form
                other => Route::Direct(ClientId::from(other.to_string().as_str())),
            },
            _ => Route::Broadcast,
        };

        Ok(Self { route, body })
    }

    pub fn into_parts(self) -> (Route, Box<RawValue>) {
        (self.route, self.body)
    }
}

/// `null`, `false`, `0` and `""` name no recipient.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Messages sent from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Current membership, sent to everyone after each connect/disconnect
    #[serde(rename = "client_list")]
    ClientList {
        current_client_id: ClientId,
        clients: Vec<ClientInfo>,
        connection_number: usize,
    },

    /// Relayed message, `message` is the sender's original object
    #[serde(rename = "signal")]
    Signal {
        sender: ClientId,
        message: Box<RawValue>,
    },
}

impl ServerMessage {
    pub fn to_outbound(&self) -> Result<OutboundMessage, SignalingError> {
        Ok(OutboundMessage::from(serde_json::to_string(self)?))
    }
}
