use crate::connection::{ConnectionId, UserIdentity};
use crate::error::Error;
use chrono::{DateTime, Utc};
use entity_api::{delivery_mode::DeliveryMode, messages, Id};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events a client sends over its connection.
///
/// Frames are JSON objects of the form `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Inbound {
    /// Claim a logical identity for this connection.
    #[serde(rename = "register")]
    Register(UserIdentity),
    /// Deliver to every other registered connection. Older clients emit this
    /// as plain `message`.
    #[serde(rename = "broadcast_message", alias = "message")]
    Broadcast(Value),
    /// Deliver to the connection currently registered under one identity.
    #[serde(rename = "sendMessage")]
    Direct(DirectMessage),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub recipient_identity: UserIdentity,
    pub content: Value,
}

impl Inbound {
    /// Decode one text frame.
    pub fn parse(frame: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Events the relay pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum Outbound {
    /// Broadcast delivery.
    #[serde(rename = "message")]
    Broadcast(Value),
    /// Direct delivery.
    #[serde(rename = "receiveMessage")]
    Direct(Value),
    /// Sent back to the sender of a direct message nobody could receive, when
    /// the relay is configured to say so.
    #[serde(rename = "recipientUnavailable")]
    RecipientUnavailable {
        #[serde(rename = "recipientIdentity")]
        recipient_identity: UserIdentity,
    },
}

impl Outbound {
    pub fn to_frame(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A routed message. Built once by the router, then handed to the transport
/// for delivery and to the persistence sink for storage; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: Id,
    pub content: Value,
    pub delivery_mode: DeliveryMode,
    pub sender_connection: ConnectionId,
    /// Most recent identity the sender registered and still owns, if any.
    pub sender_identity: Option<UserIdentity>,
    /// Set iff `delivery_mode` is `Direct`.
    pub recipient_identity: Option<UserIdentity>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn broadcast(
        content: Value,
        sender_connection: ConnectionId,
        sender_identity: Option<UserIdentity>,
    ) -> Self {
        Self {
            id: Id::new_v4(),
            content,
            delivery_mode: DeliveryMode::Broadcast,
            sender_connection,
            sender_identity,
            recipient_identity: None,
            timestamp: Utc::now(),
        }
    }

    pub fn direct(
        content: Value,
        sender_connection: ConnectionId,
        sender_identity: Option<UserIdentity>,
        recipient_identity: UserIdentity,
    ) -> Self {
        Self {
            id: Id::new_v4(),
            content,
            delivery_mode: DeliveryMode::Direct,
            sender_connection,
            sender_identity,
            recipient_identity: Some(recipient_identity),
            timestamp: Utc::now(),
        }
    }

    /// The frame recipients receive for this message.
    pub fn outbound(&self) -> Outbound {
        match self.delivery_mode {
            DeliveryMode::Broadcast => Outbound::Broadcast(self.content.clone()),
            DeliveryMode::Direct => Outbound::Direct(self.content.clone()),
        }
    }

    /// The sender as recorded in storage: its identity, or its connection id
    /// when it never registered one.
    pub fn sender_label(&self) -> String {
        self.sender_identity
            .clone()
            .unwrap_or_else(|| self.sender_connection.to_string())
    }
}

impl From<&Message> for messages::Model {
    fn from(message: &Message) -> Self {
        messages::Model {
            id: message.id,
            content: message.content.clone(),
            delivery_mode: message.delivery_mode,
            sender: message.sender_label(),
            recipient_identity: message.recipient_identity.clone(),
            created_at: message.timestamp.into(),
        }
    }
}
