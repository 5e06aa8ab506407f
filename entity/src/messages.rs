//! SeaORM Entity for the messages table.
//! One row per routed message, written behind delivery by the persistence sink.

use crate::delivery_mode::DeliveryMode;
use crate::Id;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[schema(as = entity::messages::Model)]
#[sea_orm(schema_name = "chat_relay", table_name = "messages")]
pub struct Model {
    /// Assigned by the router when the message is constructed, so that
    /// retried writes stay idempotent.
    #[sea_orm(primary_key, auto_increment = false)]
    #[schema(value_type = String, format = Uuid)]
    pub id: Id,

    /// Opaque client payload, stored as sent.
    #[schema(value_type = Object)]
    #[sea_orm(column_type = "JsonBinary")]
    pub content: Json,

    pub delivery_mode: DeliveryMode,

    /// The sender's registered identity, or its connection id when it had
    /// registered none.
    pub sender: String,

    /// Present only for direct deliveries.
    pub recipient_identity: Option<String>,

    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
