use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How a routed message was fanned out.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, EnumIter, Deserialize, Serialize, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "delivery_mode")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Delivered to every other registered connection.
    #[sea_orm(string_value = "broadcast")]
    Broadcast,
    /// Delivered to the single connection registered under the recipient identity.
    #[sea_orm(string_value = "direct")]
    Direct,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Broadcast => write!(fmt, "broadcast"),
            DeliveryMode::Direct => write!(fmt, "direct"),
        }
    }
}
