//! Persistence operations for the messages table.

use super::error::Error;
use entity::messages::{ActiveModel, Column, Entity, Model};
use log::*;
use sea_orm::{
    entity::prelude::*, sea_query::OnConflict, ActiveValue::Set, DatabaseConnection, QueryOrder,
    QuerySelect,
};

/// Upper bound on the number of rows `find_recent` will return.
pub const MAX_RECENT: u64 = 200;

/// Inserts a routed message. The row id is chosen by the caller, so writing
/// the same message twice is harmless: the second insert is ignored.
///
/// Returns `true` when a new row was written, `false` when the message had
/// already been stored by an earlier attempt.
pub async fn create(db: &DatabaseConnection, message_model: Model) -> Result<bool, Error> {
    debug!(
        "Persisting {} message {} from {}",
        message_model.delivery_mode, message_model.id, message_model.sender
    );

    let active_model = ActiveModel {
        id: Set(message_model.id),
        content: Set(message_model.content),
        delivery_mode: Set(message_model.delivery_mode),
        sender: Set(message_model.sender),
        recipient_identity: Set(message_model.recipient_identity),
        created_at: Set(message_model.created_at),
    };

    let rows_affected = Entity::insert(active_model)
        .on_conflict(OnConflict::column(Column::Id).do_nothing().to_owned())
        .exec_without_returning(db)
        .await?;

    Ok(rows_affected > 0)
}

/// Returns the most recent messages, newest first, capped at [`MAX_RECENT`].
pub async fn find_recent(db: &DatabaseConnection, limit: u64) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .order_by_desc(Column::CreatedAt)
        .limit(limit.min(MAX_RECENT))
        .all(db)
        .await?)
}
