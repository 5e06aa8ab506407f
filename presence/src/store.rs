use crate::error::Error;
use crate::message::Message;
use crate::sink::MessageStore;
use async_trait::async_trait;
use entity_api::message as MessageApi;
use log::*;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// [`MessageStore`] backed by the `messages` table.
pub struct DatabaseMessageStore {
    db: Arc<DatabaseConnection>,
}

impl DatabaseMessageStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for DatabaseMessageStore {
    async fn save(&self, message: &Message) -> Result<(), Error> {
        let inserted = MessageApi::create(self.db.as_ref(), message.into()).await?;
        if !inserted {
            debug!("Message {} was already stored", message.id);
        }
        Ok(())
    }
}
