use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                "DO $$ BEGIN
                    CREATE TYPE chat_relay.delivery_mode AS ENUM ('broadcast', 'direct');
                EXCEPTION
                    WHEN duplicate_object THEN NULL;
                END $$;",
            )
            .await?;

        // Raw SQL keeps the schema qualification explicit
        let create_table_sql = "CREATE TABLE IF NOT EXISTS chat_relay.messages (
            id UUID PRIMARY KEY,
            content JSONB NOT NULL,
            delivery_mode chat_relay.delivery_mode NOT NULL,
            sender VARCHAR NOT NULL,
            recipient_identity VARCHAR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            CONSTRAINT messages_direct_has_recipient
                CHECK (delivery_mode <> 'direct' OR recipient_identity IS NOT NULL)
        )";

        manager
            .get_connection()
            .execute_unprepared(create_table_sql)
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS messages_created_at_idx
                    ON chat_relay.messages(created_at DESC)",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS chat_relay.messages")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP TYPE IF EXISTS chat_relay.delivery_mode")
            .await?;

        Ok(())
    }
}
