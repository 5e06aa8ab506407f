use events::EventPublisher;
use log::*;
use migration::{Migrator, MigratorTrait};
use presence::dead_letter::DeadLetterLog;
use presence::event_handler::LoggingEventHandler;
use presence::retry::RetryPolicy;
use presence::sink::{MessageStore, PersistenceSink, SinkConfig};
use presence::store::DatabaseMessageStore;
use presence::Manager;
use service::{config::Config, logging::Logger, AppState};
use std::error::Error;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = get_config();

    Logger::init_logger(&config)?;
    info!("Starting up chat relay in {} mode...", config.runtime_env());

    let db = Arc::new(service::init_database(&config).await?);

    info!("Applying pending database migrations...");
    Migrator::up(db.as_ref(), None).await?;

    let publisher = EventPublisher::new().with_handler(Arc::new(LoggingEventHandler::new()));

    let store: Arc<dyn MessageStore> = Arc::new(DatabaseMessageStore::new(Arc::clone(&db)));
    let dead_letters = DeadLetterLog::to_file(&config.dead_letter_path);
    if let Some(path) = dead_letters.path() {
        info!("Dead-lettered messages are appended to {}", path.display());
    }
    let (sink, sink_worker) = PersistenceSink::spawn(
        store,
        sink_config(&config),
        dead_letters,
        publisher.clone(),
    );

    let relay = Arc::new(
        Manager::new(sink, publisher)
            .notify_unresolved_recipient(config.notify_unresolved_recipient),
    );

    let app_state = web::AppState::new(AppState::new(config, &db), relay);

    web::init_server(app_state, shutdown_signal()).await?;

    info!("Server stopped, flushing pending message writes...");
    sink_worker.shutdown().await;
    info!("Chat relay shut down");

    Ok(())
}

fn get_config() -> Config {
    Config::new()
}

fn sink_config(config: &Config) -> SinkConfig {
    SinkConfig {
        queue_capacity: config.persistence_queue_capacity,
        concurrency: config.persistence_concurrency,
        retry: RetryPolicy::new(
            config.persistence_max_retries,
            config.persistence_base_delay(),
            config.persistence_max_delay(),
        ),
        enqueue_timeout: config.persistence_enqueue_timeout(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        // Without a signal handler, keep serving until the process is killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
