//! Process wiring: primary connection, producer and consumer roles.

use crate::consumer::{spawn_consumer, Consumer, Publisher};
use crate::handlers::{ContactChatHandler, StoreHandler};
use crate::heartbeat::HeartbeatHandler;
use anyhow::{Context, Result};
use std::sync::Arc;
use takbridge_api::{serve, ApiState, Authenticator};
use takbridge_client::{TakConnection, TakConnectionConfig};
use takbridge_core::AppConfig;
use takbridge_pool::{ContactBook, TlsContactFactory, DEFAULT_SWEEP_INTERVAL};
use takbridge_store::{CotStore, HttpFileFetcher, StoreOptions};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A running bridge.
pub struct Bridge {
    primary: TakConnection,
    contacts: Option<ContactBook>,
    store: Option<CotStore>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Bridge {
    /// Opens storage, connects to TAK and starts every enabled role.
    ///
    /// The TAK connection retries in the background, so an unreachable
    /// server does not fail startup.
    pub async fn start(config: AppConfig) -> Result<Self> {
        let connection_config =
            TakConnectionConfig::from_tak(&config.tak).context("Invalid TAK endpoint")?;
        let primary = TakConnection::tls(connection_config.clone()).context("Failed to load TAK credentials")?;
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let store = match config.producer() {
            Some(producer) => {
                let mut options = StoreOptions::from_producer(producer);
                match HttpFileFetcher::from_tak(&config.tak) {
                    Ok(fetcher) => options = options.with_fetcher(Arc::new(fetcher)),
                    Err(e) => warn!(error = %e, "File-share downloads disabled"),
                }
                let store = CotStore::open(options).context("Failed to open CoT store")?;
                store.start_eviction(producer.eviction_interval());

                let listener = TcpListener::bind(producer.bind_addr())
                    .await
                    .with_context(|| format!("Failed to bind {}", producer.bind_addr()))?;
                let state = ApiState {
                    store: store.clone(),
                    auth: Authenticator::from_producer(producer, config.dev),
                };
                let token = shutdown.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = serve(listener, state, async move { token.cancelled().await }).await {
                        error!(error = %e, "Query API failed");
                    }
                }));
                Some(store)
            }
            None => None,
        };

        if let Some(store) = &store {
            let _ = primary.subscribe(Arc::new(StoreHandler::new(store.clone())));
        }
        let _ = primary.subscribe(Arc::new(HeartbeatHandler::new(primary.clone(), config.tak.clone())));

        let contacts = match config.consumer() {
            Some(consumer_config) => {
                let mut factory = TlsContactFactory::new(connection_config);
                if let Some(store) = &store {
                    factory = factory.with_handler(Arc::new(ContactChatHandler::new(store.clone())));
                }
                let contacts = ContactBook::new(Arc::new(factory));
                contacts.start(DEFAULT_SWEEP_INTERVAL);

                let consumer = Consumer::from_config(&config.tak, consumer_config)
                    .context("Failed to open dedup ledger")?;
                let publisher = Publisher::new(primary.clone(), contacts.clone(), &config.tak);
                tasks.push(spawn_consumer(consumer, publisher, shutdown.clone()));
                Some(contacts)
            }
            None => None,
        };

        primary.connect_or_retry().await;
        info!(
            connection_id = %primary.connection_id(),
            producer = store.is_some(),
            consumer = contacts.is_some(),
            "Bridge started"
        );

        Ok(Self {
            primary,
            contacts,
            store,
            shutdown,
            tasks,
        })
    }

    pub fn primary(&self) -> &TakConnection {
        &self.primary
    }

    /// Stops every role and waits for background tasks to finish.
    pub async fn shutdown(self) {
        info!("Shutting down");
        self.shutdown.cancel();
        self.primary.stop();
        if let Some(contacts) = &self.contacts {
            contacts.stop();
        }
        if let Some(store) = &self.store {
            store.stop_eviction();
            store.flush_transfers().await;
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
            }
        }
        info!("Shutdown complete");
    }
}
