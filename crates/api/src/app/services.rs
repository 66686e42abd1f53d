//! Dependency wiring: stores, broker, rate chain and the components built on them.
//!
//! `DATABASE_URL` selects Postgres stores (in-memory otherwise); `REDIS_URL`
//! selects the Redis Streams broker when built with the `redis` feature.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use ratewatch_core::CurrencyCode;
use ratewatch_events::{InMemoryBroker, MessageReader, MessageWriter};
use ratewatch_infra::config::AppConfig;
use ratewatch_infra::consumer::Consumer;
use ratewatch_infra::ledger::{ConsumedEventLedger, InMemoryLedger, PostgresLedger};
use ratewatch_infra::notifier::Notifier;
use ratewatch_infra::outbox::{InMemoryOutboxStore, OutboxStore, PostgresOutboxStore};
use ratewatch_infra::publisher::{Publisher, PublisherConfig};
use ratewatch_infra::rate_api::{self, RateFetcher};
use ratewatch_infra::saga::{
    InMemorySagaStateStore, PostgresSagaStateStore, SagaStateStore, SubscriptionSaga,
};
use ratewatch_infra::sender::{LogSender, RateEmail, Sender};
use ratewatch_infra::subscriptions::{
    InMemorySubscriptionStore, PostgresSubscriptionStore, SubscriptionStore,
};
use ratewatch_infra::db;

/// Persistence backends.
#[derive(Clone)]
pub struct Stores {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub saga_states: Arc<dyn SagaStateStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub ledger: Arc<dyn ConsumedEventLedger>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            saga_states: Arc::new(InMemorySagaStateStore::new()),
            outbox: Arc::new(InMemoryOutboxStore::new()),
            ledger: Arc::new(InMemoryLedger::new()),
        }
    }

    pub async fn postgres(database_url: &str) -> anyhow::Result<Self> {
        let pool = db::connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        db::migrate(&pool).await.context("failed to create schema")?;

        Ok(Self {
            subscriptions: Arc::new(PostgresSubscriptionStore::new(pool.clone())),
            saga_states: Arc::new(PostgresSagaStateStore::new(pool.clone())),
            outbox: Arc::new(PostgresOutboxStore::new(pool.clone())),
            ledger: Arc::new(PostgresLedger::new(pool)),
        })
    }
}

/// Both ends of the broker, bound to the configured topic/partition.
pub struct BrokerEnds {
    pub writer: Arc<dyn MessageWriter>,
    pub reader: Box<dyn MessageReader>,
}

impl BrokerEnds {
    pub fn in_memory(config: &AppConfig) -> anyhow::Result<Self> {
        let broker = InMemoryBroker::new();
        let reader = broker
            .reader(&config.consumer_group, &config.topic, config.partition)
            .context("failed to open in-memory reader")?;
        Ok(Self {
            writer: broker,
            reader: Box::new(reader),
        })
    }

    #[cfg(feature = "redis")]
    pub async fn redis(config: &AppConfig, redis_url: &str) -> anyhow::Result<Self> {
        use ratewatch_infra::broker::{RedisStreamsReader, RedisStreamsWriter};

        let writer = RedisStreamsWriter::connect(redis_url)
            .await
            .context("failed to connect Redis writer")?;
        let reader = RedisStreamsReader::connect(
            redis_url,
            &config.consumer_group,
            &config.consumer_name,
            &config.topic,
            config.partition,
        )
        .await
        .context("failed to connect Redis reader")?;

        Ok(Self {
            writer: Arc::new(writer),
            reader: Box::new(reader),
        })
    }
}

/// What the HTTP handlers need.
#[derive(Clone)]
pub struct AppServices {
    pub fetcher: Arc<dyn RateFetcher>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub saga: Arc<SubscriptionSaga>,
    pub notifier: Arc<Notifier>,
    pub base: CurrencyCode,
    pub target: CurrencyCode,
}

impl AppServices {
    pub fn new(stores: &Stores, fetcher: Arc<dyn RateFetcher>, config: &AppConfig) -> Self {
        let notifier = Notifier::new(
            Arc::clone(&fetcher),
            Arc::clone(&stores.subscriptions),
            Arc::clone(&stores.outbox),
            config.base.clone(),
            config.target.clone(),
        )
        .with_batch_size(config.batch_size);

        Self {
            fetcher,
            subscriptions: Arc::clone(&stores.subscriptions),
            saga: Arc::new(SubscriptionSaga::new(
                Arc::clone(&stores.subscriptions),
                Arc::clone(&stores.saga_states),
            )),
            notifier: Arc::new(notifier),
            base: config.base.clone(),
            target: config.target.clone(),
        }
    }
}

/// Everything `main` starts: HTTP services plus the two background loops.
pub struct Runtime {
    pub services: AppServices,
    pub publisher: Publisher,
    pub consumer: Consumer,
}

pub async fn build_runtime(config: &AppConfig) -> anyhow::Result<Runtime> {
    let stores = match &config.database_url {
        Some(url) => {
            info!("using Postgres stores");
            Stores::postgres(url).await?
        }
        None => {
            info!("DATABASE_URL not set; using in-memory stores");
            Stores::in_memory()
        }
    };

    let broker = build_broker(config).await?;

    let client = rate_api::http_client(config.rate_http_timeout)
        .context("failed to build HTTP client")?;
    let fetcher: Arc<dyn RateFetcher> = Arc::new(rate_api::default_chain(client));
    let sender: Arc<dyn Sender> = Arc::new(LogSender);

    let publisher = Publisher::new(
        Arc::clone(&stores.outbox),
        broker.writer,
        PublisherConfig {
            topic: config.topic.clone(),
            partition: config.partition,
            interval: config.publish_interval,
            retention: config.outbox_retention,
        },
    );
    let consumer = Consumer::new(
        broker.reader,
        Arc::clone(&stores.ledger),
        sender,
        RateEmail::new(config.base.clone(), config.target.clone()),
    );

    Ok(Runtime {
        services: AppServices::new(&stores, fetcher, config),
        publisher,
        consumer,
    })
}

#[cfg(feature = "redis")]
async fn build_broker(config: &AppConfig) -> anyhow::Result<BrokerEnds> {
    match &config.redis_url {
        Some(url) => {
            info!("using Redis Streams broker");
            BrokerEnds::redis(config, url).await
        }
        None => {
            info!("REDIS_URL not set; using in-memory broker");
            BrokerEnds::in_memory(config)
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn build_broker(config: &AppConfig) -> anyhow::Result<BrokerEnds> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; using in-memory broker");
    }
    BrokerEnds::in_memory(config)
}
