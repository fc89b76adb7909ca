#![allow(dead_code)]

use std::sync::Arc;

use time::OffsetDateTime;

use kvlite::cache::{Cache, CacheConfig};
use kvlite::clock::FakeClock;
use kvlite::factory::sqlite::SqliteConnectionFactory;
use kvlite::value::{DeflateCompressor, JsonSerializer};

#[ctor::ctor]
fn init() {
    let filter = tracing_subscriber::filter::EnvFilter::from_default_env()
        .add_directive("kvlite=debug".parse().unwrap());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// An engine over a private in-memory database, driven by a fake clock.
pub struct TestCache {
    pub cache: Cache,
    pub clock: Arc<FakeClock>,
    pub factory: Arc<SqliteConnectionFactory>,
}

pub fn cache_at(start_seconds: i64) -> TestCache {
    cache_with_config(start_seconds, CacheConfig::default())
}

pub fn cache_with_config(start_seconds: i64, config: CacheConfig) -> TestCache {
    let factory = Arc::new(SqliteConnectionFactory::in_memory().unwrap());
    let clock = Arc::new(FakeClock::new(start_seconds));
    let factory_service: Arc<dyn kvlite::factory::ConnectionFactory> = factory.clone() as Arc<dyn kvlite::factory::ConnectionFactory>;
    let clock_service: Arc<dyn kvlite::clock::Clock> = clock.clone() as Arc<dyn kvlite::clock::Clock>;
    let cache = Cache::with_services(
        factory_service,
        config,
        clock_service,
        Arc::new(JsonSerializer),
        Arc::new(DeflateCompressor::default()),
    )
    .unwrap();
    TestCache {
        cache,
        clock,
        factory,
    }
}

pub fn at(unix_seconds: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix_seconds).unwrap()
}
