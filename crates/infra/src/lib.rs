//! Infrastructure layer: storage, audit sink, configuration.

pub mod audit;
pub mod config;
pub mod stock_store;


pub use audit::{ActionRecorder, InMemoryActionRecorder, RecordedAction, TracingActionRecorder};
pub use config::{ConfigError, StoreConfig};
pub use stock_store::{InMemoryStockStore, PostgresStockStore, StockStore, StoreError};
