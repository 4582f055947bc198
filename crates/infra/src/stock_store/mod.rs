//! Stock ledger storage.

mod in_memory;
mod postgres;
mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use r#trait::{StockStore, StoreError};
