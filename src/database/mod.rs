mod connections;
mod error;
mod models;
mod schema;
mod stores;

pub use connections::Database;
pub use error::StoreError;
