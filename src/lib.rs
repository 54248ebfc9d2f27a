use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod app_state;
pub mod certificates;
pub mod config;
pub mod database;
pub mod devices;
pub mod payloads;
pub mod routes;
pub mod settings;
pub mod soap;
mod storage;
pub mod users;

pub use app_state::AppState;
pub use config::Config;

/// Locks a mutex, carrying on with the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
