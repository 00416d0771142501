//! Database abstraction layer.
//!
//! The scheduler talks to persistence only through [`ScheduleStore`] and
//! [`RunStore`]. Two backends exist:
//! - **memory**: process-local maps, for tests and throwaway runs
//! - **sqlite**: a single durable file (feature `sqlite`)

pub mod repository;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

pub use repository::{InMemoryStore, RunStore, ScheduleStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::config::{DatabaseConfig, DatabaseDriver};

/// Handles to both repositories.
#[derive(Clone)]
pub struct Stores {
    pub schedules: Arc<dyn ScheduleStore>,
    pub runs: Arc<dyn RunStore>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

impl Stores {
    /// Both repositories backed by one store value.
    pub fn shared<S>(store: S) -> Self
    where
        S: ScheduleStore + RunStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            schedules: Arc::clone(&store) as Arc<dyn ScheduleStore>,
            runs: store,
        }
    }
}

/// Create the repositories from configuration.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, or if the `sqlite`
/// driver is requested in a build without the `sqlite` feature.
pub async fn create_stores(config: &DatabaseConfig) -> anyhow::Result<Stores> {
    match config.driver {
        DatabaseDriver::Memory => {
            tracing::warn!("Using in-memory store; schedules will not survive a restart");
            Ok(Stores::shared(InMemoryStore::new()))
        }
        #[cfg(feature = "sqlite")]
        DatabaseDriver::Sqlite => {
            let store = SqliteStore::new(config.path.clone()).await?;
            tracing::info!(path = %config.path.display(), "Opened SQLite store");
            Ok(Stores::shared(store))
        }
        #[cfg(not(feature = "sqlite"))]
        DatabaseDriver::Sqlite => {
            anyhow::bail!("The sqlite driver requires building with the `sqlite` feature")
        }
    }
}
