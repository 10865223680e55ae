//! Connection lifecycle and raw engine helpers.
//!
//! ```text
//! Uninitialized --first call--> Connecting --open ok--> Ready
//!                                    |
//!                                    +--open error--> Failed --next call--> Connecting
//! ```
//!
//! The open runs while the slot mutex is held, so concurrent callers wait on
//! the attempt already in flight instead of opening the environment twice.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use lmdb::{Cursor, Database, Environment, RwTransaction, Transaction, WriteFlags};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::StoreConfig;
use crate::schema::{self, Stores};
use crate::store_error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Ready,
    Failed,
}

/// An open LMDB environment with its store handles.
///
/// The environment is closed when the last `Arc<Connection>` is dropped.
pub(crate) struct Connection {
    pub(crate) env: Environment,
    pub(crate) stores: Stores,
}

impl Connection {
    pub(crate) fn new(env: Environment, stores: Stores) -> Self {
        Self { env, stores }
    }
}

pub(crate) struct Connector {
    config: StoreConfig,
    slot: Mutex<Option<Arc<Connection>>>,
    state: RwLock<ConnectionState>,
    attempts: AtomicUsize,
}

impl Connector {
    pub(crate) fn new(config: StoreConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
            state: RwLock::new(ConnectionState::Uninitialized),
            attempts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    /// Live connection, opening the environment if there is none.
    pub(crate) async fn acquire(&self) -> StoreResult<Arc<Connection>> {
        let mut slot = self.slot.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(Arc::clone(connection));
        }

        let connection = self.open_into(&mut slot, false).await?;
        Ok(connection)
    }

    /// Drop the connection; the next call reconnects.
    pub(crate) async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.take() {
            if Arc::strong_count(&previous) > 1 {
                warn!("Closing record store while operations are still in flight");
            }
            info!("Closed record store at {}", self.config.path.display());
        }
        self.set_state(ConnectionState::Uninitialized);
    }

    /// Delete every stored record by removing the environment, then reopen.
    pub(crate) async fn reset(&self) -> StoreResult<()> {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.take() {
            if Arc::strong_count(&previous) > 1 {
                warn!("Resetting record store while operations are still in flight");
            }
        }

        self.open_into(&mut slot, true).await?;
        info!("Record store at {} was reset", self.config.path.display());
        Ok(())
    }

    async fn open_into(
        &self,
        slot: &mut Option<Arc<Connection>>,
        wipe: bool,
    ) -> StoreResult<Arc<Connection>> {
        self.set_state(ConnectionState::Connecting);
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let config = self.config.clone();
        let opened = tokio::task::spawn_blocking(move || {
            if wipe && config.path.exists() {
                fs::remove_dir_all(&config.path).map_err(|e| {
                    StoreError::connection(&format!("cannot delete {}", config.path.display()), e)
                })?;
            }
            schema::open(&config)
        })
        .await
        .map_err(|e| StoreError::connection("open task did not complete", e))
        .and_then(|result| result);

        match opened {
            Ok(connection) => {
                let connection = Arc::new(connection);
                *slot = Some(Arc::clone(&connection));
                self.set_state(ConnectionState::Ready);
                info!("Record store ready at {}", self.config.path.display());
                Ok(connection)
            }
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                warn!("Failed to open record store at {}: {e}", self.config.path.display());
                Err(e)
            }
        }
    }
}

pub(crate) fn read_json<T, Txn>(txn: &Txn, db: Database, key: &[u8]) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    Txn: Transaction,
{
    match txn.get(db, &key) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn read_raw<Txn: Transaction>(
    txn: &Txn,
    db: Database,
    key: &[u8],
) -> StoreResult<Option<Vec<u8>>> {
    match txn.get(db, &key) {
        Ok(bytes) => Ok(Some(bytes.to_vec())),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn write_json<T: Serialize>(
    txn: &mut RwTransaction<'_>,
    db: Database,
    key: &[u8],
    value: &T,
) -> StoreResult<()> {
    let bytes = serde_json::to_vec(value)?;
    txn.put(db, &key, &bytes, WriteFlags::empty())?;
    Ok(())
}

/// Delete `key`; `Ok(false)` if it was not present.
pub(crate) fn delete_key(txn: &mut RwTransaction<'_>, db: Database, key: &[u8]) -> StoreResult<bool> {
    match txn.del(db, &key, None) {
        Ok(()) => Ok(true),
        Err(lmdb::Error::NotFound) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Every entry whose key starts with `prefix`, in key order.
/// An empty prefix returns the whole store; an empty store returns nothing.
pub(crate) fn scan_prefix<Txn: Transaction>(
    txn: &Txn,
    db: Database,
    prefix: &[u8],
) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut cursor = txn.open_ro_cursor(db)?;
    let entries = cursor
        .iter()
        .skip_while(|(key, _)| *key < prefix)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.to_vec(), value.to_vec()))
        .collect();
    Ok(entries)
}

/// Delete every entry whose key starts with `prefix`. Returns the count.
pub(crate) fn delete_prefix(
    txn: &mut RwTransaction<'_>,
    db: Database,
    prefix: &[u8],
) -> StoreResult<usize> {
    let doomed: Vec<Vec<u8>> = scan_prefix(&*txn, db, prefix)?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    for key in &doomed {
        delete_key(txn, db, key)?;
    }
    Ok(doomed.len())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn create_test_connector() -> (TempDir, Connector) {
        let dir = TempDir::new().expect("create temp dir");
        let config =
            StoreConfig::new(dir.path().join("optometry.lmdb")).with_map_size(16 * 1024 * 1024);
        (dir, Connector::new(config))
    }

    #[tokio::test]
    async fn scan_of_empty_store_is_empty() {
        let (_dir, connector) = create_test_connector();
        let connection = connector.acquire().await.unwrap();
        assert_eq!(connector.state(), ConnectionState::Ready);

        let txn = connection.env.begin_ro_txn().unwrap();
        assert!(scan_prefix(&txn, connection.stores.users, &[]).unwrap().is_empty());
        assert!(scan_prefix(&txn, connection.stores.sections, b"e1\0").unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_while_connection_is_held_reopens_on_next_acquire() {
        let (_dir, connector) = create_test_connector();
        let held = connector.acquire().await.unwrap();

        connector.close().await;
        assert_eq!(connector.state(), ConnectionState::Uninitialized);
        assert_eq!(Arc::strong_count(&held), 1);
        drop(held);

        let reopened = connector.acquire().await.unwrap();
        assert_eq!(connector.state(), ConnectionState::Ready);
        assert_eq!(connector.attempts(), 2);
        assert_eq!(Arc::strong_count(&reopened), 2);
    }
}
