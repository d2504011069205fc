//! Persisted world state.
//!
//! A snapshot holds the minimal durable state: every village (stock and
//! last-calculated instant, slots with their pending orders, loyalty,
//! garrison) plus the orders still in transit. It is written as JSON.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Timestamp;
use crate::game::Village;
use crate::travel::DispatchOrder;

/// Errors that can occur while saving or loading snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// I/O error.
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The file is not a valid snapshot.
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything needed to resume a world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Instant every village was caught up to.
    pub taken_at: Timestamp,
    /// Largest village id handed out so far.
    pub next_village_id: u32,
    /// Id the next dispatch order will get.
    pub next_order_id: u64,
    /// Every village.
    pub villages: Vec<Village>,
    /// Orders still in transit.
    pub orders: Vec<DispatchOrder>,
}

impl WorldSnapshot {
    /// Serialize to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        fs::write(path, self.to_json()?)?;
        tracing::debug!(
            path = %path.display(),
            villages = self.villages.len(),
            orders = self.orders.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Read from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
