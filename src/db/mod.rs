// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod memory;
pub mod parity_db;
pub mod parity_db_config;

pub use memory::MemoryDB;
pub use parity_db::ParityDb;
pub use parity_db_config::ParityDbConfig;

use anyhow::Context as _;
use fvm_shared4::sector::SectorNumber;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod setting_keys {
    /// Key used to store the last sector number handed out by the counter.
    pub const SECTOR_COUNTER_KEY: &str = "/storage/nextid";
}

/// Interface used to store and retrieve settings from the database.
pub trait SettingsStore {
    /// Reads binary field from the Settings store. This should be used for
    /// non-serializable data. For serializable data, use [`SettingsStoreExt::read_obj`].
    fn read_bin(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Writes binary field to the Settings store. This should be used for
    /// non-serializable data. For serializable data, use [`SettingsStoreExt::write_obj`].
    fn write_bin(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// Returns `Ok(true)` if key exists in store.
    fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Returns all setting keys.
    fn setting_keys(&self) -> anyhow::Result<Vec<String>>;
}

/// Extension trait for the [`SettingsStore`] trait. It is implemented for all types that implement
/// [`SettingsStore`].
/// It provides methods for writing and reading any serializable object from the store.
pub trait SettingsStoreExt {
    fn read_obj<V: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<V>>;
    fn write_obj<V: Serialize>(&self, key: &str, value: &V) -> anyhow::Result<()>;

    /// Same as [`SettingsStoreExt::read_obj`], but returns an error if the key does not exist.
    fn require_obj<V: DeserializeOwned>(&self, key: &str) -> anyhow::Result<V>;
}

impl<T: ?Sized + SettingsStore> SettingsStoreExt for T {
    fn read_obj<V: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<V>> {
        match self.read_bin(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_obj<V: Serialize>(&self, key: &str, value: &V) -> anyhow::Result<()> {
        self.write_bin(key, &serde_json::to_vec(value)?)
    }

    fn require_obj<V: DeserializeOwned>(&self, key: &str) -> anyhow::Result<V> {
        self.read_bin(key)?
            .ok_or_else(|| anyhow::anyhow!("Key {key} not found"))
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Into::into))
    }
}

/// Durable per-sector storage: the latest sector record plus an ordered log
/// of events that have been accepted but not yet folded into that record.
///
/// Every record carries the sequence number of the last event it reflects.
/// Committing a record prunes the log up to and including that number, so
/// whatever is left in the log after a crash is exactly the work that still
/// has to be replayed. For typed access, use [`SectorStoreExt`].
pub trait SectorStore {
    /// Appends an encoded event to the sector's log and returns its sequence
    /// number. Sequence numbers start at 1 and increase by one per sector.
    fn append_event_bin(&self, sector: SectorNumber, event: &[u8]) -> anyhow::Result<u64>;

    /// Returns all logged events with a sequence number greater than `after`,
    /// in order.
    fn pending_events_bin(
        &self,
        sector: SectorNumber,
        after: u64,
    ) -> anyhow::Result<Vec<(u64, Vec<u8>)>>;

    /// Atomically replaces the sector record and drops log entries up to
    /// `applied`.
    fn commit_bin(&self, sector: SectorNumber, applied: u64, record: &[u8]) -> anyhow::Result<()>;

    /// Reads the encoded sector record, if one was ever committed.
    fn read_record_bin(&self, sector: SectorNumber) -> anyhow::Result<Option<Vec<u8>>>;

    /// Reads the record and the log entries it does not reflect yet as of one
    /// point in time. No commit can land between the two reads, so the log
    /// always starts right after the record's cursor.
    fn snapshot_bin(&self, sector: SectorNumber) -> anyhow::Result<SectorSnapshotBin>;

    /// Returns every sector number with a record or a non-empty log.
    fn sector_numbers(&self) -> anyhow::Result<Vec<SectorNumber>>;
}

/// Encoded sector record and the log entries following it.
pub type SectorSnapshotBin = (Option<Vec<u8>>, Vec<(u64, Vec<u8>)>);

/// Typed access to a [`SectorStore`]. Values are encoded as DAG-CBOR.
pub trait SectorStoreExt {
    fn append_event<E: Serialize>(&self, sector: SectorNumber, event: &E) -> anyhow::Result<u64>;
    fn pending_events<E: DeserializeOwned>(
        &self,
        sector: SectorNumber,
        after: u64,
    ) -> anyhow::Result<Vec<(u64, E)>>;
    fn commit<V: Serialize>(&self, sector: SectorNumber, applied: u64, record: &V)
    -> anyhow::Result<()>;
    fn load<V: DeserializeOwned>(&self, sector: SectorNumber) -> anyhow::Result<Option<V>>;
    fn snapshot<V: DeserializeOwned, E: DeserializeOwned>(
        &self,
        sector: SectorNumber,
    ) -> anyhow::Result<(Option<V>, Vec<(u64, E)>)>;
}

impl<T: ?Sized + SectorStore> SectorStoreExt for T {
    fn append_event<E: Serialize>(&self, sector: SectorNumber, event: &E) -> anyhow::Result<u64> {
        self.append_event_bin(sector, &fvm_ipld_encoding::to_vec(event)?)
    }

    fn pending_events<E: DeserializeOwned>(
        &self,
        sector: SectorNumber,
        after: u64,
    ) -> anyhow::Result<Vec<(u64, E)>> {
        decode_events(sector, self.pending_events_bin(sector, after)?)
    }

    fn commit<V: Serialize>(
        &self,
        sector: SectorNumber,
        applied: u64,
        record: &V,
    ) -> anyhow::Result<()> {
        self.commit_bin(sector, applied, &fvm_ipld_encoding::to_vec(record)?)
    }

    fn load<V: DeserializeOwned>(&self, sector: SectorNumber) -> anyhow::Result<Option<V>> {
        self.read_record_bin(sector)?
            .map(|bytes| decode_record(sector, &bytes))
            .transpose()
    }

    fn snapshot<V: DeserializeOwned, E: DeserializeOwned>(
        &self,
        sector: SectorNumber,
    ) -> anyhow::Result<(Option<V>, Vec<(u64, E)>)> {
        let (record, log) = self.snapshot_bin(sector)?;
        let record = record
            .map(|bytes| decode_record(sector, &bytes))
            .transpose()?;
        Ok((record, decode_events(sector, log)?))
    }
}

fn decode_record<V: DeserializeOwned>(sector: SectorNumber, bytes: &[u8]) -> anyhow::Result<V> {
    fvm_ipld_encoding::from_slice(bytes)
        .with_context(|| format!("decoding record of sector {sector}"))
}

fn decode_events<E: DeserializeOwned>(
    sector: SectorNumber,
    log: Vec<(u64, Vec<u8>)>,
) -> anyhow::Result<Vec<(u64, E)>> {
    log.into_iter()
        .map(|(seq, bytes)| {
            let event = fvm_ipld_encoding::from_slice(&bytes)
                .with_context(|| format!("decoding event {seq} of sector {sector}"))?;
            Ok((seq, event))
        })
        .collect()
}
