// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use super::{SectorSnapshotBin, SectorStore, SettingsStore};
use crate::db::parity_db_config::ParityDbConfig;

use anyhow::{Context as _, anyhow};
use fvm_shared4::sector::SectorNumber;
use itertools::Itertools;
use parity_db::{CompressionType, Db, Options};
use parking_lot::Mutex;
use strum::{Display, EnumIter, FromRepr, IntoEnumIterator};

/// Columns used by the sealing database.
#[derive(Copy, Clone, Debug, Display, PartialEq, FromRepr, EnumIter)]
#[repr(u8)]
enum DbColumn {
    /// Latest committed record per sector, keyed by big-endian sector number.
    Sectors,
    /// Not yet applied sector events, keyed by sector number followed by the
    /// event sequence number, both big-endian so that a sector's log is a
    /// contiguous, ordered key range.
    Events,
    /// Last event sequence number handed out per sector. Kept apart from the
    /// log so that pruning never rewinds it.
    EventSequences,
    /// Column for storing settings such as the sector counter.
    Settings,
}

impl DbColumn {
    fn create_column_options(compression: CompressionType) -> Vec<parity_db::ColumnOptions> {
        DbColumn::iter()
            .map(|_| parity_db::ColumnOptions {
                // explicitly disable preimage for every column
                // othewise we are not able to overwrite entries
                preimage: false,
                // This is needed for key retrieval.
                btree_index: true,
                compression,
                ..Default::default()
            })
            .collect()
    }
}

pub struct ParityDb {
    pub db: parity_db::Db,
    /// Held by every write or read that spans the record and the log of a
    /// sector.
    log_lock: Mutex<()>,
}

fn sector_key(sector: SectorNumber) -> [u8; 8] {
    sector.to_be_bytes()
}

fn event_key(sector: SectorNumber, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&sector.to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn decode_u64(bytes: &[u8]) -> anyhow::Result<u64> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow!("expected 8 bytes, got {}", bytes.len()))?;
    Ok(u64::from_be_bytes(bytes))
}

impl ParityDb {
    fn to_options(path: PathBuf, config: &ParityDbConfig) -> Options {
        Options {
            path,
            sync_wal: true,
            sync_data: true,
            stats: config.enable_statistics,
            salt: None,
            columns: DbColumn::create_column_options(CompressionType::Lz4),
            compression_threshold: [(0, 128)].into_iter().collect(),
        }
    }

    pub fn open(path: impl Into<PathBuf>, config: &ParityDbConfig) -> anyhow::Result<Self> {
        let opts = Self::to_options(path.into(), config);
        Ok(Self {
            db: Db::open_or_create(&opts)?,
            log_lock: Mutex::new(()),
        })
    }

    fn read_from_column<K>(&self, key: K, column: DbColumn) -> anyhow::Result<Option<Vec<u8>>>
    where
        K: AsRef<[u8]>,
    {
        self.db
            .get(column as u8, key.as_ref())
            .map_err(|e| anyhow!("error from column {column}: {e}"))
    }

    fn write_to_column<K, V>(&self, key: K, value: V, column: DbColumn) -> anyhow::Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let tx = [(column as u8, key.as_ref(), Some(value.as_ref().to_vec()))];
        self.db
            .commit(tx)
            .map_err(|e| anyhow!("error writing to column {column}: {e}"))
    }

    /// Returns the `(sequence, event)` pairs of a sector's log, in order.
    fn sector_log(&self, sector: SectorNumber) -> anyhow::Result<Vec<(u64, Vec<u8>)>> {
        let prefix = sector_key(sector);
        let mut iter = self.db.iter(DbColumn::Events as u8)?;
        iter.seek(&prefix)?;
        let mut log = vec![];
        while let Some((key, value)) = iter.next()? {
            if !key.starts_with(&prefix) {
                break;
            }
            log.push((decode_u64(&key[prefix.len()..])?, value));
        }
        Ok(log)
    }

    fn column_keys(&self, column: DbColumn) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut iter = self.db.iter(column as u8)?;
        let mut keys = vec![];
        while let Some((key, _)) = iter.next()? {
            keys.push(key);
        }
        Ok(keys)
    }
}

impl SettingsStore for ParityDb {
    fn read_bin(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.read_from_column(key.as_bytes(), DbColumn::Settings)
    }

    fn write_bin(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.write_to_column(key.as_bytes(), value, DbColumn::Settings)
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.db
            .get_size(DbColumn::Settings as u8, key.as_bytes())
            .map(|size| size.is_some())
            .context("error checking if key exists")
    }

    fn setting_keys(&self) -> anyhow::Result<Vec<String>> {
        self.column_keys(DbColumn::Settings)?
            .into_iter()
            .map(|key| Ok(String::from_utf8(key)?))
            .collect()
    }
}

impl SectorStore for ParityDb {
    fn append_event_bin(&self, sector: SectorNumber, event: &[u8]) -> anyhow::Result<u64> {
        let _guard = self.log_lock.lock();
        let last = self
            .read_from_column(sector_key(sector), DbColumn::EventSequences)?
            .map(|bytes| decode_u64(&bytes))
            .transpose()?
            .unwrap_or_default();
        let seq = last + 1;
        let tx = [
            (
                DbColumn::Events as u8,
                event_key(sector, seq),
                Some(event.to_vec()),
            ),
            (
                DbColumn::EventSequences as u8,
                sector_key(sector).to_vec(),
                Some(seq.to_be_bytes().to_vec()),
            ),
        ];
        self.db
            .commit(tx)
            .map_err(|e| anyhow!("error appending event {seq} of sector {sector}: {e}"))?;
        Ok(seq)
    }

    fn pending_events_bin(
        &self,
        sector: SectorNumber,
        after: u64,
    ) -> anyhow::Result<Vec<(u64, Vec<u8>)>> {
        Ok(self
            .sector_log(sector)?
            .into_iter()
            .filter(|(seq, _)| *seq > after)
            .collect_vec())
    }

    fn commit_bin(&self, sector: SectorNumber, applied: u64, record: &[u8]) -> anyhow::Result<()> {
        let _guard = self.log_lock.lock();
        let pruned = self
            .sector_log(sector)?
            .into_iter()
            .filter(|(seq, _)| *seq <= applied)
            .map(|(seq, _)| (DbColumn::Events as u8, event_key(sector, seq), None));
        let tx = std::iter::once((
            DbColumn::Sectors as u8,
            sector_key(sector).to_vec(),
            Some(record.to_vec()),
        ))
        .chain(pruned)
        .collect_vec();
        self.db
            .commit(tx)
            .map_err(|e| anyhow!("error committing sector {sector}: {e}"))
    }

    fn read_record_bin(&self, sector: SectorNumber) -> anyhow::Result<Option<Vec<u8>>> {
        self.read_from_column(sector_key(sector), DbColumn::Sectors)
    }

    fn snapshot_bin(&self, sector: SectorNumber) -> anyhow::Result<SectorSnapshotBin> {
        let _guard = self.log_lock.lock();
        let record = self.read_from_column(sector_key(sector), DbColumn::Sectors)?;
        Ok((record, self.sector_log(sector)?))
    }

    fn sector_numbers(&self) -> anyhow::Result<Vec<SectorNumber>> {
        let records = self.column_keys(DbColumn::Sectors)?;
        let logs = self.column_keys(DbColumn::Events)?;
        records
            .iter()
            .map(|key| decode_u64(key))
            .chain(logs.iter().map(|key| decode_u64(key.get(..8).unwrap_or_default())))
            .process_results(|numbers| numbers.sorted().dedup().collect_vec())
    }
}
