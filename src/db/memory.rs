// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use super::{SectorSnapshotBin, SectorStore, SettingsStore};
use ahash::HashMap;
use fvm_shared4::sector::SectorNumber;
use itertools::Itertools;
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct SectorLogs {
    /// Last sequence number handed out per sector.
    sequences: HashMap<SectorNumber, u64>,
    events: BTreeMap<(SectorNumber, u64), Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct MemoryDB {
    sectors_db: RwLock<HashMap<SectorNumber, Vec<u8>>>,
    events_db: RwLock<SectorLogs>,
    settings_db: RwLock<HashMap<String, Vec<u8>>>,
}

impl SettingsStore for MemoryDB {
    fn read_bin(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.settings_db.read().get(key).cloned())
    }

    fn write_bin(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.settings_db
            .write()
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.settings_db.read().contains_key(key))
    }

    fn setting_keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.settings_db.read().keys().cloned().collect_vec())
    }
}

impl SectorStore for MemoryDB {
    fn append_event_bin(&self, sector: SectorNumber, event: &[u8]) -> anyhow::Result<u64> {
        let mut logs = self.events_db.write();
        let seq = logs.sequences.entry(sector).or_default();
        *seq += 1;
        let seq = *seq;
        logs.events.insert((sector, seq), event.to_vec());
        Ok(seq)
    }

    fn pending_events_bin(
        &self,
        sector: SectorNumber,
        after: u64,
    ) -> anyhow::Result<Vec<(u64, Vec<u8>)>> {
        Ok(self
            .events_db
            .read()
            .events
            .range((sector, after.saturating_add(1))..=(sector, u64::MAX))
            .map(|(&(_, seq), event)| (seq, event.clone()))
            .collect_vec())
    }

    fn commit_bin(&self, sector: SectorNumber, applied: u64, record: &[u8]) -> anyhow::Result<()> {
        // Both locks are held so that readers never observe a record next to
        // a log that has not been pruned yet.
        let mut sectors = self.sectors_db.write();
        let mut logs = self.events_db.write();
        sectors.insert(sector, record.to_vec());
        logs.events
            .retain(|&(number, seq), _| number != sector || seq > applied);
        Ok(())
    }

    fn read_record_bin(&self, sector: SectorNumber) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.sectors_db.read().get(&sector).cloned())
    }

    fn snapshot_bin(&self, sector: SectorNumber) -> anyhow::Result<SectorSnapshotBin> {
        // same lock order as commit_bin
        let sectors = self.sectors_db.read();
        let logs = self.events_db.read();
        let log = logs
            .events
            .range((sector, 0)..=(sector, u64::MAX))
            .map(|(&(_, seq), event)| (seq, event.clone()))
            .collect_vec();
        Ok((sectors.get(&sector).cloned(), log))
    }

    fn sector_numbers(&self) -> anyhow::Result<Vec<SectorNumber>> {
        let sectors = self.sectors_db.read();
        let logs = self.events_db.read();
        Ok(sectors
            .keys()
            .copied()
            .chain(logs.events.keys().map(|&(sector, _)| sector))
            .sorted()
            .dedup()
            .collect_vec())
    }
}
