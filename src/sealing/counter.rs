// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use anyhow::Context as _;
use fvm_shared4::sector::SectorNumber;
use parking_lot::Mutex;

use crate::db::{SettingsStore, SettingsStoreExt as _, setting_keys::SECTOR_COUNTER_KEY};

/// Source of fresh sector numbers. A number is never handed out twice, even
/// across restarts.
pub trait SectorIdCounter: Send + Sync {
    fn next(&self) -> anyhow::Result<SectorNumber>;
}

/// Counter persisted in a [`SettingsStore`]. Numbers start at 1.
pub struct StoredCounter<DB> {
    db: Arc<DB>,
    lock: Mutex<()>,
}

impl<DB> StoredCounter<DB> {
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            lock: Mutex::new(()),
        }
    }
}

impl<DB: SettingsStore + Send + Sync> SectorIdCounter for StoredCounter<DB> {
    fn next(&self) -> anyhow::Result<SectorNumber> {
        let _guard = self.lock.lock();
        let last: SectorNumber = self.db.read_obj(SECTOR_COUNTER_KEY)?.unwrap_or_default();
        let next = last.checked_add(1).context("sector numbers exhausted")?;
        self.db.write_obj(SECTOR_COUNTER_KEY, &next)?;
        Ok(next)
    }
}
