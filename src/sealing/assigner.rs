// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared4::sector::{RegisteredSealProof, SectorNumber};
use tracing::info;

use super::{
    Error, Sealing,
    api::{ChainApi, Sealer},
    fsm::SectorEvent,
    metrics,
    unsealed::UnsealedTracker,
};
use crate::db::SectorStore;

impl<C, S, DB> Sealing<C, S, DB>
where
    C: ChainApi,
    S: Sealer,
    DB: SectorStore + Send + Sync + 'static,
{
    /// Picks the open sector a piece of `size` goes into, opening a new one
    /// if none fits. Must be called with the tracker lock held.
    pub(super) async fn available_sector(
        &self,
        unsealed: &mut UnsealedTracker,
        size: u64,
    ) -> Result<SectorNumber, Error> {
        match unsealed.find_available(size, self.ctx.geometry.capacity()) {
            Some(sector) => Ok(sector),
            None => self.new_sector(unsealed).await,
        }
    }

    async fn new_sector(&self, unsealed: &mut UnsealedTracker) -> Result<SectorNumber, Error> {
        let (sector, seal_proof) = self.allocate_sector().await?;
        info!(sector, "creating sector");
        self.send(sector, SectorEvent::Start { seal_proof })?;
        unsealed.open(sector);
        metrics::OPEN_SECTORS.set(i64::try_from(unsealed.len()).unwrap_or(i64::MAX));
        Ok(sector)
    }

    /// Draws a sector number and initializes its storage. A number whose
    /// initialization failed is abandoned.
    pub(super) async fn allocate_sector(
        &self,
    ) -> Result<(SectorNumber, RegisteredSealProof), Error> {
        let sector = self
            .counter
            .next()
            .map_err(|e| Error::AllocationFailed(e.context("getting sector number")))?;
        self.ctx
            .sealer
            .new_sector(self.ctx.sector_id(sector))
            .await
            .map_err(|e| {
                Error::AllocationFailed(e.context(format!("initializing sector {sector}")))
            })?;
        let seal_proof = self
            .ctx
            .sealer
            .seal_proof_type()
            .map_err(|e| Error::AllocationFailed(e.context("bad sector size")))?;
        Ok((sector, seal_proof))
    }
}
