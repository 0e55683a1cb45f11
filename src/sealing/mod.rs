// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector packing and sealing. [`Sealing`] places incoming pieces into
//! sectors and runs one crash-recoverable state machine per sector that
//! takes it from packing to proving.

pub mod api;
mod assigner;
pub mod checks;
pub mod config;
pub mod counter;
mod errors;
pub mod fsm;
mod metrics;
pub mod pieces;
pub mod policy;
pub mod types;
pub mod unsealed;

#[cfg(test)]
mod test_utils;

pub use self::errors::Error;

use std::collections::BTreeMap;
use std::sync::Arc;

use fvm_shared4::{
    address::Address,
    sector::{SectorID, SectorNumber},
};
use itertools::Itertools as _;
use tokio::sync::Mutex;
use tracing::{debug, info};

use self::{
    api::{ChainApi, PieceData, Sealer},
    config::SealingConfig,
    counter::SectorIdCounter,
    fsm::{
        SectorEvent, SectorState,
        worker::{Envelope, Machines, SectorContext},
    },
    pieces::{SectorGeometry, zero_piece},
    policy::PreCommitPolicy,
    types::{DealInfo, Piece, PieceInfo, SectorInfo},
    unsealed::{UnsealedSectorInfo, UnsealedTracker},
};
use crate::db::{SectorStore, SectorStoreExt as _};

/// Entry point of the sealing pipeline.
pub struct Sealing<C, S, DB> {
    ctx: Arc<SectorContext<C, S, DB>>,
    counter: Arc<dyn SectorIdCounter>,
    // add_piece calls are processed sequentially under this lock
    unsealed: Mutex<UnsealedTracker>,
    machines: Machines,
}

impl<C, S, DB> Sealing<C, S, DB>
where
    C: ChainApi,
    S: Sealer,
    DB: SectorStore + Send + Sync + 'static,
{
    pub fn new(
        miner: Address,
        chain: Arc<C>,
        sealer: Arc<S>,
        store: Arc<DB>,
        counter: Arc<dyn SectorIdCounter>,
        policy: Arc<dyn PreCommitPolicy>,
        config: SealingConfig,
    ) -> Result<Self, Error> {
        let miner_id = miner
            .id()
            .map_err(|e| Error::Other(format!("miner address {miner} is not an ID address: {e}")))?;
        let geometry = SectorGeometry::new(config.padding_unit, sealer.sector_size())
            .map_err(|e| Error::Other(format!("{e:#}")))?;
        Ok(Self {
            ctx: Arc::new(SectorContext {
                miner,
                miner_id,
                chain,
                sealer,
                store,
                policy,
                config,
                geometry,
            }),
            counter,
            unsealed: Mutex::new(UnsealedTracker::default()),
            machines: Machines::default(),
        })
    }

    /// Reattaches every persisted sector that has not been removed and
    /// rebuilds the set of sectors open for packing from their piece lists.
    pub async fn run(&self) -> Result<(), Error> {
        let numbers = self.ctx.store.sector_numbers().map_err(Error::Store)?;
        let mut unsealed = self.unsealed.lock().await;
        let mut restarted = 0;
        for number in numbers {
            let info = self.current(number)?;
            if info.state.is_terminal() {
                continue;
            }
            if info.state == SectorState::Packing && !info.committed_capacity {
                unsealed.restore(number, info.piece_sizes());
            }
            self.machines.deliver(&self.ctx, number, None);
            restarted += 1;
        }
        metrics::OPEN_SECTORS.set(i64::try_from(unsealed.len()).unwrap_or(i64::MAX));
        info!(
            restarted,
            open = unsealed.len(),
            "sealing started"
        );
        Ok(())
    }

    /// Stops all sector workers. Workers busy in the sealer finish that call
    /// first; chain waits are dropped and re-issued on the next run.
    pub async fn stop(&self) {
        self.machines.stop().await;
        info!("sealing stopped");
    }

    pub fn address(&self) -> Address {
        self.ctx.miner
    }

    /// Writes a piece into the first open sector that can take it, opening a
    /// new sector when none can. Returns the sector and the offset the piece
    /// was written at.
    ///
    /// Calls are serialized: the open sectors stay locked until the piece is
    /// written and logged, so a slow `data` stream delays every other add as
    /// well as [`Self::start_packing`], [`Self::remove`] and
    /// [`Self::open_sectors`]. Hand in data that is already staged locally.
    pub async fn add_piece_to_any_sector(
        &self,
        size: u64,
        data: PieceData,
        deal: DealInfo,
    ) -> Result<(SectorNumber, u64), Error> {
        info!(deal = deal.deal_id, size, "adding piece");
        self.ctx.geometry.check_piece_size(size)?;

        let mut unsealed = self.unsealed.lock().await;
        let sector = self.available_sector(&mut unsealed, size).await?;
        let (offset, existing) = unsealed
            .lookup(sector)
            .map(|info| (info.stored(), info.piece_sizes().to_vec()))
            .ok_or(Error::NotAcceptingPieces(sector))?;

        let piece = self
            .ctx
            .sealer
            .add_piece(self.sector_id(sector), &existing, size, data)
            .await
            .map_err(|e| Error::Sealer(e.context(format!("writing piece to sector {sector}"))))?;
        if piece.size != size {
            return Err(Error::Sealer(anyhow::anyhow!(
                "sealer wrote {} bytes for a piece of {size}",
                piece.size
            )));
        }

        debug!(sector, offset, "piece written");
        self.send(
            sector,
            SectorEvent::AddPiece {
                piece: Piece {
                    piece,
                    deal_info: Some(deal),
                },
            },
        )?;
        unsealed.record(sector, size)?;
        metrics::PIECES_ADDED.inc();
        Ok((sector, offset))
    }

    /// Stops a sector from accepting pieces and starts sealing it.
    pub async fn start_packing(&self, sector: SectorNumber) -> Result<(), Error> {
        info!(sector, "starting packing");
        let mut unsealed = self.unsealed.lock().await;
        self.expect_state(sector, "StartPacking", |state| {
            state == SectorState::Packing
        })?;
        self.send(sector, SectorEvent::StartPacking)?;
        unsealed.close(sector);
        metrics::OPEN_SECTORS.set(i64::try_from(unsealed.len()).unwrap_or(i64::MAX));
        Ok(())
    }

    /// Abandons a sector and releases its storage. Sectors that reached
    /// `Proving` are only removable when the config allows it.
    pub async fn remove(&self, sector: SectorNumber) -> Result<(), Error> {
        info!(sector, "removing sector");
        let allow_proving = self.ctx.config.remove_proving_sectors;
        let mut unsealed = self.unsealed.lock().await;
        self.expect_state(sector, "Remove", |state| match state {
            SectorState::Removing | SectorState::Removed => false,
            SectorState::Proving => allow_proving,
            _ => true,
        })?;
        self.send(sector, SectorEvent::Remove)?;
        unsealed.close(sector);
        metrics::OPEN_SECTORS.set(i64::try_from(unsealed.len()).unwrap_or(i64::MAX));
        Ok(())
    }

    /// Resumes a failed sector from the stage it failed at.
    pub fn retry(&self, sector: SectorNumber) -> Result<(), Error> {
        info!(sector, "retrying sector");
        self.expect_state(sector, "Retry", SectorState::is_failed)?;
        self.send(sector, SectorEvent::Retry)
    }

    /// Creates a committed capacity sector holding `pieces` and starts
    /// sealing it right away. Any space the pieces leave is filled with
    /// zero pieces.
    pub async fn new_cc_sector(&self, pieces: Vec<PieceInfo>) -> Result<SectorNumber, Error> {
        let mut total = 0;
        for piece in &pieces {
            self.ctx.geometry.check_piece_size(piece.size)?;
            total += piece.size;
        }
        if total > self.ctx.geometry.capacity() {
            return Err(Error::PieceTooLarge {
                size: total,
                capacity: self.ctx.geometry.capacity(),
            });
        }
        let (sector, seal_proof) = self.allocate_sector().await?;
        self.start_cc(sector, seal_proof, pieces)?;
        Ok(sector)
    }

    /// Fills a new sector with zero pieces and seals it as committed
    /// capacity.
    pub async fn pledge_sector(&self) -> Result<SectorNumber, Error> {
        let (sector, seal_proof) = self.allocate_sector().await?;
        let mut existing = vec![];
        let mut pieces = vec![];
        for size in self.ctx.geometry.fillers(0) {
            let piece = self
                .ctx
                .sealer
                .add_piece(self.sector_id(sector), &existing, size, zero_piece(size))
                .await
                .map_err(|e| Error::Sealer(e.context(format!("pledging sector {sector}"))))?;
            existing.push(size);
            pieces.push(piece);
        }
        self.start_cc(sector, seal_proof, pieces)?;
        Ok(sector)
    }

    fn start_cc(
        &self,
        sector: SectorNumber,
        seal_proof: fvm_shared4::sector::RegisteredSealProof,
        pieces: Vec<PieceInfo>,
    ) -> Result<(), Error> {
        info!(sector, pieces = pieces.len(), "creating CC sector");
        let pieces = pieces
            .into_iter()
            .map(|piece| Piece {
                piece,
                deal_info: None,
            })
            .collect_vec();
        self.send(sector, SectorEvent::StartCC { seal_proof, pieces })?;
        self.send(sector, SectorEvent::StartPacking)
    }

    /// Persisted state of a sector, including events that are logged but not
    /// yet applied by its worker.
    pub fn sector_info(&self, sector: SectorNumber) -> Result<SectorInfo, Error> {
        self.current(sector)
    }

    pub fn list_sectors(&self) -> Result<Vec<SectorInfo>, Error> {
        self.ctx
            .store
            .sector_numbers()
            .map_err(Error::Store)?
            .into_iter()
            .map(|sector| self.current(sector))
            .collect()
    }

    /// Snapshot of the sectors accepting pieces.
    pub async fn open_sectors(&self) -> BTreeMap<SectorNumber, UnsealedSectorInfo> {
        self.unsealed.lock().await.snapshot()
    }

    fn sector_id(&self, number: SectorNumber) -> SectorID {
        self.ctx.sector_id(number)
    }

    fn current(&self, sector: SectorNumber) -> Result<SectorInfo, Error> {
        let (record, log) = self
            .ctx
            .store
            .snapshot::<SectorInfo, SectorEvent>(sector)
            .map_err(Error::Store)?;
        if record.is_none() && log.is_empty() {
            return Err(Error::UnknownSector(sector));
        }
        let record = record.unwrap_or_else(|| SectorInfo::new(sector));
        let pending = log
            .into_iter()
            .filter(|(seq, _)| *seq > record.applied)
            .collect_vec();
        Ok(fsm::replay(record, pending, &self.ctx.rules()))
    }

    fn expect_state(
        &self,
        sector: SectorNumber,
        event: &'static str,
        allowed: impl FnOnce(SectorState) -> bool,
    ) -> Result<(), Error> {
        let state = self.current(sector)?.state;
        if allowed(state) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                sector,
                state,
                event,
            })
        }
    }

    /// Appends the event to the sector's log and wakes its worker.
    fn send(&self, sector: SectorNumber, event: SectorEvent) -> Result<(), Error> {
        let seq = self
            .ctx
            .store
            .append_event(sector, &event)
            .map_err(Error::Store)?;
        self.machines
            .deliver(&self.ctx, sector, Some(Envelope { seq, event }));
        Ok(())
    }

    #[cfg(test)]
    fn running_sectors(&self) -> Vec<SectorNumber> {
        self.machines.running()
    }

    #[cfg(test)]
    fn mailbox_count(&self) -> usize {
        self.machines.mailbox_count()
    }
}
