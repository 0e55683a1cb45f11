// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use async_trait::async_trait;
use cid::Cid;
use fvm_shared4::{
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    econ::TokenAmount,
    sector::{RegisteredSealProof, SectorID, SectorNumber},
};
use tokio::io::AsyncRead;

use super::types::{
    DealProposal, DomainSeparationTag, MsgLookup, OutgoingMessage, PieceInfo,
    PreCommitOnChainInfo, SectorCids, SectorOnChainInfo, TipsetToken,
};

/// Byte stream of a piece being added to a sector.
pub type PieceData = Box<dyn AsyncRead + Send + Unpin>;

/// Chain access needed by the sealing pipeline. State reads take a
/// [`TipsetToken`] to pin them to a chain position.
#[async_trait]
pub trait ChainApi: Send + Sync + 'static {
    /// Current head and its height.
    async fn chain_head(&self) -> anyhow::Result<(TipsetToken, ChainEpoch)>;

    async fn state_miner_worker_address(
        &self,
        miner: &Address,
        tok: &TipsetToken,
    ) -> anyhow::Result<Address>;

    async fn state_sector_precommit_info(
        &self,
        miner: &Address,
        sector: SectorNumber,
        tok: &TipsetToken,
    ) -> anyhow::Result<Option<PreCommitOnChainInfo>>;

    async fn state_sector_get_info(
        &self,
        miner: &Address,
        sector: SectorNumber,
        tok: &TipsetToken,
    ) -> anyhow::Result<Option<SectorOnChainInfo>>;

    async fn state_market_storage_deal(
        &self,
        deal: DealID,
        tok: &TipsetToken,
    ) -> anyhow::Result<DealProposal>;

    async fn state_miner_initial_pledge_collateral(
        &self,
        miner: &Address,
        sector: SectorNumber,
        tok: &TipsetToken,
    ) -> anyhow::Result<TokenAmount>;

    async fn chain_get_randomness(
        &self,
        tok: &TipsetToken,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
        entropy: &[u8],
    ) -> anyhow::Result<Vec<u8>>;

    /// Signs and pushes a message, returning its CID.
    async fn send_msg(&self, msg: OutgoingMessage) -> anyhow::Result<Cid>;

    /// Waits until the message is included and returns its receipt.
    async fn state_wait_msg(&self, msg: Cid) -> anyhow::Result<MsgLookup>;

    /// Waits until the chain reaches `height` and returns the token of the
    /// tipset at that height.
    async fn chain_wait_height(&self, height: ChainEpoch) -> anyhow::Result<TipsetToken>;
}

/// Physical sector storage and proof computation.
#[async_trait]
pub trait Sealer: Send + Sync + 'static {
    /// Padded sector size in bytes, fixed for the deployment.
    fn sector_size(&self) -> u64;

    fn seal_proof_type(&self) -> anyhow::Result<RegisteredSealProof>;

    async fn new_sector(&self, sector: SectorID) -> anyhow::Result<()>;

    /// Writes a piece after the `existing` ones, failing if the stream does
    /// not contain exactly `size` bytes.
    async fn add_piece(
        &self,
        sector: SectorID,
        existing: &[u64],
        size: u64,
        data: PieceData,
    ) -> anyhow::Result<PieceInfo>;

    async fn seal_pre_commit1(
        &self,
        sector: SectorID,
        seal_proof: RegisteredSealProof,
        ticket: &[u8],
        pieces: &[PieceInfo],
    ) -> anyhow::Result<Vec<u8>>;

    async fn seal_pre_commit2(
        &self,
        sector: SectorID,
        pre_commit1_out: &[u8],
    ) -> anyhow::Result<SectorCids>;

    async fn seal_commit1(
        &self,
        sector: SectorID,
        seal_proof: RegisteredSealProof,
        ticket: &[u8],
        seed: &[u8],
        pieces: &[PieceInfo],
        cids: &SectorCids,
    ) -> anyhow::Result<Vec<u8>>;

    async fn seal_commit2(&self, sector: SectorID, commit1_out: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Drops sealing caches once the sector is on chain.
    async fn finalize_sector(&self, sector: SectorID) -> anyhow::Result<()>;

    async fn remove(&self, sector: SectorID) -> anyhow::Result<()>;
}
