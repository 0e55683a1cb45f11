// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_encoding::{RawBytes, strict_bytes};
use fvm_shared4::{
    MethodNum,
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    econ::TokenAmount,
    error::ExitCode,
    sector::{RegisteredSealProof, SectorNumber},
};
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use serde_tuple::{self, Deserialize_tuple, Serialize_tuple};

use super::fsm::SectorState;

/// Miner actor method used to precommit a sector.
pub const PRE_COMMIT_SECTOR_METHOD: MethodNum = 6;
/// Miner actor method used to prove a precommitted sector.
pub const PROVE_COMMIT_SECTOR_METHOD: MethodNum = 7;

/// Domain of a randomness draw, with the values the chain uses to separate
/// them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum DomainSeparationTag {
    SealRandomness = 5,
    InteractiveSealChallengeSeed = 6,
}

/// Opaque handle of a chain position. State reads are pinned to one so that
/// they do not race with reorganizations.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Into,
)]
#[serde(transparent)]
pub struct TipsetToken(#[serde(with = "strict_bytes")] pub Vec<u8>);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSchedule {
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealInfo {
    pub deal_id: DealID,
    pub schedule: DealSchedule,
}

/// A piece as written by the sealer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceInfo {
    /// Unpadded size in bytes.
    pub size: u64,
    pub cid: Cid,
}

/// A piece placed in a sector. Filler pieces carry no deal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub piece: PieceInfo,
    pub deal_info: Option<DealInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorCids {
    pub unsealed: Cid,
    pub sealed: Cid,
}

/// Chain randomness together with the epoch it was drawn at. Used for both
/// the sealing ticket and the interactive seed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealRandomness {
    #[serde(with = "strict_bytes")]
    pub value: Vec<u8>,
    pub epoch: ChainEpoch,
}

/// Persisted state of a single sector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SectorInfo {
    pub state: SectorState,
    pub sector_number: SectorNumber,
    pub seal_proof: Option<RegisteredSealProof>,
    pub committed_capacity: bool,
    pub pieces: Vec<Piece>,
    /// Filler sizes computed when packing started, written before PC1.
    pub pending_fillers: Vec<u64>,

    pub ticket: Option<SealRandomness>,
    pub pre_commit1_out: Option<RawBytes>,
    pub cids: Option<SectorCids>,
    pub pre_commit_message: Option<Cid>,
    pub pre_commit_tipset: Option<TipsetToken>,

    pub seed: Option<SealRandomness>,
    pub proof: Option<RawBytes>,
    pub commit_message: Option<Cid>,
    pub expiration: Option<ChainEpoch>,

    pub last_error: Option<String>,
    /// Stage a failed sector resumes from on retry.
    pub failed_stage: Option<SectorState>,
    /// Sequence number of the last event folded into this record.
    pub applied: u64,
}

impl SectorInfo {
    pub fn new(sector_number: SectorNumber) -> Self {
        Self {
            sector_number,
            ..Default::default()
        }
    }

    /// Bytes currently placed in the sector.
    pub fn stored(&self) -> u64 {
        self.pieces.iter().map(|p| p.piece.size).sum()
    }

    pub fn piece_sizes(&self) -> Vec<u64> {
        self.pieces.iter().map(|p| p.piece.size).collect()
    }

    pub fn piece_infos(&self) -> Vec<PieceInfo> {
        self.pieces.iter().map(|p| p.piece).collect()
    }

    pub fn deal_ids(&self) -> Vec<DealID> {
        self.pieces
            .iter()
            .filter_map(|p| p.deal_info.map(|d| d.deal_id))
            .collect_vec()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCommitOnChainInfo {
    pub sealed_cid: Cid,
    pub pre_commit_epoch: ChainEpoch,
    pub deposit: TokenAmount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorOnChainInfo {
    pub sector_number: SectorNumber,
    pub sealed_cid: Cid,
    pub activation: ChainEpoch,
    pub expiration: ChainEpoch,
}

/// Market deal proposal as seen on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealProposal {
    pub piece_cid: Cid,
    /// Unpadded size, comparable to [`PieceInfo::size`].
    pub piece_size: u64,
    pub provider: Address,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
}

/// Result of waiting for a message to land on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgLookup {
    pub message: Cid,
    pub exit_code: ExitCode,
    pub tipset: TipsetToken,
    pub height: ChainEpoch,
}

/// Unsigned message handed to the chain API for signing and submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: Address,
    pub to: Address,
    pub method: MethodNum,
    pub value: TokenAmount,
    pub gas_limit: u64,
    pub params: RawBytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct PreCommitSectorParams {
    pub seal_proof: RegisteredSealProof,
    pub sector_number: SectorNumber,
    pub sealed_cid: Cid,
    pub seal_rand_epoch: ChainEpoch,
    pub deal_ids: Vec<DealID>,
    pub expiration: ChainEpoch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct ProveCommitSectorParams {
    pub sector_number: SectorNumber,
    #[serde(with = "strict_bytes")]
    pub proof: Vec<u8>,
}
