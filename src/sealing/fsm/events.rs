// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_encoding::RawBytes;
use fvm_shared4::{clock::ChainEpoch, sector::RegisteredSealProof};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::sealing::types::{Piece, SealRandomness, SectorCids, TipsetToken};

/// Entry of a sector's event log. Events are the only way a sector's state
/// changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, IntoStaticStr)]
pub enum SectorEvent {
    Start {
        seal_proof: RegisteredSealProof,
    },
    /// Opens a committed capacity sector with the given filler pieces.
    StartCC {
        seal_proof: RegisteredSealProof,
        pieces: Vec<Piece>,
    },
    AddPiece {
        piece: Piece,
    },
    StartPacking,

    FillersAdded {
        pieces: Vec<Piece>,
    },
    PreCommit1Done {
        ticket: SealRandomness,
        out: RawBytes,
    },
    SealPreCommit1Failed {
        error: String,
    },
    PreCommit2Done {
        cids: SectorCids,
    },
    SealPreCommit2Failed {
        error: String,
    },
    PreCommitted {
        message: Cid,
    },
    PreCommitLanded {
        tipset: TipsetToken,
    },
    /// With `resubmit` set, retrying sends a new precommit message instead of
    /// resuming the failed stage.
    PreCommitFailed {
        error: String,
        resubmit: bool,
    },

    SeedReady {
        seed: SealRandomness,
    },
    ProofComputed {
        proof: RawBytes,
    },
    ComputeProofFailed {
        error: String,
    },
    CommitSubmitted {
        message: Cid,
    },
    CommitFailed {
        error: String,
        resubmit: bool,
    },
    CommitLanded {
        expiration: ChainEpoch,
    },

    Finalized,
    FinalizeFailed {
        error: String,
    },

    /// Resumes a failed sector from the stage it failed at.
    Retry,
    Remove,
    Removed,
    RemoveFailed {
        error: String,
    },
}
