// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

/// Pipeline stage of a sector.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    IntoStaticStr,
)]
pub enum SectorState {
    #[default]
    Empty,
    /// Accepting pieces.
    Packing,
    PreCommit1,
    PreCommit2,
    PreCommitting,
    PreCommitWait,
    WaitSeed,
    Committing,
    CommitWait,
    FinalizeSector,
    Proving,
    Removing,
    Removed,

    SealPreCommit1Failed,
    SealPreCommit2Failed,
    PreCommitFailed,
    ComputeProofFailed,
    CommitFailed,
    FinalizeFailed,
    RemoveFailed,
}

impl SectorState {
    pub fn is_failed(self) -> bool {
        use SectorState::*;
        matches!(
            self,
            SealPreCommit1Failed
                | SealPreCommit2Failed
                | PreCommitFailed
                | ComputeProofFailed
                | CommitFailed
                | FinalizeFailed
                | RemoveFailed
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SectorState::Removed
    }

    /// States the machine advances out of on its own, by calling the sealer
    /// or the chain.
    pub fn is_active(self) -> bool {
        use SectorState::*;
        matches!(
            self,
            PreCommit1
                | PreCommit2
                | PreCommitting
                | PreCommitWait
                | WaitSeed
                | Committing
                | CommitWait
                | FinalizeSector
                | Removing
        )
    }

    /// States that wait on the chain for an unbounded time. Their wait is
    /// dropped when an event arrives and re-issued afterwards.
    pub fn awaits_chain(self) -> bool {
        use SectorState::*;
        matches!(self, PreCommitWait | WaitSeed | CommitWait)
    }
}
