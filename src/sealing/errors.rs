// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared4::sector::SectorNumber;
use thiserror::Error;

use super::fsm::SectorState;

/// Errors returned synchronously by the sealing orchestrator. Failures of the
/// autonomous pipeline are never surfaced here; they are parked in the
/// sector's persisted state instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("piece size {0} is not a power-of-two multiple of the padding unit")]
    InvalidPieceSize(u64),
    #[error("piece of {size} bytes cannot fit into a sector of {capacity} bytes")]
    PieceTooLarge { size: u64, capacity: u64 },
    #[error("failed to allocate a sector: {0:#}")]
    AllocationFailed(anyhow::Error),
    #[error("unknown sector {0}")]
    UnknownSector(SectorNumber),
    #[error("sector {0} is not accepting pieces")]
    NotAcceptingPieces(SectorNumber),
    #[error("sector {sector} cannot handle {event} in state {state}")]
    InvalidTransition {
        sector: SectorNumber,
        state: SectorState,
        event: &'static str,
    },
    #[error("sector store: {0:#}")]
    Store(anyhow::Error),
    #[error("sealer: {0:#}")]
    Sealer(anyhow::Error),
    #[error("{0}")]
    Other(String),
}
