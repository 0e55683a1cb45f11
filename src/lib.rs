// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector packing and sealing pipeline for Filecoin storage providers.
//!
//! Incoming deal pieces are placed into open sectors by [`Sealing`]; once a
//! sector is packed, its own state machine drives it through the sealing
//! computations and on-chain messages until the sector is proving. Every
//! state change is persisted in a [`SectorStore`] so that a restarted
//! pipeline resumes where it stopped.

pub mod db;
pub mod metrics;
pub mod sealing;
pub mod utils;

pub use db::{
    MemoryDB, ParityDb, ParityDbConfig, SectorStore, SectorStoreExt, SettingsStore,
    SettingsStoreExt,
};
pub use metrics::encode_metrics;
pub use sealing::{
    Error, Sealing,
    api::{ChainApi, PieceData, Sealer},
    checks::CheckError,
    config::SealingConfig,
    counter::{SectorIdCounter, StoredCounter},
    fsm::{SectorEvent, SectorState},
    pieces::SectorGeometry,
    policy::{BasicPreCommitPolicy, PreCommitPolicy},
    types::{DealInfo, DealSchedule, DomainSeparationTag, PieceInfo, SectorInfo},
    unsealed::{UnsealedSectorInfo, UnsealedTracker},
};
pub use utils::{RetryArgs, RetryError};
