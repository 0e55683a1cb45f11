// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::Path;

use anyhow::Context as _;
use fvm_shared4::clock::ChainEpoch;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::utils::RetryArgs;

/// Number of epochs in a day at 30 second block time.
const EPOCHS_IN_DAY: ChainEpoch = 2880;

/// Sealing pipeline settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct SealingConfig {
    /// Smallest unpadded piece size. Piece sizes must be this times a power of
    /// two. 127 is the Fr32 unpadded size of a 128 byte padded chunk.
    #[default(127)]
    pub padding_unit: u64,
    /// Whether sectors that already reached `Proving` may be removed.
    pub remove_proving_sectors: bool,
    /// Lifetime of sectors without deals, in epochs.
    #[default(540 * EPOCHS_IN_DAY)]
    pub precommit_expiration_epochs: ChainEpoch,
    /// Sector expirations are rounded up to the end of a proving period.
    #[default(EPOCHS_IN_DAY)]
    pub proving_period_epochs: ChainEpoch,
    /// Offset of the miner's proving period start.
    pub proving_boundary: ChainEpoch,
    /// How far behind the chain head the sealing ticket is drawn.
    #[default(900)]
    pub seal_randomness_lookback: ChainEpoch,
    /// Epochs between precommit inclusion and the interactive seed.
    #[default(150)]
    pub precommit_challenge_delay: ChainEpoch,
    #[default(1_000_000)]
    pub message_gas_limit: u64,
    /// Retry policy for chain reads that are expected to be transient.
    pub chain_retry: RetryArgs,
}

impl SealingConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("parsing sealing config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading sealing config {}", path.display()))?;
        Self::from_toml_str(&s)
    }
}
