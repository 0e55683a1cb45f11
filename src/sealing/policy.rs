// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use fvm_shared4::clock::ChainEpoch;
use tracing::warn;

use super::{config::SealingConfig, types::Piece};

/// Decides the expiration a sector is precommitted with.
pub trait PreCommitPolicy: Send + Sync {
    fn expiration(&self, head: ChainEpoch, pieces: &[Piece]) -> ChainEpoch;
}

/// Expires sectors with their last deal, or `duration` epochs from now when
/// they carry none, rounded up to the end of a proving period.
#[derive(Clone, Copy, Debug)]
pub struct BasicPreCommitPolicy {
    duration: ChainEpoch,
    proving_period: ChainEpoch,
    proving_boundary: ChainEpoch,
}

impl BasicPreCommitPolicy {
    pub fn new(
        duration: ChainEpoch,
        proving_period: ChainEpoch,
        proving_boundary: ChainEpoch,
    ) -> Self {
        Self {
            duration,
            proving_period: proving_period.max(1),
            proving_boundary,
        }
    }

    pub fn from_config(config: &SealingConfig) -> Self {
        Self::new(
            config.precommit_expiration_epochs,
            config.proving_period_epochs,
            config.proving_boundary,
        )
    }
}

impl PreCommitPolicy for BasicPreCommitPolicy {
    fn expiration(&self, head: ChainEpoch, pieces: &[Piece]) -> ChainEpoch {
        let end = pieces
            .iter()
            .filter_map(|p| p.deal_info)
            .filter(|deal| {
                let ended = deal.schedule.end_epoch < head;
                if ended {
                    warn!(deal = deal.deal_id, head, "deal ended before the current epoch");
                }
                !ended
            })
            .map(|deal| deal.schedule.end_epoch)
            .max()
            .unwrap_or(head + self.duration);
        end + self.proving_period - end.rem_euclid(self.proving_period) + self.proving_boundary - 1
    }
}
