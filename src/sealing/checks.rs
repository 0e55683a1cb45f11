// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_shared4::{address::Address, clock::ChainEpoch, deal::DealID, sector::SectorNumber};
use thiserror::Error;

use super::{
    api::ChainApi,
    types::{SectorInfo, TipsetToken},
};

/// Reasons a sector's deal pieces cannot be precommitted.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("sector {sector}: reading proposal of deal {deal}: {error}")]
    DealLookup {
        sector: SectorNumber,
        deal: DealID,
        error: String,
    },
    #[error("piece {index} (deal {deal}) has CID {piece}, proposal says {proposal}")]
    InvalidDealCid {
        index: usize,
        deal: DealID,
        piece: Cid,
        proposal: Cid,
    },
    #[error("piece {index} (deal {deal}) has size {piece}, proposal says {proposal}")]
    InvalidDealSize {
        index: usize,
        deal: DealID,
        piece: u64,
        proposal: u64,
    },
    #[error("deal {deal} is proposed to provider {provider}, not {miner}")]
    WrongProvider {
        deal: DealID,
        provider: Address,
        miner: Address,
    },
    #[error("deal {deal} should have started at epoch {start}, head is at {head}")]
    ExpiredDeal {
        deal: DealID,
        start: ChainEpoch,
        head: ChainEpoch,
    },
}

/// Checks every deal piece of the sector against its on-chain proposal.
pub async fn check_pieces<C: ChainApi + ?Sized>(
    chain: &C,
    miner: &Address,
    info: &SectorInfo,
    tok: &TipsetToken,
    head: ChainEpoch,
) -> Result<(), CheckError> {
    for (index, piece) in info.pieces.iter().enumerate() {
        let Some(deal_info) = piece.deal_info else {
            continue;
        };
        let deal = deal_info.deal_id;
        let proposal = chain
            .state_market_storage_deal(deal, tok)
            .await
            .map_err(|e| CheckError::DealLookup {
                sector: info.sector_number,
                deal,
                error: format!("{e:#}"),
            })?;
        if proposal.provider != *miner {
            return Err(CheckError::WrongProvider {
                deal,
                provider: proposal.provider,
                miner: *miner,
            });
        }
        if proposal.piece_cid != piece.piece.cid {
            return Err(CheckError::InvalidDealCid {
                index,
                deal,
                piece: piece.piece.cid,
                proposal: proposal.piece_cid,
            });
        }
        if proposal.piece_size != piece.piece.size {
            return Err(CheckError::InvalidDealSize {
                index,
                deal,
                piece: piece.piece.size,
                proposal: proposal.piece_size,
            });
        }
        if proposal.start_epoch <= head {
            return Err(CheckError::ExpiredDeal {
                deal,
                start: proposal.start_epoch,
                head,
            });
        }
    }
    Ok(())
}
