// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Pipeline steps. Each step looks at the sector record, does one unit of
//! external work and reports the outcome as a single event. Failures become
//! `*Failed` events rather than errors.

use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use fvm_ipld_encoding::RawBytes;
use fvm_shared4::{clock::ChainEpoch, econ::TokenAmount};
use tracing::{debug, info};

use super::{SectorEvent, SectorState, worker::SectorContext};
use crate::db::SectorStore;
use crate::sealing::{
    api::{ChainApi, Sealer},
    checks,
    pieces::zero_piece,
    types::{
        DomainSeparationTag, OutgoingMessage, PRE_COMMIT_SECTOR_METHOD,
        PROVE_COMMIT_SECTOR_METHOD, Piece, PreCommitSectorParams, ProveCommitSectorParams,
        SealRandomness, SectorInfo, TipsetToken,
    },
};
use crate::utils::retry;

/// Runs the step of the sector's current state. Returns `None` for states
/// that only move on external events.
pub(crate) async fn step<C, S, DB>(
    ctx: Arc<SectorContext<C, S, DB>>,
    info: SectorInfo,
) -> Option<SectorEvent>
where
    C: ChainApi,
    S: Sealer,
    DB: SectorStore + Send + Sync + 'static,
{
    let event = match info.state {
        SectorState::PreCommit1 => pre_commit1(&ctx, &info).await,
        SectorState::PreCommit2 => pre_commit2(&ctx, &info).await,
        SectorState::PreCommitting => pre_committing(&ctx, &info).await,
        SectorState::PreCommitWait => pre_commit_wait(&ctx, &info).await,
        SectorState::WaitSeed => wait_seed(&ctx, &info).await,
        SectorState::Committing => committing(&ctx, &info).await,
        SectorState::CommitWait => commit_wait(&ctx, &info).await,
        SectorState::FinalizeSector => finalize(&ctx, &info).await,
        SectorState::Removing => removing(&ctx, &info).await,
        _ => return None,
    };
    Some(event)
}

impl<C: ChainApi, S, DB> SectorContext<C, S, DB> {
    async fn chain_head(&self) -> anyhow::Result<(TipsetToken, ChainEpoch)> {
        retry(self.config.chain_retry, || self.chain.chain_head())
            .await
            .map_err(|e| anyhow!("reading chain head: {e}"))
    }

    async fn randomness(
        &self,
        tok: &TipsetToken,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
    ) -> anyhow::Result<SealRandomness> {
        let entropy = fvm_ipld_encoding::to_vec(&self.miner)?;
        let value = self
            .chain
            .chain_get_randomness(tok, tag, epoch, &entropy)
            .await
            .with_context(|| format!("getting randomness at epoch {epoch}"))?;
        Ok(SealRandomness { value, epoch })
    }
}

async fn pre_commit1<C: ChainApi, S: Sealer, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> SectorEvent {
    if !info.pending_fillers.is_empty() {
        return match add_fillers(ctx, info).await {
            Ok(pieces) => SectorEvent::FillersAdded { pieces },
            Err(e) => SectorEvent::SealPreCommit1Failed {
                error: format!("writing filler pieces: {e:#}"),
            },
        };
    }
    let result = async {
        let seal_proof = info.seal_proof.context("sector has no seal proof type")?;
        let (tok, head) = ctx.chain_head().await?;
        let ticket = ctx
            .randomness(
                &tok,
                DomainSeparationTag::SealRandomness,
                head - ctx.config.seal_randomness_lookback,
            )
            .await?;
        let out = ctx
            .sealer
            .seal_pre_commit1(
                ctx.sector_id(info.sector_number),
                seal_proof,
                &ticket.value,
                &info.piece_infos(),
            )
            .await?;
        anyhow::Ok((ticket, out))
    };
    match result.await {
        Ok((ticket, out)) => SectorEvent::PreCommit1Done {
            ticket,
            out: RawBytes::new(out),
        },
        Err(e) => SectorEvent::SealPreCommit1Failed {
            error: format!("{e:#}"),
        },
    }
}

async fn add_fillers<C, S: Sealer, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> anyhow::Result<Vec<Piece>> {
    let mut existing = info.piece_sizes();
    let mut pieces = Vec::with_capacity(info.pending_fillers.len());
    for &size in &info.pending_fillers {
        let piece = ctx
            .sealer
            .add_piece(
                ctx.sector_id(info.sector_number),
                &existing,
                size,
                zero_piece(size),
            )
            .await?;
        existing.push(size);
        pieces.push(Piece {
            piece,
            deal_info: None,
        });
    }
    debug!(fillers = pieces.len(), "filler pieces written");
    Ok(pieces)
}

async fn pre_commit2<C, S: Sealer, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> SectorEvent {
    let result = async {
        let out = info
            .pre_commit1_out
            .as_ref()
            .context("sector has no PC1 output")?;
        ctx.sealer
            .seal_pre_commit2(ctx.sector_id(info.sector_number), out.bytes())
            .await
    };
    match result.await {
        Ok(cids) => SectorEvent::PreCommit2Done { cids },
        Err(e) => SectorEvent::SealPreCommit2Failed {
            error: format!("{e:#}"),
        },
    }
}

async fn pre_committing<C: ChainApi, S, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> SectorEvent {
    let result = async {
        let (tok, head) = ctx.chain_head().await?;
        checks::check_pieces(ctx.chain.as_ref(), &ctx.miner, info, &tok, head).await?;

        let (Some(seal_proof), Some(cids), Some(ticket)) =
            (info.seal_proof, info.cids, info.ticket.as_ref())
        else {
            anyhow::bail!("sector is missing sealing outputs");
        };
        let params = PreCommitSectorParams {
            seal_proof,
            sector_number: info.sector_number,
            sealed_cid: cids.sealed,
            seal_rand_epoch: ticket.epoch,
            deal_ids: info.deal_ids(),
            expiration: ctx.policy.expiration(head, &info.pieces),
        };
        let deposit = ctx
            .chain
            .state_miner_initial_pledge_collateral(&ctx.miner, info.sector_number, &tok)
            .await
            .context("getting initial pledge collateral")?;
        let message = send(ctx, &tok, PRE_COMMIT_SECTOR_METHOD, deposit, &params).await?;
        info!(%message, "precommit message sent");
        anyhow::Ok(message)
    };
    match result.await {
        Ok(message) => SectorEvent::PreCommitted { message },
        Err(e) => SectorEvent::PreCommitFailed {
            error: format!("{e:#}"),
            resubmit: true,
        },
    }
}

async fn send<C: ChainApi, S, DB, P: serde::Serialize>(
    ctx: &SectorContext<C, S, DB>,
    tok: &TipsetToken,
    method: fvm_shared4::MethodNum,
    value: TokenAmount,
    params: &P,
) -> anyhow::Result<cid::Cid> {
    let from = ctx
        .chain
        .state_miner_worker_address(&ctx.miner, tok)
        .await
        .context("getting worker address")?;
    let msg = OutgoingMessage {
        from,
        to: ctx.miner,
        method,
        value,
        gas_limit: ctx.config.message_gas_limit,
        params: RawBytes::serialize(params)?,
    };
    ctx.chain
        .send_msg(msg)
        .await
        .with_context(|| format!("pushing message for method {method}"))
}

async fn pre_commit_wait<C: ChainApi, S, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> SectorEvent {
    let Some(message) = info.pre_commit_message else {
        return SectorEvent::PreCommitFailed {
            error: "no precommit message to wait for".into(),
            resubmit: true,
        };
    };
    match ctx.chain.state_wait_msg(message).await {
        Ok(lookup) if lookup.exit_code.is_success() => SectorEvent::PreCommitLanded {
            tipset: lookup.tipset,
        },
        Ok(lookup) => SectorEvent::PreCommitFailed {
            error: format!(
                "precommit message {message} failed with exit code {}",
                lookup.exit_code.value()
            ),
            resubmit: true,
        },
        Err(e) => SectorEvent::PreCommitFailed {
            error: format!("waiting for precommit message {message}: {e:#}"),
            resubmit: false,
        },
    }
}

async fn wait_seed<C: ChainApi, S, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> SectorEvent {
    let tok = info.pre_commit_tipset.clone().unwrap_or_default();
    let pci = match ctx
        .chain
        .state_sector_precommit_info(&ctx.miner, info.sector_number, &tok)
        .await
    {
        Ok(Some(pci)) => pci,
        Ok(None) => {
            return SectorEvent::PreCommitFailed {
                error: "precommit info not found on chain".into(),
                resubmit: true,
            };
        }
        Err(e) => {
            return SectorEvent::PreCommitFailed {
                error: format!("reading precommit info: {e:#}"),
                resubmit: false,
            };
        }
    };
    let seed_epoch = pci.pre_commit_epoch + ctx.config.precommit_challenge_delay;
    debug!(seed_epoch, "waiting for interactive seed");
    let result = async {
        let tok = ctx.chain.chain_wait_height(seed_epoch).await?;
        ctx.randomness(
            &tok,
            DomainSeparationTag::InteractiveSealChallengeSeed,
            seed_epoch,
        )
        .await
    };
    match result.await {
        Ok(seed) => SectorEvent::SeedReady { seed },
        Err(e) => SectorEvent::PreCommitFailed {
            error: format!("getting interactive seed: {e:#}"),
            resubmit: false,
        },
    }
}

async fn committing<C: ChainApi, S: Sealer, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> SectorEvent {
    let Some(proof) = &info.proof else {
        return match compute_proof(ctx, info).await {
            Ok(proof) => SectorEvent::ProofComputed {
                proof: RawBytes::new(proof),
            },
            Err(e) => SectorEvent::ComputeProofFailed {
                error: format!("{e:#}"),
            },
        };
    };
    let result = async {
        let (tok, _) = ctx.chain_head().await?;
        let params = ProveCommitSectorParams {
            sector_number: info.sector_number,
            proof: proof.bytes().to_vec(),
        };
        let message = send(
            ctx,
            &tok,
            PROVE_COMMIT_SECTOR_METHOD,
            TokenAmount::default(),
            &params,
        )
        .await?;
        info!(%message, "prove commit message sent");
        anyhow::Ok(message)
    };
    match result.await {
        Ok(message) => SectorEvent::CommitSubmitted { message },
        Err(e) => SectorEvent::CommitFailed {
            error: format!("{e:#}"),
            resubmit: true,
        },
    }
}

async fn compute_proof<C, S: Sealer, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> anyhow::Result<Vec<u8>> {
    let (Some(seal_proof), Some(ticket), Some(seed), Some(cids)) = (
        info.seal_proof,
        info.ticket.as_ref(),
        info.seed.as_ref(),
        info.cids.as_ref(),
    ) else {
        anyhow::bail!("sector is missing sealing outputs");
    };
    let sector = ctx.sector_id(info.sector_number);
    let c1 = ctx
        .sealer
        .seal_commit1(
            sector,
            seal_proof,
            &ticket.value,
            &seed.value,
            &info.piece_infos(),
            cids,
        )
        .await
        .context("computing seal commit 1")?;
    ctx.sealer
        .seal_commit2(ctx.sector_id(info.sector_number), &c1)
        .await
        .context("computing seal commit 2")
}

async fn commit_wait<C: ChainApi, S, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> SectorEvent {
    let Some(message) = info.commit_message else {
        return SectorEvent::CommitFailed {
            error: "no commit message to wait for".into(),
            resubmit: true,
        };
    };
    let lookup = match ctx.chain.state_wait_msg(message).await {
        Ok(lookup) => lookup,
        Err(e) => {
            return SectorEvent::CommitFailed {
                error: format!("waiting for commit message {message}: {e:#}"),
                resubmit: false,
            };
        }
    };
    if !lookup.exit_code.is_success() {
        return SectorEvent::CommitFailed {
            error: format!(
                "commit message {message} failed with exit code {}",
                lookup.exit_code.value()
            ),
            resubmit: true,
        };
    }
    match ctx
        .chain
        .state_sector_get_info(&ctx.miner, info.sector_number, &lookup.tipset)
        .await
    {
        Ok(Some(on_chain)) => SectorEvent::CommitLanded {
            expiration: on_chain.expiration,
        },
        Ok(None) => SectorEvent::CommitFailed {
            error: "sector not found on chain after commit".into(),
            resubmit: true,
        },
        Err(e) => SectorEvent::CommitFailed {
            error: format!("reading sector info: {e:#}"),
            resubmit: false,
        },
    }
}

async fn finalize<C, S: Sealer, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> SectorEvent {
    match ctx
        .sealer
        .finalize_sector(ctx.sector_id(info.sector_number))
        .await
    {
        Ok(()) => SectorEvent::Finalized,
        Err(e) => SectorEvent::FinalizeFailed {
            error: format!("{e:#}"),
        },
    }
}

async fn removing<C, S: Sealer, DB>(
    ctx: &SectorContext<C, S, DB>,
    info: &SectorInfo,
) -> SectorEvent {
    match ctx.sealer.remove(ctx.sector_id(info.sector_number)).await {
        Ok(()) => SectorEvent::Removed,
        Err(e) => SectorEvent::RemoveFailed {
            error: format!("{e:#}"),
        },
    }
}
