// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-sector state machine. Each sector owns a durable event log; a worker
//! task folds the log into the sector record with [`plan`] and drives the
//! sector through the pipeline from there.

mod events;
pub(crate) mod handlers;
mod states;
pub(crate) mod worker;

pub use events::SectorEvent;
pub use states::SectorState;

use super::{Error, pieces::SectorGeometry, types::SectorInfo};

/// Deployment settings the transition table depends on.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Rules {
    pub geometry: SectorGeometry,
    /// Whether `Remove` is accepted once a sector is proving.
    pub remove_proving_sectors: bool,
}

/// Applies `event` to `info`. Invalid events leave `info` untouched.
pub(crate) fn plan(info: &mut SectorInfo, event: SectorEvent, rules: &Rules) -> Result<(), Error> {
    use SectorEvent as E;
    use SectorState as S;

    let state = info.state;
    let next = match (state, event) {
        (S::Empty, E::Start { seal_proof }) => {
            info.seal_proof = Some(seal_proof);
            S::Packing
        }
        (S::Empty, E::StartCC { seal_proof, pieces }) => {
            info.seal_proof = Some(seal_proof);
            info.committed_capacity = true;
            info.pieces = pieces;
            S::Packing
        }
        (S::Packing, E::AddPiece { piece }) if !info.committed_capacity => {
            info.pieces.push(piece);
            S::Packing
        }
        (S::Packing, E::StartPacking) => {
            info.pending_fillers = rules.geometry.fillers(info.stored());
            S::PreCommit1
        }

        (S::PreCommit1, E::FillersAdded { pieces }) => {
            info.pieces.extend(pieces);
            info.pending_fillers.clear();
            S::PreCommit1
        }
        (S::PreCommit1, E::PreCommit1Done { ticket, out }) => {
            info.ticket = Some(ticket);
            info.pre_commit1_out = Some(out);
            S::PreCommit2
        }
        (S::PreCommit1, E::SealPreCommit1Failed { error }) => {
            fail(info, error, S::PreCommit1, S::SealPreCommit1Failed)
        }
        (S::PreCommit2, E::PreCommit2Done { cids }) => {
            info.cids = Some(cids);
            S::PreCommitting
        }
        (S::PreCommit2, E::SealPreCommit2Failed { error }) => {
            fail(info, error, S::PreCommit2, S::SealPreCommit2Failed)
        }
        (S::PreCommitting, E::PreCommitted { message }) => {
            info.pre_commit_message = Some(message);
            S::PreCommitWait
        }
        (S::PreCommitWait, E::PreCommitLanded { tipset }) => {
            info.pre_commit_tipset = Some(tipset);
            S::WaitSeed
        }
        (
            S::PreCommitting | S::PreCommitWait | S::WaitSeed,
            E::PreCommitFailed { error, resubmit },
        ) => {
            let resume = if resubmit {
                info.pre_commit_message = None;
                info.pre_commit_tipset = None;
                S::PreCommitting
            } else {
                state
            };
            fail(info, error, resume, S::PreCommitFailed)
        }

        (S::WaitSeed, E::SeedReady { seed }) => {
            info.seed = Some(seed);
            S::Committing
        }
        (S::Committing, E::ProofComputed { proof }) => {
            info.proof = Some(proof);
            S::Committing
        }
        (S::Committing, E::ComputeProofFailed { error }) => {
            fail(info, error, S::Committing, S::ComputeProofFailed)
        }
        (S::Committing, E::CommitSubmitted { message }) => {
            info.commit_message = Some(message);
            S::CommitWait
        }
        (S::Committing | S::CommitWait, E::CommitFailed { error, resubmit }) => {
            let resume = if resubmit {
                info.commit_message = None;
                info.proof = None;
                S::Committing
            } else {
                state
            };
            fail(info, error, resume, S::CommitFailed)
        }
        (S::CommitWait, E::CommitLanded { expiration }) => {
            info.expiration = Some(expiration);
            S::FinalizeSector
        }
        (S::FinalizeSector, E::Finalized) => S::Proving,
        (S::FinalizeSector, E::FinalizeFailed { error }) => {
            fail(info, error, S::FinalizeSector, S::FinalizeFailed)
        }

        (failed, E::Retry) if failed.is_failed() => {
            info.last_error = None;
            info.failed_stage
                .take()
                .unwrap_or_else(|| default_resume_stage(failed))
        }
        (S::Proving, E::Remove) if rules.remove_proving_sectors => S::Removing,
        (from, E::Remove) if !matches!(from, S::Proving | S::Removing | S::Removed) => {
            S::Removing
        }
        (S::Removing, E::Removed) => S::Removed,
        (S::Removing, E::RemoveFailed { error }) => {
            fail(info, error, S::Removing, S::RemoveFailed)
        }

        (state, event) => {
            return Err(Error::InvalidTransition {
                sector: info.sector_number,
                state,
                event: (&event).into(),
            });
        }
    };
    info.state = next;
    Ok(())
}

fn fail(
    info: &mut SectorInfo,
    error: String,
    resume: SectorState,
    failed: SectorState,
) -> SectorState {
    info.last_error = Some(error);
    info.failed_stage = Some(resume);
    failed
}

fn default_resume_stage(failed: SectorState) -> SectorState {
    use SectorState::*;
    match failed {
        SealPreCommit1Failed => PreCommit1,
        SealPreCommit2Failed => PreCommit2,
        PreCommitFailed => PreCommitting,
        ComputeProofFailed | CommitFailed => Committing,
        FinalizeFailed => FinalizeSector,
        RemoveFailed => Removing,
        other => other,
    }
}

/// Folds events that have not been applied yet into `info`, skipping invalid
/// ones the same way a worker does.
pub(crate) fn replay(
    mut info: SectorInfo,
    events: Vec<(u64, SectorEvent)>,
    rules: &Rules,
) -> SectorInfo {
    for (seq, event) in events {
        let _ = plan(&mut info, event, rules);
        info.applied = seq;
    }
    info
}
