// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use ahash::HashMap;
use fvm_shared4::{
    ActorID,
    address::Address,
    sector::{SectorID, SectorNumber},
};
use itertools::Itertools as _;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, debug, error, info_span, warn};

use super::{Rules, SectorEvent, SectorState, handlers, plan};
use crate::db::{SectorStore, SectorStoreExt as _};
use crate::metrics::HistogramTimerExt as _;
use crate::sealing::{
    api::{ChainApi, Sealer},
    config::SealingConfig,
    metrics::{self, StateLabel},
    pieces::SectorGeometry,
    policy::PreCommitPolicy,
    types::SectorInfo,
};

/// Everything a sector worker needs, shared by all workers.
pub(crate) struct SectorContext<C, S, DB> {
    pub miner: Address,
    pub miner_id: ActorID,
    pub chain: Arc<C>,
    pub sealer: Arc<S>,
    pub store: Arc<DB>,
    pub policy: Arc<dyn PreCommitPolicy>,
    pub config: SealingConfig,
    pub geometry: SectorGeometry,
}

impl<C, S, DB> SectorContext<C, S, DB> {
    pub fn sector_id(&self, number: SectorNumber) -> SectorID {
        SectorID {
            miner: self.miner_id,
            number,
        }
    }

    pub fn rules(&self) -> Rules {
        Rules {
            geometry: self.geometry,
            remove_proving_sectors: self.config.remove_proving_sectors,
        }
    }
}

/// An event that has been appended to the sector log under `seq`.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub seq: u64,
    pub event: SectorEvent,
}

/// Mailboxes and tasks of the running sector workers.
#[derive(Default)]
pub(crate) struct Machines {
    mailboxes: Mutex<HashMap<SectorNumber, flume::Sender<Envelope>>>,
    tasks: Mutex<JoinSet<()>>,
    cancel: CancellationToken,
}

impl Machines {
    /// Hands `envelope` to the sector's worker, starting one if none is
    /// running. The event is already durable, so a worker that is gone picks
    /// it up from the log when it is started again.
    pub fn deliver<C, S, DB>(
        &self,
        ctx: &Arc<SectorContext<C, S, DB>>,
        sector: SectorNumber,
        envelope: Option<Envelope>,
    ) where
        C: ChainApi,
        S: Sealer,
        DB: SectorStore + Send + Sync + 'static,
    {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut mailboxes = self.mailboxes.lock();
        // workers that exited dropped their receiver
        mailboxes.retain(|_, tx| !tx.is_disconnected());
        let tx = match mailboxes.get(&sector).cloned() {
            Some(tx) => tx,
            None => {
                let (tx, rx) = flume::unbounded();
                let worker = SectorWorker {
                    ctx: ctx.clone(),
                    info: SectorInfo::new(sector),
                    mailbox: rx,
                    cancel: self.cancel.child_token(),
                };
                self.tasks
                    .lock()
                    .spawn(worker.run().instrument(info_span!("sector", sector)));
                mailboxes.insert(sector, tx.clone());
                tx
            }
        };
        if let Some(envelope) = envelope {
            if tx.send(envelope).is_err() {
                debug!(sector, "worker exited, event left in the log");
            }
        }
    }

    /// Sectors with a live worker.
    pub fn running(&self) -> Vec<SectorNumber> {
        self.mailboxes
            .lock()
            .iter()
            .filter(|(_, tx)| !tx.is_disconnected())
            .map(|(&sector, _)| sector)
            .sorted()
            .collect()
    }

    #[cfg(test)]
    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.lock().len()
    }

    /// Stops all workers and waits for them to reach a suspension point.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!("sector worker failed: {e}");
            }
        }
        self.mailboxes.lock().clear();
    }
}

/// Drives a single sector. Events are applied strictly in log order: the
/// mailbox only carries hints, and whenever a delivered event is not the next
/// one in sequence the worker catches up from the store.
struct SectorWorker<C, S, DB> {
    ctx: Arc<SectorContext<C, S, DB>>,
    info: SectorInfo,
    mailbox: flume::Receiver<Envelope>,
    cancel: CancellationToken,
}

impl<C, S, DB> SectorWorker<C, S, DB>
where
    C: ChainApi,
    S: Sealer,
    DB: SectorStore + Send + Sync + 'static,
{
    async fn run(mut self) {
        match self.work().await {
            Ok(()) => debug!(state = %self.info.state, "sector worker stopped"),
            Err(e) => error!("sector worker stopped: {e:#}"),
        }
    }

    async fn work(&mut self) -> anyhow::Result<()> {
        let number = self.info.sector_number;
        if let Some(info) = self.ctx.store.load::<SectorInfo>(number)? {
            self.info = info;
        }
        self.catch_up()?;

        let mailbox = self.mailbox.clone();
        let cancel = self.cancel.clone();
        loop {
            while let Ok(envelope) = mailbox.try_recv() {
                self.deliver(envelope)?;
            }
            if self.info.state.is_terminal() || cancel.is_cancelled() {
                return Ok(());
            }

            let state = self.info.state;
            if !state.is_active() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    received = mailbox.recv_async() => match received {
                        Ok(envelope) => self.deliver(envelope)?,
                        Err(_) => return Ok(()),
                    },
                }
                continue;
            }

            let step = handlers::step(self.ctx.clone(), self.info.clone());
            let event = if state.awaits_chain() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    received = mailbox.recv_async() => {
                        match received {
                            Ok(envelope) => self.deliver(envelope)?,
                            Err(_) => return Ok(()),
                        }
                        // the wait is re-issued from the new state
                        continue;
                    }
                    event = step => event,
                }
            } else {
                let histogram = metrics::STEP_DURATION
                    .get_or_create(&StateLabel::new(state.into()))
                    .clone();
                let _timer = histogram.start_timer();
                step.await
            };
            match event {
                Some(event) => self.submit(event)?,
                None => warn!(%state, "no step for active state"),
            }
        }
    }

    fn deliver(&mut self, envelope: Envelope) -> anyhow::Result<()> {
        let next = self.info.applied + 1;
        if envelope.seq < next {
            return Ok(());
        }
        if envelope.seq == next {
            self.apply(envelope.seq, envelope.event);
            return self.commit();
        }
        self.catch_up()
    }

    /// Logs an event produced by this worker and applies everything up to it.
    fn submit(&mut self, event: SectorEvent) -> anyhow::Result<()> {
        self.ctx
            .store
            .append_event(self.info.sector_number, &event)?;
        self.catch_up()
    }

    fn catch_up(&mut self) -> anyhow::Result<()> {
        let pending = self
            .ctx
            .store
            .pending_events::<SectorEvent>(self.info.sector_number, self.info.applied)?;
        if pending.is_empty() {
            return Ok(());
        }
        for (seq, event) in pending {
            self.apply(seq, event);
        }
        self.commit()
    }

    fn apply(&mut self, seq: u64, event: SectorEvent) {
        let from = self.info.state;
        let name: &'static str = (&event).into();
        match plan(&mut self.info, event, &self.ctx.rules()) {
            Ok(()) => {
                let to = self.info.state;
                debug!(seq, event = name, %from, %to, "applied sector event");
                metrics::STATE_TRANSITIONS
                    .get_or_create(&StateLabel::new(to.into()))
                    .inc();
                if to.is_failed() && !from.is_failed() {
                    metrics::SECTORS_FAILED
                        .get_or_create(&StateLabel::new(to.into()))
                        .inc();
                    warn!(
                        state = %to,
                        error = self.info.last_error.as_deref().unwrap_or_default(),
                        "sector failed"
                    );
                }
                if to == SectorState::Removed {
                    debug!("sector removed");
                }
            }
            Err(e) => warn!(seq, "ignoring sector event: {e}"),
        }
        self.info.applied = seq;
    }

    fn commit(&self) -> anyhow::Result<()> {
        self.ctx
            .store
            .commit(self.info.sector_number, self.info.applied, &self.info)
            .inspect_err(|e| error!("failed to persist sector state: {e:#}"))
    }
}
