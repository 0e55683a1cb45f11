// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory chain and sealer used by the sealing tests.

use std::sync::Arc;
use std::time::Duration;

use ahash::HashMap;
use anyhow::{Context as _, anyhow, bail, ensure};
use async_trait::async_trait;
use cid::Cid;
use fvm_shared4::{
    MethodNum,
    address::Address,
    clock::ChainEpoch,
    deal::DealID,
    econ::TokenAmount,
    error::ExitCode,
    sector::{RegisteredSealProof, SectorID, SectorNumber},
};
use multihash_codetable::{Code, MultihashDigest as _};
use parking_lot::Mutex;
use tokio::{io::AsyncReadExt as _, sync::Semaphore};

use super::{
    Sealing,
    api::{ChainApi, PieceData, Sealer},
    config::SealingConfig,
    counter::StoredCounter,
    fsm::SectorState,
    policy::BasicPreCommitPolicy,
    types::*,
};
use crate::db::{MemoryDB, SectorStore, SettingsStore};

const RAW: u64 = 0x55;

pub fn test_cid(data: &[u8]) -> Cid {
    Cid::new_v1(RAW, Code::Blake2b256.digest(data))
}

fn tipset_token(height: ChainEpoch) -> TipsetToken {
    TipsetToken(height.to_be_bytes().to_vec())
}

#[derive(Default)]
pub struct ChainState {
    pub head: ChainEpoch,
    pub deals: HashMap<DealID, DealProposal>,
    pub sent: Vec<OutgoingMessage>,
    /// Exit code the next message for a method lands with.
    pub failures: HashMap<MethodNum, ExitCode>,
    receipts: HashMap<Cid, ExitCode>,
    pub precommits: HashMap<SectorNumber, (PreCommitOnChainInfo, PreCommitSectorParams)>,
    pub sectors: HashMap<SectorNumber, SectorOnChainInfo>,
    pub randomness: Vec<(DomainSeparationTag, ChainEpoch)>,
    /// Number of `state_wait_msg` calls made.
    pub message_waits: usize,
    /// Number of `chain_wait_height` calls made.
    pub height_waits: usize,
}

/// Chain whose messages land as soon as they are waited for, unless the
/// waits are gated.
pub struct TestChain {
    pub worker: Address,
    pub inner: Mutex<ChainState>,
    message_gate: Option<Arc<Semaphore>>,
    height_gate: Option<Arc<Semaphore>>,
}

async fn pass(gate: Option<Arc<Semaphore>>) -> anyhow::Result<()> {
    if let Some(gate) = gate {
        gate.acquire().await?.forget();
    }
    Ok(())
}

impl TestChain {
    pub fn new(head: ChainEpoch) -> Self {
        Self {
            worker: Address::new_id(1001),
            inner: Mutex::new(ChainState {
                head,
                ..Default::default()
            }),
            message_gate: None,
            height_gate: None,
        }
    }

    /// Message waits block until [`Self::open_gates`].
    pub fn gate_messages(mut self) -> Self {
        self.message_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Height waits block until [`Self::open_gates`].
    pub fn gate_heights(mut self) -> Self {
        self.height_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn open_gates(&self) {
        for gate in [&self.message_gate, &self.height_gate].into_iter().flatten() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn add_deal(&self, deal: DealID, proposal: DealProposal) {
        self.inner.lock().deals.insert(deal, proposal);
    }

    pub fn fail_next(&self, method: MethodNum, exit_code: ExitCode) {
        self.inner.lock().failures.insert(method, exit_code);
    }

    pub fn sent_methods(&self) -> Vec<MethodNum> {
        self.inner.lock().sent.iter().map(|m| m.method).collect()
    }
}

#[async_trait]
impl ChainApi for TestChain {
    async fn chain_head(&self) -> anyhow::Result<(TipsetToken, ChainEpoch)> {
        let head = self.inner.lock().head;
        Ok((tipset_token(head), head))
    }

    async fn state_miner_worker_address(
        &self,
        _miner: &Address,
        _tok: &TipsetToken,
    ) -> anyhow::Result<Address> {
        Ok(self.worker)
    }

    async fn state_sector_precommit_info(
        &self,
        _miner: &Address,
        sector: SectorNumber,
        _tok: &TipsetToken,
    ) -> anyhow::Result<Option<PreCommitOnChainInfo>> {
        Ok(self
            .inner
            .lock()
            .precommits
            .get(&sector)
            .map(|(info, _)| info.clone()))
    }

    async fn state_sector_get_info(
        &self,
        _miner: &Address,
        sector: SectorNumber,
        _tok: &TipsetToken,
    ) -> anyhow::Result<Option<SectorOnChainInfo>> {
        Ok(self.inner.lock().sectors.get(&sector).cloned())
    }

    async fn state_market_storage_deal(
        &self,
        deal: DealID,
        _tok: &TipsetToken,
    ) -> anyhow::Result<DealProposal> {
        self.inner
            .lock()
            .deals
            .get(&deal)
            .cloned()
            .with_context(|| format!("deal {deal} not found"))
    }

    async fn state_miner_initial_pledge_collateral(
        &self,
        _miner: &Address,
        _sector: SectorNumber,
        _tok: &TipsetToken,
    ) -> anyhow::Result<TokenAmount> {
        Ok(TokenAmount::from_atto(100))
    }

    async fn chain_get_randomness(
        &self,
        _tok: &TipsetToken,
        tag: DomainSeparationTag,
        epoch: ChainEpoch,
        entropy: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        self.inner.lock().randomness.push((tag, epoch));
        let mut value = format!("{tag:?}/{epoch}/").into_bytes();
        value.extend_from_slice(entropy);
        Ok(value)
    }

    async fn send_msg(&self, msg: OutgoingMessage) -> anyhow::Result<Cid> {
        let mut state = self.inner.lock();
        let cid = test_cid(&fvm_ipld_encoding::to_vec(&(
            state.sent.len(),
            msg.method,
            msg.params.bytes(),
        ))?);
        let exit_code = state.failures.remove(&msg.method).unwrap_or(ExitCode::OK);
        state.receipts.insert(cid, exit_code);
        if exit_code.is_success() {
            let head = state.head;
            match msg.method {
                PRE_COMMIT_SECTOR_METHOD => {
                    let params: PreCommitSectorParams = msg.params.deserialize()?;
                    let info = PreCommitOnChainInfo {
                        sealed_cid: params.sealed_cid,
                        pre_commit_epoch: head,
                        deposit: msg.value.clone(),
                    };
                    state.precommits.insert(params.sector_number, (info, params));
                }
                PROVE_COMMIT_SECTOR_METHOD => {
                    let params: ProveCommitSectorParams = msg.params.deserialize()?;
                    let (pci, pre) = state
                        .precommits
                        .get(&params.sector_number)
                        .cloned()
                        .context("prove commit without precommit")?;
                    state.sectors.insert(
                        params.sector_number,
                        SectorOnChainInfo {
                            sector_number: params.sector_number,
                            sealed_cid: pci.sealed_cid,
                            activation: head,
                            expiration: pre.expiration,
                        },
                    );
                }
                other => bail!("unexpected method {other}"),
            }
        }
        state.sent.push(msg);
        Ok(cid)
    }

    async fn state_wait_msg(&self, msg: Cid) -> anyhow::Result<MsgLookup> {
        let gate = {
            self.inner.lock().message_waits += 1;
            self.message_gate.clone()
        };
        pass(gate).await?;
        let mut state = self.inner.lock();
        let exit_code = *state
            .receipts
            .get(&msg)
            .ok_or_else(|| anyhow!("message {msg} was never sent"))?;
        state.head += 1;
        Ok(MsgLookup {
            message: msg,
            exit_code,
            tipset: tipset_token(state.head),
            height: state.head,
        })
    }

    async fn chain_wait_height(&self, height: ChainEpoch) -> anyhow::Result<TipsetToken> {
        let gate = {
            self.inner.lock().height_waits += 1;
            self.height_gate.clone()
        };
        pass(gate).await?;
        let mut state = self.inner.lock();
        state.head = state.head.max(height);
        Ok(tipset_token(height))
    }
}

#[derive(Default)]
pub struct SealerState {
    /// Bytes written per sector.
    pub data: HashMap<SectorNumber, Vec<u8>>,
    pub initialized: Vec<SectorNumber>,
    pub finalized: Vec<SectorNumber>,
    pub removed: Vec<SectorNumber>,
    pub pre_commit1_calls: usize,
    pub fail_new_sector: bool,
    /// Error returned by the next PC1 call.
    pub fail_pre_commit1: Option<String>,
}

/// Sealer that keeps sector data in memory and derives "proofs" from it.
pub struct TestSealer {
    sector_size: u64,
    pub inner: Mutex<SealerState>,
    /// When set, PC1 waits for a permit.
    pub pre_commit1_gate: Option<Arc<Semaphore>>,
}

impl TestSealer {
    pub fn new(sector_size: u64) -> Self {
        Self {
            sector_size,
            inner: Default::default(),
            pre_commit1_gate: None,
        }
    }

    pub fn gated(sector_size: u64) -> Self {
        Self {
            pre_commit1_gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new(sector_size)
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.pre_commit1_gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn sector_data(&self, sector: SectorNumber) -> Vec<u8> {
        self.inner
            .lock()
            .data
            .get(&sector)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sealer for TestSealer {
    fn sector_size(&self) -> u64 {
        self.sector_size
    }

    fn seal_proof_type(&self) -> anyhow::Result<RegisteredSealProof> {
        Ok(RegisteredSealProof::StackedDRG2KiBV1P1)
    }

    async fn new_sector(&self, sector: SectorID) -> anyhow::Result<()> {
        let mut state = self.inner.lock();
        ensure!(!state.fail_new_sector, "disk full");
        state.initialized.push(sector.number);
        Ok(())
    }

    async fn add_piece(
        &self,
        sector: SectorID,
        existing: &[u64],
        size: u64,
        mut data: PieceData,
    ) -> anyhow::Result<PieceInfo> {
        let mut bytes = vec![];
        data.read_to_end(&mut bytes).await?;
        ensure!(
            bytes.len() as u64 == size,
            "piece has {} bytes, expected {size}",
            bytes.len()
        );
        let offset = usize::try_from(existing.iter().sum::<u64>())?;
        let mut state = self.inner.lock();
        let written = state.data.entry(sector.number).or_default();
        written.truncate(offset);
        ensure!(written.len() == offset, "gap before offset {offset}");
        written.extend_from_slice(&bytes);
        Ok(PieceInfo {
            size,
            cid: test_cid(&bytes),
        })
    }

    async fn seal_pre_commit1(
        &self,
        sector: SectorID,
        _seal_proof: RegisteredSealProof,
        ticket: &[u8],
        _pieces: &[PieceInfo],
    ) -> anyhow::Result<Vec<u8>> {
        let gate = {
            let mut state = self.inner.lock();
            state.pre_commit1_calls += 1;
            if let Some(error) = state.fail_pre_commit1.take() {
                bail!(error);
            }
            self.pre_commit1_gate.clone()
        };
        pass(gate).await?;
        let data = self.sector_data(sector.number);
        Ok([test_cid(&data).to_bytes(), ticket.to_vec()].concat())
    }

    async fn seal_pre_commit2(
        &self,
        _sector: SectorID,
        pre_commit1_out: &[u8],
    ) -> anyhow::Result<SectorCids> {
        Ok(SectorCids {
            unsealed: test_cid(&[&b"d:"[..], pre_commit1_out].concat()),
            sealed: test_cid(&[&b"r:"[..], pre_commit1_out].concat()),
        })
    }

    async fn seal_commit1(
        &self,
        _sector: SectorID,
        _seal_proof: RegisteredSealProof,
        ticket: &[u8],
        seed: &[u8],
        _pieces: &[PieceInfo],
        cids: &SectorCids,
    ) -> anyhow::Result<Vec<u8>> {
        Ok([cids.sealed.to_bytes(), ticket.to_vec(), seed.to_vec()].concat())
    }

    async fn seal_commit2(&self, _sector: SectorID, commit1_out: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(test_cid(commit1_out).to_bytes())
    }

    async fn finalize_sector(&self, sector: SectorID) -> anyhow::Result<()> {
        self.inner.lock().finalized.push(sector.number);
        Ok(())
    }

    async fn remove(&self, sector: SectorID) -> anyhow::Result<()> {
        let mut state = self.inner.lock();
        state.data.remove(&sector.number);
        state.removed.push(sector.number);
        Ok(())
    }
}

pub const MINER: u64 = 1000;
/// Head the test chain starts at. Deals must start after it.
pub const HEAD: ChainEpoch = 2000;

pub fn test_config() -> SealingConfig {
    SealingConfig {
        padding_unit: 128,
        proving_period_epochs: 60,
        precommit_expiration_epochs: 1000,
        seal_randomness_lookback: 10,
        precommit_challenge_delay: 5,
        ..Default::default()
    }
}

pub struct Harness<DB> {
    pub chain: Arc<TestChain>,
    pub sealer: Arc<TestSealer>,
    pub store: Arc<DB>,
    pub sealing: Sealing<TestChain, TestSealer, DB>,
}

impl<DB> Harness<DB>
where
    DB: SectorStore + SettingsStore + Send + Sync + 'static,
{
    pub fn new(store: Arc<DB>, sealer: TestSealer, config: SealingConfig) -> Self {
        Self::with_parts(Arc::new(TestChain::new(HEAD)), Arc::new(sealer), store, config)
    }

    /// Builds a fresh orchestrator over existing collaborators, as a restarted
    /// process would.
    pub fn with_parts(
        chain: Arc<TestChain>,
        sealer: Arc<TestSealer>,
        store: Arc<DB>,
        config: SealingConfig,
    ) -> Self {
        let sealing = Sealing::new(
            Address::new_id(MINER),
            chain.clone(),
            sealer.clone(),
            store.clone(),
            Arc::new(StoredCounter::new(store.clone())),
            Arc::new(BasicPreCommitPolicy::from_config(&config)),
            config,
        )
        .unwrap();
        Self {
            chain,
            sealer,
            store,
            sealing,
        }
    }

    /// Registers a deal for `data`, starting 100 epochs after the current
    /// head, and returns its deal info.
    pub fn deal(&self, deal_id: DealID, data: &[u8]) -> DealInfo {
        let head = self.chain.inner.lock().head;
        let schedule = DealSchedule {
            start_epoch: head + 100,
            end_epoch: head + 500,
        };
        self.chain.add_deal(
            deal_id,
            DealProposal {
                piece_cid: test_cid(data),
                piece_size: data.len() as u64,
                provider: Address::new_id(MINER),
                start_epoch: schedule.start_epoch,
                end_epoch: schedule.end_epoch,
            },
        );
        DealInfo { deal_id, schedule }
    }

    pub async fn add_piece(&self, deal_id: DealID, data: Vec<u8>) -> (SectorNumber, u64) {
        let deal = self.deal(deal_id, &data);
        self.sealing
            .add_piece_to_any_sector(data.len() as u64, Box::new(std::io::Cursor::new(data)), deal)
            .await
            .unwrap()
    }

    /// Polls the sector until it reaches `state`.
    pub async fn wait_for(&self, sector: SectorNumber, state: SectorState) -> SectorInfo {
        let mut last = None;
        for _ in 0..500 {
            let info = self.sealing.sector_info(sector).unwrap();
            if info.state == state {
                return info;
            }
            last = Some(info.state);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("sector {sector} did not reach {state}, last state {last:?}");
    }
}

impl Harness<MemoryDB> {
    pub fn memory() -> Self {
        Self::new(
            Arc::new(MemoryDB::default()),
            TestSealer::new(1024),
            test_config(),
        )
    }
}
