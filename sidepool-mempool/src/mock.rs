//! In-memory collaborators for tests and simulations.
//!
//! [`MockChain`] is a tiny confirmed chain that understands sidechain
//! creation, forward transfers and certificates. It can be forked and
//! re-joined to simulate network splits. [`MockOracle`] and
//! [`RecordingSink`] stand in for the proof layer and the relay.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sidepool_core::{
    hash, hash_all, Amount, BlockHash, Certificate, ChainTip, EntryId, EpochNumber,
    EpochSchedule, Error, Height, ProofReference, Quality, Result, SidechainFees, SidechainId,
    TipChange,
};

use crate::eviction::EvictionReport;
use crate::provider::{
    ChainSnapshotProvider, ConfirmedCertificate, ConfirmedSidechain, ConfirmedSnapshot,
    ProofOracle, RelaySink,
};

/// Creation parameters for a mock sidechain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSidechainParams {
    /// Blocks per epoch.
    pub epoch_length: u32,
    /// Initial deposit.
    pub amount: Amount,
    /// Minimum fees.
    pub fees: SidechainFees,
    /// Field elements per backward-transfer request.
    pub request_data_length: usize,
}

impl Default for MockSidechainParams {
    fn default() -> Self {
        Self {
            epoch_length: 10,
            amount: 1_000,
            fees: SidechainFees::default(),
            request_data_length: 1,
        }
    }
}

#[derive(Debug, Clone)]
enum ChainEvent {
    CreateSidechain {
        id: SidechainId,
        params: MockSidechainParams,
    },
    ForwardTransfer {
        sidechain: SidechainId,
        amount: Amount,
    },
    Certificate {
        sidechain: SidechainId,
        epoch: EpochNumber,
        quality: Quality,
        backward_transfer_total: Amount,
    },
}

#[derive(Debug, Clone)]
struct MockBlock {
    hash: BlockHash,
    events: Vec<ChainEvent>,
}

#[derive(Debug, Clone)]
struct ChainInner {
    blocks: Vec<MockBlock>,
    pending: Vec<ChainEvent>,
    maturity: Height,
    failing: bool,
}

/// Running totals while replaying blocks.
struct Ledger {
    schedule: EpochSchedule,
    deposits: Vec<(Height, Amount)>,
    withdrawn: Amount,
    last: Option<ConfirmedCertificate>,
    fees: SidechainFees,
    request_data_length: usize,
}

impl ChainInner {
    fn tip(&self) -> ChainTip {
        let height = self.blocks.len() as Height - 1;
        ChainTip::new(height, self.blocks[height as usize].hash)
    }

    fn snapshot_at(&self, height: Height) -> ConfirmedSnapshot {
        let mut ledgers: BTreeMap<SidechainId, Ledger> = BTreeMap::new();

        for (block_height, block) in self.blocks.iter().enumerate().take(height as usize + 1) {
            let block_height = block_height as Height;
            let matures_at = block_height + self.maturity;
            for event in &block.events {
                match *event {
                    ChainEvent::CreateSidechain { id, params } => {
                        ledgers.entry(id).or_insert(Ledger {
                            schedule: EpochSchedule::new(block_height, params.epoch_length),
                            deposits: vec![(matures_at, params.amount)],
                            withdrawn: 0,
                            last: None,
                            fees: params.fees,
                            request_data_length: params.request_data_length,
                        });
                    }
                    ChainEvent::ForwardTransfer { sidechain, amount } => {
                        if let Some(ledger) = ledgers.get_mut(&sidechain) {
                            ledger.deposits.push((matures_at, amount));
                        }
                    }
                    ChainEvent::Certificate {
                        sidechain,
                        epoch,
                        quality,
                        backward_transfer_total,
                    } => {
                        if let Some(ledger) = ledgers.get_mut(&sidechain) {
                            // A better certificate for the same epoch replaces the earlier one.
                            if let Some(previous) = ledger.last.filter(|c| c.epoch == epoch) {
                                ledger.withdrawn -= previous.backward_transfer_total;
                            }
                            ledger.withdrawn += backward_transfer_total;
                            ledger.last = Some(ConfirmedCertificate {
                                epoch,
                                quality,
                                backward_transfer_total,
                            });
                        }
                    }
                }
            }
        }

        let sidechains = ledgers
            .into_iter()
            .map(|(id, ledger)| {
                let mut immature_amounts = BTreeMap::new();
                let mut mature = 0;
                for (at, amount) in &ledger.deposits {
                    if *at <= height {
                        mature += amount;
                    } else {
                        *immature_amounts.entry(*at).or_insert(0) += amount;
                    }
                }
                ConfirmedSidechain {
                    id,
                    schedule: ledger.schedule,
                    ceasing_height: ledger.schedule.ceasing_height(ledger.last.map(|c| c.epoch)),
                    balance: mature - ledger.withdrawn,
                    immature_amounts,
                    last_certificate: ledger.last,
                    fees: ledger.fees,
                    request_data_length: ledger.request_data_length,
                }
            })
            .collect();

        ConfirmedSnapshot {
            tip: ChainTip::new(height, self.blocks[height as usize].hash),
            sidechains,
        }
    }
}

/// Shared handle to an in-memory confirmed chain.
///
/// Clones share the same chain; [`MockChain::fork`] makes an independent copy.
#[derive(Debug, Clone)]
pub struct MockChain {
    inner: Arc<RwLock<ChainInner>>,
    nonce: Arc<AtomicU64>,
}

impl MockChain {
    /// A chain holding only the genesis block (height 0).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ChainInner {
                blocks: vec![MockBlock {
                    hash: BlockHash(hash(b"genesis")),
                    events: Vec::new(),
                }],
                pending: Vec::new(),
                maturity: 0,
                failing: false,
            })),
            nonce: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Blocks a deposit waits before it counts toward the balance.
    pub fn with_maturity(self, depth: Height) -> Self {
        self.inner.write().maturity = depth;
        self
    }

    /// Queue a sidechain creation with default parameters and `amount`.
    ///
    /// The sidechain is created at the height of the next mined block.
    pub fn create_sidechain(&self, name: &[u8], epoch_length: u32, amount: Amount) -> SidechainId {
        self.create_sidechain_with(
            name,
            MockSidechainParams {
                epoch_length,
                amount,
                ..Default::default()
            },
        )
    }

    /// Queue a sidechain creation.
    pub fn create_sidechain_with(&self, name: &[u8], params: MockSidechainParams) -> SidechainId {
        let id = SidechainId::new(hash(name));
        self.inner
            .write()
            .pending
            .push(ChainEvent::CreateSidechain { id, params });
        id
    }

    /// Queue a forward transfer.
    pub fn forward_transfer(&self, sidechain: SidechainId, amount: Amount) {
        self.inner
            .write()
            .pending
            .push(ChainEvent::ForwardTransfer { sidechain, amount });
    }

    /// Queue a certificate.
    pub fn certify(&self, sidechain: SidechainId, epoch: EpochNumber, quality: Quality, backward_transfer_total: Amount) {
        self.inner.write().pending.push(ChainEvent::Certificate {
            sidechain,
            epoch,
            quality,
            backward_transfer_total,
        });
    }

    /// Queue a mempool certificate for confirmation.
    pub fn confirm_certificate(&self, certificate: &Certificate) {
        self.certify(
            certificate.sidechain_id,
            certificate.epoch,
            certificate.quality,
            certificate.backward_transfer_total(),
        );
    }

    /// Mine one block carrying every queued event.
    pub fn mine(&self) -> ChainTip {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write();
        let parent = inner.tip();
        let height = parent.height + 1;
        let block_hash = BlockHash(hash_all(&[
            parent.hash.as_hash().as_bytes().as_slice(),
            &height.to_le_bytes()[..],
            &nonce.to_le_bytes()[..],
        ]));
        let events = std::mem::take(&mut inner.pending);
        inner.blocks.push(MockBlock {
            hash: block_hash,
            events,
        });
        inner.tip()
    }

    /// Mine until the tip reaches `height`.
    pub fn mine_to(&self, height: Height) -> ChainTip {
        let mut tip = self.tip();
        while tip.height < height {
            tip = self.mine();
        }
        tip
    }

    /// Current tip.
    pub fn tip(&self) -> ChainTip {
        self.inner.read().tip()
    }

    /// An independent copy sharing history up to the current tip.
    pub fn fork(&self) -> MockChain {
        let mut copy = self.inner.read().clone();
        copy.pending.clear();
        Self {
            inner: Arc::new(RwLock::new(copy)),
            nonce: Arc::clone(&self.nonce),
        }
    }

    /// Switch to `other`'s blocks, as a node does when a heavier chain wins.
    pub fn adopt(&self, other: &MockChain) -> TipChange {
        let blocks = other.inner.read().blocks.clone();
        let mut inner = self.inner.write();
        let old = inner.tip();
        inner.blocks = blocks;
        inner.pending.clear();
        TipChange::new(old, inner.tip())
    }

    /// Remove the tip block. Genesis is never removed.
    pub fn disconnect(&self) -> TipChange {
        let mut inner = self.inner.write();
        let old = inner.tip();
        if inner.blocks.len() > 1 {
            inner.blocks.pop();
        }
        TipChange::new(old, inner.tip())
    }

    /// Confirmed state of one sidechain at the tip.
    pub fn sidechain(&self, id: &SidechainId) -> Option<ConfirmedSidechain> {
        let inner = self.inner.read();
        let height = inner.tip().height;
        inner
            .snapshot_at(height)
            .sidechains
            .into_iter()
            .find(|sc| sc.id == *id)
    }

    /// Make snapshot requests fail.
    pub fn set_failing(&self, failing: bool) {
        self.inner.write().failing = failing;
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainSnapshotProvider for MockChain {
    fn snapshot(&self, tip: &ChainTip) -> Result<ConfirmedSnapshot> {
        let inner = self.inner.read();
        if inner.failing {
            return Err(Error::snapshot("mock chain unavailable"));
        }
        match inner.blocks.get(tip.height as usize) {
            Some(block) if block.hash == tip.hash => Ok(inner.snapshot_at(tip.height)),
            _ => Err(Error::snapshot(format!("tip {tip} is not on this chain"))),
        }
    }
}

/// Proof oracle accepting every token except those explicitly rejected.
#[derive(Debug, Default)]
pub struct MockOracle {
    rejected: RwLock<BTreeSet<ProofReference>>,
}

impl MockOracle {
    /// An oracle that accepts everything.
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Refuse a proof reference from now on.
    pub fn reject(&self, proof: ProofReference) {
        self.rejected.write().insert(proof);
    }
}

impl ProofOracle for MockOracle {
    fn attest(&self, certificate: &Certificate) -> std::result::Result<(), String> {
        if self.rejected.read().contains(&certificate.proof_reference) {
            Err(format!("proof {} not attested", certificate.proof_reference.0))
        } else {
            Ok(())
        }
    }
}

/// Relay sink that records every report.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: RwLock<Vec<EvictionReport>>,
    fail_next: RwLock<Option<String>>,
}

impl RecordingSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next report with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.write() = Some(reason.into());
    }

    /// All accepted reports, oldest first.
    pub fn reports(&self) -> Vec<EvictionReport> {
        self.reports.read().clone()
    }

    /// The most recent accepted report.
    pub fn last(&self) -> Option<EvictionReport> {
        self.reports.read().last().cloned()
    }

    /// Every identifier reported as evicted.
    pub fn evicted(&self) -> BTreeSet<EntryId> {
        self.reports
            .read()
            .iter()
            .flat_map(|report| report.evicted.iter().copied())
            .collect()
    }
}

impl RelaySink for RecordingSink {
    fn publish(&self, report: &EvictionReport) -> Result<()> {
        if let Some(reason) = self.fail_next.write().take() {
            return Err(Error::relay(reason));
        }
        self.reports.write().push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_chain_balances() {
        let chain = MockChain::new();
        let sc = chain.create_sidechain(b"sc", 10, 100);
        chain.mine_to(10);
        chain.forward_transfer(sc, 20);
        chain.certify(sc, 0, 5, 30);
        chain.mine();

        let state = chain.sidechain(&sc).unwrap();
        assert_eq!(state.schedule.creation_height(), 1);
        assert_eq!(state.balance, 90);
        assert_eq!(state.last_certificate.map(|c| c.epoch), Some(0));

        // Higher-quality certificate for the same epoch replaces the withdrawal.
        chain.certify(sc, 0, 7, 10);
        chain.mine();
        assert_eq!(chain.sidechain(&sc).unwrap().balance, 110);
    }

    #[test]
    fn test_mock_chain_maturity() {
        let chain = MockChain::new().with_maturity(3);
        let sc = chain.create_sidechain(b"sc", 10, 100);
        chain.mine();
        let state = chain.sidechain(&sc).unwrap();
        assert_eq!(state.balance, 0);
        assert_eq!(state.immature_amounts.get(&4), Some(&100));

        chain.mine_to(4);
        assert_eq!(chain.sidechain(&sc).unwrap().balance, 100);
    }

    #[test]
    fn test_fork_and_adopt() {
        let chain = MockChain::new();
        chain.mine_to(5);
        let other = chain.fork();
        chain.mine_to(7);
        other.mine_to(8);

        let change = chain.adopt(&other);
        assert_eq!(change.old.height, 7);
        assert_eq!(change.new, other.tip());
        assert!(chain.snapshot(&change.old).is_err());
        assert!(chain.snapshot(&change.new).is_ok());
    }

    #[test]
    fn test_disconnect() {
        let chain = MockChain::new();
        chain.mine_to(3);
        let change = chain.disconnect();
        assert!(change.is_rollback());
        assert_eq!(chain.tip().height, 2);
    }

    #[test]
    fn test_recording_sink_failure() {
        let sink = RecordingSink::new();
        let report = EvictionReport::empty(None, MockChain::new().tip());
        sink.fail_next("down");
        assert!(sink.publish(&report).is_err());
        assert!(sink.publish(&report).is_ok());
        assert_eq!(sink.reports().len(), 1);
    }
}
