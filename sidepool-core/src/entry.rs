//! Mempool entries and the sidechain artifacts they carry.
//!
//! An entry is identified by the BLAKE3 hash of its canonical bytes (the
//! artifact plus its in-mempool dependencies). The first-seen timestamp is
//! not part of the identifier: a replayed submission maps onto the entry
//! already stored.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::BlockHash;
use crate::crypto::{hash, Hash};
use crate::sidechain::{Amount, EpochNumber, Quality, SidechainFees, SidechainId};

/// Unique identifier for a mempool entry (content-addressed).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Hash);

impl EntryId {
    /// Wrap a hash.
    pub fn new(hash: Hash) -> Self {
        Self(hash)
    }

    /// Get the underlying hash.
    pub fn as_hash(&self) -> &Hash {
        &self.0
    }
}

impl std::fmt::Debug for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntryId({})", &self.0.to_hex()[..16])
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque validity token issued by the proof verification layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProofReference(pub Hash);

/// Mainchain public-key hash receiving withdrawn coins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MainchainAddress(pub [u8; 20]);

/// Receiving address on the sidechain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SidechainAddress(pub Hash);

/// Coins deposited into a sidechain. Not bound to any epoch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardTransfer {
    /// Destination sidechain.
    pub sidechain_id: SidechainId,
    /// Amount deposited.
    pub amount: Amount,
    /// Receiver on the sidechain.
    pub destination: SidechainAddress,
}

/// A mainchain request to withdraw coins, bound to the epoch that must honor it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackwardTransferRequest {
    /// Sidechain asked to pay out.
    pub sidechain_id: SidechainId,
    /// Epoch whose certificate is expected to carry the payout.
    pub target_epoch: EpochNumber,
    /// Mainchain receiver.
    pub destination: MainchainAddress,
    /// Sidechain-defined field elements.
    pub request_data: Vec<Hash>,
    /// Fee paid to the sidechain.
    pub fee: Amount,
}

/// One payout listed in a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackwardTransfer {
    /// Mainchain receiver.
    pub destination: MainchainAddress,
    /// Amount withdrawn from the sidechain balance.
    pub amount: Amount,
}

/// Epoch-closing attestation competing on quality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Certificate {
    /// Certified sidechain.
    pub sidechain_id: SidechainId,
    /// Certified epoch.
    pub epoch: EpochNumber,
    /// Competition score; the highest wins the epoch.
    pub quality: Quality,
    /// Mainchain block closing the epoch.
    pub epoch_block_hash: BlockHash,
    /// Cumulative sidechain transaction commitment at the epoch end.
    pub cumulative_tree_hash: Hash,
    /// Validity token checked by the proof oracle.
    pub proof_reference: ProofReference,
    /// Payouts to the mainchain.
    pub backward_transfers: Vec<BackwardTransfer>,
    /// Fees the sidechain will charge once this certificate confirms.
    pub fees: SidechainFees,
}

impl Certificate {
    /// Start building a certificate for `epoch` of `sidechain_id`.
    pub fn builder(sidechain_id: SidechainId, epoch: EpochNumber) -> CertificateBuilder {
        CertificateBuilder {
            certificate: Certificate {
                sidechain_id,
                epoch,
                quality: 0,
                epoch_block_hash: BlockHash(Hash::ZERO),
                cumulative_tree_hash: Hash::ZERO,
                proof_reference: ProofReference(Hash::ZERO),
                backward_transfers: Vec::new(),
                fees: SidechainFees::default(),
            },
        }
    }

    /// Sum of all backward-transfer amounts.
    pub fn backward_transfer_total(&self) -> Amount {
        self.backward_transfers
            .iter()
            .fold(0, |acc: Amount, bt| acc.saturating_add(bt.amount))
    }
}

/// Builder for [`Certificate`].
#[derive(Debug, Clone)]
pub struct CertificateBuilder {
    certificate: Certificate,
}

impl CertificateBuilder {
    /// Set the quality.
    pub fn quality(mut self, quality: Quality) -> Self {
        self.certificate.quality = quality;
        self
    }

    /// Set the epoch-closing block hash.
    pub fn epoch_block_hash(mut self, hash: BlockHash) -> Self {
        self.certificate.epoch_block_hash = hash;
        self
    }

    /// Set the cumulative commitment tree hash.
    pub fn cumulative_tree_hash(mut self, hash: Hash) -> Self {
        self.certificate.cumulative_tree_hash = hash;
        self
    }

    /// Set the proof reference.
    pub fn proof_reference(mut self, proof: ProofReference) -> Self {
        self.certificate.proof_reference = proof;
        self
    }

    /// Append a backward transfer.
    pub fn backward_transfer(mut self, destination: MainchainAddress, amount: Amount) -> Self {
        self.certificate.backward_transfers.push(BackwardTransfer {
            destination,
            amount,
        });
        self
    }

    /// Set the proposed sidechain fees.
    pub fn fees(mut self, fees: SidechainFees) -> Self {
        self.certificate.fees = fees;
        self
    }

    /// Finish building.
    pub fn build(self) -> Certificate {
        self.certificate
    }
}

/// Kind tag of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// [`ForwardTransfer`]
    ForwardTransfer,
    /// [`BackwardTransferRequest`]
    BackwardTransferRequest,
    /// [`Certificate`]
    Certificate,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntryKind::ForwardTransfer => "forward_transfer",
            EntryKind::BackwardTransferRequest => "backward_transfer_request",
            EntryKind::Certificate => "certificate",
        };
        f.write_str(name)
    }
}

/// The sidechain artifact carried by an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Artifact {
    /// Deposit into a sidechain.
    ForwardTransfer(ForwardTransfer),
    /// Withdrawal request for an epoch.
    BackwardTransferRequest(BackwardTransferRequest),
    /// Epoch certificate.
    Certificate(Certificate),
}

impl Artifact {
    /// Sidechain the artifact targets.
    pub fn sidechain_id(&self) -> SidechainId {
        match self {
            Artifact::ForwardTransfer(ft) => ft.sidechain_id,
            Artifact::BackwardTransferRequest(req) => req.sidechain_id,
            Artifact::Certificate(cert) => cert.sidechain_id,
        }
    }

    /// Epoch the artifact is bound to. Forward transfers have none.
    pub fn epoch(&self) -> Option<EpochNumber> {
        match self {
            Artifact::ForwardTransfer(_) => None,
            Artifact::BackwardTransferRequest(req) => Some(req.target_epoch),
            Artifact::Certificate(cert) => Some(cert.epoch),
        }
    }

    /// Kind tag.
    pub fn kind(&self) -> EntryKind {
        match self {
            Artifact::ForwardTransfer(_) => EntryKind::ForwardTransfer,
            Artifact::BackwardTransferRequest(_) => EntryKind::BackwardTransferRequest,
            Artifact::Certificate(_) => EntryKind::Certificate,
        }
    }
}

impl From<ForwardTransfer> for Artifact {
    fn from(ft: ForwardTransfer) -> Self {
        Artifact::ForwardTransfer(ft)
    }
}

impl From<BackwardTransferRequest> for Artifact {
    fn from(req: BackwardTransferRequest) -> Self {
        Artifact::BackwardTransferRequest(req)
    }
}

impl From<Certificate> for Artifact {
    fn from(cert: Certificate) -> Self {
        Artifact::Certificate(cert)
    }
}

/// An unconfirmed sidechain artifact held in the mempool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolEntry {
    id: EntryId,
    first_seen: DateTime<Utc>,
    depends_on: BTreeSet<EntryId>,
    artifact: Artifact,
}

impl MempoolEntry {
    /// Wrap an artifact seen now, with no in-mempool dependencies.
    pub fn new(artifact: impl Into<Artifact>) -> Self {
        Self::builder(artifact).now().build()
    }

    /// Start building an entry.
    pub fn builder(artifact: impl Into<Artifact>) -> MempoolEntryBuilder {
        MempoolEntryBuilder {
            artifact: artifact.into(),
            first_seen: None,
            depends_on: BTreeSet::new(),
        }
    }

    /// Canonical bytes hashed into the identifier.
    pub fn canonical_bytes(artifact: &Artifact, depends_on: &BTreeSet<EntryId>) -> Vec<u8> {
        let canonical = CanonicalEntry {
            artifact,
            depends_on,
        };
        // Plain data structs always serialize.
        bincode::serialize(&canonical).expect("serialization should not fail")
    }

    /// Content-addressed identifier.
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// When this node first saw the entry.
    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// Mempool entries this one spends from.
    pub fn depends_on(&self) -> &BTreeSet<EntryId> {
        &self.depends_on
    }

    /// The carried artifact.
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Sidechain the entry targets.
    pub fn sidechain_id(&self) -> SidechainId {
        self.artifact.sidechain_id()
    }

    /// Epoch the entry is bound to, if any.
    pub fn epoch(&self) -> Option<EpochNumber> {
        self.artifact.epoch()
    }

    /// Kind tag.
    pub fn kind(&self) -> EntryKind {
        self.artifact.kind()
    }

    /// The certificate, if this entry carries one.
    pub fn certificate(&self) -> Option<&Certificate> {
        match &self.artifact {
            Artifact::Certificate(cert) => Some(cert),
            _ => None,
        }
    }
}

/// Helper struct for canonical serialization (excludes first-seen time).
#[derive(Serialize)]
struct CanonicalEntry<'a> {
    artifact: &'a Artifact,
    depends_on: &'a BTreeSet<EntryId>,
}

/// Builder for [`MempoolEntry`].
#[derive(Debug, Clone)]
pub struct MempoolEntryBuilder {
    artifact: Artifact,
    first_seen: Option<DateTime<Utc>>,
    depends_on: BTreeSet<EntryId>,
}

impl MempoolEntryBuilder {
    /// Set the first-seen time.
    pub fn seen_at(mut self, time: DateTime<Utc>) -> Self {
        self.first_seen = Some(time);
        self
    }

    /// Use current time as first-seen time.
    pub fn now(mut self) -> Self {
        self.first_seen = Some(Utc::now());
        self
    }

    /// Declare mempool entries this one spends from.
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = EntryId>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    /// Finish building. Unset first-seen time defaults to now.
    pub fn build(self) -> MempoolEntry {
        let id = EntryId(hash(&MempoolEntry::canonical_bytes(
            &self.artifact,
            &self.depends_on,
        )));
        MempoolEntry {
            id,
            first_seen: self.first_seen.unwrap_or_else(Utc::now),
            depends_on: self.depends_on,
            artifact: self.artifact,
        }
    }
}
