//! Mempool index.
//!
//! The index holds entries by id and keeps secondary maps for the queries
//! eviction needs:
//! - sidechain -> entry ids
//! - (sidechain, epoch) -> certificate ids
//! - (sidechain, epoch) -> backward-transfer request ids
//! - entry id -> ids of entries spending from it
//!
//! Secondary maps are ordered so every query yields ids in a stable order,
//! and they never hold an id the primary map does not. Dependency edges are
//! the exception on the parent side: a child may name a parent that has not
//! reached the pool yet, and the edge waits there until it does.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use sidepool_core::{
    EntryId, EntryKind, EpochNumber, Error, MempoolEntry, Result, SidechainId,
};

type EpochKey = (SidechainId, EpochNumber);

/// Entry storage with secondary indices.
#[derive(Debug, Clone, Default)]
pub struct MempoolIndex {
    /// Primary map.
    entries: HashMap<EntryId, Arc<MempoolEntry>>,
    /// Entries per sidechain.
    by_sidechain: BTreeMap<SidechainId, BTreeSet<EntryId>>,
    /// Certificates per (sidechain, epoch).
    certificates: BTreeMap<EpochKey, BTreeSet<EntryId>>,
    /// Backward-transfer requests per (sidechain, target epoch).
    requests: BTreeMap<EpochKey, BTreeSet<EntryId>>,
    /// Reverse dependency edges: parent -> children. Parents may be absent.
    dependents: HashMap<EntryId, BTreeSet<EntryId>>,
}

impl MempoolIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry is present.
    pub fn contains(&self, id: &EntryId) -> bool {
        self.entries.contains_key(id)
    }

    /// Look up an entry.
    pub fn get(&self, id: &EntryId) -> Option<&Arc<MempoolEntry>> {
        self.entries.get(id)
    }

    /// Insert an entry.
    ///
    /// Edges to every named parent are recorded whether or not the parent is
    /// held, so a parent inserted later still cascades its removal to the
    /// child. A parent that never arrives is treated as confirmed.
    pub fn insert(&mut self, entry: MempoolEntry) -> Result<Arc<MempoolEntry>> {
        let id = entry.id();
        if self.entries.contains_key(&id) {
            return Err(Error::DuplicateEntry(id));
        }

        let sidechain = entry.sidechain_id();
        self.by_sidechain.entry(sidechain).or_default().insert(id);
        match (entry.kind(), entry.epoch()) {
            (EntryKind::Certificate, Some(epoch)) => {
                self.certificates.entry((sidechain, epoch)).or_default().insert(id);
            }
            (EntryKind::BackwardTransferRequest, Some(epoch)) => {
                self.requests.entry((sidechain, epoch)).or_default().insert(id);
            }
            _ => {}
        }
        for parent in entry.depends_on() {
            if *parent != id {
                self.dependents.entry(*parent).or_default().insert(id);
            }
        }

        let entry = Arc::new(entry);
        self.entries.insert(id, Arc::clone(&entry));
        Ok(entry)
    }

    /// Remove an entry and everything that depends on it.
    ///
    /// Returns removed entries, the requested one first, descendants in
    /// breadth-first id order. Empty if `id` is absent.
    pub fn remove(&mut self, id: &EntryId) -> Vec<Arc<MempoolEntry>> {
        if !self.entries.contains_key(id) {
            return Vec::new();
        }

        let mut order = vec![*id];
        order.extend(self.descendants(id));

        order
            .into_iter()
            .filter_map(|id| self.remove_one(&id))
            .collect()
    }

    /// Ids of all held entries that transitively depend on `id`, which need
    /// not be held itself.
    pub fn descendants(&self, id: &EntryId) -> Vec<EntryId> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([*id]);

        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.dependents.get(&current) {
                for child in children {
                    if *child != *id && seen.insert(*child) {
                        out.push(*child);
                        queue.push_back(*child);
                    }
                }
            }
        }
        out
    }

    fn remove_one(&mut self, id: &EntryId) -> Option<Arc<MempoolEntry>> {
        let entry = self.entries.remove(id)?;
        let sidechain = entry.sidechain_id();

        remove_from(&mut self.by_sidechain, &sidechain, id);
        if let Some(epoch) = entry.epoch() {
            match entry.kind() {
                EntryKind::Certificate => remove_from(&mut self.certificates, &(sidechain, epoch), id),
                EntryKind::BackwardTransferRequest => {
                    remove_from(&mut self.requests, &(sidechain, epoch), id)
                }
                EntryKind::ForwardTransfer => {}
            }
        }
        for parent in entry.depends_on() {
            if let Some(children) = self.dependents.get_mut(parent) {
                children.remove(id);
                if children.is_empty() {
                    self.dependents.remove(parent);
                }
            }
        }
        self.dependents.remove(id);

        Some(entry)
    }

    /// All entries of a sidechain, ordered by id.
    pub fn entries_for_sidechain(&self, sidechain: &SidechainId) -> Vec<Arc<MempoolEntry>> {
        self.resolve(self.by_sidechain.get(sidechain))
    }

    /// Certificates and backward-transfer requests bound to an epoch, ordered by id.
    pub fn entries_for_epoch(&self, sidechain: &SidechainId, epoch: EpochNumber) -> Vec<Arc<MempoolEntry>> {
        let key = (*sidechain, epoch);
        let mut ids: BTreeSet<EntryId> = self.certificates.get(&key).cloned().unwrap_or_default();
        ids.extend(self.requests.get(&key).into_iter().flatten().copied());
        self.resolve(Some(&ids))
    }

    /// Certificates for an epoch, ordered by id.
    pub fn certificates_for_epoch(&self, sidechain: &SidechainId, epoch: EpochNumber) -> Vec<Arc<MempoolEntry>> {
        self.resolve(self.certificates.get(&(*sidechain, epoch)))
    }

    /// Backward-transfer requests for an epoch, ordered by id.
    pub fn requests_for_epoch(&self, sidechain: &SidechainId, epoch: EpochNumber) -> Vec<Arc<MempoolEntry>> {
        self.resolve(self.requests.get(&(*sidechain, epoch)))
    }

    /// Epochs of a sidechain with at least one bound entry.
    pub fn epochs_for_sidechain(&self, sidechain: &SidechainId) -> BTreeSet<EpochNumber> {
        let range = (*sidechain, EpochNumber::MIN)..=(*sidechain, EpochNumber::MAX);
        self.certificates
            .range(range.clone())
            .chain(self.requests.range(range))
            .map(|((_, epoch), _)| *epoch)
            .collect()
    }

    /// Sidechains with at least one entry, ordered by id.
    pub fn sidechains(&self) -> impl Iterator<Item = &SidechainId> {
        self.by_sidechain.keys()
    }

    /// All entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<MempoolEntry>> {
        self.entries.values()
    }

    /// Entry counts by kind.
    pub fn count_by_kind(&self) -> BTreeMap<EntryKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.kind()).or_insert(0) += 1;
        }
        counts
    }

    /// Check that primary and secondary maps agree.
    pub fn verify_indices(&self) -> std::result::Result<(), String> {
        let mut indexed = 0usize;
        for (sidechain, ids) in &self.by_sidechain {
            if ids.is_empty() {
                return Err(format!("empty id set kept for sidechain {sidechain}"));
            }
            for id in ids {
                match self.entries.get(id) {
                    Some(entry) if entry.sidechain_id() == *sidechain => indexed += 1,
                    Some(_) => return Err(format!("entry {id} indexed under wrong sidechain")),
                    None => return Err(format!("sidechain index references missing entry {id}")),
                }
            }
        }
        if indexed != self.entries.len() {
            return Err(format!(
                "sidechain index covers {indexed} of {} entries",
                self.entries.len()
            ));
        }

        for (map, kind) in [
            (&self.certificates, EntryKind::Certificate),
            (&self.requests, EntryKind::BackwardTransferRequest),
        ] {
            for ((sidechain, epoch), ids) in map {
                for id in ids {
                    let entry = self
                        .entries
                        .get(id)
                        .ok_or_else(|| format!("{kind} index references missing entry {id}"))?;
                    if entry.kind() != kind
                        || entry.sidechain_id() != *sidechain
                        || entry.epoch() != Some(*epoch)
                    {
                        return Err(format!("entry {id} misfiled under epoch {epoch}"));
                    }
                }
            }
        }

        for (parent, children) in &self.dependents {
            if children.is_empty() {
                return Err(format!("empty dependent set kept for {parent}"));
            }
            if let Some(child) = children.iter().find(|c| !self.entries.contains_key(*c)) {
                return Err(format!("dependency edge to missing entry {child}"));
            }
        }
        Ok(())
    }

    fn resolve(&self, ids: Option<&BTreeSet<EntryId>>) -> Vec<Arc<MempoolEntry>> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }

    /// Plant a dangling id in the sidechain index.
    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self, sidechain: SidechainId, id: EntryId) {
        self.by_sidechain.entry(sidechain).or_default().insert(id);
    }
}

fn remove_from<K: Ord>(map: &mut BTreeMap<K, BTreeSet<EntryId>>, key: &K, id: &EntryId) {
    if let Some(ids) = map.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}
