//! Eviction and admission benchmarks.
//!
//! Benchmarks:
//! - Eviction planning over pools of growing size
//! - Index insert and cascading removal
//! - Full tip change through the mempool facade

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use sidepool_core::{
    hash, BlockHash, Certificate, ChainTip, EpochSchedule, ForwardTransfer, MempoolEntry,
    SidechainAddress, SidechainFees, SidechainId, TipChange,
};
use sidepool_mempool::{
    ConfirmedCertificate, ConfirmedSidechain, ConfirmedSnapshot, EvictionPolicyEngine,
    MempoolConfig, MempoolIndex, MockChain, MockOracle, NullRelay, SidechainMempool,
    SidechainRegistry,
};

const SIDECHAINS: u32 = 8;

fn sidechain(n: u32) -> SidechainId {
    SidechainId::new(hash(&n.to_le_bytes()))
}

fn registry_at(height: u64) -> SidechainRegistry {
    let schedule = EpochSchedule::new(100, 10);
    let sidechains = (0..SIDECHAINS)
        .map(|n| ConfirmedSidechain {
            id: sidechain(n),
            schedule,
            ceasing_height: schedule.ceasing_height(Some(3)),
            balance: 1_000_000,
            immature_amounts: BTreeMap::new(),
            last_certificate: Some(ConfirmedCertificate {
                epoch: 3,
                quality: 1,
                backward_transfer_total: 0,
            }),
            fees: SidechainFees::default(),
            request_data_length: 1,
        })
        .collect();
    let mut registry = SidechainRegistry::new();
    registry
        .refresh(
            height,
            ConfirmedSnapshot {
                tip: ChainTip::new(height, BlockHash(hash(&height.to_le_bytes()))),
                sidechains,
            },
        )
        .unwrap();
    registry
}

/// Mix of forward transfers and competing certificates for epochs 3 and 4.
fn populated_index(size: u32) -> MempoolIndex {
    let mut index = MempoolIndex::new();
    for n in 0..size {
        let sc = sidechain(n % SIDECHAINS);
        let entry = if n % 3 == 0 {
            let cert = Certificate::builder(sc, 3 + n % 2)
                .quality(u64::from(n))
                .build();
            MempoolEntry::builder(cert)
                .seen_at(Utc.timestamp_opt(i64::from(n), 0).unwrap())
                .build()
        } else {
            MempoolEntry::new(ForwardTransfer {
                sidechain_id: sc,
                amount: i64::from(n) + 1,
                destination: SidechainAddress(hash(b"bench")),
            })
        };
        let _ = index.insert(entry);
    }
    index
}

fn bench_apply_tip_change(c: &mut Criterion) {
    let sizes = [100, 1_000, 10_000];
    let engine = EvictionPolicyEngine::new();
    // Epoch 3 closes at 141; epoch 4 is open at 150.
    let registry = registry_at(150);

    let mut group = c.benchmark_group("eviction/apply_tip_change");
    for size in sizes {
        let index = populated_index(size);
        group.throughput(Throughput::Elements(u64::from(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &index, |b, index| {
            b.iter(|| engine.apply_tip_change(Some(149), black_box(150), &registry, index))
        });
    }
    group.finish();
}

fn bench_index_cascade(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/cascade_remove");
    for depth in [10u32, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter_batched(
                || {
                    let mut index = MempoolIndex::new();
                    let root = MempoolEntry::new(Certificate::builder(sidechain(0), 4).quality(1).build());
                    let root_id = root.id();
                    let mut parent = root_id;
                    index.insert(root).unwrap();
                    for n in 0..depth {
                        let child = MempoolEntry::builder(ForwardTransfer {
                            sidechain_id: sidechain(0),
                            amount: i64::from(n) + 1,
                            destination: SidechainAddress(hash(b"chain")),
                        })
                        .depends_on([parent])
                        .build();
                        parent = child.id();
                        index.insert(child).unwrap();
                    }
                    (index, root_id)
                },
                |(mut index, root)| index.remove(&root),
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_pool_tip_change(c: &mut Criterion) {
    c.bench_function("pool/notify_chain_tip_changed", |b| {
        b.iter_batched(
            || {
                let chain = MockChain::new();
                let sc = chain.create_sidechain(b"bench", 10, 1_000_000);
                chain.mine_to(12);
                let pool = SidechainMempool::new(
                    MempoolConfig::default(),
                    Arc::new(chain.clone()),
                    Arc::new(MockOracle::accepting()),
                    Arc::new(NullRelay),
                );
                let tip = chain.tip();
                pool.notify_chain_tip_changed(TipChange::new(tip, tip)).unwrap();
                for n in 0..500 {
                    let _ = pool.submit_forward_transfer(ForwardTransfer {
                        sidechain_id: sc,
                        amount: n + 1,
                        destination: SidechainAddress(hash(b"bench")),
                    });
                }
                let old = chain.tip();
                let new = chain.mine();
                (pool, TipChange::new(old, new))
            },
            |(pool, change)| pool.notify_chain_tip_changed(change),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_apply_tip_change,
    bench_index_cascade,
    bench_pool_tip_change,
);
criterion_main!(benches);
