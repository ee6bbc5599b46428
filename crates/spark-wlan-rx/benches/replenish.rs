use criterion::{Criterion, black_box};
use spark_wlan_rx::{
    ChainFlags, DeliverySink, MacAddr, ModuleId, NetBuf, PeerRef, PeerSpec, PeerTable,
    RxCompletion, RxConfig, RxPipeline, RxStats,
    pipeline::DeliveryError,
    platform::{HeapAllocator, HwCapabilities, IovaMapper},
    test_stubs::SimRing,
    types::{PeerId, VdevId},
};
use std::{
    env,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

const PEER: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x01]);
const PEER_ID: PeerId = PeerId(1);

/// 只累加字节数的交付端，避免基准期间内存增长。
#[derive(Default)]
struct CountingSink {
    bytes: AtomicU64,
}

impl DeliverySink for CountingSink {
    fn deliver(&self, frame: NetBuf, _peer: &PeerRef) -> Result<(), DeliveryError> {
        self.bytes.fetch_add(frame.total_len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// 接收热路径基准：一轮“完成 → 回收 → 重组 → 交付 → 补给”。
///
/// # 设计背景（Why）
/// - 补给与回收都要经过自由链表锁和逐描述符锁，批量大小变化时需要确认开销随批量线性增长；
/// - 交付端只记录长度，基准测得的是接收路径自身的成本。
///
/// # 逻辑解析（How）
/// - 每次迭代让内存环“完成” `batch` 个单缓冲帧，再交给管线处理并补回同样数量的缓冲。
fn bench_rx_round(c: &mut Criterion) {
    let mut config = RxConfig::default();
    config.pool.num_descriptors = 1024;
    config.peers.max_peers = 16;
    let peers = Arc::new(PeerTable::new(&config.peers, Arc::new(RxStats::default())));
    let _handle = peers.create_peer(PeerSpec::legacy(PEER, VdevId(0)));
    peers.peer_map(PEER_ID, PEER, VdevId(0)).expect("bench peer map");

    for batch in [8usize, 64] {
        let mut pipeline = RxPipeline::new(
            &config,
            &HwCapabilities::default(),
            Arc::new(HeapAllocator),
            Arc::new(IovaMapper::default()),
            Arc::clone(&peers),
            CountingSink::default(),
        )
        .expect("bench pipeline");
        let mut ring = SimRing::new(512);
        pipeline.fill_ring(&mut ring).expect("bench fill");

        c.bench_function(&format!("rx_round_batch_{batch}"), |b| {
            b.iter(|| {
                let completions: Vec<_> = ring
                    .consume(batch)
                    .into_iter()
                    .map(|cookie| RxCompletion {
                        cookie,
                        peer_id: PEER_ID,
                        msdu_len: 1200,
                        l3_pad: 0,
                        flags: ChainFlags::SINGLE,
                    })
                    .collect();
                black_box(pipeline.process(&mut ring, completions))
            });
        });
        pipeline.shutdown();
    }
}

/// 按 ID 获取对端引用：ID 表短锁 + 计数加一。
fn bench_peer_lookup(c: &mut Criterion) {
    let peers = PeerTable::new(&Default::default(), Arc::new(RxStats::default()));
    let _handle = peers.create_peer(PeerSpec::legacy(PEER, VdevId(0)));
    peers.peer_map(PEER_ID, PEER, VdevId(0)).expect("bench peer map");

    c.bench_function("peer_get_ref_by_id", |b| {
        b.iter(|| black_box(peers.get_ref_by_id(PEER_ID, ModuleId::Rx)));
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_rx_round(&mut criterion);
    bench_peer_lookup(&mut criterion);
    criterion.final_summary();
}
