//! 接收管线：完成事件 → 回收描述符 → 重组 → 归属对端 → 交付 → 补给。
//!
//! # 教案式说明
//! - **意图 (Why)**：把描述符池、重组引擎、对端表与补给引擎串成一次完整的接收处理，
//!   保证本轮回收的描述符在同一轮内重新挂上新缓冲送回硬件。
//! - **契约 (What)**：
//!   - 任何单帧错误（坏 Cookie、重复完成、链不一致、对端未知、上层拒收）只计数并丢帧，
//!     不中断本轮其余完成事件；
//!   - 跨轮次未结束的链会保留到下一轮；新的起始缓冲到来或 [`RxPipeline::flush`] 时整链丢弃并计数；
//!   - 交付时上层拿到的是带 `Rx` 模块计数的 [`PeerRef`]，返回后引用随即释放。
//! - **风险 (Trade-offs)**：管线本身不做并发，每个硬件环对应一个管线实例，由 `&mut self` 保证独占。

use std::sync::Arc;

use thiserror::Error;

use crate::{
    buffer::NetBuf,
    config::RxConfig,
    desc::{DescList, DescriptorPool},
    error::Result,
    peer::{ModuleId, PeerRef, PeerTable},
    platform::{BufferAllocator, DmaMapper, HwCapabilities, select_strategy},
    reassembly::{ChainBuffer, ChainFlags, MsduInfo, Reassembler},
    replenish::{ReplenishOutcome, Replenisher},
    ring::RxRing,
    stats::RxStats,
    types::{Cookie, PeerId},
};

/// 上层拒收。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("delivery rejected: {reason}")]
pub struct DeliveryError {
    pub reason: &'static str,
}

/// 上层交付接口。失败只计数，不重试。
pub trait DeliverySink {
    fn deliver(&self, frame: NetBuf, peer: &PeerRef) -> core::result::Result<(), DeliveryError>;
}

/// 一条接收完成事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxCompletion {
    pub cookie: Cookie,
    pub peer_id: PeerId,
    /// 仅起始缓冲上的值有效。
    pub msdu_len: usize,
    pub l3_pad: usize,
    pub flags: ChainFlags,
}

/// 一轮处理的结果汇总。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub reaped: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub replenish: Option<ReplenishOutcome>,
}

struct PendingChain {
    buffers: Vec<ChainBuffer>,
    peer_id: PeerId,
    info: MsduInfo,
}

/// 单环接收管线。
pub struct RxPipeline<S> {
    replenisher: Replenisher,
    reassembler: Reassembler,
    peers: Arc<PeerTable>,
    sink: S,
    stats: Arc<RxStats>,
    pending: Option<PendingChain>,
}

impl<S: DeliverySink> RxPipeline<S> {
    /// 按配置建池并组装管线。配置非法或池分配失败时返回不可恢复错误。
    pub fn new(
        config: &RxConfig,
        caps: &HwCapabilities,
        allocator: Arc<dyn BufferAllocator>,
        mapper: Arc<dyn DmaMapper>,
        peers: Arc<PeerTable>,
        sink: S,
    ) -> Result<Self> {
        config.validate()?;
        let stats = Arc::clone(peers.stats());
        let pool = DescriptorPool::alloc_pool(&config.pool, select_strategy(caps), Arc::clone(&stats))?;
        Ok(Self {
            replenisher: Replenisher::new(Arc::new(pool), allocator, mapper, config.replenish.clone()),
            reassembler: Reassembler::new(config, Arc::clone(&stats)),
            peers,
            sink,
            stats,
            pending: None,
        })
    }

    pub fn pool(&self) -> &Arc<DescriptorPool> {
        self.replenisher.pool()
    }

    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    pub fn stats(&self) -> &Arc<RxStats> {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// 初次启用环时补满。
    pub fn fill_ring<R: RxRing + ?Sized>(&self, ring: &mut R) -> Result<ReplenishOutcome> {
        let capacity = ring.capacity();
        self.replenisher.replenish(ring, capacity, None)
    }

    /// 处理一批完成事件，并用本轮回收的描述符补给 `ring`。
    pub fn process<R, I>(&mut self, ring: &mut R, completions: I) -> ProcessSummary
    where
        R: RxRing + ?Sized,
        I: IntoIterator<Item = RxCompletion>,
    {
        let mut summary = ProcessSummary::default();
        let mut reaped = DescList::new();
        let mapper = Arc::clone(self.replenisher.mapper());

        for completion in completions {
            let buffer = match self.pool().reap(completion.cookie, mapper.as_ref()) {
                Ok(done) => {
                    reaped.push(done.handle);
                    done.buffer
                }
                Err(_) => {
                    summary.dropped += 1;
                    continue;
                }
            };
            summary.reaped += 1;

            if completion.flags.start {
                if self.pending.take().is_some() {
                    self.stats.abandoned_chains.incr();
                    summary.dropped += 1;
                    tracing::warn!(cookie = %completion.cookie, "new chain started before previous chain ended");
                }
                self.pending = Some(PendingChain {
                    buffers: Vec::new(),
                    peer_id: completion.peer_id,
                    info: MsduInfo {
                        msdu_len: completion.msdu_len,
                        l3_pad: completion.l3_pad,
                    },
                });
            }
            let Some(chain) = self.pending.as_mut() else {
                self.stats.protocol_mismatches.incr();
                summary.dropped += 1;
                tracing::warn!(cookie = %completion.cookie, "continuation buffer without a chain start");
                continue;
            };
            chain.buffers.push(ChainBuffer {
                buffer,
                flags: completion.flags,
            });
            if !completion.flags.end {
                continue;
            }

            let Some(chain) = self.pending.take() else {
                continue;
            };
            match self.reassembler.reassemble(chain.buffers, chain.info) {
                Ok(frame) => {
                    if self.deliver(frame, chain.peer_id) {
                        summary.delivered += 1;
                    } else {
                        summary.dropped += 1;
                    }
                }
                Err(_) => summary.dropped += 1,
            }
        }

        if !reaped.is_empty() {
            let count = reaped.len();
            match self.replenisher.replenish(ring, count, Some(reaped)) {
                Ok(outcome) => summary.replenish = Some(outcome),
                Err(err) => tracing::warn!(error = %err, "replenish after rx processing failed"),
            }
        }
        self.peers.reap_released();
        summary
    }

    fn deliver(&self, frame: NetBuf, peer_id: PeerId) -> bool {
        let Some(peer) = self.peers.get_ref_by_id(peer_id, ModuleId::Rx) else {
            self.stats.unknown_peer_drops.incr();
            tracing::debug!(%peer_id, "rx frame for unknown or departing peer");
            return false;
        };
        let bytes = frame.total_len() as u64;
        match self.sink.deliver(frame, &peer) {
            Ok(()) => {
                self.stats.delivered_msdus.incr();
                self.stats.delivered_bytes.add(bytes);
                peer.rx_stats().msdus.incr();
                peer.rx_stats().bytes.add(bytes);
                true
            }
            Err(err) => {
                self.stats.delivery_drops.incr();
                peer.rx_stats().drops.incr();
                tracing::debug!(%peer_id, error = %err, "rx frame rejected by upper layer");
                false
            }
        }
    }

    /// 丢弃尚未收到结束缓冲的链，返回是否确有丢弃。
    pub fn flush(&mut self) -> bool {
        match self.pending.take() {
            Some(chain) => {
                self.stats.abandoned_chains.incr();
                tracing::debug!(buffers = chain.buffers.len(), "pending rx chain abandoned");
                true
            }
            None => false,
        }
    }

    /// 拆除：丢弃未完成链并回收仍挂在硬件上的缓冲。调用方须保证硬件已停止访问该环。
    pub fn shutdown(&mut self) -> usize {
        self.flush();
        let mapper = Arc::clone(self.replenisher.mapper());
        let pool = self.pool();
        pool.drain_quarantine();
        pool.reclaim_all(mapper.as_ref())
    }
}
