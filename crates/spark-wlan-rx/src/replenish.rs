//! 补给引擎。
//!
//! # 教案式说明
//! - **意图 (Why)**：硬件环一旦空了就会丢包，补给过多又会占住内存。引擎在每轮完成处理后
//!   把回收的描述符重新挂上新缓冲，并按环的空闲程度做两条启发式修正。
//! - **契约 (What)**：
//!   - `available = capacity - in_flight`；
//!   - 无调用方链表且 `available > 3/4 capacity`：请求量提升为 `available`（批量补满）；
//!   - `available < 请求量`：请求量截断到 `available`，多出的描述符退回自由链表；
//!   - 有调用方链表且在途数低于临界阈值：从自由链表额外追加描述符；
//!   - 自由描述符不足时按实际数量补给并记录缺口；一个都拿不到才返回 `NoMemory`；
//!   - 缓冲分配失败提前结束本轮并保留已投递部分；映射失败释放该缓冲、计数并继续；
//!   - 本轮全部环写入位于同一临界区；未用完的描述符在临界区外退回自由链表。
//! - **风险 (Trade-offs)**：平台拒绝 DMA 地址时最多重试 `dma_retry_limit` 次，被拒缓冲进入
//!   隔离区而非立即释放，避免分配器反复交回同一块低地址内存。

use std::sync::Arc;

use crate::{
    buffer::NetBuf,
    config::{ReplenishConfig, ReplenishMode},
    desc::{DescList, DescriptorPool},
    error::{Result, RxError},
    platform::{BufferAllocator, DmaMapper, MapError},
    ring::{RingAccess, RxRing},
    types::DmaAddr,
};

/// 单轮补给结果。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplenishOutcome {
    /// 启发式修正后的请求量。
    pub requested: usize,
    /// 实际写入环的缓冲数。
    pub posted: usize,
    pub posted_bytes: usize,
    /// 是否触发了批量补满。
    pub bulk_refill: bool,
    /// 临界追加的描述符数。
    pub topped_up: usize,
    /// 自由描述符缺口。
    pub shortfall: usize,
    /// 本轮结束退回自由链表的描述符数。
    pub returned_to_free_list: usize,
}

enum Mapped {
    Ready(NetBuf, DmaAddr),
    MapFailed(MapError),
    AllocFailed,
    RetriesExhausted,
}

/// 补给引擎。
pub struct Replenisher {
    pool: Arc<DescriptorPool>,
    allocator: Arc<dyn BufferAllocator>,
    mapper: Arc<dyn DmaMapper>,
    config: ReplenishConfig,
}

impl Replenisher {
    pub fn new(
        pool: Arc<DescriptorPool>,
        allocator: Arc<dyn BufferAllocator>,
        mapper: Arc<dyn DmaMapper>,
        config: ReplenishConfig,
    ) -> Self {
        Self {
            pool,
            allocator,
            mapper,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<DescriptorPool> {
        &self.pool
    }

    pub fn mapper(&self) -> &Arc<dyn DmaMapper> {
        &self.mapper
    }

    /// 向 `ring` 补给缓冲。
    ///
    /// `held` 为调用方持有的描述符链表（通常是本轮完成处理回收的描述符），为 `None` 时
    /// 从自由链表取。链表中未被用掉的描述符总会在返回前退回自由链表，包括出错路径。
    pub fn replenish<R: RxRing + ?Sized>(
        &self,
        ring: &mut R,
        num_requested: usize,
        held: Option<DescList>,
    ) -> Result<ReplenishOutcome> {
        let stats = self.pool.stats();
        let mut held = held.unwrap_or_default();
        let had_held = !held.is_empty();
        let mut outcome = ReplenishOutcome::default();

        let mut access = RingAccess::begin(ring);
        let capacity = access.capacity();
        let available = access.num_available();
        let in_flight = capacity.saturating_sub(available);

        let mut requested = num_requested;
        if self.config.mode == ReplenishMode::Opportunistic
            && !had_held
            && available > capacity * 3 / 4
        {
            requested = available;
            outcome.bulk_refill = true;
            stats.bulk_refills.incr();
        } else if available < requested {
            requested = available;
        } else if self.config.mode == ReplenishMode::Opportunistic
            && had_held
            && in_flight < self.config.critical_threshold
        {
            let room = available - requested;
            let mut extra = self.pool.get_free(self.config.critical_threshold.min(room));
            outcome.topped_up = extra.len();
            requested += extra.len();
            held.append(&mut extra);
            stats.critical_top_ups.incr();
        }

        if held.len() < requested {
            let need = requested - held.len();
            let mut fetched = self.pool.get_free(need);
            if fetched.len() < need {
                outcome.shortfall = need - fetched.len();
                requested -= outcome.shortfall;
                stats.desc_shortfall.add(outcome.shortfall as u64);
                tracing::debug!(
                    pool_id = self.pool.pool_id().0,
                    need,
                    got = fetched.len(),
                    "rx descriptor shortfall"
                );
            }
            held.append(&mut fetched);
        }
        outcome.requested = requested;
        stats.replenish_requested.add(requested as u64);

        if requested == 0 && outcome.shortfall > 0 {
            drop(access);
            stats.desc_alloc_failures.incr();
            tracing::warn!(
                pool_id = self.pool.pool_id().0,
                available,
                "no free rx descriptors for replenish"
            );
            self.release_leftovers(held, &mut outcome);
            return Err(RxError::NoMemory {
                context: "acquiring free rx descriptors",
            });
        }

        let buffer_size = self.pool.buffer_size();
        let owner = self.pool.owner();
        let mut attempts = 0;
        while outcome.posted < requested && attempts < requested {
            attempts += 1;
            let (buffer, addr) = match self.map_for_device() {
                Mapped::Ready(buffer, addr) => (buffer, addr),
                Mapped::MapFailed(err) => {
                    stats.map_failures.incr();
                    tracing::debug!(error = %err, "rx buffer map failed");
                    continue;
                }
                Mapped::AllocFailed => {
                    stats.buffer_alloc_failures.incr();
                    break;
                }
                Mapped::RetriesExhausted => {
                    tracing::warn!(
                        retries = self.config.dma_retry_limit,
                        "dma address retries exhausted, stopping replenish"
                    );
                    break;
                }
            };
            let Some(slot) = access.next_slot() else {
                self.mapper.unmap(addr, buffer_size);
                break;
            };
            let Some(handle) = held.pop() else {
                self.mapper.unmap(addr, buffer_size);
                break;
            };
            let cookie = match self.pool.attach(handle, buffer, addr) {
                Ok(cookie) => cookie,
                Err(err) => {
                    self.mapper.unmap(addr, buffer_size);
                    tracing::warn!(error = %err, "caller list carried an unusable descriptor");
                    continue;
                }
            };
            access.set_buffer_addr_info(slot, addr, cookie, owner);
            outcome.posted += 1;
        }
        drop(access);

        outcome.posted_bytes = outcome.posted * buffer_size;
        stats.replenish_posted.add(outcome.posted as u64);
        stats.replenish_bytes.add(outcome.posted_bytes as u64);
        self.release_leftovers(held, &mut outcome);

        tracing::trace!(
            pool_id = self.pool.pool_id().0,
            requested = outcome.requested,
            posted = outcome.posted,
            bulk = outcome.bulk_refill,
            topped_up = outcome.topped_up,
            returned = outcome.returned_to_free_list,
            "rx replenish done"
        );
        Ok(outcome)
    }

    /// 分配并映射一个设备可用的缓冲。
    fn map_for_device(&self) -> Mapped {
        let size = self.pool.buffer_size();
        let align = self.pool.buffer_alignment();
        let strategy = self.pool.strategy();
        let mut retries = 0;
        let Some(mut buffer) = self.allocator.alloc(size, align) else {
            return Mapped::AllocFailed;
        };
        loop {
            let addr = match self.mapper.map(&buffer) {
                Ok(addr) => addr,
                Err(err) => return Mapped::MapFailed(err),
            };
            if strategy.accepts_dma_addr(addr) {
                return Mapped::Ready(buffer, addr);
            }
            self.pool.stats().dma_addr_rejections.incr();
            self.mapper.unmap(addr, size);
            self.pool.quarantine(buffer);
            if retries >= self.config.dma_retry_limit {
                return Mapped::RetriesExhausted;
            }
            retries += 1;
            buffer = match self.allocator.alloc(size, align) {
                Some(buffer) => buffer,
                None => return Mapped::AllocFailed,
            };
        }
    }

    fn release_leftovers(&self, held: DescList, outcome: &mut ReplenishOutcome) {
        if held.is_empty() {
            return;
        }
        let count = held.len();
        outcome.returned_to_free_list = count;
        self.pool.stats().descs_returned_to_free_list.add(count as u64);
        if let Err(err) = self.pool.return_all(held) {
            tracing::error!(error = %err, "returning unused rx descriptors failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        config::PoolConfig,
        platform::{HeapAllocator, HwCapabilities, IovaMapper, select_strategy},
        stats::RxStats,
        test_stubs::SimRing,
    };

    fn engine(descriptors: usize, mode: ReplenishMode) -> Replenisher {
        let pool = DescriptorPool::alloc_pool(
            &PoolConfig {
                num_descriptors: descriptors,
                descriptors_per_page: 16,
                buffer_size: 256,
                ..PoolConfig::default()
            },
            select_strategy(&HwCapabilities::default()),
            Arc::new(RxStats::default()),
        )
        .expect("池分配成功");
        Replenisher::new(
            Arc::new(pool),
            Arc::new(HeapAllocator),
            Arc::new(IovaMapper::default()),
            ReplenishConfig {
                mode,
                critical_threshold: 8,
                dma_retry_limit: 2,
            },
        )
    }

    #[test]
    fn request_only_mode_skips_bulk_refill() {
        let engine = engine(64, ReplenishMode::RequestOnly);
        let mut ring = SimRing::new(64);
        let outcome = engine.replenish(&mut ring, 5, None).expect("补给成功");
        assert_eq!(outcome.posted, 5);
        assert!(!outcome.bulk_refill);
        assert_eq!(ring.posted_len(), 5);
        assert_eq!(ring.access_sections(), 1, "一轮补给只应进入一次临界区");
    }

    #[test]
    #[traced_test]
    fn shortfall_is_clamped_and_logged() {
        let engine = engine(10, ReplenishMode::RequestOnly);
        let mut ring = SimRing::new(64);
        let outcome = engine.replenish(&mut ring, 16, None).expect("部分补给仍是成功");
        assert_eq!(outcome.posted, 10);
        assert_eq!(outcome.shortfall, 6);
        assert_eq!(engine.pool().stats().desc_shortfall.get(), 6);
        assert!(logs_contain("rx descriptor shortfall"));
    }

    #[test]
    fn empty_free_list_is_no_memory() {
        let engine = engine(4, ReplenishMode::RequestOnly);
        let mut ring = SimRing::new(16);
        engine.replenish(&mut ring, 4, None).expect("首轮补给成功");
        let err = engine.replenish(&mut ring, 2, None).unwrap_err();
        assert_eq!(err.code(), "rx.no_memory");
        assert_eq!(engine.pool().stats().desc_alloc_failures.get(), 1);
        assert_eq!(ring.open_sections(), 0, "出错路径也必须退出临界区");
    }
}
