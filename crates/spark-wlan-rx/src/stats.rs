//! 接收路径统计计数。
//!
//! # 教案式说明
//! - **意图 (Why)**：每一次丢帧、补给不足、映射失败都必须可见，否则线上只能看到吞吐下降却无从定位。
//! - **契约 (What)**：计数器全部是 `AtomicU64` + `Relaxed`，只保证单个计数器自身的原子性，
//!   不保证快照在多个计数器之间的一致性；[`RxStats::snapshot`] 输出可序列化的只读视图。
//! - **风险 (Trade-offs)**：导出格式（sysfs、netlink 等）不在本 crate 范围内，调用方自行转换快照。

use core::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! rx_counters {
    ($($(#[$meta:meta])* $name:ident,)+) => {
        /// 共享计数器集合，通过 `Arc<RxStats>` 在各组件间共享。
        #[derive(Debug, Default)]
        pub struct RxStats {
            $($(#[$meta])* pub $name: Counter,)+
        }

        /// 某一时刻的计数快照。
        #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
        pub struct RxStatsSnapshot {
            $($(#[$meta])* pub $name: u64,)+
        }

        impl RxStats {
            pub fn snapshot(&self) -> RxStatsSnapshot {
                RxStatsSnapshot {
                    $($name: self.$name.get(),)+
                }
            }
        }
    };
}

rx_counters! {
    /// 补给请求的缓冲数。
    replenish_requested,
    /// 成功写入硬件环的缓冲数。
    replenish_posted,
    /// 成功写入硬件环的缓冲字节数。
    replenish_bytes,
    /// 触发“批量补满”的次数。
    bulk_refills,
    /// 触发“临界追加”的次数。
    critical_top_ups,
    /// 自由描述符少于请求量时缺口的累计值。
    desc_shortfall,
    /// 一个自由描述符都拿不到的补给次数。
    desc_alloc_failures,
    /// 缓冲分配失败次数。
    buffer_alloc_failures,
    /// DMA 映射失败次数。
    map_failures,
    /// 平台拒绝的 DMA 地址次数。
    dma_addr_rejections,
    /// 因地址重试耗尽而隔离的缓冲数。
    quarantined_buffers,
    /// 补给结束后退回自由链表的描述符数。
    descs_returned_to_free_list,
    /// 无法解析的 Cookie。
    invalid_cookies,
    /// 指向非硬件持有描述符的重复/陈旧完成事件。
    stale_completions,
    /// 被拒绝的重复归还或陈旧句柄归还。
    rejected_returns,
    /// 成功重组的 MSDU。
    msdus_reassembled,
    /// 重组链与完成信息不一致而丢弃的帧。
    protocol_mismatches,
    /// 未收到结束缓冲即被放弃的链。
    abandoned_chains,
    /// 成功交付上层的 MSDU。
    delivered_msdus,
    /// 成功交付上层的字节数。
    delivered_bytes,
    /// 上层拒收的帧。
    delivery_drops,
    /// 对端 ID 无法解析或对端已拆除而丢弃的帧。
    unknown_peer_drops,
    /// 非法生命周期迁移次数。
    state_violations,
    /// 完成回收的对端数。
    peers_freed,
}

/// 单个单调计数器。
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn incr(&self) {
        self.add(1);
    }

    #[inline]
    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// 可增可减的计量值；减法饱和到 0，不会因重复扣减而回绕。
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    #[inline]
    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn sub(&self, value: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(value))
            });
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = RxStats::default();
        stats.replenish_posted.add(3);
        stats.invalid_cookies.incr();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.replenish_posted, 3);
        assert_eq!(snapshot.invalid_cookies, 1);
        assert_eq!(snapshot.delivery_drops, 0);
    }

    #[test]
    fn gauge_saturates_at_zero() {
        let gauge = Gauge::default();
        gauge.add(2);
        gauge.sub(5);
        assert_eq!(gauge.get(), 0, "饱和减法不应回绕");
    }
}
