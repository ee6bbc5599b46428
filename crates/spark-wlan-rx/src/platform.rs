//! 平台协作者：硬件代际策略、缓冲分配器、DMA 映射器。
//!
//! # 教案式说明
//! - **意图 (Why)**：不同硬件代际的 Cookie 布局不同，部分平台还要求 DMA 地址高于某个下限；
//!   这些差异在建池时一次性选定为一个策略对象，热路径上不再按平台分支。
//! - **契约 (What)**：
//!   - [`PlatformStrategy`] 只读、无状态，可被多个池共享；
//!   - [`BufferAllocator`] 返回 `None` 表示本次分配失败，调用方应停止本轮补给；
//!   - [`DmaMapper`] 的 `map` 与 `unmap` 必须成对调用，映射器自身不追踪缓冲所有权。
//! - **风险 (Trade-offs)**：DMA 原语本身属于 OS 平台层，这里给出的 [`HeapAllocator`] 与
//!   [`IovaMapper`] 是进程内实现，适合仿真、基准与测试。

use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use std::sync::Arc;

use thiserror::Error;

use crate::{buffer::NetBuf, desc::CookieLayout, stats::Gauge, types::DmaAddr};

/// 硬件代际。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwGeneration {
    /// 单页平坦描述符数组。
    Legacy,
    /// 多页描述符池，支持多链路操作。
    MultiLink,
}

/// 建池时由探测代码填写的硬件能力。
#[derive(Clone, Copy, Debug)]
pub struct HwCapabilities {
    pub generation: HwGeneration,
    /// 设备无法访问低于该值的 DMA 地址。
    pub dma_addr_floor: Option<u64>,
}

impl Default for HwCapabilities {
    fn default() -> Self {
        Self {
            generation: HwGeneration::MultiLink,
            dma_addr_floor: None,
        }
    }
}

/// 平台策略。
pub trait PlatformStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn cookie_layout(&self) -> CookieLayout;

    /// 设备能否使用该 DMA 地址。
    fn accepts_dma_addr(&self, _addr: DmaAddr) -> bool {
        true
    }
}

#[derive(Debug)]
struct LegacyPlatform {
    dma_floor: Option<u64>,
}

impl PlatformStrategy for LegacyPlatform {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn cookie_layout(&self) -> CookieLayout {
        CookieLayout::Flat
    }

    fn accepts_dma_addr(&self, addr: DmaAddr) -> bool {
        self.dma_floor.is_none_or(|floor| addr.0 >= floor)
    }
}

#[derive(Debug)]
struct MultiLinkPlatform {
    dma_floor: Option<u64>,
}

impl PlatformStrategy for MultiLinkPlatform {
    fn name(&self) -> &'static str {
        "multi-link"
    }

    fn cookie_layout(&self) -> CookieLayout {
        CookieLayout::MultiPage
    }

    fn accepts_dma_addr(&self, addr: DmaAddr) -> bool {
        self.dma_floor.is_none_or(|floor| addr.0 >= floor)
    }
}

/// 按硬件能力选定策略。
pub fn select_strategy(caps: &HwCapabilities) -> Arc<dyn PlatformStrategy> {
    let strategy: Arc<dyn PlatformStrategy> = match caps.generation {
        HwGeneration::Legacy => Arc::new(LegacyPlatform {
            dma_floor: caps.dma_addr_floor,
        }),
        HwGeneration::MultiLink => Arc::new(MultiLinkPlatform {
            dma_floor: caps.dma_addr_floor,
        }),
    };
    tracing::debug!(
        strategy = strategy.name(),
        dma_floor = ?caps.dma_addr_floor,
        "rx platform strategy selected"
    );
    strategy
}

/// 接收缓冲分配器。
pub trait BufferAllocator: Send + Sync {
    fn alloc(&self, size: usize, align: usize) -> Option<NetBuf>;
}

/// 基于堆的分配器。
#[derive(Debug, Default)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn alloc(&self, size: usize, _align: usize) -> Option<NetBuf> {
        Some(NetBuf::zeroed(size))
    }
}

/// DMA 映射失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("dma mapping failed: {reason}")]
pub struct MapError {
    pub reason: &'static str,
}

/// DMA 映射器。
pub trait DmaMapper: Send + Sync {
    fn map(&self, buf: &NetBuf) -> Result<DmaAddr, MapError>;

    fn unmap(&self, addr: DmaAddr, len: usize);
}

/// 线性递增的 IOVA 映射器。
///
/// 从 `base` 开始按 `stride` 对齐分配地址，并记录未解除映射的数量，便于检测泄漏。
#[derive(Debug)]
pub struct IovaMapper {
    cursor: AtomicU64,
    stride: u64,
    outstanding: Gauge,
}

impl IovaMapper {
    pub fn new(base: u64, stride: u64) -> Self {
        Self {
            cursor: AtomicU64::new(base),
            stride: stride.max(1),
            outstanding: Gauge::default(),
        }
    }

    /// 尚未 `unmap` 的映射数。
    pub fn outstanding(&self) -> u64 {
        self.outstanding.get()
    }
}

impl Default for IovaMapper {
    fn default() -> Self {
        Self::new(0x8000_0000, 4096)
    }
}

impl DmaMapper for IovaMapper {
    fn map(&self, _buf: &NetBuf) -> Result<DmaAddr, MapError> {
        let addr = self.cursor.fetch_add(self.stride, Ordering::Relaxed);
        self.outstanding.add(1);
        Ok(DmaAddr(addr))
    }

    fn unmap(&self, _addr: DmaAddr, _len: usize) {
        self.outstanding.sub(1);
    }
}
