//! 测试桩：确定性的硬件环、分配器、映射器与交付端。
//!
//! # 设计定位（Why）
//! - 单元测试、集成测试与基准都需要一个可观察的“硬件”，各处重复定义容易在接口调整时漏改；
//! - 桩对象只模拟协议行为（槽位、Cookie、失败注入），不涉及真实 DMA。
//!
//! # 契约说明（What）
//! - [`SimRing`] 断言访问临界区不可重入，并记录进入次数；
//! - [`ScriptedAllocator`] / [`ScriptedMapper`] 按调用序号注入失败；
//! - [`CollectingSink`] 记录交付的帧，可切换为全部拒收。

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::{BTreeSet, VecDeque};

use spin::Mutex;

use crate::{
    buffer::NetBuf,
    peer::PeerRef,
    pipeline::{DeliveryError, DeliverySink},
    platform::{BufferAllocator, DmaMapper, IovaMapper, MapError},
    ring::{RingSlot, RxRing},
    types::{Cookie, DmaAddr, MacAddr, PeerId},
};

/// 环中的一个已发布条目。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimRingEntry {
    pub addr: DmaAddr,
    pub cookie: Cookie,
    pub owner: u8,
}

/// 内存中的补给环。
#[derive(Debug)]
pub struct SimRing {
    capacity: usize,
    posted: VecDeque<SimRingEntry>,
    reserved: usize,
    in_access: bool,
    sections: usize,
}

impl SimRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            posted: VecDeque::with_capacity(capacity),
            reserved: 0,
            in_access: false,
            sections: 0,
        }
    }

    /// 已发布、尚未被“硬件”取走的条目数。
    pub fn posted_len(&self) -> usize {
        self.posted.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SimRingEntry> {
        self.posted.iter()
    }

    /// 累计进入临界区的次数。
    pub fn access_sections(&self) -> usize {
        self.sections
    }

    /// 当前未退出的临界区数（0 或 1）。
    pub fn open_sections(&self) -> usize {
        usize::from(self.in_access)
    }

    /// 模拟硬件取走最早发布的 `count` 个缓冲，返回它们的 Cookie。
    pub fn consume(&mut self, count: usize) -> Vec<Cookie> {
        let count = count.min(self.posted.len());
        self.posted.drain(..count).map(|entry| entry.cookie).collect()
    }
}

impl RxRing for SimRing {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn access_start(&mut self) {
        assert!(!self.in_access, "ring access is not reentrant");
        self.in_access = true;
        self.sections += 1;
    }

    fn access_end(&mut self) {
        self.in_access = false;
        self.reserved = 0;
    }

    fn num_available(&mut self) -> usize {
        self.capacity - self.posted.len()
    }

    fn next_slot(&mut self) -> Option<RingSlot> {
        assert!(self.in_access, "next_slot outside ring access");
        let used = self.posted.len() + self.reserved;
        if used >= self.capacity {
            return None;
        }
        self.reserved += 1;
        Some(RingSlot(used))
    }

    fn set_buffer_addr_info(&mut self, _slot: RingSlot, addr: DmaAddr, cookie: Cookie, owner: u8) {
        assert!(self.in_access, "ring write outside ring access");
        self.reserved = self.reserved.saturating_sub(1);
        self.posted.push_back(SimRingEntry { addr, cookie, owner });
    }
}

/// 按调用序号注入失败的分配器。
#[derive(Debug, Default)]
pub struct ScriptedAllocator {
    calls: AtomicUsize,
    fail_from: Option<usize>,
}

impl ScriptedAllocator {
    /// 从第 `call` 次调用（0 起）开始一律失败。
    pub fn failing_from(call: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_from: Some(call),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl BufferAllocator for ScriptedAllocator {
    fn alloc(&self, size: usize, _align: usize) -> Option<NetBuf> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        match self.fail_from {
            Some(from) if call >= from => None,
            _ => Some(NetBuf::zeroed(size)),
        }
    }
}

/// 按调用序号注入映射失败或低地址的映射器。
#[derive(Debug)]
pub struct ScriptedMapper {
    inner: IovaMapper,
    calls: AtomicUsize,
    fail_on: BTreeSet<usize>,
    low_calls: BTreeSet<usize>,
    low_addr: u64,
}

impl ScriptedMapper {
    pub fn new() -> Self {
        Self {
            inner: IovaMapper::default(),
            calls: AtomicUsize::new(0),
            fail_on: BTreeSet::new(),
            low_calls: BTreeSet::new(),
            low_addr: 0x1000,
        }
    }

    /// 第 `calls` 次映射返回失败。
    pub fn fail_on(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_on.extend(calls);
        self
    }

    /// 第 `calls` 次映射返回低于任何地址下限的地址。
    pub fn low_address_on(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.low_calls.extend(calls);
        self
    }

    pub fn outstanding(&self) -> u64 {
        self.inner.outstanding()
    }
}

impl Default for ScriptedMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaMapper for ScriptedMapper {
    fn map(&self, buf: &NetBuf) -> Result<DmaAddr, MapError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_on.contains(&call) {
            return Err(MapError {
                reason: "scripted failure",
            });
        }
        let addr = self.inner.map(buf)?;
        if self.low_calls.contains(&call) {
            return Ok(DmaAddr(self.low_addr + (addr.0 & 0xfff)));
        }
        Ok(addr)
    }

    fn unmap(&self, addr: DmaAddr, len: usize) {
        self.inner.unmap(addr, len);
    }
}

/// 交付记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub peer: MacAddr,
    pub peer_id: Option<PeerId>,
    pub len: usize,
    pub fragments: usize,
}

/// 记录型交付端。
#[derive(Debug, Default)]
pub struct CollectingSink {
    frames: Mutex<Vec<Delivered>>,
    reject: AtomicBool,
}

impl CollectingSink {
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.frames.lock().clone()
    }
}

impl DeliverySink for CollectingSink {
    fn deliver(&self, frame: NetBuf, peer: &PeerRef) -> Result<(), DeliveryError> {
        if self.reject.load(Ordering::Relaxed) {
            return Err(DeliveryError {
                reason: "sink closed",
            });
        }
        self.frames.lock().push(Delivered {
            peer: peer.mac(),
            peer_id: peer.peer_id(),
            len: frame.total_len(),
            fragments: frame.frags().len(),
        });
        Ok(())
    }
}
