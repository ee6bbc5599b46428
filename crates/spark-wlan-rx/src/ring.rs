//! 硬件接收补给环抽象。
//!
//! # 教案式说明
//! - **意图 (Why)**：补给引擎向环写入“缓冲地址 + Cookie + 返回所有者”，环的头尾指针同步、
//!   门铃写入等细节属于硬件层；这里只约定最小的访问协议。
//! - **契约 (What)**：
//!   - 一批写入必须位于同一个访问临界区内：`access_start` → 若干次 `next_slot` +
//!     `set_buffer_addr_info` → `access_end`；
//!   - 临界区不可重入，借助 `&mut` 独占借用在类型层面保证；
//!   - `next_slot` 取得但未写入的槽位在 `access_end` 时不会发布给硬件。
//! - **执行 (How)**：[`RingAccess`] 是 RAII 守卫，构造时进入临界区、析构时退出，
//!   即使补给循环提前返回也不会遗漏 `access_end`。

use crate::types::{Cookie, DmaAddr};

/// 环内槽位编号。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingSlot(pub usize);

/// 硬件补给环。
pub trait RxRing {
    /// 环的总槽位数。
    fn capacity(&self) -> usize;

    fn access_start(&mut self);

    fn access_end(&mut self);

    /// 同步硬件指针后可写入的空槽位数。
    fn num_available(&mut self) -> usize;

    fn next_slot(&mut self) -> Option<RingSlot>;

    fn set_buffer_addr_info(&mut self, slot: RingSlot, addr: DmaAddr, cookie: Cookie, owner: u8);
}

/// 环访问临界区守卫。
pub struct RingAccess<'a, R: RxRing + ?Sized> {
    ring: &'a mut R,
}

impl<'a, R: RxRing + ?Sized> RingAccess<'a, R> {
    pub fn begin(ring: &'a mut R) -> Self {
        ring.access_start();
        Self { ring }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn num_available(&mut self) -> usize {
        self.ring.num_available()
    }

    pub fn next_slot(&mut self) -> Option<RingSlot> {
        self.ring.next_slot()
    }

    pub fn set_buffer_addr_info(&mut self, slot: RingSlot, addr: DmaAddr, cookie: Cookie, owner: u8) {
        self.ring.set_buffer_addr_info(slot, addr, cookie, owner);
    }
}

impl<R: RxRing + ?Sized> Drop for RingAccess<'_, R> {
    fn drop(&mut self) {
        self.ring.access_end();
    }
}
