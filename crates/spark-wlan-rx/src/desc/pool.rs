use std::sync::Arc;

use spin::Mutex;

use crate::{
    buffer::NetBuf,
    config::PoolConfig,
    error::{Result, RxError},
    platform::{DmaMapper, PlatformStrategy},
    stats::{Gauge, RxStats},
    types::{Cookie, DmaAddr, PoolId},
};

use super::{
    cookie::CookieCodec,
    free_list::{DescHandle, DescList, FreeList},
};

/// 描述符当前归属。任一时刻恰好处于其中之一。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescLocation {
    FreeList,
    HardwareRing,
    CallerHeld,
}

#[derive(Debug)]
struct DescSlot {
    buffer: Option<NetBuf>,
    dma_addr: Option<DmaAddr>,
    location: DescLocation,
    generation: u32,
    in_use: bool,
    unmapped: bool,
    error_state: bool,
}

impl DescSlot {
    fn new() -> Self {
        Self {
            buffer: None,
            dma_addr: None,
            location: DescLocation::FreeList,
            generation: 0,
            in_use: false,
            unmapped: false,
            error_state: false,
        }
    }

    fn matches(&self, handle: DescHandle, location: DescLocation) -> bool {
        self.generation == handle.generation && self.location == location
    }
}

/// 描述符只读视图。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorInfo {
    pub cookie: Cookie,
    pub pool_id: PoolId,
    pub location: DescLocation,
    pub generation: u32,
    pub in_use: bool,
    pub unmapped: bool,
    pub error_state: bool,
    pub has_buffer: bool,
}

/// 从硬件回收的描述符及其缓冲。
#[derive(Debug)]
pub struct Reaped {
    pub handle: DescHandle,
    pub buffer: NetBuf,
}

/// 接收描述符池。
///
/// # 教案式说明
/// - **意图 (Why)**：硬件只认识 Cookie，软件需要从 Cookie 找回缓冲并保证同一缓冲绝不会同时
///   被软件和硬件访问。池以“稳定下标 + 代数”的 arena 形式存放描述符记录，完成事件通过
///   Cookie 解码直接定位。
/// - **契约 (What)**：
///   - 记录在池生命周期内常驻，缓冲反复挂载/卸载；
///   - 归属迁移只有四条：`FreeList → CallerHeld`（`get_free`）、`CallerHeld → HardwareRing`
///     （`attach`）、`HardwareRing → CallerHeld`（`reap`）、`CallerHeld → FreeList`（`return_all`）；
///   - 每条迁移都校验句柄代数与当前归属，失败时不修改任何状态。
/// - **执行 (How)**：每个记录由独立的 `spin::Mutex` 保护，只在读写单条记录时短暂持有；
///   自由链表另有一把锁，只覆盖批量出入队。
/// - **风险 (Trade-offs)**：逐条加锁在批量操作时有额外开销，换来的是多核完成路径互不阻塞。
pub struct DescriptorPool {
    pool_id: PoolId,
    codec: CookieCodec,
    pages: Vec<Box<[Mutex<DescSlot>]>>,
    capacity: usize,
    free: FreeList,
    quarantine: Mutex<Vec<NetBuf>>,
    buffer_size: usize,
    buffer_alignment: usize,
    owner: u8,
    strategy: Arc<dyn PlatformStrategy>,
    stats: Arc<RxStats>,
    hardware_owned: Gauge,
}

impl DescriptorPool {
    /// 分配描述符池，所有描述符初始位于自由链表。
    ///
    /// 页分配失败返回 [`RxError::PoolExhaustedAtInit`]，该错误不可恢复，接收环不得启用。
    pub fn alloc_pool(
        config: &PoolConfig,
        strategy: Arc<dyn PlatformStrategy>,
        stats: Arc<RxStats>,
    ) -> Result<Self> {
        let pool_id = PoolId(config.pool_id);
        let count = config.num_descriptors;
        let per_page = config.effective_descriptors_per_page();
        let codec = CookieCodec::new(strategy.cookie_layout(), pool_id, per_page, count)?;

        let exhausted = || RxError::PoolExhaustedAtInit {
            pool_id,
            requested: count,
        };
        let num_pages = count.div_ceil(per_page);
        let mut pages: Vec<Box<[Mutex<DescSlot>]>> = Vec::new();
        pages.try_reserve_exact(num_pages).map_err(|_| exhausted())?;
        for page_id in 0..num_pages {
            let in_page = per_page.min(count - page_id * per_page);
            let mut page = Vec::new();
            page.try_reserve_exact(in_page).map_err(|_| exhausted())?;
            page.extend((0..in_page).map(|_| Mutex::new(DescSlot::new())));
            pages.push(page.into_boxed_slice());
        }

        tracing::debug!(
            pool_id = pool_id.0,
            descriptors = count,
            pages = num_pages,
            layout = ?codec.layout(),
            strategy = strategy.name(),
            "rx descriptor pool allocated"
        );

        Ok(Self {
            pool_id,
            codec,
            pages,
            capacity: count,
            free: FreeList::with_indices(count),
            quarantine: Mutex::new(Vec::new()),
            buffer_size: config.buffer_size,
            buffer_alignment: config.buffer_alignment,
            owner: config.owner,
            strategy,
            stats,
            hardware_owned: Gauge::default(),
        })
    }

    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    pub fn codec(&self) -> &CookieCodec {
        &self.codec
    }

    pub fn strategy(&self) -> &Arc<dyn PlatformStrategy> {
        &self.strategy
    }

    pub fn stats(&self) -> &Arc<RxStats> {
        &self.stats
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn buffer_alignment(&self) -> usize {
        self.buffer_alignment
    }

    pub fn owner(&self) -> u8 {
        self.owner
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// 当前挂在硬件环上的描述符数。
    pub fn hardware_count(&self) -> usize {
        self.hardware_owned.get() as usize
    }

    fn slot(&self, index: usize) -> Option<&Mutex<DescSlot>> {
        let per_page = self.codec.per_page();
        self.pages.get(index / per_page)?.get(index % per_page)
    }

    pub fn cookie_of(&self, handle: DescHandle) -> Cookie {
        self.codec.encode(self.codec.locate(handle.index()))
    }

    /// 解码 Cookie 为当前代数的句柄；不改变任何状态。
    pub fn decode(&self, cookie: Cookie) -> Result<DescHandle> {
        let index = self.codec.index_of(self.codec.decode(cookie)?);
        let slot = self.slot(index).ok_or(RxError::InvalidCookie {
            cookie,
            pool_id: self.pool_id,
        })?;
        let generation = slot.lock().generation;
        Ok(DescHandle {
            index: index as u32,
            generation,
        })
    }

    /// 取出至多 `count` 个自由描述符；数量不足不是错误。
    pub fn get_free(&self, count: usize) -> DescList {
        let indices = self.free.take(count);
        let mut list = DescList::with_capacity(indices.len());
        for index in indices {
            let Some(slot) = self.slot(index as usize) else {
                continue;
            };
            let mut slot = slot.lock();
            debug_assert_eq!(slot.location, DescLocation::FreeList);
            slot.location = DescLocation::CallerHeld;
            list.push(DescHandle {
                index,
                generation: slot.generation,
            });
        }
        list
    }

    /// 把调用方持有的描述符全部归还自由链表。
    ///
    /// 每个描述符先清空缓冲、复位 `in_use` 再入链。句柄代数不符或描述符并非调用方持有
    /// （重复归还、陈旧句柄）时拒绝该句柄并计数，其余句柄照常归还；只要有拒绝就返回首个错误。
    pub fn return_all(&self, list: DescList) -> Result<usize> {
        let mut accepted = Vec::with_capacity(list.len());
        let mut first_error = None;
        for handle in list {
            let Some(slot) = self.slot(handle.index()) else {
                first_error.get_or_insert(RxError::DescriptorState {
                    cookie: Cookie(handle.index),
                    detail: "handle index outside pool",
                });
                continue;
            };
            let mut slot = slot.lock();
            if !slot.matches(handle, DescLocation::CallerHeld) {
                let cookie = self.cookie_of(handle);
                self.stats.rejected_returns.incr();
                tracing::warn!(
                    pool_id = self.pool_id.0,
                    %cookie,
                    location = ?slot.location,
                    handle_generation = handle.generation,
                    current_generation = slot.generation,
                    "rejected descriptor return"
                );
                first_error.get_or_insert(RxError::DescriptorState {
                    cookie,
                    detail: "descriptor is not held by the caller",
                });
                continue;
            }
            assert!(!slot.in_use, "caller held descriptor must not be in use");
            slot.buffer = None;
            slot.dma_addr = None;
            slot.unmapped = false;
            slot.error_state = false;
            slot.generation = slot.generation.wrapping_add(1);
            slot.location = DescLocation::FreeList;
            accepted.push(handle.index);
        }
        self.free.splice(&accepted);
        match first_error {
            Some(err) => Err(err),
            None => Ok(accepted.len()),
        }
    }

    /// 把已映射缓冲挂到调用方持有的描述符上，并移交给硬件。
    pub fn attach(&self, handle: DescHandle, buffer: NetBuf, dma_addr: DmaAddr) -> Result<Cookie> {
        let cookie = self.cookie_of(handle);
        let slot = self.slot(handle.index()).ok_or(RxError::DescriptorState {
            cookie,
            detail: "handle index outside pool",
        })?;
        let mut slot = slot.lock();
        if !slot.matches(handle, DescLocation::CallerHeld) {
            return Err(RxError::DescriptorState {
                cookie,
                detail: "only caller held descriptors can be posted",
            });
        }
        assert!(!slot.in_use, "descriptor posted twice to hardware");
        slot.buffer = Some(buffer);
        slot.error_state = false;
        slot.dma_addr = Some(dma_addr);
        slot.in_use = true;
        slot.unmapped = false;
        slot.location = DescLocation::HardwareRing;
        self.hardware_owned.add(1);
        Ok(cookie)
    }

    /// 根据完成事件中的 Cookie 从硬件回收描述符：解除映射、取下缓冲，描述符转为调用方持有。
    ///
    /// 描述符不在硬件手中（重复完成、陈旧 Cookie）时标记 `error_state` 并拒绝。
    pub fn reap(&self, cookie: Cookie, mapper: &dyn DmaMapper) -> Result<Reaped> {
        let handle = match self.decode(cookie) {
            Ok(handle) => handle,
            Err(err) => {
                self.stats.invalid_cookies.incr();
                tracing::warn!(pool_id = self.pool_id.0, %cookie, "completion carries invalid cookie");
                return Err(err);
            }
        };
        let slot = self.slot(handle.index()).ok_or(RxError::InvalidCookie {
            cookie,
            pool_id: self.pool_id,
        })?;
        let (buffer, dma_addr) = {
            let mut slot = slot.lock();
            if slot.location != DescLocation::HardwareRing || !slot.in_use {
                slot.error_state = true;
                drop(slot);
                self.stats.stale_completions.incr();
                tracing::warn!(pool_id = self.pool_id.0, %cookie, "completion for descriptor not owned by hardware");
                return Err(RxError::DescriptorState {
                    cookie,
                    detail: "completion for descriptor not owned by hardware",
                });
            }
            let buffer = slot.buffer.take();
            let dma_addr = slot.dma_addr.take();
            slot.in_use = false;
            slot.unmapped = true;
            slot.location = DescLocation::CallerHeld;
            (buffer, dma_addr)
        };
        self.hardware_owned.sub(1);
        if let Some(addr) = dma_addr {
            mapper.unmap(addr, self.buffer_size);
        }
        let buffer = buffer.ok_or(RxError::DescriptorState {
            cookie,
            detail: "hardware owned descriptor carried no buffer",
        })?;
        Ok(Reaped { handle, buffer })
    }

    /// 隔离一个设备无法使用的缓冲，避免分配器立即把同一块内存再分给我们。
    ///
    /// 调用方必须先解除映射，隔离区只持有内存、不持有 IOVA。
    pub(crate) fn quarantine(&self, buffer: NetBuf) {
        self.quarantine.lock().push(buffer);
        self.stats.quarantined_buffers.incr();
    }

    pub fn quarantined(&self) -> usize {
        self.quarantine.lock().len()
    }

    /// 释放隔离区中的缓冲，返回释放数量。
    pub fn drain_quarantine(&self) -> usize {
        let drained = core::mem::take(&mut *self.quarantine.lock());
        drained.len()
    }

    /// 拆除阶段回收所有仍挂在硬件上的缓冲，描述符全部回到自由链表。
    ///
    /// 调用方必须保证硬件已停止访问该环。调用方持有的描述符不受影响。
    pub fn reclaim_all(&self, mapper: &dyn DmaMapper) -> usize {
        let mut reclaimed = Vec::new();
        for index in 0..self.capacity {
            let Some(slot) = self.slot(index) else {
                continue;
            };
            let addr = {
                let mut slot = slot.lock();
                if slot.location != DescLocation::HardwareRing {
                    continue;
                }
                slot.buffer = None;
                slot.in_use = false;
                slot.unmapped = true;
                slot.generation = slot.generation.wrapping_add(1);
                slot.location = DescLocation::FreeList;
                slot.dma_addr.take()
            };
            if let Some(addr) = addr {
                mapper.unmap(addr, self.buffer_size);
            }
            self.hardware_owned.sub(1);
            reclaimed.push(index as u32);
        }
        self.free.splice(&reclaimed);
        tracing::debug!(pool_id = self.pool_id.0, reclaimed = reclaimed.len(), "rx pool reclaimed");
        reclaimed.len()
    }

    /// 读取单个描述符的只读视图。
    pub fn descriptor(&self, index: usize) -> Option<DescriptorInfo> {
        let slot = self.slot(index)?.lock();
        Some(DescriptorInfo {
            cookie: self.codec.encode(self.codec.locate(index)),
            pool_id: self.pool_id,
            location: slot.location,
            generation: slot.generation,
            in_use: slot.in_use,
            unmapped: slot.unmapped,
            error_state: slot.error_state,
            has_buffer: slot.buffer.is_some(),
        })
    }

    /// 各归属的描述符数量 `(free, hardware, caller_held)`，用于诊断与不变量校验。
    pub fn location_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for index in 0..self.capacity {
            if let Some(slot) = self.slot(index) {
                match slot.lock().location {
                    DescLocation::FreeList => counts.0 += 1,
                    DescLocation::HardwareRing => counts.1 += 1,
                    DescLocation::CallerHeld => counts.2 += 1,
                }
            }
        }
        counts
    }
}

impl core::fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("pool_id", &self.pool_id)
            .field("capacity", &self.capacity)
            .field("free", &self.free.len())
            .field("hardware", &self.hardware_count())
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{HwCapabilities, IovaMapper, select_strategy};

    fn small_pool(count: usize) -> DescriptorPool {
        let config = PoolConfig {
            num_descriptors: count,
            descriptors_per_page: 4,
            ..PoolConfig::default()
        };
        DescriptorPool::alloc_pool(
            &config,
            select_strategy(&HwCapabilities::default()),
            Arc::new(RxStats::default()),
        )
        .expect("小池分配不应失败")
    }

    #[test]
    fn partial_last_page() {
        let pool = small_pool(10);
        assert_eq!(pool.capacity(), 10);
        assert!(pool.descriptor(9).is_some());
        assert!(pool.descriptor(10).is_none());
        assert_eq!(pool.location_counts(), (10, 0, 0));
    }

    #[test]
    fn attach_and_reap_move_ownership() {
        let pool = small_pool(4);
        let mapper = IovaMapper::default();
        let mut list = pool.get_free(1);
        let handle = list.pop().expect("应取得一个描述符");
        let buf = NetBuf::zeroed(64);
        let addr = mapper.map(&buf).expect("映射成功");
        let cookie = pool.attach(handle, buf, addr).expect("挂载成功");

        let info = pool.descriptor(handle.index()).expect("描述符存在");
        assert!(info.in_use && info.has_buffer);
        assert_eq!(info.location, DescLocation::HardwareRing);

        let reaped = pool.reap(cookie, &mapper).expect("回收成功");
        assert_eq!(reaped.handle, handle);
        assert_eq!(mapper.outstanding(), 0, "回收时必须解除映射");
        let info = pool.descriptor(handle.index()).expect("描述符存在");
        assert!(!info.in_use && info.unmapped);
        assert_eq!(info.location, DescLocation::CallerHeld);

        let err = pool.reap(cookie, &mapper).unwrap_err();
        assert_eq!(err.code(), "rx.descriptor.state", "重复完成必须被拒绝");
        assert!(pool.descriptor(handle.index()).expect("描述符存在").error_state);
        assert_eq!(pool.stats().stale_completions.get(), 1);
    }

    #[test]
    fn reposting_after_duplicate_completion_clears_error_state() {
        let pool = small_pool(4);
        let mapper = IovaMapper::default();
        let mut list = pool.get_free(1);
        let handle = list.pop().expect("应取得一个描述符");
        let buf = NetBuf::zeroed(32);
        let addr = mapper.map(&buf).expect("映射成功");
        let cookie = pool.attach(handle, buf, addr).expect("挂载成功");
        let reaped = pool.reap(cookie, &mapper).expect("回收成功");
        pool.reap(cookie, &mapper).unwrap_err();
        assert!(pool.descriptor(handle.index()).expect("描述符存在").error_state);

        let buf = NetBuf::zeroed(32);
        let addr = mapper.map(&buf).expect("映射成功");
        pool.attach(reaped.handle, buf, addr).expect("回收后的描述符可直接重新挂载");
        let info = pool.descriptor(handle.index()).expect("描述符存在");
        assert_eq!(info.location, DescLocation::HardwareRing);
        assert!(!info.error_state, "重新交给硬件的描述符不得沿用旧的错误标记");
    }

    #[test]
    fn attach_rejects_stale_handle() {
        let pool = small_pool(2);
        let list = pool.get_free(1);
        let handle = *list.iter().next().expect("应取得描述符");
        pool.return_all(list).expect("归还成功");
        let err = pool
            .attach(handle, NetBuf::zeroed(8), DmaAddr(0x1000))
            .unwrap_err();
        assert!(matches!(err, RxError::DescriptorState { .. }));
    }

    #[test]
    fn reclaim_all_returns_hardware_descriptors() {
        let pool = small_pool(6);
        let mapper = IovaMapper::default();
        for handle in pool.get_free(3) {
            let buf = NetBuf::zeroed(32);
            let addr = mapper.map(&buf).expect("映射成功");
            pool.attach(handle, buf, addr).expect("挂载成功");
        }
        assert_eq!(pool.hardware_count(), 3);
        assert_eq!(pool.reclaim_all(&mapper), 3);
        assert_eq!(pool.hardware_count(), 0);
        assert_eq!(mapper.outstanding(), 0);
        assert_eq!(pool.location_counts(), (6, 0, 0));
    }
}
