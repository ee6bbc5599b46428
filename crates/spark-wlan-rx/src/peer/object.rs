use core::{fmt, ops::Deref};
use std::sync::Arc;

#[cfg(not(any(loom, spark_loom)))]
use core::sync::atomic::{AtomicU32, Ordering};
#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;
use spin::Mutex;

use crate::{
    error::{Result, RxError},
    mlo::LinkTable,
    stats::{Counter, RxStats},
    types::{ChipId, MacAddr, PeerId, VdevId},
};

use super::state::{PeerKind, PeerState};

/// 持有对端引用的模块。
///
/// 每个模块单独计数，引用泄漏时可以直接看出是哪条路径没有释放。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ModuleId {
    /// 对端表哈希桶持有的基础引用。
    Config,
    /// 对端 ID 表持有的引用。
    Htt,
    /// 控制面调用方。
    Cdp,
    Rx,
    RxErr,
    TxRx,
    TxComp,
    Stats,
    /// Link 对端指向其 MLD 对端的引用。
    Mlo,
    Misc,
}

impl ModuleId {
    pub const COUNT: usize = 10;

    pub const ALL: [ModuleId; Self::COUNT] = [
        ModuleId::Config,
        ModuleId::Htt,
        ModuleId::Cdp,
        ModuleId::Rx,
        ModuleId::RxErr,
        ModuleId::TxRx,
        ModuleId::TxComp,
        ModuleId::Stats,
        ModuleId::Mlo,
        ModuleId::Misc,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

const NO_PEER_ID: u32 = u32::MAX;

/// 引用归零的对端，等待 [`PeerTable::reap_released`](super::PeerTable::reap_released) 完成回收。
#[derive(Default)]
pub(crate) struct ReleaseQueue {
    pending: Mutex<Vec<Arc<Peer>>>,
}

impl ReleaseQueue {
    fn push(&self, peer: Arc<Peer>) {
        self.pending.lock().push(peer);
    }

    pub(crate) fn drain(&self) -> Vec<Arc<Peer>> {
        core::mem::take(&mut *self.pending.lock())
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// 对端接收计数。
#[derive(Debug, Default)]
pub struct PeerRxStats {
    pub msdus: Counter,
    pub bytes: Counter,
    pub drops: Counter,
}

/// 对端对象。
///
/// # 教案式说明
/// - **意图 (Why)**：每个接收帧交付前都要归属到一个对端；对端可能在任意时刻被控制面删除，
///   数据面因此只能通过带计数的 [`PeerRef`] 访问它。
/// - **契约 (What)**：
///   - 总引用计数与按模块计数同步增减，总数永不下溢；
///   - 总数归零后不可再获取新引用，对端进入释放队列；
///   - 状态迁移经 [`PeerState::can_transition_to`] 校验。
/// - **执行 (How)**：获取引用用 `fetch_update` 实现“非零才加一”，整个过程无锁；
///   状态与链路表各自由短时自旋锁保护。
pub struct Peer {
    mac: MacAddr,
    vdev_id: VdevId,
    chip_id: ChipId,
    kind: PeerKind,
    self_peer: bool,
    peer_id: AtomicU32,
    ref_cnt: AtomicU32,
    mod_refs: [AtomicU32; ModuleId::COUNT],
    state: Mutex<PeerState>,
    pub(crate) mld: Mutex<Option<PeerRef>>,
    pub(crate) links: Mutex<LinkTable>,
    rx: PeerRxStats,
    /// 独立对端没有释放队列，归零后随最后一个 `Arc` 一起析构。
    release: Option<Arc<ReleaseQueue>>,
    stats: Arc<RxStats>,
}

/// 创建对端所需的身份信息。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerSpec {
    pub mac: MacAddr,
    pub vdev_id: VdevId,
    pub chip_id: ChipId,
    pub kind: PeerKind,
    /// 自身占位对端（如 STA 模式下代表本机的对端）。
    pub self_peer: bool,
}

impl PeerSpec {
    pub fn legacy(mac: MacAddr, vdev_id: VdevId) -> Self {
        Self {
            mac,
            vdev_id,
            chip_id: ChipId(0),
            kind: PeerKind::Legacy,
            self_peer: false,
        }
    }

    pub fn link(mac: MacAddr, vdev_id: VdevId, chip_id: ChipId) -> Self {
        Self {
            mac,
            vdev_id,
            chip_id,
            kind: PeerKind::Link,
            self_peer: false,
        }
    }

    pub fn mld(mac: MacAddr, vdev_id: VdevId) -> Self {
        Self {
            mac,
            vdev_id,
            chip_id: ChipId(0),
            kind: PeerKind::Mld,
            self_peer: false,
        }
    }
}

impl Peer {
    /// 构造对端并返回其基础引用（计数为 1）。
    pub(crate) fn create(
        spec: PeerSpec,
        module: ModuleId,
        release: Option<Arc<ReleaseQueue>>,
        stats: Arc<RxStats>,
    ) -> PeerRef {
        let peer = Arc::new(Self {
            mac: spec.mac,
            vdev_id: spec.vdev_id,
            chip_id: spec.chip_id,
            kind: spec.kind,
            self_peer: spec.self_peer,
            peer_id: AtomicU32::new(NO_PEER_ID),
            ref_cnt: AtomicU32::new(1),
            mod_refs: core::array::from_fn(|i| {
                AtomicU32::new(u32::from(i == module.index()))
            }),
            state: Mutex::new(PeerState::Init),
            mld: Mutex::new(None),
            links: Mutex::new(LinkTable::default()),
            rx: PeerRxStats::default(),
            release,
            stats,
        });
        PeerRef { peer, module }
    }

    /// 构造不属于任何对端表的独立对端。计数归零时不入队，状态保持不变。
    pub fn new_detached(spec: PeerSpec, module: ModuleId) -> PeerRef {
        Self::create(spec, module, None, Arc::new(RxStats::default()))
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn vdev_id(&self) -> VdevId {
        self.vdev_id
    }

    pub fn chip_id(&self) -> ChipId {
        self.chip_id
    }

    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    pub fn is_self_peer(&self) -> bool {
        self.self_peer
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        match self.peer_id.load(Ordering::Acquire) {
            NO_PEER_ID => None,
            id => Some(PeerId(id as u16)),
        }
    }

    pub(crate) fn set_peer_id(&self, id: Option<PeerId>) {
        let raw = id.map_or(NO_PEER_ID, |id| u32::from(id.0));
        self.peer_id.store(raw, Ordering::Release);
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_cnt.load(Ordering::Acquire)
    }

    /// 指定模块当前持有的引用数。
    pub fn module_ref_count(&self, module: ModuleId) -> u32 {
        self.mod_refs[module.index()].load(Ordering::Relaxed)
    }

    /// 按模块列出非零引用，用于泄漏排查。
    pub fn module_refs(&self) -> Vec<(ModuleId, u32)> {
        ModuleId::ALL
            .iter()
            .map(|&module| (module, self.module_ref_count(module)))
            .filter(|&(_, count)| count != 0)
            .collect()
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    pub fn rx_stats(&self) -> &PeerRxStats {
        &self.rx
    }

    /// 链路表快照（仅 MLD 对端有内容）。
    pub fn link_table(&self) -> LinkTable {
        *self.links.lock()
    }

    /// 校验并执行状态迁移，返回迁移前的状态。非法迁移不修改状态。
    pub fn try_transition(&self, next: PeerState) -> Result<PeerState> {
        let mut state = self.state.lock();
        let current = *state;
        if !current.can_transition_to(next, self.kind, self.self_peer) {
            return Err(RxError::StateViolation {
                mac: self.mac,
                from: current,
                to: next,
            });
        }
        *state = next;
        Ok(current)
    }

    /// 带处置策略的状态迁移。
    ///
    /// 非法迁移计数并记录错误日志；调试构建直接断言失败，发布构建强制写入目标状态以保持推进，
    /// 避免对端卡死在中间状态而永远得不到释放。
    pub fn update_state(&self, next: PeerState) -> PeerState {
        match self.try_transition(next) {
            Ok(previous) => previous,
            Err(err) => {
                self.stats.state_violations.incr();
                tracing::error!(mac = %self.mac, error = %err, "illegal peer state transition");
                debug_assert!(false, "{err}");
                let mut state = self.state.lock();
                let previous = *state;
                *state = next;
                previous
            }
        }
    }

    /// 仅当计数非零时加一。
    fn try_acquire(&self, module: ModuleId) -> bool {
        let acquired = self
            .ref_cnt
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |count| {
                (count != 0).then(|| count + 1)
            })
            .is_ok();
        if acquired {
            self.mod_refs[module.index()].fetch_add(1, Ordering::Relaxed);
        }
        acquired
    }

    /// 释放一个引用；计数归零时把对端放入释放队列。重复释放不会使计数下溢。
    fn release_ref(this: &Arc<Self>, module: ModuleId) {
        let _ = this.mod_refs[module.index()].fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |count| Some(count.saturating_sub(1)),
        );
        match this
            .ref_cnt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            }) {
            Ok(1) => {
                tracing::debug!(mac = %this.mac, "peer reference count reached zero");
                if let Some(queue) = &this.release {
                    queue.push(Arc::clone(this));
                }
            }
            Ok(_) => {}
            Err(_) => {
                tracing::error!(mac = %this.mac, module = ?module, "peer reference released below zero");
            }
        }
    }

    /// 为指定模块获取一个新引用；对端已归零则返回 [`RxError::PeerTeardown`]。
    pub fn get_ref(this: &Arc<Self>, module: ModuleId) -> Result<PeerRef> {
        if this.try_acquire(module) {
            Ok(PeerRef {
                peer: Arc::clone(this),
                module,
            })
        } else {
            Err(RxError::PeerTeardown { mac: this.mac })
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("mac", &self.mac)
            .field("vdev_id", &self.vdev_id)
            .field("chip_id", &self.chip_id)
            .field("kind", &self.kind)
            .field("peer_id", &self.peer_id())
            .field("ref_cnt", &self.ref_count())
            .field("state", &self.state())
            .finish()
    }
}

/// 对端引用令牌。
///
/// 持有令牌即持有一个按模块记账的引用，`Drop` 时恰好释放这一个引用。
/// 令牌不实现 `Clone`，复制引用必须经 [`PeerRef::clone_ref`] 并声明模块。
pub struct PeerRef {
    peer: Arc<Peer>,
    module: ModuleId,
}

impl PeerRef {
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// 为另一个模块复制引用。当前令牌保证计数非零，因此总能成功。
    pub fn clone_ref(&self, module: ModuleId) -> PeerRef {
        self.peer.ref_cnt.fetch_add(1, Ordering::Relaxed);
        self.peer.mod_refs[module.index()].fetch_add(1, Ordering::Relaxed);
        PeerRef {
            peer: Arc::clone(&self.peer),
            module,
        }
    }

    /// 底层对象，可用于与表中条目做身份比较。
    pub fn arc(&self) -> &Arc<Peer> {
        &self.peer
    }

    pub fn ptr_eq(&self, other: &PeerRef) -> bool {
        Arc::ptr_eq(&self.peer, &other.peer)
    }
}

impl Deref for PeerRef {
    type Target = Peer;

    fn deref(&self) -> &Peer {
        &self.peer
    }
}

impl Drop for PeerRef {
    fn drop(&mut self) {
        Peer::release_ref(&self.peer, self.module);
    }
}

impl fmt::Debug for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRef")
            .field("module", &self.module)
            .field("peer", &*self.peer)
            .finish()
    }
}
