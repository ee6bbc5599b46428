use std::sync::Arc;

use dashmap::DashMap;
use spin::Mutex;

use crate::{
    config::PeerTableConfig,
    error::{Result, RxError},
    stats::RxStats,
    types::{ChipId, MacAddr, PeerId, VdevId},
};

use super::{
    object::{ModuleId, Peer, PeerRef, PeerSpec, ReleaseQueue},
    state::{PeerKind, PeerState},
};

/// 对端表。
///
/// # 教案式说明
/// - **意图 (Why)**：数据面按对端 ID 在 O(1) 内找到对端，控制面按 MAC 地址查找与删除；
///   两张索引各自持有带计数的引用，对端只有在两边都撤出、且所有处理上下文都释放后才会回收。
/// - **契约 (What)**：
///   - MAC 哈希（`DashMap`）持有 `Config` 引用，MLD 对端单独一张哈希；
///   - ID 表（`spin::Mutex<Vec<Option<PeerRef>>>`）持有 `Htt` 引用，锁内只做下标访问与计数加一，
///     任何引用释放都挪到锁外；
///   - `get_ref_by_id` 不返回已进入拆除阶段的对端，`get_ref_by_id_any_state` 用于统计冲刷等
///     必须看到拆除中对端的路径；
///   - 计数归零的对端进入释放队列，由 [`PeerTable::reap_released`] 迁移到 `Freed` 并摘除。
/// - **风险 (Trade-offs)**：回收是显式的一步而非在 `Drop` 中完成，保证释放永远发生在
///   对端内部锁之外，代价是调用方需要周期性调用 `reap_released`（控制面操作与接收管线会自动调用）。
pub struct PeerTable {
    hash: DashMap<MacAddr, Vec<PeerRef>>,
    mld_hash: DashMap<MacAddr, PeerRef>,
    id_map: Mutex<Vec<Option<PeerRef>>>,
    inactive: Mutex<Vec<Arc<Peer>>>,
    release: Arc<ReleaseQueue>,
    stats: Arc<RxStats>,
}

impl PeerTable {
    pub fn new(config: &PeerTableConfig, stats: Arc<RxStats>) -> Self {
        let mut id_map = Vec::with_capacity(config.max_peers);
        id_map.resize_with(config.max_peers, || None);
        Self {
            hash: DashMap::new(),
            mld_hash: DashMap::new(),
            id_map: Mutex::new(id_map),
            inactive: Mutex::new(Vec::new()),
            release: Arc::new(ReleaseQueue::default()),
            stats,
        }
    }

    pub fn max_peers(&self) -> usize {
        self.id_map.lock().len()
    }

    pub fn stats(&self) -> &Arc<RxStats> {
        &self.stats
    }

    /// 创建对端并挂入 MAC 哈希，返回控制面引用（`Cdp`）。
    ///
    /// 同一 `(mac, vdev)`（MLD 对端按 `mac`）已存在时返回已有对端的新引用。
    pub fn create_peer(&self, spec: PeerSpec) -> PeerRef {
        if spec.kind == PeerKind::Mld {
            let entry = self.mld_hash.entry(spec.mac).or_insert_with(|| {
                Peer::create(
                    spec,
                    ModuleId::Config,
                    Some(Arc::clone(&self.release)),
                    Arc::clone(&self.stats),
                )
            });
            return entry.value().clone_ref(ModuleId::Cdp);
        }
        let mut bin = self.hash.entry(spec.mac).or_default();
        if let Some(existing) = bin.iter().find(|peer| peer.vdev_id() == spec.vdev_id) {
            tracing::debug!(mac = %spec.mac, vdev = spec.vdev_id.0, "peer already present, reusing");
            return existing.clone_ref(ModuleId::Cdp);
        }
        let base = Peer::create(
            spec,
            ModuleId::Config,
            Some(Arc::clone(&self.release)),
            Arc::clone(&self.stats),
        );
        let handle = base.clone_ref(ModuleId::Cdp);
        bin.push(base);
        tracing::debug!(mac = %spec.mac, vdev = spec.vdev_id.0, kind = ?spec.kind, "peer created");
        handle
    }

    /// 按 MAC 查找第一个匹配的非 MLD 对端。
    pub fn find_by_mac(&self, mac: MacAddr, module: ModuleId) -> Option<PeerRef> {
        self.find_in_bin(mac, module, |_| true)
    }

    pub fn find_by_mac_vdev(&self, mac: MacAddr, vdev_id: VdevId, module: ModuleId) -> Option<PeerRef> {
        self.find_in_bin(mac, module, |peer| peer.vdev_id() == vdev_id)
    }

    /// 按 `(mac, chip)` 查找，多芯片 MLO 下用于定位某条链路的对端。
    pub fn find_by_mac_chip(&self, mac: MacAddr, chip_id: ChipId, module: ModuleId) -> Option<PeerRef> {
        self.find_in_bin(mac, module, |peer| peer.chip_id() == chip_id)
    }

    pub fn find_mld_by_mac(&self, mac: MacAddr, module: ModuleId) -> Option<PeerRef> {
        self.mld_hash.get(&mac).map(|entry| entry.value().clone_ref(module))
    }

    fn find_in_bin(
        &self,
        mac: MacAddr,
        module: ModuleId,
        matches: impl Fn(&PeerRef) -> bool,
    ) -> Option<PeerRef> {
        let bin = self.hash.get(&mac)?;
        bin.iter()
            .find(|peer| matches(peer))
            .map(|peer| peer.clone_ref(module))
    }

    /// 按 ID 取引用，跳过已进入拆除阶段的对端。
    pub fn get_ref_by_id(&self, peer_id: PeerId, module: ModuleId) -> Option<PeerRef> {
        let peer = self.get_ref_by_id_any_state(peer_id, module)?;
        if peer.state().is_torn_down() {
            // 引用在此处释放，已不在 ID 表锁内。
            return None;
        }
        Some(peer)
    }

    /// 按 ID 取引用，不检查拆除阶段。
    pub fn get_ref_by_id_any_state(&self, peer_id: PeerId, module: ModuleId) -> Option<PeerRef> {
        let id_map = self.id_map.lock();
        let slot = id_map.get(peer_id.index())?.as_ref()?;
        Peer::get_ref(slot.arc(), module).ok()
    }

    /// 控制面事件：固件为 `(mac, vdev)` 分配了对端 ID。
    ///
    /// 对端必须已创建；映射后 `Init` 对端迁移到 `Active`。同一对端重复映射同一 ID 是幂等的。
    pub fn peer_map(&self, peer_id: PeerId, mac: MacAddr, vdev_id: VdevId) -> Result<()> {
        if peer_id.index() >= self.max_peers() {
            return Err(RxError::InvalidPeerId { peer_id });
        }
        let peer = self
            .find_by_mac_vdev(mac, vdev_id, ModuleId::Htt)
            .or_else(|| self.find_mld_by_mac(mac, ModuleId::Htt))
            .ok_or(RxError::PeerNotFound { mac })?;

        let displaced = {
            let mut id_map = self.id_map.lock();
            let Some(slot) = id_map.get_mut(peer_id.index()) else {
                return Err(RxError::InvalidPeerId { peer_id });
            };
            match slot {
                Some(current) if current.ptr_eq(&peer) => Some(peer),
                Some(current) => {
                    return Err(RxError::PeerIdInUse {
                        peer_id,
                        current: current.mac(),
                    });
                }
                None => {
                    peer.set_peer_id(Some(peer_id));
                    if peer.state() == PeerState::Init {
                        peer.update_state(PeerState::Active);
                    }
                    *slot = Some(peer);
                    None
                }
            }
        };
        // 幂等重映射时多拿的引用在锁外释放。
        drop(displaced);
        tracing::debug!(%mac, %peer_id, vdev = vdev_id.0, "peer mapped");
        Ok(())
    }

    /// 控制面事件：固件回收对端 ID。对端迁移到 `Inactive`，ID 表的引用随之释放。
    pub fn peer_unmap(&self, peer_id: PeerId) -> Result<()> {
        let peer = {
            let mut id_map = self.id_map.lock();
            id_map
                .get_mut(peer_id.index())
                .and_then(Option::take)
                .ok_or(RxError::InvalidPeerId { peer_id })?
        };
        peer.set_peer_id(None);
        peer.update_state(PeerState::Inactive);
        tracing::debug!(mac = %peer.mac(), %peer_id, "peer unmapped");
        drop(peer);
        self.reap_released();
        Ok(())
    }

    /// 控制面删除：对端进入 `LogicalDelete` 并撤出 MAC 哈希。
    ///
    /// 自身占位对端若从未映射，不经过 `LogicalDelete`，引用归零后直接 `Init → Freed`；
    /// ID 已先行解映射的 MLD 对端（`Inactive`）同样不再迁移状态。
    pub fn peer_delete(&self, peer: &PeerRef) -> Result<()> {
        let mac = peer.mac();
        let state = peer.state();
        let already_detached = (peer.is_self_peer() && state == PeerState::Init)
            || (peer.kind() == PeerKind::Mld && state == PeerState::Inactive);
        if !already_detached {
            peer.try_transition(PeerState::LogicalDelete).inspect_err(|err| {
                self.stats.state_violations.incr();
                tracing::warn!(%mac, error = %err, "peer delete rejected");
            })?;
        }

        let removed = if peer.kind() == PeerKind::Mld {
            self.mld_hash
                .remove_if(&mac, |_, entry| entry.ptr_eq(peer))
                .map(|(_, entry)| vec![entry])
                .unwrap_or_default()
        } else {
            let mut removed = Vec::new();
            if let Some(mut bin) = self.hash.get_mut(&mac) {
                if let Some(pos) = bin.iter().position(|entry| entry.ptr_eq(peer)) {
                    removed.push(bin.swap_remove(pos));
                }
            }
            self.hash.remove_if(&mac, |_, bin| bin.is_empty());
            removed
        };
        if removed.is_empty() {
            return Err(RxError::PeerNotFound { mac });
        }

        if peer.state().is_torn_down() {
            self.inactive.lock().push(Arc::clone(peer.arc()));
        }
        tracing::debug!(%mac, vdev = peer.vdev_id().0, "peer logically deleted");
        drop(removed);
        self.reap_released();
        Ok(())
    }

    /// 已删除但尚未回收的对端数。
    pub fn inactive_count(&self) -> usize {
        self.inactive.lock().len()
    }

    /// 等待回收的对端数。
    pub fn pending_release(&self) -> usize {
        self.release.len()
    }

    /// 回收所有引用已归零的对端：迁移到 `Freed`，撤出拆除列表，并释放其持有的 MLD 引用。
    pub fn reap_released(&self) -> usize {
        let mut reaped = 0;
        loop {
            let batch = self.release.drain();
            if batch.is_empty() {
                break;
            }
            for peer in batch {
                peer.update_state(PeerState::Freed);
                self.inactive.lock().retain(|entry| !Arc::ptr_eq(entry, &peer));
                let mld = peer.mld.lock().take();
                if let Some(mld) = mld {
                    mld.links.lock().remove(peer.mac(), peer.chip_id());
                    // 释放 MLD 引用可能让 MLD 归零，下一轮循环会接着回收它。
                    drop(mld);
                }
                self.stats.peers_freed.incr();
                tracing::debug!(mac = %peer.mac(), kind = ?peer.kind(), "peer freed");
                reaped += 1;
            }
        }
        reaped
    }
}

impl core::fmt::Debug for PeerTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PeerTable")
            .field("peers", &self.hash.len())
            .field("mld_peers", &self.mld_hash.len())
            .field("inactive", &self.inactive_count())
            .field("pending_release", &self.pending_release())
            .finish()
    }
}

#[cfg(all(test, not(any(loom, spark_loom))))]
mod tests {
    use super::*;

    fn table() -> PeerTable {
        PeerTable::new(&PeerTableConfig { max_peers: 16 }, Arc::new(RxStats::default()))
    }

    const MAC: MacAddr = MacAddr::new([0x02, 0, 0, 0, 0, 0x10]);

    #[test]
    fn create_is_idempotent_per_vdev() {
        let table = table();
        let first = table.create_peer(PeerSpec::legacy(MAC, VdevId(1)));
        let again = table.create_peer(PeerSpec::legacy(MAC, VdevId(1)));
        assert!(first.ptr_eq(&again));
        let other_vdev = table.create_peer(PeerSpec::legacy(MAC, VdevId(2)));
        assert!(!first.ptr_eq(&other_vdev));
        assert_eq!(first.module_ref_count(ModuleId::Cdp), 2);
    }

    #[test]
    fn id_slot_conflicts_are_rejected() {
        let table = table();
        let _a = table.create_peer(PeerSpec::legacy(MAC, VdevId(0)));
        let other = MacAddr::new([0x02, 0, 0, 0, 0, 0x11]);
        let _b = table.create_peer(PeerSpec::legacy(other, VdevId(0)));
        table.peer_map(PeerId(3), MAC, VdevId(0)).expect("首次映射成功");
        table.peer_map(PeerId(3), MAC, VdevId(0)).expect("重复映射幂等");
        let err = table.peer_map(PeerId(3), other, VdevId(0)).unwrap_err();
        assert!(matches!(err, RxError::PeerIdInUse { current, .. } if current == MAC));
        assert!(matches!(
            table.peer_map(PeerId(16), other, VdevId(0)),
            Err(RxError::InvalidPeerId { .. })
        ));
    }

    #[test]
    fn self_peer_shortcuts_to_freed() {
        let table = table();
        let spec = PeerSpec {
            self_peer: true,
            ..PeerSpec::legacy(MAC, VdevId(0))
        };
        let handle = table.create_peer(spec);
        let observer = Arc::clone(handle.arc());
        table.peer_delete(&handle).expect("未映射的自身对端可直接删除");
        drop(handle);
        assert_eq!(table.reap_released(), 1);
        assert_eq!(observer.state(), PeerState::Freed);
        assert_eq!(table.stats().state_violations.get(), 0);
    }
}
