//! MLO 链路登记。
//!
//! # 教案式说明
//! - **意图 (Why)**：多链路设备（MLD）在每条物理链路上各有一个 Link 对端，数据面收到的帧先
//!   归属到 Link 对端，再经由它找到 MLD 对端；控制面需要反向枚举 MLD 下的所有链路。
//! - **契约 (What)**：
//!   - 所有权单向：MLD 对端只保存链路标识 `(mac, vdev, chip)`，不持有 Link 对端；
//!     Link 对端持有恰好一个指向 MLD 的 `Mlo` 引用；
//!   - `num_links` 始终等于有效条目数，上限 [`MAX_MLO_LINKS`]；
//!   - 删除返回剩余链路数，调用方据此在归零时拆除 MLD；删除不存在的链路不改变任何状态。
//! - **执行 (How)**：链路表由 MLD 对端内部的短时自旋锁保护；反向查找经对端表按 `(mac, chip)`
//!   解析，锁外完成。

use crate::{
    error::{Result, RxError},
    peer::{ModuleId, PeerKind, PeerRef, PeerTable},
    types::{ChipId, MacAddr, VdevId},
};

/// 单个 MLD 下的最大链路数。
pub const MAX_MLO_LINKS: usize = 3;

/// 链路记录。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkPeerInfo {
    pub mac: MacAddr,
    pub vdev_id: VdevId,
    pub chip_id: ChipId,
    pub is_valid: bool,
    pub is_primary: bool,
}

/// MLD 对端的链路表。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkTable {
    links: [LinkPeerInfo; MAX_MLO_LINKS],
    num_links: usize,
}

impl LinkTable {
    pub fn num_links(&self) -> usize {
        self.num_links
    }

    pub fn valid_links(&self) -> impl Iterator<Item = &LinkPeerInfo> {
        self.links.iter().filter(|link| link.is_valid)
    }

    pub fn primary(&self) -> Option<&LinkPeerInfo> {
        self.valid_links().find(|link| link.is_primary)
    }

    fn position(&self, mac: MacAddr, chip_id: ChipId) -> Option<usize> {
        self.links
            .iter()
            .position(|link| link.is_valid && link.mac == mac && link.chip_id == chip_id)
    }

    /// 登记链路；已登记时保持原样。满表时返回 `None`。
    fn insert(&mut self, mac: MacAddr, vdev_id: VdevId, chip_id: ChipId) -> Option<usize> {
        if self.position(mac, chip_id).is_some() {
            return Some(self.num_links);
        }
        let free = self.links.iter().position(|link| !link.is_valid)?;
        self.links[free] = LinkPeerInfo {
            mac,
            vdev_id,
            chip_id,
            is_valid: true,
            is_primary: self.num_links == 0,
        };
        self.num_links += 1;
        Some(self.num_links)
    }

    /// 注销链路并返回剩余数量；链路不存在时原样返回当前数量。
    pub(crate) fn remove(&mut self, mac: MacAddr, chip_id: ChipId) -> usize {
        let Some(pos) = self.position(mac, chip_id) else {
            return self.num_links;
        };
        let was_primary = self.links[pos].is_primary;
        self.links[pos] = LinkPeerInfo::default();
        self.num_links -= 1;
        if was_primary {
            if let Some(next) = self.links.iter_mut().find(|link| link.is_valid) {
                next.is_primary = true;
            }
        }
        self.num_links
    }
}

/// MLD 下各链路对端的引用集合。
#[derive(Debug, Default)]
pub struct LinkPeers {
    pub peers: Vec<PeerRef>,
    /// `peers` 中主链路的下标。
    pub primary: Option<usize>,
}

impl PeerTable {
    /// 把 `link` 登记到 `mld` 下，返回登记后的链路数。
    ///
    /// Link 对端随之持有一个指向 MLD 的 `Mlo` 引用；若它此前挂在别的 MLD 下，旧引用被替换并释放。
    pub fn mld_add_link(&self, mld: &PeerRef, link: &PeerRef) -> Result<usize> {
        if mld.kind() != PeerKind::Mld {
            return Err(RxError::NotMldPeer { mac: mld.mac() });
        }
        if link.kind() != PeerKind::Link {
            return Err(RxError::InvalidLinkPeer { mac: link.mac() });
        }
        let count = mld
            .links
            .lock()
            .insert(link.mac(), link.vdev_id(), link.chip_id())
            .ok_or(RxError::LinkTableFull {
                mld: mld.mac(),
                limit: MAX_MLO_LINKS,
            })?;

        let previous = {
            let mut slot = link.mld.lock();
            if slot.as_ref().is_some_and(|current| current.ptr_eq(mld)) {
                None
            } else {
                slot.replace(mld.clone_ref(ModuleId::Mlo))
            }
        };
        if let Some(previous) = previous {
            previous.links.lock().remove(link.mac(), link.chip_id());
        }
        tracing::debug!(mld = %mld.mac(), link = %link.mac(), chip = link.chip_id().0, count, "mlo link added");
        Ok(count)
    }

    /// 把 `link` 从 `mld` 下注销，返回剩余链路数；`link` 不在 `mld` 下时不做任何修改。
    pub fn mld_remove_link(&self, mld: &PeerRef, link: &PeerRef) -> usize {
        let remaining = mld.links.lock().remove(link.mac(), link.chip_id());
        let released = {
            let mut slot = link.mld.lock();
            if slot.as_ref().is_some_and(|current| current.ptr_eq(mld)) {
                slot.take()
            } else {
                None
            }
        };
        if released.is_some() {
            tracing::debug!(mld = %mld.mac(), link = %link.mac(), remaining, "mlo link removed");
        }
        drop(released);
        remaining
    }

    /// 获取 `mld` 下所有有效链路对端的引用，按 `(mac, chip)` 经对端表解析。
    pub fn mld_link_peers(&self, mld: &PeerRef, module: ModuleId) -> LinkPeers {
        let table = mld.link_table();
        let mut out = LinkPeers {
            peers: Vec::with_capacity(table.num_links()),
            primary: None,
        };
        for info in table.valid_links() {
            if let Some(peer) = self.find_by_mac_chip(info.mac, info.chip_id, module) {
                if info.is_primary {
                    out.primary = Some(out.peers.len());
                }
                out.peers.push(peer);
            }
        }
        out
    }

    /// Link 对端所属的 MLD 对端。
    pub fn link_mld_peer(&self, link: &PeerRef, module: ModuleId) -> Option<PeerRef> {
        link.mld.lock().as_ref().map(|mld| mld.clone_ref(module))
    }
}
