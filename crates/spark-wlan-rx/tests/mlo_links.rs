//! MLO 链路登记测试。
//!
//! # 测试目标（Why）
//! - MLD 链路表的计数与有效条目始终一致，满表拒绝、删除不存在的链路不改状态；
//! - Link 对端持有的 `Mlo` 引用随链路注销或 Link 对端回收而释放，MLD 才能最终回收。
//!
//! # 结构安排（How）
//! - 每个用例独立构造 `PeerTable`，Link 对端使用不同 MAC 与芯片编号。

use std::sync::Arc;

use spark_wlan_rx::{
    MAX_MLO_LINKS, MacAddr, ModuleId, PeerSpec, PeerState, PeerTable, RxError, RxStats,
    config::PeerTableConfig,
    types::{ChipId, PeerId, VdevId},
};

fn table() -> PeerTable {
    PeerTable::new(&PeerTableConfig { max_peers: 32 }, Arc::new(RxStats::default()))
}

fn mac(last: u8) -> MacAddr {
    MacAddr::new([0x06, 0, 0, 0, 0xaa, last])
}

const MLD_MAC: MacAddr = MacAddr::new([0x06, 0, 0, 0, 0xbb, 0x01]);

#[test]
fn links_are_counted_and_bounded() {
    let table = table();
    let mld = table.create_peer(PeerSpec::mld(MLD_MAC, VdevId(0)));
    let links: Vec<_> = (0..=MAX_MLO_LINKS as u8)
        .map(|i| table.create_peer(PeerSpec::link(mac(i), VdevId(i), ChipId(i))))
        .collect();

    for (i, link) in links.iter().take(MAX_MLO_LINKS).enumerate() {
        assert_eq!(table.mld_add_link(&mld, link).expect("登记成功"), i + 1);
    }
    let err = table.mld_add_link(&mld, &links[MAX_MLO_LINKS]).unwrap_err();
    assert!(matches!(err, RxError::LinkTableFull { limit: MAX_MLO_LINKS, .. }));

    let snapshot = mld.link_table();
    assert_eq!(snapshot.num_links(), MAX_MLO_LINKS);
    assert_eq!(snapshot.valid_links().count(), MAX_MLO_LINKS);
    assert_eq!(snapshot.primary().map(|link| link.mac), Some(mac(0)));
    assert_eq!(mld.module_ref_count(ModuleId::Mlo), MAX_MLO_LINKS as u32);

    let resolved = table
        .link_mld_peer(&links[1], ModuleId::Rx)
        .expect("Link 对端应能找到所属 MLD");
    assert!(resolved.ptr_eq(&mld));
    assert!(table.link_mld_peer(&links[MAX_MLO_LINKS], ModuleId::Rx).is_none());
}

#[test]
fn re_adding_a_link_is_idempotent() {
    let table = table();
    let mld = table.create_peer(PeerSpec::mld(MLD_MAC, VdevId(0)));
    let link = table.create_peer(PeerSpec::link(mac(1), VdevId(1), ChipId(1)));
    assert_eq!(table.mld_add_link(&mld, &link).expect("登记成功"), 1);
    assert_eq!(table.mld_add_link(&mld, &link).expect("重复登记"), 1);
    assert_eq!(mld.module_ref_count(ModuleId::Mlo), 1, "重复登记不得多拿引用");
}

#[test]
fn removing_the_last_link_reports_zero() {
    let table = table();
    let mld = table.create_peer(PeerSpec::mld(MLD_MAC, VdevId(0)));
    let first = table.create_peer(PeerSpec::link(mac(1), VdevId(1), ChipId(1)));
    let second = table.create_peer(PeerSpec::link(mac(2), VdevId(2), ChipId(2)));
    table.mld_add_link(&mld, &first).expect("登记成功");
    table.mld_add_link(&mld, &second).expect("登记成功");

    assert_eq!(table.mld_remove_link(&mld, &first), 1);
    assert_eq!(
        mld.link_table().primary().map(|link| link.mac),
        Some(mac(2)),
        "主链路被移除后由剩余链路接替"
    );
    assert_eq!(table.mld_remove_link(&mld, &second), 0);
    assert_eq!(mld.module_ref_count(ModuleId::Mlo), 0);
    assert!(table.link_mld_peer(&second, ModuleId::Rx).is_none());
}

#[test]
fn removing_an_unknown_link_changes_nothing() {
    let table = table();
    let mld = table.create_peer(PeerSpec::mld(MLD_MAC, VdevId(0)));
    let member = table.create_peer(PeerSpec::link(mac(1), VdevId(1), ChipId(1)));
    let stranger = table.create_peer(PeerSpec::link(mac(9), VdevId(9), ChipId(2)));
    table.mld_add_link(&mld, &member).expect("登记成功");

    let before = mld.link_table();
    assert_eq!(table.mld_remove_link(&mld, &stranger), 1);
    assert_eq!(mld.link_table(), before);
    assert_eq!(mld.module_ref_count(ModuleId::Mlo), 1);
}

#[test]
fn only_mld_and_link_peers_participate() {
    let table = table();
    let mld = table.create_peer(PeerSpec::mld(MLD_MAC, VdevId(0)));
    let legacy = table.create_peer(PeerSpec::legacy(mac(3), VdevId(3)));
    let link = table.create_peer(PeerSpec::link(mac(4), VdevId(4), ChipId(1)));
    assert!(matches!(
        table.mld_add_link(&legacy, &link),
        Err(RxError::NotMldPeer { .. })
    ));
    assert!(matches!(
        table.mld_add_link(&mld, &legacy),
        Err(RxError::InvalidLinkPeer { .. })
    ));
}

#[test]
fn link_peers_snapshot_marks_primary() {
    let table = table();
    let mld = table.create_peer(PeerSpec::mld(MLD_MAC, VdevId(0)));
    let a = table.create_peer(PeerSpec::link(mac(1), VdevId(1), ChipId(1)));
    let b = table.create_peer(PeerSpec::link(mac(2), VdevId(2), ChipId(2)));
    table.mld_add_link(&mld, &a).expect("登记成功");
    table.mld_add_link(&mld, &b).expect("登记成功");

    let peers = table.mld_link_peers(&mld, ModuleId::Stats);
    assert_eq!(peers.peers.len(), 2);
    let primary = peers.primary.map(|i| peers.peers[i].mac());
    assert_eq!(primary, Some(mac(1)));
    assert_eq!(a.module_ref_count(ModuleId::Stats), 1);
    drop(peers);
    assert_eq!(a.module_ref_count(ModuleId::Stats), 0);
}

#[test]
fn freeing_a_link_releases_its_mld_reference() {
    let table = table();
    let mld = table.create_peer(PeerSpec::mld(MLD_MAC, VdevId(0)));
    let link = table.create_peer(PeerSpec::link(mac(1), VdevId(1), ChipId(1)));
    let link_observer = Arc::clone(link.arc());
    table.mld_add_link(&mld, &link).expect("登记成功");
    table.peer_map(PeerId(3), mac(1), VdevId(1)).expect("Link 映射成功");

    table.peer_delete(&link).expect("删除 Link");
    table.peer_unmap(PeerId(3)).expect("解映射 Link");
    drop(link);
    assert_eq!(table.reap_released(), 1);
    assert_eq!(link_observer.state(), PeerState::Freed);
    assert_eq!(mld.link_table().num_links(), 0, "回收 Link 时必须注销其链路记录");
    assert_eq!(mld.module_ref_count(ModuleId::Mlo), 0);
    assert_eq!(mld.state(), PeerState::Init);
}
