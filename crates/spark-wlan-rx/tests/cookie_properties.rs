//! Cookie 编解码性质。
//!
//! # 测试目标（Why）
//! - 对两种布局、任意合法几何，`decode(encode(locate(i)))` 都回到原下标；
//! - 任意 32 位输入都不会解码出越界下标，损坏的 Cookie 只能得到错误。
//!
//! # 结构安排（How）
//! - 先随机生成池几何，再在该几何下随机选取下标或原始位串；
//! - 几何超出布局表达范围的组合由 `CookieCodec::new` 拒绝，单独断言。

use proptest::prelude::*;
use spark_wlan_rx::{
    desc::{CookieCodec, CookieLayout},
    types::{Cookie, PoolId},
};

fn multi_page_geometry() -> impl Strategy<Value = (u8, usize, usize)> {
    (0u8..=15, 1usize..=256, 1usize..=256).prop_flat_map(|(pool, per_page, pages)| {
        let max = per_page * pages;
        (Just(pool), Just(per_page), (max - per_page + 1)..=max)
    })
}

fn flat_geometry() -> impl Strategy<Value = (u8, usize, usize)> {
    (0u8..=7, 4usize..=512, 1usize..=(1 << 18))
}

proptest! {
    #[test]
    fn multi_page_indices_survive_encoding((pool, per_page, count) in multi_page_geometry(), pick in any::<prop::sample::Index>()) {
        let codec = CookieCodec::new(CookieLayout::MultiPage, PoolId(pool), per_page, count)
            .expect("几何在多页布局范围内");
        let index = pick.index(count);
        let cookie = codec.encode(codec.locate(index));
        let locator = codec.decode(cookie).expect("合法 Cookie 必须可解码");
        prop_assert_eq!(codec.index_of(locator), index);
        prop_assert_eq!(locator.pool_id, PoolId(pool));
    }

    #[test]
    fn flat_indices_survive_encoding((pool, per_page, count) in flat_geometry(), pick in any::<prop::sample::Index>()) {
        let codec = CookieCodec::new(CookieLayout::Flat, PoolId(pool), per_page, count)
            .expect("几何在平坦布局范围内");
        let index = pick.index(count);
        let locator = codec.decode(codec.encode(codec.locate(index))).expect("合法 Cookie 必须可解码");
        prop_assert_eq!(codec.index_of(locator), index);
    }

    #[test]
    fn arbitrary_bits_never_resolve_out_of_range(raw in any::<u32>(), flat in any::<bool>()) {
        let (layout, per_page, count) = if flat {
            (CookieLayout::Flat, 128, 3000)
        } else {
            (CookieLayout::MultiPage, 128, 3000)
        };
        let codec = CookieCodec::new(layout, PoolId(3), per_page, count).expect("几何合法");
        if let Ok(locator) = codec.decode(Cookie(raw)) {
            prop_assert!(codec.index_of(locator) < count);
            prop_assert!(usize::from(locator.offset) < per_page);
            prop_assert_eq!(codec.encode(locator), Cookie(raw), "可解码的 Cookie 必须是规范编码");
        }
    }

    #[test]
    fn foreign_pool_ids_are_rejected(index in 0usize..512, other in 0u8..=15) {
        prop_assume!(other != 4);
        let ours = CookieCodec::new(CookieLayout::MultiPage, PoolId(4), 64, 512).expect("几何合法");
        let theirs = CookieCodec::new(CookieLayout::MultiPage, PoolId(other), 64, 512).expect("几何合法");
        let cookie = theirs.encode(theirs.locate(index));
        prop_assert!(ours.decode(cookie).is_err());
    }
}

#[test]
fn geometry_outside_layout_is_rejected() {
    assert!(CookieCodec::new(CookieLayout::MultiPage, PoolId(16), 64, 64).is_err(), "池编号超出 4 位");
    assert!(CookieCodec::new(CookieLayout::Flat, PoolId(8), 64, 64).is_err(), "池编号超出 3 位");
    assert!(CookieCodec::new(CookieLayout::MultiPage, PoolId(0), 257, 257).is_err(), "页内偏移超出 8 位");
    assert!(CookieCodec::new(CookieLayout::MultiPage, PoolId(0), 16, 16 * 257).is_err(), "页号超出 8 位");
    assert!(CookieCodec::new(CookieLayout::Flat, PoolId(0), 64, (1 << 18) + 1).is_err(), "下标超出 18 位");
    assert!(CookieCodec::new(CookieLayout::Flat, PoolId(0), 0, 64).is_err(), "每页数量不得为 0");
}
