//! Cookie 编解码。
//!
//! # 教案式说明
//! - **意图 (Why)**：硬件环条目里只有 32 位可留给软件，完成事件回来时必须仅凭这 32 位
//!   在 O(1) 内找回描述符；同时 Cookie 来自硬件，可能因固件缺陷或内存踩踏而损坏，
//!   解码必须先校验再索引。
//! - **契约 (What)**：对任意合法 `(pool_id, page_id, offset)`，`decode(encode(x)) == x`；
//!   越界或保留位非零的 Cookie 返回 [`RxError::InvalidCookie`]。
//! - **执行 (How)**：两种布局由平台策略在建池时选定：
//!   - 多页布局：`[19:16] pool | [15:8] page | [7:0] offset`；
//!   - 平坦布局：`[20:18] pool | [17:0] index`，`index = page * per_page + offset`。

use crate::{
    error::{Result, RxError},
    types::{Cookie, PoolId},
};

/// Cookie 位布局。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CookieLayout {
    MultiPage,
    Flat,
}

impl CookieLayout {
    const fn pool_bits(self) -> u32 {
        match self {
            Self::MultiPage => 4,
            Self::Flat => 3,
        }
    }

    const fn pool_shift(self) -> u32 {
        match self {
            Self::MultiPage => 16,
            Self::Flat => 18,
        }
    }

    /// 可编码的最大池编号（含）。
    pub const fn max_pool_id(self) -> u8 {
        ((1u32 << self.pool_bits()) - 1) as u8
    }
}

const MP_OFFSET_MASK: u32 = 0xff;
const MP_PAGE_SHIFT: u32 = 8;
const MP_PAGE_MASK: u32 = 0xff;
const FLAT_INDEX_MASK: u32 = (1 << 18) - 1;

/// 描述符在池中的三元定位。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescLocator {
    pub pool_id: PoolId,
    pub page_id: u16,
    pub offset: u16,
}

/// 绑定到具体池几何的编解码器。
#[derive(Clone, Copy, Debug)]
pub struct CookieCodec {
    layout: CookieLayout,
    pool_id: PoolId,
    per_page: usize,
    num_descriptors: usize,
}

impl CookieCodec {
    /// 按池几何构造编解码器；几何超出布局可表达范围时返回 `InvalidConfig`。
    pub fn new(
        layout: CookieLayout,
        pool_id: PoolId,
        per_page: usize,
        num_descriptors: usize,
    ) -> Result<Self> {
        if pool_id.0 > layout.max_pool_id() {
            return Err(RxError::InvalidConfig {
                field: "pool.pool_id",
                reason: format!("{} exceeds cookie layout limit {}", pool_id.0, layout.max_pool_id()),
            });
        }
        if per_page == 0 {
            return Err(RxError::InvalidConfig {
                field: "pool.descriptors_per_page",
                reason: "must be greater than zero".into(),
            });
        }
        match layout {
            CookieLayout::MultiPage => {
                let pages = num_descriptors.div_ceil(per_page);
                if per_page > (MP_OFFSET_MASK as usize + 1) || pages > (MP_PAGE_MASK as usize + 1) {
                    return Err(RxError::InvalidConfig {
                        field: "pool.num_descriptors",
                        reason: format!(
                            "{num_descriptors} descriptors over {per_page} per page exceed multi-page cookie range"
                        ),
                    });
                }
            }
            CookieLayout::Flat => {
                if num_descriptors > FLAT_INDEX_MASK as usize + 1
                    || num_descriptors.div_ceil(per_page) > usize::from(u16::MAX) + 1
                {
                    return Err(RxError::InvalidConfig {
                        field: "pool.num_descriptors",
                        reason: format!("{num_descriptors} exceeds flat cookie range"),
                    });
                }
            }
        }
        Ok(Self {
            layout,
            pool_id,
            per_page,
            num_descriptors,
        })
    }

    pub fn layout(&self) -> CookieLayout {
        self.layout
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    /// 线性下标转三元定位。
    pub fn locate(&self, index: usize) -> DescLocator {
        DescLocator {
            pool_id: self.pool_id,
            page_id: (index / self.per_page) as u16,
            offset: (index % self.per_page) as u16,
        }
    }

    /// 三元定位转线性下标。
    pub fn index_of(&self, locator: DescLocator) -> usize {
        usize::from(locator.page_id) * self.per_page + usize::from(locator.offset)
    }

    pub fn encode(&self, locator: DescLocator) -> Cookie {
        let pool = u32::from(locator.pool_id.0) << self.layout.pool_shift();
        match self.layout {
            CookieLayout::MultiPage => Cookie(
                pool | (u32::from(locator.page_id) << MP_PAGE_SHIFT) | u32::from(locator.offset),
            ),
            CookieLayout::Flat => Cookie(pool | self.index_of(locator) as u32),
        }
    }

    /// 解码并校验 Cookie。
    ///
    /// 校验顺序：保留位 → 池编号 → 页内偏移 → 线性下标范围。任何一步失败都不会产生可用于索引的值。
    pub fn decode(&self, cookie: Cookie) -> Result<DescLocator> {
        let invalid = || RxError::InvalidCookie {
            cookie,
            pool_id: self.pool_id,
        };
        let raw = cookie.0;
        let pool_end = self.layout.pool_shift() + self.layout.pool_bits();
        if raw >> pool_end != 0 {
            return Err(invalid());
        }
        let pool = (raw >> self.layout.pool_shift()) as u8;
        if pool != self.pool_id.0 {
            return Err(invalid());
        }
        let locator = match self.layout {
            CookieLayout::MultiPage => {
                let offset = (raw & MP_OFFSET_MASK) as usize;
                if offset >= self.per_page {
                    return Err(invalid());
                }
                DescLocator {
                    pool_id: self.pool_id,
                    page_id: ((raw >> MP_PAGE_SHIFT) & MP_PAGE_MASK) as u16,
                    offset: offset as u16,
                }
            }
            CookieLayout::Flat => self.locate((raw & FLAT_INDEX_MASK) as usize),
        };
        if self.index_of(locator) >= self.num_descriptors {
            return Err(invalid());
        }
        Ok(locator)
    }
}
