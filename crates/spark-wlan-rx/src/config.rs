//! 接收路径配置。
//!
//! # 教案式说明
//! - **意图 (Why)**：池大小、缓冲尺寸、补给阈值等参数在不同芯片与内存预算下差异很大，
//!   统一收敛到一个可序列化结构，便于从 TOML 文件加载并在启动期一次性校验。
//! - **契约 (What)**：
//!   - 所有分节均 `#[serde(default)]`，缺省字段回落到 [`Default`]；
//!   - 未知字段直接拒绝，避免拼写错误被静默忽略；
//!   - [`RxConfig::validate`] 通过后，下游组件不再重复检查这些约束。
//! - **风险 (Trade-offs)**：默认值取自生产驱动的常用配置，小内存平台需显式下调
//!   `num_descriptors`。

use serde::{Deserialize, Serialize};

use crate::error::{Result, RxError};

/// 描述符池配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// 池编号，会编码进 Cookie。
    pub pool_id: u8,
    /// 描述符总数，通常等于硬件环深度。
    pub num_descriptors: usize,
    /// 单页字节数；结合描述符记录大小推导每页描述符数。
    pub page_size: usize,
    /// 每页描述符数。为 0 时按 `page_size / DESCRIPTOR_RECORD_SIZE` 推导。
    pub descriptors_per_page: usize,
    /// 单个接收缓冲的字节数（含硬件 TLV 头）。
    pub buffer_size: usize,
    /// 缓冲起始地址对齐。
    pub buffer_alignment: usize,
    /// 写入环条目的返回所有者（return buffer manager）。
    pub owner: u8,
}

/// 单条描述符记录在页内占用的字节数，用于推导每页容量。
pub const DESCRIPTOR_RECORD_SIZE: usize = 32;

impl PoolConfig {
    /// 实际生效的每页描述符数。
    pub fn effective_descriptors_per_page(&self) -> usize {
        if self.descriptors_per_page != 0 {
            self.descriptors_per_page
        } else {
            (self.page_size / DESCRIPTOR_RECORD_SIZE).max(1)
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_id: 0,
            num_descriptors: 4096,
            page_size: 4096,
            descriptors_per_page: 0,
            buffer_size: 2048,
            buffer_alignment: 4,
            owner: 0,
        }
    }
}

/// 补给策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplenishMode {
    /// 启用“批量补满”与“临界追加”两条启发式。
    #[default]
    Opportunistic,
    /// 严格按请求数量补给。
    RequestOnly,
}

/// 补给引擎配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplenishConfig {
    pub mode: ReplenishMode,
    /// 已投递数量低于该值时，从自由链表额外追加描述符。
    pub critical_threshold: usize,
    /// 平台拒绝 DMA 地址时的最大重试次数。
    pub dma_retry_limit: u32,
}

impl Default for ReplenishConfig {
    fn default() -> Self {
        Self {
            mode: ReplenishMode::Opportunistic,
            critical_threshold: 64,
            dma_retry_limit: 100,
        }
    }
}

/// 重组引擎配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReassemblyConfig {
    /// 每个缓冲头部的硬件 TLV 长度。
    pub tlv_header_len: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self { tlv_header_len: 128 }
    }
}

/// 对端表配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeerTableConfig {
    /// 对端 ID 表容量。
    pub max_peers: usize,
}

impl Default for PeerTableConfig {
    fn default() -> Self {
        Self { max_peers: 1024 }
    }
}

/// 接收路径顶层配置。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RxConfig {
    pub pool: PoolConfig,
    pub replenish: ReplenishConfig,
    pub reassembly: ReassemblyConfig,
    pub peers: PeerTableConfig,
}

impl RxConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|err| RxError::InvalidConfig {
            field: "toml",
            reason: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为 TOML，便于导出当前生效配置。
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| RxError::InvalidConfig {
            field: "toml",
            reason: err.to_string(),
        })
    }

    /// 载荷容量：缓冲尺寸扣除 TLV 头。
    pub fn payload_capacity(&self) -> usize {
        self.pool
            .buffer_size
            .saturating_sub(self.reassembly.tlv_header_len)
    }

    /// 校验跨字段约束。
    pub fn validate(&self) -> Result<()> {
        let pool = &self.pool;
        if pool.num_descriptors == 0 {
            return Err(invalid("pool.num_descriptors", "must be greater than zero"));
        }
        if pool.buffer_size <= self.reassembly.tlv_header_len {
            return Err(invalid(
                "pool.buffer_size",
                format!(
                    "{} leaves no payload after a {} byte tlv header",
                    pool.buffer_size, self.reassembly.tlv_header_len
                ),
            ));
        }
        if !pool.buffer_alignment.is_power_of_two() {
            return Err(invalid("pool.buffer_alignment", "must be a power of two"));
        }
        if pool.descriptors_per_page == 0 && pool.page_size < DESCRIPTOR_RECORD_SIZE {
            return Err(invalid(
                "pool.page_size",
                format!("must hold at least one {DESCRIPTOR_RECORD_SIZE} byte descriptor"),
            ));
        }
        if self.replenish.critical_threshold > pool.num_descriptors {
            return Err(invalid(
                "replenish.critical_threshold",
                "cannot exceed pool.num_descriptors",
            ));
        }
        if self.peers.max_peers == 0 || self.peers.max_peers > usize::from(u16::MAX) {
            return Err(invalid("peers.max_peers", "must be within 1..=65535"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> RxError {
    RxError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}
