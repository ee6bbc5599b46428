//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为接收路径的全部失败语义提供集中定义：内存不足、Cookie 损坏、对端 ID 越界、
//!   重组链与硬件声明不一致、生命周期越级迁移等；
//! - 每个变体携带可读上下文与稳定错误码，便于告警规则按码聚合。
//!
//! ## 设计要求（What）
//! - 所有变体派生 `thiserror::Error`，可直接经 `?` 传播；
//! - 除初始化阶段的池耗尽外，其余错误均为“丢弃单帧 + 计数”的可恢复语义，
//!   见 [`RxError::is_recoverable`]。

use thiserror::Error;

use crate::{
    peer::PeerState,
    types::{Cookie, MacAddr, PeerId, PoolId},
};

/// 稳定错误码表。
///
/// 命名遵循 `<域>.<对象>.<动作>` 的点分格式，与监控侧告警规则一一对应；新增条目只追加不修改。
pub mod codes {
    pub const NO_MEMORY: &str = "rx.no_memory";
    pub const POOL_EXHAUSTED_AT_INIT: &str = "rx.pool.exhausted_at_init";
    pub const COOKIE_INVALID: &str = "rx.cookie.invalid";
    pub const DESCRIPTOR_STATE: &str = "rx.descriptor.state";
    pub const PEER_ID_INVALID: &str = "rx.peer.id_invalid";
    pub const PEER_NOT_FOUND: &str = "rx.peer.not_found";
    pub const PEER_TEARDOWN: &str = "rx.peer.teardown";
    pub const PEER_ID_IN_USE: &str = "rx.peer.id_in_use";
    pub const PROTOCOL_MISMATCH: &str = "rx.reassembly.protocol_mismatch";
    pub const STATE_VIOLATION: &str = "rx.peer.state_violation";
    pub const LINK_TABLE_FULL: &str = "rx.mlo.link_table_full";
    pub const NOT_MLD_PEER: &str = "rx.mlo.not_mld_peer";
    pub const INVALID_LINK_PEER: &str = "rx.mlo.invalid_link_peer";
    pub const INVALID_CONFIG: &str = "rx.config.invalid";
    pub const LOGGING: &str = "rx.logging.install";
}

/// 接收路径错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“可以丢帧继续”的错误与“必须阻止环启用”的错误区分开，调用方据此决定
///   是计数后继续处理下一帧，还是终止初始化。
/// - **契约 (What)**：
///   - 所有变体满足 `Send + Sync + 'static`；
///   - [`RxError::code`] 返回的字符串在版本间保持稳定。
/// - **风险 (Trade-offs)**：`ProtocolMismatch` 与 `InvalidConfig` 使用 `String` 保存细节，
///   只在异常路径分配，热路径不受影响。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RxError {
    /// 缓冲或描述符暂时不足，下次补给可重试。
    #[error("rx resources exhausted while {context}")]
    NoMemory { context: &'static str },

    /// 初始化阶段无法分配描述符页，接收环不得启用。
    #[error("descriptor pool {pool_id:?} could not allocate {requested} descriptors")]
    PoolExhaustedAtInit { pool_id: PoolId, requested: usize },

    /// Cookie 超出池范围或与本池编号不符；描述符不会被解引用。
    #[error("cookie {cookie} does not resolve to a descriptor of pool {pool_id:?}")]
    InvalidCookie { cookie: Cookie, pool_id: PoolId },

    /// 描述符所处位置与操作前提不符，例如重复归还或陈旧句柄。
    #[error("descriptor {cookie} rejected: {detail}")]
    DescriptorState { cookie: Cookie, detail: &'static str },

    /// 对端 ID 越界或对应槽位为空。
    #[error("peer id {peer_id} is out of range or unmapped")]
    InvalidPeerId { peer_id: PeerId },

    /// 控制面引用了不存在的对端。
    #[error("peer {mac} is not present in the peer table")]
    PeerNotFound { mac: MacAddr },

    /// 对端引用计数已归零，正在拆除，不允许再获取新引用。
    #[error("peer {mac} is being torn down")]
    PeerTeardown { mac: MacAddr },

    /// 对端 ID 槽位已被其他对端占用。
    #[error("peer id {peer_id} is already mapped to {current}")]
    PeerIdInUse { peer_id: PeerId, current: MacAddr },

    /// 重组链与硬件声明的长度/标志位不一致。
    #[error("rx chain of {buffers} buffer(s) inconsistent with completion: {detail}")]
    ProtocolMismatch { buffers: usize, detail: String },

    /// 对端生命周期越级迁移。
    #[error("peer {mac} cannot move from {from:?} to {to:?}")]
    StateViolation {
        mac: MacAddr,
        from: PeerState,
        to: PeerState,
    },

    /// MLD 对端的链路表已满。
    #[error("mld peer {mld} already tracks {limit} links")]
    LinkTableFull { mld: MacAddr, limit: usize },

    /// 对非 MLD 对端执行链路操作。
    #[error("peer {mac} is not an mld peer")]
    NotMldPeer { mac: MacAddr },

    /// 试图把非 Link 对端登记为 MLD 的链路。
    #[error("peer {mac} cannot be registered as an mlo link")]
    InvalidLinkPeer { mac: MacAddr },

    /// 配置项取值非法。
    #[error("invalid configuration `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// 全局日志订阅器安装失败。
    #[error("failed to install tracing subscriber: {reason}")]
    Logging { reason: String },
}

impl RxError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoMemory { .. } => codes::NO_MEMORY,
            Self::PoolExhaustedAtInit { .. } => codes::POOL_EXHAUSTED_AT_INIT,
            Self::InvalidCookie { .. } => codes::COOKIE_INVALID,
            Self::DescriptorState { .. } => codes::DESCRIPTOR_STATE,
            Self::InvalidPeerId { .. } => codes::PEER_ID_INVALID,
            Self::PeerNotFound { .. } => codes::PEER_NOT_FOUND,
            Self::PeerTeardown { .. } => codes::PEER_TEARDOWN,
            Self::PeerIdInUse { .. } => codes::PEER_ID_IN_USE,
            Self::ProtocolMismatch { .. } => codes::PROTOCOL_MISMATCH,
            Self::StateViolation { .. } => codes::STATE_VIOLATION,
            Self::LinkTableFull { .. } => codes::LINK_TABLE_FULL,
            Self::NotMldPeer { .. } => codes::NOT_MLD_PEER,
            Self::InvalidLinkPeer { .. } => codes::INVALID_LINK_PEER,
            Self::InvalidConfig { .. } => codes::INVALID_CONFIG,
            Self::Logging { .. } => codes::LOGGING,
        }
    }

    /// 是否可在丢弃当前帧或本轮补给后继续运行。
    ///
    /// 只有初始化期的池耗尽与配置错误会阻止接收环启用。
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::PoolExhaustedAtInit { .. } | Self::InvalidConfig { .. }
        )
    }
}

/// crate 统一的 `Result` 别名。
pub type Result<T, E = RxError> = core::result::Result<T, E>;
