//! 对端生命周期状态机。
//!
//! # 教案式说明
//! - **意图 (Why)**：对端对象的释放必须晚于所有仍持有引用的处理上下文。生命周期被拆为
//!   `Init → Active → LogicalDelete → Inactive → Freed` 五个阶段，每一步的前置状态都受校验，
//!   越级迁移意味着控制面事件乱序，必须暴露出来。
//! - **契约 (What)**：[`PeerState::can_transition_to`] 是唯一的合法性判据：
//!   - `Init → Active`：对端 ID 映射完成；
//!   - `Active → LogicalDelete`：控制面删除；
//!   - `LogicalDelete → Inactive`：对端 ID 解除映射；
//!   - `LogicalDelete | Inactive → Freed`：最后一个引用释放；
//!   - `Active → Inactive`：仅 MLD 对端（其 ID 解映射可早于删除）；
//!   - `Init → Freed`：仅自身占位对端（从未映射即被删除）。
//! - **风险 (Trade-offs)**：状态顺序同时承担“拆除程度”的含义，`LogicalDelete` 及之后的状态
//!   均视为正在拆除，按 ID 查找默认不再返回这些对端。

use serde::Serialize;

/// 对端生命周期状态。声明顺序即拆除程度。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum PeerState {
    Init,
    Active,
    LogicalDelete,
    Inactive,
    Freed,
}

/// 对端类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PeerKind {
    /// 单链路对端。
    Legacy,
    /// MLO 中某条物理链路上的对端。
    Link,
    /// MLO 逻辑对端（多链路设备）。
    Mld,
}

impl PeerState {
    /// 判断迁移是否合法。
    pub fn can_transition_to(self, next: PeerState, kind: PeerKind, self_peer: bool) -> bool {
        use PeerState::*;
        match (self, next) {
            (Init, Active) => true,
            (Init, Freed) => self_peer,
            (Active, LogicalDelete) => true,
            (Active, Inactive) => kind == PeerKind::Mld,
            (LogicalDelete, Inactive) | (LogicalDelete, Freed) => true,
            (Inactive, Freed) => true,
            _ => false,
        }
    }

    /// 是否已进入拆除阶段。
    pub fn is_torn_down(self) -> bool {
        self >= PeerState::LogicalDelete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use PeerState::*;
        let legacy = PeerKind::Legacy;
        assert!(Init.can_transition_to(Active, legacy, false));
        assert!(!Init.can_transition_to(LogicalDelete, legacy, false), "跳过 Active 必须被拒绝");
        assert!(!Init.can_transition_to(Freed, legacy, false));
        assert!(Init.can_transition_to(Freed, legacy, true), "自身占位对端可直接释放");
        assert!(!Active.can_transition_to(Inactive, legacy, false));
        assert!(Active.can_transition_to(Inactive, PeerKind::Mld, false));
        assert!(!Freed.can_transition_to(Init, legacy, false), "Freed 是终态");
        assert!(!Inactive.can_transition_to(Active, legacy, false));
    }

    #[test]
    fn teardown_ordering() {
        assert!(!PeerState::Active.is_torn_down());
        assert!(PeerState::LogicalDelete.is_torn_down());
        assert!(PeerState::Freed.is_torn_down());
    }
}
