#![deny(unsafe_code)]
//! # spark-wlan-rx
//!
//! 802.11 高吞吐数据面的接收路径核心：接收描述符池、硬件补给环的补给引擎、多缓冲帧重组、
//! 以及每个接收帧交付前必须归属的引用计数对端表。
//!
//! ## 模块地图（How）
//! - [`desc`]：Cookie 编解码、自由链表、描述符池（稳定下标 + 代数句柄）；
//! - [`replenish`]：按环空闲程度补给缓冲，全部环写入位于一个访问临界区；
//! - [`reassembly`]：缓冲链 → 头缓冲 + 分片列表；
//! - [`peer`]：对端表、生命周期状态机与 [`peer::PeerRef`] 引用令牌；
//! - [`mlo`]：MLD 对端下的链路登记；
//! - [`pipeline`]：把以上组件串成一次完整的接收处理；
//! - [`config`] / [`error`] / [`stats`] / [`logging`]：配置、错误域、计数与日志。
//!
//! ## 并发约束（What）
//! - 硬件环访问不可重入，借助 `&mut` 独占；
//! - 自由链表锁与对端 ID 表锁只短暂持有，锁内不分配、不映射、不释放对端；
//! - 对端引用的获取与释放是无锁原子操作。

pub mod buffer;
pub mod config;
pub mod desc;
pub mod error;
pub mod logging;
pub mod mlo;
pub mod peer;
pub mod pipeline;
pub mod platform;
pub mod reassembly;
pub mod replenish;
pub mod ring;
pub mod stats;
/// 确定性协作者桩，供集成测试、基准与仿真复用。
pub mod test_stubs;
pub mod types;

pub use buffer::NetBuf;
pub use config::{ReplenishMode, RxConfig};
pub use desc::{CookieLayout, DescHandle, DescList, DescLocation, DescriptorPool};
pub use error::{Result, RxError};
pub use mlo::{LinkPeerInfo, LinkPeers, MAX_MLO_LINKS};
pub use peer::{ModuleId, Peer, PeerKind, PeerRef, PeerSpec, PeerState, PeerTable};
pub use pipeline::{DeliverySink, ProcessSummary, RxCompletion, RxPipeline};
pub use platform::{HwCapabilities, HwGeneration, PlatformStrategy};
pub use reassembly::{ChainFlags, Reassembler};
pub use replenish::{ReplenishOutcome, Replenisher};
pub use ring::RxRing;
pub use stats::{RxStats, RxStatsSnapshot};
pub use types::{ChipId, Cookie, DmaAddr, MacAddr, PeerId, PoolId, VdevId};
