//! 数据面基础标识类型。
//!
//! # 教案式说明
//! - **意图 (Why)**：接收路径在描述符、对端、链路之间穿梭大量整数标识，若全部使用裸 `u8/u16/u32`
//!   极易把 `vdev_id` 当作 `chip_id` 传入；新类型在编译期阻断这类混用。
//! - **契约 (What)**：所有类型均为 `Copy`，零运行时开销；`MacAddr` 支持 `Display`/`FromStr`，
//!   格式固定为小写冒号分隔的 `aa:bb:cc:dd:ee:ff`。
//! - **风险 (Trade-offs)**：新类型不做取值范围校验，范围约束由持有它们的组件（如 Cookie 编解码器、
//!   对端 ID 表）在入口处负责。

use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::RxError;

/// 48 位 IEEE MAC 地址。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// 多播/广播地址的 I/G 位为 1。
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = RxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RxError::InvalidConfig {
            field: "mac_address",
            reason: format!("`{s}` is not a colon separated MAC address"),
        };
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

/// 描述符池编号；同一芯片可挂载多个接收环，每个环对应一个池。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub u8);

/// 硬件分配的对端 ID，作为对端 ID 表的下标。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u16);

impl PeerId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 虚拟设备编号。对端只保存该编号，不持有 vdev 对象。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VdevId(pub u8);

/// 多芯片 MLO 拓扑中的芯片编号。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChipId(pub u8);

/// 写入硬件环的不透明描述符标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cookie(pub u32);

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// 设备可见的 DMA 地址（总线地址）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DmaAddr(pub u64);

impl fmt::Display for DmaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_display_and_parse_agree() {
        let mac = MacAddr::new([0x00, 0x03, 0x7f, 0xaa, 0x10, 0xff]);
        let text = mac.to_string();
        assert_eq!(text, "00:03:7f:aa:10:ff");
        assert_eq!(text.parse::<MacAddr>().expect("合法地址应可解析"), mac);
    }

    #[test]
    fn mac_parse_rejects_malformed_input() {
        for bad in ["", "00:11:22:33:44", "00:11:22:33:44:55:66", "0:11:22:33:44:55", "zz:11:22:33:44:55"] {
            assert!(bad.parse::<MacAddr>().is_err(), "`{bad}` 不应被接受");
        }
    }

    #[test]
    fn multicast_bit() {
        assert!(MacAddr::new([0x01, 0, 0x5e, 0, 0, 1]).is_multicast());
        assert!(!MacAddr::new([0x02, 0, 0, 0, 0, 1]).is_multicast());
    }
}
