//! 接收缓冲 `NetBuf`。
//!
//! # 教案式说明
//! - **意图 (Why)**：硬件把帧 DMA 到整块缓冲中，软件随后需要按 MSDU 长度截断、剥掉 TLV 头、
//!   并把多缓冲帧串成“头缓冲 + 分片列表”。这里以 `BytesMut` 为底座提供这些最小操作。
//! - **契约 (What)**：
//!   - `len()` 只计头缓冲自身；`total_len()` 计入所有分片；
//!   - 分片只挂在头缓冲上，分片自身不再嵌套分片；
//!   - 所有裁剪操作都是饱和的，不会越界 panic。
//! - **风险 (Trade-offs)**：分片使用 `Vec<NetBuf>` 存储，一个 A-MSDU 通常不超过数个缓冲，
//!   小向量的分配成本可以接受。

use bytes::{Buf, BytesMut};

/// 接收缓冲。
#[derive(Debug, Default)]
pub struct NetBuf {
    data: BytesMut,
    frags: Vec<NetBuf>,
}

impl NetBuf {
    /// 分配一个长度为 `len` 的清零缓冲，对应硬件可写满的 DMA 区域。
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: BytesMut::zeroed(len),
            frags: Vec::new(),
        }
    }

    /// 用给定字节构造缓冲，主要供仿真与测试注入“硬件写入”的数据。
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            frags: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 把数据长度截断到 `len`；`len` 超过当前长度时不做任何事。
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// 从头部剥离 `count` 字节，返回实际剥离的字节数。
    pub fn pull_head(&mut self, count: usize) -> usize {
        let count = count.min(self.data.len());
        self.data.advance(count);
        count
    }

    /// 追加一个分片。
    pub fn push_frag(&mut self, frag: NetBuf) {
        self.frags.push(frag);
    }

    pub fn frags(&self) -> &[NetBuf] {
        &self.frags
    }

    pub fn is_chained(&self) -> bool {
        !self.frags.is_empty()
    }

    /// 头缓冲与全部分片的数据长度之和。
    pub fn total_len(&self) -> usize {
        self.data.len() + self.frags.iter().map(NetBuf::len).sum::<usize>()
    }

    /// 依次拷贝头缓冲与分片，得到连续字节。
    pub fn to_contiguous(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        out.extend_from_slice(&self.data);
        for frag in &self.frags {
            out.extend_from_slice(frag.as_slice());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_head_and_truncate_are_saturating() {
        let mut buf = NetBuf::from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(buf.pull_head(2), 2);
        assert_eq!(buf.as_slice(), &[3, 4, 5]);
        buf.truncate(10);
        assert_eq!(buf.len(), 3, "截断长度超过当前长度时应保持不变");
        assert_eq!(buf.pull_head(9), 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn total_len_counts_fragments() {
        let mut head = NetBuf::from_slice(&[0xaa; 4]);
        head.push_frag(NetBuf::from_slice(&[0xbb; 3]));
        head.push_frag(NetBuf::from_slice(&[0xcc; 2]));
        assert!(head.is_chained());
        assert_eq!(head.total_len(), 9);
        assert_eq!(head.to_contiguous()[4..7], [0xbb; 3]);
    }
}
