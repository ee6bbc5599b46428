//! 多缓冲帧重组。
//!
//! # 教案式说明
//! - **意图 (Why)**：超过单个接收缓冲容量的 MSDU 会被硬件切成一串缓冲，每个缓冲头部都带一段
//!   硬件 TLV。上层需要的是“头缓冲 + 分片列表”，且总长度精确等于完成信息里声明的 MSDU 长度。
//! - **契约 (What)**：
//!   - MSDU 长度只取自完成信息，不从缓冲内容推断；
//!   - 单缓冲（同时带起始与结束标志）：剥掉 TLV 与 L3 填充后按 MSDU 长度截断；
//!   - 多缓冲：非末尾缓冲按载荷容量截断，剩余长度逐个递减，末尾缓冲承接余量；
//!   - 标志位与长度对不上（链提前耗尽、结束标志过早、末尾缓冲仍带续传位）一律整链丢弃，
//!     计入 `protocol_mismatches`，返回 [`RxError::ProtocolMismatch`]，不影响后续帧。
//! - **风险 (Trade-offs)**：续传位多报时整链丢弃而不是只交付首缓冲，宁可丢帧也不交付
//!   长度不可信的数据。

use std::sync::Arc;

use crate::{
    buffer::NetBuf,
    config::RxConfig,
    error::{Result, RxError},
    stats::RxStats,
};

/// 缓冲在链中的位置标志；`end == false` 即带续传位。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainFlags {
    pub start: bool,
    pub end: bool,
}

impl ChainFlags {
    pub const SINGLE: Self = Self {
        start: true,
        end: true,
    };
    pub const FIRST: Self = Self {
        start: true,
        end: false,
    };
    pub const MIDDLE: Self = Self {
        start: false,
        end: false,
    };
    pub const LAST: Self = Self {
        start: false,
        end: true,
    };

    pub fn is_continuation(self) -> bool {
        !self.end
    }
}

/// 链上的一个缓冲。
#[derive(Debug)]
pub struct ChainBuffer {
    pub buffer: NetBuf,
    pub flags: ChainFlags,
}

/// 完成信息中与重组相关的字段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsduInfo {
    pub msdu_len: usize,
    pub l3_pad: usize,
}

/// 重组引擎。
#[derive(Debug)]
pub struct Reassembler {
    tlv_len: usize,
    payload_capacity: usize,
    stats: Arc<RxStats>,
}

impl Reassembler {
    pub fn new(config: &RxConfig, stats: Arc<RxStats>) -> Self {
        Self {
            tlv_len: config.reassembly.tlv_header_len,
            payload_capacity: config.payload_capacity(),
            stats,
        }
    }

    pub fn payload_capacity(&self) -> usize {
        self.payload_capacity
    }

    /// 把一条缓冲链重组为一个帧。
    pub fn reassemble(&self, chain: Vec<ChainBuffer>, info: MsduInfo) -> Result<NetBuf> {
        let buffers = chain.len();
        let mut chain = chain.into_iter();
        let Some(first) = chain.next() else {
            return Err(self.mismatch(0, "empty chain"));
        };
        if !first.flags.start {
            return Err(self.mismatch(buffers, "chain does not begin with a start buffer"));
        }

        if first.flags.end {
            if buffers != 1 {
                return Err(self.mismatch(buffers, "buffers follow a single buffer msdu"));
            }
            // 完成信息中的长度与填充来自硬件，相加前不能假设其合理。
            let Some((header, end)) = self
                .tlv_len
                .checked_add(info.l3_pad)
                .and_then(|header| Some((header, header.checked_add(info.msdu_len)?)))
            else {
                return Err(self.mismatch(buffers, "msdu length overflows"));
            };
            let mut frame = first.buffer;
            if end > frame.len() {
                return Err(self.mismatch(buffers, "msdu length exceeds the buffer"));
            }
            frame.truncate(end);
            frame.pull_head(header);
            self.stats.msdus_reassembled.incr();
            return Ok(frame);
        }

        let mut remaining = info.msdu_len;
        let mut head = first.buffer;
        remaining -= self.trim(&mut head, remaining, buffers)?;
        if remaining == 0 {
            return Err(self.mismatch(buffers, "continuation set on a buffer that holds the whole msdu"));
        }

        let mut ended = false;
        for item in chain {
            if ended {
                return Err(self.mismatch(buffers, "buffers follow the end flag"));
            }
            if item.flags.start {
                return Err(self.mismatch(buffers, "start flag inside a chain"));
            }
            if item.flags.end {
                if remaining > self.payload_capacity {
                    return Err(self.mismatch(buffers, "end flag before msdu length is consumed"));
                }
                ended = true;
            } else if remaining <= self.payload_capacity {
                return Err(self.mismatch(buffers, "continuation set on the terminal buffer"));
            }
            let mut frag = item.buffer;
            remaining -= self.trim(&mut frag, remaining, buffers)?;
            head.push_frag(frag);
        }
        if !ended {
            return Err(self.mismatch(buffers, "chain exhausted before the end flag"));
        }

        self.stats.msdus_reassembled.incr();
        tracing::trace!(buffers, msdu_len = info.msdu_len, "rx msdu reassembled");
        Ok(head)
    }

    /// 剥掉 TLV 头并按剩余长度截断，返回该缓冲承载的载荷字节数。
    fn trim(&self, buffer: &mut NetBuf, remaining: usize, buffers: usize) -> Result<usize> {
        let take = remaining.min(self.payload_capacity);
        if self.tlv_len + take > buffer.len() {
            return Err(self.mismatch(buffers, "buffer shorter than its claimed payload"));
        }
        buffer.truncate(self.tlv_len + take);
        buffer.pull_head(self.tlv_len);
        Ok(take)
    }

    fn mismatch(&self, buffers: usize, detail: &str) -> RxError {
        self.stats.protocol_mismatches.incr();
        tracing::warn!(buffers, detail, "rx chain dropped");
        RxError::ProtocolMismatch {
            buffers,
            detail: detail.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembler(tlv: usize, buffer_size: usize) -> Reassembler {
        let mut config = RxConfig::default();
        config.reassembly.tlv_header_len = tlv;
        config.pool.buffer_size = buffer_size;
        Reassembler::new(&config, Arc::new(RxStats::default()))
    }

    fn buf(len: usize, flags: ChainFlags) -> ChainBuffer {
        ChainBuffer {
            buffer: NetBuf::zeroed(len),
            flags,
        }
    }

    #[test]
    fn single_buffer_strips_tlv_and_pad() {
        let engine = reassembler(16, 256);
        let mut raw = vec![0u8; 256];
        raw[18..22].copy_from_slice(&[1, 2, 3, 4]);
        let chain = vec![ChainBuffer {
            buffer: NetBuf::from_slice(&raw),
            flags: ChainFlags::SINGLE,
        }];
        let frame = engine
            .reassemble(
                chain,
                MsduInfo {
                    msdu_len: 4,
                    l3_pad: 2,
                },
            )
            .expect("单缓冲应成功");
        assert_eq!(frame.as_slice(), &[1, 2, 3, 4]);
        assert!(!frame.is_chained());
    }

    #[test]
    fn over_counted_continuation_is_dropped() {
        let engine = reassembler(16, 116);
        let chain = vec![buf(116, ChainFlags::FIRST), buf(116, ChainFlags::MIDDLE), buf(116, ChainFlags::LAST)];
        let err = engine
            .reassemble(
                chain,
                MsduInfo {
                    msdu_len: 150,
                    l3_pad: 0,
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "rx.reassembly.protocol_mismatch");
        assert_eq!(engine.stats.protocol_mismatches.get(), 1);
    }

    #[test]
    fn empty_chain_is_a_mismatch() {
        let engine = reassembler(16, 116);
        assert!(
            engine
                .reassemble(
                    Vec::new(),
                    MsduInfo {
                        msdu_len: 10,
                        l3_pad: 0
                    }
                )
                .is_err()
        );
    }
}
