//! 自由链表与调用方持有链表。

use std::collections::VecDeque;

use spin::Mutex;

/// 描述符句柄：稳定下标 + 代数。
///
/// 描述符每次回到自由链表代数加一，旧句柄因代数不符而失效，
/// 由此在不解引用裸指针的前提下识别重复归还与陈旧句柄。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl DescHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// 调用方持有链表（CallerHeldList）。
///
/// 由 `get_free` 或完成事件回收产生，最终必须交还给补给引擎或 `return_all`。
#[derive(Debug, Default)]
pub struct DescList {
    handles: Vec<DescHandle>,
}

impl DescList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handles: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn push(&mut self, handle: DescHandle) {
        self.handles.push(handle);
    }

    pub fn pop(&mut self) -> Option<DescHandle> {
        self.handles.pop()
    }

    /// 把另一个链表整体并入本链表。
    pub fn append(&mut self, other: &mut DescList) {
        self.handles.append(&mut other.handles);
    }

    /// 拆出末尾 `count` 个句柄组成新链表。
    pub fn split_off_tail(&mut self, count: usize) -> DescList {
        let at = self.handles.len().saturating_sub(count);
        DescList {
            handles: self.handles.split_off(at),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DescHandle> {
        self.handles.iter()
    }
}

impl IntoIterator for DescList {
    type Item = DescHandle;
    type IntoIter = std::vec::IntoIter<DescHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.into_iter()
    }
}

impl FromIterator<DescHandle> for DescList {
    fn from_iter<T: IntoIterator<Item = DescHandle>>(iter: T) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}

/// 未使用描述符的下标队列。
///
/// 锁只覆盖一次批量弹出或批量压入，调用方不得在持锁期间分配缓冲或做 DMA 映射；
/// 这一点由接口形态保证：两个方法都在返回前释放锁。
#[derive(Debug)]
pub(crate) struct FreeList {
    slots: Mutex<VecDeque<u32>>,
}

impl FreeList {
    pub(crate) fn with_indices(count: usize) -> Self {
        Self {
            slots: Mutex::new((0..count as u32).collect()),
        }
    }

    /// 弹出至多 `count` 个下标。
    pub(crate) fn take(&self, count: usize) -> Vec<u32> {
        let mut slots = self.slots.lock();
        let n = count.min(slots.len());
        slots.drain(..n).collect()
    }

    /// 批量压回下标。
    pub(crate) fn splice(&self, indices: &[u32]) {
        if indices.is_empty() {
            return;
        }
        self.slots.lock().extend(indices.iter().copied());
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
