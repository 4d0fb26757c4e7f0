//! Ring Buffer
//!
//! 固定容量・挿入順のサンプル履歴

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 固定容量リングバッファ
///
/// Invariant: `len() <= capacity()`. Once full, each push evicts the oldest element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// 新しいバッファを作成（容量0は1に切り上げ）
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 要素を追加し、溢れた最古の要素を返す
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 最新の要素
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// 古い順のイテレータ
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    /// 古い順の不変コピー（モデル入力用）
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T> Extend<T> for RingBuffer<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut buffer = RingBuffer::new(3);
        assert!(buffer.push(1).is_none());
        assert!(buffer.push(2).is_none());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.latest(), Some(&2));
    }

    #[test]
    fn test_fifo_eviction() {
        let mut buffer = RingBuffer::new(3);
        for i in 1..=3 {
            buffer.push(i);
        }
        assert!(buffer.is_full());

        assert_eq!(buffer.push(4), Some(1));
        assert_eq!(buffer.snapshot(), vec![2, 3, 4]);
    }

    #[test]
    fn test_contents_are_last_capacity_elements() {
        for capacity in 1..8 {
            for pushes in 0..20usize {
                let mut buffer = RingBuffer::new(capacity);
                buffer.extend(0..pushes);

                assert!(buffer.len() <= capacity);
                let expected: Vec<usize> = (pushes.saturating_sub(capacity)..pushes).collect();
                assert_eq!(buffer.snapshot(), expected);
            }
        }
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut buffer = RingBuffer::new(2);
        buffer.push(10);
        let snapshot = buffer.snapshot();
        buffer.push(20);
        buffer.push(30);
        assert_eq!(snapshot, vec![10]);
    }

    #[test]
    fn test_zero_capacity_rounds_up() {
        let mut buffer = RingBuffer::new(0);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.snapshot(), vec!["b"]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = RingBuffer::new(4);
        buffer.extend([1, 2, 3]);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
