//! Bounded console history
//!
//! Lines survive reconnects; only the sequence numbers restart, so a drop in
//! `sequence` between neighbours marks a connection boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;

use super::ansi::strip_ansi;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub raw_text: String,
}

impl LogLine {
    pub fn new(sequence: u64, raw_text: String) -> Self {
        Self {
            sequence,
            received_at: Utc::now(),
            raw_text,
        }
    }

    /// Text with ANSI sequences and surrounding whitespace removed
    pub fn clean_text(&self) -> String {
        strip_ansi(&self.raw_text).trim().to_string()
    }
}

pub struct LogRingBuffer {
    capacity: usize,
    lines: RwLock<VecDeque<LogLine>>,
}

impl LogRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a line, evicting the oldest one when full
    pub async fn append(&self, line: LogLine) {
        let mut lines = self.lines.write().await;
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Last `min(n, len)` lines, oldest first
    pub async fn tail(&self, n: usize) -> Vec<LogLine> {
        let lines = self.lines.read().await;
        let start = lines.len().saturating_sub(n);
        lines.range(start..).cloned().collect()
    }

    pub async fn last(&self) -> Option<LogLine> {
        self.lines.read().await.back().cloned()
    }

    pub async fn len(&self) -> usize {
        self.lines.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[LogLine]) -> Vec<&str> {
        lines.iter().map(|l| l.raw_text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_evicts_oldest_on_overflow() {
        let buffer = LogRingBuffer::new(3);
        for (i, text) in ["A", "B", "C", "D"].iter().enumerate() {
            buffer.append(LogLine::new(i as u64 + 1, text.to_string())).await;
        }

        assert_eq!(buffer.len().await, 3);
        assert_eq!(texts(&buffer.tail(3).await), vec!["B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_tail_shorter_than_requested() {
        let buffer = LogRingBuffer::new(10);
        buffer.append(LogLine::new(1, "only".to_string())).await;

        assert_eq!(texts(&buffer.tail(5).await), vec!["only"]);
        assert!(buffer.tail(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity_and_keeps_order() {
        let buffer = LogRingBuffer::new(7);
        for i in 0..100u64 {
            buffer.append(LogLine::new(i, format!("line {}", i))).await;
            let len = buffer.len().await;
            assert!(len <= 7);

            let tail = buffer.tail(len).await;
            let expected: Vec<String> = ((i + 1).saturating_sub(len as u64)..=i)
                .map(|n| format!("line {}", n))
                .collect();
            assert_eq!(tail.iter().map(|l| l.raw_text.clone()).collect::<Vec<_>>(), expected);
        }
        assert_eq!(buffer.last().await.unwrap().raw_text, "line 99");
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let buffer = LogRingBuffer::new(0);
        buffer.append(LogLine::new(1, "a".to_string())).await;
        buffer.append(LogLine::new(2, "b".to_string())).await;
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(texts(&buffer.tail(5).await), vec!["b"]);
    }

    #[test]
    fn test_clean_text() {
        let line = LogLine::new(1, "\x1b[32m  Done (3.2s)! \x1b[0m".to_string());
        assert_eq!(line.clean_text(), "Done (3.2s)!");
    }
}
