//! Fixed-capacity line buffer for workload output tails

use std::collections::VecDeque;

/// Ring buffer keeping the most recent N lines of a stream
///
/// Memory stays bounded no matter how long the workload runs; the main
/// flow reads the tail only after the process has exited.
#[derive(Debug)]
pub struct TailBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append a line, evicting the oldest when full
    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The retained tail, newline-joined
    pub fn tail(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut buf = TailBuffer::new(3);
        buf.push("a".to_string());
        buf.push("b".to_string());
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.tail(), "a\nb\n");
    }

    #[test]
    fn test_oldest_evicted_at_capacity() {
        let mut buf = TailBuffer::new(2);
        buf.push("a".to_string());
        buf.push("b".to_string());
        buf.push("c".to_string());
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.tail(), "b\nc\n");
    }

    #[test]
    fn test_zero_capacity_clamps_to_one() {
        let mut buf = TailBuffer::new(0);
        buf.push("a".to_string());
        buf.push("b".to_string());
        assert_eq!(buf.tail(), "b\n");
    }

    #[test]
    fn test_empty_tail() {
        let buf = TailBuffer::new(4);
        assert!(buf.is_empty());
        assert_eq!(buf.tail(), "");
    }
}
