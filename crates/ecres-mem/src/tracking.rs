//! High-water mark tracking per pool.
//!
//! Keep this cheap: it runs on every allocation.

#[derive(Debug, Default, Clone, Copy)]
pub struct UsageTracker {
    peak: u32,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self { peak: 0 }
    }

    /// Record a new in-use count; updates the peak if higher.
    pub fn record(&mut self, in_use: u32) {
        if in_use > self.peak {
            self.peak = in_use;
        }
    }

    pub fn peak(&self) -> u32 {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_only_grows() {
        let mut t = UsageTracker::new();
        t.record(3);
        t.record(1);
        assert_eq!(t.peak(), 3);
        t.record(4);
        assert_eq!(t.peak(), 4);
    }
}
