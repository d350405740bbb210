//! Budget occupancy reporting.

/// Snapshot of how full the context budget is, split by origin.
///
/// Block tokens are estimates: dynamic blocks count at their last
/// rendered size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    pub queue_tokens: u32,
    pub block_tokens: u32,
    pub budget_tokens: u32,
}

impl ContextUsage {
    #[must_use]
    pub fn used_tokens(&self) -> u32 {
        self.queue_tokens.saturating_add(self.block_tokens)
    }

    #[must_use]
    pub fn percentage(&self) -> u8 {
        if self.budget_tokens == 0 {
            return 100;
        }
        let pct = (u64::from(self.used_tokens()) * 100) / u64::from(self.budget_tokens);
        pct.min(100) as u8
    }

    /// Compact display form, e.g. `2.1k / 200k (1%)`.
    #[must_use]
    pub fn format_compact(&self) -> String {
        format!(
            "{} / {} ({}%)",
            format_tokens(self.used_tokens()),
            format_tokens(self.budget_tokens),
            self.percentage()
        )
    }

    /// 0 = comfortable, 1 = warning (>=70%), 2 = critical (>=90%).
    #[must_use]
    pub fn severity(&self) -> u8 {
        match self.percentage() {
            90.. => 2,
            70.. => 1,
            _ => 0,
        }
    }
}

fn format_tokens(tokens: u32) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", f64::from(tokens) / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}k", f64::from(tokens) / 1_000.0)
    } else {
        tokens.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::ContextUsage;

    fn usage(queue: u32, blocks: u32, budget: u32) -> ContextUsage {
        ContextUsage {
            queue_tokens: queue,
            block_tokens: blocks,
            budget_tokens: budget,
        }
    }

    #[test]
    fn percentage_combines_queue_and_blocks() {
        let u = usage(300, 200, 1000);
        assert_eq!(u.used_tokens(), 500);
        assert_eq!(u.percentage(), 50);
    }

    #[test]
    fn percentage_caps_at_hundred() {
        assert_eq!(usage(1500, 0, 1000).percentage(), 100);
    }

    #[test]
    fn compact_format() {
        assert_eq!(usage(2_100, 0, 200_000).format_compact(), "2.1k / 200.0k (1%)");
        assert_eq!(usage(500, 0, 800).format_compact(), "500 / 800 (62%)");
    }

    #[test]
    fn severity_thresholds() {
        assert_eq!(usage(100, 0, 1000).severity(), 0);
        assert_eq!(usage(700, 0, 1000).severity(), 1);
        assert_eq!(usage(900, 0, 1000).severity(), 2);
    }
}
