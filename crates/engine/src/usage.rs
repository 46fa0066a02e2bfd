//! Storage usage report

use vellum_storage::Usage;

/// How close the store is to its capacity bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageLevel {
    /// At or below the warning threshold
    Normal,
    /// Above the warning threshold
    Warning,
    /// Above the critical threshold
    Critical,
}

impl UsageLevel {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageLevel::Normal => "normal",
            UsageLevel::Warning => "warning",
            UsageLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for UsageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the store's usage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageReport {
    /// Bytes held by keys and values
    pub used_bytes: u64,
    /// Capacity bound in bytes
    pub capacity_bytes: u64,
    /// `used_bytes` as a percentage of `capacity_bytes`
    pub percentage: f64,
    /// Threshold classification
    pub level: UsageLevel,
}

impl UsageReport {
    /// Classify `usage` against percentage thresholds
    pub fn from_usage(usage: Usage, warning_percent: u8, critical_percent: u8) -> Self {
        let percentage = usage.percentage();
        let level = if percentage > f64::from(critical_percent) {
            UsageLevel::Critical
        } else if percentage > f64::from(warning_percent) {
            UsageLevel::Warning
        } else {
            UsageLevel::Normal
        };
        Self {
            used_bytes: usage.used_bytes,
            capacity_bytes: usage.capacity_bytes,
            percentage,
            level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(used: u64) -> Usage {
        Usage {
            used_bytes: used,
            capacity_bytes: 1_000,
        }
    }

    #[test]
    fn test_levels() {
        assert_eq!(UsageReport::from_usage(usage(0), 80, 90).level, UsageLevel::Normal);
        assert_eq!(UsageReport::from_usage(usage(800), 80, 90).level, UsageLevel::Normal);
        assert_eq!(UsageReport::from_usage(usage(801), 80, 90).level, UsageLevel::Warning);
        assert_eq!(UsageReport::from_usage(usage(900), 80, 90).level, UsageLevel::Warning);
        assert_eq!(UsageReport::from_usage(usage(901), 80, 90).level, UsageLevel::Critical);
    }

    #[test]
    fn test_custom_thresholds() {
        let report = UsageReport::from_usage(usage(550), 50, 60);
        assert_eq!(report.level, UsageLevel::Warning);
        assert_eq!(report.used_bytes, 550);
        assert!((report.percentage - 55.0).abs() < 1e-9);
    }
}
