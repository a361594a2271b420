//! Cache size accounting helpers

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Cache size status relative to configured limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSizeStatus {
    /// Under 80% of limit
    Ok,
    /// Between 80% and 100% of limit
    Warning,
    /// At or over the limit
    Exceeded,
}

impl CacheSizeStatus {
    /// Determine status based on current size and limit
    pub fn from_usage(current_bytes: u64, limit_bytes: u64) -> Self {
        if limit_bytes == 0 {
            return Self::Ok;
        }
        let percent = Self::percentage(current_bytes, limit_bytes);
        if percent >= 100.0 {
            Self::Exceeded
        } else if percent >= 80.0 {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    /// Get percentage of limit used
    pub fn percentage(current_bytes: u64, limit_bytes: u64) -> f64 {
        if limit_bytes == 0 {
            return 0.0;
        }
        (current_bytes as f64 / limit_bytes as f64) * 100.0
    }
}

/// Point-in-time cache usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheUsage {
    /// Number of stored entries
    pub entries: usize,
    /// Total stored bytes
    pub total_bytes: u64,
    /// Configured size bound
    pub limit_bytes: u64,
}

impl CacheUsage {
    /// Status relative to the limit
    pub fn status(&self) -> CacheSizeStatus {
        CacheSizeStatus::from_usage(self.total_bytes, self.limit_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0 GB");
    }

    #[test]
    fn size_status_thresholds() {
        assert_eq!(CacheSizeStatus::from_usage(10, 100), CacheSizeStatus::Ok);
        assert_eq!(CacheSizeStatus::from_usage(80, 100), CacheSizeStatus::Warning);
        assert_eq!(CacheSizeStatus::from_usage(100, 100), CacheSizeStatus::Exceeded);
        assert_eq!(CacheSizeStatus::from_usage(5, 0), CacheSizeStatus::Ok);
    }

    #[test]
    fn usage_status() {
        let usage = CacheUsage {
            entries: 2,
            total_bytes: 90,
            limit_bytes: 100,
        };
        assert_eq!(usage.status(), CacheSizeStatus::Warning);
    }
}
