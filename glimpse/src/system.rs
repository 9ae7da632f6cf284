//! Host memory detection for default cache budgets.

/// Fallback when total memory cannot be detected: 8 GB.
const FALLBACK_MEMORY: usize = 8 * 1024 * 1024 * 1024;

/// Detect total system memory in bytes.
///
/// # Platform Support
///
/// - **Linux**: Parses `/proc/meminfo`
/// - **Other platforms**: Returns fallback of 8GB
#[cfg(target_os = "linux")]
pub fn detect_total_memory() -> usize {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| parse_meminfo(&content))
        .unwrap_or(FALLBACK_MEMORY)
}

#[cfg(not(target_os = "linux"))]
pub fn detect_total_memory() -> usize {
    FALLBACK_MEMORY
}

/// Extract `MemTotal` in bytes from `/proc/meminfo` content.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo(content: &str) -> Option<usize> {
    // Format: "MemTotal:       16384000 kB"
    let line = content.lines().find(|line| line.starts_with("MemTotal:"))?;
    let kb = line.split_whitespace().nth(1)?.parse::<usize>().ok()?;
    Some(kb * 1024)
}

/// Default memory cache budget: one eighth of RAM.
pub fn default_memory_cache_bytes() -> usize {
    detect_total_memory() / 8
}

/// Default buffer pool budget: one quarter of the memory cache budget.
pub fn default_buffer_pool_bytes() -> usize {
    default_memory_cache_bytes() / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_total_memory_returns_positive() {
        assert!(detect_total_memory() > 0, "Should detect some memory");
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:       16384000 kB\nMemFree:         1024 kB\n";
        assert_eq!(parse_meminfo(content), Some(16_384_000 * 1024));
        assert_eq!(parse_meminfo("MemFree: 1 kB"), None);
        assert_eq!(parse_meminfo("MemTotal: lots"), None);
    }

    #[test]
    fn test_default_budgets_are_proportional() {
        let memory = default_memory_cache_bytes();
        assert!(memory > 0);
        assert_eq!(default_buffer_pool_bytes(), memory / 4);
    }
}
