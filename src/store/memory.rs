//! Memory ceiling probe and entry cost model

use std::fs;

/// Assumed total memory when `/proc/meminfo` is unreadable (1 GiB).
/// Keeps the trimmer bounded on non-Linux development machines.
pub const FALLBACK_TOTAL_BYTES: u64 = 1024 * 1024 * 1024;

/// Fixed bookkeeping cost charged per entry on top of key and value bytes:
/// map slot, entry struct, allocation headers. An estimate on the high
/// side so the trimmer errs toward staying under the ceiling.
pub const ENTRY_OVERHEAD_BYTES: usize = 128;

/// Approximate resident cost of one stored entry.
pub fn entry_cost(key: &str, stored_len: usize) -> usize {
    ENTRY_OVERHEAD_BYTES + key.len() + stored_len
}

/// Total system memory in bytes, read once at startup.
pub fn total_system_bytes() -> u64 {
    read_meminfo_total().unwrap_or(FALLBACK_TOTAL_BYTES)
}

/// Parse `MemTotal:` out of `/proc/meminfo` (value is in KiB).
fn read_meminfo_total() -> Option<u64> {
    let text = fs::read_to_string("/proc/meminfo").ok()?;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// Ceiling in bytes for a percentage of total memory.
pub fn ceiling_bytes(total: u64, percentage: u8) -> usize {
    ((total / 100) * percentage as u64) as usize
}
