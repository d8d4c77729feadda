//! Process and system memory probes (Linux `/proc`); `None` elsewhere.
use std::fs;

const GIB: u64 = 1024 * 1024 * 1024;

fn read_kib_field(path: &str, field: &str) -> Option<u64> {
    let text = fs::read_to_string(path).ok()?;
    text.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix(':')?;
        let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        Some(kib * 1024)
    })
}

/// Memory available for new allocations, in bytes.
pub fn available_bytes() -> Option<u64> { read_kib_field("/proc/meminfo", "MemAvailable") }

pub fn available_gib() -> Option<f64> {
    #[allow(clippy::cast_precision_loss)]
    available_bytes().map(|b| b as f64 / GIB as f64)
}

/// Peak resident set size of this process, falling back to the current one.
pub fn peak_resident_bytes() -> Option<u64> {
    read_kib_field("/proc/self/status", "VmHWM").or_else(|| read_kib_field("/proc/self/status", "VmRSS"))
}
