//! Human-readable byte formatting
//!
//! Sizes in this crate are tracked as raw byte counts; this module renders
//! them for logs, error messages, and CLI output.

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

/// Formats a byte count with a binary-prefix unit
///
/// # Example
///
/// ```
/// use modelyard::util::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KiB");
/// assert_eq!(format_bytes(10 * 1024 * 1024 * 1024), "10.00 GiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= TIB {
        format!("{:.2} TiB", b / TIB)
    } else if b >= GIB {
        format!("{:.2} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

/// Converts a byte count to fractional gibibytes
pub fn as_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB
}
