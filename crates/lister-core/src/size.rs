const BINARY_UNITS: [&str; 9] = ["B", "kiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
const DECIMAL_UNITS: [&str; 9] = ["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Convert a byte count into a human-readable string with two
/// fractional digits, using binary (1024) or decimal (1000) unit
/// prefixes. Zero bytes renders as `0B`.
pub fn format_size(n_bytes: u64, binary_prefix: bool) -> String {
    if n_bytes == 0 {
        return "0B".to_string();
    }
    let (base, units) = if binary_prefix {
        (1024_f64, &BINARY_UNITS)
    } else {
        (1000_f64, &DECIMAL_UNITS)
    };
    let exponent = ((n_bytes as f64).ln() / base.ln()).floor() as usize;
    let exponent = exponent.min(units.len() - 1);
    let value = n_bytes as f64 / base.powi(exponent as i32);
    format!("{:.2}{}", value, units[exponent])
}
