//! Kubernetes resource quantity parsing
//!
//! Quantities are a decimal number followed by an optional binary suffix
//! (`Ki`, `Mi`, ...), decimal suffix (`m`, `k`, `M`, ...) or exponent
//! (`1e3`).

/// Parses a quantity into its value in base units
pub fn parse(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return None;
    }

    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exp if exp.starts_with('e') || exp.starts_with('E') => {
            let exponent: i32 = exp[1..].parse().ok()?;
            10f64.powi(exponent)
        }
        _ => return None,
    };

    Some(number * multiplier)
}

/// Tolerance absorbing float error of the suffix multipliers
const EPSILON: f64 = 1e-6;

fn round_up(value: f64) -> u64 {
    (value - EPSILON).ceil().max(0.0) as u64
}

/// CPU quantity in millicores, rounded up
pub fn cpu_millis(quantity: &str) -> Option<u64> {
    parse(quantity).map(|cores| round_up(cores * 1000.0))
}

/// Memory quantity in bytes, rounded up
pub fn memory_bytes(quantity: &str) -> Option<u64> {
    parse(quantity).map(round_up)
}

/// Whole-unit count (GPUs)
pub fn count(quantity: &str) -> Option<u32> {
    parse(quantity).map(|n| (n + EPSILON).floor().max(0.0) as u32)
}

/// Millicores formatted as a CPU quantity
pub fn format_cpu(millis: u64) -> String {
    format!("{}m", millis)
}
