//! Parses and formats the sizes and durations used in the config and on the stats page.
//!
//! Capacities of groups are given as e.g. `64m` and timeouts as e.g. `5s` in the
//! **settings.yml**. The formatting helpers are used to render the metrics of the cache in a
//! human readable way.
use std::fmt::Write;
use std::time::Duration;

/// Formats a duration given in microseconds, picking the unit which yields a concise output.
///
/// # Examples
///
/// ```
/// let format = |micros| {
///     let mut result = String::new();
///     dcache::fmt::format_micros(micros, &mut result).unwrap();
///     result
/// };
/// assert_eq!(format(100), "100 us");
/// assert_eq!(format(8_192), "8.19 ms");
/// assert_eq!(format(32_768), "32.8 ms");
/// assert_eq!(format(128_123), "128 ms");
/// assert_eq!(format(1_128_123), "1.13 s");
/// assert_eq!(format(101_000_000), "101 s");
/// ```
pub fn format_micros(micros: i32, f: &mut dyn std::fmt::Write) -> std::fmt::Result {
    let value = micros as f32;
    match micros {
        m if m < 1_000 => write!(f, "{} us", m),
        m if m < 10_000 => write!(f, "{:.2} ms", value / 1_000.),
        m if m < 100_000 => write!(f, "{:.1} ms", value / 1_000.),
        m if m < 1_000_000 => write!(f, "{} ms", m / 1_000),
        m if m < 10_000_000 => write!(f, "{:.2} s", value / 1_000_000.),
        m if m < 100_000_000 => write!(f, "{:.1} s", value / 1_000_000.),
        m => write!(f, "{} s", m / 1_000_000),
    }
}

const SIZE_UNITS: [&str; 6] = ["Bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];

/// Formats a size in bytes, picking the unit which yields a concise output.
///
/// See [format_size](format_size) for examples.
pub fn format_bytes(size_in_bytes: usize, f: &mut dyn std::fmt::Write) -> std::fmt::Result {
    match size_in_bytes {
        1 => return write!(f, "1 byte"),
        size if size < 1024 => return write!(f, "{} bytes", size),
        _ => (),
    }

    let mut unit = 0;
    let mut size = size_in_bytes as f32;
    while size > 1024. && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    let precision = if size <= 10. {
        2
    } else if size <= 100. {
        1
    } else {
        0
    };

    write!(f, "{:.*} {}", precision, size, SIZE_UNITS[unit])
}

/// Formats a size in bytes into a String.
///
/// # Examples
///
/// ```
/// assert_eq!(dcache::fmt::format_size(0), "0 bytes");
/// assert_eq!(dcache::fmt::format_size(1), "1 byte");
/// assert_eq!(dcache::fmt::format_size(1000), "1000 bytes");
/// assert_eq!(dcache::fmt::format_size(2048), "2.00 KiB");
/// assert_eq!(dcache::fmt::format_size(87_340), "85.3 KiB");
/// assert_eq!(dcache::fmt::format_size(873_400), "853 KiB");
/// assert_eq!(dcache::fmt::format_size(64 * 1024 * 1024), "64.0 MiB");
/// assert_eq!(dcache::fmt::format_size(8_734_000_000), "8.13 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    let mut result = String::new();
    let _ = format_bytes(size_in_bytes, &mut result);
    result
}

/// Parses a size like `512`, `2k`, `64 M` or `1g`.
///
/// The suffixes **k**, **m**, **g** and **t** (in either case) multiply the value by 1024, 1024²
/// and so on. A **b** or no suffix at all denotes plain bytes.
///
/// # Examples
///
/// ```
/// assert_eq!(dcache::fmt::parse_size("100").unwrap(), 100);
/// assert_eq!(dcache::fmt::parse_size("100b").unwrap(), 100);
/// assert_eq!(dcache::fmt::parse_size("2k").unwrap(), 2048);
/// assert_eq!(dcache::fmt::parse_size("64 M").unwrap(), 64 * 1024 * 1024);
/// assert_eq!(dcache::fmt::parse_size("1g").unwrap(), 1024 * 1024 * 1024);
///
/// // Unknown suffixes, decimal and negative numbers are rejected...
/// assert_eq!(dcache::fmt::parse_size("3 Y").is_err(), true);
/// assert_eq!(dcache::fmt::parse_size("1.2g").is_err(), true);
/// assert_eq!(dcache::fmt::parse_size("-1").is_err(), true);
/// ```
pub fn parse_size(str: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref SIZE: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *([bBkKmMgGtT]?) *$").unwrap();
    }

    let captures = SIZE.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' as size. Expected a positive number, optionally followed by \
             'b', 'k', 'm', 'g' or 't'.",
            str.as_ref()
        )
    })?;

    let number = captures[1].parse::<usize>()?;
    let exponent = match captures[2].to_ascii_lowercase().as_str() {
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        _ => 0,
    };

    number
        .checked_mul(1024usize.pow(exponent))
        .ok_or_else(|| anyhow::anyhow!("The size '{}' is too large.", str.as_ref()))
}

/// Parses a duration like `500ms`, `5s`, `2m`, `1h` or `1d`.
///
/// A number without a suffix is treated as milliseconds.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(dcache::fmt::parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(dcache::fmt::parse_duration("250").unwrap(), Duration::from_millis(250));
/// assert_eq!(dcache::fmt::parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(dcache::fmt::parse_duration("3 M").unwrap(), Duration::from_secs(3 * 60));
/// assert_eq!(dcache::fmt::parse_duration("2h").unwrap(), Duration::from_secs(2 * 60 * 60));
/// assert_eq!(dcache::fmt::parse_duration("1 d").unwrap(), Duration::from_secs(24 * 60 * 60));
///
/// assert_eq!(dcache::fmt::parse_duration("3 Y").is_err(), true);
/// assert_eq!(dcache::fmt::parse_duration("1.2s").is_err(), true);
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref DURATION: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *(ms|s|m|h|d|MS|S|M|H|D)? *$").unwrap();
    }

    let captures = DURATION.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' as duration. Expected a positive number, optionally followed by \
             'ms', 's', 'm', 'h' or 'd'.",
            str.as_ref()
        )
    })?;

    let number = captures[1].parse::<u64>()?;
    let unit = captures
        .get(2)
        .map(|unit| unit.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    Ok(match unit.as_str() {
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(number * 60),
        "h" => Duration::from_secs(number * 60 * 60),
        "d" => Duration::from_secs(number * 60 * 60 * 24),
        _ => Duration::from_millis(number),
    })
}

/// Formats a duration like "1d 3h 17m 2s 12ms", omitting all parts which are zero.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(dcache::fmt::format_duration(Duration::from_millis(13)), "13ms");
/// assert_eq!(dcache::fmt::format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(dcache::fmt::format_duration(Duration::from_secs(60 * 61)), "1h 1m");
/// assert_eq!(dcache::fmt::format_duration(Duration::from_secs(24 * 60 * 60 + 59)), "1d 59s");
/// assert_eq!(dcache::fmt::format_duration(Duration::ZERO), "0ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(u128, &str); 5] = [
        (1000 * 60 * 60 * 24, "d"),
        (1000 * 60 * 60, "h"),
        (1000 * 60, "m"),
        (1000, "s"),
        (1, "ms"),
    ];

    let mut result = String::new();
    let mut remainder = duration.as_millis();
    for (millis, unit) in UNITS {
        let amount = remainder / millis;
        if amount > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", amount, unit);
            remainder %= millis;
        }
    }

    if result.is_empty() {
        result.push_str("0ms");
    }

    result
}
