//! Rupee amount parsing and formatting
//!
//! Dashboard tabs store money as display strings such as `₹1.5 Cr`,
//! `₹50 L` or `₹8,00,000`. The scale suffixes follow the Indian system:
//! one crore is 10,000,000 and one lakh is 100,000.

use lazy_static::lazy_static;
use regex::Regex;

pub const CRORE: f64 = 10_000_000.0;
pub const LAKH: f64 = 100_000.0;
pub const THOUSAND: f64 = 1_000.0;

lazy_static! {
    static ref AMOUNT_REGEX: Regex = Regex::new(
        r"(?i)^\s*(?:₹|rs\.?|inr)?\s*(-)?\s*(\d[\d,\s]*(?:\.\d+)?|\.\d+)\s*(crores?|cr|lakhs?|lacs?|l|k)?\.?\s*$"
    )
    .unwrap();
}

/// Parse a rupee display string into its numeric value
///
/// # Arguments
/// * `text` - Amount such as `₹1.5 Cr`, `₹50 L`, `₹80,000`, `Rs 650` or `1200`
///
/// # Returns
/// * `Option<f64>` - The value in rupees, or None if the text is not an amount
///
/// # Examples
/// ```
/// use sheetdesk::currency::parse_amount;
///
/// assert_eq!(parse_amount("₹1.5 Cr"), Some(15_000_000.0));
/// assert_eq!(parse_amount("₹50 L"), Some(5_000_000.0));
/// assert_eq!(parse_amount("₹80,000"), Some(80_000.0));
/// assert_eq!(parse_amount("14 days"), None);
/// ```
pub fn parse_amount(text: &str) -> Option<f64> {
    let caps = AMOUNT_REGEX.captures(text)?;

    let digits: String = caps[2]
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let base: f64 = digits.parse().ok()?;

    let scale = match caps.get(3).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1.0,
        Some(suffix) if suffix.starts_with("cr") => CRORE,
        Some(suffix) if suffix == "k" => THOUSAND,
        Some(_) => LAKH,
    };

    let value = base * scale;
    if caps.get(1).is_some() {
        Some(-value)
    } else {
        Some(value)
    }
}

/// Parse an amount, treating blanks and unparsable text as zero
pub fn amount_or_zero(text: &str) -> f64 {
    parse_amount(text).unwrap_or(0.0)
}

/// Format a rupee value the way the dashboard displays it
///
/// Values of a crore or more use `Cr`, values of a lakh or more use `L`,
/// smaller values use Indian digit grouping.
///
/// # Examples
/// ```
/// use sheetdesk::currency::format_inr;
///
/// assert_eq!(format_inr(78_000_000.0), "₹7.8 Cr");
/// assert_eq!(format_inr(5_000_000.0), "₹50 L");
/// assert_eq!(format_inr(80_000.0), "₹80,000");
/// ```
pub fn format_inr(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let abs = value.abs();

    if abs >= CRORE {
        format!("{}₹{} Cr", sign, trim_decimal(abs / CRORE))
    } else if abs >= LAKH {
        format!("{}₹{} L", sign, trim_decimal(abs / LAKH))
    } else {
        format!("{}₹{}", sign, group_indian(abs.round() as u64))
    }
}

// One decimal place, dropping a trailing ".0"
fn trim_decimal(value: f64) -> String {
    let text = format!("{:.1}", value);
    text.strip_suffix(".0").map(str::to_string).unwrap_or(text)
}

/// Group digits as 1,23,45,678 (last three, then pairs)
pub fn group_indian(value: u64) -> String {
    let digits = value.to_string();
    if digits.len() <= 3 {
        return digits;
    }

    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();

    format!("{},{}", groups.join(","), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn parses_scaled_amounts() {
        assert!(close(parse_amount("₹1.5 Cr").unwrap(), 15_000_000.0));
        assert!(close(parse_amount("₹12 Cr").unwrap(), 120_000_000.0));
        assert!(close(parse_amount("₹50 L").unwrap(), 5_000_000.0));
        assert!(close(parse_amount("₹8.2 L").unwrap(), 820_000.0));
        assert!(close(parse_amount("₹2.4L").unwrap(), 240_000.0));
        assert!(close(parse_amount("3 lakhs").unwrap(), 300_000.0));
        assert!(close(parse_amount("1 crore").unwrap(), CRORE));
        assert!(close(parse_amount("₹96K").unwrap(), 96_000.0));
    }

    #[test]
    fn parses_grouped_and_plain_amounts() {
        assert!(close(parse_amount("₹80,000").unwrap(), 80_000.0));
        assert!(close(parse_amount("₹8,00,000").unwrap(), 800_000.0));
        assert!(close(parse_amount("₹80 000").unwrap(), 80_000.0));
        assert!(close(parse_amount("Rs. 650").unwrap(), 650.0));
        assert!(close(parse_amount("INR 1200.50").unwrap(), 1200.5));
        assert!(close(parse_amount("42").unwrap(), 42.0));
        assert!(close(parse_amount("₹-5 L").unwrap(), -500_000.0));
    }

    #[test]
    fn rejects_non_amounts() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("14 days"), None);
        assert_eq!(parse_amount("₹"), None);
        assert_eq!(parse_amount("Cr"), None);
        assert_eq!(amount_or_zero("n/a"), 0.0);
    }

    #[test]
    fn formats_like_the_dashboard() {
        assert_eq!(format_inr(78_000_000.0), "₹7.8 Cr");
        assert_eq!(format_inr(120_000_000.0), "₹12 Cr");
        assert_eq!(format_inr(5_000_000.0), "₹50 L");
        assert_eq!(format_inr(820_000.0), "₹8.2 L");
        assert_eq!(format_inr(80_000.0), "₹80,000");
        assert_eq!(format_inr(650.0), "₹650");
        assert_eq!(format_inr(-96_000.0), "-₹96,000");
    }

    #[test]
    fn indian_grouping() {
        assert_eq!(group_indian(999), "999");
        assert_eq!(group_indian(1_000), "1,000");
        assert_eq!(group_indian(800_000), "8,00,000");
        assert_eq!(group_indian(12_345_678), "1,23,45,678");
    }
}
