//! Display formatting for minor-unit amounts.

/// Formats minor units as a human-readable amount, e.g. `7500` in `usd` as `$75.00`.
pub fn format_minor_units(amount: i64, currency: &str) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let major = group_thousands(abs / 100);
    let minor = abs % 100;
    match currency_symbol(currency) {
        Some(symbol) => format!("{sign}{symbol}{major}.{minor:02}"),
        None => format!("{sign}{major}.{minor:02} {}", currency.to_ascii_uppercase()),
    }
}

fn currency_symbol(currency: &str) -> Option<&'static str> {
    match currency.to_ascii_lowercase().as_str() {
        "usd" | "cad" | "aud" => Some("$"),
        "eur" => Some("€"),
        "gbp" => Some("£"),
        _ => None,
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
