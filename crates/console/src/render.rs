//! Terminal table rendering

use std::collections::HashMap;
use std::fmt::Write;

use rust_decimal::{Decimal, RoundingStrategy};

use premium_core::{FlashState, MarketSnapshot, SelectionState, Symbol};

const MILLION: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
const EOK: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);
const JO: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// `{:.N}` on a `Decimal` truncates, so round half away from zero first
fn round(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Insert `,` every three integer digits
fn group_digits(value: Decimal) -> String {
    let text = value.abs().to_string();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (text.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value.is_sign_negative() && !value.is_zero() { "-" } else { "" };
    match frac_part {
        Some(frac) => format!("{}{}.{}", sign, grouped, frac),
        None => format!("{}{}", sign, grouped),
    }
}

/// Grouped whole number from one million up, two decimals below
pub fn format_price(price: Decimal) -> String {
    if price.abs() >= MILLION {
        group_digits(round(price, 0))
    } else {
        format!("{:.2}", round(price, 2))
    }
}

/// Volume in 조 (10^12) and 억 (10^8) units
pub fn format_volume(volume: Decimal) -> String {
    if volume >= JO {
        format!("{:.2}조", round(volume / JO, 2))
    } else if volume >= EOK {
        format!("{:.0}억", round(volume / EOK, 0))
    } else {
        group_digits(volume.round_dp(3).normalize())
    }
}

/// Signed percent with two decimals, `-` when absent
pub fn format_percent(value: Option<Decimal>) -> String {
    match value.map(|v| round(v, 2)) {
        Some(v) if v.is_sign_positive() && !v.is_zero() => format!("+{:.2}%", v),
        Some(v) if v.is_zero() => "0.00%".to_string(),
        Some(v) => format!("{:.2}%", v),
        None => "-".to_string(),
    }
}

fn flash_marker(state: FlashState) -> &'static str {
    match state {
        FlashState::Up => "▲",
        FlashState::Down => "▼",
        FlashState::None => " ",
    }
}

/// Render the full market table
pub fn render_table(
    snapshot: &MarketSnapshot,
    selection: SelectionState,
    flashes: &HashMap<Symbol, FlashState>,
) -> String {
    let mut out = String::new();

    let label = selection.exchange.map(|e| e.label()).unwrap_or("no exchange");
    let status = if selection.loading { " (loading)" } else { "" };
    let _ = writeln!(
        out,
        "{}{} | USDT/KRW {} | #{}",
        label,
        status,
        format_price(snapshot.rate),
        snapshot.sequence
    );
    let _ = writeln!(
        out,
        "  {:<6} {:<10} {:>16} {:>14} {:>9} {:>9} {:>9} {:>9} {:>12}",
        "", "Name", "Price (KRW)", "Price (USDT)", "Premium", "24h", "High", "Low", "Volume"
    );

    for record in snapshot.sorted_by_volume() {
        let flash = flashes.get(&record.symbol).copied().unwrap_or_default();
        // Converted foreign price stands in until a domestic price is observed
        let domestic = match record.domestic_price() {
            Some(price) => format_price(price),
            None => record
                .converted_price(snapshot.rate)
                .map(|p| format!("~{}", format_price(p)))
                .unwrap_or_else(|| "-".to_string()),
        };

        let _ = writeln!(
            out,
            "{} {:<6} {:<10} {:>16} {:>14} {:>9} {:>9} {:>9} {:>9} {:>12}",
            flash_marker(flash),
            record.symbol.as_str(),
            record.display_name,
            domestic,
            format_price(record.foreign_price),
            format_percent(record.premium_percent()),
            format_percent(Some(record.foreign_price_change_percent)),
            format_percent(record.high_diff_percent()),
            format_percent(record.low_diff_percent()),
            format_volume(record.volume_24h),
        );
    }

    out
}
