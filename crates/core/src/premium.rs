//! Premium math
//!
//! All arithmetic is checked: an overflow yields `None` instead of panicking.

use rust_decimal::Decimal;

/// Foreign price expressed in domestic currency
pub fn convert(foreign_price: Decimal, rate: Decimal) -> Option<Decimal> {
    foreign_price.checked_mul(rate)
}

/// `(domestic - foreign * rate) / (foreign * rate) * 100`
///
/// `None` when the converted price is not positive.
pub fn premium_percent(domestic: Decimal, foreign_price: Decimal, rate: Decimal) -> Option<Decimal> {
    let converted = convert(foreign_price, rate)?;
    percent_from(domestic, converted)
}

/// Signed distance of `price` from `reference`, in percent
pub fn percent_from(price: Decimal, reference: Decimal) -> Option<Decimal> {
    if reference <= Decimal::ZERO {
        return None;
    }
    price
        .checked_sub(reference)?
        .checked_div(reference)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

/// Absolute change implied by a last price and its change percent.
///
/// `last - last / (1 + pct / 100)`
pub fn change_from_percent(last: Decimal, change_percent: Decimal) -> Option<Decimal> {
    let factor = Decimal::ONE.checked_add(change_percent.checked_div(Decimal::ONE_HUNDRED)?)?;
    if factor <= Decimal::ZERO {
        return None;
    }
    last.checked_sub(last.checked_div(factor)?)
}
