use super::{Amount, LedgerError};

pub const UNIT_SCALE: u64 = 100_000_000; // 1 unit = 1e8 minimal units
const DECIMALS: usize = 8;

/// Parses a decimal string such as `"0.55"` into minimal units.
pub fn parse_units(s: &str) -> Result<Amount, LedgerError> {
    let invalid = || LedgerError::InvalidAmount(s.to_string());
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if frac.len() > DECIMALS
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let mut frac_units: u64 = 0;
    for (idx, digit) in frac.bytes().enumerate() {
        let place = 10u64.pow((DECIMALS - 1 - idx) as u32);
        frac_units += u64::from(digit - b'0') * place;
    }
    whole
        .checked_mul(UNIT_SCALE)
        .and_then(|units| units.checked_add(frac_units))
        .ok_or_else(invalid)
}

/// Formats minimal units as a decimal string without trailing zeros.
pub fn format_units(amount: Amount) -> String {
    let whole = amount / UNIT_SCALE;
    let frac = amount % UNIT_SCALE;
    if frac == 0 {
        return format!("{whole}.0");
    }
    let frac = format!("{frac:0width$}", width = DECIMALS);
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
