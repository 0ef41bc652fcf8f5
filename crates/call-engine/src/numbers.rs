//! Phone number normalization
//!
//! The channel driver requires two distinct, non-interchangeable formats:
//! the routed to/from numbers must be in leading-plus international form,
//! while the transfer-target number must be a bare digit string with the
//! country code first and **no** plus sign. The asymmetry is a driver
//! requirement, not an application choice. Both forms are produced here
//! and nowhere else so they cannot drift apart.

/// Digits of `raw` with the country code guaranteed in front.
///
/// A ten-digit national number gets the country code prepended; a number
/// already carrying it (with or without `+`) passes through unchanged.
fn national_digits(raw: &str, country_code: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 && !digits.starts_with(country_code) {
        format!("{}{}", country_code, digits)
    } else if digits.starts_with(country_code) {
        digits
    } else {
        format!("{}{}", country_code, digits)
    }
}

/// Leading-plus international form for routed to/from numbers.
///
/// `"14045551234"` → `"+14045551234"`, `"+14045550000"` → `"+14045550000"`,
/// `"(404) 555-9999"` → `"+14045559999"`.
pub fn to_e164(raw: &str, country_code: &str) -> String {
    format!("+{}", national_digits(raw, country_code))
}

/// Bare leading-country-code form for the transfer-target variable.
///
/// Identical digits to [`to_e164`] but without the plus sign:
/// `"4045559999"` → `"14045559999"`.
pub fn to_transfer_format(raw: &str, country_code: &str) -> String {
    national_digits(raw, country_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_digit_national_gets_country_code() {
        assert_eq!(to_e164("4045551234", "1"), "+14045551234");
        assert_eq!(to_transfer_format("4045559999", "1"), "14045559999");
    }

    #[test]
    fn eleven_digit_passes_through() {
        assert_eq!(to_e164("14045551234", "1"), "+14045551234");
        assert_eq!(to_transfer_format("14045559999", "1"), "14045559999");
    }

    #[test]
    fn plus_prefixed_input_is_stable() {
        assert_eq!(to_e164("+14045550000", "1"), "+14045550000");
        assert_eq!(to_transfer_format("+14045559999", "1"), "14045559999");
    }

    #[test]
    fn punctuation_is_stripped() {
        assert_eq!(to_e164("(404) 555-1234", "1"), "+14045551234");
    }

    #[test]
    fn the_two_forms_differ_only_by_plus() {
        let e164 = to_e164("4045559999", "1");
        let transfer = to_transfer_format("4045559999", "1");
        assert_eq!(e164, format!("+{}", transfer));
    }
}
