//! E.164 phone number validation

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

static E164: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9][0-9]{1,14}$").expect("valid regex"));

/// Strip the separators people type into phone numbers
#[must_use]
pub fn normalize(phone_number: &str) -> String {
    phone_number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

/// Whether a number is E.164 once spaces and hyphens are removed
#[must_use]
pub fn is_valid(phone_number: &str) -> bool {
    E164.is_match(&normalize(phone_number))
}

/// Normalize and validate, returning the E.164 form
///
/// # Errors
///
/// Returns `InvalidPhoneNumber` if the normalized number is not E.164
pub fn validate(phone_number: &str) -> Result<String> {
    let normalized = normalize(phone_number);
    if E164.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(Error::InvalidPhoneNumber(phone_number.to_string()))
    }
}
