// Copyright © 2025 mailtrail.dev
// Licensed under MailTrail License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use base64::{engine::general_purpose, Engine};
use rand::{rng, Rng};

use super::error::code::ErrorCode;
use super::error::{MailTrailError, MailTrailResult};

pub mod shutdown;

#[macro_export]
macro_rules! mailtrail_version {
    () => {
        env!("CARGO_PKG_VERSION")
    };
}

#[macro_export]
macro_rules! utc_now {
    () => {{
        use chrono::Utc;
        Utc::now().timestamp_millis()
    }};
}

#[macro_export]
macro_rules! raise_error {
    ($msg:expr, $code:expr) => {
        $crate::modules::error::MailTrailError::Generic {
            message: $msg,
            location: snafu::Location::default(),
            code: $code,
        }
    };
}

#[macro_export]
macro_rules! validate_email {
    ($email:expr) => {{
        $crate::modules::utils::validate_email($email)
    }};
}

pub fn validate_email(email: &str) -> MailTrailResult<()> {
    use std::str::FromStr;
    let parsed = email_address::EmailAddress::from_str(email).map_err(|_| invalid_email(email))?;
    // from_str also accepts display forms like "Name <a@b>"; require the bare address.
    if email != parsed.email() {
        return Err(invalid_email(email));
    }
    Ok(())
}

fn invalid_email(email: &str) -> MailTrailError {
    raise_error!(
        format!("'{email}' is not a valid email address"),
        ErrorCode::InvalidParameter
    )
}

#[macro_export]
macro_rules! id {
    ($bit_strength:expr) => {{
        let token = $crate::modules::utils::generate_token_impl($bit_strength);
        $crate::modules::utils::hash(&token)
    }};
}

pub(crate) fn generate_token_impl(bit_strength: usize) -> String {
    let byte_length = bit_strength.div_ceil(24) * 3;
    let random_bytes: Vec<u8> = (0..byte_length).map(|_| rand::random::<u8>()).collect();
    general_purpose::URL_SAFE
        .encode(&random_bytes)
        .chars()
        .map(|c| match c {
            '/' | '+' | '-' | '_' => make_single_random_char(),
            _ => c,
        })
        .collect()
}

fn make_single_random_char() -> char {
    let random_bytes: [u8; 3] = rng().random();
    general_purpose::URL_SAFE
        .encode(random_bytes)
        .chars()
        .find(|c| c.is_ascii_alphanumeric())
        .unwrap_or('a')
}

/// Murmur3 masked to 53 bits. Ids travel through JSON, and consumers that
/// read numbers as f64 keep 53-bit integers exact.
pub fn hash(s: &str) -> u64 {
    let mut cursor = std::io::Cursor::new(s.as_bytes());
    let digest = murmur3::murmur3_x64_128(&mut cursor, 0).unwrap();
    (digest & 0x1F_FFFF_FFFF_FFFF) as u64
}

/// Truncates on a character boundary so multibyte text never splits mid-codepoint.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_fits_in_53_bits() {
        for _ in 0..32 {
            let id = id!(64);
            assert!(id <= 0x1F_FFFF_FFFF_FFFF);
        }
    }

    #[test]
    fn test_generate_token_has_no_url_unsafe_chars() {
        let token = generate_token_impl(128);
        assert!(!token.is_empty());
        assert!(!token.contains('-'));
        assert!(!token.contains('_'));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("jane@acme.com").is_ok());
        assert!(validate_email("jane+tag@acme.co.uk").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("jane@").is_err());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
    }
}
