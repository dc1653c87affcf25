use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use email_address::EmailAddress;
use poem_openapi::Validator;

/// Request-level address check; rejects anything whose canonical form
/// differs from the input (stray spaces, display-name syntax).
pub struct EmailValidator;

impl Display for EmailValidator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Not a valid email address")
    }
}

impl Validator<String> for EmailValidator {
    fn check(&self, value: &String) -> bool {
        match EmailAddress::from_str(value) {
            Ok(e) => &e.email() == value,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses_only() {
        assert!(EmailValidator.check(&"jane@acme.com".to_string()));
        assert!(EmailValidator.check(&"jane+tag@acme.co.uk".to_string()));
        assert!(!EmailValidator.check(&"not-an-email".to_string()));
        assert!(!EmailValidator.check(&"Jane Doe <jane@acme.com>".to_string()));
        assert!(!EmailValidator.check(&"".to_string()));
    }
}
