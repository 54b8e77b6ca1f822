//! # Validation Module
//!
//! Input validation for invoices arriving from the inbox.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: File Watcher                                                 │
//! │  └── parse_invoice_document (JSON shape, THIS MODULE)                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Invoice Store                                                │
//! │  └── validate_invoice_number / validate_amount (THIS MODULE)           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── UNIQUE (fiscal_day_no, number)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use fiscal_core::validation::parse_invoice_document;
//!
//! let descriptor = parse_invoice_document(br#"{"number":"INV-010","amount":1999}"#).unwrap();
//! assert_eq!(descriptor.number, "INV-010");
//! assert_eq!(descriptor.amount.minor(), 1999);
//! ```

use serde::Deserialize;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::InvoiceDescriptor;
use crate::{MAX_ABS_AMOUNT_MINOR, MAX_INVOICE_NUMBER_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a business invoice number.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Letters, digits, `-`, `_`, `/` and `.` only
///
/// ## Example
/// ```rust
/// use fiscal_core::validation::validate_invoice_number;
///
/// assert!(validate_invoice_number("INV-010").is_ok());
/// assert!(validate_invoice_number("").is_err());
/// assert!(validate_invoice_number("INV 010").is_err());
/// ```
pub fn validate_invoice_number(number: &str) -> ValidationResult<()> {
    let number = number.trim();

    if number.is_empty() {
        return Err(ValidationError::Required {
            field: "number".to_string(),
        });
    }

    if number.len() > MAX_INVOICE_NUMBER_LEN {
        return Err(ValidationError::TooLong {
            field: "number".to_string(),
            max: MAX_INVOICE_NUMBER_LEN,
        });
    }

    if !number
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
    {
        return Err(ValidationError::InvalidFormat {
            field: "number".to_string(),
            reason: "must contain only letters, numbers, '-', '_', '/' and '.'".to_string(),
        });
    }

    Ok(())
}

/// Validates an invoice amount.
///
/// Negative amounts are credit notes and allowed; zero is not.
pub fn validate_amount(amount: Money) -> ValidationResult<()> {
    if amount.is_zero() {
        return Err(ValidationError::MustBeNonZero {
            field: "amount".to_string(),
        });
    }

    if amount.minor().abs() > MAX_ABS_AMOUNT_MINOR {
        return Err(ValidationError::OutOfRange {
            field: "amount".to_string(),
            min: -MAX_ABS_AMOUNT_MINOR,
            max: MAX_ABS_AMOUNT_MINOR,
        });
    }

    Ok(())
}

// =============================================================================
// Document Parsing
// =============================================================================

#[derive(Deserialize)]
struct RawInvoiceDocument {
    number: Option<String>,
    amount: Option<serde_json::Value>,
}

/// Parses and validates an inbox invoice file.
///
/// Unknown fields are ignored. `amount` must be an integer in minor units;
/// a fractional number is rejected rather than rounded.
pub fn parse_invoice_document(bytes: &[u8]) -> ValidationResult<InvoiceDescriptor> {
    let raw: RawInvoiceDocument =
        serde_json::from_slice(bytes).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    let number = raw
        .number
        .map(|n| n.trim().to_string())
        .ok_or_else(|| ValidationError::Required {
            field: "number".to_string(),
        })?;
    validate_invoice_number(&number)?;

    let amount = match raw.amount {
        Some(serde_json::Value::Number(n)) => {
            n.as_i64().ok_or_else(|| ValidationError::InvalidFormat {
                field: "amount".to_string(),
                reason: "must be an integer number of minor units".to_string(),
            })?
        }
        Some(_) => {
            return Err(ValidationError::InvalidFormat {
                field: "amount".to_string(),
                reason: "must be an integer number of minor units".to_string(),
            })
        }
        None => {
            return Err(ValidationError::Required {
                field: "amount".to_string(),
            })
        }
    };
    let amount = Money::from_minor(amount);
    validate_amount(amount)?;

    Ok(InvoiceDescriptor { number, amount })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_invoice_number() {
        assert!(validate_invoice_number("INV-010").is_ok());
        assert!(validate_invoice_number("2024/0001").is_ok());
        assert!(validate_invoice_number("a_b.c").is_ok());

        assert!(validate_invoice_number("").is_err());
        assert!(validate_invoice_number("   ").is_err());
        assert!(validate_invoice_number("has space").is_err());
        assert!(validate_invoice_number(&"A".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(Money::from_minor(1999)).is_ok());
        assert!(validate_amount(Money::from_minor(-500)).is_ok());
        assert!(validate_amount(Money::zero()).is_err());
        assert!(validate_amount(Money::from_minor(MAX_ABS_AMOUNT_MINOR + 1)).is_err());
    }

    #[test]
    fn test_parse_document() {
        let descriptor =
            parse_invoice_document(br#"{"number":"INV-010","amount":1999,"note":"x"}"#).unwrap();
        assert_eq!(descriptor.number, "INV-010");
        assert_eq!(descriptor.amount, Money::from_minor(1999));
    }

    #[test]
    fn test_parse_document_errors() {
        assert!(matches!(
            parse_invoice_document(b"not json"),
            Err(ValidationError::Malformed(_))
        ));
        assert!(matches!(
            parse_invoice_document(br#"{"amount":1999}"#),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            parse_invoice_document(br#"{"number":"INV-1","amount":19.99}"#),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(matches!(
            parse_invoice_document(br#"{"number":"INV-1","amount":"1999"}"#),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(matches!(
            parse_invoice_document(br#"{"number":"INV-1","amount":0}"#),
            Err(ValidationError::MustBeNonZero { .. })
        ));
    }
}
