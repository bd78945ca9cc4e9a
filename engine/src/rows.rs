use std::path::Path;

use alloy::primitives::{Address, U256};
use multisend_core::{error::EngineError, transfer::parse_token_amount};

/// One line of the recipient list, unvalidated.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub address: String,
    pub amount: String,
}

/// A validated transfer target.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub address: Address,
    /// Amount in token base units.
    pub amount: U256,
    /// The human-readable amount as it appeared in the row, for reports
    /// and notifications.
    pub amount_display: String,
}

/// Load the ordered recipient list from a CSV file of `address,amount`
/// rows. A leading header row is dropped; checkpoint offsets index into
/// the returned data rows.
pub fn load_rows(path: &Path) -> Result<Vec<RawRow>, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| EngineError::StoreError {
            message: format!("Failed to open recipient list {}: {e}", path.display()),
        })?;

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| EngineError::StoreError {
            message: format!("Failed to read recipient list row {index}: {e}"),
        })?;

        let address = record.get(0).unwrap_or_default().to_string();
        let amount = record.get(1).unwrap_or_default().to_string();

        if index == 0 && looks_like_header(&address, &amount) {
            tracing::info!("skipping recipient list header row");
            continue;
        }

        rows.push(RawRow { address, amount });
    }

    Ok(rows)
}

fn looks_like_header(address: &str, amount: &str) -> bool {
    let address = address.to_lowercase();
    let amount = amount.to_lowercase();
    address.contains("address")
        || amount.contains("quantity")
        || amount.contains("amount")
}

/// Validate one row. Malformed rows are skipped by the orchestrator, never
/// fatal for the batch.
pub fn validate_row(raw: &RawRow) -> Result<Recipient, EngineError> {
    let address: Address =
        raw.address
            .trim()
            .parse()
            .map_err(|e| EngineError::ValidationError {
                message: format!("invalid address {:?}: {e}", raw.address),
            })?;

    let amount_display = raw.amount.trim().to_string();
    let amount = parse_token_amount(&amount_display, 18)?;

    Ok(Recipient {
        address,
        amount,
        amount_display,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_well_formed_rows() {
        let row = RawRow {
            address: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_string(),
            amount: "2.5".to_string(),
        };
        let recipient = validate_row(&row).unwrap();
        assert_eq!(recipient.amount, U256::from(2_500_000_000_000_000_000u128));
        assert_eq!(recipient.amount_display, "2.5");
    }

    #[test]
    fn rejects_bad_addresses_and_amounts() {
        assert!(
            validate_row(&RawRow {
                address: "not-an-address".to_string(),
                amount: "1".to_string(),
            })
            .is_err()
        );
        assert!(
            validate_row(&RawRow {
                address: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_string(),
                amount: "-1".to_string(),
            })
            .is_err()
        );
        assert!(
            validate_row(&RawRow {
                address: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_string(),
                amount: "0".to_string(),
            })
            .is_err()
        );
    }

    #[test]
    fn header_detection() {
        assert!(looks_like_header("Address", "Quantity"));
        assert!(looks_like_header("wallet_address", "amount"));
        assert!(!looks_like_header(
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
            "1.0"
        ));
    }
}
