//! Bank statement CSV import
//!
//! Columns are found by header name, so exports from most banks work
//! without a per-bank parser. Ingestion is shared with provider sync.

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use tracing::{debug, info};

use crate::db::{normalize_currency, Database};
use crate::error::{Error, Result};
use crate::models::NewBankTransaction;

const DATE_HEADERS: &[&str] = &[
    "date",
    "booking date",
    "booking_date",
    "bookingdate",
    "transaction date",
    "buchungstag",
];
const MERCHANT_HEADERS: &[&str] = &[
    "merchant",
    "merchant_name",
    "merchant name",
    "payee",
    "name",
    "counterparty",
    "description",
];
const AMOUNT_HEADERS: &[&str] = &["amount", "betrag", "value"];
const CURRENCY_HEADERS: &[&str] = &["currency", "waehrung", "währung"];
const DESCRIPTION_HEADERS: &[&str] = &["description", "memo", "reference", "verwendungszweck"];

/// Column positions resolved from a header row
#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    date: usize,
    merchant: usize,
    amount: usize,
    currency: Option<usize>,
    description: Option<usize>,
}

fn find_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    // Earlier names win, so "merchant" beats "description" when both exist
    names.iter().find_map(|name| {
        headers
            .iter()
            .position(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase() == *name)
    })
}

fn map_columns(headers: &StringRecord) -> Result<ColumnMap> {
    let missing = |what: &str| {
        Error::Import(format!(
            "No {} column found (headers: {})",
            what,
            headers.iter().collect::<Vec<_>>().join(", ")
        ))
    };

    let merchant = find_column(headers, MERCHANT_HEADERS).ok_or_else(|| missing("merchant"))?;
    let description = find_column(headers, DESCRIPTION_HEADERS).filter(|c| *c != merchant);

    Ok(ColumnMap {
        date: find_column(headers, DATE_HEADERS).ok_or_else(|| missing("date"))?,
        merchant,
        amount: find_column(headers, AMOUNT_HEADERS).ok_or_else(|| missing("amount"))?,
        currency: find_column(headers, CURRENCY_HEADERS),
        description,
    })
}

fn required<'r>(record: &'r StringRecord, col: usize, what: &str, line: usize) -> Result<&'r str> {
    record
        .get(col)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Import(format!("Line {}: missing {}", line, what)))
}

/// Parse a statement export into transactions
///
/// Blank rows are skipped; any malformed row fails the whole import with
/// its line number.
pub fn parse_csv<R: Read>(reader: R, default_currency: &str) -> Result<Vec<NewBankTransaction>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let columns = map_columns(&headers)?;
    let mut transactions = Vec::new();

    for (index, result) in rdr.records().enumerate() {
        let record = result?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        // Header is line 1
        let line = index + 2;

        let booking_date = parse_date(required(&record, columns.date, "date", line)?)
            .map_err(|e| Error::Import(format!("Line {}: {}", line, e)))?;
        let merchant_name = required(&record, columns.merchant, "merchant", line)?.to_string();
        let amount = parse_amount(required(&record, columns.amount, "amount", line)?)
            .map_err(|e| Error::Import(format!("Line {}: {}", line, e)))?;
        let currency = columns
            .currency
            .and_then(|c| record.get(c))
            .filter(|v| !v.is_empty())
            .unwrap_or(default_currency);
        let currency = normalize_currency(currency)
            .map_err(|e| Error::Import(format!("Line {}: {}", line, e)))?;
        let description = columns
            .description
            .and_then(|c| record.get(c))
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string());

        transactions.push(NewBankTransaction {
            merchant_name,
            description,
            amount,
            booking_date,
            currency,
            external_id: None,
        });
    }

    debug!("Parsed {} transactions from CSV", transactions.len());
    Ok(transactions)
}

/// Counts from an ingestion run
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestStats {
    pub received: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Store transactions for a user, skipping ones already present
///
/// The batch is all or nothing: one bad row stores none of them.
pub fn ingest_transactions(
    db: &Database,
    user_id: i64,
    connection_id: Option<i64>,
    transactions: &[NewBankTransaction],
) -> Result<IngestStats> {
    let mut stats = IngestStats {
        received: transactions.len(),
        ..Default::default()
    };

    stats.inserted = db.insert_bank_transactions(user_id, connection_id, transactions)?;
    stats.duplicates = stats.received - stats.inserted;

    info!(
        "Ingested {} transactions for user {} ({} duplicates skipped)",
        stats.inserted, user_id, stats.duplicates
    );
    Ok(stats)
}

/// Deduplication hash over a transaction's identifying fields
pub fn generate_hash(
    date: &NaiveDate,
    merchant: &str,
    amount: f64,
    currency: &str,
    external_id: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(date.to_string().as_bytes());
    hasher.update(merchant.trim().as_bytes());
    hasher.update(amount.to_be_bytes());
    hasher.update(currency.trim().to_uppercase().as_bytes());
    // Provider ids distinguish separate charges with identical date/merchant/amount
    if let Some(id) = external_id {
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Parse a date in one of the common export formats
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();

    let formats = [
        "%Y-%m-%d", // 2024-01-15
        "%d.%m.%Y", // 15.01.2024 (German)
        "%m/%d/%Y", // 01/15/2024
        "%m/%d/%y", // 01/15/24
        "%d/%m/%Y", // 15/01/2024 (European)
    ];

    for fmt in formats {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(date);
        }
    }

    Err(Error::Import(format!("Unable to parse date: {}", s)))
}

/// Parse an amount, handling currency symbols, thousands separators,
/// decimal commas and parenthesized negatives
pub fn parse_amount(s: &str) -> Result<f64> {
    let mut cleaned: String = s
        .trim()
        .replace(['$', '€', '£', ' ', '\u{a0}', '\''], "")
        .replace('(', "-")
        .replace(')', "");

    match (cleaned.rfind(','), cleaned.rfind('.')) {
        // Both present: the later one is the decimal separator
        (Some(c), Some(d)) if c > d => cleaned = cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned = cleaned.replace(',', ""),
        // Comma only: decimal when followed by one or two digits
        (Some(c), None) if (1..=2).contains(&(cleaned.len() - c - 1)) => {
            cleaned = cleaned.replace(',', ".")
        }
        (Some(_), None) => cleaned = cleaned.replace(',', ""),
        _ => {}
    }

    let value = cleaned
        .parse::<f64>()
        .map_err(|_| Error::Import(format!("Unable to parse amount: {}", s)))?;
    if !value.is_finite() {
        return Err(Error::Import(format!("Unable to parse amount: {}", s)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_date("2024-01-15").unwrap(), expected);
        assert_eq!(parse_date("15.01.2024").unwrap(), expected);
        assert_eq!(parse_date("01/15/2024").unwrap(), expected);
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,234.56").unwrap(), 1234.56);
        assert_eq!(parse_amount("-123.45").unwrap(), -123.45);
        assert_eq!(parse_amount("(100.00)").unwrap(), -100.00);
        assert_eq!(parse_amount("-9,99").unwrap(), -9.99);
        assert_eq!(parse_amount("1.234,56 €").unwrap(), 1234.56);
        assert_eq!(parse_amount("1,234").unwrap(), 1234.0);
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("inf").is_err());
    }

    #[test]
    fn test_parse_csv_by_header_names() {
        let data = "\
Booking Date,Payee,Amount,Currency,Memo
2024-01-05,NETFLIX.COM,-15.99,EUR,Monthly plan
2024-01-06,ACME Payroll,2500.00,,Salary
,,,,
";
        let txs = parse_csv(data.as_bytes(), "usd").unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].merchant_name, "NETFLIX.COM");
        assert_eq!(txs[0].amount, -15.99);
        assert_eq!(txs[0].currency, "EUR");
        assert_eq!(txs[0].description.as_deref(), Some("Monthly plan"));
        assert_eq!(txs[1].currency, "USD");
    }

    #[test]
    fn test_parse_csv_description_as_merchant() {
        let data = "date,description,amount\n01/15/2024,SPOTIFY P1234,-9.99\n";
        let txs = parse_csv(data.as_bytes(), "EUR").unwrap();
        assert_eq!(txs[0].merchant_name, "SPOTIFY P1234");
        assert_eq!(txs[0].description, None);
    }

    #[test]
    fn test_parse_csv_reports_line_number() {
        let data = "date,merchant,amount\n2024-01-05,Netflix,-15.99\n2024-13-45,Netflix,-15.99\n";
        match parse_csv(data.as_bytes(), "EUR") {
            Err(Error::Import(msg)) => assert!(msg.contains("Line 3"), "{}", msg),
            other => panic!("expected import error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_csv_missing_column() {
        let data = "when,who,how much\n2024-01-05,Netflix,-15.99\n";
        assert!(matches!(parse_csv(data.as_bytes(), "EUR"), Err(Error::Import(_))));
    }

    #[test]
    fn test_generate_hash_distinguishes_external_id() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let a = generate_hash(&d, "Netflix", -15.99, "EUR", None);
        let b = generate_hash(&d, "Netflix", -15.99, "eur", None);
        let c = generate_hash(&d, "Netflix", -15.99, "EUR", Some("tx-1"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_ingest_skips_duplicates() {
        let db = Database::in_memory().unwrap();
        let user = db.create_user("ingest@example.com", None).unwrap();
        let data = "date,merchant,amount\n2024-01-05,Netflix,-15.99\n2024-02-05,Netflix,-15.99\n";
        let txs = parse_csv(data.as_bytes(), "EUR").unwrap();

        let first = ingest_transactions(&db, user.id, None, &txs).unwrap();
        assert_eq!(first.inserted, 2);

        let second = ingest_transactions(&db, user.id, None, &txs).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(db.count_bank_transactions(user.id).unwrap(), 2);
    }

    #[test]
    fn test_parse_csv_rejects_bad_currency() {
        let data = "\
date,merchant,amount,currency
2024-01-05,Netflix,-15.99,EUR
2024-02-05,Netflix,-15.99,eur
2024-03-05,Netflix,-15.99,EURO
";
        match parse_csv(data.as_bytes(), "EUR") {
            Err(Error::Import(msg)) => {
                assert!(msg.contains("Line 4"), "{}", msg);
                assert!(msg.contains("EURO"), "{}", msg);
            }
            other => panic!("expected import error, got {:?}", other),
        }
        assert!(matches!(parse_csv("date,merchant,amount\n".as_bytes(), "E1R"), Ok(v) if v.is_empty()));
        assert!(parse_csv("date,merchant,amount\n2024-01-05,Netflix,-1\n".as_bytes(), "E1R").is_err());
    }

    #[test]
    fn test_failed_ingest_stores_nothing() {
        let db = Database::in_memory().unwrap();
        let user = db.create_user("atomic@example.com", None).unwrap();
        let data = "date,merchant,amount\n2024-01-05,Netflix,-15.99\n2024-02-05,Netflix,-15.99\n";
        let mut txs = parse_csv(data.as_bytes(), "EUR").unwrap();
        let mut bad = txs[1].clone();
        bad.booking_date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        bad.currency = "EURO".to_string();
        txs.push(bad);

        assert!(matches!(
            ingest_transactions(&db, user.id, None, &txs),
            Err(Error::InvalidData(_))
        ));
        assert_eq!(db.count_bank_transactions(user.id).unwrap(), 0);
    }
}
