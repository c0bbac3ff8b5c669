// 🏦 DKB (Deutsche Kreditbank) CSV export
//
// Layout:
//   "Konto";"Girokonto DE02120300000000202051"
//   ""
//   "Kontostand vom 29.02.2024:";"1.234,56 EUR"
//   ""
//   <column names>
//   <rows, ';'-separated, 11 fields>
//
// Row fields: booking date, value date, status, payer, payee, purpose,
// transaction type, amount, creditor id, mandate reference, customer reference.

use super::{ParsedStatement, SkippedRow, StatementFormat, StatementHeader, StatementParser, StatementRecord};
use crate::data::RawData;
use crate::model::{HolderDescriptor, HolderIdentifier, TransactionBody};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

const FIELDS_PER_ROW: usize = 11;
const HEADER_LINES: usize = 5;

/// Status of rows that are not booked yet. Their content may still change, so
/// importing them would create a transaction that never matches again.
const PENDING_STATUS: &str = "Vorgemerkt";

pub const ACCOUNT_HOLDER_TYPE: &str = "iban";
pub const PAYER_HOLDER_TYPE: &str = "dkb/payer";
pub const PAYEE_HOLDER_TYPE: &str = "dkb/payee";

// ============================================================================
// HEADER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    holder_type: String,
    iban: String,
}

impl Account {
    fn identifier(&self) -> HolderIdentifier {
        HolderIdentifier::new(ACCOUNT_HOLDER_TYPE, self.iban.clone())
    }

    /// The statement owner's account. Favorite, since it is "us".
    fn holder(&self) -> Result<HolderDescriptor> {
        let data = RawData::from_serializable(self).context("serialize account info")?;
        Ok(
            HolderDescriptor::new(self.identifier(), format!("{} {}", self.holder_type, self.iban))
                .favorite()
                .with_data(data),
        )
    }
}

struct HeaderPatterns {
    first_line: Regex,
    third_line: Regex,
}

impl HeaderPatterns {
    fn new() -> Result<Self> {
        Ok(HeaderPatterns {
            // "Konto";"<holder type> <iban>"
            first_line: Regex::new(r#""Konto";"(.+) (.+)""#)?,
            // "Kontostand vom <date>:";"<balance> EUR"
            third_line: Regex::new(r#""Kontostand vom (.+):";"(.+) EUR""#)?,
        })
    }

    fn parse_first_line(&self, line: &str) -> Result<Account> {
        let captures = self
            .first_line
            .captures(line)
            .ok_or_else(|| anyhow!("1st line does not match the account pattern"))?;

        let holder_type = captures[1].trim();
        if holder_type.is_empty() {
            bail!("holder type is empty");
        }
        let iban = captures[2].trim();
        if iban.is_empty() {
            bail!("iban is empty");
        }

        Ok(Account {
            holder_type: holder_type.to_string(),
            iban: iban.to_string(),
        })
    }

    fn parse_third_line(&self, line: &str) -> Result<(NaiveDate, i64)> {
        let captures = self
            .third_line
            .captures(line)
            .ok_or_else(|| anyhow!("3rd line does not match the balance pattern"))?;

        let date = parse_date(&captures[1]).context("parse balance date")?;
        let balance = parse_amount_in_cents(&captures[2]).context("parse balance")?;
        Ok((date, balance))
    }
}

fn expect_empty_quotes(line: &str, ordinal: &str) -> Result<()> {
    if line.trim() != r#""""# {
        bail!("{} line should be two quotes", ordinal);
    }
    Ok(())
}

// ============================================================================
// ROWS
// ============================================================================

/// A booked statement row. Serialized as the transaction's provenance data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct DkbRow {
    booking_date: NaiveDate,
    value_date: NaiveDate,
    status: String,
    payer: String,
    payee: String,
    purpose: String,
    transaction_type: String,
    amount_in_cents: i64,
    creditor_id: String,
    mandate_reference: String,
    customer_reference: String,
}

fn parse_row(record: &csv::StringRecord) -> Result<DkbRow> {
    if record.len() != FIELDS_PER_ROW {
        bail!("row has {} fields, expected {}", record.len(), FIELDS_PER_ROW);
    }

    let field = |i: usize| record.get(i).unwrap_or("").to_string();

    let status = field(2).trim().to_string();
    if status == PENDING_STATUS {
        bail!("row is not yet booked");
    }

    Ok(DkbRow {
        booking_date: parse_date(&field(0)).context("parse booking date")?,
        value_date: parse_date(&field(1)).context("parse value date")?,
        status,
        payer: field(3),
        payee: field(4),
        purpose: field(5),
        transaction_type: field(6),
        amount_in_cents: parse_amount_in_cents(&field(7)).context("parse amount")?,
        creditor_id: field(8),
        mandate_reference: field(9),
        customer_reference: field(10),
    })
}

/// `dd.mm.yyyy` or `dd.mm.yy`
fn parse_date(text: &str) -> Result<NaiveDate> {
    let text = text.trim();
    let format = if text.len() == 8 { "%d.%m.%y" } else { "%d.%m.%Y" };
    NaiveDate::parse_from_str(text, format)
        .with_context(|| format!("invalid date {:?}", text))
}

/// German amount notation to signed cents: `-1.234,56 €` -> -123456
fn parse_amount_in_cents(text: &str) -> Result<i64> {
    let cleaned = text
        .trim()
        .trim_end_matches('€')
        .trim_end()
        .trim_end_matches("EUR")
        .trim()
        .replace('.', "");

    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };

    let (whole, fraction) = digits.split_once(',').unwrap_or((digits, ""));
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        bail!("invalid amount {:?}", text);
    }
    if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        bail!("invalid amount {:?}", text);
    }

    let whole: i64 = whole.parse().with_context(|| format!("invalid amount {:?}", text))?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>()? * 10,
        _ => fraction.parse::<i64>()?,
    };

    let cents = whole
        .checked_mul(100)
        .and_then(|c| c.checked_add(fraction))
        .ok_or_else(|| anyhow!("amount out of range {:?}", text))?;

    Ok(if negative { -cents } else { cents })
}

// ============================================================================
// RECORD
// ============================================================================

/// One row plus the statement's account. Negative amounts leave the account
/// towards the payee; everything else arrives from the payer.
struct DkbRecord {
    row: DkbRow,
    data: RawData,
    account: Arc<HolderDescriptor>,
}

impl DkbRecord {
    fn is_outgoing(&self) -> bool {
        self.row.amount_in_cents < 0
    }

    fn counterparty(&self, kind: &str, name: &str) -> HolderDescriptor {
        HolderDescriptor::new(HolderIdentifier::new(kind, name), name)
    }
}

impl StatementRecord for DkbRecord {
    fn transaction(&self) -> TransactionBody {
        TransactionBody::new(
            self.row.amount_in_cents.unsigned_abs(),
            self.row.value_date.and_time(NaiveTime::MIN).and_utc(),
        )
        .with_data(self.data.clone())
    }

    fn from_holder(&self) -> HolderDescriptor {
        if self.is_outgoing() {
            return self.account.as_ref().clone();
        }
        self.counterparty(PAYER_HOLDER_TYPE, &self.row.payer)
    }

    fn to_holder(&self) -> HolderDescriptor {
        if self.is_outgoing() {
            return self.counterparty(PAYEE_HOLDER_TYPE, &self.row.payee);
        }
        self.account.as_ref().clone()
    }
}

// ============================================================================
// PARSER
// ============================================================================

pub struct DkbParser;

impl DkbParser {
    pub fn new() -> Self {
        DkbParser
    }
}

impl Default for DkbParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementParser for DkbParser {
    fn parse(&self, bytes: &[u8], source: &str) -> Result<ParsedStatement> {
        let text = String::from_utf8_lossy(bytes);
        let patterns = HeaderPatterns::new()?;

        let mut lines = text.splitn(HEADER_LINES + 1, '\n');
        let mut next_line = |ordinal: &str| {
            lines
                .next()
                .map(|line| line.trim_end_matches('\r'))
                .ok_or_else(|| anyhow!("missing {} line", ordinal))
        };

        let account = patterns
            .parse_first_line(next_line("1st")?)
            .context("parse 1st line")?;
        expect_empty_quotes(next_line("2nd")?, "2nd")?;
        let (balance_date, balance_in_cents) = patterns
            .parse_third_line(next_line("3rd")?)
            .context("parse 3rd line")?;
        expect_empty_quotes(next_line("4th")?, "4th")?;
        // 5th line holds the column names
        next_line("5th")?;
        let body = lines.next().unwrap_or("");

        let account_holder = Arc::new(account.holder()?);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_reader(body.as_bytes());

        let mut records: Vec<Box<dyn StatementRecord>> = Vec::new();
        let mut skipped = Vec::new();

        for result in reader.records() {
            let record = result.with_context(|| format!("Failed to read CSV row in {}", source))?;
            // Blank lines and quoted line breaks make rows and lines diverge
            let line = record.position().map_or(0, |p| p.line() as usize) + HEADER_LINES;

            let row = match parse_row(&record) {
                Ok(row) => row,
                Err(e) => {
                    warn!(line, source, reason = %format!("{:#}", e), "skipping statement row");
                    skipped.push(SkippedRow {
                        line,
                        reason: format!("{:#}", e),
                    });
                    continue;
                }
            };

            let data = RawData::from_serializable(&row)
                .with_context(|| format!("serialize row {} in {}", line, source))?;

            records.push(Box::new(DkbRecord {
                row,
                data,
                account: Arc::clone(&account_holder),
            }));
        }

        debug!(
            source,
            iban = %account.iban,
            records = records.len(),
            skipped = skipped.len(),
            "parsed DKB statement"
        );

        Ok(ParsedStatement {
            source: source.to_string(),
            format: StatementFormat::Dkb,
            header: Some(StatementHeader {
                account: account.identifier(),
                balance_date,
                balance_in_cents,
            }),
            records,
            skipped,
        })
    }

    fn format(&self) -> StatementFormat {
        StatementFormat::Dkb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const SAMPLE: &str = concat!(
        "\"Konto\";\"Girokonto DE02120300000000202051\"\n",
        "\"\"\n",
        "\"Kontostand vom 29.02.2024:\";\"1.234,56 EUR\"\n",
        "\"\"\n",
        "\"Buchungstag\";\"Wertstellung\";\"Buchungstext\";\"Auftraggeber\";\"Empfänger\";\"Verwendungszweck\";\"Umsatztyp\";\"Betrag\";\"Gläubiger-ID\";\"Mandatsreferenz\";\"Kundenreferenz\"\n",
        "\"28.02.2024\";\"28.02.2024\";\"Gebucht\";\"ISSUER\";\"Bäckerei Schmidt\";\"Brötchen\";\"Kartenzahlung\";\"-3,50 €\";\"\";\"\";\"\"\n",
        "\"27.02.24\";\"27.02.24\";\"Gebucht\";\"ACME GmbH\";\"Max Mustermann\";\"Gehalt Februar\";\"Eingang\";\"2.500,00 €\";\"\";\"\";\"\"\n",
        "\"29.02.2024\";\"29.02.2024\";\"Vorgemerkt\";\"ISSUER\";\"Kiosk\";\"\";\"Kartenzahlung\";\"-1,00 €\";\"\";\"\";\"\"\n",
        "\"31.02.2024\";\"31.02.2024\";\"Gebucht\";\"ISSUER\";\"Kiosk\";\"\";\"Kartenzahlung\";\"-1,00 €\";\"\";\"\";\"\"\n",
        "\"26.02.2024\";\"26.02.2024\";\"Gebucht\";\"too few fields\"\n",
    );

    fn account_identifier() -> HolderIdentifier {
        HolderIdentifier::new("iban", "DE02120300000000202051")
    }

    #[test]
    fn test_parse_first_line() {
        let patterns = HeaderPatterns::new().unwrap();
        let cases = [
            (
                "valid",
                r#""Konto";"Girokonto DE12345678901234567890""#,
                "Girokonto",
                "DE12345678901234567890",
            ),
            (
                "extra stuff but still valid",
                r#"HEHEHEJKHJK"Konto";"Tagesgeldkonto DE12345678901234567890"\n"#,
                "Tagesgeldkonto",
                "DE12345678901234567890",
            ),
        ];

        for (name, line, holder_type, iban) in cases {
            let account = patterns.parse_first_line(line).unwrap();
            assert_eq!(account.holder_type, holder_type, "case: {}", name);
            assert_eq!(account.iban, iban, "case: {}", name);
        }
    }

    #[test]
    fn test_parse_first_line_rejects_other_lines() {
        let patterns = HeaderPatterns::new().unwrap();
        assert!(patterns.parse_first_line(r#""Konto";"Girokonto""#).is_err());
        assert!(patterns.parse_first_line(r#""Kontostand vom 01.01.2024:";"1,00 EUR""#).is_err());
    }

    #[test]
    fn test_parse_third_line() {
        let patterns = HeaderPatterns::new().unwrap();
        let (date, balance) = patterns
            .parse_third_line(r#""Kontostand vom 29.02.2024:";"-1.234,56 EUR""#)
            .unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(balance, -123456);
    }

    #[test]
    fn test_parse_amount_in_cents() {
        let cases = [
            ("1234,56 €", 123456),
            ("-1.234,56 €", -123456),
            ("2.500,00 €", 250000),
            ("-3,5", -350),
            ("12", 1200),
            ("+0,01 EUR", 1),
            ("1.000.000,00", 100_000_000),
        ];
        for (text, cents) in cases {
            assert_eq!(parse_amount_in_cents(text).unwrap(), cents, "amount: {}", text);
        }

        for text in ["", "€", "abc", "1,234", "1,2,3", "--5,00"] {
            assert!(parse_amount_in_cents(text).is_err(), "amount: {}", text);
        }
    }

    #[test]
    fn test_parse_date_both_year_widths() {
        let expected = NaiveDate::from_ymd_opt(2024, 2, 27).unwrap();
        assert_eq!(parse_date("27.02.2024").unwrap(), expected);
        assert_eq!(parse_date("27.02.24").unwrap(), expected);
        assert!(parse_date("2024-02-27").is_err());
        assert!(parse_date("31.02.2024").is_err());
    }

    #[test]
    fn test_parse_sample_statement() {
        let parsed = DkbParser::new().parse(SAMPLE.as_bytes(), "dkb.csv").unwrap();

        assert_eq!(parsed.format, StatementFormat::Dkb);
        assert_eq!(parsed.records.len(), 2);

        let header = parsed.header.unwrap();
        assert_eq!(header.account, account_identifier());
        assert_eq!(header.balance_in_cents, 123456);

        // pending row, impossible date, short row
        let skipped_lines: Vec<usize> = parsed.skipped.iter().map(|s| s.line).collect();
        assert_eq!(skipped_lines, vec![8, 9, 10]);
        assert!(parsed.skipped[0].reason.contains("not yet booked"));
    }

    #[test]
    fn test_outgoing_row_goes_from_account_to_payee() {
        let parsed = DkbParser::new().parse(SAMPLE.as_bytes(), "dkb.csv").unwrap();
        let record = &parsed.records[0];

        let from = record.from_holder();
        assert_eq!(from.identifier, account_identifier());
        assert!(from.favorite);
        assert_eq!(from.name, "Girokonto DE02120300000000202051");
        assert!(!from.data.is_absent());

        let to = record.to_holder();
        assert_eq!(to.identifier, HolderIdentifier::new("dkb/payee", "Bäckerei Schmidt"));
        assert!(!to.favorite);
        assert!(to.data.is_absent());

        let tx = record.transaction();
        assert_eq!(tx.amount, 350);
        assert_eq!(tx.timestamp, Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap());
        assert_eq!(tx.data.as_value().unwrap()["amountInCents"], -350);
        assert_eq!(tx.data.as_value().unwrap()["purpose"], "Brötchen");
    }

    #[test]
    fn test_incoming_row_goes_from_payer_to_account() {
        let parsed = DkbParser::new().parse(SAMPLE.as_bytes(), "dkb.csv").unwrap();
        let record = &parsed.records[1];

        assert_eq!(
            record.from_holder().identifier,
            HolderIdentifier::new("dkb/payer", "ACME GmbH")
        );
        assert_eq!(record.to_holder().identifier, account_identifier());
        assert_eq!(record.transaction().amount, 250000);
    }

    #[test]
    fn test_reparse_yields_equal_data() {
        let first = DkbParser::new().parse(SAMPLE.as_bytes(), "dkb.csv").unwrap();
        let second = DkbParser::new().parse(SAMPLE.as_bytes(), "dkb.csv").unwrap();
        assert_eq!(first.records[0].transaction(), second.records[0].transaction());
    }

    #[test]
    fn test_broken_header_is_fatal() {
        let broken = SAMPLE.replacen("\"\"\n", "\"x\"\n", 1);
        let err = DkbParser::new().parse(broken.as_bytes(), "dkb.csv").unwrap_err();
        assert!(err.to_string().contains("2nd line"));

        let truncated = "\"Konto\";\"Girokonto DE02\"\n\"\"";
        let err = DkbParser::new().parse(truncated.as_bytes(), "dkb.csv").unwrap_err();
        assert!(format!("{:#}", err).contains("missing 3rd line"));
    }

    #[test]
    fn test_skipped_line_counts_physical_lines() {
        let header: String = SAMPLE.lines().take(5).map(|l| format!("{}\n", l)).collect();
        let statement = format!(
            "{}{}{}{}{}",
            header,
            // line 6, purpose spans into line 7
            "\"28.02.2024\";\"28.02.2024\";\"Gebucht\";\"ISSUER\";\"Kiosk\";\"Zeitung\nund Kaffee\";\"Kartenzahlung\";\"-4,20 €\";\"\";\"\";\"\"\n",
            "\n",
            "\"31.02.2024\";\"31.02.2024\";\"Gebucht\";\"ISSUER\";\"Kiosk\";\"\";\"Kartenzahlung\";\"-1,00 €\";\"\";\"\";\"\"\n",
            "\"26.02.2024\";\"26.02.2024\";\"Gebucht\";\"too few fields\"\n",
        );

        let parsed = DkbParser::new().parse(statement.as_bytes(), "dkb.csv").unwrap();

        assert_eq!(parsed.records.len(), 1);
        let skipped_lines: Vec<usize> = parsed.skipped.iter().map(|s| s.line).collect();
        assert_eq!(skipped_lines, vec![9, 10]);
    }

    #[test]
    fn test_windows_line_endings() {
        let crlf = SAMPLE.replace('\n', "\r\n");
        let parsed = DkbParser::new().parse(crlf.as_bytes(), "dkb.csv").unwrap();
        assert_eq!(parsed.records.len(), 2);
    }
}
