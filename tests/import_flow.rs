// End-to-end: statement file on disk -> database file -> re-import

use statement_ledger::db::{count_holders, count_transactions, list_holders, list_import_runs};
use statement_ledger::{
    open_database, parse_file, run_import, ConflictPolicy, ImportOptions, StatementFormat,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const FEBRUARY: &str = concat!(
    "\"Konto\";\"Girokonto DE02120300000000202051\"\n",
    "\"\"\n",
    "\"Kontostand vom 29.02.2024:\";\"1.234,56 EUR\"\n",
    "\"\"\n",
    "\"Buchungstag\";\"Wertstellung\";\"Buchungstext\";\"Auftraggeber\";\"Empfänger\";\"Verwendungszweck\";\"Umsatztyp\";\"Betrag\";\"Gläubiger-ID\";\"Mandatsreferenz\";\"Kundenreferenz\"\n",
    "\"28.02.2024\";\"28.02.2024\";\"Gebucht\";\"ISSUER\";\"Bäckerei Schmidt\";\"Brötchen\";\"Kartenzahlung\";\"-3,50 €\";\"\";\"\";\"\"\n",
    "\"27.02.2024\";\"27.02.2024\";\"Gebucht\";\"ACME GmbH\";\"Max Mustermann\";\"Gehalt Februar\";\"Eingang\";\"2.500,00 €\";\"\";\"\";\"\"\n",
    "\"29.02.2024\";\"29.02.2024\";\"Vorgemerkt\";\"ISSUER\";\"Kiosk\";\"\";\"Kartenzahlung\";\"-1,00 €\";\"\";\"\";\"\"\n",
);

// Overlaps February by one row and adds one new payee
const MARCH: &str = concat!(
    "\"Konto\";\"Girokonto DE02120300000000202051\"\n",
    "\"\"\n",
    "\"Kontostand vom 05.03.2024:\";\"1.200,00 EUR\"\n",
    "\"\"\n",
    "\"Buchungstag\";\"Wertstellung\";\"Buchungstext\";\"Auftraggeber\";\"Empfänger\";\"Verwendungszweck\";\"Umsatztyp\";\"Betrag\";\"Gläubiger-ID\";\"Mandatsreferenz\";\"Kundenreferenz\"\n",
    "\"28.02.2024\";\"28.02.2024\";\"Gebucht\";\"ISSUER\";\"Bäckerei Schmidt\";\"Brötchen\";\"Kartenzahlung\";\"-3,50 €\";\"\";\"\";\"\"\n",
    "\"04.03.2024\";\"04.03.2024\";\"Gebucht\";\"ISSUER\";\"Stadtwerke\";\"Strom März\";\"Lastschrift\";\"-31,06 €\";\"DE98ZZZ09999999999\";\"M-123\";\"\"\n",
);

fn write_statement(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_import_reimport_and_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledger.db");
    let february = write_statement(dir.path(), "DE02120300000000202051.csv", FEBRUARY);
    let march = write_statement(dir.path(), "dkb-march.csv", MARCH);

    let mut conn = open_database(&db_path).unwrap();

    // First import
    let statement = parse_file(&february, None).unwrap();
    assert_eq!(statement.format, StatementFormat::Dkb);
    assert_eq!(statement.records.len(), 2);
    assert_eq!(statement.skipped.len(), 1);

    let first = run_import(&mut conn, &statement, &ImportOptions::default(), CancellationToken::new()).unwrap();
    let report = first.report.unwrap();
    assert_eq!(report.holders_created, 3);
    assert_eq!(report.transactions_created, 2);

    // Same file again creates nothing
    let again = run_import(&mut conn, &statement, &ImportOptions::default(), CancellationToken::new()).unwrap();
    let report = again.report.unwrap();
    assert_eq!(report.holders_created, 0);
    assert_eq!(report.transactions_created, 0);
    assert_eq!(again.plan.duplicates(), 2);

    // Overlapping statement only adds what is new
    let statement = parse_file(&march, Some(StatementFormat::Dkb)).unwrap();
    let overlap = run_import(&mut conn, &statement, &ImportOptions::default(), CancellationToken::new()).unwrap();
    let report = overlap.report.unwrap();
    assert_eq!(report.holders_created, 1);
    assert_eq!(report.transactions_created, 1);

    assert_eq!(count_holders(&conn).unwrap(), 4);
    assert_eq!(count_transactions(&conn).unwrap(), 3);
    assert_eq!(list_import_runs(&conn).unwrap().len(), 3);

    // The statement account is the only favorite and is listed first
    let holders = list_holders(&conn).unwrap();
    assert!(holders[0].descriptor.favorite);
    assert_eq!(holders[0].identifier().identifier, "DE02120300000000202051");
    assert!(holders[1..].iter().all(|h| !h.descriptor.favorite));
}

#[test]
fn test_dry_run_against_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledger.db");
    let february = write_statement(dir.path(), "dkb.csv", FEBRUARY);

    let statement = parse_file(&february, None).unwrap();
    let mut conn = open_database(&db_path).unwrap();

    let outcome = run_import(
        &mut conn,
        &statement,
        &ImportOptions::dry_run().with_conflict_policy(ConflictPolicy::Skip),
        CancellationToken::new(),
    )
    .unwrap();
    assert!(outcome.report.is_none());

    let document = serde_json::to_value(&outcome.plan).unwrap();
    let holders = document["holders"].as_array().unwrap();
    let identifiers: Vec<&str> = holders
        .iter()
        .map(|h| h["identifier"].as_str().unwrap())
        .collect();
    assert_eq!(identifiers, vec!["Bäckerei Schmidt", "ACME GmbH", "DE02120300000000202051"]);
    assert_eq!(document["transactions"].as_array().unwrap().len(), 2);

    // Nothing reached the file
    drop(conn);
    let conn = open_database(&db_path).unwrap();
    assert_eq!(count_holders(&conn).unwrap(), 0);
}

#[test]
fn test_unknown_file_name_needs_explicit_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_statement(dir.path(), "export.csv", FEBRUARY);

    assert!(parse_file(&path, None).is_err());
    assert!(parse_file(&path, Some(StatementFormat::Dkb)).is_ok());
}
