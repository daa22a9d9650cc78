use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::{CaseId, DisputeOutcome, ProviderId, SettlementOutcome, WalletSnapshot};
use crate::Amount;

/// Errors that can occur when reading commands or writing snapshots
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized event type '{kind}'")]
    UnrecognizedType { line: usize, kind: String },

    #[error("line {line}: {kind} missing amount")]
    MissingAmount { line: usize, kind: String },

    #[error("line {line}: {kind} missing {field}")]
    MissingField {
        line: usize,
        kind: String,
        field: &'static str,
    },

    #[error("line {line}: advance of {days} days is out of range")]
    InvalidDuration { line: usize, days: f64 },

    #[error("failed to write snapshot: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush output: {0}")]
    Flush(#[from] io::Error),
}

/// One replayable row.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Register a bank account; the provider's first one becomes the payout default.
    RegisterMethod { provider: ProviderId, account: String },
    Earning {
        provider: ProviderId,
        case: CaseId,
        gross: Amount,
    },
    /// Move the replay clock forward.
    Advance(Duration),
    /// Clear due earnings and expire stale payouts.
    Sweep,
    OpenDispute { provider: ProviderId, case: CaseId },
    ResolveDispute {
        provider: ProviderId,
        case: CaseId,
        outcome: DisputeOutcome,
    },
    /// Request and dispatch a payout to the provider's default method.
    Payout {
        provider: ProviderId,
        label: String,
        amount: Amount,
    },
    Settle {
        provider: ProviderId,
        label: String,
        outcome: SettlementOutcome,
    },
    Cancel { provider: ProviderId, label: String },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    provider: Option<String>,
    reference: Option<String>,
    amount: Option<f64>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    provider: ProviderId,
    available: String,
    pending: String,
    escrow: String,
    total_earned: String,
    total_withdrawn: String,
}

/// Read commands from a csv file with columns `type,provider,reference,amount`
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

/// Longest single clock step a replay may take.
const MAX_ADVANCE_DAYS: f64 = 36_500.0;

fn days(line: usize, days: f64) -> Result<Duration, CsvError> {
    if !(0.0..=MAX_ADVANCE_DAYS).contains(&days) {
        return Err(CsvError::InvalidDuration { line, days });
    }
    Duration::try_seconds((days * 86_400.0).round() as i64)
        .ok_or(CsvError::InvalidDuration { line, days })
}

fn parse_row(line: usize, row: InputRow) -> Result<Command, CsvError> {
    let kind = row.r#type.to_ascii_lowercase();

    let field = |value: Option<String>, field: &'static str| {
        value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CsvError::MissingField {
                line,
                kind: kind.clone(),
                field,
            })
    };
    let amount = |value: Option<f64>| {
        value.ok_or_else(|| CsvError::MissingAmount {
            line,
            kind: kind.clone(),
        })
    };

    let command = match kind.as_str() {
        "method" => Command::RegisterMethod {
            provider: field(row.provider, "provider")?,
            account: field(row.reference, "reference")?,
        },
        "earning" => Command::Earning {
            provider: field(row.provider, "provider")?,
            case: field(row.reference, "reference")?,
            gross: Amount::from_float(amount(row.amount)?),
        },
        "advance" => Command::Advance(days(line, amount(row.amount)?)?),
        "sweep" => Command::Sweep,
        "dispute" => Command::OpenDispute {
            provider: field(row.provider, "provider")?,
            case: field(row.reference, "reference")?,
        },
        "release" | "refund" => Command::ResolveDispute {
            provider: field(row.provider, "provider")?,
            case: field(row.reference, "reference")?,
            outcome: if kind == "release" {
                DisputeOutcome::Release
            } else {
                DisputeOutcome::Refund
            },
        },
        "payout" => Command::Payout {
            provider: field(row.provider, "provider")?,
            label: field(row.reference, "reference")?,
            amount: Amount::from_float(amount(row.amount)?),
        },
        "settle" | "fail" => Command::Settle {
            provider: field(row.provider, "provider")?,
            label: field(row.reference, "reference")?,
            outcome: if kind == "settle" {
                SettlementOutcome::Completed
            } else {
                SettlementOutcome::Failed {
                    reason: "reported by gateway".to_string(),
                }
            },
        },
        "cancel" => Command::Cancel {
            provider: field(row.provider, "provider")?,
            label: field(row.reference, "reference")?,
        },
        _ => {
            return Err(CsvError::UnrecognizedType {
                line,
                kind: kind.clone(),
            });
        }
    };
    Ok(command)
}

/// Write wallet snapshots in csv format
pub fn write_snapshots(
    snapshots: impl IntoIterator<Item = WalletSnapshot>,
    out: impl io::Write,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for snapshot in snapshots {
        writer.serialize(OutputRow {
            available: snapshot.available.to_string(),
            pending: snapshot.pending.to_string(),
            escrow: snapshot.escrow.to_string(),
            total_earned: snapshot.total_earned.to_string(),
            total_withdrawn: snapshot.total_withdrawn.to_string(),
            provider: snapshot.provider,
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "type,provider,reference,amount\n";

    fn write_csv(rows: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        file.write_all(rows.as_bytes()).unwrap();
        file
    }

    fn read(rows: &str) -> Vec<Result<Command, CsvError>> {
        let file = write_csv(rows);
        read_commands(file.path()).unwrap().collect()
    }

    #[test]
    fn read_earning() {
        let results = read("earning,alice,case-1,10000\n");
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].as_ref().unwrap(),
            &Command::Earning {
                provider: "alice".into(),
                case: "case-1".into(),
                gross: Amount::from_units(10_000),
            }
        );
    }

    #[test]
    fn read_advance_in_days() {
        let results = read("advance,,,1.5\n");
        assert_eq!(
            results[0].as_ref().unwrap(),
            &Command::Advance(Duration::hours(36))
        );
    }

    #[test]
    fn advance_out_of_range_is_rejected() {
        let results = read("advance,,,1e15\nadvance,,,-3\nadvance,,,NaN\nadvance,,,7\n");
        assert_eq!(results.len(), 4);
        for (result, line) in results.iter().take(3).zip(2..) {
            match result {
                Err(CsvError::InvalidDuration { line: l, .. }) => assert_eq!(*l, line),
                other => panic!("expected out of range advance, got {other:?}"),
            }
        }
        assert_eq!(
            results[3].as_ref().unwrap(),
            &Command::Advance(Duration::days(7))
        );
        assert!(results[0].as_ref().unwrap_err().to_string().contains("out of range"));
    }

    #[test]
    fn read_settlement_outcomes() {
        let results = read("settle,alice,w1,\nfail,alice,w2,\n");
        assert!(matches!(
            results[0].as_ref().unwrap(),
            Command::Settle { outcome: SettlementOutcome::Completed, .. }
        ));
        assert!(matches!(
            results[1].as_ref().unwrap(),
            Command::Settle { outcome: SettlementOutcome::Failed { .. }, label, .. } if label == "w2"
        ));
    }

    #[test]
    fn read_with_whitespace() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "type, provider, reference, amount\n earning , alice , case-1 , 10.5\n",
        )
        .unwrap();
        let results: Vec<_> = read_commands(file.path()).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn read_returns_error_for_unknown_type() {
        let results = read("bogus,alice,x,1\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedType { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_amount() {
        let results = read("earning,alice,case-1,\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::MissingAmount { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_provider() {
        let results = read("sweep,,,\npayout,,w1,1000\n");
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert!(matches!(
            err,
            CsvError::MissingField { line: 3, field: "provider", .. }
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            read_commands("/nonexistent/events.csv"),
            Err(CsvError::Open { .. })
        ));
    }

    #[test]
    fn write_snapshot_rows() {
        let snapshot = WalletSnapshot {
            available: Amount::from_units(3_500),
            pending: Amount::from_units(850),
            total_earned: Amount::from_units(9_350),
            total_withdrawn: Amount::from_units(5_000),
            ..WalletSnapshot::empty("alice".into())
        };

        let mut out = Vec::new();
        write_snapshots([snapshot], &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "provider,available,pending,escrow,total_earned,total_withdrawn",
                "alice,3500.00,850.00,0.00,9350.00,5000.00",
            ]
        );
    }
}
