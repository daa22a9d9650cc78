use std::process::Command;

const HEADER: &str = "provider,available,pending,escrow,total_earned,total_withdrawn";

fn run(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_payout-ledger"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn valid_events() {
    let (stdout, stderr, success) = run(&["tests/fixtures/valid.csv"]);

    assert!(success);
    assert!(stderr.is_empty(), "unexpected warnings: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "alice,3500.00,850.00,0.00,9350.00,5000.00");
    assert_eq!(lines[2], "bob,1700.00,0.00,0.00,1700.00,0.00");
    assert_eq!(lines[3], "carol,0.00,0.00,0.00,2550.00,0.00");
    assert_eq!(lines.len(), 4);
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run(&["tests/fixtures/with_errors.csv"]);

    assert!(success);
    assert!(stderr.contains("unrecognized event type"));
    assert!(stderr.contains("missing amount"));
    assert!(stderr.contains("advance of 1000000000000000 days is out of range"));
    assert!(stderr.contains("advance of -3 days is out of range"));
    assert!(stderr.contains("minimum withdrawal is 1000.00"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "alice,8500.00,0.00,0.00,8500.00,0.00");
}

#[test]
fn config_file_changes_business_rules() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(
        &mut config,
        b"minimum_payout: 100.0\nplatform_fee_rate: 0.10\nholding_period_days: 7\n",
    )
    .unwrap();
    let config_path = config.path().to_str().unwrap().to_string();

    let (stdout, stderr, success) = run(&["tests/fixtures/with_errors.csv", &config_path]);

    assert!(success);
    assert!(!stderr.contains("minimum withdrawal"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[1], "alice,8500.00,0.00,0.00,9000.00,0.00");
}

#[test]
fn missing_arguments_print_usage() {
    let (_, stderr, success) = run(&[]);

    assert!(!success);
    assert!(stderr.contains("usage: payout-ledger"));
}
