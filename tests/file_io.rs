//! Loading database files from disk and running the dump tool on them

use nscd_dump::header::DEFAULT_MAX_DB_SIZE;
use nscd_dump::{
    Config, DatabaseFile, DbHeader, HostLookup, ImageBuilder, IntegrityError, NscdError,
    Reporter, RequestType, VerifyConfig, HEADER_SIZE,
};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::process::Command;
use tempfile::{NamedTempFile, TempDir};

fn write_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn sample_image() -> Vec<u8> {
    let host = HostLookup::new(
        "files.example",
        vec!["files".into()],
        vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))],
    );
    let mut builder = ImageBuilder::new(8).timestamp(1_600_000_000);
    builder.add_host(3, RequestType::GetHostByName, "files.example", &host).unwrap();
    builder.build()
}

fn run_cli(args: &[&str], path: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_nscd-dump"))
        .args(args)
        .arg(path)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

#[test]
fn test_empty_database_dumps_no_records() {
    let image = ImageBuilder::new(4).build();
    let file = write_file(&image);

    let db_file = DatabaseFile::open(file.path(), DEFAULT_MAX_DB_SIZE).unwrap();
    let db = db_file.verify(&VerifyConfig::default()).unwrap();

    let mut reporter = Reporter::new(Vec::new(), Vec::new(), false);
    let stats = reporter.dump(&db).unwrap();
    assert_eq!(stats.records, 0);
    assert_eq!(stats.skipped, 0);
}

#[test]
fn test_file_larger_than_header_claims() {
    // Trailing bytes past the data region are tolerated
    let mut image = sample_image();
    image.extend_from_slice(&[0u8; 512]);
    let file = write_file(&image);

    let db_file = DatabaseFile::open(file.path(), DEFAULT_MAX_DB_SIZE).unwrap();
    let db = db_file.verify(&VerifyConfig::default()).unwrap();
    assert_eq!(db.entries().len(), 1);
}

#[test]
fn test_header_size_mismatch() {
    let mut image = sample_image();
    let mut header = DbHeader::from_bytes(&image).unwrap();
    header.header_size = 96;
    image[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    let file = write_file(&image);

    assert!(matches!(
        DatabaseFile::open(file.path(), DEFAULT_MAX_DB_SIZE),
        Err(NscdError::HeaderSizeMismatch {
            expected: HEADER_SIZE,
            found: 96
        })
    ));
}

#[test]
fn test_future_timestamp_rejected() {
    let file = write_file(&sample_image());
    let db_file = DatabaseFile::open(file.path(), DEFAULT_MAX_DB_SIZE).unwrap();

    let config = VerifyConfig {
        now: Some(1_500_000_000),
        ..VerifyConfig::default()
    };
    assert!(matches!(
        db_file.verify(&config),
        Err(NscdError::Integrity(IntegrityError::FutureTimestamp { .. }))
    ));
}

#[test]
fn test_config_file_drives_verification() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("nscd-dump.toml");
    std::fs::write(
        &config_path,
        "[verify]\nnow = 1600000000\nfuture_tolerance_secs = 0\n",
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();
    let file = write_file(&sample_image());
    let db_file = DatabaseFile::open(file.path(), config.dump.max_db_size).unwrap();
    assert!(db_file.verify(&config.verify).is_ok());
}

#[test]
fn test_cli_text_output() {
    let file = write_file(&sample_image());
    let output = run_cli(&["--now", "1600000000"], file.path());

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with(&format!(
        "Database file \"{}\" validated\n",
        file.path().display()
    )));
    assert!(stdout.contains("Timestamp, UTC            : Sun Sep 13 12:26:40 2020\n"));
    assert!(stdout.contains("#1. Key: \"files.example\""));
    assert!(stdout.contains("  Aliases: \"files\"\n"));
}

#[test]
fn test_cli_json_output() {
    let file = write_file(&sample_image());
    let output = run_cli(&["--json", "--now", "1600000000"], file.path());

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["header"]["module"], 8);
    assert_eq!(value["records"].as_array().unwrap().len(), 1);
    assert_eq!(value["records"][0]["payload"]["name"], "files.example");
}

#[test]
fn test_cli_fails_on_corrupt_file() {
    let mut image = sample_image();
    let mut header = DbHeader::from_bytes(&image).unwrap();
    header.gc_cycle = 1;
    image[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    let file = write_file(&image);

    let output = run_cli(&["--now", "1600000000"], file.path());
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("is invalid"));
}
