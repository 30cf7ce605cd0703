//! Exercises the file-reading path `matiriac`'s `run`/`check` subcommands
//! sit on top of, since `RunConfig::source_path` is meant to point at a
//! real file on disk rather than an in-memory string.

use std::io::Write;

use matiriac::config::RunConfig;

#[test]
fn run_config_reads_a_real_source_file_end_to_end() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "fn main() -> Int {{ return 6 * 7; }}").unwrap();

    let source = std::fs::read_to_string(file.path()).unwrap();
    let config = RunConfig::new(file.path());
    let result = matiriac::run(&source, &config).unwrap();
    assert_eq!(result, matiria_runtime::Value::Int(42));
}

#[test]
fn check_reports_a_parse_error_from_a_real_source_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "fn main( -> Int {{ return 1; }}").unwrap();

    let source = std::fs::read_to_string(file.path()).unwrap();
    assert!(matiriac::check(&source).is_err());
}
