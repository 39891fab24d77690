use assert_cmd::Command;
use predicates::prelude::*;

fn clipper() -> Command {
    Command::cargo_bin("clipper").unwrap()
}

#[test]
fn test_help_lists_commands() {
    clipper()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_process_help_documents_output_options() {
    clipper()
        .args(["process", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-dir"))
        .stdout(predicate::str::contains("--best-effort"));
}

#[test]
fn test_missing_input_reports_upload_stage() {
    let dir = tempfile::tempdir().unwrap();

    clipper()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["process", "does-not-exist.mp4", "--quiet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(r#""stage":"upload""#));
}

#[test]
fn test_empty_stdin_reports_no_data() {
    let dir = tempfile::tempdir().unwrap();

    clipper()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["process", "-", "--quiet"])
        .write_stdin(Vec::<u8>::new())
        .assert()
        .failure()
        .stderr(predicate::str::contains("No video data received"))
        .stderr(predicate::str::contains(r#""stage":"upload""#));
}

#[test]
fn test_empty_video_file_reports_no_data() {
    let dir = tempfile::tempdir().unwrap();
    fs_err::write(dir.path().join("empty.mp4"), b"").unwrap();

    clipper()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["process", "empty.mp4", "--quiet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No video data received"))
        .stderr(predicate::str::contains(r#""stage":"upload""#));
}

#[test]
fn test_oversized_upload_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    fs_err::write(
        dir.path().join("config.yaml"),
        "pipeline:\n  max_upload_bytes: 16\n",
    )
    .unwrap();
    fs_err::write(dir.path().join("big.mp4"), vec![0u8; 64]).unwrap();

    clipper()
        .current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["process", "big.mp4", "--quiet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exceeds the 16 B limit"));
}

#[test]
fn test_unknown_command_fails() {
    clipper().arg("frobnicate").assert().failure();
}
