use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/input/issues.json")
}

#[test]
fn renders_svg_from_saved_records() -> Result<(), Box<dyn std::error::Error>> {
    let fixture = fixture();
    assert!(fixture.exists(), "fixture records should exist");

    let tmp = tempdir()?;
    let output_path = tmp.path().join("map.svg");

    let mut cmd = Command::cargo_bin("issuemap")?;
    cmd.arg("render")
        .arg("--input")
        .arg(&fixture)
        .arg("--output")
        .arg(&output_path);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("diagram"));

    let svg_contents = fs::read_to_string(&output_path)?;
    assert!(
        svg_contents.contains("<svg"),
        "output should contain an <svg> element"
    );
    assert!(svg_contents.contains("Rotate certificates"));

    Ok(())
}

#[test]
fn renders_from_stdin_to_stdout() -> Result<(), Box<dyn std::error::Error>> {
    let records = fs::read_to_string(fixture())?;

    let mut cmd = Command::cargo_bin("issuemap")?;
    cmd.arg("render")
        .arg("-i")
        .arg("-")
        .arg("--no-controls")
        .write_stdin(records);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("<svg"))
        .stdout(predicate::str::contains("class=\"connector\"").not());

    Ok(())
}

#[test]
fn status_filter_greys_out_context_nodes() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("issuemap")?;
    cmd.arg("render")
        .arg("-i")
        .arg(fixture())
        .arg("-o")
        .arg("-")
        .arg("--status")
        .arg("Done");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Tax rules"))
        .stdout(predicate::str::contains("Invoice PDF export").not())
        .stdout(predicate::str::contains("opacity=\"0.45\""));

    Ok(())
}

#[test]
fn collapsing_hides_descendants() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("issuemap")?;
    cmd.arg("render")
        .arg("-i")
        .arg(fixture())
        .arg("-o")
        .arg("-")
        .arg("--collapse")
        .arg("iss-1");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("data-id=\"iss-1\""))
        .stdout(predicate::str::contains("data-id=\"iss-2\"").not());

    Ok(())
}

#[test]
fn missing_input_file_fails() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("issuemap")?;
    cmd.arg("render").arg("-i").arg("does-not-exist.json");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));

    Ok(())
}

#[test]
fn unknown_collapse_target_fails() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("issuemap")?;
    cmd.arg("render")
        .arg("-i")
        .arg(fixture())
        .arg("-o")
        .arg("-")
        .arg("--collapse")
        .arg("nope");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot collapse 'nope'"));

    Ok(())
}
