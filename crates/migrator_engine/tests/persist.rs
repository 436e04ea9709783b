use std::fs;

use migrator_engine::{ensure_output_dir, AtomicFileWriter};
use tempfile::TempDir;

#[test]
fn creates_missing_directory() {
    let temp = TempDir::new().unwrap();
    let nested = temp.path().join("attachments").join("png");
    assert!(!nested.exists());
    ensure_output_dir(&nested).unwrap();
    assert!(nested.is_dir());
}

#[test]
fn rejects_a_file_where_a_directory_is_expected() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("taken");
    fs::write(&file, "x").unwrap();
    assert!(ensure_output_dir(&file).is_err());
}

#[test]
fn write_replaces_previous_contents() {
    let temp = TempDir::new().unwrap();
    let target = temp.path().join("progress.json");
    let writer = AtomicFileWriter::new(&target);

    writer.write(b"first").unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "first");

    writer.write(b"second").unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "second");

    let leftovers: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, vec![std::ffi::OsString::from("progress.json")]);
}

#[test]
fn failed_write_leaves_no_file_behind() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("not_a_dir");
    fs::write(&blocker, "x").unwrap();

    let writer = AtomicFileWriter::new(blocker.join("progress.json"));
    assert!(writer.write(b"data").is_err());
    assert_eq!(fs::read_to_string(&blocker).unwrap(), "x");
}
