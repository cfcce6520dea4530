use rotalog::meta::META_FILE_NAME;
use rotalog::{Options, RotatingWriter, RotalogError};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_reopen_resumes_same_file() {
    let temp_dir = TempDir::new().unwrap();

    let writer = RotatingWriter::open(Options::new(temp_dir.path())).unwrap();
    writer.write(b"before restart\n").unwrap();
    let active = writer.active_path().unwrap();
    writer.close().unwrap();

    let meta_path = temp_dir.path().join(META_FILE_NAME);
    let meta = fs::read_to_string(&meta_path).unwrap();
    let lines: Vec<&str> = meta.split('\n').collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], active.display().to_string());
    assert_eq!(lines[1], "15");

    let reopened = RotatingWriter::open(Options::new(temp_dir.path())).unwrap();
    assert_eq!(reopened.active_path().unwrap(), active);
    assert_eq!(reopened.bytes_written(), 15);
    assert!(!meta_path.exists());

    reopened.write(b"after restart\n").unwrap();
    reopened.close().unwrap();

    let content = fs::read_to_string(&active).unwrap();
    assert_eq!(content, "before restart\nafter restart\n");
}

#[test]
fn test_open_close_twice_keeps_active_name() {
    let temp_dir = TempDir::new().unwrap();

    let writer = RotatingWriter::open(Options::new(temp_dir.path())).unwrap();
    let first = writer.active_path().unwrap();
    writer.close().unwrap();

    let writer = RotatingWriter::open(Options::new(temp_dir.path())).unwrap();
    let second = writer.active_path().unwrap();
    writer.close().unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_resume_recreates_deleted_active_file() {
    let temp_dir = TempDir::new().unwrap();

    let writer = RotatingWriter::open(Options::new(temp_dir.path())).unwrap();
    writer.write(b"gone").unwrap();
    let active = writer.active_path().unwrap();
    writer.close().unwrap();

    fs::remove_file(&active).unwrap();

    let reopened = RotatingWriter::open(Options::new(temp_dir.path())).unwrap();
    assert_eq!(reopened.active_path().unwrap(), active);
    assert!(active.exists());
    reopened.close().unwrap();
}

#[test]
fn test_short_metadata_starts_fresh() {
    let temp_dir = TempDir::new().unwrap();
    let stale = temp_dir.path().join("stale.log");
    fs::write(
        temp_dir.path().join(META_FILE_NAME),
        format!("{}\n12", stale.display()),
    )
    .unwrap();

    let writer = RotatingWriter::open(Options::new(temp_dir.path())).unwrap();

    assert_ne!(writer.active_path().unwrap(), stale);
    assert_eq!(writer.bytes_written(), 0);
    assert!(!stale.exists());
    writer.close().unwrap();
}

#[test]
fn test_non_numeric_metadata_starts_fresh() {
    let temp_dir = TempDir::new().unwrap();
    let stale = temp_dir.path().join("stale.log");

    for body in [
        format!("{}\ntwelve\n1700000000000000000", stale.display()),
        format!("{}\n12\nyesterday", stale.display()),
    ] {
        fs::write(temp_dir.path().join(META_FILE_NAME), body).unwrap();

        let writer = RotatingWriter::open(Options::new(temp_dir.path())).unwrap();
        assert_ne!(writer.active_path().unwrap(), stale);
        assert_eq!(writer.bytes_written(), 0);
        writer.close().unwrap();

        // Leave no resumable state for the next iteration
        fs::remove_file(temp_dir.path().join(META_FILE_NAME)).unwrap();
    }
}

#[test]
fn test_unopenable_active_file_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let missing_dir = temp_dir.path().join("no-such-dir").join("a.log");
    fs::write(
        temp_dir.path().join(META_FILE_NAME),
        format!("{}\n1\n1", missing_dir.display()),
    )
    .unwrap();

    let result = RotatingWriter::open(Options::new(temp_dir.path()));
    assert!(matches!(result, Err(RotalogError::OpenFile { .. })));
}

#[test]
fn test_closed_writer_rejects_write_and_close() {
    let temp_dir = TempDir::new().unwrap();
    let writer = RotatingWriter::open(Options::new(temp_dir.path())).unwrap();
    let active = writer.active_path().unwrap();
    writer.close().unwrap();

    let meta_before = fs::read(temp_dir.path().join(META_FILE_NAME)).unwrap();

    let err = writer.write(b"late").unwrap_err();
    assert!(matches!(err, RotalogError::WriterClosed));
    assert!(writer.close().unwrap_err().is_closed());

    assert_eq!(fs::read(&active).unwrap(), b"");
    assert_eq!(
        fs::read(temp_dir.path().join(META_FILE_NAME)).unwrap(),
        meta_before
    );
}
