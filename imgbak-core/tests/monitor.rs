//! Supervises synthetic and real copy processes.
use imgbak_core::Error;
use imgbak_core::monitor::{CopyExit, StatusRow, Supervised, supervise};
use std::io::{self, Cursor, Write};

/// A finished process whose stderr is a fixed byte string.
struct FakeCopy {
    stream: Option<Cursor<Vec<u8>>>,
    exit: CopyExit,
}

impl FakeCopy {
    fn new(stream: &[u8], exit: CopyExit) -> Self {
        Self {
            stream: Some(Cursor::new(stream.to_vec())),
            exit,
        }
    }
}

impl Supervised for FakeCopy {
    type Diagnostics = Cursor<Vec<u8>>;

    fn take_diagnostics(&mut self) -> Option<Self::Diagnostics> {
        self.stream.take()
    }

    fn wait_exit(&mut self) -> io::Result<CopyExit> {
        Ok(self.exit)
    }
}

const TWO_LINES: &[u8] = b"1073741824 bytes (1.1 GB, 1.0 GiB) copied, 12 s, 89.5 MB/s\r\
2147483648 bytes (2.1 GB, 2.0 GiB) copied, 24 s, 89.5 MB/s\r";

#[test]
fn test_two_progress_lines_render_two_rows() {
    let mut image = tempfile::NamedTempFile::new().unwrap();
    image.write_all(&[0u8; 4096]).unwrap();

    let mut rows: Vec<StatusRow> = Vec::new();
    let report = supervise(
        FakeCopy::new(TWO_LINES, CopyExit::Code(0)),
        10_000_000_000,
        image.path(),
        |row| rows.push(row.clone()),
    )
    .expect("monitoring should succeed");

    assert_eq!(rows.len(), 2);
    assert_eq!(report.rows, 2);
    assert!(report.is_success());
    assert_eq!(report.artifact_bytes, Some(4096));

    assert_eq!(rows[0].copied_bytes, 1_073_741_824);
    assert_eq!(rows[0].elapsed_secs, 12);
    let predicted = rows[0].predicted_secs.unwrap();
    assert!((predicted - 111.8).abs() < 0.05);
    assert_eq!(rows[1].copied_bytes, 2_147_483_648);
    assert!(rows.iter().all(|r| r.target_bytes == 10_000_000_000));
}

#[test]
fn test_dd_framing_and_summary_are_ignored() {
    let stream = b"\r\r  \r1048576 bytes (1.0 MB, 1.0 MiB) copied, 1 s, 1.0 MB/s\r\n\
1+0 records in\n1+0 records out\n1048576 bytes (1.0 MB, 1.0 MiB) copied, 1.02 s, 1.0 MB/s\n";
    let mut count = 0;
    let report = supervise(
        FakeCopy::new(stream, CopyExit::Code(0)),
        1_048_576,
        std::path::Path::new("/nonexistent/image.img"),
        |_| count += 1,
    )
    .unwrap();

    assert_eq!(count, 1);
    assert_eq!(report.artifact_bytes, None);
}

#[test]
fn test_failed_copy_is_reported_not_raised() {
    let image = tempfile::NamedTempFile::new().unwrap();
    for exit in [CopyExit::Code(1), CopyExit::Unknown] {
        let report = supervise(FakeCopy::new(TWO_LINES, exit), 1, image.path(), |_| {}).unwrap();
        assert_eq!(report.exit, exit);
        assert!(!report.is_success());
    }
}

#[test]
fn test_malformed_line_aborts_after_draining() {
    let stream = b"1048576 bytes (1.0 MB, 1.0 MiB) copied, 1 s, 1.0 MB/s\r\
dd: error reading '/dev/sdb': Input/output error\r\
2097152 bytes (2.1 MB, 2.0 MiB) copied, 2 s, 1.0 MB/s\r";
    let image = tempfile::NamedTempFile::new().unwrap();
    let mut count = 0;
    let result = supervise(
        FakeCopy::new(stream, CopyExit::Code(1)),
        4_194_304,
        image.path(),
        |_| count += 1,
    );

    assert_eq!(count, 1);
    assert!(matches!(result, Err(Error::Format { .. })));
}

#[test]
fn test_missing_stream_is_a_process_error() {
    let mut process = FakeCopy::new(b"", CopyExit::Code(0));
    process.stream = None;
    let result = supervise(process, 1, std::path::Path::new("x"), |_| {});
    assert!(matches!(result, Err(Error::Process { .. })));
}

#[cfg(unix)]
#[test]
fn test_supervises_real_child() {
    use std::process::{Command, Stdio};

    let script = concat!(
        "printf '512 bytes copied, 1 s, 512 B/s\\r",
        "1024 bytes copied, 2 s, 512 B/s\\r' >&2; exit 3"
    );
    let child = Command::new("sh")
        .arg("-c")
        .arg(script)
        .stderr(Stdio::piped())
        .spawn()
        .expect("sh should be available");

    let image = tempfile::NamedTempFile::new().unwrap();
    let mut rows = Vec::new();
    let report = supervise(child, 2048, image.path(), |row| rows.push(row.copied_bytes)).unwrap();

    assert_eq!(rows, [512, 1024]);
    assert_eq!(report.exit, CopyExit::Code(3));
}
