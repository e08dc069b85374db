//! Turns the text printed by `fdisk -l` into a tree of devices and partitions.
//!
//! The listing is read line by line with a two-state machine. Outside a
//! partition table the parser looks for `Disk /dev/...` headers and the table
//! header (`Device ...`); inside a table every non-blank line is a partition
//! row, and a blank line ends the table.
//!
//! Rows are split by a second, character-level machine. Runs of spaces
//! separate columns, except that everything after the size column is kept
//! verbatim as the partition type (`Linux filesystem`, `83 Linux`, ...).
use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::units::{to_human, unit_size_to_bytes};
use log::debug;
use std::fmt;

const DEVICE_MARKER: &str = "Disk /dev/";
const LABEL_MARKER: &str = "Disklabel type:";
const IDENTIFIER_MARKER: &str = "Disk identifier:";
const TABLE_MARKER: &str = "Device ";
const BOOT_MARKER: &str = "Boot";
const NTFS_MARKERS: [&str; 2] = ["HPFS/NTFS/exFAT", "Microsoft basic data"];

/// Index of the size column once the boot flag (if any) is set aside.
/// Columns before it: path, start, end, sectors.
const SIZE_COLUMN: usize = 4;

/// A whole disk as reported by the listing tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// The device node, e.g. `/dev/sda`.
    pub path: String,
    /// Exact size in bytes, taken from the header line.
    pub size_bytes: u64,
    /// Set when any partition carries an NTFS/exFAT type.
    pub is_ntfs: bool,
    /// `dos`, `gpt`, ... when the listing printed a disklabel line.
    pub disklabel: Option<String>,
    /// The disk identifier when the listing printed one.
    pub identifier: Option<String>,
    /// Partitions in listing order.
    pub partitions: Vec<Partition>,
}

/// One row of a device's partition table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub path: String,
    pub size_bytes: u64,
    /// Free-text type description, e.g. `Linux filesystem` or `7 HPFS/NTFS/exFAT`.
    pub kind: String,
    pub is_boot: bool,
}

impl Device {
    fn new(path: String, size_bytes: u64) -> Self {
        Self {
            path,
            size_bytes,
            is_ntfs: false,
            disklabel: None,
            identifier: None,
            partitions: Vec::new(),
        }
    }

    pub fn size_human(&self) -> String {
        to_human(self.size_bytes, true, true, true)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.disklabel.as_deref().unwrap_or("no label");
        write!(
            f,
            "{:<15} {:>10} [{}, {} partitions{}]",
            self.path,
            self.size_human(),
            label,
            self.partitions.len(),
            if self.is_ntfs { ", NTFS" } else { "" }
        )
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<15} {:>10} {}{}",
            self.path,
            to_human(self.size_bytes, true, true, true),
            self.kind,
            if self.is_boot { " (boot)" } else { "" }
        )
    }
}

/// Column arrangement announced by a partition table header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// `Device Start End Sectors Size Type`
    Plain,
    /// `Device Boot Start End Sectors Size Id Type`. Bootable rows carry a `*`
    /// in the second column, the others leave it blank.
    WithBootFlag,
}

#[derive(Clone, Copy, Debug)]
enum LineState {
    Scanning,
    InTable(Layout),
}

/// Parses a complete listing. Empty input yields no devices.
///
/// # Errors
///
/// [`Error::Parse`] when a partition row does not have the expected columns,
/// its size is unreadable, it appears before any device header, or it repeats
/// a partition path. Device headers without a byte count fail the same way.
pub fn parse(raw: &str) -> Result<Vec<Device>> {
    let mut devices: Vec<Device> = Vec::new();
    let mut state = LineState::Scanning;

    for line in raw.lines().map(str::trim) {
        state = match state {
            LineState::InTable(_) if line.is_empty() => LineState::Scanning,
            LineState::InTable(layout) => {
                let partition = parse_partition_line(line, layout)?;
                let device = devices.last_mut().ok_or_else(|| parse_error(line))?;
                if device.partitions.iter().any(|p| p.path == partition.path) {
                    return Err(parse_error(line));
                }
                debug!("{} - {} - {}", partition.path, partition.size_bytes, partition.kind);
                device.partitions.push(partition);
                LineState::InTable(layout)
            }
            LineState::Scanning => scan_line(line, &mut devices)?,
        };

        if NTFS_MARKERS.iter().any(|marker| line.contains(marker)) {
            if let Some(device) = devices.last_mut() {
                device.is_ntfs = true;
            }
        }
    }

    Ok(devices)
}

fn scan_line(line: &str, devices: &mut Vec<Device>) -> Result<LineState> {
    if line.starts_with(DEVICE_MARKER) {
        let path = line["Disk ".len()..]
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();
        let size_bytes = parse_device_size(line).ok_or_else(|| parse_error(line))?;
        debug!("{line}");
        devices.push(Device::new(path, size_bytes));
    } else if let Some(label) = line.strip_prefix(LABEL_MARKER) {
        debug!("{line}");
        if let Some(device) = devices.last_mut() {
            device.disklabel = Some(label.trim().to_string());
        }
    } else if let Some(identifier) = line.strip_prefix(IDENTIFIER_MARKER) {
        debug!("{line}");
        if let Some(device) = devices.last_mut() {
            device.identifier = Some(identifier.trim().to_string());
        }
    } else if line.starts_with(TABLE_MARKER) {
        let layout = if line.contains(BOOT_MARKER) {
            Layout::WithBootFlag
        } else {
            Layout::Plain
        };
        return Ok(LineState::InTable(layout));
    }
    Ok(LineState::Scanning)
}

/// Reads the byte count in front of `bytes` in a device header such as
/// `Disk /dev/sda: 465.76 GiB, 500107862016 bytes, 976773168 sectors`.
/// Commas grouping thousands are accepted.
fn parse_device_size(line: &str) -> Option<u64> {
    let head = line[..line.find("bytes")?].trim_end();
    let number: Vec<char> = head
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .collect();
    let digits: String = number.iter().rev().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn parse_error(line: &str) -> Error {
    Error::Parse {
        line: line.to_string(),
    }
}

/// Where the row scanner currently is.
#[derive(Debug)]
enum Cursor {
    /// Between columns, skipping spaces.
    Gap,
    /// Inside a column.
    Token(String),
    /// Past the size column; everything is kept.
    Trailing(String),
}

/// Scanner context, consumed and returned by every step.
#[derive(Debug)]
struct RowScan {
    layout: Layout,
    columns: Vec<String>,
    cursor: Cursor,
}

impl RowScan {
    fn new(layout: Layout) -> Self {
        Self {
            layout,
            columns: Vec::new(),
            cursor: Cursor::Gap,
        }
    }

    /// Physical index of the first trailing column. A `*` boot flag occupies
    /// one extra column ahead of it.
    fn trailing_index(&self) -> usize {
        let flagged = self.layout == Layout::WithBootFlag
            && self.columns.get(1).is_some_and(|column| column == "*");
        SIZE_COLUMN + 1 + usize::from(flagged)
    }

    fn step(self, c: char) -> Self {
        let trailing_index = self.trailing_index();
        let Self {
            layout,
            mut columns,
            cursor,
        } = self;

        let cursor = match cursor {
            Cursor::Trailing(mut text) => {
                text.push(c);
                Cursor::Trailing(text)
            }
            Cursor::Gap if c.is_whitespace() => Cursor::Gap,
            Cursor::Gap if columns.len() == trailing_index => Cursor::Trailing(c.to_string()),
            Cursor::Gap => Cursor::Token(c.to_string()),
            Cursor::Token(text) if c.is_whitespace() => {
                columns.push(text);
                Cursor::Gap
            }
            Cursor::Token(mut text) => {
                text.push(c);
                Cursor::Token(text)
            }
        };

        Self {
            layout,
            columns,
            cursor,
        }
    }

    /// Returns the separated columns and the trailing text, if any.
    fn finish(self) -> (Vec<String>, Option<String>) {
        let Self {
            mut columns,
            cursor,
            ..
        } = self;
        match cursor {
            Cursor::Gap => (columns, None),
            Cursor::Token(text) => {
                columns.push(text);
                (columns, None)
            }
            Cursor::Trailing(text) => (columns, Some(text.trim_end().to_string())),
        }
    }
}

fn parse_partition_line(line: &str, layout: Layout) -> Result<Partition> {
    let scan = line
        .chars()
        .fold(RowScan::new(layout), |scan, c| scan.step(c));
    let (mut columns, kind) = scan.finish();

    let is_boot =
        layout == Layout::WithBootFlag && columns.get(1).is_some_and(|column| column == "*");
    if is_boot {
        columns.remove(1);
    }

    let kind = kind.ok_or_else(|| parse_error(line))?;
    if columns.len() != SIZE_COLUMN + 1 {
        return Err(parse_error(line));
    }
    let size_bytes = unit_size_to_bytes(&columns[SIZE_COLUMN]).ok_or_else(|| parse_error(line))?;

    Ok(Partition {
        path: columns.swap_remove(0),
        size_bytes,
        kind,
        is_boot,
    })
}

/// Looks up a device or partition path (case-insensitively) and returns its size.
pub fn resolve_size(devices: &[Device], path: &str) -> Option<u64> {
    devices.iter().find_map(|device| {
        if device.path.eq_ignore_ascii_case(path) {
            return Some(device.size_bytes);
        }
        device
            .partitions
            .iter()
            .find(|partition| partition.path.eq_ignore_ascii_case(path))
            .map(|partition| partition.size_bytes)
    })
}

/// Runs the listing tool and parses what it prints.
///
/// The tool is run with `LC_ALL=C` so its headers match the markers this
/// module looks for. Elevation follows [`ToolConfig::needs_sudo`].
///
/// # Errors
///
/// [`Error::Process`] with the tool's stderr when it cannot be started or
/// exits unsuccessfully, otherwise whatever [`parse`] reports.
pub fn list_devices(config: &ToolConfig) -> Result<Vec<Device>> {
    let tool = config.fdisk_program.clone();
    let output = config
        .command(&tool)
        .arg("-l")
        .env("LC_ALL", "C")
        .output()
        .map_err(|e| Error::Process {
            tool: tool.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::Process {
            tool,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::MIB;

    #[test]
    fn empty_listing_has_no_devices() {
        assert_eq!(parse("").unwrap(), Vec::new());
        assert_eq!(parse("\n\n   \n").unwrap(), Vec::new());
    }

    #[test]
    fn reads_device_size_from_header() {
        let line = "Disk /dev/sda: 465.76 GiB, 500107862016 bytes, 976773168 sectors";
        assert_eq!(parse_device_size(line), Some(500_107_862_016));
        let grouped = "Disk /dev/sdb: 7.5 GiB, 8,053,063,680 bytes, 15728640 sectors";
        assert_eq!(parse_device_size(grouped), Some(8_053_063_680));
        assert_eq!(parse_device_size("Disk /dev/sdc: no size"), None);
    }

    #[test]
    fn splits_plain_row() {
        let row = "/dev/sda2  1050624 976771071 975720448 465.3G Linux filesystem";
        let partition = parse_partition_line(row, Layout::Plain).unwrap();
        assert_eq!(partition.path, "/dev/sda2");
        assert_eq!(partition.size_bytes, unit_size_to_bytes("465.3G").unwrap());
        assert_eq!(partition.kind, "Linux filesystem");
        assert!(!partition.is_boot);
    }

    #[test]
    fn boot_flag_does_not_shift_columns() {
        let flagged = "/dev/sdb1  *        2048  1050623  1048576  512M  7 HPFS/NTFS/exFAT";
        let partition = parse_partition_line(flagged, Layout::WithBootFlag).unwrap();
        assert!(partition.is_boot);
        assert_eq!(partition.size_bytes, 512 * MIB);
        assert_eq!(partition.kind, "7 HPFS/NTFS/exFAT");

        let unflagged = "/dev/sdb2        1050624 15728639 14678016    7G 83 Linux";
        let partition = parse_partition_line(unflagged, Layout::WithBootFlag).unwrap();
        assert!(!partition.is_boot);
        assert_eq!(partition.size_bytes, 7 * 1024 * MIB);
        assert_eq!(partition.kind, "83 Linux");
    }

    #[test]
    fn short_row_is_rejected() {
        let err = parse_partition_line("/dev/sda1 2048 4095", Layout::Plain).unwrap_err();
        assert!(matches!(err, Error::Parse { line } if line == "/dev/sda1 2048 4095"));
    }

    #[test]
    fn unreadable_size_is_rejected() {
        let row = "/dev/sda1 2048 4095 2048 big Linux";
        assert!(matches!(
            parse_partition_line(row, Layout::Plain),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn row_before_any_device_is_rejected() {
        let text = "Device Start End Sectors Size Type\n/dev/sda1 2048 4095 2048 1M EFI System\n";
        assert!(matches!(parse(text), Err(Error::Parse { .. })));
    }

    #[test]
    fn duplicate_partition_is_rejected() {
        let text = "Disk /dev/sda: 1 GiB, 1073741824 bytes, 2097152 sectors\n\
                    Device Start End Sectors Size Type\n\
                    /dev/sda1 2048 4095 2048 1M EFI System\n\
                    /dev/sda1 4096 8191 4096 2M Linux filesystem\n";
        assert!(matches!(parse(text), Err(Error::Parse { .. })));
    }

    #[test]
    fn resolves_devices_and_partitions() {
        let text = "Disk /dev/sda: 1 GiB, 1073741824 bytes, 2097152 sectors\n\
                    Device Start End Sectors Size Type\n\
                    /dev/sda1 2048 4095 2048 1M EFI System\n";
        let devices = parse(text).unwrap();
        assert_eq!(resolve_size(&devices, "/dev/sda"), Some(1_073_741_824));
        assert_eq!(resolve_size(&devices, "/DEV/SDA1"), Some(MIB));
        assert_eq!(resolve_size(&devices, "/dev/sdb"), None);
    }

    fn listing_with(program: &str) -> Result<Vec<Device>> {
        let config = ToolConfig {
            fdisk_program: program.to_string(),
            use_sudo: false,
            ..ToolConfig::default()
        };
        list_devices(&config)
    }

    #[cfg(unix)]
    #[test]
    fn failing_listing_tool_is_a_process_error() {
        assert!(matches!(
            listing_with("false"),
            Err(Error::Process { tool, .. }) if tool == "false"
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn listing_tool_stderr_becomes_the_message() {
        // cat has no -l option and says so on stderr.
        match listing_with("cat") {
            Err(Error::Process { tool, message }) => {
                assert_eq!(tool, "cat");
                assert!(message.starts_with("cat:"), "{message}");
                assert!(message.contains("invalid option"), "{message}");
            }
            other => panic!("expected a process error, got {other:?}"),
        }
    }

    #[test]
    fn missing_listing_tool_is_a_process_error() {
        match listing_with("imgbak-missing-fdisk") {
            Err(Error::Process { tool, message }) => {
                assert_eq!(tool, "imgbak-missing-fdisk");
                assert!(!message.is_empty());
            }
            other => panic!("expected a process error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn silent_listing_tool_has_no_devices() {
        assert_eq!(listing_with("true").unwrap(), Vec::new());
    }
}
