//! Runs the duplication tool and turns its progress output into status rows.
//!
//! In interactive mode the tool's stderr is drained on a dedicated thread. That
//! thread splits the stream on carriage returns and pushes each complete line
//! through a bounded channel; the calling thread parses the lines, computes
//! the estimate and hands a [`StatusRow`] to the caller's callback. The exit
//! status is only read once the stream has ended, so buffered output from the
//! child is never mistaken for completion.
//!
//! There is no cancellation. Once the tool is started the copy runs to the
//! end; interrupting it (e.g. with Ctrl+C, which also reaches the child) leaves
//! a truncated image that must not be trusted.
use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::eta::predict_remaining;
use crate::progress;
use crate::units::{human_time, to_human};
use crossbeam_channel::{Sender, bounded};
use log::{debug, info, warn};
use std::fmt;
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lines buffered between the stderr reader and the renderer.
const LINE_QUEUE: usize = 16;

/// A fully specified `dd` invocation copying `source` into `target`.
#[derive(Clone, Debug)]
pub struct CopyCommand {
    pub source: PathBuf,
    pub target: PathBuf,
    config: ToolConfig,
}

impl CopyCommand {
    pub fn new(
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        config: &ToolConfig,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            config: config.clone(),
        }
    }

    fn operands(&self, escape: bool) -> [String; 4] {
        let path = |p: &Path| {
            let text = p.to_string_lossy();
            if escape {
                text.replace(' ', "\\ ")
            } else {
                text.into_owned()
            }
        };
        [
            format!("if={}", path(&self.source)),
            format!("of={}", path(&self.target)),
            "status=progress".to_string(),
            format!("bs={}", self.config.block_size),
        ]
    }

    /// The command line as a shell would need it, with spaces in paths escaped.
    pub fn display(&self) -> String {
        let sudo = if self.config.needs_sudo() { "sudo " } else { "" };
        format!(
            "{sudo}{} {}",
            self.config.dd_program,
            self.operands(true).join(" ")
        )
    }

    fn command(&self) -> Command {
        let mut command = self.config.command(&self.config.dd_program);
        command.args(self.operands(false));
        command
    }

    fn spawn_error(&self, err: io::Error) -> Error {
        Error::Process {
            tool: self.config.dd_program.clone(),
            message: err.to_string(),
        }
    }
}

/// How the duplication tool ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyExit {
    /// The tool's own return code.
    Code(i32),
    /// No return code was available, e.g. the tool was killed by a signal.
    Unknown,
}

impl CopyExit {
    pub fn is_success(&self) -> bool {
        *self == CopyExit::Code(0)
    }
}

impl From<ExitStatus> for CopyExit {
    fn from(status: ExitStatus) -> Self {
        status.code().map_or(CopyExit::Unknown, CopyExit::Code)
    }
}

impl fmt::Display for CopyExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyExit::Code(code) => write!(f, "exit code {code}"),
            CopyExit::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// One status update, rendered by its `Display` implementation as
/// `<copied> of <target> | <elapsed> of <predicted> | Total time: <wall clock>`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusRow {
    pub copied_bytes: u64,
    pub target_bytes: u64,
    /// Elapsed time reported by the tool.
    pub elapsed_secs: u64,
    /// Predicted duration of the whole copy. `None` until any bytes are copied.
    pub predicted_secs: Option<f64>,
    /// Time since the tool was started, measured locally.
    pub wall_secs: u64,
}

impl fmt::Display for StatusRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let predicted = self
            .predicted_secs
            .map_or_else(|| "--".to_string(), |secs| human_time(secs.round() as u64));
        write!(
            f,
            "{:<10} of {:<9} | {:<10} of {:<10} | Total time: {}",
            to_human(self.copied_bytes, true, true, false),
            to_human(self.target_bytes, true, true, false),
            human_time(self.elapsed_secs),
            predicted,
            human_time(self.wall_secs)
        )
    }
}

/// Outcome of a finished copy.
#[derive(Clone, Debug)]
pub struct CopyReport {
    pub exit: CopyExit,
    pub wall_time: Duration,
    /// Number of status rows handed to the callback.
    pub rows: usize,
    /// Size of the image on disk, if it could be read.
    pub artifact_bytes: Option<u64>,
}

impl CopyReport {
    fn new(exit: CopyExit, started: Instant, rows: usize, artifact: &Path) -> Self {
        Self {
            exit,
            wall_time: started.elapsed(),
            rows,
            artifact_bytes: fs::metadata(artifact).ok().map(|m| m.len()),
        }
    }

    /// A zero exit code. Anything else means the image should be verified by hand.
    pub fn is_success(&self) -> bool {
        self.exit.is_success()
    }
}

/// A running copy process the monitor can supervise.
pub trait Supervised {
    type Diagnostics: Read + Send + 'static;

    /// Hands over the stream progress lines are written to. Called once.
    fn take_diagnostics(&mut self) -> Option<Self::Diagnostics>;

    /// Blocks until the process has exited.
    fn wait_exit(&mut self) -> io::Result<CopyExit>;
}

impl Supervised for Child {
    type Diagnostics = ChildStderr;

    fn take_diagnostics(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    fn wait_exit(&mut self) -> io::Result<CopyExit> {
        self.wait().map(CopyExit::from)
    }
}

/// Runs the copy without parsing anything and waits for it to exit.
///
/// # Errors
///
/// [`Error::Process`] if the tool cannot be started.
pub fn run_quiet(command: &CopyCommand) -> Result<CopyReport> {
    info!("running {}", command.display());
    let started = Instant::now();
    let output = command
        .command()
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| command.spawn_error(e))?;

    let exit = CopyExit::from(output.status);
    if !exit.is_success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(last) = stderr.lines().map(str::trim).rfind(|l| !l.is_empty()) {
            warn!("{} ended with {exit}: {last}", command.config.dd_program);
        }
    }
    Ok(CopyReport::new(exit, started, 0, &command.target))
}

/// Runs the copy and reports progress through `on_status`.
///
/// # Arguments
///
/// * `command` - The invocation to run.
/// * `target_bytes` - Size of the source, used for the estimate.
/// * `on_status` - Called once per progress line the tool prints.
///
/// # Errors
///
/// [`Error::Process`] if the tool cannot be started, otherwise as [`supervise`].
pub fn run<F>(command: &CopyCommand, target_bytes: u64, on_status: F) -> Result<CopyReport>
where
    F: FnMut(&StatusRow),
{
    info!("running {}", command.display());
    let child = command
        .command()
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| command.spawn_error(e))?;
    supervise(child, target_bytes, &command.target, on_status)
}

/// Drives an already started process until its diagnostic stream ends, then
/// collects its exit status.
///
/// # Errors
///
/// - [`Error::Format`] if a progress line cannot be parsed. Rendering stops at
///   that line, but the stream is still drained and the process reaped first.
/// - [`Error::Process`] if the process has no diagnostic stream.
/// - [`Error::Io`] if reading the stream or waiting for the process fails.
pub fn supervise<P, F>(
    mut process: P,
    target_bytes: u64,
    artifact: &Path,
    mut on_status: F,
) -> Result<CopyReport>
where
    P: Supervised,
    F: FnMut(&StatusRow),
{
    let started = Instant::now();
    let stream = process.take_diagnostics().ok_or_else(|| Error::Process {
        tool: "copy tool".to_string(),
        message: "diagnostic stream was not captured".to_string(),
    })?;

    let (sender, receiver) = bounded(LINE_QUEUE);
    let reader = spawn_line_reader(stream, sender);

    let mut rows = 0;
    let mut failure = None;
    for line in receiver.iter() {
        if failure.is_some() {
            continue;
        }
        match status_row(&line, target_bytes, started) {
            Ok(row) => {
                on_status(&row);
                rows += 1;
            }
            Err(e) => {
                warn!("stopped rendering progress: {e}");
                failure = Some(e);
            }
        }
    }

    let drained = reader
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("progress reader panicked")));
    let exit = process.wait_exit()?;
    debug!("copy finished with {exit}");
    drained?;

    match failure {
        Some(e) => Err(e),
        None => Ok(CopyReport::new(exit, started, rows, artifact)),
    }
}

fn status_row(line: &str, target_bytes: u64, started: Instant) -> Result<StatusRow> {
    let sample = progress::parse(line)?;
    let predicted_secs = match sample.bytes_copied {
        0 => None,
        copied => Some(predict_remaining(sample.elapsed_secs, target_bytes, copied)?),
    };
    Ok(StatusRow {
        copied_bytes: sample.bytes_copied,
        target_bytes,
        elapsed_secs: sample.elapsed_secs,
        predicted_secs,
        wall_secs: started.elapsed().as_secs(),
    })
}

/// Splits `stream` on `\r` and sends every non-blank line. Text ended by `\n`
/// is the tool's closing summary or a warning; it is logged, not sent.
fn spawn_line_reader<R>(stream: R, lines: Sender<String>) -> JoinHandle<io::Result<()>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut pending = Vec::new();
        for byte in BufReader::new(stream).bytes() {
            match byte? {
                b'\r' => {
                    let line = String::from_utf8_lossy(&pending).trim().to_string();
                    pending.clear();
                    if !line.is_empty() {
                        // A closed channel only means nobody renders anymore; keep draining.
                        let _ = lines.send(line);
                    }
                }
                b'\n' => {
                    let text = String::from_utf8_lossy(&pending).trim().to_string();
                    pending.clear();
                    if !text.is_empty() {
                        debug!("copy tool: {text}");
                    }
                }
                other => pending.push(other),
            }
        }
        Ok(())
    })
}
