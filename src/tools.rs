use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use log::info;

use crate::error::ToolError;

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long output still gets drained once the child is gone. Pipes kept open
/// by a stray grandchild are abandoned after this.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

fn tool_name(program: &OsStr) -> String {
    Path::new(program)
        .file_name()
        .unwrap_or(program)
        .to_string_lossy()
        .into_owned()
}

/// Logs every line of `pipe` as it arrives, forwarding them to `tx` if given.
fn spawn_reader(
    pipe: impl Read + Send + 'static,
    name: String,
    tx: Option<Sender<String>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for chunk in BufReader::new(pipe).split(b'\n').map_while(Result::ok) {
            let line = String::from_utf8_lossy(&chunk)
                .trim_end_matches('\r')
                .to_string();
            info!("[{}] {}", name, line);
            if let Some(tx) = &tx {
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

/// Kills `child` together with anything it started.
fn kill_tree(child: &mut Child) {
    // The child leads its own process group (see `isolate`).
    #[cfg(unix)]
    let _ = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{}", child.id()))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    let _ = child.kill();
    let _ = child.wait();
}

/// Runs `program` with `args`, logging its output line by line as it arrives.
///
/// The child and its own children are killed once `timeout` has elapsed.
/// Succeeds only when the process exits with status zero; on failure the last
/// non-empty stderr line is kept in the error.
pub fn run_tool<I, S>(program: &OsStr, args: I, timeout: Duration) -> Result<(), ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = tool_name(program);
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate(&mut command);
    let mut child = command.spawn().map_err(|source| ToolError::Spawn {
        program: name.clone(),
        source,
    })?;

    let (tx, rx) = mpsc::channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, name.clone(), None);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, name.clone(), Some(tx));
    }

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() > timeout {
                    kill_tree(&mut child);
                    break None;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(source) => {
                kill_tree(&mut child);
                return Err(ToolError::Wait {
                    program: name,
                    source,
                });
            }
        }
    };

    // Readers are never joined, so a held-open pipe cannot stall the run.
    let drain_until = Instant::now() + DRAIN_GRACE;
    let mut last_line = None;
    while let Ok(line) = rx.recv_timeout(drain_until.saturating_duration_since(Instant::now())) {
        if !line.trim().is_empty() {
            last_line = Some(line.trim().to_string());
        }
    }

    match status {
        None => Err(ToolError::Timeout {
            program: name,
            timeout,
        }),
        Some(status) if status.success() => Ok(()),
        Some(status) => Err(ToolError::Failed {
            program: name,
            code: status.code(),
            detail: last_line,
        }),
    }
}

/// Converts a source file to MP3.
#[cfg_attr(test, mockall::automock)]
pub trait Transcoder {
    fn transcode(&self, input: &Path, output: &Path) -> Result<(), ToolError>;
}

/// Adjusts the loudness of an MP3 file in place.
#[cfg_attr(test, mockall::automock)]
pub trait LoudnessNormalizer {
    fn normalize(&self, path: &Path) -> Result<(), ToolError>;
}

/// [`Transcoder`] backed by the `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
    bitrate_kbps: u32,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>, bitrate_kbps: u32, timeout: Duration) -> Self {
        Ffmpeg {
            program: program.into(),
            bitrate_kbps,
            timeout,
        }
    }

    /// Arguments for one conversion. Cover art streams are dropped (`-vn`) and an
    /// existing output is overwritten (`-y`).
    pub fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.into(),
            "-vn".into(),
            "-b:a".into(),
            format!("{}k", self.bitrate_kbps).into(),
            output.into(),
        ]
    }
}

impl Transcoder for Ffmpeg {
    fn transcode(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        run_tool(
            self.program.as_os_str(),
            self.args(input, output),
            self.timeout,
        )
    }
}

/// [`LoudnessNormalizer`] backed by the `mp3gain` executable.
#[derive(Debug, Clone)]
pub struct Mp3Gain {
    program: PathBuf,
    timeout: Duration,
}

impl Mp3Gain {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Mp3Gain {
            program: program.into(),
            timeout,
        }
    }

    /// Track gain (`-r`), keep timestamps (`-p`), ignore clipping warnings
    /// (`-c`), and leave tags alone (`-s s`).
    pub fn args(&self, path: &Path) -> Vec<OsString> {
        vec![
            "-p".into(),
            "-r".into(),
            "-c".into(),
            "-s".into(),
            "s".into(),
            path.into(),
        ]
    }
}

impl LoudnessNormalizer for Mp3Gain {
    fn normalize(&self, path: &Path) -> Result<(), ToolError> {
        run_tool(self.program.as_os_str(), self.args(path), self.timeout)
    }
}
