//! External photogrammetry invocation.
//!
//! The reconstruction tool is a black box: it receives an input capture and an
//! output directory, and is expected to leave a textured `.obj` mesh somewhere
//! under that directory. [`MeshroomCli`] drives the Meshroom batch CLI; tests
//! substitute their own [`ReconstructionTool`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use walkdir::WalkDir;

/// File name Meshroom gives its final texturing output.
pub const CANONICAL_MESH_NAME: &str = "texturedMesh.obj";

const MESH_EXTENSION: &str = "obj";

/// Maximum stdout or stderr kept per stream (10 MiB, the most recent bytes).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Outcome of a tool run that exited on its own.
#[derive(Debug, Clone)]
pub struct ToolRun {
    pub exit_code: Option<i32>,
    pub success: bool,
    /// stdout followed by stderr.
    pub output: String,
    pub duration: Duration,
}

pub trait ReconstructionTool: Send + Sync + 'static {
    /// Confirm the tool can be invoked at all, without running it.
    fn check_available(&self) -> impl Future<Output = Result<(), ReconstructionError>> + Send;

    /// Run the tool to completion or until `timeout` elapses.
    fn run(
        &self,
        input: &Path,
        output_dir: &Path,
        timeout: Duration,
    ) -> impl Future<Output = Result<ToolRun, ReconstructionError>> + Send;
}

/// Meshroom batch CLI (`meshroom_batch --input <capture> --output <dir>`).
#[derive(Debug, Clone)]
pub struct MeshroomCli {
    bin: PathBuf,
}

impl MeshroomCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }
}

impl ReconstructionTool for MeshroomCli {
    async fn check_available(&self) -> Result<(), ReconstructionError> {
        let metadata = tokio::fs::metadata(&self.bin)
            .await
            .map_err(|_| ReconstructionError::NotFound(self.bin.clone()))?;

        if !metadata.is_file() {
            return Err(ReconstructionError::NotFound(self.bin.clone()));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                return Err(ReconstructionError::NotExecutable(self.bin.clone()));
            }
        }

        Ok(())
    }

    async fn run(
        &self,
        input: &Path,
        output_dir: &Path,
        timeout: Duration,
    ) -> Result<ToolRun, ReconstructionError> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--input")
            .arg(input)
            .arg("--output")
            .arg(output_dir);
        run_command(&mut cmd, timeout).await
    }
}

/// Spawn `cmd`, capture both output streams and enforce `timeout`.
///
/// The tool runs in its own process group. One deadline covers both the
/// process itself and the drain of its output pipes, so a descendant that
/// inherits the pipes cannot hold the stage past `timeout`. On timeout the
/// whole group is killed; whatever it already wrote to disk is left in place
/// for the caller to ignore.
pub async fn run_command(cmd: &mut Command, timeout: Duration) -> Result<ToolRun, ReconstructionError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut child = cmd.spawn().map_err(ReconstructionError::Spawn)?;
    let group = child.id();

    let mut stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let mut stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    let status = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            kill_process_group(group);
            stdout_task.abort();
            stderr_task.abort();
            return Err(ReconstructionError::Io(e));
        }
        Err(_elapsed) => {
            kill_process_group(group);
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(ReconstructionError::TimedOut(timeout));
        }
    };

    // Stragglers left behind by the tool still hold the pipes open.
    kill_process_group(group);

    let streams = tokio::time::timeout_at(deadline, async {
        let stdout = (&mut stdout_task).await.unwrap_or_default();
        let stderr = (&mut stderr_task).await.unwrap_or_default();
        (stdout, stderr)
    })
    .await;

    let (stdout, stderr) = match streams {
        Ok(streams) => streams,
        Err(_elapsed) => {
            stdout_task.abort();
            stderr_task.abort();
            return Err(ReconstructionError::TimedOut(timeout));
        }
    };

    let mut output = String::from_utf8_lossy(&stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&stderr));

    Ok(ToolRun {
        exit_code: status.code(),
        success: status.success(),
        output,
        duration: start.elapsed(),
    })
}

#[cfg(unix)]
fn kill_process_group(group: Option<u32>) {
    let Some(pgid) = group.and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal. An already empty group yields ESRCH.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: Option<u32>) {}

/// Read a stream to EOF, keeping at most the last [`MAX_OUTPUT_BYTES`].
///
/// The pipe is drained to the end even past the cap, so a verbose tool never
/// sees a broken pipe.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut kept = Vec::new();
    let Some(mut handle) = handle else {
        return kept;
    };

    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        match handle.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&chunk[..n]);
                if kept.len() > 2 * MAX_OUTPUT_BYTES {
                    kept.drain(..kept.len() - MAX_OUTPUT_BYTES);
                }
            }
        }
    }
    if kept.len() > MAX_OUTPUT_BYTES {
        kept.drain(..kept.len() - MAX_OUTPUT_BYTES);
    }
    kept
}

/// Start every run from an empty directory so a mesh left by an earlier
/// attempt is never mistaken for this run's output.
pub async fn prepare_output_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

/// Find the mesh produced under `output_dir`.
///
/// Preference order:
/// 1. `texturedMesh.obj` directly in `output_dir`
/// 2. the first `texturedMesh.obj` anywhere below it
/// 3. the first file with an `.obj` extension (case-insensitive)
///
/// "First" means depth-first order with each directory's entries sorted by
/// file name, so the result does not depend on filesystem listing order.
pub fn locate_mesh(output_dir: &Path) -> Option<PathBuf> {
    let canonical = output_dir.join(CANONICAL_MESH_NAME);
    if canonical.is_file() {
        return Some(canonical);
    }

    let mut first_obj = None;
    for entry in WalkDir::new(output_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        if entry.file_name() == CANONICAL_MESH_NAME {
            return Some(entry.into_path());
        }
        if first_obj.is_none() && has_mesh_extension(entry.path()) {
            first_obj = Some(entry.into_path());
        }
    }
    first_obj
}

fn has_mesh_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(MESH_EXTENSION))
}

#[derive(Debug, thiserror::Error)]
pub enum ReconstructionError {
    #[error("Reconstruction executable not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("Reconstruction executable at {} is not executable", .0.display())]
    NotExecutable(PathBuf),

    #[error("Failed to spawn reconstruction process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Reconstruction timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("I/O error while waiting for reconstruction: {0}")]
    Io(#[source] std::io::Error),
}
