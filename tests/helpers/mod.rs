//! Test harness: in-memory store, channel dispatch and a scripted reconstruction tool

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coal_pile_measure::{
    config::PipelineSettings,
    db::memory::MemoryJobStore,
    models::stage::{StageOutcome, StageTask},
    services::{
        pipeline::Pipeline,
        queue::ChannelDispatcher,
        reconstruction::{ReconstructionError, ReconstructionTool, ToolRun},
    },
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub const DENSITY: f64 = 1300.0;

/// What the scripted tool does when invoked.
#[derive(Debug, Clone)]
pub enum ToolScript {
    /// Write these files (relative to the output directory) and exit 0.
    Produce(Vec<(&'static str, String)>),
    /// Exit with `code` after printing `output`.
    Exit { code: i32, output: &'static str },
    /// Write these files, then exceed the timeout.
    Hang(Vec<(&'static str, String)>),
}

pub struct ScriptedTool {
    pub available: bool,
    pub script: ToolScript,
    pub runs: Arc<AtomicUsize>,
}

fn write_files(dir: &Path, files: &[(&'static str, String)]) -> std::io::Result<()> {
    for (rel, contents) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
    }
    Ok(())
}

impl ReconstructionTool for ScriptedTool {
    async fn check_available(&self) -> Result<(), ReconstructionError> {
        if self.available {
            Ok(())
        } else {
            Err(ReconstructionError::NotFound(PathBuf::from(
                "/opt/missing/meshroom_batch",
            )))
        }
    }

    async fn run(
        &self,
        _input: &Path,
        output_dir: &Path,
        timeout: Duration,
    ) -> Result<ToolRun, ReconstructionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            ToolScript::Produce(files) => {
                write_files(output_dir, files).map_err(ReconstructionError::Io)?;
                Ok(ToolRun {
                    exit_code: Some(0),
                    success: true,
                    output: "Pipeline finished".to_string(),
                    duration: Duration::from_millis(5),
                })
            }
            ToolScript::Exit { code, output } => Ok(ToolRun {
                exit_code: Some(*code),
                success: *code == 0,
                output: output.to_string(),
                duration: Duration::from_millis(5),
            }),
            ToolScript::Hang(files) => {
                write_files(output_dir, files).map_err(ReconstructionError::Io)?;
                Err(ReconstructionError::TimedOut(timeout))
            }
        }
    }
}

pub type TestPipeline = Pipeline<MemoryJobStore, ChannelDispatcher, ScriptedTool>;

pub struct Harness {
    pub pipeline: TestPipeline,
    pub rx: UnboundedReceiver<StageTask>,
    pub runs: Arc<AtomicUsize>,
    pub input: PathBuf,
    pub dir: TempDir,
}

pub fn settings_in(dir: &Path) -> PipelineSettings {
    PipelineSettings {
        reconstruction_bin: dir.join("bin/meshroom_batch"),
        reconstruction_timeout: Duration::from_secs(5),
        output_root: dir.join("results"),
        material_density: DENSITY,
    }
}

pub fn harness(script: ToolScript) -> Harness {
    harness_with(script, true)
}

pub fn harness_with(script: ToolScript, available: bool) -> Harness {
    let dir = tempfile::tempdir().expect("create temp dir");
    let input = dir.path().join("uploads/capture.zip");
    std::fs::create_dir_all(input.parent().unwrap()).unwrap();
    std::fs::write(&input, b"PK\x03\x04 fake capture").unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let tool = ScriptedTool {
        available,
        script,
        runs: Arc::clone(&runs),
    };
    let (dispatcher, rx) = ChannelDispatcher::new();
    let pipeline = Pipeline::new(
        MemoryJobStore::new(),
        dispatcher,
        tool,
        settings_in(dir.path()),
    );

    Harness {
        pipeline,
        rx,
        runs,
        input,
        dir,
    }
}

impl Harness {
    /// Drain and run every queued stage, returning their outcomes in order.
    pub async fn drain(&mut self) -> Vec<StageOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(task) = self.rx.try_recv() {
            outcomes.push(self.pipeline.handle(task).await);
        }
        outcomes
    }

    pub fn tool_runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn output_dir(&self, job_id: uuid::Uuid) -> PathBuf {
        self.pipeline.settings().output_dir_for(job_id)
    }
}
