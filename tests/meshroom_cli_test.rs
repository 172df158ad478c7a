//! Drives the pipeline through a real subprocess: a shell script standing in
//! for `meshroom_batch`.
//!
//! Run with: cargo test --test meshroom_cli_test
#![cfg(unix)]

mod fixtures;
mod helpers;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use coal_pile_measure::{
    db::{memory::MemoryJobStore, JobStore},
    models::job::JobStatus,
    models::stage::StageOutcome,
    services::{pipeline::Pipeline, queue::ChannelDispatcher, reconstruction::MeshroomCli},
};
use helpers::settings_in;
use tempfile::TempDir;

fn install_script(dir: &Path, body: &str) -> PathBuf {
    let bin = dir.join("bin/meshroom_batch");
    std::fs::create_dir_all(bin.parent().unwrap()).unwrap();
    std::fs::write(&bin, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
    bin
}

/// Writes a Meshroom-shaped cache tree into the directory after `--output`.
fn fake_meshroom(mesh: &str) -> String {
    format!(
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$out/MeshroomCache/Texturing/abc"
cat > "$out/MeshroomCache/Texturing/abc/texturedMesh.obj" <<'EOF'
{mesh}EOF
echo "Texturing done""#
    )
}

struct CliHarness {
    pipeline: Pipeline<MemoryJobStore, ChannelDispatcher, MeshroomCli>,
    rx: tokio::sync::mpsc::UnboundedReceiver<coal_pile_measure::models::stage::StageTask>,
    input: PathBuf,
    _dir: TempDir,
}

fn cli_harness(script: &str, timeout: Duration) -> CliHarness {
    let dir = tempfile::tempdir().unwrap();
    let bin = install_script(dir.path(), script);
    let input = dir.path().join("capture.zip");
    std::fs::write(&input, b"PK\x03\x04").unwrap();

    let mut settings = settings_in(dir.path());
    settings.reconstruction_bin = bin.clone();
    settings.reconstruction_timeout = timeout;

    let (dispatcher, rx) = ChannelDispatcher::new();
    let pipeline = Pipeline::new(MemoryJobStore::new(), dispatcher, MeshroomCli::new(bin), settings);
    CliHarness {
        pipeline,
        rx,
        input,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_meshroom_cli_end_to_end() {
    let mut h = cli_harness(
        &fake_meshroom(&fixtures::box_obj(5.0, 2.5, 1.0)),
        Duration::from_secs(30),
    );
    let job = h.pipeline.submit(7, &h.input).await.unwrap();

    while let Ok(task) = h.rx.try_recv() {
        let outcome = h.pipeline.handle(task).await;
        assert!(outcome.is_success(), "stage failed: {outcome:?}");
    }

    let job = h.pipeline.store().get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert!(job
        .model_path
        .as_deref()
        .unwrap()
        .ends_with("MeshroomCache/Texturing/abc/texturedMesh.obj"));
    let m = job.measurements.unwrap();
    assert!((m.volume - 12.5).abs() < 1e-9);
    assert!((m.weight - 16250.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_meshroom_cli_nonzero_exit() {
    let h = cli_harness(
        "echo 'Node CameraInit failed' >&2\nexit 1",
        Duration::from_secs(30),
    );
    let job = h.pipeline.store().create(7).await.unwrap();

    let outcome = h.pipeline.run_reconstruction(job.id, &h.input).await;
    match outcome {
        StageOutcome::Failed { reason, output, .. } => {
            assert_eq!(reason, "tool_failed");
            assert!(output.unwrap().contains("Node CameraInit failed"));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let job = h.pipeline.store().get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.model_path.is_none());
}

#[tokio::test]
async fn test_meshroom_cli_timeout() {
    let script = format!(
        "{}\nsleep 30",
        fake_meshroom(&fixtures::box_obj(1.0, 1.0, 1.0))
    );
    let mut h = cli_harness(&script, Duration::from_millis(500));
    let job = h.pipeline.store().create(7).await.unwrap();

    let outcome = h.pipeline.run_reconstruction(job.id, &h.input).await;
    match outcome {
        StageOutcome::Failed { reason, .. } => assert_eq!(reason, "timed_out"),
        other => panic!("expected failure, got {other:?}"),
    }

    let job = h.pipeline.store().get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.model_path.is_none());
    assert!(h.rx.try_recv().is_err(), "measurement must not be scheduled");
}
