// tests/push_modes.rs

mod common;
use crate::common::{ConfigFileBuilder, FakeRunner, init_tracing};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dwf_prepipe::config::Role;
use dwf_prepipe::engine::{ArrivalHandler, FileReport, FileStage};
use dwf_prepipe::exec::ToolCommand;
use dwf_prepipe::fs::RealFileSystem;
use dwf_prepipe::push::CtioPush;
use dwf_prepipe::types::PushMethod;

const LANDING: &str = "/fred/oz100/fstars/push";
const TARGET: &str = "/fred/oz100/pipes/DWF_PIPE/CTIO_PUSH/";
const RECEIVER: &str = "fstars@ozstar.swin.edu.au";

/// Argument following `flag` in `cmd`.
fn after(cmd: &ToolCommand, flag: &str) -> PathBuf {
    let args = cmd.arg_strings();
    let at = args.iter().position(|a| a == flag).unwrap();
    PathBuf::from(&args[at + 1])
}

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, b"x").unwrap();
}

/// A runner whose tools leave behind the files the real ones would.
fn tools() -> FakeRunner {
    FakeRunner::new()
        .effect("funpack", |cmd| {
            let packed = cmd.arg_strings()[0].clone();
            touch(Path::new(packed.trim_end_matches(".fz")));
        })
        .effect("f2j_DECam", |cmd| touch(&after(cmd, "-o")))
        .effect("tar", |cmd| touch(&after(cmd, "-cf")))
}

fn push(data: &Path, builder: ConfigFileBuilder, runner: &FakeRunner) -> CtioPush {
    let cfg = builder.data_dir(data).build(Role::Push);
    CtioPush::new(&cfg, Arc::new(runner.clone()), Arc::new(RealFileSystem)).unwrap()
}

fn arrive(data: &Path, roots: &[&str]) -> Vec<PathBuf> {
    roots
        .iter()
        .map(|root| {
            let path = data.join(format!("{root}.fits.fz"));
            std::fs::write(&path, b"packed").unwrap();
            path
        })
        .collect()
}

fn shipped(runner: &FakeRunner) -> Vec<String> {
    runner
        .calls_to("scp")
        .iter()
        .map(|args| {
            Path::new(&args[0])
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

async fn handle_all(push: &mut CtioPush, paths: Vec<PathBuf>) -> Vec<FileReport> {
    let mut reports = push.handle_batch(paths).await;
    reports.extend(push.finish().await);
    reports.sort_by(|a, b| a.path.cmp(&b.path));
    reports
}

#[tokio::test]
async fn serial_ships_in_name_order_and_cleans_up() {
    init_tracing();
    let data = tempfile::tempdir().unwrap();
    let runner = tools();
    let mut p = push(
        data.path(),
        ConfigFileBuilder::new().method(PushMethod::Serial),
        &runner,
    );
    let mut paths = arrive(data.path(), &["DECam_00912346", "DECam_00912345"]);
    paths.reverse();

    let reports = p.handle_batch(paths.clone()).await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.stage == FileStage::Cleaned));
    assert_eq!(shipped(&runner), vec!["DECam_00912345.tar", "DECam_00912346.tar"]);

    let jp2 = data.path().join("jp2");
    assert_eq!(
        runner.calls_to("f2j_DECam")[0],
        vec![
            "-i".to_string(),
            data.path().join("DECam_00912345.fits").to_string_lossy().into_owned(),
            "-o".to_string(),
            jp2.join("DECam_00912345/DECam_00912345.jp2")
                .to_string_lossy()
                .into_owned(),
            "Qstep=0.000055".to_string(),
            "-num_threads".to_string(),
            "1".to_string(),
        ]
    );
    assert_eq!(
        runner.calls_to("ssh")[0],
        vec![
            RECEIVER.to_string(),
            "mv".to_string(),
            format!("{LANDING}/DECam_00912345.tar"),
            TARGET.to_string(),
        ]
    );
    assert_eq!(
        runner.calls_to("scp")[0][1],
        format!("{RECEIVER}:{LANDING}/")
    );

    for root in ["DECam_00912345", "DECam_00912346"] {
        assert!(data.path().join(format!("{root}.fits.fz")).is_file());
        assert!(!data.path().join(format!("{root}.fits")).exists());
        assert!(!jp2.join(root).exists());
        assert!(!jp2.join(format!("{root}.tar")).exists());
    }
}

#[tokio::test]
async fn failed_copy_keeps_the_tarball_and_skips_the_move() {
    init_tracing();
    let data = tempfile::tempdir().unwrap();
    let runner = tools().fail("scp", 1, "ssh: connect to host ozstar.swin.edu.au: Network is unreachable");
    let mut p = push(
        data.path(),
        ConfigFileBuilder::new().method(PushMethod::Serial),
        &runner,
    );
    let paths = arrive(data.path(), &["DECam_00912345"]);

    let reports = p.handle_batch(paths).await;

    assert_eq!(reports[0].stage, FileStage::Quarantined);
    assert!(reports[0].error.as_deref().unwrap().contains("Network is unreachable"));
    assert!(runner.calls_to("ssh").is_empty());
    assert!(data.path().join("jp2/DECam_00912345.tar").is_file());
    assert!(!data.path().join("DECam_00912345.fits").exists());
}

#[tokio::test]
async fn failed_compression_ships_nothing() {
    init_tracing();
    let data = tempfile::tempdir().unwrap();
    let runner = tools().fail("f2j_DECam", 1, "bad image");
    let mut p = push(
        data.path(),
        ConfigFileBuilder::new().method(PushMethod::Serial),
        &runner,
    );
    let paths = arrive(data.path(), &["DECam_00912345", "DECam_00912346"]);

    let reports = p.handle_batch(paths).await;

    assert!(reports.iter().all(|r| !r.is_ok()));
    assert!(runner.calls_to("tar").is_empty());
    assert!(runner.calls_to("scp").is_empty());
    assert!(!data.path().join("jp2/DECam_00912345").exists());
}

#[tokio::test]
async fn parallel_never_exceeds_max_parallel() {
    init_tracing();
    let data = tempfile::tempdir().unwrap();
    let runner = tools().with_delay(Duration::from_millis(20));
    let mut p = push(
        data.path(),
        ConfigFileBuilder::new()
            .method(PushMethod::Parallel)
            .max_parallel(2),
        &runner,
    );
    let paths = arrive(
        data.path(),
        &[
            "DECam_00912341",
            "DECam_00912342",
            "DECam_00912343",
            "DECam_00912344",
            "DECam_00912345",
        ],
    );

    let reports = handle_all(&mut p, paths.clone()).await;

    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(FileReport::is_ok));
    assert_eq!(
        reports.iter().map(|r| r.path.clone()).collect::<Vec<_>>(),
        paths
    );
    assert_eq!(runner.peak_concurrency(), 2);
    assert_eq!(runner.calls_to("scp").len(), 5);
}

#[tokio::test]
async fn bundle_ships_every_file_once() {
    init_tracing();
    let data = tempfile::tempdir().unwrap();
    let runner = tools().with_delay(Duration::from_millis(5));
    let mut p = push(
        data.path(),
        ConfigFileBuilder::new()
            .method(PushMethod::Bundle)
            .nbundle(2)
            .max_parallel(4),
        &runner,
    );
    let paths = arrive(
        data.path(),
        &["DECam_00912341", "DECam_00912342", "DECam_00912343"],
    );

    let reports = handle_all(&mut p, paths).await;

    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(FileReport::is_ok));
    let mut names = shipped(&runner);
    names.sort();
    assert_eq!(
        names,
        vec![
            "DECam_00912341.tar",
            "DECam_00912342.tar",
            "DECam_00912343.tar"
        ]
    );
}

#[tokio::test]
async fn end_of_night_sends_what_never_arrived_newest_first() {
    init_tracing();
    let data = tempfile::tempdir().unwrap();
    let runner = tools().stdout("ssh", "DECam_00912345.tar\nREADME\n");
    let p = push(
        data.path(),
        ConfigFileBuilder::new()
            .method(PushMethod::EndOfNight)
            .exp_min(912345),
        &runner,
    );
    arrive(
        data.path(),
        &[
            "DECam_00912344",
            "DECam_00912345",
            "DECam_00912346",
            "DECam_00912347",
        ],
    );

    let summary = p.end_of_night().await.unwrap();

    assert_eq!(
        runner.calls_to("ssh")[0],
        vec![
            RECEIVER.to_string(),
            "ls".to_string(),
            TARGET.trim_end_matches('/').to_string()
        ]
    );
    assert_eq!(shipped(&runner), vec!["DECam_00912347.tar", "DECam_00912346.tar"]);
    assert_eq!(summary.done, 2);
    // 912344 is absent but at or below the cut.
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.quarantined, 0);
}

#[tokio::test]
async fn end_of_night_fails_when_the_remote_cannot_be_listed() {
    init_tracing();
    let data = tempfile::tempdir().unwrap();
    let runner = tools().fail("ssh", 255, "Permission denied (publickey)");
    let p = push(
        data.path(),
        ConfigFileBuilder::new().method(PushMethod::EndOfNight),
        &runner,
    );
    arrive(data.path(), &["DECam_00912345"]);

    let err = p.end_of_night().await.unwrap_err();

    assert!(err.to_string().contains("Permission denied"), "{err}");
    assert!(runner.calls_to("scp").is_empty());
}

#[tokio::test]
async fn crashed_transfer_is_still_reported() {
    init_tracing();
    let data = tempfile::tempdir().unwrap();
    let runner = tools().effect("tar", |cmd| {
        if after(cmd, "-cf").ends_with("DECam_00912342.tar") {
            panic!("tar wrapper crashed");
        }
    });
    let mut p = push(
        data.path(),
        ConfigFileBuilder::new()
            .method(PushMethod::Parallel)
            .max_parallel(2),
        &runner,
    );
    let paths = arrive(
        data.path(),
        &["DECam_00912341", "DECam_00912342", "DECam_00912343"],
    );

    let reports = handle_all(&mut p, paths.clone()).await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[1].path, paths[1]);
    assert_eq!(reports[1].stage, FileStage::Quarantined);
    assert!(
        reports[1].error.as_deref().unwrap().contains("transfer task failed"),
        "{:?}",
        reports[1]
    );
    assert!(reports[0].is_ok());
    assert!(reports[2].is_ok());
}
