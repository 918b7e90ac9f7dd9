// tests/prepipe_dispatch.rs

mod common;
use crate::common::{ConfigFileBuilder, FakeRunner, init_tracing, write_exposure};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dwf_prepipe::config::Role;
use dwf_prepipe::engine::{ArrivalHandler, FileStage};
use dwf_prepipe::fs::{FileSystem, RealFileSystem};
use dwf_prepipe::prepipe::{self, Prepipe};
use dwf_prepipe::types::ArrivalMode;

fn prepipe(builder: ConfigFileBuilder, runner: &FakeRunner) -> Prepipe {
    let cfg = builder.build(Role::Prepipe);
    Prepipe::new(&cfg, Arc::new(runner.clone()), Arc::new(RealFileSystem)).unwrap()
}

fn tarball(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"tar bytes").unwrap();
    path
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn tarball_is_untarred_and_each_chunk_submitted() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new().stdout("sbatch", "Submitted batch job 42\n");
    let p = prepipe(
        ConfigFileBuilder::new()
            .push_dir(push.path())
            .ccds(1, 7)
            .n_per_script(3),
        &runner,
    );
    let tar = tarball(push.path(), "DECam_00912345.tar");

    let summary = p.unpack(&tar).await.unwrap();

    let sbatch_dir = push.path().join("sbatch");
    assert_eq!(
        summary.scripts,
        vec![
            sbatch_dir.join("DECam_00912345_q1.sbatch"),
            sbatch_dir.join("DECam_00912345_q2.sbatch"),
            sbatch_dir.join("DECam_00912345_q3.sbatch"),
        ]
    );
    assert_eq!(summary.submitted, 3);

    let untar = push.path().join("untar");
    assert_eq!(
        runner.calls_to("tar"),
        vec![vec![
            "-xf".to_string(),
            tar.to_string_lossy().into_owned(),
            "-C".to_string(),
            untar.to_string_lossy().into_owned(),
        ]]
    );
    assert_eq!(runner.programs(), vec!["tar", "sbatch", "sbatch", "sbatch"]);

    let last = read(&summary.scripts[2]);
    assert!(last.contains("#SBATCH -J DECam_00912345_q3"));
    assert!(last.contains("dwf-prepipe process-ccd -i DECam_00912345_7.jp2 -d ut240313 &"));
    assert!(!last.contains("_6.jp2"));
    assert!(untar.is_dir());
    assert!(sbatch_dir.join("out").is_dir());
}

#[tokio::test]
async fn dry_run_writes_scripts_but_submits_nothing() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let p = prepipe(
        ConfigFileBuilder::new()
            .push_dir(push.path())
            .ccds(1, 10)
            .dry_run(true),
        &runner,
    );
    let tar = tarball(push.path(), "DECam_00912346.tar");

    let summary = p.unpack(&tar).await.unwrap();

    assert_eq!(summary.scripts.len(), 2);
    assert_eq!(summary.submitted, 0);
    assert!(summary.scripts.iter().all(|s| s.is_file()));
    assert!(runner.calls_to("sbatch").is_empty());
}

#[tokio::test]
async fn excluded_ccds_and_reservation_show_in_scripts() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let p = prepipe(
        ConfigFileBuilder::new()
            .push_dir(push.path())
            .ccds(1, 4)
            .exclude_ccds(&[2])
            .reservation("dwf_night"),
        &runner,
    );
    let tar = tarball(push.path(), "DECam_00912347.tar");

    let summary = p.unpack(&tar).await.unwrap();
    let script = read(&summary.scripts[0]);

    assert!(script.contains("#SBATCH --reservation=dwf_night"));
    assert!(script.contains("-i DECam_00912347_1.jp2 "));
    assert!(!script.contains("-i DECam_00912347_2.jp2 "));
    assert!(script.contains("-i DECam_00912347_4.jp2 "));
}

#[tokio::test]
async fn failed_submission_does_not_stop_the_rest() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new().fail_when("sbatch", "_q2.sbatch", 1);
    let p = prepipe(
        ConfigFileBuilder::new()
            .push_dir(push.path())
            .ccds(1, 9)
            .n_per_script(3),
        &runner,
    );
    let tar = tarball(push.path(), "DECam_00912348.tar");

    let err = p.unpack(&tar).await.unwrap_err();

    assert_eq!(runner.calls_to("sbatch").len(), 3);
    assert!(err.to_string().contains("1 of 3 scripts not submitted"), "{err}");
}

#[tokio::test]
async fn failed_untar_submits_nothing() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new().fail("tar", 2, "tar: Unexpected EOF in archive");
    let mut p = prepipe(ConfigFileBuilder::new().push_dir(push.path()), &runner);
    let tar = tarball(push.path(), "DECam_00912349.tar");

    let reports = p.handle_batch(vec![tar.clone()]).await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].stage, FileStage::Quarantined);
    assert!(reports[0].error.as_deref().unwrap().contains("Unexpected EOF"));
    assert!(runner.calls_to("sbatch").is_empty());
}

#[tokio::test]
async fn raw_exposure_is_split_into_ccd_files() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let p = prepipe(
        ConfigFileBuilder::new()
            .push_dir(push.path())
            .mode(ArrivalMode::Raw)
            .ccds(1, 3),
        &runner,
    );
    let exposure = push.path().join("DECam_00912350.fits");
    write_exposure(&exposure, 4);

    let summary = p.unpack(&exposure).await.unwrap();

    let untar = push.path().join("untar");
    for ccd in 1..=4 {
        assert!(untar.join(format!("DECam_00912350_{ccd}.fits")).is_file());
    }
    // The guider extension is not a CCD.
    assert!(!untar.join("DECam_00912350_5.fits").exists());
    assert!(runner.calls_to("funpack").is_empty());

    let script = read(&summary.scripts[0]);
    assert!(script.contains("-i DECam_00912350_3.fits "));
    assert!(!script.contains("_4.fits"));
}

#[tokio::test]
async fn compressed_raw_exposure_is_funpacked_first() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let untar = push.path().join("untar");
    let out = untar.join("DECam_00912351.fits");
    let runner = FakeRunner::new().effect("funpack", {
        let out = out.clone();
        move |_| write_exposure(&out, 2)
    });
    let p = prepipe(
        ConfigFileBuilder::new()
            .push_dir(push.path())
            .mode(ArrivalMode::Raw)
            .ccds(1, 2),
        &runner,
    );
    let packed = push.path().join("DECam_00912351.fits.fz");
    std::fs::write(&packed, b"packed").unwrap();

    let summary = p.unpack(&packed).await.unwrap();

    assert_eq!(
        runner.calls_to("funpack"),
        vec![vec![
            "-O".to_string(),
            out.to_string_lossy().into_owned(),
            packed.to_string_lossy().into_owned(),
        ]]
    );
    assert_eq!(summary.submitted, 1);
    // The unpacked exposure is removed once split.
    assert!(!out.exists());
    assert!(untar.join("DECam_00912351_2.fits").is_file());
}

#[tokio::test]
async fn job_args_are_placed_before_the_subcommand() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let p = prepipe(ConfigFileBuilder::new().push_dir(push.path()).ccds(1, 1), &runner)
        .with_job_args(vec!["--config".to_string(), "/etc/dwf/Prepipe.toml".to_string()]);
    let tar = tarball(push.path(), "DECam_00912352.tar");

    let summary = p.unpack(&tar).await.unwrap();

    let script = read(&summary.scripts[0]);
    assert!(script.contains(
        "dwf-prepipe --config /etc/dwf/Prepipe.toml process-ccd -i DECam_00912352_1.jp2 -d ut240313 &"
    ));
}

#[tokio::test]
async fn reprocess_runs_each_listed_file_and_skips_missing_ones() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new().fail_when("tar", "DECam_00912361", 2);
    let p = prepipe(ConfigFileBuilder::new().push_dir(push.path()).ccds(1, 2), &runner);

    let a = tarball(push.path(), "DECam_00912360.tar");
    let b = tarball(push.path(), "DECam_00912361.tar");
    let list = push.path().join("reprocess.txt");
    std::fs::write(
        &list,
        format!(
            "{}\n\n{}\n{}\n",
            a.display(),
            push.path().join("DECam_gone.tar").display(),
            b.display()
        ),
    )
    .unwrap();

    let summary = prepipe::reprocess(&p, &RealFileSystem, &list, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(summary.done, 1);
    assert_eq!(summary.quarantined, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(runner.calls_to("tar").len(), 2);
    assert!(RealFileSystem.is_file(&push.path().join("sbatch/DECam_00912360_q1.sbatch")));
}

#[tokio::test(start_paused = true)]
async fn reprocess_pauses_between_files() {
    init_tracing();
    let push = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let p = prepipe(
        ConfigFileBuilder::new()
            .push_dir(push.path())
            .ccds(1, 1)
            .dry_run(true),
        &runner,
    );
    let a = tarball(push.path(), "DECam_00912370.tar");
    let b = tarball(push.path(), "DECam_00912371.tar");
    let list = push.path().join("reprocess.txt");
    std::fs::write(&list, format!("{}\n{}\n", a.display(), b.display())).unwrap();

    let start = tokio::time::Instant::now();
    let summary = prepipe::reprocess(&p, &RealFileSystem, &list, Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(summary.done, 2);
    assert_eq!(start.elapsed(), Duration::from_secs(60));
}
