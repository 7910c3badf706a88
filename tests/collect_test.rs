//! Integration tests for output parsing and the two collectors.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::FakeRunner;
use duwatch::collect::directory::{aggregate, parse_du_output};
use duwatch::collect::filesystem::{DF_TIMEOUT, DfStats, parse_df_output};
use duwatch::collect::validate::validate_path;
use duwatch::collect::{
    Collectors, DirectoryCollector, DirectorySample, FilesystemCollector, FilesystemUsage,
    Measurement,
};
use duwatch::error::Error;
use duwatch::model::{DirectoryJob, FilesystemJob};
use duwatch::retry::RetryPolicy;
use tokio_util::sync::CancellationToken;

fn no_retry() -> RetryPolicy {
    RetryPolicy::none()
}

// ---------------------------------------------------------------------------
// df parsing
// ---------------------------------------------------------------------------

#[test]
fn df_single_line_row() {
    let out = "Filesystem 1K-blocks Used Available Use% Mounted on\n\
               /dev/sdb1 100 20 80 20% /mnt/data\n";
    assert_eq!(
        parse_df_output(out).unwrap(),
        DfStats {
            size_kb: 100,
            available_kb: 80
        }
    );
}

#[test]
fn df_wrapped_row() {
    let out = "Filesystem 1K-blocks Used Available Use% Mounted on\n\
               /dev/mapper/very-long-volume-group-name\n\
               \x20                100 20 80 20% /mnt/data\n";
    assert_eq!(
        parse_df_output(out).unwrap(),
        DfStats {
            size_kb: 100,
            available_kb: 80
        }
    );
}

#[test]
fn df_row_without_header() {
    let out = "/dev/sdb1 4096 1024 3072 25% /mnt/data\n";
    assert_eq!(
        parse_df_output(out).unwrap(),
        DfStats {
            size_kb: 4096,
            available_kb: 3072
        }
    );
}

#[test]
fn df_garbage_is_a_parse_error() {
    let err = parse_df_output("Filesystem Size Used\nnothing useful here\n").unwrap_err();
    assert!(matches!(err, Error::Parse { tool: "df", .. }));
    assert!(matches!(parse_df_output("").unwrap_err(), Error::Parse { .. }));
}

#[test]
fn usage_is_computed_in_bytes() {
    let usage = FilesystemUsage::from(DfStats {
        size_kb: 100,
        available_kb: 80,
    });
    assert_eq!(usage.size_bytes, 102_400);
    assert_eq!(usage.available_bytes, 81_920);
    assert_eq!(usage.used_bytes, 20_480);
    assert!((usage.used_ratio - 0.2).abs() < 1e-9);
}

#[test]
fn zero_sized_filesystem_has_zero_ratio() {
    let usage = FilesystemUsage::from(DfStats {
        size_kb: 0,
        available_kb: 0,
    });
    assert_eq!(usage.used_ratio, 0.0);
}

// ---------------------------------------------------------------------------
// du parsing and aggregation
// ---------------------------------------------------------------------------

#[test]
fn du_output_keeps_levels_up_to_limit() {
    let out = "4\t/data/a/b/c\n8\t/data/a/b\n16\t/data/a\n2\t/data/x\n32\t/data\n";
    let sizes = parse_du_output(out).unwrap();
    let samples = aggregate(Path::new("/data"), 2, &sizes);

    let got: Vec<(&str, u32, u64)> = samples
        .iter()
        .map(|s| (s.path.to_str().unwrap(), s.level, s.size_bytes))
        .collect();
    assert_eq!(
        got,
        [
            ("/data", 0, 32 * 1024),
            ("/data/a", 1, 16 * 1024),
            ("/data/x", 1, 2 * 1024),
            ("/data/a/b", 2, 8 * 1024),
        ]
    );
}

#[test]
fn du_trailing_slashes_are_normalized() {
    let sizes = parse_du_output("10\t/data/\n5\t/data/a/\n").unwrap();
    let samples = aggregate(Path::new("/data/"), 1, &sizes);
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].path, Path::new("/data"));
    assert_eq!(samples[1].path, Path::new("/data/a"));
}

#[test]
fn du_paths_outside_base_are_dropped() {
    let sizes = parse_du_output("1\t/data2/a\n3\t/data\n").unwrap();
    let samples = aggregate(Path::new("/data"), 3, &sizes);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].level, 0);
}

#[test]
fn du_malformed_size_is_a_parse_error() {
    let err = parse_du_output("lots\t/data\n").unwrap_err();
    assert!(matches!(err, Error::Parse { tool: "du", .. }));
}

// ---------------------------------------------------------------------------
// Path validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsafe_paths_are_rejected() {
    for path in ["/data/../etc", "~/data", "/data/*", "/data/?", "/data/[ab]", "data"] {
        let err = validate_path(Path::new(path)).await.unwrap_err();
        assert!(
            matches!(err, Error::Validation { .. }),
            "{path} should fail validation"
        );
    }
}

#[tokio::test]
async fn missing_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("not-there");
    let err = validate_path(&missing).await.unwrap_err();
    assert!(matches!(err, Error::Validation { ref reason, .. } if reason.contains("does not exist")));
    validate_path(dir.path()).await.unwrap();
}

// ---------------------------------------------------------------------------
// Collectors against a scripted runner
// ---------------------------------------------------------------------------

#[tokio::test]
async fn filesystem_collector_runs_df_on_mount_point() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new().output("df", common::df_output(dir.path())));
    let collector = FilesystemCollector::new(runner.clone(), no_retry());

    let usage = collector
        .collect(
            &FilesystemJob {
                mount_point: dir.path().to_path_buf(),
                device: "/dev/sdb1".to_string(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(usage.size_bytes, 102_400);
    assert_eq!(usage.available_bytes, 81_920);

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "df");
    assert_eq!(calls[0].args, ["-k", dir.path().to_str().unwrap()]);
    assert_eq!(calls[0].timeout, DF_TIMEOUT);
}

#[tokio::test]
async fn filesystem_collector_rejects_unsafe_mount_without_running_df() {
    let runner = Arc::new(FakeRunner::new().output("df", "irrelevant"));
    let collector = FilesystemCollector::new(runner.clone(), no_retry());

    let err = collector
        .collect(
            &FilesystemJob {
                mount_point: "/mnt/../etc".into(),
                device: String::new(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn filesystem_collector_retries_failed_df() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        FakeRunner::new()
            .then(Err(common::command_failed("df")))
            .output("df", common::df_output(dir.path())),
    );
    let collector = FilesystemCollector::new(runner.clone(), RetryPolicy::default());

    let usage = collector
        .collect(
            &FilesystemJob {
                mount_point: dir.path().to_path_buf(),
                device: String::new(),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(usage.size_bytes, 102_400);
    assert_eq!(runner.call_count(), 2);
}

#[tokio::test]
async fn directory_collector_reports_levels_up_to_limit() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path();
    let out = format!(
        "4\t{b}/a/b/c\n8\t{b}/a/b\n16\t{b}/a\n32\t{b}\n",
        b = base.display()
    );
    let runner = Arc::new(FakeRunner::new().output("du", out));
    let collector = DirectoryCollector::new(runner.clone(), no_retry());

    let samples = collector
        .collect(
            &DirectoryJob {
                path: base.to_path_buf(),
                subdirectory_levels: 2,
            },
            Duration::from_secs(20),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let levels: Vec<u32> = samples.iter().map(|s| s.level).collect();
    assert_eq!(levels, [0, 1, 2]);
    assert!(samples.iter().all(|s| s.level <= 2));
    assert!(!samples.iter().any(|s| s.path.ends_with("a/b/c")));

    let calls = runner.calls();
    assert_eq!(calls[0].args[..3], ["-x", "-k", "--max-depth=2"]);
    assert_eq!(calls[0].timeout, Duration::from_secs(20));
}

#[tokio::test]
async fn directory_collector_summary_mode() {
    let dir = tempfile::tempdir().unwrap();
    let out = format!("64\t{}\n", dir.path().display());
    let runner = Arc::new(FakeRunner::new().output("du", out));
    let collector = DirectoryCollector::new(runner.clone(), no_retry());

    let samples = collector
        .collect(
            &DirectoryJob {
                path: dir.path().to_path_buf(),
                subdirectory_levels: 0,
            },
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        samples,
        [DirectorySample {
            path: dir.path().to_path_buf(),
            level: 0,
            size_bytes: 64 * 1024,
        }]
    );
    assert_eq!(runner.calls()[0].args[0], "-s");
}

#[tokio::test]
async fn directory_collector_summary_mode_needs_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let out = format!("1\t{b}/a\n2\t{b}\n", b = dir.path().display());
    let runner = Arc::new(FakeRunner::new().output("du", out));
    let collector = DirectoryCollector::new(runner, no_retry());

    let err = collector
        .collect(
            &DirectoryJob {
                path: dir.path().to_path_buf(),
                subdirectory_levels: 0,
            },
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Parse { tool: "du", .. }));
}

#[tokio::test]
async fn collectors_dispatch_on_job_kind() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        FakeRunner::new()
            .output("df", common::df_output(dir.path()))
            .output("du", format!("7\t{}\n", dir.path().display())),
    );
    let collectors = Collectors::new(runner, no_retry());
    let cancel = CancellationToken::new();

    let fs = common::filesystem_target("data", dir.path());
    let measured = collectors.measure(&fs.kind, fs.timeout, &cancel).await.unwrap();
    assert!(matches!(measured, Measurement::Filesystem(_)));

    let du = common::directory_target("data", dir.path(), 0);
    let measured = collectors.measure(&du.kind, du.timeout, &cancel).await.unwrap();
    match measured {
        Measurement::Directory { samples } => assert_eq!(samples[0].size_bytes, 7 * 1024),
        other => panic!("expected directory measurement, got {other:?}"),
    }
}
