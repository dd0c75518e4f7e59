mod common;

use std::path::{Path, PathBuf};

use tempfile::Builder;

use shardsum::{ErrorKind, JobConfig, JobReport, JobState, MergeJob, Record};

use common::{random_shards, write_shard};

fn job(inputs: &[PathBuf], output: &Path, tmp: &Path, job_id: &str, width: usize) -> MergeJob {
    let config = JobConfig::builder(output)
        .inputs(inputs.iter().cloned())
        .batch_width(width)
        .parallelism(1)
        .tmp_dir(tmp)
        .job_id(job_id)
        .build();
    MergeJob::new(config).unwrap()
}

fn fresh_run(inputs: &[PathBuf], dir: &Path) -> (Vec<u8>, JobReport) {
    let output = dir.join("fresh.tsv.gz");
    let report = job(inputs, &output, dir, "fresh", 3).run().unwrap();
    (std::fs::read(&output).unwrap(), report)
}

#[test]
fn test_restart_is_byte_identical() {
    let dir = Builder::new().prefix("test_restart").tempdir().unwrap();
    let (inputs, _) = random_shards(dir.path(), 20, 21);
    let (expected, fresh) = fresh_run(&inputs, dir.path());

    // Break the last shard so the first attempt dies in the middle of level 0.
    let last = inputs.last().unwrap().clone();
    let good_bytes = std::fs::read(&last).unwrap();
    std::fs::write(&last, b"0\tA\n").unwrap();

    let output = dir.path().join("restarted.tsv.gz");
    let first = job(&inputs, &output, dir.path(), "restart", 3);
    let err = first.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShardCorrupt);
    assert!(matches!(first.state(), JobState::Failed(_)));
    assert!(!output.exists());

    let work_dir = first.work_dir();
    assert!(work_dir.join("manifest.json").exists());
    assert!(work_dir.join("level-000-batch-000000.tsv.gz").exists());
    // A writer killed mid-batch leaves a temp file behind.
    let orphan = work_dir.join(".level-000-batch-000006.tsv.gz.crash1.tmp");
    std::fs::write(&orphan, b"partial").unwrap();

    std::fs::write(&last, good_bytes).unwrap();
    let second = job(&inputs, &output, dir.path(), "restart", 3);
    let report = second.run().unwrap();

    assert!(report.resumed);
    assert_eq!(report.batches_skipped, 6);
    assert_eq!(report.batches_run + report.batches_skipped, fresh.batches_run);
    assert_eq!(std::fs::read(&output).unwrap(), expected);
    assert!(!orphan.exists());
    assert!(!work_dir.exists());
}

#[test]
fn test_restart_after_later_level_failure() {
    let dir = Builder::new().prefix("test_restart_level").tempdir().unwrap();
    let (inputs, _) = random_shards(dir.path(), 20, 22);
    let (expected, _) = fresh_run(&inputs, dir.path());

    let output = dir.path().join("restarted.tsv.gz");
    let first = job(&inputs, &output, dir.path(), "later", 3);
    let work_dir = first.work_dir();

    // Make level 1 fail: a directory where its first output should go
    // cannot be replaced by the writer's rename.
    std::fs::create_dir_all(work_dir.join("level-001-batch-000000.tsv.gz")).unwrap();
    let err = first.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriterFailure);

    std::fs::remove_dir(work_dir.join("level-001-batch-000000.tsv.gz")).unwrap();
    let report = job(&inputs, &output, dir.path(), "later", 3).run().unwrap();

    // All of level 0 was committed before the failure.
    assert_eq!(report.batches_skipped, 7);
    assert_eq!(std::fs::read(&output).unwrap(), expected);
}

#[test]
fn test_changed_settings_refuse_to_resume() {
    let dir = Builder::new().prefix("test_fingerprint").tempdir().unwrap();
    let (inputs, _) = random_shards(dir.path(), 10, 23);
    let output = dir.path().join("out.tsv.gz");

    // Leave a failed attempt behind at width 3.
    let first = job(&inputs, &output, dir.path(), "pinned", 3);
    let blocker = first.work_dir().join("level-000-batch-000002.tsv.gz");
    std::fs::create_dir_all(&blocker).unwrap();
    assert_eq!(first.run().unwrap_err().kind(), ErrorKind::WriterFailure);
    std::fs::remove_dir(&blocker).unwrap();

    // Same id, different width: the completed intermediates do not fit the
    // new merge tree.
    let err = job(&inputs, &output, dir.path(), "pinned", 4).run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Manifest);
    assert!(!output.exists());

    let report = job(&inputs, &output, dir.path(), "pinned", 3).run().unwrap();
    assert!(report.resumed);
    assert_eq!(report.batches_skipped, 2);
}

#[test]
fn test_regenerated_input_is_merged_again() {
    let dir = Builder::new().prefix("test_regenerated").tempdir().unwrap();
    let (inputs, _) = random_shards(dir.path(), 9, 24);
    let output = dir.path().join("out.tsv.gz");

    // Level 0 commits all three batches, then the final rename fails.
    std::fs::create_dir(&output).unwrap();
    let first = job(&inputs, &output, dir.path(), "regen", 3);
    assert_eq!(first.run().unwrap_err().kind(), ErrorKind::WriterFailure);
    std::fs::remove_dir(&output).unwrap();

    // The producer rewrites a shard of the first batch before the rerun.
    let regenerated: Vec<Record> = (0..40)
        .map(|i| Record::new(0, format!("New_{i:02}"), i + 1))
        .collect();
    write_shard(&inputs[0], &regenerated);

    let report = job(&inputs, &output, dir.path(), "regen", 3).run().unwrap();
    assert!(report.resumed);
    assert_eq!(report.batches_skipped, 2);
    assert_eq!(report.batches_run, 2);

    let (expected, _) = fresh_run(&inputs, dir.path());
    assert_eq!(std::fs::read(&output).unwrap(), expected);
}
