//! End-to-end CLI tests
//!
//! Each test drives the compiled binary over a small inline corpus in its
//! own temp directory: vocabulary build, database build, evaluation, and
//! the failure paths.

use std::path::{Path, PathBuf};
use std::process::Command;

fn stride_bin() -> &'static str {
    env!("CARGO_BIN_EXE_stride")
}

fn run_stride(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(stride_bin())
        .args(args)
        .output()
        .expect("failed to execute stride binary");
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

/// Two near-identical counting loops plus one function with no human
/// labels. Training and evaluating on the same file keeps the predictions
/// exact.
const CORPUS: &str = concat!(
    r#"{"tokens":["int","@@i@@","=","0x0",";","while","(","@@i@@","<","@@n@@",")","@@i@@","++",";"],"labels":{"name":{"i":{"label":"i","human":true},"n":{"label":"len","human":true}}},"meta":{"fit":true,"id":1,"func_name":"count_up"}}"#,
    "\n",
    r#"{"tokens":["int","@@x@@","=","0x0",";","while","(","@@x@@","<","@@m@@",")","@@x@@","++",";"],"labels":{"name":{"x":{"label":"i","human":true},"m":{"label":"len","human":true}}},"meta":{"fit":false,"id":2,"func_name":"count_more"}}"#,
    "\n",
    r#"{"tokens":["return","@@v@@",";"],"labels":{"name":{"v":{"label":"<none>","human":false}}},"meta":{"fit":false,"id":3,"func_name":"passthrough"}}"#,
    "\n",
);

fn write_corpus(dir: &Path) -> PathBuf {
    let path = dir.join("corpus.jsonl");
    std::fs::write(&path, CORPUS).expect("write corpus");
    path
}

#[test]
fn test_build_vocab() {
    let dir = tempfile::tempdir().expect("temp dir");
    let corpus = write_corpus(dir.path());
    let vocab = dir.path().join("name.vocab");

    let (code, stdout, stderr) = run_stride(&[
        "build-vocab",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
    ]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("2 labels"), "stdout: {stdout}");

    // "i" has 6 occurrences, "len" has 2; the non-human label is absent.
    let contents = std::fs::read_to_string(&vocab).expect("read vocab");
    assert_eq!(contents, "i\t6\nlen\t2\n");
}

#[test]
fn test_full_pipeline_round_trip() {
    let dir = tempfile::tempdir().expect("temp dir");
    let corpus = write_corpus(dir.path());
    let vocab = dir.path().join("name.vocab");
    let db3 = dir.path().join("name.3.db");
    let db1 = dir.path().join("name.1.db");
    let out = dir.path().join("preds.csv");

    let (code, _, stderr) = run_stride(&[
        "build-vocab",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
    ]);
    assert_eq!(code, 0, "stderr: {stderr}");

    for (size, db) in [("3", &db3), ("1", &db1)] {
        let (code, _, stderr) = run_stride(&[
            "build-db",
            corpus.to_str().unwrap(),
            vocab.to_str().unwrap(),
            db.to_str().unwrap(),
            "--size",
            size,
        ]);
        assert_eq!(code, 0, "stderr: {stderr}");
        assert!(db.exists());
    }

    let (code, stdout, stderr) = run_stride(&[
        "eval",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
        out.to_str().unwrap(),
        "--dbs",
        db3.to_str().unwrap(),
        db1.to_str().unwrap(),
        "--nproc",
        "2",
    ]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("predictions"), "stdout: {stdout}");

    let csv = std::fs::read_to_string(&out).expect("read csv");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "var,pred,label,count,fit,func_name,id");
    // Four human-labeled variables across the first two functions; the
    // unlabeled third function contributes no rows.
    assert_eq!(lines.len(), 5);
    // The corpus was its own training set, so predictions are exact.
    assert_eq!(lines[1], "i,i,i,3,true,count_up,1");
    assert_eq!(lines[2], "n,len,len,1,true,count_up,1");
    assert_eq!(lines[3], "m,len,len,1,false,count_more,2");
    assert_eq!(lines[4], "x,i,i,3,false,count_more,2");
}

#[test]
fn test_build_db_is_deterministic() {
    let dir = tempfile::tempdir().expect("temp dir");
    let corpus = write_corpus(dir.path());
    let vocab = dir.path().join("name.vocab");
    let (code, _, _) = run_stride(&[
        "build-vocab",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
    ]);
    assert_eq!(code, 0);

    let a = dir.path().join("a.db");
    let b = dir.path().join("b.db");
    for db in [&a, &b] {
        let (code, _, stderr) = run_stride(&[
            "build-db",
            corpus.to_str().unwrap(),
            vocab.to_str().unwrap(),
            db.to_str().unwrap(),
            "--flanking",
            "--workers",
            "4",
        ]);
        assert_eq!(code, 0, "stderr: {stderr}");
    }

    assert_eq!(
        std::fs::read(&a).expect("read a"),
        std::fs::read(&b).expect("read b"),
    );
}

#[test]
fn test_info_reports_databases() {
    let dir = tempfile::tempdir().expect("temp dir");
    let corpus = write_corpus(dir.path());
    let vocab = dir.path().join("name.vocab");
    let db = dir.path().join("name.db");
    run_stride(&[
        "build-vocab",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
    ]);
    run_stride(&[
        "build-db",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
        db.to_str().unwrap(),
        "--size",
        "2",
    ]);

    let (code, stdout, stderr) = run_stride(&["info", db.to_str().unwrap()]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("size=2"), "stdout: {stdout}");
    assert!(stdout.contains("records="), "stdout: {stdout}");
}

#[test]
fn test_malformed_corpus_fails_with_line_number() {
    let dir = tempfile::tempdir().expect("temp dir");
    let corpus = dir.path().join("bad.jsonl");
    std::fs::write(
        &corpus,
        concat!(
            r#"{"tokens":["@@v@@"],"labels":{"name":{"v":{"label":"i","human":true}}}}"#,
            "\nnot json\n"
        ),
    )
    .expect("write corpus");
    let vocab = dir.path().join("name.vocab");

    let (code, _, stderr) = run_stride(&[
        "build-vocab",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
    ]);
    assert_ne!(code, 0);
    assert!(stderr.contains(":2"), "stderr: {stderr}");
}

#[test]
fn test_invalid_placeholder_fails_fast() {
    let dir = tempfile::tempdir().expect("temp dir");
    let corpus = dir.path().join("bad.jsonl");
    std::fs::write(
        &corpus,
        concat!(
            r#"{"tokens":["@@v@@"],"labels":{"name":{"v":{"label":"i","human":true}}}}"#,
            "\n",
            r#"{"tokens":["int","@@a@@b@@",";"],"labels":{"name":{}}}"#,
            "\n",
        ),
    )
    .expect("write corpus");
    let vocab = dir.path().join("name.vocab");

    let (code, _, stderr) = run_stride(&[
        "build-vocab",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
    ]);
    assert_ne!(code, 0);
    assert!(
        stderr.contains("invalid variable placeholder"),
        "stderr: {stderr}"
    );
    assert!(stderr.contains(":2"), "stderr: {stderr}");
}

#[test]
fn test_eval_rejects_non_database_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let corpus = write_corpus(dir.path());
    let vocab = dir.path().join("name.vocab");
    run_stride(&[
        "build-vocab",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
    ]);

    // Large enough to pass the header-size check, but with a bad magic
    let bogus = dir.path().join("bogus.db");
    std::fs::write(&bogus, vec![0x61u8; 128]).expect("write bogus");

    let out = dir.path().join("preds.csv");
    let (code, _, stderr) = run_stride(&[
        "eval",
        corpus.to_str().unwrap(),
        vocab.to_str().unwrap(),
        out.to_str().unwrap(),
        "--dbs",
        bogus.to_str().unwrap(),
    ]);
    assert_ne!(code, 0);
    assert!(stderr.contains("magic"), "stderr: {stderr}");
}
