//! Installs the global subscriber, so it runs in its own test binary where no
//! other test can have claimed it first.

use signals_pipeline::logging;

#[test]
fn writes_to_the_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log").join("run.log");

    logging::init("info", Some(&path)).unwrap();
    tracing::info!(target: "signals_pipeline", "hello from the test");

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("hello from the test"));
    assert!(logging::init("info", None).is_err());
}
