use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{find_command, init_tracing, target};
use cursorfetch::{Decision, FetchResult, Fetcher, ManualExecutor};
use mongodb::bson::{doc, Document};

fn unused_callback(_: FetchResult) -> Decision {
    panic!("callback must not run for a fetcher that was never scheduled");
}

fn build_error(builder: cursorfetch::FetcherBuilder) -> String {
    format!("{:#}", builder.build().expect_err("construction should fail"))
}

#[test]
fn rejects_missing_or_empty_inputs() {
    init_tracing();
    let executor = Arc::new(ManualExecutor::new());

    let err = build_error(
        Fetcher::builder()
            .target(target())
            .database("db")
            .command(find_command())
            .callback(unused_callback),
    );
    assert!(err.contains("executor is required"), "{err}");

    let err = build_error(
        Fetcher::builder()
            .executor(executor.clone())
            .target(target())
            .database("")
            .command(find_command())
            .callback(unused_callback),
    );
    assert!(err.contains("database"), "{err}");

    let err = build_error(
        Fetcher::builder()
            .executor(executor.clone())
            .target(target())
            .database("db")
            .command(Document::new())
            .callback(unused_callback),
    );
    assert!(err.contains("command object cannot be empty"), "{err}");

    let err = build_error(
        Fetcher::builder()
            .executor(executor.clone())
            .target(target())
            .database("db")
            .command(find_command()),
    );
    assert!(err.contains("callback is required"), "{err}");

    let err = build_error(
        Fetcher::builder()
            .executor(executor.clone())
            .database("db")
            .command(find_command())
            .callback(unused_callback),
    );
    assert!(err.contains("target is required"), "{err}");

    let err = build_error(
        Fetcher::builder()
            .executor(executor.clone())
            .target(target())
            .database("db")
            .command(find_command())
            .timeout(Duration::ZERO)
            .callback(unused_callback),
    );
    assert!(err.contains("timeout"), "{err}");

    assert!(executor.requests().is_empty());
}

#[test]
fn accepts_any_cursor_producing_command() {
    let executor = Arc::new(ManualExecutor::new());
    for command in [
        doc! { "listIndexes": "coll" },
        doc! { "listCollections": 1 },
        doc! { "a": 1 },
    ] {
        let fetcher = Fetcher::new(executor.clone(), target(), "db", command.clone(), unused_callback)
            .expect("fetcher should build");
        assert_eq!(fetcher.command(), &command);
        assert!(!fetcher.is_active());
    }
    assert!(executor.requests().is_empty());
}

#[test]
fn diagnostic_string_describes_fetcher() {
    let executor = Arc::new(ManualExecutor::new());
    let fetcher = Fetcher::new(executor, target(), "db", find_command(), unused_callback)
        .expect("fetcher should build");

    let diagnostic = fetcher.diagnostic_string();
    assert!(!diagnostic.is_empty());
    assert!(diagnostic.contains("localhost:27017"), "{diagnostic}");
    assert!(diagnostic.contains("database: db"), "{diagnostic}");
    assert!(diagnostic.contains("active: false"), "{diagnostic}");
    assert_eq!(diagnostic, fetcher.to_string());
    assert_eq!(fetcher.db_name(), "db");
    assert_eq!(fetcher.target(), &target());
    assert!(fetcher.outcome().is_none());
}
