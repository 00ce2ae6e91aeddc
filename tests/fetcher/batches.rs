use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::support::helpers::{
    first_batch_reply, follow_cursor, next_batch_reply, target, FetcherFixture,
};
use cursorfetch::{
    Decision, ErrorCode, FetchOutcome, Fetcher, ManualExecutor, NextAction,
};
use mongodb::bson::doc;

#[test]
fn fetch_multiple_batches() {
    let fixture = FetcherFixture::new();
    fixture.fetcher.schedule().expect("schedule");

    fixture.process_intermediate(first_batch_reply(1, vec![doc! { "_id": 1 }]));
    assert_eq!(fixture.log.last_batch().documents, vec![doc! { "_id": 1 }]);

    fixture.process_intermediate(next_batch_reply(1, vec![doc! { "_id": 2 }]));
    assert_eq!(fixture.log.last_batch().documents, vec![doc! { "_id": 2 }]);

    fixture.process_reply(next_batch_reply(0, vec![doc! { "_id": 3 }]));
    assert_eq!(fixture.log.last_batch().documents, vec![doc! { "_id": 3 }]);

    assert_eq!(fixture.log.len(), 3);
    assert_eq!(fixture.fetcher.batches_received(), 3);
    assert_eq!(fixture.fetcher.outcome(), Some(FetchOutcome::Exhausted));

    let requests = fixture.executor.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].command, doc! { "find": "coll" });
    for request in &requests[1..] {
        assert_eq!(request.command, doc! { "getMore": 1_i64, "collection": "coll" });
        assert_eq!(request.db_name, "db");
        assert_eq!(request.target, target());
    }
}

#[test]
fn exhausted_cursor_ignores_get_more_request() {
    let fixture = FetcherFixture::with_policy(|result| match result {
        Ok(_) => Decision::get_more(doc! { "getMore": 0_i64, "collection": "coll" }),
        Err(_) => Decision::default(),
    });
    fixture.fetcher.schedule().expect("schedule");
    fixture.process_reply(first_batch_reply(0, vec![doc! { "_id": 1 }]));

    assert_eq!(fixture.executor.requests().len(), 1);
    assert_eq!(fixture.log.last_batch().cursor_id, 0);
    assert_eq!(fixture.fetcher.outcome(), Some(FetchOutcome::Exhausted));
}

#[test]
fn cancel_while_get_more_is_outstanding() {
    let fixture = FetcherFixture::new();
    fixture.fetcher.schedule().expect("schedule");
    fixture.process_intermediate(first_batch_reply(1, vec![doc! { "_id": 1 }]));
    fixture.process_intermediate(next_batch_reply(1, vec![doc! { "_id": 2 }]));

    fixture.fetcher.cancel();
    fixture.finish();

    assert_eq!(fixture.log.len(), 3);
    assert_eq!(fixture.log.last_error().code(), ErrorCode::CallbackCanceled);
}

#[test]
fn shutdown_while_get_more_is_outstanding() {
    let fixture = FetcherFixture::new();
    fixture.fetcher.schedule().expect("schedule");
    fixture.process_intermediate(first_batch_reply(1, vec![doc! { "_id": 1 }]));
    fixture.process_intermediate(next_batch_reply(1, vec![doc! { "_id": 2 }]));

    fixture.executor.shutdown();
    fixture.finish();

    assert_eq!(fixture.log.len(), 3);
    assert_eq!(fixture.log.last_error().code(), ErrorCode::ShutdownInProgress);
}

#[test]
fn stopping_after_second_batch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fixture = FetcherFixture::with_policy(move |result| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            follow_cursor(result)
        } else {
            Decision::stop()
        }
    });
    fixture.fetcher.schedule().expect("schedule");
    fixture.process_intermediate(first_batch_reply(1, vec![doc! { "_id": 1 }]));

    fixture.reply(next_batch_reply(1, vec![doc! { "_id": 2 }]));
    fixture.run();

    assert!(!fixture.fetcher.is_active());
    assert!(!fixture.executor.has_ready_requests());
    assert_eq!(fixture.log.last_batch().documents, vec![doc! { "_id": 2 }]);
    assert_eq!(fixture.fetcher.outcome(), Some(FetchOutcome::Stopped));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn shutdown_during_second_batch_reports_scheduling_failure() {
    let executor = Arc::new(ManualExecutor::new());
    let shutdown_called = Arc::new(AtomicBool::new(false));
    let policy_executor = executor.clone();
    let flag = shutdown_called.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let fixture = FetcherFixture::with_executor_and_policy(executor, move |result| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        if call == 1 {
            let batch = result.as_ref().expect("second batch should parse");
            assert_eq!(batch.documents, vec![doc! { "_id": 2 }]);
            policy_executor.shutdown();
            flag.store(true, Ordering::SeqCst);
        }
        follow_cursor(result)
    });
    fixture.fetcher.schedule().expect("schedule");
    fixture.process_intermediate(first_batch_reply(1, vec![doc! { "_id": 1 }]));

    fixture.reply(next_batch_reply(1, vec![doc! { "_id": 2 }]));
    fixture.run();

    assert!(shutdown_called.load(Ordering::SeqCst));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.log.last_error().code(), ErrorCode::ShutdownInProgress);
    assert!(!fixture.fetcher.is_active());
    assert_eq!(fixture.executor.requests().len(), 2);
}

#[test]
fn undecided_callback_finishes_without_continuation() {
    let fixture = FetcherFixture::with_policy(|_| Decision::default());
    fixture.fetcher.schedule().expect("schedule");
    fixture.process_reply(first_batch_reply(5, vec![doc! { "_id": 1 }]));

    assert_eq!(fixture.executor.requests().len(), 1);
    assert_eq!(fixture.fetcher.outcome(), Some(FetchOutcome::NoContinuation));
}

#[test]
fn get_more_without_command_finishes_without_continuation() {
    for decision in [
        Decision {
            action: NextAction::GetMore,
            continuation: None,
        },
        Decision::get_more(doc! {}),
        Decision {
            action: NextAction::ExhaustContinue,
            continuation: Some(doc! { "getMore": 5_i64, "collection": "coll" }),
        },
    ] {
        let fixture = FetcherFixture::with_policy(move |_| decision.clone());
        fixture.fetcher.schedule().expect("schedule");
        fixture.process_reply(first_batch_reply(5, vec![doc! { "_id": 1 }]));

        assert_eq!(fixture.executor.requests().len(), 1);
        assert_eq!(fixture.fetcher.outcome(), Some(FetchOutcome::NoContinuation));
    }
}

#[test]
fn cancel_from_callback_stops_before_continuation() {
    let fetcher_slot: Arc<Mutex<Option<Arc<Fetcher>>>> = Arc::default();
    let slot = fetcher_slot.clone();
    let fixture = FetcherFixture::with_policy(move |result| {
        if let Some(fetcher) = slot.lock().unwrap().as_ref() {
            fetcher.cancel();
        }
        follow_cursor(result)
    });
    let FetcherFixture {
        executor,
        log,
        fetcher,
    } = fixture;
    let fetcher = Arc::new(fetcher);
    *fetcher_slot.lock().unwrap() = Some(fetcher.clone());

    fetcher.schedule().expect("schedule");
    executor
        .schedule_reply(first_batch_reply(1, vec![doc! { "_id": 1 }]))
        .expect("reply");
    executor.run_ready_operations();

    assert!(!fetcher.is_active());
    assert_eq!(executor.requests().len(), 1);
    assert_eq!(log.len(), 2);
    assert!(log.calls()[0].is_ok());
    assert_eq!(log.last_error().code(), ErrorCode::CallbackCanceled);

    fetcher_slot.lock().unwrap().take();
}

#[test]
fn continuation_honours_per_command_timeout() {
    let executor = Arc::new(ManualExecutor::new());
    let log = crate::support::helpers::CallbackLog::default();
    let recorder = log.clone();
    let fetcher = Fetcher::builder()
        .executor(executor.clone())
        .target(target())
        .database("db")
        .command(doc! { "find": "coll" })
        .timeout(Duration::from_secs(5))
        .callback(move |result| {
            recorder.record(&result);
            follow_cursor(&result)
        })
        .build()
        .expect("fetcher should build");

    fetcher.schedule().expect("schedule");
    executor
        .schedule_reply(first_batch_reply(1, vec![doc! { "_id": 1 }]))
        .expect("reply");
    executor.run_ready_operations();
    assert!(fetcher.is_active());

    let requests = executor.requests();
    assert!(requests
        .iter()
        .all(|request| request.timeout == Some(Duration::from_secs(5))));

    executor.advance_clock(Duration::from_secs(5));
    executor.run_ready_operations();

    assert!(!fetcher.is_active());
    assert_eq!(log.last_error().code(), ErrorCode::NetworkTimeout);
}
