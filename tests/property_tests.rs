//! Property-based tests for the status machine, lock keys and the inbound
//! frame parser.

use proptest::prelude::*;
use serde_json::{json, Value};

use jobwire::shared::InboundFrame;
use jobwire::{ErrorCode, JobFailure, RequestLocks, TaskRecord, TaskStatus};

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(vec![
        TaskStatus::Submitted,
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ])
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9 _/.-]{0,16}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

#[derive(Debug, Clone)]
enum Event {
    Progress(i64),
    Done,
    Fail(i32),
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        any::<i64>().prop_map(Event::Progress),
        Just(Event::Done),
        prop_oneof![Just(-32800), Just(-32602), Just(-32603), any::<i32>()].prop_map(Event::Fail),
    ]
}

proptest! {
    /// Terminal statuses reject every transition.
    #[test]
    fn terminal_statuses_are_sinks(to in arb_status()) {
        for from in [TaskStatus::Done, TaskStatus::Failed, TaskStatus::Cancelled] {
            prop_assert!(from.is_terminal());
            prop_assert!(!from.can_transition_to(&to));
        }
    }

    /// Nothing ever returns to Submitted.
    #[test]
    fn submitted_is_never_reentered(from in arb_status()) {
        prop_assert!(!from.can_transition_to(&TaskStatus::Submitted));
    }

    /// Whatever the event order, a record settles at most once and the
    /// first terminal event decides the outcome.
    #[test]
    fn first_terminal_event_wins(events in prop::collection::vec(arb_event(), 0..24)) {
        let mut record = TaskRecord::submitted(1, "t", "m", None);
        let mut expected = TaskStatus::Submitted;

        for event in &events {
            match event {
                Event::Progress(p) => {
                    record.record_progress(json!(p));
                    if !expected.is_terminal() {
                        expected = TaskStatus::InProgress;
                    }
                },
                Event::Done => {
                    record.mark_done();
                    if !expected.is_terminal() {
                        expected = TaskStatus::Done;
                    }
                },
                Event::Fail(code) => {
                    record.mark_failed(JobFailure::new(ErrorCode(*code), "x"));
                    if !expected.is_terminal() {
                        expected = if *code == -32800 {
                            TaskStatus::Cancelled
                        } else {
                            TaskStatus::Failed
                        };
                    }
                },
            }
        }
        prop_assert_eq!(record.status, expected);
    }

    /// Lock keys are equal exactly when method and arguments are equal.
    #[test]
    fn lock_keys_distinguish_arguments(
        method in "[a-zA-Z]{1,12}",
        a in prop::collection::vec(arb_scalar(), 0..4),
        b in prop::collection::vec(arb_scalar(), 0..4),
    ) {
        let key_a = RequestLocks::key_for(&method, &a);
        let key_b = RequestLocks::key_for(&method, &b);
        prop_assert_eq!(key_a == key_b, a == b);
        let prefix = format!("{method}(");
        prop_assert!(key_a.starts_with(&prefix));
    }

    /// The inbound parser never panics on arbitrary text.
    #[test]
    fn parser_survives_arbitrary_text(text in ".{0,256}") {
        let _ = InboundFrame::parse(&text);
    }

    /// Any frame with a numeric id and a result parses to that id.
    #[test]
    fn result_frames_keep_their_id(id in any::<u64>(), result in arb_scalar()) {
        let text = json!({ "id": id, "result": result }).to_string();
        let frame = InboundFrame::parse(&text).unwrap();
        prop_assert_eq!(frame.id(), id);
        prop_assert!(frame.is_terminal());
    }
}
