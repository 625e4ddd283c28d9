//! Ledger and run invariants checked over hand-built event sequences.

use std::sync::Mutex;

use futures::StreamExt;
use orchestration::{
    consume, project, AttemptPhase, ResultSet, Run, RunRequest, RunState, SessionEnd, StreamEvent,
};
use tokio_util::sync::CancellationToken;

fn generating(n: u32) -> StreamEvent {
    StreamEvent::Generating {
        attempt: n,
        status: Some(format!("attempt {n}")),
    }
}

fn generated(n: u32) -> StreamEvent {
    StreamEvent::Generated {
        attempt: n,
        sql: Some(format!("SELECT {n}")),
        raw_sql: Some(format!("raw {n}")),
        status: None,
    }
}

fn executing(n: u32) -> StreamEvent {
    StreamEvent::Executing {
        attempt: n,
        sql: Some(format!("SELECT {n}")),
        status: None,
    }
}

fn error(n: u32) -> StreamEvent {
    StreamEvent::Error {
        attempt: n,
        sql: Some(format!("SELECT {n}")),
        error: format!("failure {n}"),
        prompt: Some("retry prompt".into()),
        is_final: false,
    }
}

fn success(n: u32) -> StreamEvent {
    StreamEvent::Success {
        attempt: n,
        sql: Some(format!("SELECT {n}")),
        status: None,
        result: ResultSet::new(vec!["n".into()], Vec::new()),
    }
}

/// Three failed attempts then a success on the fourth.
fn long_sequence() -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::Start {
        message: None,
        max_retries: Some(5),
    }];
    for n in 1..=3 {
        events.extend([generating(n), generated(n), executing(n), error(n)]);
    }
    events.extend([generating(4), generated(4), executing(4), success(4)]);
    events
}

fn req() -> RunRequest {
    RunRequest::new("q")
}

#[test]
fn one_entry_per_attempt_in_first_appearance_order() {
    let events = vec![
        generating(3),
        generating(1),
        generated(3),
        error(3),
        generating(2),
        generated(1),
        error(1),
    ];
    let run = Run::replay(req(), &events);
    let numbers: Vec<u32> = run.ledger().iter().map(|a| a.number).collect();
    assert_eq!(numbers, vec![3, 1, 2]);
}

#[test]
fn replaying_each_event_twice_equals_once() {
    let events = long_sequence();
    let doubled: Vec<StreamEvent> = events
        .iter()
        .flat_map(|e| [e.clone(), e.clone()])
        .collect();

    let once = Run::replay(req(), &events);
    let twice = Run::replay(req(), &doubled);
    assert_eq!(once.ledger(), twice.ledger());
    assert_eq!(once.status(), twice.status());
    assert_eq!(once.events_applied(), twice.events_applied());
    assert_eq!(
        once.notifications().len(),
        twice.notifications().len()
    );
}

#[test]
fn at_most_one_result_and_only_when_succeeded() {
    let events = long_sequence();
    for prefix in 0..=events.len() {
        let run = Run::replay(req(), &events[..prefix]);
        let with_result = run.ledger().iter().filter(|a| a.result.is_some()).count();
        assert!(with_result <= 1);
        if with_result == 1 {
            assert_eq!(run.status(), RunState::Succeeded);
        } else {
            assert!(project(&run).current_result.is_none());
        }
    }
}

#[test]
fn finished_attempts_never_change_phase() {
    let events = long_sequence();
    let mut run = Run::started(req());
    let mut finished: Vec<(u32, AttemptPhase)> = Vec::new();

    // Re-send earlier-phase events for attempt 1 after it failed.
    let mut stream = events[..5].to_vec();
    stream.extend([generating(1), generated(1), executing(1), success(1)]);
    stream.extend_from_slice(&events[5..]);

    for event in &stream {
        run.apply(event);
        for (number, phase) in &finished {
            assert_eq!(run.ledger().get(*number).unwrap().phase, *phase);
        }
        for attempt in run.ledger().iter() {
            if attempt.is_finished() && !finished.iter().any(|(n, _)| *n == attempt.number) {
                finished.push((attempt.number, attempt.phase));
            }
        }
    }
    assert_eq!(run.status(), RunState::Succeeded);
    assert_eq!(run.ledger().successful().map(|a| a.number), Some(4));
}

#[test]
fn cancel_after_n_equals_prefix_then_cancel() {
    let events = long_sequence();
    for n in 0..events.len() {
        let mut live = Run::started(req());
        for event in &events[..n] {
            live.apply(event);
        }
        live.cancel();
        // Events after cancellation are discarded.
        for event in &events[n..] {
            live.apply(event);
        }

        let prefix = Run::replay(req(), &events[..n]);
        assert_eq!(live.ledger(), prefix.ledger(), "prefix length {n}");
        assert_eq!(live.status(), RunState::Cancelled);
    }
}

#[tokio::test]
async fn cancel_during_stream_matches_prefix() {
    let events = long_sequence();
    let body: Vec<Vec<u8>> = events
        .iter()
        .map(|e| format!("data: {}\n\n", serde_json::to_string(e).unwrap()).into_bytes())
        .collect();

    // The last event is the success, which is terminal on its own.
    for cut in 1..events.len() - 1 {
        let run = Mutex::new(Run::started(req()));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        // The token fires while chunk `cut` is being read; that chunk's frame
        // is still applied before the loop observes cancellation.
        let stream = futures::stream::iter(body.clone().into_iter().enumerate()).map(
            move |(i, chunk)| {
                if i == cut {
                    trigger.cancel();
                }
                Ok::<_, String>(chunk)
            },
        );

        let report = consume(stream, &run, &cancel).await;
        assert_eq!(report.end, SessionEnd::Cancelled);

        let run = run.into_inner().unwrap();
        let prefix = Run::replay(req(), &events[..=cut]);
        assert_eq!(run.ledger(), prefix.ledger(), "cut at {cut}");
        assert_eq!(run.status(), RunState::Cancelled);
    }
}
