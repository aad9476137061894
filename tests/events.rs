mod common;

use std::time::Duration;

use common::*;
use serde_json::json;
use uuid::Uuid;

use ontoflow::events::{ChannelSink, EventBus, EventKind, JobEvent, MemorySink};
use ontoflow::types::LogLevel;

fn event(job_id: Uuid, kind: EventKind, n: u64) -> JobEvent {
    JobEvent::new(job_id, kind, json!({"n": n}))
}

#[tokio::test]
async fn subscribers_see_events_in_emission_order() {
    let bus = EventBus::with_sink(MemorySink::new());
    bus.listen_for_events();
    let mut stream = bus.subscribe();
    let emitter = bus.get_emitter();

    let job_id = Uuid::new_v4();
    for n in 0..10 {
        emitter.emit(event(job_id, EventKind::Progress, n)).unwrap();
    }

    for n in 0..10 {
        let received = stream
            .next_timeout(Duration::from_secs(2))
            .await
            .expect("event");
        assert_eq!(received.data["n"], json!(n));
    }
}

#[tokio::test]
async fn memory_sink_captures_all_events() {
    let sink = MemorySink::new();
    let bus = EventBus::with_sink(sink.clone());
    bus.listen_for_events();
    let emitter = bus.get_emitter();

    let job_id = Uuid::new_v4();
    emitter
        .emit(
            event(job_id, EventKind::StepStarted, 1)
                .with_step(0, "load")
                .with_message("Step load started"),
        )
        .unwrap();
    emitter
        .emit(event(job_id, EventKind::Error, 2).with_severity(LogLevel::Error))
        .unwrap();

    // Sink workers drain asynchronously.
    for _ in 0..200 {
        if sink.snapshot().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let captured = sink.snapshot();
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[0].kind, EventKind::StepStarted);
    assert_eq!(captured[0].step_name.as_deref(), Some("load"));
    assert_eq!(captured[1].severity, LogLevel::Error);
}

#[tokio::test]
async fn channel_sink_streams_to_flume_consumers() {
    let (tx, rx) = flume::unbounded();
    let bus = EventBus::with_sink(ChannelSink::new(tx));
    bus.listen_for_events();
    let emitter = bus.get_emitter();

    let job_id = Uuid::new_v4();
    emitter.emit(event(job_id, EventKind::Complete, 7)).unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv_async())
        .await
        .expect("timely")
        .expect("open channel");
    assert_eq!(received.kind, EventKind::Complete);
    assert_eq!(received.job_id, job_id);
}

#[tokio::test]
async fn late_subscribers_read_the_persisted_backlog() {
    let h = harness().await;
    let job = h
        .persistence
        .create_job(ontoflow::persistence::NewJob {
            strategy_name: "s".to_string(),
            strategy_doc: three_step_strategy(false),
            parameters: json!({}),
            options: Default::default(),
            owner: None,
            session_tag: None,
            tags: vec![],
            description: None,
        })
        .await
        .unwrap();

    for n in 0..5 {
        h.persistence
            .emit_event(event(job.id, EventKind::Progress, n))
            .await
            .unwrap();
    }

    let events = h
        .persistence
        .get_events(job.id, None, Some("progress"), 100)
        .await
        .unwrap();
    assert_eq!(events.len(), 5);
    // Newest first.
    assert_eq!(events[0].data["n"], json!(4));

    // Events start undelivered; marking delivery tracks attempts.
    assert!(events.iter().all(|e| !e.delivered));
    let marked = h
        .persistence
        .mark_events_delivered(job.id, events[0].id)
        .await
        .unwrap();
    assert!(marked >= 5);
    let events = h
        .persistence
        .get_events(job.id, None, Some("progress"), 100)
        .await
        .unwrap();
    assert!(events.iter().all(|e| e.delivered && e.delivery_attempts == 1));
}

#[tokio::test]
async fn event_json_shape_is_normalized() {
    let job_id = Uuid::new_v4();
    let event = JobEvent::new(job_id, EventKind::StepCompleted, json!({"records": 10}))
        .with_step(2, "save")
        .with_message("Step save completed");
    let value = event.to_json_value();

    assert_eq!(value["type"], json!("step_completed"));
    assert_eq!(value["job_id"], json!(job_id.to_string()));
    assert_eq!(value["step_index"], json!(2));
    assert_eq!(value["step_name"], json!("save"));
    assert_eq!(value["data"]["records"], json!(10));
    assert_eq!(value["severity"], json!("info"));
}
