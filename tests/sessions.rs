mod common;

use common::*;
use serde_json::json;

use ontoflow::sessions::SessionRecorder;
use ontoflow::types::PathStatus;

#[tokio::test]
async fn session_lifecycle_and_metrics() {
    let h = harness().await;
    let recorder = SessionRecorder::new(h.persistence.pool().clone());

    let session_id = recorder
        .create_session(
            "ukbb_protein",
            "arivale_protein",
            &json!({"use_cache": true, "input_count": 120}),
        )
        .await
        .unwrap();

    recorder
        .record_metric(session_id, "cache_hit_rate", Some(0.83), None)
        .await
        .unwrap();
    recorder
        .record_metric(session_id, "dominant_source", None, Some("api"))
        .await
        .unwrap();
    recorder
        .complete_session(session_id, PathStatus::Success, 97, None)
        .await
        .unwrap();

    let session = recorder.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.status, "success");
    assert_eq!(session.results_count, 97);
    assert!(session.end_time.is_some());
    assert_eq!(
        session.parameters.unwrap()["input_count"],
        json!(120)
    );

    let metrics = recorder.session_metrics(session_id).await.unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].metric_name, "cache_hit_rate");
    assert_eq!(metrics[0].numeric_value, Some(0.83));
    assert_eq!(metrics[1].string_value.as_deref(), Some("api"));
}

#[tokio::test]
async fn failed_session_records_the_error() {
    let h = harness().await;
    let recorder = SessionRecorder::new(h.persistence.pool().clone());

    let session_id = recorder
        .create_session("a", "b", &json!({}))
        .await
        .unwrap();
    recorder
        .complete_session(session_id, PathStatus::Error, 0, Some("upstream down"))
        .await
        .unwrap();

    let session = recorder.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.status, "error");
    assert_eq!(session.error_message.as_deref(), Some("upstream down"));
}
