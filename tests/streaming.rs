//! Streaming runs: event order, text deltas, and result availability.

use std::sync::Arc;

use agents_runtime::model::{ModelResponse, ScriptedProvider};
use agents_runtime::{Agent, AgentsError, RunConfig, RunContext, RunItem, Runner, StreamEvent};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn deltas_concatenate_to_the_final_output() {
    let text = "Streaming makes long answers feel fast, one word at a time.";
    let provider = Arc::new(ScriptedProvider::new("stub").with_message(text));
    let agent = Agent::simple("Narrator", "Speak").with_provider(provider);

    let mut run = Runner::run_streamed(agent, "talk", RunContext::empty(), RunConfig::default())
        .await
        .unwrap();
    let events: Vec<StreamEvent> = run.events().collect().await;

    let streamed: String = events.iter().filter_map(StreamEvent::text_delta).collect();
    let result = run.result().expect("result is ready once events are exhausted").unwrap();
    assert_eq!(streamed, result.final_output_text());
    assert_eq!(streamed, text);
    assert!(events.iter().filter(|e| e.text_delta().is_some()).count() > 1);
}

#[tokio::test]
async fn events_follow_causal_order_across_handoffs() {
    let b = Agent::simple("B", "x")
        .with_provider(Arc::new(ScriptedProvider::new("b").with_message("done")));
    let a = Agent::simple("A", "x")
        .with_provider(Arc::new(
            ScriptedProvider::new("a").with_tool_call("h", "transfer_to_b", json!({})),
        ))
        .with_handoff_to(b);

    let mut run = Runner::run_streamed(a, "go", RunContext::empty(), RunConfig::default().with_stream_buffer(1))
        .await
        .unwrap();
    let labels: Vec<String> = run
        .events()
        .map(|event| match event {
            StreamEvent::AgentUpdated { agent } => format!("agent:{}", agent),
            StreamEvent::RunItemCreated(item) => format!("item:{}", item.kind()),
            StreamEvent::RawTextDelta { agent, .. } => format!("delta:{}", agent),
        })
        .collect()
        .await;

    assert_eq!(
        labels,
        vec![
            "agent:A",
            "item:handoff_call",
            "item:handoff_output",
            "agent:B",
            "delta:B",
            "item:message",
        ]
    );
    let result = run.result().unwrap().unwrap();
    assert_eq!(result.last_agent_name(), "B");
    assert!(run.result().is_none());
}

#[tokio::test]
async fn streamed_errors_surface_through_the_result() {
    let provider = Arc::new(
        ScriptedProvider::new("loop")
            .with_fallback(ModelResponse::tool_call("c", "transfer_to_nowhere", json!({}))),
    );
    let agent = Agent::simple("Lost", "x").with_provider(provider);

    let run = Runner::run_streamed(agent, "go", RunContext::empty(), RunConfig::default())
        .await
        .unwrap();
    let err = run.wait().await.unwrap_err();
    assert!(matches!(err, AgentsError::Configuration { .. }));
}

#[tokio::test]
async fn dropping_the_events_does_not_cancel_the_run() {
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_response(ModelResponse::message("first turn text").with_text("partial"))
            .with_message("unused"),
    );
    let agent = Agent::simple("A", "x").with_provider(provider.clone());

    let mut run = Runner::run_streamed(agent, "go", RunContext::empty(), RunConfig::default().with_stream_buffer(1))
        .await
        .unwrap();
    let mut events = run.events();
    let first = events.next().await;
    assert!(matches!(first, Some(StreamEvent::AgentUpdated { .. })));
    drop(events);

    let result = run.wait().await.unwrap();
    assert_eq!(result.final_output_text(), "partial");
    assert!(matches!(result.items.last(), Some(RunItem::Message(_))));
    assert_eq!(provider.call_count(), 1);
}
