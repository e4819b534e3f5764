//! # Session integration tests
//!
//! Runs that load and store conversation history through a [`Session`],
//! in memory and in a SQLite file that outlives the session handle.

use std::sync::Arc;

use agents_runtime::guardrail::FnInputGuardrail;
use agents_runtime::items::{MessageItem, RunItem};
use agents_runtime::memory::{InMemorySession, Session};
use agents_runtime::model::{ModelResponse, ScriptedProvider};
use agents_runtime::sqlite_session::SqliteSession;
use agents_runtime::{Agent, GuardrailOutput, RunConfig, Runner};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

/// Routes runner logs to the test harness; set `RUST_LOG=debug` to see them.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn session_is_loaded_and_appended_on_success() {
    init_logging();
    let session = Arc::new(InMemorySession::new("user_1"));
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_message("Nice to meet you, Ada.")
            .with_message("Your name is Ada."),
    );
    let agent = Agent::simple("Memory", "Remember things").with_provider(provider.clone());
    let config = RunConfig::default().with_session(session.clone());

    Runner::run(agent.clone(), "My name is Ada", config.clone())
        .await
        .unwrap();
    assert_eq!(session.get_items(None).await.unwrap().len(), 2);

    let result = Runner::run(agent, "What is my name?", config).await.unwrap();
    assert_eq!(result.final_output_text(), "Your name is Ada.");
    assert_eq!(
        provider.requests()[1].transcript,
        vec![
            RunItem::Message(MessageItem::user("My name is Ada")),
            RunItem::Message(MessageItem::assistant("Memory", "Nice to meet you, Ada.")),
            RunItem::Message(MessageItem::user("What is my name?")),
        ]
    );
    assert_eq!(result.input.len(), 3);
    assert_eq!(session.get_items(None).await.unwrap().len(), 4);
}

#[tokio::test]
async fn failed_runs_leave_the_session_untouched() {
    let session = Arc::new(InMemorySession::new("user_2"));
    session
        .add_items(vec![RunItem::Message(MessageItem::user("earlier"))])
        .await
        .unwrap();

    let tripping = Agent::simple("Guarded", "x")
        .with_provider(Arc::new(ScriptedProvider::new("stub").with_message("never")))
        .with_input_guardrail(Arc::new(FnInputGuardrail::new("block", |_, _, _| {
            GuardrailOutput::trip(json!(null))
        })));
    assert!(Runner::run(
        tripping,
        "blocked",
        RunConfig::default().with_session(session.clone())
    )
    .await
    .is_err());

    let looping = Agent::simple("Looper", "x")
        .with_provider(Arc::new(ScriptedProvider::new("loop").with_fallback(
            ModelResponse::tool_call("c", "transfer_to_looper_two", json!({})),
        )))
        .with_handoff_to(Agent::simple("Looper Two", "x"));
    assert!(Runner::run(
        looping,
        "loop",
        RunConfig::default()
            .with_session(session.clone())
            .with_max_turns(1)
    )
    .await
    .is_err());

    assert_eq!(
        session.get_items(None).await.unwrap(),
        vec![RunItem::Message(MessageItem::user("earlier"))]
    );
}

#[tokio::test]
async fn sqlite_history_survives_reopening() {
    init_logging();
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    {
        let session = Arc::new(SqliteSession::new("persistent", db_path).await.unwrap());
        let provider = Arc::new(ScriptedProvider::new("stub").with_message("Stored."));
        let agent = Agent::simple("Clerk", "x").with_provider(provider);
        Runner::run(agent, "Remember 42", RunConfig::default().with_session(session))
            .await
            .unwrap();
    }

    let reopened = Arc::new(SqliteSession::new("persistent", db_path).await.unwrap());
    let messages = reopened.get_messages(None).await.unwrap();
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Remember 42", "Stored."]);

    let provider = Arc::new(ScriptedProvider::new("stub").with_message("You said 42."));
    let agent = Agent::simple("Clerk", "x").with_provider(provider.clone());
    Runner::run(agent, "What did I say?", RunConfig::default().with_session(reopened.clone()))
        .await
        .unwrap();
    assert_eq!(provider.requests()[0].transcript.len(), 3);
    assert_eq!(reopened.get_items(None).await.unwrap().len(), 4);

    let other = SqliteSession::new("someone_else", db_path).await.unwrap();
    assert!(other.get_items(None).await.unwrap().is_empty());
}
