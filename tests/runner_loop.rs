//! # Turn loop integration tests
//!
//! End-to-end runs against scripted model providers: turn bounds, guardrail
//! aborts, tool failure recovery, tool-use behaviors, structured output,
//! hooks, deadlines and determinism.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agents_runtime::guardrail::{FnInputGuardrail, FnOutputGuardrail, PatternBlockGuardrail};
use agents_runtime::items::{RunItem, ToolCallItem};
use agents_runtime::model::{FnProvider, ModelResponse, ScriptedProvider};
use agents_runtime::tool::{function_tool, FailurePolicy, FunctionTool, ToolError};
use agents_runtime::tracing::{InMemoryExporter, SpanType};
use agents_runtime::{
    Agent, AgentsError, GuardrailOutput, GuardrailPhase, RunConfig, RunContext, RunHooks, Runner,
    ToolUseBehavior, Usage,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize, JsonSchema)]
struct AddArgs {
    a: i64,
    b: i64,
}

fn add_tool() -> Arc<FunctionTool> {
    Arc::new(function_tool(
        "add",
        "Add two integers",
        |args: AddArgs| async move { Ok::<_, ToolError>(args.a + args.b) },
    ))
}

fn echo_tool() -> Arc<FunctionTool> {
    Arc::new(FunctionTool::simple("echo", "Echo the input", |s| s))
}

/// A provider that asks for the echo tool forever.
fn looping_provider() -> Arc<ScriptedProvider> {
    Arc::new(
        ScriptedProvider::new("loop")
            .with_fallback(ModelResponse::tool_call("call", "echo", json!({"input": "again"}))),
    )
}

fn run_blocking<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn max_turns_bound_is_exact(max_turns in 1usize..12) {
        let provider = looping_provider();
        let agent = Agent::simple("Looper", "Never stop").with_tool(echo_tool());
        let config = RunConfig::default()
            .with_model_provider(provider.clone())
            .with_max_turns(max_turns);

        let err = run_blocking(Runner::run(agent, "go", config)).unwrap_err();
        match err {
            AgentsError::MaxTurnsExceeded { max_turns: bound, items } => {
                prop_assert_eq!(bound, max_turns);
                // Each completed turn left a call and an output behind.
                prop_assert_eq!(items.len(), max_turns * 2);
            }
            other => prop_assert!(false, "unexpected error: {}", other),
        }
        prop_assert_eq!(provider.call_count(), max_turns);
    }
}

#[tokio::test]
async fn tripped_input_guardrail_makes_no_model_or_tool_calls() {
    let provider = looping_provider();
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let tool = Arc::new(FunctionTool::simple("echo", "Echo", move |s| {
        counter.fetch_add(1, Ordering::SeqCst);
        s
    }));
    let agent = Agent::simple("Guarded", "x")
        .with_tool(tool)
        .with_input_guardrail(Arc::new(FnInputGuardrail::new("always", |_, _, _| {
            GuardrailOutput::trip(json!({"reason": "blocked"}))
        })));

    let err = Runner::run(
        agent,
        "anything",
        RunConfig::default().with_model_provider(provider.clone()),
    )
    .await
    .unwrap_err();

    let (phase, result) = err.tripped_guardrail().unwrap();
    assert_eq!(phase, GuardrailPhase::Input);
    assert_eq!(result.guardrail_name, "always");
    assert_eq!(result.output_info, json!({"reason": "blocked"}));
    assert_eq!(provider.call_count(), 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_level_guardrails_follow_agent_guardrails() {
    let provider = Arc::new(ScriptedProvider::new("stub").with_message("fine"));
    let agent = Agent::simple("A", "x").with_input_guardrail(Arc::new(FnInputGuardrail::new(
        "agent_level",
        |_, _, _| GuardrailOutput::pass(),
    )));
    let config = RunConfig::default()
        .with_model_provider(provider)
        .with_input_guardrail(Arc::new(FnInputGuardrail::new("run_level", |_, _, _| {
            GuardrailOutput::pass()
        })));

    let result = Runner::run(agent, "hi", config).await.unwrap();
    let names: Vec<&str> = result
        .input_guardrail_results
        .iter()
        .map(|r| r.guardrail_name.as_str())
        .collect();
    assert_eq!(names, vec!["agent_level", "run_level"]);
}

#[tokio::test]
async fn output_guardrail_checks_the_final_message_only() {
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_tool_call("c1", "echo", json!({"input": "my ssn is 123"}))
            .with_message("Your SSN is 123-45-6789"),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let agent = Agent::simple("Leaky", "x")
        .with_tool(echo_tool())
        .with_output_guardrail(Arc::new(FnOutputGuardrail::new("record", move |_, _, out| {
            recorder.lock().unwrap().push(out.to_string());
            GuardrailOutput::pass()
        })))
        .with_output_guardrail(Arc::new(PatternBlockGuardrail::new(
            "pii",
            vec!["ssn".to_string()],
        )));

    let err = Runner::run(
        agent,
        "hi",
        RunConfig::default().with_model_provider(provider),
    )
    .await
    .unwrap_err();

    let (phase, result) = err.tripped_guardrail().unwrap();
    assert_eq!(phase, GuardrailPhase::Output);
    assert_eq!(result.guardrail_name, "pii");
    assert_eq!(*seen.lock().unwrap(), vec!["Your SSN is 123-45-6789".to_string()]);
}

#[tokio::test]
async fn failing_tool_is_recovered_by_default() {
    let failing = Arc::new(FunctionTool::new(
        "explode",
        "Always fails",
        json!({"type": "object", "properties": {}}),
        |_| Err(ToolError::failed("disk on fire")),
    ));
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_tool_call("c1", "explode", json!({}))
            .with_message("The tool failed, sorry."),
    );
    let agent = Agent::simple("Brave", "x").with_tool(failing);

    let result = Runner::run(
        agent,
        "try it",
        RunConfig::default().with_model_provider(provider),
    )
    .await
    .unwrap();

    let output = result
        .items
        .iter()
        .find_map(|item| match item {
            RunItem::ToolOutput(o) => Some(o.clone()),
            _ => None,
        })
        .unwrap();
    assert!(output.is_error);
    assert!(output.text().contains("disk on fire"));
    assert_eq!(result.final_output_text(), "The tool failed, sorry.");
}

#[tokio::test]
async fn invalid_arguments_are_recovered_and_propagate_policy_aborts() {
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_tool_call("c1", "add", json!({"a": 1}))
            .with_message("missing b"),
    );
    let result = Runner::run(
        Agent::simple("Math", "x").with_tool(add_tool()),
        "add",
        RunConfig::default().with_model_provider(provider),
    )
    .await
    .unwrap();
    assert!(matches!(&result.items[1], RunItem::ToolOutput(o) if o.is_error));

    let strict = Arc::new(
        FunctionTool::new("explode", "Fails", json!({"type": "object"}), |_| {
            Err(ToolError::failed("fatal"))
        })
        .with_failure_policy(FailurePolicy::Propagate),
    );
    let provider = Arc::new(ScriptedProvider::new("stub").with_tool_call("c1", "explode", json!({})));
    let err = Runner::run(
        Agent::simple("Fragile", "x").with_tool(strict),
        "go",
        RunConfig::default().with_model_provider(provider),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AgentsError::ToolExecution { tool, .. } if tool == "explode"));
}

#[tokio::test]
async fn unknown_tool_is_a_model_behavior_error() {
    let provider = Arc::new(ScriptedProvider::new("stub").with_tool_call("c1", "launch", json!({})));
    let err = Runner::run(
        Agent::simple("A", "x").with_tool(echo_tool()),
        "go",
        RunConfig::default().with_model_provider(provider),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AgentsError::ModelBehavior { .. }));
}

#[tokio::test]
async fn missing_model_is_a_configuration_error() {
    let err = Runner::run(Agent::simple("A", "x"), "go", RunConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentsError::Configuration { .. }));
}

#[tokio::test]
async fn missing_model_is_reported_before_input_guardrails_run() {
    let checks = Arc::new(AtomicUsize::new(0));
    let counter = checks.clone();
    let agent = Agent::simple("Unwired", "x").with_input_guardrail(Arc::new(
        FnInputGuardrail::new("always", move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            GuardrailOutput::trip(json!(null))
        }),
    ));
    let err = Runner::run(agent, "go", RunConfig::default()).await.unwrap_err();
    assert!(matches!(err, AgentsError::Configuration { .. }));
    assert_eq!(checks.load(Ordering::SeqCst), 0);

    let named = Agent::simple("Named", "x").with_model("gpt-4o");
    let err = Runner::run(named, "go", RunConfig::default()).await.unwrap_err();
    assert!(matches!(err, AgentsError::Configuration { .. }));
}

#[tokio::test]
async fn stop_at_tools_returns_the_named_tool_output() {
    let provider = Arc::new(ScriptedProvider::new("stub").with_response(ModelResponse::tool_calls(
        vec![
            agents_runtime::model::ToolCallDirective {
                call_id: "c1".to_string(),
                name: "echo".to_string(),
                arguments: json!({"input": "not this"}).to_string(),
            },
            agents_runtime::model::ToolCallDirective {
                call_id: "c2".to_string(),
                name: "add".to_string(),
                arguments: json!({"a": 20, "b": 22}).to_string(),
            },
        ],
    )));
    let agent = Agent::simple("Calc", "x")
        .with_tool(echo_tool())
        .with_tool(add_tool())
        .with_tool_use_behavior(ToolUseBehavior::StopAtTools(vec!["add".to_string()]));

    let result = Runner::run(agent, "go", RunConfig::default().with_model_provider(provider.clone()))
        .await
        .unwrap();
    assert_eq!(result.final_output, json!(42));
    assert_eq!(result.turns, 1);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn stop_on_first_tool_output_still_passes_output_guardrails() {
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_tool_call("c1", "add", json!({"a": 2, "b": 3}))
            .with_message("unused"),
    );
    let checked = Arc::new(Mutex::new(Vec::new()));
    let recorder = checked.clone();
    let agent = Agent::simple("Calc", "x")
        .with_tool(add_tool())
        .with_tool_use_behavior(ToolUseBehavior::StopOnFirstTool)
        .with_output_guardrail(Arc::new(FnOutputGuardrail::new("no_five", move |_, _, out| {
            recorder.lock().unwrap().push(out.to_string());
            if out == "5" {
                GuardrailOutput::trip(json!({"value": out}))
            } else {
                GuardrailOutput::pass()
            }
        })));

    let err = Runner::run(agent, "go", RunConfig::default().with_model_provider(provider.clone()))
        .await
        .unwrap_err();

    let (phase, result) = err.tripped_guardrail().unwrap();
    assert_eq!(phase, GuardrailPhase::Output);
    assert_eq!(result.guardrail_name, "no_five");
    assert_eq!(*checked.lock().unwrap(), vec!["5".to_string()]);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn custom_tool_use_behavior_sees_the_batch() {
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_tool_call("c1", "add", json!({"a": 1, "b": 1}))
            .with_tool_call("c2", "add", json!({"a": 50, "b": 50})),
    );
    let agent = Agent::simple("Calc", "x")
        .with_tool(add_tool())
        .with_tool_use_behavior(ToolUseBehavior::custom(|_, results| {
            match results.first().and_then(|r| r.output.as_i64()) {
                Some(n) if n > 10 => agents_runtime::tool::ToolDecision::Stop(json!(format!("big {}", n))),
                _ => agents_runtime::tool::ToolDecision::Continue,
            }
        }));

    let result = Runner::run(agent, "go", RunConfig::default().with_model_provider(provider))
        .await
        .unwrap();
    assert_eq!(result.final_output_text(), "big 100");
    assert_eq!(result.turns, 2);
}

#[derive(Debug, Deserialize, JsonSchema, PartialEq)]
struct Verdict {
    approved: bool,
    reason: String,
}

#[tokio::test]
async fn structured_output_is_parsed_and_validated() {
    let provider = Arc::new(
        ScriptedProvider::new("stub").with_message(r#"{"approved": true, "reason": "ok"}"#),
    );
    let agent = Agent::simple("Judge", "x").with_output_type::<Verdict>();
    let result = Runner::run(
        agent.clone(),
        "judge",
        RunConfig::default().with_model_provider(provider.clone()),
    )
    .await
    .unwrap();
    assert_eq!(
        result.final_output_as::<Verdict>().unwrap(),
        Verdict {
            approved: true,
            reason: "ok".to_string()
        }
    );
    assert!(provider.requests()[0].output_schema.is_some());

    let provider = Arc::new(ScriptedProvider::new("stub").with_message("sure, approved"));
    let err = Runner::run(agent, "judge", RunConfig::default().with_model_provider(provider))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentsError::ModelBehavior { .. }));
}

struct FailOnTool;

#[async_trait]
impl RunHooks for FailOnTool {
    async fn on_tool_start(
        &self,
        _ctx: &RunContext,
        _agent: &Agent,
        call: &ToolCallItem,
    ) -> agents_runtime::Result<()> {
        Err(AgentsError::user(format!("refusing {}", call.tool_name)))
    }
}

#[tokio::test]
async fn hook_error_aborts_the_run() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let tool = Arc::new(FunctionTool::simple("echo", "Echo", move |s| {
        counter.fetch_add(1, Ordering::SeqCst);
        s
    }));
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_tool_call("c1", "echo", json!({"input": "x"}))
            .with_message("done"),
    );
    let config = RunConfig::default()
        .with_model_provider(provider)
        .with_hooks(Arc::new(FailOnTool));

    let err = Runner::run(Agent::simple("A", "x").with_tool(tool), "go", config)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentsError::User { message } if message == "refusing echo"));
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deadline_aborts_slow_runs() {
    let slow = Arc::new(FunctionTool::from_async(
        "slow",
        "Sleeps",
        json!({"type": "object"}),
        |_, _| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        },
    ));
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_tool_call("c1", "slow", json!({}))
            .with_message("done"),
    );
    let config = RunConfig::default()
        .with_model_provider(provider)
        .with_deadline(Duration::from_millis(20));

    let err = Runner::run(Agent::simple("A", "x").with_tool(slow), "go", config)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentsError::DeadlineExceeded { .. }));
    assert!(err.is_retryable());
}

/// Answers from the transcript alone: call `add` until an output exists, then report it.
fn deterministic_provider() -> Arc<FnProvider> {
    Arc::new(FnProvider::new("det", |request| {
        let last_output = request.transcript.iter().rev().find_map(|item| match item {
            RunItem::ToolOutput(o) => Some(o.text()),
            _ => None,
        });
        Ok(match last_output {
            Some(sum) => ModelResponse::message(format!("The sum is {}", sum)),
            None => ModelResponse::tool_call("call_add", "add", json!({"a": 2, "b": 3})),
        }
        .with_usage(Usage::new(10, 5)))
    }))
}

#[tokio::test]
async fn identical_runs_produce_identical_items() {
    let agent = Agent::simple("Math", "x").with_tool(add_tool());
    let mut serialized = Vec::new();
    for _ in 0..2 {
        let config = RunConfig::default().with_model_provider(deterministic_provider());
        let result = Runner::run(agent.clone(), "add 2 and 3", config).await.unwrap();
        assert_eq!(result.final_output_text(), "The sum is 5");
        serialized.push(serde_json::to_string(&result.items).unwrap());
    }
    assert_eq!(serialized[0], serialized[1]);
}

#[tokio::test]
async fn usage_and_trace_are_reported() {
    let exporter = Arc::new(InMemoryExporter::new());
    let config = RunConfig::default()
        .with_model_provider(deterministic_provider())
        .with_trace_exporter(exporter.clone())
        .with_workflow_name("sums");

    let result = Runner::run(Agent::simple("Math", "x").with_tool(add_tool()), "go", config)
        .await
        .unwrap();

    assert_eq!(result.usage.total.request_count, 2);
    assert_eq!(result.usage.total.total_tokens, 30);
    assert_eq!(result.usage.by_agent["Math"].request_count, 2);

    let traces = exporter.traces();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].trace_id, result.trace_id);
    assert_eq!(traces[0].workflow_name, "sums");
    assert!(traces[0].spans.iter().all(|s| s.end_time.is_some()));
}

#[tokio::test]
async fn agent_as_tool_runs_nested_and_shares_context() {
    let translator_provider = Arc::new(ScriptedProvider::new("translator").with_message("hola"));
    let translator = Agent::simple("Translator", "Translate to Spanish")
        .with_provider(translator_provider.clone());

    let orchestrator_provider = Arc::new(
        ScriptedProvider::new("orchestrator")
            .with_tool_call("c1", "translate", json!({"input": "hello"}))
            .with_message("In Spanish: hola"),
    );
    let orchestrator = Agent::simple("Orchestrator", "Use your tools")
        .with_provider(orchestrator_provider)
        .with_tool(Arc::new(
            translator.as_tool("translate", "Translate the input to Spanish"),
        ));

    let ctx = RunContext::new("shared".to_string());
    let result = Runner::run_with_context(orchestrator, "translate hello", ctx.clone(), RunConfig::default())
        .await
        .unwrap();

    assert!(matches!(&result.items[1], RunItem::ToolOutput(o) if o.output == json!("hola")));
    assert_eq!(result.final_output_text(), "In Spanish: hola");
    assert_eq!(
        translator_provider.requests()[0].transcript,
        vec![RunItem::Message(agents_runtime::items::MessageItem::user("hello"))]
    );
    let usage = ctx.usage();
    assert!(usage.by_agent.contains_key("Translator"));
    assert!(usage.by_agent.contains_key("Orchestrator"));
}

#[tokio::test]
async fn parallel_tool_calls_keep_model_order() {
    let calls = (0..4)
        .map(|i| agents_runtime::model::ToolCallDirective {
            call_id: format!("c{}", i),
            name: "nap".to_string(),
            arguments: json!({"ms": 40 - i * 10}).to_string(),
        })
        .collect();
    let provider = Arc::new(
        ScriptedProvider::new("stub")
            .with_response(ModelResponse::tool_calls(calls))
            .with_message("rested"),
    );
    let nap = Arc::new(FunctionTool::from_async(
        "nap",
        "Sleeps for ms",
        json!({"type": "object", "properties": {"ms": {"type": "integer"}}}),
        |_, args| async move {
            let ms = args["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        },
    ));
    let exporter = Arc::new(InMemoryExporter::new());
    let agent = Agent::simple("Sleepy", "x")
        .with_tool(nap)
        .with_parallel_tool_calls(true);

    let result = Runner::run(
        agent,
        "go",
        RunConfig::default()
            .with_model_provider(provider)
            .with_max_tool_concurrency(2)
            .with_trace_exporter(exporter.clone()),
    )
    .await
    .unwrap();

    let outputs: Vec<String> = result
        .items
        .iter()
        .filter_map(|item| match item {
            RunItem::ToolOutput(o) => Some(o.call_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(outputs, vec!["c0", "c1", "c2", "c3"]);
    let kinds: Vec<&str> = result.items.iter().map(RunItem::kind).collect();
    assert_eq!(&kinds[..4], &["tool_call"; 4]);

    // Tool spans cover the time each call actually ran.
    let traces = exporter.traces();
    let tool_spans: Vec<i64> = traces[0]
        .spans
        .iter()
        .filter(|s| matches!(s.span_type, SpanType::Tool { .. }))
        .filter_map(|s| s.duration_ms())
        .collect();
    assert_eq!(tool_spans.len(), 4);
    assert!(tool_spans.iter().all(|ms| *ms >= 10), "{:?}", tool_spans);
}
