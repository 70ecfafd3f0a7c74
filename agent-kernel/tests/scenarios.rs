mod common;

use agent_adapters::OracleError;
use agent_kernel::orchestrator::{FOLLOW_UP_FALLBACK, UNAVAILABLE_ANSWER};
use agent_kernel::plan::REASON_UNREACHABLE;
use agent_kernel::StepAction;
use agent_memory::{ChatHistory, ExecutionSink, ExecutionStatus};
use agent_primitives::{OwnerId, ToolDefinition, ToolSource};
use agent_tools::{NativeCatalog, NativeTool, ToolError};
use serde_json::{Value, json};

use common::{ScriptedOracle, agent, agent_with_catalog};

const OWNER: OwnerId = OwnerId::new(1);

#[tokio::test]
async fn multiply_then_add_threads_previous_result() {
    let oracle = ScriptedOracle::new([
        r#"[
            {"step": 1, "action": "UseTool", "reason": "multiply 3 by 4", "tool_name": "multiply"},
            {"step": 2, "action": "UseTool", "reason": "add 2 to the product", "tool_name": "add"},
            {"step": 3, "action": "DirectAnswer", "reason": "report the result"}
        ]"#,
        r#"{"tool": "multiply", "parameters": {"a": 3, "b": 4}, "reasoning": "3 times 4", "confidence": 0.95}"#,
        r#"Here you go: {"tool": "add", "parameters": {"a": 12, "b": 2}, "reasoning": "add 2 to 12", "confidence": 0.9}"#,
        "3 times 4 is 12, and adding 2 gives 14.",
    ]);
    let (agent, history) = agent(oracle.clone()).await;

    let outcome = agent.respond(OWNER, "what is 3 times 4, then add 2").await;

    assert_eq!(outcome.plan().len(), 3);
    assert_eq!(outcome.answer(), "3 times 4 is 12, and adding 2 gives 14.");
    assert!(outcome.text().starts_with("Plan:\nStep 1: UseTool - multiply 3 by 4\n"));

    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 4);
    assert!(prompts[0].contains(r#""name":"multiply""#));
    assert!(prompts[1].contains("(executing step 1 of the plan: multiply 3 by 4)"));
    assert!(prompts[2].contains("(result of step 1: 12; executing step 2 of the plan: add 2 to the product)"));
    assert!(prompts[3].contains("**Result**: 14"));

    let executions = ExecutionSink::recent(history.as_ref(), OWNER, 10).await.unwrap();
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0].tool_name(), "add");
    assert_eq!(executions[0].result(), "14");
    assert_eq!(executions[0].params()["a"], json!(12));
    assert_eq!(executions[1].tool_name(), "multiply");
    assert_eq!(executions[1].result(), "12");
    assert_eq!(executions[1].question(), "what is 3 times 4, then add 2");

    let chats = ChatHistory::recent(history.as_ref(), OWNER, 5).await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].answer(), "3 times 4 is 12, and adding 2 gives 14.");
    assert_eq!(chats[0].plan(), outcome.plan_text());
    assert_eq!(chats[0].model_label(), "scripted/test");
}

#[tokio::test]
async fn missing_required_parameter_falls_back_to_direct_answer() {
    let oracle = ScriptedOracle::new([
        r#"[{"step": 1, "action": "UseTool", "reason": "divide 10", "tool_name": "divide"},
            {"step": 2, "action": "DirectAnswer", "reason": "answer"}]"#,
        r#"{"tool":"divide","parameters":{"a":10},"confidence":0.9}"#,
        "I need to know what to divide 10 by.",
        "Please tell me the divisor.",
    ]);
    let (agent, history) = agent(oracle.clone()).await;

    let outcome = agent.respond(OWNER, "divide 10").await;

    assert_eq!(outcome.answer(), "Please tell me the divisor.");
    let prompts = oracle.prompts();
    assert!(prompts[2].starts_with("Answer the user's question directly"));
    assert!(prompts[2].contains("divide 10 (executing step 1 of the plan: divide 10)"));
    assert!(prompts[3].contains("I need to know what to divide 10 by."));
    assert_eq!(history.statistics(OWNER).await.unwrap().total, 0);
}

#[tokio::test]
async fn low_confidence_selection_is_not_dispatched() {
    let oracle = ScriptedOracle::new([
        r#"[{"step": 1, "action": "UseTool", "reason": "multiply"}, {"step": 2, "action": "DirectAnswer"}]"#,
        r#"{"tool": "multiply", "parameters": {"a": 2, "b": 3}, "confidence": 0.1}"#,
        "Probably 6.",
        "The answer is probably 6.",
    ]);
    let (agent, history) = agent(oracle.clone()).await;

    let outcome = agent.respond(OWNER, "multiply two and three").await;

    assert_eq!(outcome.answer(), "The answer is probably 6.");
    assert!(oracle.prompts()[2].starts_with("Answer the user's question directly"));
    assert_eq!(history.statistics(OWNER).await.unwrap().total, 0);
}

async fn dispatched_at(confidence: f64) -> usize {
    let selection = json!({"tool": "multiply", "parameters": {"a": 2, "b": 3}, "confidence": confidence});
    let oracle = ScriptedOracle::new([
        r#"[{"step": 1, "action": "UseTool", "reason": "multiply"}, {"step": 2, "action": "DirectAnswer"}]"#.to_owned(),
        selection.to_string(),
        "direct".to_owned(),
        "summary".to_owned(),
    ]);
    let (agent, history) = agent(oracle).await;
    agent.respond(OWNER, "2 * 3").await;
    history.statistics(OWNER).await.unwrap().total
}

#[tokio::test]
async fn confidence_threshold_is_inclusive() {
    assert_eq!(dispatched_at(0.3).await, 1);
    assert_eq!(dispatched_at(0.299_99).await, 0);
}

#[tokio::test]
async fn planning_outage_yields_single_direct_answer() {
    let oracle = ScriptedOracle::with_results(vec![
        Err(OracleError::unavailable("connection refused")),
        Err(OracleError::unavailable("connection refused")),
    ]);
    let (agent, _) = agent(oracle).await;

    let outcome = agent.respond(OWNER, "hello").await;

    assert_eq!(outcome.plan().len(), 1);
    let step = &outcome.plan().steps()[0];
    assert_eq!(step.action(), &StepAction::DirectAnswer);
    assert_eq!(step.reason(), REASON_UNREACHABLE);
    assert_eq!(outcome.answer(), FOLLOW_UP_FALLBACK);
}

#[tokio::test]
async fn unknown_action_answers_raw_question() {
    let oracle = ScriptedOracle::with_results(vec![
        Ok(r#"[{"step": 1, "action": "Celebrate", "reason": "party"}]"#.to_owned()),
        Err(OracleError::unavailable("timed out")),
    ]);
    let (agent, _) = agent(oracle.clone()).await;

    let outcome = agent.respond(OWNER, "hello there").await;

    assert_eq!(outcome.answer(), UNAVAILABLE_ANSWER);
    assert!(oracle.prompts()[1].contains("User question: hello there"));
}

#[tokio::test]
async fn follow_up_answer_is_stored_without_reasoning_trace() {
    let oracle = ScriptedOracle::new([
        r#"[{"step": 1, "action": "ask_user", "reason": "the city is missing"}]"#,
        "<think>which city do they mean</think>\nWhich city are you asking about?",
    ]);
    let (agent, history) = agent(oracle).await;

    let outcome = agent.respond(OWNER, "what's the weather").await;

    assert!(outcome.answer().contains("<think>"));
    let chats = ChatHistory::recent(history.as_ref(), OWNER, 1).await.unwrap();
    assert_eq!(chats[0].answer(), "Which city are you asking about?");
}

#[tokio::test]
async fn failing_tool_is_recorded_and_later_steps_continue() {
    let catalog = NativeCatalog::with_builtins().with(
        "test.fail",
        NativeTool::new(|_: Value| async move { Err::<Value, _>(ToolError::execution("boom")) }),
    );
    let oracle = ScriptedOracle::with_results(vec![
        Ok(r#"[{"step": 1, "action": "UseTool", "reason": "try the failing tool"},
               {"step": 2, "action": "UseTool", "reason": "multiply 2 by 5"},
               {"step": 3, "action": "DirectAnswer"}]"#
            .to_owned()),
        Ok(r#"{"tool": "fail", "parameters": {}, "confidence": 0.8}"#.to_owned()),
        Ok(r#"{"tool": "multiply", "parameters": {"a": 2, "b": 5}, "confidence": 0.8}"#.to_owned()),
        Err(OracleError::failed("summary model overloaded")),
    ]);
    let (agent, history) = agent_with_catalog(oracle.clone(), catalog).await;
    let failing = ToolDefinition::builder(OWNER)
        .name("fail")
        .unwrap()
        .description("always fails")
        .parameters(Vec::new())
        .source(ToolSource::native("test.fail"))
        .build()
        .unwrap();
    agent.admission().register(failing).await.unwrap();

    let outcome = agent.respond(OWNER, "fail, then multiply").await;

    assert_eq!(outcome.answer(), "Based on the tool results:\n- 10");
    let second_selection = &oracle.prompts()[2];
    assert!(second_selection.contains("fail, then multiply (executing step 2 of the plan: multiply 2 by 5)"));
    assert!(!second_selection.contains("fail, then multiply (result of step 1"));

    let stats = history.statistics(OWNER).await.unwrap();
    assert_eq!((stats.total, stats.succeeded, stats.failed), (2, 1, 1));
    let executions = agent.execution_history(OWNER, 5).await.unwrap();
    assert_eq!(executions[1].status(), ExecutionStatus::Error);
    assert!(executions[1].result().contains("boom"));
}

#[tokio::test]
async fn private_tools_stay_with_their_owner() {
    let oracle = ScriptedOracle::new(Vec::<String>::new());
    let (agent, _) = agent(oracle).await;
    let private = ToolDefinition::builder(OWNER)
        .name("secret")
        .unwrap()
        .source(ToolSource::script("def secret():\n    return 42\n"))
        .visibility(agent_primitives::Visibility::Private)
        .build()
        .unwrap();
    agent.admission().register(private).await.unwrap();

    let mine: Vec<String> = agent.tools(OWNER).await.unwrap().iter().map(|t| t.name().to_owned()).collect();
    let theirs: Vec<String> = agent
        .tools(OwnerId::new(2))
        .await
        .unwrap()
        .iter()
        .map(|t| t.name().to_owned())
        .collect();
    assert!(mine.contains(&"secret".to_owned()));
    assert!(mine.contains(&"current_time".to_owned()));
    assert!(!theirs.contains(&"secret".to_owned()));
}

#[tokio::test]
async fn execution_history_truncates_results() {
    let long_query = "x".repeat(150);
    let selection = json!({"tool": "search_hana", "parameters": {"query": long_query}, "confidence": 0.9});
    let oracle = ScriptedOracle::new([
        r#"[{"step": 1, "action": "UseTool", "reason": "search"}, {"step": 2, "action": "DirectAnswer"}]"#.to_owned(),
        selection.to_string(),
        "done".to_owned(),
    ]);
    let (agent, history) = agent(oracle).await;
    agent.respond(OWNER, "search hana").await;

    let full = ExecutionSink::recent(history.as_ref(), OWNER, 1).await.unwrap();
    assert!(full[0].result().chars().count() > 100);
    let shown = agent.execution_history(OWNER, 1).await.unwrap();
    assert_eq!(shown[0].result().chars().count(), 103);
    assert!(shown[0].result().ends_with("..."));
}
