mod common;

use agent_kernel::KernelError;
use agent_memory::ToolUpdate;
use agent_policy::{PolicyError, Severity};
use agent_primitives::{OwnerId, ParameterSpec, ToolDefinition, ToolSource};
use agent_tools::ToolRegistry;
use serde_json::json;

use common::{ScriptedOracle, agent};

const OWNER: OwnerId = OwnerId::new(9);

fn script(name: &str, code: &str) -> ToolDefinition {
    ToolDefinition::builder(OWNER)
        .name(name)
        .unwrap()
        .description("submitted tool")
        .source(ToolSource::script(code))
        .build()
        .unwrap()
}

#[tokio::test]
async fn shell_execution_is_refused_with_itemized_findings() {
    let (agent, _) = agent(ScriptedOracle::new(Vec::<String>::new())).await;
    let code = "def run(cmd):\n import os\n os.system(cmd, shell=True)";

    let verdict = agent.admission().review(code);
    assert!(!verdict.is_safe());
    assert!(verdict.has_severity(Severity::High));

    let err = agent.admission().register(script("run", code)).await.unwrap_err();
    let KernelError::Policy(PolicyError::UnsafeCode { issues, summary }) = err else {
        panic!("expected an unsafe code rejection, got {err:?}");
    };
    assert!(issues.iter().any(|issue| issue.starts_with("[high]")));
    assert!(!summary.is_empty());
    assert!(!agent.tools(OWNER).await.unwrap().iter().any(|tool| tool.name() == "run"));
}

#[tokio::test]
async fn shell_flag_rejects_regardless_of_command() {
    let verdict = agent_policy::review(
        "import subprocess\ndef listing(path):\n    return subprocess.run(\"ls\", shell=True)\n",
    );
    assert!(!verdict.is_safe());
}

#[tokio::test]
async fn network_only_source_is_safe_with_medium_finding() {
    let verdict = agent_policy::review(
        "import requests\n\ndef fetch(url):\n    return requests.get(url).text\n",
    );
    assert!(verdict.is_safe());
    assert!(verdict.has_severity(Severity::Medium));
}

#[tokio::test]
async fn admitted_tool_is_immediately_callable() {
    let oracle = ScriptedOracle::new([
        r#"[{"step": 1, "action": "UseTool", "reason": "square 7"}, {"step": 2, "action": "DirectAnswer"}]"#,
        r#"{"tool": "square", "parameters": {"n": 7}, "confidence": 0.99}"#,
        "7 squared is 49.",
    ]);
    let (agent, _) = agent(oracle.clone()).await;
    assert!(agent.tools(OWNER).await.unwrap().iter().all(|tool| tool.name() != "square"));

    let definition = ToolDefinition::builder(OWNER)
        .name("square")
        .unwrap()
        .description("Square a number")
        .parameters(vec![ParameterSpec::new("n").unwrap().with_type("int")])
        .source(ToolSource::script("def square(n):\n    return n * n\n"))
        .build()
        .unwrap();
    agent.admission().register(definition).await.unwrap();

    let outcome = agent.respond(OWNER, "what is 7 squared").await;
    assert_eq!(outcome.answer(), "7 squared is 49.");
    assert!(oracle.prompts()[2].contains("**Result**: 49"));
}

#[tokio::test]
async fn update_with_unresolvable_import_is_rejected() {
    let (agent, _) = agent(ScriptedOracle::new(Vec::<String>::new())).await;
    let id = agent
        .admission()
        .register(script("shout", "def shout(text):\n    return text.upper()\n"))
        .await
        .unwrap();

    let err = agent
        .admission()
        .update(
            OWNER,
            id,
            ToolUpdate {
                source: Some(ToolSource::script("import numpy\ndef shout(text):\n    return text.upper()\n")),
                ..ToolUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::Policy(PolicyError::InvalidSource { reason }) if reason.contains("numpy")));
}

#[tokio::test]
async fn reregistering_identical_source_behaves_identically() {
    let registry = ToolRegistry::new();
    let code = "def double(x):\n    return x * 2\n";

    registry.register_script("double", "Double", code, None).unwrap();
    let first = registry.invoke("double", json!({"x": 21})).await.unwrap();
    registry.register_script("double", "Double", code, None).unwrap();
    let second = registry.invoke("double", json!({"x": 21})).await.unwrap();

    assert_eq!(first, json!(42));
    assert_eq!(first, second);
    assert_eq!(registry.len(), 1);
}
