//! End-to-end sessions driven by scripted providers and operator input.

use std::sync::Arc;

use turnloop_agent::events::{self, EventStream};
use turnloop_agent::journal::{Journal, JournalWriter};
use turnloop_agent::test_support::{
    EchoTool, ImageTool, ScriptedInput, ScriptedProvider, response, text_response, tool_response,
};
use turnloop_agent::{
    AgentEvent, ImageRetentionPolicy, SamplingLoop, TerminationReason, ToolDispatcher,
};
use turnloop_config::SessionConfig;
use turnloop_core::error::{Error, ProviderError};
use turnloop_core::message::{ContentBlock, Conversation, ImageData, ResultPart, Role, Turn};
use turnloop_core::provider::CompletionRequest;
use turnloop_core::tool::ToolRegistry;
use turnloop_tools::BashTool;

fn config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.api_key = Some("test-key".into());
    config.summary.enabled = false;
    config
}

fn registry_with(tools: Vec<Box<dyn turnloop_core::tool::Tool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    registry
}

fn session(
    config: &SessionConfig,
    provider: Arc<ScriptedProvider>,
    registry: ToolRegistry,
    input: ScriptedInput,
) -> (SamplingLoop, EventStream) {
    let (sink, stream) = events::channel();
    let agent = SamplingLoop::new(
        config,
        provider,
        ToolDispatcher::new(registry).with_parallel(config.tools.parallel),
        sink,
        Box::new(input),
    )
    .unwrap();
    (agent, stream)
}

fn echo(id: &str, text: &str) -> Result<turnloop_core::CompletionResponse, ProviderError> {
    tool_response(id, "echo", serde_json::json!({ "text": text }))
}

fn kinds(stream: &mut EventStream) -> Vec<&'static str> {
    stream.drain().iter().map(AgentEvent::kind).collect()
}

fn marked_turns(request: &CompletionRequest) -> usize {
    request.turns.iter().filter(|t| t.has_cache_marker()).count()
}

fn image_count(turns: &[Turn]) -> usize {
    turns
        .iter()
        .flat_map(|t| t.blocks())
        .map(ContentBlock::result_image_count)
        .sum()
}

#[tokio::test]
async fn scenario_a_tool_use_appends_results_without_prompting() {
    let workspace = tempfile::tempdir().unwrap();
    std::fs::write(workspace.path().join("notes.txt"), "hello").unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response("toolu_1", "bash", serde_json::json!({ "command": "ls" })),
        text_response("There is one file."),
    ]));
    let input = ScriptedInput::new(Vec::<String>::new());
    let prompts = input.prompts();
    let registry = registry_with(vec![Box::new(
        BashTool::new(vec![]).with_workspace(workspace.path()),
    )]);
    let (agent, _events) = session(&config(), provider.clone(), registry, input);

    let outcome = agent
        .with_required_tools(["bash"])
        .run(Conversation::with_task("list files"))
        .await
        .unwrap();

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    // After the tool iteration the store held task, tool use and results.
    assert_eq!(requests[1].turns.len(), 3);
    assert_eq!(requests[1].turns[1].role, Role::Assistant);
    assert!(requests[1].turns[2].text().contains("notes.txt"));
    // Only the text-only iteration asked the operator.
    assert_eq!(prompts.lock().unwrap().len(), 1);
    assert_eq!(outcome.reason, TerminationReason::EndOfInput);
    assert_eq!(outcome.conversation.len(), 4);
}

#[tokio::test]
async fn scenario_b_decline_terminates_without_appending() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        echo("t1", "one"),
        echo("t2", "two"),
        text_response("All done."),
    ]));
    let input = ScriptedInput::new(["no"]);
    let prompts = input.prompts();
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, mut events) = session(&config(), provider, registry, input);

    let outcome = agent.run(Conversation::with_task("count")).await.unwrap();

    assert_eq!(outcome.reason, TerminationReason::OperatorDeclined);
    assert_eq!(outcome.conversation.len(), 6);
    assert!(
        outcome
            .conversation
            .turns()
            .iter()
            .all(|t| t.text().trim() != "no")
    );
    assert_eq!(
        *prompts.lock().unwrap(),
        vec![turnloop_agent::OPERATOR_PROMPT.to_string()]
    );
    assert_eq!(kinds(&mut events).last(), Some(&"terminated"));
}

#[test]
fn scenario_c_keeps_newest_images_in_place() {
    let img = |tag: u8| ResultPart::Image(ImageData::png(vec![tag]));
    let text = |s: &str| ResultPart::Text { text: s.into() };
    let mut turns = vec![
        Turn::user("task"),
        Turn::user_blocks(vec![ContentBlock::tool_result(
            "r1",
            false,
            vec![text("first"), img(b'a'), img(b'b')],
        )]),
        Turn::user_blocks(vec![ContentBlock::tool_result(
            "r2",
            false,
            vec![img(b'c'), text("second"), img(b'd')],
        )]),
        Turn::user_blocks(vec![ContentBlock::tool_result("r3", false, vec![img(b'e')])]),
    ];

    let removed = ImageRetentionPolicy::new(Some(2)).apply(&mut turns);

    assert_eq!(removed, 3);
    assert_eq!(turns.len(), 4);
    assert_eq!(
        turns[1].blocks()[0],
        ContentBlock::tool_result("r1", false, vec![text("first")])
    );
    assert_eq!(
        turns[2].blocks()[0],
        ContentBlock::tool_result("r2", false, vec![text("second"), img(b'd')])
    );
    assert_eq!(
        turns[3].blocks()[0],
        ContentBlock::tool_result("r3", false, vec![img(b'e')])
    );
}

#[tokio::test]
async fn scenario_c_requests_never_carry_more_than_keep_images() {
    let shot = |id: &str| tool_response(id, "screenshot", serde_json::json!({}));
    let provider = Arc::new(ScriptedProvider::new(vec![
        shot("s1"),
        shot("s2"),
        shot("s3"),
        shot("s4"),
        text_response("seen enough"),
    ]));
    let registry = registry_with(vec![Box::new(ImageTool::new(vec![0x89, 0x50]))]);
    let (agent, _events) = session(&config(), provider.clone(), registry, ScriptedInput::new(["no"]));

    let outcome = agent.run(Conversation::with_task("look")).await.unwrap();

    for request in provider.requests() {
        assert!(image_count(&request.turns) <= 2);
    }
    // The newest screenshot always survives pruning.
    let last = provider.requests().pop().unwrap();
    assert_eq!(image_count(&last.turns), 2);
    assert_eq!(last.turns[last.turns.len() - 1].blocks()[0].result_image_count(), 1);
    assert_eq!(outcome.conversation.len(), 10);
}

#[tokio::test]
async fn scenario_d_summary_replaces_history() {
    let mut config = config();
    config.summary.enabled = true;
    config.summary.max_turns = 4;
    config.summary.model = "summary-model".into();

    let provider = Arc::new(
        ScriptedProvider::new(vec![
            echo("t1", "a"),
            echo("t2", "b"),
            text_response("finished"),
        ])
        .with_model_script("summary-model", vec![text_response("Echoed a and b.")]),
    );
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, mut events) = session(&config, provider.clone(), registry, ScriptedInput::new(["no"]));

    let outcome = agent.run(Conversation::with_task("echo twice")).await.unwrap();

    let requests = provider.requests();
    let summary_request = requests
        .iter()
        .find(|r| r.model == "summary-model")
        .unwrap();
    assert!(summary_request.turns[0].text().contains("echo twice"));

    // The request after compression sees exactly task + summary.
    let after = requests.last().unwrap();
    assert_eq!(after.turns.len(), 2);
    assert_eq!(after.turns[0], Turn::user("echo twice"));
    let summary = after.turns[1].blocks()[0].as_text().unwrap();
    assert!(summary.starts_with("[CONVERSATION SUMMARY]"));
    assert!(summary.ends_with("Echoed a and b."));

    assert_eq!(outcome.conversation.len(), 3);
    assert!(
        events
            .drain()
            .contains(&AgentEvent::Summarized { turns_before: 5 })
    );
}

#[tokio::test]
async fn failed_summary_keeps_history_and_continues() {
    let mut config = config();
    config.summary.enabled = true;
    config.summary.max_turns = 2;
    config.summary.model = "summary-model".into();

    let provider = Arc::new(
        ScriptedProvider::new(vec![echo("t1", "a"), text_response("ok")]).with_model_script(
            "summary-model",
            vec![Err(ProviderError::Network("unreachable".into()))],
        ),
    );
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, mut events) = session(&config, provider, registry, ScriptedInput::new(["no"]));

    let outcome = agent.run(Conversation::with_task("go")).await.unwrap();

    assert_eq!(outcome.reason, TerminationReason::OperatorDeclined);
    assert_eq!(outcome.conversation.len(), 4);
    let events = events.drain();
    assert!(events.iter().any(|e| matches!(e, AgentEvent::Error { .. })));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Summarized { .. })));
}

#[tokio::test]
async fn every_tool_use_is_paired_before_the_next_request() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        response(vec![
            ContentBlock::text("two at once"),
            ContentBlock::tool_use("a", "echo", serde_json::json!({ "text": "1" })),
            ContentBlock::tool_use("b", "missing", serde_json::json!({})),
        ]),
        echo("c", "3"),
        text_response("done"),
    ]));
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, _events) = session(&config(), provider.clone(), registry, ScriptedInput::new(["no"]));

    agent.run(Conversation::with_task("pair")).await.unwrap();

    for request in provider.requests().iter().skip(1) {
        let turns = &request.turns;
        for (i, turn) in turns.iter().enumerate() {
            let uses: Vec<&str> = turn.tool_uses().map(|(id, _, _)| id).collect();
            if uses.is_empty() {
                continue;
            }
            let results: Vec<&str> = turns[i + 1]
                .blocks()
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(uses, results);
        }
    }

    let second = &provider.requests()[1];
    match &second.turns[2].blocks()[1] {
        ContentBlock::ToolResult { is_error, parts, .. } => {
            assert!(is_error);
            assert_eq!(
                parts,
                &vec![ResultPart::Text {
                    text: "Tool not found: missing".into()
                }]
            );
        }
        other => panic!("expected tool result, got {other:?}"),
    }
}

#[tokio::test]
async fn cache_breakpoints_stay_within_capacity() {
    let mut config = config();
    config.cache.breakpoints = 2;
    let provider = Arc::new(ScriptedProvider::new(vec![
        echo("t1", "1"),
        echo("t2", "2"),
        echo("t3", "3"),
        echo("t4", "4"),
        text_response("done"),
    ]));
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, _events) = session(&config, provider.clone(), registry, ScriptedInput::new(["no"]));

    agent.run(Conversation::with_task("loop")).await.unwrap();

    let requests = provider.requests();
    for request in &requests {
        assert!(marked_turns(request) <= 2);
        assert!(request.cache_enabled);
    }
    let last = requests.last().unwrap();
    let n = last.turns.len();
    assert!(last.turns[n - 1].has_cache_marker());
    assert!(last.turns[n - 3].has_cache_marker());
    assert!(!last.turns[n - 5].has_cache_marker());
}

#[tokio::test]
async fn disabled_cache_sends_no_markers() {
    let mut config = config();
    config.cache.enabled = false;
    let provider = Arc::new(ScriptedProvider::new(vec![echo("t1", "1"), text_response("ok")]));
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, _events) = session(&config, provider.clone(), registry, ScriptedInput::new(["no"]));

    agent.run(Conversation::with_task("go")).await.unwrap();

    for request in provider.requests() {
        assert!(!request.cache_enabled);
        assert_eq!(marked_turns(&request), 0);
    }
}

#[tokio::test]
async fn codec_error_halts_cleanly() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        echo("t1", "1"),
        Err(ProviderError::Codec("expected value at line 1".into())),
    ]));
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, mut events) = session(&config(), provider, registry, ScriptedInput::new(["no"]));

    let outcome = agent.run(Conversation::with_task("go")).await.unwrap();

    assert_eq!(outcome.reason, TerminationReason::CodecError);
    assert_eq!(outcome.conversation.len(), 3);
    let events = events.drain();
    let n = events.len();
    assert_eq!(events[n - 2].kind(), "error");
    assert!(matches!(
        events[n - 1],
        AgentEvent::Terminated {
            reason: TerminationReason::CodecError,
            iterations: 2,
            ..
        }
    ));
}

#[tokio::test]
async fn transport_error_returns_store_and_offending_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        echo("t1", "1"),
        Err(ProviderError::RateLimited {
            retry_after_secs: 30,
        }),
    ]));
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, mut events) = session(&config(), provider, registry, ScriptedInput::new(["no"]));

    let abort = agent.run(Conversation::with_task("go")).await.unwrap_err();

    assert!(matches!(
        abort.error,
        Error::Provider(ProviderError::RateLimited { .. })
    ));
    assert_eq!(abort.conversation.len(), 3);
    let offending = abort.offending_turn.unwrap();
    assert_eq!(offending.blocks()[0].result_image_count(), 0);
    assert!(offending.text().contains('1'));
    assert_eq!(&kinds(&mut events)[3..], &["iteration_started", "error", "terminated"]);
}

#[tokio::test]
async fn events_follow_iteration_order() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        response(vec![
            ContentBlock::text("checking"),
            ContentBlock::tool_use("t1", "echo", serde_json::json!({ "text": "x" })),
        ]),
        text_response("done"),
    ]));
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, mut events) = session(&config(), provider, registry, ScriptedInput::new(["no"]));

    agent.run(Conversation::with_task("go")).await.unwrap();

    assert_eq!(
        kinds(&mut events),
        vec![
            "iteration_started",
            "assistant_text",
            "tool_invoked",
            "tool_result",
            "iteration_started",
            "assistant_text",
            "awaiting_input",
            "terminated",
        ]
    );
}

#[tokio::test]
async fn usage_totals_are_reported_on_termination() {
    let provider = Arc::new(ScriptedProvider::new(vec![echo("t1", "1"), text_response("ok")]));
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, mut events) = session(&config(), provider, registry, ScriptedInput::new(["no"]));

    let outcome = agent.run(Conversation::with_task("go")).await.unwrap();

    assert_eq!(outcome.usage.requests(), 2);
    assert_eq!(outcome.usage.total().input_tokens, 20);
    let last = events.drain().pop().unwrap();
    match last {
        AgentEvent::Terminated { usage, iterations, .. } => {
            assert_eq!(iterations, 2);
            assert_eq!(usage.output_tokens, 10);
        }
        other => panic!("expected terminated, got {other:?}"),
    }
}

#[tokio::test]
async fn parallel_dispatch_keeps_result_order() {
    let mut config = config();
    config.tools.parallel = true;
    let provider = Arc::new(ScriptedProvider::new(vec![
        response(vec![
            ContentBlock::tool_use("a", "echo", serde_json::json!({ "text": "first" })),
            ContentBlock::tool_use("b", "echo", serde_json::json!({ "text": "second" })),
        ]),
        text_response("ok"),
    ]));
    let registry = registry_with(vec![Box::new(EchoTool::safe())]);
    let (agent, _events) = session(&config, provider.clone(), registry, ScriptedInput::new(["no"]));

    agent.run(Conversation::with_task("go")).await.unwrap();

    let results = provider.requests()[1].turns[2].text();
    assert_eq!(results, "first second");
}

#[tokio::test]
async fn journal_records_each_iteration() {
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Entries(Mutex<Vec<(usize, String)>>);

    #[async_trait]
    impl Journal for Entries {
        async fn entry_count(&self) -> turnloop_core::Result<usize> {
            Ok(self.0.lock().unwrap().len())
        }
        async fn append(&self, n: usize, summary: &str) -> turnloop_core::Result<()> {
            self.0.lock().unwrap().push((n, summary.to_string()));
            Ok(())
        }
    }

    let mut config = config();
    config.journal.enabled = true;
    config.journal.model = "journal-model".into();
    let provider = Arc::new(
        ScriptedProvider::new(vec![
            response(vec![
                ContentBlock::text("running it"),
                ContentBlock::tool_use("t1", "echo", serde_json::json!({ "text": "x" })),
            ]),
            text_response("done"),
        ])
        .with_model_script(
            "journal-model",
            vec![text_response("Ran echo."), text_response("Finished.")],
        ),
    );
    let entries = Arc::new(Entries::default());
    let writer = JournalWriter::open(entries.clone(), provider.clone(), &config.journal)
        .await
        .unwrap();
    let registry = registry_with(vec![Box::new(EchoTool::new())]);
    let (agent, _events) = session(&config, provider, registry, ScriptedInput::new(["no"]));

    agent
        .with_journal(writer)
        .run(Conversation::with_task("go"))
        .await
        .unwrap();

    assert_eq!(
        *entries.0.lock().unwrap(),
        vec![(1, "Ran echo.".to_string()), (2, "Finished.".to_string())]
    );
}
