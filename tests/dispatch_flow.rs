//! End-to-end dispatch tests against stubbed provider endpoints.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use ai_dispatch_rust::{
    Capability, ChatRequest, DispatchConfig, Dispatcher, ToolDefinition, ToolExecutor, Turn,
};

fn chat_config(base_url: &str, extra: &str) -> DispatchConfig {
    let yaml = format!(
        r#"
providers:
  - name: stub-chat
    kind: openai_compatible
    capabilities: [chat]
    base_url: {base_url}
    model: gpt-4o
    api_key: sk-test
retry:
  interactive:
    max_attempts: 3
    base_delay_ms: 10
    multiplier: 2.0
    jitter_max_ms: 0
{extra}"#
    );
    DispatchConfig::from_yaml(&yaml).unwrap()
}

struct StubWeather;

#[async_trait]
impl ToolExecutor for StubWeather {
    fn name(&self) -> &str {
        "get_weather"
    }
    async fn execute(&self, arguments: Value) -> ai_dispatch_rust::Result<Value> {
        assert_eq!(arguments["city"], "Paris");
        Ok(Value::String("18C, clear".into()))
    }
}

fn weather_tool() -> ToolDefinition {
    ToolDefinition::new(
        "get_weather",
        serde_json::json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        }),
    )
    .with_description("Current weather for a city")
}

#[tokio::test]
async fn chat_happy_path() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"choices":[{"message":{"content":"4"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":8,"completion_tokens":1,"total_tokens":9}}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let dispatcher = Dispatcher::builder()
        .config(chat_config(&server.url(), ""))
        .build()
        .unwrap();

    let response = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Chat, vec![Turn::user("2+2?")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.text.as_deref(), Some("4"));
    assert!(response.tool_calls.is_empty());
    assert!(response.terminal);
    assert_eq!(response.usage.unwrap().total_tokens, 9);
}

#[tokio::test]
async fn tool_loop_makes_exactly_two_provider_calls() {
    let mut server = mockito::Server::new_async().await;
    // Mocks match LIFO: the tool-result round (body carries a tool-role
    // turn) is created last so it takes priority on the second call.
    let first_round = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"choices":[{"message":{"content":null,"tool_calls":[
                {"id":"call_1","type":"function",
                 "function":{"name":"get_weather","arguments":"{\"city\":\"Paris\"}"}}
            ]}}]}"#,
        )
        .expect(1)
        .create_async()
        .await;
    let second_round = server
        .mock("POST", "/v1/chat/completions")
        .match_body(mockito::Matcher::Regex(r#""role":"tool""#.into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"choices":[{"message":{"content":"It is 18C and clear in Paris."}}]}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let dispatcher = Dispatcher::builder()
        .config(chat_config(&server.url(), ""))
        .tool(Arc::new(StubWeather))
        .build()
        .unwrap();

    let response = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Chat, vec![Turn::user("Weather in Paris?")])
                .with_tools(vec![weather_tool()]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    first_round.assert_async().await;
    second_round.assert_async().await;
    assert!(response.terminal);
    assert!(response.tool_calls.is_empty());
    assert!(response.text.unwrap().contains("18C"));
}

#[tokio::test]
async fn exhausted_retries_surface_terminal_error() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_body(r#"{"error":{"message":"internal"}}"#)
        .expect(3)
        .create_async()
        .await;

    let dispatcher = Dispatcher::builder()
        .config(chat_config(&server.url(), ""))
        .build()
        .unwrap();

    let start = Instant::now();
    let err = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Chat, vec![Turn::user("hello")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), "terminal");
    match err {
        ai_dispatch_rust::Error::Terminal { attempts, cause, .. } => {
            assert_eq!(attempts, 3);
            assert_eq!(cause.unwrap().kind(), "provider");
        }
        other => panic!("expected Terminal, got {:?}", other),
    }
    // backoff floor: 10ms + 20ms between the three attempts (jitter disabled)
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(401)
        .with_body(r#"{"error":{"message":"Invalid API key"}}"#)
        .expect(1)
        .create_async()
        .await;

    let dispatcher = Dispatcher::builder()
        .config(chat_config(&server.url(), ""))
        .build()
        .unwrap();

    let err = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Chat, vec![Turn::user("hello")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), "provider");
    match err {
        ai_dispatch_rust::Error::Provider { status, class, message, .. } => {
            assert_eq!(status, 401);
            assert_eq!(class, "authentication");
            assert_eq!(message, "Invalid API key");
        }
        other => panic!("expected Provider, got {:?}", other),
    }
}

#[tokio::test]
async fn tool_loop_cap_stops_runaway_conversations() {
    let mut server = mockito::Server::new_async().await;
    // Always requests another tool call; never converges.
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"choices":[{"message":{"content":null,"tool_calls":[
                {"id":"call_n","type":"function",
                 "function":{"name":"get_weather","arguments":"{\"city\":\"Paris\"}"}}
            ]}}]}"#,
        )
        .expect(3)
        .create_async()
        .await;

    let dispatcher = Dispatcher::builder()
        .config(chat_config(&server.url(), "tool_loop_cap: 2\n"))
        .tool(Arc::new(StubWeather))
        .build()
        .unwrap();

    let err = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Chat, vec![Turn::user("loop")])
                .with_tools(vec![weather_tool()]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), "terminal");
}

#[tokio::test]
async fn malformed_response_is_parse_error_not_provider_down() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"content":null}}]}"#)
        .create_async()
        .await;

    let dispatcher = Dispatcher::builder()
        .config(chat_config(&server.url(), ""))
        .build()
        .unwrap();

    let err = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Chat, vec![Turn::user("hello")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "parse");
}

#[tokio::test]
async fn streaming_envelope_is_tolerated() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"4\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ))
        .create_async()
        .await;

    let dispatcher = Dispatcher::builder()
        .config(chat_config(&server.url(), ""))
        .build()
        .unwrap();

    let response = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Chat, vec![Turn::user("2+2?")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.text.as_deref(), Some("4"));
    assert!(response.terminal);
}

#[tokio::test]
async fn unknown_capability_fails_without_network() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let dispatcher = Dispatcher::builder()
        .config(chat_config(&server.url(), ""))
        .build()
        .unwrap();

    let err = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Math, vec![Turn::user("2+2?")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), "configuration");
}

#[tokio::test]
async fn cancelled_token_short_circuits() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let dispatcher = Dispatcher::builder()
        .config(chat_config(&server.url(), ""))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Chat, vec![Turn::user("hello")]),
            &cancel,
        )
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), "cancelled");
}

#[tokio::test]
async fn reasoning_capability_speaks_anthropic_wire() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("anthropic-version", "2023-06-01")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"content":[{"type":"text","text":"Proof complete."}],
                "stop_reason":"end_turn",
                "usage":{"input_tokens":15,"output_tokens":4}}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let yaml = format!(
        r#"
providers:
  - name: stub-reasoning
    kind: anthropic_messages
    capabilities: [reasoning]
    base_url: {}
    model: claude-sonnet
    api_key: sk-test
"#,
        server.url()
    );
    let dispatcher = Dispatcher::builder()
        .config(DispatchConfig::from_yaml(&yaml).unwrap())
        .build()
        .unwrap();

    let response = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Reasoning, vec![Turn::user("prove it")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.text.as_deref(), Some("Proof complete."));
    assert_eq!(response.usage.unwrap().total_tokens, 19);
}

#[tokio::test]
async fn search_capability_returns_ranked_text() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/search")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"answer":"The lru crate.",
                "results":[{"title":"lru","url":"https://crates.io/crates/lru",
                            "content":"LRU cache implementation."}]}"#,
        )
        .create_async()
        .await;

    let yaml = format!(
        r#"
providers:
  - name: stub-search
    kind: web_search
    capabilities: [search]
    base_url: {}
    model: standard
    api_key: sk-test
"#,
        server.url()
    );
    let dispatcher = Dispatcher::builder()
        .config(DispatchConfig::from_yaml(&yaml).unwrap())
        .build()
        .unwrap();

    let response = dispatcher
        .dispatch(
            ChatRequest::new(Capability::Search, vec![Turn::user("rust lru cache")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let text = response.text.unwrap();
    assert!(text.starts_with("The lru crate."));
    assert!(text.contains("1. lru"));
    assert!(response.terminal);
}
