//! End-to-end dispatch through mock HTTP backends.

use ponder_rs::prelude::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_config(variant: &str, url: &str) -> BackendConfig {
    BackendConfig::from_json(&format!(
        r#"{{
            "inference": {{"kind": "glm", "variant": "{variant}", "url": "{url}", "auth": "glm-token", "id": "acct-9"}},
            "value": {{"kind": "glm", "variant": "{variant}", "url": "{url}", "auth": "glm-token", "id": "acct-9"}}
        }}"#
    ))
    .unwrap()
}

#[tokio::test]
async fn gateway_makes_three_attempts_then_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::from_config(&gateway_config("GLM4", &server.uri())).unwrap();
    let result = dispatcher.generate(&GenerationRequest::new("2 + 2 = ?")).await;

    assert!(result.is_empty());
}

#[tokio::test]
async fn glm4_reply_is_decoded_into_lines() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "glm-token"))
        .and(header("content-type", "application/json; charset=utf-8"))
        .and(body_partial_json(serde_json::json!({
            "model": "glm4-alltools-130b-awq",
            "stream": false,
            "messages": [{"role": "user", "content": "2 + 2 = ?"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"choices":[{"message":{"content":"Step 1: add\nAnswer: 4","role":"assistant"}}]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::from_config(&gateway_config("GLM4", &server.uri())).unwrap();
    let result = dispatcher.generate(&GenerationRequest::new("2 + 2 = ?")).await;

    assert_eq!(result.segments, vec!["Step 1: add", "Answer: 4"]);
}

#[tokio::test]
async fn chatglm2_event_stream_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({
            "id": "acct-9",
            "seed": 170,
            "max_tokens": "1000"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "event: add\ndata: partial\n\nevent: finish\ndata: Step 1\ndata: \ndata: Step 2\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::from_config(&gateway_config("ChatGLM2", &server.uri())).unwrap();
    let result = dispatcher.generate(&GenerationRequest::new("next step")).await;

    assert_eq!(result.segments, vec!["Step 1", "Step 2"]);
}

#[tokio::test]
async fn gateway_value_returns_text_lines() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"content":"Analysis: correct\nScore: 0.8","role":"assistant"}"#,
        ))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::from_config(&gateway_config("GLM3", &server.uri())).unwrap();
    let value = dispatcher.evaluate(&ValueRequest::new("Q: 2+2\nA: 4")).await;

    assert_eq!(
        value,
        ValueResult::Text(vec!["Analysis: correct".into(), "Score: 0.8".into()])
    );
    assert_eq!(value.score(), Some(0.8));
}

#[tokio::test]
async fn hosted_usage_accumulates_across_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "x = 2"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let config = BackendConfig::from_json(&format!(
        r#"{{
            "inference": {{"kind": "openai", "api_base": "{uri}", "api_key": "sk-test"}},
            "value": {{"kind": "openai", "api_base": "{uri}", "api_key": "sk-test"}}
        }}"#,
        uri = server.uri()
    ))
    .unwrap();
    let dispatcher = Dispatcher::from_config(&config).unwrap();

    let mut last = 0;
    for _ in 0..2 {
        let result = dispatcher.generate(&GenerationRequest::new("2x + 3 = 7")).await;
        assert_eq!(result.segments, vec!["x = 2"]);
        let total = dispatcher.usage_report().total_tokens();
        assert!(total > last);
        last = total;
    }

    let report = dispatcher.usage_report();
    assert_eq!(report.prompt_tokens, 24);
    assert_eq!(report.completion_tokens, 6);
    assert!(report.cost.usd().is_some());
}
