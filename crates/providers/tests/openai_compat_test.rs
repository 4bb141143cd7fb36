use rae_providers::{ChatRequest, LlmProvider, OpenAiCompatProvider};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn chat_returns_text_content_and_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "m1",
            "choices": [{
                "message": {"role": "assistant", "content": "4"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6},
        })))
        .mount(&server)
        .await;

    let provider =
        OpenAiCompatProvider::new("m1", server.uri(), "test-key", "m1", 10).unwrap();

    let req = ChatRequest {
        messages: vec![rae_domain::tool::Message::user("2+2")],
        ..Default::default()
    };
    let resp = provider.chat(req).await.unwrap();
    let choice = resp.first_choice().unwrap();
    assert_eq!(choice.message.content.extract_all_text(), "4");
    assert_eq!(resp.usage.unwrap().total_tokens, 6);
}

#[tokio::test]
async fn chat_non_2xx_maps_to_external_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let provider =
        OpenAiCompatProvider::new("m1", server.uri(), "test-key", "m1", 10).unwrap();

    let req = ChatRequest {
        messages: vec![rae_domain::tool::Message::user("hi")],
        ..Default::default()
    };
    let err = provider.chat(req).await.unwrap_err();
    assert_eq!(err.kind(), "external");
}
