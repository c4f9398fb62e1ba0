use std::sync::Arc;
use std::time::Duration;

use tastebud_core::credentials::{CredentialAction, CredentialBus, CredentialType, MemoryCredentialStore};
use tastebud_core::domain::{MediaItem, MediaType};
use tastebud_core::llm::gemini::GeminiClient;
use tastebud_core::llm::openai::OpenAiClient;
use tastebud_core::llm::repair::{suggest_with_repair, AcceptAll};
use tastebud_core::llm::LlmClient;
use tastebud_core::prompt::Message;
use tastebud_core::EngineError;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MOVIE_JSON: &str =
    r#"{"title":"Stalker","director":"Andrei Tarkovsky","genre":"science fiction","reasoning":"slow and strange"}"#;

fn mock_openai_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    })
}

fn mock_gemini_response(parts: &[&str]) -> serde_json::Value {
    let parts: Vec<_> = parts.iter().map(|t| serde_json::json!({"text": t})).collect();
    serde_json::json!({
        "candidates": [{
            "content": {"role": "model", "parts": parts},
            "finishReason": "STOP"
        }]
    })
}

fn mock_error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(serde_json::json!({
        "error": {"code": status, "message": message}
    }))
}

fn keys(credential: CredentialType, key: &str) -> Arc<MemoryCredentialStore> {
    let store = Arc::new(MemoryCredentialStore::new());
    store.set(credential, key).unwrap();
    store
}

fn openai(server: &MockServer, store: Arc<MemoryCredentialStore>) -> OpenAiClient {
    OpenAiClient::new(server.uri(), "gpt-test", store, Duration::from_secs(5)).unwrap()
}

fn gemini(server: &MockServer, store: Arc<MemoryCredentialStore>) -> GeminiClient {
    GeminiClient::new(server.uri(), "gemini-test", store, Duration::from_secs(5)).unwrap()
}

fn round() -> Vec<Message> {
    vec![
        Message::system("Suggest one movie as JSON."),
        Message::user("Suggested Movie: Solaris directed by Andrei Tarkovsky  User Outcome: liked"),
    ]
}

#[tokio::test]
async fn openai_round_sends_bearer_key_and_parses_fenced_reply() {
    let server = MockServer::start().await;
    let reply = format!("Here you go:\n```json\n{MOVIE_JSON}\n```");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_openai_response(&reply)))
        .expect(1)
        .mount(&server)
        .await;

    let client = openai(&server, keys(CredentialType::OpenAi, "sk-test"));
    let response = client.send_messages(MediaType::Movie, &round()).await.unwrap();
    assert_eq!(response.raw_response, reply);

    let suggestion = response.into_result().unwrap();
    assert_eq!(suggestion.content.title(), "Stalker");
    assert_eq!(suggestion.content.creator(), "Andrei Tarkovsky");
    assert_eq!(suggestion.reasoning, "slow and strange");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["model"], "gpt-test");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["role"], "user");
}

#[tokio::test]
async fn openai_empty_choices_is_no_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
        .mount(&server)
        .await;

    let client = openai(&server, keys(CredentialType::OpenAi, "sk-test"));
    let err = client.send_messages(MediaType::Movie, &round()).await.unwrap_err();
    assert!(matches!(err, EngineError::NoCandidates { .. }));
}

#[tokio::test]
async fn openai_unauthorized_is_invalid_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(mock_error(401, "Incorrect API key provided"))
        .mount(&server)
        .await;

    let client = openai(&server, keys(CredentialType::OpenAi, "sk-wrong"));
    let err = client.send_messages(MediaType::Movie, &round()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidCredential { credential: CredentialType::OpenAi, .. }
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn openai_server_error_is_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(mock_error(503, "overloaded"))
        .mount(&server)
        .await;

    let client = openai(&server, keys(CredentialType::OpenAi, "sk-test"));
    let err = client.send_messages(MediaType::Movie, &round()).await.unwrap_err();
    assert!(matches!(err, EngineError::Transport { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn missing_key_fails_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = openai(&server, Arc::new(MemoryCredentialStore::new()));
    let err = client.send_messages(MediaType::Movie, &round()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidCredential { .. }));
}

#[tokio::test]
async fn published_key_change_is_used_by_next_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer sk-old"))
        .respond_with(mock_error(401, "revoked"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer sk-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_openai_response(MOVIE_JSON)))
        .mount(&server)
        .await;

    let store = keys(CredentialType::OpenAi, "sk-old");
    let bus = CredentialBus::new();
    let client = openai(&server, store.clone());
    client.watch_credentials(&bus);

    assert!(client.send_messages(MediaType::Movie, &round()).await.is_err());

    store.set(CredentialType::OpenAi, "sk-new").unwrap();
    assert_eq!(bus.publish(CredentialType::OpenAi, CredentialAction::Updated), 1);

    let response = client.send_messages(MediaType::Movie, &round()).await.unwrap();
    assert_eq!(response.into_result().unwrap().content.title(), "Stalker");
}

#[tokio::test]
async fn malformed_reply_gets_one_followup_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(mock_openai_response(r#"{"title":"Stalker""#)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_openai_response(MOVIE_JSON)))
        .mount(&server)
        .await;

    let client = openai(&server, keys(CredentialType::OpenAi, "sk-test"));
    let suggestion = suggest_with_repair(&client, MediaType::Movie, &round(), 1, &AcceptAll)
        .await
        .unwrap();
    assert_eq!(suggestion.content.title(), "Stalker");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: serde_json::Value = requests[1].body_json().unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), round().len() + 3);
    assert_eq!(messages[round().len() + 1]["role"], "assistant");
    assert_eq!(messages[round().len() + 1]["content"], r#"{"title":"Stalker""#);
}

#[tokio::test]
async fn repair_gives_up_after_the_followup_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_openai_response("no idea")))
        .expect(2)
        .mount(&server)
        .await;

    let client = openai(&server, keys(CredentialType::OpenAi, "sk-test"));
    let err = suggest_with_repair(&client, MediaType::Movie, &round(), 1, &AcceptAll)
        .await
        .unwrap_err();
    match err {
        EngineError::MalformedResponse { raw_response, .. } => assert_eq!(raw_response, "no idea"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn gemini_round_folds_system_text_and_joins_parts() {
    let server = MockServer::start().await;
    let (head, tail) = MOVIE_JSON.split_at(20);

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "g-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_gemini_response(&[head, tail])))
        .expect(1)
        .mount(&server)
        .await;

    let client = gemini(&server, keys(CredentialType::Gemini, "g-test"));
    let suggestion = client
        .send_messages(MediaType::Movie, &round())
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert!(matches!(suggestion.content, MediaItem::Movie(_)));
    assert_eq!(suggestion.content.title(), "Stalker");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = requests[0].body_json().unwrap();
    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0]["role"], "user");
    let text = contents[0]["parts"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Suggest one movie as JSON."));
    assert!(text.contains("User Outcome: liked"));
    assert!(body["generationConfig"]["temperature"].is_number());
}

#[tokio::test]
async fn gemini_blocked_prompt_is_no_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .mount(&server)
        .await;

    let client = gemini(&server, keys(CredentialType::Gemini, "g-test"));
    let err = client.send_messages(MediaType::Movie, &round()).await.unwrap_err();
    assert!(matches!(err, EngineError::NoCandidates { .. }));
}

#[tokio::test]
async fn gemini_bad_key_400_is_invalid_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(mock_error(400, "API key not valid. Please pass a valid API key."))
        .mount(&server)
        .await;

    let client = gemini(&server, keys(CredentialType::Gemini, "g-bad"));
    let err = client.send_messages(MediaType::Movie, &round()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidCredential { credential: CredentialType::Gemini, .. }
    ));
}
