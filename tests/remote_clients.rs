//! HTTP embedding and generation clients against a mock server.

use repo_chat::config::{EmbeddingConfig, GenerationConfig};
use repo_chat::embedding::HttpEmbedder;
use repo_chat::generation::HttpGenerator;
use repo_chat_core::embedding::Embedder;
use repo_chat_core::generation::{GenerationRequest, Generator, PromptMessage};
use repo_chat_core::models::Role;
use repo_chat_core::ErrorKind;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_embedding_config(url: &str) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "openai".into(),
        model: Some("text-embedding-3-small".into()),
        dims: Some(3),
        url: Some(url.to_string()),
        max_retries: 2,
        retry_base_ms: 1,
        ..Default::default()
    }
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_openai_embeddings_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({"model": "text-embedding-3-small"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                {"index": 0, "embedding": [1.0, 0.0, 0.0]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let embedder =
        HttpEmbedder::new(&openai_embedding_config(&server.uri()), Some("sk-test".into())).unwrap();
    let out = embedder.embed(&texts(&["a", "b"])).await.unwrap();
    assert_eq!(out.dims, 3);
    assert_eq!(out.vectors[0], vec![1.0, 0.0, 0.0]);
    assert_eq!(out.vectors[1], vec![0.0, 1.0, 0.0]);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"index": 0, "embedding": [0.5, 0.5, 0.5]}]
        })))
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(&openai_embedding_config(&server.uri()), None).unwrap();
    let out = embedder.embed(&texts(&["a"])).await.unwrap();
    assert_eq!(out.vectors.len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(&openai_embedding_config(&server.uri()), None).unwrap();
    let err = embedder.embed(&texts(&["a"])).await.unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
    assert!(err.to_string().contains("400"));
}

#[tokio::test]
async fn test_server_errors_exhaust_to_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(&openai_embedding_config(&server.uri()), None).unwrap();
    let err = embedder.embed(&texts(&["a"])).await.unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::TransientRemote);
    assert!(ErrorKind::of(&err).is_retryable());
}

#[tokio::test]
async fn test_wrong_vector_count_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[0.1, 0.2, 0.3]]
        })))
        .mount(&server)
        .await;

    let config = EmbeddingConfig {
        provider: "ollama".into(),
        ..openai_embedding_config(&server.uri())
    };
    let embedder = HttpEmbedder::new(&config, None).unwrap();
    assert!(embedder.embed(&texts(&["a", "b"])).await.is_err());
}

#[tokio::test]
async fn test_oversized_batch_rejected_before_sending() {
    let server = MockServer::start().await;
    let config = EmbeddingConfig {
        batch_size: 2,
        ..openai_embedding_config(&server.uri())
    };
    let embedder = HttpEmbedder::new(&config, None).unwrap();

    let err = embedder.embed(&texts(&["a", "b", "c"])).await.unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::Validation);
    assert!(server.received_requests().await.unwrap().is_empty());
}

fn request() -> GenerationRequest {
    GenerationRequest {
        messages: vec![
            PromptMessage::new(Role::System, "answer from context"),
            PromptMessage::new(Role::User, "what does main do?"),
        ],
        temperature: None,
    }
}

#[tokio::test]
async fn test_openai_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "It starts the server."}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = GenerationConfig {
        provider: "openai".into(),
        model: Some("gpt-4o-mini".into()),
        url: Some(server.uri()),
        retry_base_ms: 1,
        ..Default::default()
    };
    let generator = HttpGenerator::new(&config, Some("sk-test".into())).unwrap();
    assert_eq!(generator.generate(&request()).await.unwrap(), "It starts the server.");
}

#[tokio::test]
async fn test_ollama_chat_missing_content_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})))
        .mount(&server)
        .await;

    let config = GenerationConfig {
        provider: "ollama".into(),
        model: Some("llama3".into()),
        url: Some(server.uri()),
        retry_base_ms: 1,
        ..Default::default()
    };
    let generator = HttpGenerator::new(&config, None).unwrap();
    let err = generator.generate(&request()).await.unwrap_err();
    assert!(err.to_string().contains("missing message content"));
}
