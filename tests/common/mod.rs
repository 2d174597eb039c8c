#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const DIMS: usize = 16;

/// Deterministic bag-of-words embedding: each lowercase token bumps one
/// bucket. Texts sharing words get a high cosine similarity.
pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let token = token.to_lowercase();
        let bucket = token
            .bytes()
            .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
        v[bucket as usize % DIMS] += 1.0;
    }
    v
}

/// Answers Ollama `/api/embed` requests with one [`bag_of_words`]
/// vector per input.
pub struct OllamaEmbeddings;

impl Respond for OllamaEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = match serde_json::from_slice(&request.body) {
            Ok(v) => v,
            Err(_) => return ResponseTemplate::new(400),
        };
        let inputs = body["input"].as_array().cloned().unwrap_or_default();
        let embeddings: Vec<Vec<f32>> = inputs
            .iter()
            .map(|t| bag_of_words(t.as_str().unwrap_or("")))
            .collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embeddings": embeddings }))
    }
}

/// [`OllamaEmbeddings`] answering only after `0`.
pub struct SlowEmbeddings(pub Duration);

impl Respond for SlowEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        OllamaEmbeddings.respond(request).set_delay(self.0)
    }
}

pub async fn mount_slow_embeddings(server: &MockServer, delay: Duration) {
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(SlowEmbeddings(delay))
        .mount(server)
        .await;
}

pub async fn mount_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(OllamaEmbeddings)
        .mount(server)
        .await;
}

pub async fn mount_chat_reply(server: &MockServer, reply: &str) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "test-chat",
            "message": { "role": "assistant", "content": reply },
            "done": true
        })))
        .mount(server)
        .await;
}

/// Number of embedding requests the server has seen.
pub async fn embed_calls(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/api/embed")
        .count()
}

/// A temp workspace with a small project checkout and a config file.
pub struct Workspace {
    pub root: PathBuf,
    pub project_root: PathBuf,
    pub config_path: PathBuf,
}

impl Workspace {
    /// `model_url` is the base URL of the embedding and generation server;
    /// `None` leaves both providers disabled.
    pub fn new(root: &Path, model_url: Option<&str>) -> Self {
        let project_root = root.join("checkout");
        fs::create_dir_all(project_root.join("src")).unwrap();
        fs::write(
            project_root.join("src/retry.rs"),
            "// retry policy with exponential backoff\n\
             pub fn backoff_delay(attempt: u32) -> u64 {\n    100 << attempt\n}\n",
        )
        .unwrap();
        fs::write(
            project_root.join("src/parser.rs"),
            "// parse toml configuration files\n\
             pub fn parse_config(text: &str) -> usize {\n    text.len()\n}\n",
        )
        .unwrap();
        fs::write(
            project_root.join("README.md"),
            "# demo\n\nA demo project for tests.\n",
        )
        .unwrap();

        let models = match model_url {
            Some(url) => format!(
                r#"
[embedding]
provider = "ollama"
model = "test-embed"
dims = {dims}
url = "{url}"
max_retries = 1
retry_base_ms = 1

[generation]
provider = "ollama"
model = "test-chat"
url = "{url}"
max_retries = 1
retry_base_ms = 1
"#,
                dims = DIMS,
                url = url
            ),
            None => String::new(),
        };

        let config = format!(
            r#"[db]
path = "{root}/data/meta.sqlite"

[retrieval]
top_k = 3
min_score = 0.3
{models}
[projects.demo]
root = "{project}"
include_globs = ["**/*.rs", "**/*.md"]
"#,
            root = root.display(),
            project = project_root.display(),
            models = models
        );

        fs::create_dir_all(root.join("config")).unwrap();
        let config_path = root.join("config/repochat.toml");
        fs::write(&config_path, config).unwrap();

        Self {
            root: root.to_path_buf(),
            project_root,
            config_path,
        }
    }

    /// Register another project over the same checkout.
    pub fn add_project(&self, id: &str) {
        let mut config = fs::read_to_string(&self.config_path).unwrap();
        config.push_str(&format!(
            "\n[projects.{}]\nroot = \"{}\"\ninclude_globs = [\"**/*.rs\", \"**/*.md\"]\n",
            id,
            self.project_root.display()
        ));
        fs::write(&self.config_path, config).unwrap();
    }

    pub fn config(&self) -> repo_chat::config::Config {
        repo_chat::config::load_config(&self.config_path).unwrap()
    }
}
