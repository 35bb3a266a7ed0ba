use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const UNREACHABLE_HINT: &str = "Error: Could not connect to Ollama. Is 'ollama serve' running?";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference runtime unreachable: {0}")]
    Unreachable(String),
    #[error("{0}")]
    Upstream(String),
}

impl InferenceError {
    /// The in-stream chunk shown to the user when an exchange fails.
    pub fn user_chunk(&self) -> String {
        match self {
            Self::Unreachable(_) => UNREACHABLE_HINT.to_string(),
            Self::Upstream(msg) => format!("Error: {}", msg),
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unreachable(err.to_string())
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, InferenceError>> + Send>>;

#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, InferenceError>;

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream, InferenceError>;
}

pub struct OllamaClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn list(&self) -> Result<Vec<String>, InferenceError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream, InferenceError> {
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&ChatRequest {
                model,
                messages,
                stream: true,
            })
            .send()
            .await?
            .error_for_status()?;

        let (tx, rx) = mpsc::channel::<Result<String, InferenceError>>(32);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut buf = String::new();
            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        let _ = tx.send(Err(InferenceError::from(err))).await;
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                // The chat endpoint streams one JSON object per line.
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }

                    let parsed: ChatChunk = match serde_json::from_str(&line) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            let _ = tx
                                .send(Err(InferenceError::Upstream(format!(
                                    "malformed chunk: {}",
                                    err
                                ))))
                                .await;
                            return;
                        }
                    };

                    if let Some(err) = parsed.error {
                        let _ = tx.send(Err(InferenceError::Upstream(err))).await;
                        return;
                    }
                    if let Some(message) = parsed.message
                        && !message.content.is_empty()
                        && tx.send(Ok(message.content)).await.is_err()
                    {
                        return;
                    }
                    if parsed.done {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use futures_util::stream;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum ScriptedEnd {
        Done,
        Unreachable,
        Upstream(String),
    }

    #[derive(Debug, Clone)]
    pub struct Script {
        pub chunks: Vec<String>,
        pub end: ScriptedEnd,
    }

    impl Script {
        pub fn chunks<I: IntoIterator<Item = S>, S: Into<String>>(chunks: I) -> Self {
            Self {
                chunks: chunks.into_iter().map(Into::into).collect(),
                end: ScriptedEnd::Done,
            }
        }

        pub fn unreachable() -> Self {
            Self {
                chunks: Vec::new(),
                end: ScriptedEnd::Unreachable,
            }
        }

        pub fn failing_after<I: IntoIterator<Item = S>, S: Into<String>>(
            chunks: I,
            message: &str,
        ) -> Self {
            Self {
                chunks: chunks.into_iter().map(Into::into).collect(),
                end: ScriptedEnd::Upstream(message.to_string()),
            }
        }
    }

    /// Plays back canned responses per model, recording every chat call.
    pub struct ScriptedClient {
        installed: Vec<String>,
        scripts: Mutex<HashMap<String, VecDeque<Script>>>,
        pub calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
        list_fails: bool,
    }

    impl ScriptedClient {
        pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(installed: I) -> Self {
            Self {
                installed: installed.into_iter().map(Into::into).collect(),
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                list_fails: false,
            }
        }

        pub fn with_unavailable_listing() -> Self {
            let mut client = Self::new(Vec::<String>::new());
            client.list_fails = true;
            client
        }

        pub fn script(self, model: &str, script: Script) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(model.to_string())
                .or_default()
                .push_back(script);
            self
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn list(&self) -> Result<Vec<String>, InferenceError> {
            if self.list_fails {
                return Err(InferenceError::Unreachable("connection refused".into()));
            }
            Ok(self.installed.clone())
        }

        async fn chat(
            &self,
            model: &str,
            messages: &[ChatMessage],
        ) -> Result<ChunkStream, InferenceError> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), messages.to_vec()));

            let script = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(model)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| panic!("no script left for model {}", model));

            // An unreachable runtime fails at connect time, before any
            // chunk can arrive.
            if script.chunks.is_empty() && matches!(script.end, ScriptedEnd::Unreachable) {
                return Err(InferenceError::Unreachable("connection refused".into()));
            }

            let mut items: Vec<Result<String, InferenceError>> =
                script.chunks.into_iter().map(Ok).collect();
            match script.end {
                ScriptedEnd::Done => {}
                ScriptedEnd::Unreachable => {
                    items.push(Err(InferenceError::Unreachable("connection refused".into())));
                }
                ScriptedEnd::Upstream(msg) => {
                    items.push(Err(InferenceError::Upstream(msg)));
                }
            }

            Ok(Box::pin(stream::iter(items)))
        }
    }
}
