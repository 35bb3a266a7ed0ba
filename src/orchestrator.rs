use crate::catalog::ModelCatalog;
use crate::ollama::{ChatMessage, InferenceClient, InferenceError};
use crate::prompt::Mode;
use crate::store::ConversationStore;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

const COUNCIL_SIZE: usize = 3;
const CHANNEL_CAPACITY: usize = 32;

/// One chat turn ready to execute: the conversation it belongs to, the
/// resolved model, and the composed message list.
#[derive(Debug, Clone)]
pub struct Turn {
    pub conversation_id: String,
    pub mode: Mode,
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Buffers the text that will become the persisted assistant message.
///
/// Exactly one assistant message is written per turn, whether the
/// stream ran to completion, failed upstream, or the client went away.
struct TurnRecorder {
    store: Arc<ConversationStore>,
    conversation_id: String,
    buffer: String,
}

impl TurnRecorder {
    fn new(store: Arc<ConversationStore>, conversation_id: String) -> Self {
        Self {
            store,
            conversation_id,
            buffer: String::new(),
        }
    }

    fn push(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Council synthesis starts from a clean slate: only synthesis
    /// output is persisted, not the per-model transcripts.
    fn reset(&mut self) {
        self.buffer.clear();
    }

    async fn finalize(self) {
        if let Err(err) = self
            .store
            .append_message(&self.conversation_id, &self.buffer, false)
            .await
        {
            error!(
                "Failed to persist assistant message for conversation {}: {}",
                self.conversation_id, err
            );
        }
    }
}

enum Interrupt {
    Upstream(InferenceError),
    Disconnected,
}

#[derive(Clone)]
pub struct ChatOrchestrator {
    client: Arc<dyn InferenceClient>,
    catalog: ModelCatalog,
    store: Arc<ConversationStore>,
}

impl ChatOrchestrator {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        catalog: ModelCatalog,
        store: Arc<ConversationStore>,
    ) -> Self {
        Self {
            client,
            catalog,
            store,
        }
    }

    /// Starts the streaming task for one turn and hands back the chunk
    /// receiver. The task persists the assistant message when it ends.
    pub fn run(&self, turn: Turn) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.drive(turn, tx).await;
        });
        rx
    }

    async fn drive(&self, turn: Turn, tx: mpsc::Sender<String>) {
        let mut recorder = TurnRecorder::new(self.store.clone(), turn.conversation_id.clone());

        let outcome = match turn.mode {
            Mode::Council => self.council(&turn, &tx, &mut recorder).await,
            _ => self
                .stream_exchange(&turn.model, &turn.messages, &tx, &mut recorder)
                .await
                .map(|_| ()),
        };

        match outcome {
            Ok(()) => {}
            Err(Interrupt::Upstream(err)) => {
                // The failure lands in the transcript, not behind an
                // HTTP error code: the response is already streaming.
                let text = err.user_chunk();
                recorder.push(&text);
                let _ = tx.send(text).await;
            }
            Err(Interrupt::Disconnected) => {
                debug!(
                    "Client went away mid-stream for conversation {}",
                    turn.conversation_id
                );
            }
        }

        recorder.finalize().await;
    }

    /// One streaming exchange. Chunks are forwarded in arrival order
    /// without re-buffering, recorded, and returned as the full text.
    async fn stream_exchange(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tx: &mpsc::Sender<String>,
        recorder: &mut TurnRecorder,
    ) -> Result<String, Interrupt> {
        let mut stream = self
            .client
            .chat(model, messages)
            .await
            .map_err(Interrupt::Upstream)?;

        let mut text = String::new();
        while let Some(item) = stream.next().await {
            let content = item.map_err(Interrupt::Upstream)?;
            text.push_str(&content);
            recorder.push(&content);
            tx.send(content)
                .await
                .map_err(|_| Interrupt::Disconnected)?;
        }
        Ok(text)
    }

    async fn emit(
        &self,
        tx: &mpsc::Sender<String>,
        recorder: &mut TurnRecorder,
        chunk: String,
    ) -> Result<(), Interrupt> {
        recorder.push(&chunk);
        tx.send(chunk).await.map_err(|_| Interrupt::Disconnected)
    }

    async fn council_members(&self, resolved: &str) -> Vec<String> {
        let installed = self.catalog.list_installed().await;
        if installed.is_empty() {
            vec![resolved.to_string()]
        } else {
            installed.into_iter().take(COUNCIL_SIZE).collect()
        }
    }

    /// Fan out to up to three installed models sequentially, then ask
    /// the resolved model to synthesize the labeled transcripts.
    async fn council(
        &self,
        turn: &Turn,
        tx: &mpsc::Sender<String>,
        recorder: &mut TurnRecorder,
    ) -> Result<(), Interrupt> {
        let members = self.council_members(&turn.model).await;
        if members.len() < 2 {
            self.stream_exchange(&turn.model, &turn.messages, tx, recorder)
                .await?;
            return Ok(());
        }

        self.emit(
            tx,
            recorder,
            format!("[Council Mode: Consulting {} models...]\n\n", members.len()),
        )
        .await?;

        let mut transcripts = Vec::with_capacity(members.len());
        for (i, member) in members.iter().enumerate() {
            let label = format!("Model {} ({}): ", i + 1, member);
            self.emit(tx, recorder, label.clone()).await?;
            let text = self
                .stream_exchange(member, &turn.messages, tx, recorder)
                .await?;
            transcripts.push(format!("{}{}", label, text));
            self.emit(tx, recorder, "\n\n".to_string()).await?;
        }

        self.emit(
            tx,
            recorder,
            "[Synthesizing council responses...]\n\n".to_string(),
        )
        .await?;

        recorder.reset();
        let synthesis = vec![ChatMessage::user(synthesis_prompt(&transcripts))];
        self.stream_exchange(&turn.model, &synthesis, tx, recorder)
            .await?;
        Ok(())
    }
}

fn synthesis_prompt(transcripts: &[String]) -> String {
    format!(
        "Based on these responses from different models:\n\n{}\n\nProvide a final synthesized answer that combines the best insights:",
        transcripts.join("\n")
    )
}
