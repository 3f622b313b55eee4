use std::collections::VecDeque;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::message::ChatMessage;

/// Chat-side capabilities the host must supply.  Injected once at
/// construction; a missing capability is a startup error, not something to
/// probe for at every call site.
#[async_trait]
pub trait ChatHost: Send + Sync {
    /// Start receiving every new chat turn, oldest first.  Dropping the
    /// receiver is the unsubscribe.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ChatMessage>>;

    /// Post `prompt` as the user and ask the host to generate a reply.
    async fn send_generation_request(&self, prompt: &str) -> Result<()>;

    /// Remove the most recent `n` turns from the chat log.
    async fn delete_recent_turns(&self, n: usize) -> Result<()>;

    /// Name of the character the chat is currently focused on.
    async fn current_character_name(&self) -> Result<Option<String>>;

    /// The full message log, oldest first.
    async fn recent_messages(&self) -> Result<Vec<ChatMessage>>;
}

// ── Scripted adapter ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ChatState {
    transcript: Vec<ChatMessage>,
    queued_replies: VecDeque<String>,
    subscribers: Vec<mpsc::UnboundedSender<ChatMessage>>,
    sent_prompts: Vec<String>,
    delete_calls: Vec<usize>,
    character: Option<String>,
}

impl ChatState {
    fn deliver(&mut self, message: ChatMessage) {
        self.transcript.push(message.clone());
        self.subscribers.retain(|tx| tx.send(message.clone()).is_ok());
    }
}

/// In-process [`ChatHost`] that replays a scripted conversation.
///
/// The CLI `record` command loads a transcript file into one of these; tests
/// queue replies ahead of time and watch which prompts and deletions the
/// code under test issued.
#[derive(Debug, Default)]
pub struct ScriptedChat {
    state: Mutex<ChatState>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transcript(transcript: Vec<ChatMessage>) -> Self {
        Self {
            state: Mutex::new(ChatState {
                transcript,
                ..ChatState::default()
            }),
        }
    }

    pub async fn set_character(&self, name: impl Into<String>) {
        self.state.lock().await.character = Some(name.into());
    }

    /// Queue the assistant reply the next generation request produces.
    pub async fn queue_reply(&self, text: impl Into<String>) {
        self.state.lock().await.queued_replies.push_back(text.into());
    }

    /// Append a turn to the transcript and fan it out to subscribers.
    pub async fn push(&self, message: ChatMessage) {
        self.state.lock().await.deliver(message);
    }

    pub async fn sent_prompts(&self) -> Vec<String> {
        self.state.lock().await.sent_prompts.clone()
    }

    pub async fn delete_calls(&self) -> Vec<usize> {
        self.state.lock().await.delete_calls.clone()
    }

    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.state.lock().await.transcript.clone()
    }
}

#[async_trait]
impl ChatHost for ScriptedChat {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ChatMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.subscribers.push(tx);
        Ok(rx)
    }

    async fn send_generation_request(&self, prompt: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sent_prompts.push(prompt.to_string());
        state.deliver(ChatMessage::user(prompt));
        if let Some(reply) = state.queued_replies.pop_front() {
            state.deliver(ChatMessage::assistant(reply));
        }
        Ok(())
    }

    async fn delete_recent_turns(&self, n: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state.delete_calls.push(n);
        if state.transcript.len() < n {
            bail!(
                "chat has {} turns, cannot delete {n}",
                state.transcript.len()
            );
        }
        let keep = state.transcript.len() - n;
        state.transcript.truncate(keep);
        Ok(())
    }

    async fn current_character_name(&self) -> Result<Option<String>> {
        Ok(self.state.lock().await.character.clone())
    }

    async fn recent_messages(&self) -> Result<Vec<ChatMessage>> {
        Ok(self.state.lock().await.transcript.clone())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
