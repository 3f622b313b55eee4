//! Tokio interpreter around the session reducer.
//!
//! [`SessionDriver`] owns the capabilities and runs one listener task per
//! write session: the task feeds host messages, timer firings, and stop
//! signals through [`machine::step`] and performs the returned effects.
//! The manual record path reuses the same save pipeline without arming
//! any of the retry or timeout machinery.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use diarist_config::{DeviceProfile, ListenerConfig};
use diarist_extract::{DiaryFields, extract};
use diarist_host::{ChatHost, ChatMessage, Notice, NoticeSink};
use diarist_preset::{PresetCoordinator, PresetError, PresetSwapRecord};
use diarist_store::{DiaryEntry, EntryStore, StoreError};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::machine::{self, Effect, Event, Phase, Session};
use crate::prompt::{diary_prompt, expected_format_guidance};

/// Character a diary is filed under when neither the user nor the chat
/// names one.
pub const FALLBACK_CHARACTER: &str = "未知角色";

/// Failures surfaced by the session entry points.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The preset capability itself failed during start.  Raised on
    /// desktop only; mobile proceeds without the preset.
    #[error("预设切换失败")]
    Preset(#[source] PresetError),
    /// A chat capability call failed.
    #[error(transparent)]
    Chat(#[from] anyhow::Error),
    /// The manual record path found no AI reply in the message log.
    #[error("没有找到AI消息")]
    NoReplyToRecord,
    /// The manual record path could not persist the diary.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ── Driver ────────────────────────────────────────────────────────────────────

struct ActiveSession {
    generation: u64,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Shared {
    chat: Arc<dyn ChatHost>,
    store: Arc<EntryStore>,
    presets: Arc<PresetCoordinator>,
    notices: Arc<dyn NoticeSink>,
    listener: ListenerConfig,
    profile: DeviceProfile,
    active: Mutex<Option<ActiveSession>>,
    generations: AtomicU64,
}

/// Entry points for the diary write flow.
///
/// One listener session runs at a time; starting a new one stops the old
/// one first, the way re-triggering the write action does in the host UI.
pub struct SessionDriver {
    shared: Arc<Shared>,
}

impl SessionDriver {
    pub fn new(
        chat: Arc<dyn ChatHost>,
        store: Arc<EntryStore>,
        presets: Arc<PresetCoordinator>,
        notices: Arc<dyn NoticeSink>,
        listener: ListenerConfig,
        profile: DeviceProfile,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                chat,
                store,
                presets,
                notices,
                listener,
                profile,
                active: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Prepares the preset, sends the diary prompt, and arms the listener.
    ///
    /// Returns once the session is armed; saving happens on the spawned
    /// listener task when the reply arrives.  On desktop a failing preset
    /// capability aborts the start; every profile aborts when the chat
    /// capability cannot subscribe or send.
    pub async fn start_write(&self, custom_character: Option<String>) -> Result<(), SessionError> {
        self.stop().await;

        let generation = self.shared.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut task = ListenTask {
            shared: Arc::clone(&self.shared),
            session: Session::new(self.shared.listener.max_retries, self.shared.profile),
            feed: None,
            reply_deadline: Instant::now(),
            backoff_until: Instant::now(),
            stop_rx,
            generation,
            fault: None,
        };

        info!(generation, "starting diary write session");
        task.apply(Event::Start { custom_character }).await;
        if let Some(error) = task.fault.take() {
            if !matches!(task.session.phase, Phase::Idle | Phase::FailedTerminal) {
                task.apply(Event::Stop).await;
            }
            return Err(error);
        }

        let handle = tokio::spawn(task.run());
        *self.shared.active.lock().await = Some(ActiveSession {
            generation,
            stop: stop_tx,
            task: handle,
        });
        Ok(())
    }

    /// Stops the running session, restoring the preset swap.  Waits for
    /// the listener task to finish; safe to call when nothing is running.
    pub async fn stop(&self) {
        let Some(active) = self.shared.active.lock().await.take() else {
            return;
        };
        let _ = active.stop.send(true);
        if let Err(error) = active.task.await {
            warn!(%error, generation = active.generation, "listener task did not shut down cleanly");
        }
    }

    pub async fn is_listening(&self) -> bool {
        self.shared
            .active
            .lock()
            .await
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Manual record: parses the most recent AI reply from the message
    /// log and runs the save pipeline once.
    ///
    /// `Ok(None)` means no usable template was found; the user gets a
    /// notice showing the expected format.  No retry or timeout machinery
    /// is armed, and store failures surface directly.
    pub async fn record_latest(&self) -> Result<Option<DiaryEntry>, SessionError> {
        let log = self.shared.chat.recent_messages().await?;
        let Some(reply) = log.iter().rev().find(|message| message.is_assistant()) else {
            return Err(SessionError::NoReplyToRecord);
        };

        let Some(fields) = extract(&reply.text) else {
            debug!("manual record found no diary template in the latest reply");
            self.shared.notices.notify(Notice::warning(
                expected_format_guidance(self.shared.profile),
                "记录失败",
            ));
            return Ok(None);
        };

        let mut deletion_executed = false;
        match self
            .shared
            .save_and_clean(&fields, None, &mut deletion_executed)
            .await
        {
            Ok(entry) => Ok(Some(entry)),
            Err(error) => {
                self.shared
                    .notices
                    .notify(Notice::error(format!("处理日记失败: {error}"), "错误"));
                Err(SessionError::Store(error))
            }
        }
    }
}

impl Shared {
    /// Character the entry is filed under: the session override, else the
    /// chat's ambient character, else the fallback.
    async fn effective_character(&self, custom: Option<&str>) -> String {
        if let Some(name) = custom {
            let name = name.trim();
            if !name.is_empty() {
                return name.to_string();
            }
        }
        match self.chat.current_character_name().await {
            Ok(Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
            Ok(_) => FALLBACK_CHARACTER.to_string(),
            Err(error) => {
                warn!(%error, "could not read the current character, using the fallback");
                FALLBACK_CHARACTER.to_string()
            }
        }
    }

    /// The save pipeline both paths share: resolve the character, store
    /// the entry, then clean up the chat at most once per guard window.
    async fn save_and_clean(
        &self,
        fields: &DiaryFields,
        custom: Option<&str>,
        deletion_executed: &mut bool,
    ) -> Result<DiaryEntry, StoreError> {
        let character = self.effective_character(custom).await;
        let entry = self.store.create(fields, &character).await?;
        self.notices.notify(Notice::success(
            format!("日记\"{}\"已保存", entry.title),
            "保存成功",
        ));

        if self.listener.auto_delete_messages && !*deletion_executed {
            *deletion_executed = true;
            self.cleanup_chat().await;
        }
        Ok(entry)
    }

    /// Removes the prompt turn and the reply turn.  Failure downgrades
    /// to a partial-success notice; the saved diary stays saved.
    async fn cleanup_chat(&self) {
        tokio::time::sleep(self.listener.pre_deletion_delay()).await;
        match self.chat.recent_messages().await {
            Ok(log) if log.len() < 2 => {
                warn!(turns = log.len(), "chat too short to clean up, skipping");
                return;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "could not read the chat before cleanup");
                self.notices
                    .notify(Notice::warning("日记已保存，但删除聊天记录失败", "部分成功"));
                return;
            }
        }
        match self.chat.delete_recent_turns(2).await {
            Ok(()) => {
                self.notices
                    .notify(Notice::info("聊天记录已自动清理", "日记保存完成"));
            }
            Err(error) => {
                warn!(%error, "chat cleanup after save failed");
                self.notices
                    .notify(Notice::warning("日记已保存，但删除聊天记录失败", "部分成功"));
            }
        }
    }
}

// ── Listener task ─────────────────────────────────────────────────────────────

struct ListenTask {
    shared: Arc<Shared>,
    session: Session,
    feed: Option<mpsc::UnboundedReceiver<ChatMessage>>,
    reply_deadline: Instant,
    backoff_until: Instant,
    stop_rx: watch::Receiver<bool>,
    generation: u64,
    /// Capability failure to surface to the caller of `start_write`.
    fault: Option<SessionError>,
}

/// The next message, or never when the feed is down.
async fn recv_next(feed: &mut Option<mpsc::UnboundedReceiver<ChatMessage>>) -> Option<ChatMessage> {
    match feed {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

fn classify(message: &ChatMessage) -> Event {
    if !message.is_assistant() {
        debug!("skipping user or system message");
        return Event::MessageMissed;
    }
    match extract(&message.text) {
        Some(fields) => Event::MessageParsed(fields),
        None => {
            debug!("assistant message carries no diary template");
            Event::MessageMissed
        }
    }
}

impl ListenTask {
    async fn run(mut self) {
        loop {
            if let Some(error) = self.fault.take() {
                warn!(%error, generation = self.generation, "session fault, stopping");
                self.apply(Event::Stop).await;
            }
            match self.session.phase {
                Phase::Listening => {
                    tokio::select! {
                        maybe = recv_next(&mut self.feed) => match maybe {
                            Some(message) => {
                                let event = classify(&message);
                                self.apply(event).await;
                            }
                            None => {
                                warn!(generation = self.generation, "message feed closed by host");
                                self.apply(Event::Stop).await;
                            }
                        },
                        _ = tokio::time::sleep_until(self.reply_deadline) => {
                            self.apply(Event::TimeoutElapsed).await;
                        }
                        changed = self.stop_rx.changed() => {
                            if changed.is_err() || *self.stop_rx.borrow() {
                                self.apply(Event::Stop).await;
                            }
                        }
                    }
                }
                Phase::FailedRetryable => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(self.backoff_until) => {
                            self.apply(Event::BackoffElapsed).await;
                        }
                        changed = self.stop_rx.changed() => {
                            if changed.is_err() || *self.stop_rx.borrow() {
                                self.apply(Event::Stop).await;
                            }
                        }
                    }
                }
                Phase::Succeeded => self.apply(Event::Stop).await,
                Phase::Idle | Phase::Preparing | Phase::Processing | Phase::FailedTerminal => {
                    break;
                }
            }
        }

        debug!(generation = self.generation, "listener task finished");
        let mut active = self.shared.active.lock().await;
        if active
            .as_ref()
            .is_some_and(|current| current.generation == self.generation)
        {
            *active = None;
        }
    }

    /// Runs `event` and every effect and follow-up event it cascades into.
    async fn apply(&mut self, event: Event) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let (next, effects) = machine::step(self.session.clone(), event);
            self.session = next;
            for effect in effects {
                if let Some(follow_up) = self.run_effect(effect).await {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    async fn run_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::PreparePreset => Some(match self.shared.presets.prepare().await {
                Ok(record) => Event::PresetPrepared(record),
                Err(error) => {
                    warn!(%error, "preset preparation failed");
                    if self.session.profile == DeviceProfile::Desktop {
                        self.fault = Some(SessionError::Preset(error));
                    }
                    Event::PresetFailed
                }
            }),
            Effect::ArmListener => {
                match self.shared.chat.subscribe().await {
                    Ok(feed) => {
                        self.feed = Some(feed);
                        self.reply_deadline = Instant::now() + self.shared.listener.reply_timeout();
                    }
                    Err(error) => {
                        self.fault = Some(SessionError::Chat(error));
                    }
                }
                None
            }
            Effect::SendPrompt => {
                let ambient = match self.shared.chat.current_character_name().await {
                    Ok(name) => name,
                    Err(error) => {
                        debug!(%error, "could not read the ambient character for the prompt");
                        None
                    }
                };
                let prompt =
                    diary_prompt(self.session.custom_character.as_deref(), ambient.as_deref());
                if let Err(error) = self.shared.chat.send_generation_request(&prompt).await {
                    self.fault = Some(SessionError::Chat(error));
                }
                None
            }
            Effect::NotifyArmed => {
                let notice = match self.session.profile {
                    DeviceProfile::Desktop => {
                        Notice::success("已发送日记提示，等待AI回复后自动保存", "写日记已启动")
                    }
                    DeviceProfile::Mobile => {
                        Notice::info("移动端环境，请耐心等待AI回复完成", "写日记已启动")
                    }
                };
                self.shared.notices.notify(notice);
                None
            }
            Effect::Persist(fields) => Some(self.persist(&fields).await),
            Effect::ScheduleRetry => {
                // Messages arriving during the backoff are dropped, not
                // queued behind the re-arm.
                self.feed = None;
                self.backoff_until = Instant::now() + self.shared.listener.retry_backoff();
                None
            }
            Effect::NotifyRetrying => {
                self.shared.notices.notify(Notice::info(
                    format!(
                        "正在重试监听 ({}/{})",
                        self.session.retry_count, self.session.max_retries
                    ),
                    "日记监听",
                ));
                None
            }
            Effect::NotifyTimeout => {
                self.shared
                    .notices
                    .notify(Notice::warning("日记写作超时，请重新尝试", "超时提醒"));
                None
            }
            Effect::NotifyExhausted => {
                self.shared.notices.notify(Notice::error(
                    "处理失败次数过多，请使用手动记录功能",
                    "自动处理已停止",
                ));
                None
            }
            Effect::Teardown => {
                self.feed = None;
                let swap =
                    std::mem::replace(&mut self.session.preset_swap, PresetSwapRecord::unswapped());
                self.shared.presets.restore(&swap).await;
                None
            }
        }
    }

    async fn persist(&mut self, fields: &DiaryFields) -> Event {
        match self
            .shared
            .save_and_clean(
                fields,
                self.session.custom_character.as_deref(),
                &mut self.session.deletion_executed,
            )
            .await
        {
            Ok(entry) => {
                info!(id = %entry.id, title = %entry.title, "diary saved");
                Event::SaveSucceeded
            }
            Err(error @ StoreError::Validation { .. }) => {
                self.shared
                    .notices
                    .notify(Notice::error(format!("处理日记失败: {error}"), "错误"));
                Event::SaveFailed { retryable: false }
            }
            Err(error) => {
                warn!(%error, "diary save failed");
                Event::SaveFailed { retryable: true }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
