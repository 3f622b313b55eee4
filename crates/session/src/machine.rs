//! Write-session state machine as a pure reducer.
//!
//! All control flow for one write session lives in [`step`]: given the
//! current [`Session`] value and an [`Event`], it returns the next value
//! plus the [`Effect`]s the caller must run.  Nothing here touches the
//! host, timers, or I/O, so every transition is testable as a plain
//! function call; the tokio side of the story is
//! [`driver`](crate::driver).

use diarist_config::DeviceProfile;
use diarist_extract::DiaryFields;
use diarist_preset::PresetSwapRecord;

// ── Session value ─────────────────────────────────────────────────────────────

/// Where a session currently stands.
///
/// | Phase             | Meaning                                                |
/// |-------------------|--------------------------------------------------------|
/// | `Idle`            | No session running; only `Start` does anything.        |
/// | `Preparing`       | Swapping in the diary preset.                          |
/// | `Listening`       | Subscribed to the feed, waiting for a qualifying reply.|
/// | `Processing`      | A reply parsed; the save pipeline is running.          |
/// | `Succeeded`       | Saved and torn down; settles back to `Idle`.           |
/// | `FailedRetryable` | Save failed, backoff running before the next attempt.  |
/// | `FailedTerminal`  | Gave up; sticky until the user starts a new session.   |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing,
    Listening,
    Processing,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

/// One write-or-record attempt, from start to teardown.
///
/// Two fields are shared with the effect interpreter: `deletion_executed`
/// is set by the interpreter when it runs the chat cleanup (and reset here
/// when a retry re-opens the window), and `preset_swap` is taken by the
/// interpreter when it runs `Teardown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub phase: Phase,
    pub retry_count: u32,
    pub max_retries: u32,
    pub profile: DeviceProfile,
    /// Character the user picked over the chat's ambient one, if any.
    pub custom_character: Option<String>,
    /// At most one chat cleanup per session, set before the deletion runs.
    pub deletion_executed: bool,
    /// At most one terminal warning per session.
    pub warning_shown: bool,
    pub preset_swap: PresetSwapRecord,
}

impl Session {
    pub fn new(max_retries: u32, profile: DeviceProfile) -> Self {
        Self {
            phase: Phase::Idle,
            retry_count: 0,
            max_retries,
            profile,
            custom_character: None,
            deletion_executed: false,
            warning_shown: false,
            preset_swap: PresetSwapRecord::unswapped(),
        }
    }
}

// ── Events and effects ────────────────────────────────────────────────────────

/// Everything that can happen to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// User started a write session.
    Start { custom_character: Option<String> },
    /// Preset preparation finished, swapped or not.
    PresetPrepared(PresetSwapRecord),
    /// The preset capability itself failed.  Desktop aborts; mobile
    /// proceeds without the preset.
    PresetFailed,
    /// A qualifying reply carried a complete diary template.
    MessageParsed(DiaryFields),
    /// A feed message without a usable template; ignored while listening.
    MessageMissed,
    /// The save pipeline stored the diary.
    SaveSucceeded,
    /// The save pipeline failed.  Only infrastructure failures are
    /// retryable; a rejected diary never consumes the retry budget.
    SaveFailed { retryable: bool },
    /// No qualifying reply arrived inside the reply window.
    TimeoutElapsed,
    /// The retry backoff ran out.
    BackoffElapsed,
    /// User stopped the session, or the driver is shutting it down.
    Stop,
}

/// Work the reducer asks the driver to perform.
///
/// Save-pipeline notices (saved, cleanup, rejection) are emitted by the
/// interpreter itself while running [`Persist`](Effect::Persist), since
/// their content comes from the pipeline outcome rather than from session
/// state.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Swap in the diary preset.
    PreparePreset,
    /// Subscribe to the message feed and arm the reply window.
    ArmListener,
    /// Send the diary generation prompt into the chat.
    SendPrompt,
    /// Tell the user the session is armed.
    NotifyArmed,
    /// Run the save pipeline for these fields.
    Persist(DiaryFields),
    /// Drop the feed and start the retry backoff.
    ScheduleRetry,
    /// Tell the user which retry just re-armed.
    NotifyRetrying,
    /// Tell the user the reply window closed.
    NotifyTimeout,
    /// Tell the user the retry budget ran out.
    NotifyExhausted,
    /// Drop the feed, cancel timers, restore the preset swap.
    Teardown,
}

// ── Reducer ───────────────────────────────────────────────────────────────────

/// Advance `session` by one event.
///
/// Out-of-phase events, including stale timer firings and anything
/// arriving after `FailedTerminal`, change nothing and produce no effects.
pub fn step(mut session: Session, event: Event) -> (Session, Vec<Effect>) {
    let effects = match (session.phase, event) {
        // A start is accepted from any settled phase and resets every
        // per-session counter and guard.
        (Phase::Idle | Phase::Succeeded | Phase::FailedTerminal, Event::Start { custom_character }) => {
            session = Session {
                phase: Phase::Preparing,
                custom_character,
                ..Session::new(session.max_retries, session.profile)
            };
            vec![Effect::PreparePreset]
        }

        (Phase::Preparing, Event::PresetPrepared(record)) => {
            session.phase = Phase::Listening;
            session.preset_swap = record;
            vec![Effect::ArmListener, Effect::SendPrompt, Effect::NotifyArmed]
        }
        (Phase::Preparing, Event::PresetFailed) => match session.profile {
            DeviceProfile::Desktop => {
                session.phase = Phase::FailedTerminal;
                vec![Effect::Teardown]
            }
            DeviceProfile::Mobile => {
                session.phase = Phase::Listening;
                vec![Effect::ArmListener, Effect::SendPrompt, Effect::NotifyArmed]
            }
        },

        (Phase::Listening, Event::MessageParsed(fields)) => {
            session.phase = Phase::Processing;
            vec![Effect::Persist(fields)]
        }
        (Phase::Listening, Event::MessageMissed) => vec![],
        (Phase::Listening, Event::TimeoutElapsed) => {
            session.phase = Phase::FailedTerminal;
            let mut effects = Vec::new();
            if !session.warning_shown {
                session.warning_shown = true;
                effects.push(Effect::NotifyTimeout);
            }
            effects.push(Effect::Teardown);
            effects
        }

        (Phase::Processing, Event::SaveSucceeded) => {
            session.phase = Phase::Succeeded;
            vec![Effect::Teardown]
        }
        // A rejected diary goes back to listening: retrying the same
        // reply cannot fix it, but a regenerated reply still can, and the
        // reply window keeps running.
        (Phase::Processing, Event::SaveFailed { retryable: false }) => {
            session.phase = Phase::Listening;
            vec![]
        }
        (Phase::Processing, Event::SaveFailed { retryable: true }) => {
            if session.retry_count < session.max_retries {
                session.retry_count += 1;
                session.deletion_executed = false;
                session.phase = Phase::FailedRetryable;
                vec![Effect::ScheduleRetry]
            } else {
                session.phase = Phase::FailedTerminal;
                let mut effects = Vec::new();
                if !session.warning_shown {
                    session.warning_shown = true;
                    effects.push(Effect::NotifyExhausted);
                }
                effects.push(Effect::Teardown);
                effects
            }
        }

        // The retry re-arms and re-sends, but never re-prepares the
        // preset: the swap from session start still stands.
        (Phase::FailedRetryable, Event::BackoffElapsed) => {
            session.phase = Phase::Listening;
            vec![Effect::ArmListener, Effect::SendPrompt, Effect::NotifyRetrying]
        }

        (
            Phase::Preparing | Phase::Listening | Phase::Processing | Phase::FailedRetryable,
            Event::Stop,
        ) => {
            session.phase = Phase::Idle;
            vec![Effect::Teardown]
        }
        // A finished session already tore itself down.
        (Phase::Succeeded, Event::Stop) => {
            session.phase = Phase::Idle;
            vec![]
        }

        _ => vec![],
    };
    (session, effects)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> DiaryFields {
        DiaryFields {
            title: "海边的一天".to_string(),
            timestamp: "2024年5月1日".to_string(),
            body: "今天很开心".to_string(),
        }
    }

    fn session(profile: DeviceProfile) -> Session {
        Session::new(3, profile)
    }

    fn listening(profile: DeviceProfile) -> Session {
        let (session, _) = step(
            session(profile),
            Event::Start { custom_character: None },
        );
        let (session, _) = step(session, Event::PresetPrepared(PresetSwapRecord::unswapped()));
        assert_eq!(session.phase, Phase::Listening);
        session
    }

    fn processing(profile: DeviceProfile) -> Session {
        let (session, _) = step(listening(profile), Event::MessageParsed(fields()));
        assert_eq!(session.phase, Phase::Processing);
        session
    }

    // ── Start ──────────────────────────────────────────────────────────────

    #[test]
    fn start_from_idle_prepares() {
        let (session, effects) = step(
            session(DeviceProfile::Desktop),
            Event::Start {
                custom_character: Some("小雨".to_string()),
            },
        );
        assert_eq!(session.phase, Phase::Preparing);
        assert_eq!(session.custom_character.as_deref(), Some("小雨"));
        assert_eq!(effects, vec![Effect::PreparePreset]);
    }

    #[test]
    fn start_resets_a_finished_session() {
        let mut worn = session(DeviceProfile::Desktop);
        worn.phase = Phase::FailedTerminal;
        worn.retry_count = 3;
        worn.warning_shown = true;
        worn.deletion_executed = true;
        worn.custom_character = Some("旧角色".to_string());

        let (fresh, effects) = step(worn, Event::Start { custom_character: None });
        assert_eq!(fresh.phase, Phase::Preparing);
        assert_eq!(fresh.retry_count, 0);
        assert!(!fresh.warning_shown);
        assert!(!fresh.deletion_executed);
        assert_eq!(fresh.custom_character, None);
        assert_eq!(effects, vec![Effect::PreparePreset]);
    }

    // ── Preset outcomes ────────────────────────────────────────────────────

    #[test]
    fn prepared_arms_sends_and_notifies() {
        let (session, _) = step(
            session(DeviceProfile::Desktop),
            Event::Start { custom_character: None },
        );
        let swap = PresetSwapRecord {
            switched: true,
            previous: Some("默认".to_string()),
        };
        let (session, effects) = step(session, Event::PresetPrepared(swap.clone()));
        assert_eq!(session.phase, Phase::Listening);
        assert_eq!(session.preset_swap, swap);
        assert_eq!(
            effects,
            vec![Effect::ArmListener, Effect::SendPrompt, Effect::NotifyArmed]
        );
    }

    #[test]
    fn desktop_preset_failure_is_terminal() {
        let (session, _) = step(
            session(DeviceProfile::Desktop),
            Event::Start { custom_character: None },
        );
        let (session, effects) = step(session, Event::PresetFailed);
        assert_eq!(session.phase, Phase::FailedTerminal);
        assert_eq!(effects, vec![Effect::Teardown]);
    }

    #[test]
    fn mobile_preset_failure_proceeds_unswapped() {
        let (session, _) = step(
            session(DeviceProfile::Mobile),
            Event::Start { custom_character: None },
        );
        let (session, effects) = step(session, Event::PresetFailed);
        assert_eq!(session.phase, Phase::Listening);
        assert_eq!(session.preset_swap, PresetSwapRecord::unswapped());
        assert_eq!(
            effects,
            vec![Effect::ArmListener, Effect::SendPrompt, Effect::NotifyArmed]
        );
    }

    // ── Listening ──────────────────────────────────────────────────────────

    #[test]
    fn parsed_message_starts_processing() {
        let (session, effects) = step(
            listening(DeviceProfile::Desktop),
            Event::MessageParsed(fields()),
        );
        assert_eq!(session.phase, Phase::Processing);
        assert_eq!(effects, vec![Effect::Persist(fields())]);
    }

    #[test]
    fn missed_message_keeps_listening() {
        let (session, effects) = step(listening(DeviceProfile::Desktop), Event::MessageMissed);
        assert_eq!(session.phase, Phase::Listening);
        assert!(effects.is_empty());
    }

    #[test]
    fn timeout_is_terminal_with_one_warning() {
        let (session, effects) = step(listening(DeviceProfile::Desktop), Event::TimeoutElapsed);
        assert_eq!(session.phase, Phase::FailedTerminal);
        assert!(session.warning_shown);
        assert_eq!(effects, vec![Effect::NotifyTimeout, Effect::Teardown]);

        let (session, effects) = step(session, Event::TimeoutElapsed);
        assert_eq!(session.phase, Phase::FailedTerminal);
        assert!(effects.is_empty());
    }

    // ── Processing outcomes ────────────────────────────────────────────────

    #[test]
    fn save_success_succeeds_then_settles_idle() {
        let (session, effects) = step(processing(DeviceProfile::Desktop), Event::SaveSucceeded);
        assert_eq!(session.phase, Phase::Succeeded);
        assert_eq!(effects, vec![Effect::Teardown]);

        let (session, effects) = step(session, Event::Stop);
        assert_eq!(session.phase, Phase::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn save_failure_schedules_retry_and_resets_deletion_guard() {
        let mut session = processing(DeviceProfile::Desktop);
        session.deletion_executed = true;

        let (session, effects) = step(session, Event::SaveFailed { retryable: true });
        assert_eq!(session.phase, Phase::FailedRetryable);
        assert_eq!(session.retry_count, 1);
        assert!(!session.deletion_executed);
        assert_eq!(effects, vec![Effect::ScheduleRetry]);
    }

    #[test]
    fn rejected_save_returns_to_listening_without_spending_retries() {
        let (session, effects) = step(
            processing(DeviceProfile::Desktop),
            Event::SaveFailed { retryable: false },
        );
        assert_eq!(session.phase, Phase::Listening);
        assert_eq!(session.retry_count, 0);
        assert!(effects.is_empty());
    }

    #[test]
    fn backoff_rearms_without_preparing_the_preset_again() {
        let (session, _) = step(
            processing(DeviceProfile::Desktop),
            Event::SaveFailed { retryable: true },
        );
        let (session, effects) = step(session, Event::BackoffElapsed);
        assert_eq!(session.phase, Phase::Listening);
        assert_eq!(
            effects,
            vec![Effect::ArmListener, Effect::SendPrompt, Effect::NotifyRetrying]
        );
    }

    #[test]
    fn exhausted_budget_is_terminal_with_one_warning() {
        let mut session = processing(DeviceProfile::Desktop);
        session.retry_count = session.max_retries;

        let (session, effects) = step(session, Event::SaveFailed { retryable: true });
        assert_eq!(session.phase, Phase::FailedTerminal);
        assert!(session.warning_shown);
        assert_eq!(effects, vec![Effect::NotifyExhausted, Effect::Teardown]);

        let (session, effects) = step(session, Event::SaveFailed { retryable: true });
        assert_eq!(session.phase, Phase::FailedTerminal);
        assert!(effects.is_empty());
    }

    #[test]
    fn zero_max_retries_goes_terminal_on_first_failure() {
        let mut session = Session::new(0, DeviceProfile::Desktop);
        session.phase = Phase::Processing;

        let (session, effects) = step(session, Event::SaveFailed { retryable: true });
        assert_eq!(session.phase, Phase::FailedTerminal);
        assert_eq!(effects, vec![Effect::NotifyExhausted, Effect::Teardown]);
    }

    // ── Stop and absorption ────────────────────────────────────────────────

    #[test]
    fn stop_tears_down_from_any_live_phase() {
        for build in [listening, processing] {
            let (session, effects) = step(build(DeviceProfile::Desktop), Event::Stop);
            assert_eq!(session.phase, Phase::Idle);
            assert_eq!(effects, vec![Effect::Teardown]);
        }

        let (retrying, _) = step(
            processing(DeviceProfile::Desktop),
            Event::SaveFailed { retryable: true },
        );
        let (session, effects) = step(retrying, Event::Stop);
        assert_eq!(session.phase, Phase::Idle);
        assert_eq!(effects, vec![Effect::Teardown]);
    }

    #[test]
    fn stop_is_idempotent() {
        let (session, _) = step(listening(DeviceProfile::Desktop), Event::Stop);
        let (session, effects) = step(session, Event::Stop);
        assert_eq!(session.phase, Phase::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn terminal_phase_absorbs_messages() {
        let (terminal, _) = step(listening(DeviceProfile::Desktop), Event::TimeoutElapsed);

        for event in [
            Event::MessageParsed(fields()),
            Event::MessageMissed,
            Event::SaveFailed { retryable: true },
            Event::BackoffElapsed,
            Event::Stop,
        ] {
            let (session, effects) = step(terminal.clone(), event);
            assert_eq!(session.phase, Phase::FailedTerminal);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn out_of_phase_events_are_ignored() {
        let idle = session(DeviceProfile::Desktop);
        let (session_after, effects) = step(idle.clone(), Event::BackoffElapsed);
        assert_eq!(session_after, idle);
        assert!(effects.is_empty());

        let (session_after, effects) = step(
            idle.clone(),
            Event::PresetPrepared(PresetSwapRecord::unswapped()),
        );
        assert_eq!(session_after, idle);
        assert!(effects.is_empty());

        // A stale timeout during backoff must not kill the retry.
        let (retrying, _) = step(
            processing(DeviceProfile::Desktop),
            Event::SaveFailed { retryable: true },
        );
        let (session_after, effects) = step(retrying.clone(), Event::TimeoutElapsed);
        assert_eq!(session_after, retrying);
        assert!(effects.is_empty());
    }
}
