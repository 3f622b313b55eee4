//! The diary write session: a pure state machine plus the tokio driver
//! that runs it against the host capabilities.
//!
//! [`machine`] decides what happens (phases, retry budget, one-shot
//! warnings); [`driver`] makes it happen (timers, the message feed,
//! persistence, notices).  [`prompt`] renders the generation prompt and
//! the expected-format guidance both of them send to the user.

pub mod driver;
pub mod machine;
pub mod prompt;

pub use driver::{FALLBACK_CHARACTER, SessionDriver, SessionError};
pub use machine::{Effect, Event, Phase, Session, step};
pub use prompt::{diary_prompt, expected_format_guidance};
