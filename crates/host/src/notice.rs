use std::sync::Mutex;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A toast-style notification surfaced to the user through the host UI.
///
/// `text` is the message body, `title` the short heading the host renders
/// above it.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    pub title: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, text: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            title: title.into(),
        }
    }

    pub fn info(text: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, text, title)
    }

    pub fn success(text: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, text, title)
    }

    pub fn warning(text: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, text, title)
    }

    pub fn error(text: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, text, title)
    }
}

/// Channel for user-facing notices.  The browser host shows toasts; headless
/// deployments forward to logging instead.
pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// [`NoticeSink`] that forwards every notice to the tracing pipeline.
#[derive(Debug, Default)]
pub struct TracingNotices;

impl NoticeSink for TracingNotices {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info | NoticeLevel::Success => {
                tracing::info!(title = %notice.title, "{}", notice.text);
            }
            NoticeLevel::Warning => {
                tracing::warn!(title = %notice.title, "{}", notice.text);
            }
            NoticeLevel::Error => {
                tracing::error!(title = %notice.title, "{}", notice.text);
            }
        }
    }
}

/// [`NoticeSink`] that buffers notices in memory for later inspection.
#[derive(Debug, Default)]
pub struct NoticeLog {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<Notice>> {
        self.notices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn recorded(&self) -> Vec<Notice> {
        self.entries().clone()
    }

    pub fn count_at(&self, level: NoticeLevel) -> usize {
        self.entries()
            .iter()
            .filter(|notice| notice.level == level)
            .count()
    }
}

impl NoticeSink for NoticeLog {
    fn notify(&self, notice: Notice) {
        self.entries().push(notice);
    }
}
