// Single-slot, self-dismissing alerts
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// What a notice is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A new listing showed up close by
    Nearby,
    /// One of our own listings was picked up
    Collected,
    Info,
    Warning,
}

impl NoticeKind {
    pub fn emoji(&self) -> &'static str {
        match self {
            NoticeKind::Nearby => "📍",
            NoticeKind::Collected => "🎉",
            NoticeKind::Info => "ℹ",
            NoticeKind::Warning => "⚠",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: u64,
    pub message: String,
    pub kind: NoticeKind,
    pub shown_at: DateTime<Utc>,
}

/// Short sound played alongside a notice. Fire and forget.
pub trait AudioCue: Send + Sync {
    fn play(&self, kind: NoticeKind) -> std::io::Result<()>;
}

/// Shows at most one notice at a time
///
/// A new notice replaces the current one, there is no queue. Each notice
/// dismisses itself after `display_for` unless dismissed or replaced first.
/// The dispatcher is presentation only and never touches the registries.
pub struct NotificationDispatcher {
    visible: Arc<watch::Sender<Option<Notice>>>,
    next_id: AtomicU64,
    display_for: Duration,
    audio: Option<Arc<dyn AudioCue>>,
}

impl NotificationDispatcher {
    pub fn new(display_for: Duration) -> Self {
        let (visible, _) = watch::channel(None);
        Self {
            visible: Arc::new(visible),
            next_id: AtomicU64::new(0),
            display_for,
            audio: None,
        }
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioCue>) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Show a notice, replacing whatever is up. Returns the notice id.
    ///
    /// Auto-dismissal needs a tokio runtime; outside one the notice stays
    /// until replaced or dismissed.
    pub fn show(&self, message: impl Into<String>, kind: NoticeKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let notice = Notice {
            id,
            message: message.into(),
            kind,
            shown_at: Utc::now(),
        };

        info!("{} {}", kind.emoji(), notice.message);
        self.visible.send_replace(Some(notice));

        if let Some(audio) = &self.audio {
            if let Err(e) = audio.play(kind) {
                debug!("Audio cue failed: {}", e);
            }
        }

        self.schedule_dismissal(id);
        id
    }

    /// Close the current notice early. Returns false if nothing was showing.
    pub fn dismiss(&self) -> bool {
        self.visible.send_if_modified(|current| current.take().is_some())
    }

    pub fn current(&self) -> Option<Notice> {
        self.visible.borrow().clone()
    }

    /// Watch the visible notice. `None` means nothing is showing.
    pub fn subscribe(&self) -> watch::Receiver<Option<Notice>> {
        self.visible.subscribe()
    }

    fn schedule_dismissal(&self, id: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let visible = Arc::clone(&self.visible);
        let display_for = self.display_for;
        handle.spawn(async move {
            tokio::time::sleep(display_for).await;
            // Only clear if we're still the notice on screen
            visible.send_if_modified(|current| {
                if current.as_ref().map(|n| n.id) == Some(id) {
                    *current = None;
                    true
                } else {
                    false
                }
            });
        });
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
