use std::collections::HashSet;
use tracing::debug;
use wtd_core::{ContentItem, Mode, PostId, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoModeChosen,
    ModeActive,
    Suggesting,
    Exhausted,
}

/// Per-page anti-repeat memory for the suggestion card.
#[derive(Debug, Clone)]
pub struct SuggestionSession {
    mode: Option<Mode>,
    shown_ids: HashSet<PostId>,
    last_topic: Option<Topic>,
    current: Option<ContentItem>,
    state: SessionState,
}

impl Default for SuggestionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SuggestionSession {
    pub fn new() -> Self {
        Self {
            mode: None,
            shown_ids: HashSet::new(),
            last_topic: None,
            current: None,
            state: SessionState::NoModeChosen,
        }
    }

    /// Starts a fresh session for `mode`. Anti-repeat memory is discarded; the
    /// loaded pool is untouched.
    pub fn select_mode(&mut self, mode: Mode) {
        self.mode = Some(mode);
        self.shown_ids.clear();
        self.last_topic = None;
        self.current = None;
        self.state = SessionState::ModeActive;
        debug!("Session started in mode {}", mode);
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_topic(&self) -> Option<Topic> {
        self.last_topic
    }

    pub fn current(&self) -> Option<&ContentItem> {
        self.current.as_ref()
    }

    pub fn has_shown(&self, id: &str) -> bool {
        self.shown_ids.contains(id)
    }

    pub fn shown_count(&self) -> usize {
        self.shown_ids.len()
    }

    /// Suppresses `id` for the rest of this session without showing it.
    pub fn mark_shown(&mut self, id: &str) {
        self.shown_ids.insert(id.to_string());
    }

    pub(crate) fn record_pick(&mut self, item: ContentItem) {
        self.shown_ids.insert(item.id.clone());
        self.last_topic = Some(item.effective_topic());
        self.current = Some(item);
        self.state = SessionState::Suggesting;
    }

    pub(crate) fn record_exhausted(&mut self) {
        self.current = None;
        if self.mode.is_some() {
            self.state = SessionState::Exhausted;
        }
    }
}
