//! `GhMind` ties the classifier, preference store, selector and feedback
//! logger to the backend ports for one place page.
//!
//! Every user-level operation returns an [`Outcome`]; failures are turned into
//! status text here and never escape as errors.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use wtd_core::{
    AffinitySource, ContentFeed, ContentItem, Coordinates, CoreError, DistanceBand,
    DistancePreference, ErrorExt, FeedQuery, FeedbackAction, FeedbackSink, Mode, PlaceId,
    TimeBucket, UserId, VoteSink,
};

use crate::distance;
use crate::feedback::FeedbackLogger;
use crate::preferences::PreferenceStore;
use crate::selector::CandidateSelector;
use crate::session::{SessionState, SuggestionSession};

pub const PICK_A_MODE: &str = "Tell me how you feel to get a suggestion.";
pub const NO_MORE_SUGGESTIONS: &str = "No more suggestions yet. Add more posts or switch mode.";
pub const LOGIN_TO_VOTE: &str = "Please log in to vote.";
pub const WAITING_FOR_POSTS: &str = "No suggestion yet. Reload to try again.";
const HINT_SIGNED_IN: &str = "Learning from your Yes/No.";
const HINT_ANONYMOUS: &str = "Log in to personalize suggestions.";

/// The collaborators the engine needs, all behind trait objects.
#[derive(Clone)]
pub struct Ports {
    pub feed: Arc<dyn ContentFeed>,
    pub affinity: Arc<dyn AffinitySource>,
    pub feedback: Arc<dyn FeedbackSink>,
    pub votes: Arc<dyn VoteSink>,
    pub distance: Arc<dyn DistancePreference>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionCard {
    pub item: ContentItem,
    pub why: String,
    pub meta: String,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Nothing on the card: no mode chosen yet, or the first load for the
    /// chosen mode has not succeeded.
    Idle { message: String },
    Suggested(SuggestionCard),
    /// The pool has nothing left for this mode.
    Exhausted { message: String },
    /// Something failed; the message is ready to show.
    Unavailable { message: String },
}

impl Outcome {
    pub fn suggestion(&self) -> Option<&ContentItem> {
        match self {
            Outcome::Suggested(card) => Some(&card.item),
            _ => None,
        }
    }
}

/// Identifies one pool fetch. Only the most recent ticket may update the pool.
///
/// The pool belongs to the place, not to a mode, so a fetch that lands after
/// a mode switch is still applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    Applied { items: usize },
    /// A newer fetch was started; the result was discarded.
    Superseded,
    Failed { message: String },
}

pub struct GhMind {
    place_id: PlaceId,
    user_id: Option<UserId>,
    center: Option<Coordinates>,
    distance_band: DistanceBand,
    session: SuggestionSession,
    preferences: PreferenceStore,
    selector: CandidateSelector,
    logger: FeedbackLogger,
    ports: Ports,
    pool: Vec<ContentItem>,
    fetch_sequence: u64,
}

impl GhMind {
    pub fn new(place_id: impl Into<PlaceId>, ports: Ports, selector: CandidateSelector) -> Self {
        let place_id = place_id.into();
        let logger = FeedbackLogger::new(ports.feedback.clone(), place_id.clone());
        Self {
            place_id,
            user_id: None,
            center: None,
            distance_band: DistanceBand::default(),
            session: SuggestionSession::new(),
            preferences: PreferenceStore::new(),
            selector,
            logger,
            ports,
            pool: Vec::new(),
            fetch_sequence: 0,
        }
    }

    pub fn with_center(mut self, center: Option<Coordinates>) -> Self {
        self.center = center;
        self
    }

    pub fn session(&self) -> &SuggestionSession {
        &self.session
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn pool(&self) -> &[ContentItem] {
        &self.pool
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn distance_band(&self) -> DistanceBand {
        self.distance_band
    }

    /// Applies a sign-in, sign-out or account switch. Repeating the current
    /// identity changes nothing.
    pub async fn set_identity(&mut self, user_id: Option<UserId>) -> Outcome {
        if user_id == self.user_id {
            debug!("Identity unchanged; skipping re-initialization");
            return self.current_outcome();
        }

        info!(
            "Identity changed: {} -> {}",
            self.user_id.as_deref().unwrap_or("anonymous"),
            user_id.as_deref().unwrap_or("anonymous")
        );
        self.user_id = user_id;
        self.refresh_preferences().await;

        if let Err(message) = self.reload_pool().await {
            return Outcome::Unavailable { message };
        }
        if self.session.mode().is_some() {
            self.suggest_next().await
        } else {
            self.current_outcome()
        }
    }

    /// Waits for the next identity change and applies it.
    ///
    /// Returns `None` once the identity provider has gone away. Not cancel
    /// safe: inside `select!`, wait on `changed()` and call `set_identity`.
    pub async fn follow_identity(
        &mut self,
        identity: &mut watch::Receiver<Option<UserId>>,
    ) -> Option<Outcome> {
        identity.changed().await.ok()?;
        let user_id = identity.borrow_and_update().clone();
        Some(self.set_identity(user_id).await)
    }

    pub async fn select_mode(&mut self, mode: Mode) -> Outcome {
        info!("Mode selected: {}", mode);
        self.session.select_mode(mode);
        self.suggest_next().await
    }

    /// Handles a button press on the current suggestion.
    pub async fn respond(&mut self, action: FeedbackAction) -> Outcome {
        let Some(mode) = self.session.mode() else {
            return self.current_outcome();
        };
        let Some(current) = self.session.current().cloned() else {
            debug!("Ignoring {} with no active suggestion", action);
            return self.current_outcome();
        };

        match action {
            FeedbackAction::Shown => {
                warn!("'shown' is recorded by the engine, not by the user");
                self.current_outcome()
            }
            FeedbackAction::Yes | FeedbackAction::No | FeedbackAction::Skip => {
                self.log(action, Some(&current), mode).await;
                if action.is_preference_signal() {
                    self.refresh_preferences().await;
                }
                self.suggest_next().await
            }
            FeedbackAction::Upvote | FeedbackAction::Downvote => {
                let Some(user_id) = self.user_id.clone() else {
                    return Outcome::Unavailable {
                        message: LOGIN_TO_VOTE.to_string(),
                    };
                };

                self.session.mark_shown(&current.id);
                self.log(action, Some(&current), mode).await;

                let value = action.vote_value().unwrap_or_default();
                match self.ports.votes.cast(&user_id, &current.id, value).await {
                    Ok(()) => {
                        if let Err(message) = self.reload_pool().await {
                            warn!("Pool reload after vote failed: {}", message);
                        }
                    }
                    Err(e) => {
                        e.log_error();
                    }
                }
                // The vote event is logged either way, so weights may move.
                self.refresh_preferences().await;
                self.suggest_next().await
            }
        }
    }

    /// Persists a new distance preference and reloads the pool with it.
    pub async fn set_distance_band(&mut self, band: DistanceBand) -> Outcome {
        if let Err(e) = self.ports.distance.store(band).await {
            e.log_warn();
        }
        self.distance_band = band;
        match self.reload_pool().await {
            Ok(()) => self.pool_refreshed().await,
            Err(message) => Outcome::Unavailable { message },
        }
    }

    /// Re-fetches the pool (e.g. after a post was created elsewhere).
    pub async fn reload(&mut self) -> Outcome {
        match self.reload_pool().await {
            Ok(()) => self.pool_refreshed().await,
            Err(message) => Outcome::Unavailable { message },
        }
    }

    /// Starts a pool fetch; pass the ticket back to [`GhMind::complete_fetch`].
    pub fn begin_fetch(&mut self) -> (FetchTicket, FeedQuery) {
        self.fetch_sequence += 1;
        let ticket = FetchTicket {
            sequence: self.fetch_sequence,
        };
        let query =
            FeedQuery::for_place(self.place_id.clone()).within(self.center, self.distance_band);
        (ticket, query)
    }

    /// Stores a fetched pool unless a newer fetch has been started since.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<ContentItem>, CoreError>,
    ) -> FetchStatus {
        if ticket.sequence != self.fetch_sequence {
            debug!(
                "Discarding fetch {} (latest is {})",
                ticket.sequence, self.fetch_sequence
            );
            return FetchStatus::Superseded;
        }

        match result {
            Ok(items) => {
                self.pool = distance::annotate_and_filter(items, self.center, self.distance_band);
                FetchStatus::Applied {
                    items: self.pool.len(),
                }
            }
            Err(e) => {
                e.log_error();
                FetchStatus::Failed {
                    message: format!("Could not load posts: {}", e.user_friendly_message()),
                }
            }
        }
    }

    /// Gives an exhausted or fresh session another chance after the pool changed.
    pub async fn pool_refreshed(&mut self) -> Outcome {
        match self.session.state() {
            SessionState::ModeActive | SessionState::Exhausted => self.suggest_next().await,
            _ => self.current_outcome(),
        }
    }

    pub fn current_outcome(&self) -> Outcome {
        match (self.session.state(), self.session.current()) {
            (SessionState::NoModeChosen, _) => Outcome::Idle {
                message: PICK_A_MODE.to_string(),
            },
            (SessionState::Suggesting, Some(item)) => Outcome::Suggested(self.card(item)),
            (SessionState::Exhausted, _) => Outcome::Exhausted {
                message: NO_MORE_SUGGESTIONS.to_string(),
            },
            (SessionState::ModeActive, _) | (SessionState::Suggesting, None) => Outcome::Idle {
                message: WAITING_FOR_POSTS.to_string(),
            },
        }
    }

    async fn suggest_next(&mut self) -> Outcome {
        let Some(mode) = self.session.mode() else {
            return self.current_outcome();
        };

        if self.pool.is_empty() {
            if let Err(message) = self.reload_pool().await {
                return Outcome::Unavailable { message };
            }
        }

        let picked = self.selector.pick_next(
            &self.pool,
            mode,
            &mut self.session,
            &self.preferences,
        );
        match picked {
            Some(item) => {
                self.log(FeedbackAction::Shown, Some(&item), mode).await;
                Outcome::Suggested(self.card(&item))
            }
            None => Outcome::Exhausted {
                message: NO_MORE_SUGGESTIONS.to_string(),
            },
        }
    }

    /// Reads the distance preference, fetches, and applies the result. A
    /// failure leaves the previous pool in place.
    async fn reload_pool(&mut self) -> Result<(), String> {
        match self.ports.distance.load().await {
            Ok(band) => self.distance_band = band,
            Err(e) => {
                e.log_warn();
            }
        }

        let (ticket, query) = self.begin_fetch();
        let result = self.ports.feed.fetch(&query).await;
        match self.complete_fetch(ticket, result) {
            FetchStatus::Applied { items } => {
                debug!("Pool holds {} posts", items);
                Ok(())
            }
            FetchStatus::Superseded => Ok(()),
            FetchStatus::Failed { message } if self.pool.is_empty() => Err(message),
            FetchStatus::Failed { message } => {
                warn!("{}; showing previously loaded posts", message);
                Ok(())
            }
        }
    }

    async fn refresh_preferences(&mut self) {
        let user_id = self.user_id.clone();
        if let Err(e) = self
            .preferences
            .refresh(self.ports.affinity.as_ref(), user_id.as_deref(), &self.place_id)
            .await
        {
            debug!("Continuing without fresh tag weights: {}", e);
        }
    }

    async fn log(&self, action: FeedbackAction, item: Option<&ContentItem>, mode: Mode) {
        self.logger
            .log(
                self.user_id.as_deref(),
                action,
                item,
                mode,
                Some(self.distance_band),
            )
            .await;
    }

    fn card(&self, item: &ContentItem) -> SuggestionCard {
        let mode = self.session.mode().unwrap_or(Mode::Unsure);
        SuggestionCard {
            item: item.clone(),
            why: format!(
                "Because you said you're {} · {}",
                mode.label(),
                TimeBucket::now()
            ),
            meta: format!("Score: {}", item.score),
            hint: if self.user_id.is_some() {
                HINT_SIGNED_IN.to_string()
            } else {
                HINT_ANONYMOUS.to_string()
            },
        }
    }
}
