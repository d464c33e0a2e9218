//! Candidate selection: filter by mode, drop repeats, prefer a new topic,
//! rank by personalized score, then pick at random from the top of the list.

use tracing::debug;
use wtd_core::{ContentItem, Mode, DEFAULT_SHORTLIST_SIZE};

use crate::classifier;
use crate::preferences::PreferenceStore;
use crate::session::SuggestionSession;

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate<'a> {
    pub item: &'a ContentItem,
    pub score: f64,
}

#[derive(Debug)]
pub struct CandidateSelector {
    shortlist_size: usize,
    rng: fastrand::Rng,
}

impl Default for CandidateSelector {
    fn default() -> Self {
        Self::new(DEFAULT_SHORTLIST_SIZE)
    }
}

impl CandidateSelector {
    pub fn new(shortlist_size: usize) -> Self {
        Self {
            shortlist_size: shortlist_size.max(1),
            rng: fastrand::Rng::new(),
        }
    }

    /// Deterministic picks for tests and replays.
    pub fn with_seed(shortlist_size: usize, seed: u64) -> Self {
        Self {
            shortlist_size: shortlist_size.max(1),
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn shortlist_size(&self) -> usize {
        self.shortlist_size
    }

    /// Eligible items for `mode`, before ranking.
    ///
    /// Under `unsure`, items repeating the last shown topic are removed unless
    /// that would leave nothing; diversity never empties the pool on its own.
    pub fn candidates<'a>(
        &self,
        items: &'a [ContentItem],
        mode: Mode,
        session: &SuggestionSession,
    ) -> Vec<&'a ContentItem> {
        let candidates: Vec<&ContentItem> = items
            .iter()
            .filter(|item| !item.id.is_empty())
            .filter(|item| classifier::matches(item, mode))
            .filter(|item| !session.has_shown(&item.id))
            .collect();

        if mode != Mode::Unsure {
            return candidates;
        }
        let Some(last_topic) = session.last_topic() else {
            return candidates;
        };

        let fresh: Vec<&ContentItem> = candidates
            .iter()
            .copied()
            .filter(|item| item.effective_topic() != last_topic)
            .collect();
        if fresh.is_empty() {
            debug!(
                "Every remaining candidate repeats topic {}; ignoring diversity",
                last_topic
            );
            candidates
        } else {
            fresh
        }
    }

    /// Candidates ordered by personalized score, highest first.
    pub fn rank<'a>(
        candidates: Vec<&'a ContentItem>,
        preferences: &PreferenceStore,
    ) -> Vec<RankedCandidate<'a>> {
        let mut ranked: Vec<RankedCandidate<'a>> = candidates
            .into_iter()
            .map(|item| RankedCandidate {
                item,
                score: preferences.score(item),
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    pub fn shortlist<'a>(
        &self,
        items: &'a [ContentItem],
        mode: Mode,
        session: &SuggestionSession,
        preferences: &PreferenceStore,
    ) -> Vec<RankedCandidate<'a>> {
        let mut ranked = Self::rank(self.candidates(items, mode, session), preferences);
        ranked.truncate(self.shortlist_size);
        ranked
    }

    /// Picks the next suggestion and records it in `session`.
    ///
    /// Returns `None` when no eligible item is left; the session is then
    /// marked exhausted.
    pub fn pick_next(
        &mut self,
        items: &[ContentItem],
        mode: Mode,
        session: &mut SuggestionSession,
        preferences: &PreferenceStore,
    ) -> Option<ContentItem> {
        let shortlist = self.shortlist(items, mode, session, preferences);
        if shortlist.is_empty() {
            debug!("No candidates left for mode {}", mode);
            session.record_exhausted();
            return None;
        }

        let index = self.rng.usize(..shortlist.len());
        let chosen = shortlist[index].item.clone();
        debug!(
            "Picked {} (rank {} of {}, score {:.2})",
            chosen.id,
            index + 1,
            shortlist.len(),
            shortlist[index].score
        );

        session.record_pick(chosen.clone());
        Some(chosen)
    }
}
