#![allow(dead_code)]

use async_trait::async_trait;
use gh_mind::{CandidateSelector, GhMind, Ports};
use std::sync::{Arc, Mutex};
use wtd_core::{
    AffinitySource, BackendError, ContentFeed, ContentItem, CoreError, DistanceBand,
    DistancePreference, FeedQuery, FeedbackEvent, FeedbackSink, PostId, TagAffinity, UserId,
    VoteSink,
};

pub const PLACE: &str = "place-1";

#[derive(Default)]
pub struct FakeFeed {
    pub items: Mutex<Vec<ContentItem>>,
    pub queries: Mutex<Vec<FeedQuery>>,
    pub fail: Mutex<bool>,
}

impl FakeFeed {
    pub fn with(items: Vec<ContentItem>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items),
            ..Default::default()
        })
    }

    pub fn push(&self, item: ContentItem) {
        self.items.lock().unwrap().push(item);
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn fetch_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentFeed for FakeFeed {
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<ContentItem>, CoreError> {
        self.queries.lock().unwrap().push(query.clone());
        if *self.fail.lock().unwrap() {
            return Err(CoreError::Backend(BackendError::ServerError {
                status_code: 503,
            }));
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeAffinity {
    pub weights: Mutex<Vec<(String, f64)>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeAffinity {
    pub fn with(weights: Vec<(&str, f64)>) -> Arc<Self> {
        Arc::new(Self {
            weights: Mutex::new(
                weights
                    .into_iter()
                    .map(|(t, w)| (t.to_string(), w))
                    .collect(),
            ),
            ..Default::default()
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AffinitySource for FakeAffinity {
    async fn tag_affinity(
        &self,
        user_id: &str,
        place_id: &str,
    ) -> Result<TagAffinity, CoreError> {
        self.calls
            .lock()
            .unwrap()
            .push((user_id.to_string(), place_id.to_string()));
        Ok(TagAffinity::from_pairs(self.weights.lock().unwrap().clone()))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<FeedbackEvent>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn actions(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.action.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl FeedbackSink for RecordingSink {
    async fn record(&self, event: &FeedbackEvent) -> Result<(), CoreError> {
        if self.fail {
            return Err(CoreError::Backend(BackendError::RequestTimeout));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingVotes {
    pub votes: Mutex<Vec<(UserId, PostId, i8)>>,
}

#[async_trait]
impl VoteSink for RecordingVotes {
    async fn cast(&self, user_id: &UserId, post_id: &PostId, value: i8) -> Result<(), CoreError> {
        self.votes
            .lock()
            .unwrap()
            .push((user_id.clone(), post_id.clone(), value));
        Ok(())
    }
}

/// Rejects every vote, like a backend refusing the write.
#[derive(Default)]
pub struct FailingVotes;

#[async_trait]
impl VoteSink for FailingVotes {
    async fn cast(&self, _: &UserId, _: &PostId, _: i8) -> Result<(), CoreError> {
        Err(CoreError::Backend(BackendError::ServerError { status_code: 500 }))
    }
}

pub struct MemoryDistance {
    pub band: Mutex<DistanceBand>,
}

impl Default for MemoryDistance {
    fn default() -> Self {
        Self {
            band: Mutex::new(DistanceBand::Any),
        }
    }
}

#[async_trait]
impl DistancePreference for MemoryDistance {
    async fn load(&self) -> Result<DistanceBand, CoreError> {
        Ok(*self.band.lock().unwrap())
    }

    async fn store(&self, band: DistanceBand) -> Result<(), CoreError> {
        *self.band.lock().unwrap() = band;
        Ok(())
    }
}

pub struct Harness {
    pub feed: Arc<FakeFeed>,
    pub affinity: Arc<FakeAffinity>,
    pub sink: Arc<RecordingSink>,
    pub votes: Arc<RecordingVotes>,
    pub distance: Arc<MemoryDistance>,
}

impl Harness {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            feed: FakeFeed::with(items),
            affinity: FakeAffinity::with(vec![]),
            sink: Arc::new(RecordingSink::default()),
            votes: Arc::new(RecordingVotes::default()),
            distance: Arc::new(MemoryDistance::default()),
        }
    }

    pub fn ports(&self) -> Ports {
        Ports {
            feed: self.feed.clone(),
            affinity: self.affinity.clone(),
            feedback: self.sink.clone(),
            votes: self.votes.clone(),
            distance: self.distance.clone(),
        }
    }

    pub fn engine(&self, seed: u64) -> GhMind {
        GhMind::new(PLACE, self.ports(), CandidateSelector::with_seed(8, seed))
    }
}
