//! Traits for the collaborators the suggestion engine talks to.
//!
//! The HTTP backend implements the feed, affinity, feedback and vote ports;
//! the local settings store implements `DistancePreference`.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::types::{
    ContentItem, Coordinates, DistanceBand, FeedbackEvent, PlaceId, PostId, TagAffinity, UserId,
};

#[derive(Debug, Clone, PartialEq)]
pub struct FeedQuery {
    pub place_id: PlaceId,
    pub center: Option<Coordinates>,
    pub radius_m: Option<f64>,
}

impl FeedQuery {
    pub fn for_place(place_id: impl Into<PlaceId>) -> Self {
        Self {
            place_id: place_id.into(),
            center: None,
            radius_m: None,
        }
    }

    /// A radius is only meaningful around a known center.
    pub fn within(mut self, center: Option<Coordinates>, band: DistanceBand) -> Self {
        self.center = center;
        self.radius_m = center.and(band.radius_m());
        self
    }
}

#[async_trait]
pub trait ContentFeed: Send + Sync {
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<ContentItem>, CoreError>;
}

#[async_trait]
pub trait AffinitySource: Send + Sync {
    async fn tag_affinity(&self, user_id: &str, place_id: &str)
        -> Result<TagAffinity, CoreError>;
}

#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn record(&self, event: &FeedbackEvent) -> Result<(), CoreError>;
}

#[async_trait]
pub trait VoteSink: Send + Sync {
    async fn cast(&self, user_id: &UserId, post_id: &PostId, value: i8) -> Result<(), CoreError>;
}

#[async_trait]
pub trait DistancePreference: Send + Sync {
    async fn load(&self) -> Result<DistanceBand, CoreError>;
    async fn store(&self, band: DistanceBand) -> Result<(), CoreError>;
}
