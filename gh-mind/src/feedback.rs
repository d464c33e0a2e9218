use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use wtd_core::{
    ContentItem, DistanceBand, FeedbackAction, FeedbackEvent, FeedbackSink, Mode, PlaceId,
    TimeBucket,
};

/// Best-effort writer for suggestion events.
///
/// Anonymous sessions are never recorded. Transport failures are logged and
/// dropped: there is no retry and nothing is surfaced to the user.
#[derive(Clone)]
pub struct FeedbackLogger {
    sink: Arc<dyn FeedbackSink>,
    place_id: PlaceId,
}

impl FeedbackLogger {
    pub fn new(sink: Arc<dyn FeedbackSink>, place_id: impl Into<PlaceId>) -> Self {
        Self {
            sink,
            place_id: place_id.into(),
        }
    }

    pub fn event(
        &self,
        user_id: &str,
        action: FeedbackAction,
        item: Option<&ContentItem>,
        mode: Mode,
        distance_band: Option<DistanceBand>,
    ) -> FeedbackEvent {
        FeedbackEvent {
            user_id: user_id.to_string(),
            place_id: self.place_id.clone(),
            mode,
            suggestion_type: "post".to_string(),
            suggestion_id: item.map(|i| i.id.clone()),
            action,
            distance_band,
            time_bucket: TimeBucket::now(),
            created_at: Utc::now(),
        }
    }

    /// Returns whether the event reached the sink.
    pub async fn log(
        &self,
        user_id: Option<&str>,
        action: FeedbackAction,
        item: Option<&ContentItem>,
        mode: Mode,
        distance_band: Option<DistanceBand>,
    ) -> bool {
        let Some(user_id) = user_id else {
            return false;
        };

        let event = self.event(user_id, action, item, mode, distance_band);
        match self.sink.record(&event).await {
            Ok(()) => {
                debug!(
                    "Logged {} for {:?} in mode {}",
                    action, event.suggestion_id, mode
                );
                true
            }
            Err(e) => {
                warn!("Dropping {} suggestion event: {}", action, e);
                false
            }
        }
    }
}
