use tracing::{debug, info, warn};
use wtd_core::{AffinitySource, ContentItem, CoreError, ErrorExt, PlaceId, TagAffinity, UserId};

/// Snapshot of the signed-in user's tag weights for one place.
///
/// Anonymous users always have an empty snapshot and never trigger a fetch.
#[derive(Debug, Default)]
pub struct PreferenceStore {
    owner: Option<(UserId, PlaceId)>,
    affinity: TagAffinity,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<&(UserId, PlaceId)> {
        self.owner.as_ref()
    }

    pub fn affinity(&self) -> &TagAffinity {
        &self.affinity
    }

    /// Replaces the snapshot wholesale; there is no incremental merge.
    pub fn replace(&mut self, user_id: &str, place_id: &str, affinity: TagAffinity) {
        self.owner = Some((user_id.to_string(), place_id.to_string()));
        self.affinity = affinity;
    }

    pub fn clear(&mut self) {
        self.owner = None;
        self.affinity = TagAffinity::new();
    }

    /// Re-fetches the snapshot for `user_id` at `place_id`.
    ///
    /// With no user the store is emptied. On a transport failure the previous
    /// snapshot is kept if it belongs to the same user, and dropped otherwise.
    pub async fn refresh(
        &mut self,
        source: &dyn AffinitySource,
        user_id: Option<&str>,
        place_id: &str,
    ) -> Result<&TagAffinity, CoreError> {
        let Some(user_id) = user_id else {
            self.clear();
            return Ok(&self.affinity);
        };

        match source.tag_affinity(user_id, place_id).await {
            Ok(affinity) => {
                debug!(
                    "Loaded {} tag weights for user {} at place {}",
                    affinity.len(),
                    user_id,
                    place_id
                );
                self.replace(user_id, place_id, affinity);
                Ok(&self.affinity)
            }
            Err(error) => {
                error.log_warn();
                let same_owner = self
                    .owner
                    .as_ref()
                    .is_some_and(|(u, p)| u == user_id && p == place_id);
                if !same_owner {
                    info!("Dropping tag weights that belong to a previous user");
                    self.clear();
                } else {
                    warn!("Keeping stale tag weights after failed refresh");
                }
                Err(error)
            }
        }
    }

    /// Raw popularity plus the summed weight of the item's tags.
    pub fn score(&self, item: &ContentItem) -> f64 {
        item.score + self.affinity.bias(&item.tags)
    }
}
