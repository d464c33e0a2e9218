use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

pub type UserId = String;
pub type PlaceId = String;
pub type PostId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    #[default]
    General,
    Advice,
    Event,
    Alert,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::General => "general",
            PostType::Advice => "advice",
            PostType::Event => "event",
            PostType::Alert => "alert",
        }
    }

    /// Blank input falls back to `general`.
    pub fn parse_or_default(raw: Option<&str>) -> Result<Self, CoreError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(PostType::General),
            Some(value) => value.parse(),
        }
    }
}

impl FromStr for PostType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "general" => Ok(PostType::General),
            "advice" => Ok(PostType::Advice),
            "event" => Ok(PostType::Event),
            "alert" => Ok(PostType::Alert),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown post type '{}'", other),
            }),
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Everyday,
    FoodDrink,
    Outdoors,
    History,
    Events,
    Attractions,
    Nightlife,
    Legends,
}

impl Topic {
    pub const ALL: [Topic; 8] = [
        Topic::Everyday,
        Topic::FoodDrink,
        Topic::Outdoors,
        Topic::History,
        Topic::Events,
        Topic::Attractions,
        Topic::Nightlife,
        Topic::Legends,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Everyday => "everyday",
            Topic::FoodDrink => "food_drink",
            Topic::Outdoors => "outdoors",
            Topic::History => "history",
            Topic::Events => "events",
            Topic::Attractions => "attractions",
            Topic::Nightlife => "nightlife",
            Topic::Legends => "legends",
        }
    }

    /// Parses a topic column where blank means "no topic recorded".
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, CoreError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => value.parse().map(Some),
        }
    }
}

impl FromStr for Topic {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == lowered)
            .ok_or_else(|| CoreError::InvalidInput {
                message: format!("unknown topic '{}'", lowered),
            })
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user's stated intent for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Bored,
    Hungry,
    #[serde(alias = "idk")]
    Unsure,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Bored => "bored",
            Mode::Hungry => "hungry",
            Mode::Unsure => "unsure",
        }
    }

    pub fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bored" => Ok(Mode::Bored),
            "hungry" => Ok(Mode::Hungry),
            "unsure" | "idk" => Ok(Mode::Unsure),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown mode '{}'", other),
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_to_m(&self, other: &Coordinates) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;

        let lat1_rad = self.latitude.to_radians();
        let lat2_rad = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }
}

/// A suggestible post. Read-only from the engine's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: PostId,
    #[serde(rename = "type", default)]
    pub post_type: PostType,
    #[serde(default)]
    pub topic: Option<Topic>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    /// Attached by the caller for the current selection only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

impl ContentItem {
    pub fn new(id: impl Into<PostId>) -> Self {
        Self {
            id: id.into(),
            post_type: PostType::General,
            topic: None,
            title: String::new(),
            body: String::new(),
            tags: BTreeSet::new(),
            score: 0.0,
            coordinates: None,
            distance_m: None,
        }
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic = Some(topic);
        self
    }

    pub fn with_type(mut self, post_type: PostType) -> Self {
        self.post_type = post_type;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_text(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.title = title.into();
        self.body = body.into();
        self
    }

    /// Tags are stored lowercase and trimmed; blanks are dropped.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    /// Topic used for diversity bookkeeping; untagged posts count as everyday.
    pub fn effective_topic(&self) -> Topic {
        self.topic.unwrap_or(Topic::Everyday)
    }

    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "(Untitled)"
        } else {
            &self.title
        }
    }
}

pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// A post draft, validated before it is handed to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPost {
    pub place_id: PlaceId,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub topic: Topic,
    pub title: String,
    pub body: Option<String>,
    pub author_id: UserId,
}

impl NewPost {
    pub fn validate(
        place_id: &str,
        author_id: &str,
        raw_type: Option<&str>,
        raw_topic: Option<&str>,
        title: &str,
        body: &str,
    ) -> Result<Self, CoreError> {
        let post_type = PostType::parse_or_default(raw_type)?;
        let topic = Topic::parse_optional(raw_topic)?.unwrap_or(Topic::Everyday);

        let title = title.trim();
        if title.is_empty() {
            return Err(CoreError::InvalidInput {
                message: "Title is required.".to_string(),
            });
        }
        let body = body.trim();

        Ok(Self {
            place_id: place_id.to_string(),
            post_type,
            topic,
            title: title.to_string(),
            body: (!body.is_empty()).then(|| body.to_string()),
            author_id: author_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceBand {
    #[default]
    Near,
    Medium,
    Far,
    Any,
}

impl DistanceBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceBand::Near => "near",
            DistanceBand::Medium => "medium",
            DistanceBand::Far => "far",
            DistanceBand::Any => "any",
        }
    }

    /// Search radius in meters; `None` means unbounded.
    pub fn radius_m(&self) -> Option<f64> {
        match self {
            DistanceBand::Near => Some(2_000.0),
            DistanceBand::Medium => Some(10_000.0),
            DistanceBand::Far => Some(40_000.0),
            DistanceBand::Any => None,
        }
    }
}

impl FromStr for DistanceBand {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "near" => Ok(DistanceBand::Near),
            "medium" => Ok(DistanceBand::Medium),
            "far" => Ok(DistanceBand::Far),
            "any" => Ok(DistanceBand::Any),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown distance band '{}'", other),
            }),
        }
    }
}

impl fmt::Display for DistanceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Morning,
    Afternoon,
    Evening,
    Late,
}

impl TimeBucket {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeBucket::Morning,
            12..=16 => TimeBucket::Afternoon,
            17..=21 => TimeBucket::Evening,
            _ => TimeBucket::Late,
        }
    }

    pub fn now() -> Self {
        Self::from_hour(chrono::Local::now().hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::Morning => "morning",
            TimeBucket::Afternoon => "afternoon",
            TimeBucket::Evening => "evening",
            TimeBucket::Late => "late",
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Shown,
    Yes,
    No,
    Skip,
    Upvote,
    Downvote,
}

impl FeedbackAction {
    /// Actions that can move the learned tag weights.
    pub fn is_preference_signal(&self) -> bool {
        matches!(
            self,
            FeedbackAction::Yes
                | FeedbackAction::No
                | FeedbackAction::Upvote
                | FeedbackAction::Downvote
        )
    }

    pub fn vote_value(&self) -> Option<i8> {
        match self {
            FeedbackAction::Upvote => Some(1),
            FeedbackAction::Downvote => Some(-1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Shown => "shown",
            FeedbackAction::Yes => "yes",
            FeedbackAction::No => "no",
            FeedbackAction::Skip => "skip",
            FeedbackAction::Upvote => "upvote",
            FeedbackAction::Downvote => "downvote",
        }
    }
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only `suggestion_events` log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub user_id: UserId,
    pub place_id: PlaceId,
    pub mode: Mode,
    pub suggestion_type: String,
    pub suggestion_id: Option<PostId>,
    pub action: FeedbackAction,
    pub distance_band: Option<DistanceBand>,
    pub time_bucket: TimeBucket,
    pub created_at: DateTime<Utc>,
}

/// Learned per-tag weights for one (user, place).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagAffinity {
    weights: HashMap<String, f64>,
}

impl TagAffinity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut weights = HashMap::new();
        for (tag, weight) in pairs {
            let tag = tag.as_ref().trim().to_lowercase();
            if !tag.is_empty() {
                weights.insert(tag, weight);
            }
        }
        Self { weights }
    }

    pub fn weight(&self, tag: &str) -> f64 {
        self.weights.get(tag).copied().unwrap_or(0.0)
    }

    pub fn bias<'a, I>(&self, tags: I) -> f64
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter().map(|tag| self.weight(tag)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing_accepts_legacy_idk() {
        assert_eq!("idk".parse::<Mode>().unwrap(), Mode::Unsure);
        assert_eq!(" Hungry ".parse::<Mode>().unwrap(), Mode::Hungry);
        assert!("sleepy".parse::<Mode>().is_err());

        let mode: Mode = serde_json::from_str("\"idk\"").unwrap();
        assert_eq!(mode, Mode::Unsure);
        assert_eq!(serde_json::to_string(&Mode::Unsure).unwrap(), "\"unsure\"");
    }

    #[test]
    fn test_topic_blank_is_absent() {
        assert_eq!(Topic::parse_optional(Some("  ")).unwrap(), None);
        assert_eq!(Topic::parse_optional(None).unwrap(), None);
        assert_eq!(
            Topic::parse_optional(Some("FOOD_DRINK")).unwrap(),
            Some(Topic::FoodDrink)
        );
        assert!(Topic::parse_optional(Some("sports")).is_err());
    }

    #[test]
    fn test_time_buckets() {
        assert_eq!(TimeBucket::from_hour(4), TimeBucket::Late);
        assert_eq!(TimeBucket::from_hour(5), TimeBucket::Morning);
        assert_eq!(TimeBucket::from_hour(12), TimeBucket::Afternoon);
        assert_eq!(TimeBucket::from_hour(17), TimeBucket::Evening);
        assert_eq!(TimeBucket::from_hour(22), TimeBucket::Late);
    }

    #[test]
    fn test_haversine_distance() {
        // Roughly one degree of latitude.
        let a = Coordinates::new(45.0, -93.0);
        let b = Coordinates::new(46.0, -93.0);
        let d = a.distance_to_m(&b);
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
        assert_eq!(a.distance_to_m(&a), 0.0);
    }

    #[test]
    fn test_preference_signals() {
        assert!(FeedbackAction::Yes.is_preference_signal());
        assert!(FeedbackAction::Downvote.is_preference_signal());
        assert!(!FeedbackAction::Shown.is_preference_signal());
        assert!(!FeedbackAction::Skip.is_preference_signal());
    }

    #[test]
    fn test_tag_affinity_bias_defaults_to_zero() {
        let affinity = TagAffinity::from_pairs(vec![("Music", 2.5), ("bbq", -1.0)]);
        let item = ContentItem::new("p1").with_tags(["music", "bbq", "trivia"]);
        assert_eq!(affinity.weight("music"), 2.5);
        assert_eq!(affinity.weight("trivia"), 0.0);
        assert_eq!(affinity.bias(&item.tags), 1.5);
    }

    #[test]
    fn test_new_post_validation() {
        let post = NewPost::validate("place", "user", None, Some(""), "  Taco night ", " ")
            .unwrap();
        assert_eq!(post.post_type, PostType::General);
        assert_eq!(post.topic, Topic::Everyday);
        assert_eq!(post.title, "Taco night");
        assert_eq!(post.body, None);

        assert!(NewPost::validate("place", "user", Some("rant"), None, "x", "").is_err());
        assert!(NewPost::validate("place", "user", None, None, "   ", "").is_err());
    }

    #[test]
    fn test_content_item_deserializes_sparse_rows() {
        let item: ContentItem =
            serde_json::from_str(r#"{"id":"abc","type":"event","score":3}"#).unwrap();
        assert_eq!(item.post_type, PostType::Event);
        assert_eq!(item.topic, None);
        assert!(item.tags.is_empty());
        assert_eq!(item.effective_topic(), Topic::Everyday);
        assert_eq!(item.display_title(), "(Untitled)");
    }
}
