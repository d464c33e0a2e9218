use crate::auth::{AuthSession, IdentityHandle};
use crate::metrics::{ApiMetrics, EndpointMetrics, MetricsCollector, RequestMetrics};
use crate::retry::{RetryConfig, RetryExecutor, RetryMetrics};
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;
use wtd_core::{
    normalize_tags, AffinitySource, AppConfig, BackendError, ContentFeed, ContentItem,
    Coordinates, CoreError, FeedQuery, FeedbackEvent, FeedbackSink, NewPost, PostId, PostType,
    TagAffinity, Topic, UserId, VoteSink,
};

const POST_SCORES: &str = "/rest/v1/v_post_scores";
const TAG_AFFINITY: &str = "/rest/v1/v_tag_affinity";
const SUGGESTION_EVENTS: &str = "/rest/v1/suggestion_events";
const VOTES: &str = "/rest/v1/votes";
const POSTS: &str = "/rest/v1/posts";
const AUTH_TOKEN: &str = "/auth/v1/token";

const POST_COLUMNS: &str = "id,type,topic,title,body,score,tags,lat,lng";
const METERS_PER_DEGREE: f64 = 111_320.0;

/// One row of the `v_post_scores` view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRow {
    pub id: String,
    #[serde(rename = "type", default)]
    pub post_type: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffinityRow {
    pub tag: String,
    pub weight: f64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
}

#[derive(Debug)]
pub struct BackendClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    identity: IdentityHandle,
    retry: RetryExecutor,
    metrics: Arc<MetricsCollector>,
}

impl BackendClient {
    pub fn new(config: &AppConfig, identity: IdentityHandle) -> Result<Self, CoreError> {
        Self::with_retry(config, identity, RetryConfig::backend())
    }

    pub fn with_retry(
        config: &AppConfig,
        identity: IdentityHandle,
        retry: RetryConfig,
    ) -> Result<Self, CoreError> {
        let base_url = Url::parse(&config.backend_url).map_err(|e| CoreError::InvalidInput {
            message: format!("invalid backend url {}: {}", config.backend_url, e),
        })?;

        let http_client = Client::builder()
            .user_agent(concat!("wtd/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            identity,
            retry: RetryExecutor::new(retry),
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    pub fn identity(&self) -> &IdentityHandle {
        &self.identity
    }

    /// Sends one request and maps non-success statuses onto `BackendError`.
    /// Signed-in calls carry the user's token; anonymous ones the api key.
    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, String)],
        body: Option<serde_json::Value>,
        prefer: Option<&str>,
    ) -> Result<Response, CoreError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let bearer = self
            .identity
            .access_token()
            .unwrap_or_else(|| self.api_key.clone());

        let mut request_builder = self
            .http_client
            .request(method.clone(), &url)
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
            .query(query_params);

        if let Some(prefer) = prefer {
            request_builder = request_builder.header("Prefer", prefer);
        }
        if let Some(body) = body {
            request_builder = request_builder.json(&body);
        }

        debug!("Backend request: {} {}", method, endpoint);
        let start_time = Instant::now();
        let result = match request_builder.send().await {
            Ok(response) => Self::check_status(response, endpoint).await,
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                if e.is_timeout() {
                    Err(CoreError::Backend(BackendError::RequestTimeout))
                } else {
                    Err(CoreError::Network(e))
                }
            }
        };

        let (status_code, error_type) = match &result {
            Ok(response) => (Some(response.status().as_u16()), None),
            Err(CoreError::Backend(BackendError::RateLimitExceeded { .. })) => {
                (Some(429), Some("rate_limited".to_string()))
            }
            Err(e) => (None, Some(error_kind(e).to_string())),
        };
        self.metrics
            .record_request(RequestMetrics {
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                status_code,
                response_time: start_time.elapsed(),
                success: result.is_ok(),
                rate_limited: status_code == Some(429),
                error_type,
            })
            .await;

        result
    }

    async fn check_status(response: Response, endpoint: &str) -> Result<Response, CoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        error!("Request failed with status: {} for {}", status, endpoint);

        let backend_error = match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!("Rate limited, retry after {} seconds", retry_after);
                BackendError::RateLimitExceeded { retry_after }
            }
            StatusCode::UNAUTHORIZED => BackendError::InvalidToken,
            StatusCode::FORBIDDEN => BackendError::Forbidden {
                resource: endpoint.to_string(),
            },
            StatusCode::CONFLICT => BackendError::ConstraintViolation {
                constraint: response.text().await.unwrap_or_default(),
            },
            s if s.is_server_error() => BackendError::ServerError {
                status_code: s.as_u16(),
            },
            s => BackendError::InvalidResponse {
                details: format!("{}: {}", s, response.text().await.unwrap_or_default()),
            },
        };
        Err(CoreError::Backend(backend_error))
    }

    /// Exchanges email and password for a session and publishes it.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, CoreError> {
        let response = self
            .make_request(
                Method::POST,
                AUTH_TOKEN,
                &[("grant_type", "password".to_string())],
                Some(json!({ "email": email, "password": password })),
                None,
            )
            .await
            .map_err(|e| match e {
                CoreError::Backend(BackendError::InvalidResponse { .. }) => {
                    CoreError::Backend(BackendError::InvalidToken)
                }
                other => other,
            })?;

        let token: TokenResponse = response.json().await.map_err(|e| {
            error!("Failed to parse sign-in response: {}", e);
            CoreError::Backend(BackendError::InvalidResponse {
                details: "Failed to parse sign-in response".to_string(),
            })
        })?;

        let session = AuthSession::new(token.user.id, token.access_token);
        self.identity.sign_in(session.clone());
        Ok(session)
    }

    pub fn sign_out(&self) {
        self.identity.sign_out();
    }

    fn require_user(&self) -> Result<UserId, CoreError> {
        self.identity
            .user_id()
            .ok_or(CoreError::Backend(BackendError::NotAuthenticated))
    }

    /// Posts for the place, best first. With a radius, a lat/lng box is sent
    /// as a prefilter; posts without coordinates always pass it.
    pub async fn fetch_posts(&self, query: &FeedQuery) -> Result<Vec<ContentItem>, CoreError> {
        self.retry
            .execute("fetch_posts", || self.fetch_posts_once(query))
            .await
    }

    async fn fetch_posts_once(&self, query: &FeedQuery) -> Result<Vec<ContentItem>, CoreError> {
        let mut params = vec![
            ("select", POST_COLUMNS.to_string()),
            ("place_id", format!("eq.{}", query.place_id)),
            ("order", "score.desc".to_string()),
        ];
        if let (Some(center), Some(radius_m)) = (query.center, query.radius_m) {
            params.push(("or", bounding_box_filter(center, radius_m)));
        }

        let response = self
            .make_request(Method::GET, POST_SCORES, &params, None, None)
            .await?;
        let rows: Vec<PostRow> = response.json().await.map_err(|e| {
            error!("Failed to parse posts: {}", e);
            CoreError::Backend(BackendError::InvalidResponse {
                details: format!("Failed to parse posts for place {}", query.place_id),
            })
        })?;

        info!("Retrieved {} posts for place {}", rows.len(), query.place_id);
        Ok(rows.into_iter().map(ContentItem::from).collect())
    }

    pub async fn fetch_tag_affinity(
        &self,
        user_id: &str,
        place_id: &str,
    ) -> Result<TagAffinity, CoreError> {
        self.retry
            .execute("fetch_tag_affinity", || async {
                let params = [
                    ("select", "tag,weight".to_string()),
                    ("user_id", format!("eq.{}", user_id)),
                    ("place_id", format!("eq.{}", place_id)),
                ];
                let response = self
                    .make_request(Method::GET, TAG_AFFINITY, &params, None, None)
                    .await?;
                let rows: Vec<AffinityRow> = response.json().await.map_err(|e| {
                    error!("Failed to parse tag affinity: {}", e);
                    CoreError::Backend(BackendError::InvalidResponse {
                        details: "Failed to parse tag affinity".to_string(),
                    })
                })?;
                Ok(TagAffinity::from_pairs(
                    rows.into_iter().map(|row| (row.tag, row.weight)),
                ))
            })
            .await
    }

    /// Appends to the event log. Never retried: a duplicate row would skew
    /// the learned weights.
    pub async fn record_event(&self, event: &FeedbackEvent) -> Result<(), CoreError> {
        self.require_user()?;
        self.make_request(
            Method::POST,
            SUGGESTION_EVENTS,
            &[],
            Some(serde_json::to_value(event)?),
            Some("return=minimal"),
        )
        .await?;
        debug!("Recorded {} for {:?}", event.action, event.suggestion_id);
        Ok(())
    }

    /// One vote per (user, post); a repeat vote overwrites the previous one.
    pub async fn cast_vote(
        &self,
        user_id: &UserId,
        post_id: &PostId,
        value: i8,
    ) -> Result<(), CoreError> {
        self.require_user()?;
        self.make_request(
            Method::POST,
            VOTES,
            &[("on_conflict", "user_id,post_id".to_string())],
            Some(json!({ "user_id": user_id, "post_id": post_id, "value": value })),
            Some("resolution=merge-duplicates,return=minimal"),
        )
        .await?;
        info!("Vote {} cast on {}", value, post_id);
        Ok(())
    }

    pub async fn create_post(&self, post: &NewPost) -> Result<(), CoreError> {
        let user_id = self.require_user()?;
        if user_id != post.author_id {
            return Err(CoreError::PermissionDenied {
                operation: "post as another user".to_string(),
            });
        }
        self.make_request(
            Method::POST,
            POSTS,
            &[],
            Some(serde_json::to_value(post)?),
            Some("return=minimal"),
        )
        .await?;
        info!("Created post \"{}\" in place {}", post.title, post.place_id);
        Ok(())
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.get_metrics().await
    }

    /// Counters for one endpoint. Accepts a full path (`/rest/v1/votes`) or
    /// just the table or view name (`votes`).
    pub async fn endpoint_metrics(&self, endpoint: &str) -> Option<EndpointMetrics> {
        let path = if endpoint.starts_with('/') {
            endpoint.to_string()
        } else {
            format!("/rest/v1/{}", endpoint)
        };
        self.metrics.get_endpoint_metrics(&path).await
    }

    /// All request counters as pretty-printed JSON.
    pub async fn export_metrics(&self) -> Result<String, CoreError> {
        Ok(self.metrics.export_metrics().await?)
    }

    pub fn retry_metrics(&self) -> RetryMetrics {
        self.retry.get_metrics()
    }

    pub async fn reset_metrics(&self) {
        self.metrics.reset_metrics().await;
    }
}

fn error_kind(error: &CoreError) -> &'static str {
    match error {
        CoreError::Backend(BackendError::InvalidToken) => "unauthorized",
        CoreError::Backend(BackendError::Forbidden { .. }) => "forbidden",
        CoreError::Backend(BackendError::ConstraintViolation { .. }) => "conflict",
        CoreError::Backend(BackendError::ServerError { .. }) => "server_error",
        CoreError::Backend(BackendError::RequestTimeout) => "timeout",
        CoreError::Network(_) => "network_error",
        _ => "invalid_response",
    }
}

/// PostgREST `or=` expression for a lat/lng box around `center`.
fn bounding_box_filter(center: Coordinates, radius_m: f64) -> String {
    let dlat = radius_m / METERS_PER_DEGREE;
    let dlng = radius_m / (METERS_PER_DEGREE * center.latitude.to_radians().cos().max(0.01));
    format!(
        "(lat.is.null,lng.is.null,and(lat.gte.{},lat.lte.{},lng.gte.{},lng.lte.{}))",
        center.latitude - dlat,
        center.latitude + dlat,
        center.longitude - dlng,
        center.longitude + dlng
    )
}

impl From<PostRow> for ContentItem {
    fn from(row: PostRow) -> Self {
        let post_type = PostType::parse_or_default(row.post_type.as_deref()).unwrap_or_else(|_| {
            debug!("Unknown post type {:?} on {}", row.post_type, row.id);
            PostType::default()
        });
        let topic = Topic::parse_optional(row.topic.as_deref()).unwrap_or_else(|_| {
            warn!("Unknown topic {:?} on {}", row.topic, row.id);
            None
        });

        let mut item = ContentItem::new(row.id);
        item.post_type = post_type;
        item.topic = topic;
        item.title = row.title.unwrap_or_default();
        item.body = row.body.unwrap_or_default();
        item.tags = normalize_tags(row.tags.unwrap_or_default());
        item.score = row.score.unwrap_or(0.0);
        item.coordinates = match (row.lat, row.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
            _ => None,
        };
        item
    }
}

#[async_trait]
impl ContentFeed for BackendClient {
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<ContentItem>, CoreError> {
        self.fetch_posts(query).await
    }
}

#[async_trait]
impl AffinitySource for BackendClient {
    async fn tag_affinity(
        &self,
        user_id: &str,
        place_id: &str,
    ) -> Result<TagAffinity, CoreError> {
        self.fetch_tag_affinity(user_id, place_id).await
    }
}

#[async_trait]
impl FeedbackSink for BackendClient {
    async fn record(&self, event: &FeedbackEvent) -> Result<(), CoreError> {
        self.record_event(event).await
    }
}

#[async_trait]
impl VoteSink for BackendClient {
    async fn cast(&self, user_id: &UserId, post_id: &PostId, value: i8) -> Result<(), CoreError> {
        self.cast_vote(user_id, post_id, value).await
    }
}
