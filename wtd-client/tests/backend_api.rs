use serde_json::json;
use wiremock::matchers::{
    body_json, body_partial_json, header, header_exists, method, path, query_param,
    query_param_contains, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wtd_client::{AuthSession, BackendClient, IdentityHandle, RetryConfig};
use wtd_core::{
    AppConfig, BackendError, Coordinates, CoreError, DistanceBand, FeedQuery, FeedbackAction,
    FeedbackEvent, Mode, NewPost, TimeBucket, Topic,
};

fn event(action: FeedbackAction) -> FeedbackEvent {
    FeedbackEvent {
        user_id: "user-1".to_string(),
        place_id: "place-1".to_string(),
        mode: Mode::Hungry,
        suggestion_type: "post".to_string(),
        suggestion_id: Some("p1".to_string()),
        action,
        distance_band: None,
        time_bucket: TimeBucket::Evening,
        created_at: "2024-05-01T18:00:00Z".parse().unwrap(),
    }
}

fn config(server: &MockServer) -> AppConfig {
    AppConfig {
        backend_url: server.uri(),
        api_key: "anon-key".to_string(),
        place_id: "place-1".to_string(),
        ..Default::default()
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 1,
        max_delay_ms: 5,
        ..RetryConfig::backend()
    }
}

fn anonymous(server: &MockServer) -> BackendClient {
    BackendClient::with_retry(&config(server), IdentityHandle::default(), fast_retry()).unwrap()
}

fn signed_in(server: &MockServer) -> BackendClient {
    let identity = IdentityHandle::new(Some(AuthSession::new("user-1", "user-token")));
    BackendClient::with_retry(&config(server), identity, fast_retry()).unwrap()
}

#[tokio::test]
async fn fetch_posts_filters_by_place_and_parses_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/v_post_scores"))
        .and(query_param("place_id", "eq.place-1"))
        .and(query_param("order", "score.desc"))
        .and(query_param_is_missing("or"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "a", "type": "event", "topic": "food_drink", "title": "Tacos",
             "score": 9, "tags": ["Tacos", "cheap"], "lat": 44.9, "lng": -93.2},
            {"id": "b", "type": null, "topic": null, "title": null, "score": null}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let items = anonymous(&server)
        .fetch_posts(&FeedQuery::for_place("place-1"))
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].topic, Some(Topic::FoodDrink));
    assert_eq!(items[0].score, 9.0);
    assert!(items[0].tags.contains("tacos"));
    assert_eq!(items[1].display_title(), "(Untitled)");
    assert_eq!(items[1].score, 0.0);
}

#[tokio::test]
async fn radius_adds_bounding_box_prefilter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/v_post_scores"))
        .and(query_param_contains("or", "lat.is.null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let query = FeedQuery::for_place("place-1")
        .within(Some(Coordinates::new(44.97, -93.26)), DistanceBand::Near);
    let items = anonymous(&server).fetch_posts(&query).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn signed_in_requests_carry_the_user_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/v_tag_affinity"))
        .and(query_param("user_id", "eq.user-1"))
        .and(query_param("place_id", "eq.place-1"))
        .and(header("authorization", "Bearer user-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"tag": "Jazz", "weight": 1.5},
            {"tag": "crowds", "weight": -0.5}
        ])))
        .mount(&server)
        .await;

    let affinity = signed_in(&server)
        .fetch_tag_affinity("user-1", "place-1")
        .await
        .unwrap();
    assert_eq!(affinity.weight("jazz"), 1.5);
    assert_eq!(affinity.weight("crowds"), -0.5);
    assert_eq!(affinity.weight("other"), 0.0);
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/v_post_scores"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/v_post_scores"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a"}])))
        .mount(&server)
        .await;

    let client = anonymous(&server);
    let items = client
        .fetch_posts(&FeedQuery::for_place("place-1"))
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(client.retry_metrics().successful_retries, 1);

    let metrics = client.get_metrics().await;
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.failed_requests, 2);
}

#[tokio::test]
async fn request_counters_are_exported_per_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/v_post_scores"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = anonymous(&server);
    client
        .fetch_posts(&FeedQuery::for_place("place-1"))
        .await
        .unwrap();

    let by_name = client.endpoint_metrics("v_post_scores").await.unwrap();
    assert_eq!(by_name.request_count, 1);
    assert_eq!(by_name.last_status, Some(200));
    let by_path = client.endpoint_metrics("/rest/v1/v_post_scores").await.unwrap();
    assert_eq!(by_path.success_count, 1);
    assert!(client.endpoint_metrics("votes").await.is_none());

    let exported = client.export_metrics().await.unwrap();
    assert!(exported.contains("/rest/v1/v_post_scores"));
    assert!(exported.contains("\"total_requests\": 1"));

    client.reset_metrics().await;
    assert_eq!(client.get_metrics().await.total_requests, 0);
}

#[tokio::test]
async fn rate_limit_reports_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
        .mount(&server)
        .await;

    let client =
        BackendClient::with_retry(&config(&server), IdentityHandle::default(), RetryConfig::no_retry())
            .unwrap();
    let err = client
        .fetch_posts(&FeedQuery::for_place("place-1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Backend(BackendError::RateLimitExceeded { retry_after: 2 })
    ));
    assert_eq!(client.get_metrics().await.rate_limited_requests, 1);
}

#[tokio::test]
async fn long_retry_after_fails_fast_instead_of_stalling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/v_post_scores"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "60"))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        BackendClient::with_retry(&config(&server), IdentityHandle::default(), RetryConfig::backend())
            .unwrap();
    let err = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        client.fetch_posts(&FeedQuery::for_place("place-1")),
    )
    .await
    .expect("fetch must not wait out the server's retry-after")
    .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Backend(BackendError::RateLimitExceeded { retry_after: 60 })
    ));
}

#[tokio::test]
async fn rejected_tokens_do_not_block_the_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/v_tag_affinity"))
        .respond_with(ResponseTemplate::new(401))
        .expect(6)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/v_post_scores"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a"}])))
        .expect(1)
        .mount(&server)
        .await;

    let client = signed_in(&server);
    for _ in 0..6 {
        let err = client
            .fetch_tag_affinity("user-1", "place-1")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Backend(BackendError::InvalidToken)));
    }

    let items = client
        .fetch_posts(&FeedQuery::for_place("place-1"))
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(client.retry_metrics().circuit_breaker_trips, 0);
}

#[tokio::test]
async fn rejected_token_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = signed_in(&server)
        .fetch_tag_affinity("user-1", "place-1")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Backend(BackendError::InvalidToken)));
}

#[tokio::test]
async fn feedback_events_are_posted_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/suggestion_events"))
        .and(header("prefer", "return=minimal"))
        .and(body_partial_json(json!({
            "user_id": "user-1",
            "place_id": "place-1",
            "mode": "hungry",
            "action": "yes",
            "suggestion_id": "p1",
            "time_bucket": "evening"
        })))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = signed_in(&server)
        .record_event(&event(FeedbackAction::Yes))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Backend(BackendError::ServerError { status_code: 500 })
    ));
}

#[tokio::test]
async fn anonymous_writes_never_reach_the_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let client = anonymous(&server);
    let err = client
        .record_event(&event(FeedbackAction::Shown))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Backend(BackendError::NotAuthenticated)));

    let err = client
        .cast_vote(&"user-1".to_string(), &"p1".to_string(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Backend(BackendError::NotAuthenticated)));
}

#[tokio::test]
async fn votes_upsert_on_user_and_post() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/votes"))
        .and(query_param("on_conflict", "user_id,post_id"))
        .and(header("prefer", "resolution=merge-duplicates,return=minimal"))
        .and(body_json(json!({"user_id": "user-1", "post_id": "p9", "value": -1})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    signed_in(&server)
        .cast_vote(&"user-1".to_string(), &"p9".to_string(), -1)
        .await
        .unwrap();
}

#[tokio::test]
async fn create_post_maps_conflicts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/posts"))
        .and(header_exists("apikey"))
        .and(body_partial_json(json!({"type": "general", "topic": "outdoors"})))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate post"))
        .expect(1)
        .mount(&server)
        .await;

    let post = NewPost::validate("place-1", "user-1", None, Some("outdoors"), "Kayaks", "")
        .unwrap();
    let err = signed_in(&server).create_post(&post).await.unwrap_err();
    match err {
        CoreError::Backend(BackendError::ConstraintViolation { constraint }) => {
            assert_eq!(constraint, "duplicate post")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn password_sign_in_publishes_the_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .and(body_json(json!({"email": "ana@example.com", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "token_type": "bearer",
            "user": {"id": "user-42", "email": "ana@example.com"}
        })))
        .mount(&server)
        .await;

    let client = anonymous(&server);
    let mut changes = client.identity().subscribe();

    let session = client
        .sign_in_with_password("ana@example.com", "pw")
        .await
        .unwrap();
    assert_eq!(session.user_id, "user-42");
    assert_eq!(client.identity().access_token().as_deref(), Some("fresh-token"));

    changes.changed().await.unwrap();
    assert_eq!(changes.borrow().as_deref(), Some("user-42"));

    client.sign_out();
    assert!(!client.identity().is_signed_in());
}

#[tokio::test]
async fn bad_credentials_map_to_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let client = anonymous(&server);
    let err = client
        .sign_in_with_password("ana@example.com", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Backend(BackendError::InvalidToken)));
    assert!(!client.identity().is_signed_in());
}
