//! End-to-end flows through `EventDeskClient` with in-memory transports.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use eventdesk_client::live::{EventStream, ServerEvent};
use eventdesk_client::{
    ApiRequest, ApiResponse, ClientConfig, ClientError, CredentialState, CredentialStore,
    EventDeskClient, MemoryCredentialStore, PushSource, ResourceKey, ResourceKind, Result,
    SubscriptionState, TokenResponse, Transport,
};
use futures::StreamExt;
use futures::channel::mpsc;
use parking_lot::Mutex;
use reqwest::header::HeaderValue;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

const REFRESH: &str = "/auth/refresh-token";

/// Answers from per-route queues; the last response of a queue repeats.
///
/// Routes other than login and refresh require `valid_token`.
#[derive(Default)]
struct RouteTransport {
    valid_token: Mutex<String>,
    routes: Mutex<HashMap<(Method, String), VecDeque<ApiResponse>>>,
    calls: Mutex<Vec<(Method, String, Option<String>)>>,
}

impl RouteTransport {
    fn new(valid_token: &str) -> Self {
        Self {
            valid_token: Mutex::new(format!("Bearer {valid_token}")),
            ..Default::default()
        }
    }

    fn route(&self, method: Method, target: &str, status: StatusCode, body: Value) -> &Self {
        let body = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        self.routes
            .lock()
            .entry((method, target.to_string()))
            .or_default()
            .push_back(ApiResponse::new(status, target, body));
        self
    }

    fn calls_to(&self, target: &str) -> Vec<Option<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, t, _)| t == target)
            .map(|(_, _, auth)| auth.clone())
            .collect()
    }

    fn answer(&self, method: &Method, target: &str) -> ApiResponse {
        let mut routes = self.routes.lock();
        let Some(queue) = routes.get_mut(&(method.clone(), target.to_string())) else {
            return ApiResponse::new(StatusCode::NOT_FOUND, target, "");
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl Transport for RouteTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        authorization: Option<&HeaderValue>,
    ) -> Result<ApiResponse> {
        let auth = authorization.map(|h| h.to_str().unwrap().to_string());
        self.calls
            .lock()
            .push((request.method.clone(), request.target.clone(), auth.clone()));

        let open = request.target == "/auth/login" || request.target == REFRESH;
        if !open && auth.as_deref() != Some(self.valid_token.lock().as_str()) {
            return Ok(ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                request.target.clone(),
                r#"{"message":"token expired"}"#,
            ));
        }

        let response = self.answer(&request.method, &request.target);
        if response.is_success()
            && (request.target == "/auth/login" || request.target == REFRESH)
        {
            let token: TokenResponse = response.json().unwrap();
            *self.valid_token.lock() = format!("Bearer {}", token.access_token);
        }
        Ok(response)
    }
}

#[derive(Default)]
struct ChannelSource {
    senders: Mutex<Vec<mpsc::UnboundedSender<Result<ServerEvent>>>>,
    targets: Mutex<Vec<String>>,
}

#[async_trait]
impl PushSource for ChannelSource {
    async fn open(&self, target: &str, _authorization: HeaderValue) -> Result<EventStream> {
        self.targets.lock().push(target.to_string());
        let (tx, rx) = mpsc::unbounded();
        self.senders.lock().push(tx);
        Ok(rx.boxed())
    }
}

fn client(transport: Arc<RouteTransport>, source: Arc<ChannelSource>) -> EventDeskClient {
    EventDeskClient::with_parts(
        Arc::new(ClientConfig::default()),
        transport,
        source,
        CredentialState::new(),
    )
}

fn participant(id: i64, user_id: i64, check_in: Option<&str>) -> Value {
    json!({
        "id": id,
        "event_id": 5,
        "joined_at": "2026-03-01T08:00:00Z",
        "check_in_time": check_in,
        "user": {"id": user_id, "email": format!("user{user_id}@x.edu"), "name": "N"}
    })
}

fn check_in_event(user_id: i64, at: &str) -> ServerEvent {
    ServerEvent::new(
        "participant-checked-in",
        participant(99, user_id, Some(at)).to_string(),
    )
}

#[tokio::test]
async fn expired_token_is_refreshed_transparently() {
    let transport = Arc::new(RouteTransport::new("B"));
    transport
        .route(
            Method::POST,
            REFRESH,
            StatusCode::OK,
            json!({"access_token": "B", "token_type": "Bearer"}),
        )
        .route(
            Method::GET,
            "/events/5",
            StatusCode::OK,
            json!({"id": 5, "title": "Orientation"}),
        );

    let client = client(transport.clone(), Arc::default());
    client.credentials().set_token(&TokenResponse::bearer("A"));

    let event = client.event(5).await.unwrap();
    assert_eq!(event.title, "Orientation");

    assert_eq!(
        transport.calls_to("/events/5"),
        vec![Some("Bearer A".to_string()), Some("Bearer B".to_string())]
    );
    assert_eq!(transport.calls_to(REFRESH).len(), 1);
    assert_eq!(client.credentials().snapshot().access_token, "B");
}

#[tokio::test]
async fn failed_refresh_ends_the_session() {
    let transport = Arc::new(RouteTransport::new("never"));
    transport.route(Method::POST, REFRESH, StatusCode::UNAUTHORIZED, Value::Null);

    let client = client(transport.clone(), Arc::default());
    client.credentials().set_token(&TokenResponse::bearer("A"));

    let err = client.event(5).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert!(err.is_unauthorized());
    assert!(!client.credentials().is_authenticated());
    assert_eq!(transport.calls_to("/events/5").len(), 1);
}

#[tokio::test]
async fn login_persist_and_logout() {
    let transport = Arc::new(RouteTransport::default());
    transport
        .route(
            Method::POST,
            "/auth/login",
            StatusCode::OK,
            json!({"access_token": "A", "token_type": "Bearer", "refresh_token": "R"}),
        )
        .route(
            Method::GET,
            "/auth/auth-user",
            StatusCode::OK,
            json!({"id": 7, "email": "org@x.edu", "name": "Org", "roles": ["ADMIN"]}),
        )
        .route(
            Method::POST,
            "/auth/logout",
            StatusCode::INTERNAL_SERVER_ERROR,
            Value::Null,
        );

    let client = client(transport.clone(), Arc::default());
    let store = Arc::new(MemoryCredentialStore::new());
    let cancel = CancellationToken::new();
    let persistence = client.persist_credentials(store.clone(), cancel.clone());

    let user = client.login("org@x.edu", "pw").await.unwrap();
    assert_eq!(user.id, 7);
    assert_eq!(client.credentials().snapshot().user.unwrap().email, "org@x.edu");

    let saved = wait_for_store(&store, |c| c.is_some_and(|c| c.user.is_some())).await;
    let saved = serde_json::to_value(saved.unwrap()).unwrap();
    assert_eq!(saved["access_token"], "A");
    assert!(saved.get("refresh_token").is_none());

    // The server failing to log out still clears everything locally.
    let _events = client
        .cache()
        .retain(ResourceKey::new(ResourceKind::Events, 5));
    client
        .cache()
        .merge(&ResourceKey::new(ResourceKind::Events, 5), json!({"id": 5}));
    assert!(client.logout().await.is_err());
    assert!(!client.credentials().is_authenticated());
    assert!(!client.cache().contains(&ResourceKey::new(ResourceKind::Events, 5)));
    assert!(wait_for_store(&store, |c| c.is_none()).await.is_none());

    cancel.cancel();
    persistence.await.unwrap();
}

#[tokio::test]
async fn restored_credential_is_used() {
    let transport = Arc::new(RouteTransport::new("A"));
    transport.route(
        Method::GET,
        "/events/5",
        StatusCode::OK,
        json!({"id": 5, "title": "Orientation"}),
    );
    let client = client(transport.clone(), Arc::default());

    let store = MemoryCredentialStore::new();
    store
        .save(&eventdesk_client::PersistedCredential {
            access_token: "A".to_string(),
            token_type: "Bearer".to_string(),
            user: None,
        })
        .await
        .unwrap();

    assert!(client.restore_credentials(&store).await.unwrap());
    client.event(5).await.unwrap();
    assert!(transport.calls_to(REFRESH).is_empty());
}

#[tokio::test]
async fn watched_participants_receive_live_check_ins() {
    let transport = Arc::new(RouteTransport::new("A"));
    transport.route(
        Method::GET,
        "/attendants/5",
        StatusCode::OK,
        json!([participant(1, 7, None), participant(2, 8, None)]),
    );
    let source = Arc::new(ChannelSource::default());
    let client = client(transport, source.clone());
    client.credentials().set_token(&TokenResponse::bearer("A"));

    let key = ResourceKey::new(ResourceKind::Attendants, 5);
    let mut cache_events = client.cache().subscribe();

    let watch = client.watch_participants(5).await.unwrap();
    let subscription = watch.subscription().unwrap();
    assert_eq!(subscription.ready().await, SubscriptionState::Streaming);
    assert_eq!(*source.targets.lock(), vec!["/attendants/subscribe/5"]);

    // Initial load.
    cache_events.recv().await.unwrap();

    let tx = source.senders.lock()[0].clone();
    tx.unbounded_send(Ok(ServerEvent::new("INIT", "connected")))
        .unwrap();
    tx.unbounded_send(Ok(check_in_event(999, "2026-03-01T09:00:00Z")))
        .unwrap();
    tx.unbounded_send(Ok(check_in_event(7, "2026-03-01T09:15:00Z")))
        .unwrap();
    cache_events.recv().await.unwrap();

    let participants = watch.participants().unwrap();
    assert_eq!(participants.len(), 2);
    assert!(participants[0].is_checked_in());
    assert_eq!(participants[0].id, 1);
    assert!(!participants[1].is_checked_in());

    let mut state = watch.subscription().unwrap().watch_state();
    drop(watch);
    assert_eq!(
        *state.wait_for(SubscriptionState::is_closed).await.unwrap(),
        SubscriptionState::ClosedByTeardown
    );
    assert_eq!(client.cache().ref_count(&key), 0);
    assert!(!client.live().is_active(&key));
}

#[tokio::test]
async fn mutation_reloads_watched_participants() {
    let transport = Arc::new(RouteTransport::new("A"));
    transport
        .route(
            Method::GET,
            "/attendants/5",
            StatusCode::OK,
            json!([participant(1, 7, None), participant(2, 8, None)]),
        )
        .route(
            Method::GET,
            "/attendants/5",
            StatusCode::OK,
            json!([participant(1, 7, None)]),
        )
        .route(
            Method::DELETE,
            "/attendants/5/8",
            StatusCode::OK,
            json!({"message": "removed"}),
        );
    let client = client(transport.clone(), Arc::default());
    client.credentials().set_token(&TokenResponse::bearer("A"));

    let watch = client.watch_participants(5).await.unwrap();
    assert_eq!(watch.participants().unwrap().len(), 2);

    client.delete_participant(5, 8).await.unwrap();
    assert_eq!(watch.participants().unwrap().len(), 1);
    assert_eq!(transport.calls_to("/attendants/5").len(), 2);
}

#[tokio::test]
async fn watch_without_credential_has_no_live_updates() {
    let transport = Arc::new(RouteTransport::new("A"));
    let source = Arc::new(ChannelSource::default());
    let client = client(transport, source.clone());

    let err = client.watch_participants(5).await.unwrap_err();
    assert!(matches!(err, ClientError::HttpStatus { .. }));
    assert!(source.targets.lock().is_empty());
    assert_eq!(
        client
            .cache()
            .ref_count(&ResourceKey::new(ResourceKind::Attendants, 5)),
        0
    );
}

async fn wait_for_store<F>(
    store: &MemoryCredentialStore,
    done: F,
) -> Option<eventdesk_client::PersistedCredential>
where
    F: Fn(Option<&eventdesk_client::PersistedCredential>) -> bool,
{
    for _ in 0..100 {
        let current = store.current();
        if done(current.as_ref()) {
            return current;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    store.current()
}
