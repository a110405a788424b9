//! End-to-end checks through the full filter chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};

use palisade_auth::issuer::IssuerRegistry;
use palisade_auth::validator::TokenValidator;
use palisade_core::config::{EnforcerConfig, IssuerConfig};
use palisade_core::store::SubscriptionStore;
use palisade_core::store::models::{
    Api, Application, ApplicationKeyMapping, PolicySpec, ResourceMeta, Subscription,
    SubscriptionPolicy,
};
use palisade_core::types::TierName;
use palisade_gateway::check::CheckRequest;
use palisade_gateway::context::EnforcerContext;
use palisade_throttle::data::ThrottleDataHolder;
use palisade_throttle::event::ThrottleEvent;
use palisade_throttle::publish::EventSink;

const ISSUER: &str = "https://sts.example.com/oauth2/token";

#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<ThrottleEvent>>,
}

impl EventSink for CollectingSink {
    fn publish(&self, event: ThrottleEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn fake_token(claims: &Value) -> String {
    let header = json!({"alg": "RS256", "typ": "JWT", "kid": "test-key"});
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap()),
        URL_SAFE_NO_PAD.encode(b"not-a-real-signature")
    )
}

fn claims(subject: &str, ttl_secs: i64, scope: Option<&str>) -> Value {
    let mut claims = json!({
        "iss": ISSUER,
        "sub": subject,
        "jti": format!("jti-{subject}-{ttl_secs}-{}", scope.unwrap_or("none")),
        "exp": chrono::Utc::now().timestamp() + ttl_secs,
        "azp": "consumer-key-1",
    });
    if let Some(scope) = scope {
        claims["scope"] = json!(scope);
    }
    claims
}

fn resource(path: &str, method: &str, scopes: &[&str]) -> ResourceMeta {
    ResourceMeta {
        path: path.to_string(),
        method: method.to_string(),
        tier: Some(TierName::new("Bronze")),
        scopes: scopes.iter().map(ToString::to_string).collect(),
        disable_security: false,
        policies: vec![],
    }
}

fn seeded_store() -> Arc<SubscriptionStore> {
    let store = SubscriptionStore::new();

    let mut tagged = resource("/pets", "GET", &[]);
    tagged.policies = vec![PolicySpec {
        action: "SET_HEADER".to_string(),
        params: [
            ("headerName".to_string(), "x-gateway".to_string()),
            ("headerValue".to_string(), "palisade".to_string()),
        ]
        .into_iter()
        .collect(),
    }];

    store.upsert_api(Api {
        uuid: "api-1".to_string(),
        name: "PetStore".to_string(),
        version: "1.0.0".to_string(),
        context: "/petstore".to_string(),
        tier: None,
        lifecycle_state: "PUBLISHED".to_string(),
        organization: String::new(),
        resources: vec![
            tagged,
            resource("/pets", "POST", &["write:pets"]),
            resource("/pets/{id}", "DELETE", &["admin:pets"]),
        ],
    });
    // A published API the application is not subscribed to.
    store.upsert_api(Api {
        uuid: "api-2".to_string(),
        name: "Orders".to_string(),
        version: "1.0.0".to_string(),
        context: "/orders".to_string(),
        tier: None,
        lifecycle_state: "PUBLISHED".to_string(),
        organization: String::new(),
        resources: vec![resource("/orders", "GET", &[])],
    });

    store.upsert_key_mapping(ApplicationKeyMapping {
        consumer_key: "consumer-key-1".to_string(),
        key_manager: "Resident Key Manager".to_string(),
        key_type: "PRODUCTION".to_string(),
        app_uuid: "app-1".to_string(),
    });
    store.upsert_application(Application {
        uuid: "app-1".to_string(),
        name: "ShopApp".to_string(),
        owner: "alice".to_string(),
        policy: "50PerMin".to_string(),
        tenant_domain: String::new(),
    });
    store.upsert_subscription(Subscription {
        uuid: "sub-1".to_string(),
        api_uuid: "api-1".to_string(),
        app_uuid: "app-1".to_string(),
        policy: "Gold".to_string(),
        state: "ACTIVE".to_string(),
    });
    store.upsert_subscription_policy(SubscriptionPolicy {
        name: "Gold".to_string(),
        stop_on_quota_reach: true,
        rate_limit: 0,
    });
    Arc::new(store)
}

struct Harness {
    context: EnforcerContext,
    sink: Arc<CollectingSink>,
    throttle_data: Arc<ThrottleDataHolder>,
}

fn harness(soap_enabled: bool) -> Harness {
    let mut config = EnforcerConfig::default();
    config.deny.soap_enabled = soap_enabled;
    config.auth.issuers = vec![IssuerConfig {
        name: "Resident Key Manager".to_string(),
        issuer: ISSUER.to_string(),
        certificate: None,
        // Unroutable; the trusting validator never fetches it.
        jwks_url: Some("http://127.0.0.1:1/jwks".to_string()),
        algorithms: vec!["RS256".to_string()],
        validate_subscriptions: true,
        internal: false,
    }];

    let registry = Arc::new(IssuerRegistry::from_config(&config.auth).unwrap());
    let validator = Arc::new(TokenValidator::trusting(registry, 5));
    let sink = Arc::new(CollectingSink::default());
    let throttle_data = Arc::new(ThrottleDataHolder::new());

    let context = EnforcerContext::builder(config)
        .with_store(seeded_store())
        .with_validator(validator)
        .with_event_sink(Arc::clone(&sink) as Arc<dyn EventSink>)
        .with_throttle_data(Arc::clone(&throttle_data))
        .build()
        .unwrap();

    Harness {
        context,
        sink,
        throttle_data,
    }
}

fn request(method: &str, path: &str, context: &str, headers: Vec<(&str, &str)>) -> CheckRequest {
    CheckRequest {
        request_id: Some("req-1".to_string()),
        method: method.to_string(),
        path: path.to_string(),
        headers: headers
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        query_params: HashMap::new(),
        client_address: Some("203.0.113.9:40000".to_string()),
        api_context: context.to_string(),
        api_version: "1.0.0".to_string(),
        body: None,
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[tokio::test]
async fn missing_credentials_is_401_with_code() {
    let harness = harness(false);
    let response = harness
        .context
        .check(request("GET", "/petstore/1.0.0/pets", "/petstore", vec![]))
        .await;

    assert_eq!(response.result, "deny");
    assert_eq!(response.status, "UNAUTHENTICATED");
    assert_eq!(response.status_code, 401);

    let body: Value = serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["errorCode"], "900902");
    assert_eq!(response.content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn valid_token_is_allowed_and_publishes_one_event() {
    let harness = harness(false);
    let token = fake_token(&claims("alice", 3600, None));
    let response = harness
        .context
        .check(request(
            "GET",
            "/petstore/1.0.0/pets",
            "/petstore",
            vec![("Authorization", &bearer(&token))],
        ))
        .await;

    assert_eq!(response.result, "allow");
    assert_eq!(response.status, "OK");
    // The mediation policy on the resource ran.
    assert!(response
        .headers_to_add
        .iter()
        .any(|h| h.name == "x-gateway" && h.value == "palisade"));

    let events = harness.sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].api_key, "/petstore:1.0.0");
    assert_eq!(events[0].app_key, "app-1:alice@carbon.super");
}

#[tokio::test]
async fn expired_token_hits_negative_cache_on_repeat() {
    let harness = harness(false);
    let token = fake_token(&claims("alice", -600, None));
    let req = || {
        request(
            "GET",
            "/petstore/1.0.0/pets",
            "/petstore",
            vec![("Authorization", &bearer(&token))],
        )
    };

    let response = harness.context.check(req()).await;
    assert_eq!(response.status_code, 401);
    let body: Value = serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["errorCode"], "900903");
    assert_eq!(harness.context.authenticator().signature_checks(), 1);

    let response = harness.context.check(req()).await;
    assert_eq!(response.status_code, 401);
    // Second identical call is served from the negative cache.
    assert_eq!(harness.context.authenticator().signature_checks(), 1);
}

#[tokio::test]
async fn unsubscribed_api_is_403_subscription_inactive() {
    let harness = harness(false);
    let token = fake_token(&claims("alice", 3600, None));
    let response = harness
        .context
        .check(request(
            "GET",
            "/orders/1.0.0/orders",
            "/orders",
            vec![("Authorization", &bearer(&token))],
        ))
        .await;

    assert_eq!(response.status, "PERMISSION_DENIED");
    assert_eq!(response.status_code, 403);
    let body: Value = serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["errorCode"], "900909");
}

#[tokio::test]
async fn scope_scenario_matches_and_rejects() {
    let harness = harness(false);
    let token = fake_token(&claims("alice", 3600, Some("write:pets")));

    // write:pets token on a write:pets resource.
    let response = harness
        .context
        .check(request(
            "POST",
            "/petstore/1.0.0/pets",
            "/petstore",
            vec![("Authorization", &bearer(&token))],
        ))
        .await;
    assert_eq!(response.result, "allow");

    // The same token on an admin:pets resource.
    let response = harness
        .context
        .check(request(
            "DELETE",
            "/petstore/1.0.0/pets/42",
            "/petstore",
            vec![("Authorization", &bearer(&token))],
        ))
        .await;
    assert_eq!(response.status_code, 403);
    let body: Value = serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["errorCode"], "900910");
}

#[tokio::test]
async fn throttled_subscription_is_429_with_retry_after() {
    let harness = harness(false);
    harness.throttle_data.add_decision(
        "app-1:/petstore:1.0.0",
        chrono::Utc::now().timestamp_millis() + 30_000,
    );
    let token = fake_token(&claims("alice", 3600, None));
    let response = harness
        .context
        .check(request(
            "GET",
            "/petstore/1.0.0/pets",
            "/petstore",
            vec![("Authorization", &bearer(&token))],
        ))
        .await;

    assert_eq!(response.status, "RESOURCE_EXHAUSTED");
    assert_eq!(response.status_code, 429);
    let body: Value = serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["errorCode"], "900804");
    assert!(response.headers_to_add.iter().any(|h| h.name == "retry-after"));
    assert!(harness.sink.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn soap11_request_gets_a_soap_fault() {
    let harness = harness(true);
    let response = harness
        .context
        .check(request(
            "POST",
            "/petstore/1.0.0/pets",
            "/petstore",
            vec![
                ("Content-Type", "text/xml"),
                ("SOAPAction", "urn:addPet"),
            ],
        ))
        .await;

    assert_eq!(response.status_code, 401);
    assert_eq!(response.content_type.as_deref(), Some("text/xml"));
    let body = response.body.unwrap();
    assert!(body.contains("<soapenv:Fault>"));
    assert!(body.contains("http://schemas.xmlsoap.org/soap/envelope/"));
}

#[tokio::test]
async fn soap_disabled_keeps_denials_json() {
    let harness = harness(false);
    let response = harness
        .context
        .check(request(
            "POST",
            "/petstore/1.0.0/pets",
            "/petstore",
            vec![
                ("Content-Type", "text/xml"),
                ("SOAPAction", "urn:addPet"),
            ],
        ))
        .await;

    assert_eq!(response.content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn unknown_api_is_404() {
    let harness = harness(false);
    let response = harness
        .context
        .check(request("GET", "/nowhere/1.0.0/x", "/nowhere", vec![]))
        .await;

    assert_eq!(response.status, "NOT_FOUND");
    assert_eq!(response.status_code, 404);
    let body: Value = serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["errorCode"], "900906");
}

#[tokio::test]
async fn unknown_resource_is_404() {
    let harness = harness(false);
    let token = fake_token(&claims("alice", 3600, None));
    let response = harness
        .context
        .check(request(
            "PATCH",
            "/petstore/1.0.0/pets",
            "/petstore",
            vec![("Authorization", &bearer(&token))],
        ))
        .await;
    assert_eq!(response.status_code, 404);
}

#[tokio::test]
async fn cors_preflight_is_answered_directly() {
    let harness = harness(false);
    let response = harness
        .context
        .check(request(
            "OPTIONS",
            "/petstore/1.0.0/pets",
            "/petstore",
            vec![
                ("Origin", "https://app.example.com"),
                ("Access-Control-Request-Method", "GET"),
            ],
        ))
        .await;

    assert_eq!(response.result, "deny");
    assert_eq!(response.status, "OK");
    assert_eq!(response.status_code, 200);
    assert!(response.body.is_none());
    assert!(response
        .headers_to_add
        .iter()
        .any(|h| h.name == "access-control-allow-methods"));
}
