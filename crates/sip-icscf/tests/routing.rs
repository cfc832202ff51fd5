// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end I-CSCF routing through the transaction host.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sip_appserver::{AppServerHost, ForkId, TransactionId, TsxEvent, TsxOutput};
use sip_core::{Headers, Method, Request, RequestLine, Response, SipUri, StatusCode, Uri};
use sip_icscf::{
    Candidate, ConfigError, DirectoryAnswer, DirectoryError, IcscfAppServer, IcscfConfig,
    IcscfContext, InMemoryDirectory, NodeIdentity, QueryClass, ScscfPool, Subscriber,
};
use tokio::{sync::mpsc, time};

const CALLEE: &str = "sip:6505551234@homedomain";
const CALLER: &str = "sip:6505551000@homedomain";
const SCSCF1: &str = "sip:scscf1.homedomain:5058;transport=TCP";
const SCSCF2: &str = "sip:scscf2.homedomain:5058;transport=TCP";
const SCSCF3: &str = "sip:scscf3.homedomain:5058;transport=TCP";

fn pool() -> ScscfPool {
    ScscfPool::new(vec![
        Candidate::new(SipUri::parse(SCSCF1).unwrap(), 0, [123, 345, 432]),
        Candidate::new(SipUri::parse(SCSCF2).unwrap(), 0, [123, 432, 654]),
        Candidate::new(SipUri::parse(SCSCF3).unwrap(), 0, [567]),
    ])
}

struct Harness {
    host: AppServerHost,
    rx: mpsc::UnboundedReceiver<TsxOutput>,
    directory: Arc<InMemoryDirectory>,
}

fn harness(max_attempts: usize) -> Harness {
    let directory = Arc::new(InMemoryDirectory::new());
    let config = IcscfConfig::new(NodeIdentity::new("homedomain", 5052))
        .with_max_attempts(max_attempts);
    let adapter_config = config.adapter_config();
    let ctx = IcscfContext::new(config, directory.clone(), pool());
    let app = IcscfAppServer::new(ctx).unwrap();
    let (host, rx) = AppServerHost::new(Arc::new(app), adapter_config);
    Harness {
        host,
        rx,
        directory,
    }
}

fn request(method: Method, uri: &str, extra: &[(&str, &str)]) -> Request {
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/TCP 10.114.61.213:5081;branch=z9hG4bK1234");
    headers.push("From", format!("<{}>;tag=10.114.61.213+1+8c8b232a", CALLER));
    headers.push("Call-ID", "0gQAAC8WAAACBAAALxYAAAL8P3UbW8l4mT8YBkKGRKc5SOHaJ1gMRqs");
    headers.push("CSeq", format!("1 {}", method.as_str()));
    for (name, value) in extra {
        headers.push(*name, *value);
    }
    if headers.get("To").is_none() {
        headers.push("To", format!("<{}>", CALLEE));
    }
    Request::new(
        RequestLine::new(method, Uri::parse(uri).unwrap()),
        headers,
        Bytes::new(),
    )
    .unwrap()
}

fn terminating_invite() -> Request {
    request(
        Method::Invite,
        CALLEE,
        &[("Route", "<sip:homedomain:5052;lr>")],
    )
}

impl Harness {
    async fn next_output(&mut self) -> TsxOutput {
        time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for output")
            .expect("output channel closed")
    }

    async fn expect_forward(&mut self) -> (ForkId, Request) {
        match self.next_output().await {
            TsxOutput::Request { fork, request, .. } => (fork, request),
            other => panic!("expected forwarded request, got {other:?}"),
        }
    }

    async fn expect_response(&mut self) -> Response {
        match self.next_output().await {
            TsxOutput::Response { response, .. } => response,
            other => panic!("expected upstream response, got {other:?}"),
        }
    }

    async fn expect_quiet(&mut self) {
        if let Ok(Some(output)) = time::timeout(Duration::from_millis(100), self.rx.recv()).await {
            panic!("unexpected output {output:?}");
        }
    }

    fn respond(&self, tsx: TransactionId, fork: ForkId, forwarded: &Request, code: u16) {
        let response = Response::for_request(forwarded, StatusCode::new(code).unwrap());
        self.host
            .deliver(tsx, TsxEvent::Response { fork, response })
            .unwrap();
    }

    fn start(&self, request: Request) -> TransactionId {
        self.host.handle_request(request).unwrap().unwrap()
    }
}

fn top_route(request: &Request) -> Option<String> {
    request.headers().get("Route").map(|v| v.to_string())
}

fn route_values(request: &Request) -> Vec<String> {
    request
        .headers()
        .get_all("Route")
        .map(|v| v.to_string())
        .collect()
}

#[tokio::test]
async fn named_server_success_is_relayed_without_retry() {
    let mut h = harness(3);
    h.directory
        .set_answer(CALLEE, QueryClass::Registration, DirectoryAnswer::named(SCSCF1));

    let tsx = h.start(terminating_invite());
    let (fork, forwarded) = h.expect_forward().await;
    assert_eq!(
        top_route(&forwarded).as_deref(),
        Some("<sip:scscf1.homedomain:5058;transport=TCP;lr>")
    );
    assert_eq!(forwarded.uri().to_string(), CALLEE);

    h.respond(tsx, fork, &forwarded, 180);
    assert_eq!(h.expect_response().await.code(), 180);
    h.respond(tsx, fork, &forwarded, 200);
    assert_eq!(h.expect_response().await.code(), 200);
    h.expect_quiet().await;

    let queries = h.directory.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].class, QueryClass::Registration);
    assert_eq!(
        queries[0].subscriber,
        Subscriber::Location {
            impu: CALLEE.into(),
            originating: false,
        }
    );
}

#[tokio::test]
async fn retryable_failure_moves_to_the_one_untried_capable_server() {
    let mut h = harness(3);
    h.directory
        .set_answer(CALLEE, QueryClass::Registration, DirectoryAnswer::named(SCSCF1));
    // The capabilities answer names scscf1 again; that name must not be reused.
    h.directory.set_json(
        CALLEE,
        QueryClass::Capabilities,
        &format!(
            r#"{{"result-code": 2001, "scscf": "{}", "mandatory-capabilities": [123, 432], "optional-capabilities": []}}"#,
            SCSCF1
        ),
    );

    let tsx = h.start(terminating_invite());
    let (fork, forwarded) = h.expect_forward().await;
    h.respond(tsx, fork, &forwarded, 503);

    let (retry_fork, retried) = h.expect_forward().await;
    assert_ne!(retry_fork, fork);
    assert_eq!(
        top_route(&retried).as_deref(),
        Some("<sip:scscf2.homedomain:5058;transport=TCP;lr>")
    );
    h.respond(tsx, retry_fork, &retried, 200);
    assert_eq!(h.expect_response().await.code(), 200);
    h.expect_quiet().await;
}

#[tokio::test]
async fn no_capable_server_on_first_attempt_is_busy_everywhere() {
    let mut h = harness(3);
    h.directory.set_answer(
        CALLEE,
        QueryClass::Registration,
        DirectoryAnswer::capabilities([999], []),
    );

    h.start(terminating_invite());
    assert_eq!(h.expect_response().await.code(), 600);
    h.expect_quiet().await;
}

#[tokio::test]
async fn exhausting_capable_servers_times_out() {
    let mut h = harness(3);
    h.directory.set_answer(
        CALLEE,
        QueryClass::Registration,
        DirectoryAnswer::capabilities([432], [654]),
    );

    let tsx = h.start(terminating_invite());
    let mut targets = Vec::new();
    for _ in 0..2 {
        let (fork, forwarded) = h.expect_forward().await;
        targets.push(top_route(&forwarded).unwrap());
        h.respond(tsx, fork, &forwarded, 503);
    }
    assert_eq!(h.expect_response().await.code(), 504);
    h.expect_quiet().await;
    assert_eq!(
        targets,
        vec![
            "<sip:scscf2.homedomain:5058;transport=TCP;lr>",
            "<sip:scscf1.homedomain:5058;transport=TCP;lr>",
        ]
    );
}

#[tokio::test]
async fn attempt_cap_stops_retries() {
    let mut h = harness(2);
    h.directory.set_answer(
        CALLEE,
        QueryClass::Registration,
        DirectoryAnswer::capabilities([], []),
    );

    let tsx = h.start(terminating_invite());
    for _ in 0..2 {
        let (fork, _) = h.expect_forward().await;
        h.host.deliver(tsx, TsxEvent::Timeout { fork }).unwrap();
    }
    assert_eq!(h.expect_response().await.code(), 504);
    h.expect_quiet().await;
}

#[tokio::test]
async fn named_server_pointing_here_is_a_loop() {
    let mut h = harness(3);
    h.directory.set_answer(
        CALLEE,
        QueryClass::Registration,
        DirectoryAnswer::named("sip:homedomain:5052;transport=TCP"),
    );

    h.start(terminating_invite());
    assert_eq!(h.expect_response().await.code(), 482);
    h.expect_quiet().await;
}

#[tokio::test]
async fn auth_challenge_is_relayed_verbatim() {
    let mut h = harness(3);
    let register = request(
        Method::Register,
        "sip:homedomain",
        &[
            ("To", "<sip:6505550001@homedomain>"),
            ("Contact", "<sip:6505550001@10.83.18.38:36530;transport=TCP>"),
            ("Authorization", "Digest username=\"6505550001@homedomain\", realm=\"homedomain\""),
        ],
    );
    h.directory.set_answer(
        "sip:6505550001@homedomain",
        QueryClass::Registration,
        DirectoryAnswer::named(SCSCF1),
    );

    let tsx = h.start(register);
    let (fork, forwarded) = h.expect_forward().await;
    assert_eq!(forwarded.uri().to_string(), SCSCF1);
    assert!(top_route(&forwarded).is_none());

    let mut challenge = Response::for_request(&forwarded, StatusCode::new(401).unwrap());
    challenge
        .headers_mut()
        .push("WWW-Authenticate", "Digest realm=\"homedomain\", nonce=\"abc\"");
    h.host
        .deliver(tsx, TsxEvent::Response { fork, response: challenge })
        .unwrap();

    let relayed = h.expect_response().await;
    assert_eq!(relayed.code(), 401);
    assert_eq!(
        relayed.headers().get("WWW-Authenticate").map(|v| v.as_str()),
        Some("Digest realm=\"homedomain\", nonce=\"abc\"")
    );
    h.expect_quiet().await;

    let queries = h.directory.queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0]
        .path()
        .starts_with("/impi/6505550001%40homedomain/registration-status?impu="));
}

#[tokio::test]
async fn register_retries_on_temporarily_unavailable() {
    let mut h = harness(3);
    let register = request(
        Method::Register,
        "sip:homedomain",
        &[("To", "<sip:6505550001@homedomain>")],
    );
    h.directory.set_answer(
        "sip:6505550001@homedomain",
        QueryClass::Registration,
        DirectoryAnswer::named(SCSCF3),
    );
    h.directory.set_answer(
        "sip:6505550001@homedomain",
        QueryClass::Capabilities,
        DirectoryAnswer::capabilities([123], [345]),
    );

    let tsx = h.start(register);
    let (fork, forwarded) = h.expect_forward().await;
    h.respond(tsx, fork, &forwarded, 480);
    let (fork, forwarded) = h.expect_forward().await;
    assert_eq!(forwarded.uri().to_string(), SCSCF1);
    h.respond(tsx, fork, &forwarded, 200);
    assert_eq!(h.expect_response().await.code(), 200);
}

#[tokio::test]
async fn captured_routes_are_replayed_on_every_attempt() {
    let mut h = harness(3);
    let register = request(
        Method::Register,
        "sip:homedomain",
        &[
            ("Route", "<sip:homedomain:5052;lr>"),
            ("Route", "<sip:edge.other.net;lr>"),
            ("To", "<sip:6505550001@homedomain>"),
        ],
    );
    h.directory.set_answer(
        "sip:6505550001@homedomain",
        QueryClass::Registration,
        DirectoryAnswer::named(SCSCF3),
    );
    h.directory.set_answer(
        "sip:6505550001@homedomain",
        QueryClass::Capabilities,
        DirectoryAnswer::capabilities([123], [345]),
    );

    let tsx = h.start(register);
    let mut attempts = Vec::new();
    let (fork, forwarded) = h.expect_forward().await;
    attempts.push((forwarded.uri().to_string(), route_values(&forwarded)));
    h.respond(tsx, fork, &forwarded, 480);
    let (fork, forwarded) = h.expect_forward().await;
    attempts.push((forwarded.uri().to_string(), route_values(&forwarded)));
    h.respond(tsx, fork, &forwarded, 200);
    assert_eq!(h.expect_response().await.code(), 200);
    h.expect_quiet().await;

    let edge = vec!["<sip:edge.other.net;lr>".to_string()];
    assert_eq!(
        attempts,
        vec![(SCSCF3.to_string(), edge.clone()), (SCSCF1.to_string(), edge)]
    );
}

#[tokio::test]
async fn closed_transport_still_ends_the_transaction() {
    let Harness {
        host,
        rx,
        directory,
    } = harness(3);
    directory.set_answer(CALLEE, QueryClass::Registration, DirectoryAnswer::named(SCSCF1));
    drop(rx);

    // The forward fails as 503, and the retry finds no capabilities entry.
    host.handle_request(terminating_invite()).unwrap().unwrap();
    for _ in 0..100 {
        if host.active_transactions() == 0 {
            break;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(host.active_transactions(), 0);
    let classes: Vec<QueryClass> = directory.queries().iter().map(|q| q.class).collect();
    assert_eq!(classes, vec![QueryClass::Registration, QueryClass::Capabilities]);
}

#[tokio::test]
async fn zero_attempt_budget_is_rejected() {
    let config = IcscfConfig::new(NodeIdentity::new("homedomain", 5052)).with_max_attempts(0);
    let ctx = IcscfContext::new(config, Arc::new(InMemoryDirectory::new()), pool());
    assert!(matches!(
        IcscfAppServer::new(ctx),
        Err(ConfigError::InvalidMaxAttempts(0))
    ));
}

#[tokio::test]
async fn session_does_not_retry_temporarily_unavailable() {
    let mut h = harness(3);
    h.directory
        .set_answer(CALLEE, QueryClass::Registration, DirectoryAnswer::named(SCSCF1));

    let tsx = h.start(terminating_invite());
    let (fork, forwarded) = h.expect_forward().await;
    h.respond(tsx, fork, &forwarded, 480);
    assert_eq!(h.expect_response().await.code(), 480);
    h.expect_quiet().await;
    assert_eq!(h.directory.queries().len(), 1);
}

#[tokio::test]
async fn originating_request_uses_served_user_and_orig_route() {
    let mut h = harness(3);
    let invite = request(
        Method::Invite,
        CALLEE,
        &[
            ("Route", "<sip:homedomain:5052;lr;orig>"),
            ("P-Served-User", "<sip:6505551000@homedomain>;sescase=orig"),
        ],
    );
    h.directory
        .set_answer(CALLER, QueryClass::Registration, DirectoryAnswer::named(SCSCF2));

    let tsx = h.start(invite);
    let (fork, forwarded) = h.expect_forward().await;
    assert_eq!(
        top_route(&forwarded).as_deref(),
        Some("<sip:scscf2.homedomain:5058;transport=TCP;lr;orig>")
    );
    assert_eq!(
        h.directory.queries()[0].path(),
        "/impu/sip%3A6505551000%40homedomain/location?originating=true"
    );
    h.respond(tsx, fork, &forwarded, 200);
    assert_eq!(h.expect_response().await.code(), 200);
}

#[tokio::test]
async fn directory_failures_map_to_final_responses() {
    for (error, expected) in [
        (DirectoryError::NotFound, 404),
        (DirectoryError::Forbidden, 403),
        (DirectoryError::NoUnregisteredService, 480),
        (DirectoryError::Unavailable("connection refused".into()), 480),
        (DirectoryError::Rejected(5012), 480),
    ] {
        let mut h = harness(3);
        h.directory
            .set_error(CALLEE, QueryClass::Registration, error);
        h.start(terminating_invite());
        assert_eq!(h.expect_response().await.code(), expected);
        h.expect_quiet().await;
    }
}

#[tokio::test]
async fn invalid_named_servers_are_temporarily_unavailable() {
    for name in ["tel:+16505551234", "sips:scscf1.homedomain", "sip:"] {
        let mut h = harness(3);
        h.directory
            .set_answer(CALLEE, QueryClass::Registration, DirectoryAnswer::named(name));
        h.start(terminating_invite());
        assert_eq!(h.expect_response().await.code(), 480, "{}", name);
        h.expect_quiet().await;
    }
}

#[tokio::test]
async fn pre_routed_session_skips_the_directory() {
    let mut h = harness(3);
    let invite = request(
        Method::Invite,
        CALLEE,
        &[
            ("Route", "<sip:homedomain:5052;lr>"),
            ("Route", "<sip:bgcf.homedomain:5058;lr>"),
        ],
    );

    let tsx = h.start(invite);
    let (fork, forwarded) = h.expect_forward().await;
    assert_eq!(top_route(&forwarded).as_deref(), Some("<sip:bgcf.homedomain:5058;lr>"));
    h.respond(tsx, fork, &forwarded, 503);
    assert_eq!(h.expect_response().await.code(), 503);
    assert!(h.directory.queries().is_empty());
}

#[tokio::test]
async fn cancelled_transaction_is_not_retried() {
    let mut h = harness(3);
    h.directory
        .set_answer(CALLEE, QueryClass::Registration, DirectoryAnswer::named(SCSCF1));
    h.directory.set_answer(
        CALLEE,
        QueryClass::Capabilities,
        DirectoryAnswer::capabilities([], []),
    );

    let tsx = h.start(terminating_invite());
    let (fork, forwarded) = h.expect_forward().await;
    h.host
        .cancel(tsx, StatusCode::REQUEST_TERMINATED, None)
        .unwrap();
    match h.next_output().await {
        TsxOutput::Cancel { fork: cancelled, .. } => assert_eq!(cancelled, fork),
        other => panic!("expected cancel, got {other:?}"),
    }
    h.respond(tsx, fork, &forwarded, 503);
    assert_eq!(h.expect_response().await.code(), 503);
    h.expect_quiet().await;
}

#[tokio::test]
async fn missing_identity_is_a_bad_request() {
    let mut h = harness(3);
    let mut register = request(Method::Register, "sip:homedomain", &[]);
    register.headers_mut().remove_all("To");
    h.start(register);
    assert_eq!(h.expect_response().await.code(), 400);
}
