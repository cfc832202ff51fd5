// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sip_appserver::{
    AdapterConfig, AppServer, AppServerHost, AppServerTsx, ForkId, TimerContext, TsxError,
    TsxEvent, TsxHelper, TsxOutput,
};
use sip_core::{
    Headers, Method, Request, RequestLine, Response, RouteHeader, SipUri, StatusCode, Uri,
};
use tokio::{sync::mpsc, time};

fn config() -> AdapterConfig {
    AdapterConfig::new(SipUri::parse("sip:icscf.homedomain:5052").unwrap())
        .with_cancel_guard(Duration::from_millis(50))
}

fn request(method: Method, uri: &str, extra: &[(&str, &str)]) -> Request {
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/TCP 10.83.18.38:36530;branch=z9hG4bKPjmo1aimuq33BAI4rjhgQgBr4sY5e9kSPI");
    headers.push("From", "<sip:6505551000@homedomain>;tag=10.114.61.213+1+8c8b232a+5fb751cf");
    headers.push("Call-ID", "0gQAAC8WAAACBAAALxYAAAL8P3UbW8l4mT8YBkKGRKc5SOHaJ1gMRqs");
    headers.push("CSeq", format!("16567 {}", method.as_str()));
    let mut has_to = false;
    for (name, value) in extra {
        has_to |= name.eq_ignore_ascii_case("To");
        headers.push(*name, *value);
    }
    if !has_to {
        headers.push("To", "<sip:6505551234@homedomain>");
    }
    Request::new(
        RequestLine::new(method, Uri::parse(uri).unwrap()),
        headers,
        Bytes::new(),
    )
    .unwrap()
}

async fn next_output(rx: &mut mpsc::UnboundedReceiver<TsxOutput>) -> TsxOutput {
    time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for output")
        .expect("output channel closed")
}

async fn expect_forward(rx: &mut mpsc::UnboundedReceiver<TsxOutput>) -> (ForkId, Request) {
    match next_output(rx).await {
        TsxOutput::Request { fork, request, .. } => (fork, request),
        other => panic!("expected forwarded request, got {other:?}"),
    }
}

async fn expect_response(rx: &mut mpsc::UnboundedReceiver<TsxOutput>) -> Response {
    match next_output(rx).await {
        TsxOutput::Response { response, .. } => response,
        other => panic!("expected upstream response, got {other:?}"),
    }
}

async fn expect_quiet(rx: &mut mpsc::UnboundedReceiver<TsxOutput>) {
    if let Ok(Some(output)) = time::timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected output {output:?}");
    }
}

async fn wait_idle(host: &AppServerHost) {
    for _ in 0..50 {
        if host.active_transactions() == 0 {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transactions still active: {}", host.active_transactions());
}

fn route_values(request: &Request) -> Vec<String> {
    request
        .headers()
        .get_all("Route")
        .map(|v| v.to_string())
        .collect()
}

/// App whose transactions are built by a closure.
struct TestApp<F>(F);

impl<F> AppServer for TestApp<F>
where
    F: Fn() -> Option<Box<dyn AppServerTsx>> + Send + Sync + 'static,
{
    fn service_name(&self) -> &str {
        "test"
    }

    fn get_app_tsx(&self, _request: &Request) -> Option<Box<dyn AppServerTsx>> {
        (self.0)()
    }
}

fn app<F>(factory: F) -> Arc<dyn AppServer>
where
    F: Fn() -> Option<Box<dyn AppServerTsx>> + Send + Sync + 'static,
{
    Arc::new(TestApp(factory))
}

fn transparent_host() -> (AppServerHost, mpsc::UnboundedReceiver<TsxOutput>) {
    AppServerHost::new(app(|| None), config())
}

#[tokio::test]
async fn transparent_forward_consumes_local_route_and_relays() {
    let (host, mut rx) = transparent_host();
    let inbound = request(
        Method::Invite,
        "sip:6505551234@homedomain",
        &[
            ("Route", "<sip:icscf.homedomain:5052;lr>"),
            ("Route", "<sip:scscf1.homedomain:5058;transport=TCP;lr>"),
        ],
    );
    let tsx = host.handle_request(inbound).unwrap().unwrap();

    let (fork, forwarded) = expect_forward(&mut rx).await;
    assert_eq!(
        route_values(&forwarded),
        vec!["<sip:scscf1.homedomain:5058;transport=TCP;lr>"]
    );
    assert!(forwarded.headers().get("Record-Route").is_none());

    let ringing = Response::for_request(&forwarded, StatusCode::new(180).unwrap());
    host.deliver(tsx, TsxEvent::Response { fork, response: ringing }).unwrap();
    assert_eq!(expect_response(&mut rx).await.code(), 180);

    let ok = Response::for_request(&forwarded, StatusCode::OK);
    host.deliver(tsx, TsxEvent::Response { fork, response: ok }).unwrap();
    assert_eq!(expect_response(&mut rx).await.code(), 200);
    wait_idle(&host).await;
}

#[tokio::test]
async fn foreign_top_route_is_left_in_place() {
    let (host, mut rx) = transparent_host();
    let inbound = request(
        Method::Message,
        "sip:6505551234@homedomain",
        &[("Route", "<sip:bgcf.homedomain;lr>")],
    );
    host.handle_request(inbound).unwrap();
    let (_, forwarded) = expect_forward(&mut rx).await;
    assert_eq!(route_values(&forwarded), vec!["<sip:bgcf.homedomain;lr>"]);
}

/// Adds its own route and record-routes with a dialog tag.
struct RoutingTsx;

#[async_trait]
impl AppServerTsx for RoutingTsx {
    async fn on_initial_request(&mut self, helper: &mut TsxHelper, request: Request) {
        helper.set_dialog_tag("dlg-1234");
        let scscf = SipUri::parse("sip:scscf1.homedomain:5058").unwrap();
        helper
            .forward_with_routes(request, vec![RouteHeader::loose(scscf)])
            .unwrap();
    }
}

#[tokio::test]
async fn captured_routes_precede_logic_routes_and_record_route_is_first() {
    let (host, mut rx) = AppServerHost::new(
        app(|| Some(Box::new(RoutingTsx) as Box<dyn AppServerTsx>)),
        config(),
    );
    let inbound = request(
        Method::Invite,
        "sip:6505551234@homedomain",
        &[
            ("Route", "<sip:icscf.homedomain:5052;lr>, <sip:as1.homedomain;lr>"),
        ],
    );
    host.handle_request(inbound).unwrap();

    let (_, forwarded) = expect_forward(&mut rx).await;
    assert_eq!(
        route_values(&forwarded),
        vec!["<sip:as1.homedomain;lr>", "<sip:scscf1.homedomain:5058;lr>"]
    );
    let first = forwarded.headers().iter().next().unwrap();
    assert_eq!(first.name.as_str(), "Record-Route");
    assert_eq!(
        first.value.as_str(),
        "<sip:icscf.homedomain:5052;lr;dialog_id=dlg-1234>"
    );
}

/// Reports the dialog tag recovered from the consumed route.
struct DialogTagRecorder(Arc<Mutex<Option<String>>>);

#[async_trait]
impl AppServerTsx for DialogTagRecorder {
    async fn on_in_dialog_request(&mut self, helper: &mut TsxHelper, request: Request) {
        *self.0.lock().unwrap() = helper.dialog_tag().map(str::to_string);
        helper.forward(request).unwrap();
    }
}

#[tokio::test]
async fn in_dialog_request_exposes_dialog_tag() {
    let seen = Arc::new(Mutex::new(None));
    let recorder = seen.clone();
    let (host, mut rx) = AppServerHost::new(
        app(move || {
            Some(Box::new(DialogTagRecorder(recorder.clone())) as Box<dyn AppServerTsx>)
        }),
        config(),
    );
    let bye = request(
        Method::Bye,
        "sip:6505551234@10.0.0.9:5060",
        &[
            ("Route", "<sip:icscf.homedomain:5052;lr;dialog_id=dlg-1234>"),
            ("To", "<sip:6505551234@homedomain>;tag=callee"),
        ],
    );
    host.handle_request(bye).unwrap();
    let (_, forwarded) = expect_forward(&mut rx).await;
    assert!(route_values(&forwarded).is_empty());
    assert_eq!(seen.lock().unwrap().as_deref(), Some("dlg-1234"));
}

#[tokio::test]
async fn cancel_reaches_live_forks_and_late_responses_are_discarded() {
    let (host, mut rx) = transparent_host();
    let tsx = host
        .handle_request(request(Method::Invite, "sip:6505551234@homedomain", &[]))
        .unwrap()
        .unwrap();
    let (fork, forwarded) = expect_forward(&mut rx).await;

    host.cancel(tsx, StatusCode::REQUEST_TERMINATED, None).unwrap();
    match next_output(&mut rx).await {
        TsxOutput::Cancel { fork: cancelled, reason, .. } => {
            assert_eq!(cancelled, fork);
            assert_eq!(reason, StatusCode::REQUEST_TERMINATED);
        }
        other => panic!("expected cancel, got {other:?}"),
    }

    let terminated = Response::for_request(&forwarded, StatusCode::REQUEST_TERMINATED);
    host.deliver(tsx, TsxEvent::Response { fork, response: terminated }).unwrap();
    assert_eq!(expect_response(&mut rx).await.code(), 487);
    wait_idle(&host).await;

    let late = Response::for_request(&forwarded, StatusCode::OK);
    assert!(host.deliver(tsx, TsxEvent::Response { fork, response: late }).is_err());
    expect_quiet(&mut rx).await;
}

#[tokio::test]
async fn cancel_guard_synthesizes_487() {
    let (host, mut rx) = transparent_host();
    let tsx = host
        .handle_request(request(Method::Invite, "sip:6505551234@homedomain", &[]))
        .unwrap()
        .unwrap();
    expect_forward(&mut rx).await;
    host.cancel(tsx, StatusCode::REQUEST_TERMINATED, None).unwrap();
    assert!(matches!(next_output(&mut rx).await, TsxOutput::Cancel { .. }));

    // Downstream never answers; the guard fires after 50ms.
    assert_eq!(expect_response(&mut rx).await.code(), 487);
    wait_idle(&host).await;
}

#[tokio::test]
async fn cancel_with_transport_gone_still_ends_the_transaction() {
    let (host, mut rx) = transparent_host();
    let tsx = host
        .handle_request(request(Method::Invite, "sip:6505551234@homedomain", &[]))
        .unwrap()
        .unwrap();
    expect_forward(&mut rx).await;
    drop(rx);

    host.cancel(tsx, StatusCode::REQUEST_TERMINATED, None).unwrap();
    wait_idle(&host).await;
}

#[tokio::test]
async fn fork_failures_surface_as_synthetic_responses() {
    let (host, mut rx) = transparent_host();
    let tsx = host
        .handle_request(request(Method::Invite, "sip:6505551234@homedomain", &[]))
        .unwrap()
        .unwrap();
    let (fork, _) = expect_forward(&mut rx).await;
    host.deliver(tsx, TsxEvent::Timeout { fork }).unwrap();
    assert_eq!(expect_response(&mut rx).await.code(), 408);

    let tsx = host
        .handle_request(request(Method::Invite, "sip:6505551234@homedomain", &[]))
        .unwrap()
        .unwrap();
    let (fork, _) = expect_forward(&mut rx).await;
    host.deliver(tsx, TsxEvent::TransportError { fork }).unwrap();
    assert_eq!(expect_response(&mut rx).await.code(), 503);
    wait_idle(&host).await;
}

#[tokio::test]
async fn ack_handling() {
    let (host, mut rx) = transparent_host();
    let stray = request(Method::Ack, "sip:6505551234@homedomain", &[]);
    assert!(host.handle_request(stray).unwrap().is_none());
    expect_quiet(&mut rx).await;

    let in_dialog = request(
        Method::Ack,
        "sip:6505551234@10.0.0.9:5060",
        &[
            ("Route", "<sip:icscf.homedomain:5052;lr>"),
            ("To", "<sip:6505551234@homedomain>;tag=callee"),
        ],
    );
    assert!(host.handle_request(in_dialog).unwrap().is_none());
    let (_, relayed) = expect_forward(&mut rx).await;
    assert!(route_values(&relayed).is_empty());
    assert_eq!(host.active_transactions(), 0);
}

#[tokio::test]
async fn cancel_request_is_not_a_transaction() {
    let (host, _rx) = transparent_host();
    let cancel = request(Method::Cancel, "sip:6505551234@homedomain", &[]);
    assert!(host.handle_request(cancel).is_err());
}

/// Answers from a timer, cancelling a decoy timer first.
struct TimerTsx(Arc<Mutex<Vec<TimerContext>>>);

#[async_trait]
impl AppServerTsx for TimerTsx {
    async fn on_initial_request(&mut self, helper: &mut TsxHelper, _request: Request) {
        let decoy = helper.schedule_timer(1, Duration::from_millis(10));
        helper.schedule_timer(2, Duration::from_millis(30));
        assert!(helper.timer_running(decoy));
        assert!(helper.cancel_timer(decoy));
        assert!(!helper.timer_running(decoy));
    }

    async fn on_timer_expiry(&mut self, helper: &mut TsxHelper, context: TimerContext) {
        self.0.lock().unwrap().push(context);
        helper.reject(StatusCode::TEMPORARILY_UNAVAILABLE).unwrap();
    }
}

#[tokio::test]
async fn timers_fire_with_context_unless_cancelled() {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    let (host, mut rx) = AppServerHost::new(
        app(move || {
            Some(Box::new(TimerTsx(sink.clone())) as Box<dyn AppServerTsx>)
        }),
        config(),
    );
    host.handle_request(request(Method::Options, "sip:homedomain", &[]))
        .unwrap();
    assert_eq!(expect_response(&mut rx).await.code(), 480);
    wait_idle(&host).await;
    assert_eq!(*fired.lock().unwrap(), vec![2]);
}

/// Tries to send two finals and to forward afterwards.
struct DoubleFinal(Arc<Mutex<Vec<TsxError>>>);

#[async_trait]
impl AppServerTsx for DoubleFinal {
    async fn on_initial_request(&mut self, helper: &mut TsxHelper, request: Request) {
        helper.reject(StatusCode::NOT_FOUND).unwrap();
        let mut errors = self.0.lock().unwrap();
        errors.push(helper.reject(StatusCode::OK).unwrap_err());
        errors.push(helper.forward(request).unwrap_err());
    }
}

#[tokio::test]
async fn only_one_final_response_goes_upstream() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let (host, mut rx) = AppServerHost::new(
        app(move || {
            Some(Box::new(DoubleFinal(sink.clone())) as Box<dyn AppServerTsx>)
        }),
        config(),
    );
    host.handle_request(request(Method::Message, "sip:6505551234@homedomain", &[]))
        .unwrap();
    assert_eq!(expect_response(&mut rx).await.code(), 404);
    expect_quiet(&mut rx).await;
    assert_eq!(
        *errors.lock().unwrap(),
        vec![TsxError::Terminated, TsxError::Terminated]
    );
    wait_idle(&host).await;
}
