//! Integration tests for the pipeline, its stages and the quarantine policy.
//!
//! Every backend is replaced by [`ScriptedTransport`], which replays a fixed
//! list of replies in order and records the requests it was sent. Backoff is
//! configured to zero so retry tests run instantly.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use osm_pipeline::error::ErrorKind;
use osm_pipeline::pipeline::extractors::{Extractor, LlmExtractor, RTransparentExtractor};
use osm_pipeline::pipeline::parsers::{Parser, ScienceBeamParser};
use osm_pipeline::pipeline::upload::OsmSaver;
use osm_pipeline::record::assemble_candidate;
use osm_pipeline::transport::{Method, RequestBody};
use osm_pipeline::{
    Component, HttpRequest, HttpResponse, MetricsSchema, OsmConfig, OsmError, Pipeline,
    RecordContext, Savers, Transport, TransportError,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

type Reply = Result<HttpResponse, TransportError>;

struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("unscripted request".into())))
    }
}

fn ok(body: impl Into<Vec<u8>>) -> Reply {
    Ok(HttpResponse::new(200, body))
}

fn status(code: u16, body: &str) -> Reply {
    Ok(HttpResponse::new(code, body))
}

fn refused() -> Reply {
    Err(TransportError::Connect("connection refused".into()))
}

fn ok_json(value: Value) -> Reply {
    ok(serde_json::to_vec(&value).unwrap())
}

const API: &str = "http://store.test/api";

/// Route library logs through the test harness; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> OsmConfig {
    init_tracing();
    OsmConfig::builder()
        .osm_api(API)
        .parse_backoff_secs(0)
        .build()
        .unwrap()
}

fn context() -> RecordContext {
    RecordContext::new("PMC1234567", "paper.xml").email("me@example.org")
}

fn json_body(request: &HttpRequest) -> &Value {
    match &request.body {
        RequestBody::Json(value) => value,
        other => panic!("expected a JSON body, got {other:?}"),
    }
}

fn form_field<'a>(request: &'a HttpRequest, name: &str) -> &'a str {
    match &request.body {
        RequestBody::Multipart { fields, .. } => fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .unwrap_or_else(|| panic!("no form field {name}")),
        other => panic!("expected a multipart body, got {other:?}"),
    }
}

fn component_names(value: &Value) -> Vec<String> {
    value["components"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect()
}

fn valid_candidate() -> Value {
    let metrics = json!({"is_open_data": true, "year": 2021});
    let components = vec![
        Component::new("NoopParser", "0.0.1"),
        Component::new("RTransparentExtractor", "0.0.1"),
    ];
    assemble_candidate(
        b"<article/>",
        metrics.as_object().unwrap(),
        &components,
        &context(),
        Utc::now(),
    )
    .unwrap()
}

fn saver(transport: &Arc<ScriptedTransport>) -> OsmSaver {
    let transport: Arc<dyn Transport> = transport.clone();
    OsmSaver::new(&config(), context(), transport)
}

fn write_source(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

// ── Conversion retry ─────────────────────────────────────────────────────────

fn sciencebeam(transport: &Arc<ScriptedTransport>) -> Parser {
    let transport: Arc<dyn Transport> = transport.clone();
    Parser::ScienceBeam(ScienceBeamParser::new(&config(), transport))
}

#[tokio::test]
async fn conversion_succeeds_on_fifth_attempt() {
    let transport = ScriptedTransport::new(vec![
        refused(),
        refused(),
        refused(),
        refused(),
        ok("<TEI/>"),
    ]);
    let out = sciencebeam(&transport).run(b"%PDF-1.7").await.unwrap();

    assert_eq!(out.value.as_ref(), b"<TEI/>");
    assert_eq!(out.component.name, "ScienceBeamParser");
    let requests = transport.requests();
    assert_eq!(requests.len(), 5);
    assert!(requests
        .iter()
        .all(|r| r.headers.contains(&("Accept".into(), "application/tei+xml".into()))));
}

#[tokio::test]
async fn conversion_gives_up_after_five_refusals() {
    let transport = ScriptedTransport::new((0..5).map(|_| refused()).collect());
    let err = sciencebeam(&transport).run(b"%PDF-1.7").await.unwrap_err();

    assert!(
        matches!(err, OsmError::ConversionUnavailable { attempts: 5, .. }),
        "got: {err:?}"
    );
    assert_eq!(transport.requests().len(), 5);
}

#[tokio::test]
async fn conversion_http_error_is_not_retried() {
    let transport = ScriptedTransport::new(vec![status(500, "boom"), ok("<TEI/>")]);
    let err = sciencebeam(&transport).run(b"%PDF-1.7").await.unwrap_err();

    assert!(
        matches!(err, OsmError::ConversionFailed { status: 500, .. }),
        "got: {err:?}"
    );
    assert_eq!(transport.requests().len(), 1);
}

// ── Validated persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn integer_filename_is_quarantined_and_reraised() {
    let transport = ScriptedTransport::new(vec![ok("{}")]);
    let mut candidate = valid_candidate();
    candidate["work"]["filename"] = json!(123);

    let err = saver(&transport)
        .deliver(candidate.clone(), MetricsSchema::RTransparent)
        .await
        .unwrap_err();

    match &err {
        OsmError::Validation(v) => assert_eq!(v.field, "work.filename"),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Validation);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1, "nothing is uploaded after a validation failure");
    assert_eq!(requests[0].url, format!("{API}/quarantine/"));
    assert_eq!(requests[0].method, Method::Put);

    let record = json_body(&requests[0]);
    assert!(record["error_message"].as_str().unwrap().contains("filename"));
    let payload = base64::engine::general_purpose::STANDARD
        .decode(record["payload"].as_str().unwrap())
        .unwrap();
    let quarantined: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(quarantined, candidate, "the whole candidate is preserved");
}

#[tokio::test]
async fn unreachable_quarantine_falls_back_to_raw_upload() {
    let transport = ScriptedTransport::new(vec![refused(), ok("")]);
    let mut candidate = valid_candidate();
    candidate["work"]["filename"] = json!(7);

    let err = saver(&transport)
        .deliver(candidate.clone(), MetricsSchema::RTransparent)
        .await
        .unwrap_err();
    assert!(matches!(err, OsmError::Validation(_)), "got: {err:?}");

    let requests = transport.requests();
    assert_eq!(
        transport.urls(),
        vec![format!("{API}/quarantine/"), format!("{API}/quarantine2/")]
    );
    let tier1_message = json_body(&requests[0])["error_message"].as_str().unwrap();
    assert_eq!(form_field(&requests[1], "error_message"), tier1_message);

    match &requests[1].body {
        RequestBody::Multipart { file_field, bytes, .. } => {
            assert_eq!(file_field, "file");
            let raw: Value = serde_json::from_slice(bytes).unwrap();
            assert_eq!(raw, candidate);
        }
        other => panic!("expected a multipart body, got {other:?}"),
    }
}

#[tokio::test]
async fn rejecting_quarantine_falls_back_to_raw_upload() {
    let transport = ScriptedTransport::new(vec![
        status(500, "upload broken"),
        status(500, "quarantine broken"),
        ok(""),
    ]);
    let candidate = valid_candidate();

    let err = saver(&transport)
        .deliver(candidate.clone(), MetricsSchema::RTransparent)
        .await
        .unwrap_err();
    assert!(
        matches!(err, OsmError::DeliveryRejected { status: 500, .. }),
        "got: {err:?}"
    );

    assert_eq!(
        transport.urls(),
        vec![
            format!("{API}/upload/"),
            format!("{API}/quarantine/"),
            format!("{API}/quarantine2/"),
        ]
    );
    let requests = transport.requests();
    let tier1_message = json_body(&requests[1])["error_message"].as_str().unwrap();
    assert!(tier1_message.contains("upload broken"), "got: {tier1_message}");
    assert_eq!(form_field(&requests[2], "error_message"), tier1_message);

    match &requests[2].body {
        RequestBody::Multipart { file_name, mime, bytes, .. } => {
            assert_eq!(file_name, "payload.json");
            assert_eq!(mime, "application/octet-stream");
            assert_eq!(bytes, &serde_json::to_vec(&candidate).unwrap());
        }
        other => panic!("expected a multipart body, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_upload_is_quarantined() {
    let transport = ScriptedTransport::new(vec![status(422, "duplicate"), ok("")]);
    let err = saver(&transport)
        .deliver(valid_candidate(), MetricsSchema::RTransparent)
        .await
        .unwrap_err();

    assert!(
        matches!(err, OsmError::DeliveryRejected { status: 422, .. }),
        "got: {err:?}"
    );
    assert!(err.is_quarantinable());
    assert_eq!(
        transport.urls(),
        vec![format!("{API}/upload/"), format!("{API}/quarantine/")]
    );
    let message = json_body(&transport.requests()[1])["error_message"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(message.contains("duplicate"), "got: {message}");
}

#[tokio::test]
async fn interrupted_upload_is_quarantined() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::Other("operation timed out".into())),
        ok(""),
    ]);
    let err = saver(&transport)
        .deliver(valid_candidate(), MetricsSchema::RTransparent)
        .await
        .unwrap_err();

    assert!(matches!(err, OsmError::DeliveryInterrupted { .. }), "got: {err:?}");
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn unreachable_store_is_not_quarantined() {
    let transport = ScriptedTransport::new(vec![refused(), ok(""), ok("")]);
    let err = saver(&transport)
        .deliver(valid_candidate(), MetricsSchema::RTransparent)
        .await
        .unwrap_err();

    assert!(matches!(err, OsmError::StoreUnreachable { .. }), "got: {err:?}");
    assert_eq!(err.kind(), ErrorKind::StoreConnectivity);
    assert_eq!(transport.urls(), vec![format!("{API}/upload/")]);
}

#[tokio::test]
async fn both_quarantine_tiers_failing_keeps_original_error() {
    let transport = ScriptedTransport::new(vec![
        status(500, "upload broken"),
        refused(),
        status(503, "raw broken"),
    ]);
    let err = saver(&transport)
        .deliver(valid_candidate(), MetricsSchema::RTransparent)
        .await
        .unwrap_err();

    match &err {
        OsmError::QuarantineFailed { original, tier2, .. } => {
            assert!(matches!(**original, OsmError::DeliveryRejected { status: 500, .. }));
            assert!(tier2.contains("503"), "got: {tier2}");
        }
        other => panic!("expected QuarantineFailed, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Delivery);
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn identical_candidates_are_delivered_twice() {
    let transport = ScriptedTransport::new(vec![ok(""), ok("")]);
    let saver = saver(&transport);
    let candidate = valid_candidate();

    let first = saver
        .deliver(candidate.clone(), MetricsSchema::RTransparent)
        .await
        .unwrap();
    let second = saver
        .deliver(candidate, MetricsSchema::RTransparent)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(
        transport.urls(),
        vec![format!("{API}/upload/"), format!("{API}/upload/")]
    );
}

// ── Full pipeline ────────────────────────────────────────────────────────────

fn rtransparent(transport: &Arc<ScriptedTransport>) -> Extractor {
    let transport: Arc<dyn Transport> = transport.clone();
    Extractor::RTransparent(RTransparentExtractor::new(&config(), transport))
}

fn llm(transport: &Arc<ScriptedTransport>) -> Extractor {
    let transport: Arc<dyn Transport> = transport.clone();
    Extractor::Llm(LlmExtractor::new(&config(), "gpt-test", transport))
}

#[tokio::test]
async fn pipeline_records_provenance_in_execution_order() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "paper.pdf", b"%PDF-1.7 body");
    let xml_path = dir.path().join("out/paper.xml");
    let metrics_path = dir.path().join("out/paper_metrics.json");

    let transport = ScriptedTransport::new(vec![
        ok("<TEI>converted</TEI>"),
        ok_json(json!({"pmid": 99, "score": -2147483648_i64, "is_success": true})),
        ok(""),
    ]);
    let output = Pipeline::new(
        vec![sciencebeam(&transport)],
        vec![rtransparent(&transport)],
        Savers::new(saver(&transport)),
        &source,
        &xml_path,
        &metrics_path,
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    let expected = ["ScienceBeamParser", "RTransparentExtractor", "FileSaver", "JSONSaver"];
    assert_eq!(output.records.len(), 1);
    let record = &output.records[0];
    let delivered: Vec<&str> = record
        .invocation
        .components
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(delivered, expected);

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[1].query,
        vec![("parser".to_string(), "ScienceBeamParser".to_string())]
    );
    let uploaded = json_body(&requests[2]);
    assert_eq!(component_names(uploaded), expected);
    assert_eq!(uploaded["metrics"], json!({"score": null, "is_success": true}));
    assert_eq!(
        uploaded["work"]["content_hash"],
        osm_pipeline::record::content_hash(b"%PDF-1.7 body")
    );

    assert_eq!(std::fs::read(&xml_path).unwrap(), b"<TEI>converted</TEI>");
    let saved: Value = serde_json::from_slice(&std::fs::read(&metrics_path).unwrap()).unwrap();
    assert_eq!(saved, json!({"score": null, "is_success": true}));
    assert_eq!(record.metrics(), saved.as_object().unwrap());
}

#[tokio::test]
async fn noop_parser_does_not_write_a_converted_copy() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "paper.xml", b"<article/>");
    let xml_path = dir.path().join("out/paper.xml");
    let metrics_path = dir.path().join("out/paper_metrics.json");

    let transport = ScriptedTransport::new(vec![ok_json(json!({"is_success": true})), ok("")]);
    let pipeline = Pipeline::new(
        vec![Parser::Noop],
        vec![rtransparent(&transport)],
        Savers::new(saver(&transport)),
        &source,
        &xml_path,
        &metrics_path,
    )
    .unwrap();
    assert_eq!(pipeline.filepath(), source.as_path());
    let output = pipeline.run().await.unwrap();

    assert!(!xml_path.exists());
    assert!(metrics_path.exists());
    assert_eq!(output.records[0].parser, "NoopParser");
    assert_eq!(
        component_names(json_body(&transport.requests()[1])),
        ["NoopParser", "RTransparentExtractor", "FileSaver", "JSONSaver"]
    );
}

#[tokio::test]
async fn every_extractor_runs_for_every_parser() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "PMC1.xml", b"<pmc-articleset/>");

    let transport = ScriptedTransport::new(vec![
        ok_json(json!({"is_success": true})),
        ok(""),
        ok_json(json!({"is_open_data": false, "funder": ["NIH"]})),
        ok(""),
        ok_json(json!({"is_success": false})),
        ok(""),
        ok_json(json!({"is_open_data": true})),
        ok(""),
    ]);
    let output = Pipeline::new(
        vec![Parser::Noop, Parser::Pmc],
        vec![rtransparent(&transport), llm(&transport)],
        Savers::new(saver(&transport)),
        &source,
        dir.path().join("PMC1.xml.out"),
        dir.path().join("PMC1_metrics.json"),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    let pairs: Vec<(&str, &str)> = output
        .records
        .iter()
        .map(|r| (r.parser.as_str(), r.extractor.as_str()))
        .collect();
    assert_eq!(
        pairs,
        [
            ("NoopParser", "RTransparentExtractor"),
            ("NoopParser", "LLMExtractor"),
            ("PMCParser", "RTransparentExtractor"),
            ("PMCParser", "LLMExtractor"),
        ]
    );

    let requests = transport.requests();
    assert_eq!(
        requests[2].query,
        vec![("llm_model".to_string(), "gpt-test".to_string())]
    );
    assert_eq!(output.records[1].invocation.funder, vec!["NIH"]);
    assert_eq!(output.records[1].invocation.client.email.as_deref(), Some("me@example.org"));
}

#[tokio::test]
async fn extractor_failure_stops_before_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "paper.xml", b"<article/>");

    let transport = ScriptedTransport::new(vec![status(500, "R crashed")]);
    let err = Pipeline::new(
        vec![Parser::Noop],
        vec![rtransparent(&transport)],
        Savers::new(saver(&transport)),
        &source,
        dir.path().join("paper.out.xml"),
        dir.path().join("paper_metrics.json"),
    )
    .unwrap()
    .run()
    .await
    .unwrap_err();

    assert!(
        matches!(err, OsmError::ExtractionFailed { status: 500, .. }),
        "got: {err:?}"
    );
    assert_eq!(err.kind(), ErrorKind::ExternalService);
    assert_eq!(transport.requests().len(), 1);
    assert!(!dir.path().join("paper_metrics.json").exists());
}

#[tokio::test]
async fn invalid_metrics_are_quarantined_by_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "paper.xml", b"<article/>");

    let transport = ScriptedTransport::new(vec![ok_json(json!({"year": "last year"})), ok("")]);
    let err = Pipeline::new(
        vec![Parser::Noop],
        vec![rtransparent(&transport)],
        Savers::new(saver(&transport)),
        &source,
        dir.path().join("paper.out.xml"),
        dir.path().join("paper_metrics.json"),
    )
    .unwrap()
    .run()
    .await
    .unwrap_err();

    match &err {
        OsmError::Validation(v) => assert_eq!(v.field, "metrics.year"),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert_eq!(transport.urls()[1], format!("{API}/quarantine/"));
    // The local copy is written before delivery is attempted.
    let saved: Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("paper_metrics.json")).unwrap())
            .unwrap();
    assert_eq!(saved, json!({"year": "last year"}));
}
