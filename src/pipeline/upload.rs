//! Validated delivery of invocation records, with quarantine fallback.
//!
//! [`OsmSaver`] guarantees that a processed result is either delivered to
//! the remote store or preserved for manual recovery. The decision table:
//!
//! | Outcome | Quarantined | Returned |
//! |---------|-------------|----------|
//! | assembly fails | no (a `PayloadError` is reported) | `PayloadAssembly` |
//! | validation fails | yes | `Validation` |
//! | store answers non-2xx | yes | `DeliveryRejected` |
//! | store exchange breaks off | yes | `DeliveryInterrupted` |
//! | store unreachable | no | `StoreUnreachable` |
//! | upload 2xx | no | `Ok(Invocation)` |
//!
//! Quarantine tries the JSON `quarantine` endpoint first and falls back to
//! the raw-file `quarantine2` endpoint, which accepts arbitrary bytes. The
//! triggering error is returned whichever tier succeeded. If both fail the
//! error is wrapped in [`OsmError::QuarantineFailed`] and the record exists
//! only in the caller's memory.
//!
//! No check is made for an existing record with the same content hash:
//! delivering the same candidate twice sends two uploads.

use crate::component::Component;
use crate::config::OsmConfig;
use crate::error::OsmError;
use crate::record::{assemble_candidate, current_user, RecordContext};
use crate::schema::{validate_candidate, Invocation, Metrics, MetricsSchema, PayloadError, Quarantine};
use crate::transport::{HttpRequest, RequestBody, Transport, TransportError};
use base64::Engine as _;
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Uploads invocation records to the remote store.
#[derive(Clone)]
pub struct OsmSaver {
    upload_url: String,
    quarantine_url: String,
    quarantine2_url: String,
    payload_error_url: String,
    context: RecordContext,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for OsmSaver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsmSaver")
            .field("upload_url", &self.upload_url)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl OsmSaver {
    pub fn new(config: &OsmConfig, context: RecordContext, transport: Arc<dyn Transport>) -> Self {
        Self {
            upload_url: config.api_url("upload"),
            quarantine_url: config.api_url("quarantine"),
            quarantine2_url: config.api_url("quarantine2"),
            payload_error_url: config.api_url("payload_error"),
            context,
            transport,
        }
    }

    pub fn context(&self) -> &RecordContext {
        &self.context
    }

    /// Assemble, validate and deliver the record for one pipeline combination.
    ///
    /// `data` is the raw source document; `components` the provenance of
    /// the run in execution order.
    pub async fn run(
        &self,
        data: &[u8],
        metrics: &Metrics,
        components: &[Component],
        schema: MetricsSchema,
    ) -> Result<Invocation, OsmError> {
        let candidate = match assemble_candidate(data, metrics, components, &self.context, Utc::now()) {
            Ok(candidate) => candidate,
            Err(e) => return Err(self.fail_assembly(e).await),
        };
        self.deliver(candidate, schema).await
    }

    /// Validate and deliver an already assembled candidate.
    pub async fn deliver(&self, candidate: Value, schema: MetricsSchema) -> Result<Invocation, OsmError> {
        let failure = match validate_candidate(&candidate, schema) {
            Ok(invocation) => match self.upload(&invocation).await {
                Ok(()) => return Ok(invocation),
                Err(e @ OsmError::StoreUnreachable { .. }) => {
                    error!("{}", e);
                    return Err(e);
                }
                Err(e) => e,
            },
            Err(invalid) => OsmError::Validation(invalid),
        };

        error!("Invocation not stored: {}", failure);
        Err(self.quarantine(&candidate, failure).await)
    }

    async fn upload(&self, invocation: &Invocation) -> Result<(), OsmError> {
        let body = serde_json::to_value(invocation)
            .map_err(|e| OsmError::Internal(format!("validated invocation is not serialisable: {e}")))?;
        let request = HttpRequest::put(self.upload_url.as_str(), RequestBody::Json(body));

        match self.transport.send(request).await {
            Ok(response) if response.is_success() => {
                info!(
                    "Invocation data uploaded successfully ({})",
                    invocation.work.content_hash
                );
                Ok(())
            }
            Ok(response) => Err(OsmError::DeliveryRejected {
                status: response.status,
                body: response.text(),
            }),
            Err(TransportError::Connect(detail)) => Err(OsmError::StoreUnreachable {
                url: self.upload_url.clone(),
                detail,
            }),
            Err(TransportError::Other(detail)) => Err(OsmError::DeliveryInterrupted {
                url: self.upload_url.clone(),
                detail,
            }),
        }
    }

    /// Preserve `candidate` and hand back the error to return to the caller.
    async fn quarantine(&self, candidate: &Value, failure: OsmError) -> OsmError {
        let blob = match serde_json::to_vec(candidate) {
            Ok(blob) => blob,
            Err(e) => {
                return OsmError::QuarantineFailed {
                    original: Box::new(failure),
                    tier1: format!("payload not serialisable: {e}"),
                    tier2: "not attempted".to_string(),
                }
            }
        };
        let error_message = redact_user(&failure.to_string());
        debug!("Quarantining {} bytes", blob.len());

        let tier1 = match self.quarantine_json(&blob, &error_message).await {
            Ok(()) => {
                warn!("Payload quarantined for manual review");
                return failure;
            }
            Err(reason) => reason,
        };
        warn!("Quarantine failed ({}); falling back to raw upload", tier1);

        let request = HttpRequest::put(
            self.quarantine2_url.as_str(),
            RequestBody::Multipart {
                file_field: "file".to_string(),
                file_name: "payload.json".to_string(),
                mime: "application/octet-stream".to_string(),
                bytes: blob,
                fields: vec![("error_message".to_string(), error_message)],
            },
        );
        let tier2 = match self.transport.send(request).await {
            Ok(response) if response.is_success() => {
                warn!("Payload quarantined via raw upload for manual review");
                return failure;
            }
            Ok(response) => format!("HTTP {}: {}", response.status, response.text()),
            Err(e) => e.to_string(),
        };

        error!("Raw quarantine failed too ({}); the record was not preserved", tier2);
        OsmError::QuarantineFailed {
            original: Box::new(failure),
            tier1,
            tier2,
        }
    }

    async fn quarantine_json(&self, blob: &[u8], error_message: &str) -> Result<(), String> {
        let record = Quarantine {
            payload: base64::engine::general_purpose::STANDARD.encode(blob),
            error_message: error_message.to_string(),
            created_at: Utc::now(),
        };
        let body = serde_json::to_value(&record).map_err(|e| e.to_string())?;
        let request = HttpRequest::put(self.quarantine_url.as_str(), RequestBody::Json(body));
        match self.transport.send(request).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(format!("HTTP {}: {}", response.status, response.text())),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Report an assembly failure to the store and hand it back unchanged.
    async fn fail_assembly(&self, failure: OsmError) -> OsmError {
        error!("Payload could not be assembled: {}", failure);
        self.report_payload_error(&failure).await;
        failure
    }

    /// Best effort: the assembly error is returned whatever happens here.
    async fn report_payload_error(&self, failure: &OsmError) {
        let record = PayloadError {
            error_message: redact_user(&failure.to_string()),
            created_at: Utc::now(),
        };
        let body = match serde_json::to_value(&record) {
            Ok(body) => body,
            Err(_) => return,
        };
        let request = HttpRequest::put(self.payload_error_url.as_str(), RequestBody::Json(body));
        match self.transport.send(request).await {
            Ok(response) if response.is_success() => debug!("Payload error reported"),
            Ok(response) => warn!("Payload error report rejected: HTTP {}", response.status),
            Err(e) => warn!("Payload error report failed: {}", e),
        }
    }
}

/// Replace the local user name with `USER` in text bound for the store.
pub fn redact_user(message: &str) -> String {
    redact(message, &current_user())
}

fn redact(message: &str, user: &str) -> String {
    if user.is_empty() {
        message.to_string()
    } else {
        message.replace(user, "USER")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpResponse, Method};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct CannedTransport {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl CannedTransport {
        fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.sent.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("no reply queued".into())))
        }
    }

    fn saver_with(transport: Arc<CannedTransport>) -> OsmSaver {
        let config = OsmConfig::builder().osm_api("http://store:80/api").build().unwrap();
        OsmSaver::new(&config, RecordContext::new("PMC1", "paper.xml"), transport)
    }

    fn assembly_failure() -> OsmError {
        OsmError::PayloadAssembly(format!("metrics not serialisable for {}", current_user()))
    }

    #[test]
    fn redact_replaces_every_occurrence() {
        assert_eq!(
            redact("/home/alice/osm: alice cannot write", "alice"),
            "/home/USER/osm: USER cannot write"
        );
        assert_eq!(redact("nothing to hide", ""), "nothing to hide");
    }

    #[test]
    fn endpoints_hang_off_the_api_base() {
        let saver = saver_with(CannedTransport::new(vec![]));
        assert_eq!(saver.upload_url, "http://store:80/api/upload/");
        assert_eq!(saver.quarantine2_url, "http://store:80/api/quarantine2/");
        assert_eq!(saver.payload_error_url, "http://store:80/api/payload_error/");
        assert_eq!(saver.context().user_defined_id, "PMC1");
    }

    #[tokio::test]
    async fn assembly_failure_is_reported_as_payload_error() {
        let transport = CannedTransport::new(vec![Ok(HttpResponse::new(200, ""))]);
        let saver = saver_with(Arc::clone(&transport));

        let err = saver.fail_assembly(assembly_failure()).await;
        assert!(matches!(err, OsmError::PayloadAssembly(_)), "got: {err:?}");

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, Method::Put);
        assert_eq!(sent[0].url, "http://store:80/api/payload_error/");
        let RequestBody::Json(body) = &sent[0].body else {
            panic!("payload error must be JSON, got {:?}", sent[0].body);
        };
        let message = body["error_message"].as_str().unwrap();
        assert_eq!(message, redact_user(&assembly_failure().to_string()));
        if !current_user().is_empty() {
            assert!(message.contains("USER"), "user name not redacted: {message}");
        }
        assert!(body["created_at"].is_string());
        assert!(body.get("payload").is_none());
    }

    #[tokio::test]
    async fn rejected_payload_error_report_keeps_assembly_error() {
        let transport = CannedTransport::new(vec![Ok(HttpResponse::new(500, "down"))]);
        let saver = saver_with(Arc::clone(&transport));

        let err = saver.fail_assembly(assembly_failure()).await;
        assert!(matches!(err, OsmError::PayloadAssembly(_)), "got: {err:?}");
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_payload_error_endpoint_keeps_assembly_error() {
        let transport =
            CannedTransport::new(vec![Err(TransportError::Connect("refused".into()))]);
        let saver = saver_with(Arc::clone(&transport));

        let err = saver.fail_assembly(assembly_failure()).await;
        assert!(matches!(err, OsmError::PayloadAssembly(_)), "got: {err:?}");
        let urls: Vec<String> = transport.sent().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, ["http://store:80/api/payload_error/"]);
    }
}
