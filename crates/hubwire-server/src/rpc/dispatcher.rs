//! Invocation dispatcher: parse, resolve, validate, run the chain, respond.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::metrics::{
    INVOCATION_DURATION_SECONDS, INVOCATION_REJECTIONS_TOTAL, INVOCATIONS_SUPPRESSED_TOTAL,
    INVOCATIONS_TOTAL, RESPONSE_DROPS_TOTAL,
};
use crate::rpc::chain::{ChainOutcome, InterceptorChain};
use crate::rpc::context::{HubContext, InvocationContext};
use crate::rpc::errors::{
    HandlerFault, PROTOCOL_PARSE_ERROR, ProtocolParseError, UNKNOWN_INVOCATION_ID,
};
use crate::rpc::registry::{MethodRegistry, ParamKind};
use crate::rpc::types::{InvocationRequest, InvocationResponse};
use crate::websocket::connection::{ClientConnection, ConnectionId, SendError};

/// Invocations slower than this are logged as warnings.
const SLOW_INVOCATION_THRESHOLD: Duration = Duration::from_secs(5);

/// Result of dispatching one inbound frame.
#[derive(Debug, Clone)]
pub struct HandleResult {
    /// The response produced for the frame.
    pub response: InvocationResponse,
    /// Whether the response was queued on the originating connection.
    pub delivered: bool,
}

/// Routes raw inbound frames to registered handlers.
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    hub: Arc<HubContext>,
    chain: InterceptorChain,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(registry: Arc<MethodRegistry>, hub: Arc<HubContext>, chain: InterceptorChain) -> Self {
        Self {
            registry,
            hub,
            chain,
        }
    }

    /// The method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// The shared hub context.
    pub fn hub(&self) -> &Arc<HubContext> {
        &self.hub
    }

    /// Produce the single response for a raw frame received from `from`.
    ///
    /// Parse, resolution and argument errors short-circuit before any
    /// interceptor runs.
    #[instrument(skip_all, fields(conn_id = %from, target_name, method, invocation_id))]
    pub async fn handle_message(&self, raw: &str, from: &ConnectionId) -> InvocationResponse {
        let request = match parse_request(raw) {
            Ok(request) => request,
            Err(err) => {
                warn!(invocation_id = %err.invocation_id, reason = %err.reason, "malformed invocation frame");
                counter!(INVOCATION_REJECTIONS_TOTAL, "kind" => PROTOCOL_PARSE_ERROR).increment(1);
                return InvocationResponse::error(err.invocation_id, PROTOCOL_PARSE_ERROR, err.reason);
            }
        };

        let span = tracing::Span::current();
        let _ = span.record("target_name", request.target.as_str());
        let _ = span.record("method", request.method.as_str());
        let _ = span.record("invocation_id", request.invocation_id.as_str());

        let descriptor = match self.registry.resolve(&request.target, &request.method) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(error = %err, "unknown hub method");
                counter!(INVOCATION_REJECTIONS_TOTAL, "kind" => err.kind()).increment(1);
                return InvocationResponse::error(request.invocation_id, err.kind(), err.to_string());
            }
        };

        if let Err(fault) = descriptor.signature().check_args(&request.args) {
            debug!(error = %fault, "argument validation failed");
            counter!(INVOCATION_REJECTIONS_TOTAL, "kind" => fault.kind().to_owned()).increment(1);
            return InvocationResponse::error(
                request.invocation_id,
                fault.kind(),
                fault.client_message(),
            );
        }

        let target = descriptor.target().to_owned();
        let method = descriptor.method().to_owned();
        let ctx = InvocationContext::new(
            request.invocation_id,
            descriptor,
            from.clone(),
            request.args,
            Arc::clone(&self.hub),
        );

        debug!("dispatching invocation");
        let start = Instant::now();
        let outcome = self.chain.run(&ctx).await;
        let elapsed = start.elapsed();

        let (response, outcome_label) = match outcome {
            ChainOutcome::Completed(result) => {
                let signature = ctx.descriptor().signature();
                if !signature.check_result(&result) {
                    warn!(
                        expected = ?signature.returns(),
                        got = ParamKind::describe(&result),
                        "result does not match declared return kind"
                    );
                }
                (
                    InvocationResponse::success(ctx.invocation_id(), result),
                    "success",
                )
            }
            ChainOutcome::Suppressed { interceptor } => {
                counter!(INVOCATIONS_SUPPRESSED_TOTAL, "interceptor" => interceptor.clone())
                    .increment(1);
                (
                    InvocationResponse::suppressed(ctx.invocation_id(), interceptor),
                    "suppressed",
                )
            }
            ChainOutcome::Faulted(fault) => {
                log_fault(&fault);
                (
                    InvocationResponse::error(
                        ctx.invocation_id(),
                        fault.kind(),
                        fault.client_message(),
                    ),
                    "error",
                )
            }
        };

        counter!(
            INVOCATIONS_TOTAL,
            "target" => target.clone(),
            "method" => method.clone(),
            "outcome" => outcome_label
        )
        .increment(1);
        histogram!(INVOCATION_DURATION_SECONDS, "target" => target, "method" => method)
            .record(elapsed.as_secs_f64());

        if elapsed >= SLOW_INVOCATION_THRESHOLD {
            warn!(duration_secs = elapsed.as_secs_f64(), "slow invocation");
        }

        response
    }

    /// Handle a frame and write the response back to `from`.
    ///
    /// A closed connection drops the response silently; a full queue drops it
    /// with a warning. Neither is retried.
    pub async fn dispatch(&self, raw: &str, from: &ClientConnection) -> HandleResult {
        let response = self.handle_message(raw, from.id()).await;
        let delivered = match from.send_json(&response) {
            Ok(()) => true,
            Err(SendError::Closed) => {
                debug!(conn_id = %from.id(), invocation_id = %response.invocation_id, "response dropped, connection closed");
                counter!(RESPONSE_DROPS_TOTAL, "reason" => "closed").increment(1);
                false
            }
            Err(err) => {
                warn!(conn_id = %from.id(), invocation_id = %response.invocation_id, error = %err, "response dropped");
                counter!(RESPONSE_DROPS_TOTAL, "reason" => "full").increment(1);
                false
            }
        };
        HandleResult {
            response,
            delivered,
        }
    }
}

fn log_fault(fault: &HandlerFault) {
    match fault {
        HandlerFault::Internal { .. } | HandlerFault::Panicked { .. } => {
            error!(kind = fault.kind(), error = %fault, "handler failed");
        }
        _ => debug!(kind = fault.kind(), error = %fault, "handler returned error"),
    }
}

/// Parse a raw frame into a request.
///
/// When the frame is a JSON object with a non-empty string `invocationId`, the
/// error carries that id so the client can correlate it.
pub fn parse_request(raw: &str) -> Result<InvocationRequest, ProtocolParseError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ProtocolParseError {
        invocation_id: UNKNOWN_INVOCATION_ID.to_owned(),
        reason: format!("invalid JSON: {e}"),
    })?;

    let invocation_id = value
        .get("invocationId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .unwrap_or(UNKNOWN_INVOCATION_ID)
        .to_owned();
    let fail = |reason: String| ProtocolParseError {
        invocation_id: invocation_id.clone(),
        reason,
    };

    let request: InvocationRequest = serde_json::from_value(value)
        .map_err(|e| fail(format!("invalid invocation: {e}")))?;

    if request.invocation_id.is_empty() {
        return Err(fail("invocationId must not be empty".into()));
    }
    if request.target.is_empty() {
        return Err(fail("target must not be empty".into()));
    }
    if request.method.is_empty() {
        return Err(fail("method must not be empty".into()));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::errors::{
        HANDLER_PANIC, INTERNAL_ERROR, INVALID_ARGUMENTS, METHOD_NOT_FOUND,
    };
    use crate::rpc::interceptor::Interceptor;
    use crate::rpc::interceptors::{InvocationLogger, RateLimiter};
    use crate::rpc::registry::{ParamKind, Signature};
    use crate::rpc::test_helpers::{
        ConstHandler, CountingHandler, EchoHandler, FailHandler, PanicHandler,
        RecordingInterceptor, make_hub,
    };
    use crate::websocket::table::ConnectionTable;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn dispatcher(registry: MethodRegistry) -> Dispatcher {
        Dispatcher::new(Arc::new(registry), make_hub(), InterceptorChain::default())
    }

    fn frame(id: &str, target: &str, method: &str, args: Value) -> String {
        json!({"invocationId": id, "target": target, "method": method, "args": args}).to_string()
    }

    fn caller() -> ConnectionId {
        "conn_caller".into()
    }

    // ── parse_request ───────────────────────────────────────────────

    #[test]
    fn parse_valid_frame() {
        let req = parse_request(&frame("1", "Chat", "Send", json!(["hi"]))).unwrap();
        assert_eq!(req.invocation_id, "1");
        assert_eq!(req.args, vec![json!("hi")]);
    }

    #[test]
    fn parse_invalid_json_uses_unknown_id() {
        let err = parse_request("{not json").unwrap_err();
        assert_eq!(err.invocation_id, UNKNOWN_INVOCATION_ID);
        assert!(err.reason.starts_with("invalid JSON"));
    }

    #[test]
    fn parse_salvages_invocation_id() {
        let err = parse_request(r#"{"invocationId":"abc","method":"Send"}"#).unwrap_err();
        assert_eq!(err.invocation_id, "abc");
        assert!(err.reason.contains("target"));
    }

    #[test]
    fn parse_rejects_empty_fields() {
        let err = parse_request(&frame("1", "", "Send", json!([]))).unwrap_err();
        assert_eq!(err.reason, "target must not be empty");
        let err = parse_request(&frame("1", "Chat", "", json!([]))).unwrap_err();
        assert_eq!(err.reason, "method must not be empty");
        let err = parse_request(&frame("", "Chat", "Send", json!([]))).unwrap_err();
        assert_eq!(err.invocation_id, UNKNOWN_INVOCATION_ID);
        assert_eq!(err.reason, "invocationId must not be empty");
    }

    #[test]
    fn parse_rejects_non_object() {
        let err = parse_request("[1,2,3]").unwrap_err();
        assert_eq!(err.invocation_id, UNKNOWN_INVOCATION_ID);
    }

    // ── handle_message ──────────────────────────────────────────────

    #[tokio::test]
    async fn parse_error_skips_registry_and_chain() {
        let log = RecordingInterceptor::new_log();
        let interceptor: Arc<dyn Interceptor> = Arc::new(RecordingInterceptor::new("A", &log));
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![interceptor]).unwrap();
        let d = dispatcher(reg);

        let resp = d.handle_message("garbage", &caller()).await;

        assert_eq!(resp.invocation_id, "unknown");
        assert_eq!(resp.error_kind(), Some(PROTOCOL_PARSE_ERROR));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let log = RecordingInterceptor::new_log();
        let interceptor: Arc<dyn Interceptor> = Arc::new(RecordingInterceptor::new("A", &log));
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![interceptor]).unwrap();
        let d = dispatcher(reg);

        let resp = d
            .handle_message(&frame("7", "Chat", "Shout", json!([])), &caller())
            .await;

        assert_eq!(resp.invocation_id, "7");
        assert_eq!(resp.error_kind(), Some(METHOD_NOT_FOUND));
        assert!(resp.error.unwrap().message.contains("Chat.Shout"));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn success_echoes_invocation_id() {
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![]).unwrap();
        let d = dispatcher(reg);

        let resp = d
            .handle_message(&frame("42", "chat", "send", json!(["hi"])), &caller())
            .await;

        assert_eq!(resp, InvocationResponse::success("42", json!(["hi"])));
    }

    #[tokio::test]
    async fn signature_mismatch_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let log = RecordingInterceptor::new_log();
        let interceptor: Arc<dyn Interceptor> = Arc::new(RecordingInterceptor::new("A", &log));
        let mut reg = MethodRegistry::new();
        reg.register_typed(
            "Chat",
            "Join",
            Signature::new(vec![ParamKind::String], ParamKind::Any),
            CountingHandler(Arc::clone(&calls)),
            vec![interceptor],
        )
        .unwrap();
        let d = dispatcher(reg);

        let resp = d
            .handle_message(&frame("1", "Chat", "Join", json!([5])), &caller())
            .await;

        assert_eq!(resp.error_kind(), Some(INVALID_ARGUMENTS));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn return_kind_mismatch_still_succeeds() {
        let mut reg = MethodRegistry::new();
        reg.register_typed(
            "Chat",
            "Send",
            Signature::new(vec![], ParamKind::Object),
            ConstHandler(json!("pong")),
            vec![],
        )
        .unwrap();
        let d = dispatcher(reg);

        let resp = d
            .handle_message(&frame("1", "Chat", "Send", json!([])), &caller())
            .await;
        assert!(resp.is_success());
        assert_eq!(resp.result, Some(json!("pong")));
    }

    #[tokio::test]
    async fn internal_fault_is_sanitized() {
        let mut reg = MethodRegistry::new();
        reg.register(
            "Chat",
            "Send",
            FailHandler(HandlerFault::internal("db at /var/lib/hub locked")),
            vec![],
        )
        .unwrap();
        let d = dispatcher(reg);

        let resp = d
            .handle_message(&frame("1", "Chat", "Send", json!([])), &caller())
            .await;
        let error = resp.error.unwrap();
        assert_eq!(error.kind, INTERNAL_ERROR);
        assert_eq!(error.message, "Internal error");
    }

    #[tokio::test]
    async fn panic_becomes_error_response() {
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", PanicHandler, vec![]).unwrap();
        let d = dispatcher(reg);

        let resp = d
            .handle_message(&frame("1", "Chat", "Send", json!([])), &caller())
            .await;
        assert_eq!(resp.error_kind(), Some(HANDLER_PANIC));
        assert_eq!(resp.error.unwrap().message, "Internal error");
    }

    #[tokio::test]
    async fn veto_produces_suppressed_response() {
        let log = RecordingInterceptor::new_log();
        let interceptor: Arc<dyn Interceptor> =
            Arc::new(RecordingInterceptor::vetoing("Gate", &log));
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", ConstHandler(json!(true)), vec![interceptor])
            .unwrap();
        let d = dispatcher(reg);

        let resp = d
            .handle_message(&frame("9", "Chat", "Send", json!([])), &caller())
            .await;
        assert_eq!(resp, InvocationResponse::suppressed("9", "Gate"));
    }

    #[tokio::test]
    async fn rate_limited_chat_send_scenario() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(60)));
        let logger = Arc::new(InvocationLogger::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut reg = MethodRegistry::new();
        reg.register(
            "Chat",
            "Send",
            CountingHandler(Arc::clone(&calls)),
            vec![
                Arc::clone(&limiter) as Arc<dyn Interceptor>,
                Arc::clone(&logger) as Arc<dyn Interceptor>,
            ],
        )
        .unwrap();
        let d = dispatcher(reg);

        let first = d
            .handle_message(&frame("1", "Chat", "Send", json!(["hello"])), &caller())
            .await;
        assert!(first.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(logger.completed(), 1);

        let second = d
            .handle_message(&frame("2", "Chat", "Send", json!(["again"])), &caller())
            .await;
        assert_eq!(second, InvocationResponse::suppressed("2", "RateLimiter"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(logger.completed(), 1);

        let other = d
            .handle_message(
                &frame("3", "Chat", "Send", json!(["hi"])),
                &"conn_other".into(),
            )
            .await;
        assert!(other.is_success());
        assert_eq!(logger.completed(), 2);
    }

    // ── dispatch ────────────────────────────────────────────────────

    #[tokio::test]
    async fn dispatch_writes_response_to_sender() {
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![]).unwrap();
        let d = dispatcher(reg);
        let table = ConnectionTable::new(10);
        let (tx, mut rx) = mpsc::channel(4);
        let conn = table.add("conn_a".into(), tx).unwrap();

        let result = d
            .dispatch(&frame("5", "Chat", "Send", json!([1])), &conn)
            .await;

        assert!(result.delivered);
        let written: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(written, json!({"invocationId": "5", "result": [1]}));
    }

    #[tokio::test]
    async fn dispatch_to_closed_connection_drops_response() {
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![]).unwrap();
        let d = dispatcher(reg);
        let table = ConnectionTable::new(10);
        let (tx, _rx) = mpsc::channel(4);
        let conn = table.add("conn_a".into(), tx).unwrap();
        let _ = table.remove(conn.id());

        let result = d
            .dispatch(&frame("5", "Chat", "Send", json!([])), &conn)
            .await;

        assert!(!result.delivered);
        assert!(result.response.is_success());
    }
}
