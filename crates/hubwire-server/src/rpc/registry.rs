//! Method registry: maps (target, method) to a resolved handler descriptor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::rpc::context::InvocationContext;
use crate::rpc::errors::{HandlerFault, RegistryError};
use crate::rpc::interceptor::Interceptor;

/// Trait implemented by every hub method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler for one invocation.
    async fn handle(&self, ctx: &InvocationContext) -> Result<Value, HandlerFault>;
}

/// JSON kind of a parameter or return value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// Any JSON value, including `null`.
    Any,
    /// `true` / `false`.
    Bool,
    /// Integral number.
    Integer,
    /// Any number.
    Number,
    /// String.
    String,
    /// Array.
    Array,
    /// Object.
    Object,
}

impl ParamKind {
    /// Whether `value` is of this kind.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Short name of a value's JSON kind, for error messages.
    pub fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(n) if n.is_f64() => "number",
            Value::Number(_) => "integer",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// Parameter and return kinds of a registered method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    params: Option<Vec<ParamKind>>,
    returns: ParamKind,
}

impl Signature {
    /// A signature that accepts any argument list.
    pub fn untyped() -> Self {
        Self {
            params: None,
            returns: ParamKind::Any,
        }
    }

    /// A typed signature: exact arity and per-position kinds.
    pub fn new(params: Vec<ParamKind>, returns: ParamKind) -> Self {
        Self {
            params: Some(params),
            returns,
        }
    }

    /// Declared parameter kinds (`None` when untyped).
    pub fn params(&self) -> Option<&[ParamKind]> {
        self.params.as_deref()
    }

    /// Declared return kind.
    ///
    /// Checked against the final result by [`Signature::check_result`]; the
    /// dispatcher logs a mismatch but still sends the result.
    pub fn returns(&self) -> ParamKind {
        self.returns
    }

    /// Validate an argument list against this signature.
    pub fn check_args(&self, args: &[Value]) -> Result<(), HandlerFault> {
        let Some(params) = &self.params else {
            return Ok(());
        };
        if params.len() != args.len() {
            return Err(HandlerFault::invalid_arguments(format!(
                "expected {} argument(s), got {}",
                params.len(),
                args.len()
            )));
        }
        for (i, (kind, arg)) in params.iter().zip(args).enumerate() {
            if !kind.matches(arg) {
                return Err(HandlerFault::invalid_arguments(format!(
                    "argument {i}: expected {kind:?}, got {}",
                    ParamKind::describe(arg)
                )));
            }
        }
        Ok(())
    }
}

impl Signature {
    /// Whether a final result matches the declared return kind.
    pub fn check_result(&self, result: &Value) -> bool {
        self.returns.matches(result)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::untyped()
    }
}

/// Case-insensitive registry key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodKey {
    target: String,
    method: String,
}

impl MethodKey {
    /// Build a key; both parts are folded to lowercase.
    pub fn new(target: &str, method: &str) -> Self {
        Self {
            target: target.to_lowercase(),
            method: method.to_lowercase(),
        }
    }
}

/// Everything needed to invoke one registered method.
///
/// Immutable after registration. The interceptor list is a shared slice so
/// in-flight contexts can hold it without copying.
pub struct HandlerDescriptor {
    target: String,
    method: String,
    signature: Signature,
    handler: Arc<dyn MethodHandler>,
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl HandlerDescriptor {
    /// Target name as registered.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Method name as registered.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// `Target.method` display name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.target, self.method)
    }

    /// Declared signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The handler.
    pub fn handler(&self) -> &Arc<dyn MethodHandler> {
        &self.handler
    }

    /// Interceptors in registration order.
    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("HandlerDescriptor")
            .field("target", &self.target)
            .field("method", &self.method)
            .field("signature", &self.signature)
            .field("interceptors", &names)
            .finish_non_exhaustive()
    }
}

/// Registry mapping (target, method) to handler descriptors.
///
/// Mutated only during setup; the server wraps it in an `Arc` and resolves
/// without locking.
pub struct MethodRegistry {
    handlers: HashMap<MethodKey, Arc<HandlerDescriptor>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register an untyped method.
    pub fn register(
        &mut self,
        target: &str,
        method: &str,
        handler: impl MethodHandler + 'static,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Result<(), RegistryError> {
        self.register_typed(target, method, Signature::untyped(), handler, interceptors)
    }

    /// Register a method with a typed signature.
    pub fn register_typed(
        &mut self,
        target: &str,
        method: &str,
        signature: Signature,
        handler: impl MethodHandler + 'static,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Result<(), RegistryError> {
        let key = MethodKey::new(target, method);
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::DuplicateMethod {
                target: target.to_owned(),
                method: method.to_owned(),
            });
        }
        let descriptor = HandlerDescriptor {
            target: target.to_owned(),
            method: method.to_owned(),
            signature,
            handler: Arc::new(handler),
            interceptors: interceptors.into(),
        };
        let _ = self.handlers.insert(key, Arc::new(descriptor));
        Ok(())
    }

    /// Resolve a (target, method) pair.
    pub fn resolve(
        &self,
        target: &str,
        method: &str,
    ) -> Result<Arc<HandlerDescriptor>, RegistryError> {
        self.handlers
            .get(&MethodKey::new(target, method))
            .cloned()
            .ok_or_else(|| RegistryError::MethodNotFound {
                target: target.to_owned(),
                method: method.to_owned(),
            })
    }

    /// List all registered methods as `Target.method` (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .values()
            .map(|d| d.qualified_name())
            .collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, target: &str, method: &str) -> bool {
        self.handlers.contains_key(&MethodKey::new(target, method))
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::test_helpers::{ConstHandler, EchoHandler, RecordingInterceptor};
    use proptest::prelude::*;
    use serde_json::json;

    // ── register / resolve ──────────────────────────────────────────

    #[test]
    fn register_and_resolve() {
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![]).unwrap();

        let desc = reg.resolve("Chat", "Send").unwrap();
        assert_eq!(desc.target(), "Chat");
        assert_eq!(desc.method(), "Send");
        assert_eq!(desc.qualified_name(), "Chat.Send");
        assert!(desc.interceptors().is_empty());
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![]).unwrap();
        let desc = reg.resolve("chat", "SEND").unwrap();
        assert_eq!(desc.qualified_name(), "Chat.Send");
        assert!(reg.has_method("CHAT", "send"));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![]).unwrap();
        let err = reg
            .register("chat", "send", EchoHandler, vec![])
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateMethod { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unknown_method_is_not_found() {
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![]).unwrap();
        let err = reg.resolve("Chat", "Shout").unwrap_err();
        assert_eq!(
            err,
            RegistryError::MethodNotFound {
                target: "Chat".into(),
                method: "Shout".into()
            }
        );
        assert!(reg.resolve("Lobby", "Send").is_err());
    }

    #[test]
    fn same_method_under_different_targets() {
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Join", ConstHandler(json!("chat")), vec![])
            .unwrap();
        reg.register("Game", "Join", ConstHandler(json!("game")), vec![])
            .unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.resolve("Game", "Join").unwrap().target(), "Game");
    }

    #[test]
    fn methods_sorted() {
        let mut reg = MethodRegistry::new();
        reg.register("System", "Ping", EchoHandler, vec![]).unwrap();
        reg.register("Chat", "Send", EchoHandler, vec![]).unwrap();
        reg.register("Chat", "Join", EchoHandler, vec![]).unwrap();
        assert_eq!(reg.methods(), vec!["Chat.Join", "Chat.Send", "System.Ping"]);
    }

    #[test]
    fn empty_registry() {
        let reg = MethodRegistry::default();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
        assert!(reg.methods().is_empty());
    }

    #[test]
    fn interceptor_order_is_kept() {
        let log = RecordingInterceptor::new_log();
        let a: Arc<dyn Interceptor> = Arc::new(RecordingInterceptor::new("A", &log));
        let b: Arc<dyn Interceptor> = Arc::new(RecordingInterceptor::new("B", &log));
        let mut reg = MethodRegistry::new();
        reg.register("Chat", "Send", EchoHandler, vec![a, b]).unwrap();

        let desc = reg.resolve("Chat", "Send").unwrap();
        let names: Vec<&str> = desc.interceptors().iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert!(format!("{desc:?}").contains("\"A\""));
    }

    // ── Signature ───────────────────────────────────────────────────

    #[test]
    fn untyped_signature_accepts_anything() {
        let sig = Signature::untyped();
        assert!(sig.check_args(&[]).is_ok());
        assert!(sig.check_args(&[json!(1), json!("x"), json!(null)]).is_ok());
        assert!(sig.params().is_none());
        assert_eq!(sig.returns(), ParamKind::Any);
    }

    #[test]
    fn typed_signature_checks_arity() {
        let sig = Signature::new(vec![ParamKind::String], ParamKind::Bool);
        let err = sig.check_args(&[]).unwrap_err();
        assert_eq!(err.kind(), crate::rpc::errors::INVALID_ARGUMENTS);
        assert!(err.to_string().contains("expected 1 argument(s), got 0"));
    }

    #[test]
    fn typed_signature_checks_kinds() {
        let sig = Signature::new(vec![ParamKind::String, ParamKind::Integer], ParamKind::Any);
        assert!(sig.check_args(&[json!("room"), json!(3)]).is_ok());
        let err = sig.check_args(&[json!("room"), json!(3.5)]).unwrap_err();
        assert!(err.to_string().contains("argument 1"));
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn result_checked_against_return_kind() {
        let sig = Signature::new(vec![], ParamKind::Object);
        assert!(sig.check_result(&json!({"delivered": 1})));
        assert!(!sig.check_result(&json!("pong")));
        assert!(Signature::untyped().check_result(&json!(null)));
    }

    #[test]
    fn param_kind_matching() {
        assert!(ParamKind::Any.matches(&json!(null)));
        assert!(ParamKind::Bool.matches(&json!(false)));
        assert!(ParamKind::Integer.matches(&json!(-4)));
        assert!(!ParamKind::Integer.matches(&json!(1.5)));
        assert!(ParamKind::Number.matches(&json!(1.5)));
        assert!(ParamKind::Number.matches(&json!(2)));
        assert!(ParamKind::String.matches(&json!("s")));
        assert!(ParamKind::Array.matches(&json!([])));
        assert!(ParamKind::Object.matches(&json!({})));
        assert!(!ParamKind::Object.matches(&json!([])));
    }

    #[test]
    fn register_typed_keeps_signature() {
        let mut reg = MethodRegistry::new();
        let sig = Signature::new(vec![ParamKind::String], ParamKind::Any);
        reg.register_typed("Chat", "Join", sig.clone(), EchoHandler, vec![])
            .unwrap();
        assert_eq!(reg.resolve("Chat", "Join").unwrap().signature(), &sig);
    }

    // ── Properties ──────────────────────────────────────────────────

    proptest! {
        #[test]
        fn resolves_exactly_what_was_registered(
            names in proptest::collection::hash_set(("[a-z]{1,6}", "[a-z]{1,6}"), 1..20),
            probe in ("[a-z]{1,6}", "[a-z]{1,6}"),
        ) {
            let mut reg = MethodRegistry::new();
            for (i, (target, method)) in names.iter().enumerate() {
                reg.register(target, method, ConstHandler(json!(i)), vec![]).unwrap();
            }
            prop_assert_eq!(reg.len(), names.len());

            for (target, method) in &names {
                let desc = reg.resolve(target, method).unwrap();
                prop_assert_eq!(desc.target(), target.as_str());
                prop_assert_eq!(desc.method(), method.as_str());
                let dup = reg.register(target, method, EchoHandler, vec![]);
                prop_assert!(
                    matches!(dup, Err(RegistryError::DuplicateMethod { .. })),
                    "duplicate registration must fail"
                );
            }

            let registered = names.contains(&probe);
            prop_assert_eq!(reg.resolve(&probe.0, &probe.1).is_ok(), registered);
        }
    }
}
