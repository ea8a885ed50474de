//! Middleware context.
//!
//! The [`MiddlewareContext`] carries per-request state through the pipeline:
//! the request ID, the route's operation ID (set by the host router), the
//! merged parameter map and the key material resolved for the caller.

use bytes::Bytes;
use portcullis_core::RequestId;
use portcullis_crypto::SecretMaterial;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Context that flows through the middleware pipeline.
///
/// # Example
///
/// ```
/// use portcullis_middleware::context::MiddlewareContext;
/// use serde_json::json;
///
/// let mut ctx = MiddlewareContext::for_operation("user.login");
/// ctx.params_mut().insert("name".to_string(), json!("bob"));
///
/// assert_eq!(ctx.operation_id(), Some("user.login"));
/// assert_eq!(ctx.param_str("name"), Some("bob"));
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    request_id: RequestId,
    operation_id: Option<String>,

    /// Query, body and decrypted parameters.
    params: Map<String, Value>,

    /// The request body as received.
    raw_body: Bytes,

    /// Decoded application id, once a stage has needed it.
    app_id: Option<String>,

    /// Key material resolved for `app_id`.
    secret: Option<Arc<SecretMaterial>>,

    started_at: Instant,

    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a new context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            operation_id: None,
            params: Map::new(),
            raw_body: Bytes::new(),
            app_id: None,
            secret: None,
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Creates a context for a routed operation.
    #[must_use]
    pub fn for_operation(operation_id: impl Into<String>) -> Self {
        let mut ctx = Self::new();
        ctx.operation_id = Some(operation_id.into());
        ctx
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Sets the request ID.
    ///
    /// This should only be called by the request ID stage.
    pub fn set_request_id(&mut self, request_id: RequestId) {
        self.request_id = request_id;
    }

    /// Returns the operation ID, if the route was resolved.
    #[must_use]
    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    /// Sets the operation ID.
    pub fn set_operation_id(&mut self, operation_id: impl Into<String>) {
        self.operation_id = Some(operation_id.into());
    }

    /// Returns the request parameters.
    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Returns the request parameters for modification.
    pub fn params_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.params
    }

    /// Replaces the request parameters.
    pub fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    /// Returns a parameter if it is a string.
    #[must_use]
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    /// Returns the raw request body.
    #[must_use]
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    /// Stores the raw request body.
    pub fn set_raw_body(&mut self, body: Bytes) {
        self.raw_body = body;
    }

    /// Returns the decoded application id, if known.
    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    /// Sets the decoded application id.
    pub fn set_app_id(&mut self, app_id: impl Into<String>) {
        self.app_id = Some(app_id.into());
    }

    /// Returns the resolved key material, if any.
    #[must_use]
    pub fn secret(&self) -> Option<&Arc<SecretMaterial>> {
        self.secret.as_ref()
    }

    /// Stores resolved key material.
    pub fn set_secret(&mut self, material: Arc<SecretMaterial>) {
        self.secret = Some(material);
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_context_is_empty() {
        let ctx = MiddlewareContext::new();
        assert!(ctx.operation_id().is_none());
        assert!(ctx.params().is_empty());
        assert!(ctx.raw_body().is_empty());
        assert!(ctx.app_id().is_none());
        assert!(ctx.secret().is_none());
    }

    #[test]
    fn test_param_str_ignores_non_strings() {
        let mut ctx = MiddlewareContext::new();
        ctx.params_mut().insert("age".to_string(), json!(3));
        ctx.params_mut().insert("name".to_string(), json!("bob"));

        assert_eq!(ctx.param_str("name"), Some("bob"));
        assert_eq!(ctx.param_str("age"), None);
        assert_eq!(ctx.param_str("missing"), None);
    }

    #[test]
    fn test_secret_roundtrip() {
        let mut ctx = MiddlewareContext::new();
        ctx.set_app_id("X1");
        ctx.set_secret(Arc::new(SecretMaterial::new("X1")));
        assert_eq!(ctx.secret().map(|m| m.app_id.as_str()), Some("X1"));
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, PartialEq)]
        struct Marker(u8);

        let mut ctx = MiddlewareContext::new();
        assert!(ctx.get_extension::<Marker>().is_none());

        ctx.set_extension(Marker(7));
        assert_eq!(ctx.get_extension::<Marker>(), Some(&Marker(7)));
        assert_eq!(ctx.remove_extension::<Marker>(), Some(Marker(7)));
        assert!(ctx.get_extension::<Marker>().is_none());
    }
}
