//! Request descriptors.

use std::time::Duration;

use serde_json::Value;

use crate::transport::Method;

/// Immutable description of one API call.
///
/// Built with chained methods and handed to
/// [`Dispatcher::dispatch`](crate::Dispatcher::dispatch). The `retried` flag
/// caps authentication-triggered replays at exactly one: the dispatcher
/// replays a call at most once, with a copy whose flag is set.
///
/// # Example
///
/// ```
/// use depot_core::RequestDescriptor;
/// use serde_json::json;
///
/// let request = RequestDescriptor::post("/products")
///     .json(json!({ "name": "Pallet jack", "quantity": 4 }))
///     .silent();
///
/// assert_eq!(request.path(), "/products");
/// assert!(request.is_silent());
/// assert!(!request.is_retried());
/// ```
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<Value>,
    retried: bool,
    skip_auth: bool,
    skip_refresh: bool,
    silent: bool,
    timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// Describe a call with the given method and API path.
    ///
    /// The path is relative to the configured base URL.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            retried: false,
            skip_auth: false,
            skip_refresh: false,
            silent: false,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Do not attach the stored access credential.
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    /// Opt out of the refresh protocol entirely: any failure, including 401,
    /// is returned as-is without refresh, replay, or session teardown.
    pub fn skip_refresh(mut self) -> Self {
        self.skip_refresh = true;
        self
    }

    /// Never invoke the notifier for this call's failures.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Override the configured timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark the call as already replayed once after a refresh.
    ///
    /// A 401 on a retried call is terminal.
    pub fn mark_retried(mut self) -> Self {
        self.retried = true;
        self
    }

    pub(crate) fn to_retry(&self) -> Self {
        self.clone().mark_retried()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub fn skips_auth(&self) -> bool {
        self.skip_auth
    }

    pub fn skips_refresh(&self) -> bool {
        self.skip_refresh
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }
}
