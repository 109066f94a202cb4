use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// Request description handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl RequestSpec {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(http::Method::POST, url).with_body(body)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response description returned by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseSpec {
    pub status: u16,
    /// Lowercased header names.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl ResponseSpec {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Below 400: anything else is a protocol-level failure.
    pub fn is_protocol_success(&self) -> bool {
        self.status < 400
    }
}

/// Per-iteration inputs available to a request builder.
#[derive(Debug, Clone, Copy)]
pub struct IterationContext<'a> {
    pub scenario: &'a str,
    /// 1-based VU ordinal.
    pub vu: u64,
    /// 0-based iteration index within this VU.
    pub iteration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BuildError(pub String);

impl BuildError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Produces the request for one iteration. Implementations must not share mutable state
/// between calls.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, ctx: &IterationContext<'_>) -> Result<RequestSpec, BuildError>;
}

/// Sends the same request every iteration.
#[derive(Debug, Clone)]
pub struct StaticRequest(pub RequestSpec);

impl RequestBuilder for StaticRequest {
    fn build(&self, _ctx: &IterationContext<'_>) -> Result<RequestSpec, BuildError> {
        Ok(self.0.clone())
    }
}

pub struct FnRequest<F>(F);

impl<F> RequestBuilder for FnRequest<F>
where
    F: Fn(&IterationContext<'_>) -> Result<RequestSpec, BuildError> + Send + Sync,
{
    fn build(&self, ctx: &IterationContext<'_>) -> Result<RequestSpec, BuildError> {
        (self.0)(ctx)
    }
}

pub fn request_fn<F>(f: F) -> FnRequest<F>
where
    F: Fn(&IterationContext<'_>) -> Result<RequestSpec, BuildError> + Send + Sync,
{
    FnRequest(f)
}

/// Named predicate over a response.
pub trait Check: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, response: &ResponseSpec) -> bool;
}

impl fmt::Debug for dyn Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Check").field(&self.name()).finish()
    }
}

impl fmt::Debug for dyn RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RequestBuilder")
    }
}

#[derive(Debug, Clone)]
pub struct StatusCheck {
    name: String,
    status: u16,
}

impl StatusCheck {
    pub fn new(status: u16) -> Self {
        Self {
            name: format!("is status {status}"),
            status,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Check for StatusCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, response: &ResponseSpec) -> bool {
        response.status == self.status
    }
}

#[derive(Debug, Clone)]
pub struct BodyContainsCheck {
    name: String,
    needle: String,
}

impl BodyContainsCheck {
    pub fn new(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self {
            name: format!("body contains {needle}"),
            needle,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Check for BodyContainsCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, response: &ResponseSpec) -> bool {
        response
            .body_utf8()
            .is_some_and(|body| body.contains(&self.needle))
    }
}

pub struct FnCheck<F> {
    name: String,
    f: F,
}

impl<F> Check for FnCheck<F>
where
    F: Fn(&ResponseSpec) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, response: &ResponseSpec) -> bool {
        (self.f)(response)
    }
}

pub fn check_fn<F>(name: impl Into<String>, f: F) -> FnCheck<F>
where
    F: Fn(&ResponseSpec) -> bool + Send + Sync,
{
    FnCheck {
        name: name.into(),
        f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_checks() {
        let mut res = ResponseSpec::with_status(200);
        res.body = Bytes::from_static(b"{\"win\":0.85}");

        assert!(StatusCheck::new(200).check(&res));
        assert!(!StatusCheck::new(201).check(&res));
        assert_eq!(StatusCheck::new(200).name(), "is status 200");
        assert_eq!(StatusCheck::new(200).named("ok").name(), "ok");

        assert!(BodyContainsCheck::new("win").check(&res));
        assert!(!BodyContainsCheck::new("lose").check(&res));

        let c = check_fn("has body", |r: &ResponseSpec| !r.body.is_empty());
        assert!(c.check(&res));
    }

    #[test]
    fn fn_request_sees_iteration_context() {
        let builder = request_fn(|ctx: &IterationContext<'_>| {
            if ctx.iteration > 1 {
                return Err(BuildError::new("too many"));
            }
            Ok(RequestSpec::get(format!("http://x/{}/{}", ctx.vu, ctx.iteration)))
        });
        let ctx = IterationContext {
            scenario: "default",
            vu: 3,
            iteration: 1,
        };
        let req = builder.build(&ctx).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(req.url, "http://x/3/1");

        let ctx = IterationContext { iteration: 2, ..ctx };
        assert!(builder.build(&ctx).is_err());
    }

    #[test]
    fn response_helpers() {
        let mut res = ResponseSpec::with_status(503);
        res.headers.push(("content-type".into(), "application/json".into()));
        assert!(!res.is_protocol_success());
        assert_eq!(res.header("Content-Type"), Some("application/json"));
        assert!(ResponseSpec::with_status(302).is_protocol_success());
    }
}
