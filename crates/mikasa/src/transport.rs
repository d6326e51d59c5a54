//! Outbound request description and the transport seam.
//!
//! The engine never talks to the network itself. It describes a request as an
//! [`Endpoint`] and hands it to a [`Transport`]. [`ReqwestTransport`] is the
//! production implementation; tests script their own.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use auth_config_and_utils::Config;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// JSON document.
    Json(Value),
    /// `application/x-www-form-urlencoded` pairs, in order.
    Form(Vec<(String, String)>),
}

/// Declarative description of one request.
///
/// Every field is optional so an endpoint can be layered over a set of
/// defaults with [`Endpoint::merged_over`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Endpoint {
    pub method: Option<Method>,
    pub url: Option<String>,
    /// Overrides the transport's default base URL. `Some("")` means "no base".
    pub base_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub body: Option<Body>,
    /// Dotted path extracted from the response body instead of returning it
    /// whole.
    pub property_name: Option<String>,
}

impl Endpoint {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    pub fn form<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Some(Body::Form(
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ));
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn property(mut self, path: impl Into<String>) -> Self {
        self.property_name = Some(path.into());
        self
    }

    /// Effective method (GET when unset).
    pub fn method(&self) -> Method {
        self.method.unwrap_or(Method::Get)
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Layer `self` over `defaults`. Fields set on `self` win; header and
    /// param maps are merged key by key.
    pub fn merged_over(self, defaults: &Endpoint) -> Endpoint {
        let mut headers = defaults.headers.clone();
        for (name, value) in self.headers {
            headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
            headers.insert(name, value);
        }

        let mut params = defaults.params.clone();
        params.extend(self.params);

        Endpoint {
            method: self.method.or(defaults.method),
            url: self.url.or_else(|| defaults.url.clone()),
            base_url: self.base_url.or_else(|| defaults.base_url.clone()),
            headers,
            params,
            body: self.body.or_else(|| defaults.body.clone()),
            property_name: self.property_name.or_else(|| defaults.property_name.clone()),
        }
    }
}

/// Walk a dotted path (`"data.user"`) into a JSON value. Array segments are
/// addressed by index.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// A completed response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

/// Executes endpoints.
///
/// Implementations must map non-2xx responses to [`AuthError::Http`] so the
/// refresh protocol can see the status code.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, endpoint: &Endpoint) -> AuthResult<HttpResponse>;
}

/// Loading indicator collaborator.
pub trait ProgressIndicator: Send + Sync {
    /// A request completed.
    fn finish(&self) {}

    /// A request failed for good.
    fn fail(&self) {}
}

/// Progress indicator that shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressIndicator for NoProgress {}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Option<Url>,
}

impl ReqwestTransport {
    pub fn new(base_url: Option<Url>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: Option<Url>) -> Self {
        Self { client, base_url }
    }

    /// Transport resolving relative endpoints against `config.base_url`.
    pub fn from_config(config: &Config) -> AuthResult<Self> {
        Ok(Self::new(config.base_url()?))
    }

    /// Absolute URL for `endpoint`, honouring its base URL override.
    pub fn resolve_url(&self, endpoint: &Endpoint) -> AuthResult<Url> {
        let path = endpoint
            .url
            .as_deref()
            .ok_or_else(|| AuthError::Config("endpoint has no url".to_string()))?;

        let base = match endpoint.base_url.as_deref() {
            Some("") => None,
            Some(base) => Some(Url::parse(base)?),
            None => self.base_url.clone(),
        };

        let url = match base {
            Some(base) => base.join(path)?,
            None => Url::parse(path)?,
        };
        Ok(url)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, endpoint: &Endpoint) -> AuthResult<HttpResponse> {
        let url = self.resolve_url(endpoint)?;
        let method = match endpoint.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        debug!(method = endpoint.method().as_str(), url = %url, "Dispatching request");

        let mut request = self.client.request(method, url);
        if !endpoint.params.is_empty() {
            request = request.query(&endpoint.params);
        }
        for (name, value) in &endpoint.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match &endpoint.body {
            Some(Body::Json(body)) => request.json(body),
            Some(Body::Form(pairs)) => request.form(pairs),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            debug!(status = status.as_u16(), "Request rejected");
            return Err(AuthError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_fields_win_over_defaults() {
        let defaults = Endpoint::get("/default")
            .header("Accept", "application/json")
            .header("X-Client", "web")
            .param("page", "1")
            .property("data");
        let endpoint = Endpoint::post("/users")
            .header("accept", "text/plain")
            .param("page", "2");

        let merged = endpoint.merged_over(&defaults);

        assert_eq!(merged.method(), Method::Post);
        assert_eq!(merged.url.as_deref(), Some("/users"));
        assert_eq!(merged.header_value("Accept"), Some("text/plain"));
        assert_eq!(merged.header_value("x-client"), Some("web"));
        assert_eq!(merged.headers.len(), 2);
        assert_eq!(merged.params.get("page").map(String::as_str), Some("2"));
        assert_eq!(merged.property_name.as_deref(), Some("data"));
    }

    #[test]
    fn test_method_defaults_to_get() {
        assert_eq!(Endpoint::default().method(), Method::Get);
    }

    #[test]
    fn test_form_body_keeps_order() {
        let endpoint = Endpoint::post("/token").form([("b", "2"), ("a", "1")]);
        assert_eq!(
            endpoint.body,
            Some(Body::Form(vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
            ]))
        );
    }

    #[test]
    fn test_lookup_path() {
        let body = json!({"data": {"user": {"id": 7}, "items": [{"n": 1}, {"n": 2}]}});

        assert_eq!(lookup_path(&body, "data.user.id"), Some(&json!(7)));
        assert_eq!(lookup_path(&body, "data.items.1.n"), Some(&json!(2)));
        assert_eq!(lookup_path(&body, "data.missing"), None);
        assert_eq!(lookup_path(&body, "data.user.id.deeper"), None);
        assert_eq!(lookup_path(&body, ""), Some(&body));
    }

    #[test]
    fn test_resolve_url_uses_default_base() {
        let transport = ReqwestTransport::new(Some(Url::parse("https://api.example.com").unwrap()));
        let url = transport.resolve_url(&Endpoint::get("/me")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/me");
    }

    #[test]
    fn test_resolve_url_empty_base_bypasses_default() {
        let transport = ReqwestTransport::new(Some(Url::parse("https://api.example.com").unwrap()));
        let endpoint = Endpoint::post("https://auth.example.com/oauth/token").base_url("");
        let url = transport.resolve_url(&endpoint).unwrap();
        assert_eq!(url.as_str(), "https://auth.example.com/oauth/token");
    }

    #[test]
    fn test_resolve_url_explicit_base() {
        let transport = ReqwestTransport::new(None);
        let endpoint = Endpoint::get("/v2/me").base_url("https://other.example.com");
        let url = transport.resolve_url(&endpoint).unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/v2/me");
    }

    #[test]
    fn test_resolve_url_relative_without_base_fails() {
        let transport = ReqwestTransport::new(None);
        let result = transport.resolve_url(&Endpoint::get("/me"));
        assert!(matches!(result, Err(AuthError::InvalidUrl(_))));
    }

    #[test]
    fn test_from_config_uses_base_url() {
        let mut config = Config::default();
        config.base_url = Some("https://api.example.com/v1/".to_string());
        let transport = ReqwestTransport::from_config(&config).unwrap();

        let url = transport.resolve_url(&Endpoint::get("users/me")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/users/me");

        config.base_url = Some("not a url".to_string());
        assert!(matches!(
            ReqwestTransport::from_config(&config),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_url_requires_url() {
        let transport = ReqwestTransport::new(None);
        let result = transport.resolve_url(&Endpoint::default());
        assert!(matches!(result, Err(AuthError::Config(_))));
    }
}
