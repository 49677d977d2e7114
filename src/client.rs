use std::error::Error as _;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::auth::TokenMinter;
use crate::config::{ClientSettings, Config};
use crate::context::CallContext;
use crate::envelope::{ApiErrorDocument, ResponseBody, body_snippet};
use crate::error::{AscError, Result};
use crate::paginate::{Paginated, paginate_all_with_limit};
use crate::query::QueryBag;
use crate::retry::{RetryDecision, RetryMode, RetryPolicy, decide_for_status, decide_for_transport, parse_retry_after};

const USER_AGENT: &str = concat!("asc-cli/", env!("CARGO_PKG_VERSION"));
const JSON: &str = "application/json";

/// Classification that picks the per-attempt deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    UploadPhase,
}

/// One step of the three-phase asset upload.
#[derive(Debug, Clone)]
pub enum UploadPhaseRequest<'a> {
    /// POST asset metadata to the API; returns the reservation.
    Reserve { path: &'a str, body: &'a Value },
    /// Send raw bytes to a pre-signed location. Carries no bearer token.
    Transfer {
        method: Method,
        url: &'a str,
        headers: &'a [(String, String)],
        body: Bytes,
        /// `(reservation, offset, length)` identity of the chunk.
        idempotency_key: &'a str,
    },
    /// PATCH the reservation as uploaded; retried only before any response.
    Commit { path: &'a str, body: &'a Value },
}

struct PreparedRequest {
    method: Method,
    url: Url,
    body: Option<Bytes>,
    headers: HeaderMap,
    authenticated: bool,
    mode: RetryMode,
    kind: OperationKind,
}

struct RawResponse {
    status: StatusCode,
    retry_after: Option<Duration>,
    body: Bytes,
}

enum AttemptFailure {
    /// Transport-level failure; `pre_response` when no response can have been produced.
    Transport { error: AscError, pre_response: bool },
    Fatal(AscError),
}

/// Shared, reentrant App Store Connect client: one connection pool and one token cache.
pub struct AppStoreConnectClient {
    http: Client,
    base_url: Url,
    minter: TokenMinter,
    settings: ClientSettings,
    retry: RetryPolicy,
}

impl AppStoreConnectClient {
    pub fn new(config: Config) -> Result<Self> {
        let Config {
            credentials,
            base_url,
            settings,
        } = config;
        let minter = TokenMinter::new(
            &credentials,
            settings.token_lifetime,
            settings.token_min_validity,
        )?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .use_rustls_tls()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .connect_timeout(settings.request_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|err| AscError::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url,
            minter,
            retry: settings.retry.clone().into(),
            settings,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn minter(&self) -> &TokenMinter {
        &self.minter
    }

    /// A bearer token valid for at least the configured minimum validity.
    pub async fn bearer(&self) -> Result<String> {
        self.minter.current_token().await
    }

    /// GET `path` relative to the base URL.
    pub async fn do_read<T: ResponseBody>(
        &self,
        ctx: &CallContext,
        path: &str,
        query: &QueryBag,
    ) -> Result<T> {
        let url = self.endpoint(path, query)?;
        self.execute(ctx, self.api_request(Method::GET, url, None, OperationKind::Read))
            .await
    }

    /// POST/PATCH/DELETE with an optional JSON body; retry eligibility follows the method.
    pub async fn do_write<T, B>(
        &self,
        ctx: &CallContext,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T>
    where
        T: ResponseBody,
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(path, &QueryBag::new())?;
        let body = body.map(encode_json).transpose()?;
        self.execute(ctx, self.api_request(method, url, body, OperationKind::Write))
            .await
    }

    /// GET a server-issued `links.next` URL after checking it stays on an allowed host.
    pub async fn do_next<T: ResponseBody>(&self, ctx: &CallContext, next_url: &str) -> Result<T> {
        let url = self.validate_next(next_url)?;
        self.execute(ctx, self.api_request(Method::GET, url, None, OperationKind::Read))
            .await
    }

    pub async fn do_upload_phase<T: ResponseBody>(
        &self,
        ctx: &CallContext,
        phase: UploadPhaseRequest<'_>,
    ) -> Result<T> {
        let request = match phase {
            UploadPhaseRequest::Reserve { path, body } => {
                let url = self.endpoint(path, &QueryBag::new())?;
                self.api_request(
                    Method::POST,
                    url,
                    Some(encode_json(body)?),
                    OperationKind::UploadPhase,
                )
            }
            UploadPhaseRequest::Commit { path, body } => {
                let url = self.endpoint(path, &QueryBag::new())?;
                let mut request = self.api_request(
                    Method::PATCH,
                    url,
                    Some(encode_json(body)?),
                    OperationKind::UploadPhase,
                );
                request.mode = RetryMode::PreResponseOnly;
                request
            }
            UploadPhaseRequest::Transfer {
                method,
                url,
                headers,
                body,
                idempotency_key,
            } => {
                let url = self.validate_transfer(url)?;
                debug!(key = idempotency_key, bytes = body.len(), "transferring chunk");
                PreparedRequest {
                    method,
                    url,
                    body: Some(body),
                    headers: verbatim_headers(headers)?,
                    authenticated: false,
                    mode: RetryMode::Idempotent,
                    kind: OperationKind::UploadPhase,
                }
            }
        };
        self.execute(ctx, request).await
    }

    /// Walks `links.next` from `first` until the last page.
    pub async fn paginate<P>(&self, ctx: &CallContext, first: P) -> Result<P>
    where
        P: Paginated + ResponseBody,
    {
        paginate_all_with_limit(ctx, first, self.settings.max_pages, |next| async move {
            self.do_next::<P>(ctx, &next).await
        })
        .await
    }

    fn endpoint(&self, path: &str, query: &QueryBag) -> Result<Url> {
        let path = path.trim();
        if path.is_empty() || path.contains("://") {
            return Err(AscError::InvalidArgument(format!(
                "expected an API path relative to the base URL, got {path:?}"
            )));
        }
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| AscError::InvalidArgument(format!("invalid path {path:?}: {err}")))?;
        if !query.is_empty() {
            let mut merged = QueryBag::parse(url.query().unwrap_or_default());
            for (key, value) in query.iter() {
                merged.set(key, value);
            }
            merged.apply_to(&mut url);
        }
        Ok(url)
    }

    fn validate_next(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw.trim()).map_err(|err| {
            AscError::protocol("invalid_next_url", format!("links.next is not a URL: {err}"))
        })?;
        let host = url.host_str().map(str::to_ascii_lowercase).unwrap_or_default();
        let allowed = match url.scheme() {
            "https" => {
                same_origin(&url, &self.base_url)
                    || (url.port().is_none()
                        && self.settings.allowed_next_hosts.iter().any(|h| *h == host))
            }
            // Plain http only against a plain-http base (local mock servers).
            "http" => self.base_url.scheme() == "http" && same_origin(&url, &self.base_url),
            _ => false,
        };
        if !allowed {
            return Err(AscError::Security {
                kind: "cross_host_next",
                message: format!("refusing to follow links.next to {}://{host}", url.scheme()),
            });
        }
        Ok(url)
    }

    fn validate_transfer(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw.trim()).map_err(|err| {
            AscError::protocol("invalid_upload_url", format!("upload operation URL: {err}"))
        })?;
        let secure = url.scheme() == "https" || (url.scheme() == "http" && self.base_url.scheme() == "http");
        if !secure || url.host_str().is_none() {
            return Err(AscError::Security {
                kind: "insecure_upload_url",
                message: format!("upload operation uses unsupported URL scheme {:?}", url.scheme()),
            });
        }
        Ok(url)
    }

    fn api_request(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
        kind: OperationKind,
    ) -> PreparedRequest {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON));
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        }
        PreparedRequest {
            mode: RetryMode::for_method(&method),
            method,
            url,
            body,
            headers,
            authenticated: true,
            kind,
        }
    }

    fn attempt_timeout(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Read | OperationKind::Write => self.settings.request_timeout,
            OperationKind::UploadPhase => self.settings.upload_timeout,
        }
    }

    async fn execute<T: ResponseBody>(&self, ctx: &CallContext, request: PreparedRequest) -> Result<T> {
        let policy = &self.retry;
        let mut attempt = 0u32;
        let mut backoffs = 0u32;
        let mut waited = Duration::ZERO;
        let mut rotated = false;

        loop {
            ctx.check()?;
            attempt += 1;
            let token = if request.authenticated {
                Some(self.minter.current_token().await?)
            } else {
                None
            };
            let (decision, error) = match self.send_once(ctx, &request, token.as_deref()).await {
                Ok(response) if response.status.is_success() => {
                    debug!(
                        attempt,
                        method = %request.method,
                        host = request.url.host_str().unwrap_or_default(),
                        path = request.url.path(),
                        status = response.status.as_u16(),
                        bytes = response.body.len(),
                        "request succeeded"
                    );
                    return T::decode(&response.body);
                }
                Ok(response) => {
                    debug!(
                        attempt,
                        method = %request.method,
                        host = request.url.host_str().unwrap_or_default(),
                        path = request.url.path(),
                        status = response.status.as_u16(),
                        "request failed"
                    );
                    let decision = decide_for_status(
                        request.mode,
                        response.status,
                        response.retry_after,
                        rotated,
                    );
                    (decision, error_from_response(&response))
                }
                Err(AttemptFailure::Transport { error, pre_response }) => {
                    debug!(
                        attempt,
                        method = %request.method,
                        host = request.url.host_str().unwrap_or_default(),
                        path = request.url.path(),
                        pre_response,
                        error = %error,
                        "transport failure"
                    );
                    (decide_for_transport(request.mode, pre_response), error)
                }
                Err(AttemptFailure::Fatal(error)) => return Err(error),
            };

            if attempt >= policy.max_attempts {
                return Err(error);
            }
            match decision {
                RetryDecision::GiveUp => return Err(error),
                RetryDecision::RotateAndRetry => {
                    rotated = true;
                    if let Some(stale) = &token {
                        self.minter.rotate_if(stale);
                    }
                    warn!(attempt, path = request.url.path(), "unauthorized, retrying with a fresh token");
                }
                RetryDecision::Retry { server_hint } => {
                    let delay = server_hint.unwrap_or_else(|| policy.backoff(backoffs));
                    backoffs += 1;
                    if waited + delay > policy.max_total_wait {
                        return Err(error);
                    }
                    waited += delay;
                    warn!(
                        attempt,
                        path = request.url.path(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying request"
                    );
                    ctx.sleep(delay).await?;
                }
            }
        }
    }

    async fn send_once(
        &self,
        ctx: &CallContext,
        request: &PreparedRequest,
        token: Option<&str>,
    ) -> std::result::Result<RawResponse, AttemptFailure> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let exchange = async {
            let response = builder.send().await.map_err(|err| {
                let pre_response = err.is_connect() || !err.is_timeout();
                AttemptFailure::Transport {
                    error: network_error(&err),
                    pre_response,
                }
            })?;
            let status = response.status();
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| parse_retry_after(value, Utc::now()));
            let body = response.bytes().await.map_err(|err| AttemptFailure::Transport {
                error: network_error(&err),
                pre_response: false,
            })?;
            Ok(RawResponse {
                status,
                retry_after,
                body,
            })
        };

        let timeout = self.attempt_timeout(request.kind);
        match ctx.run(tokio::time::timeout(timeout, exchange)).await {
            Err(canceled) => Err(AttemptFailure::Fatal(canceled)),
            Ok(Err(_elapsed)) => Err(AttemptFailure::Transport {
                error: AscError::Network {
                    message: format!("no response within {timeout:?}"),
                    timeout: true,
                },
                pre_response: false,
            }),
            Ok(Ok(outcome)) => outcome,
        }
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str().map(str::to_ascii_lowercase) == b.host_str().map(str::to_ascii_lowercase)
        && a.port_or_known_default() == b.port_or_known_default()
}

fn encode_json<B: Serialize + ?Sized>(body: &B) -> Result<Bytes> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|err| AscError::InvalidArgument(format!("request body is not serializable: {err}")))
}

fn verbatim_headers(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
            AscError::protocol("invalid_upload_header", format!("header name {name:?}: {err}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|err| {
            AscError::protocol("invalid_upload_header", format!("header {name}: {err}"))
        })?;
        map.append(name, value);
    }
    Ok(map)
}

fn network_error(err: &reqwest::Error) -> AscError {
    // Display of reqwest::Error carries the URL; pre-signed locations hold credentials in it.
    let mut message = kind_label(err).to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    AscError::Network {
        message,
        timeout: err.is_timeout(),
    }
}

fn kind_label(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() || err.is_decode() {
        "response body interrupted"
    } else {
        "request failed"
    }
}

fn error_from_response(response: &RawResponse) -> AscError {
    let status = response.status;
    let body = &response.body;
    let errors = if body.iter().all(u8::is_ascii_whitespace) {
        Vec::new()
    } else {
        match serde_json::from_slice::<ApiErrorDocument>(body) {
            Ok(document) => document.errors,
            Err(err) => {
                return AscError::Protocol {
                    kind: "error_body",
                    message: format!("HTTP {} with an undecodable error body: {err}", status.as_u16()),
                    body: Some(body_snippet(body)),
                };
            }
        }
    };
    match status.as_u16() {
        401 | 403 => AscError::Auth {
            status: status.as_u16(),
            errors,
        },
        429 => AscError::RateLimited {
            retry_after: response.retry_after,
            errors,
        },
        500..=599 => AscError::Server {
            status: status.as_u16(),
            errors,
        },
        _ => AscError::Client {
            status: status.as_u16(),
            errors,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::TEST_PRIVATE_KEY;
    use crate::config::Credentials;
    use crate::error::ErrorKind;

    fn client() -> AppStoreConnectClient {
        let config = Config::new(Credentials::new("issuer", "KEY", TEST_PRIVATE_KEY)).unwrap();
        AppStoreConnectClient::new(config).unwrap()
    }

    fn response(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status: StatusCode::from_u16(status).unwrap(),
            retry_after: None,
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn next_url_must_stay_on_base_host() {
        let client = client();
        assert!(client
            .validate_next("https://api.appstoreconnect.apple.com/v1/apps?cursor=X")
            .is_ok());
        let err = client
            .validate_next("https://evil.example.com/v1/apps?cursor=X")
            .unwrap_err();
        assert!(matches!(err, AscError::Security { kind: "cross_host_next", .. }));
        let err = client
            .validate_next("http://api.appstoreconnect.apple.com/v1/apps")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
    }

    #[test]
    fn allow_list_extends_next_hosts() {
        let mut config = Config::new(Credentials::new("issuer", "KEY", TEST_PRIVATE_KEY)).unwrap();
        config.settings.allowed_next_hosts = vec!["assets.example.com".into()];
        let client = AppStoreConnectClient::new(config).unwrap();
        assert!(client.validate_next("https://Assets.Example.com/page/2").is_ok());
    }

    #[test]
    fn absolute_urls_are_not_paths() {
        let err = client()
            .endpoint("https://evil.example.com/v1/apps", &QueryBag::new())
            .unwrap_err();
        assert!(matches!(err, AscError::InvalidArgument(_)));
    }

    #[test]
    fn endpoint_merges_query() {
        let mut query = QueryBag::new();
        query.set("limit", "2");
        let url = client().endpoint("/v1/apps?include=builds", &query).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.appstoreconnect.apple.com/v1/apps?include=builds&limit=2"
        );
    }

    #[test]
    fn error_statuses_map_to_kinds() {
        let body = r#"{"errors":[{"status":"409","code":"ENTITY_ERROR","title":"Conflict","detail":"Duplicate"}]}"#;
        let err = error_from_response(&response(409, body));
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(err.api_errors()[0].code.as_deref(), Some("ENTITY_ERROR"));

        assert_eq!(error_from_response(&response(403, "")).kind(), ErrorKind::Auth);
        assert_eq!(error_from_response(&response(429, "")).kind(), ErrorKind::RateLimited);
        assert_eq!(error_from_response(&response(502, "")).kind(), ErrorKind::Server);
    }

    #[test]
    fn undecodable_error_body_is_protocol_error() {
        let err = error_from_response(&response(500, "<html>oops</html>"));
        assert!(matches!(
            err,
            AscError::Protocol { kind: "error_body", body: Some(ref snippet), .. } if snippet.contains("oops")
        ));
    }
}
