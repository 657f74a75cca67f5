use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::FdaError;

const OPENFDA_API: &str = "openfda";

/// Substring of a 500 body that marks a search expression rejected by the
/// openFDA query parser (typically a date range).
pub const PARSE_FAILURE_MARKER: &str = "parse_exception";
pub const MIN_LIMIT: i64 = 1;
pub const MAX_LIMIT: i64 = 1000;
pub const DEFAULT_SORT: &str = "receivedate:desc";
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// One raw FAERS report. The schema belongs to openFDA and is not validated.
pub type Record = Value;

#[derive(Debug, Clone)]
pub struct QueryParams {
    pub limit: i64,
    pub search_expression: Option<String>,
    pub sort: String,
    pub api_key: Option<String>,
    pub timeout_seconds: f64,
}

impl QueryParams {
    pub fn new(limit: i64) -> Self {
        Self {
            limit,
            search_expression: None,
            sort: DEFAULT_SORT.to_string(),
            api_key: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_search(mut self, search: Option<String>) -> Self {
        self.search_expression = search;
        self
    }

    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = sort.into();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(MIN_LIMIT, MAX_LIMIT)
    }

    fn search(&self) -> Option<&str> {
        self.search_expression
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn timeout(&self) -> Duration {
        if self.timeout_seconds.is_finite() && self.timeout_seconds > 0.0 {
            Duration::from_secs_f64(self.timeout_seconds)
        } else {
            Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS)
        }
    }

    fn query_pairs(&self, include_search: bool) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("limit", self.clamped_limit().to_string()),
            ("sort", self.sort.trim().to_string()),
        ];
        if include_search && let Some(search) = self.search() {
            pairs.push(("search", search.to_string()));
        }
        if let Some(key) = self.api_key() {
            pairs.push(("api_key", key.to_string()));
        }
        pairs
    }
}

/// A successfully parsed page: `meta` and `results` passed through verbatim.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub meta: Map<String, Value>,
    pub records: Vec<Record>,
    /// The search expression was rejected and the page came from the
    /// unfiltered retry.
    pub search_dropped: bool,
}

impl EventPage {
    fn meta_results_field(&self, field: &str) -> Option<u64> {
        self.meta.get("results")?.get(field)?.as_u64()
    }

    pub fn total(&self) -> Option<u64> {
        self.meta_results_field("total")
    }
}

/// Outcome of one fetch. Failures are values, never panics or raw transport errors.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Success {
        meta: Map<String, Value>,
        records: Vec<Record>,
        search_dropped: bool,
    },
    Failure {
        message: String,
    },
}

impl QueryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn records(&self) -> &[Record] {
        match self {
            Self::Success { records, .. } => records,
            Self::Failure { .. } => &[],
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { message } => Some(message),
        }
    }

    pub fn into_page(self) -> Result<EventPage, String> {
        match self {
            Self::Success {
                meta,
                records,
                search_dropped,
            } => Ok(EventPage {
                meta,
                records,
                search_dropped,
            }),
            Self::Failure { message } => Err(message),
        }
    }
}

impl From<Result<EventPage, FdaError>> for QueryResult {
    fn from(value: Result<EventPage, FdaError>) -> Self {
        match value {
            Ok(page) => Self::Success {
                meta: page.meta,
                records: page.records,
                search_dropped: page.search_dropped,
            },
            Err(err) => Self::Failure {
                message: err.to_string(),
            },
        }
    }
}

struct RawResponse {
    status: StatusCode,
    content_type: Option<HeaderValue>,
    body: Vec<u8>,
}

impl RawResponse {
    fn is_parse_failure(&self) -> bool {
        self.status == StatusCode::INTERNAL_SERVER_ERROR
            && String::from_utf8_lossy(&self.body).contains(PARSE_FAILURE_MARKER)
    }
}

pub struct OpenFdaClient {
    client: reqwest::blocking::Client,
    url: String,
}

impl OpenFdaClient {
    /// Blocking client for the drug event endpoint. Build and use it off the
    /// async runtime.
    pub fn new(config: &Config) -> Result<Self, FdaError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            url: config.events_url.trim().to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: String) -> Result<Self, FdaError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            url: format!("{}/drug/event.json", base.trim_end_matches('/')),
        })
    }

    /// Fetches one page of reports. Never fails: every error becomes `Failure`.
    pub fn fetch(&self, params: &QueryParams) -> QueryResult {
        self.try_fetch(params).into()
    }

    /// Fetches one page of reports, keeping the typed error.
    ///
    /// A 500 carrying the parse-failure marker is retried exactly once without
    /// `search`; whatever the retry returns is final. A page from that retry
    /// has `search_dropped` set when a search had been sent.
    pub fn try_fetch(&self, params: &QueryParams) -> Result<EventPage, FdaError> {
        let mut resp = self.send(params, true)?;
        let mut search_dropped = false;

        if resp.is_parse_failure() {
            warn!(
                source = OPENFDA_API,
                search = params.search().unwrap_or_default(),
                "search expression rejected by openFDA parser; retrying once without search"
            );
            resp = self.send(params, false)?;
            search_dropped = params.search().is_some();
        }

        if !resp.status.is_success() {
            return Err(FdaError::Http {
                api: OPENFDA_API.to_string(),
                status: resp.status.as_u16(),
                excerpt: crate::sources::body_excerpt(&resp.body),
            });
        }

        crate::sources::ensure_json_content_type(
            OPENFDA_API,
            resp.content_type.as_ref(),
            &resp.body,
        )?;
        let mut page = parse_page(&resp.body)?;
        page.search_dropped = search_dropped;
        Ok(page)
    }

    fn send(&self, params: &QueryParams, include_search: bool) -> Result<RawResponse, FdaError> {
        let pairs = params.query_pairs(include_search);
        debug!(
            source = OPENFDA_API,
            url = %self.url,
            limit = params.clamped_limit(),
            with_search = include_search && params.search().is_some(),
            "openFDA request"
        );

        let resp = self
            .client
            .get(&self.url)
            .query(&pairs)
            .timeout(params.timeout())
            .send()
            .map_err(|err| FdaError::transport(OPENFDA_API, err))?;

        let status = resp.status();
        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let body = crate::sources::read_limited_body(resp, OPENFDA_API)?;
        debug!(source = OPENFDA_API, status = status.as_u16(), bytes = body.len(), "openFDA response");

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

fn parse_page(body: &[u8]) -> Result<EventPage, FdaError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| FdaError::parse(OPENFDA_API, format!("invalid JSON: {err}")))?;
    let Value::Object(mut root) = value else {
        return Err(FdaError::parse(
            OPENFDA_API,
            "expected a JSON object at the top level",
        ));
    };

    let meta = match root.remove("meta") {
        Some(Value::Object(meta)) => meta,
        None | Some(Value::Null) => Map::new(),
        Some(_) => return Err(FdaError::parse(OPENFDA_API, "`meta` is not an object")),
    };
    let records = match root.remove("results") {
        Some(Value::Array(records)) => records,
        Some(_) => return Err(FdaError::parse(OPENFDA_API, "`results` is not an array")),
        None => return Err(FdaError::parse(OPENFDA_API, "missing `results` array")),
    };

    Ok(EventPage {
        meta,
        records,
        search_dropped: false,
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use super::*;
    use crate::transform::adverse_event::{DisplayRow, RowLayout};
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DATE_RANGE: &str = "receivedate:[20230101 TO 20241231]";
    const PARSE_FAILURE_BODY: &str = r#"{"error":{"code":"SERVER_ERROR","message":"Check your request and try again","details":"[parse_exception] Encountered \" <RANGE_GOOP> \"TO \"\" at line 1"}}"#;

    fn canned_page() -> Value {
        serde_json::json!({
            "meta": {"results": {"total": 2, "skip": 0, "limit": 2}},
            "results": [
                {
                    "receivedate": "20230615",
                    "safetyreportid": "111",
                    "patient": {
                        "drug": [{"medicinalproduct": "DRUGA"}],
                        "reaction": [{"reactionmeddrapt": "HEADACHE"}]
                    }
                },
                {
                    "receivedate": "20230616",
                    "safetyreportid": "112",
                    "drug": [{"brand_name": "DRUGB"}],
                    "reaction": [{"reactionmeddrapt": "NAUSEA"}]
                }
            ]
        })
    }

    async fn fetch_blocking(base: String, params: QueryParams) -> QueryResult {
        tokio::task::spawn_blocking(move || {
            OpenFdaClient::new_for_test(base)
                .expect("client")
                .fetch(&params)
        })
        .await
        .expect("blocking fetch task")
    }

    #[test]
    fn clamped_limit_stays_in_range() {
        assert_eq!(QueryParams::new(0).clamped_limit(), 1);
        assert_eq!(QueryParams::new(-42).clamped_limit(), 1);
        assert_eq!(QueryParams::new(1).clamped_limit(), 1);
        assert_eq!(QueryParams::new(500).clamped_limit(), 500);
        assert_eq!(QueryParams::new(1000).clamped_limit(), 1000);
        assert_eq!(QueryParams::new(5000).clamped_limit(), 1000);
    }

    #[test]
    fn query_pairs_skip_blank_search_and_key() {
        let params = QueryParams::new(10)
            .with_search(Some("   ".into()))
            .with_api_key(Some(" ".into()));
        let keys: Vec<&str> = params.query_pairs(true).iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["limit", "sort"]);

        let params = QueryParams::new(10)
            .with_search(Some(format!("  {DATE_RANGE} ")))
            .with_api_key(Some("k".into()));
        let pairs = params.query_pairs(true);
        assert!(pairs.contains(&("search", DATE_RANGE.to_string())));
        assert!(pairs.contains(&("api_key", "k".to_string())));
        assert!(!params.query_pairs(false).iter().any(|(k, _)| *k == "search"));
    }

    #[test]
    fn non_positive_timeout_falls_back_to_default() {
        let params = QueryParams::new(1).with_timeout_seconds(0.0);
        assert_eq!(params.timeout(), Duration::from_secs(30));
        let params = QueryParams::new(1).with_timeout_seconds(f64::NAN);
        assert_eq!(params.timeout(), Duration::from_secs(30));
        let params = QueryParams::new(1).with_timeout_seconds(2.5);
        assert_eq!(params.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn parse_page_requires_results_array() {
        let err = parse_page(br#"{"meta":{}}"#).expect_err("missing results");
        assert!(err.to_string().contains("missing `results`"));

        let err = parse_page(br#"{"meta":{},"results":{"a":1}}"#).expect_err("object results");
        assert!(err.to_string().contains("not an array"));

        let page = parse_page(br#"{"results":[]}"#).expect("meta may be absent");
        assert!(page.meta.is_empty());
        assert!(page.records.is_empty());
    }

    #[tokio::test]
    async fn fetch_sends_clamped_limit_upper_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param("limit", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(canned_page()))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetch_blocking(server.uri(), QueryParams::new(5000)).await;
        assert!(result.is_success(), "{:?}", result.message());
    }

    #[tokio::test]
    async fn fetch_sends_clamped_limit_lower_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(canned_page()))
            .expect(2)
            .mount(&server)
            .await;

        assert!(fetch_blocking(server.uri(), QueryParams::new(0)).await.is_success());
        assert!(fetch_blocking(server.uri(), QueryParams::new(-3)).await.is_success());
    }

    #[tokio::test]
    async fn fetch_omits_blank_search_and_missing_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param("sort", "receivedate:desc"))
            .and(query_param_is_missing("search"))
            .and(query_param_is_missing("api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(canned_page()))
            .expect(1)
            .mount(&server)
            .await;

        let params = QueryParams::new(2).with_search(Some("  ".into()));
        assert!(fetch_blocking(server.uri(), params).await.is_success());
    }

    #[tokio::test]
    async fn fetch_includes_api_key_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param("api_key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(canned_page()))
            .expect(1)
            .mount(&server)
            .await;

        let params = QueryParams::new(2).with_api_key(Some("test-key".into()));
        assert!(fetch_blocking(server.uri(), params).await.is_success());
    }

    #[tokio::test]
    async fn parse_failure_retries_once_without_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param("search", DATE_RANGE))
            .respond_with(ResponseTemplate::new(500).set_body_string(PARSE_FAILURE_BODY))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param_is_missing("search"))
            .and(query_param("limit", "15"))
            .and(query_param("sort", "receivedate:desc"))
            .and(query_param("api_key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(canned_page()))
            .expect(1)
            .mount(&server)
            .await;

        let params = QueryParams::new(15)
            .with_search(Some(DATE_RANGE.into()))
            .with_api_key(Some("k".into()));
        let result = fetch_blocking(server.uri(), params).await;
        assert!(result.is_success(), "{:?}", result.message());
        assert_eq!(result.records().len(), 2);
        let page = result.into_page().expect("success");
        assert!(page.search_dropped);
    }

    #[tokio::test]
    async fn parse_failure_without_search_does_not_flag_dropped_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .respond_with(ResponseTemplate::new(500).set_body_string(PARSE_FAILURE_BODY))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(canned_page()))
            .expect(1)
            .mount(&server)
            .await;

        let page = fetch_blocking(server.uri(), QueryParams::new(2))
            .await
            .into_page()
            .expect("success");
        assert!(!page.search_dropped);
    }

    #[tokio::test]
    async fn retry_transport_failure_is_final_after_two_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param("search", DATE_RANGE))
            .respond_with(ResponseTemplate::new(500).set_body_string(PARSE_FAILURE_BODY))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param_is_missing("search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(canned_page())
                    .set_delay(Duration::from_secs(3)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let params = QueryParams::new(15)
            .with_search(Some(DATE_RANGE.into()))
            .with_timeout_seconds(1.0);
        let result = fetch_blocking(server.uri(), params).await;
        let message = result.message().expect("failure");
        assert!(message.starts_with("transport error"), "{message}");
        let received = server.received_requests().await.expect("recording enabled");
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn timeout_is_a_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(canned_page())
                    .set_delay(Duration::from_secs(3)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let params = QueryParams::new(5)
            .with_search(Some(DATE_RANGE.into()))
            .with_timeout_seconds(1.0);
        let result = fetch_blocking(server.uri(), params).await;
        let message = result.message().expect("failure");
        assert!(message.starts_with("transport error"), "{message}");
        let received = server.received_requests().await.expect("recording enabled");
        assert_eq!(received.len(), 1);
    }

    #[test]
    fn stalled_body_is_a_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request);
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 1000\r\n\r\n{\"meta\":",
            );
            let _ = stream.flush();
            std::thread::sleep(Duration::from_secs(3));
        });

        let result = OpenFdaClient::new_for_test(format!("http://{addr}"))
            .expect("client")
            .fetch(&QueryParams::new(1).with_timeout_seconds(1.0));
        let message = result.message().expect("failure");
        assert!(message.starts_with("transport error"), "{message}");
        server.join().expect("server thread");
    }

    #[tokio::test]
    async fn parse_failure_is_not_retried_twice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param("search", DATE_RANGE))
            .respond_with(ResponseTemplate::new(500).set_body_string(PARSE_FAILURE_BODY))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param_is_missing("search"))
            .respond_with(ResponseTemplate::new(500).set_body_string(PARSE_FAILURE_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let params = QueryParams::new(15).with_search(Some(DATE_RANGE.into()));
        let result = fetch_blocking(server.uri(), params).await;
        let message = result.message().expect("failure");
        assert!(message.contains("HTTP 500"), "{message}");
        assert!(message.contains(PARSE_FAILURE_MARKER));
    }

    #[tokio::test]
    async fn server_error_without_marker_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param("search", DATE_RANGE))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .and(query_param_is_missing("search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(canned_page()))
            .expect(0)
            .mount(&server)
            .await;

        let params = QueryParams::new(15).with_search(Some(DATE_RANGE.into()));
        let result = fetch_blocking(server.uri(), params).await;
        let message = result.message().expect("failure");
        assert!(message.contains("HTTP 500"));
        assert!(message.contains("upstream exploded"));
    }

    #[tokio::test]
    async fn other_statuses_are_terminal_with_bounded_excerpt() {
        let server = MockServer::start().await;
        let long_body = format!("{}{}", PARSE_FAILURE_MARKER, "x".repeat(2_000));
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .respond_with(ResponseTemplate::new(429).set_body_string(long_body))
            .expect(1)
            .mount(&server)
            .await;

        let params = QueryParams::new(15).with_search(Some(DATE_RANGE.into()));
        let result = fetch_blocking(server.uri(), params).await;
        let message = result.message().expect("failure");
        assert!(message.contains("HTTP 429"));
        let excerpt = message.split(": ").nth(1).expect("excerpt");
        assert!(excerpt.chars().count() <= 300);
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let result = fetch_blocking(server.uri(), QueryParams::new(1)).await;
        let message = result.message().expect("failure");
        assert!(message.starts_with("parse error"), "{message}");
    }

    #[tokio::test]
    async fn transport_failure_becomes_failure_value() {
        // Nothing listens on port 1; the single attempt fails at connect.
        let result = fetch_blocking(
            "http://127.0.0.1:1".into(),
            QueryParams::new(5)
                .with_search(Some(DATE_RANGE.into()))
                .with_timeout_seconds(2.0),
        )
        .await;
        let message = result.message().expect("failure");
        assert!(message.starts_with("transport error"), "{message}");
    }

    #[tokio::test]
    async fn canned_page_renders_expected_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drug/event.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(canned_page()))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetch_blocking(server.uri(), QueryParams::new(2)).await;
        let page = result.into_page().expect("success");
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total(), Some(2));
        assert!(!page.search_dropped);

        let rows: Vec<[String; 4]> = page
            .records
            .iter()
            .map(|r| DisplayRow::from_record(r, RowLayout::COMPACT).cells().map(String::from))
            .collect();
        assert_eq!(
            rows,
            vec![
                ["20230615", "111", "DRUGA", "HEADACHE"].map(String::from),
                ["20230616", "112", "DRUGB", "NAUSEA"].map(String::from),
            ]
        );
    }
}
