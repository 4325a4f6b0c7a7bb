//! S3-compatible object store over blocking `reqwest`.
//!
//! Addressing:
//! - default: virtual-hosted, `https://<bucket>.s3.<region>.amazonaws.com/<key>`
//! - endpoint override: path-style, `<endpoint>/<bucket>/<key>`
//!
//! Every request is SigV4-signed and carries the fixed 5 minute timeout.
//! Transient failures (HTTP 429 and 5xx, connect errors, timeouts) are retried
//! with exponential backoff: `retry_delay_ms * 2^(attempt-1)`, capped at
//! [`MAX_RETRY_DELAY`].

use super::sign::{self, CanonicalRequest, SigningIdentity};
use super::{
    ObjectMeta, ObjectStore, ObjectSummary, PutObject, PutOutcome, SHA256_META, StoreError,
    WriteMode,
};
use crate::config::{StoreCredentials, UploadsConfig};
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap};
use reqwest::{Method, Url};
use std::time::Duration;

/// Per-request timeout applied to every remote call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Longest sleep between two attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

const META_HEADER_PREFIX: &str = "x-amz-meta-";

/// A request before signing. Re-signed on every attempt so retries carry a
/// fresh timestamp.
struct PlannedRequest<'a> {
    op: &'static str,
    key: &'a str,
    method: Method,
    uri: String,
    query: Vec<(&'static str, String)>,
    headers: Vec<(String, String)>,
    body: Option<&'a [u8]>,
}

pub struct S3Store {
    client: Client,
    credentials: StoreCredentials,
    /// Scheme + authority, no trailing slash.
    origin: String,
    /// `host[:port]` as signed.
    host: String,
    path_style: bool,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("origin", &self.origin)
            .field("path_style", &self.path_style)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl S3Store {
    pub fn new(credentials: StoreCredentials, uploads: &UploadsConfig) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let (origin, path_style) = match &credentials.endpoint {
            Some(endpoint) => (endpoint.trim_end_matches('/').to_string(), true),
            None => (
                format!(
                    "https://{}.s3.{}.amazonaws.com",
                    credentials.bucket, credentials.region
                ),
                false,
            ),
        };
        let url = Url::parse(&origin)
            .map_err(|e| StoreError::Malformed(format!("invalid endpoint {origin}: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(StoreError::Malformed(format!(
                    "endpoint has no host: {origin}"
                )));
            }
        };

        Ok(Self {
            client,
            credentials,
            origin,
            host,
            path_style,
            max_retries: uploads.max_retries,
            retry_delay_ms: uploads.retry_delay_ms,
        })
    }

    /// Canonical (encoded) URI for a key; an empty key addresses the bucket.
    fn uri_for(&self, key: &str) -> String {
        let encoded = sign::uri_encode(key, false);
        if self.path_style {
            if key.is_empty() {
                format!("/{}", self.credentials.bucket)
            } else {
                format!("/{}/{}", self.credentials.bucket, encoded)
            }
        } else {
            format!("/{encoded}")
        }
    }

    fn send(&self, planned: &PlannedRequest<'_>) -> Result<Response, StoreError> {
        let attempts = self.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(planned) {
                Ok(response)
                    if attempt < attempts && is_transient_status(response.status().as_u16()) =>
                {
                    tracing::warn!(
                        op = planned.op,
                        key = planned.key,
                        status = response.status().as_u16(),
                        "retrying ({}/{})",
                        attempt + 1,
                        attempts
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if attempt < attempts && e.is_transient() => {
                    tracing::warn!(
                        op = planned.op,
                        key = planned.key,
                        error = %e,
                        "retrying ({}/{})",
                        attempt + 1,
                        attempts
                    );
                }
                Err(e) => return Err(e),
            }
            std::thread::sleep(backoff_delay(self.retry_delay_ms, attempt));
        }
    }

    fn send_once(&self, planned: &PlannedRequest<'_>) -> Result<Response, StoreError> {
        let amz_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let payload_sha256 = match planned.body {
            Some(body) => crate::cache::hash_bytes(body),
            None => sign::EMPTY_PAYLOAD_SHA256.to_string(),
        };

        let mut headers = planned.headers.clone();
        headers.push(("host".to_string(), self.host.clone()));
        headers.push(("x-amz-date".to_string(), amz_date.clone()));
        headers.push(("x-amz-content-sha256".to_string(), payload_sha256.clone()));

        let canonical = CanonicalRequest {
            method: planned.method.as_str(),
            uri: &planned.uri,
            query: &planned.query,
            headers: &headers,
            payload_sha256: &payload_sha256,
        };
        let identity = SigningIdentity {
            access_key: &self.credentials.access_key,
            secret_key: &self.credentials.secret_key,
            region: &self.credentials.region,
        };
        let authorization = sign::authorization(&identity, &canonical, &amz_date);

        let query = canonical.canonical_query();
        let url = if query.is_empty() {
            format!("{}{}", self.origin, planned.uri)
        } else {
            format!("{}{}?{}", self.origin, planned.uri, query)
        };

        tracing::debug!(method = %planned.method, %url, "s3 request");
        let mut request = self
            .client
            .request(planned.method.clone(), &url)
            .header("authorization", authorization);
        for (name, value) in &headers {
            // reqwest derives Host from the URL
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = planned.body {
            request = request.body(body.to_vec());
        }
        Ok(request.send()?)
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

fn status_error(op: &'static str, key: &str, response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    StoreError::Status {
        op,
        key: key.to_string(),
        status,
        body: body.chars().take(500).collect(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.credentials.bucket
    }

    fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let planned = PlannedRequest {
            op: "HEAD",
            key,
            method: Method::HEAD,
            uri: self.uri_for(key),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        };
        let response = self.send(&planned)?;
        match response.status().as_u16() {
            200 => {
                let headers = response.headers();
                Ok(Some(ObjectMeta {
                    sha256: header_str(headers, &format!("{META_HEADER_PREFIX}{SHA256_META}"))
                        .map(str::to_string),
                }))
            }
            404 => Ok(None),
            _ => Err(status_error("HEAD", key, response)),
        }
    }

    fn put(&self, object: &PutObject) -> Result<PutOutcome, StoreError> {
        let mut headers = vec![
            (CONTENT_TYPE.as_str().to_string(), object.content_type.clone()),
            (
                format!("{META_HEADER_PREFIX}{SHA256_META}"),
                object.sha256.clone(),
            ),
        ];
        if let Some(encoding) = &object.content_encoding {
            headers.push((CONTENT_ENCODING.as_str().to_string(), encoding.clone()));
        }
        if let Some(cache_control) = &object.cache_control {
            headers.push(("cache-control".to_string(), cache_control.clone()));
        }
        if object.mode == WriteMode::CreateOnly {
            headers.push(("if-none-match".to_string(), "*".to_string()));
        }

        let planned = PlannedRequest {
            op: "PUT",
            key: &object.key,
            method: Method::PUT,
            uri: self.uri_for(&object.key),
            query: Vec::new(),
            headers,
            body: Some(&object.body),
        };
        let response = self.send(&planned)?;
        match response.status().as_u16() {
            200..=299 => Ok(PutOutcome::Written),
            412 if object.mode == WriteMode::CreateOnly => Ok(PutOutcome::AlreadyExists),
            _ => Err(status_error("PUT", &object.key, response)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = vec![("list-type", "2".to_string()), ("prefix", prefix.to_string())];
            if let Some(t) = &token {
                query.push(("continuation-token", t.clone()));
            }
            let planned = PlannedRequest {
                op: "LIST",
                key: prefix,
                method: Method::GET,
                uri: self.uri_for(""),
                query,
                headers: Vec::new(),
                body: None,
            };
            let response = self.send(&planned)?;
            if !response.status().is_success() {
                return Err(status_error("LIST", prefix, response));
            }
            let body = response.text()?;
            let page = parse_list_page(&body)?;
            objects.extend(page.objects);
            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }
        Ok(objects)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let planned = PlannedRequest {
            op: "DELETE",
            key,
            method: Method::DELETE,
            uri: self.uri_for(key),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        };
        let response = self.send(&planned)?;
        match response.status().as_u16() {
            200..=299 | 404 => Ok(()),
            _ => Err(status_error("DELETE", key, response)),
        }
    }
}

// =============================================================================
// ListObjectsV2 response parsing
// =============================================================================

#[derive(Debug)]
struct ListPage {
    objects: Vec<ObjectSummary>,
    truncated: bool,
    next_token: Option<String>,
}

fn parse_list_page(xml: &str) -> Result<ListPage, StoreError> {
    if !xml.contains("<ListBucketResult") {
        return Err(StoreError::Malformed(
            "expected ListBucketResult document".into(),
        ));
    }
    let mut objects = Vec::new();
    for block in xml_blocks(xml, "Contents") {
        let key = xml_text(block, "Key")
            .ok_or_else(|| StoreError::Malformed("Contents entry without Key".into()))?;
        let size = xml_text(block, "Size")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        objects.push(ObjectSummary { key, size });
    }
    Ok(ListPage {
        objects,
        truncated: xml_text(xml, "IsTruncated").as_deref() == Some("true"),
        next_token: xml_text(xml, "NextContinuationToken"),
    })
}

/// Inner text of every `<tag>…</tag>` element, in document order.
fn xml_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        match after.find(&close) {
            Some(end) => {
                blocks.push(&after[..end]);
                rest = &after[end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

/// Unescaped text of the first `<tag>` element.
fn xml_text(xml: &str, tag: &str) -> Option<String> {
    xml_blocks(xml, tag).first().map(|s| xml_unescape(s))
}

/// Decodes the predefined entities and numeric character references in one
/// pass. Anything unrecognized is kept verbatim.
fn xml_unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .and_then(|semi| decode_entity(&rest[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// `base_ms * 2^(attempt-1)`, saturating at [`MAX_RETRY_DELAY`].
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let cap = MAX_RETRY_DELAY;
    2_u64
        .checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base_ms.checked_mul(factor))
        .map_or(cap, |ms| Duration::from_millis(ms).min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn store_for(server: &mockito::Server, max_retries: u32) -> S3Store {
        let credentials = StoreCredentials {
            region: "us-east-1".into(),
            bucket: "bucket".into(),
            access_key: "AKID".into(),
            secret_key: "secret".into(),
            endpoint: Some(server.url()),
        };
        let uploads = UploadsConfig {
            max_concurrent: Some(1),
            max_retries,
            retry_delay_ms: 1,
        };
        S3Store::new(credentials, &uploads).unwrap()
    }

    fn object(key: &str, mode: WriteMode) -> PutObject {
        PutObject {
            key: key.to_string(),
            body: b"body{}".to_vec(),
            content_type: "text/css".to_string(),
            content_encoding: Some("gzip".to_string()),
            cache_control: Some("max-age=60".to_string()),
            sha256: "abc123".to_string(),
            mode,
        }
    }

    #[test]
    fn default_addressing_is_virtual_hosted() {
        let credentials = StoreCredentials {
            region: "eu-west-1".into(),
            bucket: "stories".into(),
            access_key: "a".into(),
            secret_key: "s".into(),
            endpoint: None,
        };
        let store = S3Store::new(credentials, &UploadsConfig::default()).unwrap();
        assert_eq!(store.origin, "https://stories.s3.eu-west-1.amazonaws.com");
        assert_eq!(store.host, "stories.s3.eu-west-1.amazonaws.com");
        assert_eq!(store.uri_for("a/b c.png"), "/a/b%20c.png");
    }

    #[test]
    fn endpoint_addressing_is_path_style() {
        let server = mockito::Server::new();
        let store = store_for(&server, 0);
        assert_eq!(store.uri_for("a/b.png"), "/bucket/a/b.png");
        assert_eq!(store.uri_for(""), "/bucket");
    }

    #[test]
    fn head_missing_object() {
        let mut server = mockito::Server::new();
        let _m = server.mock("HEAD", "/bucket/k.js").with_status(404).create();
        let store = store_for(&server, 0);
        assert_eq!(store.head("k.js").unwrap(), None);
    }

    #[test]
    fn head_reads_hash_metadata() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("HEAD", "/bucket/k.js")
            .match_header(
                "authorization",
                Matcher::Regex("^AWS4-HMAC-SHA256 Credential=AKID/".into()),
            )
            .match_header("x-amz-content-sha256", sign::EMPTY_PAYLOAD_SHA256)
            .with_status(200)
            .with_header("x-amz-meta-sha256", "deadbeef")
            .create();
        let store = store_for(&server, 0);
        let meta = store.head("k.js").unwrap().unwrap();
        assert_eq!(
            meta,
            ObjectMeta {
                sha256: Some("deadbeef".to_string())
            }
        );
    }

    #[test]
    fn put_sends_metadata_headers() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("PUT", "/bucket/css/main.css")
            .match_header("content-type", "text/css")
            .match_header("content-encoding", "gzip")
            .match_header("cache-control", "max-age=60")
            .match_header("x-amz-meta-sha256", "abc123")
            .match_header("if-none-match", Matcher::Missing)
            .match_body("body{}")
            .with_status(200)
            .create();
        let store = store_for(&server, 0);
        let outcome = store
            .put(&object("css/main.css", WriteMode::Overwrite))
            .unwrap();
        assert_eq!(outcome, PutOutcome::Written);
        m.assert();
    }

    #[test]
    fn create_only_put_maps_precondition_failure() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("PUT", "/bucket/a.png")
            .match_header("if-none-match", "*")
            .with_status(412)
            .create();
        let store = store_for(&server, 0);
        let outcome = store.put(&object("a.png", WriteMode::CreateOnly)).unwrap();
        assert_eq!(outcome, PutOutcome::AlreadyExists);
    }

    #[test]
    fn put_retries_server_errors_then_fails() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("PUT", "/bucket/a.png")
            .with_status(503)
            .expect(3)
            .create();
        let store = store_for(&server, 2);
        let err = store
            .put(&object("a.png", WriteMode::Overwrite))
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }));
        m.assert();
    }

    #[test]
    fn client_errors_are_not_retried() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("PUT", "/bucket/a.png")
            .with_status(403)
            .with_body("AccessDenied")
            .expect(1)
            .create();
        let store = store_for(&server, 3);
        let err = store
            .put(&object("a.png", WriteMode::Overwrite))
            .unwrap_err();
        match err {
            StoreError::Status { status, body, .. } => {
                assert_eq!(status, 403);
                assert_eq!(body, "AccessDenied");
            }
            other => panic!("unexpected error {other:?}"),
        }
        m.assert();
    }

    #[test]
    fn list_follows_continuation() {
        let mut server = mockito::Server::new();
        let _page1 = server
            .mock("GET", "/bucket")
            .match_query(Matcher::Regex("^list-type=2&prefix=p".into()))
            .with_status(200)
            .with_body(
                "<?xml version=\"1.0\"?><ListBucketResult>\
                 <IsTruncated>true</IsTruncated>\
                 <Contents><Key>p/a.html</Key><Size>10</Size></Contents>\
                 <NextContinuationToken>tok</NextContinuationToken>\
                 </ListBucketResult>",
            )
            .create();
        let _page2 = server
            .mock("GET", "/bucket")
            .match_query(Matcher::Regex("^continuation-token=tok&".into()))
            .with_status(200)
            .with_body(
                "<ListBucketResult><IsTruncated>false</IsTruncated>\
                 <Contents><Key>p/b&amp;c.css</Key><Size>3</Size></Contents>\
                 </ListBucketResult>",
            )
            .create();
        let store = store_for(&server, 0);
        let listed = store.list("p/").unwrap();
        assert_eq!(
            listed,
            vec![
                ObjectSummary {
                    key: "p/a.html".into(),
                    size: 10
                },
                ObjectSummary {
                    key: "p/b&c.css".into(),
                    size: 3
                },
            ]
        );
    }

    #[test]
    fn list_decodes_numeric_character_references() {
        let page = parse_list_page(
            "<ListBucketResult><IsTruncated>false</IsTruncated>\
             <Contents><Key>p/a&#13;b&#x1F;c&amp;#38;.txt</Key><Size>1</Size></Contents>\
             </ListBucketResult>",
        )
        .unwrap();
        assert_eq!(page.objects[0].key, "p/a\rb\u{1f}c&#38;.txt");
    }

    #[test]
    fn xml_unescape_keeps_unknown_references() {
        assert_eq!(xml_unescape("a&nbsp;b & c&#xZZ;"), "a&nbsp;b & c&#xZZ;");
        assert_eq!(xml_unescape("&#60;&#x3E;"), "<>");
        assert_eq!(xml_unescape("&#xD800;"), "&#xD800;");
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(500, 4), Duration::from_millis(4000));
        assert_eq!(backoff_delay(500, 20), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(500, 56), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(0, 65), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(0, 64), Duration::ZERO);
        assert_eq!(backoff_delay(u64::MAX, 1), MAX_RETRY_DELAY);
    }

    #[test]
    fn many_retries_without_delay_exhaust_cleanly() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("DELETE", "/bucket/a.html")
            .with_status(503)
            .expect(71)
            .create();
        let mut store = store_for(&server, 70);
        store.retry_delay_ms = 0;
        let err = store.delete("a.html").unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }));
        m.assert();
    }

    #[test]
    fn delete_accepts_missing_object() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("DELETE", "/bucket/gone.html")
            .with_status(404)
            .create();
        let store = store_for(&server, 0);
        assert!(store.delete("gone.html").is_ok());
    }

    #[test]
    fn parse_list_page_rejects_other_documents() {
        assert!(matches!(
            parse_list_page("<Error><Code>NoSuchBucket</Code></Error>"),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn parse_list_page_empty_listing() {
        let page = parse_list_page(
            "<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>",
        )
        .unwrap();
        assert!(page.objects.is_empty());
        assert!(!page.truncated);
    }
}
