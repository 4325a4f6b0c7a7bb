//! AWS Signature Version 4 for S3 requests.
//!
//! Only header-based signing is implemented; presigned URLs are not needed.
//!
//! ```text
//! canonical request  = METHOD \n URI \n QUERY \n HEADERS \n SIGNED \n PAYLOAD-HASH
//! string to sign     = ALGORITHM \n AMZ-DATE \n SCOPE \n hex(sha256(canonical request))
//! signing key        = HMAC chain over date → region → service → "aws4_request"
//! ```

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// SHA-256 of an empty payload.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Identity used to sign one request.
pub struct SigningIdentity<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
}

/// Everything that goes into a request signature.
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Already URI-encoded path, starting with `/`.
    pub uri: &'a str,
    /// Raw (unencoded) query pairs.
    pub query: &'a [(&'a str, String)],
    /// Headers to sign. Names must include `host`, `x-amz-date` and
    /// `x-amz-content-sha256`.
    pub headers: &'a [(String, String)],
    pub payload_sha256: &'a str,
}

impl CanonicalRequest<'_> {
    /// Sorted, encoded query string (also used verbatim in the request URL).
    pub fn canonical_query(&self) -> String {
        let mut pairs: Vec<(String, String)> = self
            .query
            .iter()
            .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
            .collect();
        pairs.sort();
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn sorted_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
            .collect();
        headers.sort();
        headers
    }

    fn signed_headers(&self) -> String {
        self.sorted_headers()
            .into_iter()
            .map(|(k, _)| k)
            .collect::<Vec<_>>()
            .join(";")
    }

    fn render(&self) -> String {
        let headers: String = self
            .sorted_headers()
            .iter()
            .map(|(k, v)| format!("{k}:{v}\n"))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.uri,
            self.canonical_query(),
            headers,
            self.signed_headers(),
            self.payload_sha256
        )
    }
}

/// Compute the `Authorization` header value.
///
/// `amz_date` is the request timestamp in `YYYYMMDD'T'HHMMSS'Z'` form and
/// must match the `x-amz-date` header being signed.
pub fn authorization(
    identity: &SigningIdentity<'_>,
    request: &CanonicalRequest<'_>,
    amz_date: &str,
) -> String {
    let date = &amz_date[..8.min(amz_date.len())];
    let scope = format!("{date}/{}/{SERVICE}/aws4_request", identity.region);
    let canonical_hash = format!("{:x}", Sha256::digest(request.render().as_bytes()));
    let string_to_sign = format!("{ALGORITHM}\n{amz_date}\n{scope}\n{canonical_hash}");

    let key = signing_key(identity.secret_key, date, identity.region, SERVICE);
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
        identity.access_key,
        request.signed_headers()
    )
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode per SigV4 rules: unreserved characters pass through,
/// everything else becomes `%XX`. `/` is kept when `encode_slash` is false.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
