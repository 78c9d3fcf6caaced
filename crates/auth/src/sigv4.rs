use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use url::Url;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const DEFAULT_EXPIRES_SECONDS: u64 = 600;
pub const MAX_EXPIRES_SECONDS: u64 = 604_800;

const SERVICE: &str = "s3";
const TERMINATOR: &str = "aws4_request";
const SIGNED_HEADERS: &str = "host";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const MAX_CLOCK_SKEW_MINUTES: i64 = 15;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Missing storage setting: {0}")]
    MissingSetting(&'static str),

    #[error("Invalid storage endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid signing request: {0}")]
    InvalidRequest(String),
}

/// Long-lived object storage credentials. Built once at startup and handed to
/// [`UrlSigner::new`].
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub endpoint: String,
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresignedUpload {
    pub key: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
}

/// Intermediate values of one signing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningParts {
    pub canonical_request: String,
    pub string_to_sign: String,
    pub signature: String,
    /// Canonical query string, without `X-Amz-Signature`.
    pub query: String,
}

/// Query-string presigner for path-style S3 URLs (`endpoint/bucket/key`).
pub struct UrlSigner {
    credentials: StorageCredentials,
    endpoint: String,
    host: String,
}

impl fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSigner")
            .field("credentials", &self.credentials)
            .field("host", &self.host)
            .finish()
    }
}

impl UrlSigner {
    pub fn new(credentials: StorageCredentials) -> Result<Self, SigningError> {
        let required = [
            ("access_key_id", &credentials.access_key_id),
            ("secret_access_key", &credentials.secret_access_key),
            ("region", &credentials.region),
            ("bucket", &credentials.bucket),
            ("endpoint", &credentials.endpoint),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(SigningError::MissingSetting(name));
            }
        }

        let (endpoint, host) = parse_endpoint(&credentials.endpoint)?;

        Ok(Self {
            credentials,
            endpoint,
            host,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.credentials.bucket
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in_seconds: Option<u64>,
    ) -> Result<PresignedUpload, SigningError> {
        self.presign_put_at(key, content_type, expires_in_seconds, Utc::now())
    }

    pub fn presign_put_at(
        &self,
        key: &str,
        content_type: &str,
        expires_in_seconds: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<PresignedUpload, SigningError> {
        if content_type.trim().is_empty() {
            return Err(SigningError::InvalidRequest(
                "content type must not be empty".to_string(),
            ));
        }

        let expires = expires_in_seconds.unwrap_or(DEFAULT_EXPIRES_SECONDS);
        let url = self.presigned_url("PUT", key, expires, now)?;

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), content_type.to_string());

        Ok(PresignedUpload {
            key: key.to_string(),
            url,
            method: "PUT".to_string(),
            headers,
        })
    }

    pub fn presign_get(&self, key: &str, expires_in_seconds: u64) -> Result<String, SigningError> {
        self.presign_get_at(key, expires_in_seconds, Utc::now())
    }

    pub fn presign_get_at(
        &self,
        key: &str,
        expires_in_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<String, SigningError> {
        self.presigned_url("GET", key, expires_in_seconds, now)
    }

    /// Unsigned object URL. Only resolvable when the bucket allows public reads.
    pub fn object_url(&self, key: &str) -> String {
        format!("{}{}", self.endpoint, self.canonical_uri(key))
    }

    pub fn signing_parts(
        &self,
        method: &str,
        key: &str,
        expires_in_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<SigningParts, SigningError> {
        validate_object_key(key)?;
        validate_expires(expires_in_seconds)?;
        Ok(self.sign(method, &self.canonical_uri(key), expires_in_seconds, now))
    }

    /// Checks a presigned URL produced by this signer: same endpoint, same
    /// credential scope, unexpired, and a signature matching the exact method,
    /// path and query parameters.
    pub fn verify(&self, method: &str, url: &str, now: DateTime<Utc>) -> bool {
        let Some(rest) = url.strip_prefix(&self.endpoint) else {
            return false;
        };
        let Some((path, raw_query)) = rest.split_once('?') else {
            return false;
        };

        let mut signature = None;
        let mut params = QueryBuilder::new();
        let mut fields = BTreeMap::new();
        for pair in raw_query.split('&') {
            let Some((name, value)) = pair.split_once('=') else {
                return false;
            };
            let (Ok(name), Ok(value)) = (urlencoding::decode(name), urlencoding::decode(value)) else {
                return false;
            };
            if name == "X-Amz-Signature" {
                signature = Some(value.into_owned());
                continue;
            }
            fields.insert(name.to_string(), value.to_string());
            params = params.param(&name, &value);
        }

        let Some(signature) = signature.and_then(|s| hex::decode(s).ok()) else {
            return false;
        };

        let (Some(algorithm), Some(amz_date), Some(expires), Some(credential), Some(signed)) = (
            fields.get("X-Amz-Algorithm"),
            fields.get("X-Amz-Date"),
            fields.get("X-Amz-Expires"),
            fields.get("X-Amz-Credential"),
            fields.get("X-Amz-SignedHeaders"),
        ) else {
            return false;
        };

        if algorithm != ALGORITHM || signed != SIGNED_HEADERS {
            return false;
        }

        let Ok(issued_at) = NaiveDateTime::parse_from_str(amz_date, AMZ_DATE_FORMAT) else {
            return false;
        };
        let issued_at = issued_at.and_utc();
        let Ok(expires) = expires.parse::<u64>() else {
            return false;
        };
        if validate_expires(expires).is_err() {
            return false;
        }
        if now < issued_at - Duration::minutes(MAX_CLOCK_SKEW_MINUTES)
            || now >= issued_at + Duration::seconds(expires as i64)
        {
            return false;
        }

        let date_stamp = &amz_date[..8];
        let scope = credential_scope(date_stamp, &self.credentials.region);
        if *credential != format!("{}/{}", self.credentials.access_key_id, scope) {
            return false;
        }

        let canonical_request = canonical_request(method, path, &params.build(), &self.host);
        let string_to_sign = string_to_sign(amz_date, &scope, &canonical_request);
        let key = signing_key(
            &self.credentials.secret_access_key,
            date_stamp,
            &self.credentials.region,
            SERVICE,
        );

        hmac::verify(&key, string_to_sign.as_bytes(), &signature).is_ok()
    }

    fn presigned_url(
        &self,
        method: &str,
        key: &str,
        expires_in_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<String, SigningError> {
        let parts = self.signing_parts(method, key, expires_in_seconds, now)?;
        Ok(format!(
            "{}{}?{}&X-Amz-Signature={}",
            self.endpoint,
            self.canonical_uri(key),
            parts.query,
            parts.signature
        ))
    }

    fn canonical_uri(&self, key: &str) -> String {
        format!("/{}/{}", self.credentials.bucket, key)
    }

    fn sign(
        &self,
        method: &str,
        canonical_uri: &str,
        expires_in_seconds: u64,
        now: DateTime<Utc>,
    ) -> SigningParts {
        let amz_date = amz_date(now);
        let date_stamp = &amz_date[..8];
        let scope = credential_scope(date_stamp, &self.credentials.region);

        let query = QueryBuilder::new()
            .param("X-Amz-Algorithm", ALGORITHM)
            .param(
                "X-Amz-Credential",
                &format!("{}/{}", self.credentials.access_key_id, scope),
            )
            .param("X-Amz-Date", &amz_date)
            .param("X-Amz-Expires", &expires_in_seconds.to_string())
            .param("X-Amz-SignedHeaders", SIGNED_HEADERS)
            .build();

        let canonical_request = canonical_request(method, canonical_uri, &query, &self.host);
        let string_to_sign = string_to_sign(&amz_date, &scope, &canonical_request);
        let key = signing_key(
            &self.credentials.secret_access_key,
            date_stamp,
            &self.credentials.region,
            SERVICE,
        );
        let signature = hex::encode(hmac::sign(&key, string_to_sign.as_bytes()).as_ref());

        SigningParts {
            canonical_request,
            string_to_sign,
            signature,
            query,
        }
    }
}

/// Ordered query parameter builder. Names and values are RFC 3986 encoded and
/// the pairs are emitted sorted by encoded name.
#[derive(Debug, Default, Clone)]
pub struct QueryBuilder {
    params: Vec<(String, String)>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push((
            urlencoding::encode(name).into_owned(),
            urlencoding::encode(value).into_owned(),
        ));
        self
    }

    pub fn build(mut self) -> String {
        self.params.sort();
        self.params
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

pub fn amz_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format(AMZ_DATE_FORMAT).to_string()
}

fn credential_scope(date_stamp: &str, region: &str) -> String {
    [date_stamp, region, SERVICE, TERMINATOR].join("/")
}

fn canonical_request(method: &str, canonical_uri: &str, query: &str, host: &str) -> String {
    let canonical_headers = format!("host:{}\n", host);
    [
        method,
        canonical_uri,
        query,
        canonical_headers.as_str(),
        SIGNED_HEADERS,
        UNSIGNED_PAYLOAD,
    ]
    .join("\n")
}

fn string_to_sign(amz_date: &str, credential_scope: &str, canonical_request: &str) -> String {
    let hashed_canonical_request = hash_payload(canonical_request.as_bytes());
    [
        ALGORITHM,
        amz_date,
        credential_scope,
        hashed_canonical_request.as_str(),
    ]
    .join("\n")
}

/// `HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
pub fn signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> hmac::Key {
    let k_secret = format!("AWS4{}", secret_key);
    let k_date = hmac::sign(
        &hmac::Key::new(hmac::HMAC_SHA256, k_secret.as_bytes()),
        date_stamp.as_bytes(),
    );

    let k_region = hmac::sign(
        &hmac::Key::new(hmac::HMAC_SHA256, k_date.as_ref()),
        region.as_bytes(),
    );

    let k_service = hmac::sign(
        &hmac::Key::new(hmac::HMAC_SHA256, k_region.as_ref()),
        service.as_bytes(),
    );

    let k_signing = hmac::sign(
        &hmac::Key::new(hmac::HMAC_SHA256, k_service.as_ref()),
        TERMINATOR.as_bytes(),
    );

    hmac::Key::new(hmac::HMAC_SHA256, k_signing.as_ref())
}

pub fn hash_payload(payload: &[u8]) -> String {
    let digest = digest::digest(&digest::SHA256, payload);
    hex::encode(digest.as_ref())
}

/// Splits an endpoint into its normalized origin (`scheme://host[:port]`) and
/// the `host[:port]` value that gets signed. Default ports are dropped, the
/// same way clients omit them from the `Host` header.
fn parse_endpoint(endpoint: &str) -> Result<(String, String), SigningError> {
    let invalid = |reason: &str| SigningError::InvalidEndpoint(format!("{} ({})", endpoint, reason));

    let parsed = Url::parse(endpoint.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("expected http or https"));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid("credentials belong in the access key settings"));
    }
    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid("expected scheme and host only"));
    }
    let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;

    let host = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    Ok((format!("{}://{}", parsed.scheme(), host), host))
}

fn validate_object_key(key: &str) -> Result<(), SigningError> {
    if key.is_empty() {
        return Err(SigningError::InvalidRequest("object key must not be empty".to_string()));
    }
    if key.starts_with('/')
        || key.split('/').any(|segment| segment == "..")
        || key.chars().any(|c| c.is_whitespace() || c.is_control() || c == '?' || c == '#')
    {
        return Err(SigningError::InvalidRequest(format!("object key is not path-safe: {}", key)));
    }
    Ok(())
}

fn validate_expires(expires_in_seconds: u64) -> Result<(), SigningError> {
    if expires_in_seconds == 0 || expires_in_seconds > MAX_EXPIRES_SECONDS {
        return Err(SigningError::InvalidRequest(format!(
            "expiry must be between 1 and {} seconds",
            MAX_EXPIRES_SECONDS
        )));
    }
    Ok(())
}
