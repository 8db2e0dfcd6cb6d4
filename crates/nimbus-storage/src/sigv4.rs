//! AWS Signature Version 4 for S3 requests and pre-signed URLs

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::Credentials;
use crate::error::BackendError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const LONG_DATE: &str = "%Y%m%dT%H%M%SZ";
const SHORT_DATE: &str = "%Y%m%d";

/// Percent-encode everything outside the RFC 3986 unreserved set
pub(crate) fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Encode `(name, value)` pairs into a query string
pub(crate) fn encode_query<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
        .collect::<Vec<_>>()
        .join("&")
}

struct Scope {
    amz_date: String,
    scope: String,
    date_stamp: String,
}

impl Scope {
    fn new(now: DateTime<Utc>, region: &str) -> Self {
        let date_stamp = now.format(SHORT_DATE).to_string();
        Self {
            amz_date: now.format(LONG_DATE).to_string(),
            scope: format!("{}/{}/{}/aws4_request", date_stamp, region, SERVICE),
            date_stamp,
        }
    }

    fn signature(
        &self,
        credentials: &Credentials,
        region: &str,
        canonical_request: &str,
    ) -> Result<String, BackendError> {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            self.amz_date,
            self.scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", credentials.secret_access_key).as_bytes(),
            self.date_stamp.as_bytes(),
        )?;
        let k_region = hmac_sha256(&k_date, region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        Ok(hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| BackendError::new("invalid HMAC key length"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn host(url: &Url) -> Result<String, BackendError> {
    let host = url
        .host_str()
        .ok_or_else(|| BackendError::new(format!("URL has no host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k, true), uri_encode(&v, true)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn header_value(value: &str) -> Result<HeaderValue, BackendError> {
    HeaderValue::from_str(value).map_err(|e| BackendError::with_source("invalid header value", e))
}

/// Sign `request` in place with an `Authorization` header.
///
/// The payload is left unsigned so streaming bodies need not be hashed.
pub(crate) fn sign_request(
    request: &mut reqwest::Request,
    credentials: &Credentials,
    region: &str,
    now: DateTime<Utc>,
) -> Result<(), BackendError> {
    let scope = Scope::new(now, region);
    let host = host(request.url())?;

    let headers = request.headers_mut();
    headers.insert(
        HeaderName::from_static("x-amz-date"),
        header_value(&scope.amz_date)?,
    );
    headers.insert(
        HeaderName::from_static("x-amz-content-sha256"),
        HeaderValue::from_static(UNSIGNED_PAYLOAD),
    );
    if let Some(token) = &credentials.session_token {
        headers.insert(
            HeaderName::from_static("x-amz-security-token"),
            header_value(token)?,
        );
    }

    let mut signed: Vec<(String, String)> = vec![("host".to_string(), host)];
    for (name, value) in request.headers() {
        if name.as_str().starts_with("x-amz-") || *name == CONTENT_TYPE {
            signed.push((
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).trim().to_string(),
            ));
        }
    }
    signed.sort();

    let canonical_headers: String = signed
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = signed
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method().as_str(),
        request.url().path(),
        canonical_query(request.url()),
        canonical_headers,
        signed_headers,
        UNSIGNED_PAYLOAD
    );
    let signature = scope.signature(credentials, region, &canonical_request)?;

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key_id, scope.scope, signed_headers, signature
    );
    request
        .headers_mut()
        .insert(AUTHORIZATION, header_value(&authorization)?);
    Ok(())
}

/// Query-signed GET URL valid for `expires_secs`
pub(crate) fn presign_url(
    mut url: Url,
    credentials: &Credentials,
    region: &str,
    expires_secs: u64,
    now: DateTime<Utc>,
) -> Result<Url, BackendError> {
    let scope = Scope::new(now, region);
    let credential = format!("{}/{}", credentials.access_key_id, scope.scope);
    let expires = expires_secs.to_string();

    let mut params = vec![
        ("X-Amz-Algorithm", ALGORITHM),
        ("X-Amz-Credential", credential.as_str()),
        ("X-Amz-Date", scope.amz_date.as_str()),
        ("X-Amz-Expires", expires.as_str()),
        ("X-Amz-SignedHeaders", "host"),
    ];
    if let Some(token) = &credentials.session_token {
        params.push(("X-Amz-Security-Token", token.as_str()));
    }
    let query = encode_query(params);
    url.set_query(Some(&query));

    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
        url.path(),
        canonical_query(&url),
        host(&url)?,
        UNSIGNED_PAYLOAD
    );
    let signature = scope.signature(credentials, region, &canonical_request)?;

    url.set_query(Some(&format!("{}&X-Amz-Signature={}", query, signature)));
    Ok(url)
}
