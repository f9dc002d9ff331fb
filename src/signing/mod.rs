//! From-scratch AWS Signature Version 4 request signing and the signed
//! Lambda invocation client built on top of it.
//!
//! Signing is pure and deterministic: the same credentials, endpoint
//! description, payload, and timestamp always produce the same
//! [`SignedRequest`]. A fresh request is built for every attempt because the
//! date stamp is part of the signature.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::CapburnError;

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm identifier used in the authorization header
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Headers covered by the signature, lower-cased, sorted, `;`-joined
pub const SIGNED_HEADERS: &str = "host;x-amz-date";

/// Access/secret key pair for request signing
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// A missing credential is a configuration fault, not a runtime condition.
    pub fn validate(&self) -> std::result::Result<(), CapburnError> {
        if self.access_key.is_empty() {
            return Err(CapburnError::SigningError("access key is not set".into()));
        }
        if self.secret_key.is_empty() {
            return Err(CapburnError::SigningError("secret key is not set".into()));
        }
        Ok(())
    }
}

/// Canonical description of the endpoint being invoked
#[derive(Debug, Clone)]
pub struct SigningParams {
    pub region: String,
    pub service: String,
    pub host: String,
    pub path: String,
    pub method: String,
}

/// An immutable, fully signed HTTP request ready to be sent
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,

    /// Hex SHA-256 of the body, as used in the canonical request
    pub payload_hash: String,
}

/// Produce a signed request for one invocation attempt.
///
/// Follows the standard four-part scheme: canonical-request hash,
/// string-to-sign, derived signing key, signature. The byte layout must not
/// change or the remote side will reject the signature.
pub fn sign(
    credentials: &Credentials,
    params: &SigningParams,
    body: &[u8],
    timestamp: DateTime<Utc>,
) -> std::result::Result<SignedRequest, CapburnError> {
    credentials.validate()?;

    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = timestamp.format("%Y%m%d").to_string();

    let payload_hash = hex_sha256(body);

    // Canonical query string is empty: invocation endpoints take no query.
    let canonical_headers = format!("host:{}\nx-amz-date:{}\n", params.host, amz_date);
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        params.method, params.path, "", canonical_headers, SIGNED_HEADERS, payload_hash
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, params.region, params.service
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &credentials.secret_key,
        &date_stamp,
        &params.region,
        &params.service,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key, credential_scope, SIGNED_HEADERS, signature
    );

    Ok(SignedRequest {
        url: format!("https://{}{}", params.host, params.path),
        method: params.method.clone(),
        headers: vec![
            ("Host".to_string(), params.host.clone()),
            ("X-Amz-Date".to_string(), amz_date),
            ("Authorization".to_string(), authorization),
        ],
        body: body.to_vec(),
        payload_hash,
    })
}

/// Four chained HMAC-SHA256 operations binding the key to date, region,
/// service, and protocol version.
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Client for invoking a remote compute function over the signed wire
/// protocol: `POST /2015-03-31/functions/{name}/invocations`.
#[derive(Debug, Clone)]
pub struct LambdaInvoker {
    client: reqwest::Client,
    credentials: Credentials,
    region: String,
    host: String,
}

impl LambdaInvoker {
    pub fn new(credentials: Credentials, region: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            region: region.into(),
            host: host.into(),
        }
    }

    /// Invocation path for a named function
    pub fn function_path(function: &str) -> String {
        format!("/2015-03-31/functions/{function}/invocations")
    }

    /// Invoke `function` with a JSON payload and return its JSON response.
    ///
    /// Any 2xx with a JSON body is success; everything else is an error with
    /// the status and response text attached.
    pub async fn invoke(&self, function: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let body = serde_json::to_vec(payload).context("Failed to serialize invocation payload")?;

        let params = SigningParams {
            region: self.region.clone(),
            service: "lambda".to_string(),
            host: self.host.clone(),
            path: Self::function_path(function),
            method: "POST".to_string(),
        };

        let signed = sign(&self.credentials, &params, &body, Utc::now())?;

        tracing::debug!("invoking {} at {}", function, signed.url);

        let mut request = self
            .client
            .post(&signed.url)
            .header("Content-Type", "application/json");
        for (name, value) in &signed.headers {
            request = request.header(name, value);
        }

        let response = request
            .body(signed.body)
            .send()
            .await
            .context("Failed to send invocation request")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Invocation failed: HTTP {} {}", status, text);
        }

        response
            .json()
            .await
            .context("Failed to parse invocation response as JSON")
    }
}
