//! Provider-specific webhook verification.
//!
//! | Provider     | Header(s)                              | Scheme                          |
//! |--------------|----------------------------------------|---------------------------------|
//! | GitHub       | `X-Hub-Signature-256`                  | HMAC-SHA256, `sha256=` prefix   |
//! | GitLab       | `X-Gitlab-Token`                       | constant-time token compare     |
//! | CircleCI     | `circleci-signature`                   | `v1=<hex>` HMAC-SHA256          |
//! | Jenkins      | `X-Jenkins-Token` / `Authorization`    | shared-secret compare           |
//! | Azure DevOps | `Authorization: Basic`                 | password half equals the secret |

use axum::http::HeaderMap;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use schemas::CiProvider;

type HmacSha256 = Hmac<Sha256>;

/// Verification failures; all map to `401`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("missing signature header `{0}`")]
    MissingHeader(&'static str),
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("no webhook secret configured for {0:?}")]
    NoSecretConfigured(CiProvider),
    #[error("malformed signature header")]
    MalformedHeader,
}

/// Shared secrets per provider. A provider without a secret rejects every
/// delivery.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct WebhookSecrets {
    pub github: Option<String>,
    pub gitlab: Option<String>,
    pub circleci: Option<String>,
    pub jenkins: Option<String>,
    pub azure_devops: Option<String>,
}

impl WebhookSecrets {
    fn secret_for(&self, provider: CiProvider) -> Result<&str, VerifyError> {
        let secret = match provider {
            CiProvider::Github => &self.github,
            CiProvider::Gitlab => &self.gitlab,
            CiProvider::Circleci => &self.circleci,
            CiProvider::Jenkins => &self.jenkins,
            CiProvider::AzureDevops => &self.azure_devops,
        };
        secret
            .as_deref()
            .ok_or(VerifyError::NoSecretConfigured(provider))
    }

    /// Verify one delivery for `provider`.
    pub fn verify(
        &self,
        provider: CiProvider,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), VerifyError> {
        let secret = self.secret_for(provider)?;
        match provider {
            CiProvider::Github => verify_github(headers, body, secret),
            CiProvider::Gitlab => verify_gitlab(headers, secret),
            CiProvider::Circleci => verify_circleci(headers, body, secret),
            CiProvider::Jenkins => verify_jenkins(headers, secret),
            CiProvider::AzureDevops => verify_azure(headers, secret),
        }
    }
}

/// Constant-time byte comparison.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0_u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

fn hmac_sha256_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn header_str<'h>(
    headers: &'h HeaderMap,
    name: &'static str,
) -> Result<&'h str, VerifyError> {
    headers
        .get(name)
        .ok_or(VerifyError::MissingHeader(name))?
        .to_str()
        .map_err(|_| VerifyError::MalformedHeader)
}

fn verify_github(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), VerifyError> {
    let signature = header_str(headers, "x-hub-signature-256")?;
    let Some(hex_part) = signature.strip_prefix("sha256=") else {
        return Err(VerifyError::MalformedHeader);
    };
    let expected = hmac_sha256_hex(secret, body);
    if ct_eq(expected.as_bytes(), hex_part.as_bytes()) {
        Ok(())
    } else {
        Err(VerifyError::SignatureMismatch)
    }
}

fn verify_gitlab(headers: &HeaderMap, secret: &str) -> Result<(), VerifyError> {
    let token = header_str(headers, "x-gitlab-token")?;
    if ct_eq(token.as_bytes(), secret.as_bytes()) {
        Ok(())
    } else {
        Err(VerifyError::SignatureMismatch)
    }
}

fn verify_circleci(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), VerifyError> {
    let signature = header_str(headers, "circleci-signature")?;
    // Format: `v1=<hex>`, possibly among comma-separated versions
    let hex_part = signature
        .split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("v1="))
        .ok_or(VerifyError::MalformedHeader)?;
    let expected = hmac_sha256_hex(secret, body);
    if ct_eq(expected.as_bytes(), hex_part.as_bytes()) {
        Ok(())
    } else {
        Err(VerifyError::SignatureMismatch)
    }
}

fn verify_jenkins(headers: &HeaderMap, secret: &str) -> Result<(), VerifyError> {
    if let Some(token) = headers.get("x-jenkins-token") {
        let token = token.to_str().map_err(|_| VerifyError::MalformedHeader)?;
        return if ct_eq(token.as_bytes(), secret.as_bytes()) {
            Ok(())
        } else {
            Err(VerifyError::SignatureMismatch)
        };
    }
    if let Some(auth) = headers.get("authorization") {
        let auth = auth.to_str().map_err(|_| VerifyError::MalformedHeader)?;
        let Some(bearer) = auth.strip_prefix("Bearer ") else {
            return Err(VerifyError::MalformedHeader);
        };
        return if ct_eq(bearer.as_bytes(), secret.as_bytes()) {
            Ok(())
        } else {
            Err(VerifyError::SignatureMismatch)
        };
    }
    Err(VerifyError::MissingHeader("x-jenkins-token"))
}

fn verify_azure(headers: &HeaderMap, secret: &str) -> Result<(), VerifyError> {
    let auth = header_str(headers, "authorization")?;
    let Some(encoded) = auth.strip_prefix("Basic ") else {
        return Err(VerifyError::MalformedHeader);
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| VerifyError::MalformedHeader)?;
    let decoded = String::from_utf8(decoded).map_err(|_| VerifyError::MalformedHeader)?;
    // `user:password`; only the password half is checked
    let password = decoded.split_once(':').map_or(decoded.as_str(), |(_, p)| p);
    if ct_eq(password.as_bytes(), secret.as_bytes()) {
        Ok(())
    } else {
        Err(VerifyError::SignatureMismatch)
    }
}
