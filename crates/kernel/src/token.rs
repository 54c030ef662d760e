use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::AuthFailure;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Clone, Debug, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: i64,
}

#[derive(Deserialize)]
struct KeyHint {
    #[serde(default)]
    kid: Option<String>,
}

/// Token whose header has been read but whose signature is still unchecked.
#[derive(Clone, Debug)]
pub struct UnverifiedToken<'a> {
    pub raw: &'a str,
    pub secret_id: String,
    pub algorithm: Algorithm,
}

pub fn extract_bearer(header: Option<&str>) -> Result<&str, AuthFailure> {
    let value = header.ok_or(AuthFailure::MissingToken)?.trim();
    let token = value
        .strip_prefix(BEARER_PREFIX)
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(AuthFailure::MalformedToken)?
        .trim();
    if token.is_empty() {
        return Err(AuthFailure::MalformedToken);
    }
    Ok(token)
}

/// Reads the signing secret id from the `kid` header, falling back to a
/// `kid` claim. Only HMAC algorithms are accepted.
pub fn inspect(raw: &str) -> Result<UnverifiedToken<'_>, AuthFailure> {
    let header = decode_header(raw).map_err(|_| AuthFailure::MalformedToken)?;
    if !matches!(header.alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
        return Err(AuthFailure::MalformedToken);
    }
    let secret_id = match header.kid {
        Some(kid) => kid,
        None => claim_kid(raw, header.alg)?,
    };
    if secret_id.is_empty() {
        return Err(AuthFailure::MalformedToken);
    }
    Ok(UnverifiedToken {
        raw,
        secret_id,
        algorithm: header.alg,
    })
}

pub fn verify(
    token: &UnverifiedToken<'_>,
    signing_key: &[u8],
    audience: &str,
) -> Result<TokenClaims, AuthFailure> {
    let mut validation = Validation::new(token.algorithm);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["exp", "aud"]);
    validation.leeway = 0;
    decode::<TokenClaims>(token.raw, &DecodingKey::from_secret(signing_key), &validation)
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::InvalidSignature => AuthFailure::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthFailure::TokenExpired,
            _ => AuthFailure::MalformedToken,
        })
}

fn claim_kid(raw: &str, algorithm: Algorithm) -> Result<String, AuthFailure> {
    let mut validation = Validation::new(algorithm);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let hint = decode::<KeyHint>(raw, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|_| AuthFailure::MalformedToken)?;
    hint.claims.kid.ok_or(AuthFailure::MalformedToken)
}
