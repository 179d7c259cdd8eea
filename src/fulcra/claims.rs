use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use oauth2::AccessToken;
use serde::Deserialize;

use super::FulcraApiError;

/// Custom claim carrying the Fulcra user id in access tokens.
pub const FULCRA_USER_ID_CLAIM: &str = "https://fulcradynamics.com/userid";

#[derive(Debug, Deserialize)]
struct FulcraClaims {
    #[serde(rename = "https://fulcradynamics.com/userid")]
    user_id: Option<String>,
}

/// Reads the Fulcra user id from the access token's claims.
///
/// The signature is not verified: the token was received directly from the
/// token endpoint and the API verifies it on every request.
pub fn fulcra_user_id(token: &AccessToken) -> Result<String, FulcraApiError> {
    let raw = token.secret();
    let header = decode_header(raw).map_err(|e| FulcraApiError::MissingUserId(e.to_string()))?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<FulcraClaims>(raw, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| FulcraApiError::MissingUserId(e.to_string()))?;

    data.claims
        .user_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            FulcraApiError::MissingUserId(format!("claim {FULCRA_USER_ID_CLAIM} not present"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn signed(claims: serde_json::Value) -> AccessToken {
        let key = EncodingKey::from_secret(b"unrelated-secret");
        let token = encode(&Header::default(), &claims, &key).unwrap();
        AccessToken::new(token)
    }

    #[test]
    fn reads_user_id_claim() {
        let token = signed(json!({
            "sub": "auth0|abc",
            FULCRA_USER_ID_CLAIM: "7c5e0a3e-1111-2222-3333-444455556666",
            "exp": 1,
        }));
        assert_eq!(fulcra_user_id(&token).unwrap(), "7c5e0a3e-1111-2222-3333-444455556666");
    }

    #[test]
    fn missing_claim_is_an_error() {
        let token = signed(json!({ "sub": "auth0|abc" }));
        assert!(matches!(fulcra_user_id(&token), Err(FulcraApiError::MissingUserId(_))));
    }

    #[test]
    fn opaque_token_is_an_error() {
        let token = AccessToken::new("not-a-jwt".to_string());
        let err = fulcra_user_id(&token).unwrap_err();
        assert!(!err.to_string().contains("not-a-jwt"));
    }
}
