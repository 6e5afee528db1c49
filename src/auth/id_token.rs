//! Usage: Best-effort identity extraction from an OIDC id token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

const ACCOUNT_CLAIM_NAMESPACE: &str = "https://api.openai.com/auth";

/// Decode the JWT payload segment and pull out `email` plus the
/// provider-scoped account id. Total function: anything malformed yields
/// empty strings, never an error.
pub fn decode_email_and_account_id(id_token: &str) -> (String, String) {
    let token = id_token.trim();
    if token.is_empty() {
        return (String::new(), String::new());
    }

    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next()) {
        (Some(_), Some(payload)) => payload,
        _ => return (String::new(), String::new()),
    };

    let Ok(decoded) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
        return (String::new(), String::new());
    };
    let Ok(claims) = serde_json::from_slice::<Value>(&decoded) else {
        return (String::new(), String::new());
    };

    let email = claims
        .get("email")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let account_id = claims
        .get(ACCOUNT_CLAIM_NAMESPACE)
        .and_then(|nested| nested.get("chatgpt_account_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    (email, account_id)
}

#[cfg(test)]
pub(crate) fn encode_test_id_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    format!("{header}.{payload}.")
}
