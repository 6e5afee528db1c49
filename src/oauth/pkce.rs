//! Usage: PKCE verifier/challenge and state-nonce generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

const STATE_NONCE_LEN: usize = 24;
const CODE_VERIFIER_LEN: usize = 32;

pub fn generate_state() -> String {
    random_url_safe(STATE_NONCE_LEN)
}

pub fn generate_code_verifier() -> String {
    random_url_safe(CODE_VERIFIER_LEN)
}

pub fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn random_url_safe(len: usize) -> String {
    let mut random = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut random);
    URL_SAFE_NO_PAD.encode(random)
}
