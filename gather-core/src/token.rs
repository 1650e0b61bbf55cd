use gather_shared::QrToken;
use rand::distributions::Alphanumeric;
use rand::Rng;

pub const TOKEN_PREFIX: &str = "RSVP-";

/// Source of fresh check-in tokens. Uniqueness is the ledger's job; a
/// generator only has to make collisions vanishingly rare.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> QrToken;
}

/// `RSVP-` followed by random alphanumerics from the thread-local CSPRNG.
/// 32 characters carry ~190 bits, so tokens cannot be guessed or enumerated.
#[derive(Debug, Clone)]
pub struct RandomTokenGenerator {
    length: usize,
}

impl RandomTokenGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for RandomTokenGenerator {
    fn default() -> Self {
        Self::new(32)
    }
}

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> QrToken {
        let body: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect();
        QrToken::new(format!("{}{}", TOKEN_PREFIX, body))
    }
}
