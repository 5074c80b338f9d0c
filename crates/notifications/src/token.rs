use std::time::Duration;

use tokio::{sync::Mutex, time::Instant};

/// Refresh margin subtracted from the provider's `expires_in`.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Provider errcodes meaning the access token is invalid or expired.
pub const INVALID_TOKEN_ERRCODES: [i64; 3] = [40001, 40014, 42001];

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Caches the provider access token until shortly before it expires.
#[derive(Debug)]
pub struct TokenCache {
    max_ttl: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(max_ttl: Duration) -> Self {
        Self {
            max_ttl,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached token if it is still fresh.
    pub async fn get(&self) -> Option<String> {
        let cached = self.cached.lock().await;
        cached
            .as_ref()
            .filter(|c| Instant::now() < c.expires_at)
            .map(|c| c.token.clone())
    }

    /// Stores a token the provider says is valid for `expires_in` seconds.
    pub async fn store(&self, token: impl Into<String>, expires_in: u64) {
        let ttl = Duration::from_secs(expires_in)
            .saturating_sub(EXPIRY_MARGIN)
            .min(self.max_ttl);
        *self.cached.lock().await = Some(CachedToken {
            token: token.into(),
            expires_at: Instant::now() + ttl,
        });
    }

    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    /// Returns true if `errcode` means the cached token must be dropped.
    pub fn is_invalid_token(errcode: i64) -> bool {
        INVALID_TOKEN_ERRCODES.contains(&errcode)
    }
}
