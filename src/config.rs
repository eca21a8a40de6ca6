use log::warn;

pub const MAX_POST_LENGTH: usize = 5000;
pub const MAX_COMMENT_LENGTH: usize = 1000;
pub const MAX_BIO_LENGTH: usize = 500;
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const POSTS_PER_PAGE: usize = 20;

// Friend suggestions scan a fixed batch of users and keep the first few eligible ones.
pub const SUGGESTION_BATCH: usize = 20;
pub const SUGGESTION_LIMIT: usize = 5;

pub const USERS: &str = "users";
pub const POSTS: &str = "posts";
pub const SESSIONS: &str = "sessions";
pub const CREDENTIALS: &str = "credentials";

pub fn comments_collection(post_id: &str) -> String {
    format!("{}/{}/comments", POSTS, post_id)
}

pub fn token_expiration_hours() -> i64 {
    env_or("VOLCANO_TOKEN_EXPIRATION_HOURS", 24)
}

pub fn bind_addr() -> String {
    std::env::var("VOLCANO_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:80".to_string())
}

pub fn blob_base_url() -> String {
    std::env::var("VOLCANO_BLOB_BASE_URL")
        .unwrap_or_else(|_| "http://localhost/blobs".to_string())
}

/// Whether to create the demo accounts on startup.
pub fn seed_demo() -> bool {
    env_or("VOLCANO_SEED_DEMO", false)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            warn!("invalid value for {}: {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
