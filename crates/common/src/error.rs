use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaspError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid rate limit for {method} {route}: {reason}")]
    InvalidRateLimit {
        method: String,
        route: String,
        reason: String,
    },

    #[error("pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type RaspResult<T> = Result<T, RaspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_rate_limit_display() {
        let err = RaspError::InvalidRateLimit {
            method: "POST".to_string(),
            route: "/login".to_string(),
            reason: "window out of range".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid rate limit for POST /login: window out of range"
        );
    }

    #[test]
    fn serde_error_converts() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: RaspError = parse.unwrap_err().into();
        assert!(matches!(err, RaspError::Serde(_)));
    }
}
