//! Wildcard route and method handling shared by the endpoint policy table and
//! the rate-limiting engine.

use regex::Regex;

/// Placeholder accepted in both the method and the route of a configured
/// endpoint.
pub const WILDCARD: &str = "*";

/// Returns `true` if the route contains at least one wildcard marker.
pub fn is_wildcard_route(route: &str) -> bool {
    route.contains('*')
}

/// Returns `true` if an endpoint must be matched by pattern rather than by
/// exact `(method, route)` lookup.
pub fn is_wildcard_endpoint(method: &str, route: &str) -> bool {
    method == WILDCARD || is_wildcard_route(route)
}

/// Compile a configured route into an anchored matcher.
///
/// Literal segments are escaped, each `*` matches any (possibly empty)
/// character sequence, and a single trailing slash is optional so that
/// `/api/*` matches both `/api/users` and `/api/users/`.
pub fn compile_route_pattern(route: &str) -> Result<Regex, regex::Error> {
    let trimmed = route.strip_suffix('/').unwrap_or(route);
    let body = trimmed
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}/?$", body))
}

/// Short, non-reversible fingerprint of a tenant token, safe to log.
pub fn token_fingerprint(token: &str) -> String {
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_wildcards() {
        assert!(is_wildcard_route("/api/*"));
        assert!(!is_wildcard_route("/api/users"));
        assert!(is_wildcard_endpoint("*", "/api/users"));
        assert!(is_wildcard_endpoint("GET", "/api/*/posts"));
        assert!(!is_wildcard_endpoint("GET", "/api/users"));
    }

    #[test]
    fn star_matches_any_suffix() {
        let re = compile_route_pattern("/api/*").unwrap();
        assert!(re.is_match("/api/users"));
        assert!(re.is_match("/api/users/42"));
        assert!(re.is_match("/api/"));
        assert!(!re.is_match("/other/api/users"));
    }

    #[test]
    fn star_in_the_middle() {
        let re = compile_route_pattern("/api/*/posts").unwrap();
        assert!(re.is_match("/api/42/posts"));
        assert!(re.is_match("/api/42/posts/"));
        assert!(!re.is_match("/api/42/comments"));
    }

    #[test]
    fn literal_characters_are_escaped() {
        let re = compile_route_pattern("/v1.0/*").unwrap();
        assert!(re.is_match("/v1.0/items"));
        assert!(!re.is_match("/v1x0/items"));
    }

    #[test]
    fn plain_route_matches_itself_only() {
        let re = compile_route_pattern("/login").unwrap();
        assert!(re.is_match("/login"));
        assert!(re.is_match("/login/"));
        assert!(!re.is_match("/login/extra"));
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = token_fingerprint("AIK_RUNTIME_secret");
        let b = token_fingerprint("AIK_RUNTIME_secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, token_fingerprint("other"));
    }
}
