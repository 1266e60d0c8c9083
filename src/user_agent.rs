//! Default User-Agent for outgoing requests.

/// Project URL advertised in the User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/streamget/streamget";

/// Default User-Agent sent by [`HttpClient`](crate::download::HttpClient).
///
/// Callers override it per request with their own `User-Agent` header.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("streamget/{version} (+{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_version_and_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL: {ua}");
        assert_eq!(
            Some(env!("CARGO_PKG_VERSION")),
            ua.strip_prefix("streamget/")
                .and_then(|s| s.split(' ').next()),
            "UA must contain crate version"
        );
    }
}
