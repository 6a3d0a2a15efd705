use std::collections::BTreeMap;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_USER_AGENT: &str = "user-agent";

/// Build a deterministic header map for backend chat requests.
pub fn build_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        (HEADER_CONTENT_TYPE.to_owned(), "application/json".to_owned()),
        (HEADER_ACCEPT.to_owned(), "application/x-ndjson".to_owned()),
        (HEADER_USER_AGENT.to_owned(), user_agent()),
    ])
}

fn user_agent() -> String {
    format!(
        "parley/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_request_ndjson() {
        let headers = build_headers();
        assert_eq!(headers[HEADER_ACCEPT], "application/x-ndjson");
        assert_eq!(headers[HEADER_CONTENT_TYPE], "application/json");
        assert!(headers[HEADER_USER_AGENT].starts_with("parley/"));
        assert_eq!(headers.len(), 3);
    }
}
