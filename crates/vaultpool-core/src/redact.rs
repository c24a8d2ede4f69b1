//! Masking of credentials embedded in connection URIs.

use std::sync::LazyLock;

use regex::Regex;

const MASK: &str = "***";

static URI_USERINFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://[^@/]+@").expect("static userinfo pattern"));

static QUERY_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(password=)[^&;]*").expect("static password pattern"));

/// Mask credentials embedded in an endpoint URI.
///
/// `postgresql://app:s3cret@db:5432/app` becomes
/// `postgresql://***:***@db:5432/app`, and `password=` query parameters
/// are masked as well.
pub fn redact_uri(uri: &str) -> String {
    let masked = URI_USERINFO.replace_all(uri, "://***:***@");
    QUERY_PASSWORD
        .replace_all(&masked, format!("${{1}}{MASK}"))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn userinfo_before_path_is_masked() {
        assert_eq!(
            redact_uri("postgresql://app:hunter2@db:5432/app"),
            "postgresql://***:***@db:5432/app"
        );
    }

    #[test]
    fn at_sign_in_path_is_not_userinfo() {
        let uri = "postgresql://db:5432/app@archive";
        assert_eq!(redact_uri(uri), uri);
    }
}
