//! HTTP status based exception classification.
//!
//! | Status | Kind |
//! |--------|------|
//! | 429 | `RateLimited` |
//! | 401, 403 | `AuthenticationFailed` |
//! | 408, 504 | `Timeout` |
//! | other 4xx | `ClientError` |
//! | other 5xx | `ServerError` |
//! | no status | keyword match on the error text |
//!
//! Exchanges that report errors inside 2xx bodies wrap this classifier with
//! their own.

use crate::application::ports::ExceptionClassifier;
use crate::domain::error::ErrorKind;

/// Classifies failures from status codes, falling back to error text.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpStatusClassifier;

impl HttpStatusClassifier {
    /// Kind for a received status.
    #[must_use]
    pub const fn classify_status(status: u16) -> ErrorKind {
        match status {
            429 => ErrorKind::RateLimited,
            401 | 403 => ErrorKind::AuthenticationFailed,
            408 | 504 => ErrorKind::Timeout,
            400..=499 => ErrorKind::ClientError,
            _ => ErrorKind::ServerError,
        }
    }

    /// Kind for a failure with no response.
    #[must_use]
    pub fn classify_message(message: &str) -> ErrorKind {
        let lower = message.to_lowercase();

        if lower.contains("rate limit") || lower.contains("too many requests") {
            return ErrorKind::RateLimited;
        }
        if lower.contains("timed out") || lower.contains("timeout") {
            return ErrorKind::Timeout;
        }
        if lower.contains("invalid json")
            || lower.contains("parse error")
            || lower.contains("expected value")
        {
            return ErrorKind::ParseError;
        }
        if lower.contains("unauthorized")
            || lower.contains("invalid signature")
            || lower.contains("authentication failed")
        {
            return ErrorKind::AuthenticationFailed;
        }

        ErrorKind::ConnectionError
    }
}

impl ExceptionClassifier for HttpStatusClassifier {
    fn classify(&self, status: Option<u16>, body: &str) -> ErrorKind {
        status.map_or_else(|| Self::classify_message(body), Self::classify_status)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(429, ErrorKind::RateLimited ; "too many requests")]
    #[test_case(401, ErrorKind::AuthenticationFailed ; "unauthorized")]
    #[test_case(403, ErrorKind::AuthenticationFailed ; "forbidden")]
    #[test_case(408, ErrorKind::Timeout ; "request timeout")]
    #[test_case(504, ErrorKind::Timeout ; "gateway timeout")]
    #[test_case(400, ErrorKind::ClientError ; "bad request")]
    #[test_case(404, ErrorKind::ClientError ; "not found")]
    #[test_case(422, ErrorKind::ClientError ; "unprocessable")]
    #[test_case(500, ErrorKind::ServerError ; "internal error")]
    #[test_case(502, ErrorKind::ServerError ; "bad gateway")]
    #[test_case(503, ErrorKind::ServerError ; "unavailable")]
    fn classifies_status(status: u16, expected: ErrorKind) {
        assert_eq!(HttpStatusClassifier.classify(Some(status), ""), expected);
    }

    #[test_case("http request timed out after 10s", ErrorKind::Timeout ; "timeout")]
    #[test_case("connection refused", ErrorKind::ConnectionError ; "refused")]
    #[test_case("dns error: failed to lookup", ErrorKind::ConnectionError ; "dns")]
    #[test_case("Rate limit exceeded", ErrorKind::RateLimited ; "rate limit text")]
    #[test_case("invalid signature", ErrorKind::AuthenticationFailed ; "signature")]
    fn classifies_message(message: &str, expected: ErrorKind) {
        assert_eq!(HttpStatusClassifier.classify(None, message), expected);
    }

    #[test]
    fn status_wins_over_body_text() {
        assert_eq!(
            HttpStatusClassifier.classify(Some(503), "request timed out"),
            ErrorKind::ServerError
        );
    }
}
