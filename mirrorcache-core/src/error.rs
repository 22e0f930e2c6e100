use thiserror::Error;

/// Unified error type for mirrorcache, one variant per disposition in the
/// error handling design: each maps to an HTTP status and a short,
/// sanitized body that never leaks a path, SQL fragment, or backtrace.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("upstream fetch failed: {0}")]
    UpstreamFailure(String),

    #[error("no upstream mirror had this package")]
    UpstreamNotFound,

    #[error("client disconnected mid-stream")]
    ClientDisconnected,

    #[error("failed to write cache entry: {0}")]
    CacheWriteFailed(String),

    #[error("invalid admin request: {0}")]
    InvalidAdminRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("persistent store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("mirror resolves to this host")]
    SelfReferencingMirror,

    #[error("path escapes storage root")]
    PathTraversal,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Map to the HTTP status code the router/admin layer should return.
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            ProxyError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamNotFound => StatusCode::BAD_GATEWAY,
            ProxyError::ClientDisconnected => StatusCode::BAD_GATEWAY,
            ProxyError::CacheWriteFailed(_) => StatusCode::BAD_GATEWAY,
            ProxyError::InvalidAdminRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unauthorized => StatusCode::UNAUTHORIZED,
            ProxyError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::SelfReferencingMirror => StatusCode::BAD_REQUEST,
            ProxyError::PathTraversal => StatusCode::BAD_REQUEST,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short JSON error body, safe to return to an untrusted client.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::json!({ "error": self.to_string() })
            .to_string()
            .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_error_disposition() {
        assert_eq!(
            ProxyError::UpstreamFailure("x".into()).status_code(),
            http::StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Unauthorized.status_code(),
            http::StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ProxyError::PathTraversal.status_code(),
            http::StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::NotFound("x".into()).status_code(),
            http::StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn json_body_is_valid_and_has_no_internal_detail() {
        let err = ProxyError::CacheWriteFailed("disk full".into());
        let body = err.to_json_body();
        let parsed: serde_json::Value =
            serde_json::from_slice(&body).expect("to_json_body must produce valid JSON");
        assert!(parsed["error"].as_str().unwrap().contains("cache entry"));
    }

    #[test]
    fn self_referencing_mirror_is_bad_request() {
        assert_eq!(
            ProxyError::SelfReferencingMirror.status_code(),
            http::StatusCode::BAD_REQUEST
        );
    }
}
