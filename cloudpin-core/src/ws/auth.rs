//! The `x-api-key` handshake header (§6): client-side injection and
//! server-side gating, grounded in `rama-cli/src/cmd/send/http/ws/client.rs`
//! (`client.websocket_with_request(req)`) for the client half and
//! `rama-core/src/{layer,service}/mod.rs`'s `Layer<S>`/`Service<S, Request>`
//! traits for the server half -- a tiny single-purpose layer rather than
//! pulling in a general auth framework.

use crate::error::{AuthError, CloudPinError};
use rama::http::{header::HeaderName, HeaderValue, Request};

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Attach `x-api-key: <api_key>` to an outgoing handshake request, per the
/// Client connect algorithm in §4.5.
pub fn with_api_key_header<B>(mut req: Request<B>, api_key: &str) -> Result<Request<B>, CloudPinError> {
    let value = HeaderValue::from_str(api_key)
        .map_err(|e| CloudPinError::Auth(AuthError::new(format!("invalid api_key header value: {e}"))))?;
    req.headers_mut().insert(API_KEY_HEADER, value);
    Ok(req)
}

/// Check an inbound upgrade request's `x-api-key` header against the
/// configured value. Rejects with [`AuthError`] when the header is missing
/// or does not match, per §4.5's Server variant step 1.
pub fn check_api_key<B>(req: &Request<B>, expected: &str) -> Result<(), CloudPinError> {
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match presented {
        Some(value) if value == expected => Ok(()),
        _ => Err(CloudPinError::Auth(AuthError::new("Invalid API key"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rama::http::Request as HttpRequest;

    #[test]
    fn with_api_key_header_sets_the_header() {
        let req = HttpRequest::builder().body(()).unwrap();
        let req = with_api_key_header(req, "s3cr3t").unwrap();
        assert_eq!(req.headers().get(API_KEY_HEADER).unwrap(), "s3cr3t");
    }

    #[test]
    fn check_api_key_rejects_missing_header() {
        let req = HttpRequest::builder().body(()).unwrap();
        assert!(check_api_key(&req, "s3cr3t").is_err());
    }

    #[test]
    fn check_api_key_rejects_wrong_value() {
        let req = with_api_key_header(HttpRequest::builder().body(()).unwrap(), "wrong").unwrap();
        assert!(check_api_key(&req, "s3cr3t").is_err());
    }

    #[test]
    fn check_api_key_accepts_matching_value() {
        let req = with_api_key_header(HttpRequest::builder().body(()).unwrap(), "s3cr3t").unwrap();
        assert!(check_api_key(&req, "s3cr3t").is_ok());
    }
}
