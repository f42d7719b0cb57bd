//! Wire model for the line-delimited JSON protocol
//!
//! Outbound frames carry a string id, a method name, and optional
//! method-specific parameters. Inbound frames are either responses
//! (correlated by id) or events (discriminated by an `Event` field,
//! handled in [`crate::events`]).

use serde::{Deserialize, Serialize};

/// Error code used for responses synthesized by the request channel when no
/// real response could be obtained.
pub const SYNTHETIC_ERROR_CODE: i32 = -1;

/// Outbound request frame
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Inbound response frame
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

/// Error object carried by a failed response
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
}

impl Response {
    /// Build the synthetic failure response used when the round trip could
    /// not be completed (connect failure, write failure, timeout, parse
    /// trouble). Carries the original request id so the correlation
    /// invariant holds even for manufactured responses.
    pub fn unable_to_get_response(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(ErrorObject {
                code: SYNTHETIC_ERROR_CODE,
                message: "unable to get response".to_string(),
            }),
        }
    }

    /// True when the response carries an error object
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_omits_empty_params() {
        let request = Request::new("get_app_state", None, "1");
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""id":"1""#));
        assert!(json.contains(r#""method":"get_app_state""#));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_request_serialization_with_params() {
        let request = Request::new("set_connected", Some(serde_json::json!(true)), "2");
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""params":true"#));
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"id":"7","result":"Guiding"}"#;
        let response: Response = serde_json::from_str(json).unwrap();
        assert_eq!(response.id, "7");
        assert!(!response.is_error());
        assert_eq!(response.result.unwrap().as_str().unwrap(), "Guiding");
    }

    #[test]
    fn test_error_response_parsing() {
        let json = r#"{"id":"7","error":{"code":1,"message":"cannot guide while calibrating"}}"#;
        let response: Response = serde_json::from_str(json).unwrap();
        assert_eq!(response.id, "7");
        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, 1);
        assert_eq!(error.message, "cannot guide while calibrating");
    }

    #[test]
    fn test_synthetic_response_keeps_request_id() {
        let response = Response::unable_to_get_response("abc");
        assert_eq!(response.id, "abc");
        let error = response.error.unwrap();
        assert_eq!(error.code, SYNTHETIC_ERROR_CODE);
        assert_eq!(error.message, "unable to get response");
    }
}
