//! Wire types of the refresh endpoint

use serde::{Deserialize, Serialize};

/// Body of `POST /auth/refresh`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub auto_login: bool,
}

/// Successful refresh response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    /// The new access token
    pub access_token: String,

    /// A rotated refresh token, when the server issued one
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_is_camel_case() {
        let request = RefreshRequest {
            refresh_token: "r1".to_string(),
            auto_login: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "refreshToken": "r1", "autoLogin": true })
        );
    }

    #[test]
    fn test_response_without_refresh_token() {
        let response: RefreshResponse =
            serde_json::from_value(json!({ "accessToken": "a2" })).unwrap();
        assert_eq!(response.access_token, "a2");
        assert_eq!(response.refresh_token, None);
    }
}
