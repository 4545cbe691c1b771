pub mod clock;
pub mod http;
pub mod middleware;

#[cfg(test)]
mod tests;

use self::http::HttpResponse;
use serde::Deserialize;
use serde_json::Value;

/// Error payload returned by Google OAuth2 and certificate endpoints.
///
/// `error` is usually a short string such as `invalid_grant`, but some Google APIs
/// nest an object with a `message` instead.
#[derive(Debug, Deserialize)]
pub struct ProviderErrorResponse {
    pub error: Value,
    pub error_description: Option<String>,
}

impl ProviderErrorResponse {
    pub fn display_message(&self) -> String {
        let error = match &self.error {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.error.to_string()),
            other => other.to_string(),
        };
        match &self.error_description {
            Some(description) => format!("{} ({})", error, description),
            None => error,
        }
    }
}

/// Extracts a human readable detail from a failed provider response.
///
/// JSON payloads with an `error` field yield `error (error_description)`; anything
/// else yields `None`.
pub fn provider_error_detail(response: &HttpResponse) -> Option<String> {
    let data = response.data.as_ref()?;
    if data.get("error").map_or(true, Value::is_null) {
        return None;
    }
    serde_json::from_value::<ProviderErrorResponse>(data.clone())
        .ok()
        .map(|e| e.display_message())
}
