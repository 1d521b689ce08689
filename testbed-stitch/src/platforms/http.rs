use reqwest::Response;
use serde::de::DeserializeOwned;
use crate::error::StitchError;

/// Reusable helper for checking a platform response, returns the body text on success and a
/// `StitchError::Api` carrying the status and body otherwise.
pub async fn check_response(resp: Response, service: &str, action: &str) -> anyhow::Result<String> {
    let http_code = resp.status();
    let text_response = resp.text().await?;

    if http_code.is_success() {
        tracing::debug!("{service} {action} successful");
        Ok(text_response)
    } else {
        tracing::debug!("{service} {action} was not successful with code {:?}", http_code.to_string());
        Err(StitchError::Api {
            service: service.to_string(),
            status: http_code.as_u16(),
            body: text_response,
        }.into())
    }
}

/// `check_response` then deserialise the body.
pub async fn parse_response<T: DeserializeOwned>(resp: Response, service: &str, action: &str) -> anyhow::Result<T> {
    let text = check_response(resp, service, action).await?;
    let value = serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("{service} {action} returned an unexpected body: {e}"))?;
    Ok(value)
}

/// Join a service base url with an API version, without doubling the version if the catalog
/// already included it.
pub fn versioned(url: &str, version: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with(&format!("/{version}")) {
        trimmed.to_string()
    } else {
        format!("{trimmed}/{version}")
    }
}
