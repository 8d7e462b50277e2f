use std::time::Duration;

use crate::core::error::{FetchError, FetchResult};

const REDIRECT_TIMEOUT: Duration = Duration::from_secs(10);
const REDIRECT_GET_TIMEOUT: Duration = Duration::from_secs(12);

/// Follows a redirect chain with HEAD, falling back to GET for hosts that
/// reject HEAD. Returns the final URL, which may equal the input.
pub async fn resolve_redirect(client: &reqwest::Client, url: &str) -> FetchResult<String> {
    match client.head(url).timeout(REDIRECT_TIMEOUT).send().await {
        Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
            return Ok(resp.url().to_string());
        }
        Ok(resp) => {
            tracing::debug!("[resolve] HEAD {} returned {}, retrying with GET", url, resp.status());
        }
        Err(e) => {
            tracing::debug!("[resolve] HEAD {} failed: {}, retrying with GET", url, e);
        }
    }

    let resp = client.get(url).timeout(REDIRECT_GET_TIMEOUT).send().await?;
    if !resp.status().is_success() {
        return Err(FetchError::http_status(resp.status(), url));
    }
    Ok(resp.url().to_string())
}
