// src/source/mod.rs
use crate::utils::error::SourceError;
use reqwest::header;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = concat!("domquery/", env!("CARGO_PKG_VERSION"));
// Be polite to remote hosts: small fixed delay before every fetch.
const FETCH_DELAY_MS: u64 = 150;

/// Creates a reqwest client configured for document fetching.
fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    let user_agent = std::env::var("DOMQUERY_USER_AGENT")
        .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());
    reqwest::Client::builder().user_agent(user_agent).build()
}

/// Loads the raw document text for an input that is either a local file
/// path or an http(s) URL.
pub async fn load_document(input: &str) -> Result<String, SourceError> {
    if input.starts_with("http://") || input.starts_with("https://") {
        fetch_url(input).await
    } else {
        tracing::info!("Reading document from file: {}", input);
        let body = tokio::fs::read_to_string(input).await?;
        tracing::debug!("Read {} bytes from {}", body.len(), input);
        Ok(body)
    }
}

/// Downloads a document from a URL, with basic rate limiting and
/// status-code mapping.
async fn fetch_url(url: &str) -> Result<String, SourceError> {
    let client = build_client()?; // Propagate client build error if any

    tracing::info!("Downloading document from: {}", url);
    tokio::time::sleep(Duration::from_millis(FETCH_DELAY_MS)).await;

    let response = client
        .get(url)
        .header(header::ACCEPT, "text/html,application/xhtml+xml,text/plain,*/*")
        .send()
        .await?; // Propagates reqwest::Error as SourceError::Network

    let status = response.status();
    if !status.is_success() {
        tracing::error!("HTTP error status: {} for URL: {}", status, url);
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url.to_string()));
        }
        return Err(SourceError::Http(status));
    }

    let body = response.text().await?;
    tracing::debug!("Successfully downloaded {} bytes from {}", body.len(), url);
    Ok(body)
}
