//! REST API client for a Stable Diffusion web UI worker.
//!
//! Wraps the `/sdapi/v1` HTTP endpoints (options, extensions, txt2img,
//! interrupt) using [`reqwest`]. Every call takes its own timeout so a
//! short probe and a long generation can share one connection pool.

use std::time::Duration;

use crate::messages::{
    ExtensionResponse, GenerationParams, OptionsResponse, Txt2ImgRequest, Txt2ImgResponse,
};

/// HTTP client for a single worker.
#[derive(Debug, Clone)]
pub struct SdApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the worker REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum SdApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The worker returned a non-2xx status code.
    #[error("Worker API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// Generation succeeded but returned no image.
    #[error("Worker returned no images")]
    EmptyResult,
}

impl SdApiError {
    /// Whether the failure was a client-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_timeout())
    }
}

impl SdApi {
    /// Create a new API client for a worker.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:7860`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (connection pooling across workers).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Fetch the worker's options; answers double as the liveness probe.
    ///
    /// Sends `GET /sdapi/v1/options`.
    pub async fn get_options(&self, timeout: Duration) -> Result<OptionsResponse, SdApiError> {
        let response = self
            .client
            .get(format!("{}/sdapi/v1/options", self.api_url))
            .timeout(timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// List installed extensions.
    ///
    /// Sends `GET /sdapi/v1/extensions`.
    pub async fn list_extensions(
        &self,
        timeout: Duration,
    ) -> Result<Vec<ExtensionResponse>, SdApiError> {
        let response = self
            .client
            .get(format!("{}/sdapi/v1/extensions", self.api_url))
            .timeout(timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Run a text-to-image generation.
    ///
    /// Sends `POST /sdapi/v1/txt2img` with `send_images = true` and
    /// `save_images = false`. A response without any image is reported as
    /// [`SdApiError::EmptyResult`].
    pub async fn txt2img(
        &self,
        params: &GenerationParams,
        timeout: Duration,
    ) -> Result<Txt2ImgResponse, SdApiError> {
        let response = self
            .client
            .post(format!("{}/sdapi/v1/txt2img", self.api_url))
            .json(&Txt2ImgRequest::new(params))
            .timeout(timeout)
            .send()
            .await?;

        let parsed: Txt2ImgResponse = Self::parse_response(response).await?;
        if parsed.images.is_empty() {
            return Err(SdApiError::EmptyResult);
        }

        tracing::debug!(
            api_url = %self.api_url,
            images = parsed.images.len(),
            "txt2img completed",
        );
        Ok(parsed)
    }

    /// Interrupt whatever the worker is generating right now.
    ///
    /// Sends `POST /sdapi/v1/interrupt`.
    pub async fn interrupt(&self, timeout: Duration) -> Result<(), SdApiError> {
        let response = self
            .client
            .post(format!("{}/sdapi/v1/interrupt", self.api_url))
            .timeout(timeout)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise return an
    /// [`SdApiError::ApiError`] carrying the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, SdApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SdApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SdApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn get_options_parses_checkpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sdapi/v1/options")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"sd_model_checkpoint": "modelA.safetensors [89ff21]"}"#)
            .create_async()
            .await;

        let api = SdApi::new(server.url());
        let options = api.get_options(TIMEOUT).await.unwrap();

        assert_eq!(
            options.sd_model_checkpoint.as_deref(),
            Some("modelA.safetensors [89ff21]")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_becomes_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sdapi/v1/options")
            .with_status(503)
            .with_body("loading")
            .create_async()
            .await;

        let api = SdApi::new(server.url());
        let err = api.get_options(TIMEOUT).await.unwrap_err();

        match err {
            SdApiError::ApiError { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "loading");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_extensions_parses_entries() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/sdapi/v1/extensions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"name": "sd-webui-controlnet", "enabled": true, "version": "abc"},
                    {"name": "adetailer", "enabled": false}]"#,
            )
            .create_async()
            .await;

        let api = SdApi::new(server.url());
        let exts = api.list_extensions(TIMEOUT).await.unwrap();

        assert_eq!(exts.len(), 2);
        assert_eq!(exts[0].name, "sd-webui-controlnet");
        assert!(!exts[1].enabled);
    }

    #[tokio::test]
    async fn txt2img_posts_payload_and_returns_images() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/sdapi/v1/txt2img")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "prompt": "a lighthouse",
                "steps": 12,
                "send_images": true,
                "save_images": false,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"images": ["iVBORw0KGgo="], "info": "{\"seed\": 1}"}"#)
            .create_async()
            .await;

        let api = SdApi::new(format!("{}/", server.url()));
        let result = api
            .txt2img(&GenerationParams::new("a lighthouse", 12), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(result.images, vec!["iVBORw0KGgo="]);
        assert_eq!(result.info, "{\"seed\": 1}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn txt2img_without_images_is_empty_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sdapi/v1/txt2img")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"images": []}"#)
            .create_async()
            .await;

        let api = SdApi::new(server.url());
        let err = api
            .txt2img(&GenerationParams::new("x", 1), TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, SdApiError::EmptyResult));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn interrupt_checks_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/sdapi/v1/interrupt")
            .with_status(200)
            .create_async()
            .await;

        let api = SdApi::new(server.url());
        assert!(api.interrupt(TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_worker_is_request_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let api = SdApi::new("http://127.0.0.1:9");
        let err = api.get_options(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SdApiError::Request(_)));
    }

    #[tokio::test]
    async fn trailing_slash_in_endpoint_is_ignored() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/sdapi/v1/options")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"sd_model_checkpoint": null}"#)
            .create_async()
            .await;

        let api = SdApi::new(format!("{}/", server.url()));
        let options = api.get_options(TIMEOUT).await.unwrap();

        assert!(options.sd_model_checkpoint.is_none());
        mock.assert_async().await;
    }
}
