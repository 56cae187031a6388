use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::HumanKitError;

/// A thin wrapper on an HTTP client. Sets timeouts and the user-agent, and optionally retries
/// transient transport failures (timeouts, connect errors, 429 and 5xx).
///
/// The issuer and state-oracle clients run with `max_retries == 0`: their retry policy is part
/// of the pipeline (bounded claim-offer polling, not-yet-indexed polling) and must not be
/// masked by transport retries.
#[derive(Debug, Clone)]
pub struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl Request {
    pub(crate) fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            max_retries,
        }
    }

    /// Creates a request builder with defaults applied.
    pub(crate) fn req(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("humankit-core/{}", env!("CARGO_PKG_VERSION")),
            )
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.req(Method::GET, url)
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.req(Method::POST, url)
    }

    /// Sends a request built by `req`/`get`/`post`, retrying transient failures up to
    /// `max_retries` times.
    pub(crate) async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, HumanKitError> {
        if self.max_retries == 0 || request_builder.try_clone().is_none() {
            return execute_request_builder(request_builder)
                .await
                .map_err(Into::into);
        }

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries as usize);

        (|| async {
            let request_builder = request_builder.try_clone().ok_or_else(|| {
                RequestHandleError::permanent(
                    "<unknown>".to_string(),
                    None,
                    "request cannot be retried because it is not cloneable".to_string(),
                )
            })?;
            execute_request_builder(request_builder).await
        })
        .retry(backoff)
        .when(RequestHandleError::is_retryable)
        .await
        .map_err(Into::into)
    }

    /// Sends the request and deserializes a successful JSON body. Any non-2xx status becomes a
    /// [`HumanKitError::NetworkError`] carrying the status and the response body.
    pub(crate) async fn json<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<T, HumanKitError> {
        let response = self.handle(request_builder).await?;
        let url = response.url().to_string();
        let response = ensure_success(response).await?;

        let body = response.text().await.map_err(|err| HumanKitError::NetworkError {
            url: url.clone(),
            status: None,
            error: format!("failed to read response body: {err}"),
        })?;

        serde_json::from_str::<T>(&body).map_err(|err| {
            // Only the first characters are kept to avoid logging anything sensitive.
            HumanKitError::SerializationError {
                error: format!(
                    "failed to parse response from {url}: {err}, received: {}",
                    body.chars().take(20).collect::<String>()
                ),
            }
        })
    }

    /// Sends the request and only checks for a successful status.
    pub(crate) async fn send(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<(), HumanKitError> {
        let response = self.handle(request_builder).await?;
        ensure_success(response).await.map(drop)
    }
}

async fn ensure_success(response: Response) -> Result<Response, HumanKitError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let error = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unknown error"));
    Err(HumanKitError::NetworkError {
        url,
        status: Some(status.as_u16()),
        error,
    })
}

#[derive(Debug)]
struct RequestHandleError {
    url: String,
    status: Option<u16>,
    error: String,
    retryable: bool,
}

impl RequestHandleError {
    const fn retryable(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: true,
        }
    }

    const fn permanent(url: String, status: Option<u16>, error: String) -> Self {
        Self {
            url,
            status,
            error,
            retryable: false,
        }
    }

    const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl From<RequestHandleError> for HumanKitError {
    fn from(value: RequestHandleError) -> Self {
        Self::NetworkError {
            url: value.url,
            status: value.status,
            error: value.error,
        }
    }
}

async fn execute_request_builder(
    request_builder: RequestBuilder,
) -> Result<Response, RequestHandleError> {
    let (client, request) = request_builder.build_split();
    let request = request.map_err(|err| {
        RequestHandleError::permanent(
            err.url()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
            None,
            format!("request build failed: {err}"),
        )
    })?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status == 429 || (500..600).contains(&status) {
                return Err(RequestHandleError::retryable(
                    url,
                    Some(status),
                    format!("request error with bad status code {status}"),
                ));
            }
            Ok(resp)
        }
        Err(err) => {
            if err.is_timeout() || err.is_connect() {
                return Err(RequestHandleError::retryable(
                    url,
                    None,
                    format!("request timeout/connect error: {err}"),
                ));
            }

            Err(RequestHandleError::permanent(
                url,
                None,
                format!("request failed: {err}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retries_server_errors_up_to_the_budget() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/rpc")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let request = Request::new(Duration::from_secs(2), 2);
        let result = request.handle(request.get(&format!("{}/rpc", server.url()))).await;

        failing.assert_async().await;
        assert!(matches!(
            result,
            Err(HumanKitError::NetworkError {
                status: Some(503),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_without_retries_a_server_error_surfaces_immediately() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/offer")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let request = Request::new(Duration::from_secs(2), 0);
        let result: Result<serde_json::Value, _> = request
            .json(request.get(&format!("{}/offer", server.url())))
            .await;

        mock.assert_async().await;
        match result.unwrap_err() {
            HumanKitError::NetworkError { status, .. } => {
                assert_eq!(status, Some(500));
            }
            err => panic!("expected NetworkError, got {err:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_request_body_is_kept() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/states/1")
            .with_status(400)
            .with_body(r#"{"errors":[{"title":"Bad Request"}]}"#)
            .create_async()
            .await;

        let request = Request::new(Duration::from_secs(2), 0);
        let err = request
            .json::<serde_json::Value>(request.get(&format!("{}/v1/states/1", server.url())))
            .await
            .unwrap_err();

        assert!(err.is_not_yet_indexed());
    }
}
