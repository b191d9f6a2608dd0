//! Shared JSON-over-HTTP plumbing for the REST service clients

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use super::ServiceError;

/// Token header understood by the bare-metal, network and image services
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    headers: Vec<(&'static str, String)>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            headers: Vec::new(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        trace!("{} {}", method, url);
        let mut req = self.client.request(method, &url);
        if let Some(ref token) = self.token {
            req = req.header(AUTH_TOKEN_HEADER, token);
        }
        for (name, value) in &self.headers {
            req = req.header(*name, value);
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ServiceError> {
        let response = req
            .send()
            .await
            .map_err(|e| ServiceError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
        response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        let req = self.build_request(Method::GET, path).query(query);
        Self::json(self.send(req).await?).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        let req = self.build_request(Method::POST, path).json(body);
        Self::json(self.send(req).await?).await
    }

    /// POST where the response body is ignored
    pub async fn post_no_content<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ServiceError> {
        let req = self.build_request(Method::POST, path).json(body);
        self.send(req).await.map(|_| ())
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        let req = self.build_request(Method::PUT, path).json(body);
        Self::json(self.send(req).await?).await
    }

    /// PUT where the response body is ignored
    pub async fn put_no_content<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ServiceError> {
        let req = self.build_request(Method::PUT, path).json(body);
        self.send(req).await.map(|_| ())
    }

    pub async fn patch_no_content<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ServiceError> {
        let req = self.build_request(Method::PATCH, path).json(body);
        self.send(req).await.map(|_| ())
    }

    pub async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        let req = self.build_request(Method::DELETE, path);
        self.send(req).await.map(|_| ())
    }
}
