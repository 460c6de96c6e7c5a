//! Common utilities for the VPC API client
//!
//! Request plumbing shared by every endpoint: authentication, status
//! mapping and cursor pagination.

use crate::error::VpcError;
use crate::models::ListResult;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// Prefix of every policy API route
pub const API_PREFIX: &str = "/policy/api/v1";

/// HTTP client wrapper with authentication
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from an API route or a resource path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else if path.starts_with(API_PREFIX) {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}{}", self.base_url, API_PREFIX, path)
        }
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    async fn check(method: &str, path: &str, response: Response) -> Result<Response, VpcError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(VpcError::NotFound(format!("{} {} - {}", method, path, body))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(VpcError::Authentication(format!(
                "{} {} failed: {} - {}",
                method, path, status, body
            ))),
            StatusCode::BAD_REQUEST => Err(VpcError::InvalidRequest(format!(
                "{} {} failed: {} - {}",
                method, path, status, body
            ))),
            _ => Err(VpcError::Api(format!("{} {} failed: {} - {}", method, path, status, body))),
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, VpcError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            VpcError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Fetch every page of a cursor-paginated listing
    pub async fn fetch_all_pages<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<T>, VpcError> {
        let mut all_results = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = filters.to_vec();
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }
            let url = if query.is_empty() {
                self.build_url(path)
            } else {
                format!("{}?{}", self.build_url(path), build_query_string(&query))
            };
            debug!("Fetching page: {}", url);

            let response = self.authed(self.client.get(&url)).send().await?;
            let response = Self::check("GET", path, response).await?;
            let page: ListResult<T> = Self::decode(response).await?;
            all_results.extend(page.results);

            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(all_results)
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, VpcError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.authed(self.client.get(&url)).send().await?;
        let response = Self::check("GET", path, response).await?;
        Self::decode(response).await
    }

    /// Make a PUT request (create-or-replace)
    pub async fn put<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, VpcError> {
        let url = self.build_url(path);
        debug!("PUT {} with body: {}", url, body);

        let response = self.authed(self.client.put(&url)).json(body).send().await?;
        let response = Self::check("PUT", path, response).await?;
        Self::decode(response).await
    }

    /// Make a PATCH request
    pub async fn patch(&self, path: &str, body: &serde_json::Value) -> Result<(), VpcError> {
        let url = self.build_url(path);
        debug!("PATCH {} with body: {}", url, body);

        let response = self.authed(self.client.patch(&url)).json(body).send().await?;
        Self::check("PATCH", path, response).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), VpcError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self.authed(self.client.delete(&url)).send().await?;
        Self::check("DELETE", path, response).await?;
        Ok(())
    }
}

/// Build query string from filters
pub fn build_query_string(filters: &[(&str, &str)]) -> String {
    filters
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http() -> HttpClient {
        HttpClient::new(Client::new(), "https://vpc.example:443/".to_string(), "t".to_string())
    }

    #[test]
    fn test_build_url_resource_path() {
        assert_eq!(
            http().build_url("/orgs/default/projects/p/vpcs/v/subnets/s"),
            "https://vpc.example:443/policy/api/v1/orgs/default/projects/p/vpcs/v/subnets/s"
        );
    }

    #[test]
    fn test_build_url_api_route_not_prefixed_twice() {
        assert_eq!(
            http().build_url("/policy/api/v1/search/subnets"),
            "https://vpc.example:443/policy/api/v1/search/subnets"
        );
    }

    #[test]
    fn test_build_query_string_encodes() {
        assert_eq!(
            build_query_string(&[("tag_scope", "label/app"), ("tag", "a b")]),
            "tag_scope=label%2Fapp&tag=a%20b"
        );
    }
}
