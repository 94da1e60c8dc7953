// src/services/upstream.rs
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::fmt;

use crate::config::Config;
use crate::models::{CashRegister, Product, Sale, User};
use crate::BoxError;

/// Failure of a single upstream call, split by retry eligibility.
///
/// Connection and timeout failures are transient; an HTTP status rejection
/// or an undecodable body is a definitive verdict from the upstream and is
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    Transient(String),
    Definitive {
        status: Option<u16>,
        message: String,
    },
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            UpstreamError::Transient(err.to_string())
        } else {
            UpstreamError::Definitive {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpstreamError::Transient(message) => write!(f, "transient upstream error: {}", message),
            UpstreamError::Definitive {
                status: Some(status),
                message,
            } => write!(f, "upstream rejected with status {}: {}", status, message),
            UpstreamError::Definitive {
                status: None,
                message,
            } => write!(f, "upstream error: {}", message),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Optional query filters forwarded to the upstream list endpoints.
#[derive(Debug, Clone, Default)]
pub struct SourceFilters {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// The four read-only data providers plus the health probe. Each call is
/// independently fallible; callers must not assume correlated failure.
#[async_trait]
pub trait SourceApi: Send + Sync {
    async fn get_sales(&self, filters: &SourceFilters) -> Result<Vec<Sale>, UpstreamError>;
    async fn get_users(&self, filters: &SourceFilters) -> Result<Vec<User>, UpstreamError>;
    async fn get_products(&self, filters: &SourceFilters) -> Result<Vec<Product>, UpstreamError>;
    async fn get_cash_registers(
        &self,
        filters: &SourceFilters,
    ) -> Result<Vec<CashRegister>, UpstreamError>;
    async fn health_check(&self) -> Result<(), UpstreamError>;
}

/// HTTP implementation of [`SourceApi`] against the upstream business API.
pub struct UpstreamClient {
    http: Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Result<Self, BoxError> {
        let http = Client::builder()
            .timeout(config.upstream_timeout)
            .user_agent("retail-dashboard-api/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: &SourceFilters,
    ) -> Result<Vec<T>, UpstreamError> {
        let url = format!("{}/{}", self.base_url, path);
        info!("Fetching {} from URL: {}", path, url);

        let mut request = self.http.get(&url);
        if let Some(start) = &filters.start_date {
            request = request.query(&[("startDate", start)]);
        }
        if let Some(end) = &filters.end_date {
            request = request.query(&[("endDate", end)]);
        }
        if let Some(status) = &filters.status {
            request = request.query(&[("status", status)]);
        }
        if let Some(limit) = filters.limit {
            request = request.query(&[("limit", limit.to_string())]);
        }

        let response = request
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?
            .error_for_status()
            .map_err(UpstreamError::from_reqwest)?;

        response
            .json::<Vec<T>>()
            .await
            .map_err(UpstreamError::from_reqwest)
    }
}

#[async_trait]
impl SourceApi for UpstreamClient {
    async fn get_sales(&self, filters: &SourceFilters) -> Result<Vec<Sale>, UpstreamError> {
        self.get_list("sales", filters).await
    }

    async fn get_users(&self, filters: &SourceFilters) -> Result<Vec<User>, UpstreamError> {
        self.get_list("users", filters).await
    }

    async fn get_products(&self, filters: &SourceFilters) -> Result<Vec<Product>, UpstreamError> {
        self.get_list("products", filters).await
    }

    async fn get_cash_registers(
        &self,
        filters: &SourceFilters,
    ) -> Result<Vec<CashRegister>, UpstreamError> {
        self.get_list("cash-registers", filters).await
    }

    async fn health_check(&self) -> Result<(), UpstreamError> {
        let url = format!("{}/health", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?
            .error_for_status()
            .map_err(UpstreamError::from_reqwest)?;
        Ok(())
    }
}
