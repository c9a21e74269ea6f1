//! Request handlers for the health endpoint and the resource groups.

mod extract;
mod health;
pub mod reports;
pub mod resources;

pub use extract::AppJson;
pub use health::{HealthResponse, health_check};

use serde::Serialize;

/// Success envelope shared by the resource groups.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<usize>,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            results: None,
            data,
        }
    }

    pub fn list(data: T, results: usize) -> Self {
        Self {
            status: "success",
            results: Some(results),
            data,
        }
    }
}
