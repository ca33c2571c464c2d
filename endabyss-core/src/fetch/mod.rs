//! Fetch backends. Both speak the same `FetchRequest` -> `FetchResult`
//! contract; the scheduler never knows which one it is driving.

pub mod browser;
pub mod static_http;

use crate::error::Result;
use crate::model::{FetchRequest, FetchResult};
use async_trait::async_trait;

pub use browser::BrowserBackend;
pub use static_http::StaticBackend;

#[async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult>;

    /// Releases backend resources (browser sessions, driver processes).
    async fn close(&self) {}
}
