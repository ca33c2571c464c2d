//! EndAbyss core: a scoped endpoint-discovery crawler for offensive
//! security reconnaissance.
//!
//! The engine takes a [`config::ScanConfig`] and returns a
//! [`model::ScanReport`]: every reachable endpoint, form, and request
//! parameter found by crawling the target within scope. Two fetch backends
//! exist behind one trait: raw HTTP ([`fetch::StaticBackend`]) and a
//! headless browser driven over the WebDriver protocol
//! ([`fetch::BrowserBackend`]), which also surfaces the network requests a
//! rendered page fires.

pub mod aggregate;
pub mod config;
pub mod crawler;
pub mod dirscan;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod model;
pub mod politeness;
pub mod report;
pub mod scope;

pub use config::{ScanConfig, ScanMode, ScopeMode};
pub use crawler::{Crawler, ProgressCallback, scan};
pub use error::{Result, ScanError};
pub use model::{Endpoint, EndpointSource, Form, ParameterSet, ScanReport, ScanStats};
pub use report::{PipeMode, render_pipe, render_plain, render_report};
