//! Test Run MCP Library
//!
//! Release boundary and flakiness analysis for Azure DevOps test plans,
//! served over MCP.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use testrun_mcp::TestRunMcpServer;
//!
//! let server = TestRunMcpServer::new(testrun_analyzer::Config::load()?)?;
//! // Use with in-memory transport or serve via stdio
//! ```

pub mod cache;
pub mod server;

pub use cache::{CacheStats, ReportCache};
pub use server::TestRunMcpServer;
