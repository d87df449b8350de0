//! Test Run MCP Server
//!
//! Release boundary detection and flakiness analysis over Azure DevOps
//! test plan history.
//!
//! # Configuration
//! Set `AZURE_DEVOPS_ORG_URL`, `AZURE_DEVOPS_PROJECT` and `AZURE_DEVOPS_PAT`,
//! or configure in `~/.binks/testrun-analyzer.toml`

use rmcp::{transport::stdio, ServiceExt};
use testrun_analyzer::telemetry::init_tracing;
use testrun_analyzer::Config;
use testrun_mcp::TestRunMcpServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("testrun_mcp", false)?;

    tracing::info!("Starting Test Run MCP Server");

    let config = Config::load()?;
    tracing::info!(
        "Azure DevOps: {} / {}",
        config.azure.organization_url,
        config.azure.project
    );

    let server = TestRunMcpServer::new(config)?;
    let service = server.serve(stdio()).await?;

    tracing::info!("Server running, waiting for requests...");
    service.waiting().await?;

    tracing::info!("Server shutting down");
    Ok(())
}
