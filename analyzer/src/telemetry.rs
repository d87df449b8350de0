//! Tracing setup shared by the CLI and the MCP server

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to stderr
///
/// stdout is reserved for reports (CLI) and the protocol stream (MCP).
/// `RUST_LOG` overrides the default of `info` (or `debug` with `verbose`)
/// for `crate_name` and the analyzer library. Set `LOG_FORMAT=json` for
/// structured output.
pub fn init_tracing(crate_name: &str, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env()
        .add_directive(format!("{}={}", crate_name, level).parse()?);
    if crate_name != "testrun_analyzer" {
        filter = filter.add_directive(format!("testrun_analyzer={}", level).parse()?);
    }

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}
