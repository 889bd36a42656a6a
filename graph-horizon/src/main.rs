use std::{env, fs::read_to_string, path::PathBuf};

use anyhow::{self, Context as _};
use horizon_framework::{
    context::Clock,
    logging::{self, LoggingOptions},
    metrics::grt_f64,
};

use graph_horizon::{
    config::Config,
    protocol::GraphProtocol,
    scenario::{self, Scenario},
};

fn main() -> anyhow::Result<()> {
    let config_path = env::args()
        .nth(1)
        .context("missing argument for config path")?
        .parse::<PathBuf>()?;
    let scenario_path = env::args()
        .nth(2)
        .context("missing argument for scenario path")?
        .parse::<PathBuf>()?;

    let config_file_text = read_to_string(&config_path)
        .with_context(|| format!("failed to open config {}", config_path.display()))?;
    let config = serde_json::from_str::<Config>(&config_file_text)
        .context("failed to parse JSON config")?;
    let scenario_file_text = read_to_string(&scenario_path)
        .with_context(|| format!("failed to open scenario {}", scenario_path.display()))?;
    let scenario = serde_json::from_str::<Scenario>(&scenario_file_text)
        .context("failed to parse JSON scenario")?;

    logging::init(LoggingOptions {
        executable_name: "graph-horizon".into(),
        json: config.log_json,
    })?;
    tracing::info!("Graph Horizon replay starting...");
    tracing::debug!(config = ?config);

    let mut protocol = GraphProtocol::deploy(config, Clock::default())?;
    let outcomes = scenario::replay(&mut protocol, scenario);
    for outcome in &outcomes {
        match &outcome.result {
            Ok(amount) => tracing::info!(
                step = outcome.index,
                action = outcome.label,
                amount = amount.map(grt_f64),
                expected = outcome.as_expected(),
                "committed"
            ),
            Err(err) => tracing::warn!(
                step = outcome.index,
                action = outcome.label,
                kind = err.kind_label(),
                %err,
                expected = outcome.as_expected(),
                "reverted"
            ),
        }
    }

    let summary = scenario::summarize(&outcomes);
    tracing::info!(
        committed = summary.committed,
        reverted = summary.reverted,
        unexpected = summary.unexpected,
        block_number = protocol.clock.block_number(),
        timestamp = protocol.clock.timestamp(),
        total_supply = grt_f64(protocol.core.token.total_supply()),
        "replay finished"
    );
    anyhow::ensure!(
        summary.unexpected == 0,
        "{} steps did not behave as expected",
        summary.unexpected
    );
    Ok(())
}
