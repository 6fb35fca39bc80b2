pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;

use std::sync::Arc;

use crate::agent_engine::engine::Orchestrator;
use crate::agent_engine::state::RunReport;
use crate::config::AppConfig;
use crate::errors::{MarksmanError, MarksmanResult};
use crate::executor::chrome::ChromeActuator;
use crate::llm::oracle::VisionOracle;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Run `task` in Chrome with the vision-model oracle described by `config`.
pub async fn run_task(config: &AppConfig, task: &str, start_url: Option<&str>) -> MarksmanResult<RunReport> {
    let api_key = crate::config::resolve_api_key(&config.oracle).ok_or_else(|| {
        MarksmanError::Config("no API key: set MARKSMAN_API_KEY or OPENAI_API_KEY, or oracle.api_key".into())
    })?;
    let oracle = VisionOracle::from_config(&config.oracle, api_key)?;
    let actuator = ChromeActuator::new(config.browser.clone());

    let mut orchestrator = Orchestrator::new(Box::new(actuator), Arc::new(oracle), config);
    let stop = orchestrator.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    Ok(orchestrator.run(task, start_url).await)
}
