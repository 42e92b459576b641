//! HTTP server command, `taskdeck serve`.

use anyhow::Result;

use taskdeck::config::AppConfig;

pub async fn cmd_serve(config: AppConfig) -> Result<()> {
    // Held until the server exits so buffered file logs are flushed.
    let _guard = taskdeck::telemetry::init(&config.logging)?;

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    taskdeck::server::start_server(config).await
}
