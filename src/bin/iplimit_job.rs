use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use iplimit::config::JobConfig;
use iplimit::database;
use iplimit::job::scheduler::Scheduler;
use iplimit::job::CheckClientIpJob;
use iplimit::xray::XrayService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/iplimit.yaml".to_string();
    let mut once = false;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: iplimit_job [--conf FILE] [--once]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    return Err(anyhow::anyhow!("--conf requires a FILE argument"));
                }
            }
            "--once" => once = true,
            _ => {}
        }
        i += 1;
    }

    let config = JobConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {conf_file}"))?;

    let pool = database::connect(&config.db_url, config.max_connections)
        .await
        .with_context(|| format!("Cannot open database: {}", config.db_url))?;
    database::migrate(&pool)
        .await
        .context("Cannot apply database migrations")?;

    let xray = Arc::new(XrayService::new());
    let job = Arc::new(CheckClientIpJob::from_config(pool, xray.clone(), &config));

    tracing::info!(
        "[iplimit] [started] interval={}s penalty_threshold={}",
        config.interval_secs,
        config.penalty_policy().threshold()
    );

    if once {
        job.run().await;
        report_restart(&xray);
        return Ok(());
    }

    let restart = Arc::clone(&xray);
    let scheduler = Scheduler::spawn(
        job,
        Duration::from_secs(config.interval_secs),
        move |_| report_restart(&restart),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Cannot listen for shutdown signal")?;
    tracing::info!("[iplimit] [stopping] waiting for in-flight run");

    scheduler
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    report_restart(&xray);
    Ok(())
}

/// The proxy core is managed elsewhere; surface the request for it.
fn report_restart(xray: &XrayService) {
    if xray.take_need_restart() {
        tracing::warn!("[iplimit] [restart] inbound state changed, xray restart needed");
    }
}
