use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use escalation_daemon::config::DaemonConfig;
use escalation_daemon::protocol::{self, Command, Response};
use escalation_daemon::{build_router, telemetry};
use escalation_router::{ContextMap, EscalationRouter};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (overrides ESCALATION_ROUTER_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Answer one query, print the JSON result and exit
    #[arg(long)]
    query: Option<String>,

    /// Context attribute for --query, as key=value (repeatable)
    #[arg(long = "context", value_parser = parse_key_val)]
    context: Vec<(String, String)>,

    /// Deadline for --query in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Seconds between metrics log lines (0 disables)
    #[arg(long)]
    metrics_interval_secs: Option<u64>,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_tracing();

    let mut config = DaemonConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(secs) = args.metrics_interval_secs {
        config.daemon.metrics_interval_secs = secs;
    }
    info!(
        tier2 = %config.backends.tier2.url,
        tier3 = %config.backends.tier3.url,
        context = config.backends.context.as_ref().map(|c| c.url.as_str()).unwrap_or("none"),
        "escalation daemon starting"
    );

    let router = Arc::new(build_router(&config).context("building router")?);
    let cancel = CancellationToken::new();
    let maintenance =
        router.spawn_maintenance(config.daemon.invalidation_feed_capacity, cancel.clone());
    let events = telemetry::spawn_event_logger(Arc::clone(router.events()), cancel.clone());
    let reporter = config.daemon.metrics_interval().map(|interval| {
        telemetry::spawn_metrics_reporter(Arc::clone(&router), interval, cancel.clone())
    });

    let outcome = match &args.query {
        Some(text) => one_shot(&router, text, &args).await,
        None => tokio::select! {
            result = serve(Arc::clone(&router), config.daemon.max_in_flight) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                Ok(())
            }
        },
    };

    cancel.cancel();
    drop(maintenance.invalidations);
    for handle in [maintenance.sweeper, maintenance.listener, events]
        .into_iter()
        .chain(reporter)
    {
        if let Err(e) = handle.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
    let m = router.snapshot();
    info!(
        dispatches = m.dispatches,
        cache_hit_ratio = m.cache_hit_ratio,
        "escalation daemon stopped"
    );
    outcome
}

async fn one_shot(router: &EscalationRouter, text: &str, args: &Args) -> Result<()> {
    let command = Command::Dispatch {
        id: None,
        query: text.to_string(),
        context: args.context.iter().cloned().collect::<ContextMap>(),
        timeout_ms: args.timeout_ms,
        cost_budget: None,
    };
    let response = protocol::execute(router, command).await;
    println!("{}", response.to_line());
    if let Response::Error { kind, message, .. } = response {
        anyhow::bail!("{kind}: {message}");
    }
    Ok(())
}

/// Read commands from stdin until EOF, answering each on stdout.
async fn serve(router: Arc<EscalationRouter>, max_in_flight: usize) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<String>(max_in_flight.max(1));
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let slots = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let permit = Arc::clone(&slots)
            .acquire_owned()
            .await
            .context("command slots closed")?;
        let router = Arc::clone(&router);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = protocol::handle_line(&router, &line).await;
            if tx.send(response.to_line()).await.is_err() {
                warn!("stdout writer gone, dropping response");
            }
            drop(permit);
        });
    }

    // Wait for in-flight commands, then let the writer drain.
    let _all = slots
        .acquire_many(max_in_flight.max(1) as u32)
        .await
        .context("command slots closed")?;
    drop(tx);
    writer.await.context("stdout writer panicked")??;
    Ok(())
}
