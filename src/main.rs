use alloy::primitives::B256;
use reality_mirror::chain::alloy_reader::AlloyConnector;
use reality_mirror::config::chains::ChainConfig;
use reality_mirror::model::Proposal;
use reality_mirror::status::ProposalStatus;
use reality_mirror::storage::MirrorDb;
use reality_mirror::sync::{SyncEvent, SyncSession};
use reality_mirror::utils::config::{Config, RunMode};
use reality_mirror::utils::rpc::round_robin_handler;
use std::sync::Arc;
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 16;

fn status_line(proposal: &Proposal, status: &ProposalStatus) -> String {
    let proposal_id = proposal
        .proposal_id
        .found()
        .map(String::as_str)
        .unwrap_or("<unrecovered>");
    format!(
        "{:#x}  #{:<10} {:<11} {}  ({})",
        proposal.question_id,
        proposal.created_block,
        status.label.as_str(),
        proposal_id,
        status.detail
    )
}

async fn print_statuses(session: &SyncSession, only: Option<&[B256]>) -> anyhow::Result<()> {
    for (proposal, status) in session.proposal_statuses().await? {
        if only.is_some_and(|ids| !ids.contains(&proposal.question_id)) {
            continue;
        }
        println!("{}", status_line(&proposal, &status));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reality_mirror::utils::env_guard::harden_env_setup();

    // Default to `info` when `RUST_LOG` is unset or invalid.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    let chain = ChainConfig::get(config.chain_id);
    tracing::info!(
        "[STARTUP] {} (chain {}), module {:#x}, db {}",
        chain.name,
        chain.chain_id,
        config.module_address,
        config.db_path.display()
    );

    let db = MirrorDb::open(&config.db_path)?;
    let session = SyncSession::new(config.clone(), db, Arc::new(AlloyConnector));

    let mut endpoints = vec![config.rpc_url.clone()];
    endpoints.extend(config.fallback_rpc_urls.iter().cloned());
    session
        .set_exhaustion_handler(round_robin_handler(endpoints))
        .await;

    session.connect(&config.rpc_url).await?;
    match session.sync().await {
        Ok(report) => tracing::info!(
            "[SYNC] Synced {:?}: {} new proposal(s), {} new answer(s), {} changed",
            report.ranges,
            report.new_proposals.len(),
            report.new_answers,
            report.changed.len()
        ),
        Err(err) if err.is_transient() => {
            tracing::warn!("[SYNC] {}", err.user_message());
        }
        Err(err) => return Err(err.into()),
    }
    print_statuses(&session, None).await?;

    if config.run_mode == RunMode::Once {
        return Ok(());
    }

    let (sink, mut events) = mpsc::channel(EVENT_BUFFER);
    session.start_polling(session.poll_interval().await?, sink);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[STARTUP] Ctrl-C received; shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(SyncEvent::Updated(changed)) => print_statuses(&session, Some(&changed)).await?,
                Some(SyncEvent::Failed(message)) => tracing::warn!("[SYNC] {}", message),
                None => break,
            },
        }
    }
    session.stop_polling();
    Ok(())
}
