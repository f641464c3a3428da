//! maildesk - Command-line front end for the mail dispatch coordinator

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};

use maildesk::app::{AppEvent, MailDesk};
use maildesk::domain::{CaseId, ItemKey, MailableItem, SourceId};
use maildesk::providers::api::{HttpMailApi, MailApi};
use maildesk::services::{PresenceService, PresenceSnapshot};
use maildesk::Settings;

/// Mail dispatch coordinator for case baskets and bridge handoffs.
#[derive(Parser)]
#[command(name = "maildesk", version, about)]
struct Cli {
    /// Settings file to use instead of the per-user default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a case's mail basket grouped by information source.
    Basket {
        case: i64,
    },
    /// Move an item to another information source.
    Move {
        case: i64,
        /// Item as activity:<id> or document:<id>.
        item: ItemKey,
        /// Target source id. Omit to unassign.
        #[arg(long)]
        to: Option<i64>,
    },
    /// Clear every item from a case's mail basket.
    Reset {
        case: i64,
    },
    /// List a case's handoffs and their status.
    Messages {
        case: i64,
    },
    /// Show bridge agent liveness and sending accounts.
    Presence {
        /// Keep polling and print every update.
        #[arg(long)]
        watch: bool,
        /// Ask the server to resync accounts with the mail host first.
        #[arg(long)]
        resync: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("failed to load settings")?;

    let api: Arc<dyn MailApi> = Arc::new(
        HttpMailApi::from_settings(&settings.api).context("failed to build API client")?,
    );
    tracing::debug!(base_url = %settings.api.base_url, "starting maildesk");

    match cli.command {
        Command::Basket { case } => handle_basket(api, settings, CaseId(case)).await,
        Command::Move { case, item, to } => {
            handle_move(api, settings, CaseId(case), item, to.map(SourceId)).await
        }
        Command::Reset { case } => handle_reset(api, settings, CaseId(case)).await,
        Command::Messages { case } => handle_messages(api, settings, CaseId(case)).await,
        Command::Presence { watch, resync } => {
            handle_presence(api, settings, watch, resync).await
        }
    }
}

/// Loads reference data and one basket, failing on any error notice.
async fn open_desk(
    api: Arc<dyn MailApi>,
    settings: Settings,
    case_id: CaseId,
) -> anyhow::Result<MailDesk> {
    let mut desk = MailDesk::new(api, settings);
    desk.events().subscribe(log_event);
    desk.load_reference_data();
    desk.request_basket(case_id, true);
    desk.settle().await;
    fail_on_errors(&desk)?;
    Ok(desk)
}

fn fail_on_errors(desk: &MailDesk) -> anyhow::Result<()> {
    use maildesk::app::NotificationLevel;

    match desk
        .state()
        .notifications
        .iter()
        .find(|notice| notice.level == NotificationLevel::Error)
    {
        Some(notice) => anyhow::bail!(
            "{}: {}",
            notice.title,
            notice.body.as_deref().unwrap_or_default()
        ),
        None => Ok(()),
    }
}

async fn handle_basket(
    api: Arc<dyn MailApi>,
    settings: Settings,
    case_id: CaseId,
) -> anyhow::Result<()> {
    let desk = open_desk(api, settings, case_id).await?;
    print_groups(&desk, case_id);
    Ok(())
}

async fn handle_move(
    api: Arc<dyn MailApi>,
    settings: Settings,
    case_id: CaseId,
    item: ItemKey,
    to: Option<SourceId>,
) -> anyhow::Result<()> {
    let mut desk = open_desk(api, settings, case_id).await?;
    desk.move_item(case_id, item, to)
        .with_context(|| format!("cannot move {}", item))?;
    desk.settle().await;
    fail_on_errors(&desk)?;
    print_groups(&desk, case_id);
    Ok(())
}

async fn handle_reset(
    api: Arc<dyn MailApi>,
    settings: Settings,
    case_id: CaseId,
) -> anyhow::Result<()> {
    let mut desk = open_desk(api, settings, case_id).await?;
    desk.reset_basket(case_id);
    desk.settle().await;
    fail_on_errors(&desk)?;
    println!("Mail basket of case {} cleared", case_id);
    Ok(())
}

async fn handle_messages(
    api: Arc<dyn MailApi>,
    settings: Settings,
    case_id: CaseId,
) -> anyhow::Result<()> {
    let mut desk = MailDesk::new(api, settings);
    desk.refresh_messages(case_id);
    desk.settle().await;
    fail_on_errors(&desk)?;

    let messages = desk.messages(case_id);
    if messages.is_empty() {
        println!("No handoffs for case {}", case_id);
    }
    for message in messages {
        println!(
            "#{:<6} {:<11} {:<32} {}",
            message.id.to_string(),
            message.status.to_string(),
            message.recipient_email,
            message.subject
        );
        if let Some(error) = &message.error_message {
            println!("        {}", error);
        }
    }
    Ok(())
}

async fn handle_presence(
    api: Arc<dyn MailApi>,
    settings: Settings,
    watch: bool,
    resync: bool,
) -> anyhow::Result<()> {
    let service = Arc::new(PresenceService::new(api, &settings.presence, &settings.polling));
    let snapshot = service
        .poll(resync)
        .await
        .context("failed to load bridge agents")?;
    print_presence(&snapshot, service.online_window());

    if !watch {
        return Ok(());
    }

    let mut updates = service.subscribe();
    Arc::clone(&service).start_watching();
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(snapshot) => print_presence(&snapshot, service.online_window()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "presence updates dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    service.stop_watching();
    Ok(())
}

fn log_event(event: &AppEvent) {
    tracing::debug!(?event, "desk event");
}

fn print_groups(desk: &MailDesk, case_id: CaseId) {
    let groups = desk.groups(case_id);
    if groups.is_empty() {
        println!("Mail basket of case {} is empty", case_id);
        return;
    }
    for group in groups {
        println!("== {} ({})", group.name, group.len());
        for item in group.activities.iter().chain(group.documents.iter()) {
            println!("   {:<16} {}", item.key().to_string(), describe(item));
        }
        println!("{}\n", group.export_text);
    }
}

fn describe(item: &MailableItem) -> String {
    match item.effective_title() {
        Some(title) => format!("{} ({})", item.label, title),
        None => item.label.clone(),
    }
}

fn print_presence(snapshot: &PresenceSnapshot, window: chrono::Duration) {
    let now = Utc::now();
    println!("Bridge agents as of {}:", snapshot.fetched_at.format("%H:%M:%S"));
    for presence in snapshot.presence(now, window) {
        println!(
            "  {:<24} {:<16} {:<8} last seen {}s ago",
            presence.agent.machine_name,
            presence.agent.os_user,
            if presence.online { "online" } else { "offline" },
            presence.silence.num_seconds()
        );
    }
    println!("Sending accounts:");
    for account in &snapshot.accounts {
        println!(
            "  {:<24} {:<32} {}",
            account.name,
            account.email,
            if account.active { "active" } else { "inactive" }
        );
    }
}
