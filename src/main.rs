use clap::{Parser, Subcommand};
use recruit_ledger::browser::{ChromeRenderer, HttpRenderer, PageRenderer};
use recruit_ledger::config::{
    optional_env, require_env, Config, RendererKind, SiteConfig, SUMMARY_KEY_ENV, WEBHOOK_ENV,
};
use recruit_ledger::ledger::Ledger;
use recruit_ledger::notifier::Notifier;
use recruit_ledger::summarize::Summarizer;
use recruit_ledger::{page, run_site, today, TrackerError};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tracks job postings of target companies across recruiting sites")]
struct Opts {
    /// JSON config; the built-in site list is used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan sites and update their ledgers
    Scrape {
        /// Site names to scan, all configured sites when empty
        sites: Vec<String>,
    },
    /// Announce postings first seen today
    Notify,
    /// Render a ledger into a static HTML page
    Render {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

async fn renderer_for(
    site: &SiteConfig,
    config: &Config,
) -> Result<Box<dyn PageRenderer>, TrackerError> {
    let timeout = Duration::from_secs(config.browser.wait_timeout_secs);
    let user_agent = config.browser.user_agent.clone();
    let renderer: Box<dyn PageRenderer> = match site.renderer {
        RendererKind::Browser => Box::new(
            tokio::task::spawn_blocking(move || ChromeRenderer::launch(&user_agent, timeout))
                .await??,
        ),
        RendererKind::Http => Box::new(HttpRenderer::new(&user_agent, timeout)?),
    };
    Ok(renderer)
}

async fn scrape(config: &Config, names: &[String]) -> Result<(), TrackerError> {
    let sites: Vec<&SiteConfig> = if names.is_empty() {
        config.sites.iter().collect()
    } else {
        names
            .iter()
            .map(|n| config.site(n))
            .collect::<Result<_, _>>()?
    };
    let today = today();

    for site in sites {
        let mut ledger =
            Ledger::load(&site.csv_path, site.columns.clone(), &site.canonicalization)?;
        info!("[{}] Ledger has {} rows", site.name, ledger.len());

        let renderer = match renderer_for(site, config).await {
            Ok(r) => r,
            Err(e) => {
                error!("[{}] Cannot start renderer: {:?}", site.name, e);
                continue;
            }
        };
        let report = run_site(site, renderer.as_ref(), &mut ledger, &today).await?;
        drop(renderer);

        ledger.save(&site.csv_path)?;
        info!(
            "[{}] Saved {} rows ({} new, {} completed)",
            site.name,
            ledger.len(),
            report.inserted,
            report.expired
        );
    }
    Ok(())
}

async fn notify(config: &Config) -> Result<(), TrackerError> {
    let webhook = require_env(WEBHOOK_ENV)?;
    let summarizer = match optional_env(SUMMARY_KEY_ENV) {
        Some(key) => Some(Summarizer::new(key, config.notify.summarizer.clone())?),
        None => None,
    };

    let notifier = Notifier::new(webhook, config.notify.clone(), summarizer)?;
    let sent = notifier.run(&today()).await?;
    info!("Announced {} postings", sent);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
                "info,html5ever=error,selectors=error,hyper=warn,reqwest=info".into()
            }),
        )
        .with(ErrorLayer::default())
        .init();

    let opts = Opts::parse();
    let config = Config::load(opts.config.as_deref())?;

    match opts.command {
        Command::Scrape { sites } => scrape(&config, &sites).await?,
        Command::Notify => notify(&config).await?,
        Command::Render { csv, out } => {
            let csv = csv.unwrap_or_else(|| config.page.csv_path.clone());
            let out = out.unwrap_or_else(|| config.page.output_path.clone());
            page::generate(&csv, &out, &config.page)?;
        }
    }

    Ok(())
}
