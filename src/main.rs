//! CLI entry point for the map crawler.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use mapcrawl_core::config::{ConfigError, CrawlConfig, SessionKind, Strategy};
use mapcrawl_core::session::{NavigationSession, PostbackSession, default_link_pattern};
use mapcrawl_core::{
    CancelToken, CascadeSettings, CascadeTraverser, Classifier, CrawlContext, HttpClient,
    NamingScheme, Traverser, TreeSettings, TreeTraverser,
};
use regex::Regex;
use tracing::{debug, error, info, warn};
use url::Url;

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // The config file may raise the default verbosity, so read it before
    // installing the subscriber and report any error once logging is up.
    let loaded = CrawlConfig::load(args.config.as_deref());
    let file_verbosity = loaded.as_ref().map_or(0, |config| config.verbosity);
    init_tracing(args.quiet, args.verbose.max(file_verbosity));
    debug!(?args, "CLI arguments parsed");

    match run(&args, loaded).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Priority: `RUST_LOG` > quiet flag > verbosity > default (info).
fn init_tracing(quiet: bool, verbosity: u8) {
    let default_level = if quiet {
        "error"
    } else {
        match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: &Args, loaded: Result<CrawlConfig, ConfigError>) -> Result<()> {
    let mut config = loaded?;
    args.apply_to(&mut config);
    config.validate()?;
    debug!(?config, "configuration resolved");
    info!(
        strategy = ?config.strategy,
        output = %config.output_dir.display(),
        "mapcrawl starting"
    );

    let client = HttpClient::try_new(config.timeouts()).context("cannot build HTTP client")?;

    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current step");
            interrupt.cancel();
        }
    });

    let ctx = CrawlContext::new(
        Classifier::new(&config.classify.secondary_marker),
        NamingScheme::new(
            &config.output_dir,
            &config.classify.primary_dir,
            &config.classify.secondary_dir,
        ),
        config.pacing(),
        cancel,
    );

    let traverser = build_traverser(&config, client).await?;
    let summary = traverser.run(&ctx).await?;

    if summary.interrupted {
        info!("Interrupted. Run again to resume.");
    }
    info!(
        written = summary.written,
        skipped = summary.skipped,
        failed = summary.failed,
        soft_misses = summary.soft_misses,
        branches_skipped = summary.branches_skipped,
        "crawl finished: {summary}"
    );
    Ok(())
}

async fn build_traverser(config: &CrawlConfig, client: HttpClient) -> Result<Box<dyn Traverser>> {
    match config.strategy {
        Strategy::Cascade => {
            let cascade = &config.cascade;
            let page_url = cascade
                .page_url
                .clone()
                .context("cascade.page_url is required")?;
            let link_pattern = match &cascade.link_pattern {
                Some(pattern) => Regex::new(pattern).context("invalid cascade.link_pattern")?,
                None => default_link_pattern(&cascade.resource_root)
                    .context("invalid cascade.resource_root")?,
            };
            let session = open_session(config, client).await?;
            Ok(Box::new(CascadeTraverser::new(
                session,
                CascadeSettings {
                    page_url,
                    district_field: cascade.district_field.clone(),
                    upazila_field: cascade.upazila_field.clone(),
                    link_pattern,
                    link_element_ids: cascade.link_element_ids.clone(),
                    resource_root: cascade.resource_root.trim_matches('/').to_string(),
                },
            )))
        }
        Strategy::Tree => {
            let root = config
                .tree
                .root_url
                .as_deref()
                .context("tree.root_url is required")?;
            let root_url = Url::parse(root).with_context(|| format!("invalid tree.root_url {root}"))?;
            Ok(Box::new(TreeTraverser::new(
                client,
                TreeSettings::new(
                    root_url,
                    config.tree.min_depth,
                    &config.tree.extensions,
                    config.tree.workers,
                ),
            )))
        }
    }
}

#[cfg_attr(not(feature = "browser"), allow(clippy::unused_async))]
async fn open_session(
    config: &CrawlConfig,
    client: HttpClient,
) -> Result<Box<dyn NavigationSession>> {
    match config.cascade.session {
        SessionKind::Postback => Ok(Box::new(PostbackSession::new(client))),
        #[cfg(feature = "browser")]
        SessionKind::Browser => {
            let session = mapcrawl_core::session::BrowserSession::launch(client, config.settle())
                .await
                .context("cannot launch browser session")?;
            Ok(Box::new(session))
        }
        #[cfg(not(feature = "browser"))]
        SessionKind::Browser => {
            anyhow::bail!("session = \"browser\" needs a build with `--features browser`")
        }
    }
}
