//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use mapcrawl_core::config::{CrawlConfig, SessionKind, Strategy};

/// Crawl and download upazila and road maps.
///
/// Walks the division / district / upazila taxonomy of a map archive, either
/// through its cascading selection form or its static directory listing, and
/// saves every map under a deterministic local name. Rerunning skips files
/// already on disk.
#[derive(Parser, Debug)]
#[command(name = "mapcrawl")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/mapcrawl/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Discovery strategy
    #[arg(short, long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Start page (cascade) or root listing URL (tree)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Output root directory
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Sibling subtrees processed concurrently by the tree strategy (1-16)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub workers: Option<u8>,

    /// Delay after each upazila in milliseconds (max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub leaf_delay: Option<u64>,

    /// Delay after each district in milliseconds (max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub district_delay: Option<u64>,

    /// Minimum delay between requests to the same host in milliseconds (max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub request_delay: Option<u64>,

    /// Minimum path depth of files downloaded by the tree strategy
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub min_depth: Option<u8>,

    /// Navigation backend for the cascade strategy
    #[arg(long, value_enum)]
    pub session: Option<SessionKind>,
}

impl Args {
    /// Overrides file values with the flags that were given.
    pub fn apply_to(&self, config: &mut CrawlConfig) {
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(url) = &self.url {
            match config.strategy {
                Strategy::Cascade => config.cascade.page_url = Some(url.clone()),
                Strategy::Tree => config.tree.root_url = Some(url.clone()),
            }
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(workers) = self.workers {
            config.tree.workers = usize::from(workers);
        }
        if let Some(ms) = self.leaf_delay {
            config.pacing.leaf_delay_ms = ms;
        }
        if let Some(ms) = self.district_delay {
            config.pacing.district_delay_ms = ms;
        }
        if let Some(ms) = self.request_delay {
            config.pacing.request_delay_ms = ms;
        }
        if let Some(depth) = self.min_depth {
            config.tree.min_depth = usize::from(depth);
        }
        if let Some(session) = self.session {
            config.cascade.session = session;
        }
        if self.verbose > 0 {
            config.verbosity = self.verbose;
        }
    }
}
