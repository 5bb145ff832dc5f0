use anyhow::{Context, Result};
use clap::Parser;
use manager::torrent_manager;
use rlimit::{getrlimit, setrlimit, Resource};
use size::{Size, Style};
use std::cmp::min;
use std::process::exit;
use std::time::Duration;
use std::{fmt, fs};

use config::{DownloadConfig, DEFAULT_LISTENING_PORT};
use metadata::metainfo::Metainfo;
use torrent_manager::TorrentManager;

mod bencoding;
mod config;
mod manager;
mod metadata;
mod torrent_protocol;
mod tracker;
mod util;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[derive(Parser, Debug)]
#[command(version = env!("BITFETCH_VERSION"), about, long_about = None)]
struct Args {
    /// Path to the .torrent file (single file torrents only)
    #[arg(env)]
    torrent_file: String,

    /// Path where the downloaded file is written
    #[arg(env)]
    output: String,

    /// Optional port announced to the tracker
    #[arg(short, long, env, default_value_t = DEFAULT_LISTENING_PORT)]
    port: u16,

    /// Optional log level
    #[arg(short, long, env, default_value_t = LogLevels::Info)]
    log_level: LogLevels,

    /// Optional timeout in seconds for connecting to a peer
    #[arg(long, env, default_value_t = 15)]
    dial_timeout: u64,

    /// Optional timeout in seconds for downloading a whole piece from a peer
    #[arg(long, env, default_value_t = 15)]
    piece_timeout: u64,
}

#[derive(clap::ValueEnum, Debug, Clone)]
enum LogLevels {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevels {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

// one socket per peer
const MAX_OPENED_FILES: u64 = 4096;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // init logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or("LOG_LEVEL", args.log_level.to_string()),
    );

    // bump ulimit if needed
    if let Err(e) = bump_nofile_limit() {
        log::warn!("could not increase NOFILE ulimit: {e}");
    }

    if let Err(e) = run(args).await {
        log::error!("{e:#}");
        exit(1);
    }
}

fn bump_nofile_limit() -> Result<()> {
    let (soft_limit, hard_limit) = getrlimit(Resource::NOFILE)?;
    if soft_limit < MAX_OPENED_FILES {
        setrlimit(
            Resource::NOFILE,
            min(hard_limit, MAX_OPENED_FILES),
            hard_limit,
        )?;
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let contents = fs::read(&args.torrent_file)
        .with_context(|| format!("could not read .torrent file {}", args.torrent_file))?;
    let metainfo = Metainfo::new(&contents).context("The .torrent file is invalid")?;
    log::info!("torrent file metainfo:\n{metainfo}");

    let config = DownloadConfig {
        dial_timeout: Duration::from_secs(args.dial_timeout),
        piece_timeout: Duration::from_secs(args.piece_timeout),
        listening_port: args.port,
        ..Default::default()
    };
    let own_peer_id = util::generate_peer_id();
    log::debug!("own peer id: {}", util::force_string(&own_peer_id));

    let peers = tracker::request_peers(
        &metainfo.announce,
        metainfo.info_hash,
        own_peer_id,
        config.listening_port,
        metainfo.length,
    )
    .await
    .with_context(|| format!("could not get peers from tracker {}", metainfo.announce))?;
    log::info!("tracker returned {} peers", peers.len());

    let name = metainfo.name.clone();
    let data = TorrentManager::new(metainfo, peers, own_peer_id, config)
        .download()
        .await?;

    fs::write(&args.output, &data)
        .with_context(|| format!("could not write downloaded file to {}", args.output))?;
    log::info!(
        "downloaded {} ({}) to {}",
        name,
        Size::from_bytes(data.len())
            .format()
            .with_style(Style::Abbreviated),
        args.output
    );
    Ok(())
}
