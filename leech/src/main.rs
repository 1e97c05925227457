use std::{path::PathBuf, process::ExitCode};
use clap::Parser;
use leech::{Config, MetaInfo, Torrent};

/// BitTorrent v1 leeching client: downloads the torrent described by a
/// metainfo file and exits when it is complete.
#[derive(Parser, Debug)]
#[command(name = "leech", version)]
struct Args {

    /// Path to the .torrent metainfo file.
    torrent: PathBuf,

    /// Directory downloads are written into.
    #[arg(long, env = "LEECH_DOWNLOAD_DIR", default_value = "downloads")]
    output_dir: PathBuf,

    /// Port reported to trackers.
    #[arg(long, default_value_t = 6881)]
    port: u16,

}

#[tokio::main]
async fn main() -> ExitCode {

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install tracing subscriber");
        return ExitCode::FAILURE;
    }

    let args = Args::parse();

    let metainfo = match MetaInfo::load(&args.torrent) {
        Ok(metainfo) => metainfo,
        Err(e) => {
            tracing::error!("failed to load {}: {}", args.torrent.display(), e);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        "loaded {} ({} bytes, {} pieces)",
        metainfo.name(),
        metainfo.total_len(),
        metainfo.num_pieces(),
    );

    let config = Config {
        output_dir: args.output_dir,
        port: args.port,
        ..Config::default()
    };

    let mut torrent = match Torrent::new(metainfo, config) {
        Ok(torrent) => torrent,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match torrent.start().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
