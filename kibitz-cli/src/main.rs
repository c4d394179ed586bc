use std::path::PathBuf;
use std::time::Duration;

use color_eyre::eyre::{Context, OptionExt};
use color_eyre::Result;
use kibitz::{AnalysisOptions, Board, Engine, Limit};
use structopt::StructOpt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use self::config::{Config, Protocol};

mod config;

#[derive(Debug, StructOpt)]
#[structopt(name = "kibitz-cli", about = "Chess engine analysis runner")]
struct Opt {
    /// Config file
    #[structopt(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// FEN of the position to analyse; the starting position by default
    #[structopt(short, long)]
    fen: Option<String>,

    /// Moves played from the position, in UCI notation
    #[structopt(short, long)]
    moves: Vec<String>,

    /// Stop the analysis at this depth
    #[structopt(short, long)]
    depth: Option<u32>,

    /// Stop the analysis after this many seconds
    #[structopt(short, long)]
    time: Option<u64>,

    /// Analyse this many root moves simultaneously
    #[structopt(long)]
    multipv: Option<u32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();
    debug!(?opt, "kibitz CLI started");

    let config = std::fs::read_to_string(&opt.config)
        .wrap_err_with(|| format!("while reading config from {:?}", opt.config))?;
    let config: Config = toml::from_str(&config).wrap_err("while parsing config")?;
    let engine = config.engine.ok_or_eyre("no [engine] section in config")?;

    let mut board = match &opt.fen {
        Some(fen) => Board::from_fen(fen, false)?,
        None => Board::new(),
    };
    for mov in &opt.moves {
        board.push_uci(mov)?;
    }

    let handle = match engine.protocol {
        Protocol::Uci => Engine::uci(engine.spawn.clone()).await?,
        Protocol::Xboard => Engine::xboard(engine.spawn.clone()).await?,
    };
    info!(name = ?handle.id().get("name"), "engine running");

    if !engine.options.is_empty() {
        handle.configure(engine.options.clone()).await?;
    }

    let limit = Limit {
        depth: opt.depth,
        time: opt.time.map(Duration::from_secs),
        ..Limit::default()
    };
    // An unbounded analysis would run until interrupted; cap it instead
    let limit = if limit == Limit::default() {
        Limit::time(Duration::from_secs(10))
    } else {
        limit
    };

    let mut analysis = handle
        .analysis_with(
            &board,
            Some(limit),
            AnalysisOptions {
                multipv: opt.multipv,
                ..AnalysisOptions::default()
            },
        )
        .await?;

    while let Some(record) = analysis.next().await? {
        let (Some(depth), Some(score)) = (record.depth, record.score) else {
            continue;
        };
        let line = record
            .pv
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|mov| board.uci(mov).to_string())
            .collect::<Vec<_>>()
            .join(" ");
        match record.multipv {
            Some(rank) if opt.multipv.is_some() => {
                println!("{rank}. depth {depth} score {score} pv {line}")
            }
            _ => println!("depth {depth} score {score} pv {line}"),
        }
    }

    for (rank, record) in analysis.multipv().into_iter().enumerate() {
        let score = record
            .score
            .map(|score| score.to_string())
            .unwrap_or_else(|| "?".to_owned());
        let best = record
            .pv
            .as_deref()
            .and_then(|pv| pv.first())
            .map(|mov| board.uci(mov).to_string())
            .unwrap_or_else(|| "-".to_owned());
        println!("#{}: {} ({})", rank + 1, best, score);
    }

    handle.quit().await?;
    Ok(())
}
