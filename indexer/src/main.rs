use anyhow::{Context, Result};
use backlog_index::persist::{load_meta, verify_index};
use backlog_index::{CoordinatorConfig, EmptyStagingPolicy, GameId, GameRecord, IndexCoordinator};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct InputGame {
    id: GameId,
    title: String,
    #[serde(default)]
    genres: Genres,
}

/// Genres either as a JSON array or as the catalog's comma-joined string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Genres {
    List(Vec<String>),
    Joined(String),
}

impl Default for Genres {
    fn default() -> Self { Genres::List(Vec::new()) }
}

impl From<InputGame> for GameRecord {
    fn from(g: InputGame) -> Self {
        match g.genres {
            Genres::List(tags) => GameRecord::new(g.id, g.title, tags),
            Genres::Joined(s) => GameRecord::from_genre_list(g.id, g.title, &s),
        }
    }
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Maintain the game genre index and its similarity weights", long_about = None)]
struct Cli {
    /// Data directory holding the index, weight file and catalog
    #[arg(long, global = true, default_value = "./data")]
    data_dir: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage games from JSON/JSONL files or a directory of them
    Stage {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
    },
    /// Fold staged games into the index and recompute weights
    Update {
        /// Recompute weights even when nothing is staged
        #[arg(long, default_value_t = false)]
        recompute_weights_on_empty: bool,
    },
    /// Check the index sort invariants
    Verify,
    /// Print the catalog genres of a game
    Genres {
        #[arg(long, allow_hyphen_values = true)]
        id: GameId,
    },
    /// Print the metadata of the last cycle
    Status,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Stage { input } => {
            let coord = IndexCoordinator::open(CoordinatorConfig::new(&cli.data_dir))?;
            let games = read_input(Path::new(&input))?;
            let report = coord.stage_batch(games)?;
            tracing::info!(staged = report.staged, skipped = report.skipped.len(), "staging complete");
        }
        Commands::Update { recompute_weights_on_empty } => {
            let mut config = CoordinatorConfig::new(&cli.data_dir);
            if recompute_weights_on_empty {
                config.empty_staging = EmptyStagingPolicy::RecomputeWeights;
            }
            let coord = IndexCoordinator::open(config)?;
            let report = coord.run_cycle()?;
            println!("{report:#?}");
        }
        Commands::Verify => {
            let coord = IndexCoordinator::open(CoordinatorConfig::new(&cli.data_dir))?;
            let summary = verify_index(&coord.paths().index())
                .with_context(|| format!("index under {} failed verification", cli.data_dir))?;
            println!("ok: tags={} postings={} games={}", summary.tags, summary.postings, summary.distinct_games);
        }
        Commands::Genres { id } => {
            let coord = IndexCoordinator::open(CoordinatorConfig::new(&cli.data_dir))?;
            println!("{}", coord.genres_of(id)?);
        }
        Commands::Status => {
            let coord = IndexCoordinator::open(CoordinatorConfig::new(&cli.data_dir))?;
            match load_meta(coord.paths())? {
                Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
                None => println!("no update cycle has completed yet"),
            }
        }
    }
    Ok(())
}

fn read_input(input_path: &Path) -> Result<Vec<GameRecord>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    } else {
        anyhow::bail!("input {} does not exist", input_path.display());
    }

    let mut games = Vec::new();
    for file in files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file, &mut games)?;
        } else {
            read_json(&file, &mut games)?;
        }
    }
    tracing::info!(games = games.len(), "read input games");
    Ok(games)
}

/// One game per line. Lines that do not parse are logged and skipped.
fn read_jsonl(file: &Path, games: &mut Vec<GameRecord>) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        match serde_json::from_str::<InputGame>(&line) {
            Ok(game) => games.push(game.into()),
            Err(e) => tracing::warn!(file = %file.display(), line = i + 1, error = %e, "skipping unreadable game"),
        }
    }
    Ok(())
}

fn read_json(file: &Path, games: &mut Vec<GameRecord>) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    let json: serde_json::Value = serde_json::from_reader(reader)
        .with_context(|| format!("parsing {}", file.display()))?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                match serde_json::from_value::<InputGame>(v) {
                    Ok(game) => games.push(game.into()),
                    Err(e) => tracing::warn!(file = %file.display(), error = %e, "skipping unreadable game"),
                }
            }
        }
        serde_json::Value::Object(_) => {
            let game: InputGame = serde_json::from_value(json)?;
            games.push(game.into());
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_json_and_jsonl_with_both_genre_shapes() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.jsonl"),
            "{\"id\": 1, \"title\": \"Hades\", \"genres\": [\"Action\", \"Roguelike\"]}\n\nnot json\n{\"id\": 2, \"title\": \"Celeste\", \"genres\": \"Platformer,Indie\"}\n",
        )
        .unwrap();
        fs::write(dir.path().join("b.json"), "[{\"id\": 3, \"title\": \"Untagged\"}]").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let games = read_input(dir.path()).unwrap();
        let ids: Vec<GameId> = games.iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(games[0].genre_list(), "action,roguelike");
        assert_eq!(games[1].genre_list(), "indie,platformer");
        assert!(games[2].genres.is_empty());
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(read_input(&dir.path().join("nope.jsonl")).is_err());
    }
}
