use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use loci_retriever::{Engine, SearchRequest};

/// Local-first semantic file index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory holding the index, models, and configuration.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a directory into the active container.
    Index {
        dir: PathBuf,
    },
    /// Rescan all roots of a container and apply the changes.
    Refresh {
        #[arg(long)]
        container: Option<String>,
    },
    /// Search the index.
    Search {
        query: String,
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
        #[arg(long)]
        container: Option<String>,
        /// Filter by file extensions, repeatable.
        #[arg(long = "ext")]
        extensions: Vec<String>,
        #[arg(long)]
        path_prefix: Option<String>,
        #[arg(long)]
        min_score: Option<f32>,
        #[arg(long)]
        json: bool,
    },
    /// Show index statistics for a container.
    Status {
        #[arg(long)]
        container: Option<String>,
    },
    /// Files changed within a window like 30m, 2h, 1d, 7d.
    Diff {
        since: String,
        #[arg(long)]
        container: Option<String>,
    },
    /// Files semantically related to the given file.
    Related {
        path: PathBuf,
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
    },
    /// Attach a searchable note to a file.
    Annotate {
        path: PathBuf,
        note: String,
    },
    /// List annotations, optionally for one file.
    Annotations {
        path: Option<PathBuf>,
    },
    /// Manage containers.
    Containers {
        #[command(subcommand)]
        action: ContainerAction,
    },
    /// Drop everything indexed for a container.
    Reset {
        #[arg(long)]
        container: Option<String>,
    },
    /// Watch all indexed roots and keep the index fresh until interrupted.
    Watch,
}

#[derive(Subcommand, Debug)]
enum ContainerAction {
    List,
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Delete {
        name: String,
    },
    Use {
        name: String,
    },
}

fn default_data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.local/share")
    });
    PathBuf::from(base).join("loci")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loci=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    let engine = Arc::new(Engine::open(&data_dir).await?);

    match args.command {
        Commands::Index { dir } => {
            let dir = std::fs::canonicalize(&dir)?;
            let summary = engine.index_folder(&dir).await?;
            println!(
                "Indexed {} files ({} fragments, {} skipped)",
                summary.files_indexed, summary.fragments_written, summary.files_skipped
            );
        }
        Commands::Refresh { container } => {
            let summary = engine.reindex_delta(container.as_deref()).await?;
            println!(
                "Reindexed {} files, removed {}, skipped {}",
                summary.files_indexed, summary.files_deleted, summary.files_skipped
            );
        }
        Commands::Search {
            query,
            top_k,
            container,
            extensions,
            path_prefix,
            min_score,
            json,
        } => {
            let request = SearchRequest {
                query,
                container,
                top_k: Some(top_k),
                file_extensions: (!extensions.is_empty()).then_some(extensions),
                path_prefix,
                context_bytes: None,
                min_score,
            };
            let results = engine.search(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    println!("{}. [{:5.1}] {}", i + 1, result.score, result.path);
                    let excerpt: String = result.snippet.chars().take(160).collect();
                    println!("     {}", excerpt.replace('\n', " "));
                }
            }
        }
        Commands::Status { container } => {
            let status = engine.index_status(container.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Diff { since, container } => {
            let changed = engine.diff(&since, container.as_deref(), false).await?;
            if changed.is_empty() {
                println!("No files changed in the last {since}.");
            }
            for entry in changed {
                let marker = if entry.deleted { " (deleted)" } else { "" };
                println!("{}{}", entry.path, marker);
            }
        }
        Commands::Related { path, top_k } => {
            let path = std::fs::canonicalize(&path)?;
            let related = engine.related(&path, None, Some(top_k)).await?;
            for entry in related {
                println!("[{:5.1}] {}", entry.similarity, entry.path);
            }
        }
        Commands::Annotate { path, note } => {
            let record = engine.add_annotation(&path, &note, "user").await?;
            println!("Added annotation {} to {}", record.id, record.path);
        }
        Commands::Annotations { path } => {
            let records = engine.get_annotations(path.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Containers { action } => match action {
            ContainerAction::List => {
                for item in engine.list_containers().await {
                    let marker = if item.active { "*" } else { " " };
                    println!(
                        "{marker} {} [{}] ({} roots) {}",
                        item.name,
                        item.provider_label,
                        item.roots.len(),
                        item.description
                    );
                }
            }
            ContainerAction::Create { name, description } => {
                engine.create_container(&name, &description, None).await?;
                println!("Created container '{name}'");
            }
            ContainerAction::Delete { name } => {
                engine.delete_container(&name).await?;
                println!("Deleted container '{name}'");
            }
            ContainerAction::Use { name } => {
                engine.set_active_container(&name).await?;
                println!("Active container is now '{name}'");
            }
        },
        Commands::Reset { container } => {
            engine.reset_index(container.as_deref()).await?;
            println!("Index cleared.");
        }
        Commands::Watch => {
            let handle = engine.start_watching().await?;
            if handle.is_none() {
                println!("Nothing to watch: no container has indexed roots.");
                return Ok(());
            }
            println!("Watching indexed roots. Press Ctrl-C to stop.");
            let mut events = engine.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => {
                        if let Ok(event) = event {
                            eprintln!("{}", serde_json::to_string(&event)?);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
