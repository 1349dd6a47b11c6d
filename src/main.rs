//! # Campus Assistant CLI (`kic`)
//!
//! ## Usage
//!
//! ```bash
//! kic --config ./config/kic.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kic init` | Create the SQLite schema |
//! | `kic import <file.jsonl>` | Load chunks into the SQLite store |
//! | `kic ask "<question>"` | Answer one question |
//! | `kic chat` | Interactive session on stdin |
//! | `kic serve` | Start the HTTP chat server |
//!
//! ## Examples
//!
//! ```bash
//! # General platform question
//! kic ask "Wie bekomme ich ein Zertifikat?"
//!
//! # Question about one course module, streamed
//! kic ask "How long does the course take?" --course 79 --module 3 --stream
//!
//! # JSON logs with debug output for the pipeline
//! RUST_LOG=campus_assistant=debug kic --log-json serve
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use campus_assistant::{ask, config, import, logging, server};
use campus_assistant_core::models::Scope;

/// Campus Assistant: retrieval-augmented answers about the learning
/// platform and its courses.
#[derive(Parser)]
#[command(name = "kic", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kic.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite database and schema. Idempotent.
    Init,

    /// Load chunks from a JSON Lines file into the SQLite store.
    Import {
        file: PathBuf,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Restrict retrieval to this course.
        #[arg(long)]
        course: Option<i64>,

        /// Restrict retrieval to this module (requires --course).
        #[arg(long)]
        module: Option<i64>,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Interactive chat session; an empty line ends it.
    Chat {
        #[arg(long)]
        course: Option<i64>,

        #[arg(long)]
        module: Option<i64>,

        #[arg(long)]
        stream: bool,
    },

    /// Start the HTTP chat server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            import::run_init(&cfg).await?;
        }
        Commands::Import { file } => {
            import::run_import(&cfg, &file).await?;
        }
        Commands::Ask {
            question,
            course,
            module,
            stream,
        } => {
            let scope = Scope {
                course_id: course,
                module_id: module,
            };
            ask::run_ask(&cfg, &question, scope, stream).await?;
        }
        Commands::Chat {
            course,
            module,
            stream,
        } => {
            let scope = Scope {
                course_id: course,
                module_id: module,
            };
            ask::run_chat(&cfg, scope, stream).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
