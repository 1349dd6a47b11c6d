//! `kic init` and `kic import`: local SQLite corpus setup.
//!
//! Production chunks are written by the platform's ingestion jobs. For
//! local use and demos, `import` loads a JSON Lines file with one chunk per
//! line:
//!
//! ```json
//! {"id": "cms-faq-3", "text": "...", "metadata": {"url": "https://...", "title": "FAQ",
//!  "source_type": "cms"}, "embedding": [0.1, ...]}
//! ```
//!
//! `embedding` is optional; without it the chunk is embedded with the
//! configured provider, or stored without a vector when embedding is
//! disabled.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;
use tracing::warn;

use campus_assistant_core::models::Chunk;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

#[derive(Debug, Deserialize)]
struct ImportRecord {
    #[serde(flatten)]
    chunk: Chunk,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

async fn open_sqlite(config: &Config) -> Result<SqliteStore> {
    if config.store.backend != "sqlite" {
        bail!(
            "store backend '{}' is managed externally; init and import need backend = \"sqlite\"",
            config.store.backend
        );
    }
    let path = config
        .store
        .path
        .as_deref()
        .context("store.path required for sqlite backend")?;
    let pool = db::connect(path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(SqliteStore::new(pool))
}

pub async fn run_init(config: &Config) -> Result<()> {
    let store = open_sqlite(config).await?;
    store.pool().close().await;
    println!("Database initialized successfully.");
    Ok(())
}

pub async fn run_import(config: &Config, file: &Path) -> Result<()> {
    let store = open_sqlite(config).await?;
    let embedder = if config.embedding.is_enabled() {
        Some(create_embedder(&config.embedding)?)
    } else {
        None
    };

    let reader = std::io::BufReader::new(
        std::fs::File::open(file)
            .with_context(|| format!("Failed to open import file: {}", file.display()))?,
    );

    let mut imported = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ImportRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid chunk record", file.display(), lineno + 1))?;

        if !record.chunk.has_url() {
            warn!(chunk = %record.chunk.id, "chunk has no url and will never be retrieved");
        }

        let embedding = match (record.embedding, &embedder) {
            (Some(v), _) => Some(v),
            (None, Some(embedder)) => Some(
                embedder
                    .embed_query(&record.chunk.text)
                    .await
                    .with_context(|| format!("Failed to embed chunk {}", record.chunk.id))?,
            ),
            (None, None) => None,
        };

        store.upsert_chunk(&record.chunk, embedding.as_deref()).await?;
        imported += 1;
    }

    let total = store.count().await?;
    store.pool().close().await;
    println!("Imported {} chunks ({} in store).", imported, total);
    Ok(())
}
