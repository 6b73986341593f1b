//! gitstore CLI

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gitstore::config::Config;
use gitstore::host::{BlobId, EntryKind, RepositoryIdentity};
use gitstore::identity::{IdentityResolver, StaticDirectory};
use gitstore::store::{
    BatchFile, BatchOptions, ContentOptions, ContentStore, PutOptions, WriteOptions,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gitstore", version, about = "Git-backed content storage")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gitstore.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a folder.
    Ls {
        identity: String,
        #[arg(default_value = "")]
        path: String,
        /// Walk sub-folders and print files only.
        #[arg(short, long)]
        recursive: bool,
    },
    /// Print a file.
    Cat {
        identity: String,
        path: String,
        /// Print the base64 transfer encoding instead of text.
        #[arg(long)]
        raw: bool,
    },
    /// Print a file's content hash and size.
    Meta { identity: String, path: String },
    /// Write a file from a local path, or stdin when `-` is given.
    Put {
        identity: String,
        path: String,
        source: PathBuf,
        /// Fail unless the stored file still has this hash.
        #[arg(long)]
        expect: Option<String>,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Delete one file.
    Rm {
        identity: String,
        path: String,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Delete several files, one commit each.
    RmMany {
        identity: String,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Delete every file under a folder in one commit.
    Rmdir {
        identity: String,
        path: String,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Validate and upload a local file into a folder under a sanitized name.
    Upload {
        identity: String,
        folder: String,
        file: PathBuf,
    },
    /// Upload local files into a folder as a single commit.
    Batch {
        identity: String,
        folder: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// List images in a folder that the given content files never mention.
    Orphans {
        identity: String,
        folder: String,
        #[arg(required = true)]
        content: Vec<String>,
    },
}

impl Command {
    fn identity(&self) -> &str {
        match self {
            Command::Ls { identity, .. }
            | Command::Cat { identity, .. }
            | Command::Meta { identity, .. }
            | Command::Put { identity, .. }
            | Command::Rm { identity, .. }
            | Command::RmMany { identity, .. }
            | Command::Rmdir { identity, .. }
            | Command::Upload { identity, .. }
            | Command::Batch { identity, .. }
            | Command::Orphans { identity, .. } => identity,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    debug!(path = %cli.config.display(), repositories = config.repositories.len(), "config loaded");

    let host = config
        .host
        .connect(&config.store)
        .context("connecting to the content host")?;
    let store = ContentStore::new(host, config.store.clone())?;

    let resolver = IdentityResolver::from_directory(StaticDirectory::new(config.repositories));
    let identity = resolver.resolve(cli.command.identity()).await?;
    info!(%identity, provider = %identity.provider, "using repository");

    execute(&store, &identity, cli.command).await
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn execute(store: &ContentStore, identity: &RepositoryIdentity, command: Command) -> Result<()> {
    match command {
        Command::Ls { path, recursive, .. } => {
            let entries = if recursive {
                store.list_files_recursive(identity, &path).await?
            } else {
                store.list_folder(identity, &path, false).await?
            };
            for entry in &entries {
                let kind = match entry.kind {
                    EntryKind::File => "file",
                    EntryKind::Dir => "dir",
                };
                println!("{}\t{}\t{}", kind, entry.content_hash, entry.path);
            }
            println!("({} entries)", entries.len());
        }
        Command::Cat { path, raw, .. } => {
            let options = if raw { ContentOptions::raw() } else { ContentOptions::default() };
            let file = store
                .get_content(identity, &path, options)
                .await?
                .with_context(|| format!("{} does not exist", path))?;
            print!("{}", file.content);
        }
        Command::Meta { path, .. } => {
            let meta = store
                .get_meta(identity, &path, true)
                .await?
                .with_context(|| format!("{} does not exist", path))?;
            println!("{}\t{}", meta.content_hash, meta.size);
        }
        Command::Put {
            path,
            source,
            expect,
            message,
            ..
        } => {
            let content = read_source(&source)?;
            let expected_hash = expect
                .as_deref()
                .map(BlobId::from_hex)
                .transpose()
                .context("--expect is not a valid object id")?;
            let outcome = store
                .put(
                    identity,
                    &path,
                    &content,
                    PutOptions {
                        expected_hash,
                        message,
                    },
                )
                .await?;
            println!("{}\t{}", outcome.content_hash, outcome.commit);
        }
        Command::Rm { path, message, .. } => {
            let outcome = store.delete(identity, &path, WriteOptions { message }).await?;
            println!("deleted {} in {}", outcome.path, outcome.commit.short());
        }
        Command::RmMany { paths, .. } => {
            let outcome = store.delete_multiple(identity, &paths, WriteOptions::default()).await;
            for path in &outcome.deleted {
                println!("deleted {}", path);
            }
            for failure in &outcome.errors {
                eprintln!("failed {}: {}", failure.path, failure.error);
            }
            if !outcome.is_complete() {
                anyhow::bail!("{} of {} deletions failed", outcome.errors.len(), paths.len());
            }
        }
        Command::Rmdir { path, message, .. } => {
            let outcome = store.delete_folder(identity, &path, WriteOptions { message }).await?;
            println!(
                "deleted {} files under {} in {}",
                outcome.files_deleted,
                path,
                outcome.commit.short()
            );
        }
        Command::Upload { folder, file, .. } => {
            let content = read_source(&file)?;
            let filename = local_name(&file)?;
            let outcome = store
                .upload(identity, &content, &filename, &folder, WriteOptions::default())
                .await?;
            println!("{}\t{}\t{}", outcome.path, outcome.content_hash, outcome.url);
        }
        Command::Batch {
            folder,
            files,
            message,
            ..
        } => {
            let mut batch = Vec::with_capacity(files.len());
            for file in &files {
                let name = local_name(file)?;
                let path = gitstore::host::join_path(&folder, &name);
                batch.push(BatchFile::new(path, read_source(file)?));
            }
            let options = BatchOptions {
                message,
                on_progress: None,
            }
            .with_progress(|done, total| debug!(done, total, "blobs uploaded"));
            let outcome = store.upload_batch(identity, batch, options).await?;
            println!(
                "uploaded {} files in {}",
                outcome.files_uploaded,
                outcome.commit.short()
            );
        }
        Command::Orphans { folder, content, .. } => {
            let mut text = String::new();
            for path in &content {
                if let Some(file) = store.get_content(identity, path, ContentOptions::fresh()).await? {
                    text.push_str(&file.content);
                    text.push('\n');
                }
            }
            let orphans = store.find_orphaned_images(identity, &folder, &text).await?;
            for orphan in &orphans {
                println!("{}\t{}", orphan.path, orphan.url);
            }
            println!("({} orphaned)", orphans.len());
        }
    }
    Ok(())
}

fn read_source(source: &Path) -> Result<Vec<u8>> {
    if source == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read(source).with_context(|| format!("reading {}", source.display()))
}

fn local_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}
