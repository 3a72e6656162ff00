//! chatfs operator CLI.
//!
//! Every invocation runs the full startup sequence (directory, then sync)
//! before executing its command.
//!
//! ```bash
//! chatfs ls /docs
//! chatfs --cluster Drive_Layer_Private_ana put ./report.pdf --dest /docs
//! chatfs rm 42          # first call trashes, second deletes
//! RUST_LOG=debug chatfs reconcile
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chatfs_kernel::{ClusterId, DeleteOutcome, Drive, FileEntry, MessageId, UploadRequest, Visibility};
use chatfs_server::{open_drive, DriveConfig};

/// Path-addressed drive over an append-only blob store.
#[derive(Parser, Debug)]
#[command(name = "chatfs")]
#[command(about = "Path-addressed drive over an append-only blob store")]
struct Args {
    /// Config file (falls back to $CHATFS_CONFIG, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cluster to operate on (defaults to the shared cluster)
    #[arg(long, global = true)]
    cluster: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync every cluster from the store
    Sync,
    /// Finish interrupted operations and prune stale entries
    Reconcile,
    /// List files directly in a folder
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// List files and folders under a folder, recursively
    Tree {
        #[arg(default_value = "/")]
        path: String,
    },
    /// List every folder
    Folders,
    /// List trashed files
    TrashList {
        /// Include every cluster
        #[arg(long)]
        all: bool,
    },
    /// Create a folder
    Mkdir { path: String },
    /// Delete an empty folder
    Rmdir { path: String },
    /// Rename a folder in place
    RenameFolder { path: String, new_name: String },
    /// Rename a file
    Rename { id: String, new_name: String },
    /// Move a file to another folder
    Mv { id: String, path: String },
    /// Move a file to the trash
    Trash { id: String },
    /// Restore a trashed file
    Restore { id: String },
    /// Delete a file (trashes first; a trashed file is deleted for good)
    Rm { id: String },
    /// Upload a local file
    Put {
        file: PathBuf,
        /// Destination folder
        #[arg(long, default_value = "/")]
        dest: String,
        /// Name in the drive (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        /// visible | not_visible
        #[arg(long, value_parser = parse_visibility)]
        visibility: Option<Visibility>,
    },
    /// Download a file to a local path ("-" for stdout)
    Get { id: String, out: PathBuf },
    /// Print the cluster's mirror snapshot as JSON
    Dump,
}

fn parse_visibility(s: &str) -> Result<Visibility, String> {
    s.parse::<Visibility>()
        .map_err(|_| format!("expected visible or not_visible, got {s:?}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = DriveConfig::resolve(args.config.as_deref()).context("failed to load config")?;
    let drive = open_drive(&config).await?;
    let cluster_name = args
        .cluster
        .clone()
        .unwrap_or_else(|| config.clusters.shared.clone());
    let cluster = drive.cluster_id(&cluster_name)?;

    match args.command {
        Command::Sync => {
            let report = drive.sync_all().await;
            print!("{report}");
            if !report.is_complete() {
                anyhow::bail!("some clusters failed to sync");
            }
        }
        Command::Reconcile => {
            let mut failed = false;
            for outcome in drive.reconcile_all().await {
                match outcome.outcome {
                    Ok(report) => println!("{}: {report}", outcome.name),
                    Err(e) => {
                        failed = true;
                        println!("{}: FAILED: {e}", outcome.name);
                    }
                }
            }
            if failed {
                anyhow::bail!("some clusters failed to reconcile");
            }
        }
        Command::Ls { path } => {
            for file in drive.list_folder(cluster, &path)? {
                print_file(&file);
            }
        }
        Command::Tree { path } => cmd_tree(&drive, cluster, &path)?,
        Command::Folders => {
            for folder in drive.list_folders(cluster)? {
                println!("{}", folder.path);
            }
        }
        Command::TrashList { all } => {
            if all {
                for trashed in drive.list_trashed_all()? {
                    print!("[{}] ", trashed.cluster);
                    print_file(&trashed.file);
                }
            } else {
                for file in drive.list_trashed(cluster)? {
                    print_file(&file);
                }
            }
        }
        Command::Mkdir { path } => {
            let folder = drive.create_folder(cluster, &path)?;
            println!("created {}", folder.path);
        }
        Command::Rmdir { path } => {
            drive.delete_folder(cluster, &path)?;
            println!("removed {path}");
        }
        Command::RenameFolder { path, new_name } => {
            let rename = drive.rename_folder(cluster, &path, &new_name).await?;
            println!("{} -> {} ({} entries moved)", rename.old_path, rename.new_path, rename.rows_moved);
        }
        Command::Rename { id, new_name } => {
            print_file(&drive.rename_file(cluster, &MessageId::new(id), &new_name).await?);
        }
        Command::Mv { id, path } => {
            print_file(&drive.move_file(cluster, &MessageId::new(id), &path).await?);
        }
        Command::Trash { id } => print_file(&drive.trash(cluster, &MessageId::new(id))?),
        Command::Restore { id } => print_file(&drive.restore(cluster, &MessageId::new(id))?),
        Command::Rm { id } => match drive.permanent_delete(cluster, &MessageId::new(id.clone())).await? {
            DeleteOutcome::Trashed => println!("{id} moved to trash (run rm again to delete)"),
            DeleteOutcome::Deleted => println!("{id} deleted"),
        },
        Command::Put {
            file,
            dest,
            name,
            mime,
            visibility,
        } => {
            let entry = cmd_put(&drive, cluster, file, dest, name, mime, visibility).await?;
            print_file(&entry);
        }
        Command::Get { id, out } => cmd_get(&drive, cluster, &MessageId::new(id), &out).await?,
        Command::Dump => {
            let snapshot = drive.snapshot(cluster)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }
    Ok(())
}

fn print_file(file: &FileEntry) {
    let location = match file.location.origin() {
        Some(from) => format!("{} (from {from})", file.location.path()),
        None => file.location.path().to_string(),
    };
    println!(
        "{:>8}  {:>10}  {:<24}  {}  {}",
        file.id_message, file.size, file.mime_type, location, file.name
    );
}

fn cmd_tree(drive: &Drive, cluster: ClusterId, root: &str) -> Result<()> {
    let root = chatfs_types::path::normalize(root)?;
    let mut lines: Vec<(String, String)> = drive
        .list_folders(cluster)?
        .into_iter()
        .filter(|folder| chatfs_types::path::is_within(&folder.path, &root))
        .map(|folder| (folder.path.clone(), format!("{}/", folder.path)))
        .collect();
    for file in drive.list_subtree(cluster, &root)? {
        let path = chatfs_types::path::join(file.location.path(), &file.name);
        lines.push((path.clone(), format!("{path}  [{}]", file.id_message)));
    }
    lines.sort();
    for (_, line) in lines {
        println!("{line}");
    }
    Ok(())
}

async fn cmd_put(
    drive: &Drive,
    cluster: ClusterId,
    file: PathBuf,
    dest: String,
    name: Option<String>,
    mime: String,
    visibility: Option<Visibility>,
) -> Result<FileEntry> {
    let local = PathBuf::from(shellexpand::tilde(&file.to_string_lossy()).as_ref());
    let name = match name {
        Some(name) => name,
        None => local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("local path has no file name")?,
    };
    let handle = tokio::fs::File::open(&local)
        .await
        .with_context(|| format!("failed to open {}", local.display()))?;
    let size = handle.metadata().await?.len();
    let data = ReaderStream::new(handle)
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
        .boxed();

    let mut request = UploadRequest::new(name, dest, size).mime_type(mime);
    request.visibility = visibility;
    Ok(drive.upload(cluster, data, request).await?)
}

async fn cmd_get(drive: &Drive, cluster: ClusterId, id: &MessageId, out: &PathBuf) -> Result<()> {
    let mut data = drive.download(cluster, id).await?;
    let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if out.as_os_str() == "-" {
        Box::new(tokio::io::stdout())
    } else {
        Box::new(
            tokio::fs::File::create(out)
                .await
                .with_context(|| format!("failed to create {}", out.display()))?,
        )
    };
    let mut written = 0u64;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        sink.write_all(&chunk).await?;
    }
    sink.flush().await?;
    tracing::info!(id_message = %id, bytes = written, "downloaded");
    Ok(())
}
