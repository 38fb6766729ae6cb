//! Command-line shell over `treenote_core`.
//!
//! # Responsibility
//! - Open a note database with its JSON fallback and run one maintenance or
//!   transfer command against it.
//! - Keep output line-oriented `key=value` so scripts can parse it.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use treenote_core::db::open_db;
use treenote_core::{
    check_integrity, init_from_config, CoreConfig, ExportBundle, ExportDocument, ExportScope,
    FallbackStorage, ImportOptions, JsonFileStorage, SqliteNodeStorage, TreeService,
};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report referential problems in the stored tree.
    Check { db: PathBuf },
    /// Write the forest, or one branch, to a document.
    Export {
        db: PathBuf,
        #[arg(long)]
        branch: Option<Uuid>,
        #[arg(long)]
        out: PathBuf,
        /// Write a directory with `document.json` and attachment blobs.
        #[arg(long)]
        with_attachments: bool,
    },
    /// Import a document file or bundle directory under a parent or as roots.
    Import {
        db: PathBuf,
        file: PathBuf,
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// Remove unreachable nodes, orphan blobs and broken symlinks.
    Cleanup { db: PathBuf },
    /// Print core version and a health probe.
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    if let Err(err) = init_from_config(&config) {
        eprintln!("warning: logging disabled: {err}");
    }

    match args.command {
        Command::Check { db } => check(&db, &config),
        Command::Export {
            db,
            branch,
            out,
            with_attachments,
        } => export(&db, &config, branch, &out, with_attachments),
        Command::Import { db, file, parent } => import(&db, &config, &file, parent),
        Command::Cleanup { db } => cleanup(&db, &config),
        Command::Version => {
            println!("treenote_core ping={}", treenote_core::ping());
            println!("treenote_core version={}", treenote_core::core_version());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    match path {
        Some(path) => CoreConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let mut config = CoreConfig::default();
            config.apply_env_overrides();
            config.validate().context("invalid default configuration")?;
            Ok(config)
        }
    }
}

/// Runs `action` against a service over `<db>` with its JSON fallback.
fn with_service<T>(
    db: &Path,
    config: &CoreConfig,
    action: impl FnOnce(
        &mut TreeService<FallbackStorage<SqliteNodeStorage<'_>, JsonFileStorage>>,
    ) -> Result<T>,
) -> Result<T> {
    let conn = open_db(db).with_context(|| format!("failed to open {}", db.display()))?;
    let primary = SqliteNodeStorage::try_new(&conn).context("database is not usable")?;
    let fallback = JsonFileStorage::new(fallback_path(db, config));
    let mut service = TreeService::open(FallbackStorage::new(primary, fallback))
        .context("failed to load tree")?;
    let result = action(&mut service)?;
    if service.has_unsaved_changes() {
        service.flush().context("changes could not be saved")?;
    }
    if service.storage().used_fallback() {
        warn!(
            "event=cli_persist module=cli status=fallback path={}",
            service.storage().fallback().document_path().display()
        );
    }
    Ok(result)
}

/// A configured fallback wins; otherwise the document sits next to `db`.
fn fallback_path(db: &Path, config: &CoreConfig) -> PathBuf {
    if config.fallback_path != CoreConfig::default().fallback_path {
        return config.fallback_path.clone();
    }
    db.with_extension("fallback.json")
}

fn import_options(config: &CoreConfig) -> ImportOptions {
    ImportOptions {
        max_nodes: config.max_import_nodes,
        sweep_orphans: config.sweep_orphans_on_import,
    }
}

fn check(db: &Path, config: &CoreConfig) -> Result<()> {
    let report = with_service(db, config, |service| Ok(check_integrity(service.store())))?;
    println!("broken_symlinks={}", report.broken_symlinks.len());
    println!("missing_children={}", report.missing_children.len());
    println!("dangling_parents={}", report.dangling_parents.len());
    println!("unlisted_children={}", report.unlisted_children.len());
    println!("symlinks_with_children={}", report.symlinks_with_children.len());
    println!("structural_cycles={}", report.structural_cycles.len());
    println!("invalid_roots={}", report.invalid_roots.len());
    if !report.is_clean() {
        bail!("{} integrity issue(s) found", report.issue_count());
    }
    Ok(())
}

fn export(
    db: &Path,
    config: &CoreConfig,
    branch: Option<Uuid>,
    out: &Path,
    with_attachments: bool,
) -> Result<()> {
    let scope = branch.map_or(ExportScope::Forest, ExportScope::Branch);
    let bundle = with_service(db, config, |service| {
        if with_attachments {
            Ok(service.export_bundle(scope)?)
        } else {
            Ok(ExportBundle {
                document: service.export(scope)?,
                attachments: Vec::new(),
            })
        }
    })?;

    if with_attachments {
        for (name, bytes) in bundle.archive_entries()? {
            let path = out.join(&name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        }
    } else {
        fs::write(out, bundle.document.to_json()?)
            .with_context(|| format!("failed to write {}", out.display()))?;
    }

    info!(
        "event=cli_export module=cli status=ok nodes={} attachments={}",
        bundle.document.node_count,
        bundle.attachments.len()
    );
    println!("nodes={}", bundle.document.node_count);
    println!("attachments={}", bundle.attachments.len());
    Ok(())
}

fn import(db: &Path, config: &CoreConfig, file: &Path, parent: Option<Uuid>) -> Result<()> {
    let bundle = read_bundle(file)?;
    let options = import_options(config);
    let report = with_service(db, config, |service| {
        Ok(service.import_bundle(&bundle, parent, &options)?)
    })?;
    for root_id in &report.root_ids {
        println!("root={root_id}");
    }
    println!("nodes={}", report.node_count);
    println!("attachments_restored={}", report.attachments_restored);
    println!("attachments_dropped={}", report.attachments_dropped);
    println!("external_links={}", report.external_links);
    Ok(())
}

/// Reads either a bare document file or a bundle directory.
fn read_bundle(path: &Path) -> Result<ExportBundle> {
    if !path.is_dir() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return Ok(ExportBundle {
            document: ExportDocument::from_json(&text)?,
            attachments: Vec::new(),
        });
    }

    let mut entries = Vec::new();
    let document_path = path.join(treenote_core::transcode::ARCHIVE_DOCUMENT_PATH);
    entries.push((
        treenote_core::transcode::ARCHIVE_DOCUMENT_PATH.to_string(),
        fs::read(&document_path)
            .with_context(|| format!("failed to read {}", document_path.display()))?,
    ));
    let attachments_dir = path.join("attachments");
    if attachments_dir.is_dir() {
        for entry in fs::read_dir(&attachments_dir)? {
            let entry = entry?;
            let name = entry
                .file_name()
                .into_string()
                .map_err(|name| anyhow!("attachment name is not UTF-8: {name:?}"))?;
            entries.push((format!("attachments/{name}"), fs::read(entry.path())?));
        }
    }
    Ok(ExportBundle::from_archive_entries(entries)?)
}

fn cleanup(db: &Path, config: &CoreConfig) -> Result<()> {
    let (report, broken) = with_service(db, config, |service| {
        let broken = service.remove_broken_symlinks();
        let report = service.cleanup_orphans()?;
        Ok((report, broken))
    })?;
    println!("broken_symlinks_removed={}", broken.len());
    println!("nodes_removed={}", report.removed_nodes.len());
    println!("blobs_removed={}", report.removed_blobs.len());
    println!("attachments_stripped={}", report.stripped_attachments);
    Ok(())
}
