use std::sync::Arc;

use clap::Parser;
use devbook::{
    DataDir,
    EntityKind,
    EntityRepository,
    Stores,
    TagLedger,
    cli::{Cli, Command, ReindexArgs, ServeArgs},
    error,
    server,
};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DEVBOOK_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let stores = Arc::new(Stores::open(&data_dir)?);

    match cli.command {
        Command::Serve(args) => cmd_serve(&args, stores, &data_dir)?,
        Command::Reindex(args) => cmd_reindex(&args, stores, &data_dir)?,
        Command::Status(args) => cmd_status(&stores, &data_dir, args.json)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_serve(
    args: &ServeArgs,
    stores: Arc<Stores>,
    data_dir: &DataDir,
) -> error::Result<()> {
    let config = args.server_config();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(server::run(config, stores, data_dir))
}

fn cmd_reindex(
    args: &ReindexArgs,
    stores: Arc<Stores>,
    data_dir: &DataDir,
) -> error::Result<()> {
    let kinds: Vec<EntityKind> = match args.kind {
        Some(kind) => vec![kind],
        None => EntityKind::ALL.to_vec(),
    };

    for kind in kinds {
        let repo = EntityRepository::new(
            kind,
            Arc::clone(&stores),
            data_dir.storage_dir(kind)?,
        );
        let report = repo.reindex_all()?;
        eprintln!(
            "Reindexed {} {kind} records, removed {} stale index documents",
            report.indexed, report.removed
        );
    }

    // Counts span every kind, so they are always rebuilt from all records.
    let mut records = Vec::new();
    for kind in EntityKind::ALL {
        records.extend(stores.doc_store.list(kind)?);
    }
    let tags = TagLedger::new(stores).recount(&records)?;
    eprintln!("Recounted {tags} tags in use");
    Ok(())
}

fn cmd_status(
    stores: &Stores,
    data_dir: &DataDir,
    json: bool,
) -> error::Result<()> {
    let mut kinds = Vec::new();
    for kind in EntityKind::ALL {
        let records = stores.doc_store.list(kind)?.len();
        let indexed = stores.search_index.doc_count(kind.index_name())?;
        kinds.push((kind, records, indexed));
    }
    let tags = stores.doc_store.list_tags()?;
    let in_use = tags.iter().filter(|(_, count)| *count > 0).count();

    if json {
        let mut value = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "tags": tags.len(),
            "tags_in_use": in_use,
        });
        for (kind, records, indexed) in &kinds {
            value[kind.index_name()] = serde_json::json!({
                "records": records,
                "indexed": indexed,
            });
        }
        println!("{value}");
    } else {
        println!("Data directory: {}", data_dir.root().display());
        for (kind, records, indexed) in &kinds {
            println!("{kind}: {records} records, {indexed} indexed");
        }
        println!("Tags: {} ({in_use} in use)", tags.len());
    }
    Ok(())
}
