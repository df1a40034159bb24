use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use shelfmark::search::SearchQuery;
use shelfmark::{export, logging, Catalog, Config};

enum Command {
    Search(SearchQuery),
    Export(PathBuf),
    ExportCsv(PathBuf),
    Import(PathBuf),
    Reclaim,
    Stats,
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = None;
    let mut rest = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("shelfmark {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                let Some(path) = args.get(i + 1) else {
                    bail!("--config requires a path argument");
                };
                config_path = Some(PathBuf::from(path));
                i += 1;
            }
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    let mut rest = rest.into_iter();
    let command = match rest.next().as_deref() {
        Some("search") => Command::Search(parse_search(rest)?),
        Some("export") => Command::Export(path_arg("export", rest.next())?),
        Some("export-csv") => Command::ExportCsv(path_arg("export-csv", rest.next())?),
        Some("import") => Command::Import(path_arg("import", rest.next())?),
        Some("reclaim") => Command::Reclaim,
        Some("stats") | None => Command::Stats,
        Some(other) => {
            print_help();
            bail!("unknown command: {}", other);
        }
    };

    Ok(Args {
        config_path,
        command,
    })
}

fn parse_search(mut args: impl Iterator<Item = String>) -> Result<SearchQuery> {
    let mut query = SearchQuery::default();
    let mut words = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--type" => query.item_type = Some(args.next().context("--type requires a value")?),
            "--place" => query.place = Some(args.next().context("--place requires a value")?),
            "--min-rating" => {
                let value = args.next().context("--min-rating requires a value")?;
                query.min_rating = Some(value.parse().context("--min-rating must be 0-5")?);
            }
            _ => words.push(arg),
        }
    }

    query.text = words.join(" ");
    Ok(query)
}

fn path_arg(command: &str, arg: Option<String>) -> Result<PathBuf> {
    arg.map(PathBuf::from)
        .with_context(|| format!("{} requires a file argument", command))
}

fn print_help() {
    println!(
        r#"shelfmark - personal catalog store

USAGE:
    shelfmark [OPTIONS] [COMMAND]

COMMANDS:
    search [TEXT]       List items whose name, notes or barcode contain TEXT
        --type TYPE         Only items of this type
        --place PLACE       Only items at this place
        --min-rating N      Only items rated at least N
    export FILE         Write every item, with photos, to a JSON document
    export-csv FILE     Write a flat CSV listing of every item
    import FILE         Import items from a JSON document
    reclaim             Delete orphaned photos
    stats               Show record counts (default)

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    SHELFMARK_CONFIG    Path to config file (overrides default location)
    SHELFMARK_LOG       Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/shelfmark/config.toml"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let catalog = Catalog::open(&config)
        .await
        .with_context(|| format!("opening catalog at {}", config.db_path.display()))?;

    match args.command {
        Command::Search(query) => {
            let ids = catalog.query_with(&query);
            for item in catalog.db().get_items(&ids).await? {
                let barcodes: Vec<&str> = item.barcodes.iter().map(String::as_str).collect();
                println!(
                    "{:>6}  {}  [{}]  {}/5  {}",
                    item.id,
                    item.name,
                    item.item_type.as_deref().unwrap_or("-"),
                    item.rating,
                    barcodes.join(",")
                );
            }
        }
        Command::Export(path) => {
            let document = export::export_all(&catalog).await?;
            export::write_document(&document, &path)?;
            println!("Exported {} items to {}", document.item_count, path.display());
        }
        Command::ExportCsv(path) => {
            let count = export::export_csv(&catalog, &path).await?;
            println!("Exported {} items to {}", count, path.display());
        }
        Command::Import(path) => {
            let document = export::read_document(&path)?;
            let report = export::import_all(&catalog, &document).await?;
            println!(
                "Imported {} items, skipped {}",
                report.imported, report.skipped
            );
        }
        Command::Reclaim => {
            let reclaimed = catalog.photos().reclaim_orphans().await?;
            println!("Reclaimed {} orphaned photos", reclaimed);
        }
        Command::Stats => {
            let stats = catalog.stats().await?;
            println!("Database: {}", config.db_path.display());
            println!("Items:    {}", stats.items);
            println!("Places:   {}", stats.places);
            println!("Photos:   {}", stats.photos);
        }
    }

    Ok(())
}
