use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use charter_sync_lib::config::{self, AppConfig};
use charter_sync_lib::services::{RegionKind, SearchMatch};
use charter_sync_lib::{
    init_tracing, CharterError, EmailFormatter, HttpDataSource, MailingList, Message,
    MessageStore, Result, SyncService, ThreadQuery,
};

#[derive(Parser)]
#[command(name = "charter")]
#[command(about = "Read Swift mailing list threads from a local cache", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the known mailing lists
    Lists,

    /// List thread roots of a mailing list, newest first
    Threads {
        /// Mailing list identifier, e.g. swift-evolution
        list: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Defaults to `threads.page_size` from the config
        #[arg(long)]
        page_size: Option<u32>,

        /// Fetch from the archive before reading the cache
        #[arg(long)]
        refresh: bool,
    },

    /// Print a whole conversation
    Thread {
        /// Message id of the thread root
        id: String,

        /// Fetch the root from the archive even if it is cached
        #[arg(long)]
        refresh: bool,
    },

    /// Ask the archive for messages containing an exact phrase
    Search {
        /// Mailing list identifier, e.g. swift-evolution
        list: String,

        phrase: String,
    },
}

type Service = SyncService<MessageStore, HttpDataSource>;

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.config {
        Some(path) => config::init_config_from_path(path)?,
        None => config::init_config()?,
    }
    let config = config::get_config();

    match cli.command {
        Commands::Lists => {
            for list in MailingList::ALL {
                println!("{:<18} {}", list.identifier(), list.name());
            }
            Ok(())
        }
        Commands::Threads {
            list,
            page,
            page_size,
            refresh,
        } => {
            if MailingList::from_identifier(&list).is_none() {
                return Err(CharterError::NotFound(format!("mailing list {}", list)));
            }

            let service = build_service(&config)?;
            let page_size = page_size.unwrap_or(config.threads.page_size);
            let query = ThreadQuery::threads_page(&list, page, page_size);

            let mut threads = service.get_cached(&query).await;
            if refresh || threads.is_empty() {
                threads = service.refresh(&query).await;
            }

            print_threads(&threads);
            Ok(())
        }
        Commands::Thread { id, refresh } => {
            let service = build_service(&config)?;
            let root = resolve_root(&service, &id, refresh).await?;

            let formatter = EmailFormatter::new();
            for entry in service.load_thread(&root).await {
                print_message(&formatter, entry.indent, &entry.message);
            }
            Ok(())
        }
        Commands::Search { list, phrase } => {
            if MailingList::from_identifier(&list).is_none() {
                return Err(CharterError::NotFound(format!("mailing list {}", list)));
            }
            if phrase.trim().is_empty() {
                return Err(CharterError::Validation("empty search phrase".to_string()));
            }

            let service = build_service(&config)?;
            let found = service.get_uncached(&ThreadQuery::search(&list, &phrase)).await;

            let formatter = EmailFormatter::new();
            for message in &found {
                println!(
                    "{:>6}  {:<8} {}  ({})",
                    formatter.format_date(&message.date),
                    SearchMatch::classify(message, &phrase).label(),
                    formatter.format_subject(&message.subject),
                    formatter.format_name(&message.from),
                );
                println!("        {}", message.id);
            }
            Ok(())
        }
    }
}

fn build_service(config: &AppConfig) -> Result<Service> {
    let store = MessageStore::new(config.db_path()?)?;
    let network = HttpDataSource::new(&config.api)?;

    Ok(SyncService::new(Arc::new(store), Arc::new(network))
        .with_thread_page_size(config.threads.thread_page_size))
}

async fn resolve_root(service: &Service, id: &str, refresh: bool) -> Result<Message> {
    if !refresh {
        if let Some(root) = service.cache().get(id)? {
            if root.is_complete() {
                return Ok(root);
            }
        }
    }

    service
        .get_uncached(&ThreadQuery::ids(vec![id.to_string()]))
        .await
        .into_iter()
        .find(|m| m.id == id && m.is_complete())
        .ok_or_else(|| CharterError::NotFound(id.to_string()))
}

fn print_threads(threads: &[Message]) {
    let formatter = EmailFormatter::new();

    for message in threads {
        let labels = formatter.labels_in_subject(&formatter.format_subject(&message.subject));
        let tags: String = labels.iter().map(|l| format!("[{}] ", l)).collect();

        println!(
            "{:>6}  {}{}  ({}, {} messages)",
            formatter.format_date(&message.date),
            tags,
            formatter.subject_without_labels(&formatter.format_subject(&message.subject)),
            formatter.format_name(&message.from),
            message.descendants.len().max(1),
        );
        println!("        {}", message.id);
    }
}

fn print_message(formatter: &EmailFormatter, indent: usize, message: &Message) {
    let pad = "    ".repeat(indent);
    let content = formatter.format_content(&message.content);

    println!(
        "{}{} - {}",
        pad,
        formatter.format_name(&message.from),
        formatter.format_date(&message.date)
    );

    for region in formatter.text_regions(&content) {
        match region.kind {
            RegionKind::Static => {
                let text = region.text(&content).unwrap_or_default();
                for line in text.trim_matches('\n').lines() {
                    println!("{}{}", pad, line);
                }
            }
            RegionKind::Quoted => println!("{}> ...", pad),
        }
    }
    println!();
}
