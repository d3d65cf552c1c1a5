use std::path::PathBuf;

use analogy_reader::{
    ai_utils::OpenAiClient,
    book::library::Library,
    config::Config,
    ingest::ingest_pdf,
    processor::{ChapterProcessor, ProcessChapter},
    runtime::TaskRunner,
    utils::init_log,
};
use clap::Parser;

#[derive(Debug, clap::Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "database/book.db")]
    database: PathBuf,
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// List all books
    List,
    /// Parse a PDF into a pending book
    Upload {
        file: PathBuf,
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Show progress and chapter states of a book
    Status { id: i64 },
    /// Process every chapter of a book and wait for the result
    Process { id: i64 },
    /// Reset a failed chapter and process it again
    Retry { chapter_id: i64 },
    Delete { id: i64 },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let _guard = init_log(None);
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{:?}", e);
    }
}

fn runner(library: &Library, config: &Config) -> anyhow::Result<TaskRunner<OpenAiClient, OpenAiClient>> {
    let client = OpenAiClient::from_env()?;
    let processor = ChapterProcessor::new(library.clone(), client.clone(), client);
    Ok(TaskRunner::new(processor, config))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let library = Library::connect(&args.database).await?;
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Commands::List => {
            for book in library.list_books().await? {
                println!(
                    "{:<8} {:<12} {:>3}%  {}",
                    book.id,
                    format!("{:?}", book.status),
                    book.progress,
                    book.title
                );
            }
        }
        Commands::Upload { file, title } => {
            let title = match title {
                Some(title) => title,
                None => file
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default(),
            };
            println!("Parsing {}", file.display());
            let bytes = tokio::fs::read(&file).await?;
            let book = ingest_pdf(&library, &title, bytes).await?;
            println!(
                "Book created with id: {} ({} chapters)",
                book.id, book.total_chapters
            );
        }
        Commands::Status { id } => {
            let status = library.get_book_status(id).await?;
            println!(
                "{:?} {}/{} ({}%)",
                status.status, status.processed_chapters, status.total_chapters, status.progress
            );
            for chapter in status.chapters {
                println!(
                    "{:<8} {:>4}  {:<12} {}",
                    chapter.id,
                    chapter.chapter_number,
                    format!("{:?}", chapter.status),
                    chapter.title
                );
            }
        }
        Commands::Process { id } => {
            let runner = runner(&library, &config)?;
            let results = runner.run_book(id).await?;
            let failed = results.iter().filter(|r| r.is_err()).count();
            let book = library.get_book(id).await?;
            println!(
                "{} chapters processed, {} failed, book is {:?}",
                results.len() - failed,
                failed,
                book.status
            );
        }
        Commands::Retry { chapter_id } => {
            let chapter = library.reset_chapter(chapter_id).await?;
            let runner = runner(&library, &config)?;
            let done = runner
                .run_with_retry(ProcessChapter {
                    chapter_id,
                    book_id: chapter.book_id,
                })
                .await?;
            println!("{}\n\n{}", done.analogy, done.image_prompt);
        }
        Commands::Delete { id } => {
            println!("Deleting book with id: {}", id);
            library.delete_book(id).await?;
        }
    }
    Ok(())
}
