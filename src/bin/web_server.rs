use std::{path::PathBuf, sync::Arc};

use analogy_reader::{
    ai_utils::OpenAiClient,
    api::{AppState, router},
    book::library::Library,
    config::Config,
    processor::{ChapterProcessor, ProcessChapter},
    runtime::{ChapterQueue, TaskRunner},
    utils::init_log,
};
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "database/book.db")]
    database: PathBuf,
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    #[arg(short, long, default_value = "8080")]
    port: u16,
    /// TOML file with pipeline settings
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// 日志目录, 不指定时输出到终端
    #[arg(short, long)]
    log_dir: Option<PathBuf>,
    /// Answer uploads with a maintenance notice
    #[arg(long)]
    disable_uploads: bool,
    /// Overrides `max_concurrency` of the config file
    #[arg(long)]
    max_concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let _guard = init_log(args.log_dir.clone())?;

    let mut config = Config::load(args.config.as_deref())?;
    if args.disable_uploads {
        config.uploads_enabled = false;
    }
    if let Some(max_concurrency) = args.max_concurrency {
        config.max_concurrency = max_concurrency;
    }
    let library = Library::connect(&args.database).await?;
    let client = OpenAiClient::from_env()?;
    let processor = ChapterProcessor::new(library.clone(), client.clone(), client);
    let runner = TaskRunner::new(processor, &config);

    // chapters interrupted by the last shutdown
    let unfinished = library.unfinished_chapters().await?;
    if !unfinished.is_empty() {
        info!(chapters = unfinished.len(), "resuming unfinished chapters");
    }
    for (chapter_id, book_id) in unfinished {
        runner.enqueue(ProcessChapter {
            chapter_id,
            book_id,
        });
    }

    let state = AppState {
        library,
        queue: Arc::new(runner),
        uploads_enabled: config.uploads_enabled,
        max_upload_bytes: config.max_upload_bytes,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("listening on http://{}", listener.local_addr()?);
    info!("swagger ui at http://{}/swagger-ui/", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
