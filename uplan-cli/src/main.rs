mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "uplan")]
#[command(about = "Combined calendar feeds for university courses")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or look up) the feed for a set of courses
    Create {
        /// Comma separated course tokens, e.g. 140135,250059-2
        courses: String,

        /// Semester code such as 2024W; defaults to the current semester
        #[arg(short, long)]
        semester: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download the merged calendar of a feed
    Render {
        /// Feed path as returned by `create`
        path: String,

        /// Output file, `<path>.ics` by default
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print the current semester reported by the directory
    Semester,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("uplan_cli={log_level},uplan_core={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let service = commands::build_service().await?;

    match cli.command {
        Commands::Create {
            courses,
            semester,
            json,
        } => commands::create_command(&service, &courses, semester.as_deref(), json).await,
        Commands::Render { path, output } => commands::render_command(&service, &path, output).await,
        Commands::Semester => commands::semester_command(&service).await,
    }
}
