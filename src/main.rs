mod cli;
mod config;
mod error;
mod export;
mod generator;
mod model;
mod providers;
mod session;
mod util;

use anyhow::Result;
use clap::{Parser, Subcommand};

use export::encoder::StepsEncoder;

#[derive(Parser)]
#[command(name = "storycase")]
#[command(about = "Generate QA test cases from user stories and push them to Azure DevOps")]
#[command(version)]
struct Cli {
    /// Identity whose settings and session are used (defaults to $USER)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change tracker settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Enter a user story by hand
    Story {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        /// Acceptance criteria
        #[arg(long)]
        criteria: String,
    },

    /// Load a user story from a tracker work item
    Fetch {
        /// Work item id
        id: String,
    },

    /// Generate test cases for the current story
    Generate,

    /// Summarize the current story's acceptance criteria
    Summarize,

    /// Show the current story and test cases
    Show {
        /// Print the test cases as JSON
        #[arg(long)]
        json: bool,
    },

    /// Edit a generated test case
    Edit {
        /// Test case number, as listed by `show`
        case: usize,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Replace all steps with those of an HTML steps table
        #[arg(long)]
        steps_from: Option<std::path::PathBuf>,
        /// Step number to change; one past the last step adds a step
        #[arg(long)]
        step: Option<usize>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        expected: Option<String>,
    },

    /// Create the test cases in the tracker under a parent work item
    Push {
        /// Parent work item id (defaults to the fetched story)
        #[arg(long)]
        parent: Option<String>,
        /// Push again without asking when this batch was already pushed
        #[arg(short, long)]
        yes: bool,
        /// How steps are written into the tracker
        #[arg(long, value_enum)]
        format: Option<StepsEncoder>,
        /// Create requests in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Show recent pushes
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Save tracker settings for this identity
    Set {
        #[arg(long)]
        pat: Option<String>,
        #[arg(long)]
        organization: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let ctx = cli::Invocation::new(cli.user);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => cli::handle_config_show(&ctx)?,
            ConfigAction::Set {
                pat,
                organization,
                project,
            } => cli::handle_config_set(&ctx, pat, organization, project)?,
        },
        Commands::Story {
            title,
            description,
            criteria,
        } => cli::handle_story(&ctx, title, description, criteria)?,
        Commands::Fetch { id } => cli::handle_fetch(&ctx, &id).await?,
        Commands::Generate => cli::handle_generate(&ctx).await?,
        Commands::Summarize => cli::handle_summarize(&ctx).await?,
        Commands::Show { json } => cli::handle_show(&ctx, json)?,
        Commands::Edit {
            case,
            title,
            description,
            steps_from,
            step,
            action,
            expected,
        } => cli::handle_edit(
            &ctx,
            case,
            cli::EditArgs {
                title,
                description,
                steps_from,
                step,
                action,
                expected,
            },
        )?,
        Commands::Push {
            parent,
            yes,
            format,
            concurrency,
        } => {
            cli::handle_push(
                &ctx,
                cli::PushArgs {
                    parent,
                    yes,
                    format,
                    concurrency,
                },
            )
            .await?
        }
        Commands::History { limit } => cli::handle_history(&ctx, limit)?,
    }

    Ok(())
}
