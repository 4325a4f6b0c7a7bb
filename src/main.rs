use clap::{Parser, Subcommand};
use std::path::PathBuf;
use storypress::config::{self, BucketKind, StoreCredentials};
use storypress::store::S3Store;
use storypress::story::{self, FixedConfirmation, StoryOutcome, TerminalConfirmation};
use storypress::{assets, cachebust, combine, naming, output, preflight};
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "storypress")]
#[command(about = "Finish and publish storytelling microsites")]
#[command(long_about = "\
Finish and publish storytelling microsites

Takes a generated site and its assets from a project directory and publishes
them to S3-compatible object storage under dated, slugged prefixes.

Project structure:

  my-story/
  ├── config.yaml                  # Project config (run 'storypress gen-config')
  ├── assets/                      # Images, fonts, media, data → asset bucket
  ├── build/                       # Generated site → story bucket
  │   ├── index.html
  │   ├── embed.json               # Markup/model metadata
  │   └── main.json                # Compiled style metadata
  └── .tmp/assets/                 # Cache-busted copies (generated)

Publish paths:
  Story:   <story.root>/<year>/<month>/<project-slug>/
  Assets:  <assets.root>/<year>/<month>/<project-slug>/

Credentials come from the environment:
  STORY_BUCKET  STORY_REGION  STORY_ACCESS_KEY  STORY_SECRET_KEY  [STORY_ENDPOINT]
  ASSETS_BUCKET ASSETS_REGION ASSETS_ACCESS_KEY ASSETS_SECRET_KEY [ASSETS_ENDPOINT]

Set RUST_LOG=debug for request-level diagnostics.")]
#[command(version = version_string())]
struct Cli {
    /// Project config file
    #[arg(long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish generic assets to the asset bucket (create-only)
    PublishAssets,
    /// Publish the generated site to the story bucket and remove stale files
    PublishStory {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Stage hash-named image copies and rewrite references in site markup
    Cachebust,
    /// Copy staged assets into the site directory
    CopyAssets,
    /// Point relative asset references at the hosted asset domain
    RewritePaths,
    /// Merge the generated metadata JSON files
    CombineJson,
    /// Run the publish preflight checks without touching the network
    Check,
    /// Print a stock config.yaml with all options documented
    GenConfig,
}

fn main() {
    let cli = Cli::parse();
    init_logging();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_yaml());
            return Ok(());
        }
        _ => config::load_config(&cli.config)?,
    };
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match cli.command {
        Command::GenConfig => {}
        Command::PublishAssets => {
            let date = project_date(&config)?;
            let store = S3Store::new(
                StoreCredentials::from_env(BucketKind::Assets)?,
                &config.uploads,
            )?;
            let report = assets::publish_assets(&config, &date, &store)?;
            output::print_asset_report(&report);
        }
        Command::PublishStory { yes } => {
            let cleared = story::preflight(&config)?;
            let store = S3Store::new(
                StoreCredentials::from_env(BucketKind::Story)?,
                &config.uploads,
            )?;
            let outcome = if yes {
                story::publish_story(&cleared, &store, &FixedConfirmation(true))?
            } else {
                story::publish_story(&cleared, &store, &TerminalConfirmation)?
            };
            match outcome {
                StoryOutcome::Published(report) => output::print_sync_report(&report),
                StoryOutcome::Declined => println!("Publish cancelled; nothing was uploaded"),
            }
        }
        Command::Cachebust => {
            let report = cachebust::cachebust(&config)?;
            output::print_cachebust_report(&report);
        }
        Command::CopyAssets => {
            let report = cachebust::copy_to_output(&config)?;
            output::print_copy_report(&report);
        }
        Command::RewritePaths => {
            let date = project_date(&config)?;
            let report = cachebust::rewrite_hosted_paths(&config, &date)?;
            output::print_rewrite_report(&report);
        }
        Command::CombineJson => {
            let path = combine::combine_project(&config)?;
            output::print_combine_output(&path);
        }
        Command::Check => {
            let cleared = story::preflight(&config)?;
            let asset_prefix =
                naming::publish_path(&config.assets.root, cleared.date(), &config.project_name);
            output::print_check_output(&config.project_name, cleared.prefix(), &asset_prefix);
        }
    }

    Ok(())
}

fn project_date(
    config: &config::ProjectConfig,
) -> Result<preflight::ProjectDate, preflight::PreflightError> {
    preflight::validate_project_date(
        config.project_year.as_deref(),
        config.project_month.as_deref(),
    )
}

/// Diagnostics go to stderr so task output on stdout stays clean.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
