mod app;
mod assist;
mod buffer;
mod config;
mod debounce;
mod editor;
mod export;
mod history;
mod image;
mod keymap;
mod logging;
mod ops;
mod prefs;
mod render;
mod search;
mod snippets;
mod store;
mod templates;
mod theme;
mod toast;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use store::{FileStore, Storage};

#[derive(Parser)]
#[command(name = "makeme", version, about = "README editor for the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Markdown file to edit (default: the autosaved draft)
    file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the config file in $EDITOR (default: vi)
    Config,
    /// List the bundled README templates
    Templates,
    /// Write a template to a file
    New {
        /// Template key, see `makeme templates`
        template: String,
        /// Output path
        #[arg(short, long, default_value = "README.md")]
        output: PathBuf,
    },
    /// Print a markdown file as HTML
    Render { file: PathBuf },
    /// Forget the stored draft, preferences and API key
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        return match command {
            Commands::Config => config::open_config_in_editor(),
            Commands::Templates => {
                for template in templates::TEMPLATES {
                    println!("{:<12} {} - {}", template.key, template.name, template.description);
                }
                Ok(())
            }
            Commands::New { template, output } => {
                let template = templates::find(&template).ok_or_else(|| {
                    anyhow::anyhow!("Unknown template: {template}. Try `makeme templates`.")
                })?;
                if output.exists() {
                    anyhow::bail!("{} already exists", output.display());
                }
                fs::write(&output, template.content)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                println!("Wrote {} to {}", template.name, output.display());
                Ok(())
            }
            Commands::Render { file } => {
                let text = fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                print!("{}", render::to_html(&text));
                Ok(())
            }
            Commands::Clear => {
                let store = FileStore::open_default()?;
                let dir = store.dir().to_path_buf();
                if !Storage::new(store).clear_all() {
                    anyhow::bail!("Failed to clear {}", dir.display());
                }
                println!("Cleared stored data in {}", dir.display());
                Ok(())
            }
        };
    }

    let _log_guard = logging::init()?;
    logging::install_panic_hook();
    let cfg = config::load_config()?;
    let storage = Storage::new(FileStore::open_default()?);
    let document = match cli.file {
        Some(path) => app::Document::File(path),
        None => app::Document::Draft,
    };
    app::run_app(document, cfg, storage)
}
