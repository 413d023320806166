use clap::{Parser, Subcommand};
use photos_server::imaging::RustBackend;
use photos_server::manager::FoldersManager;
use photos_server::{config, output};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "photos-server")]
#[command(about = "Index photo folders and maintain their resized derivatives")]
#[command(long_about = "\
Index photo folders and maintain their resized derivatives

Every configured source is a folder of images. An update scans the sources,
compares them with the saved library, resizes new images into the cache and
removes derivatives of images that are gone.

Library paths start with the source name:

  photos/2023/beach.jpg   →  <source folder>/2023/beach.jpg
                          →  <cache>/photos/2023/beach-1080.jpg
                          →  <cache>/photos/2023/beach-250.jpg

Logging is controlled by PHOTOS_LOG (default: info).

Run 'photos-server gen-config' to generate a documented config file.")]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(long, default_value = "photos-server.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile every source with the filesystem
    Update,
    /// Reconcile one folder (or one source)
    UpdateFolder { path: String },
    /// Index a folder that is not in the library yet
    Index {
        path: String,
        /// Rotate already-cached derivatives according to EXIF
        #[arg(long)]
        force_rotate: bool,
    },
    /// Register and index a new source
    AddSource { name: String, folder: PathBuf },
    /// List the sources, or the content of a folder
    Browse {
        #[arg(default_value = "")]
        path: String,
    },
    /// List capture days, or the photos of one day (YYYY-MM-DD)
    Dates { day: Option<chrono::NaiveDate> },
    /// Number of photos in the library
    Count,
    /// Remove an image or an empty folder from the library (files are kept)
    Remove { path: String },
    /// Move a folder within its source
    Move { from: String, to: String },
    /// Move images to the garbage folder and drop them from the library
    Delete {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Re-read capture dates under a folder, or of every photo of a day
    UpdateExif {
        /// Library path (or YYYY-MM-DD with --date)
        target: String,
        #[arg(long)]
        date: bool,
    },
    /// Print a stock config file with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("PHOTOS_LOG", "info"))
        .init();
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;
    init_thread_pool(&config.processing);
    let manager = FoldersManager::new(&config, Arc::new(RustBackend::new()))?;

    match cli.command {
        Command::Update => {
            let report = manager.reconcile_all()?;
            output::print_report("Update", &report);
        }
        Command::UpdateFolder { path } => {
            let report = manager.reconcile_folder(&path)?;
            output::print_report("Update", &report);
        }
        Command::Index { path, force_rotate } => {
            let report = manager.index_folder(&path, force_rotate)?;
            output::print_report("Index", &report);
        }
        Command::AddSource { name, folder } => {
            let report = manager.add_source(&name, &folder)?;
            output::print_report("Index", &report);
        }
        Command::Browse { path } => {
            output::print_browse(&manager.browse(&path)?);
        }
        Command::Dates { day: Some(day) } => {
            for path in manager.photos_by_date(day) {
                println!("{path}");
            }
        }
        Command::Dates { day: None } => {
            output::print_dates(&manager.all_dates());
        }
        Command::Count => {
            println!("{}", output::format_count(manager.count()));
        }
        Command::Remove { path } => {
            let node = manager.remove_node(&path)?;
            println!("Removed {}", node.relative_path);
        }
        Command::Move { from, to } => {
            manager.move_folder(&from, &to)?;
            println!("Moved {from} → {to}");
        }
        Command::Delete { paths } => {
            let deleted = manager.delete_images(&paths)?;
            println!("Deleted {}", output::format_count(deleted));
        }
        Command::UpdateExif { target, date } => {
            let changed = if date {
                manager.update_exif_of_date(target.parse()?)?
            } else {
                manager.update_exif(&target)?
            };
            println!("Updated {} dates", changed);
        }
        // printed above, needs no library
        Command::GenConfig => {}
    }

    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores: the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
