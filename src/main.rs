use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use verde_digital::config::AppConfig;
use verde_digital::ops::{self, Command, Outcome};
use verde_digital::store::{FileStorage, RegistryStore};
use verde_digital::{cities, render, server};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the map page and its API
    Serve,
    /// Record trees planted in a city
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short = 'C', long)]
        city: String,
        #[arg(short, long, allow_hyphen_values = true)]
        quantity: String,
    },
    /// Toggle the verified flag of a contribution
    Verify {
        #[arg(short = 'C', long)]
        city: String,
        #[arg(long)]
        id: u64,
    },
    /// Delete a contribution
    Delete {
        #[arg(short = 'C', long)]
        city: String,
        #[arg(long)]
        id: u64,
        /// Skip the confirmation requirement
        #[arg(short, long)]
        yes: bool,
    },
    /// Erase every stored record
    Clear {
        #[arg(short, long)]
        yes: bool,
    },
    /// Write the registry as pretty JSON
    Export {
        /// Defaults to the configured export filename
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Replace the registry with the contents of a JSON file
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Show the top contributors
    Ranking,
    /// List every contribution
    List,
    /// Print map markers as GeoJSON
    Markers,
    /// List the known cities
    Cities,
    /// Find the known city closest to a coordinate
    Nearest {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let app_config = AppConfig::load_or_default(&cli.config)?;
    let mut store = RegistryStore::new(
        FileStorage::new(&app_config.storage.data_dir),
        app_config.storage.key.clone(),
    );

    let command = match cli.command {
        Commands::Serve => {
            return server::start_server(app_config).await;
        }
        Commands::Add {
            name,
            city,
            quantity,
        } => Command::AddContribution {
            name,
            city,
            quantity: ops::parse_quantity(&quantity)?,
        },
        Commands::Verify { city, id } => Command::ToggleVerification { id, city },
        Commands::Delete { city, id, yes } => Command::DeleteContributor {
            id,
            city,
            confirmed: yes,
        },
        Commands::Clear { yes } => Command::ClearAll { confirmed: yes },
        Commands::Export { out } => {
            let contents = match ops::execute(&mut store, Command::Export)? {
                Outcome::Exported { contents } => contents,
                other => bail!("Unexpected export outcome: {:?}", other),
            };
            let path = out.unwrap_or_else(|| PathBuf::from(&app_config.export.filename));
            fs::write(&path, contents)
                .with_context(|| format!("Failed to write export file: {:?}", path))?;
            println!("Registry exported to {:?}", path);
            return Ok(());
        }
        Commands::Import { file } => {
            let contents = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read import file: {:?}", file))?;
            Command::Import { contents }
        }
        Commands::Ranking => {
            let entries = render::ranking(&store.load(), app_config.ranking.limit);
            println!("{}", render::ranking_text(&entries));
            return Ok(());
        }
        Commands::List => {
            let rows = render::management_rows(&store.load());
            println!("{}", render::management_text(&rows));
            return Ok(());
        }
        Commands::Markers => {
            let markers = render::markers(&store.load());
            println!("{}", serde_json::to_string_pretty(&markers)?);
            return Ok(());
        }
        Commands::Cities => {
            for city in cities::CITIES {
                println!("{} ({}, {})", city.name, city.lat, city.lon);
            }
            return Ok(());
        }
        Commands::Nearest { lat, lon } => {
            match cities::CityIndex::new().nearest(lat, lon) {
                Some(found) => println!("{} ({:.1} km)", found.city.name, found.distance_km),
                None => println!("No known cities."),
            }
            return Ok(());
        }
    };

    let outcome = ops::execute(&mut store, command)?;
    println!("{}", outcome.message());
    Ok(())
}
