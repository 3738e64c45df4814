use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use data_loader::{DistanceTable, Granularity, LocationId, MODEL_INPUT_WIDTH};
use engine::{ExplainerConfig, RecommendationEngine, candidate_pool};
use match_model::load_model_with_fallback;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// CityMatch - preference-based location recommendations
#[derive(Parser)]
#[command(name = "city-match")]
#[command(about = "Recommend a city or area from liked/disliked examples", long_about = None)]
struct Cli {
    /// Path to the directory holding distance tables and trained models
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Which granularity to recommend at
    #[arg(long, value_enum, default_value_t = GranularityArg::City)]
    granularity: GranularityArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum GranularityArg {
    City,
    Area,
}

impl GranularityArg {
    fn granularity(self) -> Granularity {
        match self {
            GranularityArg::City => Granularity::City,
            GranularityArg::Area => Granularity::Area,
        }
    }

    /// The artifact substituted when this granularity's own is absent
    fn fallback(self) -> Granularity {
        match self {
            GranularityArg::City => Granularity::Area,
            GranularityArg::Area => Granularity::City,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend one location from the liked/disliked examples
    Recommend {
        /// Location the user wants more of (repeatable)
        #[arg(long, required = true)]
        liked: Vec<LocationId>,

        /// Location the user wants less of (repeatable)
        #[arg(long)]
        disliked: Vec<LocationId>,

        /// Restrict candidates to one region
        #[arg(long)]
        region: Option<String>,

        /// Fixed seed for reproducible explanations
        #[arg(long)]
        seed: Option<u64>,

        /// Emit the full recommendation as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the locations the distance table knows about
    Locations {
        /// Restrict the listing to one region
        #[arg(long)]
        region: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let granularity = cli.granularity.granularity();

    let table_path = cli.data_dir.join(granularity.table_file_name());
    let start = Instant::now();
    let table = Arc::new(
        DistanceTable::load_from_csv(&table_path)
            .with_context(|| format!("Failed to load distance table {}", table_path.display()))?,
    );
    eprintln!(
        "{} Loaded {} distance records in {:?}",
        "✓".green(),
        table.len(),
        start.elapsed()
    );

    match cli.command {
        Commands::Recommend {
            liked,
            disliked,
            region,
            seed,
            json,
        } => handle_recommend(
            table,
            &cli.data_dir,
            cli.granularity,
            liked,
            disliked,
            region,
            seed,
            json,
        ),
        Commands::Locations { region } => handle_locations(&table, region.as_deref()),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_recommend(
    table: Arc<DistanceTable>,
    data_dir: &Path,
    granularity: GranularityArg,
    liked: Vec<LocationId>,
    disliked: Vec<LocationId>,
    region: Option<String>,
    seed: Option<u64>,
    json: bool,
) -> Result<()> {
    for loc in liked.iter().chain(disliked.iter()) {
        if !table.contains(loc) {
            return Err(anyhow!("Location '{}' is not in the distance table", loc));
        }
    }
    let liked: BTreeSet<LocationId> = liked.into_iter().collect();
    let disliked: BTreeSet<LocationId> = disliked.into_iter().collect();

    let model = load_model_with_fallback(
        &data_dir.join(granularity.granularity().model_file_name()),
        &data_dir.join(granularity.fallback().model_file_name()),
        MODEL_INPUT_WIDTH,
    )
    .context("Failed to load a trained match model")?;

    let pool = candidate_pool(&table, &liked, &disliked, region.as_deref());
    let engine = RecommendationEngine::new(table, Arc::new(model)).with_explainer(
        ExplainerConfig {
            seed,
            ..ExplainerConfig::default()
        },
    );

    let recommendation = engine.recommend(&pool, &liked, &disliked)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recommendation)?);
        return Ok(());
    }

    println!(
        "{} {}",
        "Recommended:".bold().blue(),
        recommendation.location.bold()
    );
    println!("{} {}%", "Confidence:".bold(), recommendation.confidence);
    println!("{}", "Why:".bold());
    for (name, weight) in recommendation.explanation.terms() {
        println!("  {} {:+.4}", format!("{name}:").cyan(), weight);
    }
    println!("{}", "Aggregated distances:".bold());
    for (key, value) in &recommendation.raw_distances {
        println!("  {} {:.4}", format!("{key}:").cyan(), value);
    }
    Ok(())
}

fn handle_locations(table: &DistanceTable, region: Option<&str>) -> Result<()> {
    let locations = match region {
        Some(region) => table.locations_in_region(region),
        None => table.locations(),
    };
    if locations.is_empty() {
        println!("No locations found");
        return Ok(());
    }
    for loc in &locations {
        match table.region_of(loc) {
            Some(region) => println!("{loc} ({region})"),
            None => println!("{loc}"),
        }
    }
    println!("{} locations", locations.len().to_string().green());
    Ok(())
}
