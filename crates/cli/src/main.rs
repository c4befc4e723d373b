use anyhow::Context;
use clap::{Parser, Subcommand};
use m5_core::domain::features::{is_categorical, NUMERIC_FEATURES};
use m5_core::domain::prediction::PredictionRequest;
use m5_core::history::{InMemorySalesHistory, PgSalesHistory, SalesHistory};
use m5_core::model::ForecastModel;
use m5_core::predict::Predictor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "m5_cli")]
struct Args {
    /// Model file to load. Defaults to MODEL_PATH, then modelo_lgbm.txt.
    #[arg(long, global = true)]
    model_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the feature order the model expects.
    Features,

    /// Score one (date, store, item) the same way the API does.
    Predict {
        /// Calendar date (YYYY-MM-DD).
        #[arg(long)]
        date: String,

        #[arg(long)]
        store_id: String,

        #[arg(long)]
        item_id: String,

        /// Read history from a JSON snapshot instead of DATABASE_URL.
        #[arg(long)]
        history_json: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = m5_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let model_path = args
        .model_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(&settings.model_path));
    let model = ForecastModel::load(&model_path)?;

    match args.command {
        Command::Features => {
            for (idx, name) in model.feature_order().iter().enumerate() {
                println!("{idx:>3}  {name:<32} {}", feature_kind(name));
            }
            tracing::info!(
                features = model.feature_order().len(),
                trees = model.booster().num_trees(),
                objective = ?model.booster().objective(),
                "model summary"
            );
        }
        Command::Predict {
            date,
            store_id,
            item_id,
            history_json,
        } => {
            let history: Arc<dyn SalesHistory> = match history_json {
                Some(path) => Arc::new(InMemorySalesHistory::from_json_file(path)?),
                None => Arc::new(PgSalesHistory::connect_lazy(
                    settings.require_database_url()?,
                    settings.db_max_connections,
                )?),
            };

            let predictor = Predictor::new(Arc::new(model), history);
            let request = PredictionRequest {
                date,
                store_id,
                item_id,
            };

            match predictor.predict(&request).await {
                Ok(result) => {
                    let out = serde_json::to_string_pretty(&result)
                        .context("failed to serialize prediction")?;
                    println!("{out}");
                }
                Err(err) => {
                    let err = anyhow::Error::new(err);
                    sentry_anyhow::capture_anyhow(&err);
                    return Err(err.context("prediction failed"));
                }
            }
        }
    }

    Ok(())
}

fn feature_kind(name: &str) -> &'static str {
    if is_categorical(name) {
        "categorical"
    } else if NUMERIC_FEATURES.contains(&name) {
        "numeric"
    } else {
        "not built by the serving pipeline"
    }
}

fn init_sentry(settings: &m5_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
