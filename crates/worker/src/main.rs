use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use ndarray::{Array1, Array2, Axis};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use c360_core::artifacts::{self, Artifact};
use c360_core::domain::features::FEATURE_DIM;
use c360_core::features;
use c360_core::ingest::transactions as ingest;
use c360_core::model::churn::{ChurnModel, TrainConfig, TrainedChurn};
use c360_core::model::eval;
use c360_core::model::recsys::{self, FactorizationConfig, RecsysModel};

mod synthetic;

const TEST_FRACTION: f64 = 0.2;
const SPLIT_SEED: u64 = 42;

#[derive(Debug, Parser)]
#[command(name = "c360_worker")]
struct Args {
    /// Directory trained artifacts are written to. Defaults to MODEL_DIR
    /// (or "models").
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Aggregate a transaction log into per-customer RFM features.
    BuildFeatures {
        /// CSV transaction log (customer_id,transaction_date,amount,product_id).
        #[arg(long)]
        transactions: PathBuf,

        /// Snapshot date (YYYY-MM-DD). Defaults to the day after the last
        /// observed transaction.
        #[arg(long)]
        snapshot_date: Option<String>,

        /// Output path for the feature table (JSON). Defaults to
        /// customer_features.json in the model directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Train the churn classifier and write its artifact.
    TrainChurn {
        /// CSV transaction log. Omit together with --labels to train on
        /// synthetic data.
        #[arg(long)]
        transactions: Option<PathBuf>,

        /// CSV churn outcomes (customer_id,churned).
        #[arg(long)]
        labels: Option<PathBuf>,

        /// Snapshot date (YYYY-MM-DD).
        #[arg(long)]
        snapshot_date: Option<String>,

        /// Do everything except writing the artifact.
        #[arg(long)]
        dry_run: bool,
    },

    /// Factorize the user-item interaction matrix and write the embedding
    /// artifacts.
    TrainRecsys {
        /// CSV transaction log. Omit to train on synthetic data.
        #[arg(long)]
        transactions: Option<PathBuf>,

        /// Latent embedding dimensionality.
        #[arg(long, default_value_t = 5)]
        factors: usize,

        /// Do everything except writing the artifacts.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = c360_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let model_dir = args
        .model_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(settings.model_dir()));

    let result = match &args.command {
        Command::BuildFeatures {
            transactions,
            snapshot_date,
            out,
        } => build_features(
            &model_dir,
            transactions,
            snapshot_date.as_deref(),
            out.as_deref(),
        ),
        Command::TrainChurn {
            transactions,
            labels,
            snapshot_date,
            dry_run,
        } => train_churn(
            &model_dir,
            transactions.as_deref(),
            labels.as_deref(),
            snapshot_date.as_deref(),
            *dry_run,
        ),
        Command::TrainRecsys {
            transactions,
            factors,
            dry_run,
        } => train_recsys(&model_dir, transactions.as_deref(), *factors, *dry_run),
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        let chain = format!("{err:#}");
        tracing::error!(error = %chain, "worker run failed");
    }

    result
}

fn build_features(
    model_dir: &Path,
    transactions: &Path,
    snapshot_date: Option<&str>,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let snapshot = parse_snapshot_date(snapshot_date)?;
    let txs = ingest::load_transactions(transactions)?;
    let feature_rows = features::build_rfm_features(&txs, snapshot);

    let default_out = model_dir.join("customer_features.json");
    let out_path = out.unwrap_or(&default_out);
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
    }

    let json = serde_json::to_vec_pretty(&feature_rows).context("serialize feature table")?;
    std::fs::write(out_path, json).with_context(|| format!("write {}", out_path.display()))?;

    tracing::info!(
        customers = feature_rows.len(),
        path = %out_path.display(),
        "feature table written"
    );
    Ok(())
}

fn train_churn(
    model_dir: &Path,
    transactions: Option<&Path>,
    labels: Option<&Path>,
    snapshot_date: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let snapshot = parse_snapshot_date(snapshot_date)?;

    let (txs, labels) = match (transactions, labels) {
        (Some(tx_path), Some(label_path)) => (
            ingest::load_transactions(tx_path)?,
            ingest::load_labels(label_path)?,
        ),
        (None, None) => {
            tracing::info!("no training data supplied; generating a synthetic purchase history");
            synthetic::churn_training_set(&synthetic::SyntheticOptions::from_env())?
        }
        _ => anyhow::bail!("--transactions and --labels must be supplied together"),
    };

    let feature_rows = features::build_rfm_features(&txs, snapshot);
    anyhow::ensure!(!feature_rows.is_empty(), "no customers in the training data");

    // Join labels on customer_id. Positional alignment against group-by
    // output is order-fragile and silently truncates.
    let mut rows = Vec::new();
    let mut targets = Vec::new();
    let mut unlabeled = 0usize;
    for (customer_id, row) in &feature_rows {
        match labels.get(customer_id) {
            Some(churned) => {
                rows.push(row.to_vector());
                targets.push(if *churned { 1.0 } else { 0.0 });
            }
            None => unlabeled += 1,
        }
    }
    let labels_without_customer = labels.len() - targets.len();
    if unlabeled > 0 || labels_without_customer > 0 {
        tracing::warn!(
            unlabeled_customers = unlabeled,
            labels_without_customer,
            "label join skipped rows"
        );
    }
    anyhow::ensure!(!rows.is_empty(), "no labeled customers to train on");

    let x = Array2::from_shape_vec(
        (rows.len(), FEATURE_DIM),
        rows.into_iter().flatten().collect(),
    )
    .context("assemble feature matrix")?;
    let y = Array1::from_vec(targets);

    let (train_idx, test_idx) = eval::train_test_split(x.nrows(), TEST_FRACTION, SPLIT_SEED);
    let (x_train, y_train, x_test, y_test) = if train_idx.is_empty() || test_idx.is_empty() {
        tracing::warn!(
            rows = x.nrows(),
            "dataset too small for a held-out split; evaluating in-sample"
        );
        (x.clone(), y.clone(), x.clone(), y.clone())
    } else {
        (
            x.select(Axis(0), &train_idx),
            y.select(Axis(0), &train_idx),
            x.select(Axis(0), &test_idx),
            y.select(Axis(0), &test_idx),
        )
    };

    let model = ChurnModel::fit(&x_train, &y_train, &TrainConfig::default())?;

    let scores = model.predict_batch(&x_test);
    let outcome_flags: Vec<bool> = y_test.iter().map(|v| *v > 0.5).collect();
    let evaluation = eval::evaluate(&scores, &outcome_flags)?;

    tracing::info!(
        auc = ?evaluation.auc,
        churned_precision = evaluation.churned.precision,
        churned_recall = evaluation.churned.recall,
        trained_rows = x_train.nrows(),
        test_rows = evaluation.rows,
        "churn training complete"
    );

    if dry_run {
        tracing::info!(dry_run = true, "churn artifact not written");
        return Ok(());
    }

    artifacts::save(
        model_dir,
        artifacts::CHURN_MODEL_FILE,
        &Artifact::new(TrainedChurn { model, evaluation }),
    )
}

fn train_recsys(
    model_dir: &Path,
    transactions: Option<&Path>,
    factors: usize,
    dry_run: bool,
) -> anyhow::Result<()> {
    let txs = match transactions {
        Some(path) => ingest::load_transactions(path)?,
        None => {
            tracing::info!("no interaction data supplied; generating a synthetic purchase history");
            synthetic::interaction_set(&synthetic::SyntheticOptions::from_env())?
        }
    };

    let matrix = recsys::build_interaction_matrix(&txs);
    tracing::info!(
        users = matrix.customer_ids.len(),
        items = matrix.product_ids.len(),
        "interaction matrix built"
    );

    let cfg = FactorizationConfig {
        factors,
        ..Default::default()
    };
    let model = RecsysModel::fit(&matrix, &cfg)?;
    let embeddings = model.item_embeddings();

    if dry_run {
        tracing::info!(
            dry_run = true,
            items = embeddings.len(),
            "recsys artifacts not written"
        );
        return Ok(());
    }

    artifacts::save(
        model_dir,
        artifacts::RECSYS_MODEL_FILE,
        &Artifact::new(model),
    )?;
    artifacts::save(
        model_dir,
        artifacts::ITEM_EMBEDDINGS_FILE,
        &Artifact::new(embeddings),
    )?;
    Ok(())
}

fn parse_snapshot_date(arg: Option<&str>) -> anyhow::Result<Option<NaiveDate>> {
    arg.map(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid snapshot date {s:?} (expected YYYY-MM-DD)"))
    })
    .transpose()
}

fn init_sentry(settings: &c360_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
