use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use c360_core::artifacts::{self, Artifact, CHURN_MODEL_FILE, ITEM_EMBEDDINGS_FILE};
use c360_core::domain::features::CustomerFeatures;
use c360_core::model::churn::TrainedChurn;
use c360_core::model::recsys::ItemEmbeddings;
use c360_core::model::{ItemSimilarity, ProbabilityClassifier};

const HIGH_RISK_THRESHOLD: f64 = 0.7;
const MEDIUM_RISK_THRESHOLD: f64 = 0.3;
const DEFAULT_TOP_N: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = c360_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let registry = ModelRegistry::load(Path::new(settings.model_dir()));
    let top_n = std::env::var("RECOMMEND_TOP_N")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TOP_N);
    let state = AppState {
        models: Arc::new(registry),
        top_n,
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/predict/churn", post(predict_churn))
        .route("/recommend/items", post(recommend_items))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Clone)]
struct AppState {
    models: Arc<ModelRegistry>,
    top_n: usize,
}

/// Models loaded once at startup and held read-only for the process
/// lifetime. A slot that fails to load stays empty and its endpoint
/// answers 503; startup itself never aborts over a missing artifact.
#[derive(Default)]
struct ModelRegistry {
    churn: Option<Artifact<TrainedChurn>>,
    recsys_embeddings: Option<Artifact<ItemEmbeddings>>,
}

impl ModelRegistry {
    fn load(model_dir: &Path) -> Self {
        let churn = match artifacts::load::<TrainedChurn>(model_dir, CHURN_MODEL_FILE) {
            Ok(artifact) => {
                tracing::info!(id = %artifact.id, trained_at = %artifact.trained_at, "churn model loaded");
                Some(artifact)
            }
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::warn!(error = %e, "churn model unavailable; /predict/churn will return 503");
                None
            }
        };

        let recsys_embeddings =
            match artifacts::load::<ItemEmbeddings>(model_dir, ITEM_EMBEDDINGS_FILE) {
                Ok(artifact) => {
                    tracing::info!(
                        id = %artifact.id,
                        items = artifact.payload.len(),
                        "item embeddings loaded"
                    );
                    Some(artifact)
                }
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::warn!(error = %e, "item embeddings unavailable; /recommend/items will return 503");
                    None
                }
            };

        Self {
            churn,
            recsys_embeddings,
        }
    }

    fn loaded_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.churn.is_some() {
            names.push("churn");
        }
        if self.recsys_embeddings.is_some() {
            names.push("recsys_embeddings");
        }
        names
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    models_loaded: Vec<&'static str>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "active",
        models_loaded: state.models.loaded_names(),
    })
}

#[derive(Debug, Deserialize)]
struct ChurnRequest {
    recency_days: i64,
    frequency: u64,
    monetary_value: f64,
    aov: f64,
}

#[derive(Debug, Serialize)]
struct ChurnResponse {
    churn_probability: f64,
    risk_label: &'static str,
}

async fn predict_churn(
    State(state): State<AppState>,
    Json(req): Json<ChurnRequest>,
) -> Result<Json<ChurnResponse>, StatusCode> {
    let Some(artifact) = &state.models.churn else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let features = CustomerFeatures {
        recency_days: req.recency_days,
        frequency: req.frequency,
        monetary_value: req.monetary_value,
        aov: req.aov,
    };
    let probability = artifact.payload.model.predict_probability(&features);

    Ok(Json(ChurnResponse {
        churn_probability: round4(probability),
        risk_label: risk_label(probability),
    }))
}

#[derive(Debug, Deserialize)]
struct RecommendRequest {
    customer_id: i64,
    recent_item_id: i64,
}

#[derive(Debug, Serialize)]
struct RecommendResponse {
    customer_id: i64,
    recommended_product_ids: Vec<i64>,
    strategy: &'static str,
}

async fn recommend_items(
    State(state): State<AppState>,
    Json(req): Json<RecommendRequest>,
) -> Result<Json<RecommendResponse>, StatusCode> {
    let Some(artifact) = &state.models.recsys_embeddings else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let ranked = artifact
        .payload
        .similar_items(req.recent_item_id, state.top_n)
        .map_err(|e| {
            tracing::warn!(recent_item_id = req.recent_item_id, error = %e, "recommendation lookup failed");
            StatusCode::NOT_FOUND
        })?;

    Ok(Json(RecommendResponse {
        customer_id: req.customer_id,
        recommended_product_ids: ranked.into_iter().map(|item| item.product_id).collect(),
        strategy: "item-to-item similarity",
    }))
}

fn risk_label(probability: f64) -> &'static str {
    if probability > HIGH_RISK_THRESHOLD {
        "High"
    } else if probability > MEDIUM_RISK_THRESHOLD {
        "Medium"
    } else {
        "Low"
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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

#[cfg(test)]
mod tests {
    use super::*;
    use c360_core::model::churn::{ChurnModel, TrainConfig};
    use c360_core::model::eval;
    use ndarray::array;

    fn empty_state() -> AppState {
        AppState {
            models: Arc::new(ModelRegistry::default()),
            top_n: 3,
        }
    }

    fn trained_churn() -> TrainedChurn {
        let x = array![
            [60.0, 1.0, 20.0, 20.0],
            [75.0, 2.0, 35.0, 17.5],
            [80.0, 1.0, 15.0, 15.0],
            [90.0, 1.0, 25.0, 25.0],
            [2.0, 6.0, 600.0, 100.0],
            [5.0, 8.0, 900.0, 112.5],
            [1.0, 5.0, 400.0, 80.0],
            [3.0, 7.0, 750.0, 107.1],
        ];
        let y = array![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let model = ChurnModel::fit(&x, &y, &TrainConfig::default()).unwrap();

        let scores = model.predict_batch(&x);
        let flags: Vec<bool> = y.iter().map(|v| *v > 0.5).collect();
        let evaluation = eval::evaluate(&scores, &flags).unwrap();
        TrainedChurn { model, evaluation }
    }

    fn loaded_state() -> AppState {
        let embeddings = ItemEmbeddings {
            product_ids: vec![1, 2, 3, 4],
            vectors: array![[1.0, 0.0], [0.95, 0.05], [0.2, 0.8], [0.0, 1.0]],
        };
        AppState {
            models: Arc::new(ModelRegistry {
                churn: Some(Artifact::new(trained_churn())),
                recsys_embeddings: Some(Artifact::new(embeddings)),
            }),
            top_n: 3,
        }
    }

    #[tokio::test]
    async fn health_reports_active_with_no_models() {
        let resp = health_check(State(empty_state())).await;
        assert_eq!(resp.0.status, "active");
        assert!(resp.0.models_loaded.is_empty());
    }

    #[tokio::test]
    async fn health_lists_loaded_models() {
        let resp = health_check(State(loaded_state())).await;
        assert_eq!(resp.0.models_loaded, vec!["churn", "recsys_embeddings"]);
    }

    #[tokio::test]
    async fn predict_churn_is_unavailable_without_a_model() {
        let req = ChurnRequest {
            recency_days: 1,
            frequency: 1,
            monetary_value: 10.0,
            aov: 10.0,
        };

        let err = predict_churn(State(empty_state()), Json(req)).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn predict_churn_returns_probability_and_consistent_label() {
        let req = ChurnRequest {
            recency_days: 80,
            frequency: 1,
            monetary_value: 20.0,
            aov: 20.0,
        };

        let resp = predict_churn(State(loaded_state()), Json(req)).await.unwrap();
        let body = resp.0;
        assert!((0.0..=1.0).contains(&body.churn_probability));
        assert_eq!(body.risk_label, risk_label(body.churn_probability));
    }

    #[tokio::test]
    async fn recommend_items_is_unavailable_without_embeddings() {
        let req = RecommendRequest {
            customer_id: 7,
            recent_item_id: 1,
        };

        let err = recommend_items(State(empty_state()), Json(req)).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn recommend_items_ranks_by_similarity() {
        let req = RecommendRequest {
            customer_id: 7,
            recent_item_id: 1,
        };

        let resp = recommend_items(State(loaded_state()), Json(req)).await.unwrap();
        let body = resp.0;
        assert_eq!(body.customer_id, 7);
        assert_eq!(body.recommended_product_ids.first(), Some(&2));
        assert!(!body.recommended_product_ids.contains(&1));
        assert_eq!(body.strategy, "item-to-item similarity");
    }

    #[tokio::test]
    async fn recommend_items_rejects_unknown_seed_item() {
        let req = RecommendRequest {
            customer_id: 7,
            recent_item_id: 999,
        };

        let err = recommend_items(State(loaded_state()), Json(req)).await.unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[test]
    fn risk_label_matches_fixed_thresholds() {
        assert_eq!(risk_label(0.75), "High");
        assert_eq!(risk_label(0.7), "Medium");
        assert_eq!(risk_label(0.5), "Medium");
        assert_eq!(risk_label(0.3), "Low");
        assert_eq!(risk_label(0.1), "Low");
    }

    #[test]
    fn probability_rounds_to_four_digits() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
        assert_eq!(round4(0.0), 0.0);
    }
}
