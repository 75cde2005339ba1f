use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

pub const CHURN_MODEL_FILE: &str = "churn_model.json";
pub const RECSYS_MODEL_FILE: &str = "recsys_model.json";
pub const ITEM_EMBEDDINGS_FILE: &str = "item_embeddings.json";

/// Serialized model plus the metadata identifying its training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact<T> {
    pub id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub payload: T,
}

impl<T> Artifact<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            trained_at: Utc::now(),
            payload,
        }
    }
}

/// Writes through a sibling temp file and renames into place; a crashed run
/// never leaves a torn file under the final name.
pub fn save<T: Serialize>(dir: &Path, file: &str, artifact: &Artifact<T>) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create model dir {}", dir.display()))?;
    let path = dir.join(file);
    let tmp = dir.join(format!("{file}.tmp"));

    let json = serde_json::to_vec_pretty(artifact).context("serialize artifact")?;
    fs::write(&tmp, &json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, &path).with_context(|| format!("rename {} into place", tmp.display()))?;

    tracing::info!(path = %path.display(), id = %artifact.id, "artifact written");
    Ok(())
}

pub fn load<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Artifact<T>> {
    let path = dir.join(file);
    let bytes = fs::read(&path).with_context(|| format!("read artifact {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse artifact {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        values: Vec<f64>,
    }

    fn payload() -> Payload {
        Payload {
            name: "m".into(),
            values: vec![1.0, 2.5],
        }
    }

    #[test]
    fn save_then_load_restores_the_payload() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact::new(payload());
        save(dir.path(), "model.json", &artifact).unwrap();

        let loaded: Artifact<Payload> = load(dir.path(), "model.json").unwrap();
        assert_eq!(loaded.id, artifact.id);
        assert_eq!(loaded.trained_at, artifact.trained_at);
        assert_eq!(loaded.payload, artifact.payload);
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        save(dir.path(), "model.json", &Artifact::new(payload())).unwrap();

        assert!(dir.path().join("model.json").exists());
        assert!(!dir.path().join("model.json.tmp").exists());
    }

    #[test]
    fn rewriting_an_artifact_replaces_it_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let first = Artifact::new(payload());
        save(dir.path(), "model.json", &first).unwrap();

        let second = Artifact::new(Payload {
            name: "m2".into(),
            values: vec![9.0],
        });
        save(dir.path(), "model.json", &second).unwrap();

        let loaded: Artifact<Payload> = load(dir.path(), "model.json").unwrap();
        assert_eq!(loaded.id, second.id);
        assert_eq!(loaded.payload.name, "m2");
    }

    #[test]
    fn load_from_missing_directory_fails() {
        let err = load::<Payload>(Path::new("does/not/exist"), "model.json").unwrap_err();
        assert!(err.to_string().contains("read artifact"));
    }
}
