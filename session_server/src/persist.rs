//! Saving and loading of datasets and trained models.
//!
//! Datasets are stored as JSON, `{"data": [{"xs": [..], "ys": [..] | "label"}]}`.
//! Loading also accepts `xs` and `ys` written as keyed objects such as
//! `{"x": 10, "y": 20}` or `{"label": "a"}`. Models are stored as bincode.
use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{Result, SessionError},
    model::TrainedModel,
    store::{SampleStore, Target},
};

const APP_DIR: &str = "sketch_trainer";

#[derive(Debug, Serialize)]
struct DatasetEntry {
    xs: Vec<f64>,
    ys: Target,
}

#[derive(Debug, Serialize)]
struct Dataset {
    data: Vec<DatasetEntry>,
}

/// One `xs` or `ys` field as found in a dataset file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Field {
    Values(Vec<f64>),
    Label(String),
    Keyed(Map<String, Value>),
}

#[derive(Debug, Deserialize)]
struct StoredEntry {
    xs: Field,
    ys: Field,
}

#[derive(Debug, Deserialize)]
struct StoredDataset {
    data: Vec<StoredEntry>,
}

impl Field {
    fn into_inputs(self) -> Result<Vec<f64>> {
        match self {
            Field::Values(values) => Ok(values),
            Field::Label(label) => Err(SessionError::Persist(format!(
                "expected numeric inputs, got label {label:?}"
            ))),
            Field::Keyed(map) => keyed_values(map)
                .into_iter()
                .map(|value| {
                    value.as_f64().ok_or_else(|| {
                        SessionError::Persist(format!("expected numeric input, got {value}"))
                    })
                })
                .collect(),
        }
    }

    fn into_target(self) -> Result<Target> {
        match self {
            Field::Values(values) => Ok(Target::Values(values)),
            Field::Label(label) => Ok(Target::Label(label)),
            Field::Keyed(map) => {
                let values = keyed_values(map);
                if let [Value::String(label)] = values.as_slice() {
                    return Ok(Target::Label(label.clone()));
                }
                values
                    .iter()
                    .map(|value| {
                        value.as_f64().ok_or_else(|| {
                            SessionError::Persist(format!("expected numeric target, got {value}"))
                        })
                    })
                    .collect::<Result<Vec<f64>>>()
                    .map(Target::Values)
            }
        }
    }
}

/// Values of a keyed object, by index when every key is one and in
/// document order otherwise.
fn keyed_values(map: Map<String, Value>) -> Vec<Value> {
    let indexed: Option<Vec<(usize, Value)>> = map
        .iter()
        .map(|(key, value)| key.parse().ok().map(|index| (index, value.clone())))
        .collect();
    match indexed {
        Some(mut indexed) => {
            indexed.sort_by_key(|(index, _)| *index);
            indexed.into_iter().map(|(_, value)| value).collect()
        }
        None => map.into_iter().map(|(_, value)| value).collect(),
    }
}

/// Default directory for saved datasets and models.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR))
}

pub fn dataset_to_json(store: &SampleStore) -> Result<String> {
    let dataset = Dataset {
        data: store
            .samples()
            .iter()
            .map(|sample| DatasetEntry {
                xs: sample.inputs.clone(),
                ys: sample.target.clone(),
            })
            .collect(),
    };
    Ok(serde_json::to_string(&dataset)?)
}

/// Parse a dataset, validating every entry as if it was appended by hand.
pub fn dataset_from_json(json: &str) -> Result<SampleStore> {
    let dataset: StoredDataset = serde_json::from_str(json)?;
    let mut store = SampleStore::new();
    for entry in dataset.data {
        store.append(entry.xs.into_inputs()?, entry.ys.into_target()?)?;
    }
    Ok(store)
}

pub fn save_dataset(store: &SampleStore, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    fs::write(path, dataset_to_json(store)?)?;
    log::info!("Saved {} samples to {}", store.size(), path.display());
    Ok(())
}

pub fn load_dataset(path: impl AsRef<Path>) -> Result<SampleStore> {
    let store = dataset_from_json(&fs::read_to_string(path.as_ref())?)?;
    log::info!(
        "Loaded {} samples from {}",
        store.size(),
        path.as_ref().display()
    );
    Ok(store)
}

pub fn model_to_bytes(model: &TrainedModel) -> Result<Vec<u8>> {
    Ok(bincode::serialize(model)?)
}

pub fn model_from_bytes(bytes: &[u8]) -> Result<TrainedModel> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn save_model(model: &TrainedModel, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    fs::write(path, model_to_bytes(model)?)?;
    log::info!("Saved model to {}", path.display());
    Ok(())
}

pub fn load_model(path: impl AsRef<Path>) -> Result<TrainedModel> {
    model_from_bytes(&fs::read(path)?)
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
