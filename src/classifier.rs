use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::ClassifierConfig;
use crate::features::{FeatureVector, FEATURE_COUNT};
use crate::stats::clamp01;

/// Score reported when the model cannot say anything
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Risk level assumed for a cluster the export has no level for
const DEFAULT_RISK_LEVEL: f64 = 0.5;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model blob is not valid JSON or has an unknown shape: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("model has no centroids")]
    NoCentroids,

    #[error("{what} has {got} dimensions, expected {expected}")]
    DimensionMismatch { what: String, expected: usize, got: usize },

    #[error("{0} contains a non-finite value")]
    NonFinite(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Centroid {
    pub id: String,
    pub vector: [f64; FEATURE_COUNT],
    pub risk_level: f64,
}

/// Trained centroids plus the standardization they were fit under
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterModel {
    centroids: Vec<Centroid>,
    mean: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelBlob {
    Canonical {
        centroids: Vec<CentroidBlob>,
        scaler: ScalerBlob,
    },
    Document {
        centroids: Vec<CentroidBlob>,
        scaler_mean: Vec<f64>,
        scaler_scale: Vec<f64>,
    },
    Export {
        centroids: Vec<Vec<f64>>,
        #[serde(default)]
        risk_levels: BTreeMap<String, f64>,
        scaler_mean: Vec<f64>,
        scaler_scale: Vec<f64>,
    },
}

#[derive(Deserialize)]
struct CentroidBlob {
    #[serde(alias = "cluster_id")]
    id: Value,
    #[serde(alias = "centroid")]
    vector: Vec<f64>,
    #[serde(rename = "riskLevel", alias = "risk_level")]
    risk_level: f64,
}

#[derive(Deserialize)]
struct ScalerBlob {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl ClusterModel {
    pub fn new(centroids: Vec<Centroid>, mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, ModelError> {
        if centroids.is_empty() {
            return Err(ModelError::NoCentroids);
        }
        for c in &centroids {
            if c.vector.iter().any(|v| !v.is_finite()) || !c.risk_level.is_finite() {
                return Err(ModelError::NonFinite(format!("centroid {}", c.id)));
            }
        }
        let mean = to_array("scaler mean", mean)?;
        if mean.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("scaler mean".into()));
        }
        // zero-variance features are fit with unit scale
        let scale = to_array("scaler scale", scale)?
            .map(|s| if s.is_finite() && s > 0.0 { s } else { 1.0 });

        let centroids = centroids
            .into_iter()
            .map(|c| Centroid { risk_level: clamp01(c.risk_level), ..c })
            .collect();

        Ok(Self { centroids, mean, scale })
    }

    pub fn from_json_str(s: &str) -> Result<Self, ModelError> {
        Self::from_value(serde_json::from_str(s)?)
    }

    /// Accepts the canonical `{centroids, scaler}` blob, the store document
    /// layout and the training pipeline's local export.
    pub fn from_value(value: Value) -> Result<Self, ModelError> {
        let (centroids, mean, scale) = match serde_json::from_value::<ModelBlob>(value)? {
            ModelBlob::Canonical { centroids, scaler } => {
                (convert_centroids(centroids)?, scaler.mean, scaler.scale)
            }
            ModelBlob::Document { centroids, scaler_mean, scaler_scale } => {
                (convert_centroids(centroids)?, scaler_mean, scaler_scale)
            }
            ModelBlob::Export { centroids, risk_levels, scaler_mean, scaler_scale } => {
                let centroids = centroids
                    .into_iter()
                    .enumerate()
                    .map(|(i, vector)| {
                        let id = i.to_string();
                        Ok(Centroid {
                            vector: to_array(&format!("centroid {}", id), vector)?,
                            risk_level: risk_levels.get(&id).copied().unwrap_or(DEFAULT_RISK_LEVEL),
                            id,
                        })
                    })
                    .collect::<Result<Vec<_>, ModelError>>()?;
                (centroids, scaler_mean, scaler_scale)
            }
        };
        Self::new(centroids, mean, scale)
    }

    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }

    fn standardize(&self, features: &FeatureVector) -> [f64; FEATURE_COUNT] {
        let v = features.as_array();
        std::array::from_fn(|i| (v[i] - self.mean[i]) / self.scale[i])
    }
}

fn convert_centroids(blobs: Vec<CentroidBlob>) -> Result<Vec<Centroid>, ModelError> {
    blobs
        .into_iter()
        .map(|b| {
            let id = match b.id {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(Centroid {
                vector: to_array(&format!("centroid {}", id), b.vector)?,
                risk_level: b.risk_level,
                id,
            })
        })
        .collect()
}

fn to_array(what: &str, values: Vec<f64>) -> Result<[f64; FEATURE_COUNT], ModelError> {
    let got = values.len();
    values.try_into().map_err(|_| ModelError::DimensionMismatch {
        what: what.to_string(),
        expected: FEATURE_COUNT,
        got,
    })
}

/// Outcome of a nearest-centroid lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub score: f64,
    pub confidence: f64,
    pub cluster_id: Option<String>,
    pub distance: Option<f64>,
}

impl Classification {
    /// Explicit "unknown": neutral score with zero confidence
    pub fn unknown() -> Self {
        Self { score: NEUTRAL_SCORE, confidence: 0.0, cluster_id: None, distance: None }
    }
}

/// Nearest-centroid classifier. The model is held behind an `Arc` and
/// replaced wholesale on reload, so a classification always runs against
/// one consistent model.
pub struct ClusterClassifier {
    model: Option<Arc<ClusterModel>>,
    max_distance: f64,
}

impl ClusterClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self { model: None, max_distance: config.max_distance }
    }

    /// Replace the active model.
    pub fn load(&mut self, model: ClusterModel) {
        tracing::info!(centroids = model.centroids.len(), "Cluster model loaded");
        self.model = Some(Arc::new(model));
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<Arc<ClusterModel>> {
        self.model.clone()
    }

    pub fn classify(&self, features: &FeatureVector) -> Classification {
        let Some(model) = self.model.clone() else {
            return Classification::unknown();
        };

        let z = model.standardize(features);
        let nearest = model
            .centroids
            .iter()
            .map(|c| (c, euclidean(&z, &c.vector)))
            .filter(|(_, d)| d.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let Some((centroid, distance)) = nearest else {
            return Classification::unknown();
        };

        let confidence = clamp01(1.0 - distance / self.max_distance);
        let score = clamp01(centroid.risk_level * confidence + NEUTRAL_SCORE * (1.0 - confidence));

        Classification {
            score,
            confidence,
            cluster_id: Some(centroid.id.clone()),
            distance: Some(distance),
        }
    }
}

fn euclidean(a: &[f64; FEATURE_COUNT], b: &[f64; FEATURE_COUNT]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit_model() -> ClusterModel {
        ClusterModel::from_value(json!({
            "centroids": [
                {"id": "calm", "vector": vec![0.0; 10], "riskLevel": 0.1},
                {"id": "agitated", "vector": [3.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], "riskLevel": 0.9}
            ],
            "scaler": {"mean": vec![0.0; 10], "scale": vec![1.0; 10]}
        }))
        .unwrap()
    }

    fn classifier() -> ClusterClassifier {
        ClusterClassifier::new(&ClassifierConfig::default())
    }

    #[test]
    fn unloaded_classifier_is_neutral() {
        let result = classifier().classify(&FeatureVector::default());
        assert_eq!(result.score, 0.5);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result, Classification::unknown());
    }

    #[test]
    fn exact_match_takes_centroid_risk() {
        let mut c = classifier();
        c.load(unit_model());
        let result = c.classify(&FeatureVector::default());
        assert_eq!(result.cluster_id.as_deref(), Some("calm"));
        assert_eq!(result.confidence, 1.0);
        assert!((result.score - 0.1).abs() < 1e-12);
    }

    #[test]
    fn distance_blends_toward_neutral() {
        let mut c = classifier();
        c.load(unit_model());
        let mut values = [0.0; FEATURE_COUNT];
        values[0] = 3.0;
        values[1] = 3.0;
        values[2] = 5.0;
        let result = c.classify(&FeatureVector::from_values(values));
        assert_eq!(result.cluster_id.as_deref(), Some("agitated"));
        // distance 5 of max 10
        assert!((result.confidence - 0.5).abs() < 1e-12);
        assert!((result.score - (0.9 * 0.5 + 0.5 * 0.5)).abs() < 1e-12);
    }

    #[test]
    fn far_points_are_neutral() {
        let mut c = classifier();
        c.load(unit_model());
        let result = c.classify(&FeatureVector::from_values([100.0; FEATURE_COUNT]));
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.score, 0.5);
    }

    #[test]
    fn standardization_applied() {
        let model = ClusterModel::from_value(json!({
            "centroids": [{"id": 0, "vector": vec![1.0; 10], "riskLevel": 0.8}],
            "scaler": {"mean": vec![10.0; 10], "scale": vec![2.0; 10]}
        }))
        .unwrap();
        let mut c = classifier();
        c.load(model);
        let result = c.classify(&FeatureVector::from_values([12.0; FEATURE_COUNT]));
        assert_eq!(result.cluster_id.as_deref(), Some("0"));
        assert_eq!(result.distance, Some(0.0));
    }

    #[test]
    fn zero_scale_treated_as_unit() {
        let model = ClusterModel::new(
            vec![Centroid { id: "a".into(), vector: [0.0; 10], risk_level: 0.2 }],
            vec![0.0; 10],
            vec![0.0; 10],
        )
        .unwrap();
        let mut c = classifier();
        c.load(model);
        let result = c.classify(&FeatureVector::from_values([1.0; FEATURE_COUNT]));
        assert!((result.distance.unwrap() - 10f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn store_document_layout_accepted() {
        let model = ClusterModel::from_value(json!({
            "centroids": [{"cluster_id": 2, "centroid": vec![0.5; 10], "risk_level": 0.7}],
            "scaler_mean": vec![0.0; 10],
            "scaler_scale": vec![1.0; 10]
        }))
        .unwrap();
        assert_eq!(model.centroids()[0].id, "2");
        assert_eq!(model.centroids()[0].risk_level, 0.7);
    }

    #[test]
    fn training_export_layout_accepted() {
        let model = ClusterModel::from_json_str(
            r#"{
                "n_clusters": 2,
                "centroids": [[0,0,0,0,0,0,0,0,0,0], [1,1,1,1,1,1,1,1,1,1]],
                "risk_levels": {"0": 0.2},
                "scaler_mean": [0,0,0,0,0,0,0,0,0,0],
                "scaler_scale": [1,1,1,1,1,1,1,1,1,1],
                "feature_names": []
            }"#,
        )
        .unwrap();
        assert_eq!(model.centroids().len(), 2);
        assert_eq!(model.centroids()[0].risk_level, 0.2);
        assert_eq!(model.centroids()[1].risk_level, 0.5);
    }

    #[test]
    fn bad_models_rejected() {
        let short = json!({
            "centroids": [{"id": 1, "vector": vec![0.0; 9], "riskLevel": 0.5}],
            "scaler": {"mean": vec![0.0; 10], "scale": vec![1.0; 10]}
        });
        assert!(matches!(
            ClusterModel::from_value(short),
            Err(ModelError::DimensionMismatch { got: 9, .. })
        ));

        let empty = json!({"centroids": [], "scaler": {"mean": vec![0.0; 10], "scale": vec![1.0; 10]}});
        assert!(matches!(ClusterModel::from_value(empty), Err(ModelError::NoCentroids)));

        assert!(matches!(ClusterModel::from_json_str("not json"), Err(ModelError::Malformed(_))));
        assert!(matches!(ClusterModel::from_value(json!({"weights": 1})), Err(ModelError::Malformed(_))));
    }

    #[test]
    fn reload_replaces_model_wholesale() {
        let mut c = classifier();
        c.load(unit_model());
        let held = c.model().unwrap();
        let replacement = ClusterModel::from_value(json!({
            "centroids": [{"id": "only", "vector": vec![0.0; 10], "riskLevel": 1.0}],
            "scaler": {"mean": vec![0.0; 10], "scale": vec![1.0; 10]}
        }))
        .unwrap();
        c.load(replacement);
        assert_eq!(held.centroids().len(), 2);
        assert_eq!(c.classify(&FeatureVector::default()).score, 1.0);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let mut c = classifier();
        c.load(unit_model());
        for k in -50..50 {
            let v = FeatureVector::from_values([k as f64 * 0.37; FEATURE_COUNT]);
            let result = c.classify(&v);
            assert!((0.0..=1.0).contains(&result.score));
            assert!((0.0..=1.0).contains(&result.confidence));
        }
    }
}
