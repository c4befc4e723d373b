use super::tree::Tree;
use anyhow::{bail, ensure, Context};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Output transform applied to the summed raw score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Objective {
    Identity,
    Exp,
    Sigmoid(f64),
    SignedSquare,
}

impl Objective {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().unwrap_or("regression");
        let params: Vec<&str> = tokens.collect();

        match name {
            "regression" | "regression_l2" | "l2" | "mse" | "mean_squared_error" | "rmse"
            | "regression_l1" | "l1" | "mae" | "huber" | "fair" | "quantile" | "mape"
            | "custom" => {
                if params.contains(&"sqrt") {
                    Ok(Objective::SignedSquare)
                } else {
                    Ok(Objective::Identity)
                }
            }
            "poisson" | "gamma" | "tweedie" => Ok(Objective::Exp),
            "binary" => {
                let sigmoid = params
                    .iter()
                    .find_map(|p| p.strip_prefix("sigmoid:"))
                    .map(|s| s.parse::<f64>())
                    .transpose()
                    .context("binary objective has an invalid sigmoid parameter")?
                    .unwrap_or(1.0);
                Ok(Objective::Sigmoid(sigmoid))
            }
            "cross_entropy" | "xentropy" => Ok(Objective::Sigmoid(1.0)),
            other => bail!("unsupported objective {other:?}"),
        }
    }

    pub fn transform(self, raw: f64) -> f64 {
        match self {
            Objective::Identity => raw,
            Objective::Exp => raw.exp(),
            Objective::Sigmoid(s) => 1.0 / (1.0 + (-s * raw).exp()),
            Objective::SignedSquare => raw.signum() * raw * raw,
        }
    }
}

/// A gradient-boosted tree ensemble read from LightGBM's text model format.
#[derive(Debug, Clone)]
pub struct Booster {
    feature_names: Vec<String>,
    objective: Objective,
    average_output: bool,
    trees: Vec<Tree>,
    pandas_categorical: Option<Vec<Vec<Value>>>,
}

impl Booster {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model file {}", path.display()))?;
        Self::from_model_str(&text)
            .with_context(|| format!("failed to parse model file {}", path.display()))
    }

    pub fn from_model_str(text: &str) -> anyhow::Result<Self> {
        let lines: Vec<&str> = text.lines().map(str::trim).collect();
        let mut i = 0;

        let mut header = BTreeMap::<&str, &str>::new();
        let mut flags = BTreeSet::<&str>::new();
        while i < lines.len() && !lines[i].starts_with("Tree=") && lines[i] != "end of trees" {
            match lines[i].split_once('=') {
                Some((k, v)) => {
                    header.insert(k, v);
                }
                None if !lines[i].is_empty() => {
                    flags.insert(lines[i]);
                }
                None => {}
            }
            i += 1;
        }

        let feature_names: Vec<String> = header
            .get("feature_names")
            .context("model header has no feature_names")?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        ensure!(!feature_names.is_empty(), "model declares no features");

        if let Some(max_idx) = header.get("max_feature_idx") {
            let max_idx: usize = max_idx.parse().context("max_feature_idx must be an integer")?;
            ensure!(
                max_idx + 1 == feature_names.len(),
                "max_feature_idx={max_idx} disagrees with {} feature names",
                feature_names.len()
            );
        }

        for key in ["num_class", "num_tree_per_iteration"] {
            if let Some(v) = header.get(key) {
                ensure!(*v == "1", "only single-output models are supported ({key}={v})");
            }
        }

        let objective = Objective::parse(header.get("objective").copied().unwrap_or("regression"))?;

        let mut trees = Vec::new();
        while i < lines.len() {
            if lines[i] == "end of trees" {
                i += 1;
                break;
            }
            let Some(tree_idx) = lines[i].strip_prefix("Tree=") else {
                i += 1;
                continue;
            };
            i += 1;

            let mut fields = BTreeMap::<&str, &str>::new();
            while i < lines.len()
                && !lines[i].is_empty()
                && !lines[i].starts_with("Tree=")
                && lines[i] != "end of trees"
            {
                if let Some((k, v)) = lines[i].split_once('=') {
                    fields.insert(k, v);
                }
                i += 1;
            }
            let tree = Tree::from_fields(&fields, feature_names.len())
                .with_context(|| format!("invalid Tree={tree_idx}"))?;
            trees.push(tree);
        }
        ensure!(!trees.is_empty(), "model contains no trees");

        let pandas_categorical = match lines[i..]
            .iter()
            .find_map(|l| l.strip_prefix("pandas_categorical:"))
        {
            Some(json) => serde_json::from_str::<Option<Vec<Vec<Value>>>>(json)
                .context("pandas_categorical is not a list of category lists")?,
            None => None,
        };

        Ok(Self {
            feature_names,
            objective,
            average_output: flags.contains("average_output"),
            trees,
            pandas_categorical,
        })
    }

    /// Feature names in the column order the model was trained on.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Category lists recorded at training time, one per categorical column in column order.
    pub fn pandas_categorical(&self) -> Option<&[Vec<Value>]> {
        self.pandas_categorical.as_deref()
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> anyhow::Result<Vec<f64>> {
        rows.iter()
            .enumerate()
            .map(|(idx, row)| {
                ensure!(
                    row.len() == self.feature_names.len(),
                    "row {idx} has {} features, model expects {}",
                    row.len(),
                    self.feature_names.len()
                );
                Ok(self.predict_row(row))
            })
            .collect()
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut raw: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        if self.average_output {
            raw /= self.trees.len() as f64;
        }
        self.objective.transform(raw)
    }
}
