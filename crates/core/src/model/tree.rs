use anyhow::{bail, ensure, Context};
use std::collections::BTreeMap;
use std::str::FromStr;

const CATEGORICAL_MASK: u8 = 1;
const DEFAULT_LEFT_MASK: u8 = 2;
const ZERO_THRESHOLD: f64 = 1e-35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingType {
    None,
    Zero,
    NaN,
}

impl MissingType {
    fn from_decision_type(decision_type: u8) -> Self {
        match (decision_type >> 2) & 3 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }
}

/// One regression tree in LightGBM's flat array layout.
///
/// Internal nodes are indexed `0..num_leaves - 1`; a negative child `c` refers to leaf `!c`.
#[derive(Debug, Clone)]
pub(crate) struct Tree {
    num_leaves: usize,
    split_feature: Vec<usize>,
    threshold: Vec<f64>,
    decision_type: Vec<u8>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
    cat_boundaries: Vec<usize>,
    cat_threshold: Vec<u32>,
    linear: Option<Vec<LinearLeaf>>,
}

/// Leaf output of a tree trained with `linear_tree`: `constant + sum(coeff * x)`.
#[derive(Debug, Clone)]
struct LinearLeaf {
    constant: f64,
    terms: Vec<(usize, f64)>,
}

impl Tree {
    pub(crate) fn from_fields(fields: &BTreeMap<&str, &str>, num_features: usize) -> anyhow::Result<Self> {
        let num_leaves: usize = fields
            .get("num_leaves")
            .context("num_leaves is required")?
            .trim()
            .parse()
            .context("num_leaves must be an integer")?;
        ensure!(num_leaves >= 1, "num_leaves must be >= 1");

        let tree = Self {
            num_leaves,
            split_feature: parse_array(fields, "split_feature")?,
            threshold: parse_array(fields, "threshold")?,
            decision_type: parse_array(fields, "decision_type")?,
            left_child: parse_array(fields, "left_child")?,
            right_child: parse_array(fields, "right_child")?,
            leaf_value: parse_array(fields, "leaf_value")?,
            cat_boundaries: parse_array(fields, "cat_boundaries")?,
            cat_threshold: parse_array(fields, "cat_threshold")?,
            linear: parse_linear_leaves(fields, num_leaves, num_features)?,
        };
        tree.validate(num_features)?;
        Ok(tree)
    }

    fn num_internal(&self) -> usize {
        self.num_leaves - 1
    }

    fn validate(&self, num_features: usize) -> anyhow::Result<()> {
        ensure!(
            self.leaf_value.len() == self.num_leaves,
            "leaf_value has {} entries for {} leaves",
            self.leaf_value.len(),
            self.num_leaves
        );

        let internal = self.num_internal();
        for (name, len) in [
            ("split_feature", self.split_feature.len()),
            ("threshold", self.threshold.len()),
            ("decision_type", self.decision_type.len()),
            ("left_child", self.left_child.len()),
            ("right_child", self.right_child.len()),
        ] {
            ensure!(len == internal, "{name} has {len} entries for {internal} internal nodes");
        }

        for node in 0..internal {
            let feature = self.split_feature[node];
            ensure!(
                feature < num_features,
                "node {node} splits on feature {feature}, model has {num_features}"
            );
            if self.decision_type[node] & CATEGORICAL_MASK != 0 {
                let cat_idx = self.threshold[node];
                ensure!(
                    cat_idx >= 0.0 && (cat_idx as usize) + 1 < self.cat_boundaries.len(),
                    "node {node} references missing category set {cat_idx}"
                );
                let (start, end) = self.category_range(cat_idx as usize);
                ensure!(
                    start <= end && end <= self.cat_threshold.len(),
                    "node {node} category bitset {start}..{end} out of range"
                );
            }
            for child in [self.left_child[node], self.right_child[node]] {
                self.check_child(node, child)?;
            }
        }

        if internal > 0 {
            self.check_reachability()?;
        }
        Ok(())
    }

    fn check_child(&self, node: usize, child: i32) -> anyhow::Result<()> {
        if child >= 0 {
            ensure!(
                (child as usize) < self.num_internal(),
                "node {node} points at missing node {child}"
            );
        } else {
            ensure!(
                ((!child) as usize) < self.num_leaves,
                "node {node} points at missing leaf {}",
                !child
            );
        }
        Ok(())
    }

    // Every internal node must be reached exactly once from the root, so traversal terminates.
    fn check_reachability(&self) -> anyhow::Result<()> {
        let mut seen = vec![false; self.num_internal()];
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            if seen[node] {
                bail!("node {node} is reachable more than once");
            }
            seen[node] = true;
            for child in [self.left_child[node], self.right_child[node]] {
                if child >= 0 {
                    stack.push(child as usize);
                }
            }
        }
        if let Some(orphan) = seen.iter().position(|s| !s) {
            bail!("node {orphan} is unreachable from the root");
        }
        Ok(())
    }

    fn category_range(&self, cat_idx: usize) -> (usize, usize) {
        (self.cat_boundaries[cat_idx], self.cat_boundaries[cat_idx + 1])
    }

    pub(crate) fn predict(&self, row: &[f64]) -> f64 {
        let leaf = if self.num_leaves == 1 {
            0
        } else {
            let mut node: i32 = 0;
            while node >= 0 {
                node = self.decide(node as usize, row);
            }
            (!node) as usize
        };
        self.leaf_output(leaf, row)
    }

    // A linear leaf with a NaN input falls back to its constant leaf_value.
    fn leaf_output(&self, leaf: usize, row: &[f64]) -> f64 {
        let Some(linear) = &self.linear else {
            return self.leaf_value[leaf];
        };
        let leaf_model = &linear[leaf];
        let mut out = leaf_model.constant;
        for &(feature, coeff) in &leaf_model.terms {
            let x = row[feature];
            if x.is_nan() {
                return self.leaf_value[leaf];
            }
            out += coeff * x;
        }
        out
    }

    fn decide(&self, node: usize, row: &[f64]) -> i32 {
        let fval = row[self.split_feature[node]];
        if self.decision_type[node] & CATEGORICAL_MASK != 0 {
            self.categorical_decision(node, fval)
        } else {
            self.numerical_decision(node, fval)
        }
    }

    fn numerical_decision(&self, node: usize, mut fval: f64) -> i32 {
        let decision_type = self.decision_type[node];
        let missing = MissingType::from_decision_type(decision_type);
        if fval.is_nan() && missing != MissingType::NaN {
            fval = 0.0;
        }
        let is_missing = match missing {
            MissingType::Zero => (-ZERO_THRESHOLD..=ZERO_THRESHOLD).contains(&fval),
            MissingType::NaN => fval.is_nan(),
            MissingType::None => false,
        };
        if is_missing {
            return if decision_type & DEFAULT_LEFT_MASK != 0 {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
        }
        if fval <= self.threshold[node] {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }

    fn categorical_decision(&self, node: usize, fval: f64) -> i32 {
        if fval.is_nan() {
            return self.right_child[node];
        }
        let category = fval as i64;
        if category < 0 {
            return self.right_child[node];
        }
        let (start, end) = self.category_range(self.threshold[node] as usize);
        if in_bitset(&self.cat_threshold[start..end], category as usize) {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }
}

fn in_bitset(words: &[u32], pos: usize) -> bool {
    let word = pos / 32;
    word < words.len() && (words[word] >> (pos % 32)) & 1 == 1
}

fn parse_linear_leaves(
    fields: &BTreeMap<&str, &str>,
    num_leaves: usize,
    num_features: usize,
) -> anyhow::Result<Option<Vec<LinearLeaf>>> {
    match fields.get("is_linear").map(|v| v.trim()) {
        None | Some("0") => return Ok(None),
        Some("1") => {}
        Some(other) => bail!("is_linear: invalid value {other:?}"),
    }

    let constants: Vec<f64> = parse_array(fields, "leaf_const")?;
    let counts: Vec<usize> = parse_array(fields, "num_features")?;
    let features: Vec<usize> = parse_array(fields, "leaf_features")?;
    let coeffs: Vec<f64> = parse_array(fields, "leaf_coeff")?;

    ensure!(
        constants.len() == num_leaves,
        "leaf_const has {} entries for {num_leaves} leaves",
        constants.len()
    );
    ensure!(
        counts.len() == num_leaves,
        "num_features has {} entries for {num_leaves} leaves",
        counts.len()
    );
    let total: usize = counts.iter().sum();
    ensure!(
        features.len() == total && coeffs.len() == total,
        "linear leaves declare {total} terms, found {} features and {} coefficients",
        features.len(),
        coeffs.len()
    );
    if let Some(bad) = features.iter().find(|f| **f >= num_features) {
        bail!("linear leaf uses feature {bad}, model has {num_features}");
    }

    let mut pairs = features.into_iter().zip(coeffs);
    let leaves = constants
        .into_iter()
        .zip(counts)
        .map(|(constant, count)| LinearLeaf {
            constant,
            terms: pairs.by_ref().take(count).collect(),
        })
        .collect();
    Ok(Some(leaves))
}

fn parse_array<T>(fields: &BTreeMap<&str, &str>, key: &str) -> anyhow::Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = fields.get(key) else {
        return Ok(Vec::new());
    };
    raw.split_whitespace()
        .map(|tok| {
            tok.parse::<T>()
                .map_err(|e| anyhow::anyhow!("{key}: invalid value {tok:?}: {e}"))
        })
        .collect()
}
