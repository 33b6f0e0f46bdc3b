//! LightGBM text model support
//!
//! Reads boosters saved with LightGBM's `save_model()` (line-based
//! `key=value` format, one `Tree=N` block per tree) and scores binary
//! objectives. Only numerical splits are supported; categorical and linear
//! trees are rejected at parse time.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Lines;

use super::ModelError;

/// Threshold below which LightGBM treats a value as zero
const ZERO_THRESHOLD: f64 = 1e-35;

/// Missing value handling encoded in bits 2-3 of `decision_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingType {
    None,
    Zero,
    NaN,
}

/// Numerical split decision
#[derive(Debug, Clone, Copy)]
struct Decision {
    default_left: bool,
    missing: MissingType,
}

impl Decision {
    fn from_bits(value: i8) -> Result<Self, ModelError> {
        let v = value as u8;
        if v & 1 != 0 {
            return Err(ModelError::Booster(
                "categorical splits are not supported".to_string(),
            ));
        }

        let missing = match (v >> 2) & 3 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        };

        Ok(Self {
            default_left: v & 2 != 0,
            missing,
        })
    }
}

#[derive(Debug, Clone)]
struct Tree {
    split_feature: Vec<usize>,
    threshold: Vec<f64>,
    decision: Vec<Decision>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
}

impl Tree {
    fn predict(&self, row: &[f64]) -> f64 {
        if self.split_feature.is_empty() {
            return self.leaf_value.first().copied().unwrap_or(0.0);
        }

        let mut node: i32 = 0;
        while node >= 0 {
            let n = node as usize;
            let value = row.get(self.split_feature[n]).copied().unwrap_or(f64::NAN);
            node = if self.goes_left(n, value) {
                self.left_child[n]
            } else {
                self.right_child[n]
            };
        }

        self.leaf_value[(!node) as usize]
    }

    fn goes_left(&self, node: usize, value: f64) -> bool {
        let decision = self.decision[node];
        let mut value = value;

        if value.is_nan() && decision.missing != MissingType::NaN {
            value = 0.0;
        }

        let is_missing = match decision.missing {
            MissingType::Zero => value.abs() <= ZERO_THRESHOLD,
            MissingType::NaN => value.is_nan(),
            MissingType::None => false,
        };

        if is_missing {
            decision.default_left
        } else {
            value <= self.threshold[node]
        }
    }

    /// Every child index must point at an existing leaf or at an internal
    /// node numbered after its parent, so traversal always terminates.
    fn check_links(&self) -> Result<(), ModelError> {
        let splits = self.split_feature.len() as i32;
        let leaves = self.leaf_value.len() as i32;

        for (parent, (&left, &right)) in self.left_child.iter().zip(&self.right_child).enumerate() {
            for child in [left, right] {
                let valid = if child >= 0 {
                    child > parent as i32 && child < splits
                } else {
                    !child < leaves
                };
                if !valid {
                    return Err(ModelError::Booster(format!(
                        "invalid child index {} under node {}",
                        child, parent
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Parsed LightGBM binary classifier
#[derive(Debug, Clone)]
pub struct LightGbmModel {
    sigmoid: f64,
    average_output: bool,
    max_feature_idx: usize,
    trees: Vec<Tree>,
}

impl LightGbmModel {
    /// Cheap sniff used for format detection
    pub fn looks_like(content: &str) -> bool {
        let first = content.lines().next().unwrap_or("").trim();
        first == "tree" || content.contains("\nTree=")
    }

    pub fn parse(content: &str) -> Result<Self, ModelError> {
        let mut lines = content.lines().peekable();
        let header = read_block(&mut lines, true);

        let objective = header
            .get("objective")
            .ok_or_else(|| missing("objective"))?;
        let sigmoid = parse_binary_objective(objective)?;

        let num_class: usize = parse_field(&header, "num_class")?;
        if num_class != 1 {
            return Err(ModelError::Booster(format!(
                "expected a single-output binary model, got num_class={}",
                num_class
            )));
        }

        let max_feature_idx = parse_field(&header, "max_feature_idx")?;
        let average_output = header.contains_key("average_output");

        let mut trees = Vec::new();
        while let Some(line) = lines.next() {
            if line.starts_with("Tree=") {
                let block = read_block(&mut lines, false);
                trees.push(parse_tree(&block)?);
            } else if line.starts_with("end of trees") {
                break;
            }
        }

        if trees.is_empty() {
            return Err(ModelError::Booster("model contains no trees".to_string()));
        }

        Ok(Self {
            sigmoid,
            average_output,
            max_feature_idx,
            trees,
        })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_features(&self) -> usize {
        self.max_feature_idx + 1
    }

    /// Sum of leaf outputs before the sigmoid
    pub fn raw_score(&self, row: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        if self.average_output {
            sum / self.trees.len() as f64
        } else {
            sum
        }
    }

    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, ModelError> {
        if row.len() < self.num_features() {
            return Err(ModelError::FeatureCount {
                expected: self.num_features(),
                actual: row.len(),
            });
        }
        Ok(1.0 / (1.0 + (-self.sigmoid * self.raw_score(row)).exp()))
    }
}

/// Collect `key=value` lines until a blank line or the next tree marker.
///
/// Bare flag lines (`average_output`) are stored with an empty value.
fn read_block(lines: &mut Peekable<Lines<'_>>, header: bool) -> HashMap<String, String> {
    let mut kv = HashMap::new();

    while let Some(line) = lines.peek() {
        let line = line.trim();
        if line.starts_with("Tree=") || line.starts_with("end of trees") {
            break;
        }
        lines.next();

        if line.is_empty() {
            if header && kv.is_empty() {
                continue;
            }
            break;
        }

        match line.split_once('=') {
            Some((k, v)) => {
                kv.insert(k.to_string(), v.to_string());
            }
            None => {
                kv.insert(line.to_string(), String::new());
            }
        }
    }

    kv
}

fn parse_binary_objective(objective: &str) -> Result<f64, ModelError> {
    let mut parts = objective.split_whitespace();
    match parts.next() {
        Some("binary") => Ok(parts
            .find_map(|p| p.strip_prefix("sigmoid:").and_then(|v| v.parse().ok()))
            .unwrap_or(1.0)),
        other => Err(ModelError::Booster(format!(
            "unsupported objective {:?}, expected binary",
            other.unwrap_or("")
        ))),
    }
}

fn parse_tree(kv: &HashMap<String, String>) -> Result<Tree, ModelError> {
    let num_leaves: usize = parse_field(kv, "num_leaves")?;

    if kv
        .get("is_linear")
        .map(|v| v.trim() != "0")
        .unwrap_or(false)
    {
        return Err(ModelError::Booster("linear trees are not supported".to_string()));
    }

    let leaf_value: Vec<f64> = parse_array(kv, "leaf_value")?;
    if leaf_value.len() != num_leaves {
        return Err(size_mismatch("leaf_value", num_leaves, leaf_value.len()));
    }

    if num_leaves <= 1 {
        return Ok(Tree {
            split_feature: Vec::new(),
            threshold: Vec::new(),
            decision: Vec::new(),
            left_child: Vec::new(),
            right_child: Vec::new(),
            leaf_value,
        });
    }

    let splits = num_leaves - 1;
    let split_feature: Vec<usize> = parse_array(kv, "split_feature")?;
    let threshold: Vec<f64> = parse_array(kv, "threshold")?;
    let left_child: Vec<i32> = parse_array(kv, "left_child")?;
    let right_child: Vec<i32> = parse_array(kv, "right_child")?;
    let decision_bits: Vec<i8> = if kv.contains_key("decision_type") {
        parse_array(kv, "decision_type")?
    } else {
        vec![0; splits]
    };

    for (field, len) in [
        ("split_feature", split_feature.len()),
        ("threshold", threshold.len()),
        ("left_child", left_child.len()),
        ("right_child", right_child.len()),
        ("decision_type", decision_bits.len()),
    ] {
        if len != splits {
            return Err(size_mismatch(field, splits, len));
        }
    }

    let decision = decision_bits
        .into_iter()
        .map(Decision::from_bits)
        .collect::<Result<Vec<_>, _>>()?;

    let tree = Tree {
        split_feature,
        threshold,
        decision,
        left_child,
        right_child,
        leaf_value,
    };
    tree.check_links()?;
    Ok(tree)
}

fn parse_field<T: std::str::FromStr>(
    kv: &HashMap<String, String>,
    field: &'static str,
) -> Result<T, ModelError> {
    let raw = kv.get(field).ok_or_else(|| missing(field))?;
    raw.trim()
        .parse()
        .map_err(|_| ModelError::Booster(format!("invalid value for {}: {}", field, raw)))
}

fn parse_array<T: std::str::FromStr>(
    kv: &HashMap<String, String>,
    field: &'static str,
) -> Result<Vec<T>, ModelError> {
    let raw = kv.get(field).ok_or_else(|| missing(field))?;
    raw.split_whitespace()
        .map(|v| {
            v.parse()
                .map_err(|_| ModelError::Booster(format!("invalid value in {}: {}", field, v)))
        })
        .collect()
}

fn missing(field: &str) -> ModelError {
    ModelError::Booster(format!("missing required field: {}", field))
}

fn size_mismatch(field: &str, expected: usize, actual: usize) -> ModelError {
    ModelError::Booster(format!(
        "array size mismatch for {}: expected {}, got {}",
        field, expected, actual
    ))
}
