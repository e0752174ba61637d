//! Training data loading

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::control::dispatch::ACTION_COUNT;
use crate::control::snapshot::{Features, FEATURE_COUNT};

use super::PolicyError;

/// Feature rows paired with their action labels
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub features: Vec<Features>,
    pub labels: Vec<usize>,
}

impl Dataset {
    /// Load the states and actions CSV files
    pub fn load(states: &Path, actions: &Path, has_headers: bool) -> Result<Self, PolicyError> {
        let states_file = File::open(states).map_err(|e| PolicyError::Read {
            dataset: "states",
            source: e.into(),
        })?;
        let actions_file = File::open(actions).map_err(|e| PolicyError::Read {
            dataset: "actions",
            source: e.into(),
        })?;
        Self::from_readers(states_file, actions_file, has_headers)
    }

    /// Parse both datasets from in-memory readers
    pub fn from_readers<S: Read, A: Read>(
        states: S,
        actions: A,
        has_headers: bool,
    ) -> Result<Self, PolicyError> {
        Self::collect(
            builder(has_headers).from_reader(states),
            builder(has_headers).from_reader(actions),
        )
    }

    fn collect<S: Read, A: Read>(
        mut states: csv::Reader<S>,
        mut actions: csv::Reader<A>,
    ) -> Result<Self, PolicyError> {
        let mut features = Vec::new();
        for (idx, record) in states.records().enumerate() {
            let record = record.map_err(|source| PolicyError::Read {
                dataset: "states",
                source,
            })?;
            features.push(parse_feature_row(&record, idx + 1)?);
        }

        let mut labels = Vec::new();
        for (idx, record) in actions.records().enumerate() {
            let record = record.map_err(|source| PolicyError::Read {
                dataset: "actions",
                source,
            })?;
            labels.push(parse_label_row(&record, idx + 1)?);
        }

        if features.len() != labels.len() {
            return Err(PolicyError::RowCountMismatch {
                states: features.len(),
                actions: labels.len(),
            });
        }
        if features.is_empty() {
            return Err(PolicyError::EmptyDataset);
        }

        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn builder(has_headers: bool) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.has_headers(has_headers).trim(Trim::All).flexible(true);
    builder
}

/// Parse one cell. `NaN` and infinities parse as floats but cannot be split on.
fn parse_value(dataset: &'static str, field: &str, row: usize) -> Result<f64, PolicyError> {
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(PolicyError::BadValue {
            dataset,
            row,
            value: field.to_string(),
        }),
    }
}

fn parse_feature_row(record: &StringRecord, row: usize) -> Result<Features, PolicyError> {
    if record.len() != FEATURE_COUNT {
        return Err(PolicyError::RowWidth {
            dataset: "states",
            row,
            len: record.len(),
            expected: FEATURE_COUNT,
        });
    }
    let mut features = [0.0; FEATURE_COUNT];
    for (slot, field) in features.iter_mut().zip(record.iter()) {
        *slot = parse_value("states", field, row)?;
    }
    Ok(features)
}

fn parse_label_row(record: &StringRecord, row: usize) -> Result<usize, PolicyError> {
    if record.len() != 1 {
        return Err(PolicyError::RowWidth {
            dataset: "actions",
            row,
            len: record.len(),
            expected: 1,
        });
    }
    let value = parse_value("actions", &record[0], row)?;
    if value.fract() != 0.0 || !(0.0..ACTION_COUNT as f64).contains(&value) {
        return Err(PolicyError::BadLabel { row, value });
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(states: &str, actions: &str) -> Result<Dataset, PolicyError> {
        Dataset::from_readers(states.as_bytes(), actions.as_bytes(), false)
    }

    #[test]
    fn parses_rows_in_order() {
        let dataset = load(
            "1,0,0,0,0,0,0,1,1\n0,0,0,0,0,0,2,2,0\n",
            "0\n5\n",
        )
        .unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.features[1][6], 2.0);
        assert_eq!(dataset.features[1][7], 2.0);
        assert_eq!(dataset.labels, vec![0, 5]);
    }

    #[test]
    fn header_rows_are_skipped_when_configured() {
        let dataset = Dataset::from_readers(
            "m0,m1,m2,m3,m4,m5,m6,robot,arm\n0,0,0,0,0,0,0,1,1\n".as_bytes(),
            "action\n3\n".as_bytes(),
            true,
        )
        .unwrap();
        assert_eq!(dataset.labels, vec![3]);
    }

    #[test]
    fn accepts_float_formatted_labels() {
        let dataset = load("0,0,0,0,0,0,0,1,1\n", "4.0\n").unwrap();
        assert_eq!(dataset.labels, vec![4]);
    }

    #[test]
    fn short_feature_row_is_rejected() {
        let err = load("0,0,0,0,0,0,0,1,1\n0,0,0\n", "0\n1\n").unwrap_err();
        assert!(matches!(
            err,
            PolicyError::RowWidth {
                dataset: "states",
                row: 2,
                len: 3,
                expected: 9
            }
        ));
    }

    #[test]
    fn out_of_range_label_is_rejected() {
        let err = load("0,0,0,0,0,0,0,1,1\n", "6\n").unwrap_err();
        assert!(matches!(err, PolicyError::BadLabel { row: 1, .. }));
        let err = load("0,0,0,0,0,0,0,1,1\n", "2.5\n").unwrap_err();
        assert!(matches!(err, PolicyError::BadLabel { row: 1, .. }));
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let err = load("0,0,x,0,0,0,0,1,1\n", "0\n").unwrap_err();
        assert!(matches!(err, PolicyError::BadValue { dataset: "states", row: 1, .. }));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        for cell in ["NaN", "inf", "-inf", "1e309"] {
            let states = format!("0,0,0,0,0,0,0,1,{cell}\n");
            let err = load(&states, "0\n").unwrap_err();
            assert!(
                matches!(err, PolicyError::BadValue { dataset: "states", row: 1, ref value } if value == cell),
                "{cell} accepted"
            );
        }
        let err = load("0,0,0,0,0,0,0,1,1\n", "NaN\n").unwrap_err();
        assert!(matches!(err, PolicyError::BadValue { dataset: "actions", .. }));
    }

    #[test]
    fn huge_finite_values_load_and_train() {
        use crate::policy::tree::{DecisionTree, TreeParams};

        let dataset = load(
            "1e308,0,0,0,0,0,0,1,1\n1.5e308,0,0,0,0,0,0,1,1\n",
            "0\n1\n",
        )
        .unwrap();
        assert_eq!(dataset.features[1][0], 1.5e308);

        let tree = DecisionTree::train(&dataset, &TreeParams::default()).unwrap();
        assert_eq!(tree.classify(&dataset.features[0]), 0);
        assert_eq!(tree.classify(&dataset.features[1]), 1);
    }

    #[test]
    fn row_counts_must_match() {
        let err = load("0,0,0,0,0,0,0,1,1\n", "0\n1\n").unwrap_err();
        assert!(matches!(
            err,
            PolicyError::RowCountMismatch {
                states: 1,
                actions: 2
            }
        ));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        assert!(matches!(load("", ""), Err(PolicyError::EmptyDataset)));
    }
}
