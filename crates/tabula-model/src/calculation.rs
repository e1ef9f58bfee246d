use serde::{Deserialize, Serialize};

use crate::dataset::DatasetId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationState {
    Pending,
    Ready,
    Failed,
}

impl CalculationState {
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationState::Pending => "pending",
            CalculationState::Ready => "ready",
            CalculationState::Failed => "failed",
        }
    }
}

/// A named derived column defined by a formula, optionally grouped for aggregation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calculation {
    pub dataset_id: DatasetId,
    pub name: String,
    pub formula: String,
    /// Key of the dimension column partitioning the rows, if grouped.
    pub group: Option<String>,
    /// Schema key of the materialized column.
    pub column: String,
    pub state: CalculationState,
}

impl Calculation {
    pub fn new(
        dataset_id: DatasetId,
        name: impl Into<String>,
        formula: impl Into<String>,
        group: Option<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            dataset_id,
            name: name.into(),
            formula: formula.into(),
            group,
            column: column.into(),
            state: CalculationState::Pending,
        }
    }

    /// Whether this calculation is identified by `(name, group)`.
    pub fn matches(&self, name: &str, group: Option<&str>) -> bool {
        self.name == name && self.group.as_deref() == group
    }

    pub fn is_ready(&self) -> bool {
        self.state == CalculationState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_includes_the_group() {
        let calc = Calculation::new(
            "ds".into(),
            "total",
            "sum(price)",
            Some("region".into()),
            "total",
        );
        assert!(calc.matches("total", Some("region")));
        assert!(!calc.matches("total", None));
        assert_eq!(calc.state, CalculationState::Pending);
    }
}
