//! Class index → human-readable diagnosis.

use super::ClassIndex;
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// The five cry causes the classifier was trained on, in class-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Diagnosis {
    #[serde(rename = "discomfort")]
    Discomfort,
    #[serde(rename = "tiredness")]
    Tiredness,
    #[serde(rename = "hunger")]
    Hunger,
    #[serde(rename = "belly pain")]
    BellyPain,
    #[serde(rename = "burping")]
    Burping,
}

impl Diagnosis {
    pub const ALL: [Diagnosis; 5] = [
        Diagnosis::Discomfort,
        Diagnosis::Tiredness,
        Diagnosis::Hunger,
        Diagnosis::BellyPain,
        Diagnosis::Burping,
    ];

    pub fn from_index(index: ClassIndex) -> Option<Self> {
        match index.0 {
            0 => Some(Diagnosis::Discomfort),
            1 => Some(Diagnosis::Tiredness),
            2 => Some(Diagnosis::Hunger),
            3 => Some(Diagnosis::BellyPain),
            4 => Some(Diagnosis::Burping),
            _ => None,
        }
    }

    pub fn index(&self) -> ClassIndex {
        ClassIndex(*self as i64)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Diagnosis::Discomfort => "discomfort",
            Diagnosis::Tiredness => "tiredness",
            Diagnosis::Hunger => "hunger",
            Diagnosis::BellyPain => "belly pain",
            Diagnosis::Burping => "burping",
        }
    }

    /// Sentence shown to parents.
    pub fn message(&self) -> String {
        format!("The pain is caused by {}.", self.label())
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How class indices outside the label table are handled.
///
/// ## Policies:
/// - **Strict**: unknown indices are a model integration defect and fail the run
/// - **TirednessFallback**: unknown indices are reported as "tiredness" with a warning,
///   which is what older deployments of this service did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    #[default]
    Strict,
    TirednessFallback,
}

impl LabelPolicy {
    pub fn resolve(&self, index: ClassIndex) -> PipelineResult<Diagnosis> {
        if let Some(diagnosis) = Diagnosis::from_index(index) {
            return Ok(diagnosis);
        }

        match self {
            LabelPolicy::Strict => Err(PipelineError::ModelInference(format!(
                "model produced class index {} which has no label",
                index
            ))),
            LabelPolicy::TirednessFallback => {
                warn!(class_index = %index, "unknown class index, falling back to tiredness");
                Ok(Diagnosis::Tiredness)
            }
        }
    }
}
