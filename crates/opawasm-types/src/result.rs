use serde::{Deserialize, Serialize};

/// One row of an evaluation result set: `{"result": <value>}`.
///
/// A raw evaluation returns a JSON array of these rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvaluationResult<T> {
    pub result: T,
}

impl<T> PolicyEvaluationResult<T> {
    pub fn new(result: T) -> Self {
        Self { result }
    }

    pub fn into_inner(self) -> T {
        self.result
    }
}
