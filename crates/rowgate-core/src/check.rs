//! Field expectations for insert/update checks

use serde::Serialize;
use serde_json::Value as JsonValue;

use rowgate_common::{Mismatch, Operation, RowGateError};

/// Compare the fields of `row` with the values `expected` declares.
///
/// Fields the row leaves absent or null are not compared, so partial update
/// values only have to agree on what they set. Any disagreement fails with
/// `PolicyCheckFailed` listing every mismatched field.
pub fn expect_fields<T: Serialize + ?Sized>(
    expected: &JsonValue,
    row: &T,
    table: &str,
    operation: Operation,
) -> Result<(), RowGateError> {
    let row = serde_json::to_value(row).map_err(|e| RowGateError::PolicyCheckFailed {
        table: table.to_string(),
        operation,
        mismatches: Vec::new(),
        reason: Some(format!("row could not be serialized: {e}")),
    })?;

    let (Some(expected), Some(actual)) = (expected.as_object(), row.as_object()) else {
        return Err(RowGateError::PolicyCheckFailed {
            table: table.to_string(),
            operation,
            mismatches: Vec::new(),
            reason: Some("expected values and row must both be objects".to_string()),
        });
    };

    let mismatches: Vec<Mismatch> = expected
        .iter()
        .filter_map(|(field, want)| match actual.get(field) {
            None | Some(JsonValue::Null) => None,
            Some(got) if got == want => None,
            Some(got) => Some(Mismatch {
                field: field.clone(),
                expected: want.clone(),
                actual: got.clone(),
            }),
        })
        .collect();

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(RowGateError::PolicyCheckFailed {
            table: table.to_string(),
            operation,
            mismatches,
            reason: None,
        })
    }
}
