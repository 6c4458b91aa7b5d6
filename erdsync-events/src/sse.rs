//! Server-Sent Event payloads.
//!
//! Two streams use these: the async job stream (`connected`, then one
//! terminal `import-validation`) and the viewer stream (`erd-update`).

use crate::{payload::TablePayload, CodecError, SseFrame};
use erdsync_core::{DraftSchema, Point, Table};
use serde::{Deserialize, Serialize};

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_IMPORT_VALIDATION: &str = "import-validation";
pub const EVENT_ERD_UPDATE: &str = "erd-update";

// ============================================================================
// IMPORT VALIDATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: String,
    pub table: String,
    pub original: String,
    pub suggested: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    #[serde(default)]
    pub original_error: Option<String>,
    pub user_friendly_message: String,
    pub corrected_schema: DraftSchema,
    #[serde(default)]
    pub suggestions: Option<Vec<Suggestion>>,
}

/// Terminal result of an import validation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub request_id: String,
    pub status: ValidationStatus,
    pub has_errors: bool,
    pub processed_at: String,
    pub validation_result: ValidationResult,
}

// ============================================================================
// VIEWER UPDATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErdUpdateKind {
    TableMove,
    TableCreate,
    TableUpdate,
    TableDelete,
}

/// Raw `erd-update` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErdUpdate {
    pub event_type: ErdUpdateKind,
    #[serde(default)]
    pub table_key: Option<i64>,
    #[serde(default)]
    pub x_position: Option<f64>,
    #[serde(default)]
    pub y_position: Option<f64>,
    #[serde(default)]
    pub tables: Option<Vec<TablePayload>>,
}

/// What a viewer must do with an `erd-update`.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerUpdate {
    /// Position-only patch of one table.
    Move { table_key: i64, position: Point },
    /// Replace the whole table list.
    ReplaceTables(Vec<Table>),
}

impl ErdUpdate {
    pub fn into_viewer_update(self) -> Result<ViewerUpdate, CodecError> {
        match self.event_type {
            ErdUpdateKind::TableMove => match (self.table_key, self.x_position, self.y_position) {
                (Some(table_key), Some(x), Some(y)) => Ok(ViewerUpdate::Move {
                    table_key,
                    position: Point::new(x, y),
                }),
                _ => Err(CodecError::MissingField {
                    event: EVENT_ERD_UPDATE,
                    field: "tableKey/xPosition/yPosition",
                }),
            },
            ErdUpdateKind::TableCreate | ErdUpdateKind::TableUpdate | ErdUpdateKind::TableDelete => {
                let tables = self.tables.ok_or(CodecError::MissingField {
                    event: EVENT_ERD_UPDATE,
                    field: "tables",
                })?;
                Ok(ViewerUpdate::ReplaceTables(
                    tables.iter().map(TablePayload::to_table_with_nested).collect(),
                ))
            }
        }
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// Decoded SSE event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Connected,
    ImportValidation(ValidationResponse),
    ErdUpdate(ErdUpdate),
    /// Any other event name; ignored by both streams.
    Other(String),
}

impl SseEvent {
    /// Decode a frame by its event name.
    pub fn decode(frame: &SseFrame) -> Result<Self, CodecError> {
        match frame.event.as_str() {
            EVENT_CONNECTED => Ok(SseEvent::Connected),
            EVENT_IMPORT_VALIDATION => serde_json::from_str(&frame.data)
                .map(SseEvent::ImportValidation)
                .map_err(|e| CodecError::payload(EVENT_IMPORT_VALIDATION, e)),
            EVENT_ERD_UPDATE => serde_json::from_str(&frame.data)
                .map(SseEvent::ErdUpdate)
                .map_err(|e| CodecError::payload(EVENT_ERD_UPDATE, e)),
            other => Ok(SseEvent::Other(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
            id: None,
            retry: None,
        }
    }

    #[test]
    fn test_decode_validation() {
        let data = r#"{
            "requestId": "req-1", "status": "warning", "hasErrors": false,
            "processedAt": "2025-11-20T10:00:00",
            "validationResult": {
                "originalError": null,
                "userFriendlyMessage": "Fixed two columns",
                "correctedSchema": {"tables": [{"name": "users", "columns": []}]},
                "suggestions": [{"type": "rename", "table": "users", "original": "nm",
                                 "suggested": "name", "reason": "clarity"}]
            }
        }"#;
        let SseEvent::ImportValidation(response) =
            SseEvent::decode(&frame("import-validation", data)).unwrap()
        else {
            panic!("expected validation");
        };
        assert_eq!(response.status, ValidationStatus::Warning);
        assert_eq!(response.validation_result.corrected_schema.tables[0].name, "users");
        assert_eq!(
            response.validation_result.suggestions.unwrap()[0].kind,
            "rename"
        );
    }

    #[test]
    fn test_malformed_validation_is_error() {
        let err = SseEvent::decode(&frame("import-validation", "{\"requestId\": 1")).unwrap_err();
        assert!(matches!(err, CodecError::Payload { event: "import-validation", .. }));
    }

    #[test]
    fn test_viewer_move_and_replace() {
        let move_update: ErdUpdate = serde_json::from_str(
            r#"{"eventType": "TABLE_MOVE", "tableKey": 3, "xPosition": 1.5, "yPosition": 2.0}"#,
        )
        .unwrap();
        assert_eq!(
            move_update.into_viewer_update().unwrap(),
            ViewerUpdate::Move {
                table_key: 3,
                position: Point::new(1.5, 2.0)
            }
        );

        let replace: ErdUpdate = serde_json::from_str(
            r#"{"eventType": "TABLE_DELETE", "tables": [
                {"tableKey": 1, "logicalName": "Users", "physicalName": "users",
                 "xPosition": 0, "yPosition": 0}
            ]}"#,
        )
        .unwrap();
        let ViewerUpdate::ReplaceTables(tables) = replace.into_viewer_update().unwrap() else {
            panic!("expected replace");
        };
        assert_eq!(tables[0].id.as_str(), "table-1");
    }

    #[test]
    fn test_viewer_move_missing_coordinates() {
        let update: ErdUpdate =
            serde_json::from_str(r#"{"eventType": "TABLE_MOVE", "tableKey": 3}"#).unwrap();
        assert!(update.into_viewer_update().is_err());
    }

    #[test]
    fn test_unknown_event_passes_through() {
        assert_eq!(
            SseEvent::decode(&frame("ping", "")).unwrap(),
            SseEvent::Other("ping".into())
        );
    }
}
