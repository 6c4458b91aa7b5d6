//! REST client for the ERD backend.
//!
//! Every response body is wrapped as `{"result": …}`. A 401 from any
//! endpoint sends the user to the login route through the injected
//! [`Navigator`] and surfaces as [`ApiClientError::Unauthorized`].

use crate::config::ErdsyncConfig;
use crate::navigation::{Navigator, Route};
use async_trait::async_trait;
use erdsync_core::schema::parse_data_type;
use erdsync_core::{
    Cardinality, Column, ColumnField, CorrelationId, ReferentialAction, RelationKind, RemoteKey,
    SqlDialect, Table, TypeArg, VersionSchema,
};
use erdsync_events::{ColumnPayload, ProjectErd, RelationPayload, TablePayload};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Session expired, login required")]
    Unauthorized,
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ApiClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

// ============================================================================
// REQUEST AND RESPONSE BODIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableRequest {
    pub project_key: i64,
    pub logical_name: String,
    pub physical_name: String,
    pub x_position: f64,
    pub y_position: f64,
    pub color_hex: String,
    pub client_request_id: CorrelationId,
}

impl CreateTableRequest {
    pub fn from_table(project_key: i64, table: &Table) -> Self {
        let position = table.position.rounded();
        Self {
            project_key,
            logical_name: table.logical_name.clone(),
            physical_name: table.physical_name.clone(),
            x_position: position.x,
            y_position: position.y,
            color_hex: table.color.hex().to_string(),
            client_request_id: table.correlation.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateColumnRequest {
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub client_request_id: CorrelationId,
}

impl CreateColumnRequest {
    pub fn from_column(column: &Column) -> Self {
        Self {
            is_primary_key: column.is_primary_key,
            is_foreign_key: column.is_foreign_key,
            client_request_id: column.correlation.unwrap_or_default(),
        }
    }
}

/// Partial column update. Only the fields present are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateColumnRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_detail: Option<Vec<TypeArg>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_nullable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_primary_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_foreign_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl UpdateColumnRequest {
    /// Request carrying the current value of each listed field.
    ///
    /// The type and its arguments always travel together: touching either
    /// sends both, split the way the backend stores them.
    pub fn from_column(column: &Column, fields: &[ColumnField]) -> Self {
        let mut request = Self::default();
        for field in fields {
            match field {
                ColumnField::LogicalName => request.logical_name = Some(column.logical_name.clone()),
                ColumnField::PhysicalName => {
                    request.physical_name = Some(column.physical_name.clone())
                }
                ColumnField::DataType | ColumnField::DataDetail => {
                    let (data_type, args) =
                        parse_data_type(&column.data_type, column.data_detail.as_deref());
                    request.data_type = Some(data_type);
                    request.data_detail = Some(args);
                }
                ColumnField::Nullable => request.is_nullable = Some(column.nullable),
                ColumnField::PrimaryKey => request.is_primary_key = Some(column.is_primary_key),
                ColumnField::ForeignKey => request.is_foreign_key = Some(column.is_foreign_key),
                ColumnField::DefaultValue => {
                    request.default_value = Some(column.default_value.clone())
                }
                ColumnField::Comment => request.comment = Some(column.comment.clone()),
            }
        }
        request
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRelationRequest {
    pub project_key: i64,
    pub from_table_key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_column_key: Option<i64>,
    pub to_table_key: i64,
    pub relation_type: String,
    pub constraint_name: String,
    pub on_delete_action: ReferentialAction,
    pub on_update_action: ReferentialAction,
    pub client_request_id: CorrelationId,
}

/// Endpoints of a relation, by remote key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationEndpoints {
    pub from_table: RemoteKey,
    pub from_column: Option<RemoteKey>,
    pub to_table: RemoteKey,
}

impl CreateRelationRequest {
    pub fn new(
        project_key: i64,
        endpoints: RelationEndpoints,
        kind: RelationKind,
        cardinality: Cardinality,
        correlation: CorrelationId,
    ) -> Self {
        let relation_type = cardinality.relation_type();
        let (on_delete_action, on_update_action) = relation_type.constraint_actions();
        Self {
            project_key,
            from_table_key: endpoints.from_table.get(),
            from_column_key: endpoints.from_column.map(|key| key.get()),
            to_table_key: endpoints.to_table.get(),
            relation_type: relation_type.as_wire_str().to_string(),
            constraint_name: kind.constraint_label().to_string(),
            on_delete_action,
            on_update_action,
            client_request_id: correlation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVersionRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema_data: VersionSchema,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub version_key: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct BackendError {
    code: String,
    message: String,
}

/// Unwrap a `{"result": …}` body.
pub fn unwrap_result<T: DeserializeOwned>(body: &str) -> Result<T, ApiClientError> {
    let envelope: ResultEnvelope<T> = serde_json::from_str(body)?;
    Ok(envelope.result)
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<BackendError>(body) {
        Ok(error) => format!("{}: {}", error.code, error.message),
        Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
    }
}

// ============================================================================
// BACKEND TRAIT
// ============================================================================

/// Backend of record for one project.
#[async_trait]
pub trait ErdBackend: Send + Sync {
    async fn create_table(
        &self,
        project_key: i64,
        request: &CreateTableRequest,
    ) -> Result<TablePayload, ApiClientError>;

    async fn get_project(&self, project_key: i64) -> Result<ProjectErd, ApiClientError>;

    async fn delete_table(&self, table_key: RemoteKey) -> Result<(), ApiClientError>;

    async fn create_column(
        &self,
        table_key: RemoteKey,
        request: &CreateColumnRequest,
    ) -> Result<ColumnPayload, ApiClientError>;

    async fn update_column(
        &self,
        column_key: RemoteKey,
        request: &UpdateColumnRequest,
    ) -> Result<ColumnPayload, ApiClientError>;

    async fn delete_column(&self, column_key: RemoteKey) -> Result<(), ApiClientError>;

    async fn create_relation(
        &self,
        project_key: i64,
        request: &CreateRelationRequest,
    ) -> Result<RelationPayload, ApiClientError>;

    async fn export_sql(
        &self,
        project_key: i64,
        dialect: SqlDialect,
    ) -> Result<String, ApiClientError>;

    async fn create_version(
        &self,
        project_key: i64,
        request: &CreateVersionRequest,
    ) -> Result<VersionSummary, ApiClientError>;

    async fn heartbeat(&self, table_key: RemoteKey, email: &str) -> Result<(), ApiClientError>;
}

// ============================================================================
// HTTP IMPLEMENTATION
// ============================================================================

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
    navigator: Arc<dyn Navigator>,
}

impl RestClient {
    pub fn new(
        base_url: &str,
        access_token: &str,
        timeout: Duration,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: build_auth_headers(access_token)?,
            navigator,
        })
    }

    pub fn from_config(
        config: &ErdsyncConfig,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiClientError> {
        Self::new(
            &config.api_base_url,
            &config.auth.access_token,
            config.request_timeout(),
            navigator,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T, Q>(&self, path: &str, query: Option<&Q>) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let mut request = self.client.get(self.url(path)).headers(self.auth_header.clone());
        if let Some(query) = query {
            request = request.query(query);
        }
        let response = request.send().await?;
        self.parse_response(response).await
    }

    async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(self.url(path))
            .headers(self.auth_header.clone())
            .json(body)
            .send()
            .await?;
        self.parse_response(response).await
    }

    async fn patch_json<T, B>(&self, path: &str, body: &B) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .patch(self.url(path))
            .headers(self.auth_header.clone())
            .json(body)
            .send()
            .await?;
        self.parse_response(response).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiClientError> {
        let response = self
            .client
            .delete(self.url(path))
            .headers(self.auth_header.clone())
            .send()
            .await?;
        self.expect_success(response).await
    }

    /// Reject 401 by routing to login.
    fn check_authorized(&self, status: StatusCode) -> Result<(), ApiClientError> {
        if status == StatusCode::UNAUTHORIZED {
            warn!("Backend rejected the session token");
            self.navigator.navigate(Route::Login);
            return Err(ApiClientError::Unauthorized);
        }
        Ok(())
    }

    async fn parse_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiClientError> {
        let status = response.status();
        self.check_authorized(status)?;
        let text = response.text().await?;
        if status.is_success() {
            unwrap_result(&text)
        } else {
            Err(ApiClientError::InvalidResponse(error_message(status, &text)))
        }
    }

    /// Status-only check for endpoints whose body carries nothing we use.
    async fn expect_success(&self, response: reqwest::Response) -> Result<(), ApiClientError> {
        let status = response.status();
        self.check_authorized(status)?;
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await?;
        Err(ApiClientError::InvalidResponse(error_message(status, &text)))
    }
}

#[async_trait]
impl ErdBackend for RestClient {
    async fn create_table(
        &self,
        project_key: i64,
        request: &CreateTableRequest,
    ) -> Result<TablePayload, ApiClientError> {
        let path = format!("/api/v1/erd/projects/{}/tables", project_key);
        self.post_json(&path, request).await
    }

    async fn get_project(&self, project_key: i64) -> Result<ProjectErd, ApiClientError> {
        let path = format!("/api/v1/erd/projects/{}", project_key);
        self.get_json::<ProjectErd, ()>(&path, None).await
    }

    async fn delete_table(&self, table_key: RemoteKey) -> Result<(), ApiClientError> {
        self.delete(&format!("/api/v1/erd/tables/{}", table_key)).await
    }

    async fn create_column(
        &self,
        table_key: RemoteKey,
        request: &CreateColumnRequest,
    ) -> Result<ColumnPayload, ApiClientError> {
        let path = format!("/api/v1/erd/tables/{}/columns", table_key);
        self.post_json(&path, request).await
    }

    async fn update_column(
        &self,
        column_key: RemoteKey,
        request: &UpdateColumnRequest,
    ) -> Result<ColumnPayload, ApiClientError> {
        let path = format!("/api/v1/erd/columns/{}", column_key);
        self.patch_json(&path, request).await
    }

    async fn delete_column(&self, column_key: RemoteKey) -> Result<(), ApiClientError> {
        self.delete(&format!("/api/v1/erd/columns/{}", column_key)).await
    }

    async fn create_relation(
        &self,
        project_key: i64,
        request: &CreateRelationRequest,
    ) -> Result<RelationPayload, ApiClientError> {
        let path = format!("/api/v1/erd/projects/{}/relations", project_key);
        self.post_json(&path, request).await
    }

    async fn export_sql(
        &self,
        project_key: i64,
        dialect: SqlDialect,
    ) -> Result<String, ApiClientError> {
        let path = format!("/api/v1/erd/projects/{}/export/sql", project_key);
        self.get_json(&path, Some(&[("dialect", dialect.as_query_str())]))
            .await
    }

    async fn create_version(
        &self,
        project_key: i64,
        request: &CreateVersionRequest,
    ) -> Result<VersionSummary, ApiClientError> {
        let path = format!("/api/v1/projects/{}/versions", project_key);
        self.post_json(&path, request).await
    }

    async fn heartbeat(&self, table_key: RemoteKey, email: &str) -> Result<(), ApiClientError> {
        let response = self
            .client
            .post(self.url(&format!("/api/v1/heartbeat/{}", table_key)))
            .headers(self.auth_header.clone())
            .query(&[("email", email)])
            .send()
            .await?;
        self.expect_success(response).await?;
        debug!(table_key = %table_key, "Heartbeat sent");
        Ok(())
    }
}

pub(crate) fn build_auth_headers(access_token: &str) -> Result<HeaderMap, ApiClientError> {
    let mut headers = HeaderMap::new();
    let value = format!("Bearer {}", access_token);
    headers.insert(
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&value).map_err(|e| ApiClientError::Config(e.to_string()))?,
    );
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use erdsync_core::ColumnKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNavigator {
        routes: Mutex<Vec<Route>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, route: Route) {
            self.routes.lock().unwrap().push(route);
        }
    }

    #[test]
    fn test_unauthorized_routes_to_login() {
        let navigator = Arc::new(RecordingNavigator::default());
        let client = RestClient::new(
            "http://localhost:8080/",
            "token",
            Duration::from_secs(1),
            navigator.clone(),
        )
        .unwrap();
        assert_eq!(client.url("/api"), "http://localhost:8080/api");
        assert!(client.check_authorized(StatusCode::OK).is_ok());
        assert!(client.check_authorized(StatusCode::FORBIDDEN).is_ok());
        assert!(matches!(
            client.check_authorized(StatusCode::UNAUTHORIZED),
            Err(ApiClientError::Unauthorized)
        ));
        assert_eq!(*navigator.routes.lock().unwrap(), vec![Route::Login]);
    }

    #[test]
    fn test_result_envelope() {
        let sql: String = unwrap_result(r#"{"result": "CREATE TABLE users ();"}"#).unwrap();
        assert_eq!(sql, "CREATE TABLE users ();");
        assert!(unwrap_result::<String>(r#"{"data": "x"}"#).is_err());
    }

    #[test]
    fn test_error_message_prefers_backend_shape() {
        let status = StatusCode::CONFLICT;
        assert_eq!(
            error_message(status, r#"{"code": "TABLE_LOCKED", "message": "locked"}"#),
            "TABLE_LOCKED: locked"
        );
        assert_eq!(error_message(status, "nope"), "HTTP 409: nope");
    }

    #[test]
    fn test_update_request_sends_only_dirty_fields() {
        let mut column = Column::provisional(ColumnKind::Regular);
        column.logical_name = "Email".to_string();
        column.data_type = "VARCHAR(255)".to_string();

        let request = UpdateColumnRequest::from_column(&column, &[ColumnField::LogicalName]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"logicalName": "Email"}));

        let request = UpdateColumnRequest::from_column(&column, &[ColumnField::DataType]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"dataType": "VARCHAR", "dataDetail": [255]})
        );
    }

    #[test]
    fn test_relation_request_shape() {
        let request = CreateRelationRequest::new(
            7,
            RelationEndpoints {
                from_table: RemoteKey::new(1),
                from_column: Some(RemoteKey::new(10)),
                to_table: RemoteKey::new(2),
            },
            RelationKind::Identifying,
            Cardinality::ZeroOrMany,
            CorrelationId::new(),
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["relationType"], "OPTIONAL_ONE_TO_MANY");
        assert_eq!(json["constraintName"], "IDENTIFYING");
        assert_eq!(json["onDeleteAction"], "SET NULL");
        assert_eq!(json["fromColumnKey"], 10);
    }

    #[test]
    fn test_create_table_request_rounds_position() {
        let mut table = Table::provisional("Users");
        table.position = erdsync_core::Point::new(10.126, 4.0);
        let request = CreateTableRequest::from_table(7, &table);
        assert_eq!(request.x_position, 10.13);
        assert_eq!(request.physical_name, "Untitled");
        assert_eq!(request.color_hex, table.color.hex());
        assert_eq!(Some(request.client_request_id), table.correlation);
    }
}
