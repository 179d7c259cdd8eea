use crate::fulcra::FulcraApiError;
use crate::mcp::error_codes;
use crate::mcp::types::{
    ErrorObject, ListResourcesParams, ListResourcesResult, ReadResourceParams, ReadResourceResult,
    ResourceContents, ResourceDefinition,
};
use crate::server::{Server, ToolError};
use crate::session_tokens::SessionId;
use tracing::instrument;

pub const METRICS_CATALOG_URI: &str = "fulcra://metrics/catalog";
pub const USER_INFO_URI: &str = "fulcra://user/info";

const JSON_MIME_TYPE: &str = "application/json";

pub fn get_resource_definitions() -> Vec<ResourceDefinition> {
    vec![
        ResourceDefinition {
            uri: METRICS_CATALOG_URI.to_string(),
            name: "Metrics catalog".to_string(),
            description: Some("Metrics available for time series and sample queries.".to_string()),
            mime_type: Some(JSON_MIME_TYPE.to_string()),
        },
        ResourceDefinition {
            uri: USER_INFO_URI.to_string(),
            name: "User info".to_string(),
            description: Some("Profile of the connected Fulcra user.".to_string()),
            mime_type: Some(JSON_MIME_TYPE.to_string()),
        },
    ]
}

pub async fn handle_resources_list(
    _params: ListResourcesParams,
) -> Result<ListResourcesResult, ErrorObject> {
    Ok(ListResourcesResult {
        resources: get_resource_definitions(),
    })
}

#[instrument(skip(server, session), fields(uri = %params.uri))]
pub async fn handle_resources_read(
    params: ReadResourceParams,
    server: &Server,
    session: Option<&SessionId>,
) -> Result<ReadResourceResult, ErrorObject> {
    let uri = params.uri.as_str();
    if uri != METRICS_CATALOG_URI && uri != USER_INFO_URI {
        return Err(ErrorObject::new(
            error_codes::RESOURCE_NOT_FOUND,
            format!("Resource not found: {uri}"),
        ));
    }

    let session = session.ok_or_else(|| ToolError::SessionRequired.to_error_object())?;
    let token = server
        .access_token(Some(session))
        .await
        .map_err(|e| e.to_error_object())?;

    let fetched = if uri == METRICS_CATALOG_URI {
        server.fulcra().metrics_catalog(&token).await
    } else {
        server.fulcra().user_info(&token).await
    };
    let value = fetched.map_err(|e| match e {
        FulcraApiError::Unauthorized => server.not_authorized(session).to_error_object(),
        other => ToolError::Upstream(other).to_error_object(),
    })?;

    let text = serde_json::to_string_pretty(&value).map_err(|e| {
        ErrorObject::new(error_codes::INTERNAL_ERROR, format!("Failed to serialize resource: {e}"))
    })?;

    Ok(ReadResourceResult {
        contents: vec![ResourceContents {
            uri: params.uri.clone(),
            mime_type: Some(JSON_MIME_TYPE.to_string()),
            text,
        }],
    })
}
