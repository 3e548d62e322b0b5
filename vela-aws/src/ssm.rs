//! SSM document controller
//!
//! Manages Systems Manager documents including cross-account sharing.
//! Permission changes go through the Share permission type in batches, the
//! API caps a single call at twenty account ids. Content updates create a
//! new document version and promote it to the default.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ssm::Client;
use aws_sdk_ssm::types::{
    AttachmentsSource, AttachmentsSourceKey, DocumentDescription, DocumentFormat as SdkFormat,
    DocumentPermissionType, DocumentType, ResourceTypeForTagging, Tag,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use vela_core::error::{ProviderError, ProviderResult, ResourceId};
use vela_core::tags::{TagDiff, TagMap};
use vela_core::timeouts::OperationTimeouts;
use vela_core::waiter::{self, Observation, StatusPoller, WaitConfig};

const KIND: &str = "ssm_document";

const STATUS_CREATING: &str = "Creating";
const STATUS_ACTIVE: &str = "Active";
const STATUS_UPDATING: &str = "Updating";
const STATUS_DELETING: &str = "Deleting";
/// Synthetic status reported once the API stops returning the document.
const STATUS_DELETED: &str = "Deleted";

/// Hard API limit on account ids per permission modification call.
const PERMISSIONS_BATCH_LIMIT: usize = 20;

pub const DEFAULT_TIMEOUTS: OperationTimeouts =
    OperationTimeouts::uniform(Duration::from_secs(2 * 60));

static NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_\-.]{3,128}$").unwrap());

static VERSION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_\-.]{1,128}$").unwrap());

static TARGET_TYPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/[\w.\-:/]*$").unwrap());

/// Schema 1.x documents predate in-place updates.
static SCHEMA_V1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^1\.[0-9]").unwrap());

// =========================================================================
// Configuration
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    #[default]
    Json,
    Yaml,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Command,
    Policy,
    Automation,
    Session,
    Package,
    ApplicationConfiguration,
    ApplicationConfigurationSchema,
    DeploymentStrategy,
    ChangeCalendar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKey {
    SourceUrl,
    S3FileUrl,
    AttachmentReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSourceConfig {
    pub key: AttachmentKey,
    #[serde(default)]
    pub name: Option<String>,
    pub values: Vec<String>,
}

/// Accounts the document is shared with through the Share permission type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct DocumentPermissionsConfig {
    pub account_ids: BTreeSet<String>,
}

/// Desired configuration of one SSM document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentConfig {
    pub name: String,
    pub content: String,
    pub kind: DocumentKind,
    #[serde(default)]
    pub format: DocumentFormat,
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub version_name: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentSourceConfig>,
    #[serde(default)]
    pub permissions: Option<DocumentPermissionsConfig>,
    #[serde(default)]
    pub tags: TagMap,
}

impl DocumentConfig {
    pub fn validate(&self) -> ProviderResult<()> {
        if !NAME.is_match(&self.name) {
            return Err(ProviderError::new(
                "document name must be 3 to 128 characters of [a-zA-Z0-9_.-]",
            ));
        }
        if self.content.is_empty() {
            return Err(
                ProviderError::new("document content must not be empty").for_resource(self.id())
            );
        }
        if self.format == DocumentFormat::Json
            && serde_json::from_str::<serde_json::Value>(&self.content).is_err()
        {
            return Err(ProviderError::new("document content is not valid JSON")
                .for_resource(self.id()));
        }
        if let Some(version_name) = &self.version_name
            && !VERSION_NAME.is_match(version_name)
        {
            return Err(ProviderError::new(
                "version name must be 1 to 128 characters of [a-zA-Z0-9_.-]",
            )
            .for_resource(self.id()));
        }
        if let Some(target_type) = &self.target_type
            && (target_type.len() > 200 || !TARGET_TYPE.is_match(target_type))
        {
            return Err(ProviderError::new(
                "target type must start with / and contain only [a-zA-Z0-9_.-:/]",
            )
            .for_resource(self.id()));
        }
        if let Some(permissions) = &self.permissions
            && permissions.account_ids.is_empty()
        {
            return Err(ProviderError::new(
                "permissions require at least one account id",
            )
            .for_resource(self.id()));
        }
        for attachment in &self.attachments {
            if attachment.values.is_empty() {
                return Err(ProviderError::new(
                    "attachment sources require at least one value",
                )
                .for_resource(self.id()));
            }
        }
        Ok(())
    }

    fn id(&self) -> ResourceId {
        ResourceId::new(KIND, self.name.as_str())
    }

    fn shared_account_ids(&self) -> BTreeSet<String> {
        self.permissions
            .as_ref()
            .map(|p| p.account_ids.clone())
            .unwrap_or_default()
    }
}

// =========================================================================
// Observed state
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentParameterState {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub default_value: Option<String>,
}

/// Remote state of a document as last observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentState {
    pub name: String,
    pub content: Option<String>,
    pub format: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub created_date: Option<String>,
    pub default_version: Option<String>,
    pub document_version: Option<String>,
    pub latest_version: Option<String>,
    pub schema_version: Option<String>,
    pub hash: Option<String>,
    pub hash_type: Option<String>,
    pub owner: Option<String>,
    pub platform_types: Vec<String>,
    pub parameters: Vec<DocumentParameterState>,
    pub target_type: Option<String>,
    pub version_name: Option<String>,
    /// Attachment sources as last applied. DescribeDocument does not return
    /// them, so they are seeded from the configuration after each mutation
    /// and stay empty on import.
    pub attachments: Vec<AttachmentSourceConfig>,
    pub shared_account_ids: BTreeSet<String>,
    pub tags: TagMap,
}

// =========================================================================
// Controller
// =========================================================================

/// Controller for SSM documents.
pub struct Documents {
    client: Client,
    timeouts: OperationTimeouts,
}

impl Documents {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeouts: DEFAULT_TIMEOUTS,
        }
    }

    pub fn with_timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Builds a controller from the default credential chain for a region.
    pub async fn from_env(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config))
    }

    /// Creates the document, shares it with the configured accounts and
    /// waits until it reports Active.
    pub async fn create(&self, config: &DocumentConfig) -> ProviderResult<DocumentState> {
        config.validate()?;
        let id = config.id();
        log::debug!("creating document {}", config.name);

        let mut request = self
            .client
            .create_document()
            .name(config.name.as_str())
            .content(config.content.as_str())
            .document_type(expand_kind(config.kind))
            .document_format(expand_format(config.format));
        if let Some(target_type) = &config.target_type {
            request = request.target_type(target_type.as_str());
        }
        if let Some(version_name) = &config.version_name {
            request = request.version_name(version_name.as_str());
        }
        for attachment in &config.attachments {
            request = request.attachments(expand_attachment(attachment));
        }
        if !config.tags.is_empty() {
            request = request.set_tags(Some(expand_tags(&config.tags)?));
        }

        let created = request
            .send()
            .await
            .map_err(|e| ProviderError::request("create", &id, e))?;
        let name = created
            .document_description()
            .and_then(|d| d.name())
            .unwrap_or(config.name.as_str())
            .to_string();

        let desired = config.shared_account_ids();
        if !desired.is_empty() {
            self.modify_permissions(&name, &id, &desired, &BTreeSet::new())
                .await?;
        }

        self.wait_for_active(&name, &id, self.timeouts.create, "create")
            .await?;
        let mut state = self.read_existing(&name, "create").await?;
        state.attachments = config.attachments.clone();
        Ok(state)
    }

    /// Reads the document by name; `None` when it does not exist.
    pub async fn read(&self, name: &str) -> ProviderResult<Option<DocumentState>> {
        let id = ResourceId::new(KIND, name);
        let description = match self.client.describe_document().name(name).send().await {
            Ok(output) => match output.document {
                Some(description) => description,
                None => return Ok(None),
            },
            Err(err) => {
                let service = err.into_service_error();
                if service.is_invalid_document() {
                    return Ok(None);
                }
                return Err(ProviderError::request("read", &id, service));
            }
        };

        let content = self
            .client
            .get_document()
            .name(name)
            .set_document_format(description.document_format().cloned())
            .send()
            .await
            .map_err(|e| ProviderError::request("read", &id, e))?
            .content()
            .map(str::to_string);

        let shared_account_ids = self.read_permissions(name, &id).await?;
        Ok(Some(flatten_document(
            &description,
            content,
            shared_account_ids,
        )))
    }

    /// Seeds state from an externally supplied document name.
    pub async fn import(&self, name: &str) -> ProviderResult<DocumentState> {
        self.read(name).await?.ok_or_else(|| {
            ProviderError::new("no document with this name exists")
                .for_resource(ResourceId::new(KIND, name))
                .during("import")
        })
    }

    /// Reconciles tags and sharing, then pushes changed content as a new
    /// document version and promotes it to the default.
    pub async fn update(
        &self,
        current: &DocumentState,
        config: &DocumentConfig,
    ) -> ProviderResult<DocumentState> {
        config.validate()?;
        let id = config.id();

        let diff = TagDiff::between(&current.tags, &config.tags);
        if !diff.is_empty() {
            self.reconcile_tags(&config.name, &id, &diff).await?;
        }

        let desired = config.shared_account_ids();
        let to_add: BTreeSet<String> = desired
            .difference(&current.shared_account_ids)
            .cloned()
            .collect();
        let to_remove: BTreeSet<String> = current
            .shared_account_ids
            .difference(&desired)
            .cloned()
            .collect();
        if !to_add.is_empty() || !to_remove.is_empty() {
            self.modify_permissions(&config.name, &id, &to_add, &to_remove)
                .await?;
        }

        let content_changed = needs_content_update(current, config);
        let frozen_schema = current
            .schema_version
            .as_deref()
            .is_some_and(|v| SCHEMA_V1.is_match(v));
        if content_changed && !frozen_schema {
            self.update_content(&id, config).await?;
            self.wait_for_active(&config.name, &id, self.timeouts.update, "update")
                .await?;
        } else if content_changed {
            log::warn!("[{id}] schema 1.x documents cannot be updated in place, skipping");
        }

        let mut state = self.read_existing(&config.name, "update").await?;
        state.attachments = config.attachments.clone();
        Ok(state)
    }

    /// Revokes all sharing, deletes the document and waits until the API
    /// stops returning it.
    pub async fn delete(&self, name: &str) -> ProviderResult<()> {
        let id = ResourceId::new(KIND, name);

        // Shared documents cannot be deleted; revoke whatever the API still
        // reports rather than trusting recorded state.
        let shared = self.read_permissions(name, &id).await?;
        if !shared.is_empty() {
            self.modify_permissions(name, &id, &BTreeSet::new(), &shared)
                .await?;
        }

        log::debug!("deleting document {name}");
        self.client
            .delete_document()
            .name(name)
            .send()
            .await
            .map_err(|e| ProviderError::request("delete", &id, e))?;

        let poller = DeleteRefresh {
            client: &self.client,
            name,
        };
        let config = WaitConfig::new(
            &[STATUS_DELETING, STATUS_ACTIVE],
            &[STATUS_DELETED],
            self.timeouts.delete,
        );
        waiter::wait(&poller, &config)
            .await
            .map_err(|e| e.into_provider_error("delete", &id))?;
        Ok(())
    }

    async fn wait_for_active(
        &self,
        name: &str,
        id: &ResourceId,
        timeout: Duration,
        operation: &'static str,
    ) -> ProviderResult<()> {
        let poller = StatusRefresh {
            client: &self.client,
            name,
        };
        let config = WaitConfig::new(&[STATUS_CREATING, STATUS_UPDATING], &[STATUS_ACTIVE], timeout);
        waiter::wait(&poller, &config)
            .await
            .map_err(|e| e.into_provider_error(operation, id))?;
        Ok(())
    }

    async fn read_existing(&self, name: &str, operation: &'static str) -> ProviderResult<DocumentState> {
        self.read(name).await?.ok_or_else(|| {
            ProviderError::new("document disappeared after the operation completed")
                .for_resource(ResourceId::new(KIND, name))
                .during(operation)
        })
    }

    async fn read_permissions(
        &self,
        name: &str,
        id: &ResourceId,
    ) -> ProviderResult<BTreeSet<String>> {
        let output = match self
            .client
            .describe_document_permission()
            .name(name)
            .permission_type(DocumentPermissionType::Share)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_invalid_document() {
                    return Ok(BTreeSet::new());
                }
                return Err(ProviderError::request("read", id, service));
            }
        };
        Ok(output.account_ids().iter().cloned().collect())
    }

    async fn modify_permissions(
        &self,
        name: &str,
        id: &ResourceId,
        to_add: &BTreeSet<String>,
        to_remove: &BTreeSet<String>,
    ) -> ProviderResult<()> {
        for batch in permission_batches(to_remove) {
            self.client
                .modify_document_permission()
                .name(name)
                .permission_type(DocumentPermissionType::Share)
                .set_account_ids_to_remove(Some(batch))
                .send()
                .await
                .map_err(|e| ProviderError::request("share", id, e))?;
        }
        for batch in permission_batches(to_add) {
            self.client
                .modify_document_permission()
                .name(name)
                .permission_type(DocumentPermissionType::Share)
                .set_account_ids_to_add(Some(batch))
                .send()
                .await
                .map_err(|e| ProviderError::request("share", id, e))?;
        }
        Ok(())
    }

    async fn reconcile_tags(&self, name: &str, id: &ResourceId, diff: &TagDiff) -> ProviderResult<()> {
        if !diff.remove.is_empty() {
            self.client
                .remove_tags_from_resource()
                .resource_type(ResourceTypeForTagging::Document)
                .resource_id(name)
                .set_tag_keys(Some(diff.remove.clone()))
                .send()
                .await
                .map_err(|e| ProviderError::request("update", id, e))?;
        }
        if !diff.set.is_empty() {
            self.client
                .add_tags_to_resource()
                .resource_type(ResourceTypeForTagging::Document)
                .resource_id(name)
                .set_tags(Some(expand_tags(&diff.set)?))
                .send()
                .await
                .map_err(|e| ProviderError::request("update", id, e))?;
        }
        Ok(())
    }

    /// Pushes the configured content as a new version. A duplicate-content
    /// rejection means the latest version already matches, so that version
    /// is promoted instead of treating it as a failure.
    async fn update_content(&self, id: &ResourceId, config: &DocumentConfig) -> ProviderResult<()> {
        let mut request = self
            .client
            .update_document()
            .name(config.name.as_str())
            .content(config.content.as_str())
            .document_format(expand_format(config.format))
            .document_version("$LATEST");
        if let Some(target_type) = &config.target_type {
            request = request.target_type(target_type.as_str());
        }
        if let Some(version_name) = &config.version_name {
            request = request.version_name(version_name.as_str());
        }
        for attachment in &config.attachments {
            request = request.attachments(expand_attachment(attachment));
        }

        let new_version = match request.send().await {
            Ok(updated) => updated
                .document_description()
                .and_then(|d| d.document_version())
                .map(str::to_string),
            Err(err) => {
                let service = err.into_service_error();
                if !service.is_duplicate_document_content() {
                    return Err(ProviderError::request("update", id, service));
                }
                log::debug!("[{id}] content already matches the latest version");
                let description = self
                    .client
                    .describe_document()
                    .name(config.name.as_str())
                    .send()
                    .await
                    .map_err(|e| ProviderError::request("update", id, e))?
                    .document;
                description
                    .as_ref()
                    .and_then(|d| d.latest_version())
                    .map(str::to_string)
            }
        };

        let Some(version) = new_version else {
            return Err(ProviderError::new("could not determine the new document version")
                .for_resource(id.clone())
                .during("update"));
        };
        self.client
            .update_document_default_version()
            .name(config.name.as_str())
            .document_version(version)
            .send()
            .await
            .map_err(|e| ProviderError::request("update", id, e))?;
        Ok(())
    }
}

// =========================================================================
// Status pollers
// =========================================================================

/// Refreshes the document status while it is expected to exist. The
/// describe call can trail a fresh create, so a not-found counts as
/// pending rather than failing the session.
struct StatusRefresh<'a> {
    client: &'a Client,
    name: &'a str,
}

#[async_trait]
impl StatusPoller for StatusRefresh<'_> {
    type Output = DocumentDescription;

    async fn poll(&self) -> ProviderResult<Observation<DocumentDescription>> {
        let id = ResourceId::new(KIND, self.name);
        let output = match self.client.describe_document().name(self.name).send().await {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_invalid_document() {
                    return Err(ProviderError::request("status refresh", &id, service)
                        .transient());
                }
                return Err(ProviderError::request("status refresh", &id, service));
            }
        };
        let description = output.document.ok_or_else(|| {
            ProviderError::new("describe returned no document description")
                .for_resource(id)
                .during("status refresh")
        })?;
        let status = description
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        Ok(Observation {
            status,
            payload: Some(description),
        })
    }
}

/// Same refresh, except that a not-found is the deleted terminal state.
struct DeleteRefresh<'a> {
    client: &'a Client,
    name: &'a str,
}

#[async_trait]
impl StatusPoller for DeleteRefresh<'_> {
    type Output = DocumentDescription;

    async fn poll(&self) -> ProviderResult<Observation<DocumentDescription>> {
        let id = ResourceId::new(KIND, self.name);
        let output = match self.client.describe_document().name(self.name).send().await {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_invalid_document() {
                    return Ok(Observation {
                        status: STATUS_DELETED.to_string(),
                        payload: None,
                    });
                }
                return Err(ProviderError::request("status refresh", &id, service));
            }
        };
        let status = output
            .document
            .as_ref()
            .and_then(|d| d.status())
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| STATUS_DELETED.to_string());
        Ok(Observation {
            status,
            payload: output.document,
        })
    }
}

// =========================================================================
// Expand / flatten
// =========================================================================

fn expand_format(format: DocumentFormat) -> SdkFormat {
    match format {
        DocumentFormat::Json => SdkFormat::Json,
        DocumentFormat::Yaml => SdkFormat::Yaml,
        DocumentFormat::Text => SdkFormat::Text,
    }
}

fn expand_kind(kind: DocumentKind) -> DocumentType {
    match kind {
        DocumentKind::Command => DocumentType::Command,
        DocumentKind::Policy => DocumentType::Policy,
        DocumentKind::Automation => DocumentType::Automation,
        DocumentKind::Session => DocumentType::Session,
        DocumentKind::Package => DocumentType::Package,
        DocumentKind::ApplicationConfiguration => DocumentType::ApplicationConfiguration,
        DocumentKind::ApplicationConfigurationSchema => {
            DocumentType::ApplicationConfigurationSchema
        }
        DocumentKind::DeploymentStrategy => DocumentType::DeploymentStrategy,
        DocumentKind::ChangeCalendar => DocumentType::ChangeCalendar,
    }
}

fn expand_attachment_key(key: AttachmentKey) -> AttachmentsSourceKey {
    match key {
        AttachmentKey::SourceUrl => AttachmentsSourceKey::SourceUrl,
        AttachmentKey::S3FileUrl => AttachmentsSourceKey::S3FileUrl,
        AttachmentKey::AttachmentReference => AttachmentsSourceKey::AttachmentReference,
    }
}

fn expand_attachment(attachment: &AttachmentSourceConfig) -> AttachmentsSource {
    let mut builder = AttachmentsSource::builder()
        .key(expand_attachment_key(attachment.key))
        .set_values(Some(attachment.values.clone()));
    if let Some(name) = &attachment.name {
        builder = builder.name(name.as_str());
    }
    builder.build()
}

fn expand_tags(tags: &TagMap) -> ProviderResult<Vec<Tag>> {
    tags.iter()
        .map(|(key, value)| {
            Tag::builder()
                .key(key.as_str())
                .value(value.as_str())
                .build()
                .map_err(|e| ProviderError::new(format!("invalid tag {key:?}: {e}")))
        })
        .collect()
}

/// Whether the configuration requires pushing a new document version.
/// Attachment sources count: they only take effect through UpdateDocument,
/// and the state carries the set last applied.
fn needs_content_update(current: &DocumentState, config: &DocumentConfig) -> bool {
    current.content.as_deref() != Some(config.content.as_str())
        || current.target_type.as_deref() != config.target_type.as_deref()
        || current.version_name.as_deref() != config.version_name.as_deref()
        || current.attachments != config.attachments
}

/// Splits an account id set into API-sized batches, preserving order.
fn permission_batches(account_ids: &BTreeSet<String>) -> Vec<Vec<String>> {
    account_ids
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .chunks(PERMISSIONS_BATCH_LIMIT)
        .map(|chunk| chunk.to_vec())
        .collect()
}

fn flatten_document(
    description: &DocumentDescription,
    content: Option<String>,
    shared_account_ids: BTreeSet<String>,
) -> DocumentState {
    DocumentState {
        name: description.name().unwrap_or_default().to_string(),
        content,
        format: description
            .document_format()
            .map(|f| f.as_str().to_string()),
        kind: description.document_type().map(|t| t.as_str().to_string()),
        status: description.status().map(|s| s.as_str().to_string()),
        created_date: description.created_date().map(|d| d.to_string()),
        default_version: description.default_version().map(str::to_string),
        document_version: description.document_version().map(str::to_string),
        latest_version: description.latest_version().map(str::to_string),
        schema_version: description.schema_version().map(str::to_string),
        hash: description.hash().map(str::to_string),
        hash_type: description.hash_type().map(|h| h.as_str().to_string()),
        owner: description.owner().map(str::to_string),
        platform_types: description
            .platform_types()
            .iter()
            .map(|p| p.as_str().to_string())
            .collect(),
        parameters: description
            .parameters()
            .iter()
            .map(|p| DocumentParameterState {
                name: p.name().map(str::to_string),
                kind: p.r#type().map(|t| t.as_str().to_string()),
                description: p.description().map(str::to_string),
                default_value: p.default_value().map(str::to_string),
            })
            .collect(),
        target_type: description.target_type().map(str::to_string),
        version_name: description.version_name().map(str::to_string),
        attachments: Vec::new(),
        shared_account_ids,
        tags: description
            .tags()
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_config() -> DocumentConfig {
        DocumentConfig {
            name: "restart-agent".to_string(),
            content: serde_json::json!({
                "schemaVersion": "2.2",
                "description": "Restart the agent",
                "mainSteps": []
            })
            .to_string(),
            kind: DocumentKind::Command,
            format: DocumentFormat::Json,
            target_type: None,
            version_name: None,
            attachments: Vec::new(),
            permissions: None,
            tags: TagMap::new(),
        }
    }

    fn accounts(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn observed_state(config: &DocumentConfig) -> DocumentState {
        DocumentState {
            name: config.name.clone(),
            content: Some(config.content.clone()),
            format: Some("JSON".to_string()),
            kind: Some("Command".to_string()),
            status: Some(STATUS_ACTIVE.to_string()),
            created_date: None,
            default_version: Some("1".to_string()),
            document_version: Some("1".to_string()),
            latest_version: Some("1".to_string()),
            schema_version: Some("2.2".to_string()),
            hash: None,
            hash_type: None,
            owner: None,
            platform_types: Vec::new(),
            parameters: Vec::new(),
            target_type: config.target_type.clone(),
            version_name: config.version_name.clone(),
            attachments: config.attachments.clone(),
            shared_account_ids: BTreeSet::new(),
            tags: config.tags.clone(),
        }
    }

    #[test]
    fn name_length_and_charset_are_validated() {
        let mut config = command_config();
        config.name = "ab".to_string();
        assert!(config.validate().is_err());
        config.name = "has space".to_string();
        assert!(config.validate().is_err());
        config.name = "a".repeat(129);
        assert!(config.validate().is_err());
        config.name = "valid-name.v2".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_format_requires_parsable_content() {
        let mut config = command_config();
        config.content = "{not json".to_string();
        assert!(config.validate().is_err());

        config.format = DocumentFormat::Yaml;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn target_type_must_start_with_a_slash() {
        let mut config = command_config();
        config.target_type = Some("AWS::EC2::Instance".to_string());
        assert!(config.validate().is_err());
        config.target_type = Some("/AWS::EC2::Instance".to_string());
        assert!(config.validate().is_ok());
        config.target_type = Some("/".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn permissions_require_accounts() {
        let mut config = command_config();
        config.permissions = Some(DocumentPermissionsConfig::default());
        assert!(config.validate().is_err());
        config.permissions = Some(DocumentPermissionsConfig {
            account_ids: accounts(&["123456789012"]),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn permission_batches_respect_the_api_limit() {
        let ids: BTreeSet<String> = (0..45).map(|i| format!("{i:012}")).collect();
        let batches = permission_batches(&ids);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 20);
        assert_eq!(batches[1].len(), 20);
        assert_eq!(batches[2].len(), 5);
        assert_eq!(batches.iter().flatten().count(), 45);
    }

    #[test]
    fn permission_batches_of_empty_set_are_empty() {
        assert!(permission_batches(&BTreeSet::new()).is_empty());
    }

    #[test]
    fn duplicate_account_ids_collapse() {
        let config = DocumentPermissionsConfig {
            account_ids: accounts(&["123456789012", "123456789012", "210987654321"]),
        };
        assert_eq!(config.account_ids.len(), 2);
    }

    #[test]
    fn unchanged_config_needs_no_content_update() {
        let config = command_config();
        let current = observed_state(&config);
        assert!(!needs_content_update(&current, &config));
    }

    #[test]
    fn attachment_only_change_needs_a_content_update() {
        let config = command_config();
        let current = observed_state(&config);

        let mut changed = config.clone();
        changed.attachments = vec![AttachmentSourceConfig {
            key: AttachmentKey::SourceUrl,
            name: None,
            values: vec!["https://example.com/scripts/".to_string()],
        }];

        assert!(needs_content_update(&current, &changed));
        let after = observed_state(&changed);
        assert!(!needs_content_update(&after, &changed));
    }

    #[test]
    fn changed_target_type_needs_a_content_update() {
        let config = command_config();
        let current = observed_state(&config);

        let mut changed = config.clone();
        changed.target_type = Some("/AWS::EC2::Instance".to_string());
        assert!(needs_content_update(&current, &changed));
    }

    #[test]
    fn schema_v1_is_detected() {
        assert!(SCHEMA_V1.is_match("1.0"));
        assert!(SCHEMA_V1.is_match("1.2"));
        assert!(!SCHEMA_V1.is_match("2.0"));
        assert!(!SCHEMA_V1.is_match("2.2"));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: DocumentConfig = serde_json::from_value(serde_json::json!({
            "name": "restart-agent",
            "content": "{}",
            "kind": "command"
        }))
        .unwrap();
        assert_eq!(config.format, DocumentFormat::Json);
        assert!(config.permissions.is_none());
        assert!(config.attachments.is_empty());
    }
}
