//! Batch compute environment controller
//!
//! Maps a declared compute environment onto the AWS Batch API. Creation
//! and every mutation poll the environment status afterwards: Batch
//! accepts the request immediately and converges in the background.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_batch::Client;
use aws_sdk_batch::types::{
    CeState, CeType, ComputeEnvironmentDetail, ComputeResource, ComputeResourceUpdate,
    CrAllocationStrategy, CrType, LaunchTemplateSpecification,
};
use serde::{Deserialize, Serialize};

use vela_core::error::{ProviderError, ProviderResult, ResourceId, exactly_one};
use vela_core::tags::{TagDiff, TagMap};
use vela_core::timeouts::OperationTimeouts;
use vela_core::waiter::{self, Observation, StatusPoller, WaitConfig, WaitError};

const KIND: &str = "batch_compute_environment";

const STATUS_CREATING: &str = "CREATING";
const STATUS_UPDATING: &str = "UPDATING";
const STATUS_DELETING: &str = "DELETING";
const STATUS_DELETED: &str = "DELETED";
const STATUS_VALID: &str = "VALID";

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_TIMEOUTS: OperationTimeouts =
    OperationTimeouts::uniform(Duration::from_secs(30 * 60));

// =========================================================================
// Configuration
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    Managed,
    Unmanaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeKind {
    Ec2,
    Spot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    BestFit,
    BestFitProgressive,
    SpotCapacityOptimized,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default)]
pub struct LaunchTemplateConfig {
    pub launch_template_id: Option<String>,
    pub launch_template_name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComputeResourcesConfig {
    pub kind: ComputeKind,
    pub instance_role: String,
    pub instance_types: Vec<String>,
    pub max_vcpus: i32,
    pub min_vcpus: i32,
    pub security_group_ids: Vec<String>,
    pub subnets: Vec<String>,
    #[serde(default)]
    pub allocation_strategy: Option<AllocationStrategy>,
    #[serde(default)]
    pub bid_percentage: Option<i32>,
    #[serde(default)]
    pub desired_vcpus: Option<i32>,
    #[serde(default)]
    pub ec2_key_pair: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub launch_template: Option<LaunchTemplateConfig>,
    #[serde(default)]
    pub spot_iam_fleet_role: Option<String>,
    #[serde(default)]
    pub tags: TagMap,
}

/// Desired configuration of one compute environment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ComputeEnvironmentConfig {
    pub name: String,
    pub kind: EnvironmentKind,
    pub service_role: String,
    #[serde(default)]
    pub state: EnvironmentState,
    #[serde(default)]
    pub compute_resources: Option<ComputeResourcesConfig>,
    #[serde(default)]
    pub tags: TagMap,
}

impl ComputeEnvironmentConfig {
    /// Checks the constraints the API cannot report until after submission.
    /// Failures are permanent; nothing is sent and nothing is retried.
    pub fn validate(&self) -> ProviderResult<()> {
        if self.name.is_empty() {
            return Err(ProviderError::new("compute environment name must not be empty"));
        }
        if self.kind == EnvironmentKind::Managed && self.compute_resources.is_none() {
            return Err(ProviderError::new(
                "a managed compute environment requires a compute_resources block",
            )
            .for_resource(self.id()));
        }
        if let Some(resources) = &self.compute_resources {
            if resources.min_vcpus > resources.max_vcpus {
                return Err(ProviderError::new(format!(
                    "min_vcpus ({}) exceeds max_vcpus ({})",
                    resources.min_vcpus, resources.max_vcpus
                ))
                .for_resource(self.id()));
            }
            if let Some(bid) = resources.bid_percentage
                && !(0..=100).contains(&bid)
            {
                return Err(ProviderError::new(format!(
                    "bid_percentage must be between 0 and 100, got {bid}"
                ))
                .for_resource(self.id()));
            }
            if let Some(template) = &resources.launch_template
                && template.launch_template_id.is_some()
                && template.launch_template_name.is_some()
            {
                return Err(ProviderError::new(
                    "launch_template_id and launch_template_name are mutually exclusive",
                )
                .for_resource(self.id()));
            }
        }
        Ok(())
    }

    fn id(&self) -> ResourceId {
        ResourceId::new(KIND, self.name.as_str())
    }
}

// =========================================================================
// Observed state
// =========================================================================

/// Remote state of a compute environment as last observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeEnvironmentState {
    pub name: String,
    pub arn: Option<String>,
    pub ecs_cluster_arn: Option<String>,
    pub service_role: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub status_reason: Option<String>,
    pub kind: Option<String>,
    pub compute_resources: Option<ComputeResourcesState>,
    pub tags: TagMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ComputeResourcesState {
    pub kind: Option<String>,
    pub allocation_strategy: Option<String>,
    pub instance_role: Option<String>,
    pub instance_types: Vec<String>,
    pub min_vcpus: Option<i32>,
    pub max_vcpus: Option<i32>,
    pub desired_vcpus: Option<i32>,
    pub security_group_ids: Vec<String>,
    pub subnets: Vec<String>,
    pub ec2_key_pair: Option<String>,
    pub image_id: Option<String>,
    pub spot_iam_fleet_role: Option<String>,
    pub tags: TagMap,
}

// =========================================================================
// Controller
// =========================================================================

/// Controller for AWS Batch compute environments. Owns its injected client
/// and timeout configuration; nothing here reaches for ambient state.
pub struct ComputeEnvironments {
    client: Client,
    timeouts: OperationTimeouts,
}

impl ComputeEnvironments {
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

    /// Creates the environment and waits until Batch reports it VALID.
    pub async fn create(
        &self,
        config: &ComputeEnvironmentConfig,
    ) -> ProviderResult<ComputeEnvironmentState> {
        config.validate()?;
        let id = config.id();
        log::debug!("creating compute environment {}", config.name);

        let mut request = self
            .client
            .create_compute_environment()
            .compute_environment_name(config.name.as_str())
            .r#type(expand_environment_kind(config.kind))
            .service_role(config.service_role.as_str())
            .state(expand_environment_state(config.state));
        if !config.tags.is_empty() {
            request = request.set_tags(Some(config.tags.clone().into_iter().collect()));
        }
        if let Some(resources) = &config.compute_resources {
            request = request.compute_resources(expand_compute_resources(resources)?);
        }

        let accepted = request
            .send()
            .await
            .map_err(|e| ProviderError::request("create", &id, e))?;
        // Identity comes from the acceptance response, never assumed up front.
        let name = accepted
            .compute_environment_name()
            .unwrap_or(config.name.as_str())
            .to_string();

        self.wait_for_status(
            &name,
            &[STATUS_CREATING],
            &[STATUS_VALID],
            self.timeouts.create,
        )
        .await
        .map_err(|e| e.into_provider_error("create", &id))?;

        self.read_existing(&name, "create").await
    }

    /// Reads the environment by name; `None` when it does not exist.
    pub async fn read(&self, name: &str) -> ProviderResult<Option<ComputeEnvironmentState>> {
        let id = ResourceId::new(KIND, name);
        let output = self
            .client
            .describe_compute_environments()
            .compute_environments(name)
            .send()
            .await
            .map_err(|e| ProviderError::request("read", &id, e))?;

        let environments = output.compute_environments();
        if environments.is_empty() {
            return Ok(None);
        }
        let detail = exactly_one(environments.to_vec(), "compute environment")
            .map_err(|e| e.for_resource(id).during("read"))?;
        Ok(Some(flatten_environment(&detail)))
    }

    /// Seeds state from an externally supplied environment name.
    pub async fn import(&self, name: &str) -> ProviderResult<ComputeEnvironmentState> {
        self.read(name).await?.ok_or_else(|| {
            ProviderError::new("no compute environment with this name exists")
                .for_resource(ResourceId::new(KIND, name))
                .during("import")
        })
    }

    /// Applies the changed fields, waiting out the UPDATING status when a
    /// targeted update was submitted, then reconciles tags.
    pub async fn update(
        &self,
        current: &ComputeEnvironmentState,
        config: &ComputeEnvironmentConfig,
    ) -> ProviderResult<ComputeEnvironmentState> {
        config.validate()?;
        let id = config.id();

        let desired_state = expand_environment_state(config.state);
        let state_changed = current.state.as_deref() != Some(desired_state.as_str());
        let service_role_changed =
            current.service_role.as_deref() != Some(config.service_role.as_str());
        let resources_update = compute_resources_update(
            current.compute_resources.as_ref(),
            config.compute_resources.as_ref(),
        );

        if state_changed || service_role_changed || resources_update.is_some() {
            log::debug!("updating compute environment {}", config.name);
            let mut request = self
                .client
                .update_compute_environment()
                .compute_environment(config.name.as_str());
            if service_role_changed {
                request = request.service_role(config.service_role.as_str());
            }
            if state_changed {
                request = request.state(desired_state);
            }
            if let Some(update) = resources_update {
                request = request.compute_resources(update);
            }
            request
                .send()
                .await
                .map_err(|e| ProviderError::request("update", &id, e))?;

            self.wait_for_status(
                &config.name,
                &[STATUS_UPDATING],
                &[STATUS_VALID],
                self.timeouts.update,
            )
            .await
            .map_err(|e| e.into_provider_error("update", &id))?;
        }

        let diff = TagDiff::between(&current.tags, &config.tags);
        if !diff.is_empty() {
            let arn = current.arn.as_deref().ok_or_else(|| {
                ProviderError::new("cannot reconcile tags without the environment ARN")
                    .for_resource(id.clone())
                    .during("update")
            })?;
            self.reconcile_tags(arn, &id, &diff).await?;
        }

        self.read_existing(&config.name, "update").await
    }

    /// Disables the environment, then deletes it and waits until the API
    /// stops reporting it.
    pub async fn delete(&self, name: &str) -> ProviderResult<()> {
        let id = ResourceId::new(KIND, name);

        log::debug!("disabling compute environment {name} before deletion");
        self.client
            .update_compute_environment()
            .compute_environment(name)
            .state(CeState::Disabled)
            .send()
            .await
            .map_err(|e| ProviderError::request("delete", &id, e))?;
        self.wait_for_status(name, &[STATUS_UPDATING], &[STATUS_VALID], self.timeouts.delete)
            .await
            .map_err(|e| e.into_provider_error("delete", &id))?;

        log::debug!("deleting compute environment {name}");
        self.client
            .delete_compute_environment()
            .compute_environment(name)
            .send()
            .await
            .map_err(|e| ProviderError::request("delete", &id, e))?;

        let poller = DeleteRefresh {
            client: &self.client,
            name,
        };
        let config = WaitConfig::new(&[STATUS_DELETING], &[STATUS_DELETED], self.timeouts.delete)
            .with_min_interval(STATUS_POLL_INTERVAL);
        waiter::wait(&poller, &config)
            .await
            .map_err(|e| e.into_provider_error("delete", &id))?;
        Ok(())
    }

    async fn wait_for_status(
        &self,
        name: &str,
        pending: &'static [&'static str],
        target: &'static [&'static str],
        timeout: Duration,
    ) -> Result<Observation<ComputeEnvironmentDetail>, WaitError> {
        let poller = StatusRefresh {
            client: &self.client,
            name,
        };
        let config =
            WaitConfig::new(pending, target, timeout).with_min_interval(STATUS_POLL_INTERVAL);
        waiter::wait(&poller, &config).await
    }

    async fn read_existing(
        &self,
        name: &str,
        operation: &'static str,
    ) -> ProviderResult<ComputeEnvironmentState> {
        self.read(name).await?.ok_or_else(|| {
            ProviderError::new("compute environment disappeared after the operation completed")
                .for_resource(ResourceId::new(KIND, name))
                .during(operation)
        })
    }

    async fn reconcile_tags(
        &self,
        arn: &str,
        id: &ResourceId,
        diff: &TagDiff,
    ) -> ProviderResult<()> {
        if !diff.remove.is_empty() {
            self.client
                .untag_resource()
                .resource_arn(arn)
                .set_tag_keys(Some(diff.remove.clone()))
                .send()
                .await
                .map_err(|e| ProviderError::request("update", id, e))?;
        }
        if !diff.set.is_empty() {
            self.client
                .tag_resource()
                .resource_arn(arn)
                .set_tags(Some(diff.set.clone().into_iter().collect()))
                .send()
                .await
                .map_err(|e| ProviderError::request("update", id, e))?;
        }
        Ok(())
    }
}

// =========================================================================
// Status pollers
// =========================================================================

/// Refreshes the environment status while it is expected to exist. An empty
/// describe result here violates the exactly-one invariant and fails the
/// session rather than picking a status out of thin air.
struct StatusRefresh<'a> {
    client: &'a Client,
    name: &'a str,
}

#[async_trait]
impl StatusPoller for StatusRefresh<'_> {
    type Output = ComputeEnvironmentDetail;

    async fn poll(&self) -> ProviderResult<Observation<ComputeEnvironmentDetail>> {
        let output = self
            .client
            .describe_compute_environments()
            .compute_environments(self.name)
            .send()
            .await
            .map_err(|e| {
                ProviderError::request("status refresh", &ResourceId::new(KIND, self.name), e)
            })?;
        let detail = exactly_one(output.compute_environments().to_vec(), "compute environment")?;
        let status = detail
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        Ok(Observation {
            status,
            payload: Some(detail),
        })
    }
}

/// Same refresh, except that an empty result is the deleted terminal state.
struct DeleteRefresh<'a> {
    client: &'a Client,
    name: &'a str,
}

#[async_trait]
impl StatusPoller for DeleteRefresh<'_> {
    type Output = ComputeEnvironmentDetail;

    async fn poll(&self) -> ProviderResult<Observation<ComputeEnvironmentDetail>> {
        let output = self
            .client
            .describe_compute_environments()
            .compute_environments(self.name)
            .send()
            .await
            .map_err(|e| {
                ProviderError::request("status refresh", &ResourceId::new(KIND, self.name), e)
            })?;
        let environments = output.compute_environments();
        if environments.is_empty() {
            return Ok(Observation {
                status: STATUS_DELETED.to_string(),
                payload: None,
            });
        }
        let detail = exactly_one(environments.to_vec(), "compute environment")?;
        let status = detail
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default();
        Ok(Observation {
            status,
            payload: Some(detail),
        })
    }
}

// =========================================================================
// Expand / flatten
// =========================================================================

fn expand_environment_kind(kind: EnvironmentKind) -> CeType {
    match kind {
        EnvironmentKind::Managed => CeType::Managed,
        EnvironmentKind::Unmanaged => CeType::Unmanaged,
    }
}

fn expand_environment_state(state: EnvironmentState) -> CeState {
    match state {
        EnvironmentState::Enabled => CeState::Enabled,
        EnvironmentState::Disabled => CeState::Disabled,
    }
}

fn expand_compute_kind(kind: ComputeKind) -> CrType {
    match kind {
        ComputeKind::Ec2 => CrType::Ec2,
        ComputeKind::Spot => CrType::Spot,
    }
}

fn expand_allocation_strategy(strategy: AllocationStrategy) -> CrAllocationStrategy {
    match strategy {
        AllocationStrategy::BestFit => CrAllocationStrategy::BestFit,
        AllocationStrategy::BestFitProgressive => CrAllocationStrategy::BestFitProgressive,
        AllocationStrategy::SpotCapacityOptimized => CrAllocationStrategy::SpotCapacityOptimized,
    }
}

fn expand_compute_resources(config: &ComputeResourcesConfig) -> ProviderResult<ComputeResource> {
    let mut builder = ComputeResource::builder()
        .r#type(expand_compute_kind(config.kind))
        .instance_role(config.instance_role.as_str())
        .minv_cpus(config.min_vcpus)
        .maxv_cpus(config.max_vcpus)
        .set_instance_types(Some(config.instance_types.clone()))
        .set_security_group_ids(Some(config.security_group_ids.clone()))
        .set_subnets(Some(config.subnets.clone()));

    if let Some(strategy) = config.allocation_strategy {
        builder = builder.allocation_strategy(expand_allocation_strategy(strategy));
    }
    if let Some(bid) = config.bid_percentage {
        builder = builder.bid_percentage(bid);
    }
    if let Some(desired) = config.desired_vcpus
        && desired > 0
    {
        builder = builder.desiredv_cpus(desired);
    }
    if let Some(key_pair) = &config.ec2_key_pair {
        builder = builder.ec2_key_pair(key_pair.as_str());
    }
    if let Some(image_id) = &config.image_id {
        builder = builder.image_id(image_id.as_str());
    }
    if let Some(role) = &config.spot_iam_fleet_role {
        builder = builder.spot_iam_fleet_role(role.as_str());
    }
    if !config.tags.is_empty() {
        builder = builder.set_tags(Some(config.tags.clone().into_iter().collect()));
    }
    if let Some(template) = &config.launch_template {
        let mut spec = LaunchTemplateSpecification::builder();
        if let Some(id) = &template.launch_template_id {
            spec = spec.launch_template_id(id.as_str());
        }
        if let Some(name) = &template.launch_template_name {
            spec = spec.launch_template_name(name.as_str());
        }
        if let Some(version) = &template.version {
            spec = spec.version(version.as_str());
        }
        builder = builder.launch_template(spec.build());
    }

    builder
        .build()
        .map_err(|e| ProviderError::new(format!("invalid compute resources: {e}")))
}

/// Only vCPU counts (and the block's presence) are updatable in place; the
/// update input always restates min/max and adds desired when it changed.
fn compute_resources_update(
    current: Option<&ComputeResourcesState>,
    desired: Option<&ComputeResourcesConfig>,
) -> Option<ComputeResourceUpdate> {
    let desired = desired?;
    let changed = match current {
        Some(observed) => {
            observed.min_vcpus != Some(desired.min_vcpus)
                || observed.max_vcpus != Some(desired.max_vcpus)
                || (desired.desired_vcpus.is_some()
                    && observed.desired_vcpus != desired.desired_vcpus)
        }
        None => true,
    };
    if !changed {
        return None;
    }

    let mut update = ComputeResourceUpdate::builder()
        .minv_cpus(desired.min_vcpus)
        .maxv_cpus(desired.max_vcpus);
    if let Some(vcpus) = desired.desired_vcpus
        && current.is_none_or(|observed| observed.desired_vcpus != Some(vcpus))
    {
        update = update.desiredv_cpus(vcpus);
    }
    Some(update.build())
}

fn flatten_environment(detail: &ComputeEnvironmentDetail) -> ComputeEnvironmentState {
    ComputeEnvironmentState {
        name: detail.compute_environment_name().to_string(),
        arn: Some(detail.compute_environment_arn().to_string()),
        ecs_cluster_arn: detail.ecs_cluster_arn().map(str::to_string),
        service_role: detail.service_role().map(str::to_string),
        state: detail.state().map(|s| s.as_str().to_string()),
        status: detail.status().map(|s| s.as_str().to_string()),
        status_reason: detail.status_reason().map(str::to_string),
        kind: detail.r#type().map(|t| t.as_str().to_string()),
        compute_resources: detail.compute_resources().map(flatten_compute_resources),
        tags: detail
            .tags()
            .map(|tags| {
                tags.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn flatten_compute_resources(resources: &ComputeResource) -> ComputeResourcesState {
    ComputeResourcesState {
        kind: Some(resources.r#type().as_str().to_string()),
        allocation_strategy: resources
            .allocation_strategy()
            .map(|s| s.as_str().to_string()),
        instance_role: resources.instance_role().map(str::to_string),
        instance_types: resources.instance_types().to_vec(),
        min_vcpus: resources.minv_cpus(),
        max_vcpus: Some(resources.maxv_cpus()),
        desired_vcpus: resources.desiredv_cpus(),
        security_group_ids: resources.security_group_ids().to_vec(),
        subnets: resources.subnets().to_vec(),
        ec2_key_pair: resources.ec2_key_pair().map(str::to_string),
        image_id: resources.image_id().map(str::to_string),
        spot_iam_fleet_role: resources.spot_iam_fleet_role().map(str::to_string),
        tags: resources
            .tags()
            .map(|tags| {
                tags.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managed_config() -> ComputeEnvironmentConfig {
        ComputeEnvironmentConfig {
            name: "genomics".to_string(),
            kind: EnvironmentKind::Managed,
            service_role: "arn:aws:iam::123456789012:role/BatchServiceRole".to_string(),
            state: EnvironmentState::Enabled,
            compute_resources: Some(ComputeResourcesConfig {
                kind: ComputeKind::Ec2,
                instance_role: "arn:aws:iam::123456789012:instance-profile/ecs".to_string(),
                instance_types: vec!["c5.large".to_string()],
                max_vcpus: 16,
                min_vcpus: 0,
                security_group_ids: vec!["sg-12345".to_string()],
                subnets: vec!["subnet-12345".to_string()],
                allocation_strategy: None,
                bid_percentage: None,
                desired_vcpus: None,
                ec2_key_pair: None,
                image_id: None,
                launch_template: None,
                spot_iam_fleet_role: None,
                tags: TagMap::new(),
            }),
            tags: TagMap::new(),
        }
    }

    fn observed_resources(min: i32, max: i32, desired: Option<i32>) -> ComputeResourcesState {
        ComputeResourcesState {
            min_vcpus: Some(min),
            max_vcpus: Some(max),
            desired_vcpus: desired,
            ..Default::default()
        }
    }

    #[test]
    fn managed_environment_requires_compute_resources() {
        let mut config = managed_config();
        config.compute_resources = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("compute_resources"));
    }

    #[test]
    fn unmanaged_environment_needs_no_compute_resources() {
        let mut config = managed_config();
        config.kind = EnvironmentKind::Unmanaged;
        config.compute_resources = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn min_vcpus_must_not_exceed_max() {
        let mut config = managed_config();
        config.compute_resources.as_mut().unwrap().min_vcpus = 32;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_vcpus"));
    }

    #[test]
    fn launch_template_id_and_name_conflict() {
        let mut config = managed_config();
        config.compute_resources.as_mut().unwrap().launch_template = Some(LaunchTemplateConfig {
            launch_template_id: Some("lt-12345".to_string()),
            launch_template_name: Some("workers".to_string()),
            version: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn expand_compute_resources_maps_all_required_fields() {
        let config = managed_config();
        let resources = expand_compute_resources(config.compute_resources.as_ref().unwrap())
            .unwrap();
        assert_eq!(resources.r#type(), &CrType::Ec2);
        assert_eq!(resources.minv_cpus(), Some(0));
        assert_eq!(resources.maxv_cpus(), 16);
        assert_eq!(resources.instance_types(), ["c5.large".to_string()]);
        assert_eq!(resources.subnets(), ["subnet-12345".to_string()]);
        assert_eq!(resources.desiredv_cpus(), None);
    }

    #[test]
    fn unchanged_vcpus_produce_no_update() {
        let mut config = managed_config();
        config.compute_resources.as_mut().unwrap().desired_vcpus = Some(4);
        let current = observed_resources(0, 16, Some(4));
        assert!(
            compute_resources_update(Some(&current), config.compute_resources.as_ref()).is_none()
        );
    }

    #[test]
    fn changed_max_vcpus_restates_min_and_max() {
        let mut config = managed_config();
        config.compute_resources.as_mut().unwrap().max_vcpus = 64;
        let current = observed_resources(0, 16, None);
        let update =
            compute_resources_update(Some(&current), config.compute_resources.as_ref()).unwrap();
        assert_eq!(update.minv_cpus(), Some(0));
        assert_eq!(update.maxv_cpus(), Some(64));
        assert_eq!(update.desiredv_cpus(), None);
    }

    #[test]
    fn changed_desired_vcpus_is_included() {
        let mut config = managed_config();
        config.compute_resources.as_mut().unwrap().desired_vcpus = Some(8);
        let current = observed_resources(0, 16, Some(2));
        let update =
            compute_resources_update(Some(&current), config.compute_resources.as_ref()).unwrap();
        assert_eq!(update.desiredv_cpus(), Some(8));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ComputeEnvironmentConfig = serde_json::from_value(serde_json::json!({
            "name": "genomics",
            "kind": "unmanaged",
            "service_role": "arn:aws:iam::123456789012:role/BatchServiceRole"
        }))
        .unwrap();
        assert_eq!(config.state, EnvironmentState::Enabled);
        assert!(config.compute_resources.is_none());
        assert!(config.tags.is_empty());
    }
}
