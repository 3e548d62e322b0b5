//! ELBv2 load balancer controller
//!
//! Covers application, network and gateway load balancers. Mutations poll
//! the provisioning state afterwards, tag calls right after creation are
//! retried while the balancer propagates, and deletion sweeps the network
//! interfaces EC2 leaves behind.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_elasticloadbalancingv2::Client;
use aws_sdk_elasticloadbalancingv2::types::{
    IpAddressType, LoadBalancer, LoadBalancerAttribute, LoadBalancerSchemeEnum,
    LoadBalancerTypeEnum, SubnetMapping, Tag,
};
use serde::{Deserialize, Serialize};

use vela_core::error::{ProviderError, ProviderResult, ResourceId, exactly_one};
use vela_core::retry::retry_transient;
use vela_core::tags::{TagDiff, TagMap};
use vela_core::timeouts::OperationTimeouts;
use vela_core::waiter::{self, Observation, StatusPoller, WaitConfig};

use crate::arn;
use crate::eni;

const KIND: &str = "load_balancer";

const STATE_PROVISIONING: &str = "provisioning";
const STATE_ACTIVE: &str = "active";

const ATTR_ACCESS_LOGS_ENABLED: &str = "access_logs.s3.enabled";
const ATTR_ACCESS_LOGS_BUCKET: &str = "access_logs.s3.bucket";
const ATTR_ACCESS_LOGS_PREFIX: &str = "access_logs.s3.prefix";
const ATTR_IDLE_TIMEOUT: &str = "idle_timeout.timeout_seconds";
const ATTR_HTTP2: &str = "routing.http2.enabled";
const ATTR_DROP_INVALID_HEADERS: &str = "routing.http.drop_invalid_header_fields.enabled";
const ATTR_DELETION_PROTECTION: &str = "deletion_protection.enabled";
const ATTR_CROSS_ZONE: &str = "load_balancing.cross_zone.enabled";

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Tag calls issued right after creation can fail with a not-found until
/// the balancer has propagated; they are retried within this window.
const TAG_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(2 * 60);
const TAG_RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_TIMEOUTS: OperationTimeouts =
    OperationTimeouts::uniform(Duration::from_secs(10 * 60));

// =========================================================================
// Configuration
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerKind {
    #[default]
    Application,
    Network,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Ipv4,
    Dualstack,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessLogsConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubnetMappingConfig {
    pub subnet_id: String,
    #[serde(default)]
    pub allocation_id: Option<String>,
    #[serde(default)]
    pub private_ipv4_address: Option<String>,
    #[serde(default)]
    pub ipv6_address: Option<String>,
}

/// Desired configuration of one load balancer. Attribute fields that only
/// apply to one balancer kind are ignored for the others, matching the API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadBalancerConfig {
    pub name: String,
    #[serde(default)]
    pub kind: LoadBalancerKind,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default)]
    pub subnet_mappings: Vec<SubnetMappingConfig>,
    #[serde(default)]
    pub ip_address_type: Option<AddressType>,
    #[serde(default)]
    pub customer_owned_ipv4_pool: Option<String>,
    #[serde(default)]
    pub access_logs: Option<AccessLogsConfig>,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: i64,
    #[serde(default)]
    pub enable_deletion_protection: bool,
    #[serde(default = "default_true")]
    pub enable_http2: bool,
    #[serde(default)]
    pub drop_invalid_header_fields: bool,
    #[serde(default)]
    pub enable_cross_zone_load_balancing: bool,
    #[serde(default)]
    pub tags: TagMap,
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout() -> i64 {
    60
}

impl LoadBalancerConfig {
    pub fn validate(&self) -> ProviderResult<()> {
        if self.name.is_empty() || self.name.len() > 32 {
            return Err(ProviderError::new(
                "load balancer name must be between 1 and 32 characters",
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ProviderError::new(
                "load balancer name may only contain alphanumeric characters and hyphens",
            )
            .for_resource(self.id()));
        }
        if self.name.starts_with('-') || self.name.ends_with('-') {
            return Err(ProviderError::new(
                "load balancer name must not begin or end with a hyphen",
            )
            .for_resource(self.id()));
        }
        if self.name.starts_with("internal-") {
            return Err(ProviderError::new(
                "load balancer name must not begin with \"internal-\"",
            )
            .for_resource(self.id()));
        }
        if !self.subnets.is_empty() && !self.subnet_mappings.is_empty() {
            return Err(ProviderError::new(
                "subnets and subnet_mappings are mutually exclusive",
            )
            .for_resource(self.id()));
        }
        if self.kind != LoadBalancerKind::Application && !self.security_groups.is_empty() {
            return Err(ProviderError::new(
                "security groups only apply to application load balancers",
            )
            .for_resource(self.id()));
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

/// Typed view of the modifiable load balancer attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancerAttributes {
    pub access_logs_enabled: bool,
    pub access_logs_bucket: String,
    pub access_logs_prefix: String,
    pub idle_timeout: i64,
    pub enable_http2: bool,
    pub drop_invalid_header_fields: bool,
    pub enable_deletion_protection: bool,
    pub enable_cross_zone_load_balancing: bool,
}

impl Default for LoadBalancerAttributes {
    fn default() -> Self {
        Self {
            access_logs_enabled: false,
            access_logs_bucket: String::new(),
            access_logs_prefix: String::new(),
            idle_timeout: default_idle_timeout(),
            enable_http2: true,
            drop_invalid_header_fields: false,
            enable_deletion_protection: false,
            enable_cross_zone_load_balancing: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubnetMappingState {
    pub subnet_id: String,
    pub allocation_id: Option<String>,
    pub private_ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
}

/// Remote state of a load balancer as last observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancerState {
    pub arn: String,
    pub arn_suffix: Option<String>,
    pub name: String,
    pub kind: Option<String>,
    pub internal: bool,
    pub vpc_id: Option<String>,
    pub zone_id: Option<String>,
    pub dns_name: Option<String>,
    pub ip_address_type: Option<String>,
    pub customer_owned_ipv4_pool: Option<String>,
    pub status: Option<String>,
    pub security_groups: Vec<String>,
    pub subnets: Vec<String>,
    pub subnet_mappings: Vec<SubnetMappingState>,
    pub attributes: LoadBalancerAttributes,
    pub tags: TagMap,
}

// =========================================================================
// Controller
// =========================================================================

/// Controller for ELBv2 load balancers. Needs an EC2 client as well because
/// deleting a balancer leaves network interfaces behind that EC2 owns.
pub struct LoadBalancers {
    elbv2: Client,
    ec2: aws_sdk_ec2::Client,
    timeouts: OperationTimeouts,
}

impl LoadBalancers {
    pub fn new(elbv2: Client, ec2: aws_sdk_ec2::Client) -> Self {
        Self {
            elbv2,
            ec2,
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
        Self::new(Client::new(&config), aws_sdk_ec2::Client::new(&config))
    }

    /// Creates the balancer, waits until it is active and then applies the
    /// non-default attributes, which the create call cannot carry.
    pub async fn create(&self, config: &LoadBalancerConfig) -> ProviderResult<LoadBalancerState> {
        config.validate()?;
        let id = config.id();
        log::debug!("creating load balancer {}", config.name);

        let mut request = self
            .elbv2
            .create_load_balancer()
            .name(config.name.as_str())
            .r#type(expand_kind(config.kind));
        if config.internal {
            request = request.scheme(LoadBalancerSchemeEnum::Internal);
        }
        if !config.security_groups.is_empty() {
            request = request.set_security_groups(Some(config.security_groups.clone()));
        }
        if !config.subnets.is_empty() {
            request = request.set_subnets(Some(config.subnets.clone()));
        }
        for mapping in &config.subnet_mappings {
            request = request.subnet_mappings(expand_subnet_mapping(mapping));
        }
        if let Some(address_type) = config.ip_address_type {
            request = request.ip_address_type(expand_address_type(address_type));
        }
        if let Some(pool) = &config.customer_owned_ipv4_pool {
            request = request.customer_owned_ipv4_pool(pool.as_str());
        }
        if !config.tags.is_empty() {
            request = request.set_tags(Some(expand_tags(&config.tags)?));
        }

        let created = request
            .send()
            .await
            .map_err(|e| ProviderError::request("create", &id, e))?;
        let balancer = exactly_one(created.load_balancers().to_vec(), "load balancer")
            .map_err(|e| e.for_resource(id.clone()).during("create"))?;
        let balancer_arn = balancer.load_balancer_arn().ok_or_else(|| {
            ProviderError::new("create response carried no load balancer ARN")
                .for_resource(id.clone())
                .during("create")
        })?;

        self.wait_for_active(balancer_arn, &id, self.timeouts.create, "create")
            .await?;
        self.apply_attributes(balancer_arn, &id, None, config).await?;
        self.read_existing(balancer_arn, "create").await
    }

    /// Reads the balancer by ARN; `None` when it no longer exists.
    pub async fn read(&self, balancer_arn: &str) -> ProviderResult<Option<LoadBalancerState>> {
        let id = ResourceId::new(KIND, balancer_arn);
        let output = match self
            .elbv2
            .describe_load_balancers()
            .load_balancer_arns(balancer_arn)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_load_balancer_not_found_exception() {
                    return Ok(None);
                }
                return Err(ProviderError::request("read", &id, service));
            }
        };

        let balancers = output.load_balancers();
        if balancers.is_empty() {
            return Ok(None);
        }
        let balancer = exactly_one(balancers.to_vec(), "load balancer")
            .map_err(|e| e.for_resource(id.clone()).during("read"))?;

        let attributes = self.read_attributes(balancer_arn, &id).await?;
        let tags = self.read_tags(balancer_arn, &id).await?;
        Ok(Some(flatten_load_balancer(&balancer, attributes, tags)))
    }

    /// Seeds state from an externally supplied load balancer ARN.
    pub async fn import(&self, balancer_arn: &str) -> ProviderResult<LoadBalancerState> {
        self.read(balancer_arn).await?.ok_or_else(|| {
            ProviderError::new("no load balancer with this ARN exists")
                .for_resource(ResourceId::new(KIND, balancer_arn))
                .during("import")
        })
    }

    /// Applies the changed fields and waits until the balancer settles back
    /// into the active state.
    pub async fn update(
        &self,
        current: &LoadBalancerState,
        config: &LoadBalancerConfig,
    ) -> ProviderResult<LoadBalancerState> {
        config.validate()?;
        let id = ResourceId::new(KIND, current.arn.as_str());

        let diff = TagDiff::between(&current.tags, &config.tags);
        if !diff.is_empty() {
            self.reconcile_tags(current.arn.as_str(), &id, &diff).await?;
        }

        if config.kind == LoadBalancerKind::Application
            && set_differs(&current.security_groups, &config.security_groups)
        {
            self.elbv2
                .set_security_groups()
                .load_balancer_arn(current.arn.as_str())
                .set_security_groups(Some(config.security_groups.clone()))
                .send()
                .await
                .map_err(|e| ProviderError::request("update", &id, e))?;
        }

        if !config.subnets.is_empty() && set_differs(&current.subnets, &config.subnets) {
            // Network load balancers cannot change subnets in place; callers
            // have to replace the balancer instead.
            if config.kind == LoadBalancerKind::Network {
                return Err(ProviderError::new(
                    "network load balancer subnets cannot be changed; recreate the balancer",
                )
                .for_resource(id)
                .during("update"));
            }
            self.elbv2
                .set_subnets()
                .load_balancer_arn(current.arn.as_str())
                .set_subnets(Some(config.subnets.clone()))
                .send()
                .await
                .map_err(|e| ProviderError::request("update", &id, e))?;
        }

        if let Some(address_type) = config.ip_address_type {
            let desired = expand_address_type(address_type);
            if current.ip_address_type.as_deref() != Some(desired.as_str()) {
                self.elbv2
                    .set_ip_address_type()
                    .load_balancer_arn(current.arn.as_str())
                    .ip_address_type(desired)
                    .send()
                    .await
                    .map_err(|e| ProviderError::request("update", &id, e))?;
            }
        }

        self.apply_attributes(current.arn.as_str(), &id, Some(&current.attributes), config)
            .await?;

        self.wait_for_active(current.arn.as_str(), &id, self.timeouts.update, "update")
            .await?;
        self.read_existing(current.arn.as_str(), "update").await
    }

    /// Deletes the balancer, then sweeps leftover network interfaces on a
    /// best-effort basis. An interface that refuses to go away is logged,
    /// never turned into a failed deletion.
    pub async fn delete(&self, balancer_arn: &str) -> ProviderResult<()> {
        let id = ResourceId::new(KIND, balancer_arn);
        log::debug!("deleting load balancer {balancer_arn}");

        self.elbv2
            .delete_load_balancer()
            .load_balancer_arn(balancer_arn)
            .send()
            .await
            .map_err(|e| ProviderError::request("delete", &id, e))?;

        if let Err(err) = eni::cleanup_load_balancer_interfaces(&self.ec2, balancer_arn).await {
            log::warn!("[{id}] leftover network interface cleanup failed: {err}");
        }
        if let Err(err) = eni::wait_for_interface_release(&self.ec2, balancer_arn).await {
            log::warn!("[{id}] network interfaces still attached after deletion: {err}");
        }
        Ok(())
    }

    async fn wait_for_active(
        &self,
        balancer_arn: &str,
        id: &ResourceId,
        timeout: Duration,
        operation: &'static str,
    ) -> ProviderResult<()> {
        let poller = StateRefresh {
            client: &self.elbv2,
            balancer_arn,
        };
        let config = WaitConfig::new(&[STATE_PROVISIONING], &[STATE_ACTIVE], timeout)
            .with_min_interval(STATUS_POLL_INTERVAL);
        waiter::wait(&poller, &config)
            .await
            .map_err(|e| e.into_provider_error(operation, id))?;
        Ok(())
    }

    async fn read_existing(
        &self,
        balancer_arn: &str,
        operation: &'static str,
    ) -> ProviderResult<LoadBalancerState> {
        self.read(balancer_arn).await?.ok_or_else(|| {
            ProviderError::new("load balancer disappeared after the operation completed")
                .for_resource(ResourceId::new(KIND, balancer_arn))
                .during(operation)
        })
    }

    async fn read_attributes(
        &self,
        balancer_arn: &str,
        id: &ResourceId,
    ) -> ProviderResult<LoadBalancerAttributes> {
        let output = self
            .elbv2
            .describe_load_balancer_attributes()
            .load_balancer_arn(balancer_arn)
            .send()
            .await
            .map_err(|e| ProviderError::request("read", id, e))?;

        let mut attributes = LoadBalancerAttributes::default();
        for attribute in output.attributes() {
            let (Some(key), Some(value)) = (attribute.key(), attribute.value()) else {
                continue;
            };
            match key {
                ATTR_ACCESS_LOGS_ENABLED => attributes.access_logs_enabled = value == "true",
                ATTR_ACCESS_LOGS_BUCKET => attributes.access_logs_bucket = value.to_string(),
                ATTR_ACCESS_LOGS_PREFIX => attributes.access_logs_prefix = value.to_string(),
                ATTR_IDLE_TIMEOUT => {
                    attributes.idle_timeout = value.parse().map_err(|_| {
                        ProviderError::new(format!("unparsable idle timeout value {value:?}"))
                            .for_resource(id.clone())
                            .during("read")
                    })?;
                }
                ATTR_HTTP2 => attributes.enable_http2 = value == "true",
                ATTR_DROP_INVALID_HEADERS => {
                    attributes.drop_invalid_header_fields = value == "true";
                }
                ATTR_DELETION_PROTECTION => {
                    attributes.enable_deletion_protection = value == "true";
                }
                ATTR_CROSS_ZONE => {
                    attributes.enable_cross_zone_load_balancing = value == "true";
                }
                _ => {}
            }
        }
        Ok(attributes)
    }

    async fn read_tags(&self, balancer_arn: &str, id: &ResourceId) -> ProviderResult<TagMap> {
        let output = self
            .elbv2
            .describe_tags()
            .resource_arns(balancer_arn)
            .send()
            .await
            .map_err(|e| ProviderError::request("read", id, e))?;

        let mut tags = TagMap::new();
        for description in output.tag_descriptions() {
            for tag in description.tags() {
                tags.insert(
                    tag.key().to_string(),
                    tag.value().unwrap_or_default().to_string(),
                );
            }
        }
        Ok(tags)
    }

    /// Tag calls are retried while the balancer propagates; a not-found from
    /// the tagging API right after creation clears on its own.
    async fn reconcile_tags(
        &self,
        balancer_arn: &str,
        id: &ResourceId,
        diff: &TagDiff,
    ) -> ProviderResult<()> {
        if !diff.remove.is_empty() {
            let client = self.elbv2.clone();
            let keys = diff.remove.clone();
            let arn = balancer_arn.to_string();
            let id = id.clone();
            retry_transient(TAG_PROPAGATION_TIMEOUT, TAG_RETRY_INTERVAL, move || {
                let client = client.clone();
                let keys = keys.clone();
                let arn = arn.clone();
                let id = id.clone();
                async move {
                    client
                        .remove_tags()
                        .resource_arns(arn.as_str())
                        .set_tag_keys(Some(keys))
                        .send()
                        .await
                        .map_err(|e| classify_tag_error("update", &id, e.into_service_error()))?;
                    Ok(())
                }
            })
            .await?;
        }
        if !diff.set.is_empty() {
            let tags = expand_tags(&diff.set)?;
            let client = self.elbv2.clone();
            let arn = balancer_arn.to_string();
            let id = id.clone();
            retry_transient(TAG_PROPAGATION_TIMEOUT, TAG_RETRY_INTERVAL, move || {
                let client = client.clone();
                let tags = tags.clone();
                let arn = arn.clone();
                let id = id.clone();
                async move {
                    client
                        .add_tags()
                        .resource_arns(arn.as_str())
                        .set_tags(Some(tags))
                        .send()
                        .await
                        .map_err(|e| classify_tag_error("update", &id, e.into_service_error()))?;
                    Ok(())
                }
            })
            .await?;
        }
        Ok(())
    }

    async fn apply_attributes(
        &self,
        balancer_arn: &str,
        id: &ResourceId,
        current: Option<&LoadBalancerAttributes>,
        config: &LoadBalancerConfig,
    ) -> ProviderResult<()> {
        let changes = build_attribute_changes(current, config);
        if changes.is_empty() {
            return Ok(());
        }
        self.elbv2
            .modify_load_balancer_attributes()
            .load_balancer_arn(balancer_arn)
            .set_attributes(Some(changes))
            .send()
            .await
            .map_err(|e| ProviderError::request("update", id, e))?;
        Ok(())
    }
}

// =========================================================================
// Status poller
// =========================================================================

/// Refreshes the provisioning state by ARN. A not-found right after the
/// create call is eventual consistency, so it counts as pending.
struct StateRefresh<'a> {
    client: &'a Client,
    balancer_arn: &'a str,
}

#[async_trait]
impl StatusPoller for StateRefresh<'_> {
    type Output = LoadBalancer;

    async fn poll(&self) -> ProviderResult<Observation<LoadBalancer>> {
        let id = ResourceId::new(KIND, self.balancer_arn);
        let output = match self
            .client
            .describe_load_balancers()
            .load_balancer_arns(self.balancer_arn)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_load_balancer_not_found_exception() {
                    return Err(ProviderError::request("status refresh", &id, service)
                        .transient());
                }
                return Err(ProviderError::request("status refresh", &id, service));
            }
        };

        let balancer = exactly_one(output.load_balancers().to_vec(), "load balancer")
            .map_err(|e| e.for_resource(id).during("status refresh"))?;
        let status = balancer
            .state()
            .and_then(|s| s.code())
            .map(|code| code.as_str().to_string())
            .unwrap_or_default();
        Ok(Observation {
            status,
            payload: Some(balancer),
        })
    }
}

// =========================================================================
// Expand / flatten
// =========================================================================

fn expand_kind(kind: LoadBalancerKind) -> LoadBalancerTypeEnum {
    match kind {
        LoadBalancerKind::Application => LoadBalancerTypeEnum::Application,
        LoadBalancerKind::Network => LoadBalancerTypeEnum::Network,
        LoadBalancerKind::Gateway => LoadBalancerTypeEnum::Gateway,
    }
}

fn expand_address_type(address_type: AddressType) -> IpAddressType {
    match address_type {
        AddressType::Ipv4 => IpAddressType::Ipv4,
        AddressType::Dualstack => IpAddressType::Dualstack,
    }
}

fn expand_subnet_mapping(mapping: &SubnetMappingConfig) -> SubnetMapping {
    let mut builder = SubnetMapping::builder().subnet_id(mapping.subnet_id.as_str());
    if let Some(allocation_id) = &mapping.allocation_id {
        builder = builder.allocation_id(allocation_id.as_str());
    }
    if let Some(address) = &mapping.private_ipv4_address {
        builder = builder.private_i_pv4_address(address.as_str());
    }
    if let Some(address) = &mapping.ipv6_address {
        builder = builder.i_pv6_address(address.as_str());
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

fn attribute(key: &'static str, value: impl Into<String>) -> LoadBalancerAttribute {
    LoadBalancerAttribute::builder().key(key).value(value).build()
}

/// Computes the attribute modifications the desired configuration requires.
/// With no observed baseline every managed attribute is restated; against a
/// baseline only the differing ones are sent. Attribute applicability
/// follows the balancer kind.
fn build_attribute_changes(
    current: Option<&LoadBalancerAttributes>,
    config: &LoadBalancerConfig,
) -> Vec<LoadBalancerAttribute> {
    let baseline = current.cloned().unwrap_or_default();
    let restate_all = current.is_none();
    let mut changes = Vec::new();

    if restate_all || baseline.enable_deletion_protection != config.enable_deletion_protection {
        changes.push(attribute(
            ATTR_DELETION_PROTECTION,
            config.enable_deletion_protection.to_string(),
        ));
    }

    if config.kind == LoadBalancerKind::Application {
        let logs_enabled = config.access_logs.as_ref().is_some_and(|logs| logs.enabled);
        if restate_all || baseline.access_logs_enabled != logs_enabled {
            changes.push(attribute(ATTR_ACCESS_LOGS_ENABLED, logs_enabled.to_string()));
        }
        if let Some(logs) = &config.access_logs
            && logs.enabled
        {
            if restate_all || baseline.access_logs_bucket != logs.bucket {
                changes.push(attribute(ATTR_ACCESS_LOGS_BUCKET, logs.bucket.as_str()));
            }
            if restate_all || baseline.access_logs_prefix != logs.prefix {
                changes.push(attribute(ATTR_ACCESS_LOGS_PREFIX, logs.prefix.as_str()));
            }
        }
        if restate_all || baseline.idle_timeout != config.idle_timeout {
            changes.push(attribute(ATTR_IDLE_TIMEOUT, config.idle_timeout.to_string()));
        }
        if restate_all || baseline.enable_http2 != config.enable_http2 {
            changes.push(attribute(ATTR_HTTP2, config.enable_http2.to_string()));
        }
        if restate_all || baseline.drop_invalid_header_fields != config.drop_invalid_header_fields {
            changes.push(attribute(
                ATTR_DROP_INVALID_HEADERS,
                config.drop_invalid_header_fields.to_string(),
            ));
        }
    }

    if matches!(
        config.kind,
        LoadBalancerKind::Network | LoadBalancerKind::Gateway
    ) && (restate_all
            || baseline.enable_cross_zone_load_balancing
                != config.enable_cross_zone_load_balancing)
    {
        changes.push(attribute(
            ATTR_CROSS_ZONE,
            config.enable_cross_zone_load_balancing.to_string(),
        ));
    }

    changes
}

fn classify_tag_error(
    operation: &'static str,
    id: &ResourceId,
    err: impl std::fmt::Debug + TagNotFound,
) -> ProviderError {
    let wrapped = ProviderError::request(operation, id, &err);
    if err.is_not_found() { wrapped.transient() } else { wrapped }
}

/// Unifies the not-found predicate across the add and remove tag errors.
trait TagNotFound {
    fn is_not_found(&self) -> bool;
}

impl TagNotFound for aws_sdk_elasticloadbalancingv2::operation::add_tags::AddTagsError {
    fn is_not_found(&self) -> bool {
        self.is_load_balancer_not_found_exception()
    }
}

impl TagNotFound for aws_sdk_elasticloadbalancingv2::operation::remove_tags::RemoveTagsError {
    fn is_not_found(&self) -> bool {
        self.is_load_balancer_not_found_exception()
    }
}

fn set_differs(current: &[String], desired: &[String]) -> bool {
    let current: BTreeSet<&str> = current.iter().map(String::as_str).collect();
    let desired: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
    current != desired
}

fn flatten_load_balancer(
    balancer: &LoadBalancer,
    attributes: LoadBalancerAttributes,
    tags: TagMap,
) -> LoadBalancerState {
    let arn = balancer.load_balancer_arn().unwrap_or_default().to_string();
    let subnets = balancer
        .availability_zones()
        .iter()
        .filter_map(|zone| zone.subnet_id())
        .map(str::to_string)
        .collect();
    let subnet_mappings = balancer
        .availability_zones()
        .iter()
        .filter_map(|zone| {
            let subnet_id = zone.subnet_id()?.to_string();
            let address = zone.load_balancer_addresses().first();
            Some(SubnetMappingState {
                subnet_id,
                allocation_id: address
                    .and_then(|a| a.allocation_id())
                    .map(str::to_string),
                private_ipv4_address: address
                    .and_then(|a| a.private_i_pv4_address())
                    .map(str::to_string),
                ipv6_address: address.and_then(|a| a.i_pv6_address()).map(str::to_string),
            })
        })
        .collect();

    LoadBalancerState {
        arn_suffix: arn::load_balancer_suffix(&arn).map(str::to_string),
        name: balancer.load_balancer_name().unwrap_or_default().to_string(),
        kind: balancer.r#type().map(|t| t.as_str().to_string()),
        internal: balancer.scheme() == Some(&LoadBalancerSchemeEnum::Internal),
        vpc_id: balancer.vpc_id().map(str::to_string),
        zone_id: balancer.canonical_hosted_zone_id().map(str::to_string),
        dns_name: balancer.dns_name().map(str::to_string),
        ip_address_type: balancer
            .ip_address_type()
            .map(|t| t.as_str().to_string()),
        customer_owned_ipv4_pool: balancer.customer_owned_ipv4_pool().map(str::to_string),
        status: balancer
            .state()
            .and_then(|s| s.code())
            .map(|code| code.as_str().to_string()),
        security_groups: balancer.security_groups().to_vec(),
        subnets,
        subnet_mappings,
        attributes,
        tags,
        arn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn application_config() -> LoadBalancerConfig {
        LoadBalancerConfig {
            name: "example-alb".to_string(),
            kind: LoadBalancerKind::Application,
            internal: false,
            security_groups: vec!["sg-12345".to_string()],
            subnets: vec!["subnet-a".to_string(), "subnet-b".to_string()],
            subnet_mappings: Vec::new(),
            ip_address_type: None,
            customer_owned_ipv4_pool: None,
            access_logs: None,
            idle_timeout: 60,
            enable_deletion_protection: false,
            enable_http2: true,
            drop_invalid_header_fields: false,
            enable_cross_zone_load_balancing: false,
            tags: TagMap::new(),
        }
    }

    fn attribute_map(changes: &[LoadBalancerAttribute]) -> TagMap {
        changes
            .iter()
            .map(|a| {
                (
                    a.key().unwrap_or_default().to_string(),
                    a.value().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn name_charset_is_validated() {
        let mut config = application_config();
        config.name = "has_underscore".to_string();
        assert!(config.validate().is_err());
        config.name = "-leading".to_string();
        assert!(config.validate().is_err());
        config.name = "internal-lb".to_string();
        assert!(config.validate().is_err());
        config.name = "ok-name-1".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn subnets_and_mappings_conflict() {
        let mut config = application_config();
        config.subnet_mappings = vec![SubnetMappingConfig {
            subnet_id: "subnet-c".to_string(),
            allocation_id: None,
            private_ipv4_address: None,
            ipv6_address: None,
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn security_groups_rejected_for_network_balancers() {
        let mut config = application_config();
        config.kind = LoadBalancerKind::Network;
        assert!(config.validate().is_err());
        config.security_groups.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fresh_application_balancer_restates_all_attributes() {
        let config = application_config();
        let map = attribute_map(&build_attribute_changes(None, &config));

        assert_eq!(map.get(ATTR_DELETION_PROTECTION).unwrap(), "false");
        assert_eq!(map.get(ATTR_ACCESS_LOGS_ENABLED).unwrap(), "false");
        assert_eq!(map.get(ATTR_IDLE_TIMEOUT).unwrap(), "60");
        assert_eq!(map.get(ATTR_HTTP2).unwrap(), "true");
        assert_eq!(map.get(ATTR_DROP_INVALID_HEADERS).unwrap(), "false");
        assert!(!map.contains_key(ATTR_CROSS_ZONE));
    }

    #[test]
    fn unchanged_attributes_produce_no_changes() {
        let config = application_config();
        let baseline = LoadBalancerAttributes::default();
        assert!(build_attribute_changes(Some(&baseline), &config).is_empty());
    }

    #[test]
    fn only_the_changed_attribute_is_sent() {
        let mut config = application_config();
        config.idle_timeout = 400;
        let baseline = LoadBalancerAttributes::default();
        let map = attribute_map(&build_attribute_changes(Some(&baseline), &config));

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(ATTR_IDLE_TIMEOUT).unwrap(), "400");
    }

    #[test]
    fn access_logs_carry_bucket_and_prefix() {
        let mut config = application_config();
        config.access_logs = Some(AccessLogsConfig {
            bucket: "logs-bucket".to_string(),
            prefix: "alb".to_string(),
            enabled: true,
        });
        let baseline = LoadBalancerAttributes::default();
        let map = attribute_map(&build_attribute_changes(Some(&baseline), &config));

        assert_eq!(map.get(ATTR_ACCESS_LOGS_ENABLED).unwrap(), "true");
        assert_eq!(map.get(ATTR_ACCESS_LOGS_BUCKET).unwrap(), "logs-bucket");
        assert_eq!(map.get(ATTR_ACCESS_LOGS_PREFIX).unwrap(), "alb");
    }

    #[test]
    fn cross_zone_applies_to_network_balancers_only() {
        let mut config = application_config();
        config.kind = LoadBalancerKind::Network;
        config.security_groups.clear();
        config.enable_cross_zone_load_balancing = true;
        let baseline = LoadBalancerAttributes::default();
        let map = attribute_map(&build_attribute_changes(Some(&baseline), &config));

        assert_eq!(map.get(ATTR_CROSS_ZONE).unwrap(), "true");
        assert!(!map.contains_key(ATTR_IDLE_TIMEOUT));
        assert!(!map.contains_key(ATTR_HTTP2));
    }

    #[test]
    fn set_differs_ignores_order() {
        let a = vec!["sg-1".to_string(), "sg-2".to_string()];
        let b = vec!["sg-2".to_string(), "sg-1".to_string()];
        assert!(!set_differs(&a, &b));
        assert!(set_differs(&a, &["sg-3".to_string()]));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: LoadBalancerConfig = serde_json::from_value(serde_json::json!({
            "name": "example-alb",
            "subnets": ["subnet-a", "subnet-b"]
        }))
        .unwrap();
        assert_eq!(config.kind, LoadBalancerKind::Application);
        assert!(!config.internal);
        assert_eq!(config.idle_timeout, 60);
        assert!(config.enable_http2);
        assert!(!config.enable_deletion_protection);
    }
}
