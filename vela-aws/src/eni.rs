//! Leftover network interface cleanup after load balancer deletion
//!
//! Deleting a load balancer does not synchronously release the EC2 network
//! interfaces serving it. Application load balancers leave interfaces owned
//! by `amazon-elb` that can be force-detached and deleted; network load
//! balancer interfaces are owned by `amazon-aws` and can only be waited
//! out. Both sweeps are advisory: callers log failures and move on.

use std::time::Duration;

use aws_sdk_ec2::Client;
use aws_sdk_ec2::types::{Filter, NetworkInterface};

use vela_core::error::{ProviderError, ProviderResult, ResourceId};
use vela_core::retry::retry_transient;

use crate::arn;

const KIND: &str = "network_interface";

const DETACH_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DETACH_POLL_INTERVAL: Duration = Duration::from_secs(5);

fn filter(name: &str, value: impl Into<String>) -> Filter {
    Filter::builder().name(name).values(value).build()
}

/// EC2 tags load balancer interfaces with a description of the form
/// `ELB app/example-alb/b26e625cdde161e6`.
fn description_filter(balancer_arn: &str) -> ProviderResult<Filter> {
    let name = arn::load_balancer_name(balancer_arn)?;
    Ok(filter("description", format!("ELB {name}")))
}

/// Detaches and deletes the interfaces an application load balancer left
/// behind. Interfaces without an attachment id are deleted directly.
pub async fn cleanup_load_balancer_interfaces(
    client: &Client,
    balancer_arn: &str,
) -> ProviderResult<()> {
    let id = ResourceId::new(KIND, balancer_arn);
    let output = client
        .describe_network_interfaces()
        .filters(filter("attachment.instance-owner-id", "amazon-elb"))
        .filters(description_filter(balancer_arn)?)
        .send()
        .await
        .map_err(|e| ProviderError::request("cleanup", &id, e))?;

    let interfaces = output.network_interfaces();
    if interfaces.is_empty() {
        return Ok(());
    }
    log::debug!(
        "[{id}] sweeping {} leftover network interfaces",
        interfaces.len()
    );

    detach_interfaces(client, &id, interfaces).await?;
    delete_interfaces(client, &id, interfaces).await
}

/// Waits until the `amazon-aws` owned interfaces of a network load balancer
/// have detached. They delete themselves; forcing them is not possible.
pub async fn wait_for_interface_release(client: &Client, balancer_arn: &str) -> ProviderResult<()> {
    let id = ResourceId::new(KIND, balancer_arn);
    let description = description_filter(balancer_arn)?;

    retry_transient(DETACH_TIMEOUT, DETACH_POLL_INTERVAL, move || {
        let client = client.clone();
        let description = description.clone();
        let id = id.clone();
        async move {
            let output = client
                .describe_network_interfaces()
                .filters(filter("attachment.instance-owner-id", "amazon-aws"))
                .filters(filter("attachment.attachment-id", "ela-attach-*"))
                .filters(description)
                .send()
                .await
                .map_err(|e| ProviderError::request("cleanup", &id, e))?;

            let remaining = output.network_interfaces().len();
            if remaining > 0 {
                return Err(ProviderError::new(format!(
                    "{remaining} network interfaces still attached"
                ))
                .for_resource(id)
                .during("cleanup")
                .transient());
            }
            Ok(())
        }
    })
    .await
}

async fn detach_interfaces(
    client: &Client,
    id: &ResourceId,
    interfaces: &[NetworkInterface],
) -> ProviderResult<()> {
    for interface in interfaces {
        let Some(attachment_id) = interface.attachment().and_then(|a| a.attachment_id()) else {
            continue;
        };
        client
            .detach_network_interface()
            .attachment_id(attachment_id)
            .force(true)
            .send()
            .await
            .map_err(|e| ProviderError::request("cleanup", id, e))?;
    }
    Ok(())
}

async fn delete_interfaces(
    client: &Client,
    id: &ResourceId,
    interfaces: &[NetworkInterface],
) -> ProviderResult<()> {
    for interface in interfaces {
        let Some(interface_id) = interface.network_interface_id() else {
            continue;
        };
        client
            .delete_network_interface()
            .network_interface_id(interface_id)
            .send()
            .await
            .map_err(|e| ProviderError::request("cleanup", id, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_filter_uses_the_short_name() {
        let filter = description_filter(
            "arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/app/example-alb/b26e625cdde161e6",
        )
        .unwrap();
        assert_eq!(filter.name(), Some("description"));
        assert_eq!(
            filter.values(),
            ["ELB app/example-alb/b26e625cdde161e6".to_string()]
        );
    }

    #[test]
    fn description_filter_rejects_malformed_arns() {
        assert!(description_filter("not-an-arn").is_err());
    }
}
