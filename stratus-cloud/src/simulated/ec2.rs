use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use super::{Describable, Pending, RegionState, Shared, describe, name_tag, validate_cidr};
use crate::{
    api::Ec2Api,
    error::CloudError,
    page::{DescribeRequest, Page},
    types::{
        CreateSecurityGroupInput, CreateSubnetInput, CreateVpcEndpointInput, CreateVpcInput,
        Instance, InstanceState, ModifyVpcEndpointInput, ResourceState, RunInstancesInput,
        SecurityGroup, Subnet, Tag, Vpc, VpcEndpoint, VpcEndpointState,
    },
};

const ENDPOINT_SERVICES: [&str; 8] = [
    "s3", "dynamodb", "sns", "sqs", "ec2", "lambda", "logs", "kms",
];

pub struct SimulatedEc2 {
    region: String,
    shared: Arc<Shared>,
}

impl SimulatedEc2 {
    pub(super) fn new(region: &str, shared: Arc<Shared>) -> Self {
        Self {
            region: region.to_string(),
            shared,
        }
    }

    fn service_is_known(&self, service_name: &str) -> bool {
        let prefix = format!("com.amazonaws.{}.", self.region);
        service_name
            .strip_prefix(&prefix)
            .is_some_and(|service| ENDPOINT_SERVICES.contains(&service))
    }
}

impl Describable for Vpc {
    const RESOURCE: &'static str = "vpc";

    fn id(&self) -> &str {
        &self.vpc_id
    }

    fn filter_field(&self, name: &str) -> Option<Vec<String>> {
        match name {
            "vpc-id" => Some(vec![self.vpc_id.clone()]),
            "cidr-block" => Some(vec![self.cidr_block.clone()]),
            "is-default" => Some(vec![self.is_default.to_string()]),
            _ => None,
        }
    }
}

impl Describable for Subnet {
    const RESOURCE: &'static str = "subnet";

    fn id(&self) -> &str {
        &self.subnet_id
    }

    fn filter_field(&self, name: &str) -> Option<Vec<String>> {
        match name {
            "vpc-id" => Some(vec![self.vpc_id.clone()]),
            "availability-zone" => Some(vec![self.availability_zone.clone()]),
            "default-for-az" => Some(vec![self.default_for_az.to_string()]),
            _ => None,
        }
    }
}

impl Describable for VpcEndpoint {
    const RESOURCE: &'static str = "vpc endpoint";

    fn id(&self) -> &str {
        &self.vpc_endpoint_id
    }

    fn filter_field(&self, name: &str) -> Option<Vec<String>> {
        match name {
            "vpc-id" => Some(vec![self.vpc_id.clone()]),
            "service-name" => Some(vec![self.service_name.clone()]),
            "vpc-endpoint-type" => Some(vec![self.vpc_endpoint_type.clone()]),
            "vpc-endpoint-state" => Some(vec![self.state.as_str().to_string()]),
            _ => None,
        }
    }
}

impl Describable for SecurityGroup {
    const RESOURCE: &'static str = "security group";

    fn id(&self) -> &str {
        &self.group_id
    }

    fn filter_field(&self, name: &str) -> Option<Vec<String>> {
        match name {
            "vpc-id" => Some(vec![self.vpc_id.clone()]),
            "group-name" => Some(vec![self.group_name.clone()]),
            _ => None,
        }
    }
}

impl Describable for Instance {
    const RESOURCE: &'static str = "instance";

    fn id(&self) -> &str {
        &self.instance_id
    }

    fn filter_field(&self, name: &str) -> Option<Vec<String>> {
        match name {
            "vpc-id" => Some(vec![self.vpc_id.clone()]),
            "subnet-id" => Some(vec![self.subnet_id.clone()]),
            "instance-state-name" => Some(vec![self.state.as_str().to_string()]),
            "instance.group-id" => Some(self.security_group_ids.clone()),
            _ => None,
        }
    }
}

impl RegionState {
    fn settle_endpoints(&mut self) {
        let mut gone = Vec::new();
        for (id, entry) in &mut self.endpoints {
            let current = entry.item.state;
            match current {
                VpcEndpointState::Pending if entry.poll() => {
                    entry.item.state = VpcEndpointState::Available;
                }
                VpcEndpointState::Deleting if entry.poll() => gone.push(id.clone()),
                _ => {}
            }
        }
        for id in gone {
            self.endpoints.remove(&id);
        }
    }

    fn settle_instances(&mut self) {
        for entry in self.instances.values_mut() {
            let current = entry.item.state;
            match current {
                InstanceState::Pending if entry.poll() => {
                    entry.item.state = InstanceState::Running;
                }
                InstanceState::ShuttingDown if entry.poll() => {
                    entry.item.state = InstanceState::Terminated;
                }
                _ => {}
            }
        }
    }

    fn live_instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances
            .values()
            .map(|entry| &entry.item)
            .filter(|instance| instance.state != InstanceState::Terminated)
    }
}

fn merge_tags(target: &mut Vec<Tag>, tags: &[Tag]) {
    for tag in tags {
        match target.iter_mut().find(|t| t.key == tag.key) {
            Some(existing) => existing.value.clone_from(&tag.value),
            None => target.push(tag.clone()),
        }
    }
}

#[async_trait]
impl Ec2Api for SimulatedEc2 {
    async fn describe_vpcs(&self, request: DescribeRequest) -> Result<Page<Vpc>, CloudError> {
        self.shared
            .with_region(&self.region, "DescribeVpcs", &[], |state, _, settings| {
                describe(state.vpcs.values(), &request, settings.page_size)
            })
    }

    async fn create_vpc(&self, input: CreateVpcInput) -> Result<Vpc, CloudError> {
        let subjects = [
            input.cidr_block.as_str(),
            name_tag(&input.tags).unwrap_or_default(),
        ];
        self.shared
            .with_region(&self.region, "CreateVpc", &subjects, |state, ids, settings| {
                validate_cidr(&input.cidr_block)?;
                let vpc = Vpc {
                    vpc_id: ids.ec2("vpc"),
                    cidr_block: input.cidr_block.clone(),
                    state: ResourceState::Available,
                    is_default: false,
                    owner_id: settings.account_id.clone(),
                    tags: input.tags.clone(),
                };
                state.vpcs.insert(vpc.vpc_id.clone(), vpc.clone());
                state.add_default_group(&vpc.vpc_id, ids, settings);
                Ok(vpc)
            })
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<(), CloudError> {
        self.shared
            .with_region(&self.region, "DeleteVpc", &[vpc_id], |state, _, _| {
                if !state.vpcs.contains_key(vpc_id) {
                    return Err(CloudError::not_found("vpc", vpc_id));
                }
                let in_use = state.subnets.values().any(|s| s.vpc_id == vpc_id)
                    || state.endpoints.values().any(|e| e.item.vpc_id == vpc_id)
                    || state.live_instances().any(|i| i.vpc_id == vpc_id)
                    || state
                        .security_groups
                        .values()
                        .any(|g| g.vpc_id == vpc_id && g.group_name != "default");
                if in_use {
                    return Err(CloudError::DependencyViolation(format!(
                        "vpc {vpc_id} has dependencies and cannot be deleted"
                    )));
                }
                state
                    .security_groups
                    .retain(|_, group| group.vpc_id != vpc_id);
                state.vpcs.remove(vpc_id);
                Ok(())
            })
    }

    async fn describe_subnets(&self, request: DescribeRequest) -> Result<Page<Subnet>, CloudError> {
        self.shared
            .with_region(&self.region, "DescribeSubnets", &[], |state, _, settings| {
                describe(state.subnets.values(), &request, settings.page_size)
            })
    }

    async fn create_subnet(&self, input: CreateSubnetInput) -> Result<Subnet, CloudError> {
        let region = self.region.as_str();
        let subjects = [
            input.cidr_block.as_str(),
            name_tag(&input.tags).unwrap_or_default(),
        ];
        self.shared
            .with_region(region, "CreateSubnet", &subjects, |state, ids, settings| {
                validate_cidr(&input.cidr_block)?;
                if !state.vpcs.contains_key(&input.vpc_id) {
                    return Err(CloudError::not_found("vpc", &input.vpc_id));
                }
                let zone = match &input.availability_zone {
                    Some(zone) => {
                        if !RegionState::availability_zones(region).any(|z| &z == zone) {
                            return Err(CloudError::InvalidParameter(format!(
                                "unknown availability zone '{zone}'"
                            )));
                        }
                        zone.clone()
                    }
                    None => format!("{region}a"),
                };
                let conflict = state
                    .subnets
                    .values()
                    .any(|s| s.vpc_id == input.vpc_id && s.cidr_block == input.cidr_block);
                if conflict {
                    return Err(CloudError::InvalidParameter(format!(
                        "cidr {} conflicts with another subnet",
                        input.cidr_block
                    )));
                }
                let subnet = Subnet {
                    subnet_id: ids.ec2("subnet"),
                    vpc_id: input.vpc_id.clone(),
                    cidr_block: input.cidr_block.clone(),
                    availability_zone: zone,
                    available_ip_address_count: 251,
                    default_for_az: false,
                    map_public_ip_on_launch: false,
                    state: ResourceState::Available,
                    owner_id: settings.account_id.clone(),
                    tags: input.tags.clone(),
                };
                state
                    .subnets
                    .insert(subnet.subnet_id.clone(), subnet.clone());
                Ok(subnet)
            })
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), CloudError> {
        self.shared
            .with_region(&self.region, "DeleteSubnet", &[subnet_id], |state, _, _| {
                if !state.subnets.contains_key(subnet_id) {
                    return Err(CloudError::not_found("subnet", subnet_id));
                }
                let in_use = state.live_instances().any(|i| i.subnet_id == subnet_id)
                    || state
                        .endpoints
                        .values()
                        .any(|e| e.item.subnet_ids.iter().any(|s| s == subnet_id));
                if in_use {
                    return Err(CloudError::DependencyViolation(format!(
                        "subnet {subnet_id} has dependencies and cannot be deleted"
                    )));
                }
                state.subnets.remove(subnet_id);
                Ok(())
            })
    }

    async fn describe_vpc_endpoints(
        &self,
        request: DescribeRequest,
    ) -> Result<Page<VpcEndpoint>, CloudError> {
        self.shared.with_region(
            &self.region,
            "DescribeVpcEndpoints",
            &[],
            |state, _, settings| {
                state.settle_endpoints();
                describe(
                    state.endpoints.values().map(|e| &e.item),
                    &request,
                    settings.page_size,
                )
            },
        )
    }

    async fn create_vpc_endpoint(
        &self,
        input: CreateVpcEndpointInput,
    ) -> Result<VpcEndpoint, CloudError> {
        if !self.service_is_known(&input.service_name) {
            return Err(CloudError::InvalidParameter(format!(
                "unknown endpoint service '{}'",
                input.service_name
            )));
        }
        let subjects = [
            input.service_name.as_str(),
            name_tag(&input.tags).unwrap_or_default(),
        ];
        self.shared.with_region(
            &self.region,
            "CreateVpcEndpoint",
            &subjects,
            |state, ids, settings| {
                if !state.vpcs.contains_key(&input.vpc_id) {
                    return Err(CloudError::not_found("vpc", &input.vpc_id));
                }
                for subnet_id in &input.subnet_ids {
                    match state.subnets.get(subnet_id) {
                        Some(subnet) if subnet.vpc_id == input.vpc_id => {}
                        Some(_) => {
                            return Err(CloudError::InvalidParameter(format!(
                                "subnet {subnet_id} is not in vpc {}",
                                input.vpc_id
                            )));
                        }
                        None => return Err(CloudError::not_found("subnet", subnet_id)),
                    }
                }
                if let Some(policy) = &input.policy_document
                    && serde_json::from_str::<serde_json::Value>(policy).is_err()
                {
                    return Err(CloudError::InvalidParameter(
                        "policy document is not valid JSON".to_string(),
                    ));
                }
                let state_now = if settings.settle_polls == 0 {
                    VpcEndpointState::Available
                } else {
                    VpcEndpointState::Pending
                };
                let endpoint = VpcEndpoint {
                    vpc_endpoint_id: ids.ec2("vpce"),
                    vpc_endpoint_type: "Interface".to_string(),
                    vpc_id: input.vpc_id.clone(),
                    service_name: input.service_name.clone(),
                    state: state_now,
                    policy_document: input.policy_document.clone(),
                    subnet_ids: input.subnet_ids.clone(),
                    private_dns_enabled: input.private_dns_enabled,
                    dns_record_ip_type: input.dns_record_ip_type,
                    tags: input.tags.clone(),
                };
                state.endpoints.insert(
                    endpoint.vpc_endpoint_id.clone(),
                    Pending::new(endpoint.clone(), settings.settle_polls),
                );
                Ok(endpoint)
            },
        )
    }

    async fn modify_vpc_endpoint(&self, input: ModifyVpcEndpointInput) -> Result<(), CloudError> {
        self.shared.with_region(
            &self.region,
            "ModifyVpcEndpoint",
            &[input.vpc_endpoint_id.as_str()],
            |state, _, settings| {
                let Some(entry) = state.endpoints.get(&input.vpc_endpoint_id) else {
                    return Err(CloudError::not_found("vpc endpoint", &input.vpc_endpoint_id));
                };
                let vpc_id = entry.item.vpc_id.clone();
                for subnet_id in &input.add_subnet_ids {
                    if !state
                        .subnets
                        .get(subnet_id)
                        .is_some_and(|s| s.vpc_id == vpc_id)
                    {
                        return Err(CloudError::InvalidParameter(format!(
                            "subnet {subnet_id} is not in vpc {vpc_id}"
                        )));
                    }
                }

                let Some(entry) = state.endpoints.get_mut(&input.vpc_endpoint_id) else {
                    return Err(CloudError::not_found("vpc endpoint", &input.vpc_endpoint_id));
                };
                let endpoint = &mut entry.item;
                if input.reset_policy {
                    endpoint.policy_document = None;
                } else if let Some(policy) = &input.policy_document {
                    endpoint.policy_document = Some(policy.clone());
                }
                endpoint
                    .subnet_ids
                    .retain(|s| !input.remove_subnet_ids.contains(s));
                for subnet_id in &input.add_subnet_ids {
                    if !endpoint.subnet_ids.contains(subnet_id) {
                        endpoint.subnet_ids.push(subnet_id.clone());
                    }
                }
                if settings.settle_polls > 0 {
                    endpoint.state = VpcEndpointState::Pending;
                    entry.polls_left = settings.settle_polls;
                }
                Ok(())
            },
        )
    }

    async fn delete_vpc_endpoints(&self, vpc_endpoint_ids: &[String]) -> Result<(), CloudError> {
        let subjects: Vec<&str> = vpc_endpoint_ids.iter().map(String::as_str).collect();
        self.shared.with_region(
            &self.region,
            "DeleteVpcEndpoints",
            &subjects,
            |state, _, settings| {
                for id in vpc_endpoint_ids {
                    if settings.settle_polls == 0 {
                        state.endpoints.remove(id);
                        continue;
                    }
                    if let Some(entry) = state.endpoints.get_mut(id) {
                        entry.item.state = VpcEndpointState::Deleting;
                        entry.polls_left = settings.settle_polls;
                    }
                }
                Ok(())
            },
        )
    }

    async fn describe_security_groups(
        &self,
        request: DescribeRequest,
    ) -> Result<Page<SecurityGroup>, CloudError> {
        self.shared.with_region(
            &self.region,
            "DescribeSecurityGroups",
            &[],
            |state, _, settings| {
                describe(state.security_groups.values(), &request, settings.page_size)
            },
        )
    }

    async fn create_security_group(
        &self,
        input: CreateSecurityGroupInput,
    ) -> Result<SecurityGroup, CloudError> {
        self.shared.with_region(
            &self.region,
            "CreateSecurityGroup",
            &[input.group_name.as_str()],
            |state, ids, settings| {
                if input.group_name == "default" {
                    return Err(CloudError::InvalidParameter(
                        "group name 'default' is reserved".to_string(),
                    ));
                }
                if !state.vpcs.contains_key(&input.vpc_id) {
                    return Err(CloudError::not_found("vpc", &input.vpc_id));
                }
                let duplicate = state
                    .security_groups
                    .values()
                    .any(|g| g.vpc_id == input.vpc_id && g.group_name == input.group_name);
                if duplicate {
                    return Err(CloudError::InvalidParameter(format!(
                        "security group '{}' already exists in vpc {}",
                        input.group_name, input.vpc_id
                    )));
                }
                let group = SecurityGroup {
                    group_id: ids.ec2("sg"),
                    group_name: input.group_name.clone(),
                    description: input.description.clone(),
                    vpc_id: input.vpc_id.clone(),
                    owner_id: settings.account_id.clone(),
                    tags: input.tags.clone(),
                };
                state
                    .security_groups
                    .insert(group.group_id.clone(), group.clone());
                Ok(group)
            },
        )
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), CloudError> {
        self.shared.with_region(
            &self.region,
            "DeleteSecurityGroup",
            &[group_id],
            |state, _, _| {
                let Some(group) = state.security_groups.get(group_id) else {
                    return Err(CloudError::not_found("security group", group_id));
                };
                if group.group_name == "default" {
                    return Err(CloudError::InvalidParameter(format!(
                        "default security group {group_id} cannot be deleted"
                    )));
                }
                if state
                    .live_instances()
                    .any(|i| i.security_group_ids.iter().any(|g| g == group_id))
                {
                    return Err(CloudError::DependencyViolation(format!(
                        "security group {group_id} is in use"
                    )));
                }
                state.security_groups.remove(group_id);
                Ok(())
            },
        )
    }

    async fn describe_instances(
        &self,
        request: DescribeRequest,
    ) -> Result<Page<Instance>, CloudError> {
        self.shared.with_region(
            &self.region,
            "DescribeInstances",
            &[],
            |state, _, settings| {
                state.settle_instances();
                describe(
                    state.instances.values().map(|e| &e.item),
                    &request,
                    settings.page_size,
                )
            },
        )
    }

    async fn run_instances(&self, input: RunInstancesInput) -> Result<Instance, CloudError> {
        let subjects = [
            input.image_id.as_str(),
            name_tag(&input.tags).unwrap_or_default(),
        ];
        self.shared.with_region(
            &self.region,
            "RunInstances",
            &subjects,
            |state, ids, settings| {
                if !input.image_id.starts_with("ami-") {
                    return Err(CloudError::InvalidParameter(format!(
                        "invalid image id '{}'",
                        input.image_id
                    )));
                }
                if input.instance_type.trim().is_empty() {
                    return Err(CloudError::InvalidParameter(
                        "instance type is required".to_string(),
                    ));
                }

                let subnet = match &input.subnet_id {
                    Some(subnet_id) => state
                        .subnets
                        .get(subnet_id)
                        .ok_or_else(|| CloudError::not_found("subnet", subnet_id))?,
                    None => state
                        .subnets
                        .values()
                        .filter(|s| s.default_for_az)
                        .min_by(|a, b| a.availability_zone.cmp(&b.availability_zone))
                        .ok_or_else(|| {
                            CloudError::InvalidParameter("no default subnet".to_string())
                        })?,
                };
                let subnet_id = subnet.subnet_id.clone();
                let vpc_id = subnet.vpc_id.clone();

                let mut group_ids = input.security_group_ids.clone();
                if group_ids.is_empty() {
                    let default = state
                        .security_groups
                        .values()
                        .find(|g| g.vpc_id == vpc_id && g.group_name == "default")
                        .ok_or_else(|| CloudError::not_found("security group", "default"))?;
                    group_ids.push(default.group_id.clone());
                }
                for group_id in &group_ids {
                    match state.security_groups.get(group_id) {
                        Some(group) if group.vpc_id == vpc_id => {}
                        Some(_) => {
                            return Err(CloudError::InvalidParameter(format!(
                                "security group {group_id} is not in vpc {vpc_id}"
                            )));
                        }
                        None => return Err(CloudError::not_found("security group", group_id)),
                    }
                }

                let instance = Instance {
                    instance_id: ids.ec2("i"),
                    image_id: input.image_id.clone(),
                    instance_type: input.instance_type.clone(),
                    subnet_id,
                    vpc_id,
                    security_group_ids: group_ids,
                    state: if settings.settle_polls == 0 {
                        InstanceState::Running
                    } else {
                        InstanceState::Pending
                    },
                    launch_time: Utc::now(),
                    tags: input.tags.clone(),
                };
                state.instances.insert(
                    instance.instance_id.clone(),
                    Pending::new(instance.clone(), settings.settle_polls),
                );
                Ok(instance)
            },
        )
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<(), CloudError> {
        let subjects: Vec<&str> = instance_ids.iter().map(String::as_str).collect();
        self.shared.with_region(
            &self.region,
            "TerminateInstances",
            &subjects,
            |state, _, settings| {
                for id in instance_ids {
                    let Some(entry) = state.instances.get_mut(id) else {
                        return Err(CloudError::not_found("instance", id));
                    };
                    if entry.item.state == InstanceState::Terminated {
                        continue;
                    }
                    if settings.settle_polls == 0 {
                        entry.item.state = InstanceState::Terminated;
                    } else {
                        entry.item.state = InstanceState::ShuttingDown;
                        entry.polls_left = settings.settle_polls;
                    }
                }
                Ok(())
            },
        )
    }

    async fn modify_instance_security_groups(
        &self,
        instance_id: &str,
        group_ids: &[String],
    ) -> Result<(), CloudError> {
        self.shared.with_region(
            &self.region,
            "ModifyInstanceAttribute",
            &[instance_id],
            |state, _, _| {
                if group_ids.is_empty() {
                    return Err(CloudError::InvalidParameter(
                        "at least one security group is required".to_string(),
                    ));
                }
                let Some(vpc_id) = state
                    .instances
                    .get(instance_id)
                    .filter(|e| e.item.state != InstanceState::Terminated)
                    .map(|e| e.item.vpc_id.clone())
                else {
                    return Err(CloudError::not_found("instance", instance_id));
                };
                for group_id in group_ids {
                    if !state
                        .security_groups
                        .get(group_id)
                        .is_some_and(|g| g.vpc_id == vpc_id)
                    {
                        return Err(CloudError::InvalidParameter(format!(
                            "security group {group_id} is not in vpc {vpc_id}"
                        )));
                    }
                }
                if let Some(entry) = state.instances.get_mut(instance_id) {
                    entry.item.security_group_ids = group_ids.to_vec();
                }
                Ok(())
            },
        )
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), CloudError> {
        self.shared
            .with_region(&self.region, "CreateTags", &[resource_id], |state, _, _| {
                let target = state
                    .tags_mut(resource_id)
                    .ok_or_else(|| CloudError::not_found("resource", resource_id))?;
                merge_tags(target, tags);
                Ok(())
            })
    }

    async fn delete_tags(&self, resource_id: &str, keys: &[String]) -> Result<(), CloudError> {
        self.shared
            .with_region(&self.region, "DeleteTags", &[resource_id], |state, _, _| {
                let target = state
                    .tags_mut(resource_id)
                    .ok_or_else(|| CloudError::not_found("resource", resource_id))?;
                target.retain(|t| !keys.contains(&t.key));
                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api::{CloudConnector, Credentials, Ec2Api},
        page::DescribeRequest,
        simulated::SimulatedCloud,
        types::{
            CreateSecurityGroupInput, CreateVpcEndpointInput, CreateVpcInput, InstanceState,
            RunInstancesInput, VpcEndpointState,
        },
        CloudError,
    };

    async fn client(cloud: &SimulatedCloud) -> std::sync::Arc<dyn Ec2Api> {
        cloud
            .connect("us-east-1", &Credentials::new("AKID", "secret"))
            .await
            .unwrap()
            .ec2
    }

    #[tokio::test]
    async fn endpoint_becomes_available_then_disappears() {
        let cloud = SimulatedCloud::builder().settle_polls(2).build();
        let ec2 = client(&cloud).await;
        let vpc = ec2
            .create_vpc(CreateVpcInput {
                cidr_block: "10.1.0.0/16".into(),
                tags: vec![],
            })
            .await
            .unwrap();

        let endpoint = ec2
            .create_vpc_endpoint(CreateVpcEndpointInput {
                vpc_id: vpc.vpc_id.clone(),
                service_name: "com.amazonaws.us-east-1.s3".into(),
                ..CreateVpcEndpointInput::default()
            })
            .await
            .unwrap();
        assert_eq!(endpoint.state, VpcEndpointState::Pending);

        let by_id = DescribeRequest::by_id(&endpoint.vpc_endpoint_id);
        let first = ec2.describe_vpc_endpoints(by_id.clone()).await.unwrap();
        assert_eq!(first.items[0].state, VpcEndpointState::Pending);
        let second = ec2.describe_vpc_endpoints(by_id.clone()).await.unwrap();
        assert_eq!(second.items[0].state, VpcEndpointState::Available);

        ec2.delete_vpc_endpoints(std::slice::from_ref(&endpoint.vpc_endpoint_id))
            .await
            .unwrap();
        ec2.describe_vpc_endpoints(by_id.clone()).await.unwrap();
        let err = ec2.describe_vpc_endpoints(by_id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn unknown_endpoint_service_is_rejected() {
        let cloud = SimulatedCloud::default();
        let ec2 = client(&cloud).await;
        let err = ec2
            .create_vpc_endpoint(CreateVpcEndpointInput {
                vpc_id: "vpc-x".into(),
                service_name: "com.amazonaws.us-east-1.nope".into(),
                ..CreateVpcEndpointInput::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn group_in_use_cannot_be_deleted_until_instance_terminates() {
        let cloud = SimulatedCloud::builder().settle_polls(0).build();
        let ec2 = client(&cloud).await;
        let default_vpc = ec2
            .describe_vpcs(DescribeRequest::all().with_filter("is-default", "true"))
            .await
            .unwrap()
            .items
            .remove(0);
        let group = ec2
            .create_security_group(CreateSecurityGroupInput {
                group_name: "web".into(),
                description: "web tier".into(),
                vpc_id: default_vpc.vpc_id.clone(),
                tags: vec![],
            })
            .await
            .unwrap();
        let instance = ec2
            .run_instances(RunInstancesInput {
                image_id: "ami-0abc".into(),
                instance_type: "t3.micro".into(),
                security_group_ids: vec![group.group_id.clone()],
                ..RunInstancesInput::default()
            })
            .await
            .unwrap();
        assert_eq!(instance.state, InstanceState::Running);

        let err = ec2.delete_security_group(&group.group_id).await.unwrap_err();
        assert!(matches!(err, CloudError::DependencyViolation(_)));

        ec2.terminate_instances(std::slice::from_ref(&instance.instance_id))
            .await
            .unwrap();
        ec2.delete_security_group(&group.group_id).await.unwrap();
    }

    #[tokio::test]
    async fn default_group_is_reserved() {
        let cloud = SimulatedCloud::default();
        let ec2 = client(&cloud).await;
        let default = ec2
            .describe_security_groups(DescribeRequest::all().with_filter("group-name", "default"))
            .await
            .unwrap()
            .items
            .remove(0);
        let err = ec2.delete_security_group(&default.group_id).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidParameter(_)));
    }
}
