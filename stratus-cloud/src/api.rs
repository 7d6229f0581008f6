use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

use crate::{
    error::CloudError,
    page::{DescribeRequest, Page},
    types::{
        CreateSecurityGroupInput, CreateSubnetInput, CreateVpcEndpointInput, CreateVpcInput,
        Instance, ModifyVpcEndpointInput, RunInstancesInput, SecurityGroup, Subnet, Subscription,
        Tag, Topic, Vpc, VpcEndpoint,
    },
};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.access_key_id.trim().is_empty() || self.secret_access_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// EC2 surface used by the network, security group and instance mappers.
#[async_trait]
pub trait Ec2Api: Send + Sync {
    async fn describe_vpcs(&self, request: DescribeRequest) -> Result<Page<Vpc>, CloudError>;
    async fn create_vpc(&self, input: CreateVpcInput) -> Result<Vpc, CloudError>;
    async fn delete_vpc(&self, vpc_id: &str) -> Result<(), CloudError>;

    async fn describe_subnets(&self, request: DescribeRequest) -> Result<Page<Subnet>, CloudError>;
    async fn create_subnet(&self, input: CreateSubnetInput) -> Result<Subnet, CloudError>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), CloudError>;

    async fn describe_vpc_endpoints(
        &self,
        request: DescribeRequest,
    ) -> Result<Page<VpcEndpoint>, CloudError>;
    async fn create_vpc_endpoint(
        &self,
        input: CreateVpcEndpointInput,
    ) -> Result<VpcEndpoint, CloudError>;
    async fn modify_vpc_endpoint(&self, input: ModifyVpcEndpointInput) -> Result<(), CloudError>;
    async fn delete_vpc_endpoints(&self, vpc_endpoint_ids: &[String]) -> Result<(), CloudError>;

    async fn describe_security_groups(
        &self,
        request: DescribeRequest,
    ) -> Result<Page<SecurityGroup>, CloudError>;
    async fn create_security_group(
        &self,
        input: CreateSecurityGroupInput,
    ) -> Result<SecurityGroup, CloudError>;
    async fn delete_security_group(&self, group_id: &str) -> Result<(), CloudError>;

    async fn describe_instances(
        &self,
        request: DescribeRequest,
    ) -> Result<Page<Instance>, CloudError>;
    async fn run_instances(&self, input: RunInstancesInput) -> Result<Instance, CloudError>;
    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<(), CloudError>;
    async fn modify_instance_security_groups(
        &self,
        instance_id: &str,
        group_ids: &[String],
    ) -> Result<(), CloudError>;

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), CloudError>;
    async fn delete_tags(&self, resource_id: &str, keys: &[String]) -> Result<(), CloudError>;
}

/// SNS surface used by the topic and subscription mappers.
#[async_trait]
pub trait SnsApi: Send + Sync {
    async fn list_topics(&self, next_token: Option<String>) -> Result<Page<String>, CloudError>;
    async fn get_topic_attributes(&self, topic_arn: &str) -> Result<Topic, CloudError>;
    async fn create_topic(
        &self,
        name: &str,
        display_name: Option<&str>,
        policy: Option<&str>,
        delivery_policy: Option<&str>,
    ) -> Result<String, CloudError>;
    async fn delete_topic(&self, topic_arn: &str) -> Result<(), CloudError>;

    async fn list_subscriptions(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<Subscription>, CloudError>;
    async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<Subscription>, CloudError>;
    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<Subscription, CloudError>;
    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), CloudError>;
}

/// A provider client bound to exactly one region.
#[derive(Clone)]
pub struct RegionClient {
    pub region: String,
    pub ec2: Arc<dyn Ec2Api>,
    pub sns: Arc<dyn SnsApi>,
}

impl fmt::Debug for RegionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionClient")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Builds region-scoped clients from stored account credentials.
#[async_trait]
pub trait CloudConnector: Send + Sync {
    async fn connect(
        &self,
        region: &str,
        credentials: &Credentials,
    ) -> Result<RegionClient, CloudError>;

    /// Regions the account may enable.
    fn available_regions(&self) -> Vec<String>;
}
