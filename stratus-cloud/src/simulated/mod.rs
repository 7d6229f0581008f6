//! In-process provider with per-region state.
//!
//! Every region starts with the resources a fresh account has: a default VPC with one default
//! subnet per availability zone and a `default` security group. Endpoints and instances move
//! through their transitional states after a configurable number of describe polls. Faults can
//! be injected per operation to exercise retry and per-record failure paths.

mod ec2;
mod sns;

use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    api::{CloudConnector, Credentials, RegionClient},
    error::CloudError,
    page::{DescribeRequest, Page},
    types::{
        Instance, ResourceState, SecurityGroup, Subnet, Subscription, Tag, Topic, Vpc,
        VpcEndpoint,
    },
};

pub use ec2::SimulatedEc2;
pub use sns::SimulatedSns;

const DEFAULT_ACCOUNT_ID: &str = "123456789012";
const DEFAULT_VPC_CIDR: &str = "172.31.0.0/16";
const DEFAULT_SUBNET_CIDRS: [(&str, &str); 3] = [
    ("a", "172.31.0.0/20"),
    ("b", "172.31.16.0/20"),
    ("c", "172.31.32.0/20"),
];

/// A scripted failure for one provider operation.
#[derive(Debug, Clone)]
pub struct Fault {
    pub operation: String,
    pub subject: Option<String>,
    pub error: CloudError,
    pub remaining: Option<u32>,
}

impl Fault {
    /// Fails every call to `operation`.
    pub fn always(operation: impl Into<String>, error: CloudError) -> Self {
        Self {
            operation: operation.into(),
            subject: None,
            error,
            remaining: None,
        }
    }

    /// Fails the next `times` calls to `operation`, then lets calls through.
    pub fn times(operation: impl Into<String>, times: u32, error: CloudError) -> Self {
        Self {
            operation: operation.into(),
            subject: None,
            error,
            remaining: Some(times),
        }
    }

    /// Restrict the fault to calls about one subject (an id, a name, a cidr or a `Name` tag).
    #[must_use]
    pub fn for_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    fn matches(&self, operation: &str, subjects: &[&str]) -> bool {
        if self.operation != operation || self.remaining == Some(0) {
            return false;
        }
        match &self.subject {
            Some(subject) => subjects.iter().any(|s| s == subject),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
struct Settings {
    regions: Vec<String>,
    page_size: usize,
    settle_polls: u32,
    account_id: String,
    credentials: Option<Credentials>,
}

pub struct SimulatedCloudBuilder {
    settings: Settings,
    faults: Vec<Fault>,
}

impl SimulatedCloudBuilder {
    #[must_use]
    pub fn regions<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    /// Listing page size; small values exercise continuation tokens.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.settings.page_size = page_size.max(1);
        self
    }

    /// Describe polls a pending endpoint or instance needs before it settles.
    #[must_use]
    pub fn settle_polls(mut self, polls: u32) -> Self {
        self.settings.settle_polls = polls;
        self
    }

    /// Endpoints and instances stay in their transitional state forever.
    #[must_use]
    pub fn never_settle(mut self) -> Self {
        self.settings.settle_polls = u32::MAX;
        self
    }

    /// Only these credentials are accepted; without this any non-blank pair is.
    #[must_use]
    pub fn accept_only(mut self, credentials: Credentials) -> Self {
        self.settings.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn build(self) -> SimulatedCloud {
        SimulatedCloud {
            shared: Arc::new(Shared {
                settings: self.settings,
                state: Mutex::new(CloudState {
                    faults: self.faults,
                    ..CloudState::default()
                }),
            }),
        }
    }
}

/// Cloneable handle; clones share one simulated account.
#[derive(Clone)]
pub struct SimulatedCloud {
    shared: Arc<Shared>,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimulatedCloud {
    pub fn builder() -> SimulatedCloudBuilder {
        SimulatedCloudBuilder {
            settings: Settings {
                regions: vec![
                    "us-east-1".to_string(),
                    "us-west-2".to_string(),
                    "eu-west-1".to_string(),
                ],
                page_size: 50,
                settle_polls: 1,
                account_id: DEFAULT_ACCOUNT_ID.to_string(),
                credentials: None,
            },
            faults: Vec::new(),
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.shared.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.shared.lock().faults.clear();
    }

    /// Number of calls made to `operation` across all regions, including failed ones.
    pub fn call_count(&self, operation: &str) -> u64 {
        self.shared
            .lock()
            .calls
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    pub fn account_id(&self) -> &str {
        &self.shared.settings.account_id
    }

    /// Client for `region` without a credential check, for seeding state in tests.
    pub fn region_client(&self, region: &str) -> RegionClient {
        RegionClient {
            region: region.to_string(),
            ec2: Arc::new(SimulatedEc2::new(region, self.shared.clone())),
            sns: Arc::new(SimulatedSns::new(region, self.shared.clone())),
        }
    }
}

#[async_trait]
impl CloudConnector for SimulatedCloud {
    async fn connect(
        &self,
        region: &str,
        credentials: &Credentials,
    ) -> Result<RegionClient, CloudError> {
        {
            let mut state = self.shared.lock();
            *state.calls.entry("Connect").or_default() += 1;
            state.check_fault("Connect", &[region])?;
        }
        if credentials.is_blank() {
            return Err(CloudError::Unauthorized(
                "missing access key id or secret access key".to_string(),
            ));
        }
        if let Some(expected) = &self.shared.settings.credentials
            && expected != credentials
        {
            return Err(CloudError::Unauthorized(format!(
                "access key {} is not valid",
                credentials.access_key_id
            )));
        }
        if !self.shared.settings.regions.iter().any(|r| r == region) {
            return Err(CloudError::RegionNotEnabled(region.to_string()));
        }
        Ok(self.region_client(region))
    }

    fn available_regions(&self) -> Vec<String> {
        self.shared.settings.regions.clone()
    }
}

struct Shared {
    settings: Settings,
    state: Mutex<CloudState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against one region's state after counting the call and checking faults.
    fn with_region<R>(
        &self,
        region: &str,
        operation: &'static str,
        subjects: &[&str],
        f: impl FnOnce(&mut RegionState, &mut IdGen, &Settings) -> Result<R, CloudError>,
    ) -> Result<R, CloudError> {
        let mut guard = self.lock();
        let CloudState {
            regions,
            faults,
            calls,
            ids,
        } = &mut *guard;

        *calls.entry(operation).or_default() += 1;
        check_faults(faults, operation, subjects)?;

        let region_state = regions
            .entry(region.to_string())
            .or_insert_with(|| RegionState::seeded(region, ids, &self.settings));
        f(region_state, ids, &self.settings)
    }
}

#[derive(Default)]
struct CloudState {
    regions: HashMap<String, RegionState>,
    faults: Vec<Fault>,
    calls: HashMap<&'static str, u64>,
    ids: IdGen,
}

impl CloudState {
    fn check_fault(&mut self, operation: &str, subjects: &[&str]) -> Result<(), CloudError> {
        check_faults(&mut self.faults, operation, subjects)
    }
}

fn check_faults(
    faults: &mut [Fault],
    operation: &str,
    subjects: &[&str],
) -> Result<(), CloudError> {
    let Some(fault) = faults.iter_mut().find(|f| f.matches(operation, subjects)) else {
        return Ok(());
    };
    if let Some(remaining) = fault.remaining.as_mut() {
        *remaining = remaining.saturating_sub(1);
    }
    Err(fault.error.clone())
}

#[derive(Default)]
struct IdGen {
    next: u64,
}

impl IdGen {
    /// EC2-style id: prefix plus 17 hex digits.
    fn ec2(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("{prefix}-{:017x}", self.next)
    }

    fn uuid_like(&mut self) -> String {
        self.next += 1;
        format!("{:08x}-0000-4000-8000-{:012x}", self.next, self.next)
    }
}

/// Counts down describe polls until a transitional state settles.
#[derive(Debug, Clone)]
struct Pending<T> {
    item: T,
    polls_left: u32,
}

impl<T> Pending<T> {
    fn new(item: T, polls: u32) -> Self {
        Self {
            item,
            polls_left: polls,
        }
    }

    /// Returns `true` once the countdown has run out.
    fn poll(&mut self) -> bool {
        if self.polls_left == u32::MAX {
            return false;
        }
        self.polls_left = self.polls_left.saturating_sub(1);
        self.polls_left == 0
    }
}

#[derive(Default)]
struct RegionState {
    vpcs: BTreeMap<String, Vpc>,
    subnets: BTreeMap<String, Subnet>,
    endpoints: BTreeMap<String, Pending<VpcEndpoint>>,
    security_groups: BTreeMap<String, SecurityGroup>,
    instances: BTreeMap<String, Pending<Instance>>,
    topics: BTreeMap<String, Topic>,
    subscriptions: BTreeMap<String, Subscription>,
}

impl RegionState {
    fn seeded(region: &str, ids: &mut IdGen, settings: &Settings) -> Self {
        let mut state = Self::default();

        let vpc_id = ids.ec2("vpc");
        state.vpcs.insert(
            vpc_id.clone(),
            Vpc {
                vpc_id: vpc_id.clone(),
                cidr_block: DEFAULT_VPC_CIDR.to_string(),
                state: ResourceState::Available,
                is_default: true,
                owner_id: settings.account_id.clone(),
                tags: Vec::new(),
            },
        );

        for (zone, cidr) in DEFAULT_SUBNET_CIDRS {
            let subnet_id = ids.ec2("subnet");
            state.subnets.insert(
                subnet_id.clone(),
                Subnet {
                    subnet_id,
                    vpc_id: vpc_id.clone(),
                    cidr_block: cidr.to_string(),
                    availability_zone: format!("{region}{zone}"),
                    available_ip_address_count: 4091,
                    default_for_az: true,
                    map_public_ip_on_launch: true,
                    state: ResourceState::Available,
                    owner_id: settings.account_id.clone(),
                    tags: Vec::new(),
                },
            );
        }

        state.add_default_group(&vpc_id, ids, settings);
        state
    }

    fn add_default_group(&mut self, vpc_id: &str, ids: &mut IdGen, settings: &Settings) {
        let group_id = ids.ec2("sg");
        self.security_groups.insert(
            group_id.clone(),
            SecurityGroup {
                group_id,
                group_name: "default".to_string(),
                description: "default VPC security group".to_string(),
                vpc_id: vpc_id.to_string(),
                owner_id: settings.account_id.clone(),
                tags: Vec::new(),
            },
        );
    }

    fn availability_zones(region: &str) -> impl Iterator<Item = String> + '_ {
        DEFAULT_SUBNET_CIDRS
            .iter()
            .map(move |(zone, _)| format!("{region}{zone}"))
    }

    fn tags_mut(&mut self, resource_id: &str) -> Option<&mut Vec<Tag>> {
        if let Some(vpc) = self.vpcs.get_mut(resource_id) {
            return Some(&mut vpc.tags);
        }
        if let Some(subnet) = self.subnets.get_mut(resource_id) {
            return Some(&mut subnet.tags);
        }
        if let Some(endpoint) = self.endpoints.get_mut(resource_id) {
            return Some(&mut endpoint.item.tags);
        }
        if let Some(group) = self.security_groups.get_mut(resource_id) {
            return Some(&mut group.tags);
        }
        self.instances
            .get_mut(resource_id)
            .map(|instance| &mut instance.item.tags)
    }
}

/// Values of a describe filter field for one item; `None` means the filter is unsupported.
trait Describable: Clone {
    const RESOURCE: &'static str;

    fn id(&self) -> &str;
    fn filter_field(&self, name: &str) -> Option<Vec<String>>;
}

fn describe<'a, T>(
    items: impl Iterator<Item = &'a T>,
    request: &DescribeRequest,
    page_size: usize,
) -> Result<Page<T>, CloudError>
where
    T: Describable + 'a,
{
    let items: Vec<&T> = items.collect();

    for id in &request.ids {
        if !items.iter().any(|item| item.id() == id) {
            return Err(CloudError::not_found(T::RESOURCE, id.clone()));
        }
    }

    let mut matched = Vec::new();
    for item in items {
        if !request.ids.is_empty() && !request.ids.iter().any(|id| id == item.id()) {
            continue;
        }
        let mut keep = true;
        for filter in &request.filters {
            let Some(values) = item.filter_field(&filter.name) else {
                return Err(CloudError::InvalidParameter(format!(
                    "unsupported filter '{}' for {}",
                    filter.name,
                    T::RESOURCE
                )));
            };
            if !values.iter().any(|v| filter.values.contains(v)) {
                keep = false;
                break;
            }
        }
        if keep {
            matched.push(item.clone());
        }
    }

    paginate(matched, request.next_token.as_deref(), page_size)
}

fn paginate<T>(
    items: Vec<T>,
    next_token: Option<&str>,
    page_size: usize,
) -> Result<Page<T>, CloudError> {
    let offset = match next_token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| CloudError::InvalidParameter(format!("invalid next token '{token}'")))?,
        None => 0,
    };
    let total = items.len();
    let items: Vec<T> = items.into_iter().skip(offset).take(page_size).collect();
    let consumed = offset + items.len();
    let next_token = (consumed < total).then(|| consumed.to_string());
    Ok(Page { items, next_token })
}

fn name_tag(tags: &[Tag]) -> Option<&str> {
    tags.iter()
        .find(|t| t.key == "Name")
        .map(|t| t.value.as_str())
}

/// Accepts `a.b.c.d/n` with `16 <= n <= 28`.
fn validate_cidr(cidr: &str) -> Result<(), CloudError> {
    let invalid = || CloudError::InvalidParameter(format!("invalid CIDR block '{cidr}'"));
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if !(16..=28).contains(&prefix) {
        return Err(invalid());
    }
    let octets: Vec<&str> = addr.split('.').collect();
    if octets.len() != 4 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Ec2Api;

    fn creds() -> Credentials {
        Credentials::new("AKIDEXAMPLE", "secret")
    }

    #[tokio::test]
    async fn fresh_region_has_default_network() {
        let cloud = SimulatedCloud::default();
        let client = cloud.connect("us-east-1", &creds()).await.unwrap();

        let vpcs = client.ec2.describe_vpcs(DescribeRequest::all()).await.unwrap();
        assert_eq!(vpcs.items.len(), 1);
        assert!(vpcs.items[0].is_default);

        let subnets = client
            .ec2
            .describe_subnets(DescribeRequest::all().with_filter("vpc-id", &vpcs.items[0].vpc_id))
            .await
            .unwrap();
        assert_eq!(subnets.items.len(), 3);

        let groups = client
            .ec2
            .describe_security_groups(DescribeRequest::all().with_filter("group-name", "default"))
            .await
            .unwrap();
        assert_eq!(groups.items.len(), 1);
    }

    #[tokio::test]
    async fn blank_credentials_and_unknown_regions_are_rejected() {
        let cloud = SimulatedCloud::default();
        let err = cloud
            .connect("us-east-1", &Credentials::new("", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Unauthorized(_)));

        let err = cloud.connect("mars-north-1", &creds()).await.unwrap_err();
        assert!(matches!(err, CloudError::RegionNotEnabled(_)));
    }

    #[tokio::test]
    async fn listings_are_paginated() {
        let cloud = SimulatedCloud::builder().page_size(2).build();
        let client = cloud.connect("eu-west-1", &creds()).await.unwrap();

        let first = client.ec2.describe_subnets(DescribeRequest::all()).await.unwrap();
        assert_eq!(first.items.len(), 2);
        let token = first.next_token.clone();
        assert!(token.is_some());

        let second = client
            .ec2
            .describe_subnets(DescribeRequest::all().page(token))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.is_last());
    }

    #[tokio::test]
    async fn counted_fault_expires() {
        let cloud = SimulatedCloud::builder()
            .fault(Fault::times(
                "DescribeVpcs",
                2,
                CloudError::Throttled("slow down".into()),
            ))
            .build();
        let client = cloud.connect("us-east-1", &creds()).await.unwrap();

        for _ in 0..2 {
            let err = client.ec2.describe_vpcs(DescribeRequest::all()).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert!(client.ec2.describe_vpcs(DescribeRequest::all()).await.is_ok());
        assert_eq!(cloud.call_count("DescribeVpcs"), 3);
    }

    #[test]
    fn cidr_validation() {
        assert!(validate_cidr("10.0.0.0/16").is_ok());
        assert!(validate_cidr("10.0.0.0/8").is_err());
        assert!(validate_cidr("10.0.0/16").is_err());
        assert!(validate_cidr("10.0.0.256/24").is_err());
    }
}
