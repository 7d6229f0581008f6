pub mod api;
pub mod error;
pub mod page;
pub mod simulated;
pub mod types;

pub use api::{CloudConnector, Credentials, Ec2Api, RegionClient, SnsApi};
pub use error::CloudError;
pub use page::{DescribeRequest, Filter, Page};
pub use simulated::{Fault, SimulatedCloud, SimulatedCloudBuilder};
pub use types::{
    CreateSecurityGroupInput, CreateSubnetInput, CreateVpcEndpointInput, CreateVpcInput,
    DnsRecordIpType, Instance, InstanceState, ModifyVpcEndpointInput, ResourceState,
    RunInstancesInput, SecurityGroup, Subnet, Subscription, Tag, Topic, Vpc, VpcEndpoint,
    VpcEndpointState,
};
