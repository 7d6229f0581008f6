pub mod ec2;
pub mod sns;

pub use ec2::{
    CreateSecurityGroupInput, CreateSubnetInput, CreateVpcEndpointInput, CreateVpcInput,
    DnsRecordIpType, Instance, InstanceState, ModifyVpcEndpointInput, ResourceState,
    RunInstancesInput, SecurityGroup, Subnet, Tag, Vpc, VpcEndpoint, VpcEndpointState,
};
pub use sns::{Subscription, Topic};
