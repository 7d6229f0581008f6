use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use std::collections::HashMap;
use stratus_cloud::{
    CloudError, CreateVpcEndpointInput, DescribeRequest, DnsRecordIpType, ModifyVpcEndpointInput,
    VpcEndpoint, VpcEndpointState,
};
use stratus_memo_core::Side;
use tracing::{debug, info};

use crate::context::{Context, Probe};
use crate::error::StratusError;
use crate::mapper::{Applied, Crud, Mapper, UpdateOrReplace, tolerate_gone};
use crate::modules::support::{RowKey, found, missing_row, resolve_ref, target_row};
use crate::modules::tags::{Tags, sync_ec2_tags};
use crate::record::{Record, RecordId};

/// An interface VPC endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointInterface {
    pub id: Option<i64>,
    pub vpc_endpoint_id: Option<String>,
    /// Short service name, e.g. `sns`; the provider sees `com.amazonaws.<region>.<service>`.
    pub service: String,
    pub vpc_id: Option<String>,
    pub policy: Option<String>,
    pub state: String,
    pub private_dns_enabled: bool,
    pub dns_name_record_type: DnsRecordIpType,
    /// Sorted provider subnet ids.
    pub subnet_ids: Vec<String>,
    /// Linked subnet rows that have no provider id yet.
    #[serde(skip)]
    pub unresolved_subnets: usize,
    pub region: String,
    pub tags: Tags,
}

impl Record for EndpointInterface {
    const KIND: &'static str = "endpoint_interface";

    fn natural_key(&self) -> Option<Vec<String>> {
        self.vpc_endpoint_id
            .as_ref()
            .map(|e| vec![e.clone(), self.region.clone()])
    }

    fn region(&self) -> &str {
        &self.region
    }

    fn surrogate_id(&self) -> Option<i64> {
        self.id
    }

    fn set_surrogate_id(&mut self, id: Option<i64>) {
        self.id = id;
    }
}

fn service_name(region: &str, service: &str) -> String {
    format!("com.amazonaws.{region}.{service}")
}

impl EndpointInterface {
    fn from_cloud(endpoint: VpcEndpoint, region: &str) -> Self {
        let prefix = format!("com.amazonaws.{region}.");
        let service = endpoint
            .service_name
            .strip_prefix(&prefix)
            .map_or_else(|| endpoint.service_name.clone(), str::to_string);
        let mut subnet_ids = endpoint.subnet_ids;
        subnet_ids.sort();
        Self {
            id: None,
            vpc_endpoint_id: Some(endpoint.vpc_endpoint_id),
            service,
            vpc_id: Some(endpoint.vpc_id),
            policy: endpoint.policy_document,
            state: endpoint.state.as_str().to_string(),
            private_dns_enabled: endpoint.private_dns_enabled,
            dns_name_record_type: endpoint
                .dns_record_ip_type
                .unwrap_or(DnsRecordIpType::Ipv4),
            subnet_ids,
            unresolved_subnets: 0,
            region: region.to_string(),
            tags: Tags::from_cloud(&endpoint.tags),
        }
    }
}

/// Policies compare as JSON, with a one-element array equal to its only element.
pub fn normalized_policy(raw: Option<&str>) -> Option<Value> {
    fn normalize(value: Value) -> Value {
        match value {
            Value::Array(items) if items.len() == 1 => {
                items.into_iter().next().map_or(Value::Null, normalize)
            }
            Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
            Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, normalize(v))).collect())
            }
            other => other,
        }
    }

    let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
    Some(
        serde_json::from_str::<Value>(raw)
            .map(normalize)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    )
}

/// Key `(vpc_endpoint_id, region)`. A different VPC or service replaces the endpoint; policy,
/// subnets and tags change in place. Creates and updates wait for `available`, deletes wait
/// until the endpoint is gone. An empty subnet list on create means every subnet of the VPC.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointInterfaceMapper;

impl Mapper for EndpointInterfaceMapper {
    type Record = EndpointInterface;
    type Cloud = EndpointInterfaceCloud;
    type Db = EndpointInterfaceDb;

    fn cloud(&self) -> &EndpointInterfaceCloud {
        &EndpointInterfaceCloud
    }

    fn db(&self) -> &EndpointInterfaceDb {
        &EndpointInterfaceDb
    }

    fn equals(&self, a: &EndpointInterface, b: &EndpointInterface) -> bool {
        a.service == b.service
            && a.vpc_id == b.vpc_id
            && normalized_policy(a.policy.as_deref()) == normalized_policy(b.policy.as_deref())
            && a.private_dns_enabled == b.private_dns_enabled
            && a.dns_name_record_type == b.dns_name_record_type
            && a.subnet_ids == b.subnet_ids
            && a.region == b.region
            && a.tags == b.tags
    }

    fn update_or_replace(&self, old: &EndpointInterface, new: &EndpointInterface) -> UpdateOrReplace {
        if old.vpc_id != new.vpc_id
            || old.service != new.service
            || old.private_dns_enabled != new.private_dns_enabled
            || old.dns_name_record_type != new.dns_name_record_type
        {
            UpdateOrReplace::Replace
        } else {
            UpdateOrReplace::Update
        }
    }
}

pub struct EndpointInterfaceCloud;

impl EndpointInterfaceCloud {
    async fn wait_available(
        &self,
        ctx: &Context,
        region: &str,
        endpoint_id: &str,
    ) -> Result<EndpointInterface, StratusError> {
        let id = RecordId::generate([endpoint_id, region]);
        ctx.wait_for(&format!("vpc endpoint {endpoint_id}"), || async {
            match self.read(ctx, &id).await? {
                Some(e) if e.state == VpcEndpointState::Available.as_str() => Ok(Probe::Ready(e)),
                Some(e)
                    if e.state == VpcEndpointState::Failed.as_str()
                        || e.state == VpcEndpointState::Rejected.as_str() =>
                {
                    Err(CloudError::Internal(format!(
                        "vpc endpoint {endpoint_id} entered state {}",
                        e.state
                    ))
                    .into())
                }
                Some(e) => Ok(Probe::Pending(e.state)),
                None => Err(CloudError::not_found("vpc endpoint", endpoint_id).into()),
            }
        })
        .await
    }

    async fn wait_gone(
        &self,
        ctx: &Context,
        region: &str,
        endpoint_id: &str,
    ) -> Result<(), StratusError> {
        let id = RecordId::generate([endpoint_id, region]);
        ctx.wait_for(&format!("vpc endpoint {endpoint_id} deletion"), || async {
            match self.read(ctx, &id).await? {
                None => Ok(Probe::Ready(())),
                Some(e) => Ok(Probe::Pending(e.state)),
            }
        })
        .await
    }

    async fn vpc_subnets(
        &self,
        ctx: &Context,
        region: &str,
        vpc_id: &str,
    ) -> Result<Vec<String>, StratusError> {
        let subnets = ctx
            .cloud_pages(region, "DescribeSubnets", |c, token| async move {
                c.ec2
                    .describe_subnets(
                        DescribeRequest::all()
                            .with_filter("vpc-id", vpc_id)
                            .page(token),
                    )
                    .await
            })
            .await?;
        Ok(subnets.into_iter().map(|s| s.subnet_id).collect())
    }
}

fn check_references(record: &EndpointInterface) -> Result<String, StratusError> {
    if record.unresolved_subnets > 0 {
        return Err(StratusError::unresolved(format!(
            "endpoint for {} references {} subnet(s) without a provider id",
            record.service, record.unresolved_subnets
        )));
    }
    record.vpc_id.clone().ok_or_else(|| {
        StratusError::unresolved(format!(
            "endpoint for {} references a vpc without a provider id",
            record.service
        ))
    })
}

#[async_trait]
impl Crud<EndpointInterface> for EndpointInterfaceCloud {
    const SIDE: Side = Side::Cloud;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &EndpointInterface,
    ) -> Result<Applied<EndpointInterface>, StratusError> {
        let vpc_id = check_references(record)?;
        let region = record.region.as_str();
        let subnet_ids = if record.subnet_ids.is_empty() {
            self.vpc_subnets(ctx, region, &vpc_id).await?
        } else {
            record.subnet_ids.clone()
        };

        let input = CreateVpcEndpointInput {
            vpc_id,
            service_name: service_name(region, &record.service),
            subnet_ids,
            policy_document: record.policy.clone(),
            private_dns_enabled: record.private_dns_enabled,
            dns_record_ip_type: Some(record.dns_name_record_type),
            tags: record.tags.to_cloud(),
        };
        let created = ctx
            .cloud_call(region, "CreateVpcEndpoint", |c| {
                let input = input.clone();
                async move { c.ec2.create_vpc_endpoint(input).await }
            })
            .await?;
        info!(region, vpc_endpoint_id = %created.vpc_endpoint_id, "VPC endpoint created");

        let realized = self
            .wait_available(ctx, region, &created.vpc_endpoint_id)
            .await?;
        Ok(Applied::Created(realized))
    }

    async fn read(
        &self,
        ctx: &Context,
        id: &RecordId,
    ) -> Result<Option<EndpointInterface>, StratusError> {
        if id.is_pending() {
            return Ok(None);
        }
        let [endpoint_id, region] = id.fields_exact::<2>()?;
        let page = found(
            ctx.cloud_call(&region, "DescribeVpcEndpoints", |c| {
                let request = DescribeRequest::by_id(endpoint_id.as_str());
                async move { c.ec2.describe_vpc_endpoints(request).await }
            })
            .await,
        )?;
        Ok(page
            .and_then(|p| p.items.into_iter().next())
            .map(|e| EndpointInterface::from_cloud(e, &region)))
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<EndpointInterface>, StratusError> {
        ctx.for_each_region(|region| async move {
            let endpoints = ctx
                .cloud_pages(&region, "DescribeVpcEndpoints", |c, token| async move {
                    c.ec2
                        .describe_vpc_endpoints(
                            DescribeRequest::all()
                                .with_filter("vpc-endpoint-type", "Interface")
                                .page(token),
                        )
                        .await
                })
                .await?;
            Ok(endpoints
                .into_iter()
                .filter(|e| {
                    !matches!(
                        e.state,
                        VpcEndpointState::Deleting | VpcEndpointState::Deleted
                    )
                })
                .map(|e| EndpointInterface::from_cloud(e, &region))
                .collect())
        })
        .await
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &EndpointInterface,
    ) -> Result<Applied<EndpointInterface>, StratusError> {
        check_references(record)?;
        let Some(current) = self.read_cached(ctx, &record.record_id()).await? else {
            return Err(StratusError::unresolved(format!(
                "vpc endpoint {} is gone from the cloud",
                record.record_id()
            )));
        };
        let Some(endpoint_id) = current.vpc_endpoint_id.clone() else {
            return Err(missing_row(EndpointInterface::KIND, &record.record_id()));
        };
        let region = current.region.clone();

        let mut modify = ModifyVpcEndpointInput {
            vpc_endpoint_id: endpoint_id.clone(),
            ..ModifyVpcEndpointInput::default()
        };
        if normalized_policy(record.policy.as_deref()) != normalized_policy(current.policy.as_deref())
        {
            match &record.policy {
                Some(policy) => modify.policy_document = Some(policy.clone()),
                None => modify.reset_policy = true,
            }
        }
        // An empty desired subnet set keeps whatever the endpoint has.
        if !record.subnet_ids.is_empty() {
            modify.add_subnet_ids = record
                .subnet_ids
                .iter()
                .filter(|s| !current.subnet_ids.contains(s))
                .cloned()
                .collect();
            modify.remove_subnet_ids = current
                .subnet_ids
                .iter()
                .filter(|s| !record.subnet_ids.contains(s))
                .cloned()
                .collect();
        }

        let modified = modify.policy_document.is_some()
            || modify.reset_policy
            || !modify.add_subnet_ids.is_empty()
            || !modify.remove_subnet_ids.is_empty();
        if modified {
            debug!(region = %region, vpc_endpoint_id = %endpoint_id, "Modifying VPC endpoint");
            ctx.cloud_call(&region, "ModifyVpcEndpoint", |c| {
                let modify = modify.clone();
                async move { c.ec2.modify_vpc_endpoint(modify).await }
            })
            .await?;
        }
        sync_ec2_tags(ctx, &region, &endpoint_id, &current.tags, &record.tags).await?;

        let realized = if modified {
            self.wait_available(ctx, &region, &endpoint_id).await?
        } else {
            EndpointInterface {
                tags: record.tags.clone(),
                ..current
            }
        };
        Ok(Applied::Updated(realized))
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &EndpointInterface,
    ) -> Result<Applied<EndpointInterface>, StratusError> {
        let Some(endpoint_id) = record.vpc_endpoint_id.clone() else {
            return Ok(Applied::Deleted);
        };
        let region = record.region.as_str();
        let ids = vec![endpoint_id.clone()];
        tolerate_gone(
            ctx.cloud_call(region, "DeleteVpcEndpoints", |c| {
                let ids = ids.clone();
                async move { c.ec2.delete_vpc_endpoints(&ids).await }
            })
            .await,
        )?;
        self.wait_gone(ctx, region, &endpoint_id).await?;
        info!(region, vpc_endpoint_id = %endpoint_id, "VPC endpoint deleted");
        Ok(Applied::Deleted)
    }
}

#[derive(FromRow)]
struct EndpointRow {
    id: i64,
    vpc_endpoint_id: Option<String>,
    service: String,
    vpc_id: Option<String>,
    policy: Option<String>,
    state: Option<String>,
    private_dns_enabled: bool,
    dns_name_record_type: Option<String>,
    region: String,
    tags: Option<String>,
}

#[derive(FromRow)]
struct EndpointSubnetRow {
    endpoint: i64,
    subnet_id: Option<String>,
}

const SELECT_ENDPOINT: &str = r#"
    SELECT e.id, e.vpc_endpoint_id, e.service, v.vpc_id AS vpc_id, e.policy, e.state,
           e.private_dns_enabled, e.dns_name_record_type, e.region, e.tags
    FROM endpoint_interface e
    LEFT JOIN vpc v ON v.id = e.vpc
"#;

const SELECT_ENDPOINT_SUBNETS: &str = r#"
    SELECT eis.endpoint_interface AS endpoint, s.subnet_id
    FROM endpoint_interface_subnets eis
    JOIN subnet s ON s.id = eis.subnet
"#;

pub struct EndpointInterfaceDb;

impl EndpointInterfaceDb {
    async fn hydrate(
        &self,
        ctx: &Context,
        rows: Vec<EndpointRow>,
    ) -> Result<Vec<EndpointInterface>, StratusError> {
        let links = sqlx::query_as::<_, EndpointSubnetRow>(SELECT_ENDPOINT_SUBNETS)
            .fetch_all(ctx.pool())
            .await?;
        let mut by_endpoint: HashMap<i64, (Vec<String>, usize)> = HashMap::new();
        for link in links {
            let entry = by_endpoint.entry(link.endpoint).or_default();
            match link.subnet_id {
                Some(subnet_id) => entry.0.push(subnet_id),
                None => entry.1 += 1,
            }
        }

        rows.into_iter()
            .map(|row| {
                let (mut subnet_ids, unresolved) =
                    by_endpoint.remove(&row.id).unwrap_or_default();
                subnet_ids.sort();
                Ok(EndpointInterface {
                    id: Some(row.id),
                    vpc_endpoint_id: row.vpc_endpoint_id,
                    service: row.service,
                    vpc_id: row.vpc_id,
                    policy: row.policy,
                    state: row.state.unwrap_or_default(),
                    private_dns_enabled: row.private_dns_enabled,
                    dns_name_record_type: row
                        .dns_name_record_type
                        .as_deref()
                        .and_then(DnsRecordIpType::parse)
                        .unwrap_or(DnsRecordIpType::Ipv4),
                    subnet_ids,
                    unresolved_subnets: unresolved,
                    region: row.region,
                    tags: Tags::from_json(row.tags.as_deref())?,
                })
            })
            .collect()
    }

    /// Surrogate ids of the record's subnets; every one must already be in the database.
    async fn subnet_rows(
        &self,
        ctx: &Context,
        record: &EndpointInterface,
    ) -> Result<Vec<i64>, StratusError> {
        let mut rows = Vec::with_capacity(record.subnet_ids.len());
        for subnet_id in &record.subnet_ids {
            rows.push(
                resolve_ref(
                    ctx.pool(),
                    "subnet",
                    "subnet",
                    "subnet_id",
                    Some(subnet_id),
                    &record.region,
                )
                .await?,
            );
        }
        Ok(rows)
    }

    async fn write(
        &self,
        ctx: &Context,
        row_id: Option<i64>,
        record: &EndpointInterface,
    ) -> Result<i64, StratusError> {
        let vpc = resolve_ref(
            ctx.pool(),
            "vpc",
            "vpc",
            "vpc_id",
            record.vpc_id.as_deref(),
            &record.region,
        )
        .await?;
        let subnets = self.subnet_rows(ctx, record).await?;

        let mut tx = ctx.pool().begin().await?;
        let id: i64 = match row_id {
            None => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO endpoint_interface
                        (vpc_endpoint_id, service, vpc, policy, state, private_dns_enabled,
                         dns_name_record_type, region, tags)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(&record.vpc_endpoint_id)
                .bind(&record.service)
                .bind(vpc)
                .bind(&record.policy)
                .bind(&record.state)
                .bind(record.private_dns_enabled)
                .bind(record.dns_name_record_type.as_str())
                .bind(&record.region)
                .bind(record.tags.to_json())
                .fetch_one(&mut *tx)
                .await?
            }
            Some(row_id) => {
                sqlx::query(
                    r#"
                    UPDATE endpoint_interface
                    SET vpc_endpoint_id = ?, service = ?, vpc = ?, policy = ?, state = ?,
                        private_dns_enabled = ?, dns_name_record_type = ?, region = ?, tags = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&record.vpc_endpoint_id)
                .bind(&record.service)
                .bind(vpc)
                .bind(&record.policy)
                .bind(&record.state)
                .bind(record.private_dns_enabled)
                .bind(record.dns_name_record_type.as_str())
                .bind(&record.region)
                .bind(record.tags.to_json())
                .bind(row_id)
                .execute(&mut *tx)
                .await?;
                row_id
            }
        };

        sqlx::query("DELETE FROM endpoint_interface_subnets WHERE endpoint_interface = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for subnet in subnets {
            sqlx::query(
                "INSERT INTO endpoint_interface_subnets (endpoint_interface, subnet) VALUES (?, ?)",
            )
            .bind(id)
            .bind(subnet)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(id)
    }
}

#[async_trait]
impl Crud<EndpointInterface> for EndpointInterfaceDb {
    const SIDE: Side = Side::Db;

    async fn create_one(
        &self,
        ctx: &Context,
        record: &EndpointInterface,
    ) -> Result<Applied<EndpointInterface>, StratusError> {
        let id = self.write(ctx, None, record).await?;
        Ok(Applied::Created(EndpointInterface {
            id: Some(id),
            ..record.clone()
        }))
    }

    async fn read(
        &self,
        ctx: &Context,
        id: &RecordId,
    ) -> Result<Option<EndpointInterface>, StratusError> {
        let row = match RowKey::of(id) {
            Some(RowKey::Surrogate(row_id)) => {
                sqlx::query_as::<_, EndpointRow>(&format!("{SELECT_ENDPOINT} WHERE e.id = ?"))
                    .bind(row_id)
                    .fetch_optional(ctx.pool())
                    .await?
            }
            Some(RowKey::Natural(fields)) if fields.len() == 2 => {
                sqlx::query_as::<_, EndpointRow>(&format!(
                    "{SELECT_ENDPOINT} WHERE e.vpc_endpoint_id = ? AND e.region = ?"
                ))
                .bind(&fields[0])
                .bind(&fields[1])
                .fetch_optional(ctx.pool())
                .await?
            }
            _ => None,
        };
        match row {
            Some(row) => Ok(self.hydrate(ctx, vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn read_all(&self, ctx: &Context) -> Result<Vec<EndpointInterface>, StratusError> {
        let rows = sqlx::query_as::<_, EndpointRow>(&format!("{SELECT_ENDPOINT} ORDER BY e.id"))
            .fetch_all(ctx.pool())
            .await?;
        self.hydrate(ctx, rows).await
    }

    async fn update_one(
        &self,
        ctx: &Context,
        record: &EndpointInterface,
    ) -> Result<Applied<EndpointInterface>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "endpoint_interface",
            "vpc_endpoint_id",
            record.id,
            record.vpc_endpoint_id.as_deref(),
            &record.region,
        )
        .await?
        .ok_or_else(|| missing_row(EndpointInterface::KIND, &record.record_id()))?;
        let id = self.write(ctx, Some(row_id), record).await?;
        Ok(Applied::Updated(EndpointInterface {
            id: Some(id),
            ..record.clone()
        }))
    }

    async fn delete_one(
        &self,
        ctx: &Context,
        record: &EndpointInterface,
    ) -> Result<Applied<EndpointInterface>, StratusError> {
        let row_id = target_row(
            ctx.pool(),
            "endpoint_interface",
            "vpc_endpoint_id",
            record.id,
            record.vpc_endpoint_id.as_deref(),
            &record.region,
        )
        .await?;
        if let Some(row_id) = row_id {
            sqlx::query("DELETE FROM endpoint_interface WHERE id = ?")
                .bind(row_id)
                .execute(ctx.pool())
                .await?;
        }
        Ok(Applied::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_singletons_equal_their_element() {
        let single = r#"{"Statement":[{"Effect":"Allow","Action":"sns:Publish","Resource":"*"}]}"#;
        let listed =
            r#"{"Statement":{"Effect":"Allow","Action":["sns:Publish"],"Resource":["*"]}}"#;
        assert_eq!(normalized_policy(Some(single)), normalized_policy(Some(listed)));
        assert_ne!(
            normalized_policy(Some(single)),
            normalized_policy(Some(r#"{"Statement":[]}"#))
        );
        assert_eq!(normalized_policy(Some("  ")), None);
    }
}
