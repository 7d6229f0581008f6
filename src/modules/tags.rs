use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_cloud::Tag;

use crate::context::Context;
use crate::error::StratusError;

/// Resource tags as stored in a `tags` TEXT column (a JSON object).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn from_cloud(tags: &[Tag]) -> Self {
        Self(
            tags.iter()
                .map(|t| (t.key.clone(), t.value.clone()))
                .collect(),
        )
    }

    pub fn to_cloud(&self) -> Vec<Tag> {
        self.0.iter().map(|(k, v)| Tag::new(k, v)).collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Blank or NULL columns decode as no tags.
    pub fn from_json(raw: Option<&str>) -> Result<Self, StratusError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(raw) => Ok(serde_json::from_str(raw)?),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Tags to write and keys to drop to turn `self` into `desired`.
    pub fn changes_to(&self, desired: &Tags) -> (Vec<Tag>, Vec<String>) {
        let set = desired
            .0
            .iter()
            .filter(|(k, v)| self.0.get(*k) != Some(*v))
            .map(|(k, v)| Tag::new(k, v))
            .collect();
        let remove = self
            .0
            .keys()
            .filter(|k| !desired.0.contains_key(*k))
            .cloned()
            .collect();
        (set, remove)
    }
}

/// Brings an EC2 resource's tags in line with `desired`.
pub async fn sync_ec2_tags(
    ctx: &Context,
    region: &str,
    resource_id: &str,
    current: &Tags,
    desired: &Tags,
) -> Result<(), StratusError> {
    let (set, remove) = current.changes_to(desired);
    if !remove.is_empty() {
        ctx.cloud_call(region, "DeleteTags", |c| {
            let remove = remove.clone();
            async move { c.ec2.delete_tags(resource_id, &remove).await }
        })
        .await?;
    }
    if !set.is_empty() {
        ctx.cloud_call(region, "CreateTags", |c| {
            let set = set.clone();
            async move { c.ec2.create_tags(resource_id, &set).await }
        })
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_cover_set_and_remove() {
        let current = Tags::from_cloud(&[Tag::new("Name", "web"), Tag::new("env", "dev")]);
        let mut desired = Tags::default();
        desired.insert("Name", "web");
        desired.insert("team", "ops");

        let (set, remove) = current.changes_to(&desired);
        assert_eq!(set, vec![Tag::new("team", "ops")]);
        assert_eq!(remove, vec!["env".to_string()]);
    }

    #[test]
    fn json_column_round_trips_and_tolerates_blank() {
        let tags = Tags::from_cloud(&[Tag::new("Name", "web")]);
        assert_eq!(tags.to_json(), r#"{"Name":"web"}"#);
        assert_eq!(Tags::from_json(Some(&tags.to_json())).unwrap(), tags);
        assert!(Tags::from_json(None).unwrap().is_empty());
        assert!(Tags::from_json(Some("")).unwrap().is_empty());
        assert!(Tags::from_json(Some("not json")).is_err());
    }
}
