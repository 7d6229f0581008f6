use async_trait::async_trait;
use std::sync::Arc;

use super::{Shared, paginate};
use crate::{
    api::SnsApi,
    error::CloudError,
    page::Page,
    types::{Subscription, Topic},
};

const PROTOCOLS: [&str; 9] = [
    "http",
    "https",
    "email",
    "email-json",
    "sms",
    "sqs",
    "application",
    "lambda",
    "firehose",
];

pub struct SimulatedSns {
    region: String,
    shared: Arc<Shared>,
}

impl SimulatedSns {
    pub(super) fn new(region: &str, shared: Arc<Shared>) -> Self {
        Self {
            region: region.to_string(),
            shared,
        }
    }
}

fn validate_topic_name(name: &str) -> Result<(), CloudError> {
    let valid = !name.is_empty()
        && name.len() <= 256
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CloudError::InvalidParameter(format!(
            "invalid topic name '{name}'"
        )))
    }
}

#[async_trait]
impl SnsApi for SimulatedSns {
    async fn list_topics(&self, next_token: Option<String>) -> Result<Page<String>, CloudError> {
        self.shared
            .with_region(&self.region, "ListTopics", &[], |state, _, settings| {
                let arns: Vec<String> = state.topics.keys().cloned().collect();
                paginate(arns, next_token.as_deref(), settings.page_size)
            })
    }

    async fn get_topic_attributes(&self, topic_arn: &str) -> Result<Topic, CloudError> {
        self.shared.with_region(
            &self.region,
            "GetTopicAttributes",
            &[topic_arn],
            |state, _, _| {
                state
                    .topics
                    .get(topic_arn)
                    .cloned()
                    .ok_or_else(|| CloudError::not_found("topic", topic_arn))
            },
        )
    }

    async fn create_topic(
        &self,
        name: &str,
        display_name: Option<&str>,
        policy: Option<&str>,
        delivery_policy: Option<&str>,
    ) -> Result<String, CloudError> {
        let region = self.region.as_str();
        self.shared
            .with_region(region, "CreateTopic", &[name], |state, _, settings| {
                validate_topic_name(name)?;
                let topic_arn = format!("arn:aws:sns:{region}:{}:{name}", settings.account_id);
                state
                    .topics
                    .entry(topic_arn.clone())
                    .or_insert_with(|| Topic {
                        topic_arn: topic_arn.clone(),
                        name: name.to_string(),
                        display_name: display_name.map(str::to_string),
                        policy: policy.map(str::to_string),
                        delivery_policy: delivery_policy.map(str::to_string),
                    });
                Ok(topic_arn)
            })
    }

    async fn delete_topic(&self, topic_arn: &str) -> Result<(), CloudError> {
        self.shared
            .with_region(&self.region, "DeleteTopic", &[topic_arn], |state, _, _| {
                state.topics.remove(topic_arn);
                state
                    .subscriptions
                    .retain(|_, subscription| subscription.topic_arn != topic_arn);
                Ok(())
            })
    }

    async fn list_subscriptions(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<Subscription>, CloudError> {
        self.shared.with_region(
            &self.region,
            "ListSubscriptions",
            &[],
            |state, _, settings| {
                let all: Vec<Subscription> = state.subscriptions.values().cloned().collect();
                paginate(all, next_token.as_deref(), settings.page_size)
            },
        )
    }

    async fn list_subscriptions_by_topic(
        &self,
        topic_arn: &str,
        next_token: Option<String>,
    ) -> Result<Page<Subscription>, CloudError> {
        self.shared.with_region(
            &self.region,
            "ListSubscriptionsByTopic",
            &[topic_arn],
            |state, _, settings| {
                if !state.topics.contains_key(topic_arn) {
                    return Err(CloudError::not_found("topic", topic_arn));
                }
                let matching: Vec<Subscription> = state
                    .subscriptions
                    .values()
                    .filter(|s| s.topic_arn == topic_arn)
                    .cloned()
                    .collect();
                paginate(matching, next_token.as_deref(), settings.page_size)
            },
        )
    }

    async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> Result<Subscription, CloudError> {
        self.shared.with_region(
            &self.region,
            "Subscribe",
            &[topic_arn, endpoint],
            |state, ids, settings| {
                if !state.topics.contains_key(topic_arn) {
                    return Err(CloudError::not_found("topic", topic_arn));
                }
                if !PROTOCOLS.contains(&protocol) {
                    return Err(CloudError::InvalidParameter(format!(
                        "unsupported protocol '{protocol}'"
                    )));
                }
                if let Some(existing) = state.subscriptions.values().find(|s| {
                    s.topic_arn == topic_arn && s.protocol == protocol && s.endpoint == endpoint
                }) {
                    return Ok(existing.clone());
                }
                let subscription = Subscription {
                    subscription_arn: format!("{topic_arn}:{}", ids.uuid_like()),
                    topic_arn: topic_arn.to_string(),
                    protocol: protocol.to_string(),
                    endpoint: endpoint.to_string(),
                    owner: settings.account_id.clone(),
                };
                state
                    .subscriptions
                    .insert(subscription.subscription_arn.clone(), subscription.clone());
                Ok(subscription)
            },
        )
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), CloudError> {
        self.shared.with_region(
            &self.region,
            "Unsubscribe",
            &[subscription_arn],
            |state, _, _| {
                state
                    .subscriptions
                    .remove(subscription_arn)
                    .map(|_| ())
                    .ok_or_else(|| CloudError::not_found("subscription", subscription_arn))
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        api::{CloudConnector, Credentials},
        simulated::SimulatedCloud,
    };

    #[tokio::test]
    async fn topic_creation_is_idempotent_and_delete_cascades() {
        let cloud = SimulatedCloud::default();
        let sns = cloud
            .connect("us-west-2", &Credentials::new("AKID", "secret"))
            .await
            .unwrap()
            .sns;

        let arn = sns.create_topic("orders", None, None, None).await.unwrap();
        assert_eq!(arn, "arn:aws:sns:us-west-2:123456789012:orders");
        let again = sns.create_topic("orders", None, None, None).await.unwrap();
        assert_eq!(arn, again);

        sns.subscribe(&arn, "email", "ops@example.com").await.unwrap();
        let subs = sns.list_subscriptions(None).await.unwrap();
        assert_eq!(subs.items.len(), 1);

        sns.delete_topic(&arn).await.unwrap();
        assert!(sns.list_subscriptions(None).await.unwrap().items.is_empty());
        assert!(sns.list_topics(None).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn topic_name_is_validated() {
        let cloud = SimulatedCloud::default();
        let sns = cloud.region_client("us-east-1").sns;
        assert!(sns.create_topic("bad name!", None, None, None).await.is_err());
    }
}
