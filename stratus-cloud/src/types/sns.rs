use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Topic {
    pub topic_arn: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_policy: Option<String>,
}

impl Topic {
    /// Topic name is the last `:`-separated segment of its ARN.
    pub fn name_from_arn(arn: &str) -> Option<&str> {
        arn.rsplit(':').next().filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subscription {
    pub subscription_arn: String,
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    pub owner: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_from_arn_takes_last_segment() {
        assert_eq!(
            Topic::name_from_arn("arn:aws:sns:us-east-1:123456789012:orders"),
            Some("orders")
        );
        assert_eq!(Topic::name_from_arn("arn:aws:sns:us-east-1:123456789012:"), None);
    }
}
