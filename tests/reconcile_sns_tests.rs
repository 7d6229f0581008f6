mod common;

use common::{Harness, REGION, TARGET, quiet_cloud};
use sqlx::SqlitePool;
use stratus::engine::Direction;
use stratus_cloud::DescribeRequest;

async fn topic_arn(db: &SqlitePool, name: &str) -> Option<String> {
    sqlx::query_scalar("SELECT arn FROM topic WHERE name = ?")
        .bind(name)
        .fetch_one(db)
        .await
        .unwrap()
}

async fn subscription_rows(db: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM subscription")
        .fetch_one(db)
        .await
        .unwrap()
}

async fn topic_with_arn(harness: &Harness, db: &SqlitePool, name: &str) -> String {
    sqlx::query("INSERT INTO topic (name, display_name, region) VALUES (?, 'Orders', ?)")
        .bind(name)
        .bind(REGION)
        .execute(db)
        .await
        .unwrap();
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    topic_arn(db, name).await.expect("arn written back")
}

#[tokio::test]
async fn topics_get_their_arn_and_restore_immutable_edits() {
    let harness = Harness::with_modules(quiet_cloud(), &["aws_sns"]).await;
    let db = harness.db().await;

    let arn = topic_with_arn(&harness, &db, "orders").await;
    assert_eq!(
        arn,
        format!("arn:aws:sns:{REGION}:{}:orders", harness.cloud.account_id())
    );

    sqlx::query("UPDATE topic SET display_name = 'Renamed' WHERE name = 'orders'")
        .execute(&db)
        .await
        .unwrap();
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert_eq!(report.kind("topic").unwrap().restored, 1);

    let display: Option<String> =
        sqlx::query_scalar("SELECT display_name FROM topic WHERE name = 'orders'")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(display.as_deref(), Some("Orders"));
    assert_eq!(harness.engine.apply(TARGET).await.unwrap().touched(), 0);

    sqlx::query("DELETE FROM topic WHERE name = 'orders'")
        .execute(&db)
        .await
        .unwrap();
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert_eq!(report.kind("topic").unwrap().deleted, 1);
    let topics = harness.client().sns.list_topics(None).await.unwrap();
    assert!(topics.items.is_empty());
}

#[tokio::test]
async fn deleted_subscriptions_come_back() {
    let harness = Harness::with_modules(quiet_cloud(), &["aws_sns"]).await;
    let db = harness.db().await;
    let arn = topic_with_arn(&harness, &db, "orders").await;

    // Confirmed out of band, then pulled in.
    let subscription = harness
        .client()
        .sns
        .subscribe(&arn, "email", "ops@example.com")
        .await
        .unwrap();
    let report = harness.engine.sync(TARGET).await.unwrap();
    assert_eq!(report.kind("subscription").unwrap().created, 1);
    assert_eq!(subscription_rows(&db).await, 1);

    sqlx::query("DELETE FROM subscription")
        .execute(&db)
        .await
        .unwrap();
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    assert_eq!(report.kind("subscription").unwrap().reverted, 1);
    assert_eq!(report.kind("subscription").unwrap().deleted, 0);

    let stored: Option<String> = sqlx::query_scalar("SELECT arn FROM subscription")
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(stored.as_deref(), Some(subscription.subscription_arn.as_str()));
    let listed = harness
        .client()
        .sns
        .list_subscriptions_by_topic(&arn, None)
        .await
        .unwrap();
    assert_eq!(listed.items.len(), 1);
    assert!(
        harness
            .engine
            .plan(TARGET, Direction::Apply)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn unconfirmed_subscriptions_are_dropped_from_the_db() {
    let harness = Harness::with_modules(quiet_cloud(), &["aws_sns"]).await;
    let db = harness.db().await;
    let arn = topic_with_arn(&harness, &db, "alerts").await;

    sqlx::query(
        r#"
        INSERT INTO subscription (topic, endpoint, protocol, region)
        SELECT id, 'https://hooks.example.com/alerts', 'https', region FROM topic WHERE name = 'alerts'
        "#,
    )
    .execute(&db)
    .await
    .unwrap();

    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    assert_eq!(report.kind("subscription").unwrap().reverted, 1);
    assert_eq!(subscription_rows(&db).await, 0);

    let listed = harness
        .client()
        .sns
        .list_subscriptions_by_topic(&arn, None)
        .await
        .unwrap();
    assert!(listed.items.is_empty());
}

#[tokio::test]
async fn two_regions_reconcile_independently() {
    const EU: &str = "eu-west-1";
    let harness = Harness::install(
        Harness::with_regions(quiet_cloud(), &[REGION, EU]).await,
        &["aws_vpc", "aws_security_group", "aws_sns"],
    )
    .await;
    let db = harness.db().await;

    let per_region: Vec<(String, i64)> = sqlx::query_as(
        "SELECT region, COUNT(*) FROM vpc WHERE is_default = 1 GROUP BY region ORDER BY region",
    )
    .fetch_all(&db)
    .await
    .unwrap();
    assert_eq!(per_region, vec![(EU.to_string(), 1), (REGION.to_string(), 1)]);
    let groups: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT region) FROM security_group WHERE group_name = 'default'",
    )
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(groups, 2);

    sqlx::query("INSERT INTO topic (name, display_name, region) VALUES ('alerts', 'Alerts', ?)")
        .bind(EU)
        .execute(&db)
        .await
        .unwrap();
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    assert_eq!(report.kind("topic").unwrap().created, 1);
    assert_eq!(report.touched(), 1);

    let arn = topic_arn(&db, "alerts").await.expect("arn written back");
    assert!(arn.starts_with(&format!("arn:aws:sns:{EU}:")));
    let eu_topics = harness.client_in(EU).sns.list_topics(None).await.unwrap();
    assert_eq!(eu_topics.items, vec![arn]);
    let home_topics = harness.client().sns.list_topics(None).await.unwrap();
    assert!(home_topics.items.is_empty());

    let eu_vpcs = harness
        .client_in(EU)
        .ec2
        .describe_vpcs(DescribeRequest::all())
        .await
        .unwrap();
    assert_eq!(eu_vpcs.items.len(), 1);

    assert_eq!(harness.engine.apply(TARGET).await.unwrap().touched(), 0);
    assert!(
        harness
            .engine
            .plan(TARGET, Direction::Sync)
            .await
            .unwrap()
            .is_empty()
    );
}
