mod common;

use common::{Harness, REGION, TARGET, quiet_cloud};
use sqlx::SqlitePool;
use stratus_cloud::types::{Instance, InstanceState};
use stratus_cloud::{CloudError, DescribeRequest, Fault};

async fn live_instances(harness: &Harness, ami: &str) -> Vec<Instance> {
    harness
        .client()
        .ec2
        .describe_instances(DescribeRequest::all())
        .await
        .unwrap()
        .items
        .into_iter()
        .filter(|i| i.image_id == ami && i.state != InstanceState::Terminated)
        .collect()
}

async fn insert_instance(db: &SqlitePool, name: &str, ami: &str) -> i64 {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO instance (name, ami, instance_type, region, tags)
        VALUES (?, ?, 't3.micro', ?, '{"owner":"web-team"}')
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(ami)
    .bind(REGION)
    .fetch_one(db)
    .await
    .unwrap();

    sqlx::query(
        r#"
        INSERT INTO instance_security_groups (instance, security_group)
        SELECT ?, id FROM security_group WHERE group_name = 'default'
        "#,
    )
    .bind(id)
    .execute(db)
    .await
    .unwrap();
    id
}

#[tokio::test]
async fn instance_lifecycle_follows_its_row() {
    let harness = Harness::with_modules(
        quiet_cloud(),
        &["aws_ec2", "aws_security_group", "aws_vpc"],
    )
    .await;
    let db = harness.db().await;

    let row = insert_instance(&db, "web-1", "ami-0abc1234").await;
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    assert_eq!(report.kind("instance").unwrap().created, 1);

    let instances = live_instances(&harness, "ami-0abc1234").await;
    assert_eq!(instances.len(), 1);
    let instance = &instances[0];
    assert_eq!(instance.state, InstanceState::Running);
    assert!(
        instance
            .tags
            .iter()
            .any(|t| t.key == "Name" && t.value == "web-1")
    );

    let (instance_id, state): (String, String) =
        sqlx::query_as("SELECT instance_id, state FROM instance WHERE id = ?")
            .bind(row)
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(instance_id, instance.instance_id);
    assert_eq!(state, "running");
    assert_eq!(harness.engine.apply(TARGET).await.unwrap().touched(), 0);

    sqlx::query("DELETE FROM instance WHERE id = ?")
        .bind(row)
        .execute(&db)
        .await
        .unwrap();
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    assert_eq!(report.kind("instance").unwrap().deleted, 1);
    assert!(live_instances(&harness, "ami-0abc1234").await.is_empty());
}

#[tokio::test]
async fn image_changes_replace_and_name_changes_do_not() {
    let harness = Harness::with_modules(
        quiet_cloud(),
        &["aws_ec2", "aws_security_group", "aws_vpc"],
    )
    .await;
    let db = harness.db().await;

    let row = insert_instance(&db, "batch", "ami-11111111").await;
    harness.engine.apply(TARGET).await.unwrap();

    sqlx::query("UPDATE instance SET name = 'batch-renamed' WHERE id = ?")
        .bind(row)
        .execute(&db)
        .await
        .unwrap();
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert_eq!(report.kind("instance").unwrap().updated, 1);
    assert_eq!(live_instances(&harness, "ami-11111111").await.len(), 1);

    sqlx::query("UPDATE instance SET ami = 'ami-22222222' WHERE id = ?")
        .bind(row)
        .execute(&db)
        .await
        .unwrap();
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    assert_eq!(report.kind("instance").unwrap().replaced, 1);
    assert!(live_instances(&harness, "ami-11111111").await.is_empty());

    let replacement = live_instances(&harness, "ami-22222222").await;
    assert_eq!(replacement.len(), 1);
    assert!(
        replacement[0]
            .tags
            .iter()
            .any(|t| t.key == "Name" && t.value == "batch-renamed")
    );
}

#[tokio::test]
async fn instances_with_unknown_groups_are_skipped() {
    let harness = Harness::with_modules(
        quiet_cloud(),
        &["aws_ec2", "aws_security_group", "aws_vpc"],
    )
    .await;
    let db = harness.db().await;

    // A group row that has not reached the provider yet, attached to an instance.
    let vpc: i64 = sqlx::query_scalar("SELECT id FROM vpc WHERE is_default = 1")
        .fetch_one(&db)
        .await
        .unwrap();
    let group: i64 = sqlx::query_scalar(
        "INSERT INTO security_group (group_name, description, vpc, region, tags) VALUES ('app', 'app tier', ?, ?, '{}') RETURNING id",
    )
    .bind(vpc)
    .bind(REGION)
    .fetch_one(&db)
    .await
    .unwrap();
    let instance: i64 = sqlx::query_scalar(
        "INSERT INTO instance (name, ami, instance_type, region, tags) VALUES ('app-1', 'ami-33333333', 't3.micro', ?, '{}') RETURNING id",
    )
    .bind(REGION)
    .fetch_one(&db)
    .await
    .unwrap();
    sqlx::query("INSERT INTO instance_security_groups (instance, security_group) VALUES (?, ?)")
        .bind(instance)
        .bind(group)
        .execute(&db)
        .await
        .unwrap();

    // Groups reconcile before instances, so one pass resolves the reference.
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    assert_eq!(report.kind("security_group").unwrap().created, 1);
    assert_eq!(report.kind("instance").unwrap().created, 1);
    assert_eq!(report.kind("instance").unwrap().skipped, 0);

    // Now a group whose creation fails: the instance waits for a later pass.
    harness.cloud.inject(
        Fault::always(
            "CreateSecurityGroup",
            CloudError::InvalidParameter("group limit reached".into()),
        )
        .for_subject("db"),
    );
    let group: i64 = sqlx::query_scalar(
        "INSERT INTO security_group (group_name, description, vpc, region, tags) VALUES ('db', 'db tier', ?, ?, '{}') RETURNING id",
    )
    .bind(vpc)
    .bind(REGION)
    .fetch_one(&db)
    .await
    .unwrap();
    let instance: i64 = sqlx::query_scalar(
        "INSERT INTO instance (name, ami, instance_type, region, tags) VALUES ('db-1', 'ami-44444444', 't3.micro', ?, '{}') RETURNING id",
    )
    .bind(REGION)
    .fetch_one(&db)
    .await
    .unwrap();
    sqlx::query("INSERT INTO instance_security_groups (instance, security_group) VALUES (?, ?)")
        .bind(instance)
        .bind(group)
        .execute(&db)
        .await
        .unwrap();

    let report = harness.engine.apply(TARGET).await.unwrap();
    assert_eq!(report.kind("security_group").unwrap().failed, 1);
    assert_eq!(report.kind("instance").unwrap().skipped, 1);
    assert_eq!(report.kind("instance").unwrap().failed, 0);
    assert!(live_instances(&harness, "ami-44444444").await.is_empty());

    harness.cloud.clear_faults();
    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    assert_eq!(live_instances(&harness, "ami-44444444").await.len(), 1);
}

#[tokio::test]
async fn the_default_group_cannot_be_deleted() {
    let harness = Harness::with_modules(
        quiet_cloud(),
        &["aws_security_group", "aws_vpc"],
    )
    .await;
    let db = harness.db().await;

    sqlx::query("DELETE FROM security_group WHERE group_name = 'default'")
        .execute(&db)
        .await
        .unwrap();

    let report = harness.engine.apply(TARGET).await.unwrap();
    assert!(report.is_clean(), "{}", report.failures);
    assert_eq!(report.kind("security_group").unwrap().reverted, 1);

    let restored: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM security_group WHERE group_name = 'default'")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(restored, 1);
    assert_eq!(harness.engine.apply(TARGET).await.unwrap().touched(), 0);
}
