//! Two management nodes sharing one command store.

use std::sync::Arc;

use apim_command::{
    CommandFanout, CommandRefresher, DynCommandStore, MemCommandStore, RefresherConfig,
    StaticCluster,
};
use apim_service::{
    EmailTemplateUpdateListener, ExecutionContext, MemSubscriptionRepository,
    NotificationTemplate, NotificationTemplateService, Principal, Subscription,
    SubscriptionFailureCommand, SubscriptionFailureListener, SubscriptionRepository,
    SubscriptionStatus, TemplateCache,
};

struct Node {
    cache: TemplateCache,
    refresher: CommandRefresher,
}

fn node(
    id: &str,
    primary: bool,
    store: &DynCommandStore,
    subscriptions: &MemSubscriptionRepository,
) -> Node {
    let cache = TemplateCache::new();
    let fanout = CommandFanout::new()
        .with_listener(Box::new(EmailTemplateUpdateListener::new(cache.clone())))
        .with_listener(Box::new(SubscriptionFailureListener::new(Arc::new(
            subscriptions.clone(),
        ))));
    let refresher = CommandRefresher::new(
        store.clone(),
        Arc::new(StaticCluster::new(id, primary)),
        fanout,
        RefresherConfig::default(),
    );
    Node { cache, refresher }
}

fn welcome_template() -> NotificationTemplate {
    NotificationTemplate {
        id: "welcome".into(),
        name: "Welcome".into(),
        scope: "PORTAL".into(),
        title: "Welcome aboard".into(),
        content: "<h1>Hi</h1>".into(),
        organization_id: "DEFAULT".into(),
    }
}

#[tokio::test]
async fn template_update_reaches_every_node_once() {
    let mem = MemCommandStore::new();
    let store: DynCommandStore = Arc::new(mem.clone());
    let subscriptions = MemSubscriptionRepository::new();
    let node_a = node("node-a", true, &store, &subscriptions);
    let node_b = node("node-b", false, &store, &subscriptions);

    let service = NotificationTemplateService::new(node_a.cache.clone(), store.clone(), "node-a");
    let ctx = ExecutionContext::new("DEFAULT", Principal::admin("root"));
    service.update(&ctx, welcome_template()).await.unwrap();
    assert!(node_b.cache.get("DEFAULT", "welcome").is_none());

    let report = node_b.refresher.tick().await;
    assert_eq!(report.acknowledged, 1);
    assert_eq!(report.published, 1);
    assert_eq!(node_b.cache.get("DEFAULT", "welcome"), Some(welcome_template()));

    // Already acknowledged by node-b: nothing more to read there.
    assert_eq!(node_b.refresher.tick().await.published, 0);

    // node-a still sees it once, and the command stays until it expires.
    assert_eq!(node_a.refresher.tick().await.published, 1);
    assert_eq!(mem.len(), 1);
    let stored = &store.search(&Default::default()).await.unwrap()[0];
    assert_eq!(
        stored.acknowledgments,
        vec!["node-b".to_string(), "node-a".to_string()]
    );
}

#[tokio::test]
async fn subscription_failure_is_handled_by_a_single_node() {
    let store: DynCommandStore = Arc::new(MemCommandStore::new());
    let subscriptions = MemSubscriptionRepository::new();
    subscriptions.insert(
        Subscription::new("sub-1", "api-1", "app-1").with_status(SubscriptionStatus::Accepted),
    );
    let node_a = node("node-a", true, &store, &subscriptions);
    let node_b = node("node-b", false, &store, &subscriptions);

    let command = SubscriptionFailureCommand::new("sub-1", "certificate expired")
        .into_command("gateway-1")
        .unwrap();
    store.create(command).await.unwrap();

    let first = node_b.refresher.tick().await;
    assert_eq!((first.deleted, first.published), (1, 1));
    let second = node_a.refresher.tick().await;
    assert_eq!((second.deleted, second.published), (0, 0));

    let stored = subscriptions.find("sub-1").await.unwrap().unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Failure);
    assert_eq!(stored.failure_cause.as_deref(), Some("certificate expired"));
}

#[tokio::test]
async fn bad_payload_does_not_stop_other_commands() {
    let store: DynCommandStore = Arc::new(MemCommandStore::new());
    let subscriptions = MemSubscriptionRepository::new();
    let node_b = node("node-b", false, &store, &subscriptions);

    let broken = apim_command::Command::new(
        "node-a",
        apim_command::MessageRecipient::ManagementApis,
        vec![apim_command::CommandTag::EmailTemplateUpdate],
    )
    .with_raw_content("{broken")
    .created_at(chrono::Utc::now() - chrono::Duration::seconds(1));
    store.create(broken).await.unwrap();
    let service = NotificationTemplateService::new(TemplateCache::new(), store.clone(), "node-a");
    service
        .update(&ExecutionContext::new("DEFAULT", Principal::admin("root")), welcome_template())
        .await
        .unwrap();

    let report = node_b.refresher.tick().await;
    assert_eq!(report.published, 2);
    assert_eq!(report.failed, 0);
    assert!(node_b.cache.get("DEFAULT", "welcome").is_some());
}
