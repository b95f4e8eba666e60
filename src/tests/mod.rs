use serde_json::json;

use crate::{
    cms::{Cms, FindQuery, local::LocalCms, upload::NATURAL_KEY_PATH},
    config::Config,
    queue::{ImportPipeline, NewQueue, QueueManager, QueueStatus, QueueStore},
    rich_text::convert::Converter,
    source::{ArticleId, ArticleQuery, SourcePool, SourceRegistry},
};

async fn seeded_registry(config: &Config) -> SourceRegistry {
    let registry = SourceRegistry::new(config.profiles.clone()).unwrap();
    let SourcePool::Sqlite(pool) = registry.pool("golf").await.unwrap() else {
        panic!("expected a sqlite pool");
    };
    sqlx::raw_sql(
        r#"
        CREATE TABLE generated_articles(
            id INTEGER PRIMARY KEY,
            website_id INTEGER,
            language TEXT,
            headline TEXT,
            content TEXT,
            description TEXT,
            category TEXT,
            status TEXT,
            target_keywords TEXT,
            created_at TEXT
        );
        INSERT INTO generated_articles VALUES
            (1, 1, 'en', 'Driver X review', '# Verdict

The Driver X is long. Driver X again.

▶ Driver X 特価', 'A driver review', 'gear', 'published', '["driver"]', '2024-01-01 10:00:00'),
            (2, 1, 'en', 'Putting drills', 'Use a putter daily.', NULL, 'lessons', 'draft', NULL, '2024-02-01 10:00:00'),
            (3, 2, 'en', 'Other site', 'Not imported', NULL, 'gear', 'published', NULL, '2024-03-01 10:00:00');
    "#,
    )
    .execute(&pool)
    .await
    .unwrap();
    registry
}

async fn pipeline(config: &Config) -> ImportPipeline<LocalCms> {
    let cms = LocalCms::open(config.cms.local_db.as_deref().unwrap())
        .await
        .unwrap();
    ImportPipeline::new(cms, Converter::new(config.converter.clone()))
        .with_links(
            config.load_catalog().unwrap().unwrap(),
            config.linking.clone(),
        )
        .unwrap()
}

#[tokio::test]
async fn import_site_into_cms() {
    let config = Config::load("src/tests/scenario/config.yaml").unwrap();
    let registry = seeded_registry(&config).await;
    let profile = config.profile_id(None).unwrap();
    let articles = registry
        .query(
            profile,
            &ArticleQuery {
                site_id: Some(ArticleId::Int(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(articles.len(), 2);

    let storage = tempfile::tempdir().unwrap();
    let mut manager = QueueManager::new(QueueStore::new(storage.path()), pipeline(&config).await);
    let migration = config.queue.migration_config(ArticleId::Int(1), "en");
    assert_eq!(migration.batch_size, 2);

    let id = manager
        .create_queue(
            NewQueue::new("site 1", migration.clone()).settings(config.queue.settings()),
            articles.clone(),
        )
        .await
        .unwrap();
    let stats = manager.run_queue(&id).await.unwrap();
    assert_eq!((stats.succeeded, stats.failed, stats.processed), (2, 0, 2));
    assert_eq!(manager.queue(&id).unwrap().status, QueueStatus::Completed);

    let cms = manager.processor().cms();
    let review = cms
        .find("posts", &FindQuery::equals(NATURAL_KEY_PATH, "contentdb_1_1"))
        .await
        .unwrap()
        .first()
        .unwrap();
    assert_eq!(review.fields["title"], json!("Driver X review"));
    assert_eq!(review.fields["slug"], json!("driver-x-review"));
    assert_eq!(review.fields["status"], json!("published"));
    let blocks = review.fields["content"]["root"]["children"]
        .as_array()
        .unwrap();
    assert_eq!(blocks.len(), 2, "listing paragraph is removed");
    assert_eq!(blocks[0]["type"], json!("heading"));
    let links = blocks[1]["children"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|node| node["type"] == json!("link"))
        .collect::<Vec<_>>();
    assert_eq!(links.len(), 1, "a phrase links once per document");
    assert_eq!(links[0]["fields"]["url"], json!("https://shop.example/driver-x"));

    let drills = cms
        .find("posts", &FindQuery::equals("slug", "putting-drills"))
        .await
        .unwrap()
        .first()
        .unwrap();
    assert_eq!(drills.fields["status"], json!("draft"));
    let text = drills.fields["content"].to_string();
    assert!(!text.contains("shop.example/putter"), "inactive entries never link");

    let rerun = manager
        .create_queue(NewQueue::new("site 1 again", migration), articles)
        .await
        .unwrap();
    let stats = manager.run_queue(&rerun).await.unwrap();
    assert_eq!(stats.succeeded, 2);
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM documents WHERE collection = 'posts'")
            .fetch_one(manager.processor().cms().pool())
            .await
            .unwrap();
    assert_eq!(count, 2, "re-import updates existing documents");

    let reloaded = {
        let mut manager =
            QueueManager::new(QueueStore::new(storage.path()), pipeline(&config).await);
        manager.load().await.unwrap();
        manager.queues().count()
    };
    assert_eq!(reloaded, 2);
    registry.close_all().await;
}
