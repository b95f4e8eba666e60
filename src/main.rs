use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, anyhow};
use article_migrate::{
    cms::{Cms, http::HttpCms, local::LocalCms},
    config::Config,
    progress::create_reporter,
    queue::{ImportPipeline, NewQueue, QueueManager, QueueStore, Scheduler},
    rich_text::convert::Converter,
    source::{ArticleId, ArticleQuery, SourceRegistry},
};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Parser)]
struct Opts {
    #[clap(short, long, env = "ARTICLE_MIGRATE_CONFIG")]
    config: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured source profiles.
    Profiles,
    /// Check that a profile connects and its mapped columns exist.
    TestConnection { profile: Option<String> },
    /// Article counts by site, language and category.
    Stats { profile: Option<String> },
    /// Queue articles of one site and run the queue.
    Import {
        #[clap(long)]
        profile: Option<String>,
        #[clap(long)]
        site: String,
        #[clap(long)]
        language: String,
        #[clap(long)]
        limit: Option<u32>,
        #[clap(long)]
        name: Option<String>,
    },
    /// List stored queues.
    Queues,
    /// Run or resume a stored queue.
    Run { queue_id: String },
    /// Run due queues until interrupted.
    Schedule,
}

fn site_id(site: &str) -> ArticleId {
    site.parse::<i64>()
        .map(ArticleId::Int)
        .unwrap_or_else(|_| ArticleId::Text(site.to_string()))
}

fn profile_id<'a>(config: &'a Config, requested: Option<&'a str>) -> anyhow::Result<&'a str> {
    config
        .profile_id(requested)
        .ok_or_else(|| anyhow!("no source profile configured"))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn manager<C: Cms>(
    config: &Config,
    cms: C,
) -> anyhow::Result<QueueManager<ImportPipeline<C>>> {
    let mut pipeline = ImportPipeline::new(cms, Converter::new(config.converter.clone()));
    if let Some(catalog) = config.load_catalog()? {
        pipeline = pipeline
            .with_links(catalog, config.linking.clone())
            .context("compile listing rules")?;
    }
    let mut manager = QueueManager::new(QueueStore::new(&config.storage.dir), pipeline)
        .with_listener(create_reporter());
    let loaded = manager.load().await.context("load queues")?;
    info!(loaded, "restored queues");
    Ok(manager)
}

async fn queue_command<C: Cms>(config: &Config, cms: C, command: Command) -> anyhow::Result<()> {
    let mut manager = manager(config, cms).await?;
    match command {
        Command::Import {
            profile,
            site,
            language,
            limit,
            name,
        } => {
            let profile = profile_id(config, profile.as_deref())?;
            let registry = SourceRegistry::new(config.profiles.clone())?;
            let site_id = site_id(&site);
            let articles = registry
                .query(
                    profile,
                    &ArticleQuery {
                        site_id: Some(site_id.clone()),
                        language: Some(language.clone()),
                        limit,
                        ..Default::default()
                    },
                )
                .await
                .with_context(|| format!("query profile {profile}"))?;
            registry.close_all().await;
            if articles.is_empty() {
                println!("No articles matched");
                return Ok(());
            }
            let name = name.unwrap_or_else(|| format!("{profile} site {site} ({language})"));
            let new_queue = NewQueue::new(
                name,
                config.queue.migration_config(site_id, language),
            )
            .settings(config.queue.settings());
            let id = manager.create_queue(new_queue, articles).await?;
            println!("Created {id}");
            manager.run_queue(&id).await?;
        }
        Command::Queues => {
            for queue in manager.queues() {
                println!(
                    "{}\t{:?}\t{}/{}\t{}",
                    queue.id,
                    queue.status,
                    queue.statistics.processed,
                    queue.statistics.total_items,
                    queue.name
                );
            }
        }
        Command::Run { queue_id } => {
            manager.resume(&queue_id).await?;
        }
        Command::Schedule => {
            let period = Duration::from_secs(config.queue.tick_secs.max(1));
            Scheduler::new(Arc::new(Mutex::new(manager)), period).run().await;
        }
        Command::Profiles | Command::TestConnection { .. } | Command::Stats { .. } => {
            return Err(anyhow!("not a queue command"));
        }
    }
    Ok(())
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let config = Config::load(&opts.config)
        .with_context(|| format!("load config from {}", opts.config.display()))?;
    match opts.command {
        Command::Profiles => {
            let registry = SourceRegistry::new(config.profiles.clone())?;
            print_json(&registry.list_profiles())?;
        }
        Command::TestConnection { profile } => {
            let profile = profile_id(&config, profile.as_deref())?;
            let registry = SourceRegistry::new(config.profiles.clone())?;
            let report = registry.test_connection(profile).await;
            print_json(&report)?;
            registry.close_all().await;
        }
        Command::Stats { profile } => {
            let profile = profile_id(&config, profile.as_deref())?;
            let registry = SourceRegistry::new(config.profiles.clone())?;
            let stats = registry.stats(profile).await?;
            print_json(&stats)?;
            registry.close_all().await;
        }
        command => match &config.cms.local_db {
            Some(url) => {
                let cms = LocalCms::open(url).await.context("open local cms")?;
                queue_command(&config, cms, command).await?;
            }
            None => {
                let cms = HttpCms::new(config.cms.base_url.clone(), config.cms.api_key.clone());
                queue_command(&config, cms, command).await?;
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run(opts).await {
        error!(?e, "critical error");
        std::process::exit(1);
    }
}
