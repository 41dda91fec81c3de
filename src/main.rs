use std::{path::PathBuf, sync::Arc};

use chatbot_cache::{
    cache::{self, CacheError, EmbeddingService, QueryCache, QueryLookupResult},
    config::{self, AppConfig},
    observability,
};
use clap::Parser;

/// CLI arguments for the chatbot query cache
#[derive(Parser, Debug)]
#[command(version, about = "Per-tenant chatbot query cache", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (defaults to ./chatbot-cache.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Print Prometheus metrics to stderr after the command finishes
    #[arg(long, global = true)]
    print_metrics: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Look up a query in a tenant's cache
    Lookup {
        /// Tenant (chatbot) identifier
        #[arg(short, long)]
        tenant: String,
        /// Query text as typed by the user
        query: String,
    },
    /// Cache a reply for a tenant's query
    Store {
        /// Tenant (chatbot) identifier
        #[arg(short, long)]
        tenant: String,
        /// Query text as typed by the user
        query: String,
        /// Reply text to cache
        response: String,
        /// Follow-up questions to return with the reply (repeatable)
        #[arg(short, long = "related")]
        related: Vec<String>,
    },
    /// List a tenant's cached queries, newest first
    Entries {
        /// Tenant (chatbot) identifier
        #[arg(short, long)]
        tenant: String,
    },
    /// Remove every cached query for a tenant
    Clear {
        /// Tenant (chatbot) identifier
        #[arg(short, long)]
        tenant: String,
    },
    /// Validate the configuration file and print a summary
    CheckConfig,
    /// Show enabled compile-time features
    Features,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Features => run_features(),
        Command::CheckConfig => run_check_config(args.config.as_deref()),
        Command::Lookup { tenant, query } => {
            let query_cache = setup(args.config.as_deref()).await;
            run_lookup(&query_cache, &tenant, &query).await;
        }
        Command::Store {
            tenant,
            query,
            response,
            related,
        } => {
            let query_cache = setup(args.config.as_deref()).await;
            run_store(&query_cache, &tenant, &query, &response, &related).await;
        }
        Command::Entries { tenant } => {
            let query_cache = setup(args.config.as_deref()).await;
            run_entries(&query_cache, &tenant).await;
        }
        Command::Clear { tenant } => {
            let query_cache = setup(args.config.as_deref()).await;
            run_clear(&query_cache, &tenant).await;
        }
    }

    if args.print_metrics {
        match observability::metrics::render_metrics() {
            Some(rendered) => eprintln!("{rendered}"),
            None => eprintln!("Metrics are not enabled in this build or configuration"),
        }
    }
}

/// Resolve the config file to load, if any.
fn resolve_config_path(explicit_path: Option<&str>) -> Result<Option<PathBuf>, String> {
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path));
    }

    let cwd_config = PathBuf::from("chatbot-cache.toml");
    if cwd_config.exists() {
        return Ok(Some(cwd_config));
    }

    Ok(None)
}

fn load_config(explicit_path: Option<&str>) -> AppConfig {
    let config_path = match resolve_config_path(explicit_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let Some(config_path) = config_path else {
        return AppConfig::default();
    };

    match AppConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

/// Load config, initialize observability and build the query cache.
async fn setup(explicit_config_path: Option<&str>) -> QueryCache {
    let config = load_config(explicit_config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    match build_query_cache(&config).await {
        Ok(query_cache) => query_cache,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize query cache");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn build_query_cache(config: &AppConfig) -> Result<QueryCache, String> {
    let store = cache::create_cache(&config.cache)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| {
            format!(
                "{}. Add a [cache] section with type = \"memory\" or type = \"redis\".",
                CacheError::NotConfigured
            )
        })?;

    let embeddings = EmbeddingService::from_config(&config.embedding)
        .map_err(|e| format!("Failed to initialize embedding provider: {}", e))?;

    tracing::info!(
        store = store_label(&config.cache),
        embedding_provider = embeddings.provider_name(),
        embedding_model = embeddings.model(),
        max_entries = config.query_cache.max_entries,
        similarity_threshold = config.query_cache.similarity_threshold,
        "Query cache initialized"
    );

    Ok(QueryCache::new(
        store,
        Arc::new(embeddings),
        config.query_cache.clone(),
    ))
}

fn store_label(config: &config::CacheConfig) -> &'static str {
    match config {
        config::CacheConfig::None => "none",
        config::CacheConfig::Memory(_) => "memory",
        config::CacheConfig::Redis(_) => "redis",
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => {
            eprintln!("Failed to serialize output: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_lookup(query_cache: &QueryCache, tenant: &str, query: &str) {
    let result = query_cache.lookup(tenant, query).await;

    let similarity = match &result {
        QueryLookupResult::SemanticHit { similarity, .. } => Some(*similarity),
        QueryLookupResult::ExactHit(_) => Some(1.0),
        _ => None,
    };
    let matched_query = result.entry().map(|e| e.raw_query.clone());
    let reason = match &result {
        QueryLookupResult::Degraded(reason) => Some(reason.clone()),
        _ => None,
    };
    let outcome = result.outcome();

    print_json(&serde_json::json!({
        "outcome": outcome,
        "matched_query": matched_query,
        "similarity": similarity,
        "reason": reason,
        "reply": result.into_reply(),
    }));
}

async fn run_store(
    query_cache: &QueryCache,
    tenant: &str,
    query: &str,
    response: &str,
    related: &[String],
) {
    if let Err(e) = query_cache
        .try_cache_reply(tenant, query, response, related)
        .await
    {
        eprintln!("Failed to cache reply: {}", e);
        std::process::exit(1);
    }

    let entries = query_cache.cached_entries(tenant).await;
    print_json(&serde_json::json!({
        "tenant": tenant,
        "cached_queries": entries.len(),
    }));
}

async fn run_entries(query_cache: &QueryCache, tenant: &str) {
    let entries = query_cache.cached_entries(tenant).await;
    match serde_json::to_value(&entries) {
        Ok(value) => print_json(&value),
        Err(e) => {
            eprintln!("Failed to serialize entries: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_clear(query_cache: &QueryCache, tenant: &str) {
    match query_cache.clear_tenant(tenant).await {
        Ok(removed) => print_json(&serde_json::json!({
            "tenant": tenant,
            "removed": removed,
        })),
        Err(e) => {
            eprintln!("Failed to clear tenant cache: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_check_config(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);

    println!("Configuration is valid\n");
    println!("  store:                {}", store_label(&config.cache));
    println!("  query cache enabled:  {}", config.query_cache.enabled);
    println!("  max entries/tenant:   {}", config.query_cache.max_entries);
    println!("  entry ttl:            {}s", config.query_cache.ttl_secs);
    println!(
        "  similarity threshold: {}",
        config.query_cache.similarity_threshold
    );
    println!(
        "  embedding timeout:    {}ms",
        config.query_cache.embedding_timeout_ms
    );
    match &config.embedding {
        config::EmbeddingConfig::Hashing(c) => {
            println!("  embedding provider:   hashing ({} dims)", c.dimensions)
        }
        config::EmbeddingConfig::OpenAi(c) => {
            println!("  embedding provider:   openai ({})", c.model)
        }
    }
}

/// Print enabled compile-time features and build profile.
fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, &str, bool)] = &[
        ("cli", "Runtime", cfg!(feature = "cli")),
        ("server", "Runtime", cfg!(feature = "server")),
        ("native-http", "Runtime", cfg!(feature = "native-http")),
        ("redis", "Infrastructure", cfg!(feature = "redis")),
        ("prometheus", "Infrastructure", cfg!(feature = "prometheus")),
    ];

    let profile = if cfg!(feature = "full") {
        "full"
    } else if cfg!(feature = "tiny") {
        "tiny"
    } else {
        "custom"
    };

    println!("chatbot-cache v{version}\n");
    println!("Build profile: {profile}");
    match profile {
        "full" => println!("  (full = tiny + redis, prometheus)\n"),
        "tiny" => println!("  (tiny = in-memory store only, no metrics exporter)\n"),
        _ => println!(),
    }

    println!("Compile-time features:");

    let mut current_group = "";
    for &(name, group, enabled) in features {
        if group != current_group {
            if !current_group.is_empty() {
                println!();
            }
            println!("  {group}:");
            current_group = group;
        }
        let status = if enabled { "enabled" } else { "disabled" };
        println!("    {name:<24} {status}");
    }
}
