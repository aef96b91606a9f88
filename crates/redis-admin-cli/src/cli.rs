//! redis-admin: browse Redis keyspaces from the terminal
//!
//! Every server in the configuration file gets the same three views as the
//! admin UI: a paged key list (optionally filtered on the key name), a key
//! count and a single-key detail view.

#![recursion_limit = "256"]

mod logging;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use redis_admin_core::{AdminConfig, Lookup};
use redis_admin_redis::{AdminSite, ServerAdmin};

/// Browse Redis keys the way the admin does
#[derive(Parser)]
#[command(name = "redis-admin", version, about)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "REDIS_ADMIN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write JSON logs to the log directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured servers
    Servers,

    /// List a page of keys
    List {
        /// Server name from the configuration
        #[arg(default_value = "default")]
        server: String,

        /// Key condition such as `key__startswith=user:`
        #[arg(short, long, conflicts_with = "search")]
        filter: Option<String>,

        /// Show keys containing this text
        #[arg(short, long)]
        search: Option<String>,

        /// Position of the first key
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Page size, defaults to the server's list_per_page
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Count keys (approximate without a filter, capped with one)
    Count {
        #[arg(default_value = "default")]
        server: String,

        #[arg(short, long, conflicts_with = "search")]
        filter: Option<String>,

        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show one key in full
    Get {
        /// Key name, or a condition such as `key__endswith=:42`
        key: String,

        #[arg(short = 'S', long, default_value = "default")]
        server: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = logging::LoggingConfig::for_verbosity(cli.verbose).with_json_logs(cli.log_file);
    let _guard = match logging::init(logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AdminConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let site = AdminSite::from_config(&config).context("invalid configuration")?;
    let now = chrono::Utc::now();

    match cli.command {
        Command::Servers => {
            let targets: Vec<String> = site
                .admins()
                .iter()
                .map(|admin| describe_target(&config, admin))
                .collect();
            println!("{}", render::servers_table(site.admins(), &targets));
        }

        Command::List {
            server,
            filter,
            search,
            offset,
            limit,
            json,
        } => {
            let admin = site.admin(&server)?;
            let lookup = parse_filter(admin, filter.as_deref(), search)?;
            let limit = limit.unwrap_or_else(|| admin.list_per_page());

            // one extra key tells whether another page exists
            let mut records = admin
                .list(lookup, offset, limit.saturating_add(1))
                .await
                .with_context(|| format!("failed to list keys on {}", server))?;
            let has_more = records.len() > limit;
            records.truncate(limit);

            if json {
                let rows: Vec<serde_json::Value> = records
                    .iter()
                    .map(|record| render::record_json(record, admin.crop_size(), now))
                    .collect();
                let output = serde_json::json!({
                    "records": rows,
                    "page": render::page_summary(records.len(), offset, has_more),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!(
                    "{}",
                    render::records_table(&records, admin.crop_size(), now)
                );
                if has_more {
                    println!(
                        "more keys follow, continue with --offset {}",
                        offset + records.len()
                    );
                }
            }
        }

        Command::Count {
            server,
            filter,
            search,
        } => {
            let admin = site.admin(&server)?;
            let lookup = parse_filter(admin, filter.as_deref(), search)?;
            let capped = lookup.is_some();
            let count = admin
                .count(lookup)
                .await
                .with_context(|| format!("failed to count keys on {}", server))?;

            if capped && count > admin.list_per_page() {
                println!("{}+", admin.list_per_page());
            } else {
                println!("{}", count);
            }
        }

        Command::Get { key, server } => {
            let admin = site.admin(&server)?;
            let lookup = if key.starts_with("key__") || key.starts_with("key=") {
                Lookup::parse_assignment(&key)?
            } else {
                Lookup::exact(key)
            };
            let record = admin.get(lookup).await?;
            println!("{}", render::record_detail(&record, now));
        }
    }

    Ok(())
}

fn parse_filter(
    admin: &ServerAdmin,
    filter: Option<&str>,
    search: Option<String>,
) -> anyhow::Result<Option<Lookup>> {
    if let Some(filter) = filter {
        return Ok(Some(Lookup::parse_assignment(filter)?));
    }
    Ok(search.map(|term| admin.search_lookup(term)))
}

fn describe_target(config: &AdminConfig, admin: &ServerAdmin) -> String {
    let Ok(spec) = config.server(admin.name()) else {
        return String::new();
    };
    match &spec.service_name {
        Some(service) => format!("sentinel service {}", service),
        None if spec.master.is_some() || spec.slave.is_some() => format!(
            "{} (reads from {})",
            spec.write_params().display_target(),
            spec.read_params().display_target()
        ),
        None => spec.connection.display_target(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use redis_admin_core::{ConnectionParams, ServerSpec};

    fn site() -> (AdminConfig, AdminSite) {
        let config = AdminConfig::default()
            .with_server(
                "cache",
                ServerSpec::split(
                    ConnectionParams::new("primary.local", 6379),
                    ConnectionParams::new("replica.local", 6379),
                ),
            )
            .with_server("queue", ServerSpec::sentinel("jobs"))
            .with_sentinel("sentinel.local", 26379);
        let site = AdminSite::from_config(&config).unwrap();
        (config, site)
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "redis-admin",
            "-vv",
            "list",
            "cache",
            "--filter",
            "key__startswith=user:",
            "--limit",
            "20",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::List {
                server,
                filter,
                limit,
                offset,
                ..
            } => {
                assert_eq!(server, "cache");
                assert_eq!(filter.as_deref(), Some("key__startswith=user:"));
                assert_eq!(limit, Some(20));
                assert_eq!(offset, 0);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_filter_and_search_conflict() {
        let result = Cli::try_parse_from([
            "redis-admin",
            "count",
            "--filter",
            "key=a",
            "--search",
            "b",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_filter() {
        let (_, site) = site();
        let admin = site.admin("cache").unwrap();

        assert_eq!(
            parse_filter(admin, Some("key__endswith=:1"), None).unwrap(),
            Some(Lookup::ends_with(":1"))
        );
        assert_eq!(
            parse_filter(admin, None, Some("sess".to_string())).unwrap(),
            Some(Lookup::contains("sess"))
        );
        assert_eq!(parse_filter(admin, None, None).unwrap(), None);
        assert!(parse_filter(admin, Some("type=hash"), None).is_err());
    }

    #[test]
    fn test_describe_target() {
        let (config, site) = site();
        assert_eq!(
            describe_target(&config, site.admin("queue").unwrap()),
            "sentinel service jobs"
        );
        assert!(describe_target(&config, site.admin("cache").unwrap()).contains("replica.local"));
    }
}
