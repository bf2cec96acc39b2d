//! reg-harvester - Distributed regulations.gov harvester
//!
//! Entry point for the CLI application.

use anyhow::Context;
use clap::Parser;
use console::{style, Term};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use reg_harvester::client::WorkClient;
use reg_harvester::config::{
    redis_config, CliArgs, ClientConfig, Command, GeneratorConfig, ServerConfig, ValidatorConfig,
};
use reg_harvester::generator::{DiskStorage, Validator, WorkGenerator};
use reg_harvester::queue::{JobQueue, JobStatistics};
use reg_harvester::search::RegulationsApi;
use reg_harvester::server::{serve_with_shutdown, AppState, DiskSaver, FanoutSink, ResultSink, WorkServer};
use reg_harvester::store::RedisStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    setup_logging(args.quiet, args.verbose);

    // Handle Ctrl+C
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        if shutdown_clone.load(Ordering::Relaxed) {
            eprintln!("\nForce shutdown!");
            std::process::exit(130);
        }
        eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    match args.command {
        Command::Serve {
            bind,
            port,
            data_dir,
            mirror_dirs,
        } => {
            let config =
                ServerConfig::from_serve_args(&bind, port, &data_dir, &mirror_dirs, &args.redis)?;
            run_serve(config, shutdown).await?
        }

        Command::Generate {
            api_key,
            data_dir,
            interval_hours,
            once,
        } => {
            let config = GeneratorConfig::from_generate_args(
                &api_key,
                &data_dir,
                interval_hours,
                once,
                &args.redis,
            )?;
            run_generate(config, shutdown).await?
        }

        Command::Work {
            server,
            api_key,
            client_id,
            poll_ms,
            max_jobs,
        } => {
            let config =
                ClientConfig::from_work_args(&server, &api_key, client_id, poll_ms, max_jobs)?;
            run_work(config, args.quiet, shutdown).await?
        }

        Command::Validate {
            api_key,
            data_dir,
            endpoint,
            output,
        } => {
            let config = ValidatorConfig::from_validate_args(
                &api_key,
                &data_dir,
                endpoint.as_deref(),
                output.as_deref(),
            )?;
            run_validate(config, shutdown).await?
        }

        Command::Status {
            watch,
            interval,
            format,
        } => run_status(&args.redis, watch, interval, &format, shutdown).await?,
    }

    Ok(())
}

fn setup_logging(quiet: bool, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("reg_harvester=debug,tower_http=debug,warn")
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::new("reg_harvester=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Set `target` once `source` is set
fn forward_shutdown(source: Arc<AtomicBool>, target: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while !source.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        target.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown(shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn run_serve(config: ServerConfig, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    println!(
        "{} Starting work server on {}",
        style("[Server]").cyan().bold(),
        style(config.addr).green()
    );
    println!("  Data: {}", style(config.data_dir.display()).yellow());
    for mirror in &config.mirror_dirs {
        println!("  Mirror: {}", style(mirror.display()).yellow());
    }
    println!("  Redis: {}", style(&config.redis.url).dim());
    println!();

    let store = RedisStore::connect(config.redis.clone())
        .await
        .context("Failed to connect to Redis")?;

    let primary: Arc<dyn ResultSink> = Arc::new(DiskSaver::new(&config.data_dir));
    let sink: Arc<dyn ResultSink> = if config.mirror_dirs.is_empty() {
        primary
    } else {
        let fanout = config
            .mirror_dirs
            .iter()
            .fold(FanoutSink::new(primary), |fanout, dir| {
                fanout.with(Arc::new(DiskSaver::new(dir)))
            });
        Arc::new(fanout)
    };

    let state = Arc::new(AppState {
        server: WorkServer::new(Arc::new(store), sink),
    });

    serve_with_shutdown(state, config.addr, wait_for_shutdown(shutdown)).await?;
    Ok(())
}

async fn run_generate(config: GeneratorConfig, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    println!(
        "{} Generating jobs from regulations.gov",
        style("[Generator]").cyan().bold()
    );
    println!("  Data: {}", style(config.data_dir.display()).yellow());
    println!("  Redis: {}", style(&config.redis.url).dim());
    println!(
        "  Mode: {}",
        if config.once {
            style("single round".to_string()).yellow()
        } else {
            style(format!("every {:.1}h", config.interval.as_secs_f64() / 3600.0)).green()
        }
    );
    println!();

    let store = RedisStore::connect(config.redis.clone())
        .await
        .context("Failed to connect to Redis")?;
    let queue = JobQueue::new(Arc::new(store));
    let api = RegulationsApi::new(config.api_key.as_str()).context("Failed to build API client")?;
    let storage = DiskStorage::new(&config.data_dir);

    let generator = WorkGenerator::new(queue, Arc::new(api), Arc::new(storage));
    forward_shutdown(shutdown, generator.shutdown_handle());

    if config.once {
        let summary = generator.run_once().await?;
        println!();
        println!("{}", style("Generation Complete").green().bold());
        println!("  Jobs added: {}", style(summary.total_added()).green());
        if summary.skipped > 0 {
            println!("  Skipped: {}", style(summary.skipped).red());
        }
    } else {
        generator.run(config.interval).await;
    }

    Ok(())
}

async fn run_work(config: ClientConfig, quiet: bool, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    if !quiet {
        println!("{} Starting client worker", style("[Worker]").cyan().bold());
        println!("  Server: {}", style(&config.server_url).green());
        if let Some(max) = config.max_jobs {
            println!("  Max jobs: {}", style(max).yellow());
        }
        println!();
    }

    let api = RegulationsApi::new(config.api_key.as_str()).context("Failed to build API client")?;
    let mut client = WorkClient::new(config, Arc::new(api))?;
    forward_shutdown(shutdown, client.shutdown_handle());

    let stats = client.run().await?;

    println!();
    println!("{}", style("Worker Complete").green().bold());
    println!("  Jobs completed: {}", style(stats.jobs_completed).green());
    println!("  Attachments sent: {}", style(stats.attachments_sent).cyan());
    if stats.jobs_invalid > 0 {
        println!("  Invalid jobs: {}", style(stats.jobs_invalid).yellow());
    }
    if stats.errors > 0 {
        println!("  Errors: {}", style(stats.errors).red());
    }

    Ok(())
}

async fn run_validate(config: ValidatorConfig, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    println!(
        "{} Checking harvested data against regulations.gov",
        style("[Validator]").cyan().bold()
    );
    println!("  Data: {}", style(config.data_dir.display()).yellow());
    println!("  Endpoints: {}", style(config.endpoints.join(", ")).green());
    println!();

    let api = RegulationsApi::new(config.api_key.as_str()).context("Failed to build API client")?;
    let storage = DiskStorage::new(&config.data_dir);
    let validator = Validator::new(Arc::new(api), Arc::new(storage));
    forward_shutdown(shutdown, validator.shutdown_handle());

    let report = validator.validate_all(&config.endpoints).await?;

    println!();
    println!("{}", style("Validation Complete").green().bold());
    println!("  Validated: {}", style(report.total_validated).cyan());
    println!(
        "  Not in database: {}",
        if report.not_in_db > 0 {
            style(report.not_in_db).red()
        } else {
            style(report.not_in_db).green()
        }
    );
    for (kind, links) in &report.missing {
        println!("  {}: {}", kind, style(links.len()).yellow());
    }

    if let Some(path) = &config.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("  Report: {}", style(path.display()).yellow());
    }

    Ok(())
}

async fn run_status(
    redis_url: &str,
    watch: bool,
    interval: u64,
    format: &str,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    if !matches!(format, "text" | "json") {
        anyhow::bail!("Unknown output format '{}' (expected text or json)", format);
    }

    let store = Arc::new(
        RedisStore::connect(redis_config(redis_url)?)
            .await
            .context("Failed to connect to Redis")?,
    );
    let queue = JobQueue::new(store.clone());
    let stats = JobStatistics::new(store);

    loop {
        let status = stats.status(&queue).await?;

        if format == "json" {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            // Clear screen in watch mode
            if watch {
                let term = Term::stdout();
                let _ = term.clear_screen();
            }

            println!("{}", style("reg-harvester Status").cyan().bold());
            println!("{}", "=".repeat(50));
            println!();

            let health_style = match status.health.as_str() {
                "healthy" => style(&status.health).green(),
                "idle" => style(&status.health).dim(),
                "degraded" => style(&status.health).yellow(),
                _ => style(&status.health).red(),
            };
            println!("Health: {}", health_style.bold());
            println!();

            let q = &status.queue;
            println!("{}", style("Queue").yellow().bold());
            println!("  Waiting:     {}", style(q.num_jobs_waiting).cyan());
            println!("  In progress: {}", style(q.num_jobs_in_progress).blue());
            println!(
                "  Invalid:     {}",
                if q.num_jobs_invalid > 0 {
                    style(q.num_jobs_invalid).red()
                } else {
                    style(q.num_jobs_invalid).dim()
                }
            );
            println!("  Clients:     {}", style(q.clients_total).magenta());
            println!();

            println!("{}", style("Waiting by type").yellow().bold());
            println!("  Dockets:     {}", style(q.num_jobs_dockets_queued).dim());
            println!("  Documents:   {}", style(q.num_jobs_documents_queued).dim());
            println!("  Comments:    {}", style(q.num_jobs_comments_queued).dim());
            println!("  Attachments: {}", style(q.num_jobs_attachments_queued).dim());
            println!();

            let done = &status.done;
            println!("{}", style("Completed").yellow().bold());
            println!("  Dockets:     {}", style(done.num_dockets_done).green());
            println!("  Documents:   {}", style(done.num_documents_done).green());
            println!("  Comments:    {}", style(done.num_comments_done).green());
            println!("  Attachments: {}", style(done.num_attachments_done).green());
            println!();

            if !status.messages.is_empty() {
                println!("{}", style("Messages").yellow().bold());
                for msg in &status.messages {
                    println!("  {} {}", style("!").yellow(), msg);
                }
                println!();
            }

            println!(
                "Last updated: {}",
                style(status.timestamp.format("%Y-%m-%d %H:%M:%S UTC")).dim()
            );
        }

        if !watch || shutdown.load(Ordering::Relaxed) {
            break;
        }

        tokio::time::sleep(Duration::from_secs(interval)).await;
    }

    Ok(())
}
