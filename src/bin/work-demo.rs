//! work-demo: drive the engine from the command line with logging enabled.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use work_engine::config::{self, Config};
use work_engine::telemetry::{TelemetryConfig, init_telemetry};
use work_engine::{RunError, SingleFlightRunner, SubWeight, Task, delivery, group};

#[derive(Parser)]
#[command(name = "work-demo", about = "Exercise the work engine")]
struct Cli {
    /// TOML configuration file (environment variables still override it)
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a chain of steps and print its progress
    Chain {
        /// Number of steps
        #[arg(long, default_value_t = 3)]
        steps: usize,
        /// Fail at this step (1-based)
        #[arg(long)]
        fail_at: Option<usize>,
        /// Milliseconds each step sleeps
        #[arg(long, default_value_t = 100)]
        delay_ms: u64,
    },
    /// Run a group of members and print the report
    Group {
        /// Number of members
        #[arg(long, default_value_t = 8)]
        members: usize,
        /// Members that fail (0-based indices)
        #[arg(long)]
        fail: Vec<usize>,
    },
    /// Fire concurrent single-flight requests for one key
    Flight {
        /// Number of concurrent callers
        #[arg(long, default_value_t = 5)]
        callers: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_toml_file(path)?,
        None => Config::from_env()?,
    };
    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "work-demo"))?;
    config::install(config);

    match cli.command {
        Command::Chain {
            steps,
            fail_at,
            delay_ms,
        } => cmd_chain(steps, fail_at, delay_ms).await,
        Command::Group { members, fail } => cmd_group(members, fail).await,
        Command::Flight { callers } => cmd_flight(callers).await,
    }
}

fn step(index: usize, value: usize, fail_at: Option<usize>, delay_ms: u64) -> Task<usize> {
    Task::from_fn_with(move |task: &Task<usize>| {
        for tick in 1..=4 {
            if task.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            std::thread::sleep(Duration::from_millis(delay_ms / 4));
            task.progress().update(tick as f64 / 4.0);
        }
        if fail_at == Some(index) {
            return Err(RunError::failed(anyhow::anyhow!("step {index} failed")));
        }
        Ok(value + index)
    })
}

async fn cmd_chain(steps: usize, fail_at: Option<usize>, delay_ms: u64) -> anyhow::Result<()> {
    anyhow::ensure!(steps > 0, "a chain needs at least one step");

    let head = step(1, 0, fail_at, delay_ms);
    let mut tail = head.clone();
    for index in 2..=steps {
        tail = tail.chain(SubWeight::Weight(1.0 / index as f64), move |value| {
            Ok(step(index, value, fail_at, delay_ms))
        });
    }

    let result = tail
        .run_with_progress(|value| println!("progress {:>5.1}%", value * 100.0))
        .wait()
        .await;
    delivery::flush().await;

    match result {
        Ok(value) => println!("chain finished: {value}"),
        Err(e) => println!("chain failed: {e}"),
    }
    println!("{}", serde_json::to_string_pretty(&tail.snapshot())?);
    Ok(())
}

async fn cmd_group(members: usize, fail: Vec<usize>) -> anyhow::Result<()> {
    let tasks: Vec<Task<usize>> = (0..members)
        .map(|i| {
            let fails = fail.contains(&i);
            Task::from_fn(move || {
                std::thread::sleep(Duration::from_millis(20));
                if fails {
                    Err(RunError::custom(format!("member {i} failed")))
                } else {
                    Ok(i)
                }
            })
        })
        .collect();

    let report = group(&tasks).run().wait().await?;
    println!(
        "group finished: {} member(s), {} error(s)",
        members,
        report.errors.len()
    );
    for error in &report.errors {
        println!("  {error}");
    }
    Ok(())
}

async fn cmd_flight(callers: usize) -> anyhow::Result<()> {
    let runner: SingleFlightRunner<String> = SingleFlightRunner::new();
    let executions = Arc::new(AtomicUsize::new(0));

    let requests = (0..callers).map(|_| {
        let runner = runner.clone();
        let executions = Arc::clone(&executions);
        async move {
            runner
                .run("demo", move |_token| async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok("shared answer".to_string())
                })
                .await
        }
    });
    let results = futures::future::join_all(requests).await;

    for (i, result) in results.iter().enumerate() {
        println!("caller {i}: {result:?}");
    }
    println!(
        "{} caller(s), {} execution(s)",
        callers,
        executions.load(Ordering::SeqCst)
    );
    Ok(())
}
