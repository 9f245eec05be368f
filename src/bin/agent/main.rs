use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde_json::Value;
use std::future::Future;
use std::io::{BufRead, BufReader, Write};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use goal_browser_agent::agent::{Agent, TaskOutcome};
use goal_browser_agent::brain::ModelGateway;
use goal_browser_agent::channel::SessionHandle;
use goal_browser_agent::config::{Config, Mode};
use goal_browser_agent::hands::ChromeEngine;
use goal_browser_agent::owner::SessionOwner;
use goal_browser_agent::snapshot::{self, SnapshotSink};

type Input = mpsc::UnboundedReceiver<String>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let gateway_settings = config.gateway_settings();
    if gateway_settings.api_key.is_none() {
        warn!("no API key configured, model requests are sent without authorization");
    }
    let gateway = ModelGateway::new(gateway_settings).context("could not build the model client")?;

    // 1. Session owner thread; Chrome starts with the first command
    let engine = ChromeEngine::new(config.chrome_path.clone(), config.connect.clone());
    let (session, owner) =
        SessionOwner::spawn(engine, config.session_settings()).context("could not start the session owner")?;

    // 2. Snapshots, periodic and per reactive step
    let sink = SnapshotSink::new(&config.snapshot_dir);
    let periodic = config
        .snapshot_interval()
        .map(|every| snapshot::spawn_periodic(session.clone(), sink.clone(), every));

    let agent = Agent::new(Box::new(gateway), session.clone(), config.agent_settings()).with_snapshots(sink);
    info!(mode = ?config.mode, model = %config.model, "agent ready");

    // 3. Read goals until exit
    let mut input = spawn_line_reader(BufReader::new(std::io::stdin()));
    loop {
        prompt("\nWhat should the browser do? ('exit' to quit)\n> ");
        let Some(line) = until_interrupted(input.recv()).await.flatten() else {
            break;
        };

        let goal = line.trim();
        if goal.is_empty() {
            continue;
        }
        if goal.eq_ignore_ascii_case("exit") || goal.eq_ignore_ascii_case("quit") {
            break;
        }
        if let Some(raw) = goal.strip_prefix(':') {
            if until_interrupted(run_raw(&session, raw)).await != Some(true) {
                break;
            }
            continue;
        }

        info!(%goal, "starting task");
        let task = async {
            match config.mode {
                Mode::Plan => plan_and_confirm(&agent, goal, &mut input).await,
                Mode::Reactive => Ok(Some(agent.run_reactive(goal).await)),
            }
        };
        match until_interrupted(task).await {
            Some(outcome) => {
                if let Some(outcome) = outcome? {
                    report(&outcome);
                }
            }
            None => {
                warn!("task interrupted, the current browser command finishes before shutdown");
                break;
            }
        }
    }

    if let Some(task) = periodic {
        task.abort();
    }
    info!("shutting down");
    session.shutdown().await;
    drop(agent);
    drop(session);
    tokio::task::spawn_blocking(move || owner.join())
        .await?
        .map_err(|_| anyhow!("session owner thread panicked"))?;
    Ok(())
}

async fn plan_and_confirm(agent: &Agent, goal: &str, input: &mut Input) -> Result<Option<TaskOutcome>> {
    let plan = match agent.plan(goal).await {
        Ok(plan) => plan,
        Err(e) => {
            error!("could not generate a valid action plan: {e}");
            return Ok(None);
        }
    };

    println!("{}", serde_json::to_string_pretty(&plan)?);
    prompt("Press Enter to execute, or type 'no' to cancel: ");
    let Some(answer) = input.recv().await else {
        return Ok(None);
    };
    if answer.trim().eq_ignore_ascii_case("no") {
        info!("plan cancelled");
        return Ok(None);
    }
    Ok(Some(agent.execute_plan(&plan).await))
}

/// `:<action> [json params]` sends one command straight to the browser.
/// Returns false once the session has been shut down.
async fn run_raw(session: &SessionHandle, input: &str) -> bool {
    let input = input.trim();
    let (action, params) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
    let params = if params.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str(params) {
            Ok(params) => params,
            Err(e) => {
                error!("params must be a JSON object: {e}");
                return true;
            }
        }
    };

    let result = session.submit_raw(action, &params).await;
    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("could not print result: {e}"),
    }
    action != "shutdown"
}

/// Read lines on a plain thread. A read blocked there never holds up runtime
/// shutdown; the channel closes at end of input.
fn spawn_line_reader<R: BufRead + Send + 'static>(reader: R) -> Input {
    let (lines_tx, lines_rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("input-reader".into())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if lines_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("could not read input: {e}");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        error!("could not start the input reader: {e}");
    }
    lines_rx
}

/// Run `task` until it finishes or the user presses Ctrl-C.
async fn until_interrupted<F: Future>(task: F) -> Option<F::Output> {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handling unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };
    interruptible(task, interrupt).await
}

async fn interruptible<F: Future, I: Future>(task: F, interrupt: I) -> Option<F::Output> {
    tokio::select! {
        biased;
        output = task => Some(output),
        _ = interrupt => {
            info!("interrupted");
            None
        }
    }
}

fn report(outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Completed { steps, elapsed, reason } => {
            println!("Task completed in {:.2}s ({steps} steps).", elapsed.as_secs_f64());
            if let Some(reason) = reason {
                println!("{reason}");
            }
        }
        TaskOutcome::StepFailed { index, action, reason } => {
            println!("Step {} ({action}) failed, task aborted: {reason}", index + 1);
        }
        TaskOutcome::StepLimit { steps } => println!("Stopped after {steps} steps without finishing."),
        TaskOutcome::Aborted { steps, reason } => println!("Task aborted after {steps} steps: {reason}"),
    }
}

fn prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}
