//! Attach to an agent run and print its event stream.

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use agent_run_stream::observability::init_observability;
use agent_run_stream::prelude::*;
use anyhow::Context as _;
use clap::Parser;

/// How long to wait for the post-close history refresh before exiting.
const HISTORY_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "agent-run-stream")]
#[command(about = "Attach to an agent run and print its event stream")]
struct Cli {
    /// Thread the run belongs to. Automatic restarts create new runs here.
    #[arg(long, env = "AGENT_THREAD_ID")]
    thread_id: String,

    /// Existing run to attach to. A new run is started when omitted.
    #[arg(long)]
    run_id: Option<String>,

    /// Control API base URL
    #[arg(long, env = "AGENT_API_BASE_URL")]
    base_url: String,

    /// Bearer token for the control API
    #[arg(long, env = "AGENT_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Automatic restarts before giving up
    #[arg(long, default_value_t = 3)]
    max_restarts: u32,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_observability();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut api = ControlApiConfig::new(cli.base_url);
    if let Some(token) = cli.token {
        api = api.token(token);
    }
    let control = Arc::new(HttpControlApi::new(api.clone()).context("invalid control API config")?);
    let transport = Arc::new(HttpSseTransport::new(api).context("invalid stream config")?);

    let run_id = match cli.run_id {
        Some(run_id) => run_id,
        None => control
            .start_run(&cli.thread_id)
            .await
            .context("failed to start a new run")?,
    };
    tracing::info!(event = "cli.attach", run_id = %run_id, thread_id = %cli.thread_id);

    let restart = RestartPolicy {
        max_attempts: cli.max_restarts,
        ..RestartPolicy::default()
    };
    let config = SessionConfig::for_thread(cli.thread_id).restart(restart);
    let mut session = StreamSession::spawn(config, control, transport)?;
    session.start(run_id)?;

    let mut closed_with: Option<RunStatus> = None;
    let mut interrupted = false;
    loop {
        let event = tokio::select! {
            event = session.next_event() => event,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("failed to listen for ctrl-c")?;
                interrupted = true;
                eprintln!("[interrupt] stopping run");
                session.stop()?;
                continue;
            }
            _ = tokio::time::sleep(HISTORY_GRACE), if closed_with.is_some() => None,
        };
        let Some(event) = event else {
            break;
        };
        print_event(&event, cli.json)?;

        match event {
            // `error` and `failed` are followed by a restart or a fatal event.
            SessionEvent::Closed { status }
                if !matches!(status, RunStatus::Error | RunStatus::Failed) =>
            {
                closed_with = Some(status);
            }
            SessionEvent::History { .. } if closed_with.is_some() => break,
            SessionEvent::Fatal { .. } => {
                session.shutdown();
                return Ok(ExitCode::FAILURE);
            }
            _ => {}
        }
    }

    session.shutdown();
    Ok(match closed_with {
        Some(RunStatus::Completed | RunStatus::Stopped) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_event(event: &SessionEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let mut stdout = std::io::stdout().lock();
    match event {
        SessionEvent::StatusChanged { status } => eprintln!("[status] {status}"),
        SessionEvent::AssistantStart => {}
        SessionEvent::AssistantChunk { content } => {
            write!(stdout, "{content}")?;
            stdout.flush()?;
        }
        SessionEvent::Message { message } => match message.message_type {
            MessageType::Assistant => writeln!(stdout)?,
            kind => {
                let content = message.parsed_content();
                let text = content.text().unwrap_or(message.content.as_str());
                eprintln!("[{kind:?}] {text}");
            }
        },
        SessionEvent::History { messages } => {
            eprintln!("[history] {} messages", messages.len())
        }
        SessionEvent::Error {
            message,
            recoverable,
        } => {
            let note = if *recoverable { " (will retry)" } else { "" };
            eprintln!("[error] {message}{note}");
        }
        SessionEvent::Reconnecting { attempt, delay_ms } => {
            eprintln!("[reconnecting] attempt {attempt} in {delay_ms}ms")
        }
        SessionEvent::Fatal { message } => eprintln!("[fatal] {message}"),
        SessionEvent::Closed { status } => eprintln!("[closed] {status}"),
    }
    Ok(())
}
