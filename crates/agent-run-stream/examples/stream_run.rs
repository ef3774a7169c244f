use agent_run_stream::observability::init_observability;
use agent_run_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    init_observability();
    let thread_id = std::env::var("AGENT_THREAD_ID")
        .map_err(|_| StreamError::Config("AGENT_THREAD_ID is not set".into()))?;
    let run_id = std::env::var("AGENT_RUN_ID")
        .map_err(|_| StreamError::Config("AGENT_RUN_ID is not set".into()))?;

    let mut session = StreamSession::connect(
        SessionConfig::for_thread(thread_id),
        ControlApiConfig::from_env()?,
    )?;
    session.start(run_id)?;

    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::AssistantChunk { content } => print!("{content}"),
            SessionEvent::Message { .. } => println!(),
            SessionEvent::Error { message, .. } => eprintln!("run error: {message}"),
            SessionEvent::Fatal { message } => {
                eprintln!("giving up: {message}");
                break;
            }
            SessionEvent::Closed { status } if status != RunStatus::Error => break,
            _ => {}
        }
    }

    println!("final status: {}", session.status());
    session.shutdown();
    Ok(())
}
