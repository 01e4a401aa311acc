use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use livesync::bridge::{self, BridgeError};
use livesync::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use livesync::{
    BackendConfig, BackendError, ConfigError, DispatchError, Dispatcher, Effect, HttpBackend, LiveConfig, LiveSession,
    LocalPush, SessionSnapshot, SubscribeError,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("backend client failed: {0}")]
    Backend(#[from] BackendError),
    #[error("push feed failed: {0}")]
    Bridge(#[from] BridgeError),
    #[error("subscribe failed: {0}")]
    Subscribe(#[from] SubscribeError),
    #[error("send failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("failed to read snapshot: {0}")]
    SnapshotRead(#[from] std::io::Error),
    #[error("invalid snapshot JSON: {0}")]
    SnapshotJson(#[from] serde_json::Error),
    #[error("push feed task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Parser, Debug)]
#[command(name = "livesync", about = "Live chat and presence client for meeting sessions")]
struct Cli {
    #[command(flatten)]
    backend: BackendArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct BackendArgs {
    #[arg(long, env = "LIVESYNC_BACKEND_URL")]
    backend_url: String,

    #[arg(long, env = "LIVESYNC_BACKEND_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "LIVESYNC_REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow a session's chat and participants until Ctrl-C.
    Tail(TailArgs),
    /// Send one message (or `/emoji`, `/invite` command) to a session.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct TailArgs {
    #[arg(long, env = "LIVESYNC_PUSH_URL")]
    push_url: String,

    #[arg(long)]
    session: String,

    #[arg(long, env = "LIVESYNC_USER_ID")]
    user: Option<String>,

    /// JSON file holding the initial `{messages, participants}` snapshot.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long)]
    session: String,

    #[arg(required = true, trailing_var_arg = true)]
    text: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = LiveConfig::from_env();
    let backend = Arc::new(HttpBackend::new(BackendConfig::new(
        &cli.backend.backend_url,
        cli.backend.token,
        Duration::from_secs(cli.backend.timeout_secs),
    )?)?);

    match cli.command {
        Command::Tail(args) => run_tail(backend, config, args).await,
        Command::Send(args) => run_send(backend, config, args).await,
    }
}

async fn run_send(backend: Arc<HttpBackend>, config: LiveConfig, args: SendArgs) -> Result<(), CliError> {
    let mut dispatcher = Dispatcher::new(backend, config.max_message_chars, config.echo_anchor_delay);
    dispatcher.set_draft(args.text.join(" "));
    let sent = dispatcher.submit_draft(&args.session).await?;
    println!("sent {:?}", sent.intent);
    Ok(())
}

async fn run_tail(backend: Arc<HttpBackend>, config: LiveConfig, args: TailArgs) -> Result<(), CliError> {
    let snapshot = match &args.snapshot {
        Some(path) => serde_json::from_str::<SessionSnapshot>(&std::fs::read_to_string(path)?)?,
        None => SessionSnapshot::default(),
    };

    let push = LocalPush::new();
    let mut session = LiveSession::new(Arc::new(push.clone()), backend, args.user, config);
    let push_url = args.push_url.clone();
    let (activation, mut feed) = session
        .open_and_feed(&args.session, snapshot, move || async move { bridge::run(&push_url, push).await })
        .await?;
    tracing::info!(session_id = %args.session, ?activation, "tail: watching");

    let mut roster = 0;
    let mut printed = print_new(&session, 0, &mut roster);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        let step = tokio::select! {
            _ = &mut ctrl_c => Step::Interrupted,
            done = &mut feed => Step::FeedEnded(done),
            effects = session.next_effects() => Step::Effects(effects),
        };
        match step {
            Step::Interrupted => break Ok(()),
            Step::FeedEnded(Ok(Ok(published))) => {
                tracing::info!(published, "tail: push feed ended");
                break Ok(());
            }
            Step::FeedEnded(Ok(Err(e))) => break Err(e.into()),
            Step::FeedEnded(Err(e)) => break Err(e.into()),
            Step::Effects(effects) => {
                if effects.iter().any(|e| matches!(e, Effect::Rendered { .. })) {
                    printed = print_new(&session, printed, &mut roster);
                }
            }
        }
    };

    session.close().await;
    if session.rejected_frames() > 0 {
        tracing::warn!(rejected = session.rejected_frames(), "tail: frames rejected");
    }
    outcome
}

enum Step {
    Interrupted,
    FeedEnded(Result<Result<u64, BridgeError>, tokio::task::JoinError>),
    Effects(Vec<Effect>),
}

fn print_new(session: &LiveSession, printed: usize, roster: &mut usize) -> usize {
    let messages = session.state().messages().as_slice();
    for message in messages.iter().skip(printed) {
        let author = if message.user_name.is_empty() { &message.user_id } else { &message.user_name };
        println!("[{author}] {}", message.content);
    }

    let participants = session.state().participants().len();
    if participants != *roster {
        println!("-- {participants} participant(s)");
        *roster = participants;
    }
    messages.len()
}
