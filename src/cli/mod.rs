//! Terminal front end for the subcommands in `main.rs`.
//!
//! Keeps `main.rs` slim: clap parsing stays there, the turn loop and the
//! interactive permission / ask-user prompts live here.

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::assistant::Assistant;
use crate::config::Settings;
use crate::models;
use crate::process::SessionLocator;
use crate::stream::{stream_callback, Rendezvous, StreamCallback, StreamUpdate};
use crate::turn::{AssistantResponse, ExecuteRequest};

/// Chat user id for the local terminal.
pub const LOCAL_USER_ID: i64 = 0;

// ── Stream callback ─────────────────────────────────────────────────────────

/// Callback that renders progress on stderr and answers interactive
/// requests with terminal prompts.
///
/// Assistant text is not echoed here; the caller prints the final
/// response so it lands on stdout exactly once.
pub fn terminal_callback(verbose: bool) -> StreamCallback {
    stream_callback(move |update: StreamUpdate| render(update, verbose))
}

async fn render(update: StreamUpdate, verbose: bool) -> anyhow::Result<()> {
    match update {
        StreamUpdate::Result { .. } => {}
        StreamUpdate::Reasoning { content } => {
            if verbose {
                eprint!("{content}");
            }
        }
        StreamUpdate::Tool {
            tool_name, action, ..
        } => {
            if verbose {
                eprintln!("  ● {tool_name} ({})", action.as_str());
            }
        }
        StreamUpdate::PermissionRequest { kind, reply, .. } => {
            ask_permission(kind, reply).await?;
        }
        StreamUpdate::AskUser {
            question,
            choices,
            allow_freeform,
            reply,
        } => {
            ask_user(question, choices, allow_freeform, reply).await?;
        }
    }
    Ok(())
}

async fn ask_permission(kind: String, reply: Rendezvous<bool>) -> anyhow::Result<()> {
    if !std::io::stdin().is_terminal() {
        warn!(kind = %kind, "no terminal to ask for permission, denying");
        reply.resolve(false);
        return Ok(());
    }

    with_terminal(move || {
        let approved = dialoguer::Confirm::new()
            .with_prompt(format!("Copilot wants to use {kind}. Allow?"))
            .default(false)
            .interact()
            .unwrap_or(false);
        if !reply.resolve(approved) {
            eprintln!("(permission request expired, answer ignored)");
        }
    })
    .await
    .context("permission prompt panicked")
}

async fn ask_user(
    question: String,
    choices: Vec<String>,
    allow_freeform: bool,
    reply: Rendezvous<String>,
) -> anyhow::Result<()> {
    if !std::io::stdin().is_terminal() {
        warn!("no terminal to answer ask-user request, replying empty");
        reply.resolve(String::new());
        return Ok(());
    }

    with_terminal(move || {
        let answer = prompt_answer(&question, &choices, allow_freeform);
        if !reply.resolve(answer) {
            eprintln!("(question expired, answer ignored)");
        }
    })
    .await
    .context("ask-user prompt panicked")
}

/// Held while something reads the terminal.
static TERMINAL: Lazy<Arc<tokio::sync::Mutex<()>>> =
    Lazy::new(|| Arc::new(tokio::sync::Mutex::new(())));

/// Run a blocking terminal read on its own thread, one at a time.
///
/// A prompt cannot be cancelled once shown.  When a hook gives up on it
/// the thread keeps the terminal until the user answers, so the chat
/// loop's next read waits instead of racing it for stdin.
async fn with_terminal<T, F>(f: F) -> Result<T, tokio::task::JoinError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let terminal = TERMINAL.clone().lock_owned().await;
    tokio::task::spawn_blocking(move || {
        let _terminal = terminal;
        f()
    })
    .await
}

const OTHER_CHOICE: &str = "Other…";

fn prompt_answer(question: &str, choices: &[String], allow_freeform: bool) -> String {
    let free_text = |prompt: &str| -> String {
        dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .unwrap_or_default()
    };

    if choices.is_empty() {
        return free_text(question);
    }

    let mut items: Vec<&str> = choices.iter().map(String::as_str).collect();
    if allow_freeform {
        items.push(OTHER_CHOICE);
    }
    let sel = dialoguer::Select::new()
        .with_prompt(question)
        .items(&items)
        .default(0)
        .interact()
        .unwrap_or(0);

    if allow_freeform && sel == choices.len() {
        free_text("Your answer")
    } else {
        choices[sel].clone()
    }
}

// ── Chat input ──────────────────────────────────────────────────────────────

/// One line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Prompt(String),
    /// Start a fresh session.
    New,
    Quit,
    Empty,
}

impl ChatInput {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" => ChatInput::Empty,
            "/new" => ChatInput::New,
            "/quit" | "/exit" => ChatInput::Quit,
            other => ChatInput::Prompt(other.to_string()),
        }
    }
}

// ── Subcommands ─────────────────────────────────────────────────────────────

/// Options shared by `run` and `chat`.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub working_directory: PathBuf,
    pub model: Option<String>,
    pub verbose: bool,
}

/// Run one prompt and print the answer to stdout.
pub async fn run_once(
    settings: Arc<Settings>,
    opts: TurnOptions,
    prompt: &str,
    continue_session: bool,
    session_id: Option<String>,
) -> anyhow::Result<()> {
    let assistant = Assistant::new(settings);
    let mut request = ExecuteRequest::new(prompt, opts.working_directory.clone())
        .user(LOCAL_USER_ID)
        .continue_session(continue_session);
    if let Some(model) = opts.model.clone() {
        request = request.model(model);
    }
    if let Some(id) = session_id {
        request = request.session(id);
    }

    let result = run_turn(&assistant, &request, opts.verbose).await;
    assistant.shutdown().await;

    match result? {
        Some(response) => {
            print_response(&response);
            Ok(())
        }
        None => anyhow::bail!("interrupted"),
    }
}

/// Interactive chat loop.  Every turn after the first continues the session.
pub async fn chat(settings: Arc<Settings>, opts: TurnOptions) -> anyhow::Result<()> {
    let assistant = Assistant::new(settings);
    let dir = opts.working_directory.clone();
    let mut continue_session = false;

    eprintln!(
        "Chatting in {} (/new for a fresh session, /quit to leave)",
        dir.display()
    );

    loop {
        eprint!("> ");
        std::io::stderr().flush().ok();

        let Some(line) = read_line().await? else {
            break;
        };
        let prompt = match ChatInput::parse(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::New => {
                assistant.forget_session(LOCAL_USER_ID, &dir);
                continue_session = false;
                eprintln!("Started a new session.");
                continue;
            }
            ChatInput::Prompt(p) => p,
        };

        let mut request = ExecuteRequest::new(prompt, dir.clone())
            .user(LOCAL_USER_ID)
            .continue_session(continue_session);
        if let Some(model) = opts.model.clone() {
            request = request.model(model);
        }

        match run_turn(&assistant, &request, opts.verbose).await {
            Ok(Some(response)) => {
                print_response(&response);
                continue_session = true;
            }
            Ok(None) => eprintln!("(interrupted)"),
            Err(e) => eprintln!("error: {e:#}"),
        }
    }

    assistant.shutdown().await;
    Ok(())
}

/// Print the model list, marking the configured defaults.
pub fn list_models(settings: &Settings) {
    for model in models::COPILOT_MODELS {
        let mut tags = Vec::new();
        if *model == settings.copilot_model {
            tags.push("cli");
        }
        if *model == settings.copilot_sdk_model {
            tags.push("sdk");
        }
        if tags.is_empty() {
            println!("{model}");
        } else {
            println!("{model}  [{}]", tags.join(", "));
        }
    }
}

/// Show the CLI session recorded for `dir`, or every recorded session.
pub async fn show_session(settings: &Settings, dir: &Path, all: bool) -> anyhow::Result<()> {
    let locator = SessionLocator::new(settings.session_state_root());
    debug!(root = %locator.root().display(), "reading session state");

    if all {
        let mut sessions = locator.list_sessions().await;
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if sessions.is_empty() {
            println!("no sessions under {}", locator.root().display());
        }
        for s in sessions {
            let updated = s
                .updated_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            println!("{}  {}  {}", s.id, updated, s.cwd.display());
        }
        return Ok(());
    }

    match locator.find_session_id_for_directory(dir).await {
        Some(id) => println!("{id}"),
        None => println!("no session for {}", dir.display()),
    }
    Ok(())
}

/// Run a turn, racing it against Ctrl-C.  `Ok(None)` means interrupted.
async fn run_turn(
    assistant: &Assistant,
    request: &ExecuteRequest,
    verbose: bool,
) -> anyhow::Result<Option<AssistantResponse>> {
    let callback = terminal_callback(verbose);
    tokio::select! {
        r = assistant.execute(request, Some(callback)) => Ok(Some(r?)),
        _ = tokio::signal::ctrl_c() => {
            assistant.process().kill_all_processes();
            Ok(None)
        }
    }
}

fn print_response(response: &AssistantResponse) {
    if response.content.ends_with('\n') {
        print!("{}", response.content);
    } else {
        println!("{}", response.content);
    }
    if !response.session_id.is_empty() {
        eprintln!(
            "[session {} · {} ms]",
            response.session_id, response.duration_ms
        );
    }
}

/// Read one line from stdin without holding the terminal between turns.
async fn read_line() -> anyhow::Result<Option<String>> {
    let line = with_terminal(|| -> std::io::Result<Option<String>> {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    })
    .await
    .context("stdin reader panicked")?
    .context("failed to read stdin")?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_input_commands() {
        assert_eq!(ChatInput::parse("  "), ChatInput::Empty);
        assert_eq!(ChatInput::parse("/new\n"), ChatInput::New);
        assert_eq!(ChatInput::parse("/quit"), ChatInput::Quit);
        assert_eq!(ChatInput::parse("/exit"), ChatInput::Quit);
        assert_eq!(
            ChatInput::parse(" fix the build \n"),
            ChatInput::Prompt("fix the build".into())
        );
    }

    #[tokio::test]
    async fn abandoned_prompt_keeps_terminal_until_done() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let answered = Arc::new(AtomicBool::new(false));
        let flag = answered.clone();
        // The caller gives up, as a hook does on timeout.
        let gave_up = tokio::time::timeout(
            Duration::from_millis(20),
            with_terminal(move || {
                std::thread::sleep(Duration::from_millis(200));
                flag.store(true, Ordering::SeqCst);
            }),
        )
        .await;
        assert!(gave_up.is_err());

        let flag = answered.clone();
        let seen = with_terminal(move || flag.load(Ordering::SeqCst))
            .await
            .unwrap();
        assert!(seen, "next reader ran while the old prompt held the terminal");
    }

    #[tokio::test]
    async fn non_tty_permission_is_denied() {
        // Only meaningful when stdin is not a terminal.
        if std::io::stdin().is_terminal() {
            return;
        }
        let (reply, rx) = Rendezvous::pair();
        let cb = terminal_callback(false);
        cb(StreamUpdate::PermissionRequest {
            kind: "shell".into(),
            tool_call_id: "c1".into(),
            reply,
        })
        .await
        .unwrap();
        assert!(!rx.await.unwrap());
    }

    #[tokio::test]
    async fn non_tty_question_answers_empty() {
        if std::io::stdin().is_terminal() {
            return;
        }
        let (reply, rx) = Rendezvous::pair();
        let cb = terminal_callback(false);
        cb(StreamUpdate::AskUser {
            question: "Which branch?".into(),
            choices: vec!["main".into()],
            allow_freeform: true,
            reply,
        })
        .await
        .unwrap();
        assert_eq!(rx.await.unwrap(), "");
    }
}
