mod logging;

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use gigmarket_client::api::models::{Conversation, LoginRequest, RegisterRequest, Role};
use gigmarket_client::app::ConfigError;
use gigmarket_client::storage::ChatCache;
use gigmarket_client::sync::{DisplayMessage, MessageKey, NavigationTarget, NotificationLevel};
use gigmarket_client::utils::normalize_url;
use gigmarket_client::{
    ApiError, AppState, EngineCommand, EngineEvent, EngineHandle, EngineOptions, HttpApi, Session,
    SyncSettings, spawn_engine,
};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

const DEFAULT_SERVER: &str = "http://localhost:8080";

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal chat for the gig marketplace")]
struct Args {
    /// API server, e.g. https://gigs.example.com
    #[arg(long, env = "GIGCHAT_SERVER")]
    server: Option<String>,

    /// Bearer token from a previous login.
    #[arg(long, env = "GIGCHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, env = "GIGCHAT_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "GIGCHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Create the account first, with this role (needs --name, --email, --password).
    #[arg(long, value_enum, requires = "name")]
    register: Option<AccountRole>,

    /// Display name for --register.
    #[arg(long)]
    name: Option<String>,

    /// Open this conversation once the list has loaded.
    #[arg(long)]
    chat: Option<u64>,

    /// Start a conversation about this project (clients only, with --freelancer).
    #[arg(long, requires = "freelancer")]
    project: Option<u64>,

    #[arg(long, requires = "project")]
    freelancer: Option<u64>,

    /// Do not read or write the conversation cache.
    #[arg(long)]
    no_cache: bool,

    /// Remember the server and email for next time.
    #[arg(long)]
    save: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AccountRole {
    Client,
    Freelancer,
}

impl From<AccountRole> for Role {
    fn from(role: AccountRole) -> Self {
        match role {
            AccountRole::Client => Role::Client,
            AccountRole::Freelancer => Role::Freelancer,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no credentials: pass --token, or --email with --password")]
    MissingCredentials,
    #[error("stdin: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("gigchat: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    let mut state = AppState::load();
    let server = args
        .server
        .clone()
        .or_else(|| (!state.base_url.is_empty()).then(|| state.base_url.clone()))
        .unwrap_or_else(|| DEFAULT_SERVER.to_owned());
    let settings = SyncSettings::from_env()?;

    let mut api = HttpApi::new(&server, settings.request_timeout)?;
    let session = authenticate(&mut api, &args, &state).await?;
    log::info!("signed in as {} ({:?})", session.user.name, session.user.role);

    if args.save {
        state.base_url = normalize_url(&server);
        state.last_email = Some(session.user.email.clone());
        state.save()?;
    }

    let cache = if args.no_cache {
        None
    } else {
        ChatCache::open_default()
            .inspect_err(|err| log::warn!("running without conversation cache: {err}"))
            .ok()
    };
    let options = EngineOptions {
        settings,
        navigation: NavigationTarget {
            conversation_id: args.chat,
            project_id: args.project,
            freelancer_id: args.freelancer,
        },
        cache,
    };

    let viewer_id = session.viewer_id();
    let handle = spawn_engine(Arc::new(api), &session, options);
    let printer = tokio::spawn(print_events(handle.subscribe(), viewer_id));

    println!("Type a message and press enter. Commands: /open ID, /with PROJECT FREELANCER, /close, /delete ID, /refresh, /state, /quit");
    let result = read_commands(&handle).await;
    drop(handle);
    let _ = printer.await;
    result
}

async fn authenticate(api: &mut HttpApi, args: &Args, state: &AppState) -> Result<Session, CliError> {
    if let Some(token) = args.token.as_deref() {
        api.set_token(token);
        let user = api.current_user().await?;
        return Ok(Session::new(user, token));
    }

    let email = args.email.clone().or_else(|| state.last_email.clone());
    let (Some(email), Some(password)) = (email, args.password.clone()) else {
        return Err(CliError::MissingCredentials);
    };
    let auth = match (args.register, args.name.clone()) {
        (Some(role), Some(name)) => {
            let account = RegisterRequest {
                name,
                email,
                password,
                role: role.into(),
            };
            api.register(&account).await?
        }
        _ => api.login(&LoginRequest { email, password }).await?,
    };
    api.set_token(auth.token.clone());
    Ok(Session::new(auth.user, auth.token))
}

/// One line of user input.
#[derive(Debug)]
enum Input {
    Say(String),
    Engine(EngineCommand),
    ShowState,
    Quit,
}

async fn read_commands(handle: &EngineHandle) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sent = match parse_input(line) {
            Ok(Input::Quit) => break,
            Ok(Input::Say(text)) => match handle.set_draft(text).await {
                Ok(()) => handle.submit().await,
                Err(err) => Err(err),
            },
            Ok(Input::Engine(command)) => handle.send(command).await,
            Ok(Input::ShowState) => handle.snapshot().await.map(|snapshot| {
                match serde_json::to_string_pretty(&snapshot) {
                    Ok(json) => println!("{json}"),
                    Err(err) => log::warn!("snapshot not printable: {err}"),
                }
            }),
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };
        if sent.is_err() {
            break;
        }
    }
    Ok(())
}

fn parse_input(line: &str) -> Result<Input, &'static str> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Say(line.to_owned()));
    };
    let mut parts = rest.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let mut id = || parts.next().and_then(|p| p.parse::<u64>().ok());
    let command = match verb {
        "quit" | "q" => return Ok(Input::Quit),
        "state" => return Ok(Input::ShowState),
        "open" => EngineCommand::Select {
            conversation_id: id().ok_or("usage: /open ID")?,
        },
        "delete" => EngineCommand::Delete {
            conversation_id: id().ok_or("usage: /delete ID")?,
        },
        "with" => {
            let project_id = id().ok_or("usage: /with PROJECT FREELANCER")?;
            let freelancer_id = id().ok_or("usage: /with PROJECT FREELANCER")?;
            EngineCommand::OpenWith {
                project_id,
                freelancer_id,
            }
        }
        "close" => EngineCommand::ClearSelection,
        "refresh" => EngineCommand::RefreshChats,
        _ => return Err("unknown command"),
    };
    Ok(Input::Engine(command))
}

fn describe(conv: &Conversation, viewer_id: u64) -> String {
    let with = conv
        .counterpart(viewer_id)
        .map(|u| u.name.as_str())
        .unwrap_or("unknown");
    let mut line = format!("[{}] {} with {}", conv.id, conv.title(), with);
    if conv.unread_count > 0 {
        line.push_str(&format!(" ({} unread)", conv.unread_count));
    }
    line
}

/// What has been printed for the open conversation.
#[derive(Debug, Default)]
struct Transcript {
    conversation: Option<u64>,
    shown: HashSet<MessageKey>,
    /// Printed placeholders still waiting for their server copy, as (sender, content).
    echoes: Vec<(u64, String)>,
}

impl Transcript {
    /// Returns true when a different conversation was opened.
    fn open(&mut self, conversation: Option<u64>) -> bool {
        if self.conversation == conversation {
            return false;
        }
        *self = Self {
            conversation,
            ..Self::default()
        };
        true
    }

    /// Messages not printed yet. A server copy of a printed placeholder counts as printed.
    fn fresh<'a>(&mut self, messages: &'a [DisplayMessage]) -> Vec<&'a DisplayMessage> {
        let mut out = Vec::new();
        for msg in messages {
            if !self.shown.insert(msg.key) {
                continue;
            }
            if !msg.key.is_pending()
                && let Some(pos) = self
                    .echoes
                    .iter()
                    .position(|(sender, content)| *sender == msg.sender_id && *content == msg.content)
            {
                self.echoes.remove(pos);
                continue;
            }
            if msg.key.is_pending() {
                self.echoes.push((msg.sender_id, msg.content.clone()));
            }
            out.push(msg);
        }
        out
    }

    /// A failed send will never be echoed.
    fn forget(&mut self, sender_id: u64, content: &str) {
        if let Some(pos) = self
            .echoes
            .iter()
            .position(|(sender, c)| *sender == sender_id && c == content)
        {
            self.echoes.remove(pos);
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<EngineEvent>, viewer_id: u64) {
    let mut transcript = Transcript::default();
    let mut last_list: Vec<String> = Vec::new();
    let mut last_unread = 0;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("display fell behind by {skipped} event(s)");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            EngineEvent::ConversationsUpdated(list) => {
                let lines: Vec<String> = list.iter().map(|c| describe(c, viewer_id)).collect();
                if lines != last_list {
                    println!("-- {} conversation(s)", lines.len());
                    for line in &lines {
                        println!("   {line}");
                    }
                    last_list = lines;
                }
            }
            EngineEvent::SelectionChanged(Some(conv)) => {
                if transcript.open(Some(conv.id)) {
                    println!("== {} ==", describe(&conv, viewer_id));
                }
            }
            EngineEvent::SelectionChanged(None) => {
                if transcript.open(None) {
                    println!("== no conversation open ==");
                }
            }
            EngineEvent::MessagesUpdated { messages, .. } => {
                for msg in transcript.fresh(&messages) {
                    let who = if msg.sender_id == viewer_id { "me" } else { "them" };
                    let marker = if msg.key.is_pending() { " (sending)" } else { "" };
                    println!(
                        "{} {who}: {}{marker}",
                        msg.created_at.format("%H:%M"),
                        msg.content
                    );
                }
            }
            EngineEvent::DraftChanged { text, sending } => {
                if !sending && !text.is_empty() {
                    transcript.forget(viewer_id, &text);
                    println!("(draft restored: {text})");
                }
            }
            EngineEvent::UnreadTotal(total) => {
                if total != last_unread {
                    println!("-- {total} unread");
                    last_unread = total;
                }
            }
            EngineEvent::Notification(note) => {
                let prefix = match note.level {
                    NotificationLevel::Error => "error",
                    NotificationLevel::Warning => "warning",
                    NotificationLevel::Success => "ok",
                    NotificationLevel::Info => "info",
                };
                match note.title {
                    Some(title) => println!("{prefix}: {title}: {}", note.message),
                    None => println!("{prefix}: {}", note.message),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_sent_as_a_message() {
        match parse_input("hello there") {
            Ok(Input::Say(text)) => assert_eq!(text, "hello there"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn slash_commands_parse_ids() {
        assert!(matches!(
            parse_input("/open 7"),
            Ok(Input::Engine(EngineCommand::Select { conversation_id: 7 }))
        ));
        assert!(matches!(
            parse_input("/with 3 9"),
            Ok(Input::Engine(EngineCommand::OpenWith {
                project_id: 3,
                freelancer_id: 9
            }))
        ));
        assert!(matches!(parse_input("/quit"), Ok(Input::Quit)));
        assert!(parse_input("/open x").is_err());
        assert!(parse_input("/nope").is_err());
    }

    #[test]
    fn cli_requires_project_and_freelancer_together() {
        assert!(Args::try_parse_from(["gigchat", "--project", "3"]).is_err());
        let args = Args::try_parse_from(["gigchat", "--project", "3", "--freelancer", "9"])
            .expect("valid args");
        assert_eq!(args.project, Some(3));
    }

    #[test]
    fn register_requires_a_name() {
        assert!(Args::try_parse_from(["gigchat", "--register", "client"]).is_err());
        let args = Args::try_parse_from(["gigchat", "--register", "freelancer", "--name", "Bo"])
            .expect("valid args");
        assert!(matches!(args.register, Some(AccountRole::Freelancer)));
        assert_eq!(Role::from(AccountRole::Client), Role::Client);
    }

    fn line(key: MessageKey, content: &str) -> DisplayMessage {
        DisplayMessage {
            key,
            conversation_id: 7,
            sender_id: 1,
            content: content.into(),
            kind: Default::default(),
            created_at: chrono::Utc::now(),
            read_at: None,
        }
    }

    #[test]
    fn confirmed_copy_of_printed_placeholder_is_not_reprinted() {
        let mut transcript = Transcript::default();
        assert!(transcript.open(Some(7)));

        let first = [line(MessageKey::Pending(100), "hi")];
        assert_eq!(transcript.fresh(&first).len(), 1);

        let second = [line(MessageKey::Confirmed(5), "hi")];
        assert!(transcript.fresh(&second).is_empty());

        let third = [line(MessageKey::Confirmed(5), "hi"), line(MessageKey::Confirmed(6), "hi")];
        assert_eq!(transcript.fresh(&third).len(), 1);
    }

    #[test]
    fn refreshed_selection_keeps_transcript() {
        let mut transcript = Transcript::default();
        transcript.open(Some(7));
        transcript.fresh(&[line(MessageKey::Confirmed(5), "hi")]);
        assert!(!transcript.open(Some(7)));
        assert!(transcript.fresh(&[line(MessageKey::Confirmed(5), "hi")]).is_empty());
        assert!(transcript.open(Some(8)));
    }

    #[test]
    fn failed_send_does_not_swallow_later_message() {
        let mut transcript = Transcript::default();
        transcript.open(Some(7));
        transcript.fresh(&[line(MessageKey::Pending(100), "hi")]);
        transcript.forget(1, "hi");
        assert_eq!(transcript.fresh(&[line(MessageKey::Confirmed(9), "hi")]).len(), 1);
    }
}
