use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};

use guru_llm::CatalogStatus;
use guru_session::{ReplyStatus, SessionController, SessionError};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::settings::SettingsStore;

const HELP: &str = "\
Commands:
  /new           start a new conversation
  /list          list conversations
  /switch N      make conversation N active
  /delete N      delete conversation N
  /attach PATH   ground the conversation in a PDF or text file
  /detach        drop the attached document
  /models        refresh and list available models
  /model ID      select a model and remember it as the default
  /help          show this help
  /quit          exit
Anything else is sent to the model. Press Ctrl-C to stop a reply.";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReplError {
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type ReplResult<T> = Result<T, ReplError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    New,
    List,
    Switch(usize),
    Delete(usize),
    Attach(PathBuf),
    Detach,
    Models,
    Model(String),
    Help,
    Quit,
    Send(String),
    Invalid(String),
}

// Trimming only classifies the line; a message is sent exactly as typed.
fn parse_command(raw: &str) -> Option<Command> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(raw.to_string()));
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };

    let command = match (name, argument) {
        ("new", "") => Command::New,
        ("list", "") => Command::List,
        ("detach", "") => Command::Detach,
        ("models", "") => Command::Models,
        ("help", "") => Command::Help,
        ("quit" | "exit", "") => Command::Quit,
        ("switch", index) => match parse_index(index) {
            Some(index) => Command::Switch(index),
            None => Command::Invalid(format!(
                "/switch expects a conversation number, got '{index}'"
            )),
        },
        ("delete", index) => match parse_index(index) {
            Some(index) => Command::Delete(index),
            None => Command::Invalid(format!(
                "/delete expects a conversation number, got '{index}'"
            )),
        },
        ("attach", path) if !path.is_empty() => Command::Attach(PathBuf::from(path)),
        ("model", id) if !id.is_empty() => Command::Model(id.to_string()),
        _ => Command::Invalid(format!("unknown command '{line}', try /help")),
    };
    Some(command)
}

// Conversations are numbered from 1 on screen.
fn parse_index(raw: &str) -> Option<usize> {
    raw.parse::<usize>().ok()?.checked_sub(1)
}

/// Line-oriented front end over one [`SessionController`].
pub struct Repl {
    controller: SessionController,
    settings: SettingsStore,
    endpoint: String,
}

impl Repl {
    pub fn new(
        controller: SessionController,
        settings: SettingsStore,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            settings,
            endpoint: endpoint.into(),
        }
    }

    pub async fn run(&mut self) -> ReplResult<()> {
        self.controller.refresh_models().await;
        self.print_banner()?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            emit("> ")?;
            let line = tokio::select! {
                line = lines.next_line() => line.context(ReadInputSnafu { stage: "read-line" })?,
                _ = tokio::signal::ctrl_c() => {
                    emit("\n")?;
                    break;
                }
            };

            let Some(line) = line else {
                break;
            };

            match parse_command(&line) {
                None => continue,
                Some(Command::Quit) => break,
                Some(command) => self.execute(command).await?,
            }
        }

        tracing::info!(
            anonymous_id = %self.controller.anonymous_id().short(),
            "session ended"
        );
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> ReplResult<()> {
        match command {
            Command::New => {
                self.controller.new_conversation();
                line("Started a new conversation.")
            }
            Command::List => self.print_conversations(),
            Command::Switch(index) => self.switch_to(index),
            Command::Delete(index) => self.delete(index),
            Command::Attach(path) => self.attach(&path),
            Command::Detach => match self.controller.unbind_document() {
                Some(document) => line(format!("Detached {}.", document.name)),
                None => line("No document is attached."),
            },
            Command::Models => {
                self.controller.refresh_models().await;
                self.print_models()
            }
            Command::Model(id) => self.select_model(&id).await,
            Command::Help => line(HELP),
            Command::Quit => Ok(()),
            Command::Send(text) => self.send(&text).await,
            Command::Invalid(message) => line(message),
        }
    }

    fn print_banner(&self) -> ReplResult<()> {
        let status = match self.controller.catalog().status() {
            CatalogStatus::Online => "online".to_string(),
            CatalogStatus::Offline { reason } => format!("offline ({reason})"),
        };
        line(format!(
            "guru · session {} · {} {}",
            self.controller.anonymous_id().short(),
            self.endpoint,
            status
        ))?;
        match self.controller.selected_model() {
            Some(model) => line(format!("Model: {model}. Type /help for commands.")),
            None => line("No model available yet. Type /models to retry, /help for commands."),
        }
    }

    fn print_conversations(&self) -> ReplResult<()> {
        let store = self.controller.store();
        let active = store.active_id();
        for (index, conversation) in store.conversations().iter().enumerate() {
            let marker = if conversation.id() == active { '*' } else { ' ' };
            line(format!(
                "{marker} {}. {} ({} messages)",
                index + 1,
                conversation.title(),
                conversation.messages().len()
            ))?;
        }
        Ok(())
    }

    fn print_models(&self) -> ReplResult<()> {
        let catalog = self.controller.catalog();
        if let CatalogStatus::Offline { reason } = catalog.status() {
            return line(format!("Model service is offline: {reason}"));
        }
        if catalog.is_empty() {
            return line("The model service has no models installed.");
        }

        let selected = self.controller.selected_model();
        for model in catalog.models() {
            let marker = if Some(model.id.as_str()) == selected { '*' } else { ' ' };
            line(format!("{marker} {}", model.id))?;
        }
        Ok(())
    }

    fn conversation_at(&self, index: usize) -> Option<guru_session::ConversationId> {
        self.controller
            .store()
            .conversations()
            .get(index)
            .map(|conversation| conversation.id())
    }

    fn switch_to(&mut self, index: usize) -> ReplResult<()> {
        let Some(id) = self.conversation_at(index) else {
            return line(format!("There is no conversation {}.", index + 1));
        };
        match self.controller.switch_conversation(id) {
            Ok(()) => {
                let conversation = self.controller.store().active();
                line(format!("Switched to \"{}\".", conversation.title()))?;
                for message in conversation.messages() {
                    line(format!("[{}] {}", message.role.as_str(), message.content))?;
                }
                Ok(())
            }
            Err(error) => line(error),
        }
    }

    fn delete(&mut self, index: usize) -> ReplResult<()> {
        let Some(id) = self.conversation_at(index) else {
            return line(format!("There is no conversation {}.", index + 1));
        };
        match self.controller.delete_conversation(id) {
            Ok(_) => line(format!(
                "Deleted. Active conversation: \"{}\".",
                self.controller.store().active().title()
            )),
            Err(error) => line(error),
        }
    }

    fn attach(&mut self, path: &Path) -> ReplResult<()> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "failed to read document");
                return line(format!("Could not read {}: {error}", path.display()));
            }
        };
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let binding = self.controller.bind_document(&bytes, name);
        if binding.extraction_failed {
            line(format!("Attached {}, but: {}", binding.name, binding.text))
        } else {
            line(format!(
                "Attached {} ({} characters).",
                binding.name,
                binding.text.chars().count()
            ))
        }
    }

    async fn select_model(&mut self, id: &str) -> ReplResult<()> {
        if !self.controller.catalog().contains(id) {
            self.controller.refresh_models().await;
        }
        if let Err(error) = self.controller.select_model(id) {
            return line(error);
        }

        let mut settings = (*self.settings.settings()).clone();
        settings.default_model = Some(id.to_string());
        if let Err(error) = self.settings.update(settings) {
            tracing::warn!(error = %error, "failed to persist default model");
            return line(format!("Using {id} for this session; could not save it: {error}"));
        }
        line(format!("Using {id}."))
    }

    async fn send(&mut self, text: &str) -> ReplResult<()> {
        // An unavailable model service is re-queried on the next attempt.
        if !self.controller.can_send() {
            self.controller.refresh_models().await;
        }

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });

        let mut stdout = std::io::stdout();
        let mut write_error = None;
        let result = self
            .controller
            .send_message(text, &cancel, |update| {
                if write_error.is_some() {
                    return;
                }
                let written = stdout
                    .write_all(update.fragment.as_bytes())
                    .and_then(|()| stdout.flush());
                if let Err(error) = written {
                    write_error = Some(error);
                }
            })
            .await;
        watcher.abort();

        if let Some(error) = write_error {
            return Err(error).context(WriteOutputSnafu {
                stage: "stream-reply",
            });
        }

        match result {
            Ok(outcome) => match outcome.status {
                ReplyStatus::Completed | ReplyStatus::Failed => emit("\n\n"),
                ReplyStatus::Cancelled => emit("\n[reply cancelled]\n\n"),
            },
            Err(SessionError::NoModelSelected { .. }) => {
                line("No model is available. Start the model service or pick one with /model ID.")
            }
            Err(error) => line(error),
        }
    }
}

fn emit(text: impl Display) -> ReplResult<()> {
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{text}")
        .and_then(|()| stdout.flush())
        .context(WriteOutputSnafu { stage: "emit" })
}

fn line(text: impl Display) -> ReplResult<()> {
    emit(format_args!("{text}\n"))
}
