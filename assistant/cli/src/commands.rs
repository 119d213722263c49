//! Input line parsing and dispatch

use assistant_core::{ChatSession, StreamState, Transport};
use tracing::{info, warn};

/// One line of operator input
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// Send to the assistant
    Say(&'a str),
    /// Forget the conversation
    Clear,
    /// Pin files
    Add(Vec<&'a str>),
    /// Detach a file
    Remove(&'a str),
    /// List attached files
    Files,
    /// Print the conversation
    History,
    /// Leave
    Quit,
    /// Slash command that needs an argument it did not get
    MissingArgument(&'static str),
    /// Unrecognised slash command
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// Parse a trimmed, non-empty line
    pub fn parse(line: &'a str) -> Self {
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Say(line);
        };

        let (name, args) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(n, a)| (n, a.trim()));

        match name {
            "clear" => Self::Clear,
            "files" => Self::Files,
            "history" => Self::History,
            "quit" | "exit" => Self::Quit,
            "add" if args.is_empty() => Self::MissingArgument("/add <path>..."),
            "add" => Self::Add(args.split_whitespace().collect()),
            "remove" if args.is_empty() => Self::MissingArgument("/remove <path>"),
            "remove" => Self::Remove(args),
            _ => Self::Unknown(name),
        }
    }
}

/// Help text for the slash commands
pub const HELP: &str = "\
/add <path>...   attach files to the context
/remove <path>   detach a file
/files           list attached files
/history         print the conversation
/clear           forget the conversation and unpin files
/quit            leave (Ctrl-C while idle does the same)";

/// Whether the input loop keeps going
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line
    Continue,
    /// Leave the loop
    Quit,
}

/// Run one command against the session
///
/// State that fails to save is logged; the session stays usable.
pub async fn dispatch<T: Transport>(session: &mut ChatSession<T>, command: Command<'_>) -> Flow {
    match command {
        Command::Say(text) => match session.submit(text).await {
            Ok(StreamState::Cancelled) => eprintln!("[cancelled]"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to save chat state"),
        },
        Command::Clear => {
            if let Err(e) = session.clear_history().await {
                warn!(error = %e, "Failed to save chat state");
            }
        }
        Command::Add(paths) => match session.add_files(&paths).await {
            Ok(added) => info!(added, "Files attached"),
            Err(e) => warn!(error = %e, "Failed to save chat state"),
        },
        Command::Remove(path) => match session.remove_file(path).await {
            Ok(true) => {}
            Ok(false) => eprintln!("{path} is not in context"),
            Err(e) => warn!(error = %e, "Failed to save chat state"),
        },
        Command::Files => {
            let files = session.files().files_to_show();
            if files.is_empty() {
                eprintln!("No files in context");
            }
            for file in files {
                eprintln!("  {file}");
            }
        }
        Command::History => session.emit_history(),
        Command::Quit => return Flow::Quit,
        Command::MissingArgument(usage) => eprintln!("usage: {usage}"),
        Command::Unknown(name) => eprintln!("unknown command /{name}\n{HELP}"),
    }
    Flow::Continue
}
