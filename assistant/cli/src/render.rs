//! Terminal rendering of sink messages
//!
//! Answer text goes to stdout so it can be piped; reasoning, notifications
//! and file lists go to stderr.

use std::io::{self, Write};

use assistant_core::{MessageRole, NotifyLevel, SinkMessage};

/// Writes sink messages to a pair of streams
pub struct Renderer<O: Write, E: Write> {
    out: O,
    err: E,
    answer_open: bool,
    reasoning_open: bool,
}

impl<O: Write, E: Write> Renderer<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            answer_open: false,
            reasoning_open: false,
        }
    }

    pub fn handle(&mut self, message: &SinkMessage) -> io::Result<()> {
        match message {
            SinkMessage::StartLoading => {
                write!(self.err, "…")?;
                self.err.flush()?;
                self.reasoning_open = true;
            }
            SinkMessage::EndLoading => {}
            SinkMessage::StreamDelta {
                content,
                reasoning,
                is_final,
            } => {
                if !reasoning.is_empty() {
                    write!(self.err, "{reasoning}")?;
                    self.err.flush()?;
                }
                if !content.is_empty() {
                    if self.reasoning_open {
                        writeln!(self.err)?;
                        self.reasoning_open = false;
                    }
                    write!(self.out, "{content}")?;
                    self.out.flush()?;
                    self.answer_open = true;
                }
                if *is_final {
                    self.close_lines()?;
                }
            }
            SinkMessage::Cleared => {
                self.close_lines()?;
                writeln!(self.err, "History cleared")?;
            }
            SinkMessage::Notify { level, message } => {
                self.close_lines()?;
                let label = match level {
                    NotifyLevel::Info => "info",
                    NotifyLevel::Warning => "warning",
                    NotifyLevel::Error => "error",
                };
                writeln!(self.err, "{label}: {message}")?;
            }
            SinkMessage::FilesUpdated { files } => {
                if files.is_empty() {
                    writeln!(self.err, "No files in context")?;
                } else {
                    writeln!(self.err, "Files in context:")?;
                    for file in files {
                        writeln!(self.err, "  {file}")?;
                    }
                }
            }
            SinkMessage::History { history } => {
                for entry in history {
                    let who = match entry.role {
                        MessageRole::User => "you",
                        MessageRole::Assistant => "assistant",
                        MessageRole::System => continue,
                    };
                    writeln!(self.out, "{who}: {}", entry.content)?;
                }
                self.out.flush()?;
            }
        }
        Ok(())
    }

    fn close_lines(&mut self) -> io::Result<()> {
        if self.reasoning_open {
            writeln!(self.err)?;
            self.reasoning_open = false;
        }
        if self.answer_open {
            writeln!(self.out)?;
            self.out.flush()?;
            self.answer_open = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assistant_core::ChatMessage;

    fn render(messages: &[SinkMessage]) -> (String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        {
            let mut renderer = Renderer::new(&mut out, &mut err);
            for message in messages {
                renderer.handle(message).unwrap();
            }
        }
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_answer_on_stdout_reasoning_on_stderr() {
        let (out, err) = render(&[
            SinkMessage::StartLoading,
            SinkMessage::delta("", "thinking"),
            SinkMessage::delta("Hel", ""),
            SinkMessage::delta("lo", ""),
            SinkMessage::EndLoading,
            SinkMessage::final_delta(),
        ]);

        assert_eq!(out, "Hello\n");
        assert_eq!(err, "…thinking\n");
    }

    #[test]
    fn test_error_closes_open_answer() {
        let (out, err) = render(&[
            SinkMessage::delta("partial", ""),
            SinkMessage::EndLoading,
            SinkMessage::error("DeepSeek API Error: reset"),
        ]);

        assert_eq!(out, "partial\n");
        assert_eq!(err, "error: DeepSeek API Error: reset\n");
    }

    #[test]
    fn test_history_skips_system() {
        let (out, _) = render(&[SinkMessage::History {
            history: vec![
                ChatMessage::system("hidden"),
                ChatMessage::user("q"),
                ChatMessage::assistant("a"),
            ],
        }]);

        assert_eq!(out, "you: q\nassistant: a\n");
    }
}
