use std::io;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::Session;
use crate::coordinator::Coordinator;
use crate::workspace::{TEMP_DIR, Workspace};

/// Commands understood by the session loop.
pub const HELP_TEXT: &str = "\
Commands:
  /history   show the session transcript
  /files     list workspace files
  /help      show this help
  exit, quit leave the session

Anything else is sent to the coordinator.";

/// What the loop should do with one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Blank input; nothing to print.
    Ignore,
    /// End the session.
    Exit,
    /// Print this text.
    Reply(String),
}

/// Drives one session: reads lines, runs turns, prints replies.
#[derive(Debug)]
pub struct SessionRuntime {
    coordinator: Coordinator,
    session: Session,
    workspace: Arc<Workspace>,
    clear_temp_on_exit: bool,
    prompt: Option<String>,
}

impl SessionRuntime {
    /// A runtime for a fresh session.
    pub fn new(coordinator: Coordinator, workspace: Arc<Workspace>) -> Self {
        Self {
            coordinator,
            session: Session::new(),
            workspace,
            clear_temp_on_exit: false,
            prompt: None,
        }
    }

    /// Empty `tmp/` when the session ends.
    pub fn with_clear_temp_on_exit(mut self, clear: bool) -> Self {
        self.clear_temp_on_exit = clear;
        self
    }

    /// Write `prompt` before reading each line.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// The session record.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The coordinator.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Handle one input line.
    pub async fn handle_line(&mut self, line: &str) -> LineAction {
        let input = line.trim();
        if input.is_empty() {
            return LineAction::Ignore;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            return LineAction::Exit;
        }
        match input {
            "/help" => return LineAction::Reply(HELP_TEXT.to_string()),
            "/history" => {
                let transcript = self.session.transcript();
                return LineAction::Reply(if transcript.is_empty() {
                    "No turns yet.".to_string()
                } else {
                    transcript.trim_end().to_string()
                });
            }
            "/files" => return LineAction::Reply(self.files().await),
            _ => {}
        }

        let started_at = Utc::now();
        let turn = self.session.turns().len() + 1;
        tracing::info!(session = %self.session.id(), turn, "turn started");
        let outcome = self.coordinator.handle_turn(input).await;
        tracing::info!(
            session = %self.session.id(),
            turn,
            delegations = outcome.delegations.len(),
            "turn finished"
        );
        let reply = outcome.reply.clone();
        self.session.record(started_at, input, outcome);
        LineAction::Reply(reply)
    }

    async fn files(&self) -> String {
        match self.workspace.list_all().await {
            Ok(grouped) if grouped.is_empty() => "The workspace is empty.".to_string(),
            Ok(grouped) => {
                let mut out = String::new();
                for (folder, files) in grouped {
                    out.push_str(&format!("{folder}/\n"));
                    for file in files {
                        out.push_str(&format!("  {file}\n"));
                    }
                }
                out.trim_end().to_string()
            }
            Err(e) => format!("Could not list files: {e}"),
        }
    }

    /// Read lines from `reader` until `exit`, `quit` or end of input,
    /// writing replies to `writer`.
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(session = %self.session.id(), "session started");
        let mut lines = reader.lines();
        loop {
            if let Some(prompt) = &self.prompt {
                writer.write_all(prompt.as_bytes()).await?;
                writer.flush().await?;
            }
            let Some(line) = lines.next_line().await? else {
                break;
            };
            match self.handle_line(&line).await {
                LineAction::Ignore => continue,
                LineAction::Exit => break,
                LineAction::Reply(text) => {
                    writer.write_all(text.as_bytes()).await?;
                    writer.write_all(b"\n\n").await?;
                    writer.flush().await?;
                }
            }
        }
        self.finish().await;
        Ok(())
    }

    /// End-of-session housekeeping.
    pub async fn finish(&mut self) {
        if self.clear_temp_on_exit {
            match self.workspace.clear_dir(TEMP_DIR).await {
                Ok(removed) => tracing::info!(removed, "cleared temporary files"),
                Err(e) => tracing::warn!(error = %e, "failed to clear temporary files"),
            }
        }
        let metadata = self.session.metadata();
        tracing::info!(
            session = %metadata.id,
            turns = metadata.turn_count,
            delegations = metadata.delegation_count,
            tool_calls = metadata.tool_call_count,
            tool_errors = metadata.tool_error_count,
            "session ended"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::backend::{Reply, ScriptedBackend};
    use crate::workspace::workspace_policy;

    fn runtime(replies: Vec<Reply>) -> (TempDir, Arc<ScriptedBackend>, SessionRuntime) {
        let dir = TempDir::new().unwrap();
        let workspace =
            Arc::new(Workspace::open(dir.path(), workspace_policy::<&str>(&[])).unwrap());
        let backend = Arc::new(ScriptedBackend::new(replies));
        let coordinator = Coordinator::new("m", backend.clone(), vec![]);
        (dir, backend, SessionRuntime::new(coordinator, workspace))
    }

    #[tokio::test]
    async fn test_commands_and_blank_lines() {
        let (_dir, backend, mut rt) = runtime(vec![]);
        assert_eq!(rt.handle_line("   ").await, LineAction::Ignore);
        assert_eq!(rt.handle_line("QUIT").await, LineAction::Exit);
        assert_eq!(rt.handle_line("Exit").await, LineAction::Exit);
        assert_eq!(
            rt.handle_line("/help").await,
            LineAction::Reply(HELP_TEXT.to_string())
        );
        assert_eq!(
            rt.handle_line("/history").await,
            LineAction::Reply("No turns yet.".to_string())
        );
        assert!(backend.requests().is_empty());
        assert!(rt.session().turns().is_empty());
    }

    #[tokio::test]
    async fn test_run_until_exit() {
        let (dir, _backend, rt) = runtime(vec![
            Reply::Text("first answer".into()),
            Reply::Text("second answer".into()),
        ]);
        std::fs::write(dir.path().join("tmp/scratch.txt"), "x").unwrap();
        std::fs::write(dir.path().join("outputs/keep.cif"), "x").unwrap();
        let mut rt = rt.with_clear_temp_on_exit(true).with_prompt("> ");

        let input: &[u8] = b"hello\n\n/files\nagain\nexit\nnever read\n";
        let mut output = Vec::new();
        rt.run(input, &mut output).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("first answer"));
        assert!(output.contains("outputs/\n  keep.cif"));
        assert!(output.contains("second answer"));
        assert_eq!(rt.session().turns().len(), 2);
        assert!(!dir.path().join("tmp/scratch.txt").exists());
        assert!(dir.path().join("outputs/keep.cif").exists());
    }

    #[tokio::test]
    async fn test_eof_ends_session() {
        let (_dir, _backend, mut rt) = runtime(vec![Reply::Text("ok".into())]);
        let input: &[u8] = b"one question";
        let mut output = Vec::new();
        rt.run(input, &mut output).await.unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "ok\n\n");
        assert!(rt.session().transcript().contains("U> one question"));
    }
}
