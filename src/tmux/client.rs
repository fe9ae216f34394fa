use super::control::{CommandChannel, ControlConfig};
use super::patterns::Tool;
use super::protocol::quote_argument;
use super::{TmuxPane, TmuxSession};
use crate::Result;

/// Sessions whose name starts with this belong to our own control clients.
const CONTROL_SESSION_PREFIX: &str = "_panewatch";

const SESSION_FORMAT: &str =
    "#{session_id}|#{session_created}|#{session_attached}|#{session_name}";
const PANE_FORMAT: &str =
    "#{pane_id}|#{window_index}|#{pane_dead}|#{pane_current_command}|#{session_name}";

/// High-level tmux operations over a command channel
pub struct TmuxClient<C> {
    channel: C,
    /// Path to tmux binary, for commands run outside the channel
    tmux_path: String,
    socket_name: Option<String>,
}

impl<C: CommandChannel> TmuxClient<C> {
    pub fn new(channel: C, config: &ControlConfig) -> Self {
        Self {
            channel,
            tmux_path: config.tmux_path.clone(),
            socket_name: config.socket_name.clone(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// List all tmux sessions, hiding control-client sessions
    pub async fn list_sessions(&self) -> Result<Vec<TmuxSession>> {
        let command = format!("list-sessions -F {}", quote_argument(SESSION_FORMAT));
        let output = self.channel.send(&command).await?;
        Ok(output
            .lines()
            .filter_map(parse_session_line)
            .filter(|s| !s.name.starts_with(CONTROL_SESSION_PREFIX))
            .collect())
    }

    /// List every pane on the server with the tool it appears to run
    pub async fn list_panes(&self) -> Result<Vec<TmuxPane>> {
        let command = format!("list-panes -a -F {}", quote_argument(PANE_FORMAT));
        let output = self.channel.send(&command).await?;
        Ok(output
            .lines()
            .filter_map(parse_pane_line)
            .filter(|p| !p.session.starts_with(CONTROL_SESSION_PREFIX))
            .collect())
    }

    /// Kill a session
    pub async fn kill_session(&self, session: &str) -> Result<()> {
        self.channel
            .send(&format!("kill-session -t {}", quote_argument(session)))
            .await
            .map(|_| ())
    }

    /// Get the command to attach to a session (for external execution)
    pub fn attach_command(&self, target: &str) -> Vec<String> {
        attach_command(&self.tmux_path, self.socket_name.as_deref(), target)
    }
}

/// `tmux [-L socket] attach-session -t <target>` as an argv.
pub fn attach_command(tmux_path: &str, socket_name: Option<&str>, target: &str) -> Vec<String> {
    let mut cmd = vec![tmux_path.to_string()];
    if let Some(socket) = socket_name {
        cmd.push("-L".to_string());
        cmd.push(socket.to_string());
    }
    cmd.extend(["attach-session".to_string(), "-t".to_string(), target.to_string()]);
    cmd
}

fn parse_session_line(line: &str) -> Option<TmuxSession> {
    let parts: Vec<&str> = line.splitn(4, '|').collect();
    if parts.len() < 4 {
        return None;
    }

    Some(TmuxSession {
        id: parts[0].to_string(),
        created_at: parts[1].parse().unwrap_or(0),
        attached_clients: parts[2].parse().unwrap_or(0),
        name: parts[3].to_string(),
    })
}

fn parse_pane_line(line: &str) -> Option<TmuxPane> {
    let parts: Vec<&str> = line.splitn(5, '|').collect();
    if parts.len() < 5 || !parts[0].starts_with('%') {
        return None;
    }

    let current_command = parts[3].to_string();
    Some(TmuxPane {
        id: parts[0].to_string(),
        window: parts[1].parse().unwrap_or(0),
        dead: parts[2] == "1",
        tool: Tool::detect(&current_command),
        current_command,
        session: parts[4].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PanewatchError;
    use crate::tmux::testing::ScriptedChannel;

    fn client(responses: Vec<Result<String>>) -> TmuxClient<ScriptedChannel> {
        TmuxClient::new(ScriptedChannel::with(responses), &ControlConfig::default())
    }

    #[tokio::test]
    async fn test_list_sessions_hides_control_sessions() {
        let client = client(vec![Ok(
            "$0|1700000000|1|work\n$1|1700000100|0|_panewatch_4242\n$2|1700000200|0|a|b".to_string(),
        )]);
        let sessions = client.list_sessions().await.unwrap();
        let names: Vec<&str> = sessions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["work", "a|b"]);
        assert_eq!(sessions[0].id, "$0");
        assert_eq!(sessions[0].created_at, 1700000000);
        assert_eq!(sessions[0].attached_clients, 1);
        assert!(client.channel().commands()[0].starts_with("list-sessions -F '#{session_id}"));
    }

    #[tokio::test]
    async fn test_list_panes_detects_tools() {
        let listing = "%0|0|0|claude|work\n%1|1|0|zsh|work\n%2|0|1|node|scratch\n\ngarbage";
        let client = client(vec![Ok(listing.to_string())]);
        let panes = client.list_panes().await.unwrap();
        assert_eq!(panes.len(), 3);
        assert_eq!(panes[0].tool, Tool::Claude);
        assert_eq!(panes[1].tool, Tool::Shell);
        assert_eq!(panes[1].window, 1);
        assert!(panes[2].dead);
        assert_eq!(panes[2].session, "scratch");
    }

    #[tokio::test]
    async fn test_kill_session_quotes_target() {
        let client = client(vec![Ok(String::new())]);
        client.kill_session("it's mine").await.unwrap();
        assert_eq!(client.channel().commands(), vec!["kill-session -t 'it'\\''s mine'"]);
    }

    #[tokio::test]
    async fn test_command_errors_propagate() {
        let client = client(vec![Err(PanewatchError::Command("can't find session: x".into()))]);
        assert!(matches!(
            client.kill_session("x").await,
            Err(PanewatchError::Command(_))
        ));
    }

    #[test]
    fn test_attach_command() {
        let config = ControlConfig {
            socket_name: Some("agents".to_string()),
            ..ControlConfig::default()
        };
        let client = TmuxClient::new(ScriptedChannel::default(), &config);
        assert_eq!(
            client.attach_command("work:1"),
            vec!["tmux", "-L", "agents", "attach-session", "-t", "work:1"]
        );
    }
}
