//! Interactive terminal front end.
//!
//! ## Responsibility
//! Parse one line of input into a [`Command`], run it against the shared
//! session, and render the tree and lineage with `colored`.
//!
//! ## NOT Responsible For
//! - Graph semantics (see [`crate::session`])
//! - Streaming (see [`crate::generation`])

use colored::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{FluxError, Result};
use crate::generation::generate;
use crate::id::NodeId;
use crate::lineage::get_children;
use crate::node::{Node, NodeRole};
use crate::prompt::prompt_from_lineage;
use crate::providers::OpenAiClient;
use crate::session::Session;
use crate::settings::SUPPORTED_MODELS;
use crate::store::{Autosaver, LocalStore, API_KEY_KEY};

/// Characters of a node id shown in the tree and accepted as a prefix.
const SHORT_ID_LEN: usize = 8;

pub const HELP: &str = "\
commands:
  user <text>        add a user message under the selection
  system <text>      add a system message under the selection
  gen                generate responses for the selection
  regen              regenerate, reusing existing responses
  cancel             stop every running generation
  edit <text>        replace the selected node's text
  rename <label>     set the selected node's label
  select <id>        select a node by id prefix
  up|down|left|right move the selection
  connect <a> <b>    link node a to node b
  disconnect <edge>  remove an edge by id
  del                delete the selection
  undo|redo          step through history
  tree [text]        start a new conversation tree
  clear              remove everything
  show               print the tree
  lineage            print the selected conversation
  prompt             print the selection as a transcript
  models             list available chat models
  key <api key>      store the API key
  save               save now
  help               this text
  quit               save and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    User(String),
    System(String),
    Generate,
    Regenerate,
    Cancel,
    Edit(String),
    Rename(String),
    Select(String),
    Up,
    Down,
    Left,
    Right,
    Connect(String, String),
    Disconnect(String),
    Delete,
    Undo,
    Redo,
    NewTree(Option<String>),
    Clear,
    Show,
    Lineage,
    Prompt,
    Models,
    Key(String),
    Save,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let needs_text = |cmd: fn(String) -> Command| {
            if rest.is_empty() {
                Err(format!("'{word}' needs an argument"))
            } else {
                Ok(cmd(rest.to_string()))
            }
        };

        match word.to_lowercase().as_str() {
            "user" | "u" => needs_text(Command::User),
            "system" | "sys" => needs_text(Command::System),
            "gen" | "g" => Ok(Command::Generate),
            "regen" => Ok(Command::Regenerate),
            "cancel" => Ok(Command::Cancel),
            "edit" => needs_text(Command::Edit),
            "rename" => needs_text(Command::Rename),
            "select" | "sel" => needs_text(Command::Select),
            "up" | "k" => Ok(Command::Up),
            "down" | "j" => Ok(Command::Down),
            "left" | "h" => Ok(Command::Left),
            "right" | "l" => Ok(Command::Right),
            "connect" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
                [source, target] => Ok(Command::Connect(source.to_string(), target.to_string())),
                _ => Err("usage: connect <source> <target>".to_string()),
            },
            "disconnect" => needs_text(Command::Disconnect),
            "del" | "delete" => Ok(Command::Delete),
            "undo" | "z" => Ok(Command::Undo),
            "redo" | "y" => Ok(Command::Redo),
            "tree" | "new" => Ok(Command::NewTree((!rest.is_empty()).then(|| rest.to_string()))),
            "clear" => Ok(Command::Clear),
            "show" | "ls" | "" => Ok(Command::Show),
            "lineage" => Ok(Command::Lineage),
            "prompt" => Ok(Command::Prompt),
            "models" => Ok(Command::Models),
            "key" => needs_text(Command::Key),
            "save" => Ok(Command::Save),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(format!("unknown command '{other}' (try 'help')")),
        }
    }

    /// Whether the command can change persisted state.
    pub fn mutates(&self) -> bool {
        !matches!(
            self,
            Command::Show
                | Command::Lineage
                | Command::Prompt
                | Command::Models
                | Command::Key(_)
                | Command::Save
                | Command::Help
                | Command::Quit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn short_id(id: &NodeId) -> &str {
    let s = id.as_str();
    s.get(..SHORT_ID_LEN).unwrap_or(s)
}

fn role_tag(role: NodeRole) -> ColoredString {
    match role {
        NodeRole::System => "sys".bright_black(),
        NodeRole::User => "usr".bright_blue(),
        NodeRole::Assistant => "ast".bright_green(),
        NodeRole::EditedAssistant => "ast*".green(),
    }
}

fn node_line(node: &Node, selected: bool) -> String {
    let marker = if selected { ">".bold().yellow() } else { " ".normal() };
    let streaming = if node.stream.is_some() { " ...".dimmed().to_string() } else { String::new() };
    let label = if selected { node.label.bold() } else { node.label.normal() };
    format!("{marker} [{}] {} {label}{streaming}", short_id(&node.id).dimmed(), role_tag(node.role))
}

/// Every tree, roots first, children indented under their parent.
pub fn render_tree(session: &Session) -> String {
    let nodes = session.nodes();
    let edges = session.edges();
    if nodes.is_empty() {
        return "(empty)".dimmed().to_string();
    }

    let targets: HashSet<&NodeId> = edges.iter().map(|e| &e.target).collect();
    let selected = session.selected_node_id();
    let mut seen: HashSet<&NodeId> = HashSet::new();
    let mut out = Vec::new();

    let mut stack: Vec<(&Node, usize)> = nodes
        .iter()
        .filter(|n| !targets.contains(&n.id))
        .rev()
        .map(|n| (n, 0))
        .collect();
    // Nodes only reachable through a cycle have no root; list them flat.
    let orphans = nodes.iter().filter(|n| targets.contains(&n.id)).map(|n| (n, 0));

    while let Some((node, depth)) = stack.pop() {
        if !seen.insert(&node.id) {
            continue;
        }
        out.push(format!("{}{}", "  ".repeat(depth), node_line(node, selected == Some(&node.id))));
        for child in get_children(nodes, edges, &node.id).into_iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    for (node, depth) in orphans {
        if seen.insert(&node.id) {
            out.push(format!("{}{}", "  ".repeat(depth), node_line(node, selected == Some(&node.id))));
        }
    }

    out.join("\n")
}

/// The selected conversation, oldest message first.
pub fn render_lineage(session: &Session) -> String {
    let lineage = session.selected_lineage();
    if lineage.is_empty() {
        return "(nothing selected)".dimmed().to_string();
    }
    lineage
        .iter()
        .rev()
        .map(|node| format!("{}\n{}", role_tag(node.role).bold(), node.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Resolve a full id or unique id prefix.
pub fn resolve_node_id(session: &Session, prefix: &str) -> std::result::Result<NodeId, String> {
    let matches: Vec<&Node> = session.nodes().iter().filter(|n| n.id.as_str().starts_with(prefix)).collect();
    match matches.as_slice() {
        [node] => Ok(node.id.clone()),
        [] => Err(format!("no node matches '{prefix}'")),
        _ => match matches.iter().find(|n| n.id.as_str() == prefix) {
            Some(exact) => Ok(exact.id.clone()),
            None => Err(format!("'{prefix}' matches {} nodes", matches.len())),
        },
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

pub struct Repl {
    session: Arc<Mutex<Session>>,
    store: LocalStore,
    autosaver: Arc<Autosaver>,
    api_base: String,
}

impl Repl {
    pub fn new(session: Arc<Mutex<Session>>, store: LocalStore, autosaver: Arc<Autosaver>, api_base: String) -> Self {
        Self { session, store, autosaver, api_base }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session>> {
        self.session
            .lock()
            .map_err(|_| FluxError::Config("internal: session lock poisoned".to_string()))
    }

    fn client(&self) -> Result<OpenAiClient> {
        let key = crate::config::resolve_api_key(&self.store)?;
        Ok(OpenAiClient::new(key, self.api_base.clone()))
    }

    fn say(&self, message: impl AsRef<str>) {
        println!("{}", message.as_ref());
    }

    fn warn(&self, message: impl AsRef<str>) {
        println!("{}", message.as_ref().yellow());
    }

    pub async fn execute(&mut self, command: Command) -> Result<Flow> {
        let mutates = command.mutates();

        match command {
            Command::User(text) => self.add_child(NodeRole::User, &text)?,
            Command::System(text) => self.add_child(NodeRole::System, &text)?,
            Command::Generate => self.spawn_generation(false)?,
            Command::Regenerate => self.spawn_generation(true)?,
            Command::Cancel => {
                let mut session = self.lock()?;
                let streaming: Vec<NodeId> =
                    session.nodes().iter().filter(|n| n.stream.is_some()).map(|n| n.id.clone()).collect();
                let canceled = streaming.iter().filter(|id| session.cancel_stream(id)).count();
                drop(session);
                self.say(format!("canceled {canceled} stream(s)"));
            }
            Command::Edit(text) => {
                let mut session = self.lock()?;
                let id = session.selected_node_id().cloned().ok_or(FluxError::NoSelection)?;
                session.edit_text(&id, &text);
            }
            Command::Rename(label) => {
                let mut session = self.lock()?;
                let id = session.selected_node_id().cloned().ok_or(FluxError::NoSelection)?;
                session.rename(&id, &label);
            }
            Command::Select(prefix) => {
                let mut session = self.lock()?;
                match resolve_node_id(&session, &prefix) {
                    Ok(id) => session.select_node(&id),
                    Err(message) => self.warn(message),
                }
            }
            Command::Up => self.navigate(Session::move_to_parent, "no parent")?,
            Command::Down => self.navigate(Session::move_to_child, "no children")?,
            Command::Left => self.navigate(Session::move_to_left_sibling, "no siblings")?,
            Command::Right => self.navigate(Session::move_to_right_sibling, "no siblings")?,
            Command::Connect(source, target) => {
                let mut session = self.lock()?;
                let ids = resolve_node_id(&session, &source).and_then(|s| Ok((s, resolve_node_id(&session, &target)?)));
                match ids {
                    Ok((source, target)) => {
                        if !session.connect(&source, &target) {
                            self.warn("connection rejected: it would give a node two parents or form a cycle");
                        }
                    }
                    Err(message) => self.warn(message),
                }
            }
            Command::Disconnect(edge_id) => {
                if !self.lock()?.disconnect(&edge_id) {
                    self.warn(format!("no edge '{edge_id}'"));
                }
            }
            Command::Delete => self.lock()?.delete_selected(),
            Command::Undo => {
                if !self.lock()?.undo() {
                    self.warn("nothing to undo");
                }
            }
            Command::Redo => {
                if !self.lock()?.redo() {
                    self.warn("nothing to redo");
                }
            }
            Command::NewTree(text) => {
                self.lock()?.new_tree(text.as_deref());
            }
            Command::Clear => self.lock()?.clear(),
            Command::Show => {}
            Command::Lineage => {
                let rendered = render_lineage(&*self.lock()?);
                self.say(rendered);
                return Ok(Flow::Continue);
            }
            Command::Prompt => {
                let session = self.lock()?;
                let prompt = prompt_from_lineage(&session.selected_lineage(), session.settings(), true, false);
                drop(session);
                self.say(prompt.trim_start());
                return Ok(Flow::Continue);
            }
            Command::Models => {
                let listed = match self.client() {
                    Ok(client) => client.list_chat_models().await,
                    Err(e) => Err(e),
                };
                let (models, notice) = models_or_known(listed);
                if let Some(notice) = notice {
                    self.warn(notice);
                }
                self.say(models.join("\n"));
                return Ok(Flow::Continue);
            }
            Command::Key(key) => {
                self.store.write(API_KEY_KEY, key.trim())?;
                self.say("API key saved");
                return Ok(Flow::Continue);
            }
            Command::Save => {
                self.autosaver.flush()?;
                self.say("saved");
                return Ok(Flow::Continue);
            }
            Command::Help => {
                self.say(HELP);
                return Ok(Flow::Continue);
            }
            Command::Quit => {
                self.autosaver.shutdown()?;
                return Ok(Flow::Quit);
            }
        }

        if mutates {
            self.autosaver.notify();
        }
        let rendered = render_tree(&*self.lock()?);
        self.say(rendered);
        Ok(Flow::Continue)
    }

    fn navigate(&self, step: fn(&mut Session) -> bool, failure: &str) -> Result<()> {
        if !step(&mut *self.lock()?) {
            self.warn(failure);
        }
        Ok(())
    }

    fn add_child(&self, role: NodeRole, text: &str) -> Result<()> {
        let mut session = self.lock()?;
        if session.new_connected_to_selected(role, text).is_none() {
            session.new_tree(Some(text));
        }
        Ok(())
    }

    fn spawn_generation(&self, override_existing: bool) -> Result<()> {
        // Resolve the key first so a missing key leaves no empty targets.
        let client = self.client()?;
        let plan = self.lock()?.begin_generation(override_existing)?;

        let session = self.session.clone();
        let autosaver = self.autosaver.clone();
        tokio::spawn(async move {
            match generate(&client, session, plan).await {
                Ok(report) => {
                    if let Some(notice) = report.user_notice() {
                        println!("{}", format!("response error: {notice}").red());
                    }
                }
                Err(e) => println!("{}", format!("generation failed: {e}").red()),
            }
            autosaver.notify();
        });
        Ok(())
    }
}

/// Listed models, or the built-in list with a notice when listing failed.
fn models_or_known(listed: Result<Vec<String>>) -> (Vec<String>, Option<String>) {
    match listed {
        Ok(models) if !models.is_empty() => (models, None),
        Ok(_) => (known_models(), None),
        Err(e) => {
            tracing::warn!(error = %e, "model listing failed");
            (known_models(), Some(format!("could not list models ({e}); showing built-in list")))
        }
    }
}

fn known_models() -> Vec<String> {
    SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use rstest::rstest;

    #[rstest]
    #[case("gen", Command::Generate)]
    #[case("  REGEN ", Command::Regenerate)]
    #[case("up", Command::Up)]
    #[case("j", Command::Down)]
    #[case("", Command::Show)]
    #[case("q", Command::Quit)]
    #[case("tree", Command::NewTree(None))]
    #[case("tree Hello there", Command::NewTree(Some("Hello there".into())))]
    #[case("user  What is Rust? ", Command::User("What is Rust?".into()))]
    #[case("connect ab cd", Command::Connect("ab".into(), "cd".into()))]
    fn test_parse(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(Command::parse(line), Ok(expected));
    }

    #[rstest]
    #[case("user")]
    #[case("connect ab")]
    #[case("frobnicate")]
    fn test_parse_rejects(#[case] line: &str) {
        assert!(Command::parse(line).is_err());
    }

    #[test]
    fn test_mutates() {
        assert!(Command::Generate.mutates());
        assert!(Command::Up.mutates());
        assert!(!Command::Show.mutates());
        assert!(!Command::Key("k".into()).mutates());
    }

    fn session() -> Session {
        Session::new(Settings { default_preamble: "PRE".into(), ..Settings::default() }, 16)
    }

    #[test]
    fn test_render_tree_marks_selection() {
        colored::control::set_override(false);
        let mut s = session();
        s.new_tree(Some("Hi"));
        let rendered = render_tree(&s);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  ["));
        assert!(lines[1].starts_with("  > ["));
        assert!(lines[1].ends_with("usr Hi"));
    }

    #[test]
    fn test_render_empty() {
        colored::control::set_override(false);
        assert_eq!(render_tree(&session()), "(empty)");
    }

    #[test]
    fn test_render_lineage_oldest_first() {
        colored::control::set_override(false);
        let mut s = session();
        s.new_tree(Some("Hi"));
        assert_eq!(render_lineage(&s), "sys\nPRE\n\nusr\nHi");
    }

    #[test]
    fn test_models_fall_back_to_known_list() {
        let (models, notice) = models_or_known(Err(FluxError::MissingApiKey));
        assert_eq!(models, vec!["gpt-3.5-turbo", "gpt-4"]);
        assert!(notice.is_some());

        let (models, notice) = models_or_known(Ok(vec!["gpt-4o".into()]));
        assert_eq!(models, vec!["gpt-4o"]);
        assert_eq!(notice, None);

        assert_eq!(models_or_known(Ok(Vec::new())).0.len(), SUPPORTED_MODELS.len());
    }

    #[test]
    fn test_resolve_prefix() {
        let mut s = session();
        let user = s.new_tree(None);
        assert_eq!(resolve_node_id(&s, user.as_str()), Ok(user.clone()));
        assert_eq!(resolve_node_id(&s, &user.as_str()[..12]), Ok(user));
        assert!(resolve_node_id(&s, "zzzz-not-an-id").is_err());
    }
}
