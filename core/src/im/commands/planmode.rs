//! `/planmode` command backend: `on` / `auto` / `off` / `show` / `clear` subcommands
//! over the per-chat engine override store. Grounded on the Python original's
//! `telegram/commands/planmode.py` (`PERMISSION_MODES` mapping).

use crate::persistence::overrides::{ChatPrefs, ChatPrefsStore};

/// Permission-mode values the CLI accepts, in the order `/planmode` cycles them.
pub const PERMISSION_MODES: &[&str] = &["plan", "auto", "acceptEdits", "bypassPermissions"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanModeReply {
    Set { mode: String },
    Cleared,
    Current { mode: Option<String> },
    UnknownSubcommand { raw: String },
}

/// `args` is the text after `/planmode`, e.g. "on", "auto", "show".
pub fn handle(store: &ChatPrefsStore, chat_id: &str, args: &str) -> PlanModeReply {
    let arg = args.trim().to_lowercase();
    match arg.as_str() {
        "" | "show" => {
            let prefs = store.get(chat_id);
            PlanModeReply::Current { mode: prefs.permission_mode }
        }
        "off" | "clear" => {
            let mut prefs = store.get(chat_id);
            prefs.permission_mode = None;
            let _ = store.set(chat_id, prefs);
            PlanModeReply::Cleared
        }
        "on" => set_mode(store, chat_id, "plan"),
        "auto" => set_mode(store, chat_id, "auto"),
        other if PERMISSION_MODES.contains(&other) => set_mode(store, chat_id, other),
        other => PlanModeReply::UnknownSubcommand { raw: other.to_string() },
    }
}

fn set_mode(store: &ChatPrefsStore, chat_id: &str, mode: &str) -> PlanModeReply {
    let mut prefs = store.get(chat_id);
    prefs.permission_mode = Some(mode.to_string());
    let _ = store.set(chat_id, prefs);
    PlanModeReply::Set { mode: mode.to_string() }
}

pub fn render_reply(reply: &PlanModeReply) -> String {
    match reply {
        PlanModeReply::Set { mode } => format!("Permission mode set to `{}`.", mode),
        PlanModeReply::Cleared => "Permission mode override cleared.".to_string(),
        PlanModeReply::Current { mode: Some(mode) } => format!("Current permission mode: `{}`.", mode),
        PlanModeReply::Current { mode: None } => "No permission mode override set (using engine default).".to_string(),
        PlanModeReply::UnknownSubcommand { raw } => {
            format!("Unknown /planmode option `{}`. Try: on, auto, off, show.", raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ChatPrefsStore {
        let dir = std::env::temp_dir().join(format!("planmode-test-{}", std::process::id()));
        ChatPrefsStore::new(dir.join("prefs.json"))
    }

    #[test]
    fn on_sets_plan_mode() {
        let store = store();
        let reply = handle(&store, "chat-1", "on");
        assert_eq!(reply, PlanModeReply::Set { mode: "plan".to_string() });
    }

    #[test]
    fn show_with_no_override_reports_none() {
        let store = store();
        let reply = handle(&store, "chat-new", "show");
        assert_eq!(reply, PlanModeReply::Current { mode: None });
    }

    #[test]
    fn off_clears_existing_override() {
        let store = store();
        handle(&store, "chat-2", "auto");
        let reply = handle(&store, "chat-2", "off");
        assert_eq!(reply, PlanModeReply::Cleared);
        assert_eq!(store.get("chat-2").permission_mode, None);
    }
}
