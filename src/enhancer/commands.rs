// src/enhancer/commands.rs - Chat-command front end over the moderation operations

use log::info;

use crate::enhancer::ChatEnhancer;

/// Response to a handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub message: String,
    /// Set when the block list grew, so rendered messages should be swept.
    pub blocked_changed: bool,
}

impl CommandReply {
    fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            blocked_changed: false,
        }
    }
}

/// Text settings surface: `!block`, `!unblock`, `!blocked`, `!filter`,
/// `!badge`, `!self`, `!users`, `!emotes`, `!export`, `!reset`.
#[derive(Debug, Clone)]
pub struct SettingsCommands {
    prefix: char,
}

impl Default for SettingsCommands {
    fn default() -> Self {
        Self { prefix: '!' }
    }
}

impl SettingsCommands {
    pub fn new(prefix: char) -> Self {
        Self { prefix }
    }

    pub fn is_command(&self, line: &str) -> bool {
        line.trim_start().starts_with(self.prefix)
    }

    /// Run one command line. `None` means the line is not one of ours.
    pub fn process(&self, enhancer: &mut ChatEnhancer, line: &str) -> Option<CommandReply> {
        let body = line.trim().strip_prefix(self.prefix)?;
        let mut parts = body.split_whitespace();
        let command = parts.next()?.to_lowercase();
        let args: Vec<&str> = parts.collect();

        let reply = match command.as_str() {
            "block" => self.handle_block(enhancer, &args),
            "unblock" => self.handle_unblock(enhancer, &args),
            "blocked" => self.handle_blocked_list(enhancer),
            "filter" => self.handle_filter(enhancer, &args, remainder(body, 2)),
            "badge" => self.handle_badge(enhancer, &args),
            "self" => self.handle_self(enhancer, &args),
            "users" => self.handle_users(enhancer),
            "emotes" => self.handle_emotes(enhancer, &args),
            "export" => match enhancer.export_state() {
                Ok(json) => CommandReply::text(json),
                Err(e) => CommandReply::text(format!("❌ Export failed: {}", e)),
            },
            "reset" => {
                if enhancer.reset() {
                    CommandReply::text("🗑️ Moderation state cleared")
                } else {
                    CommandReply::text("Nothing to reset")
                }
            }
            _ => return None,
        };

        info!("Command '{}' handled", command);
        Some(reply)
    }

    /// `!block <id|name> [name]`. An all-digit argument is taken as a user id.
    fn handle_block(&self, enhancer: &mut ChatEnhancer, args: &[&str]) -> CommandReply {
        let (user_id, username) = match args {
            [] => return CommandReply::text("Usage: !block <user id|username> [username]"),
            [single] if is_user_id(single) => (Some(*single), None),
            [single] => (None, Some(*single)),
            [id, name, ..] => (Some(*id), Some(*name)),
        };

        if enhancer.block(user_id, username) {
            CommandReply {
                message: format!("🚫 Blocked {}", args.join(" ")),
                blocked_changed: true,
            }
        } else {
            CommandReply::text(format!("{} is already blocked", args.join(" ")))
        }
    }

    fn handle_unblock(&self, enhancer: &mut ChatEnhancer, args: &[&str]) -> CommandReply {
        let Some(identifier) = args.first() else {
            return CommandReply::text("Usage: !unblock <user id|username>");
        };

        if enhancer.unblock(identifier) {
            CommandReply::text(format!("✅ Unblocked {}", identifier))
        } else {
            CommandReply::text(format!("❌ {} is not blocked", identifier))
        }
    }

    fn handle_blocked_list(&self, enhancer: &ChatEnhancer) -> CommandReply {
        let entries = enhancer.state().blocked_entries();
        if entries.is_empty() {
            return CommandReply::text("No blocked users");
        }
        CommandReply::text(format!("🚫 Blocked ({}): {}", entries.len(), entries.join(", ")))
    }

    /// `!filter add|remove <word>` or `!filter list`. `word` is the raw rest
    /// of the line, so regex specs keep their spacing.
    fn handle_filter(&self, enhancer: &mut ChatEnhancer, args: &[&str], word: &str) -> CommandReply {
        let Some(subcommand) = args.first() else {
            return CommandReply::text("🛡️ Filter commands: !filter <add|remove|list> [word]");
        };

        match subcommand.to_lowercase().as_str() {
            "add" if word.is_empty() => CommandReply::text("Usage: !filter add <word|/pattern/flags>"),
            "add" => {
                if enhancer.add_filter_word(word) {
                    let active = enhancer.filters().len();
                    CommandReply::text(format!("✅ Filtering '{}' ({} active patterns)", word, active))
                } else {
                    CommandReply::text(format!("'{}' is already filtered", word))
                }
            }
            "remove" if word.is_empty() => CommandReply::text("Usage: !filter remove <word>"),
            "remove" => {
                if enhancer.remove_filter_word(word) {
                    CommandReply::text(format!("🗑️ No longer filtering '{}'", word))
                } else {
                    CommandReply::text(format!("❌ '{}' is not filtered", word))
                }
            }
            "list" => {
                let words = &enhancer.state().filtered_words;
                if words.is_empty() {
                    CommandReply::text("No filtered words")
                } else {
                    CommandReply::text(format!("🛡️ Filtered ({}): {}", words.len(), words.join(", ")))
                }
            }
            _ => CommandReply::text("❌ Unknown subcommand. Use: add, remove, list"),
        }
    }

    /// `!badge <id> <team|none>`
    fn handle_badge(&self, enhancer: &mut ChatEnhancer, args: &[&str]) -> CommandReply {
        let [user_id, team, ..] = args else {
            return CommandReply::text("Usage: !badge <user id> <team|none>");
        };
        let badge = badge_argument(team);

        if !enhancer.assign_badge(user_id, badge) {
            return CommandReply::text("No change");
        }
        match badge {
            Some(key) => CommandReply::text(format!("🏅 {} now shows {}", user_id, enhancer.badges().label_for(key))),
            None => CommandReply::text(format!("Badge cleared for {}", user_id)),
        }
    }

    /// `!self <id> <team|none>`
    fn handle_self(&self, enhancer: &mut ChatEnhancer, args: &[&str]) -> CommandReply {
        let Some(user_id) = args.first() else {
            return CommandReply::text("Usage: !self <user id> <team|none>");
        };
        let badge = args.get(1).and_then(|team| badge_argument(team));

        if enhancer.set_self(Some(*user_id), badge) {
            CommandReply::text(format!("👤 You are {}", user_id))
        } else {
            CommandReply::text("No change")
        }
    }

    fn handle_users(&self, enhancer: &ChatEnhancer) -> CommandReply {
        let users = enhancer.known_users();
        if users.is_empty() {
            return CommandReply::text("No known users yet");
        }
        let listed: Vec<String> = users.iter().map(|(id, name)| format!("{} ({})", name, id)).collect();
        CommandReply::text(format!("👥 Known users: {}", listed.join(", ")))
    }

    fn handle_emotes(&self, enhancer: &mut ChatEnhancer, args: &[&str]) -> CommandReply {
        match args.first().map(|arg| arg.to_lowercase()).as_deref() {
            Some("on") => {
                enhancer.set_emotes_enabled(true);
                CommandReply::text("✅ Emotes enabled")
            }
            Some("off") => {
                enhancer.set_emotes_enabled(false);
                CommandReply::text("⏸️ Emotes disabled")
            }
            _ => CommandReply::text(format!(
                "Emotes are {} ({} loaded). Usage: !emotes <on|off>",
                if enhancer.emotes_enabled() { "on" } else { "off" },
                enhancer.catalog().len()
            )),
        }
    }
}

/// Raw text after the first `count` whitespace-separated tokens.
fn remainder(text: &str, count: usize) -> &str {
    let mut rest = text.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest.trim_end()
}

fn is_user_id(arg: &str) -> bool {
    !arg.is_empty() && arg.chars().all(|c| c.is_ascii_digit())
}

fn badge_argument(arg: &str) -> Option<&str> {
    match arg.to_lowercase().as_str() {
        "none" | "off" | "clear" => None,
        _ => Some(arg),
    }
}
