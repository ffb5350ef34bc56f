use erratum_contracts::{
    BotCommand, BroadcastOutcome, ChatId, Entity, InlineButton, Keyboard, Sender, UserId,
};
use erratum_kernel::{pick_payload, CANCEL_PAYLOAD};

pub const MENU_START: &str = "📝 Start report";
pub const MENU_SEND: &str = "📤 Send report";
pub const MENU_CANCEL: &str = "❌ Cancel";

/// Upper bound for one admin listing message, well under the platform limit.
pub const LIST_CHUNK_CHARS: usize = 3500;

pub const UNKNOWN_CHAT: &str = "❓(unknown)";

pub const COMMANDS: &[BotCommand] = &[
    BotCommand {
        command: "start",
        description: "Show the menu",
    },
    BotCommand {
        command: "report",
        description: "Report an error",
    },
    BotCommand {
        command: "send",
        description: "Send the collected report",
    },
    BotCommand {
        command: "cancel",
        description: "Cancel the current report",
    },
    BotCommand {
        command: "whoami",
        description: "Show chat and user ids",
    },
];

pub const WELCOME: &str = "Hi! Found a typo or a translation error?\n\
    Press «📝 Start report», pick the novel, then send screenshots or text. \
    Finish with «📤 Send report».\n\
    You can also just write a message with the novel tag, e.g. #aptch.";
pub const CHOOSE_ENTITY: &str = "Which novel is the report about?";
pub const COLLECT_HINT: &str =
    "Now send the text or screenshots. Press «📤 Send report» when you are done.";
pub const MESSAGE_ACCEPTED: &str = "✅ Added to the report.";
pub const SLOW_DOWN: &str = "⏳ Too fast, please wait a few seconds.";
pub const NOTHING_TO_SEND: &str = "Nothing to send yet. Start with «📝 Start report».";
pub const ALREADY_SENDING: &str = "⏳ The report is being sent.";
pub const CANCELLED: &str = "❌ Report cancelled.";
pub const DELIVERED: &str = "✅ Report sent, thank you!";
pub const PARTIALLY_DELIVERED: &str =
    "⚠️ The report was sent, but some messages could not be delivered.";
pub const ACCESS_DENIED: &str = "⛔ This command is for admins only.";
pub const BROADCAST_USAGE: &str =
    "Usage: /broadcast [-codes code1,code2] [-silent] <text>";
pub const BROADCAST_EMPTY: &str = "The broadcast text is empty.";
pub const REGISTRY_EMPTY: &str = "No novels are configured.";

pub fn entity_selected(label: &str) -> String {
    format!("Novel: {label}\n\n{COLLECT_HINT}")
}

pub fn unknown_entity(code: &str) -> String {
    format!("Unknown novel \"{code}\". It may have been removed, use /report to pick again.")
}

pub fn tagged_ack(label: &str) -> String {
    format!("✅ Report for {label} sent, thank you!")
}

pub fn tagged_partial(label: &str) -> String {
    format!("⚠️ Report for {label} sent, but delivery was incomplete.")
}

pub fn whoami(chat_id: ChatId, user_id: UserId, chat_kind: &str) -> String {
    format!(
        "chat_id: <code>{chat_id}</code>\nuser_id: <code>{user_id}</code>\nchat type: {}",
        escape_html(chat_kind)
    )
}

/// Header preceding forwarded report messages in every sink.
pub fn report_header(label: &str, sender: &Sender) -> String {
    format!(
        "📬 Report for <b>{}</b>\nFrom: <a href='tg://user?id={}'>{}</a>",
        escape_html(label),
        sender.id,
        escape_html(&sender.first_name),
    )
}

pub fn broadcast_text(labels: &[&str], text: &str) -> String {
    format!(
        "📢 Message from admin\nYour novels: {}\n\n{}",
        labels.join(", "),
        text
    )
}

pub fn broadcast_summary(outcome: &BroadcastOutcome, unknown_codes: &[String]) -> String {
    let mut out = format!("Broadcast done. sent: {}, failed: {}", outcome.sent, outcome.failed);
    if !unknown_codes.is_empty() {
        out.push_str(&format!("\nUnknown codes: {}", unknown_codes.join(", ")));
    }
    out
}

pub fn contact_usage(codes: &[&str]) -> String {
    format!("Usage: /contact <code>\nCodes: {}", codes.join(", "))
}

pub fn contact_unknown(code: &str) -> String {
    format!("Unknown code: {}", escape_html(code))
}

pub fn contact_no_destination(label: &str) -> String {
    format!(
        "<b>{}</b> has no translator chat; its reports go to the common feed.",
        escape_html(label)
    )
}

pub fn contact_card(label: &str, chat_id: ChatId, name: &str, link: Option<&str>) -> String {
    let mut out = format!(
        "<b>{}</b>\nChat: {}\nid: <code>{chat_id}</code>",
        escape_html(label),
        escape_html(name)
    );
    if let Some(link) = link {
        out.push_str(&format!("\nLink: {}", escape_html(link)));
    }
    out
}

pub fn listing_line(entity: &Entity, chat: Option<(&str, Option<&str>)>) -> String {
    let target = match (entity.destination.chat(), chat) {
        (None, _) => "no destination".to_string(),
        (Some(id), Some((name, Some(link)))) => {
            format!("{} ({}) <code>{id}</code>", escape_html(name), escape_html(link))
        }
        (Some(id), Some((name, None))) => format!("{} <code>{id}</code>", escape_html(name)),
        (Some(id), None) => format!("{UNKNOWN_CHAT} <code>{id}</code>"),
    };
    format!(
        "• <b>{}</b> #{} → {target}",
        escape_html(&entity.label),
        escape_html(&entity.code)
    )
}

/// Joins lines into messages of at most `max_chars` characters each. A
/// single line longer than the limit gets a message of its own.
pub fn chunk_lines(lines: &[String], max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;
    for line in lines {
        let line_chars = line.chars().count();
        let needed = if current.is_empty() {
            line_chars
        } else {
            current_chars + 1 + line_chars
        };
        if !current.is_empty() && needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_chars += 1;
        }
        current.push_str(line);
        current_chars += line_chars;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub fn main_menu() -> Keyboard {
    Keyboard::Menu {
        rows: vec![
            vec![MENU_START.to_string()],
            vec![MENU_SEND.to_string(), MENU_CANCEL.to_string()],
        ],
    }
}

/// Maps a menu button text back to the command it stands for.
pub fn menu_command(text: &str) -> Option<&'static str> {
    match text.trim() {
        MENU_START => Some("report"),
        MENU_SEND => Some("send"),
        MENU_CANCEL => Some("cancel"),
        _ => None,
    }
}

/// Entities two per row, then a cancel row.
pub fn entity_keyboard(entities: &[&Entity]) -> Keyboard {
    let mut rows: Vec<Vec<InlineButton>> = entities
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|entity| InlineButton::Callback {
                    label: entity.label.clone(),
                    data: pick_payload(&entity.code),
                })
                .collect()
        })
        .collect();
    rows.push(vec![InlineButton::Callback {
        label: MENU_CANCEL.to_string(),
        data: CANCEL_PAYLOAD.to_string(),
    }]);
    Keyboard::Inline { rows }
}

pub fn open_chat_keyboard(url: &str) -> Keyboard {
    Keyboard::Inline {
        rows: vec![vec![InlineButton::Url {
            label: "Open chat".to_string(),
            url: url.to_string(),
        }]],
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use erratum_contracts::Destination;

    fn entity(code: &str, label: &str, destination: i64) -> Entity {
        Entity {
            code: code.to_string(),
            label: label.to_string(),
            destination: Destination(destination),
        }
    }

    #[test]
    fn header_escapes_label_and_name() {
        let sender = Sender {
            id: UserId(9),
            first_name: "<Bob>".to_string(),
        };
        let header = report_header("Tom & Jerry", &sender);
        assert_eq!(
            header,
            "📬 Report for <b>Tom &amp; Jerry</b>\nFrom: <a href='tg://user?id=9'>&lt;Bob&gt;</a>"
        );
    }

    #[test]
    fn entity_keyboard_packs_two_per_row_and_appends_cancel() {
        let a = entity("a", "A", 1);
        let b = entity("b", "B", 1);
        let c = entity("c", "C", 2);
        let Keyboard::Inline { rows } = entity_keyboard(&[&a, &b, &c]) else {
            panic!("expected inline keyboard");
        };
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[1].len(), 1);
        assert_eq!(
            rows[2][0],
            InlineButton::Callback {
                label: MENU_CANCEL.to_string(),
                data: "cancel".to_string()
            }
        );
    }

    #[test]
    fn menu_buttons_map_to_commands() {
        assert_eq!(menu_command(MENU_START), Some("report"));
        assert_eq!(menu_command(MENU_SEND), Some("send"));
        assert_eq!(menu_command(MENU_CANCEL), Some("cancel"));
        assert_eq!(menu_command("hello"), None);
    }

    #[test]
    fn chunks_respect_character_limit() {
        let lines: Vec<String> = (0..10).map(|i| format!("{i}{}", "x".repeat(9))).collect();
        let chunks = chunk_lines(&lines, 32);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= 32));
        assert_eq!(chunks.join("\n"), lines.join("\n"));
    }

    #[test]
    fn oversized_line_gets_own_chunk() {
        let lines = vec!["short".to_string(), "y".repeat(50), "tail".to_string()];
        let chunks = chunk_lines(&lines, 20);
        assert_eq!(chunks, vec!["short".to_string(), "y".repeat(50), "tail".to_string()]);
    }

    #[test]
    fn listing_line_degrades_to_placeholder() {
        let line = listing_line(&entity("ac", "Ac", 55), None);
        assert!(line.contains(UNKNOWN_CHAT));
        let line = listing_line(&entity("rp", "Rp", 0), None);
        assert!(line.ends_with("no destination"));
    }
}
