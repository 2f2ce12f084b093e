//! Line classification for the relay, plus the notices it injects.
//!
//! Every notice the relay writes into a session carries a `[System]` or
//! `[AutoPilot]` marker, and [`is_relay_message`] rejects any line holding one.
//! That pairing is what stops a forwarded command from being read back as a
//! new one.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

use crate::util::truncate_chars;

const SYSTEM_MARKER: &str = "[System]";
const AUTOPILOT_MARKER: &str = "[AutoPilot]";

/// Characters of a dropped command quoted back in the rate-limit warning.
const DROPPED_PREVIEW_CHARS: usize = 20;

/// CSI sequences and two-byte ESC sequences.
fn ansi_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("Invalid regex")
    })
}

/// Common interactive prompts followed by whitespace:
/// `user@host:~$ `, `[NAME] ~/dir $ `, `C:\path> `.
fn prompt_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(?:.*[@:].*[#$]|.*[\]\)].*[$%#]|[A-Z]:\\.*>)\s").expect("Invalid regex")
    })
}

/// Remove terminal escape sequences.
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ansi_regex().replace_all(line, "")
}

/// Whether the line was written by the relay or the server itself.
pub fn is_relay_message(line: &str) -> bool {
    line.contains(SYSTEM_MARKER) || line.contains(AUTOPILOT_MARKER)
}

/// Whether the line looks like a shell prompt echoing typed input.
pub fn is_prompt_echo(line: &str) -> bool {
    prompt_regex().is_match(line)
}

/// Text after the first occurrence of `tag`, trimmed. `None` if the tag is
/// absent or nothing follows it.
pub fn extract_command<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    if tag.is_empty() {
        return None;
    }
    let idx = line.find(tag)?;
    let command = line[idx + tag.len()..].trim();
    (!command.is_empty()).then_some(command)
}

/// Banner injected into both sessions when a pair is linked. `tag` is the
/// tag this session uses to address its partner.
pub fn link_notice(tag: &str) -> String {
    let name = tag.trim_start_matches('<').trim_end_matches('>');
    format!("\r\n\x1b[36m{SYSTEM_MARKER} Auto-Pilot Active.\r\nUse < {name} > COMMAND to delegate tasks.\x1b[0m\r\n")
}

/// Confirmation shown in the source session after a forward.
pub fn forward_ack(command: &str) -> String {
    format!("\r\n\x1b[35m{AUTOPILOT_MARKER} ➤ Sent to Pair: {command}\x1b[0m\r\n")
}

/// Warning shown in the source session when a command is dropped.
pub fn rate_limit_notice(command: &str) -> String {
    format!(
        "\r\n\x1b[33m{AUTOPILOT_MARKER} ⚠ Rate Limited (1 msg/s). Dropped: {}...\x1b[0m\r\n",
        truncate_chars(command, DROPPED_PREVIEW_CHARS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;32mgreen\x1b[0m text"), "green text");
        assert_eq!(strip_ansi("\x1b[?2004hprompt"), "prompt");
        assert_eq!(strip_ansi("\x1bMreverse"), "reverse");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_prompt_echo() {
        assert!(is_prompt_echo("user@host:~/proj$ <agent2> ls"));
        assert!(is_prompt_echo("root@box:/# make"));
        assert!(is_prompt_echo("[INSTRUCTOR] ~/work $ <agent2> run"));
        assert!(is_prompt_echo("C:\\Users\\me> dir"));
        assert!(!is_prompt_echo("<agent2> build the app"));
        assert!(!is_prompt_echo("Please <agent2> run the tests"));
    }

    #[test]
    fn test_relay_messages() {
        assert!(is_relay_message("[System] Auto-Pilot Active."));
        assert!(is_relay_message("  [AutoPilot] ➤ Sent to Pair: ls"));
        assert!(!is_relay_message("<agent2> ls"));
    }

    #[test]
    fn test_extract_command() {
        assert_eq!(extract_command("<agent2> build the app  \r", "<agent2>"), Some("build the app"));
        assert_eq!(extract_command("ok so <agent2>run", "<agent2>"), Some("run"));
        assert_eq!(
            extract_command("<agent2> echo <agent2> twice", "<agent2>"),
            Some("echo <agent2> twice")
        );
        assert_eq!(extract_command("<agent2>   ", "<agent2>"), None);
        assert_eq!(extract_command("no tag here", "<agent2>"), None);
    }

    #[test]
    fn test_notices_are_self_filtered() {
        for notice in [link_notice("<agent2>"), forward_ack("ls"), rate_limit_notice("ls")] {
            for line in notice.split('\n') {
                let clean = strip_ansi(line);
                assert!(
                    is_relay_message(&clean) || extract_command(&clean, "<agent2>").is_none(),
                    "{clean:?}"
                );
            }
        }
    }

    #[test]
    fn test_rate_limit_notice_truncates() {
        let notice = rate_limit_notice("abcdefghijklmnopqrstuvwxyz");
        assert!(notice.contains("Dropped: abcdefghijklmnopqrst..."));
    }
}
