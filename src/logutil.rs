//! Keep room descriptions, topics and member names on one log line.

use std::fmt::Write;

const MAX_PREVIEW: usize = 200;

/// Escape control characters (`\n` => `\\n`, other controls as `\xNN`) and
/// cut anything past 200 characters with an ellipsis.
pub fn escape_log(s: &str) -> String {
    escape_log_with_limit(s, MAX_PREVIEW)
}

pub fn escape_log_with_limit(s: &str, limit: usize) -> String {
    let mut out = String::with_capacity(s.len().min(limit) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= limit {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_line_topic_stays_on_one_line() {
        let topic = "A marble hall.\nExits: #hallway\r\tEnd";
        assert_eq!(escape_log(topic), "A marble hall.\\nExits: #hallway\\r\\tEnd");
    }

    #[test]
    fn long_descriptions_are_cut() {
        let long = "x".repeat(50);
        let cut = escape_log_with_limit(&long, 10);
        assert_eq!(cut, format!("{}…", "x".repeat(10)));
        assert_eq!(escape_log("bell\u{7}"), "bell\\x07");
    }
}
