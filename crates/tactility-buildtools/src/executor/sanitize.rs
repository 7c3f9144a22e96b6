const MAX_LOG_CHARS: usize = 4096;

enum Escape {
    Start,
    Csi,
    Osc,
    OscEsc,
}

/// Make a child-process output line safe to put into a log record:
/// ANSI/OSC sequences and control characters are dropped, tabs become
/// spaces and very long lines are cut.
pub fn sanitize_log_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LOG_CHARS));
    let mut escape: Option<Escape> = None;
    let mut count = 0usize;

    for c in input.chars() {
        if let Some(state) = &escape {
            escape = match state {
                Escape::Start => match c {
                    '[' => Some(Escape::Csi),
                    ']' => Some(Escape::Osc),
                    _ => None,
                },
                Escape::Csi if ('@'..='~').contains(&c) => None,
                Escape::Csi => Some(Escape::Csi),
                Escape::Osc if c == '\x07' => None,
                Escape::Osc if c == '\x1b' => Some(Escape::OscEsc),
                Escape::Osc => Some(Escape::Osc),
                Escape::OscEsc if c == '\\' => None,
                Escape::OscEsc => Some(Escape::Osc),
            };
            continue;
        }

        match c {
            '\x1b' => {
                escape = Some(Escape::Start);
                continue;
            }
            '\t' => out.push(' '),
            c if c.is_control() => continue,
            c => out.push(c),
        }
        count += 1;
        if count >= MAX_LOG_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::sanitize_log_line;

    #[test]
    fn strips_color_codes_from_idf_output() {
        let input = "\u{1b}[0;32mI (305) cpu_start: Starting scheduler\u{1b}[0m";
        assert_eq!(
            sanitize_log_line(input),
            "I (305) cpu_start: Starting scheduler"
        );
    }

    #[test]
    fn strips_window_title_and_controls() {
        let input = "a\u{1b}]0;ninja\u{7}b\tc\r";
        assert_eq!(sanitize_log_line(input), "ab c");
    }

    #[test]
    fn truncates_runaway_lines() {
        let input = "x".repeat(10_000);
        let got = sanitize_log_line(&input);
        assert!(got.ends_with("...[truncated]"));
        assert!(got.len() < 5000);
    }
}
