use regex::Regex;
use std::sync::LazyLock;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("static ANSI pattern")
});

/// Remove terminal colour and cursor sequences from a console line
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_colour_codes() {
        let raw = "\x1b[33m[12:00:01 INFO]: \x1b[0mAdded Steve to the whitelist\x1b[m";
        assert_eq!(strip_ansi(raw), "[12:00:01 INFO]: Added Steve to the whitelist");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_ansi("There are 0 of a max of 20 players online: "), "There are 0 of a max of 20 players online: ");
    }
}
