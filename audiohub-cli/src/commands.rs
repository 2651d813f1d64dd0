//! Line-oriented command parsing for the interactive driver

use std::fmt;

/// One command read from stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `source <id|none>`
    Source(String),
    /// `routing <direct|synchronized>`
    Routing(String),
    /// `eq <on|off>`
    Equalizer(bool),
    State,
    Reset,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCommandError(String);

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (type `help` for commands)", self.0)
    }
}

impl std::error::Error for ParseCommandError {}

/// Parse one input line; blank lines yield `None`
pub fn parse_line(line: &str) -> Result<Option<Command>, ParseCommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    if words.next().is_some() {
        return Err(ParseCommandError(format!("too many arguments to `{}`", verb)));
    }

    let command = match (verb, arg) {
        ("source", Some(id)) => Command::Source(id.to_string()),
        ("routing", Some(mode)) => Command::Routing(mode.to_string()),
        ("eq", Some("on")) => Command::Equalizer(true),
        ("eq", Some("off")) => Command::Equalizer(false),
        ("eq", Some(other)) => {
            return Err(ParseCommandError(format!("expected `on` or `off`, got `{}`", other)))
        }
        ("state", None) => Command::State,
        ("reset", None) => Command::Reset,
        ("help", None) => Command::Help,
        ("quit" | "exit", None) => Command::Quit,
        ("source" | "routing" | "eq", None) => {
            return Err(ParseCommandError(format!("`{}` needs an argument", verb)))
        }
        (verb, _) => return Err(ParseCommandError(format!("unknown command `{}`", verb))),
    };
    Ok(Some(command))
}

pub const HELP: &str = "\
Commands:
  source <spotify|bluetooth|roc|radio|podcast|none>   switch the active source
  routing <direct|synchronized>                       change the routing mode
  eq <on|off>                                         toggle the equalizer
  state                                               print the current state
  reset                                               clear a halted state
  quit                                                stop the active source and exit";

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("source radio", Command::Source("radio".into()))]
    #[case("  source   none ", Command::Source("none".into()))]
    #[case("routing synchronized", Command::Routing("synchronized".into()))]
    #[case("eq on", Command::Equalizer(true))]
    #[case("eq off", Command::Equalizer(false))]
    #[case("state", Command::State)]
    #[case("reset", Command::Reset)]
    #[case("exit", Command::Quit)]
    fn test_parse_commands(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(parse_line(line).unwrap(), Some(expected));
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(parse_line("   ").unwrap(), None);
    }

    #[rstest]
    #[case("source")]
    #[case("eq maybe")]
    #[case("state now")]
    #[case("play radio")]
    #[case("source radio extra")]
    fn test_parse_errors(#[case] line: &str) {
        assert!(parse_line(line).is_err());
    }
}
