//! Command line of a launched agent process.

use std::fmt;
use std::path::{Path, PathBuf};

/// Program path plus `--name=value` switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: PathBuf,
    switches: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            switches: Vec::new(),
        }
    }

    pub fn append_switch(&mut self, name: &str, value: &str) -> &mut Self {
        self.switches.push((name.to_string(), value.to_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn switch_value(&self, name: &str) -> Option<&str> {
        self.switches
            .iter()
            .find(|(switch, _)| switch == name)
            .map(|(_, value)| value.as_str())
    }

    /// Arguments after the program, one per switch.
    pub fn args(&self) -> Vec<String> {
        self.switches
            .iter()
            .map(|(name, value)| format!("--{name}={value}"))
            .collect()
    }

    /// Single command string, quoted the way `CommandLineToArgvW` parses it.
    pub fn to_command_string(&self) -> String {
        let mut out = quote(&self.program.to_string_lossy());
        for arg in self.args() {
            out.push(' ');
            out.push_str(&quote(&arg));
        }
        out
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command_string())
    }
}

fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '"']) {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Backslashes before a quote are doubled, plus one for the quote.
                out.extend(std::iter::repeat_n('\\', backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(std::iter::repeat_n('\\', backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.extend(std::iter::repeat_n('\\', backslashes * 2));
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_follow_program() {
        let mut cmd = CommandLine::new(r"C:\hostlink\hostlink-agent.exe");
        cmd.append_switch("session-type", "desktop")
            .append_switch("channel-id", "42.0.abc");

        assert_eq!(
            cmd.to_command_string(),
            r"C:\hostlink\hostlink-agent.exe --session-type=desktop --channel-id=42.0.abc"
        );
        assert_eq!(cmd.switch_value("channel-id"), Some("42.0.abc"));
        assert_eq!(cmd.args().len(), 2);
    }

    #[test]
    fn paths_with_spaces_are_quoted() {
        let cmd = CommandLine::new(r"C:\Program Files\hostlink\hostlink-agent.exe");
        assert_eq!(
            cmd.to_command_string(),
            r#""C:\Program Files\hostlink\hostlink-agent.exe""#
        );
    }

    #[test]
    fn embedded_quotes_and_trailing_backslashes() {
        assert_eq!(quote(r#"a "b""#), r#""a \"b\"""#);
        assert_eq!(quote(r"dir with space\"), r#""dir with space\\""#);
        assert_eq!(quote(""), r#""""#);
    }
}
