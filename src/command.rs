//! Splitting of dev server command lines
//!
//! Commands come from configuration as a single string (`npm run dev`) and are
//! split with POSIX shell quoting rules. No shell is ever invoked.

use crate::error::FrontendError;

/// A command line split into the program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Quote the command back into a single line
    pub fn to_command_line(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

/// Split `command` into a program name and argument list.
///
/// Fails with [`FrontendError::MalformedCommand`] on an unterminated quote
/// or when the command has no words at all.
pub fn parse(command: &str) -> Result<ParsedCommand, FrontendError> {
    let mut words = shell_words::split(command).map_err(|e| FrontendError::MalformedCommand {
        command: command.to_string(),
        reason: e.to_string(),
    })?;

    if words.is_empty() {
        return Err(FrontendError::MalformedCommand {
            command: command.to_string(),
            reason: "empty command".to_string(),
        });
    }

    let program = words.remove(0);
    Ok(ParsedCommand {
        program,
        args: words,
    })
}
