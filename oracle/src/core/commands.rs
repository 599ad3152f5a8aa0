//! Command surface of the interactive phase loop.

use thiserror::Error;

/// A parsed operator command. Task indices are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    NextPhase,
    Help,
    ListTasks,
    Mark(usize),
    Unmark(usize),
    AddTask,
    EditTask(usize),
    DeleteTask(usize),
    Rollback,
    RetryPhase,
    UndoVerify,
    History,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'; type 'help' to see the available commands")]
    Unknown(String),
    #[error("'{command}' needs a task number (e.g. '{command} 2')")]
    BadArgument { command: &'static str },
}

pub const HELP: &str = "\
Commands:
  next-phase       verify the latest commit and move to the next phase
  list-tasks       show the tasks of the current phase
  mark <n>         mark task n as complete
  unmark <n>       mark task n as incomplete
  add-task         add a task to the current phase
  edit-task <n>    change the description of task n
  delete-task <n>  remove task n
  rollback         return to an earlier phase
  retry-phase      regenerate the tasks of the current phase
  undo-verify      step back to the previous phase
  history          show the phase history
  help             show this message";

/// Parse one line of operator input. Task numbers are 1-based.
pub fn parse_command(input: &str) -> Result<LoopCommand, CommandError> {
    let mut parts = input.split_whitespace();
    let Some(word) = parts.next() else {
        return Err(CommandError::Unknown(String::new()));
    };
    let arg = parts.next();
    let command = match word.to_lowercase().as_str() {
        "next-phase" => LoopCommand::NextPhase,
        "help" => LoopCommand::Help,
        "list-tasks" => LoopCommand::ListTasks,
        "mark" => LoopCommand::Mark(task_number("mark", arg)?),
        "unmark" => LoopCommand::Unmark(task_number("unmark", arg)?),
        "add-task" => LoopCommand::AddTask,
        "edit-task" => LoopCommand::EditTask(task_number("edit-task", arg)?),
        "delete-task" => LoopCommand::DeleteTask(task_number("delete-task", arg)?),
        "rollback" => LoopCommand::Rollback,
        "retry-phase" => LoopCommand::RetryPhase,
        "undo-verify" => LoopCommand::UndoVerify,
        "history" => LoopCommand::History,
        _ => return Err(CommandError::Unknown(input.trim().to_string())),
    };
    Ok(command)
}

fn task_number(command: &'static str, arg: Option<&str>) -> Result<usize, CommandError> {
    arg.and_then(|raw| raw.parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .map(|n| n - 1)
        .ok_or(CommandError::BadArgument { command })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_commands() {
        assert_eq!(parse_command("next-phase"), Ok(LoopCommand::NextPhase));
        assert_eq!(parse_command("  HISTORY "), Ok(LoopCommand::History));
        assert_eq!(parse_command("undo-verify"), Ok(LoopCommand::UndoVerify));
    }

    #[test]
    fn task_numbers_are_one_based() {
        assert_eq!(parse_command("mark 1"), Ok(LoopCommand::Mark(0)));
        assert_eq!(parse_command("delete-task 3"), Ok(LoopCommand::DeleteTask(2)));
    }

    #[test]
    fn missing_or_invalid_number_is_bad_argument() {
        for input in ["mark", "unmark zero", "edit-task 0", "delete-task -1"] {
            assert!(
                matches!(parse_command(input), Err(CommandError::BadArgument { .. })),
                "{input}"
            );
        }
    }

    #[test]
    fn unknown_input_points_at_help() {
        let err = parse_command("launch").unwrap_err();
        assert!(err.to_string().contains("type 'help'"));
        assert!(matches!(parse_command(""), Err(CommandError::Unknown(_))));
    }
}
