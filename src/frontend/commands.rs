use crate::instance::InstanceId;

pub const DEFAULT_LOG_LINES: usize = 50;
pub const MAX_LOG_LINES: usize = 500;

/// A chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    NewBot { token: String },
    Deploy,
    Cancel,
    List,
    Stop(InstanceId),
    Restart(InstanceId),
    Status(InstanceId),
    Logs { id: InstanceId, lines: usize },
}

pub const HELP: &str = "\
Commands:
/newbot <token>     deploy a bot with the default recipe
/deploy             configure a deployment step by step
/cancel             abandon the current /deploy
/mybots             list deployments
/status <id>        check whether an instance is up
/stopbot <id>       stop an instance
/restartbot <id>    restart an instance
/logs <id> [lines]  show the end of an instance log";

/// Parse one line of chat input.
///
/// `Ok(None)` means the text is not a command (a wizard answer, say).
/// `Err` carries a usage message for the operator.
pub fn parse(input: &str) -> Result<Option<Command>, String> {
    let input = input.trim();
    if !input.starts_with('/') {
        return Ok(None);
    }

    let mut parts = input.split_whitespace();
    let head = parts.next().unwrap_or_default();
    // Group chats address commands as `/cmd@botname`.
    let name = head[1..].split('@').next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let command = match name {
        "start" | "help" | "menu" => Command::Help,
        "newbot" => match args.as_slice() {
            [token] => Command::NewBot {
                token: (*token).to_string(),
            },
            _ => return Err("Usage: /newbot <token>\nExample: /newbot 1234567890:ABCdef...".into()),
        },
        "deploy" => Command::Deploy,
        "cancel" => Command::Cancel,
        "mybots" | "list" => Command::List,
        "stopbot" | "stop" => Command::Stop(single_id("stopbot", &args)?),
        "restartbot" | "restart" => Command::Restart(single_id("restartbot", &args)?),
        "status" => Command::Status(single_id("status", &args)?),
        "logs" => {
            let usage = || "Usage: /logs <id> [lines]".to_string();
            let (id, lines) = match args.as_slice() {
                [id] => (*id, None),
                [id, lines] => (*id, Some(*lines)),
                _ => return Err(usage()),
            };
            let id = id.parse().map_err(|_| usage())?;
            let lines = match lines {
                Some(raw) => raw.parse::<usize>().map_err(|_| usage())?,
                None => DEFAULT_LOG_LINES,
            };
            Command::Logs {
                id,
                lines: lines.clamp(1, MAX_LOG_LINES),
            }
        }
        other => return Err(format!("Unknown command '/{other}'. Send /help for the list.")),
    };
    Ok(Some(command))
}

fn single_id(command: &str, args: &[&str]) -> Result<InstanceId, String> {
    let usage = || format!("Usage: /{command} <id>\nUse /mybots to find instance ids.");
    match args {
        [id] => id.parse().map_err(|_| usage()),
        _ => Err(usage()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse("https://github.com/me/bot.git"), Ok(None));
        assert_eq!(parse("  -  "), Ok(None));
    }

    #[test]
    fn parses_id_commands() {
        assert_eq!(parse("/stopbot 3"), Ok(Some(Command::Stop(3))));
        assert_eq!(parse("/restartbot 4"), Ok(Some(Command::Restart(4))));
        assert_eq!(parse("/status 5"), Ok(Some(Command::Status(5))));
        assert_eq!(parse("/mybots"), Ok(Some(Command::List)));
    }

    #[test]
    fn strips_bot_mention() {
        assert_eq!(parse("/status@fleet_bot 7"), Ok(Some(Command::Status(7))));
        assert_eq!(parse("/start@fleet_bot"), Ok(Some(Command::Help)));
    }

    #[test]
    fn newbot_requires_exactly_one_token() {
        assert_eq!(
            parse("/newbot 123:abc"),
            Ok(Some(Command::NewBot {
                token: "123:abc".into()
            }))
        );
        assert!(parse("/newbot").unwrap_err().starts_with("Usage: /newbot"));
        assert!(parse("/newbot a b").is_err());
    }

    #[test]
    fn bad_ids_return_usage() {
        let err = parse("/stopbot abc").unwrap_err();
        assert!(err.starts_with("Usage: /stopbot <id>"));
        assert!(parse("/status").is_err());
    }

    #[test]
    fn logs_defaults_and_clamps_line_count() {
        assert_eq!(
            parse("/logs 2"),
            Ok(Some(Command::Logs {
                id: 2,
                lines: DEFAULT_LOG_LINES
            }))
        );
        assert_eq!(
            parse("/logs 2 100000"),
            Ok(Some(Command::Logs {
                id: 2,
                lines: MAX_LOG_LINES
            }))
        );
        assert!(parse("/logs 2 many").is_err());
    }

    #[test]
    fn unknown_command_is_reported() {
        let err = parse("/selfdestruct").unwrap_err();
        assert!(err.contains("/selfdestruct"));
    }
}
