use log::{debug, info, warn};

use crate::mumble::config::MumbleConfig;
use crate::mumble::events::{CommandEvent, Event, EventBus, MessageTarget};
use crate::mumble::outbound::Outbox;
use crate::transport::types::User;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    Unauthorized,
    NotFound,
    Failed(String),
}

/// Looks up and runs a named command on behalf of `source`. Replies and
/// other facade calls go into `outbox` and are sent once the command returns.
pub trait CommandRunner {
    fn run(
        &mut self,
        command: &str,
        args: &str,
        source: &User,
        target: &MessageTarget,
        outbox: &mut Outbox,
    ) -> CommandOutcome;
}

/// Knows no commands, so every message is treated as chat.
#[derive(Debug, Default)]
pub struct NoopCommandRunner;

impl CommandRunner for NoopCommandRunner {
    fn run(
        &mut self,
        _: &str,
        _: &str,
        _: &User,
        _: &MessageTarget,
        _: &mut Outbox,
    ) -> CommandOutcome {
        CommandOutcome::NotFound
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    NotACommand,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub command: &'a str,
    pub args: &'a str,
}

#[derive(Clone, Debug)]
pub struct CommandInterceptor {
    prefix: String,
}

impl CommandInterceptor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &MumbleConfig) -> Self {
        Self::new(config.command_prefix())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Splits a prefixed message into its command token and raw arguments.
    pub fn parse<'a>(&self, message: &'a str) -> Option<ParsedCommand<'a>> {
        let rest = strip_prefix_ignore_case(message, &self.prefix)?.trim_start();
        if rest.is_empty() {
            return None;
        }
        let (command, args) = match rest.find(char::is_whitespace) {
            Some(index) => (&rest[..index], rest[index..].trim_start()),
            None => (rest, ""),
        };
        Some(ParsedCommand { command, args })
    }

    pub fn intercept(
        &self,
        source: &User,
        target: &MessageTarget,
        message: &str,
        events: &mut dyn EventBus,
        runner: &mut dyn CommandRunner,
        outbox: &mut Outbox,
    ) -> Disposition {
        let Some(parsed) = self.parse(message) else {
            return Disposition::NotACommand;
        };

        let event = CommandEvent {
            command: parsed.command.to_string(),
            args: parsed.args.to_string(),
            source: source.clone(),
            target: target.clone(),
            message: message.to_string(),
            printable: Some(format!("<{}:{}> {}", source.name, target, message)),
            cancelled: false,
        };
        let event = match events.publish(Event::PreCommand(event.clone())) {
            Event::PreCommand(published) => published,
            _ => event,
        };
        if event.cancelled {
            debug!("command {} cancelled before running", event.command);
            return Disposition::Handled;
        }

        match runner.run(
            &event.command,
            &event.args,
            &event.source,
            &event.target,
            outbox,
        ) {
            CommandOutcome::Success => {}
            CommandOutcome::Unauthorized => {
                warn!(
                    "{} is not authorized to use the {} command",
                    source.name, event.command
                );
            }
            CommandOutcome::NotFound => {
                debug!("command not found: {}", event.command);
                return Disposition::NotACommand;
            }
            CommandOutcome::Failed(error) => {
                warn!(
                    "an error occurred while running the {} command: {error}",
                    event.command
                );
            }
        }

        if let Some(line) = &event.printable {
            info!("{line}");
        }
        Disposition::Handled
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = text.char_indices();
    let mut end = 0;
    for expected in prefix.chars() {
        let (index, actual) = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
        end = index + actual.len_utf8();
    }
    Some(&text[end..])
}

#[cfg(test)]
mod tests {
    use super::{
        CommandInterceptor, CommandOutcome, CommandRunner, Disposition, NoopCommandRunner,
        ParsedCommand,
    };
    use crate::mumble::config::MumbleConfig;
    use crate::mumble::events::{Event, EventBus, MessageTarget};
    use crate::mumble::outbound::{Outbox, OutboundRequest};
    use crate::transport::types::{Channel, User};

    #[derive(Default)]
    struct RecordingBus {
        published: Vec<Event>,
        cancel: bool,
        rename_to: Option<String>,
    }

    impl EventBus for RecordingBus {
        fn publish(&mut self, mut event: Event) -> Event {
            if let Event::PreCommand(command) = &mut event {
                command.cancelled = self.cancel;
                if let Some(name) = &self.rename_to {
                    command.command = name.clone();
                }
            }
            self.published.push(event.clone());
            event
        }
    }

    struct ScriptedRunner {
        outcome: CommandOutcome,
        calls: Vec<(String, String)>,
    }

    impl ScriptedRunner {
        fn new(outcome: CommandOutcome) -> Self {
            Self {
                outcome,
                calls: Vec::new(),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(
            &mut self,
            command: &str,
            args: &str,
            _: &User,
            target: &MessageTarget,
            outbox: &mut Outbox,
        ) -> CommandOutcome {
            self.calls.push((command.to_string(), args.to_string()));
            if self.outcome == CommandOutcome::Success {
                outbox.send(target, format!("ran {command}"));
            }
            self.outcome.clone()
        }
    }

    fn source() -> User {
        User::new(7, "Alice".to_string(), 1)
    }

    fn target() -> MessageTarget {
        MessageTarget::Channel(Channel::new(1, "Lobby".to_string(), Some(0)))
    }

    fn intercept(
        interceptor: &CommandInterceptor,
        message: &str,
        bus: &mut RecordingBus,
        runner: &mut dyn CommandRunner,
    ) -> (Disposition, Vec<OutboundRequest>) {
        let mut outbox = Outbox::new();
        let disposition =
            interceptor.intercept(&source(), &target(), message, bus, runner, &mut outbox);
        (disposition, outbox.take())
    }

    /// A bare command yields an empty argument string.
    #[test]
    fn parse_extracts_command_without_args() {
        // Arrange
        let interceptor = CommandInterceptor::new("!");
        // Act
        let parsed = interceptor.parse("!help");
        // Assert
        assert_eq!(
            parsed,
            Some(ParsedCommand {
                command: "help",
                args: ""
            })
        );
    }

    /// Arguments keep their inner whitespace.
    #[test]
    fn parse_splits_on_first_whitespace_run() {
        // Arrange
        let interceptor = CommandInterceptor::new("!");
        // Act
        let parsed = interceptor.parse("!say   hello  world").expect("not a command");
        // Assert
        assert_eq!(parsed.command, "say");
        assert_eq!(parsed.args, "hello  world");
    }

    /// The nick placeholder resolves and matching ignores case.
    #[test]
    fn parse_matches_nick_prefix_case_insensitively() {
        // Arrange
        let mut config = MumbleConfig::new("h".to_string(), 1, "Relay".to_string());
        config.control_chars = "{NICK}: ".to_string();
        let interceptor = CommandInterceptor::from_config(&config);

        // Act
        let parsed = interceptor.parse("relay: PING now").expect("not a command");

        // Assert
        assert_eq!(interceptor.prefix(), "Relay: ");
        assert_eq!(parsed.command, "PING");
        assert_eq!(parsed.args, "now");
    }

    /// Messages without the prefix, or with nothing after it, are chat.
    #[test]
    fn parse_rejects_unprefixed_and_empty() {
        let interceptor = CommandInterceptor::new("!");
        assert!(interceptor.parse("hello").is_none());
        assert!(interceptor.parse("!").is_none());
        assert!(interceptor.parse("!   ").is_none());
        assert!(interceptor.parse("").is_none());
    }

    /// A not-found result hands the message back for chat handling.
    #[test]
    fn not_found_reports_not_a_command() {
        // Arrange
        let interceptor = CommandInterceptor::new("!");
        let mut bus = RecordingBus::default();
        let mut runner = NoopCommandRunner;

        // Act
        let (disposition, _) = intercept(&interceptor, "!help", &mut bus, &mut runner);

        // Assert
        assert_eq!(disposition, Disposition::NotACommand);
        assert!(matches!(
            bus.published.as_slice(),
            [Event::PreCommand(event)] if event.command == "help" && event.args.is_empty()
        ));
    }

    /// Successful, unauthorized and failing commands are all consumed.
    #[test]
    fn executed_commands_are_handled() {
        for outcome in [
            CommandOutcome::Success,
            CommandOutcome::Unauthorized,
            CommandOutcome::Failed("boom".to_string()),
        ] {
            // Arrange
            let interceptor = CommandInterceptor::new("!");
            let mut bus = RecordingBus::default();
            let mut runner = ScriptedRunner::new(outcome);

            // Act
            let (disposition, _) = intercept(&interceptor, "!roll 2d6", &mut bus, &mut runner);

            // Assert
            assert_eq!(disposition, Disposition::Handled);
            assert_eq!(runner.calls, vec![("roll".to_string(), "2d6".to_string())]);
        }
    }

    /// Subscribers can rewrite the command before it runs.
    #[test]
    fn runner_sees_rewritten_command() {
        // Arrange
        let interceptor = CommandInterceptor::new("!");
        let mut bus = RecordingBus {
            rename_to: Some("help".to_string()),
            ..Default::default()
        };
        let mut runner = ScriptedRunner::new(CommandOutcome::Success);

        // Act
        intercept(&interceptor, "!hlep", &mut bus, &mut runner);

        // Assert
        assert_eq!(runner.calls[0].0, "help");
    }

    /// A cancelled pre-command event stops execution.
    #[test]
    fn cancelled_command_is_not_run() {
        // Arrange
        let interceptor = CommandInterceptor::new("!");
        let mut bus = RecordingBus {
            cancel: true,
            ..Default::default()
        };
        let mut runner = ScriptedRunner::new(CommandOutcome::Success);

        // Act
        let (disposition, _) = intercept(&interceptor, "!help", &mut bus, &mut runner);

        // Assert
        assert_eq!(disposition, Disposition::Handled);
        assert!(runner.calls.is_empty());
    }

    /// Plain chat publishes nothing.
    #[test]
    fn unprefixed_message_has_no_side_effects() {
        // Arrange
        let interceptor = CommandInterceptor::new("!");
        let mut bus = RecordingBus::default();
        let mut runner = ScriptedRunner::new(CommandOutcome::Success);

        // Act
        let (disposition, _) = intercept(&interceptor, "hello", &mut bus, &mut runner);

        // Assert
        assert_eq!(disposition, Disposition::NotACommand);
        assert!(bus.published.is_empty());
        assert!(runner.calls.is_empty());
    }

    /// Replies queued by a command are handed back to the caller.
    #[test]
    fn command_replies_are_collected() {
        // Arrange
        let interceptor = CommandInterceptor::new("!");
        let mut bus = RecordingBus::default();
        let mut runner = ScriptedRunner::new(CommandOutcome::Success);

        // Act
        let (disposition, requests) = intercept(&interceptor, "!ping", &mut bus, &mut runner);

        // Assert
        assert_eq!(disposition, Disposition::Handled);
        assert!(matches!(
            requests.as_slice(),
            [OutboundRequest::Send { text, .. }] if text == "ran ping"
        ));
    }
}
