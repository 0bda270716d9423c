//! [`CommandSource`] – where the control loop gets its velocity command.

use loco_types::Command;

/// Best-effort provider of the most recent velocity command.
///
/// Implementations must return immediately; `None` means "nothing new",
/// and the caller keeps whatever command it already had.
pub trait CommandSource: Send {
    fn latest_command(&mut self) -> Option<Command>;
}

/// A source that always yields the same command.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCommand(pub Command);

impl FixedCommand {
    pub fn new(command: Command) -> Self {
        Self(command)
    }
}

impl CommandSource for FixedCommand {
    fn latest_command(&mut self) -> Option<Command> {
        Some(self.0)
    }
}

impl<S: CommandSource + ?Sized> CommandSource for Box<S> {
    fn latest_command(&mut self) -> Option<Command> {
        (**self).latest_command()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_command_repeats() {
        let mut src = FixedCommand::new(Command::new(0.2, 0.0, -0.1));
        assert_eq!(src.latest_command(), Some(Command::new(0.2, 0.0, -0.1)));
        assert_eq!(src.latest_command(), Some(Command::new(0.2, 0.0, -0.1)));
    }

    #[test]
    fn boxed_source_delegates() {
        let mut src: Box<dyn CommandSource> = Box::new(FixedCommand::default());
        assert_eq!(src.latest_command(), Some(Command::zero()));
    }
}
