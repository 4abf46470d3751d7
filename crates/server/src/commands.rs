use serde::Serialize;
use server_api::{COUNTER_COMMAND, COUNTER_COMMAND_DESCRIPTION};

#[derive(Debug, Clone, Serialize)]
pub struct CommandDescriptor {
    pub command: &'static str,
    pub description: &'static str,
    pub provides_preview: bool,
}

/// Process-wide slash command table.
pub fn registered_commands() -> Vec<CommandDescriptor> {
    vec![CommandDescriptor {
        command: COUNTER_COMMAND,
        description: COUNTER_COMMAND_DESCRIPTION,
        provides_preview: false,
    }]
}

pub fn is_registered(command: &str) -> bool {
    registered_commands()
        .iter()
        .any(|descriptor| descriptor.command == command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_exposes_only_the_counter_command() {
        let commands = registered_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "conditionalBlockTest");
        assert!(!commands[0].provides_preview);
        assert!(is_registered("conditionalBlockTest"));
        assert!(!is_registered("someOtherCommand"));
    }
}
