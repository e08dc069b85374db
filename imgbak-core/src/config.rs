//! Settings for the external tools the library drives.
use std::process::Command;

/// Block size handed to `dd` when none is configured.
pub const DEFAULT_BLOCK_SIZE: &str = "1M";

/// Which programs to run and how to run them.
///
/// Front ends usually fill this from command-line flags. [`ToolConfig::default`]
/// matches a stock Linux system: `fdisk`, `dd`, 1 MiB blocks and `sudo` when
/// not already root.
#[derive(Clone, Debug)]
pub struct ToolConfig {
    /// The listing tool (`fdisk`).
    pub fdisk_program: String,
    /// The duplication tool (`dd`).
    pub dd_program: String,
    /// Value of the `bs=` operand.
    pub block_size: String,
    /// Prefix commands with `sudo` when the current user is not root.
    pub use_sudo: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            fdisk_program: "fdisk".to_string(),
            dd_program: "dd".to_string(),
            block_size: DEFAULT_BLOCK_SIZE.to_string(),
            use_sudo: true,
        }
    }
}

impl ToolConfig {
    /// Whether commands built from this config will go through `sudo`.
    pub fn needs_sudo(&self) -> bool {
        self.use_sudo && !is_root()
    }

    /// Builds a [`Command`] for `program`, elevated through `sudo` if needed.
    pub(crate) fn command(&self, program: &str) -> Command {
        if self.needs_sudo() {
            let mut command = Command::new("sudo");
            command.arg(program);
            command
        } else {
            Command::new(program)
        }
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_sudo_runs_program_directly() {
        let config = ToolConfig {
            use_sudo: false,
            ..ToolConfig::default()
        };
        let command = config.command("fdisk");
        assert_eq!(command.get_program(), "fdisk");
        assert_eq!(command.get_args().count(), 0);
    }

    #[test]
    fn sudo_wraps_program_for_regular_users() {
        let config = ToolConfig::default();
        let command = config.command("dd");
        if config.needs_sudo() {
            assert_eq!(command.get_program(), "sudo");
            assert_eq!(command.get_args().next().unwrap(), "dd");
        } else {
            assert_eq!(command.get_program(), "dd");
        }
    }
}
