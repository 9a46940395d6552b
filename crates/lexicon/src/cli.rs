use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Lexicon: offline-first dictionary with built-in updates.
#[derive(Debug, Parser)]
#[command(name = "lexicon", version, about)]
pub struct Cli {
    /// Settings file to use instead of the one in the config directory.
    #[arg(short, long, env = "LEXICON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Keep config, cache and data under this directory.
    #[arg(long, env = "LEXICON_ROOT_DIR")]
    pub root_dir: Option<PathBuf>,

    /// Executable that updates replace.
    #[arg(long, env = "LEXICON_INSTALL_PATH")]
    pub install_path: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Subcommand to run. Without one, Lexicon starts normally.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Report whether a newer release exists.
    Check,

    /// Download and install the latest release.
    Update {
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Repair or remove leftovers of interrupted updates.
    Cleanup,

    /// Open the release page in the browser.
    ReleasePage,
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Command};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_normal_launch() {
        let cli = Cli::try_parse_from(["lexicon"]).expect("bare invocation parses");
        assert!(cli.command.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn update_accepts_yes_flag() {
        let cli = Cli::try_parse_from(["lexicon", "--debug", "update", "--yes"])
            .expect("update parses");
        assert!(cli.debug);
        assert!(matches!(cli.command, Some(Command::Update { yes: true })));
    }

    #[test]
    fn install_path_is_global() {
        let cli = Cli::try_parse_from(["lexicon", "--install-path", "/opt/lexicon/lexicon", "check"])
            .expect("check parses");
        assert_eq!(
            cli.install_path.as_deref(),
            Some(std::path::Path::new("/opt/lexicon/lexicon"))
        );
        assert!(matches!(cli.command, Some(Command::Check)));
    }
}
