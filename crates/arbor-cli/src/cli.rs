use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "arbor",
    about = "Arbor: a virtual filesystem over nested repositories",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Workspace directory holding objects, refs, and the root registry
    #[arg(short = 'C', long, global = true, default_value = ".arbor")]
    pub workspace: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a workspace
    Init,
    /// Mount a repository as a new root
    Mount(MountArgs),
    /// Remove a root (and its submodules) from the workspace
    Unmount(UnmountArgs),
    /// Rename a root
    Rename(RenameArgs),
    /// List mounted roots
    Roots,
    /// List a directory
    Ls(LsArgs),
    /// Print a file or link target
    Cat(PathArgs),
    /// Write a file
    Write(WriteArgs),
    /// Create a symlink
    Ln(LnArgs),
    /// Delete an entry
    Rm(PathArgs),
    /// Commit a repository's current changes
    Commit(CommitArgs),
    /// Discard a repository's uncommitted changes
    Revert(PathArgs),
    /// Show repositories with uncommitted changes
    Status,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum MountKindArg {
    Empty,
    Local,
    RemoteClone,
    LiveMount,
}

#[derive(Args)]
pub struct MountArgs {
    /// Requested root name; made safe and unique
    pub name: String,
    #[arg(long, value_enum, default_value = "empty")]
    pub kind: MountKindArg,
    /// Remote reference (URL or owner/name)
    #[arg(long)]
    pub remote: Option<String>,
}

#[derive(Args)]
pub struct UnmountArgs {
    /// Root name, or a regex with --pattern
    pub name: String,
    #[arg(long)]
    pub pattern: bool,
}

#[derive(Args)]
pub struct RenameArgs {
    /// Current name, or a regex with --pattern
    pub from: String,
    /// New name, or a replacement (`$1` groups allowed) with --pattern
    pub to: String,
    #[arg(long)]
    pub pattern: bool,
}

#[derive(Args)]
pub struct LsArgs {
    #[arg(default_value = "")]
    pub path: String,
}

#[derive(Args)]
pub struct PathArgs {
    pub path: String,
}

#[derive(Args)]
pub struct WriteArgs {
    pub path: String,
    /// Literal content; omitted means --from
    pub content: Option<String>,
    /// Read content from a local file
    #[arg(long, conflicts_with = "content")]
    pub from: Option<PathBuf>,
    /// Mark the file executable
    #[arg(long)]
    pub exec: bool,
    /// Pick a free name next to PATH instead of overwriting
    #[arg(long)]
    pub unique: bool,
}

#[derive(Args)]
pub struct LnArgs {
    pub path: String,
    pub target: String,
}

#[derive(Args)]
pub struct CommitArgs {
    /// Root or submodule path
    pub path: String,
    #[arg(short, long)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_init_defaults() {
        let cli = Cli::try_parse_from(["arbor", "init"]).unwrap();
        assert!(matches!(cli.command, Command::Init));
        assert_eq!(cli.workspace, PathBuf::from(".arbor"));
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["arbor", "status", "-C", "/tmp/ws", "-v"]).unwrap();
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.workspace, PathBuf::from("/tmp/ws"));
        assert!(cli.verbose);
    }

    #[test]
    fn parse_mount_kind() {
        let cli = Cli::try_parse_from(["arbor", "mount", "notes"]).unwrap();
        if let Command::Mount(args) = cli.command {
            assert_eq!(args.name, "notes");
            assert!(matches!(args.kind, MountKindArg::Empty));
            assert_eq!(args.remote, None);
        } else { panic!("wrong command"); }

        let cli = Cli::try_parse_from([
            "arbor", "mount", "site", "--kind", "remote-clone", "--remote", "me/site",
        ])
        .unwrap();
        if let Command::Mount(args) = cli.command {
            assert!(matches!(args.kind, MountKindArg::RemoteClone));
            assert_eq!(args.remote.as_deref(), Some("me/site"));
        } else { panic!("wrong command"); }

        assert!(Cli::try_parse_from(["arbor", "mount", "x", "--kind", "bogus"]).is_err());
    }

    #[test]
    fn parse_unmount_pattern() {
        let cli = Cli::try_parse_from(["arbor", "unmount", "^tmp-", "--pattern"]).unwrap();
        if let Command::Unmount(args) = cli.command {
            assert_eq!(args.name, "^tmp-");
            assert!(args.pattern);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_rename() {
        let cli = Cli::try_parse_from(["arbor", "rename", "old", "new"]).unwrap();
        if let Command::Rename(args) = cli.command {
            assert_eq!((args.from.as_str(), args.to.as_str()), ("old", "new"));
            assert!(!args.pattern);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_ls_defaults_to_top_level() {
        let cli = Cli::try_parse_from(["arbor", "ls"]).unwrap();
        if let Command::Ls(args) = cli.command {
            assert_eq!(args.path, "");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_write_flags() {
        let cli = Cli::try_parse_from([
            "arbor", "write", "proj/run.sh", "echo hi", "--exec", "--unique",
        ])
        .unwrap();
        if let Command::Write(args) = cli.command {
            assert_eq!(args.path, "proj/run.sh");
            assert_eq!(args.content.as_deref(), Some("echo hi"));
            assert!(args.exec && args.unique);
            assert_eq!(args.from, None);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn write_content_conflicts_with_from() {
        let cli = Cli::try_parse_from(["arbor", "write", "proj/a", "--from", "local.txt"]).unwrap();
        if let Command::Write(args) = cli.command {
            assert_eq!(args.from, Some(PathBuf::from("local.txt")));
            assert_eq!(args.content, None);
        } else { panic!("wrong command"); }

        assert!(Cli::try_parse_from(["arbor", "write", "proj/a", "text", "--from", "local.txt"]).is_err());
    }

    #[test]
    fn parse_ln() {
        let cli = Cli::try_parse_from(["arbor", "ln", "proj/latest", "releases/v2"]).unwrap();
        if let Command::Ln(args) = cli.command {
            assert_eq!(args.path, "proj/latest");
            assert_eq!(args.target, "releases/v2");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_commit_requires_message() {
        let cli = Cli::try_parse_from(["arbor", "commit", "proj", "-m", "first"]).unwrap();
        if let Command::Commit(args) = cli.command {
            assert_eq!(args.path, "proj");
            assert_eq!(args.message, "first");
        } else { panic!("wrong command"); }

        assert!(Cli::try_parse_from(["arbor", "commit", "proj"]).is_err());
    }

    #[test]
    fn parse_path_commands() {
        for name in ["cat", "rm", "revert"] {
            let cli = Cli::try_parse_from(["arbor", name, "proj/file"]).unwrap();
            let path = match cli.command {
                Command::Cat(args) | Command::Rm(args) | Command::Revert(args) => args.path,
                _ => panic!("wrong command for {name}"),
            };
            assert_eq!(path, "proj/file");
        }
    }
}
