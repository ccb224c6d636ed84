use std::io::Write as _;

use anyhow::{bail, Context};
use arbor_store::{Blob, Commit, Object, Signature};
use arbor_types::{Entry, EntryMode};
use arbor_vfs::{MountKind, RepoConfig};
use colored::Colorize;
use regex::Regex;

use crate::cli::*;
use crate::workspace::Workspace;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    if let Command::Init = cli.command {
        return cmd_init(&cli).await;
    }
    let ws = Workspace::open(&cli.workspace).await?;
    let result = match cli.command {
        Command::Init => Ok(()),
        Command::Mount(args) => cmd_mount(&ws, args),
        Command::Unmount(args) => cmd_unmount(&ws, args),
        Command::Rename(args) => cmd_rename(&ws, args),
        Command::Roots => cmd_roots(&ws),
        Command::Ls(args) => cmd_ls(&ws, args).await,
        Command::Cat(args) => cmd_cat(&ws, args).await,
        Command::Write(args) => cmd_write(&ws, args).await,
        Command::Ln(args) => cmd_ln(&ws, args).await,
        Command::Rm(args) => cmd_rm(&ws, args).await,
        Command::Commit(args) => cmd_commit(&ws, args).await,
        Command::Revert(args) => cmd_revert(&ws, args).await,
        Command::Status => cmd_status(&ws),
    };
    // Expansions and discoveries done by reads are worth keeping even when
    // the command itself failed.
    ws.persist().await?;
    result
}

async fn cmd_init(cli: &Cli) -> anyhow::Result<()> {
    Workspace::init(&cli.workspace).await?;
    println!(
        "{} Initialized arbor workspace in {}",
        "✓".green().bold(),
        cli.workspace.display().to_string().bold()
    );
    Ok(())
}

fn mount_kind(kind: MountKindArg) -> MountKind {
    match kind {
        MountKindArg::Empty => MountKind::Empty,
        MountKindArg::Local => MountKind::Local,
        MountKindArg::RemoteClone => MountKind::RemoteClone,
        MountKindArg::LiveMount => MountKind::LiveMount,
    }
}

fn cmd_mount(ws: &Workspace, args: MountArgs) -> anyhow::Result<()> {
    let mut config = RepoConfig::new(mount_kind(args.kind));
    if let Some(remote) = args.remote {
        config = config.with_remote(remote);
    }
    let name = ws.vfs().add_root(&args.name, config);
    println!("{} Mounted {}", "✓".green().bold(), name.yellow());
    if name != args.name {
        println!("  (requested {})", args.name.dimmed());
    }
    Ok(())
}

fn cmd_unmount(ws: &Workspace, args: UnmountArgs) -> anyhow::Result<()> {
    if args.pattern {
        let pattern = Regex::new(&args.name).context("invalid root pattern")?;
        let removed = ws.vfs().remove_roots_matching(&pattern);
        if removed.is_empty() {
            println!("No roots match {}.", args.name.yellow());
        }
        for name in removed {
            println!("  {} {}", "unmounted:".red(), name);
        }
    } else {
        ws.vfs().remove_root(&args.name)?;
        println!("{} Unmounted {}", "✓".green().bold(), args.name.yellow());
    }
    Ok(())
}

fn cmd_rename(ws: &Workspace, args: RenameArgs) -> anyhow::Result<()> {
    if args.pattern {
        let pattern = Regex::new(&args.from).context("invalid root pattern")?;
        let renamed = ws.vfs().rename_roots_matching(&pattern, &args.to);
        if renamed.is_empty() {
            println!("No roots match {}.", args.from.yellow());
        }
        for (old, new) in renamed {
            println!("  {} -> {}", old, new.yellow());
        }
    } else {
        let name = ws.vfs().rename_root(&args.from, &args.to)?;
        println!(
            "{} Renamed {} to {}",
            "✓".green().bold(),
            args.from,
            name.yellow()
        );
    }
    Ok(())
}

fn cmd_roots(ws: &Workspace) -> anyhow::Result<()> {
    let names = ws.vfs().list_root_names();
    if names.is_empty() {
        println!("No roots mounted.");
        return Ok(());
    }
    for name in names {
        let Some(config) = ws.vfs().lookup(&name) else {
            continue;
        };
        let head = config
            .head
            .map(|id| id.short_hex())
            .unwrap_or_else(|| "-".into());
        let remote = config.remote_ref.as_deref().unwrap_or("");
        println!(
            "{:<24} {:<12} {} {}",
            name.yellow().bold(),
            format!("{:?}", config.mount).to_lowercase(),
            head.dimmed(),
            remote.blue()
        );
    }
    Ok(())
}

async fn cmd_ls(ws: &Workspace, args: LsArgs) -> anyhow::Result<()> {
    let (tree, _) = ws.vfs().read_tree(&args.path).await?;
    for entry in &tree.entries {
        let name = match entry.mode {
            EntryMode::Tree => format!("{}/", entry.name).blue().bold(),
            EntryMode::Commit => format!("{}/", entry.name).yellow().bold(),
            EntryMode::Executable => entry.name.green(),
            EntryMode::Symlink => entry.name.cyan(),
            EntryMode::Regular => entry.name.normal(),
        };
        println!(
            "{:<7} {} {}",
            entry.mode.name(),
            entry.hash.short_hex().dimmed(),
            name
        );
    }
    Ok(())
}

async fn cmd_cat(ws: &Workspace, args: PathArgs) -> anyhow::Result<()> {
    let resolved = ws.vfs().read_entry(&args.path).await?;
    let Some(entry) = resolved.entry else {
        bail!("{}: no such entry", args.path);
    };
    match entry.mode {
        EntryMode::Symlink => {
            let (target, _) = ws.vfs().read_link(&args.path).await?;
            println!("{target}");
        }
        EntryMode::Regular | EntryMode::Executable => {
            let (data, _) = ws.vfs().read_file(&args.path).await?;
            std::io::stdout().write_all(&data)?;
        }
        mode => bail!("{}: is a {}", args.path, mode.name()),
    }
    Ok(())
}

async fn cmd_write(ws: &Workspace, args: WriteArgs) -> anyhow::Result<()> {
    let data = match (args.content, args.from) {
        (Some(content), _) => content.into_bytes(),
        (None, Some(file)) => tokio::fs::read(&file)
            .await
            .with_context(|| format!("reading {}", file.display()))?,
        (None, None) => bail!("nothing to write: pass CONTENT or --from"),
    };
    let path = if args.unique {
        ws.vfs().make_unique(&args.path).await?
    } else {
        args.path
    };
    let hash = if args.exec {
        let hash = ws.vfs().save_as(&path, &Object::Blob(Blob::new(data))).await?;
        ws.vfs()
            .write_entry(&path, Some(Entry::new(EntryMode::Executable, hash)))
            .await?;
        hash
    } else {
        ws.vfs().write_file(&path, data).await?
    };
    println!(
        "{} Wrote {} {}",
        "✓".green().bold(),
        path.bold(),
        hash.short_hex().dimmed()
    );
    Ok(())
}

async fn cmd_ln(ws: &Workspace, args: LnArgs) -> anyhow::Result<()> {
    ws.vfs().write_link(&args.path, &args.target).await?;
    println!(
        "{} Linked {} -> {}",
        "✓".green().bold(),
        args.path.bold(),
        args.target.cyan()
    );
    Ok(())
}

async fn cmd_rm(ws: &Workspace, args: PathArgs) -> anyhow::Result<()> {
    ws.vfs().delete_entry(&args.path).await?;
    println!("  {} {}", "deleted:".red(), args.path);
    Ok(())
}

async fn cmd_commit(ws: &Workspace, args: CommitArgs) -> anyhow::Result<()> {
    let (_, hashes) = ws.vfs().read_commit(&args.path).await?;
    if hashes.head_tree == Some(hashes.current_tree) {
        println!("Nothing to commit in {}.", args.path.yellow());
        return Ok(());
    }
    let user = &ws.config().user;
    let commit = Commit {
        tree: hashes.current_tree,
        parents: hashes.head.into_iter().collect(),
        author: Signature::now(&user.name, &user.email),
        message: args.message,
    };
    let hash = ws.vfs().write_commit(&args.path, commit).await?;
    println!("{} Committed {}", "✓".green().bold(), args.path.yellow());
    println!("  Commit: {}", hash.short_hex().yellow());
    println!("  Tree:   {}", hashes.current_tree.short_hex().dimmed());
    Ok(())
}

async fn cmd_revert(ws: &Workspace, args: PathArgs) -> anyhow::Result<()> {
    ws.vfs().revert_to_head(&args.path).await?;
    println!(
        "{} Reverted {} to head",
        "✓".green().bold(),
        args.path.yellow()
    );
    Ok(())
}

fn cmd_status(ws: &Workspace) -> anyhow::Result<()> {
    let snapshot = ws.vfs().snapshot();
    let dirty: Vec<_> = snapshot.roots.iter().filter(|c| c.is_dirty()).collect();
    if dirty.is_empty() {
        println!("No uncommitted changes.");
        return Ok(());
    }
    println!("Repositories with uncommitted changes:");
    for config in dirty {
        let head = config
            .head
            .map(|id| id.short_hex())
            .unwrap_or_else(|| "-".into());
        let current = config
            .current
            .map(|id| id.short_hex())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {} {} {} {}",
            "modified:".yellow(),
            config.name.bold(),
            head.dimmed(),
            format!("-> {current}").dimmed()
        );
    }
    Ok(())
}
