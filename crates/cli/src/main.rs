// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Portvault Contributors

// Portvault - CLI
// Thin shell over portvault-core: owns the live tunnel list, prompts for
// passwords, renders errors. No tunnel or crypto logic lives here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{ContentArrangement, Table};
use dialoguer::{Confirm, Password};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portvault_core::{
    default_session_path, format_host_port, is_loopback_address, load_session, save_session,
    Forwarder, RusshForwarder, Tunnel, TunnelSpec,
};

#[derive(Parser)]
#[command(name = "portvault")]
#[command(about = "Encrypted SSH tunnel session manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Session file (defaults to the per-user config directory)
    #[arg(short = 'f', long, global = true)]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty session file
    Init,

    /// Add a tunnel to the session
    Add {
        /// Tunnel name
        name: String,

        /// Local address to bind
        #[arg(short = 'b', long, default_value = "127.0.0.1")]
        local_ip: String,

        /// Local port to listen on
        #[arg(short = 'l', long)]
        local_port: u16,

        /// Destination host, reached through the SSH server
        #[arg(short = 'H', long)]
        host_ip: String,

        /// Destination port
        #[arg(short = 'p', long)]
        host_port: u16,

        /// SSH server address (defaults to the destination host)
        #[arg(short = 's', long)]
        server_ip: Option<String>,

        /// SSH server port
        #[arg(short = 'P', long, default_value = "22")]
        server_port: u16,

        /// SSH username
        #[arg(short = 'u', long)]
        user: String,

        /// Replace an existing tunnel with the same name
        #[arg(long)]
        force: bool,
    },

    /// List tunnels in the session
    List,

    /// Print one tunnel's full description
    Show {
        /// Tunnel name
        name: String,
    },

    /// Remove a tunnel by name
    Remove {
        /// Tunnel name
        name: String,
    },

    /// Start tunnels and forward until interrupted
    Up {
        /// Tunnel names to start (all when omitted)
        names: Vec<String>,
    },
}

struct AddArgs {
    name: String,
    local_ip: String,
    local_port: u16,
    host_ip: String,
    host_port: u16,
    server_ip: Option<String>,
    server_port: u16,
    user: String,
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portvault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let session_file = match &cli.file {
        Some(path) => path.clone(),
        None => default_session_path()?,
    };

    match cli.command {
        Commands::Init => init_session(&session_file),
        Commands::Add {
            name,
            local_ip,
            local_port,
            host_ip,
            host_port,
            server_ip,
            server_port,
            user,
            force,
        } => add_tunnel(
            &session_file,
            AddArgs {
                name,
                local_ip,
                local_port,
                host_ip,
                host_port,
                server_ip,
                server_port,
                user,
                force,
            },
        ),
        Commands::List => list_tunnels(&session_file),
        Commands::Show { name } => show_tunnel(&session_file, &name),
        Commands::Remove { name } => remove_tunnel(&session_file, &name),
        Commands::Up { names } => run_tunnels(&session_file, names).await,
    }
}

fn forwarder() -> Arc<dyn Forwarder> {
    Arc::new(RusshForwarder::new())
}

fn prompt_session_password(confirm: bool) -> Result<String> {
    let mut prompt = Password::new().with_prompt("Session password");
    if confirm {
        prompt = prompt.with_confirmation("Confirm session password", "Passwords do not match");
    }
    Ok(prompt.interact()?)
}

fn require_session_file(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "No session file at {}. Run `portvault init` first.",
            path.display()
        );
    }
    Ok(())
}

fn open_session(path: &Path, password: &str) -> Result<Vec<Tunnel>> {
    load_session(path, password, forwarder())
        .with_context(|| format!("Failed to load session from {}", path.display()))
}

fn init_session(path: &Path) -> Result<()> {
    if path.exists() {
        let overwrite = Confirm::new()
            .with_prompt(format!(
                "{} already exists. Overwrite with an empty session?",
                path.display()
            ))
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Aborted.");
            return Ok(());
        }
    }

    let password = prompt_session_password(true)?;
    save_session(&[], path, &password)?;
    println!("{} Created empty session at {}", "✓".green(), path.display());
    Ok(())
}

fn add_tunnel(path: &Path, args: AddArgs) -> Result<()> {
    require_session_file(path)?;
    let session_password = prompt_session_password(false)?;
    let mut tunnels = open_session(path, &session_password)?;

    if !args.force && tunnels.iter().any(|t| t.name() == args.name) {
        bail!(
            "Tunnel '{}' already exists (use --force to replace it)",
            args.name
        );
    }

    if !is_loopback_address(&args.local_ip) {
        eprintln!(
            "{} {} is not a loopback address; the forwarded port will be reachable from other hosts",
            "warning:".yellow().bold(),
            args.local_ip
        );
    }

    let ssh_password = Password::new()
        .with_prompt(format!(
            "SSH password for {}@{}",
            args.user,
            args.server_ip.as_deref().unwrap_or(&args.host_ip)
        ))
        .interact()?;

    let spec = TunnelSpec::new(
        args.name.clone(),
        args.local_ip,
        args.local_port,
        args.host_ip,
        args.host_port,
        args.server_ip,
        args.server_port,
        args.user,
        ssh_password,
    )?;

    // Replacement swaps the list entry wholesale; nothing is edited in place.
    let tunnel = Tunnel::new(spec, forwarder());
    match tunnels.iter().position(|t| t.name() == args.name) {
        Some(index) => tunnels[index] = tunnel,
        None => tunnels.push(tunnel),
    }

    save_session(&tunnels, path, &session_password)?;
    println!("{} Added tunnel '{}'", "✓".green(), args.name);
    Ok(())
}

fn list_tunnels(path: &Path) -> Result<()> {
    require_session_file(path)?;
    let password = prompt_session_password(false)?;
    let tunnels = open_session(path, &password)?;

    if tunnels.is_empty() {
        println!("No tunnels in session.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Name", "Local", "Destination", "SSH Server", "User"]);
    for tunnel in &tunnels {
        let spec = tunnel.spec();
        table.add_row(vec![
            spec.name.clone(),
            format_host_port(&spec.local_ip, spec.local_port),
            format_host_port(&spec.host_ip, spec.host_port),
            format_host_port(&spec.server_ip, spec.server_port),
            spec.user.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn show_tunnel(path: &Path, name: &str) -> Result<()> {
    require_session_file(path)?;
    let password = prompt_session_password(false)?;
    let tunnels = open_session(path, &password)?;

    match tunnels.iter().find(|t| t.name() == name) {
        Some(tunnel) => {
            println!("{}", tunnel.describe());
            Ok(())
        }
        None => bail!("No tunnel named '{name}' in session"),
    }
}

fn remove_tunnel(path: &Path, name: &str) -> Result<()> {
    require_session_file(path)?;
    let password = prompt_session_password(false)?;
    let mut tunnels = open_session(path, &password)?;

    let Some(index) = tunnels.iter().position(|t| t.name() == name) else {
        bail!("No tunnel named '{name}' in session");
    };
    tunnels.remove(index);

    save_session(&tunnels, path, &password)?;
    println!("{} Removed tunnel '{}'", "✓".green(), name);
    Ok(())
}

async fn run_tunnels(path: &Path, names: Vec<String>) -> Result<()> {
    require_session_file(path)?;
    let password = prompt_session_password(false)?;
    let mut tunnels = open_session(path, &password)?;

    if tunnels.is_empty() {
        bail!("Session has no tunnels; add one with `portvault add`");
    }

    if !names.is_empty() {
        for name in &names {
            if !tunnels.iter().any(|t| t.name() == name.as_str()) {
                bail!("No tunnel named '{name}' in session");
            }
        }
        tunnels.retain(|t| names.iter().any(|n| n == t.name()));
    }

    let mut started = 0;
    for tunnel in tunnels.iter_mut() {
        match tunnel.start().await {
            Ok(()) => {
                println!("{} {}", "✓".green(), tunnel.describe());
                started += 1;
            }
            Err(e) => eprintln!("{} {}", "✗".red(), e),
        }
    }
    if started == 0 {
        bail!("No tunnels could be started");
    }

    println!("{started} tunnel(s) up. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;

    for tunnel in tunnels.iter_mut() {
        tunnel.stop().await;
    }
    println!("All tunnels stopped.");
    Ok(())
}
