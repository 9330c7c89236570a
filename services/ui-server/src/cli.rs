//! The command-line surface: `serve` (the default), one-shot
//! push-message clients speaking over the backend socket, and
//! site-bundle management delegating to `uibundle`. Structured the way
//! the pack's `r2e-cli`-style binaries split a `clap` derive enum from
//! the actual subcommand bodies.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use uiconfig::Overrides;
use uiproto::VarId;

use crate::push;

#[derive(Debug, Parser)]
#[command(name = "ui-server", about = "Session-scoped reactive variable-tree server")]
pub struct Cli {
    /// Defaults to `serve` with no extra flags when omitted — pass
    /// `serve --host ... --port ...` explicitly to set serve flags.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the server (the default when no subcommand is given).
    Serve(ServeArgs),
    /// Push a `create` message over the backend socket.
    Create(CreateArgs),
    /// Push a `destroy` message over the backend socket.
    Destroy(VarArgs),
    /// Push an `update` message over the backend socket.
    Update(UpdateArgs),
    /// Push a `watch` message over the backend socket.
    Watch(VarArgs),
    /// Push an `unwatch` message over the backend socket.
    Unwatch(VarArgs),
    /// Push a `get` message over the backend socket and print the reply.
    Get(GetArgs),
    /// Drain pending push messages for a session, optionally long-polling.
    Poll(PollArgs),
    /// Append a site directory to a copy of the current executable.
    Bundle(BundleArgs),
    /// Extract the embedded or standalone bundle to a directory.
    Extract(ExtractArgs),
    /// List the entries of the embedded or standalone bundle.
    Ls(BundlePathArgs),
    /// Print one entry of the embedded or standalone bundle to stdout.
    Cat(CatArgs),
    /// Copy one entry of the embedded or standalone bundle to a file.
    Cp(CpArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub socket: Option<PathBuf>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub session_timeout: Option<String>,
    #[arg(long)]
    pub connection_grace_period: Option<String>,
}

impl ServeArgs {
    pub fn to_overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            socket_path: self.socket.clone(),
            session_timeout: self.session_timeout.clone(),
            connection_grace_period: self.connection_grace_period.clone(),
        }
    }
}

/// Flags every push-message subcommand shares: where the backend socket
/// lives and which session the message is addressed to.
#[derive(Debug, Clone, Args)]
pub struct PushTarget {
    #[arg(long, default_value = "/tmp/ui.sock")]
    pub socket: PathBuf,
    #[arg(long)]
    pub session: u64,
}

#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    #[command(flatten)]
    pub target: PushTarget,
    #[arg(long)]
    pub parent_id: Option<VarId>,
    #[arg(long, value_parser = parse_json)]
    pub value: Option<Value>,
    #[arg(long = "property", value_parser = parse_kv)]
    pub properties: Vec<(String, String)>,
    #[arg(long)]
    pub nowatch: bool,
    #[arg(long)]
    pub unbound: bool,
}

#[derive(Debug, Clone, Args)]
pub struct VarArgs {
    #[command(flatten)]
    pub target: PushTarget,
    pub var_id: VarId,
}

#[derive(Debug, Clone, Args)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub target: PushTarget,
    pub var_id: VarId,
    #[arg(long, value_parser = parse_json)]
    pub value: Option<Value>,
    #[arg(long = "property", value_parser = parse_kv)]
    pub properties: Vec<(String, String)>,
}

#[derive(Debug, Clone, Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: PushTarget,
    pub var_ids: Vec<VarId>,
}

#[derive(Debug, Clone, Args)]
pub struct PollArgs {
    #[command(flatten)]
    pub target: PushTarget,
    /// Milliseconds to long-poll for before returning an empty result.
    #[arg(long)]
    pub wait: Option<u64>,
    /// Frontend HTTP listener to poll — `poll` is an HTTP endpoint
    /// (spec.md §6), unlike the other push subcommands.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

#[derive(Debug, Clone, Args)]
pub struct BundleArgs {
    pub site_dir: PathBuf,
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    pub out_dir: PathBuf,
    #[arg(long)]
    pub from: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct BundlePathArgs {
    #[arg(long)]
    pub from: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CatArgs {
    pub entry: String,
    #[arg(long)]
    pub from: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CpArgs {
    pub entry: String,
    pub out: PathBuf,
    #[arg(long)]
    pub from: Option<PathBuf>,
}

fn parse_json(s: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(s)
}

fn parse_kv(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

/// Dispatches every non-`serve` subcommand and returns the process exit
/// code (spec.md §6: 0 success, 1 usage error, 2 runtime error).
pub async fn dispatch(command: Command) -> i32 {
    match command {
        Command::Serve(_) => unreachable!("serve is handled in main before dispatch"),
        Command::Create(args) => push::create(args).await,
        Command::Destroy(args) => push::destroy(args).await,
        Command::Update(args) => push::update(args).await,
        Command::Watch(args) => push::watch(args).await,
        Command::Unwatch(args) => push::unwatch(args).await,
        Command::Get(args) => push::get(args).await,
        Command::Poll(args) => push::poll(args).await,
        Command::Bundle(args) => bundle_site(args),
        Command::Extract(args) => extract_site(args),
        Command::Ls(args) => list_site(args),
        Command::Cat(args) => cat_entry(args),
        Command::Cp(args) => cp_entry(args),
    }
}

fn open_archive(
    from: &Option<PathBuf>,
) -> Result<zip::ZipArchive<std::fs::File>, uibundle::ArchiveError> {
    match from {
        Some(path) => uibundle::open_standalone(path),
        None => uibundle::open_embedded(),
    }
}

fn bundle_site(args: BundleArgs) -> i32 {
    let current_exe = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("error: could not locate current executable: {e}");
            return 2;
        }
    };
    let out = args.out.unwrap_or_else(|| {
        let mut out = current_exe.clone();
        out.set_file_name(format!(
            "{}-bundled",
            current_exe.file_name().unwrap_or_default().to_string_lossy()
        ));
        out
    });
    match uibundle::bundle(&current_exe, &args.site_dir, &out) {
        Ok(()) => {
            println!("wrote {}", out.display());
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}

fn extract_site(args: ExtractArgs) -> i32 {
    let mut archive = match open_archive(&args.from) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&args.out_dir) {
        eprintln!("error: {e}");
        return 2;
    }
    let names = match uibundle::list_entries(&mut archive) {
        Ok(names) => names,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };
    for name in names {
        if name.ends_with('/') {
            continue;
        }
        let dest = args.out_dir.join(&name);
        if let Err(e) = uibundle::copy_entry_to(&mut archive, &name, &dest) {
            eprintln!("error extracting {name}: {e}");
            return 2;
        }
    }
    0
}

fn list_site(args: BundlePathArgs) -> i32 {
    let mut archive = match open_archive(&args.from) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };
    match uibundle::list_entries(&mut archive) {
        Ok(names) => {
            for name in names {
                println!("{name}");
            }
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}

fn cat_entry(args: CatArgs) -> i32 {
    let mut archive = match open_archive(&args.from) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };
    match uibundle::read_entry(&mut archive, &args.entry) {
        Ok(bytes) => {
            use std::io::Write;
            let _ = std::io::stdout().write_all(&bytes);
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}

fn cp_entry(args: CpArgs) -> i32 {
    let mut archive = match open_archive(&args.from) {
        Ok(archive) => archive,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };
    match uibundle::copy_entry_to(&mut archive, &args.entry, &args.out) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            2
        }
    }
}
