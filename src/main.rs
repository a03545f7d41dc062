use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tidemark::core::{BootOptions, CoreError, SyncCore};
use tidemark::notify::{Notifier, NullNotifier};
use tidemark::storage::{FileStore, KeyValueStore, StorageError};
use tidemark::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use tokio::sync::mpsc;
use tracing::debug;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    match cli.command {
        Some(Command::Edit) | None => handle_edit().await,
        Some(Command::New) => handle_new().await,
        Some(Command::Open(args)) => handle_open(args).await,
        Some(Command::Export(args)) => handle_export(args).await,
        Some(Command::Push(args)) => handle_push(args).await,
        Some(Command::Pull(args)) => handle_pull(args).await,
        Some(Command::Ls(args)) => handle_ls(args).await,
        Some(Command::Share(args)) => handle_share(args).await,
        Some(Command::Config(args)) => handle_config(args).await,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tidemark",
    about = "Markdown scratchpad that keeps itself saved, locally and to a remote folder",
    author,
    version
)]
struct Cli {
    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "TIDEMARK_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "TIDEMARK_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append stdin lines to the document with live autosave (default)
    Edit,
    /// Reset the document to empty
    New,
    /// Replace the document with a local file's contents
    Open(OpenArgs),
    /// Write the document out as a markdown file
    Export(ExportArgs),
    /// Upload the document to the remote folder
    Push(PushArgs),
    /// Download a remote file into the document
    Pull(PullArgs),
    /// List the files in the remote folder
    Ls(AuthArgs),
    /// Publish the document as a gist
    Share(ShareArgs),
    /// Show or change the remote settings
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(value_name = "PATH", help = "File to load, decoded as UTF-8")]
    path: PathBuf,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(value_name = "PATH", help = "Destination path (defaults to ./note.md)")]
    path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct AuthArgs {
    #[arg(
        long,
        env = "TIDEMARK_PASS",
        hide_env_values = true,
        value_name = "SECRET",
        help = "Remote password for this invocation (otherwise the stored secret is used)"
    )]
    pass: Option<String>,
}

#[derive(Args, Debug)]
struct PushArgs {
    #[arg(
        value_name = "FILENAME",
        help = "Remote filename (defaults to the tracked one)"
    )]
    filename: Option<String>,

    #[command(flatten)]
    auth: AuthArgs,
}

#[derive(Args, Debug)]
struct PullArgs {
    #[arg(value_name = "FILENAME")]
    filename: String,

    #[command(flatten)]
    auth: AuthArgs,
}

#[derive(Args, Debug)]
struct ShareArgs {
    #[arg(long, value_name = "TEXT", help = "Gist description")]
    description: Option<String>,

    #[arg(long, action = clap::ArgAction::SetTrue, help = "Create a public gist")]
    public: bool,

    #[arg(
        long,
        env = "GITHUB_TOKEN",
        hide_env_values = true,
        value_name = "TOKEN",
        help = "Personal access token (anonymous without one)"
    )]
    token: Option<String>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the stored settings (the secret stays hidden)
    Show,
    /// Update settings fields; omitted fields keep their value
    Set(SetArgs),
    /// Apply a JSON settings payload from a file
    Import(ImportArgs),
}

#[derive(Args, Debug)]
struct SetArgs {
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    #[arg(long, value_name = "NAME")]
    user: Option<String>,

    #[arg(long, value_name = "PATH")]
    folder: Option<String>,

    #[arg(long, value_name = "BOOL")]
    remember: Option<bool>,

    #[arg(
        long,
        env = "TIDEMARK_PASS",
        hide_env_values = true,
        value_name = "SECRET",
        help = "New password; pass an empty string to clear the stored one"
    )]
    pass: Option<String>,

    #[arg(
        long,
        action = clap::ArgAction::SetTrue,
        help = "Also store the password durably (needs remember)"
    )]
    persist_secret: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(value_name = "PATH", help = "JSON file with url/user/folder/remember/pass")]
    path: PathBuf,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

/// Status messages land on stderr so piped document output stays clean.
struct PrintNotifier;

impl Notifier for PrintNotifier {
    fn status(&self, text: &str, _revert_after: Option<Duration>) {
        eprintln!("[tidemark] {text}");
    }
}

fn boot_core(notifier: Arc<dyn Notifier>) -> Result<SyncCore, CliError> {
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open_default()?);
    let mut options = BootOptions::new(store);
    options.notifier = notifier;
    Ok(SyncCore::boot(options))
}

fn boot_quiet() -> Result<SyncCore, CliError> {
    boot_core(Arc::new(NullNotifier))
}

async fn handle_edit() -> Result<(), CliError> {
    let core = boot_core(Arc::new(PrintNotifier))?;
    print!("{}", core.snapshot());
    eprintln!("[tidemark] appending lines to the document, finish with Ctrl-D");

    let (tx, mut rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = rx.recv().await {
        let mut text = core.snapshot();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&line);
        text.push('\n');
        core.load_document(text);
    }

    core.flush_local()?;
    core.teardown().await;
    eprintln!("[tidemark] document saved to the local cache");
    Ok(())
}

async fn handle_new() -> Result<(), CliError> {
    let core = boot_quiet()?;
    core.load_document("");
    core.flush_local()?;
    core.teardown().await;
    println!("Document cleared");
    Ok(())
}

async fn handle_open(args: OpenArgs) -> Result<(), CliError> {
    let content = std::fs::read_to_string(&args.path)?;
    let core = boot_quiet()?;
    core.load_document(content);
    core.flush_local()?;
    core.teardown().await;
    println!("Loaded {}", args.path.display());
    Ok(())
}

async fn handle_export(args: ExportArgs) -> Result<(), CliError> {
    let core = boot_quiet()?;
    let export = core.export();
    let target = args
        .path
        .unwrap_or_else(|| PathBuf::from(&export.filename));
    std::fs::write(&target, export.content)?;
    core.teardown().await;
    println!("Exported {}", target.display());
    Ok(())
}

async fn handle_push(args: PushArgs) -> Result<(), CliError> {
    let core = boot_quiet()?;
    stash_pass(&core, &args.auth)?;
    let filename = args.filename.unwrap_or_else(|| core.remote_filename());
    core.save_remote(&filename).await?;
    core.teardown().await;
    println!("Uploaded {filename}");
    Ok(())
}

async fn handle_pull(args: PullArgs) -> Result<(), CliError> {
    let core = boot_quiet()?;
    stash_pass(&core, &args.auth)?;
    core.load_remote(&args.filename).await?;
    core.flush_local()?;
    let bytes = core.snapshot().len();
    core.teardown().await;
    println!("Pulled {} ({bytes} bytes)", args.filename);
    Ok(())
}

async fn handle_ls(args: AuthArgs) -> Result<(), CliError> {
    let core = boot_quiet()?;
    stash_pass(&core, &args)?;
    let names = core.list_remote().await?;
    if names.is_empty() {
        eprintln!("[tidemark] remote folder is empty");
    }
    for name in names {
        println!("{name}");
    }
    core.teardown().await;
    Ok(())
}

async fn handle_share(args: ShareArgs) -> Result<(), CliError> {
    let core = boot_quiet()?;
    let link = core
        .share(
            args.description.as_deref().unwrap_or(""),
            args.public,
            args.token.as_deref(),
        )
        .await?;
    core.teardown().await;
    match link {
        Some(url) => println!("{url}"),
        None => eprintln!("[tidemark] gist created, but the service returned no link"),
    }
    Ok(())
}

async fn handle_config(args: ConfigArgs) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Show => {
            let core = boot_quiet()?;
            let config = core.config();
            println!("base_url: {}", config.base_url);
            println!("username: {}", config.username);
            println!("folder:   {}", config.folder);
            println!("remember: {}", config.remember);
            println!(
                "secret:   {}",
                if core.secret_present() {
                    "stored"
                } else {
                    "not stored"
                }
            );
            core.teardown().await;
        }
        ConfigAction::Set(set) => {
            let core = boot_quiet()?;
            let mut config = core.config();
            if let Some(url) = set.url {
                config.base_url = url.trim().to_string();
            }
            if let Some(user) = set.user {
                config.username = user.trim().to_string();
            }
            if let Some(folder) = set.folder {
                config.folder = folder.trim().to_string();
            }
            if let Some(remember) = set.remember {
                config.remember = remember;
            }
            core.apply_settings(config, set.pass.as_deref(), set.persist_secret)?;
            core.teardown().await;
            println!("Settings saved");
        }
        ConfigAction::Import(import) => {
            let payload = std::fs::read_to_string(&import.path)?;
            let core = boot_quiet()?;
            core.import_config(&payload)?;
            core.teardown().await;
            println!("Settings imported from {}", import.path.display());
        }
    }
    Ok(())
}

fn stash_pass(core: &SyncCore, auth: &AuthArgs) -> Result<(), CliError> {
    if let Some(pass) = auth.pass.as_deref() {
        core.stash_secret(pass)?;
    }
    Ok(())
}
