use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use dirbridge::{Bridge, BridgeError, Config, DirectoryEntry};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

#[derive(Parser, Debug)]
#[command(name = "dirbridge")]
#[command(
    author,
    version,
    about = "Directory mirror bridge: list, watch and move files on behalf of a sandboxed UI"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: nearest .dirbridge/config.toml or $DIRBRIDGE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the bridge over HTTP on loopback
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Serve one session as JSON lines on stdin/stdout
    Stdio,

    /// List a directory
    Ls {
        path: PathBuf,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move a file into a directory
    Mv {
        source: PathBuf,
        dest_dir: PathBuf,
    },

    /// Open the folder picker and print the choice
    Pick,

    /// Print a line each time a watched directory changes
    Watch {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let args = Args::parse();
    dirbridge::logging::init(args.verbose);

    if let Command::Completion { shell } = args.command {
        let mut cmd = Args::command();
        clap_complete::generate(shell, &mut cmd, "dirbridge", &mut io::stdout());
        return;
    }

    let config = match args.config {
        Some(ref path) => match Config::load_from(path) {
            Ok(config) => config,
            Err(e) => fail(&e.to_string()),
        },
        None => Config::load(),
    };

    let bridge = match Bridge::from_config(&config) {
        Ok(bridge) => Arc::new(bridge),
        Err(e) => fail(&format!("failed to start bridge: {}", e)),
    };

    let result = run(args.command, &config, &bridge);
    bridge.shutdown();

    if let Err(e) = result {
        fail(&e.to_string());
    }
}

fn run(command: Command, config: &Config, bridge: &Arc<Bridge>) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Serve { host, port } => {
            let mut config = config.clone();
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            dirbridge::serve::start_bridge_server(&config, Arc::clone(bridge))?;
        }

        Command::Stdio => {
            let stdin = io::stdin();
            dirbridge::stdio::run(Arc::clone(bridge), stdin.lock(), io::stdout())?;
        }

        Command::Ls { path, json } => {
            let entries = bridge.read_directory(&absolute(&path)?)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_entries(&entries);
            }
        }

        Command::Mv { source, dest_dir } => {
            let moved = bridge.move_file(&absolute(&source)?, &absolute(&dest_dir)?)?;
            println!("{} {}", "Moved".green(), moved.display());
        }

        Command::Pick => match bridge.open_folder_dialog()? {
            Some(dir) => println!("{}", dir.display()),
            None => eprintln!("No folder selected."),
        },

        Command::Watch { paths } => watch(bridge, &paths)?,

        Command::Completion { .. } => {}
    }
    Ok(())
}

/// The bridge only accepts absolute paths; resolve CLI arguments first
fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn print_entries(entries: &[DirectoryEntry]) {
    if entries.is_empty() {
        eprintln!("{}", "(empty)".dimmed());
        return;
    }
    for entry in entries {
        if entry.is_directory {
            println!("{}/", entry.name.blue().bold());
        } else {
            println!("{}", entry.name);
        }
    }
}

fn watch(bridge: &Bridge, paths: &[PathBuf]) -> Result<(), BridgeError> {
    let session = bridge.open_session();
    let (tx, rx) = mpsc::channel();
    bridge.on_directory_changed(&session, tx);

    for path in paths {
        let path = absolute(path).map_err(|e| dirbridge::FilesystemError::from_io(e, path))?;
        bridge.watch_directory(&session, &path)?;
        eprintln!("{} {}", "Watching".green(), path.display());
    }
    eprintln!("Press Ctrl+C to stop\n");

    for change in rx {
        println!("{}", change.path.display());
    }
    Ok(())
}

fn fail(message: &str) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), message);
    std::process::exit(1);
}
