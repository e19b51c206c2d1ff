//! veilfs - Encrypting overlay filesystem
//!
//! Usage:
//!   veilfs keygen [length]                          - Generate a random hex key
//!   veilfs mount <storagePath> <mountPath> <hexKey> - Mount an encrypted tree
//!   veilfs unmount <mountPath>                      - Unmount

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use veilfs::{
    config::Config,
    crypto::{self, SecretKey},
    error::{Error, Result},
    mount,
    store::EncryptedStore,
    vfs::Dispatcher,
};

#[derive(Parser)]
#[command(name = "veilfs")]
#[command(version = "0.1.0")]
#[command(about = "Encrypting overlay filesystem")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random key as lowercase hex
    Keygen {
        /// Number of random bytes (default 32)
        length: Option<String>,
    },

    /// Mount an encrypted view of a backing directory
    Mount {
        /// Backing directory holding the encrypted tree
        storage_path: PathBuf,

        /// Mount point directory
        mount_path: PathBuf,

        /// Hex-encoded 256-bit key
        hex_key: String,

        /// Allow other users to access the mount
        #[arg(long)]
        allow_other: bool,

        /// Plaintext block size in bytes (multiple of 16)
        #[arg(long)]
        block_size: Option<usize>,

        /// Optional JSON configuration file; flags override it
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Unmount a previously mounted path
    Unmount {
        /// Mount point to unmount
        mount_point: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    if let Err(e) = run_command(cli.command) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Keygen { length } => cmd_keygen(length),

        Commands::Mount {
            storage_path,
            mount_path,
            hex_key,
            allow_other,
            block_size,
            config,
        } => cmd_mount(
            &storage_path,
            &mount_path,
            &hex_key,
            allow_other,
            block_size,
            config,
        ),

        Commands::Unmount { mount_point } => cmd_unmount(&mount_point),
    }
}

fn cmd_keygen(length: Option<String>) -> Result<()> {
    let length = match length {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::InvalidArgument(format!("length must be an integer: {}", raw)))?,
        None => 32,
    };

    if length <= 0 {
        return Err(Error::InvalidArgument(format!(
            "length must be positive: {}",
            length
        )));
    }

    println!("{}", crypto::random_hex(length as usize));
    Ok(())
}

fn cmd_mount(
    storage_path: &PathBuf,
    mount_path: &PathBuf,
    hex_key: &str,
    allow_other: bool,
    block_size: Option<usize>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    if hex_key.is_empty()
        || !hex_key.chars().all(|c| c.is_ascii_hexdigit())
        || hex_key.len() % 2 != 0
    {
        return Err(Error::InvalidArgument(
            "key must be hex of even length".to_string(),
        ));
    }
    let key = SecretKey::from_hex(hex_key)?;

    let mut config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(block_size) = block_size {
        config.store.block_size = block_size;
    }
    if allow_other {
        config.mount.allow_other = true;
    }
    config.validate()?;

    info!("Starting veilfs...");
    info!("Backing directory: {:?}", storage_path);

    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register(
        "/",
        Arc::new(EncryptedStore::new(
            storage_path.clone(),
            key,
            config.store.block_size,
        )?),
    )?;

    std::fs::create_dir_all(mount_path)?;

    mount::mount(dispatcher, mount_path, &config.mount)
}

fn cmd_unmount(mount_point: &PathBuf) -> Result<()> {
    info!("Unmounting {:?}...", mount_point);

    #[cfg(target_os = "linux")]
    let output = std::process::Command::new("fusermount")
        .arg("-u")
        .arg(mount_point)
        .output()?;

    #[cfg(target_os = "macos")]
    let output = std::process::Command::new("umount")
        .arg(mount_point)
        .output()?;

    if output.status.success() {
        info!("Unmounted successfully");
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "Failed to unmount: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}
