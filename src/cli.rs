use crate::config::NodeConfig;
use crate::config::DEFAULT_CONTROL_PORT;
use crate::core::daemon;
use crate::key::store::KeyStore;
use crate::key::Pair;
use crate::log::init_log;
use crate::net::control;

use clap::arg;
use clap::command;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dkgnode")]
#[command(about = "Committee node of a threshold key network", long_about = None)]
pub struct Cli {
    #[arg(long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub commands: Commands,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Generate the secp256k1 node key (node.private, node.public) and print its chain address.
    GenerateKey {
        /// Folder to keep node key material, with absolute path.
        #[arg(long, default_value_os_t = NodeConfig::default_home())]
        folder: PathBuf,
    },
    /// Start the node daemon, runs until interrupted or its committee is superseded.
    Start {
        /// Path to the node TOML config.
        #[arg(long)]
        config: PathBuf,
    },
    /// Print coordinator status of the running daemon.
    Status {
        /// Control port of the running daemon.
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control: u16,
    },
    /// Stop the running daemon.
    Stop {
        /// Control port of the running daemon.
        #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
        control: u16,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        init_log(self.verbose)?;
        match self.commands {
            Commands::GenerateKey { folder } => {
                let pair = generate_key(&folder)?;
                println!(
                    "Generated node key in {}\npublic key x: {}\npublic key y: {}\naddress: {}",
                    folder.display(),
                    pair.public().x_hex(),
                    pair.public().y_hex(),
                    pair.address()
                );
            }
            Commands::Start { config } => daemon::start(&config).await?,
            Commands::Status { control } => {
                let status = control::status(control).await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            Commands::Stop { control } => {
                control::stop(control).await?;
                println!("dkgnode daemon is stopping. Bye.");
            }
        }
        Ok(())
    }
}

fn generate_key(folder: &std::path::Path) -> anyhow::Result<Pair> {
    let store = KeyStore::create_new(folder)?;
    let pair = Pair::generate();
    store.save_pair(&pair)?;

    Ok(pair)
}
