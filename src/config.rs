//! # Configuration
//!
//! Options come from three layers, weakest first: chain-derived defaults, an
//! INI-style configuration file, and command-line flags of the same names.
//! The file is `rbfbattle.conf` unless overridden by the `CONFIG`
//! environment variable or `-f`.

use crate::error::{BattleError, BattleResult};
use bitcoin::{Address, Network, ScriptBuf};
use bitcoincore_rpc::Auth;
use clap::Parser;
use ini::Ini;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIG_FILE: &str = "rbfbattle.conf";
pub const DEFAULT_BURN_MESSAGE: &str = "rbfbattle was here";
pub const DEFAULT_ZMQ_ENDPOINT: &str = "tcp://127.0.0.1:18503";
pub const DEFAULT_ADDRESS_FILE: &str = "addresses.csv";
pub const DEFAULT_CHAIN: &str = "regtest";

/// Command-line flags. Every option can also be set in the config file;
/// flags win.
#[derive(Parser, Debug, Default)]
#[command(name = "rbfbattle")]
#[command(about = "Adversarial mempool agent defending watched outputs with RBF replacements")]
pub struct Cli {
    /// The path to the configuration file
    #[arg(short = 'f', long = "config", env = "CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    /// The destination address to send the funds to
    #[arg(short = 'd', long = "destinationaddress")]
    pub destination_address: Option<String>,

    /// Message to include in OP_RETURN when burning
    #[arg(short = 'm', long = "burnmessage")]
    pub burn_message: Option<String>,

    /// The chain to use (mainnet, testnet3, signet, regtest)
    #[arg(short = 'c', long = "chain")]
    pub chain: Option<String>,

    /// The host of the Bitcoin node
    #[arg(long = "rpchost")]
    pub rpc_host: Option<String>,

    /// The username of the Bitcoin node
    #[arg(long = "rpcuser")]
    pub rpc_user: Option<String>,

    /// The password of the Bitcoin node
    #[arg(long = "rpcpass")]
    pub rpc_pass: Option<String>,

    /// The path to the Bitcoin node cookie file
    #[arg(long = "rpccookie")]
    pub rpc_cookie: Option<String>,

    /// The wallet to use for the Bitcoin node
    #[arg(long = "rpcwallet")]
    pub rpc_wallet: Option<String>,

    /// The ZMQ endpoint to use
    #[arg(short = 'z', long = "zmq")]
    pub zmq: Option<String>,

    /// The file containing the addresses to watch
    #[arg(short = 'a', long = "addressfile")]
    pub address_file: Option<PathBuf>,
}

/// Network parameters derived from the `chain` option.
#[derive(Debug, Clone, Copy)]
pub struct ChainParams {
    pub network: Network,
    pub default_rpc_port: u16,
    pub default_cookie_path: &'static str,
}

pub fn chain_params(chain: &str) -> BattleResult<ChainParams> {
    match chain {
        "" | "mainnet" => Ok(ChainParams {
            network: Network::Bitcoin,
            default_rpc_port: 8332,
            default_cookie_path: "~/.bitcoin/.cookie",
        }),
        "testnet3" => Ok(ChainParams {
            network: Network::Testnet,
            default_rpc_port: 18332,
            default_cookie_path: "~/.bitcoin/testnet3/.cookie",
        }),
        "signet" => Ok(ChainParams {
            network: Network::Signet,
            default_rpc_port: 38332,
            default_cookie_path: "~/.bitcoin/signet/.cookie",
        }),
        "regtest" => Ok(ChainParams {
            network: Network::Regtest,
            default_rpc_port: 18443,
            default_cookie_path: "~/.bitcoin/regtest/.cookie",
        }),
        other => Err(BattleError::config(format!("invalid chain: {other}"))),
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub network: Network,
    pub destination_address: String,
    pub destination_script: ScriptBuf,
    pub burn_message: String,
    pub rpc_url: String,
    pub rpc_auth: Auth,
    pub zmq_endpoint: String,
    pub address_file: PathBuf,
}

impl Config {
    /// Parse flags, merge the config file, validate.
    pub fn load() -> BattleResult<Config> {
        Config::resolve(Cli::parse())
    }

    pub fn resolve(cli: Cli) -> BattleResult<Config> {
        let file = FileValues::read(&cli.config_file)?;

        let chain = pick(cli.chain, file.get("chain"), DEFAULT_CHAIN);
        let params = chain_params(&chain)?;

        let destination_address = cli
            .destination_address
            .or_else(|| file.get("destinationaddress"))
            .ok_or_else(|| BattleError::config("destinationaddress is required"))?;
        let destination = Address::from_str(&destination_address)
            .ok()
            .and_then(|address| address.require_network(params.network).ok())
            .ok_or_else(|| {
                BattleError::config(format!(
                    "invalid destination address for {}: {destination_address}",
                    params.network
                ))
            })?;

        let rpc_host = pick(cli.rpc_host, file.get("rpchost"), "");
        let (host, port) = split_host_port(&rpc_host, params.default_rpc_port)?;
        let rpc_wallet = cli.rpc_wallet.or_else(|| file.get("rpcwallet"));
        let rpc_url = match rpc_wallet {
            Some(wallet) if !wallet.is_empty() => format!("http://{host}:{port}/wallet/{wallet}"),
            _ => format!("http://{host}:{port}"),
        };

        let rpc_user = cli.rpc_user.or_else(|| file.get("rpcuser"));
        let rpc_auth = match rpc_user {
            Some(user) if !user.is_empty() => Auth::UserPass(
                user,
                cli.rpc_pass
                    .or_else(|| file.get("rpcpass"))
                    .unwrap_or_default(),
            ),
            _ => {
                let cookie = pick(
                    cli.rpc_cookie,
                    file.get("rpccookie"),
                    params.default_cookie_path,
                );
                Auth::CookieFile(expand_home(&cookie))
            }
        };

        Ok(Config {
            network: params.network,
            destination_address: destination.to_string(),
            destination_script: destination.script_pubkey(),
            burn_message: pick(
                cli.burn_message,
                file.get("burnmessage"),
                DEFAULT_BURN_MESSAGE,
            ),
            rpc_url,
            rpc_auth,
            zmq_endpoint: pick(cli.zmq, file.get("zmq"), DEFAULT_ZMQ_ENDPOINT),
            address_file: cli
                .address_file
                .or_else(|| file.get("addressfile").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ADDRESS_FILE)),
        })
    }
}

/// Key/value pairs from the INI config file. A missing file is an empty set;
/// an unreadable or unparseable one is an error.
struct FileValues(Option<Ini>);

impl FileValues {
    fn read(path: &Path) -> BattleResult<FileValues> {
        if !path.exists() {
            return Ok(FileValues(None));
        }
        let ini = Ini::load_from_file(path)
            .map_err(|e| BattleError::config(format!("cannot read {}: {e}", path.display())))?;
        Ok(FileValues(Some(ini)))
    }

    fn get(&self, key: &str) -> Option<String> {
        self.0
            .as_ref()
            .and_then(|ini| ini.section(None::<String>))
            .and_then(|section| section.get(key))
            .map(str::to_string)
    }
}

fn pick(flag: Option<String>, file: Option<String>, default: &str) -> String {
    flag.or(file).unwrap_or_else(|| default.to_string())
}

/// Split an `rpchost` value into host and port, filling in defaults for
/// missing parts.
fn split_host_port(value: &str, default_port: u16) -> BattleResult<(String, u16)> {
    let (host, port) = match value.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BattleError::config(format!("invalid rpchost: {value}")))?;
            (host, port)
        }
        None => (value, default_port),
    };
    let host = if host.is_empty() || host == "localhost" {
        "127.0.0.1"
    } else {
        host
    };
    Ok((host.to_string(), port))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
