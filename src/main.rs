use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lanledger::config::{self, Config};
use lanledger::keystore::{self, FileKeyStore, KeyStore, StaticKeyStore};
use lanledger::ledger::{Ledger, User, DEFAULT_BALANCE};
use lanledger::{metrics, Store, SyncEvent, SyncService, SyncSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing_subscriber::EnvFilter;

const PEER_ID_META_KEY: &str = "peer_id";

#[derive(Parser)]
#[command(author, version, about = "lanledger: peer-to-peer transaction sync over the local network")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Suppress routine network logs
    #[arg(long, default_value_t = false)]
    quiet_net: bool,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Start the sync node with an interactive console (default)
    Run,
    /// Print the network key as hex, creating it on first use
    Key,
    /// Create a local account
    AddUser {
        username: String,
        #[arg(long, default_value_t = DEFAULT_BALANCE)]
        balance: f64,
    },
    Balance {
        username: String,
    },
    History {
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet_net);

    let mut cfg = load_config(&cli.config)?;
    cfg.storage.path = resolve_home_path(&cfg.storage.path).to_string_lossy().into_owned();
    cfg.crypto.key_file = resolve_home_path(&cfg.crypto.key_file).to_string_lossy().into_owned();

    match cli.cmd.unwrap_or(Cmd::Run) {
        Cmd::Key => {
            let key = key_store(&cfg)?.get_or_create_key()?;
            println!("{}", hex::encode(key));
            Ok(())
        }
        Cmd::AddUser { username, balance } => {
            let store = Store::open(&cfg.storage.path)?;
            if store.user_exists(&username)? {
                anyhow::bail!("user '{}' already exists", username);
            }
            store.put_user(&User::new(username.clone(), balance))?;
            println!("👤 Created '{}' with balance {:.2}", username, balance);
            store.close()
        }
        Cmd::Balance { username } => {
            let store = Store::open(&cfg.storage.path)?;
            print_balance(&store, &username)?;
            store.close()
        }
        Cmd::History { username } => {
            let store = Store::open(&cfg.storage.path)?;
            print_history(&store, &username)?;
            store.close()
        }
        Cmd::Run => run(cfg).await,
    }
}

fn init_logging(quiet_net: bool) {
    let fallback = if quiet_net {
        "info,lanledger::transport=warn,lanledger::router=warn,lanledger::discovery=warn,lanledger::health=warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// Try the CLI path, then the executable directory, else the embedded default.
fn load_config(path: &str) -> Result<Config> {
    let e1 = match config::load(path) {
        Ok(c) => return Ok(c),
        Err(e) => e,
    };
    let exe_dir = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf));
    let e2 = match exe_dir.map(|dir| config::load(dir.join("config.toml"))) {
        Some(Ok(c)) => return Ok(c),
        Some(Err(e)) => Some(e),
        None => None,
    };
    match e2 {
        Some(e2) => tracing::warn!("⚠️  Could not read config from '{}' or exe dir: {} | {}", path, e1, e2),
        None => tracing::warn!("⚠️  Could not read config from '{}': {}", path, e1),
    }
    const EMBEDDED_CONFIG: &str = include_str!("../config.toml");
    config::load_from_str(EMBEDDED_CONFIG).context("failed to load embedded configuration")
}

// Relative paths live under ~/.lanledger/
fn resolve_home_path(path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".lanledger").join(p)
}

fn key_store(cfg: &Config) -> Result<Box<dyn KeyStore>> {
    if let Some(hex_key) = &cfg.crypto.shared_key_hex {
        return Ok(Box::new(StaticKeyStore::from_hex(hex_key).context("invalid [crypto].shared_key_hex")?));
    }
    let passphrase = keystore::obtain_passphrase(Some("🔐 Key file pass-phrase (empty to store unsealed): "))?;
    Ok(Box::new(FileKeyStore::new(&cfg.crypto.key_file, passphrase)))
}

fn peer_id(cfg: &Config, store: &Store) -> Result<String> {
    if let Some(id) = &cfg.node.peer_id {
        return Ok(id.clone());
    }
    if let Some(id) = store.get_meta::<String>(PEER_ID_META_KEY)? {
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    store.put_meta(PEER_ID_META_KEY, &id)?;
    Ok(id)
}

fn print_balance(ledger: &dyn Ledger, username: &str) -> Result<()> {
    match ledger.get_user(username)? {
        Some(user) => println!("💰 {}: {:.2}", user.username, user.balance),
        None => println!("❓ No account named '{}'", username),
    }
    Ok(())
}

fn print_history(ledger: &dyn Ledger, username: &str) -> Result<()> {
    let txs = ledger.transactions_for_user(username)?;
    if txs.is_empty() {
        println!("📭 No transactions for '{}'", username);
        return Ok(());
    }
    println!("📜 {} transaction(s) for '{}':", txs.len(), username);
    for tx in txs {
        println!(
            "  {}  {} → {}  {:.2}  {:?}  {}",
            tx.timestamp, tx.from_username, tx.to_username, tx.amount, tx.status, tx.id
        );
    }
    Ok(())
}

async fn run(cfg: Config) -> Result<()> {
    let store = Arc::new(Store::open(&cfg.storage.path)?);
    tracing::info!("🗄️  Database opened at '{}'", cfg.storage.path);

    let username = cfg.node.username.clone();
    if !store.user_exists(&username)? {
        store.put_user(&User::new(username.clone(), DEFAULT_BALANCE))?;
        tracing::info!("👤 Created local account '{}'", username);
    }

    let key = key_store(&cfg)?.get_or_create_key()?;
    let settings = SyncSettings::from_config(&cfg, peer_id(&cfg, &store)?);
    let ledger: Arc<dyn Ledger> = store.clone();
    let service = SyncService::start(settings, ledger.clone(), key).await?;

    if cfg.metrics.enabled {
        metrics::serve(cfg.metrics.clone())?;
    }

    let mut events = service.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::TransactionReceived(tx)) => {
                    println!("💸 {} → {} ({:.2}) via network", tx.from_username, tx.to_username, tx.amount)
                }
                Ok(SyncEvent::PeerDiscovered(peer)) => println!("🤝 {} joined at {}", peer.username, peer.endpoint()),
                Ok(SyncEvent::PeerEvicted(peer)) => println!("👋 {} went quiet", peer.username),
                Ok(SyncEvent::UserSynced { username, balance, .. }) => println!("🔄 {} reports {:.2}", username, balance),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => tracing::debug!("skipped {} events", n),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    println!("\n🚀 lanledger node is running!");
    println!("   🆔 Peer id: {}", service.peer_id());
    println!("   📡 Listening on {}", service.local_addr());
    println!("   ⌨️  Commands: send <from> <to> <amount> [note], peers, balance <user>, history <user>, quit");
    println!("   Press Ctrl+C to stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            res = signal::ctrl_c() => {
                if let Err(err) = res {
                    tracing::error!("Error waiting for shutdown signal: {err}");
                }
                println!("\n🛑 Shutdown signal received, cleaning up...");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !console_command(&service, ledger.as_ref(), line.trim()) {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("console input closed: {}", e);
                    stdin_open = false;
                }
            }
        }
    }

    service.shutdown().await;
    if let Err(e) = store.close() {
        eprintln!("Warning: Database cleanup failed: {e}");
    } else {
        println!("✅ Database closed cleanly");
    }
    println!("👋 lanledger node stopped");
    Ok(())
}

/// Returns false when the console asked to quit.
fn console_command(service: &SyncService, ledger: &dyn Ledger, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let outcome = match parts.next() {
        None => Ok(()),
        Some("quit") | Some("exit") => return false,
        Some("peers") => {
            let peers = service.peers();
            println!("👥 {} peer(s)", peers.len());
            for p in peers {
                println!("  {}  {}  {}", p.peer_id, p.username, p.endpoint());
            }
            Ok(())
        }
        Some("balance") => match parts.next() {
            Some(user) => print_balance(ledger, user),
            None => Err(anyhow::anyhow!("usage: balance <user>")),
        },
        Some("history") => match parts.next() {
            Some(user) => print_history(ledger, user),
            None => Err(anyhow::anyhow!("usage: history <user>")),
        },
        Some("send") => {
            let args: Vec<&str> = parts.collect();
            match args.as_slice() {
                [from, to, amount, note @ ..] => match amount.parse::<f64>() {
                    Ok(amount) => service
                        .transfer(from, to, amount, &note.join(" "))
                        .map(|(tx, _broadcast)| println!("✅ Sent {:.2} from {} to {} ({})", amount, from, to, tx.id))
                        .map_err(anyhow::Error::from),
                    Err(_) => Err(anyhow::anyhow!("amount must be a number")),
                },
                _ => Err(anyhow::anyhow!("usage: send <from> <to> <amount> [note]")),
            }
        }
        Some(other) => Err(anyhow::anyhow!("unknown command '{}'", other)),
    };
    if let Err(e) = outcome {
        println!("❌ {e}");
    }
    true
}
