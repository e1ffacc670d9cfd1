use anyhow::Result;
use credbroker::{
    auth::{KeyringStore, LiveAuthority, MemoryStore, VsoAuthority},
    config::{Config, StoreBackend},
    helper::{self, HelperCommand, HelperOptions, HelperRequest},
    CredentialBroker, TargetResource, TokenStore,
};
use tracing::debug;

const USAGE: &str = "\
Usage: credbroker <command> [args]

git credential helper:
  get | store | erase        read the request from stdin

manual commands:
  login <url> [--compact]    sign in interactively and store a PAT
  refresh <url> [--compact]  renew the PAT with the stored refresh token
  status <url>               show what is stored for <url>
  clear <url>                forget the stored PAT and refresh token
  version";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    if command == "version" || command == "--version" {
        println!("credbroker {}", credbroker::VERSION);
        return Ok(());
    }

    let config = Config::load()?;
    credbroker::logging::init(&config.logging);
    debug!("credbroker v{} ({:?} store)", credbroker::VERSION, config.store.backend);

    match config.store.backend {
        StoreBackend::Keyring => {
            let service = &config.store.keyring_service;
            let pats = KeyringStore::new(service, "pat");
            let refresh = KeyringStore::new(service, "refresh");
            dispatch(&config, pats, refresh, &args).await
        }
        StoreBackend::Memory => {
            dispatch(&config, MemoryStore::new(), MemoryStore::new(), &args).await
        }
    }
}

async fn dispatch<S: TokenStore>(config: &Config, pats: S, refresh: S, args: &[String]) -> Result<()> {
    let mut identity = LiveAuthority::new(&config.authority.host, config.authority.timeout());
    if !config.authority.open_browser {
        identity = identity.without_browser();
    }
    let resource = VsoAuthority::new(
        &config.vso.identity_service,
        &config.vso.token_scope,
        config.authority.timeout(),
    );

    let broker = CredentialBroker::new(config.broker_settings()?, pats, refresh, identity, resource);

    let command = args[0].as_str();
    let compact = config.helper.compact || args.iter().any(|a| a == "--compact");
    let target = args.iter().skip(1).find(|a| !a.starts_with("--"));

    if let Some(helper_command) = HelperCommand::parse(command) {
        let request = HelperRequest::parse(std::io::stdin().lock())?;
        let options = HelperOptions {
            compact,
            interactive: config.helper.interactive,
        };
        let mut stdout = std::io::stdout();
        return helper::run(&broker, helper_command, &request, options, &mut stdout).await;
    }

    let Some(target) = target else {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    match command {
        "login" => {
            if broker.interactive_login(target, compact).await? {
                eprintln!("🔒 PAT stored for {}", target);
            } else {
                eprintln!("❌ Sign-in failed for {}", target);
                std::process::exit(1);
            }
        }

        "refresh" => {
            if broker.refresh_credentials(target, compact).await? {
                eprintln!("🔒 PAT renewed for {}", target);
            } else {
                eprintln!("❌ Could not refresh {} - run: credbroker login {}", target, target);
                std::process::exit(1);
            }
        }

        "status" => {
            let parsed = TargetResource::parse(target)?;
            let pat = broker.pat_store().read(&parsed)?;
            let refresh = broker.refresh_store().read(&parsed)?;

            println!("\n🔐 Credentials for {}", parsed);
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
            match pat {
                Some(token) => println!(
                    "✅ PAT ({}): stored {}",
                    token.kind.as_str(),
                    format_timestamp(token.created_at)
                ),
                None => println!("❌ PAT: not stored"),
            }
            match refresh {
                Some(token) => println!("✅ Refresh token: stored {}", format_timestamp(token.created_at)),
                None => println!("❌ Refresh token: not stored (login required)"),
            }
            println!();
        }

        "clear" => {
            if broker.delete_credentials(target)? {
                eprintln!("✅ Stored credentials cleared for {}", target);
            } else {
                eprintln!("Nothing stored for {}", target);
            }
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "at an unknown time".to_string())
}
