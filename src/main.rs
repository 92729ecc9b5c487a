use clap::{Arg, Command};
use furretweet::database::MongoDatabase;
use furretweet::telegram::TelegramNotifier;
use furretweet::twitter::TwitterClient;
use furretweet::{Config, FurStream};
use log::LevelFilter;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("furretweet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Retweets #FursuitFriday tweets that survive a chain of content filters")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/furretweet.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("daemon")
                .short('d')
                .long("daemon")
                .help("Run as a daemon (background process)")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let config_path = matches.get_one::<String>("config").unwrap();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        match config.validate() {
            Ok(()) => {
                println!("Configuration is valid.");
                println!("  Twitter API: {}", config.twitter.api_url);
                println!("  Bot user id: {}", config.twitter.bot_user_id);
                println!("  Mongo database: {}", config.mongo.database);
                match &config.telegram {
                    Some(telegram) => {
                        println!("  Telegram feed channel: {}", telegram.feed_channel_id)
                    }
                    None => println!("  Telegram notifications disabled"),
                }
            }
            Err(e) => {
                println!("Configuration validation failed:");
                println!("Error: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if matches.get_flag("daemon") {
        daemonize();
    }

    log::info!("Starting FurRetweet...");

    if let Err(e) = run(config).await {
        log::error!("FurRetweet error: {e}");
        process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let client = Arc::new(TwitterClient::new(&config.twitter)?);
    let mongo = MongoDatabase::connect(&config.mongo).await?;
    let telegram = match &config.telegram {
        Some(telegram_config) => Some(TelegramNotifier::new(telegram_config)?),
        None => {
            log::warn!("Telegram is not configured, review notifications disabled");
            None
        }
    };

    let mut stream = FurStream::new(client, mongo, telegram, &config);
    stream.run().await
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

/// Detach from the terminal and run in the background (Unix only).
fn daemonize() {
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::io::AsRawFd;

        log::info!("Starting FurRetweet in daemon mode...");

        // First fork
        match unsafe { libc::fork() } {
            -1 => {
                log::error!("Failed to fork process");
                process::exit(1);
            }
            0 => {
                // Child process continues
            }
            _ => {
                // Parent process exits
                process::exit(0);
            }
        }

        // Create new session (become session leader)
        if unsafe { libc::setsid() } == -1 {
            log::error!("Failed to create new session");
            process::exit(1);
        }

        // Ignore SIGHUP to prevent daemon from being killed when session leader exits
        unsafe {
            libc::signal(libc::SIGHUP, libc::SIG_IGN);
        }

        // Second fork to ensure we're not a session leader (prevents acquiring controlling terminal)
        match unsafe { libc::fork() } {
            -1 => {
                log::error!("Failed to second fork");
                process::exit(1);
            }
            0 => {
                // Child process continues as daemon
            }
            _ => {
                // Parent process exits
                process::exit(0);
            }
        }

        // Change working directory to root to avoid keeping any directory in use
        let root_path = std::ffi::CString::new("/").expect("static path");
        if unsafe { libc::chdir(root_path.as_ptr()) } == -1 {
            log::warn!("Failed to change working directory to /");
        }

        // Set file creation mask
        unsafe {
            libc::umask(0);
        }

        // Redirect standard file descriptors to /dev/null instead of closing them
        if let Ok(dev_null) = OpenOptions::new().read(true).write(true).open("/dev/null") {
            let null_fd = dev_null.as_raw_fd();

            unsafe {
                libc::dup2(null_fd, 0); // stdin
                libc::dup2(null_fd, 1); // stdout
                libc::dup2(null_fd, 2); // stderr
            }

            // Don't close dev_null fd as it's being used
            std::mem::forget(dev_null);
        } else {
            log::warn!("Failed to open /dev/null, closing standard file descriptors");
            unsafe {
                libc::close(0); // stdin
                libc::close(1); // stdout
                libc::close(2); // stderr
            }
        }

        // Write PID file for the rc system
        let pid = unsafe { libc::getpid() };
        if let Err(e) = std::fs::write("/var/run/furretweet.pid", pid.to_string()) {
            log::warn!("Failed to write PID file: {e}");
        } else {
            log::info!("PID file written: /var/run/furretweet.pid ({pid})");
        }

        // Clean up the PID file on shutdown
        let pid_file_path = "/var/run/furretweet.pid";
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("Received shutdown signal, cleaning up...");
            if std::path::Path::new(pid_file_path).exists() {
                if let Err(e) = std::fs::remove_file(pid_file_path) {
                    log::warn!("Failed to remove PID file: {e}");
                } else {
                    log::info!("PID file removed");
                }
            }
            std::process::exit(0);
        }) {
            log::warn!("Failed to set shutdown handler: {e}");
        }

        log::info!("Daemon mode initialization complete");
    }

    #[cfg(not(unix))]
    {
        log::warn!("Daemon mode not supported on this platform, running in foreground");
    }
}
