mod config;
mod server;

use std::io::Read as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nix::{sys::signal, unistd::Pid};

use config::{read_config, Config};
use oryx_user::config::{read_user_list, write_user_list, UserEntry, UserList};
use oryx_user::login::static_provider::{hash_password, verify_password};
use server::Server;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    #[clap(
        short,
        long,
        env = "ORYX_CONFIG",
        default_value = "oryx.toml"
    )]
    /// Path to the main configuration file
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the IMAP/POP3/AUTH daemon
    Daemon,
    /// Ask a running daemon to reload its user list
    Reload {
        #[clap(short, long, env = "ORYX_PID")]
        pid: Option<i32>,
    },
    /// Manage static accounts
    #[clap(subcommand)]
    Account(AccountManagement),
    /// Hash a password the way the static user list expects
    PasswordHash {
        #[clap(env = "ORYX_PASSWORD")]
        maybe_password: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AccountManagement {
    Add {
        #[clap(short, long)]
        login: String,
        #[clap(short, long)]
        email: Vec<String>,
    },
    Delete {
        #[clap(short, long)]
        login: String,
    },
    ChangePassword {
        #[clap(env = "ORYX_OLD_PASSWORD")]
        maybe_old_password: Option<String>,
        #[clap(env = "ORYX_NEW_PASSWORD")]
        maybe_new_password: Option<String>,
        #[clap(short, long)]
        login: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "oryx=info,oryx_proto=info,oryx_mail=info,oryx_user=info");
    }

    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{}", panic_info);
        eprintln!("{:?}", backtrace::Backtrace::new());
        std::process::abort();
    }));

    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match &args.command {
        Command::Daemon => {
            let config = read_config(args.config_file)?;
            let server = Server::new(config);
            server.run().await?;
        }
        Command::Reload { pid } => reload(*pid, args.config_file)?,
        Command::Account(cmd) => {
            let config: Config = read_config(args.config_file)?;
            account_management(cmd, config.users.user_list)?;
        }
        Command::PasswordHash { maybe_password } => {
            let password = match maybe_password {
                Some(pwd) => pwd.clone(),
                None => rpassword::prompt_password("Enter password: ")?,
            };
            println!("{}", hash_password(&password)?);
        }
    }

    Ok(())
}

fn reload(pid: Option<i32>, config_file: PathBuf) -> Result<()> {
    let final_pid = match pid {
        Some(pid) => pid,
        None => {
            let config: Config = read_config(config_file)?;
            let pid_path = config
                .pid
                .context("no --pid given and configuration file has no 'pid' entry")?;
            let mut f = std::fs::OpenOptions::new().read(true).open(pid_path)?;
            let mut pidstr = String::new();
            f.read_to_string(&mut pidstr)?;
            pidstr.trim().parse::<i32>()?
        }
    };
    signal::kill(Pid::from_raw(final_pid), signal::Signal::SIGUSR1)?;
    Ok(())
}

fn account_management(cmd: &AccountManagement, users_path: PathBuf) -> Result<()> {
    let mut ulist: UserList = read_user_list(&users_path)
        .context(format!("'{:?}' must be a user database", users_path))?;

    match cmd {
        AccountManagement::Add { login, email } => {
            tracing::debug!(user = login, "will-create");
            let password = {
                let password = rpassword::prompt_password("Enter password: ")?;
                let confirm = rpassword::prompt_password("Confirm password: ")?;
                if password != confirm {
                    bail!("Passwords don't match.");
                }
                password
            };
            let hash = hash_password(&password).context("unable to hash password")?;

            ulist.insert(
                login.clone(),
                UserEntry {
                    email_addresses: email.clone(),
                    password: hash,
                    master_key: None,
                },
            );
            write_user_list(&users_path, &ulist)?;
        }
        AccountManagement::Delete { login } => {
            tracing::debug!(user = login, "will-delete");
            ulist.remove(login);
            write_user_list(&users_path, &ulist)?;
        }
        AccountManagement::ChangePassword {
            maybe_old_password,
            maybe_new_password,
            login,
        } => {
            let mut user = ulist.remove(login).context("user must exist first")?;

            let old_password = match maybe_old_password {
                Some(pwd) => pwd.to_string(),
                None => rpassword::prompt_password("Enter old password: ")?,
            };
            if !verify_password(&old_password, &user.password)? {
                bail!("invalid password for login {}", login);
            }

            let new_password = match maybe_new_password {
                Some(pwd) => pwd.to_string(),
                None => {
                    let password = rpassword::prompt_password("Enter new password: ")?;
                    let confirm = rpassword::prompt_password("Confirm new password: ")?;
                    if password != confirm {
                        bail!("Passwords don't match.");
                    }
                    password
                }
            };
            user.password = hash_password(&new_password)?;

            ulist.insert(login.clone(), user);
            write_user_list(&users_path, &ulist)?;
        }
    };

    Ok(())
}
