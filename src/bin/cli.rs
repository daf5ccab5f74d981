use anyhow::{bail, Context};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use scc_auth::{
    db,
    models::{NewUser, User, UserPatch},
    repositories::{
        ChallengeStore, CredentialStore, SqliteChallengeStore, SqliteCredentialStore,
    },
    services::{
        auth_service::normalize_email,
        password::{hash_password, MIN_PASSWORD_LEN},
    },
};

#[derive(Parser)]
#[command(name = "scc-auth-cli")]
#[command(about = "CLI tool for administering SCT Coding Club accounts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// User management commands
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Delete expired refresh tokens, reset tokens and challenges
    Prune,
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a new user
    Create {
        /// Email address
        #[arg(short, long)]
        email: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Password (will prompt if not provided)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// List all users
    List {
        /// Maximum number of users to display
        #[arg(short, long, default_value_t = 100)]
        limit: i64,

        /// Offset for pagination
        #[arg(short = 'o', long, default_value_t = 0)]
        offset: i64,
    },

    /// Show one user with their passkeys
    Show {
        #[arg(short, long)]
        email: String,
    },

    /// Set a new password for a user
    SetPassword {
        /// Email address of the user
        #[arg(short, long)]
        email: String,

        /// New password (will prompt if not provided)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign a user out of every session
    RevokeSessions {
        #[arg(short, long)]
        email: String,
    },
}

fn get_password(prompt: &str) -> anyhow::Result<String> {
    use std::io::{self, Write};
    print!("{}: ", prompt);
    io::stdout().flush()?;

    Ok(rpassword::read_password()?)
}

/// Uses the given password, or prompts twice and requires both to match.
fn resolve_password(given: Option<String>, prompt: &str) -> anyhow::Result<String> {
    let password = match given {
        Some(password) => password,
        None => {
            let password = get_password(prompt)?;
            if password != get_password("Confirm password")? {
                bail!("Passwords do not match");
            }
            password
        }
    };

    if password.chars().count() < MIN_PASSWORD_LEN {
        bail!("Password must be at least {} characters", MIN_PASSWORD_LEN);
    }
    Ok(password)
}

async fn require_user(store: &SqliteCredentialStore, email: &str) -> anyhow::Result<User> {
    store
        .find_user_by_email(&normalize_email(email))
        .await?
        .with_context(|| format!("User '{}' not found", email))
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let pool = db::create_pool().await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let store = SqliteCredentialStore::new(pool.clone());

    // Parse CLI arguments
    let cli = Cli::parse();

    match cli.command {
        Commands::User { command } => match command {
            UserCommands::Create {
                email,
                name,
                password,
            } => {
                let password = resolve_password(password, "Password")?;
                let user = store
                    .create_user(NewUser {
                        email: normalize_email(&email),
                        name: name.trim().to_string(),
                        password_hash: Some(hash_password(&password)),
                        ..Default::default()
                    })
                    .await
                    .with_context(|| format!("Failed to create user '{}'", email))?;

                println!("✅ User created successfully!");
                println!("  ID: {}", user.id);
                println!("  Email: {}", user.email);
            }

            UserCommands::List { limit, offset } => {
                let users = store.list_users(limit, offset).await?;
                if users.is_empty() {
                    println!("No users found.");
                } else {
                    println!(
                        "{:<38} {:<36} {:<9} {:<17}",
                        "ID", "Email", "Verified", "Created"
                    );
                    println!("{}", "-".repeat(103));
                    for user in users {
                        println!(
                            "{:<38} {:<36} {:<9} {:<17}",
                            user.id,
                            user.email,
                            if user.is_verified { "Yes" } else { "No" },
                            format_timestamp(user.created_at)
                        );
                    }
                }
            }

            UserCommands::Show { email } => {
                let user = require_user(&store, &email).await?;
                let passkeys = store.list_passkey_credentials_for_user(&user.id).await?;

                println!("ID:        {}", user.id);
                println!("Email:     {}", user.email);
                println!("Name:      {}", user.name);
                println!("Phone:     {}", user.phone.as_deref().unwrap_or("-"));
                println!("Password:  {}", if user.has_password() { "set" } else { "not set" });
                println!("Google:    {}", user.google_id.as_deref().unwrap_or("-"));
                println!("EtLab:     {}", user.etlab_username.as_deref().unwrap_or("-"));
                println!("Verified:  {}", user.is_verified);
                println!("Created:   {}", format_timestamp(user.created_at));
                println!("Passkeys:  {}", passkeys.len());
                for passkey in passkeys {
                    println!(
                        "  - {} ({})",
                        passkey.device_name.as_deref().unwrap_or("unnamed"),
                        passkey.id
                    );
                }
            }

            UserCommands::SetPassword { email, password } => {
                let user = require_user(&store, &email).await?;
                let password = resolve_password(password, "New password")?;
                store
                    .update_user(
                        &user.id,
                        UserPatch {
                            password_hash: Some(hash_password(&password)),
                            ..Default::default()
                        },
                    )
                    .await?;
                println!("✅ Password updated successfully for '{}'!", user.email);
            }

            UserCommands::RevokeSessions { email } => {
                let user = require_user(&store, &email).await?;
                let revoked = store.delete_all_refresh_tokens_for_user(&user.id).await?;
                println!("✅ Revoked {} session(s) for '{}'", revoked, user.email);
            }
        },

        Commands::Prune => {
            let now = Utc::now().timestamp();
            let report = store.prune_expired(now).await?;
            let challenges = SqliteChallengeStore::new(pool).prune_expired(now).await?;
            println!("✅ Pruned expired records:");
            println!("  Refresh tokens: {}", report.refresh_tokens);
            println!("  Reset tokens:   {}", report.password_reset_tokens);
            println!("  Challenges:     {}", challenges);
        }
    }

    Ok(())
}
