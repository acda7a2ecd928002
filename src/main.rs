use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use session_keeper::{build_session_store, RefreshOutcome, SessionConfig, SessionSnapshot, SessionStore};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "session-keeper",
    version,
    about = "Sign in to the auth API and manage the stored session"
)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the stored session after verifying it with the server
    Status {
        /// Print only this profile field (wire name, e.g. professionalPath)
        #[arg(long, value_name = "NAME")]
        field: Option<String>,
    },
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account and log in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
        #[arg(long, value_name = "PATH")]
        professional_path: Option<String>,
    },
    /// Log out and remove the stored session
    Logout,
    /// Re-validate the stored token
    Refresh,
    #[command(subcommand)]
    Onboarding(OnboardingCommand),
    /// Update profile fields locally; VALUE is parsed as JSON, else taken as a string
    Set {
        #[arg(value_name = "KEY=VALUE", value_parser = parse_assignment, required = true)]
        fields: Vec<(String, Value)>,
    },
}

#[derive(Debug, Subcommand)]
enum OnboardingCommand {
    /// Choose the professional path
    Path { path: String },
    /// Finish onboarding, optionally pinning modules
    Complete {
        #[arg(long = "pin", value_name = "MODULE")]
        pinned_modules: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SessionConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log_filter);

    let store = build_session_store(&config)?;
    store.restore().await;

    run(&store, cli.command).await
}

fn init_tracing(default_filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(store: &SessionStore, command: Command) -> Result<()> {
    let mut field = None;
    match command {
        Command::Status { field: name } => field = name,
        Command::Login { email, password } => {
            let password = password_or_prompt(password)?;
            store.login(&email, &password).await?;
        }
        Command::Register {
            name,
            email,
            password,
            professional_path,
        } => {
            let password = password_or_prompt(password)?;
            store
                .register(&name, &email, &password, professional_path.as_deref())
                .await?;
        }
        Command::Logout => store.logout().await,
        Command::Refresh => match store.refresh_token().await {
            RefreshOutcome::Refreshed => {}
            RefreshOutcome::Skipped => bail!("Not logged in"),
            RefreshOutcome::Cleared => bail!("Session expired; log in again"),
        },
        Command::Onboarding(OnboardingCommand::Path { path }) => {
            store.update_onboarding_path(&path).await?;
        }
        Command::Onboarding(OnboardingCommand::Complete { pinned_modules }) => {
            store.complete_onboarding(pinned_modules).await?;
        }
        Command::Set { fields } => {
            let patch: Map<String, Value> = fields.into_iter().collect();
            store.update_user(&patch).await?;
        }
    }

    let snapshot = store.snapshot();
    let output = match field {
        Some(name) => profile_field(&snapshot, &name)?,
        None => status_json(&snapshot),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => Ok(dialoguer::Password::new()
            .with_prompt("Password")
            .interact()?),
    }
}

/// Printable session summary. The token itself is never shown.
fn status_json(snapshot: &SessionSnapshot) -> Value {
    serde_json::json!({
        "authenticated": snapshot.is_authenticated(),
        "onboardingCompleted": snapshot.is_onboarding_completed(),
        "user": snapshot.user,
    })
}

fn profile_field(snapshot: &SessionSnapshot, name: &str) -> Result<Value> {
    let Some(user) = snapshot.user.as_ref() else {
        bail!("Not logged in");
    };
    user.field(name).with_context(|| format!("User has no field '{name}'"))
}

fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;
    use session_keeper::UserProfile;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_assignment_reads_json_or_string() {
        assert_eq!(
            parse_assignment("pinnedModules=[\"a\"]").unwrap(),
            ("pinnedModules".to_string(), json!(["a"]))
        );
        assert_eq!(
            parse_assignment("professionalPath=finance").unwrap(),
            ("professionalPath".to_string(), json!("finance"))
        );
        assert_eq!(
            parse_assignment("note=a=b").unwrap(),
            ("note".to_string(), json!("a=b"))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn set_command_collects_fields() {
        let cli = Cli::try_parse_from(["session-keeper", "set", "a=1", "b=two"]).unwrap();
        match cli.command {
            Command::Set { fields } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0], ("a".to_string(), json!(1)));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn onboarding_complete_collects_pins() {
        let cli = Cli::try_parse_from([
            "session-keeper",
            "onboarding",
            "complete",
            "--pin",
            "budget",
            "--pin",
            "goals",
        ])
        .unwrap();
        match cli.command {
            Command::Onboarding(OnboardingCommand::Complete { pinned_modules }) => {
                assert_eq!(pinned_modules, vec!["budget", "goals"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn status_field_reads_one_profile_value() {
        let cli = Cli::try_parse_from(["session-keeper", "status", "--field", "professionalPath"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Status { field: Some(ref name) } if name == "professionalPath"
        ));

        let user: UserProfile =
            serde_json::from_value(json!({ "id": 7, "professionalPath": "nursing" })).unwrap();
        let snapshot = SessionSnapshot {
            token: Some("t".into()),
            user: Some(user),
            loading: false,
            is_refreshing: false,
        };
        assert_eq!(profile_field(&snapshot, "professionalPath").unwrap(), json!("nursing"));
        assert_eq!(profile_field(&snapshot, "id").unwrap(), json!(7));
        assert!(profile_field(&snapshot, "nickname")
            .unwrap_err()
            .to_string()
            .contains("no field"));
        assert!(profile_field(&SessionSnapshot::default(), "id").is_err());
    }

    #[test]
    fn status_never_includes_token() {
        let snapshot = SessionSnapshot {
            token: Some("secret-token".into()),
            user: Some(UserProfile::default()),
            loading: false,
            is_refreshing: false,
        };
        let rendered = status_json(&snapshot).to_string();
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("\"authenticated\":true"));
    }
}
