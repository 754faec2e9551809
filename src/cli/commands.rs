//! CLI command implementations
//!
//! Each command loads the configuration, performs one operation with the
//! system command runner, and reports the result as a single JSON object.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::accounts::LocalAccounts;
use crate::config::BootstrapConfig;
use crate::credential::{generate_secret, CredentialFile};
use crate::directory::{with_session, DirectoryPlan, SessionSettings, UserSpec};
use crate::distribute::{Distributor, LedgerPolicy};
use crate::exec::{CommandRunner, SystemRunner};
use crate::inventory;
use crate::observability::{Event, Logger};
use crate::redeem::{ClientRedeemer, InstallTarget};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments and run the selected command.
///
/// Failures are reported on stdout as an error object and returned so the
/// caller can exit non-zero.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    let result = run_command(cli.command);
    if let Err(e) = &result {
        write_error(e.code_str(), e.message())?;
    }
    result
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Generate {
            config,
            register,
            admin_principal,
            admin_password_file,
            groups,
        } => {
            let registration = match (register, admin_password_file) {
                (true, Some(admin_password_file)) => Some(Registration {
                    admin_principal,
                    admin_password_file,
                    groups,
                }),
                (true, None) => {
                    return Err(CliError::config_error(
                        "--register needs --admin-password-file",
                    ))
                }
                (false, _) => None,
            };
            generate(&config, registration.as_ref())
        }
        Command::Distribute {
            config,
            record_attempted,
        } => distribute(&config, record_attempted),
        Command::ClientInstall {
            config,
            server,
            domain,
            wait_limit,
            no_dns,
            plan,
        } => client_install(
            &config,
            &server,
            &domain,
            wait_limit,
            !no_dns,
            plan.as_deref(),
        ),
        Command::Apply {
            config,
            plan,
            preserve_credential,
        } => apply(&config, &plan, preserve_credential),
        Command::LocalAccounts { config } => local_accounts(&config),
    }
}

fn load_config(path: &Path) -> CliResult<BootstrapConfig> {
    let config = BootstrapConfig::load(path)?;
    Logger::event(
        Event::ConfigLoaded,
        &[
            ("path", &path.display().to_string()),
            ("principal", &config.principal),
        ],
    );
    Ok(config)
}

/// Administrator login used to enroll the robot principal
#[derive(Debug, Clone)]
pub struct Registration {
    pub admin_principal: String,
    pub admin_password_file: PathBuf,
    pub groups: Vec<String>,
}

/// Write a fresh one-time credential, replacing any previous one.
///
/// With a registration the robot principal is created, or its password
/// reset, so the new secret is the one the directory accepts.
pub fn generate(config_path: &Path, registration: Option<&Registration>) -> CliResult<()> {
    let config = load_config(config_path)?;
    let response = generate_with(&config, &SystemRunner::new(), registration)?;
    write_response(response)
}

fn generate_with<R: CommandRunner>(
    config: &BootstrapConfig,
    runner: &R,
    registration: Option<&Registration>,
) -> CliResult<Value> {
    let secret = generate_secret(config.secret_length, &config.secret_alphabet)?;
    let credential = config.credential_file();
    credential.write(&secret)?;

    let path = credential.path().display().to_string();
    Logger::event(
        Event::CredentialGenerated,
        &[("path", &path), ("fingerprint", &secret.fingerprint())],
    );

    let mut response = json!({
        "path": path,
        "fingerprint": secret.fingerprint(),
        "length": secret.len(),
    });

    if let Some(registration) = registration {
        let settings = SessionSettings::from_config(config)
            .principal(registration.admin_principal.as_str())
            .preserve_credential(true);
        let robot = UserSpec::new(config.principal.as_str())
            .groups(registration.groups.iter().map(String::as_str))
            .password(secret)
            .password_file(config.credential_path());

        let outcome = with_session(
            runner,
            &CredentialFile::new(&registration.admin_password_file),
            settings,
            |session| session.create_or_reset_user(&robot),
        )?;
        response["registered"] = serde_json::to_value(outcome)?;
    }

    Ok(response)
}

/// Copy the credential to every host not yet in the ledger.
///
/// Per-host copy failures are part of the report, not a command failure;
/// under the default policy those hosts are retried on the next run.
pub fn distribute(config_path: &Path, record_attempted: bool) -> CliResult<()> {
    let config = load_config(config_path)?;
    let policy = if record_attempted {
        LedgerPolicy::AllAttempted
    } else {
        config.ledger_policy
    };

    let runner = SystemRunner::new();
    let hosts = inventory::from_config(&config, runner);
    let report = Distributor::new(&config, runner, hosts).distribute_with_policy(policy)?;

    write_response(serde_json::to_value(&report)?)
}

/// Redeem the credential on this host.
///
/// With a plan, the redeemed secret also opens one directory session in
/// which the plan runs before the ticket is destroyed.
pub fn client_install(
    config_path: &Path,
    server: &str,
    domain: &str,
    wait_limit: Option<u64>,
    install_with_dns: bool,
    plan_path: Option<&Path>,
) -> CliResult<()> {
    let config = load_config(config_path)?;
    let plan = plan_path.map(DirectoryPlan::load).transpose()?;
    let wait_limit = wait_limit
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.wait_limit());
    let target = InstallTarget::new(server, domain).with_dns(install_with_dns);

    let response = install_client(&config, &SystemRunner::new(), &target, wait_limit, plan.as_ref())?;
    write_response(response)
}

fn install_client<R: CommandRunner>(
    config: &BootstrapConfig,
    runner: &R,
    target: &InstallTarget,
    wait_limit: Duration,
    plan: Option<&DirectoryPlan>,
) -> CliResult<Value> {
    let redeemer = ClientRedeemer::new(config, runner);
    let plan = match plan {
        Some(plan) => plan,
        None => {
            let report = redeemer.await_and_install(target, wait_limit)?;
            return Ok(serde_json::to_value(&report)?);
        }
    };

    let (report, session) = redeemer.await_install_and_open(target, wait_limit)?;
    let applied = plan.apply(&session);
    let released = session.release();
    let applied = applied?;
    released?;

    Ok(json!({
        "redemption": report,
        "plan": applied,
    }))
}

/// Apply a directory plan inside one session
pub fn apply(config_path: &Path, plan_path: &Path, preserve_credential: bool) -> CliResult<()> {
    let config = load_config(config_path)?;
    let plan = DirectoryPlan::load(plan_path)?;
    let settings = SessionSettings::from_config(&config).preserve_credential(preserve_credential);

    let runner = SystemRunner::new();
    let report = with_session(&runner, &config.credential_file(), settings, |session| {
        plan.apply(session)
    })?;

    write_response(serde_json::to_value(&report)?)
}

/// Create the configured local users and their groups
pub fn local_accounts(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let outcomes =
        LocalAccounts::new(&config, SystemRunner::new()).ensure_required_users(&config.required_users)?;

    let mut users = Map::new();
    for (name, outcome) in outcomes {
        users.insert(name, serde_json::to_value(outcome)?);
    }
    write_response(json!({ "users": Value::Object(users) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Secret;
    use crate::exec::ScriptedRunner;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> BootstrapConfig {
        let mut config = BootstrapConfig::default();
        config.password_dir = dir.path().to_path_buf();
        config
    }

    fn ipa_subcommands(runner: &ScriptedRunner) -> Vec<String> {
        runner
            .calls_to("ipa")
            .iter()
            .map(|c| c.args[0].clone())
            .collect()
    }

    // =========================================================================
    // generate --register
    // =========================================================================

    #[test]
    fn test_generate_registers_robot_with_new_secret() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let admin_file = dir.path().join("admin-password");
        fs::write(&admin_file, "ADMINPASS").unwrap();

        let runner = ScriptedRunner::new();
        runner.on("ipa", &["user-show"], 2);
        let registration = Registration {
            admin_principal: "admin".to_string(),
            admin_password_file: admin_file.clone(),
            groups: vec!["admins".to_string()],
        };

        let response = generate_with(&config, &runner, Some(&registration)).unwrap();

        assert_eq!(response["registered"], "created");
        assert_eq!(
            ipa_subcommands(&runner),
            vec!["user-show", "user-add", "group-add-member", "user-mod"]
        );

        let secret = fs::read_to_string(config.credential_path()).unwrap();
        assert_eq!(secret.len(), config.secret_length);
        let modify = runner
            .calls_to("ipa")
            .into_iter()
            .find(|c| c.has_arg("user-mod"))
            .unwrap();
        assert!(modify.has_arg(&config.principal));
        assert_eq!(modify.stdin.as_deref(), Some(secret.as_str()));

        let kinit = &runner.calls_to("kinit")[0];
        assert!(kinit.has_arg("admin"));
        assert_eq!(kinit.stdin.as_deref(), Some("ADMINPASS"));
        assert_eq!(runner.count("kdestroy"), 1);
        assert!(admin_file.exists());
    }

    #[test]
    fn test_generate_resets_existing_robot() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let admin_file = dir.path().join("admin-password");
        fs::write(&admin_file, "ADMINPASS").unwrap();

        let runner = ScriptedRunner::new();
        let registration = Registration {
            admin_principal: "admin".to_string(),
            admin_password_file: admin_file,
            groups: vec!["admins".to_string()],
        };

        let response = generate_with(&config, &runner, Some(&registration)).unwrap();

        assert_eq!(response["registered"], "already_present");
        assert_eq!(
            ipa_subcommands(&runner),
            vec!["user-show", "group-add-member", "user-mod"]
        );
    }

    #[test]
    fn test_generate_without_registration_runs_nothing() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let runner = ScriptedRunner::new();

        let response = generate_with(&config, &runner, None).unwrap();

        assert!(response.get("registered").is_none());
        assert!(runner.calls().is_empty());
        assert!(config.credential_path().exists());
    }

    // =========================================================================
    // client-install --plan
    // =========================================================================

    #[test]
    fn test_client_install_applies_plan_before_ticket_is_destroyed() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config
            .credential_file()
            .write(&Secret::new("ONETIME"))
            .unwrap();
        let plan = DirectoryPlan::from_json(r#"{"services": ["HTTP/node1.example.com"]}"#).unwrap();

        let runner = ScriptedRunner::new();
        runner.on("ipa", &["service-show"], 2);
        let target = InstallTarget::new("ipa.example.com", "example.com");

        let response =
            install_client(&config, &runner, &target, Duration::ZERO, Some(&plan)).unwrap();

        let programs: Vec<String> = runner.calls().iter().map(|c| c.program.clone()).collect();
        assert_eq!(
            programs,
            vec!["ipa-client-install", "kinit", "ipa", "ipa", "kdestroy"]
        );
        assert_eq!(ipa_subcommands(&runner), vec!["service-show", "service-add"]);
        assert_eq!(response["plan"]["steps"][0]["outcome"], "created");
        assert!(response.get("redemption").is_some());
        assert!(!config.credential_path().exists());
    }

    #[test]
    fn test_client_install_plan_failure_still_destroys_ticket() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        config
            .credential_file()
            .write(&Secret::new("ONETIME"))
            .unwrap();
        let plan = DirectoryPlan::from_json(r#"{"services": ["HTTP/node1.example.com"]}"#).unwrap();

        let runner = ScriptedRunner::new();
        runner.on_output("ipa", &["service-show"], 1, "", "cannot connect to server");
        let target = InstallTarget::new("ipa.example.com", "example.com");

        let err = install_client(&config, &runner, &target, Duration::ZERO, Some(&plan)).unwrap_err();

        assert_eq!(err.code_str(), "IPA_DIRECTORY_QUERY_FAILED");
        assert_eq!(runner.count("kdestroy"), 1);
        assert_eq!(runner.count("ipa-client-install"), 1);
    }
}
