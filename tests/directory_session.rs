//! Directory Session Tests
//!
//! - The ticket is destroyed exactly once whatever ends the session
//! - Undecidable existence checks never lead to a create
//! - Keytab retrieval and password staging touch the filesystem as expected

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::panic::{self, AssertUnwindSafe};

use ipa_bootstrap::config::BootstrapConfig;
use ipa_bootstrap::credential::{CredentialFile, Secret};
use ipa_bootstrap::directory::{
    with_session, DirectorySession, KeytabRequest, Outcome, SessionSettings, UserSpec,
};
use ipa_bootstrap::exec::ScriptedRunner;
use ipa_bootstrap::BootstrapError;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

struct Fixture {
    dir: TempDir,
    credential: CredentialFile,
    settings: SessionSettings,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut config = BootstrapConfig::default();
    config.password_dir = dir.path().to_path_buf();
    let credential = config.credential_file();
    credential.write(&Secret::new("K7Q2M9X4B1R8T3Z6")).unwrap();
    Fixture {
        settings: SessionSettings::from_config(&config),
        dir,
        credential,
    }
}

// =============================================================================
// Ticket Lifecycle
// =============================================================================

#[test]
fn test_failing_operation_still_destroys_ticket_once() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    runner
        .on("ipa", &["user-show"], 2)
        .on_output("ipa", &["user-add"], 1, "", "ipa: ERROR: Insufficient access");

    let err = with_session(&runner, &fx.credential, fx.settings.clone(), |session| {
        session.create_user(&UserSpec::new("alice"))
    })
    .unwrap_err();

    assert_eq!(err.code(), "IPA_DIRECTORY_COMMAND_FAILED");
    assert!(err.to_string().contains("user-add"));
    assert_eq!(runner.count("kdestroy"), 1);
    assert!(!fx.credential.exists());
}

#[test]
fn test_panic_inside_session_destroys_ticket() {
    let fx = fixture();
    let runner = ScriptedRunner::new();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        with_session(&runner, &fx.credential, fx.settings.clone(), |_| -> Result<(), BootstrapError> {
            panic!("bootstrap step crashed")
        })
    }));

    assert!(result.is_err());
    assert_eq!(runner.count("kdestroy"), 1);
}

#[test]
fn test_operation_error_wins_over_release_error() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    runner
        .on("kdestroy", &[], 1)
        .on("ipa", &["service-show"], 1);

    let err = with_session(&runner, &fx.credential, fx.settings.clone(), |session| {
        session.create_service_principal("HTTP/node1.example.com")
    })
    .unwrap_err();

    assert_eq!(err.code(), "IPA_DIRECTORY_QUERY_FAILED");
    assert_eq!(runner.count("kdestroy"), 1);
}

#[test]
fn test_wrong_secret_leaves_no_ticket_and_keeps_file() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    runner.on_output(
        "kinit",
        &["robot-admin"],
        1,
        "",
        "kinit: Password incorrect while getting initial credentials",
    );

    let err = with_session(&runner, &fx.credential, fx.settings.clone(), |_| Ok(()))
        .unwrap_err();

    assert_eq!(err.code(), "IPA_AUTHENTICATION_FAILED");
    assert_eq!(runner.count("kdestroy"), 1);
    assert!(fx.credential.exists());
}

// =============================================================================
// Directory Objects
// =============================================================================

#[test]
fn test_query_failure_never_creates() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    runner.on_output("ipa", &["group-show"], 1, "", "ipa: ERROR: Ticket expired");

    let session = DirectorySession::acquire(&runner, &fx.credential, fx.settings.clone()).unwrap();
    let err = session.create_group("hadoop", "Hadoop users", &[]).unwrap_err();

    match err {
        BootstrapError::DirectoryQueryFailed { kind, name, reason } => {
            assert_eq!(kind, "group");
            assert_eq!(name, "hadoop");
            assert!(reason.contains("Ticket expired"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(runner.calls_to("ipa").iter().all(|c| !c.has_arg("group-add")));
}

#[test]
fn test_existing_objects_are_skipped() {
    let fx = fixture();
    let runner = ScriptedRunner::new();

    let session = DirectorySession::acquire(&runner, &fx.credential, fx.settings.clone()).unwrap();
    let user = UserSpec::new("alice")
        .groups(["hadoop"])
        .password(Secret::new("S3CR3T"));

    assert_eq!(session.create_user(&user).unwrap(), Outcome::AlreadyPresent);
    assert_eq!(
        session.create_group("hadoop", "Hadoop users", &[]).unwrap(),
        Outcome::AlreadyPresent
    );
    assert_eq!(runner.count("ipa"), 2);
    assert!(!fx.dir.path().join("alice-password").exists());
}

#[test]
fn test_new_user_gets_groups_and_password() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    runner.on("ipa", &["user-show"], 2);

    let session = DirectorySession::acquire(&runner, &fx.credential, fx.settings.clone()).unwrap();
    let user = UserSpec::new("alice")
        .groups(["hadoop", "admins"])
        .password(Secret::new("S3CR3T"));
    assert_eq!(session.create_user(&user).unwrap(), Outcome::Created);

    let subcommands: Vec<String> = runner
        .calls_to("ipa")
        .iter()
        .map(|c| c.args[0].clone())
        .collect();
    assert_eq!(
        subcommands,
        vec!["user-show", "user-add", "group-add-member", "group-add-member", "user-mod"]
    );

    let staged = fx.dir.path().join("alice-password");
    assert_eq!(fs::read_to_string(&staged).unwrap(), "S3CR3T");
    assert_eq!(fs::metadata(&staged).unwrap().permissions().mode() & 0o777, 0o600);
}

#[test]
fn test_keytab_directory_and_ownership() {
    let fx = fixture();
    let runner = ScriptedRunner::new();
    let destination = fx.dir.path().join("keytabs").join("hue.service.keytab");

    let session = DirectorySession::acquire(&runner, &fx.credential, fx.settings.clone()).unwrap();
    session
        .fetch_keytab(&KeytabRequest {
            server: "ipa.example.com".to_string(),
            principal: "hue/node1.example.com".to_string(),
            realm: "EXAMPLE.COM".to_string(),
            destination: destination.clone(),
            owner: "hue".to_string(),
            group: "hadoop".to_string(),
            mode: "400".to_string(),
        })
        .unwrap();

    let keytab_dir = destination.parent().unwrap();
    assert!(keytab_dir.is_dir());
    assert_eq!(fs::metadata(keytab_dir).unwrap().permissions().mode() & 0o777, 0o555);

    let path = destination.to_string_lossy().to_string();
    let programs: Vec<String> = runner
        .calls()
        .into_iter()
        .filter(|c| c.program != "kinit")
        .map(|c| c.command_line())
        .collect();
    assert_eq!(
        programs,
        vec![
            format!("ipa-getkeytab -s ipa.example.com -p hue/node1.example.com@EXAMPLE.COM -k {}", path),
            format!("chown hue:hadoop {}", path),
            format!("chmod 400 {}", path),
        ]
    );
}
