// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Single pseudo invocations: environment handoff and outcome collection

mod support;

use std::time::Duration;

use pseudo_harness::env::{IMAGE_ROOTFS, PSEUDO_DISABLED, ROOTFS_DIR_NAME};
use pseudo_harness::settings::TERMINATED_EXIT_CODE;
use pseudo_harness::{
    collect_outcome, run_pseudo_client, OutcomeChecks, PseudoEnv, PseudoError, PseudoProcess,
};
use support::{init_tracing, StubPseudo};

#[tokio::test]
async fn client_sees_pseudo_env_over_ambient_env() {
    init_tracing();
    let stub = StubPseudo::serving();
    let case = stub.client("print_env.sh", "env");

    let outcome = run_pseudo_client(&stub.settings(), &case, &[], &OutcomeChecks::client())
        .await
        .unwrap();

    let rootfs = stub.work.path().join(ROOTFS_DIR_NAME);
    let stdout = outcome.stdout();
    assert!(stdout.contains(&format!("{PSEUDO_DISABLED}=0\n")), "{stdout}");
    assert!(stdout.contains(&format!("{IMAGE_ROOTFS}={}\n", rootfs.display())));
    assert!(stdout.contains(&format!("TMPDIR={}\n", stub.work.path().display())));
    // Ambient variables survive the merge
    assert!(stdout.contains("PATH="), "{stdout}");
}

#[tokio::test]
async fn disabled_settings_switch_pseudo_to_pass_through() {
    init_tracing();
    let stub = StubPseudo::serving();
    let case = stub.client("print_flag.sh", r#"printf '%s' "$PSEUDO_DISABLED""#);

    let outcome = run_pseudo_client(
        &stub.settings().with_enabled(false),
        &case,
        &[],
        &OutcomeChecks::client(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.stdout(), "1");
}

#[tokio::test]
async fn stderr_check_rejects_diagnostics() {
    init_tracing();
    let stub = StubPseudo::serving();
    let case = stub.client("warns.sh", "echo 'pseudo: warning' >&2");

    let err = run_pseudo_client(
        &stub.settings(),
        &case,
        &[],
        &OutcomeChecks::client().with_empty_output(false, true),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, PseudoError::NonEmptyStderr { ref stderr, .. } if stderr == "pseudo: warning\n"),
        "{err:?}"
    );
}

#[tokio::test]
async fn stop_handle_terminates_collected_process() {
    init_tracing();
    let stub = StubPseudo::serving();
    let env = PseudoEnv::build(&stub.settings()).unwrap();

    let mut server = PseudoProcess::spawn(&env, ["-f"]).unwrap();
    let mut stop = server.stop_handle();
    let collector = tokio::spawn(async move {
        collect_outcome(server, &OutcomeChecks::server()).await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.request_stop();

    let outcome = collector.await.unwrap().unwrap();
    assert_eq!(outcome.exit_code(), TERMINATED_EXIT_CODE);
}

#[tokio::test]
async fn timeout_without_allow_list_still_applies() {
    init_tracing();
    let stub = StubPseudo::serving();
    let env = PseudoEnv::build(&stub.settings()).unwrap();
    let process = PseudoProcess::spawn(&env, ["-f"]).unwrap();
    let pid = process.id().expect("running process has a pid");

    let checks = OutcomeChecks::default().with_timeout(Duration::from_millis(300));
    let err = collect_outcome(process, &checks).await.unwrap_err();

    assert!(matches!(err, PseudoError::Timeout { .. }), "{err:?}");
    assert!(!support::is_running(nix::unistd::Pid::from_raw(pid as i32)));
}

#[tokio::test]
async fn vanished_tool_is_install_error_at_launch() {
    init_tracing();
    let stub = StubPseudo::serving();
    let env = PseudoEnv::build(&stub.settings()).unwrap();
    std::fs::remove_file(env.tool_path()).unwrap();

    let err = PseudoProcess::spawn(&env, ["-f"]).unwrap_err();
    assert!(matches!(err, PseudoError::Install { .. }), "{err:?}");
}
