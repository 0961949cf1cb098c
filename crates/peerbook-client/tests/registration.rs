//! Registration flow end to end against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use peerbook_client::{
    ConnectionState, FailedStep, PeerbookConnection, RegistrationFlow, RegistrationOutcome,
    Transports, Watchdog,
};
use peerbook_core::{ClientConfig, EntitlementSnapshot, RegistryId};
use peerbook_test_utils::{
    AdminScript, FakeIdentity, FakePushConnector, FakeSessionFactory, FakeSubscription,
    ScriptedOperator,
};

const REGISTER_REPLY: &str = r#"{"QR":"otpauth://totp/peerbook:u-42","ID":"u-42"}"#;

struct Setup {
    conn: Arc<PeerbookConnection>,
    sessions: Arc<FakeSessionFactory>,
    push: Arc<FakePushConnector>,
    subscription: Arc<FakeSubscription>,
    operator: Arc<ScriptedOperator>,
    watchdog: Watchdog,
}

impl Setup {
    fn new(script: AdminScript, operator: ScriptedOperator) -> Self {
        let sessions = FakeSessionFactory::auto_connect(&script);
        let push = FakePushConnector::auto_ready();
        let subscription = Arc::new(FakeSubscription::new(EntitlementSnapshot::default()));
        let transports = Transports {
            sessions: sessions.clone(),
            push: push.clone(),
            subscription: subscription.clone(),
        };
        let conn = PeerbookConnection::new(&ClientConfig::new("pb.test", "fp"), transports).unwrap();
        Self {
            conn: Arc::new(conn),
            sessions,
            push,
            subscription,
            operator: Arc::new(operator),
            watchdog: Watchdog::new(),
        }
    }

    fn flow(&self, identity: FakeIdentity, timeout: Duration) -> RegistrationFlow {
        RegistrationFlow::new(
            Arc::clone(&self.conn),
            self.operator.clone(),
            Arc::new(identity),
            self.watchdog.clone(),
            timeout,
        )
    }
}

fn script() -> AdminScript {
    AdminScript::new()
        .reply("ping", "TBD")
        .reply("register", REGISTER_REPLY)
        .replies("verify", &["0", "1"])
}

#[tokio::test]
async fn registers_verifies_and_connects() {
    let setup = Setup::new(
        script(),
        ScriptedOperator::new([
            Some(""),
            Some("ops@example.com"),
            Some("000000"),
            Some("123456"),
        ]),
    );
    let flow = setup.flow(
        FakeIdentity::new("fp-device").with_device_name("laptop"),
        Duration::from_secs(60),
    );

    let outcome = flow.run().await;

    assert_eq!(
        outcome,
        RegistrationOutcome::Registered {
            uid: "u-42".into()
        }
    );
    let session = setup.sessions.last().unwrap();
    let register = session
        .requests()
        .into_iter()
        .find(|r| r.name() == "register")
        .unwrap();
    assert_eq!(
        register.args(),
        &["ops@example.com".to_string(), "laptop".to_string()]
    );
    assert_eq!(session.requests_named("verify"), 2);
    assert_eq!(setup.sessions.created(), 1);

    assert_eq!(
        setup.operator.prompts(),
        ["Peer name", "Recovery email", "OTP", "OTP"]
    );
    assert!(setup.operator.wrote("Please scan this QR code"));
    assert!(setup.operator.wrote("otpauth://totp/peerbook:u-42"));
    assert!(setup.operator.wrote("Invalid OTP, please try again"));
    assert!(setup.operator.wrote("Validated!"));
    assert_eq!(setup.operator.restores(), 1);

    assert_eq!(setup.subscription.logins(), ["u-42"]);
    assert_eq!(
        setup.conn.registry_id(),
        RegistryId::Confirmed("u-42".into())
    );
    assert!(setup.conn.is_open());
    assert_eq!(setup.conn.state(), ConnectionState::Active);
    assert!(!setup.watchdog.is_armed());
}

#[tokio::test]
async fn cancel_at_name_prompt_aborts() {
    let setup = Setup::new(script(), ScriptedOperator::new([None::<&str>]));
    let flow = setup.flow(FakeIdentity::new("fp"), Duration::from_secs(60));

    assert_eq!(flow.run().await, RegistrationOutcome::Cancelled);
    assert_eq!(setup.sessions.created(), 0);
    assert!(setup.operator.wrote("Cancelled. Use `subscribe` to try again"));
    assert_eq!(setup.operator.restores(), 1);
}

#[tokio::test]
async fn malformed_reply_fails_parse_step() {
    let script = AdminScript::new()
        .reply("ping", "TBD")
        .reply("register", "<html>oops</html>");
    let setup = Setup::new(
        script,
        ScriptedOperator::new([Some("srv"), Some("ops@example.com")]),
    );
    let flow = setup.flow(FakeIdentity::new("fp"), Duration::from_secs(60));

    assert_eq!(
        flow.run().await,
        RegistrationOutcome::Failed(FailedStep::ParseReply)
    );
    assert!(setup.operator.wrote("Registration failed"));
    assert_eq!(setup.operator.restores(), 1);
    assert_eq!(setup.push.opened(), 0);
}

#[tokio::test]
async fn register_command_failure() {
    // No "register" script: channel open is rejected.
    let script = AdminScript::new().reply("ping", "TBD");
    let setup = Setup::new(
        script,
        ScriptedOperator::new([Some("srv"), Some("ops@example.com")]),
    );
    let flow = setup.flow(FakeIdentity::new("fp"), Duration::from_secs(60));

    assert_eq!(
        flow.run().await,
        RegistrationOutcome::Failed(FailedStep::Register)
    );
    assert!(setup.operator.wrote("Please try again and if persists, `support`"));
}

#[tokio::test]
async fn fingerprint_failure_stops_before_verify() {
    let setup = Setup::new(
        script(),
        ScriptedOperator::new([Some("srv"), Some("ops@example.com")]),
    );
    let flow = setup.flow(FakeIdentity::failing(), Duration::from_secs(60));

    assert_eq!(
        flow.run().await,
        RegistrationOutcome::Failed(FailedStep::Fingerprint)
    );
    assert!(setup.operator.wrote("Failed to get fingerprint"));
    assert_eq!(setup.sessions.last().unwrap().requests_named("verify"), 0);
    assert!(!setup.watchdog.is_armed());
}

#[tokio::test]
async fn cancelled_verification_aborts() {
    let setup = Setup::new(
        script(),
        ScriptedOperator::new([Some("srv"), Some("ops@example.com"), None]),
    );
    let flow = setup.flow(FakeIdentity::new("fp"), Duration::from_secs(60));

    assert_eq!(flow.run().await, RegistrationOutcome::Cancelled);
    assert!(setup.subscription.logins().is_empty());
    assert!(!setup.operator.wrote("Validated!"));
    assert_eq!(setup.push.opened(), 0);
}

#[tokio::test]
async fn subscription_login_failure() {
    let setup = Setup::new(
        AdminScript::new()
            .reply("ping", "TBD")
            .reply("register", REGISTER_REPLY)
            .reply("verify", "1"),
        ScriptedOperator::new([Some("srv"), Some("ops@example.com"), Some("123456")]),
    );
    setup.subscription.fail_login(true);
    let flow = setup.flow(FakeIdentity::new("fp"), Duration::from_secs(60));

    assert_eq!(
        flow.run().await,
        RegistrationOutcome::Failed(FailedStep::SubscriptionLogin)
    );
    assert_eq!(setup.push.opened(), 0);
}

#[tokio::test]
async fn push_failure_after_validation_is_reported() {
    let setup = Setup::new(
        AdminScript::new()
            .reply("ping", "TBD")
            .reply("register", REGISTER_REPLY)
            .reply("verify", "1"),
        ScriptedOperator::new([Some("srv"), Some("ops@example.com"), Some("123456")]),
    );
    setup.push.fail_open(true);
    let flow = setup.flow(FakeIdentity::new("fp"), Duration::from_secs(60));

    assert_eq!(
        flow.run().await,
        RegistrationOutcome::Registered {
            uid: "u-42".into()
        }
    );
    assert!(setup.operator.wrote("Failed to connect to PeerBook"));
    assert_eq!(setup.operator.restores(), 1);
}

#[tokio::test]
async fn watchdog_reports_slow_enrollment() {
    let setup = Setup::new(
        script(),
        ScriptedOperator::new([Some("srv"), Some("ops@example.com"), None])
            .with_answer_delay(Duration::from_millis(80)),
    );
    let flow = setup.flow(FakeIdentity::new("fp"), Duration::from_millis(20));

    // The OTP prompt outlives the watchdog before it is cancelled.
    assert_eq!(flow.run().await, RegistrationOutcome::Cancelled);
    assert!(setup.operator.wrote("Timed out waiting for OTP"));
    assert!(!setup.watchdog.is_armed());
}
