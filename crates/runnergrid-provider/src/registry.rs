//! Runner registration — binding worker processes to the CI provider.
//!
//! `register` is the one place a registration token is consumed: it runs
//! the install script on the compute instance (which registers the runner
//! synchronously) and then resolves the provider-assigned runner id.
//! `deregister` is idempotent: a runner the provider no longer knows is an
//! already-satisfied postcondition.

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use runnergrid_compute::{ComputeHandle, ComputeProvider};
use runnergrid_state::FleetSpec;

use crate::client::ProviderClient;
use crate::error::{DeregisterError, RegisterError, StatusError, TokenError};
use crate::token::RegistrationToken;

/// Provider-side view of a registered runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerInfo {
    pub id: String,
    pub name: String,
    pub online: bool,
    pub busy: bool,
    pub labels: Vec<String>,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredRunner {
    pub id: String,
    pub name: String,
}

/// Registration and status operations against the CI provider.
#[async_trait]
pub trait RunnerRegistry: Send + Sync {
    /// Fetch a single-use, time-boxed registration token for the fleet.
    async fn registration_token(&self, fleet: &FleetSpec)
    -> Result<RegistrationToken, TokenError>;

    /// Bind a worker process running on `handle` to the provider, applying
    /// the fleet's labels and the ephemeral flag (the worker self-terminates
    /// after exactly one job). Consumes the token.
    async fn register(
        &self,
        handle: &ComputeHandle,
        fleet: &FleetSpec,
        name: &str,
        token: RegistrationToken,
    ) -> Result<RegisteredRunner, RegisterError>;

    /// Remove a runner registration. Deregistering an id the provider no
    /// longer knows succeeds silently.
    async fn deregister(&self, fleet: &FleetSpec, runner_id: &str)
    -> Result<(), DeregisterError>;

    /// Fetch the provider's view of one runner.
    async fn status(&self, fleet: &FleetSpec, runner_id: &str) -> Result<RunnerInfo, StatusError>;
}

// ── Wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenWire {
    token: String,
    expires_at: u64,
}

#[derive(Debug, Deserialize)]
struct RunnerList {
    runners: Vec<RunnerWire>,
}

#[derive(Debug, Deserialize)]
struct RunnerWire {
    id: u64,
    name: String,
    status: String,
    busy: bool,
    labels: Vec<LabelWire>,
}

#[derive(Debug, Deserialize)]
struct LabelWire {
    name: String,
}

impl From<RunnerWire> for RunnerInfo {
    fn from(wire: RunnerWire) -> Self {
        RunnerInfo {
            id: wire.id.to_string(),
            name: wire.name,
            online: wire.status == "online",
            busy: wire.busy,
            labels: wire.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

// ── HTTP implementation ───────────────────────────────────────────

/// Registry backed by the provider's HTTP API plus command execution on the
/// compute instance.
pub struct HttpRunnerRegistry {
    client: ProviderClient,
    compute: Arc<dyn ComputeProvider>,
}

impl HttpRunnerRegistry {
    pub fn new(client: ProviderClient, compute: Arc<dyn ComputeProvider>) -> Self {
        Self { client, compute }
    }
}

#[async_trait]
impl RunnerRegistry for HttpRunnerRegistry {
    async fn registration_token(
        &self,
        fleet: &FleetSpec,
    ) -> Result<RegistrationToken, TokenError> {
        let path = format!("/repos/{}/actions/runners/registration-token", fleet.repo);
        let resp = self.client.post(&path, None).await?;

        match resp.status {
            s if s.is_success() => {
                let wire: TokenWire = resp
                    .json()
                    .map_err(|e| TokenError::Unavailable(format!("bad token payload: {e}")))?;
                debug!(fleet_id = %fleet.id, expires_at = wire.expires_at, "registration token fetched");
                Ok(RegistrationToken::new(wire.token, wire.expires_at))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TokenError::Unauthorized),
            _ => Err(TokenError::Unavailable(self.client.error_body(&resp))),
        }
    }

    async fn register(
        &self,
        handle: &ComputeHandle,
        fleet: &FleetSpec,
        name: &str,
        token: RegistrationToken,
    ) -> Result<RegisteredRunner, RegisterError> {
        if token.is_expired(epoch_secs()) {
            return Err(RegisterError::TokenExpired);
        }
        let secret = token.reveal();
        let script = install_script(&self.client.base_url(), fleet, name, &secret);

        let result = self.compute.run_command(handle, &script).await?;
        if !result.success() {
            // The token rides in the script's argv; scrub it from anything
            // the instance echoed back.
            let stderr = result.stderr.replace(&secret, "[REDACTED]");
            return Err(RegisterError::Install {
                exit_code: result.exit_code,
                stderr: self.client.redact(&stderr),
            });
        }

        // The config step registers synchronously; resolve the assigned id.
        let path = format!("/repos/{}/actions/runners?name={name}", fleet.repo);
        let resp = self.client.get(&path).await?;
        if !resp.status.is_success() {
            return Err(RegisterError::Unavailable(self.client.error_body(&resp)));
        }
        let list: RunnerList = resp.json().map_err(RegisterError::Lookup)?;

        match list.runners.into_iter().find(|r| r.name == name) {
            Some(runner) => {
                info!(fleet_id = %fleet.id, runner_id = runner.id, %name, "runner registered");
                Ok(RegisteredRunner {
                    id: runner.id.to_string(),
                    name: runner.name,
                })
            }
            None => Err(RegisterError::Lookup(format!(
                "runner {name} did not appear after install"
            ))),
        }
    }

    async fn deregister(
        &self,
        fleet: &FleetSpec,
        runner_id: &str,
    ) -> Result<(), DeregisterError> {
        let path = format!("/repos/{}/actions/runners/{runner_id}", fleet.repo);
        let resp = self.client.delete(&path).await?;

        // 404 means the registration is already gone; the postcondition
        // holds, so this succeeds silently.
        if resp.status.is_success() || resp.status == StatusCode::NOT_FOUND {
            debug!(fleet_id = %fleet.id, %runner_id, "runner deregistered");
            Ok(())
        } else {
            Err(DeregisterError::Rejected(self.client.error_body(&resp)))
        }
    }

    async fn status(&self, fleet: &FleetSpec, runner_id: &str) -> Result<RunnerInfo, StatusError> {
        let path = format!("/repos/{}/actions/runners/{runner_id}", fleet.repo);
        let resp = self.client.get(&path).await?;

        match resp.status {
            s if s.is_success() => {
                let wire: RunnerWire = resp.json().map_err(StatusError::Unavailable)?;
                Ok(wire.into())
            }
            StatusCode::NOT_FOUND => Err(StatusError::NotFound(runner_id.to_string())),
            _ => Err(StatusError::Unavailable(self.client.error_body(&resp))),
        }
    }
}

/// Build the one-shot install script run on a fresh instance.
fn install_script(provider_url: &str, fleet: &FleetSpec, name: &str, secret: &str) -> String {
    let labels = fleet.labels.join(",");
    let mut script = format!(
        "/opt/runner/config.sh --unattended --url {provider_url}/{repo} --token {secret} \
         --name {name} --labels {labels} --ephemeral",
        repo = fleet.repo,
    );
    if let Some(group) = &fleet.runner_group {
        script.push_str(&format!(" --runnergroup {group}"));
    }
    script.push_str(" && /opt/runner/svc.sh start");
    script
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testserver;
    use runnergrid_compute::{CommandResult, ComputeResult, ComputeSpec, DevCompute};
    use runnergrid_state::ScalingConfig;
    use std::time::Duration;

    fn fleet() -> FleetSpec {
        FleetSpec {
            id: "linux-x64".to_string(),
            repo: "acme/widgets".to_string(),
            labels: vec!["self-hosted".to_string(), "linux".to_string()],
            runner_group: Some("build".to_string()),
            scaling: ScalingConfig {
                min_runners: 0,
                max_runners: 10,
                jobs_per_runner: 1,
                scale_up_threshold: 0,
                scale_down_threshold: 0,
                cooldown_seconds: 0,
            },
            enabled: true,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn client(addr: &str) -> ProviderClient {
        ProviderClient::new(addr, "tok-abc".to_string())
            .unwrap()
            .with_timeout(Duration::from_secs(2))
    }

    fn far_future() -> u64 {
        epoch_secs() + 3600
    }

    /// Compute double whose commands always fail with the given output.
    struct FailingCommand {
        inner: DevCompute,
        exit_code: i32,
        stderr: String,
    }

    #[async_trait]
    impl ComputeProvider for FailingCommand {
        async fn provision(&self, spec: &ComputeSpec) -> ComputeResult<ComputeHandle> {
            self.inner.provision(spec).await
        }
        async fn destroy(&self, handle: &ComputeHandle) -> ComputeResult<()> {
            self.inner.destroy(handle).await
        }
        async fn run_command(
            &self,
            _handle: &ComputeHandle,
            _script: &str,
        ) -> ComputeResult<CommandResult> {
            Ok(CommandResult {
                exit_code: self.exit_code,
                stdout: String::new(),
                stderr: self.stderr.clone(),
            })
        }
    }

    #[test]
    fn install_script_carries_labels_and_ephemeral_flag() {
        let script = install_script("http://ci:80", &fleet(), "rg-linux-x64-0", "s3cret");
        assert!(script.contains("--labels self-hosted,linux"));
        assert!(script.contains("--ephemeral"));
        assert!(script.contains("--runnergroup build"));
        assert!(script.contains("--token s3cret"));
        assert!(script.contains("http://ci:80/acme/widgets"));
    }

    #[tokio::test]
    async fn token_fetch_success() {
        let addr = testserver::serve(vec![(
            201,
            r#"{"token":"REG-TOKEN","expires_at":99999999999}"#.to_string(),
        )])
        .await;
        let registry = HttpRunnerRegistry::new(client(&addr), Arc::new(DevCompute::new()));

        let token = registry.registration_token(&fleet()).await.unwrap();
        assert!(!token.is_expired(epoch_secs()));
    }

    #[tokio::test]
    async fn token_fetch_unauthorized() {
        let addr = testserver::serve(vec![(401, r#"{"message":"bad creds"}"#.to_string())]).await;
        let registry = HttpRunnerRegistry::new(client(&addr), Arc::new(DevCompute::new()));

        let err = registry.registration_token(&fleet()).await.unwrap_err();
        assert!(matches!(err, TokenError::Unauthorized));
    }

    #[tokio::test]
    async fn register_happy_path() {
        let runners = r#"{"runners":[
            {"id":42,"name":"rg-linux-x64-0","status":"offline","busy":false,
             "labels":[{"name":"self-hosted"},{"name":"linux"}]}
        ]}"#;
        let addr = testserver::serve(vec![(200, runners.to_string())]).await;
        let compute = Arc::new(DevCompute::new());
        let handle = compute
            .provision(&ComputeSpec {
                name: "rg-linux-x64-0".to_string(),
                image: "runner-default".to_string(),
                size: "standard-2".to_string(),
            })
            .await
            .unwrap();
        let registry = HttpRunnerRegistry::new(client(&addr), compute);

        let token = RegistrationToken::new("REG".to_string(), far_future());
        let runner = registry
            .register(&handle, &fleet(), "rg-linux-x64-0", token)
            .await
            .unwrap();

        assert_eq!(runner.id, "42");
        assert_eq!(runner.name, "rg-linux-x64-0");
    }

    #[tokio::test]
    async fn register_rejects_expired_token() {
        let registry = HttpRunnerRegistry::new(
            client("127.0.0.1:1"),
            Arc::new(DevCompute::new()),
        );
        let handle = ComputeHandle {
            id: "dev-0".to_string(),
            address: "127.0.0.1:42000".to_string(),
        };

        let token = RegistrationToken::new("REG".to_string(), 1);
        let err = registry
            .register(&handle, &fleet(), "rg-0", token)
            .await
            .unwrap_err();
        assert!(matches!(err, RegisterError::TokenExpired));
    }

    #[tokio::test]
    async fn register_install_failure_scrubs_token() {
        let compute = Arc::new(FailingCommand {
            inner: DevCompute::new(),
            exit_code: 7,
            stderr: "config.sh: token REG-SECRET rejected".to_string(),
        });
        let handle = compute
            .provision(&ComputeSpec {
                name: "rg-0".to_string(),
                image: "runner-default".to_string(),
                size: "standard-2".to_string(),
            })
            .await
            .unwrap();
        let registry = HttpRunnerRegistry::new(client("127.0.0.1:1"), compute);

        let token = RegistrationToken::new("REG-SECRET".to_string(), far_future());
        let err = registry
            .register(&handle, &fleet(), "rg-0", token)
            .await
            .unwrap_err();

        match err {
            RegisterError::Install { exit_code, stderr } => {
                assert_eq!(exit_code, 7);
                assert!(!stderr.contains("REG-SECRET"));
                assert!(stderr.contains("[REDACTED]"));
            }
            other => panic!("expected Install error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_lookup_miss() {
        let addr = testserver::serve(vec![(200, r#"{"runners":[]}"#.to_string())]).await;
        let compute = Arc::new(DevCompute::new());
        let handle = compute
            .provision(&ComputeSpec {
                name: "rg-0".to_string(),
                image: "runner-default".to_string(),
                size: "standard-2".to_string(),
            })
            .await
            .unwrap();
        let registry = HttpRunnerRegistry::new(client(&addr), compute);

        let token = RegistrationToken::new("REG".to_string(), far_future());
        let err = registry
            .register(&handle, &fleet(), "rg-0", token)
            .await
            .unwrap_err();
        assert!(matches!(err, RegisterError::Lookup(_)));
    }

    #[tokio::test]
    async fn deregister_is_idempotent_on_404() {
        let addr = testserver::serve(vec![
            (200, "{}".to_string()),
            (404, r#"{"message":"gone"}"#.to_string()),
        ])
        .await;
        let registry = HttpRunnerRegistry::new(client(&addr), Arc::new(DevCompute::new()));

        // First call removes, second hits 404 — both succeed.
        registry.deregister(&fleet(), "42").await.unwrap();
        registry.deregister(&fleet(), "42").await.unwrap();
    }

    #[tokio::test]
    async fn status_maps_online_and_busy() {
        let body = r#"{"id":42,"name":"rg-0","status":"online","busy":true,
                       "labels":[{"name":"self-hosted"}]}"#;
        let addr = testserver::serve(vec![(200, body.to_string())]).await;
        let registry = HttpRunnerRegistry::new(client(&addr), Arc::new(DevCompute::new()));

        let info = registry.status(&fleet(), "42").await.unwrap();
        assert!(info.online);
        assert!(info.busy);
        assert_eq!(info.labels, vec!["self-hosted".to_string()]);
    }

    #[tokio::test]
    async fn status_not_found() {
        let addr = testserver::serve(vec![(404, r#"{"message":"nope"}"#.to_string())]).await;
        let registry = HttpRunnerRegistry::new(client(&addr), Arc::new(DevCompute::new()));

        let err = registry.status(&fleet(), "42").await.unwrap_err();
        assert!(matches!(err, StatusError::NotFound(id) if id == "42"));
    }
}
