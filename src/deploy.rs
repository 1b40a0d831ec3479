//! Checkout and deploy runs for a project.

use std::path::Path;

use crate::deploy_log::DeployLogs;
use crate::errors::Result;
use crate::notify::{Notification, NotifierSet};
use crate::project::{CHECKOUT_OVERRIDE_SCRIPT, DEPLOY_SCRIPT};
use crate::runner::{CommandSpec, OutputSink, ProcessRunner, RunningProcess, is_executable};

/// Steps of the built-in checkout, in order. Any failing step stops the rest.
const CHECKOUT_STEPS: &[&str] = &[
    "git fetch --prune",
    "git checkout -f \"$DEPLOY_COMMIT\"",
    "git reset --hard \"$DEPLOY_COMMIT\"",
    "git clean -fdx",
    "git submodule sync",
    "git submodule init",
    "git submodule update --recursive",
];

pub fn checkout_script() -> String {
    CHECKOUT_STEPS.join(" && ")
}

/// The command a checkout of `reference` runs in `project_dir`.
pub fn checkout_command(name: &str, project_dir: &Path, reference: &str) -> CommandSpec {
    let label = format!("checkout of {}", name);
    let override_script = project_dir.join(CHECKOUT_OVERRIDE_SCRIPT);
    let spec = if is_executable(&override_script) {
        CommandSpec::executable(label, project_dir, override_script)
    } else {
        CommandSpec::script(label, project_dir, &checkout_script())
    };
    spec.env("DEPLOY_COMMIT", reference)
}

pub fn deploy_command(name: &str, project_dir: &Path, env: &str, user: &str) -> CommandSpec {
    CommandSpec::executable(
        format!("deploy of {} to {}", name, env),
        project_dir,
        project_dir.join(DEPLOY_SCRIPT),
    )
    .env("DEPLOY_ENV", env)
    .env("DEPLOY_USER", user)
}

/// Starts checkouts and deploys on the shared runner.
#[derive(Clone)]
pub struct Deployer {
    runner: ProcessRunner,
    logs: DeployLogs,
    notifier: NotifierSet,
}

impl Deployer {
    pub fn new(runner: ProcessRunner, logs: DeployLogs, notifier: NotifierSet) -> Self {
        Self {
            runner,
            logs,
            notifier,
        }
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn logs(&self) -> &DeployLogs {
        &self.logs
    }

    /// Check out `reference` in the project's working tree. Output is streamed only.
    pub fn checkout(&self, name: &str, project_dir: &Path, reference: &str) -> Result<RunningProcess> {
        let spec = checkout_command(name, project_dir, reference);
        tracing::info!(project = name, reference, "starting checkout");
        self.runner.start(spec, Vec::new())
    }

    /// Run the project's deploy script for `env` on behalf of `user`.
    ///
    /// The output is also written to a fresh deploy log. Once the script has
    /// exited, whatever its status, a `deployed` notification is sent.
    pub async fn deploy(
        &self,
        name: &str,
        project_dir: &Path,
        env: &str,
        user: &str,
    ) -> Result<RunningProcess> {
        let spec = deploy_command(name, project_dir, env, user);
        // fail before rotating logs when the run could not start anyway
        let slot = self.runner.reserve()?;
        self.runner.preflight(&spec)?;
        let log: Box<dyn OutputSink> = Box::new(self.logs.create(name).await?);

        tracing::info!(project = name, env, user, "starting deploy");
        let mut running = slot.start(spec, vec![log])?;

        let (completion_tx, completion_rx) = tokio::sync::oneshot::channel();
        let completion = std::mem::replace(&mut running.completion, completion_rx);
        let notifier = self.notifier.clone();
        let notification = Notification::deployed(name, user, env);
        tokio::spawn(async move {
            let outcome = completion.await;
            notifier.emit(notification);
            if let Ok(outcome) = outcome {
                let _ = completion_tx.send(outcome);
            }
        });
        Ok(running)
    }
}
