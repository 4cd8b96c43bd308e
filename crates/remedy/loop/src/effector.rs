//! Effectors: the external actions that perform repairs.
//!
//! Effectors must be idempotent. The dispatcher re-invokes them on retry,
//! including after a timeout where the first invocation may have applied.

use std::collections::HashMap;
use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use remedy_types::{ActionId, Fault, FaultCategory};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{EffectorError, EffectorResult};

/// Input handed to an effector for one attempt.
#[derive(Debug, Clone)]
pub struct EffectorContext {
    pub action_id: ActionId,
    pub category: FaultCategory,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Faults of the action's category that triggered this dispatch.
    pub faults: Arc<[Fault]>,
}

/// What an effector reports after executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectorOutput {
    pub success: bool,
    pub output: String,
}

impl EffectorOutput {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Trait for repair effectors.
#[async_trait]
pub trait Effector: Send + Sync {
    /// Apply the repair.
    async fn execute(&self, ctx: &EffectorContext) -> EffectorResult<EffectorOutput>;

    /// Post-condition check run after a successful `execute`.
    async fn validate(&self, _ctx: &EffectorContext) -> EffectorResult<bool> {
        Ok(true)
    }
}

/// Named effectors referenced by the repair action catalog.
#[derive(Clone, Default)]
pub struct EffectorRegistry {
    effectors: HashMap<String, Arc<dyn Effector>>,
}

impl EffectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an effector, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, effector: Arc<dyn Effector>) {
        self.effectors.insert(name.into(), effector);
    }

    /// Builder-style [`EffectorRegistry::register`].
    pub fn with(mut self, name: impl Into<String>, effector: impl Effector + 'static) -> Self {
        self.register(name, Arc::new(effector));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Effector>> {
        self.effectors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.effectors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.effectors.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for EffectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("EffectorRegistry")
            .field("effectors", &names)
            .finish()
    }
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    async fn run(&self, ctx: &EffectorContext) -> EffectorResult<Output> {
        Command::new(&self.program)
            .args(&self.args)
            .env("REMEDY_ACTION_ID", ctx.action_id.as_str())
            .env("REMEDY_CATEGORY", ctx.category.as_str())
            .env("REMEDY_ATTEMPT", ctx.attempt.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EffectorError::Spawn(format!("{}: {}", self.program, e)))
    }
}

/// Effector that runs a subprocess.
///
/// With a check command configured, a passing check before execution means
/// the repair is already in place and nothing is run. The same check is the
/// post-condition. This wraps non-idempotent commands safely.
#[derive(Debug, Clone)]
pub struct CommandEffector {
    command: CommandSpec,
    check: Option<CommandSpec>,
}

impl CommandEffector {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            check: None,
        }
    }

    pub fn with_check(mut self, check: CommandSpec) -> Self {
        self.check = Some(check);
        self
    }
}

#[async_trait]
impl Effector for CommandEffector {
    #[instrument(skip(self, ctx), fields(action_id = %ctx.action_id, attempt = ctx.attempt))]
    async fn execute(&self, ctx: &EffectorContext) -> EffectorResult<EffectorOutput> {
        if let Some(check) = &self.check {
            if check.run(ctx).await?.status.success() {
                debug!(program = %check.program, "Check already passing, skipping command");
                return Ok(EffectorOutput::succeeded("already satisfied"));
            }
        }

        let output = self.command.run(ctx).await?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        if output.status.success() {
            Ok(EffectorOutput::succeeded(text))
        } else {
            let code = output.status.code().unwrap_or(-1);
            Ok(EffectorOutput::failed(format!("exit code {code}: {text}")))
        }
    }

    async fn validate(&self, ctx: &EffectorContext) -> EffectorResult<bool> {
        match &self.check {
            Some(check) => Ok(check.run(ctx).await?.status.success()),
            None => Ok(true),
        }
    }
}
