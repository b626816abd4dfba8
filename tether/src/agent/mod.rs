//! # Agent attachment
//!
//! An agent implements [`Agent`] and is attached to a host through a
//! [`Session`]:
//!
//! 1. `Session::attach` checks the agent's version marker against the host
//!    build and calls [`Agent::initialize`] exactly once.
//! 2. The agent registers event handlers and profile callbacks through the
//!    [`Env`] it was given and keeps using it for queries.
//! 3. [`Session::run`] executes the host's main body. If it panics, the
//!    agent's unhandled-failure handler fires once, synchronously, and the
//!    session shuts down with [`EXIT_UNRECOVERED_FAILURE`].
//! 4. [`Agent::shutdown`] is called at most once, by [`Session::shutdown`] or
//!    when the session is dropped.

pub mod failure;
pub mod recorder;

use log::{error, info};
use tether_common::{EXIT_UNRECOVERED_FAILURE, NATIVE_BUILD};

use self::failure::FailureReport;
use crate::domain::AttachError;
use crate::env::{Env, HOST_BUILD};

pub use recorder::{ProfileRates, Recorder, RecordingAgent};

/// Build compatibility marker of an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentVersion {
    /// Written outside the host's native code; attaches to any host build
    Native,
    /// Built against a specific host build string
    Build(String),
}

impl AgentVersion {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            AgentVersion::Native => NATIVE_BUILD,
            AgentVersion::Build(build) => build,
        }
    }
}

/// A monitoring agent
pub trait Agent: Send {
    fn version(&self) -> AgentVersion {
        AgentVersion::Native
    }

    /// Called exactly once, before the host runs any agent-visible work
    fn initialize(&mut self, env: &Env);

    /// Called at most once, before the host exits with `exit_code`
    fn shutdown(&mut self, _exit_code: i32) {}
}

/// An agent attached to a host
pub struct Session {
    env: Env,
    agent: Box<dyn Agent>,
    exit_code: Option<i32>,
}

impl Session {
    /// Check compatibility and initialize `agent`
    ///
    /// # Errors
    /// Returns [`AttachError::VersionMismatch`] if the agent was built for a
    /// different host build; `initialize` is not called in that case.
    pub fn attach(env: Env, mut agent: Box<dyn Agent>) -> Result<Self, AttachError> {
        let version = agent.version();
        if let AgentVersion::Build(build) = &version {
            if build != HOST_BUILD {
                return Err(AttachError::VersionMismatch {
                    agent: build.clone(),
                    host: HOST_BUILD.to_string(),
                });
            }
        }
        failure::install_panic_hook();
        agent.initialize(&env);
        info!("Agent attached ({}) to {HOST_BUILD}", version.as_str());
        Ok(Self { env, agent, exit_code: None })
    }

    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Run the host's main body
    ///
    /// # Errors
    /// If `body` panics, the unhandled-failure handler fires, the agent is
    /// shut down with [`EXIT_UNRECOVERED_FAILURE`] and the panic's report is
    /// returned.
    pub fn run<R>(&mut self, body: impl FnOnce() -> R) -> Result<R, FailureReport> {
        failure::capture(body).map_err(|report| {
            error!("Unrecovered failure: {report}");
            self.env.fire_failure(&report);
            self.shutdown(EXIT_UNRECOVERED_FAILURE);
            report
        })
    }

    /// Shut the agent down with `exit_code`; later calls do nothing
    pub fn shutdown(&mut self, exit_code: i32) {
        if self.exit_code.is_some() {
            return;
        }
        self.exit_code = Some(exit_code);
        self.agent.shutdown(exit_code);
        info!("Agent shut down with exit code {exit_code}");
    }

    /// Exit code the agent was shut down with, if it was
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown(0);
    }
}
