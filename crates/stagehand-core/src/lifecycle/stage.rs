//! # Stage Model
//!
//! The four lifecycle stages of a bundle and the five transitions between them.
//!
//! ## Stage Graph
//!
//! | Transition | From | To |
//! |------------|------|----|
//! | Install | Registered | Installed |
//! | Start | Installed | Started |
//! | Stop | Started | Installed |
//! | Uninstall | Installed | Registered |
//! | Unregister | Registered | Unregistered |
//!
//! No stage may be skipped. `Unregistered` is terminal: a record that reaches it
//! is removed from its registry and never replaced.
//!
//! Every transition leaves an [`Expiration`] on the record it started from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// STAGE ENUM
// =============================================================================

/// Lifecycle stage of a bundle record.
///
/// The ordering follows the forward direction of the lifecycle, so
/// `Stage::Registered < Stage::Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Previously registered, now removed from the registry. Terminal.
    Unregistered,
    /// Known to the registry, not installed in the engine.
    Registered,
    /// Installed in the engine, not started.
    Installed,
    /// Installed and started; its services may be live.
    Started,
}

impl Stage {
    /// Get the stage name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Unregistered => "unregistered",
            Stage::Registered => "registered",
            Stage::Installed => "installed",
            Stage::Started => "started",
        }
    }

    /// Check if this stage is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Unregistered)
    }

    /// Transitions that may leave this stage.
    #[must_use]
    pub fn outgoing(&self) -> Vec<Transition> {
        Transition::ALL
            .into_iter()
            .filter(|t| t.source() == *self)
            .collect()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// A legal move between two adjacent stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// `Registered -> Installed`: hand the package to the engine.
    Install,
    /// `Installed -> Started`: run the activator and publish its services.
    Start,
    /// `Started -> Installed`: withdraw services and run the activator's stop.
    Stop,
    /// `Installed -> Registered`: remove the bundle from the engine.
    Uninstall,
    /// `Registered -> Unregistered`: drop the record from the registry.
    Unregister,
}

impl Transition {
    /// Every transition, forward ones first.
    pub const ALL: [Transition; 5] = [
        Transition::Install,
        Transition::Start,
        Transition::Stop,
        Transition::Uninstall,
        Transition::Unregister,
    ];

    /// The stage a record must be in for this transition to be legal.
    #[must_use]
    pub const fn source(&self) -> Stage {
        match self {
            Transition::Install | Transition::Unregister => Stage::Registered,
            Transition::Start | Transition::Uninstall => Stage::Installed,
            Transition::Stop => Stage::Started,
        }
    }

    /// The stage the replacement record ends up in.
    #[must_use]
    pub const fn target(&self) -> Stage {
        match self {
            Transition::Install | Transition::Stop => Stage::Installed,
            Transition::Start => Stage::Started,
            Transition::Uninstall => Stage::Registered,
            Transition::Unregister => Stage::Unregistered,
        }
    }

    /// Look up the transition connecting two stages, if one exists.
    #[must_use]
    pub fn between(from: Stage, to: Stage) -> Option<Transition> {
        Self::ALL
            .into_iter()
            .find(|t| t.source() == from && t.target() == to)
    }

    /// Whether the transition leaves a replacement record behind.
    #[must_use]
    pub fn has_replacement(&self) -> bool {
        !self.target().is_terminal()
    }

    /// Verb used in log lines and error messages.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Transition::Install => "install",
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Uninstall => "uninstall",
            Transition::Unregister => "unregister",
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} -> {})", self.verb(), self.source(), self.target())
    }
}

// =============================================================================
// EXPIRATION
// =============================================================================

/// Permanent marker left on a record when a transition moved away from it.
///
/// A record receives at most one expiration. Once present, the record only
/// answers identity and diagnostic queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiration {
    previous: Stage,
    next: Stage,
    at: DateTime<Utc>,
}

impl Expiration {
    /// Create an expiration stamped with the current time.
    #[must_use]
    pub fn now(previous: Stage, next: Stage) -> Self {
        Self {
            previous,
            next,
            at: Utc::now(),
        }
    }

    /// Stage of the record when it expired.
    #[must_use]
    pub fn previous_stage(&self) -> Stage {
        self.previous
    }

    /// Stage the transition moved to.
    #[must_use]
    pub fn new_stage(&self) -> Stage {
        self.next
    }

    /// When the transition happened.
    #[must_use]
    pub fn expired_at(&self) -> DateTime<Utc> {
        self.at
    }

    /// The transition that produced this expiration, or `None` if no
    /// transition connects the two stages.
    #[must_use]
    pub fn transition(&self) -> Option<Transition> {
        Transition::between(self.previous, self.next)
    }
}

impl std::fmt::Display for Expiration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} at {}",
            self.previous,
            self.next,
            self.at.to_rfc3339()
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
