//! Combinators composing tasks into a startup tree.
//!
//! Trees are built once, typically in a function returning the static startup
//! configuration, and are never mutated afterwards.
//!
//! ```
//! use tillpoint_core::{all, one_of, optional, with_splash_message, TaskId, TaskRef};
//!
//! const DISCOVER_PLATFORM: TaskId = TaskId::new("DiscoverPlatform");
//! const QUERY_PARAMS: TaskId = TaskId::new("QueryParams");
//! const MANUAL: TaskId = TaskId::new("Manual");
//! const HIDE_STATUS_BAR: TaskId = TaskId::new("HideStatusBar");
//!
//! let root: TaskRef = all(vec![
//!     DISCOVER_PLATFORM.into(),
//!     with_splash_message(
//!         "Personalizing...",
//!         one_of(vec![QUERY_PARAMS.into(), MANUAL.into()]),
//!     ),
//!     optional(HIDE_STATUS_BAR),
//! ]);
//! assert_eq!(root.label(), "all");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::TaskRef;

/// Kind tag of a combinator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombinatorKind {
    /// Run children in order, abort on the first failure.
    #[serde(rename = "all")]
    All,
    /// Run children in order until one succeeds.
    #[serde(rename = "oneOf")]
    OneOf,
    /// Run the child and ignore its failure.
    #[serde(rename = "optional")]
    Optional,
    /// Show a splash message while the child runs.
    #[serde(rename = "withMessage")]
    WithMessage,
}

impl fmt::Display for CombinatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::All => "all",
            Self::OneOf => "oneOf",
            Self::Optional => "optional",
            Self::WithMessage => "withMessage",
        };
        f.write_str(tag)
    }
}

/// An immutable combinator node.
#[derive(Debug, Clone)]
pub enum Combinator {
    /// Sequential, fail-fast.
    All(Vec<TaskRef>),
    /// Sequential, first success wins.
    OneOf(Vec<TaskRef>),
    /// Failure-absorbing.
    Optional(TaskRef),
    /// Pushes `message` on the splash stack around `task`.
    WithSplashMessage {
        /// Text shown while the child runs.
        message: String,
        /// The wrapped child.
        task: TaskRef,
    },
}

impl Combinator {
    /// The node's kind tag.
    #[must_use]
    pub const fn kind(&self) -> CombinatorKind {
        match self {
            Self::All(_) => CombinatorKind::All,
            Self::OneOf(_) => CombinatorKind::OneOf,
            Self::Optional(_) => CombinatorKind::Optional,
            Self::WithSplashMessage { .. } => CombinatorKind::WithMessage,
        }
    }

    /// Direct children of this node.
    #[must_use]
    pub fn children(&self) -> &[TaskRef] {
        match self {
            Self::All(tasks) | Self::OneOf(tasks) => tasks,
            Self::Optional(task) | Self::WithSplashMessage { task, .. } => {
                std::slice::from_ref(task)
            }
        }
    }
}

/// Run `tasks` in order; fail with the first failure.
#[must_use]
pub fn all(tasks: Vec<TaskRef>) -> TaskRef {
    Combinator::All(tasks).into()
}

/// Run `tasks` in order; succeed with the first success.
///
/// An empty list succeeds without doing anything.
#[must_use]
pub fn one_of(tasks: Vec<TaskRef>) -> TaskRef {
    Combinator::OneOf(tasks).into()
}

/// Run `task` and succeed whatever its outcome.
#[must_use]
pub fn optional(task: impl Into<TaskRef>) -> TaskRef {
    Combinator::Optional(task.into()).into()
}

/// Show `message` on the splash screen while `task` runs.
#[must_use]
pub fn with_splash_message(message: impl Into<String>, task: impl Into<TaskRef>) -> TaskRef {
    Combinator::WithSplashMessage {
        message: message.into(),
        task: task.into(),
    }
    .into()
}
