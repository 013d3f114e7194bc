//! User-facing notification seam.
//!
//! Errors and status changes surface as typed [`Notice`]s through the
//! session event stream; whatever layer renders them implements
//! [`Notifier`] and is passed in explicitly. Confirmation prompts return
//! a typed [`Confirmation`] instead of a bare bool so call sites read as
//! intent.

/// How prominently a notice should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Status information.
    Info,
    /// Something went wrong but the session continues.
    Warning,
    /// The session cannot continue without user action.
    Error,
}

/// A dismissible, non-blocking user notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Render prominence.
    pub severity: Severity,
    /// Human-readable text.
    pub text: String,
}

impl Notice {
    /// An informational notice.
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            text: text.into(),
        }
    }

    /// A warning notice.
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            text: text.into(),
        }
    }

    /// An error notice.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
        }
    }
}

/// Result of a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The user approved the action.
    Approved,
    /// The user dismissed or declined it.
    Dismissed,
}

/// Renders notices and confirmation prompts to the user.
///
/// Injected into the presentation layer explicitly -- there is no global
/// alert hook to monkey-patch.
pub trait Notifier {
    /// Show a dismissible notice.
    fn notify(&self, notice: &Notice);

    /// Ask the user to confirm an action.
    fn confirm(&self, prompt: &str) -> Confirmation;
}

/// Notifier for the headless CLI: notices go to stderr, confirmations
/// read one line from stdin.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: &Notice) {
        let tag = match notice.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        eprintln!("[{tag}] {}", notice.text);
    }

    fn confirm(&self, prompt: &str) -> Confirmation {
        eprint!("{prompt} [y/N] ");
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(_) if line.trim().eq_ignore_ascii_case("y") => Confirmation::Approved,
            _ => Confirmation::Dismissed,
        }
    }
}
