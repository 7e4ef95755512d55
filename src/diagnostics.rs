//! Non-fatal messages collected while the passes run
//!
//! Every message is also forwarded to `tracing` with its pass and location,
//! so a subscriber sees them as they happen while callers still get the full
//! list back at the end. The binary prints diagnostics through that channel only.

use std::fmt;

use serde::Serialize;

use crate::ast::ModToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Debug,
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub pass: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<ModToken>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.pass, self.message)?;
        if let Some(token) = self.token {
            write!(f, " (at {})", token)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        let Diagnostic {
            severity,
            pass,
            message,
            token,
        } = &diagnostic;
        let at = token.map_or_else(|| "-".to_string(), |t| t.to_string());
        match severity {
            Severity::Debug => tracing::debug!(pass = %pass, at = %at, "{}", message),
            Severity::Info => tracing::info!(pass = %pass, at = %at, "{}", message),
            Severity::Warning => tracing::warn!(pass = %pass, at = %at, "{}", message),
        }
        self.items.push(diagnostic);
    }

    fn add(&mut self, severity: Severity, pass: &str, message: String, token: Option<ModToken>) {
        self.push(Diagnostic {
            severity,
            pass: pass.to_string(),
            message,
            token,
        });
    }

    pub fn debug(&mut self, pass: &str, message: impl Into<String>, token: Option<ModToken>) {
        self.add(Severity::Debug, pass, message.into(), token);
    }

    pub fn info(&mut self, pass: &str, message: impl Into<String>, token: Option<ModToken>) {
        self.add(Severity::Info, pass, message.into(), token);
    }

    pub fn warn(&mut self, pass: &str, message: impl Into<String>, token: Option<ModToken>) {
        self.add(Severity::Warning, pass, message.into(), token);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Messages at or above `severity`
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.severity >= severity)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}
