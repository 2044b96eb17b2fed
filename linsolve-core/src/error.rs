use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinsolveError>;

#[derive(Error, Debug)]
pub enum LinsolveError {
    #[error("WGPU initialization failed: {0}")]
    WgpuInitError(String),

    #[error("Matrix is singular: zero pivot at row {pivot}")]
    SingularMatrix { pivot: usize },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Kernel compilation failed:\n{0}")]
    Compilation(BuildLog),

    #[error("Kernel dispatch failed: {0}")]
    Dispatch(String),

    #[error("Invalid matrix dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Invalid solver configuration: {0}")]
    InvalidConfig(String),

    #[error("Did not converge after {iterations} iterations (max residual {residual_norm})")]
    NonConvergence {
        iterations: usize,
        residual_norm: f64,
    },

    #[error("Iteration broke down after {iterations} iterations: {reason}")]
    Breakdown { iterations: usize, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Severity of a single compiler message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

/// One compiler message, with its position in the kernel source when known.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => "info",
        };
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "{}:{}: {}: {}", line, column, level, self.message)
            }
            _ => write!(f, "{}: {}", level, self.message),
        }
    }
}

/// Build output of a kernel program for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBuildLog {
    /// Adapter name and backend the program was built for.
    pub device: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Full build log of a kernel program, one entry per target device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildLog {
    pub devices: Vec<DeviceBuildLog>,
}

impl BuildLog {
    pub fn has_errors(&self) -> bool {
        self.devices
            .iter()
            .flat_map(|d| d.diagnostics.iter())
            .any(|d| d.level == DiagnosticLevel::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.iter().all(|d| d.diagnostics.is_empty())
    }
}

impl fmt::Display for BuildLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for device in &self.devices {
            writeln!(f, "[{}]", device.device)?;
            if device.diagnostics.is_empty() {
                writeln!(f, "  (no diagnostics)")?;
            }
            for diagnostic in &device.diagnostics {
                writeln!(f, "  {}", diagnostic)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_log_lists_every_device() {
        let log = BuildLog {
            devices: vec![
                DeviceBuildLog {
                    device: "gpu0 (Vulkan)".to_string(),
                    diagnostics: vec![Diagnostic {
                        level: DiagnosticLevel::Error,
                        message: "unknown identifier `xx`".to_string(),
                        line: Some(12),
                        column: Some(5),
                    }],
                },
                DeviceBuildLog {
                    device: "gpu1 (Metal)".to_string(),
                    diagnostics: Vec::new(),
                },
            ],
        };

        let text = log.to_string();
        assert!(text.contains("[gpu0 (Vulkan)]"));
        assert!(text.contains("12:5: error: unknown identifier `xx`"));
        assert!(text.contains("[gpu1 (Metal)]"));
        assert!(log.has_errors());
        assert!(!log.is_empty());

        let err = LinsolveError::Compilation(log);
        assert!(err.to_string().starts_with("Kernel compilation failed"));
    }
}
