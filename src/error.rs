//! Crate-level structured error type.
//!
//! Every failure surfaced by the crate carries a machine-readable
//! [`ErrorCode`], a human-readable message, a recoverability flag, free-form
//! context entries, and remediation suggestions. Recoverable errors always
//! carry at least one suggestion by the time they reach a subscriber.

use std::fmt;

use rustc_hash::FxHashMap;

/// Closed set of error codes emitted by the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No GPU implementation is available on this platform.
    GpuUnavailable,
    /// The adapter request returned no compatible adapter.
    GpuAdapterFailed,
    /// The device request failed (limits or features not met).
    GpuDeviceFailed,
    /// The device was lost after initialization.
    GpuDeviceLost,
    /// Shader compilation or conversion failed.
    ShaderCompile,
    /// GPU buffer allocation failed.
    BufferCreate,
    /// GPU texture allocation failed.
    TextureCreate,
    /// The user denied camera access.
    CameraPermissionDenied,
    /// No capture device is present.
    CameraNotFound,
    /// The capture device is held by another process.
    CameraBusy,
    /// Camera initialization failed for another reason.
    CameraInit,
    /// Marker detection failed for the current frame.
    MarkerDetect,
    /// Pose estimation produced no usable solution.
    PoseEstimate,
    /// A tracked target was lost.
    TrackingLost,
    /// A plugin failed during initialization.
    PluginInitFailed,
    /// A plugin with the same name is already registered.
    PluginDuplicate,
    /// A plugin dependency is not registered.
    PluginMissing,
    /// Configuration value out of range or unparseable.
    InvalidConfig,
    /// Operation not valid in the current lifecycle state.
    InvalidState,
    /// The engine has not been initialized.
    NotInitialized,
    /// The engine was already initialized.
    AlreadyInitialized,
}

impl ErrorCode {
    /// Stable string form used in logs and serialized error payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GpuUnavailable => "GpuUnavailable",
            Self::GpuAdapterFailed => "GpuAdapterFailed",
            Self::GpuDeviceFailed => "GpuDeviceFailed",
            Self::GpuDeviceLost => "GpuDeviceLost",
            Self::ShaderCompile => "ShaderCompile",
            Self::BufferCreate => "BufferCreate",
            Self::TextureCreate => "TextureCreate",
            Self::CameraPermissionDenied => "CameraPermissionDenied",
            Self::CameraNotFound => "CameraNotFound",
            Self::CameraBusy => "CameraBusy",
            Self::CameraInit => "CameraInit",
            Self::MarkerDetect => "MarkerDetect",
            Self::PoseEstimate => "PoseEstimate",
            Self::TrackingLost => "TrackingLost",
            Self::PluginInitFailed => "PluginInitFailed",
            Self::PluginDuplicate => "PluginDuplicate",
            Self::PluginMissing => "PluginMissing",
            Self::InvalidConfig => "InvalidConfig",
            Self::InvalidState => "InvalidState",
            Self::NotInitialized => "NotInitialized",
            Self::AlreadyInitialized => "AlreadyInitialized",
        }
    }
}

/// A remediation hint attached to a recoverable error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    /// Human-readable hint.
    pub message: String,
    /// Optional machine-actionable identifier (e.g. `"retry"`).
    pub action: Option<String>,
    /// Optional documentation link.
    pub link: Option<String>,
}

impl Suggestion {
    /// Suggestion with a message only.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            action: None,
            link: None,
        }
    }

    /// Attach a machine-actionable identifier.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Structured error produced by the perception pipeline.
#[derive(Debug, Clone)]
pub struct ArError {
    code: ErrorCode,
    message: String,
    recoverable: bool,
    context: FxHashMap<String, String>,
    suggestions: Vec<Suggestion>,
    cause: Option<Box<ArError>>,
}

impl ArError {
    /// Non-recoverable error with the given code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: false,
            context: FxHashMap::default(),
            suggestions: Vec::new(),
            cause: None,
        }
    }

    /// Recoverable error. Callers should attach at least one suggestion.
    #[must_use]
    pub fn recoverable(code: ErrorCode, message: impl Into<String>) -> Self {
        let mut e = Self::new(code, message);
        e.recoverable = true;
        e
    }

    /// Attach a context key/value pair.
    #[must_use]
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let _ = self.context.insert(key.into(), value.into());
        self
    }

    /// Attach a remediation suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    /// Attach a structured cause.
    #[must_use]
    pub fn with_cause(mut self, cause: ArError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The machine-readable code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the pipeline keeps running after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// Context entries attached to this error.
    #[must_use]
    pub fn context(&self) -> &FxHashMap<String, String> {
        &self.context
    }

    /// Remediation suggestions, possibly empty for fatal errors.
    #[must_use]
    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    /// The structured cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&ArError> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ArError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic ordering for logs and assertions.
            let mut keys: Vec<&String> = self.context.keys().collect();
            keys.sort();
            write!(f, " (")?;
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}={}", self.context[*k])?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for ArError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| -> &(dyn std::error::Error + 'static) { c })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_sorted_context() {
        let e = ArError::recoverable(ErrorCode::CameraBusy, "device is busy")
            .with_context("device", "0")
            .with_context("backend", "v4l2");
        let s = e.to_string();
        assert_eq!(s, "CameraBusy: device is busy (backend=v4l2, device=0)");
    }

    #[test]
    fn cause_chain_is_reachable_through_source() {
        use std::error::Error as _;
        let root = ArError::new(ErrorCode::GpuAdapterFailed, "no adapter");
        let e = ArError::new(ErrorCode::GpuUnavailable, "gpu init failed")
            .with_cause(root);
        let src = e.source().and_then(|s| s.downcast_ref::<ArError>());
        assert_eq!(src.map(ArError::code), Some(ErrorCode::GpuAdapterFailed));
    }

    #[test]
    fn recoverable_flag_round_trips() {
        assert!(
            ArError::recoverable(ErrorCode::MarkerDetect, "x").is_recoverable()
        );
        assert!(!ArError::new(ErrorCode::InvalidConfig, "x").is_recoverable());
    }
}
