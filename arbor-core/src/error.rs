// Error types for the Arbor dispatch engine

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, Error>;

/// Whether retrying the failed operation can succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recoverability {
    /// Per-request failure; the next request may succeed
    Recoverable,
    /// Configuration or internal failure; retrying will not help
    Terminal,
}

/// Broad cause category of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// Bad registration, descriptor or settings
    Configuration,
    /// Internal failure or a bug
    Runtime,
    /// The caller sent something invalid
    UserInput,
}

/// Subsystem family an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Parameter,
    Security,
    Routing,
    Persistence,
    Deployment,
}

impl Origin {
    const fn bits(self) -> u32 {
        match self {
            Origin::Parameter => 0x01,
            Origin::Security => 0x02,
            Origin::Routing => 0x04,
            Origin::Persistence => 0x08,
            Origin::Deployment => 0x10,
        }
    }

    /// Get origin name
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Parameter => "parameter",
            Origin::Security => "security",
            Origin::Routing => "routing",
            Origin::Persistence => "persistence",
            Origin::Deployment => "deployment",
        }
    }
}

const TERMINAL_BIT: u32 = 1 << 31;
const CAUSE_SHIFT: u32 = 28;
const CAUSE_MASK: u32 = 0b11 << CAUSE_SHIFT;
const ORIGIN_SHIFT: u32 = 16;
const ORIGIN_MASK: u32 = 0xFF << ORIGIN_SHIFT;
const SUBSYSTEM_SHIFT: u32 = 8;

/// Numeric error code with orthogonal bit fields.
///
/// | bits  | field                                  |
/// |-------|----------------------------------------|
/// | 31    | terminal (1) / recoverable (0)         |
/// | 28-29 | cause: 1 config, 2 runtime, 3 input    |
/// | 16-23 | origin flags                           |
/// | 8-15  | subsystem                              |
/// | 0-7   | instance                               |
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(u32);

impl ErrorCode {
    /// Compose a code from its fields
    pub const fn new(
        recoverability: Recoverability,
        cause: Cause,
        origin: Option<Origin>,
        subsystem: u8,
        instance: u8,
    ) -> Self {
        let mut raw = (subsystem as u32) << SUBSYSTEM_SHIFT | instance as u32;
        if let Recoverability::Terminal = recoverability {
            raw |= TERMINAL_BIT;
        }
        let cause_bits: u32 = match cause {
            Cause::Configuration => 1,
            Cause::Runtime => 2,
            Cause::UserInput => 3,
        };
        raw |= cause_bits << CAUSE_SHIFT;
        if let Some(origin) = origin {
            raw |= origin.bits() << ORIGIN_SHIFT;
        }
        Self(raw)
    }

    /// Raw numeric value
    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn recoverability(self) -> Recoverability {
        if self.0 & TERMINAL_BIT != 0 {
            Recoverability::Terminal
        } else {
            Recoverability::Recoverable
        }
    }

    pub fn cause(self) -> Cause {
        match (self.0 & CAUSE_MASK) >> CAUSE_SHIFT {
            1 => Cause::Configuration,
            3 => Cause::UserInput,
            _ => Cause::Runtime,
        }
    }

    pub fn origin(self) -> Option<Origin> {
        let bits = (self.0 & ORIGIN_MASK) >> ORIGIN_SHIFT;
        [
            Origin::Parameter,
            Origin::Security,
            Origin::Routing,
            Origin::Persistence,
            Origin::Deployment,
        ]
        .into_iter()
        .find(|origin| bits & origin.bits() != 0)
    }

    pub fn subsystem(self) -> u8 {
        (self.0 >> SUBSYSTEM_SHIFT) as u8
    }

    pub fn instance(self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode({:#010x})", self.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Well-known error codes
pub mod codes {
    use super::{Cause, ErrorCode, Origin, Recoverability};

    pub const SUBSYSTEM_REGISTRY: u8 = 0x01;
    pub const SUBSYSTEM_ROUTER: u8 = 0x02;
    pub const SUBSYSTEM_PARAMETER: u8 = 0x03;
    pub const SUBSYSTEM_CONTEXT: u8 = 0x04;
    pub const SUBSYSTEM_DEPLOYER: u8 = 0x05;
    pub const SUBSYSTEM_EXECUTION: u8 = 0x06;
    pub const SUBSYSTEM_SETTINGS: u8 = 0x07;

    const fn registry(instance: u8) -> ErrorCode {
        ErrorCode::new(
            Recoverability::Terminal,
            Cause::Configuration,
            Some(Origin::Routing),
            SUBSYSTEM_REGISTRY,
            instance,
        )
    }

    const fn invalid_parameter(instance: u8) -> ErrorCode {
        ErrorCode::new(
            Recoverability::Recoverable,
            Cause::UserInput,
            Some(Origin::Parameter),
            SUBSYSTEM_PARAMETER,
            instance,
        )
    }

    const fn deployment(instance: u8) -> ErrorCode {
        ErrorCode::new(
            Recoverability::Terminal,
            Cause::Configuration,
            Some(Origin::Deployment),
            SUBSYSTEM_DEPLOYER,
            instance,
        )
    }

    // Registry
    pub const DUPLICATE_ATTACHMENT: ErrorCode = registry(0x01);
    pub const LEAF_IN_PATH: ErrorCode = registry(0x02);
    pub const MALFORMED_PATH: ErrorCode = registry(0x03);
    pub const MAPPING_MISMATCH: ErrorCode = registry(0x04);
    pub const OWNER_CONFLICT: ErrorCode = registry(0x05);

    // Router
    pub const ROUTE_INCONSISTENT: ErrorCode = ErrorCode::new(
        Recoverability::Terminal,
        Cause::Runtime,
        Some(Origin::Routing),
        SUBSYSTEM_ROUTER,
        0x01,
    );
    pub const FORWARD_LIMIT: ErrorCode = ErrorCode::new(
        Recoverability::Terminal,
        Cause::Runtime,
        Some(Origin::Routing),
        SUBSYSTEM_ROUTER,
        0x02,
    );
    pub const ACCESS_DENIED: ErrorCode = ErrorCode::new(
        Recoverability::Recoverable,
        Cause::UserInput,
        Some(Origin::Security),
        SUBSYSTEM_ROUTER,
        0x03,
    );
    pub const AUTHORIZATION_FAILED: ErrorCode = ErrorCode::new(
        Recoverability::Recoverable,
        Cause::Runtime,
        Some(Origin::Security),
        SUBSYSTEM_ROUTER,
        0x04,
    );

    // Parameter validation
    pub const OPTIONALITY: ErrorCode = invalid_parameter(0x01);
    pub const MIN_LENGTH: ErrorCode = invalid_parameter(0x02);
    pub const MAX_LENGTH: ErrorCode = invalid_parameter(0x03);
    pub const REGEX: ErrorCode = invalid_parameter(0x04);
    pub const MIN_COUNT: ErrorCode = invalid_parameter(0x05);
    pub const MAX_COUNT: ErrorCode = invalid_parameter(0x06);
    pub const UNKNOWN_PARAMETER: ErrorCode = ErrorCode::new(
        Recoverability::Terminal,
        Cause::Configuration,
        Some(Origin::Parameter),
        SUBSYSTEM_PARAMETER,
        0x07,
    );
    pub const INVALID_PATTERN: ErrorCode = ErrorCode::new(
        Recoverability::Terminal,
        Cause::Configuration,
        Some(Origin::Parameter),
        SUBSYSTEM_PARAMETER,
        0x08,
    );

    // Request context
    pub const MALFORMED_BODY: ErrorCode = ErrorCode::new(
        Recoverability::Recoverable,
        Cause::UserInput,
        Some(Origin::Parameter),
        SUBSYSTEM_CONTEXT,
        0x01,
    );
    pub const NOT_LATIN1: ErrorCode = ErrorCode::new(
        Recoverability::Recoverable,
        Cause::UserInput,
        Some(Origin::Parameter),
        SUBSYSTEM_CONTEXT,
        0x02,
    );

    // Deployer
    pub const DESCRIPTOR_MISSING: ErrorCode = deployment(0x01);
    pub const DESCRIPTOR_INVALID: ErrorCode = deployment(0x02);
    pub const INITIALIZER_UNKNOWN: ErrorCode = deployment(0x03);
    pub const INITIALIZER_FAILED: ErrorCode = deployment(0x04);
    pub const ALREADY_DEPLOYED: ErrorCode = deployment(0x05);
    pub const STALE_BUNDLE: ErrorCode = deployment(0x06);
    pub const WATCH_FAILED: ErrorCode = ErrorCode::new(
        Recoverability::Terminal,
        Cause::Runtime,
        Some(Origin::Deployment),
        SUBSYSTEM_DEPLOYER,
        0x07,
    );

    // Execution
    pub const EXECUTION_FAILED: ErrorCode = ErrorCode::new(
        Recoverability::Recoverable,
        Cause::Runtime,
        None,
        SUBSYSTEM_EXECUTION,
        0x01,
    );
    pub const IO_FAILURE: ErrorCode = ErrorCode::new(
        Recoverability::Recoverable,
        Cause::Runtime,
        Some(Origin::Persistence),
        SUBSYSTEM_EXECUTION,
        0x02,
    );

    // Settings
    pub const INVALID_SETTING: ErrorCode = ErrorCode::new(
        Recoverability::Terminal,
        Cause::Configuration,
        None,
        SUBSYSTEM_SETTINGS,
        0x01,
    );
}

/// The single typed error of the engine.
///
/// Carries a bit-field [`ErrorCode`], a human message, an optional structured
/// data bag for diagnostics and an optional underlying cause.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct Error {
    code: ErrorCode,
    message: String,
    data: Option<Map<String, Value>>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            source: None,
        }
    }

    /// Runtime failure raised while executing a handler
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(codes::EXECUTION_FAILED, message)
    }

    /// Wrap an arbitrary error as a runtime failure
    pub fn wrap<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::runtime(source.to_string()).with_source(source)
    }

    /// Attach a diagnostic field
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Attach the underlying cause
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()
    }

    pub fn is_recoverable(&self) -> bool {
        self.code.recoverability() == Recoverability::Recoverable
    }

    pub fn cause(&self) -> Cause {
        self.code.cause()
    }

    pub fn origin(&self) -> Option<Origin> {
        self.code.origin()
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> u16 {
        match (self.code.origin(), self.code.cause()) {
            (Some(Origin::Security), Cause::UserInput) => 403,
            (_, Cause::UserInput) => 400,
            _ => 500,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }

    /// Machine-readable representation handed to output formatters
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "error": {
                "code": self.code.raw(),
                "message": self.message,
                "recoverable": self.is_recoverable(),
                "origin": self.code.origin().map(|o| o.as_str()),
                "data": self.data,
            }
        })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(codes::IO_FAILURE, format!("IO error: {}", err)).with_source(err)
    }
}
