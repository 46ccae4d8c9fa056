use thiserror::Error;

/// Failures reported by an external collaborator (interface provider,
/// leasing service, translation engine, radio, event source).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("interface error: {0}")]
    Interface(String),

    #[error("address leasing error: {0}")]
    Leasing(String),

    /// The leasing service was not running. Callers stopping it treat this as success.
    #[error("address leasing service already stopped")]
    AlreadyStopped,

    #[error("translation engine rejected request: {0}")]
    Rejected(String),

    #[error("radio error: {0}")]
    Radio(String),

    #[error("event subscription failed: {0}")]
    Subscription(String),

    #[error("command failed: {0}")]
    Command(String),
}

/// A port-forwarding rule that could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid internal address for forwarding rule: {0:?}")]
    InvalidInternalAddress(String),

    #[error("unknown forwarding protocol: {0:?}")]
    UnknownProtocol(String),
}

/// Startup failures that halt the controller.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("could not create downlink interface: {0}")]
    DownlinkUnavailable(#[source] PlatformError),

    #[error("could not resolve uplink interface {name:?}: {source}")]
    UplinkUnavailable {
        name: String,
        #[source]
        source: PlatformError,
    },

    #[error("radio setup failed: {0}")]
    Radio(#[source] PlatformError),

    #[error("event subscription failed: {0}")]
    Subscription(#[source] PlatformError),

    /// An earlier `setup` call failed; the controller stays down.
    #[error("controller halted after a failed setup")]
    Halted,
}

/// Errors from loading or validating a [`crate::NatApConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("config validation failed: {0}")]
    ValidationError(String),
}

/// Umbrella error for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum NatApError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type NatApResult<T> = Result<T, NatApError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_message_names_uplink() {
        let err = SetupError::UplinkUnavailable {
            name: "wlan0".to_string(),
            source: PlatformError::Interface("no such device".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("wlan0"));
        assert!(msg.contains("no such device"));
    }

    #[test]
    fn test_umbrella_conversion() {
        fn register() -> NatApResult<()> {
            let parsed: Result<(), ValidationError> =
                Err(ValidationError::InvalidInternalAddress("nope".to_string()));
            parsed?;
            Ok(())
        }
        assert!(matches!(register(), Err(NatApError::Validation(_))));
    }
}
