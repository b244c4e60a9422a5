use thiserror::Error;

/// Failures while slicing the control stream into frames.
///
/// Every variant except `Payload` is a framing violation: the stream cannot
/// be resynchronized afterwards and the connection must be closed.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown message tag {0}")]
    UnknownTag(u16),
    #[error("payload of {size} bytes exceeds limit of {max}")]
    Oversized { size: usize, max: usize },
    #[error("payload codec failed: {0}")]
    Payload(#[from] protobuf::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Payload(_))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Io(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameError, TransportError};
    use mumble_protocol_2x::control::msgs;
    use protobuf::Message;
    use std::io;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            TransportError::Disconnected.to_string(),
            "transport disconnected"
        );
        assert_eq!(
            TransportError::InvalidConfig("server is required".to_string()).to_string(),
            "invalid config: server is required"
        );
        assert_eq!(
            TransportError::Io("disk".to_string()).to_string(),
            "io error: disk"
        );
        assert_eq!(
            TransportError::UnknownTarget("Lobby".to_string()).to_string(),
            "unknown target: Lobby"
        );
        assert_eq!(
            TransportError::from(FrameError::UnknownTag(99)).to_string(),
            "frame error: unknown message tag 99"
        );
    }

    #[test]
    fn from_io_error_maps_to_io_variant() {
        let error = io::Error::new(io::ErrorKind::Other, "broken");
        let mapped = TransportError::from(error);
        assert_eq!(mapped.to_string(), "io error: broken");
    }

    #[test]
    fn framing_errors_are_fatal() {
        assert!(FrameError::UnknownTag(25).is_fatal());
        assert!(FrameError::Oversized { size: 10, max: 5 }.is_fatal());
        assert!(FrameError::Io(io::Error::new(io::ErrorKind::Other, "x")).is_fatal());
    }

    #[test]
    fn frame_error_messages_are_stable() {
        assert_eq!(
            FrameError::UnknownTag(25).to_string(),
            "unknown message tag 25"
        );
        assert_eq!(
            FrameError::Oversized { size: 10, max: 5 }.to_string(),
            "payload of 10 bytes exceeds limit of 5"
        );
        assert_eq!(
            FrameError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "short read")).to_string(),
            "io error: short read"
        );
        assert_eq!(
            TransportError::from(FrameError::Oversized { size: 10, max: 5 }).to_string(),
            "frame error: payload of 10 bytes exceeds limit of 5"
        );
    }

    /// A payload that fails to parse is reported but does not end the stream.
    #[test]
    fn payload_errors_are_not_fatal() {
        let error = msgs::Ping::parse_from_bytes(&[0xff]).expect_err("truncated varint parsed");
        let error = FrameError::from(error);
        assert!(error.to_string().starts_with("payload codec failed: "));
        assert!(!error.is_fatal());
    }
}
