pub mod errors;
pub mod frame;
pub mod types;

pub use errors::{FrameError, TransportError};
pub use frame::{encode_frame, FrameCodec, RawFrame, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use types::{Channel, ConnState, User, ROOT_CHANNEL_ID};
