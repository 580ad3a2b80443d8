pub mod codec;
pub mod error;
pub mod handshake;
pub mod parser;

pub use codec::{FrameCodec, MAX_CONTROL_LINE, PAYLOAD_FLUSH_THRESHOLD, Segment};
pub use error::{ProtocolError, Result};
pub use handshake::{ConnectOptions, TokenClaims, resolve_identity};
pub use parser::{Action, Operation, State, transition};
