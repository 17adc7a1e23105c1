pub mod frames;

pub use frames::{ClientFrame, InboundFrame, ServerEvent};
