//! Target process supervision and output framing

mod controller;
mod line_stream;
mod writer;

pub use controller::{program_exists, LaunchSpec, ProcessController, TargetPipes};
pub use line_stream::{Line, LineStream, OutputChannel, StreamEvent};
pub use writer::InputWriter;
