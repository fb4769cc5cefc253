//! RFC 6455 framing core: opcodes, frames, masking, validation and
//! message reassembly. Runtime-agnostic.

pub mod assembler;
pub mod fragmenter;
pub mod frame;
pub mod mask;
pub mod opcode;
pub mod role;
pub mod utf8;
pub mod validation;

pub use assembler::{Assembled, AssembledMessage, MessageAssembler};
pub use fragmenter::MessageFragmenter;
pub use frame::{Frame, FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, RsvBits};
pub use mask::{MaskGenerator, apply_mask};
pub use opcode::OpCode;
pub use role::Role;
pub use utf8::{Utf8Validator, validate_utf8};
pub use validation::FrameValidator;
