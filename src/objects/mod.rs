pub mod id;
pub mod sync;
pub mod barrier;
pub mod pass;
pub mod image;
pub mod pipeline;

pub use id::{BufferId, PassId, VertexLayoutId};

pub use sync::{Fence, SemaphoreOp, SemaphoreWait};

pub use barrier::{Barrier, BufferBarrier, Event, ImageBarrier, MemoryBarrier};

pub use pass::{BatchType, InheritanceInfo, Pass};

pub use image::{ImageBlit, ImageCopy};

pub use pipeline::{FramebufferLayout, InputLayout, PrimitiveGroup, ProgramKind, ShaderProgram, VertexLayout};
