pub mod util;
pub mod objects;
pub mod backend;
pub mod device;

pub use util::id::UUID;
pub use util::id::NamedUUID;

pub use device::GraphicsDevice;
pub use device::config::GraphicsDeviceCreateInfo;

pub mod prelude {
    pub use crate::util::id::UUID;
    pub use crate::util::id::NamedUUID;

    pub use crate::backend::{Backend, QueueType};
    pub use crate::device::GraphicsDevice;
    pub use crate::device::config::GraphicsDeviceCreateInfo;

    pub type Vec4f32 = nalgebra::Vector4<f32>;
}
