use ash::vk;

use crate::backend::Backend;
use crate::device::command::{Command, record_command};
use crate::device::worker::CommandThreadPool;

/// Where state setting and draw commands are sent to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CommandSink {
    /// Recorded immediately into a primary command buffer.
    Main(vk::CommandBuffer),

    /// Deferred to a draw thread of the current batch.
    Thread(usize),

    /// Inside a pass with secondary subpass contents but outside of a batch. Nothing may be
    /// recorded.
    Blocked,
}

impl CommandSink {
    pub fn accepts_commands(&self) -> bool {
        !matches!(self, CommandSink::Blocked)
    }

    pub fn record(&self, command: Command, backend: &dyn Backend, threads: &mut CommandThreadPool) {
        match self {
            CommandSink::Main(command_buffer) => {
                log::trace!("Recording {} into {:?}", command.name(), command_buffer);
                record_command(backend, *command_buffer, &command);
            }
            CommandSink::Thread(thread) => {
                log::trace!("Pushing {} to draw thread {}", command.name(), thread);
                threads.record(*thread, command);
            }
            CommandSink::Blocked => {
                log::error!("Recorded {} in a pass with secondary contents outside of a batch", command.name());
                panic!()
            }
        }
    }
}
