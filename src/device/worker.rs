//! Secondary command buffer recording threads.
//!
//! Each draw thread owns a fifo of command batches. The producer appends commands to a per thread
//! staging list and hands the list over once it reaches [`STAGING_FLUSH_THRESHOLD`] entries or when
//! an unstaged command is pushed. Workers replay every batch in order against the secondary buffer
//! they are currently recording.

use std::any::Any;
use std::sync::{Arc, Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use ash::vk;
use concurrent_queue::{ConcurrentQueue, PopError};
use static_assertions::assert_impl_all;

use crate::backend::Backend;
use crate::device::command::{Command, record_command};
use crate::objects::InheritanceInfo;

pub const MAX_DRAW_THREADS: usize = 8;

pub const STAGING_FLUSH_THRESHOLD: usize = 1500;

pub enum ThreadCommand {
    Begin {
        command_buffer: vk::CommandBuffer,
        inheritance: InheritanceInfo,
    },
    Record(Command),
    End,
    Signal(Arc<CompletionEvent>),
}

assert_impl_all!(ThreadCommand: Send);

/// A manual reset event used to wait for a worker to reach a point in its fifo.
pub struct CompletionEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl CompletionEvent {
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        *self.signaled.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock().unwrap() = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap()
    }

    /// Blocks until the event is signaled. Panics if `failed` is set while waiting.
    pub fn wait(&self, failed: &AtomicBool) {
        let mut guard = self.signaled.lock().unwrap();
        loop {
            if *guard {
                return;
            }
            let (new_guard, result) = self.condvar.wait_timeout(guard, Duration::from_secs(1)).unwrap();
            guard = new_guard;

            if result.timed_out() && !*guard {
                log::warn!("Timeout while waiting for draw thread");
                if failed.load(Ordering::Acquire) {
                    panic!("Draw thread has failed");
                }
            }
        }
    }
}

impl Default for CompletionEvent {
    fn default() -> Self {
        Self::new()
    }
}

struct WorkerShare {
    queue: ConcurrentQueue<Vec<ThreadCommand>>,
    failed: AtomicBool,
}

struct CommandBufferThread {
    share: Arc<WorkerShare>,
    thread: Option<JoinHandle<()>>,
    staging: Vec<ThreadCommand>,
    event: Arc<CompletionEvent>,
    recording: Option<vk::CommandBuffer>,
    pushed: u64,
}

impl CommandBufferThread {
    fn spawn(index: usize, backend: Arc<dyn Backend>) -> Self {
        let share = Arc::new(WorkerShare {
            queue: ConcurrentQueue::unbounded(),
            failed: AtomicBool::new(false),
        });

        let share_clone = share.clone();
        let thread = std::thread::Builder::new()
            .name(format!("DrawCmdBufferThread{}", index))
            .spawn(move || {
                let share = share_clone.clone();
                if let Err(err) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                    run_worker(share, backend);
                    log::debug!("Draw thread {} finished", index);
                })) {
                    let err_ref: &dyn Any = &err;
                    if let Some(err) = err_ref.downcast_ref::<&str>() {
                        log::error!("Draw thread {} panicked: {}", index, err);
                    } else if let Some(err) = err_ref.downcast_ref::<String>() {
                        log::error!("Draw thread {} panicked: {}", index, err);
                    } else {
                        log::error!("Draw thread {} panicked with non debug error", index);
                    }
                    share_clone.failed.store(true, Ordering::Release);
                    share_clone.queue.close();
                    panic!("Draw thread panicked");
                }
            });

        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                log::error!("Failed to spawn draw thread {}: {:?}", index, err);
                panic!()
            }
        };

        Self {
            share,
            thread: Some(thread),
            staging: Vec::new(),
            event: Arc::new(CompletionEvent::new()),
            recording: None,
            pushed: 0,
        }
    }

    fn hand_over(&mut self, batch: Vec<ThreadCommand>) {
        if batch.is_empty() {
            return;
        }
        if self.share.queue.push(batch).is_err() {
            log::error!("Pushed commands to a closed draw thread");
            panic!()
        }
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    fn flush(&mut self) {
        let batch = std::mem::take(&mut self.staging);
        self.hand_over(batch);
    }

    fn shutdown(&mut self) {
        self.share.queue.close();
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::warn!("Draw thread ended with a panic");
            }
        }
    }
}

fn run_worker(share: Arc<WorkerShare>, backend: Arc<dyn Backend>) {
    let mut current: Option<vk::CommandBuffer> = None;

    loop {
        match share.queue.pop() {
            Ok(batch) => {
                for command in batch {
                    match command {
                        ThreadCommand::Begin { command_buffer, inheritance } => {
                            if current.is_some() {
                                log::error!("Draw thread began {:?} while still recording {:?}", command_buffer, current);
                                panic!()
                            }
                            backend.begin_command_buffer(command_buffer, Some(&inheritance));
                            current = Some(command_buffer);
                        }
                        ThreadCommand::Record(command) => {
                            match current {
                                Some(command_buffer) => record_command(backend.as_ref(), command_buffer, &command),
                                None => {
                                    log::error!("Draw thread received {} without a command buffer", command.name());
                                    panic!()
                                }
                            }
                        }
                        ThreadCommand::End => {
                            match current.take() {
                                Some(command_buffer) => backend.end_command_buffer(command_buffer),
                                None => {
                                    log::error!("Draw thread received end without a command buffer");
                                    panic!()
                                }
                            }
                        }
                        ThreadCommand::Signal(event) => event.signal(),
                    }
                }
            }
            Err(PopError::Empty) => std::thread::park(),
            Err(PopError::Closed) => break,
        }
    }
}

/// The fixed set of draw threads used to record batches.
pub struct CommandThreadPool {
    threads: Vec<CommandBufferThread>,
}

impl CommandThreadPool {
    pub fn new(backend: Arc<dyn Backend>, count: usize) -> Self {
        if count == 0 || count > MAX_DRAW_THREADS {
            log::error!("Draw thread count {} must be in 1..={}", count, MAX_DRAW_THREADS);
            panic!()
        }

        let threads = (0..count).map(|index| CommandBufferThread::spawn(index, backend.clone())).collect();
        log::debug!("Started {} draw threads", count);

        Self {
            threads,
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    fn check_index(&self, index: usize) {
        if index >= self.threads.len() {
            log::error!("Draw thread index {} out of range for pool of {}", index, self.threads.len());
            panic!()
        }
    }

    fn thread(&mut self, index: usize) -> &mut CommandBufferThread {
        self.check_index(index);
        &mut self.threads[index]
    }

    fn thread_ref(&self, index: usize) -> &CommandBufferThread {
        self.check_index(index);
        &self.threads[index]
    }

    /// Pushes a command to a thread. Staged commands are delayed until the staging list is full or
    /// the thread is flushed. Unstaged commands flush the staging list first.
    pub fn push_command(&mut self, index: usize, command: ThreadCommand, allow_staging: bool) {
        let thread = self.thread(index);
        thread.pushed += 1;

        if allow_staging {
            thread.staging.push(command);
            if thread.staging.len() >= STAGING_FLUSH_THRESHOLD {
                thread.flush();
            }
        } else {
            thread.flush();
            thread.hand_over(vec![command]);
        }
    }

    /// Hands all staged commands of a thread to the worker.
    pub fn flush_to_thread(&mut self, index: usize) {
        self.thread(index).flush();
    }

    pub fn staged_count(&self, index: usize) -> usize {
        self.thread_ref(index).staging.len()
    }

    pub fn pushed_count(&self, index: usize) -> u64 {
        self.thread_ref(index).pushed
    }

    pub fn is_recording(&self, index: usize) -> bool {
        self.thread_ref(index).recording.is_some()
    }

    /// Starts recording `command_buffer` on a thread.
    pub fn begin(&mut self, index: usize, command_buffer: vk::CommandBuffer, inheritance: InheritanceInfo) {
        if let Some(current) = self.thread_ref(index).recording {
            log::error!("Draw thread {} is already recording {:?}", index, current);
            panic!()
        }
        self.push_command(index, ThreadCommand::Begin { command_buffer, inheritance }, false);
        self.thread(index).recording = Some(command_buffer);
    }

    /// Records a command on a thread that is recording.
    pub fn record(&mut self, index: usize, command: Command) {
        if !self.is_recording(index) {
            log::error!("Recorded {} on draw thread {} that is not recording", command.name(), index);
            panic!()
        }
        self.push_command(index, ThreadCommand::Record(command), true);
    }

    /// Flushes a recording thread and queues the end of its command buffer followed by a signal of
    /// its completion event.
    pub fn end(&mut self, index: usize) {
        if !self.is_recording(index) {
            log::error!("Ended draw thread {} that is not recording", index);
            panic!()
        }
        let event = self.thread_ref(index).event.clone();
        event.reset();

        self.flush_to_thread(index);
        self.push_command(index, ThreadCommand::End, false);
        self.push_command(index, ThreadCommand::Signal(event), false);
    }

    /// Blocks until a thread ended with [`CommandThreadPool::end`] has finished recording and returns
    /// the recorded command buffer.
    pub fn wait(&mut self, index: usize) -> vk::CommandBuffer {
        let thread = self.thread(index);
        let command_buffer = match thread.recording.take() {
            Some(command_buffer) => command_buffer,
            None => {
                log::error!("Waited on draw thread {} that is not recording", index);
                panic!()
            }
        };

        thread.event.wait(&thread.share.failed);
        thread.event.reset();
        command_buffer
    }

    pub fn has_failed(&self) -> bool {
        self.threads.iter().any(|thread| thread.share.failed.load(Ordering::Acquire))
    }

    /// Stops and joins every thread. Commands that were already handed over are still recorded.
    pub fn shutdown(&mut self) {
        for thread in &mut self.threads {
            thread.shutdown();
        }
    }
}

impl Drop for CommandThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::{Backend, QueueType};
    use crate::backend::capture::{CaptureBackend, RecordedCall};
    use crate::objects::Pass;

    use super::*;

    fn make_pool(count: usize) -> (Arc<CaptureBackend>, CommandThreadPool, vk::CommandPool, InheritanceInfo) {
        let backend = Arc::new(CaptureBackend::new());
        let pool = CommandThreadPool::new(backend.clone(), count);
        let command_pool = backend.create_command_pool(QueueType::Graphics);
        let pass = Pass::new(backend.fabricate(), backend.fabricate(), vk::Rect2D::default());

        (backend, pool, command_pool, pass.inheritance(0))
    }

    #[test]
    fn test_commands_recorded_in_push_order() {
        let (backend, mut pool, command_pool, inheritance) = make_pool(2);
        let buffer = backend.allocate_command_buffer(command_pool, vk::CommandBufferLevel::SECONDARY);

        pool.begin(1, buffer, inheritance);
        pool.record(1, Command::Draw { vertex_count: 1, instance_count: 1, first_vertex: 0, first_instance: 0 });
        pool.record(1, Command::Draw { vertex_count: 2, instance_count: 1, first_vertex: 0, first_instance: 0 });
        pool.record(1, Command::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 });
        pool.end(1);
        assert_eq!(pool.wait(1), buffer);

        let record = backend.record(buffer).unwrap();
        assert_eq!(record.thread.as_deref(), Some("DrawCmdBufferThread1"));
        let counts: Vec<u32> = record.calls.iter().map(|call| match call {
            RecordedCall::Draw { vertex_count, .. } => *vertex_count,
            other => panic!("Unexpected call {:?}", other),
        }).collect();
        assert_eq!(counts, vec![1, 2, 3]);
    }

    #[test]
    fn test_staging_threshold_flushes() {
        let (backend, mut pool, command_pool, inheritance) = make_pool(1);
        let buffer = backend.allocate_command_buffer(command_pool, vk::CommandBufferLevel::SECONDARY);

        pool.begin(0, buffer, inheritance);
        for _ in 0..(STAGING_FLUSH_THRESHOLD - 1) {
            pool.record(0, Command::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 });
        }
        assert_eq!(pool.staged_count(0), STAGING_FLUSH_THRESHOLD - 1);

        pool.record(0, Command::EndLabel);
        assert_eq!(pool.staged_count(0), 0);
        assert_eq!(pool.pushed_count(0), STAGING_FLUSH_THRESHOLD as u64 + 1);
    }

    #[test]
    fn test_unstaged_command_flushes_staging_first() {
        let (backend, mut pool, command_pool, inheritance) = make_pool(1);
        let first = backend.allocate_command_buffer(command_pool, vk::CommandBufferLevel::SECONDARY);

        pool.begin(0, first, inheritance);
        pool.record(0, Command::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 });
        assert_eq!(pool.staged_count(0), 1);

        pool.end(0);
        pool.wait(0);
        assert_eq!(pool.staged_count(0), 0);
        assert_eq!(backend.calls(first).len(), 1);
    }

    #[test]
    #[should_panic]
    fn test_record_without_begin() {
        let (_, mut pool, _, _) = make_pool(1);
        pool.record(0, Command::EndLabel);
    }

    #[test]
    #[should_panic(expected = "explicit panic")]
    fn test_out_of_range_query() {
        let (_, pool, _, _) = make_pool(2);
        pool.staged_count(2);
    }

    #[test]
    #[should_panic(expected = "explicit panic")]
    fn test_out_of_range_begin() {
        let (backend, mut pool, command_pool, inheritance) = make_pool(2);
        let buffer = backend.allocate_command_buffer(command_pool, vk::CommandBufferLevel::SECONDARY);
        pool.begin(5, buffer, inheritance);
    }

    #[test]
    fn test_completion_event() {
        let event = Arc::new(CompletionEvent::new());
        let failed = AtomicBool::new(false);

        let signal = event.clone();
        let thread = std::thread::spawn(move || signal.signal());
        event.wait(&failed);
        thread.join().unwrap();

        assert!(event.is_signaled());
        event.reset();
        assert!(!event.is_signaled());
    }
}
