//! Cooperative agents. An agent exports one unit of scheduling,
//! `do_work`, returning how much it accomplished; a runner composes an
//! agent with an idle strategy on a dedicated thread, and an invoker drives
//! an agent from the caller's own thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::concurrent::strategies::IdleStrategy;
use crate::util::{BusError, Result};

/// A cooperatively-scheduled unit of work.
pub trait Agent {
    /// Perform one bounded cycle of work. Returns the number of units done;
    /// zero lets the scheduler idle. An error is routed to the runner's
    /// error handling and does not stop the agent unless it is terminal.
    fn do_work(&mut self) -> Result<usize>;

    /// Name used for the runner thread and log messages.
    fn role_name(&self) -> &str;

    /// Invoked once when the duty cycle ends.
    fn on_close(&mut self) {}
}

impl<T> Agent for Box<T>
where
    T: Agent + ?Sized,
{
    fn do_work(&mut self) -> Result<usize> {
        (**self).do_work()
    }

    fn role_name(&self) -> &str {
        (**self).role_name()
    }

    fn on_close(&mut self) {
        (**self).on_close()
    }
}

/// Drives an agent from the calling thread, for deployments that embed one
/// agent's duty cycle inside another's (the conductor inside the sequencer,
/// or a driver inside `await_response`).
pub struct AgentInvoker<A>
where
    A: Agent,
{
    agent: A,
    error_handler: Box<dyn FnMut(&BusError) + Send>,
}

impl<A> AgentInvoker<A>
where
    A: Agent,
{
    /// Wrap an agent for inline invocation. Errors from `do_work` go to
    /// `error_handler` rather than the caller.
    pub fn new(agent: A, error_handler: Box<dyn FnMut(&BusError) + Send>) -> Self {
        AgentInvoker {
            agent,
            error_handler,
        }
    }

    /// Run a single work cycle, reporting units of work done.
    pub fn invoke(&mut self) -> usize {
        match self.agent.do_work() {
            Ok(work_count) => work_count,
            Err(e) => {
                (self.error_handler)(&e);
                0
            }
        }
    }

    /// Access the wrapped agent.
    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// Mutable access to the wrapped agent.
    pub fn agent_mut(&mut self) -> &mut A {
        &mut self.agent
    }
}

/// Owns a worker thread that repeatedly calls `do_work` and idles according
/// to the configured strategy until stopped.
pub struct AgentRunner {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    role_name: String,
}

impl AgentRunner {
    /// Start `agent` on a new thread. Errors from `do_work` are passed to
    /// `error_handler`; [`BusError::ClientClosed`] ends the duty cycle.
    pub fn start<A, S>(
        mut agent: A,
        mut idle_strategy: S,
        mut error_handler: Box<dyn FnMut(&BusError) + Send>,
    ) -> Result<Self>
    where
        A: Agent + Send + 'static,
        S: IdleStrategy + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = Arc::clone(&running);
        let role_name = agent.role_name().to_string();
        let thread_name = role_name.clone();

        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                debug!("agent '{}' duty cycle starting", agent.role_name());
                while running_flag.load(Ordering::Acquire) {
                    match agent.do_work() {
                        Ok(work_count) => idle_strategy.idle(work_count),
                        Err(BusError::ClientClosed) => break,
                        Err(e) => {
                            warn!("agent '{}' work cycle failed: {}", agent.role_name(), e);
                            error_handler(&e);
                            idle_strategy.idle(0);
                        }
                    }
                }
                agent.on_close();
                debug!("agent '{}' duty cycle ended", agent.role_name());
            })
            .map_err(|_| BusError::IllegalState)?;

        Ok(AgentRunner {
            running,
            thread: Some(thread),
            role_name,
        })
    }

    /// Name of the agent this runner drives.
    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    /// Signal the duty cycle to stop and wait for the thread to exit.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            // A panicking agent already logged its failure; nothing useful
            // remains to do with the join result
            let _ = thread.join();
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.close();
    }
}
