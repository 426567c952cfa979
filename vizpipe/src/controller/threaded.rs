use super::Controller;
use crate::error::{PipelineError, PipelineResult};

use kanal::{Receiver, Sender};

#[derive(Debug)]
struct Message {
    tag: u32,
    values: Vec<f64>,
}

/// Runs each process on its own thread, with one FIFO channel per ordered
/// pair of processes.
pub struct ThreadedController {
    rank: usize,
    size: usize,
    senders: Vec<Option<Sender<Message>>>,
    receivers: Vec<Option<Receiver<Message>>>,
}

impl ThreadedController {
    /// Creates the controllers of a `processes` wide run, indexed by rank.
    pub fn create(processes: usize) -> Vec<ThreadedController> {
        let mut controllers: Vec<ThreadedController> = (0..processes)
            .map(|rank| ThreadedController {
                rank,
                size: processes,
                senders: (0..processes).map(|_| None).collect(),
                receivers: (0..processes).map(|_| None).collect(),
            })
            .collect();
        for from in 0..processes {
            for to in 0..processes {
                if from != to {
                    let (tx, rx) = kanal::unbounded();
                    controllers[from].senders[to] = Some(tx);
                    controllers[to].receivers[from] = Some(rx);
                }
            }
        }
        controllers
    }

    /// Runs `f` once per process on scoped threads and collects the results
    /// by rank.
    pub fn run<R, F>(processes: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadedController) -> R + Sync,
    {
        let controllers = Self::create(processes);
        std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = controllers
                .into_iter()
                .map(|controller| scope.spawn(move || f(controller)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }

    fn check_remote(&self, remote: usize) -> PipelineResult<()> {
        if remote >= self.size || remote == self.rank {
            return Err(PipelineError::Communication(format!(
                "process {} has no channel to {remote}",
                self.rank
            )));
        }
        Ok(())
    }
}

impl Controller for ThreadedController {
    fn local_process_id(&self) -> usize {
        self.rank
    }

    fn number_of_processes(&self) -> usize {
        self.size
    }

    fn send(&self, values: &[f64], remote: usize, tag: u32) -> PipelineResult<()> {
        self.check_remote(remote)?;
        let sender = self.senders[remote]
            .as_ref()
            .ok_or_else(|| PipelineError::Communication(format!("no channel to {remote}")))?;
        trace!("{} -> {remote} tag {tag}, {} values", self.rank, values.len());
        sender
            .send(Message {
                tag,
                values: values.to_vec(),
            })
            .map_err(|err| PipelineError::Communication(format!("send to {remote}: {err}")))
    }

    fn receive(&self, remote: usize, tag: u32) -> PipelineResult<Vec<f64>> {
        self.check_remote(remote)?;
        let receiver = self.receivers[remote]
            .as_ref()
            .ok_or_else(|| PipelineError::Communication(format!("no channel from {remote}")))?;
        let message = receiver
            .recv()
            .map_err(|err| PipelineError::Communication(format!("receive from {remote}: {err}")))?;
        if message.tag != tag {
            return Err(PipelineError::Communication(format!(
                "expected tag {tag} from {remote}, got {}",
                message.tag
            )));
        }
        Ok(message.values)
    }
}
