//! Message passing between the processes of a distributed run.  Each
//! process runs its own pipeline; stages that need their neighbours' data
//! are handed a controller when they are built.

mod threaded;

pub use threaded::*;

use crate::error::{PipelineError, PipelineResult};

pub trait Controller {
    fn local_process_id(&self) -> usize;

    fn number_of_processes(&self) -> usize;

    /// Sends `values` to `remote`.  Messages between a pair of processes
    /// arrive in the order they were sent.
    fn send(&self, values: &[f64], remote: usize, tag: u32) -> PipelineResult<()>;

    /// Blocks until the next message from `remote` arrives.  A message with
    /// a different tag is a protocol error.
    fn receive(&self, remote: usize, tag: u32) -> PipelineResult<Vec<f64>>;

    /// Copies `values` from `root` to every other process.
    fn broadcast(&self, values: &mut Vec<f64>, root: usize, tag: u32) -> PipelineResult<()> {
        if self.local_process_id() == root {
            for remote in (0..self.number_of_processes()).filter(|p| *p != root) {
                self.send(values, remote, tag)?;
            }
        } else {
            *values = self.receive(root, tag)?;
        }
        Ok(())
    }
}

/// The single process case.  There is nobody to talk to.
#[derive(Clone, Copy, Debug, Default)]
pub struct DummyController;

impl Controller for DummyController {
    fn local_process_id(&self) -> usize {
        0
    }

    fn number_of_processes(&self) -> usize {
        1
    }

    fn send(&self, _values: &[f64], remote: usize, _tag: u32) -> PipelineResult<()> {
        Err(PipelineError::Communication(format!(
            "single process controller cannot send to {remote}"
        )))
    }

    fn receive(&self, remote: usize, _tag: u32) -> PipelineResult<Vec<f64>> {
        Err(PipelineError::Communication(format!(
            "single process controller cannot receive from {remote}"
        )))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn dummy_is_alone() {
        let controller = DummyController;
        assert_eq!(controller.number_of_processes(), 1);
        assert!(controller.send(&[1.0], 1, 0).is_err());
        let mut values = vec![1.0];
        // the root of a one process broadcast has nobody to send to
        assert!(controller.broadcast(&mut values, 0, 0).is_ok());
    }
}
