use crate::error::PipelineResult;
use crate::executive::Pipeline;
use crate::extent::UpdateRequest;
use crate::types::StageId;

use criterion::Criterion;
use std::cell::RefCell;

/// Used to add a pipeline bench to criterion.  Every iteration updates the
/// stage returned by `builder` with the next of `requests`, wrapping around,
/// so a bench sees the mix of cached and uncached updates those requests
/// produce.
pub fn add_bench<F>(crit: &mut Criterion, name: &str, requests: Vec<UpdateRequest>, builder: F)
where
    F: BenchBuilder,
{
    let custom_bencher = match Bencher::new(builder, requests) {
        Ok(bencher) => RefCell::new(bencher),
        Err(err) => {
            error!("{name}: could not build pipeline: {err}");
            return;
        }
    };

    crit.bench_function(name, {
        let custom_bencher = &custom_bencher;
        move |b| {
            b.iter(|| {
                if let Err(err) = custom_bencher.borrow_mut().step() {
                    warn!("{name}: {err}");
                }
            });
        }
    });

    let bencher = custom_bencher.borrow();
    info!(
        "{name}: {} updates, target executed {} times",
        bencher.updates,
        bencher.pipeline.execute_count(bencher.stage)
    );
}

/// Wires a pipeline and returns the stage to update.
pub trait BenchBuilder: FnOnce(&mut Pipeline) -> PipelineResult<StageId> {}
impl<F> BenchBuilder for F where F: FnOnce(&mut Pipeline) -> PipelineResult<StageId> {}

struct Bencher {
    pipeline: Pipeline,
    stage: StageId,
    requests: Vec<UpdateRequest>,
    next: usize,
    updates: usize,
}

impl Bencher {
    fn new<B: BenchBuilder>(builder: B, requests: Vec<UpdateRequest>) -> PipelineResult<Self> {
        let mut pipeline = Pipeline::new();
        let stage = builder(&mut pipeline)?;
        let requests = if requests.is_empty() {
            vec![UpdateRequest::whole()]
        } else {
            requests
        };
        Ok(Self {
            pipeline,
            stage,
            requests,
            next: 0,
            updates: 0,
        })
    }

    fn step(&mut self) -> PipelineResult<()> {
        let request = self.requests[self.next];
        self.next = (self.next + 1) % self.requests.len();
        self.updates += 1;
        self.pipeline.update(self.stage, request)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::extent::Extent;
    use crate::stages::{TemporalCache, TemporalSource};

    #[test]
    fn steps_cycle_through_requests() {
        let requests = (0..3)
            .map(|t| UpdateRequest::whole().with_time(t as f64).unwrap())
            .collect();
        let mut bencher = Bencher::new(
            |pipeline: &mut Pipeline| {
                let mut source = TemporalSource::new(Extent::new(0, 7, 0, 0, 0, 0)?);
                source.set_time_step_range(0, 2);
                let source = pipeline.add(source);
                let cache = pipeline.add(TemporalCache::new(3));
                pipeline.connect(source, cache)?;
                Ok(cache.id())
            },
            requests,
        )
        .unwrap();
        for _ in 0..9 {
            bencher.step().unwrap();
        }
        assert_eq!(bencher.updates, 9);
        assert_eq!(bencher.next, 0);
        // the source ran once per time, the cache answered the rest
        assert_eq!(bencher.pipeline.execute_count(StageId(0)), 3);
    }
}
