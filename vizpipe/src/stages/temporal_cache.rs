use crate::cache::DataCache;
use crate::error::PipelineResult;
use crate::executive::{DataContext, UpdateExtentContext};
use crate::extent::UpdateRequest;
use crate::mtime::{MTime, ModTime};
use crate::types::Algorithm;

/// Remembers recent time steps of its input.  A request for a cached step is
/// answered without updating anything upstream.
///
/// Entries are keyed by the whole request, so the same time at a different
/// extent or piece is a separate entry.  Requests without a time pass
/// straight through.  Any upstream modification drops every entry.
pub struct TemporalCache {
    cache: DataCache<UpdateRequest>,
    upstream_seen: ModTime,
    mtime: MTime,
}

impl TemporalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: DataCache::new(capacity),
            upstream_seen: ModTime::ZERO,
            mtime: MTime::new(),
        }
    }

    pub fn cache(&self) -> &DataCache<UpdateRequest> {
        &self.cache
    }

    /// Resizing keeps the most recently used entries and does not count as a
    /// modification.
    pub fn set_cache_size(&mut self, capacity: usize) {
        self.cache.set_cache_size(capacity);
    }

    pub fn set_use_extended_memory(&mut self, extended: bool) {
        self.cache.set_use_extended_memory(extended);
    }
}

impl Algorithm for TemporalCache {
    fn mtime(&self) -> ModTime {
        self.mtime.get()
    }

    fn request_update_extent(&mut self, ctx: &mut UpdateExtentContext) -> PipelineResult<()> {
        let upstream = ctx.input_pipeline_mtime(0, 0);
        if upstream > self.upstream_seen {
            let dropped = self.cache.invalidate();
            if dropped > 0 {
                debug!("upstream modified, dropped {dropped} cached steps");
            }
            self.upstream_seen = upstream;
        }
        let request = ctx.request();
        if request.time.is_some() && self.cache.contains(&request) {
            trace!("cache hit for {request}");
            ctx.release_input(0, 0);
        }
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
        let request = ctx.request(0);
        if request.time.is_none() {
            let data = ctx.required_input(0, 0)?.clone();
            ctx.set_output(0, data);
            return Ok(());
        }
        if let Some(hit) = self.cache.lookup(&request) {
            let data = hit.clone();
            ctx.set_output(0, data);
            return Ok(());
        }
        let data = ctx.required_input(0, 0)?.clone();
        if let Some((evicted, _)) = self.cache.insert(request, data.clone()) {
            debug!("evicted {evicted}, {}", self.cache.stats());
        }
        ctx.set_output(0, data);
        Ok(())
    }
}
