use crate::error::{PipelineError, PipelineResult};
use crate::executive::{DataContext, InformationContext, UpdateExtentContext};
use crate::information::keys;
use crate::mtime::{MTime, ModTime};
use crate::time_steps::time_range;
use crate::types::Algorithm;

/// Maps input time onto output time as `(t + pre_shift) * scale + post_shift`.
/// Requests are mapped back before they go upstream.
pub struct TemporalShiftScale {
    pre_shift: f64,
    scale: f64,
    post_shift: f64,
    mtime: MTime,
}

impl Default for TemporalShiftScale {
    fn default() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }
}

impl TemporalShiftScale {
    pub fn new(pre_shift: f64, scale: f64, post_shift: f64) -> Self {
        Self {
            pre_shift,
            scale,
            post_shift,
            mtime: MTime::new(),
        }
    }

    pub fn set_pre_shift(&mut self, pre_shift: f64) {
        self.pre_shift = pre_shift;
        self.mtime.modified();
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
        self.mtime.modified();
    }

    pub fn set_post_shift(&mut self, post_shift: f64) {
        self.post_shift = post_shift;
        self.mtime.modified();
    }

    pub fn forward(&self, time: f64) -> f64 {
        (time + self.pre_shift) * self.scale + self.post_shift
    }

    pub fn inverse(&self, time: f64) -> f64 {
        (time - self.post_shift) / self.scale - self.pre_shift
    }

    fn check_scale(&self) -> PipelineResult<()> {
        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(PipelineError::configuration(format!(
                "time scale {} cannot be inverted",
                self.scale
            )));
        }
        Ok(())
    }
}

impl Algorithm for TemporalShiftScale {
    fn mtime(&self) -> ModTime {
        self.mtime.get()
    }

    fn request_information(&mut self, ctx: &mut InformationContext) -> PipelineResult<()> {
        self.check_scale()?;
        let info = ctx.output_mut(0);
        if let Some(steps) = info.get(keys::TIME_STEPS) {
            let mut steps: Vec<f64> = steps.into_iter().map(|t| self.forward(t)).collect();
            // a negative scale reverses the order
            steps.sort_by(f64::total_cmp);
            if let Some(range) = time_range(&steps) {
                info.set(keys::TIME_RANGE, range);
            }
            info.set(keys::TIME_STEPS, steps);
        } else if let Some([first, last]) = info.get(keys::TIME_RANGE) {
            let (a, b) = (self.forward(first), self.forward(last));
            info.set(keys::TIME_RANGE, [a.min(b), a.max(b)]);
        }
        Ok(())
    }

    fn request_update_extent(&mut self, ctx: &mut UpdateExtentContext) -> PipelineResult<()> {
        let request = ctx.request();
        if let Some(time) = request.time {
            let upstream = request.with_time(self.inverse(time.value()))?;
            ctx.set_input_requests(0, upstream);
        }
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
        let mut data = ctx.required_input(0, 0)?.clone();
        if let Some(time) = data.time() {
            data.set_time(self.forward(time));
        }
        ctx.set_output(0, data);
        Ok(())
    }
}
