use crate::data::DataKind;
use crate::error::PipelineResult;
use crate::executive::{DataContext, InformationContext, UpdateExtentContext};
use crate::mtime::ModTime;

use derive_more::Display;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Used to downcast a boxed [Algorithm] back to its concrete type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Constraints on what may be connected to an input port.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputPort {
    /// Accepted data kinds, empty meaning any.
    pub kinds: SmallVec<[DataKind; 4]>,
    /// The port may be left unconnected.
    pub optional: bool,
    /// The port accepts more than one connection.
    pub repeatable: bool,
}

impl InputPort {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn accepting(kinds: &[DataKind]) -> Self {
        Self {
            kinds: kinds.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }

    pub fn accepts(&self, kind: DataKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}

/// Implement this trait to create your own pipeline stage.
///
/// The executive drives a stage through three callbacks.  Information flows
/// down from the sources, update requests flow up from the consumers, and
/// data flows down again.  A callback that returns `Err` fails the update
/// for every stage fed by this one, and the stage keeps its previous output.
pub trait Algorithm: AsAny {
    fn number_of_input_ports(&self) -> usize {
        1
    }

    fn number_of_output_ports(&self) -> usize {
        1
    }

    #[allow(unused_variables)]
    fn input_port(&self, port: usize) -> InputPort {
        InputPort::any()
    }

    /// Stamp of the last parameter change.
    fn mtime(&self) -> ModTime;

    /// Populate output information from the upstream information.  Must
    /// yield the same output for the same input.
    #[allow(unused_variables)]
    fn request_information(&mut self, ctx: &mut InformationContext) -> PipelineResult<()> {
        Ok(())
    }

    /// Decide what each input must request given what was asked of the
    /// outputs.  By default inputs ask for the output 0 request unmodified.
    #[allow(unused_variables)]
    fn request_update_extent(&mut self, ctx: &mut UpdateExtentContext) -> PipelineResult<()> {
        Ok(())
    }

    /// Produce the outputs from inputs already updated to the requested
    /// extents.
    fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()>;

    fn type_name(&self) -> String {
        tynm::type_name::<Self>()
    }
}

impl fmt::Display for dyn Algorithm + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Index of a stage within a [Pipeline](crate::Pipeline).
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("#{_0}")]
pub struct StageId(pub(crate) usize);

impl StageId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A [StageId] that remembers the concrete algorithm type, so the algorithm
/// can be borrowed back from the pipeline without a manual downcast.
pub struct StageHandle<A> {
    id: StageId,
    _marker: PhantomData<fn() -> A>,
}

impl<A> StageHandle<A> {
    pub(crate) fn new(id: StageId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }
}

impl<A> Clone for StageHandle<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for StageHandle<A> {}

impl<A> fmt::Debug for StageHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageHandle({})", self.id)
    }
}

impl<A> From<StageHandle<A>> for StageId {
    fn from(handle: StageHandle<A>) -> Self {
        handle.id
    }
}

/// Downcasts a stage to its concrete type.
pub fn downcast_ref<A: Algorithm + 'static>(algorithm: &dyn Algorithm) -> Option<&A> {
    algorithm.as_any().downcast_ref::<A>()
}

pub fn downcast_mut<A: Algorithm + 'static>(algorithm: &mut dyn Algorithm) -> Option<&mut A> {
    algorithm.as_any_mut().downcast_mut::<A>()
}
