//! The per-block processing contract.

use crate::context::BlockContext;
use crate::error::Result;

/// User logic applied to every block of a run.
///
/// Each worker builds its own operator once, through the factory passed to
/// [`Applier::apply`](crate::Applier::apply), and reuses it for all blocks it
/// processes. Expensive setup (loading a model, parsing a lookup table)
/// therefore belongs in the factory, not in [`Operator::apply`].
pub trait Operator {
    /// Per-block result collected for the aggregate step.
    type Output: Send;

    /// Process the current block: read inputs from `ctx` and set outputs.
    fn apply(&mut self, ctx: &mut BlockContext<'_>) -> Result<Self::Output>;
}

/// An operator backed by a closure.
///
/// ```ignore
/// let factory = || Ok(ClosureOperator::new(|ctx| {
///     let a = ctx.raster("image")?.array(0)?;
///     ctx.output("copy")?.set_array(a, 0)
/// }));
/// applier.apply("copy", factory)?;
/// ```
pub struct ClosureOperator<F> {
    f: F,
}

impl<F> ClosureOperator<F> {
    pub fn new<T>(f: F) -> Self
    where
        F: FnMut(&mut BlockContext<'_>) -> Result<T>,
    {
        Self { f }
    }
}

impl<F, T> Operator for ClosureOperator<F>
where
    F: FnMut(&mut BlockContext<'_>) -> Result<T>,
    T: Send,
{
    type Output = T;

    fn apply(&mut self, ctx: &mut BlockContext<'_>) -> Result<T> {
        (self.f)(ctx)
    }
}
