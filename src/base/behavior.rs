/// Per-cycle behavior shared by every simulated component.
pub trait ModuleBehaviors {
    type Error;

    /// Advance the component by one cycle.
    fn tick_one(&mut self) -> Result<(), Self::Error>;

    fn reset(&mut self);
}
