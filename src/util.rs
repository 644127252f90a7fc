/// Values which occupy a variable number of slots
///
/// Class files count some things in units that aren't one-per-element: `long` and `double`
/// constants take two constant pool indices, and `long` and `double` values take two local
/// variable or operand stack slots.
pub trait Width {
    /// Number of slots taken up by the value
    fn width(&self) -> usize;
}

impl<A: Width> Width for [A] {
    fn width(&self) -> usize {
        self.iter().map(|a| a.width()).sum()
    }
}
