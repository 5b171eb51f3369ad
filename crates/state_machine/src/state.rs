#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    /// Long, trailing stop not armed yet.
    LongNormal,
    /// Long, trailing stop armed and ratcheting.
    LongTrailing,
}

impl PositionState {
    pub fn is_long(self) -> bool {
        !matches!(self, PositionState::Flat)
    }
}
