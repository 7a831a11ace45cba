//! The 16-state JTAG TAP controller, as a pure transition table (§4.4).

/// One of the sixteen IEEE 1149.1 TAP controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    const ALL: [TapState; 16] = [
        TapState::TestLogicReset,
        TapState::RunTestIdle,
        TapState::SelectDrScan,
        TapState::CaptureDr,
        TapState::ShiftDr,
        TapState::Exit1Dr,
        TapState::PauseDr,
        TapState::Exit2Dr,
        TapState::UpdateDr,
        TapState::SelectIrScan,
        TapState::CaptureIr,
        TapState::ShiftIr,
        TapState::Exit1Ir,
        TapState::PauseIr,
        TapState::Exit2Ir,
        TapState::UpdateIr,
    ];

    /// `step(state, tms=0), step(state, tms=1)`, in that order.
    const fn transitions(self) -> (TapState, TapState) {
        use TapState::*;
        match self {
            TestLogicReset => (RunTestIdle, TestLogicReset),
            RunTestIdle => (RunTestIdle, SelectDrScan),
            SelectDrScan => (CaptureDr, SelectIrScan),
            CaptureDr => (ShiftDr, Exit1Dr),
            ShiftDr => (ShiftDr, Exit1Dr),
            Exit1Dr => (PauseDr, UpdateDr),
            PauseDr => (PauseDr, Exit2Dr),
            Exit2Dr => (ShiftDr, UpdateDr),
            UpdateDr => (RunTestIdle, SelectDrScan),
            SelectIrScan => (CaptureIr, TestLogicReset),
            CaptureIr => (ShiftIr, Exit1Ir),
            ShiftIr => (ShiftIr, Exit1Ir),
            Exit1Ir => (PauseIr, UpdateIr),
            PauseIr => (PauseIr, Exit2Ir),
            Exit2Ir => (ShiftIr, UpdateIr),
            UpdateIr => (RunTestIdle, SelectDrScan),
        }
    }

    /// Advances the TAP by one TMS bit. Total: every state has a defined successor
    /// for both `tms_bit == 0` and `tms_bit == 1`.
    pub const fn step(self, tms_bit: u8) -> TapState {
        let (on_zero, on_one) = self.transitions();
        if tms_bit & 1 == 0 { on_zero } else { on_one }
    }

    /// True only in Shift-DR and Shift-IR, the two states the Scan Planner treats
    /// specially (§4.5).
    pub const fn is_shift(self) -> bool {
        matches!(self, TapState::ShiftDr | TapState::ShiftIr)
    }

    /// True for the two Capture states, which reset `seen_tlr` (§3).
    pub const fn is_capture(self) -> bool {
        matches!(self, TapState::CaptureDr | TapState::CaptureIr)
    }
}

impl Default for TapState {
    /// The initial state after `configure_mpsse` (§4.4).
    fn default() -> Self {
        TapState::TestLogicReset
    }
}

/// Folds a TMS bit sequence over [`TapState::step`] starting from `initial`.
pub fn fold_tms(initial: TapState, tms_bits: impl IntoIterator<Item = u8>) -> TapState {
    tms_bits.into_iter().fold(initial, TapState::step)
}
